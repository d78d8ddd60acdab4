use std::convert::TryFrom;

use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::error::AppResult;
use crate::models::availability::DateRange;
use crate::models::batch::BatchRecord;
use crate::services::schedule_utils;

#[derive(Debug, Clone)]
pub struct BatchRow {
    pub id: String,
    pub organizer_id: String,
    pub duration_minutes: i64,
    pub slots_per_contact: i64,
    pub range_start: String,
    pub range_end: String,
    pub options: String,
    pub unsatisfied_contacts: String,
    pub created_at: String,
}

impl BatchRow {
    pub fn from_record(record: &BatchRecord) -> AppResult<Self> {
        Ok(Self {
            id: record.id.clone(),
            organizer_id: record.organizer_id.clone(),
            duration_minutes: record.duration_minutes,
            slots_per_contact: record.slots_per_contact as i64,
            range_start: record.date_range.start.to_string(),
            range_end: record.date_range.end.to_string(),
            options: serde_json::to_string(&record.options)?,
            unsatisfied_contacts: serde_json::to_string(&record.unsatisfied_contacts)?,
            created_at: schedule_utils::format_utc(record.created_at),
        })
    }

    pub fn into_record(self) -> AppResult<BatchRecord> {
        let start = self
            .range_start
            .parse()
            .map_err(|_| crate::error::AppError::database("malformed batch range start"))?;
        let end = self
            .range_end
            .parse()
            .map_err(|_| crate::error::AppError::database("malformed batch range end"))?;
        Ok(BatchRecord {
            id: self.id,
            organizer_id: self.organizer_id,
            duration_minutes: self.duration_minutes,
            slots_per_contact: self.slots_per_contact.max(0) as usize,
            date_range: DateRange { start, end },
            options: serde_json::from_str(&self.options)?,
            unsatisfied_contacts: serde_json::from_str(&self.unsatisfied_contacts)?,
            created_at: schedule_utils::parse_utc(&self.created_at)?,
        })
    }
}

impl TryFrom<&Row<'_>> for BatchRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            organizer_id: row.get("organizer_id")?,
            duration_minutes: row.get("duration_minutes")?,
            slots_per_contact: row.get("slots_per_contact")?,
            range_start: row.get("range_start")?,
            range_end: row.get("range_end")?,
            options: row.get("options")?,
            unsatisfied_contacts: row.get("unsatisfied_contacts")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub struct BatchRepository;

impl BatchRepository {
    pub fn insert(conn: &Connection, row: &BatchRow) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO batches (
                    id,
                    organizer_id,
                    duration_minutes,
                    slots_per_contact,
                    range_start,
                    range_end,
                    options,
                    unsatisfied_contacts,
                    created_at
                ) VALUES (
                    :id,
                    :organizer_id,
                    :duration_minutes,
                    :slots_per_contact,
                    :range_start,
                    :range_end,
                    :options,
                    :unsatisfied_contacts,
                    :created_at
                )
            "#,
            named_params! {
                ":id": &row.id,
                ":organizer_id": &row.organizer_id,
                ":duration_minutes": &row.duration_minutes,
                ":slots_per_contact": &row.slots_per_contact,
                ":range_start": &row.range_start,
                ":range_end": &row.range_end,
                ":options": &row.options,
                ":unsatisfied_contacts": &row.unsatisfied_contacts,
                ":created_at": &row.created_at,
            },
        )?;

        Ok(())
    }

    pub fn find_by_id(conn: &Connection, id: &str) -> AppResult<Option<BatchRow>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT
                id,
                organizer_id,
                duration_minutes,
                slots_per_contact,
                range_start,
                range_end,
                options,
                unsatisfied_contacts,
                created_at
            FROM batches
            WHERE id = ?1
        "#,
        )?;

        let row = stmt
            .query_row([id], |row| BatchRow::try_from(row))
            .optional()?;

        Ok(row)
    }

    pub fn list_for_organizer(
        conn: &Connection,
        organizer_id: &str,
        limit: usize,
    ) -> AppResult<Vec<BatchRow>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT
                id,
                organizer_id,
                duration_minutes,
                slots_per_contact,
                range_start,
                range_end,
                options,
                unsatisfied_contacts,
                created_at
            FROM batches
            WHERE organizer_id = ?1
            ORDER BY created_at DESC
            LIMIT ?2
        "#,
        )?;

        let rows = stmt
            .query_map((organizer_id, limit as i64), |row| BatchRow::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}
