use std::convert::TryFrom;

use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::error::AppResult;
use crate::models::availability::WorkingHours;
use crate::models::settings::{OrganizerSettings, RetentionPolicy};
use crate::services::schedule_utils;

#[derive(Debug, Clone)]
pub struct OrganizerSettingsRow {
    pub organizer_id: String,
    pub timezone: String,
    pub workday_start_minute: i64,
    pub workday_end_minute: i64,
    pub buffer_minutes: i64,
    pub include_weekends: bool,
    pub retention_days: Option<i64>,
    pub updated_at: String,
}

impl OrganizerSettingsRow {
    pub fn from_record(record: &OrganizerSettings) -> Self {
        Self {
            organizer_id: record.organizer_id.clone(),
            timezone: record.timezone.name().to_string(),
            workday_start_minute: record.working_hours.start_minute as i64,
            workday_end_minute: record.working_hours.end_minute as i64,
            buffer_minutes: record.buffer_minutes,
            include_weekends: record.include_weekends,
            retention_days: record.retention.as_days(),
            updated_at: schedule_utils::format_utc(record.updated_at),
        }
    }

    pub fn into_record(self) -> AppResult<OrganizerSettings> {
        Ok(OrganizerSettings {
            organizer_id: self.organizer_id,
            timezone: schedule_utils::parse_timezone(&self.timezone)?,
            working_hours: WorkingHours::new(
                self.workday_start_minute.max(0) as u32,
                self.workday_end_minute.max(0) as u32,
            )?,
            buffer_minutes: self.buffer_minutes,
            include_weekends: self.include_weekends,
            retention: RetentionPolicy::from_days(self.retention_days),
            updated_at: schedule_utils::parse_utc(&self.updated_at)?,
        })
    }
}

impl TryFrom<&Row<'_>> for OrganizerSettingsRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            organizer_id: row.get("organizer_id")?,
            timezone: row.get("timezone")?,
            workday_start_minute: row.get("workday_start_minute")?,
            workday_end_minute: row.get("workday_end_minute")?,
            buffer_minutes: row.get("buffer_minutes")?,
            include_weekends: row.get::<_, i64>("include_weekends")? != 0,
            retention_days: row.get("retention_days")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub struct SettingsRepository;

impl SettingsRepository {
    pub fn get(conn: &Connection, organizer_id: &str) -> AppResult<Option<OrganizerSettingsRow>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT
                organizer_id,
                timezone,
                workday_start_minute,
                workday_end_minute,
                buffer_minutes,
                include_weekends,
                retention_days,
                updated_at
            FROM organizer_settings
            WHERE organizer_id = ?1
        "#,
        )?;

        let row = stmt
            .query_row([organizer_id], |row| OrganizerSettingsRow::try_from(row))
            .optional()?;

        Ok(row)
    }

    pub fn upsert(conn: &Connection, row: &OrganizerSettingsRow) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO organizer_settings (
                    organizer_id,
                    timezone,
                    workday_start_minute,
                    workday_end_minute,
                    buffer_minutes,
                    include_weekends,
                    retention_days,
                    updated_at
                ) VALUES (
                    :organizer_id,
                    :timezone,
                    :workday_start_minute,
                    :workday_end_minute,
                    :buffer_minutes,
                    :include_weekends,
                    :retention_days,
                    :updated_at
                )
                ON CONFLICT(organizer_id) DO UPDATE SET
                    timezone = excluded.timezone,
                    workday_start_minute = excluded.workday_start_minute,
                    workday_end_minute = excluded.workday_end_minute,
                    buffer_minutes = excluded.buffer_minutes,
                    include_weekends = excluded.include_weekends,
                    retention_days = excluded.retention_days,
                    updated_at = excluded.updated_at
            "#,
            named_params! {
                ":organizer_id": &row.organizer_id,
                ":timezone": &row.timezone,
                ":workday_start_minute": &row.workday_start_minute,
                ":workday_end_minute": &row.workday_end_minute,
                ":buffer_minutes": &row.buffer_minutes,
                ":include_weekends": row.include_weekends as i64,
                ":retention_days": &row.retention_days,
                ":updated_at": &row.updated_at,
            },
        )?;

        Ok(())
    }

    pub fn delete(conn: &Connection, organizer_id: &str) -> AppResult<()> {
        conn.execute(
            "DELETE FROM organizer_settings WHERE organizer_id = ?1",
            [organizer_id],
        )?;
        Ok(())
    }
}
