use std::convert::TryFrom;

use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::error::AppResult;
use crate::models::suggestion::{SuggestedSlot, SuggestionSetRecord, SuggestionStatus};
use crate::services::schedule_utils;

#[derive(Debug, Clone)]
pub struct SuggestionSetRow {
    pub id: String,
    pub batch_id: String,
    pub organizer_id: String,
    pub contact_id: String,
    pub contact_timezone: String,
    pub status: String,
    pub quarantine_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl SuggestionSetRow {
    pub fn from_record(record: &SuggestionSetRecord) -> Self {
        Self {
            id: record.id.clone(),
            batch_id: record.batch_id.clone(),
            organizer_id: record.organizer_id.clone(),
            contact_id: record.contact_id.clone(),
            contact_timezone: record.contact_timezone.clone(),
            status: record.status.as_str().to_string(),
            quarantine_reason: record.quarantine_reason.clone(),
            created_at: schedule_utils::format_utc(record.created_at),
            updated_at: schedule_utils::format_utc(record.updated_at),
        }
    }

    pub fn into_record(self, slots: Vec<SuggestedSlot>) -> AppResult<SuggestionSetRecord> {
        Ok(SuggestionSetRecord {
            id: self.id,
            batch_id: self.batch_id,
            organizer_id: self.organizer_id,
            contact_id: self.contact_id,
            contact_timezone: self.contact_timezone,
            status: self.status.parse()?,
            slots,
            quarantine_reason: self.quarantine_reason,
            created_at: schedule_utils::parse_utc(&self.created_at)?,
            updated_at: schedule_utils::parse_utc(&self.updated_at)?,
        })
    }
}

impl TryFrom<&Row<'_>> for SuggestionSetRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            batch_id: row.get("batch_id")?,
            organizer_id: row.get("organizer_id")?,
            contact_id: row.get("contact_id")?,
            contact_timezone: row.get("contact_timezone")?,
            status: row.get("status")?,
            quarantine_reason: row.get("quarantine_reason")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SuggestionSlotRow {
    pub id: String,
    pub set_id: String,
    pub position: i64,
    pub start_at: String,
    pub end_at: String,
    pub score: f64,
    pub score_factors: Option<String>,
    pub selected: bool,
    pub expires_at: String,
}

impl SuggestionSlotRow {
    pub fn from_record(set_id: &str, position: usize, slot: &SuggestedSlot) -> AppResult<Self> {
        let score_factors = if slot.score_factors.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&slot.score_factors)?)
        };
        Ok(Self {
            id: slot.id.clone(),
            set_id: set_id.to_string(),
            position: position as i64,
            start_at: schedule_utils::format_utc(slot.start),
            end_at: schedule_utils::format_utc(slot.end),
            score: slot.score,
            score_factors,
            selected: slot.selected,
            expires_at: schedule_utils::format_utc(slot.expires_at),
        })
    }

    pub fn into_record(self) -> AppResult<SuggestedSlot> {
        let score_factors = match self.score_factors {
            Some(raw) if !raw.is_empty() => serde_json::from_str(&raw)?,
            _ => Vec::new(),
        };
        Ok(SuggestedSlot {
            id: self.id,
            start: schedule_utils::parse_utc(&self.start_at)?,
            end: schedule_utils::parse_utc(&self.end_at)?,
            score: self.score,
            score_factors,
            selected: self.selected,
            expires_at: schedule_utils::parse_utc(&self.expires_at)?,
        })
    }
}

impl TryFrom<&Row<'_>> for SuggestionSlotRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            set_id: row.get("set_id")?,
            position: row.get("position")?,
            start_at: row.get("start_at")?,
            end_at: row.get("end_at")?,
            score: row.get("score")?,
            score_factors: row.get("score_factors")?,
            selected: row.get::<_, i64>("selected")? != 0,
            expires_at: row.get("expires_at")?,
        })
    }
}

const SET_COLUMNS: &str = r#"
    id,
    batch_id,
    organizer_id,
    contact_id,
    contact_timezone,
    status,
    quarantine_reason,
    created_at,
    updated_at
"#;

pub struct SuggestionRepository;

impl SuggestionRepository {
    pub fn insert_set(conn: &Connection, row: &SuggestionSetRow) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO suggestion_sets (
                    id,
                    batch_id,
                    organizer_id,
                    contact_id,
                    contact_timezone,
                    status,
                    quarantine_reason,
                    created_at,
                    updated_at
                ) VALUES (
                    :id,
                    :batch_id,
                    :organizer_id,
                    :contact_id,
                    :contact_timezone,
                    :status,
                    :quarantine_reason,
                    :created_at,
                    :updated_at
                )
            "#,
            named_params! {
                ":id": &row.id,
                ":batch_id": &row.batch_id,
                ":organizer_id": &row.organizer_id,
                ":contact_id": &row.contact_id,
                ":contact_timezone": &row.contact_timezone,
                ":status": &row.status,
                ":quarantine_reason": &row.quarantine_reason,
                ":created_at": &row.created_at,
                ":updated_at": &row.updated_at,
            },
        )?;

        Ok(())
    }

    pub fn insert_slot(conn: &Connection, row: &SuggestionSlotRow) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO suggestion_slots (
                    id,
                    set_id,
                    position,
                    start_at,
                    end_at,
                    score,
                    score_factors,
                    selected,
                    expires_at
                ) VALUES (
                    :id,
                    :set_id,
                    :position,
                    :start_at,
                    :end_at,
                    :score,
                    :score_factors,
                    :selected,
                    :expires_at
                )
            "#,
            named_params! {
                ":id": &row.id,
                ":set_id": &row.set_id,
                ":position": &row.position,
                ":start_at": &row.start_at,
                ":end_at": &row.end_at,
                ":score": &row.score,
                ":score_factors": &row.score_factors,
                ":selected": row.selected as i64,
                ":expires_at": &row.expires_at,
            },
        )?;

        Ok(())
    }

    pub fn find_set(
        conn: &Connection,
        batch_id: &str,
        contact_id: &str,
    ) -> AppResult<Option<SuggestionSetRow>> {
        let sql = format!(
            "SELECT {SET_COLUMNS} FROM suggestion_sets WHERE batch_id = ?1 AND contact_id = ?2"
        );
        let mut stmt = conn.prepare(&sql)?;

        let row = stmt
            .query_row((batch_id, contact_id), |row| SuggestionSetRow::try_from(row))
            .optional()?;

        Ok(row)
    }

    pub fn list_sets_for_batch(conn: &Connection, batch_id: &str) -> AppResult<Vec<SuggestionSetRow>> {
        let sql = format!(
            "SELECT {SET_COLUMNS} FROM suggestion_sets WHERE batch_id = ?1 ORDER BY contact_id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;

        let rows = stmt
            .query_map([batch_id], |row| SuggestionSetRow::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn list_sets_for_organizer(
        conn: &Connection,
        organizer_id: &str,
    ) -> AppResult<Vec<SuggestionSetRow>> {
        let sql = format!(
            "SELECT {SET_COLUMNS} FROM suggestion_sets WHERE organizer_id = ?1 ORDER BY created_at ASC, id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;

        let rows = stmt
            .query_map([organizer_id], |row| SuggestionSetRow::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn list_slots_for_set(conn: &Connection, set_id: &str) -> AppResult<Vec<SuggestionSlotRow>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT
                id,
                set_id,
                position,
                start_at,
                end_at,
                score,
                score_factors,
                selected,
                expires_at
            FROM suggestion_slots
            WHERE set_id = ?1
            ORDER BY position ASC
        "#,
        )?;

        let rows = stmt
            .query_map([set_id], |row| SuggestionSlotRow::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Loads a set together with its slots.
    pub fn load_record(conn: &Connection, row: SuggestionSetRow) -> AppResult<SuggestionSetRecord> {
        let slots = Self::list_slots_for_set(conn, &row.id)?
            .into_iter()
            .map(SuggestionSlotRow::into_record)
            .collect::<AppResult<Vec<_>>>()?;
        row.into_record(slots)
    }

    /// Moves a set to `status` only if it is currently `from`. Returns whether
    /// a row changed.
    pub fn transition_status(
        conn: &Connection,
        set_id: &str,
        from: SuggestionStatus,
        to: SuggestionStatus,
        updated_at: &str,
    ) -> AppResult<bool> {
        let affected = conn.execute(
            r#"
                UPDATE suggestion_sets SET
                    status = :to,
                    updated_at = :updated_at
                WHERE id = :id AND status = :from
            "#,
            named_params! {
                ":id": set_id,
                ":from": from.as_str(),
                ":to": to.as_str(),
                ":updated_at": updated_at,
            },
        )?;

        Ok(affected > 0)
    }

    pub fn quarantine(
        conn: &Connection,
        set_id: &str,
        reason: &str,
        updated_at: &str,
    ) -> AppResult<bool> {
        let affected = conn.execute(
            r#"
                UPDATE suggestion_sets SET
                    status = 'cleared',
                    quarantine_reason = :reason,
                    updated_at = :updated_at
                WHERE id = :id AND status != 'cleared'
            "#,
            named_params! {
                ":id": set_id,
                ":reason": reason,
                ":updated_at": updated_at,
            },
        )?;

        Ok(affected > 0)
    }

    pub fn clear_active_for_batch(
        conn: &Connection,
        batch_id: &str,
        updated_at: &str,
    ) -> AppResult<usize> {
        let affected = conn.execute(
            r#"
                UPDATE suggestion_sets SET
                    status = 'cleared',
                    updated_at = :updated_at
                WHERE batch_id = :batch_id AND status = 'active'
            "#,
            named_params! {
                ":batch_id": batch_id,
                ":updated_at": updated_at,
            },
        )?;

        Ok(affected)
    }

    pub fn mark_slot_selected(conn: &Connection, slot_id: &str) -> AppResult<()> {
        conn.execute(
            "UPDATE suggestion_slots SET selected = 1 WHERE id = ?1",
            [slot_id],
        )?;
        Ok(())
    }

    pub fn delete_set(conn: &Connection, set_id: &str) -> AppResult<bool> {
        let affected = conn.execute("DELETE FROM suggestion_sets WHERE id = ?1", [set_id])?;
        Ok(affected > 0)
    }
}
