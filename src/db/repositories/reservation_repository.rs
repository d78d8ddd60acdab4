use std::convert::TryFrom;

use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::error::AppResult;
use crate::models::reservation::{ReservationInterval, ReservationRecord, ReservationStatus};
use crate::services::schedule_utils;

#[derive(Debug, Clone)]
pub struct ReservationRow {
    pub id: String,
    pub organizer_id: String,
    pub contact_id: String,
    pub batch_id: String,
    pub suggestion_set_id: String,
    pub start_at: String,
    pub end_at: String,
    pub timezone: String,
    pub status: String,
    pub synced_to_external_calendar: bool,
    pub external_event_ref: Option<String>,
    pub expires_at: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ReservationRow {
    pub fn from_record(record: &ReservationRecord) -> Self {
        Self {
            id: record.id.clone(),
            organizer_id: record.organizer_id.clone(),
            contact_id: record.contact_id.clone(),
            batch_id: record.batch_id.clone(),
            suggestion_set_id: record.suggestion_set_id.clone(),
            start_at: schedule_utils::format_utc(record.interval.start),
            end_at: schedule_utils::format_utc(record.interval.end),
            timezone: record.interval.timezone.clone(),
            status: record.status.as_str().to_string(),
            synced_to_external_calendar: record.synced_to_external_calendar,
            external_event_ref: record.external_event_ref.clone(),
            expires_at: schedule_utils::format_utc(record.expires_at),
            created_at: schedule_utils::format_utc(record.created_at),
            updated_at: schedule_utils::format_utc(record.updated_at),
        }
    }

    pub fn into_record(self) -> AppResult<ReservationRecord> {
        Ok(ReservationRecord {
            id: self.id,
            organizer_id: self.organizer_id,
            contact_id: self.contact_id,
            batch_id: self.batch_id,
            suggestion_set_id: self.suggestion_set_id,
            interval: ReservationInterval {
                start: schedule_utils::parse_utc(&self.start_at)?,
                end: schedule_utils::parse_utc(&self.end_at)?,
                timezone: self.timezone,
            },
            status: self.status.parse::<ReservationStatus>()?,
            synced_to_external_calendar: self.synced_to_external_calendar,
            external_event_ref: self.external_event_ref,
            expires_at: schedule_utils::parse_utc(&self.expires_at)?,
            created_at: schedule_utils::parse_utc(&self.created_at)?,
            updated_at: schedule_utils::parse_utc(&self.updated_at)?,
        })
    }
}

impl TryFrom<&Row<'_>> for ReservationRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            organizer_id: row.get("organizer_id")?,
            contact_id: row.get("contact_id")?,
            batch_id: row.get("batch_id")?,
            suggestion_set_id: row.get("suggestion_set_id")?,
            start_at: row.get("start_at")?,
            end_at: row.get("end_at")?,
            timezone: row.get("timezone")?,
            status: row.get("status")?,
            synced_to_external_calendar: row.get::<_, i64>("synced_to_external_calendar")? != 0,
            external_event_ref: row.get("external_event_ref")?,
            expires_at: row.get("expires_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

const COLUMNS: &str = r#"
    id,
    organizer_id,
    contact_id,
    batch_id,
    suggestion_set_id,
    start_at,
    end_at,
    timezone,
    status,
    synced_to_external_calendar,
    external_event_ref,
    expires_at,
    created_at,
    updated_at
"#;

pub struct ReservationRepository;

impl ReservationRepository {
    pub fn insert(conn: &Connection, row: &ReservationRow) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO reservations (
                    id,
                    organizer_id,
                    contact_id,
                    batch_id,
                    suggestion_set_id,
                    start_at,
                    end_at,
                    timezone,
                    status,
                    synced_to_external_calendar,
                    external_event_ref,
                    expires_at,
                    created_at,
                    updated_at
                ) VALUES (
                    :id,
                    :organizer_id,
                    :contact_id,
                    :batch_id,
                    :suggestion_set_id,
                    :start_at,
                    :end_at,
                    :timezone,
                    :status,
                    :synced,
                    :external_event_ref,
                    :expires_at,
                    :created_at,
                    :updated_at
                )
            "#,
            named_params! {
                ":id": &row.id,
                ":organizer_id": &row.organizer_id,
                ":contact_id": &row.contact_id,
                ":batch_id": &row.batch_id,
                ":suggestion_set_id": &row.suggestion_set_id,
                ":start_at": &row.start_at,
                ":end_at": &row.end_at,
                ":timezone": &row.timezone,
                ":status": &row.status,
                ":synced": row.synced_to_external_calendar as i64,
                ":external_event_ref": &row.external_event_ref,
                ":expires_at": &row.expires_at,
                ":created_at": &row.created_at,
                ":updated_at": &row.updated_at,
            },
        )?;

        Ok(())
    }

    pub fn update(conn: &Connection, row: &ReservationRow) -> AppResult<()> {
        conn.execute(
            r#"
                UPDATE reservations SET
                    status = :status,
                    synced_to_external_calendar = :synced,
                    external_event_ref = :external_event_ref,
                    expires_at = :expires_at,
                    updated_at = :updated_at
                WHERE id = :id
            "#,
            named_params! {
                ":id": &row.id,
                ":status": &row.status,
                ":synced": row.synced_to_external_calendar as i64,
                ":external_event_ref": &row.external_event_ref,
                ":expires_at": &row.expires_at,
                ":updated_at": &row.updated_at,
            },
        )?;

        Ok(())
    }

    pub fn find_by_id(conn: &Connection, id: &str) -> AppResult<Option<ReservationRow>> {
        let sql = format!("SELECT {COLUMNS} FROM reservations WHERE id = ?1");
        let mut stmt = conn.prepare(&sql)?;

        let row = stmt
            .query_row([id], |row| ReservationRow::try_from(row))
            .optional()?;

        Ok(row)
    }

    /// Pending or confirmed reservations of the organizer whose interval
    /// overlaps `[start_at, end_at)`.
    pub fn find_overlapping(
        conn: &Connection,
        organizer_id: &str,
        start_at: &str,
        end_at: &str,
    ) -> AppResult<Vec<ReservationRow>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM reservations
            WHERE organizer_id = :organizer_id
              AND status IN ('pending', 'confirmed')
              AND start_at < :end_at
              AND end_at > :start_at
            ORDER BY start_at ASC
        "#
        );
        let mut stmt = conn.prepare(&sql)?;

        let rows = stmt
            .query_map(
                named_params! {
                    ":organizer_id": organizer_id,
                    ":start_at": start_at,
                    ":end_at": end_at,
                },
                |row| ReservationRow::try_from(row),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Every pending or confirmed reservation of the organizer ending after
    /// `from`.
    pub fn list_active_after(
        conn: &Connection,
        organizer_id: &str,
        from: &str,
    ) -> AppResult<Vec<ReservationRow>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM reservations
            WHERE organizer_id = ?1
              AND status IN ('pending', 'confirmed')
              AND end_at > ?2
            ORDER BY start_at ASC
        "#
        );
        let mut stmt = conn.prepare(&sql)?;

        let rows = stmt
            .query_map((organizer_id, from), |row| ReservationRow::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn list_for_organizer(
        conn: &Connection,
        organizer_id: &str,
        status: Option<ReservationStatus>,
    ) -> AppResult<Vec<ReservationRow>> {
        let rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM reservations WHERE organizer_id = ?1 AND status = ?2 ORDER BY start_at ASC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map((organizer_id, status.as_str()), |row| {
                        ReservationRow::try_from(row)
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM reservations WHERE organizer_id = ?1 ORDER BY start_at ASC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([organizer_id], |row| ReservationRow::try_from(row))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };

        Ok(rows)
    }

    pub fn list_for_suggestion_set(
        conn: &Connection,
        suggestion_set_id: &str,
    ) -> AppResult<Vec<ReservationRow>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM reservations WHERE suggestion_set_id = ?1 ORDER BY created_at ASC"
        );
        let mut stmt = conn.prepare(&sql)?;

        let rows = stmt
            .query_map([suggestion_set_id], |row| ReservationRow::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Takes the sync claim on an unsynced pending or confirmed reservation.
    /// A claim older than `stale_before` is abandoned and may be retaken.
    /// Returns whether this caller now holds the claim.
    pub fn claim_sync(
        conn: &Connection,
        id: &str,
        now: &str,
        stale_before: &str,
    ) -> AppResult<bool> {
        let affected = conn.execute(
            r#"
                UPDATE reservations SET
                    sync_claimed_at = :now
                WHERE id = :id
                  AND synced_to_external_calendar = 0
                  AND status IN ('pending', 'confirmed')
                  AND (sync_claimed_at IS NULL OR sync_claimed_at < :stale_before)
            "#,
            named_params! {
                ":id": id,
                ":now": now,
                ":stale_before": stale_before,
            },
        )?;

        Ok(affected == 1)
    }

    pub fn release_sync_claim(conn: &Connection, id: &str) -> AppResult<()> {
        conn.execute(
            "UPDATE reservations SET sync_claimed_at = NULL WHERE id = ?1",
            [id],
        )?;
        Ok(())
    }

    /// Moves pending and confirmed reservations whose interval has ended to
    /// `expired`.
    pub fn expire_ended(conn: &Connection, organizer_id: &str, now: &str) -> AppResult<usize> {
        let affected = conn.execute(
            r#"
                UPDATE reservations SET
                    status = 'expired',
                    updated_at = :now
                WHERE organizer_id = :organizer_id
                  AND status IN ('pending', 'confirmed')
                  AND end_at <= :now
            "#,
            named_params! {
                ":organizer_id": organizer_id,
                ":now": now,
            },
        )?;

        Ok(affected)
    }

    /// Hard-deletes expired or cancelled reservations whose interval ended
    /// before `cutoff`.
    pub fn delete_finished_before(
        conn: &Connection,
        organizer_id: &str,
        cutoff: &str,
    ) -> AppResult<usize> {
        let affected = conn.execute(
            r#"
                DELETE FROM reservations
                WHERE organizer_id = :organizer_id
                  AND status IN ('expired', 'cancelled')
                  AND end_at < :cutoff
            "#,
            named_params! {
                ":organizer_id": organizer_id,
                ":cutoff": cutoff,
            },
        )?;

        Ok(affected)
    }
}
