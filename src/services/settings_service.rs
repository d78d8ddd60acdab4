use std::num::NonZeroUsize;
use std::sync::Mutex;

use chrono::Utc;
use chrono_tz::Tz;
use lru::LruCache;
use tracing::{debug, info};

use crate::db::repositories::settings_repository::{OrganizerSettingsRow, SettingsRepository};
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::availability::WorkingHours;
use crate::models::settings::{OrganizerSettings, RetentionPolicy};

const CACHE_CAPACITY: usize = 256;
const MAX_BUFFER_MINUTES: i64 = 240;

#[derive(Debug, Default, Clone)]
pub struct SettingsUpdateInput {
    pub timezone: Option<Tz>,
    pub working_hours: Option<WorkingHours>,
    pub buffer_minutes: Option<i64>,
    pub include_weekends: Option<bool>,
    pub retention: Option<RetentionPolicy>,
}

/// Per-organizer scheduling settings with a small read-through cache.
pub struct SettingsService {
    db: DbPool,
    cache: Mutex<LruCache<String, OrganizerSettings>>,
}

impl SettingsService {
    pub fn new(db: DbPool) -> Self {
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            db,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, organizer_id: &str) -> AppResult<Option<OrganizerSettings>> {
        if let Some(settings) = self.cached(organizer_id) {
            return Ok(Some(settings));
        }

        let settings = self.db.with_connection(|conn| {
            SettingsRepository::get(conn, organizer_id)?
                .map(OrganizerSettingsRow::into_record)
                .transpose()
        })?;

        if let Some(settings) = settings.as_ref() {
            self.remember(settings.clone());
        }
        Ok(settings)
    }

    /// Stored settings, or defaults in the organizer's session timezone when
    /// none were saved yet.
    pub fn get_or_default(&self, organizer_id: &str, timezone: Tz) -> AppResult<OrganizerSettings> {
        match self.get(organizer_id)? {
            Some(settings) => Ok(settings),
            None => {
                debug!(target: "app::settings", %organizer_id, "using default organizer settings");
                Ok(OrganizerSettings::defaults_for(organizer_id, timezone))
            }
        }
    }

    pub fn update(
        &self,
        organizer_id: &str,
        fallback_timezone: Tz,
        input: SettingsUpdateInput,
    ) -> AppResult<OrganizerSettings> {
        let mut current = self.get_or_default(organizer_id, fallback_timezone)?;

        if let Some(timezone) = input.timezone {
            current.timezone = timezone;
        }
        if let Some(hours) = input.working_hours {
            hours.validate()?;
            current.working_hours = hours;
        }
        if let Some(buffer) = input.buffer_minutes {
            if !(0..=MAX_BUFFER_MINUTES).contains(&buffer) {
                return Err(AppError::validation(format!(
                    "buffer must be between 0 and {MAX_BUFFER_MINUTES} minutes"
                )));
            }
            current.buffer_minutes = buffer;
        }
        if let Some(include_weekends) = input.include_weekends {
            current.include_weekends = include_weekends;
        }
        if let Some(retention) = input.retention {
            current.retention = retention;
        }
        current.updated_at = Utc::now();

        let row = OrganizerSettingsRow::from_record(&current);
        self.db
            .with_connection(|conn| SettingsRepository::upsert(conn, &row))?;
        self.remember(current.clone());

        info!(target: "app::settings", %organizer_id, retention = ?current.retention, "organizer settings updated");
        Ok(current)
    }

    pub fn delete(&self, organizer_id: &str) -> AppResult<()> {
        self.db
            .with_connection(|conn| SettingsRepository::delete(conn, organizer_id))?;
        if let Ok(mut guard) = self.cache.lock() {
            guard.pop(organizer_id);
        }
        Ok(())
    }

    fn cached(&self, organizer_id: &str) -> Option<OrganizerSettings> {
        let mut guard = self.cache.lock().ok()?;
        guard.get(organizer_id).cloned()
    }

    fn remember(&self, settings: OrganizerSettings) {
        if let Ok(mut guard) = self.cache.lock() {
            guard.put(settings.organizer_id.clone(), settings);
        }
    }
}
