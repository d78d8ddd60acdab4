use chrono_tz::Tz;
use serde::Deserialize;

use crate::models::availability::WorkingHours;
use crate::models::settings::{OrganizerSettings, RetentionPolicy};
use crate::services::settings_service::SettingsUpdateInput;

use super::{run_blocking, AppState, CommandResult};

pub async fn settings_get(
    state: &AppState,
    organizer_id: String,
    session_timezone: Tz,
) -> CommandResult<OrganizerSettings> {
    let app_state = state.clone();
    run_blocking(move || {
        app_state
            .settings()
            .get_or_default(&organizer_id, session_timezone)
    })
    .await
}

pub async fn settings_update(
    state: &AppState,
    organizer_id: String,
    session_timezone: Tz,
    payload: SettingsUpdatePayload,
) -> CommandResult<OrganizerSettings> {
    let app_state = state.clone();
    let input = payload.into_input();
    run_blocking(move || {
        app_state
            .settings()
            .update(&organizer_id, session_timezone, input)
    })
    .await
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdatePayload {
    #[serde(default)]
    timezone: Option<Tz>,
    #[serde(default)]
    workday_start_minute: Option<u32>,
    #[serde(default)]
    workday_end_minute: Option<u32>,
    #[serde(default)]
    buffer_minutes: Option<i64>,
    #[serde(default)]
    include_weekends: Option<bool>,
    #[serde(default)]
    retention_days: Option<u32>,
    #[serde(default)]
    keep_forever: Option<bool>,
}

impl SettingsUpdatePayload {
    fn into_input(self) -> SettingsUpdateInput {
        let working_hours = match (self.workday_start_minute, self.workday_end_minute) {
            (Some(start_minute), Some(end_minute)) => Some(WorkingHours {
                start_minute,
                end_minute,
            }),
            _ => None,
        };
        let retention = if self.keep_forever == Some(true) {
            Some(RetentionPolicy::KeepForever)
        } else {
            self.retention_days.map(RetentionPolicy::Days)
        };

        SettingsUpdateInput {
            timezone: self.timezone,
            working_hours,
            buffer_minutes: self.buffer_minutes,
            include_weekends: self.include_weekends,
            retention,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_forever_wins_over_days() {
        let payload: SettingsUpdatePayload = serde_json::from_value(serde_json::json!({
            "retentionDays": 30,
            "keepForever": true
        }))
        .expect("payload");
        assert_eq!(payload.into_input().retention, Some(RetentionPolicy::KeepForever));
    }

    #[test]
    fn working_hours_need_both_bounds() {
        let payload: SettingsUpdatePayload = serde_json::from_value(serde_json::json!({
            "workdayStartMinute": 480
        }))
        .expect("payload");
        assert!(payload.into_input().working_hours.is_none());
    }
}
