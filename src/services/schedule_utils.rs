use chrono::{
    offset::LocalResult, DateTime, Datelike, Duration, NaiveDate, SecondsFormat,
    TimeZone, Timelike, Utc, Weekday,
};
use chrono_tz::Tz;
use serde_json::json;

use crate::error::{AppError, AppResult};

pub fn parse_utc(value: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| {
            AppError::validation_with_details(
                "invalid timestamp",
                json!({"value": value, "error": err.to_string()}),
            )
        })
}

/// Second precision with a `Z` suffix, so stored values sort chronologically.
pub fn format_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timezone(value: &str) -> AppResult<Tz> {
    value.trim().parse::<Tz>().map_err(|err| {
        AppError::validation_with_details(
            "unknown timezone",
            json!({"value": value, "error": err.to_string()}),
        )
    })
}

/// Instant of `minute_of_day` on `date` in `tz`. Ambiguous local times take the
/// earlier instant; times that fall in a DST gap move forward by the gap.
pub fn local_instant(tz: Tz, date: NaiveDate, minute_of_day: u32) -> Option<DateTime<Utc>> {
    let base = date.and_hms_opt(0, 0, 0)? + Duration::minutes(minute_of_day as i64);
    match tz.from_local_datetime(&base) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(first, _) => Some(first.with_timezone(&Utc)),
        LocalResult::None => tz
            .from_local_datetime(&(base + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

pub fn minutes_of_day_in(tz: Tz, dt: DateTime<Utc>) -> u32 {
    let local = dt.with_timezone(&tz);
    local.hour() * 60 + local.minute()
}

pub fn local_date(tz: Tz, dt: DateTime<Utc>) -> NaiveDate {
    dt.with_timezone(&tz).date_naive()
}

pub fn weekday_in(tz: Tz, dt: DateTime<Utc>) -> Weekday {
    dt.with_timezone(&tz).weekday()
}

pub fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}

/// Rounds `dt` up to the next multiple of `step_minutes` past the hour.
pub fn align_up(dt: DateTime<Utc>, step_minutes: i64) -> DateTime<Utc> {
    if step_minutes <= 1 {
        return dt;
    }
    let truncated = dt
        .with_second(0)
        .and_then(|value| value.with_nanosecond(0))
        .unwrap_or(dt);
    let minute = truncated.minute() as i64;
    let remainder = minute % step_minutes;
    let mut aligned = if remainder == 0 {
        truncated
    } else {
        truncated + Duration::minutes(step_minutes - remainder)
    };
    if aligned < dt {
        aligned += Duration::minutes(step_minutes);
    }
    aligned
}
