use std::path::PathBuf;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::DbPool;
use crate::error::{AppError, AppResult};

const ENV_PREFIX: &str = "SLOTWISE_";
const MAX_OVERCOMMIT_MARGIN: usize = 20;
const MAX_LOCAL_SEARCH_BUDGET_PER_CONTACT: usize = 1_000;
const MAX_CANDIDATES_PER_CONTACT: usize = 2_000;
const MAX_RELAXED_EXTENSION_MINUTES: u32 = 720;

/// Relative weight of each scoring factor. Normalized at scoring time, so only
/// the ratios matter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoringWeights {
    #[serde(default = "default_time_of_day_weight")]
    pub time_of_day: f64,
    #[serde(default = "default_weekday_weight")]
    pub weekday: f64,
    #[serde(default = "default_density_weight")]
    pub density: f64,
    #[serde(default = "default_fairness_weight")]
    pub fairness: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            time_of_day: default_time_of_day_weight(),
            weekday: default_weekday_weight(),
            density: default_density_weight(),
            fairness: default_fairness_weight(),
        }
    }
}

impl ScoringWeights {
    pub fn total(&self) -> f64 {
        self.time_of_day + self.weekday + self.density + self.fairness
    }
}

/// Per-request tunables for the allocation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AllocationOptions {
    /// Extra candidates considered beyond the requested slot count.
    #[serde(default = "default_overcommit_margin")]
    pub overcommit_margin: usize,
    #[serde(default = "default_lookahead_weight")]
    pub lookahead_weight: f64,
    /// Candidates whose lookahead cost exceeds this are held back until the
    /// allocator relaxes.
    #[serde(default = "default_lookahead_cost_limit")]
    pub lookahead_cost_limit: f64,
    #[serde(default = "default_local_search_budget")]
    pub local_search_budget_per_contact: usize,
    /// Absolute score below which a candidate is discarded.
    #[serde(default = "default_viability_floor")]
    pub viability_floor: f64,
    #[serde(default = "default_slot_step_minutes")]
    pub slot_step_minutes: i64,
    /// How far the contact's window is stretched on both sides when the
    /// strict windows never meet.
    #[serde(default = "default_relaxed_extension_minutes")]
    pub relaxed_extension_minutes: u32,
    #[serde(default = "default_max_candidates")]
    pub max_candidates_per_contact: usize,
    #[serde(default)]
    pub weights: ScoringWeights,
    /// Boosts Fridays for every contact.
    #[serde(default)]
    pub consultant_mode: bool,
    #[serde(default = "default_friday_boost")]
    pub friday_boost: f64,
    #[serde(default)]
    pub include_weekends: Option<bool>,
    #[serde(default)]
    pub buffer_minutes: Option<i64>,
}

impl Default for AllocationOptions {
    fn default() -> Self {
        Self {
            overcommit_margin: default_overcommit_margin(),
            lookahead_weight: default_lookahead_weight(),
            lookahead_cost_limit: default_lookahead_cost_limit(),
            local_search_budget_per_contact: default_local_search_budget(),
            viability_floor: default_viability_floor(),
            slot_step_minutes: default_slot_step_minutes(),
            relaxed_extension_minutes: default_relaxed_extension_minutes(),
            max_candidates_per_contact: default_max_candidates(),
            weights: ScoringWeights::default(),
            consultant_mode: false,
            friday_boost: default_friday_boost(),
            include_weekends: None,
            buffer_minutes: None,
        }
    }
}

impl AllocationOptions {
    pub fn validate(&self) -> AppResult<()> {
        if !(0.0..=100.0).contains(&self.viability_floor) {
            return Err(AppError::validation("viability floor must be within 0-100"));
        }
        if self.slot_step_minutes < 5 || self.slot_step_minutes > 240 {
            return Err(AppError::validation(
                "slot step must be between 5 and 240 minutes",
            ));
        }
        if self.lookahead_weight < 0.0 || self.lookahead_cost_limit < 0.0 {
            return Err(AppError::validation("lookahead parameters must be non-negative"));
        }
        let weights = &self.weights;
        if [
            weights.time_of_day,
            weights.weekday,
            weights.density,
            weights.fairness,
        ]
        .iter()
        .any(|weight| *weight < 0.0)
            || weights.total() <= 0.0
        {
            return Err(AppError::validation(
                "scoring weights must be non-negative and not all zero",
            ));
        }
        if let Some(buffer) = self.buffer_minutes {
            if !(0..=240).contains(&buffer) {
                return Err(AppError::validation("buffer must be between 0 and 240 minutes"));
            }
        }
        if !(1..=MAX_CANDIDATES_PER_CONTACT).contains(&self.max_candidates_per_contact) {
            return Err(AppError::validation(format!(
                "candidate cap must be between 1 and {MAX_CANDIDATES_PER_CONTACT}"
            )));
        }
        if self.overcommit_margin > MAX_OVERCOMMIT_MARGIN {
            return Err(AppError::validation(format!(
                "overcommit margin must be at most {MAX_OVERCOMMIT_MARGIN}"
            )));
        }
        if self.local_search_budget_per_contact > MAX_LOCAL_SEARCH_BUDGET_PER_CONTACT {
            return Err(AppError::validation(format!(
                "local search budget must be at most {MAX_LOCAL_SEARCH_BUDGET_PER_CONTACT} per contact"
            )));
        }
        if self.relaxed_extension_minutes > MAX_RELAXED_EXTENSION_MINUTES {
            return Err(AppError::validation(format!(
                "relaxed extension must be at most {MAX_RELAXED_EXTENSION_MINUTES} minutes"
            )));
        }
        Ok(())
    }

    pub fn local_search_budget(&self, contacts: usize) -> usize {
        self.local_search_budget_per_contact.saturating_mul(contacts.max(1))
    }
}

/// Engine-wide settings, overridable through `SLOTWISE_*` environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub provider_timeout: StdDuration,
    /// Delay before each provider attempt; its length bounds the retries.
    pub provider_backoff: Vec<StdDuration>,
    pub db_busy_timeout: StdDuration,
    /// Candidates must start at least this far after batch creation.
    pub suggestion_lead_time: Duration,
    /// Suggested slots expire this long before they start.
    pub suggestion_expiry_offset: Duration,
    /// Fully expired suggestion sets are deleted after this grace period.
    pub cleanup_grace: Duration,
    pub default_options: AllocationOptions,
    pub log_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider_timeout: StdDuration::from_secs(10),
            provider_backoff: vec![
                StdDuration::from_millis(0),
                StdDuration::from_millis(250),
                StdDuration::from_millis(1000),
            ],
            db_busy_timeout: StdDuration::from_secs(5),
            suggestion_lead_time: Duration::hours(24),
            suggestion_expiry_offset: Duration::hours(24),
            cleanup_grace: Duration::hours(24),
            default_options: AllocationOptions::default(),
            log_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_u64("PROVIDER_TIMEOUT_MS") {
            config.provider_timeout = StdDuration::from_millis(ms);
        }
        if let Some(retries) = env_u64("PROVIDER_RETRIES") {
            config.provider_backoff = backoff_schedule(retries as usize);
        }
        if let Some(ms) = env_u64("DB_BUSY_TIMEOUT_MS") {
            config.db_busy_timeout = StdDuration::from_millis(ms);
        }
        if let Some(minutes) = env_u64("SUGGESTION_LEAD_MINUTES") {
            config.suggestion_lead_time = Duration::minutes(minutes as i64);
        }
        if let Some(minutes) = env_u64("CLEANUP_GRACE_MINUTES") {
            config.cleanup_grace = Duration::minutes(minutes as i64);
        }
        if let Some(floor) = env_f64("VIABILITY_FLOOR") {
            config.default_options.viability_floor = floor;
        }
        if let Some(weight) = env_f64("LOOKAHEAD_WEIGHT") {
            config.default_options.lookahead_weight = weight;
        }
        if let Some(budget) = env_u64("LOCAL_SEARCH_BUDGET") {
            config.default_options.local_search_budget_per_contact = budget as usize;
        }
        config.log_dir = std::env::var(format!("{ENV_PREFIX}LOG_DIR"))
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        config
    }

    pub fn open_pool<P: Into<PathBuf>>(&self, path: P) -> AppResult<DbPool> {
        DbPool::with_busy_timeout(path, self.db_busy_timeout)
    }

    /// Exponential schedule starting with an immediate attempt.
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.provider_backoff = backoff_schedule(retries);
        self
    }
}

fn backoff_schedule(retries: usize) -> Vec<StdDuration> {
    let mut schedule = vec![StdDuration::from_millis(0)];
    for attempt in 0..retries.min(6) {
        schedule.push(StdDuration::from_millis(250 * 2u64.pow(attempt as u32)));
    }
    schedule
}

fn env_u64(key: &str) -> Option<u64> {
    let name = format!("{ENV_PREFIX}{key}");
    let raw = std::env::var(&name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(target: "app::config", variable = %name, error = %err, "ignoring malformed setting");
            None
        }
    }
}

fn env_f64(key: &str) -> Option<f64> {
    let name = format!("{ENV_PREFIX}{key}");
    let raw = std::env::var(&name).ok()?;
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Some(value),
        _ => {
            warn!(target: "app::config", variable = %name, "ignoring malformed setting");
            None
        }
    }
}

fn default_time_of_day_weight() -> f64 {
    0.45
}

fn default_weekday_weight() -> f64 {
    0.2
}

fn default_density_weight() -> f64 {
    0.2
}

fn default_fairness_weight() -> f64 {
    0.15
}

fn default_overcommit_margin() -> usize {
    2
}

fn default_lookahead_weight() -> f64 {
    0.5
}

fn default_lookahead_cost_limit() -> f64 {
    25.0
}

fn default_local_search_budget() -> usize {
    10
}

fn default_viability_floor() -> f64 {
    35.0
}

fn default_slot_step_minutes() -> i64 {
    30
}

fn default_relaxed_extension_minutes() -> u32 {
    120
}

fn default_max_candidates() -> usize {
    240
}

fn default_friday_boost() -> f64 {
    0.3
}
