pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

use std::path::Path;
use std::sync::Arc;

use crate::commands::AppState;
use crate::config::EngineConfig;
use crate::error::AppResult;
use crate::services::calendar_provider::CalendarProvider;
use crate::services::contact_directory::ContactDirectory;

/// Opens (and migrates) the database at `db_path`, installs logging when a
/// log directory is configured, and wires the services.
pub fn bootstrap(
    db_path: &Path,
    provider: Arc<dyn CalendarProvider>,
    directory: Option<Arc<dyn ContactDirectory>>,
    config: EngineConfig,
) -> AppResult<AppState> {
    if let Some(log_dir) = config.log_dir.as_deref() {
        crate::utils::logger::init_logging(log_dir)?;
    }

    let pool = config.open_pool(db_path)?;

    Ok(AppState::new(pool, provider, directory, config))
}
