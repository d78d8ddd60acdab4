pub mod batch;
pub mod reservations;
pub mod settings;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{error, warn};

use crate::config::EngineConfig;
use crate::db::DbPool;
use crate::error::AppError;
use crate::services::batch_scheduling_service::BatchSchedulingService;
use crate::services::calendar_provider::CalendarProvider;
use crate::services::contact_directory::ContactDirectory;
use crate::services::reservation_service::ReservationService;
use crate::services::settings_service::SettingsService;

/// Wires the services over one database and one calendar provider.
#[derive(Clone)]
pub struct AppState {
    db_pool: DbPool,
    settings_service: Arc<SettingsService>,
    reservation_service: Arc<ReservationService>,
    batch_service: Arc<BatchSchedulingService>,
}

impl AppState {
    pub fn new(
        db_pool: DbPool,
        provider: Arc<dyn CalendarProvider>,
        directory: Option<Arc<dyn ContactDirectory>>,
        config: EngineConfig,
    ) -> Self {
        let settings_service = Arc::new(SettingsService::new(db_pool.clone()));

        let mut reservations = ReservationService::new(
            db_pool.clone(),
            Arc::clone(&settings_service),
            config.suggestion_expiry_offset,
            config.cleanup_grace,
        );
        if let Some(directory) = directory {
            reservations = reservations.with_directory(directory);
        }
        let reservation_service = Arc::new(reservations);

        let batch_service = Arc::new(BatchSchedulingService::new(
            provider,
            Arc::clone(&settings_service),
            Arc::clone(&reservation_service),
            config,
        ));

        Self {
            db_pool,
            settings_service,
            reservation_service,
            batch_service,
        }
    }

    pub fn settings(&self) -> Arc<SettingsService> {
        Arc::clone(&self.settings_service)
    }

    pub fn reservations(&self) -> Arc<ReservationService> {
        Arc::clone(&self.reservation_service)
    }

    pub fn batches(&self) -> Arc<BatchSchedulingService> {
        Arc::clone(&self.batch_service)
    }

    pub fn db(&self) -> DbPool {
        self.db_pool.clone()
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

/// Error shape handed to callers: a stable code, a message and optional
/// structured details.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

impl CommandError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<JsonValue>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details,
        }
    }
}

impl From<AppError> for CommandError {
    fn from(error: AppError) -> Self {
        match error {
            AppError::Validation { message, details } => {
                CommandError::new("VALIDATION_ERROR", message, details)
            }
            AppError::NotFound => {
                CommandError::new("NOT_FOUND", "requested record does not exist", None)
            }
            AppError::Conflict { message } => CommandError::new("CONFLICT", message, None),
            AppError::NoViableSlots { contact_id, reason } => CommandError::new(
                "NO_VIABLE_SLOTS",
                format!("no viable slots for contact {contact_id}"),
                Some(serde_json::json!({ "contactId": contact_id, "reason": reason })),
            ),
            AppError::Provider { kind, message } => {
                warn!(target: "app::command", %kind, %message, "calendar provider error in command");
                CommandError::new(
                    "PROVIDER_ERROR",
                    message,
                    Some(serde_json::json!({ "kind": kind.as_str() })),
                )
            }
            AppError::SlotTaken {
                message,
                remaining_slots,
            } => {
                let details = serde_json::to_value(&remaining_slots)
                    .map(|slots| serde_json::json!({ "remainingSlots": slots }))
                    .ok();
                CommandError::new("SLOT_TAKEN", message, details)
            }
            AppError::Consistency { message } => {
                error!(target: "app::command", %message, "consistency error in command");
                CommandError::new("CONSISTENCY_ERROR", message, None)
            }
            AppError::InvalidState { message } => CommandError::new("INVALID_STATE", message, None),
            AppError::Timeout { operation } => CommandError::new(
                "TIMEOUT",
                format!("{operation} timed out"),
                None,
            ),
            AppError::Cancelled => CommandError::new("CANCELLED", "request was cancelled", None),
            AppError::Database { message } => {
                error!(target: "app::command", %message, "database error in command");
                CommandError::new("UNKNOWN", message, None)
            }
            AppError::Serialization(error) => {
                error!(target: "app::command", error = %error, "serialization error in command");
                CommandError::new("UNKNOWN", "serialization failed", None)
            }
            AppError::Io(error) => {
                error!(target: "app::command", error = %error, "io error in command");
                CommandError::new("UNKNOWN", "file system access failed", None)
            }
            AppError::Other(message) => {
                error!(target: "app::command", %message, "unexpected error in command");
                CommandError::new("UNKNOWN", message, None)
            }
        }
    }
}

/// Runs synchronous database work off the async executor.
pub(crate) async fn run_blocking<T: Send + 'static>(
    task: impl FnOnce() -> Result<T, AppError> + Send + 'static,
) -> CommandResult<T> {
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| CommandError::new("UNKNOWN", format!("background task failed: {err}"), None))?
        .map_err(CommandError::from)
}
