use std::fmt;

use rusqlite;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::models::suggestion::SuggestedSlot;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Transient,
    Permanent,
}

impl ProviderErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderErrorKind::Transient => "TRANSIENT",
            ProviderErrorKind::Permanent => "PERMANENT",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a contact could not be given any slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NoViableReason {
    /// Working hours of organizer and contact never intersect, even relaxed.
    NoOverlap,
    /// Windows overlap but no candidate clears the viability floor.
    BelowViabilityFloor,
    /// Every viable candidate was taken by contacts allocated earlier.
    AllocationExhausted,
}

impl NoViableReason {
    pub fn as_str(self) -> &'static str {
        match self {
            NoViableReason::NoOverlap => "no-overlap",
            NoViableReason::BelowViabilityFloor => "below-viability-floor",
            NoViableReason::AllocationExhausted => "allocation-exhausted",
        }
    }
}

impl fmt::Display for NoViableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {message}")]
    Database { message: String },

    #[error("record not found")]
    NotFound,

    #[error("record conflict: {message}")]
    Conflict { message: String },

    #[error("validation failed: {message}")]
    Validation {
        message: String,
        details: Option<JsonValue>,
    },

    #[error("no viable slots for contact {contact_id}: {reason}")]
    NoViableSlots {
        contact_id: String,
        reason: NoViableReason,
    },

    #[error("calendar provider error ({kind}): {message}")]
    Provider {
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("slot taken: {message}")]
    SlotTaken {
        message: String,
        remaining_slots: Vec<SuggestedSlot>,
    },

    #[error("consistency error: {message}")]
    Consistency { message: String },

    #[error("invalid state: {message}")]
    InvalidState { message: String },

    #[error("operation timed out: {operation}")]
    Timeout { operation: String },

    #[error("batch request cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "app::validation", %message, "validation error");
        AppError::Validation {
            message,
            details: None,
        }
    }

    pub fn validation_with_details(message: impl Into<String>, details: JsonValue) -> Self {
        let message = message.into();
        warn!(target: "app::validation", %message, details = %details, "validation error with details");
        AppError::Validation {
            message,
            details: Some(details),
        }
    }

    pub fn no_viable_slots(contact_id: impl Into<String>, reason: NoViableReason) -> Self {
        let contact_id = contact_id.into();
        info!(target: "app::batch", %contact_id, %reason, "contact has no viable slots");
        AppError::NoViableSlots { contact_id, reason }
    }

    pub fn provider(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ProviderErrorKind::Transient => {
                warn!(target: "app::provider", %kind, %message, "calendar provider error")
            }
            ProviderErrorKind::Permanent => {
                error!(target: "app::provider", %kind, %message, "calendar provider error")
            }
        }
        AppError::Provider { kind, message }
    }

    /// Losing a commit race is an expected outcome, so it is not logged as a fault.
    pub fn slot_taken(message: impl Into<String>, remaining_slots: Vec<SuggestedSlot>) -> Self {
        let message = message.into();
        info!(
            target: "app::reservation",
            %message,
            remaining = remaining_slots.len(),
            "slot already taken, caller must re-select"
        );
        AppError::SlotTaken {
            message,
            remaining_slots,
        }
    }

    pub fn consistency(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(target: "app::consistency", %message, "consistency error");
        AppError::Consistency { message }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "app::reservation", %message, "invalid lifecycle transition");
        AppError::InvalidState { message }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        let operation = operation.into();
        warn!(target: "app::timeout", %operation, "operation timed out");
        AppError::Timeout { operation }
    }

    pub fn cancelled() -> Self {
        info!(target: "app::batch", "batch request cancelled");
        AppError::Cancelled
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "app::conflict", %message, "conflict error");
        AppError::Conflict { message }
    }

    pub fn not_found() -> Self {
        warn!(target: "app::database", "resource not found");
        AppError::NotFound
    }

    pub fn database(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(target: "app::database", %message, "database error");
        AppError::Database { message }
    }

    pub fn other(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(target: "app::other", %message, "other error");
        AppError::Other(message)
    }

    pub fn is_slot_taken(&self) -> bool {
        matches!(self, AppError::SlotTaken { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Provider {
                kind: ProviderErrorKind::Transient,
                ..
            } | AppError::Timeout { .. }
        )
    }

    pub fn remaining_slots(&self) -> Option<&[SuggestedSlot]> {
        match self {
            AppError::SlotTaken {
                remaining_slots, ..
            } => Some(remaining_slots.as_slice()),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(error: rusqlite::Error) -> Self {
        use rusqlite::Error::{QueryReturnedNoRows, SqliteFailure};
        use rusqlite::ErrorCode;

        match &error {
            QueryReturnedNoRows => AppError::not_found(),
            SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
                AppError::conflict("uniqueness or constraint violated")
            }
            _ => {
                error!(target: "app::database", error = ?error, "sqlite error");
                AppError::database(error.to_string())
            }
        }
    }
}
