use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::error::{AppError, ProviderErrorKind};
use crate::models::availability::ContactAvailability;
use crate::models::slot::TimeInterval;

/// Failure reported by a calendar provider adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("transient provider failure: {0}")]
    Transient(String),
    #[error("permanent provider failure: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            ProviderError::Transient(_) => ProviderErrorKind::Transient,
            ProviderError::Permanent(_) => ProviderErrorKind::Permanent,
        }
    }

    fn message(&self) -> &str {
        match self {
            ProviderError::Transient(message) | ProviderError::Permanent(message) => message,
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(error: ProviderError) -> Self {
        AppError::provider(error.kind(), error.message().to_string())
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Absolute window a busy lookup covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[async_trait]
pub trait CalendarProvider: Send + Sync {
    async fn get_busy_intervals(
        &self,
        account_ref: &str,
        window: BusyWindow,
    ) -> ProviderResult<Vec<TimeInterval>>;

    /// Creates the meeting on the organizer's external calendar and returns
    /// the provider's event reference. Repeating a call with the same
    /// `idempotency_key` must return the original event instead of creating
    /// another one.
    async fn create_event(
        &self,
        account_ref: &str,
        interval: TimeInterval,
        attendee: &str,
        idempotency_key: &str,
    ) -> ProviderResult<String>;
}

/// Timeout and retry schedule applied to every provider call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub call_timeout: StdDuration,
    pub backoff: Vec<StdDuration>,
}

impl RetryPolicy {
    pub fn new(call_timeout: StdDuration, backoff: Vec<StdDuration>) -> Self {
        let backoff = if backoff.is_empty() {
            vec![StdDuration::from_millis(0)]
        } else {
            backoff
        };
        Self {
            call_timeout,
            backoff,
        }
    }
}

/// Runs `call` under the policy's timeout, retrying transient failures and
/// timeouts. Permanent failures return immediately.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ProviderResult<T>>,
{
    let mut last_error = ProviderError::Transient(format!("{operation} was not attempted"));

    for (attempt, delay) in policy.backoff.iter().enumerate() {
        if !delay.is_zero() {
            sleep(*delay).await;
        }

        debug!(target: "app::provider", operation, attempt = attempt + 1, "calling calendar provider");

        match timeout(policy.call_timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(ProviderError::Permanent(message))) => {
                return Err(ProviderError::Permanent(message));
            }
            Ok(Err(error)) => {
                warn!(target: "app::provider", operation, attempt = attempt + 1, error = %error, "transient provider failure");
                last_error = error;
            }
            Err(_) => {
                warn!(
                    target: "app::provider",
                    operation,
                    attempt = attempt + 1,
                    timeout_ms = policy.call_timeout.as_millis() as u64,
                    "provider call timed out"
                );
                last_error = ProviderError::Transient(format!("{operation} timed out"));
            }
        }
    }

    Err(last_error)
}

/// Busy intervals for a contact. Any failure degrades to unknown availability
/// instead of failing the batch.
pub async fn fetch_contact_availability(
    provider: &dyn CalendarProvider,
    policy: &RetryPolicy,
    contact_id: &str,
    calendar_ref: Option<&str>,
    window: BusyWindow,
) -> ContactAvailability {
    let Some(calendar_ref) = calendar_ref else {
        debug!(target: "app::provider", %contact_id, "contact has no linked calendar");
        return ContactAvailability::Unknown;
    };

    let result = call_with_retry(policy, "get_busy_intervals", move || {
        provider.get_busy_intervals(calendar_ref, window)
    })
    .await;

    match result {
        Ok(busy) => ContactAvailability::Known(busy),
        Err(error) => {
            warn!(
                target: "app::provider",
                %contact_id,
                kind = %error.kind(),
                error = %error,
                "contact calendar unavailable, treating as unknown availability"
            );
            ContactAvailability::Unknown
        }
    }
}

/// In-memory provider keyed by account reference.
#[derive(Debug, Default)]
pub struct StaticCalendarProvider {
    busy: Mutex<HashMap<String, Vec<TimeInterval>>>,
    failures: Mutex<HashMap<String, Vec<ProviderError>>>,
    delays: Mutex<HashMap<String, StdDuration>>,
    created: Mutex<Vec<CreatedEvent>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedEvent {
    pub account_ref: String,
    pub interval: TimeInterval,
    pub attendee: String,
    pub idempotency_key: String,
    pub event_ref: String,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StaticCalendarProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_busy(self, account_ref: impl Into<String>, busy: Vec<TimeInterval>) -> Self {
        lock(&self.busy).insert(account_ref.into(), busy);
        self
    }

    /// Queues failures returned, in order, before the account answers normally.
    pub fn with_failures(
        self,
        account_ref: impl Into<String>,
        failures: Vec<ProviderError>,
    ) -> Self {
        lock(&self.failures).insert(account_ref.into(), failures);
        self
    }

    /// Makes every call for the account take `delay`.
    pub fn with_delay(self, account_ref: impl Into<String>, delay: StdDuration) -> Self {
        lock(&self.delays).insert(account_ref.into(), delay);
        self
    }

    pub fn created_events(&self) -> Vec<CreatedEvent> {
        lock(&self.created).clone()
    }

    fn next_failure(&self, account_ref: &str) -> Option<ProviderError> {
        let mut guard = lock(&self.failures);
        let queue = guard.get_mut(account_ref)?;
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }

    fn delay_for(&self, account_ref: &str) -> Option<StdDuration> {
        lock(&self.delays).get(account_ref).copied()
    }
}

#[async_trait]
impl CalendarProvider for StaticCalendarProvider {
    async fn get_busy_intervals(
        &self,
        account_ref: &str,
        window: BusyWindow,
    ) -> ProviderResult<Vec<TimeInterval>> {
        if let Some(delay) = self.delay_for(account_ref) {
            sleep(delay).await;
        }
        if let Some(failure) = self.next_failure(account_ref) {
            return Err(failure);
        }

        let busy = lock(&self.busy)
            .get(account_ref)
            .map(|intervals| {
                intervals
                    .iter()
                    .filter(|interval| interval.start < window.end && interval.end > window.start)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        Ok(busy)
    }

    async fn create_event(
        &self,
        account_ref: &str,
        interval: TimeInterval,
        attendee: &str,
        idempotency_key: &str,
    ) -> ProviderResult<String> {
        if let Some(delay) = self.delay_for(account_ref) {
            sleep(delay).await;
        }
        if let Some(failure) = self.next_failure(account_ref) {
            return Err(failure);
        }

        let mut created = lock(&self.created);
        if let Some(existing) = created
            .iter()
            .find(|event| event.account_ref == account_ref && event.idempotency_key == idempotency_key)
        {
            return Ok(existing.event_ref.clone());
        }
        let event_ref = format!("evt-{}", created.len() + 1);
        created.push(CreatedEvent {
            account_ref: account_ref.to_string(),
            interval,
            attendee: attendee.to_string(),
            idempotency_key: idempotency_key.to_string(),
            event_ref: event_ref.clone(),
        });
        Ok(event_ref)
    }
}
