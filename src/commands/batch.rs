use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::batch::{BatchRecord, BatchRequest, BatchSuggestions, ClearOutcome};
use crate::models::reservation::ReservationRecord;
use crate::models::slot::TimeInterval;
use crate::models::suggestion::SuggestionSetRecord;

use super::{run_blocking, AppState, CommandError, CommandResult};

pub async fn batch_generate_suggestions(
    state: &AppState,
    request: BatchRequest,
) -> CommandResult<BatchSuggestions> {
    state
        .batches()
        .generate_batch_suggestions(request)
        .await
        .map_err(CommandError::from)
}

pub async fn batch_get(state: &AppState, batch_id: String) -> CommandResult<BatchRecord> {
    let app_state = state.clone();
    run_blocking(move || app_state.reservations().get_batch(&batch_id)).await
}

pub async fn suggestions_list(
    state: &AppState,
    batch_id: String,
) -> CommandResult<Vec<SuggestionSetRecord>> {
    let app_state = state.clone();
    run_blocking(move || app_state.reservations().list_suggestion_sets(&batch_id)).await
}

pub async fn suggestions_confirm_slot(
    state: &AppState,
    payload: ConfirmSlotPayload,
) -> CommandResult<ReservationRecord> {
    let chosen = TimeInterval::new(payload.start, payload.end).map_err(CommandError::from)?;
    let app_state = state.clone();
    run_blocking(move || {
        app_state
            .reservations()
            .confirm_slot(&payload.contact_id, &payload.batch_id, chosen)
    })
    .await
}

pub async fn suggestions_clear(state: &AppState, batch_id: String) -> CommandResult<ClearOutcome> {
    let app_state = state.clone();
    run_blocking(move || app_state.reservations().clear_suggestions(&batch_id)).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmSlotPayload {
    pub contact_id: String,
    pub batch_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}
