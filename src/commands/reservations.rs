use crate::models::batch::CleanupReport;
use crate::models::reservation::{ReservationRecord, ReservationStatus};

use super::{run_blocking, AppState, CommandError, CommandResult};

pub async fn reservations_list(
    state: &AppState,
    organizer_id: String,
    status: Option<ReservationStatus>,
) -> CommandResult<Vec<ReservationRecord>> {
    let app_state = state.clone();
    run_blocking(move || app_state.reservations().list_reservations(&organizer_id, status)).await
}

pub async fn reservations_confirm(
    state: &AppState,
    reservation_id: String,
) -> CommandResult<ReservationRecord> {
    let app_state = state.clone();
    run_blocking(move || app_state.reservations().confirm_reservation(&reservation_id)).await
}

pub async fn reservations_cancel(
    state: &AppState,
    reservation_id: String,
) -> CommandResult<ReservationRecord> {
    let app_state = state.clone();
    run_blocking(move || app_state.reservations().cancel_reservation(&reservation_id)).await
}

pub async fn reservations_sync(
    state: &AppState,
    reservation_id: String,
    account_ref: String,
) -> CommandResult<ReservationRecord> {
    state
        .batches()
        .sync_reservation(&reservation_id, &account_ref)
        .await
        .map_err(CommandError::from)
}

pub async fn reservations_run_cleanup(
    state: &AppState,
    organizer_id: String,
) -> CommandResult<CleanupReport> {
    let app_state = state.clone();
    run_blocking(move || app_state.reservations().run_expiry_cleanup(&organizer_id)).await
}
