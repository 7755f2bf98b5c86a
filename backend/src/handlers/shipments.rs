//! HTTP handlers for shipments

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use shared::builder::DraftReport;
use shared::models::{NewShipment, ShipmentDetail, ShipmentSummary};
use shared::types::ShipmentId;

use crate::error::{AppError, AppResult};
use crate::middleware::CurrentUser;
use crate::AppState;

const MAX_NOTES_LENGTH: usize = 500;

fn check_notes(request: &NewShipment) -> AppResult<()> {
    match &request.notes {
        Some(notes) if notes.chars().count() > MAX_NOTES_LENGTH => Err(AppError::validation(
            "notes",
            "Notes must be at most 500 characters",
        )),
        _ => Ok(()),
    }
}

/// Commit a shipment with its line items and farmer allocations
pub async fn create_shipment(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Json(body): Json<NewShipment>,
) -> AppResult<(StatusCode, Json<ShipmentDetail>)> {
    check_notes(&body)?;
    let detail = state.ledger.record_shipment(&session, &body).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// Dry-run a shipment draft and report allocation progress
pub async fn validate_shipment(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Json(body): Json<NewShipment>,
) -> AppResult<Json<DraftReport>> {
    check_notes(&body)?;
    Ok(Json(state.ledger.check_shipment(&session, &body).await?))
}

/// List shipments, most recent first
pub async fn list_shipments(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
) -> AppResult<Json<Vec<ShipmentSummary>>> {
    let shipments = state.ledger.list_shipments(&session).await?;
    Ok(Json(shipments))
}

/// Shipment header, line items and allocations
pub async fn get_shipment(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Path(shipment_id): Path<i64>,
) -> AppResult<Json<ShipmentDetail>> {
    let detail = state
        .ledger
        .shipment_detail(&session, ShipmentId(shipment_id))
        .await?;
    Ok(Json(detail))
}
