use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{
    dto::{
        DeleteProfileResponse, DonationRecorded, DonationRequest, DonorListParams, MatchRequest,
        UpdateProfileRequest, UpdateProfileResponse,
    },
    repo_types::DonorContact,
};
use crate::{auth::jwt::AuthUser, error::AppError, state::AppState};

// --- public routers ---

pub fn read_routes() -> Router<AppState> {
    Router::new().route("/donors", get(list_donors))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/requests", post(request_match))
        .route("/donations", post(record_donation))
        .route("/donors/:username", put(update_profile).delete(delete_profile))
}

// --- handlers ---

#[instrument(skip(state))]
pub async fn list_donors(
    State(state): State<AppState>,
    Query(params): Query<DonorListParams>,
) -> Result<Json<Vec<DonorContact>>, AppError> {
    Ok(Json(state.donors.collect_donors(params.into()).await?))
}

#[instrument(skip(state))]
pub async fn request_match(
    State(state): State<AppState>,
    Json(body): Json<MatchRequest>,
) -> Result<Json<DonorContact>, AppError> {
    let contact = state
        .donors
        .request_match(&body.blood_type, &body.location)
        .await?;
    Ok(Json(contact))
}

#[instrument(skip(state))]
pub async fn record_donation(
    State(state): State<AppState>,
    Json(body): Json<DonationRequest>,
) -> Result<Json<DonationRecorded>, AppError> {
    let donation_count = state.donors.record_donation(&body.username).await?;
    Ok(Json(DonationRecorded {
        username: body.username.trim().to_string(),
        donation_count,
    }))
}

#[instrument(skip(state, body))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(donor_id): AuthUser,
    Path(username): Path<String>,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<UpdateProfileResponse>, AppError> {
    if let Some(owner) = state.donors.owner_of(&username).await? {
        ensure_owner(donor_id, owner, &username)?;
    }
    // a username re-registered since the check no longer matches donor_id
    let modified_count = state
        .donors
        .update_profile(&username, Some(donor_id), body.into())
        .await?;
    Ok(Json(UpdateProfileResponse { modified_count }))
}

#[instrument(skip(state))]
pub async fn delete_profile(
    State(state): State<AppState>,
    AuthUser(donor_id): AuthUser,
    Path(username): Path<String>,
) -> Result<Json<DeleteProfileResponse>, AppError> {
    if let Some(owner) = state.donors.owner_of(&username).await? {
        ensure_owner(donor_id, owner, &username)?;
    }
    let outcome = state
        .donors
        .delete_profile(&username, Some(donor_id))
        .await?;
    Ok(Json(outcome.into()))
}

fn ensure_owner(caller: Uuid, owner: Uuid, username: &str) -> Result<(), AppError> {
    if caller != owner {
        warn!(caller = %caller, username = %username, "profile owned by another donor");
        return Err(AppError::Forbidden);
    }
    Ok(())
}
