use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, RefreshRequest, RegisterRequest},
        jwt::{AuthUser, JwtKeys},
    },
    donors::repo_types::DonorSummary,
    error::AppError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

fn issue(state: &AppState, donor: DonorSummary) -> Result<AuthResponse, AppError> {
    let keys = JwtKeys::from_ref(state);
    let pair = keys.sign_pair(donor.id)?;
    Ok(AuthResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        donor,
    })
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let donor = state.gate.register(payload.into()).await?;
    Ok((StatusCode::CREATED, Json(issue(&state, donor)?)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let donor = state.gate.login(&payload.username, &payload.password).await?;
    Ok(Json(issue(&state, donor)?))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify_refresh(&payload.refresh_token).map_err(|e| {
        warn!(error = %e, "refresh rejected");
        AppError::InvalidToken
    })?;

    // the donor may have deleted the profile since the token was issued
    let donor = state.donors.profile(claims.sub).await?;
    info!(donor_id = %donor.id, "tokens refreshed");
    Ok(Json(issue(&state, donor)?))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(donor_id): AuthUser,
) -> Result<Json<DonorSummary>, AppError> {
    Ok(Json(state.donors.profile(donor_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn call(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn router(state: AppState) -> Router {
        Router::new()
            .merge(auth_routes())
            .merge(me_routes())
            .with_state(state)
    }

    #[tokio::test]
    async fn register_then_login_then_me() {
        let app = router(AppState::fake());
        let (status, body) = call(
            app.clone(),
            post_json(
                "/auth/register",
                json!({
                    "username": "alice",
                    "password": "secret-pw",
                    "bloodType": "a+",
                    "contactNumber": "555-0100",
                    "location": "Springfield"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["donor"]["bloodType"], "A+");
        assert!(body["donor"].get("passwordHash").is_none());

        let (status, body) = call(
            app.clone(),
            post_json("/auth/login", json!({"username": "alice", "password": "secret-pw"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["accessToken"].as_str().unwrap().to_string();

        let req = Request::get("/me")
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "alice");
    }

    #[tokio::test]
    async fn login_failures_are_distinguished() {
        let app = router(AppState::fake());
        let (status, _) = call(
            app.clone(),
            post_json(
                "/auth/register",
                json!({
                    "username": "alice",
                    "password": "secret-pw",
                    "bloodType": "O-",
                    "contactNumber": "555-0100",
                    "location": "Springfield"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = call(
            app.clone(),
            post_json("/auth/login", json!({"username": "alice", "password": "wrong-pw"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "bad_credentials");

        let (status, body) = call(
            app,
            post_json("/auth/login", json!({"username": "bob", "password": "anything"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_registered");
    }

    #[tokio::test]
    async fn me_requires_access_token() {
        let app = router(AppState::fake());
        let (status, body) = call(app, Request::get("/me").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid_token");
    }
}
