use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::PrivateCookieJar;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{
    auth::{self, AuthenticatedUser, CurrentUser},
    error::AppError,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

#[derive(Serialize)]
struct UserBody {
    id: i64,
    name: String,
    email: String,
    role: String,
}

impl From<&AuthenticatedUser> for UserBody {
    fn from(user: &AuthenticatedUser) -> Self {
        Self {
            id: user.id,
            name: user.username.clone(),
            email: user.email.clone(),
            role: user.role.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct RegisterPayload {
    name: String,
    email: String,
    password: String,
}

async fn register(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Json(payload): Json<RegisterPayload>,
) -> Result<impl IntoResponse, AppError> {
    let user =
        auth::register_user(&state, &payload.name, &payload.email, &payload.password).await?;
    info!("registered user {}", user.id);
    let session_id = auth::create_session(&state, user.id).await?;
    Ok((
        StatusCode::CREATED,
        auth::apply_session_cookie(jar, &session_id),
        Json(json!({ "message": "user registered", "user": UserBody::from(&user) })),
    ))
}

#[derive(Deserialize)]
struct LoginPayload {
    email: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Json(payload): Json<LoginPayload>,
) -> Result<impl IntoResponse, AppError> {
    let user = auth::authenticate_user(&state, &payload.email, &payload.password).await?;
    let session_id = auth::create_session(&state, user.id).await?;
    Ok((
        auth::apply_session_cookie(jar, &session_id),
        Json(json!({ "message": "logged in", "user": UserBody::from(&user) })),
    ))
}

async fn logout(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<impl IntoResponse, AppError> {
    if let Some(cookie) = jar.get(auth::SESSION_COOKIE) {
        auth::destroy_session(&state, cookie.value()).await?;
    }
    Ok((
        auth::clear_session_cookie(jar),
        Json(json!({ "message": "logged out" })),
    ))
}

async fn me(current: CurrentUser) -> Result<Json<UserBody>, AppError> {
    let user = current.require_user()?;
    Ok(Json(UserBody::from(user)))
}
