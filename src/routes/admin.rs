use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_with::skip_serializing_none;
use sqlx::FromRow;
use tracing::info;

use crate::{auth::CurrentUser, error::AppError, state::AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(stats))
        .route("/users", get(users_list))
        .route("/users/:id", get(user_detail))
        .route("/users/:id/role", put(update_user_role))
}

async fn stats(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    current.require_admin()?;
    let user_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&state.db)
        .await?;
    let trip_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trips")
        .fetch_one(&state.db)
        .await?;
    let post_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM community_posts")
        .fetch_one(&state.db)
        .await?;
    let city_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cities")
        .fetch_one(&state.db)
        .await?;
    Ok(Json(json!({
        "userCount": user_count,
        "tripCount": trip_count,
        "postCount": post_count,
        "cityCount": city_count,
    })))
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
struct AdminUserRow {
    id: i64,
    uuid: String,
    username: String,
    email: String,
    role: String,
    created_at: DateTime<Utc>,
    last_login_at: Option<DateTime<Utc>>,
}

async fn users_list(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Vec<AdminUserRow>>, AppError> {
    current.require_admin()?;
    let users = sqlx::query_as::<_, AdminUserRow>(
        r#"SELECT id, uuid, username, email, role, created_at, last_login_at
           FROM users ORDER BY created_at DESC"#,
    )
    .fetch_all(&state.db)
    .await?;
    Ok(Json(users))
}

async fn user_detail(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    current.require_admin()?;
    let user = sqlx::query_as::<_, AdminUserRow>(
        r#"SELECT id, uuid, username, email, role, created_at, last_login_at
           FROM users WHERE id = ?1"#,
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound)?;

    let trip_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trips WHERE user_id = ?1")
        .bind(user_id)
        .fetch_one(&state.db)
        .await?;
    let post_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM community_posts WHERE author_id = ?1")
            .bind(user_id)
            .fetch_one(&state.db)
            .await?;

    Ok(Json(json!({
        "user": user,
        "tripCount": trip_count,
        "postCount": post_count,
    })))
}

#[derive(Deserialize)]
struct RolePayload {
    role: String,
}

async fn update_user_role(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(user_id): Path<i64>,
    Json(payload): Json<RolePayload>,
) -> Result<impl IntoResponse, AppError> {
    current.require_admin()?;
    if !matches!(payload.role.as_str(), "user" | "admin") {
        return Err(AppError::bad_request("invalid role"));
    }
    let affected = sqlx::query("UPDATE users SET role = ?1 WHERE id = ?2")
        .bind(&payload.role)
        .bind(user_id)
        .execute(&state.db)
        .await?
        .rows_affected();
    if affected == 0 {
        return Err(AppError::NotFound);
    }
    info!("user {user_id} role set to {}", payload.role);
    Ok(Json(json!({ "message": "role updated", "role": payload.role })))
}
