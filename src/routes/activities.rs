use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::{
    auth::CurrentUser,
    error::AppError,
    models::activity::{self, Activity},
    services::ownership,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_activities).post(create_activity))
        .route(
            "/:id",
            get(get_activity).put(update_activity).delete(delete_activity),
        )
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityResponse {
    pub id: String,
    pub stop_id: String,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Alias for `startTime`; the itinerary UI keys schedule cards on it.
    pub date: Option<DateTime<Utc>>,
    pub cost: f64,
    pub duration: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Activity> for ActivityResponse {
    fn from(activity: Activity) -> Self {
        let duration = activity.duration_hours();
        Self {
            id: activity.id,
            stop_id: activity.stop_id,
            name: activity.name,
            description: activity.description,
            category: activity.category,
            start_time: activity.start_time,
            end_time: activity.end_time,
            date: activity.start_time,
            cost: activity.cost,
            duration,
            created_at: activity.created_at,
            updated_at: activity.updated_at,
        }
    }
}

async fn list_activities(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Vec<ActivityResponse>>, AppError> {
    let user = current.require_user()?;
    let activities = sqlx::query_as::<_, Activity>(
        r#"SELECT a.* FROM activities a
           JOIN stops s ON s.id = a.stop_id
           JOIN trips t ON t.id = s.trip_id
           WHERE t.user_id = ?1
           ORDER BY a.start_time"#,
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(activities.into_iter().map(Into::into).collect()))
}

async fn get_activity(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(activity_id): Path<String>,
) -> Result<Json<ActivityResponse>, AppError> {
    let user = current.require_user()?;
    let activity = ownership::activity_for_owner(&state.db, user.id, &activity_id).await?;
    Ok(Json(activity.into()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateActivityPayload {
    stop: String,
    name: String,
    description: Option<String>,
    category: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    cost: Option<f64>,
}

async fn create_activity(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(payload): Json<CreateActivityPayload>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    ownership::stop_for_owner(&state.db, user.id, &payload.stop).await?;

    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::bad_request("activity name is required"));
    }
    let category = validate_category(payload.category)?;
    let cost = validate_cost(payload.cost)?;

    let now = Utc::now();
    let activity = Activity {
        id: Uuid::new_v4().to_string(),
        stop_id: payload.stop,
        name,
        description: payload.description,
        category,
        start_time: payload.start_time,
        end_time: payload.end_time,
        cost,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"INSERT INTO activities
               (id, stop_id, name, description, category, start_time, end_time, cost,
                created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
    )
    .bind(&activity.id)
    .bind(&activity.stop_id)
    .bind(&activity.name)
    .bind(&activity.description)
    .bind(&activity.category)
    .bind(activity.start_time)
    .bind(activity.end_time)
    .bind(activity.cost)
    .bind(activity.created_at)
    .bind(activity.updated_at)
    .execute(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(ActivityResponse::from(activity))))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateActivityPayload {
    name: Option<String>,
    description: Option<String>,
    category: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    cost: Option<f64>,
}

async fn update_activity(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(activity_id): Path<String>,
    Json(payload): Json<UpdateActivityPayload>,
) -> Result<Json<ActivityResponse>, AppError> {
    let user = current.require_user()?;
    let mut activity = ownership::activity_for_owner(&state.db, user.id, &activity_id).await?;

    if let Some(name) = payload.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::bad_request("activity name is required"));
        }
        activity.name = name;
    }
    if let Some(description) = payload.description {
        activity.description = Some(description);
    }
    if payload.category.is_some() {
        activity.category = validate_category(payload.category)?;
    }
    if let Some(start_time) = payload.start_time {
        activity.start_time = Some(start_time);
    }
    if let Some(end_time) = payload.end_time {
        activity.end_time = Some(end_time);
    }
    if payload.cost.is_some() {
        activity.cost = validate_cost(payload.cost)?;
    }
    activity.updated_at = Utc::now();

    sqlx::query(
        r#"UPDATE activities
           SET name = ?1, description = ?2, category = ?3, start_time = ?4,
               end_time = ?5, cost = ?6, updated_at = ?7
           WHERE id = ?8"#,
    )
    .bind(&activity.name)
    .bind(&activity.description)
    .bind(&activity.category)
    .bind(activity.start_time)
    .bind(activity.end_time)
    .bind(activity.cost)
    .bind(activity.updated_at)
    .bind(&activity.id)
    .execute(&state.db)
    .await?;

    Ok(Json(activity.into()))
}

async fn delete_activity(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(activity_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    let activity = ownership::activity_for_owner(&state.db, user.id, &activity_id).await?;
    sqlx::query("DELETE FROM activities WHERE id = ?1")
        .bind(&activity.id)
        .execute(&state.db)
        .await?;
    Ok(Json(json!({ "message": "activity deleted" })))
}

fn validate_category(category: Option<String>) -> Result<String, AppError> {
    match category {
        Some(category) if activity::is_valid_category(&category) => Ok(category),
        Some(category) => Err(AppError::bad_request(format!(
            "unknown activity category: {category}"
        ))),
        None => Ok("Other".to_string()),
    }
}

fn validate_cost(cost: Option<f64>) -> Result<f64, AppError> {
    let cost = cost.unwrap_or(0.0);
    if !cost.is_finite() || cost < 0.0 {
        return Err(AppError::bad_request("cost must be a non-negative number"));
    }
    Ok(cost)
}
