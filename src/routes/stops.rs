use std::collections::HashMap;

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
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    auth::CurrentUser,
    db::DbPool,
    error::AppError,
    models::{activity::Activity, city::City, stop::Stop},
    routes::activities::ActivityResponse,
    services::ownership,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_stops).post(create_stop))
        .route("/:id", get(get_stop).put(update_stop).delete(delete_stop))
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResponse {
    pub id: String,
    pub trip_id: String,
    pub city_id: String,
    pub city_name: String,
    pub country: String,
    /// The UI talks about stop start/end; storage calls them arrival and
    /// departure.
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub estimated_cost: f64,
    pub activities: Vec<ActivityResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
pub struct StopWithCity {
    #[sqlx(flatten)]
    pub stop: Stop,
    pub city_name: String,
    pub country: String,
}

impl StopResponse {
    pub fn from_parts(row: StopWithCity, activities: Vec<ActivityResponse>) -> Self {
        Self {
            id: row.stop.id,
            trip_id: row.stop.trip_id,
            city_id: row.stop.city_id,
            city_name: row.city_name,
            country: row.country,
            start_date: row.stop.arrival_date,
            end_date: row.stop.departure_date,
            estimated_cost: row.stop.estimated_cost,
            activities,
            created_at: row.stop.created_at,
            updated_at: row.stop.updated_at,
        }
    }
}

/// Activities for every stop of one trip, grouped by stop id.
pub async fn activities_by_stop(
    db: &DbPool,
    trip_id: &str,
) -> Result<HashMap<String, Vec<ActivityResponse>>, AppError> {
    let activities = sqlx::query_as::<_, Activity>(
        r#"SELECT a.* FROM activities a
           JOIN stops s ON s.id = a.stop_id
           WHERE s.trip_id = ?1
           ORDER BY a.start_time"#,
    )
    .bind(trip_id)
    .fetch_all(db)
    .await?;

    let mut grouped: HashMap<String, Vec<ActivityResponse>> = HashMap::new();
    for activity in activities {
        grouped
            .entry(activity.stop_id.clone())
            .or_default()
            .push(activity.into());
    }
    Ok(grouped)
}

pub async fn stops_with_cities(db: &DbPool, trip_id: &str) -> Result<Vec<StopWithCity>, AppError> {
    let rows = sqlx::query_as::<_, StopWithCity>(
        r#"SELECT s.*, c.name AS city_name, c.country AS country
           FROM stops s
           JOIN cities c ON c.id = s.city_id
           WHERE s.trip_id = ?1
           ORDER BY s.arrival_date"#,
    )
    .bind(trip_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

async fn list_stops(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Vec<StopResponse>>, AppError> {
    let user = current.require_user()?;
    let rows = sqlx::query_as::<_, StopWithCity>(
        r#"SELECT s.*, c.name AS city_name, c.country AS country
           FROM stops s
           JOIN trips t ON t.id = s.trip_id
           JOIN cities c ON c.id = s.city_id
           WHERE t.user_id = ?1
           ORDER BY s.arrival_date"#,
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    let mut responses = Vec::with_capacity(rows.len());
    for row in rows {
        let activities = stop_activities(&state.db, &row.stop.id).await?;
        responses.push(StopResponse::from_parts(row, activities));
    }
    Ok(Json(responses))
}

async fn get_stop(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(stop_id): Path<String>,
) -> Result<Json<StopResponse>, AppError> {
    let user = current.require_user()?;
    let stop = ownership::stop_for_owner(&state.db, user.id, &stop_id).await?;
    stop_response(&state.db, stop).await.map(Json)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateStopPayload {
    trip: String,
    city: String,
    arrival_date: Option<DateTime<Utc>>,
    departure_date: Option<DateTime<Utc>>,
    estimated_cost: Option<f64>,
}

async fn create_stop(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(payload): Json<CreateStopPayload>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    ownership::trip_for_owner(&state.db, user.id, &payload.trip).await?;

    let city = sqlx::query_as::<_, City>("SELECT * FROM cities WHERE id = ?1")
        .bind(&payload.city)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::bad_request("unknown city"))?;

    validate_dates(payload.arrival_date, payload.departure_date)?;
    let estimated_cost = validate_estimated_cost(payload.estimated_cost)?;

    let now = Utc::now();
    let stop = Stop {
        id: Uuid::new_v4().to_string(),
        trip_id: payload.trip,
        city_id: city.id.clone(),
        arrival_date: payload.arrival_date,
        departure_date: payload.departure_date,
        estimated_cost,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"INSERT INTO stops
               (id, trip_id, city_id, arrival_date, departure_date, estimated_cost,
                created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
    )
    .bind(&stop.id)
    .bind(&stop.trip_id)
    .bind(&stop.city_id)
    .bind(stop.arrival_date)
    .bind(stop.departure_date)
    .bind(stop.estimated_cost)
    .bind(stop.created_at)
    .bind(stop.updated_at)
    .execute(&state.db)
    .await?;

    let response = StopResponse::from_parts(
        StopWithCity {
            stop,
            city_name: city.name,
            country: city.country,
        },
        Vec::new(),
    );
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateStopPayload {
    trip: Option<String>,
    city: Option<String>,
    arrival_date: Option<DateTime<Utc>>,
    departure_date: Option<DateTime<Utc>>,
    estimated_cost: Option<f64>,
}

async fn update_stop(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(stop_id): Path<String>,
    Json(payload): Json<UpdateStopPayload>,
) -> Result<Json<StopResponse>, AppError> {
    let user = current.require_user()?;
    let mut stop = ownership::stop_for_owner(&state.db, user.id, &stop_id).await?;

    if let Some(trip_id) = payload.trip {
        // Re-parenting only within the caller's own trips.
        ownership::trip_for_owner(&state.db, user.id, &trip_id).await?;
        stop.trip_id = trip_id;
    }
    if let Some(city_id) = payload.city {
        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM cities WHERE id = ?1")
            .bind(&city_id)
            .fetch_optional(&state.db)
            .await?;
        if exists.is_none() {
            return Err(AppError::bad_request("unknown city"));
        }
        stop.city_id = city_id;
    }
    if let Some(arrival) = payload.arrival_date {
        stop.arrival_date = Some(arrival);
    }
    if let Some(departure) = payload.departure_date {
        stop.departure_date = Some(departure);
    }
    validate_dates(stop.arrival_date, stop.departure_date)?;
    if payload.estimated_cost.is_some() {
        stop.estimated_cost = validate_estimated_cost(payload.estimated_cost)?;
    }
    stop.updated_at = Utc::now();

    sqlx::query(
        r#"UPDATE stops
           SET trip_id = ?1, city_id = ?2, arrival_date = ?3, departure_date = ?4,
               estimated_cost = ?5, updated_at = ?6
           WHERE id = ?7"#,
    )
    .bind(&stop.trip_id)
    .bind(&stop.city_id)
    .bind(stop.arrival_date)
    .bind(stop.departure_date)
    .bind(stop.estimated_cost)
    .bind(stop.updated_at)
    .bind(&stop.id)
    .execute(&state.db)
    .await?;

    stop_response(&state.db, stop).await.map(Json)
}

async fn delete_stop(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(stop_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    let stop = ownership::stop_for_owner(&state.db, user.id, &stop_id).await?;

    // The stop and its activities go together or not at all.
    let mut tx = state.db.begin().await?;
    sqlx::query("DELETE FROM activities WHERE stop_id = ?1")
        .bind(&stop.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM stops WHERE id = ?1")
        .bind(&stop.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(Json(json!({ "message": "stop deleted" })))
}

async fn stop_activities(db: &DbPool, stop_id: &str) -> Result<Vec<ActivityResponse>, AppError> {
    let activities = sqlx::query_as::<_, Activity>(
        "SELECT * FROM activities WHERE stop_id = ?1 ORDER BY start_time",
    )
    .bind(stop_id)
    .fetch_all(db)
    .await?;
    Ok(activities.into_iter().map(Into::into).collect())
}

async fn stop_response(db: &DbPool, stop: Stop) -> Result<StopResponse, AppError> {
    let city = sqlx::query_as::<_, City>("SELECT * FROM cities WHERE id = ?1")
        .bind(&stop.city_id)
        .fetch_optional(db)
        .await?;
    let (city_name, country) = city
        .map(|c| (c.name, c.country))
        .unwrap_or_else(|| ("Unknown City".to_string(), "Unknown Country".to_string()));
    let activities = stop_activities(db, &stop.id).await?;
    Ok(StopResponse::from_parts(
        StopWithCity {
            stop,
            city_name,
            country,
        },
        activities,
    ))
}

fn validate_dates(
    arrival: Option<DateTime<Utc>>,
    departure: Option<DateTime<Utc>>,
) -> Result<(), AppError> {
    if let (Some(arrival), Some(departure)) = (arrival, departure) {
        if departure < arrival {
            return Err(AppError::bad_request(
                "departure date must not precede arrival date",
            ));
        }
    }
    Ok(())
}

fn validate_estimated_cost(cost: Option<f64>) -> Result<f64, AppError> {
    let cost = cost.unwrap_or(0.0);
    if !cost.is_finite() || cost < 0.0 {
        return Err(AppError::bad_request(
            "estimated cost must be a non-negative number",
        ));
    }
    Ok(cost)
}
