use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_with::skip_serializing_none;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::CurrentUser,
    db::DbPool,
    error::AppError,
    models::{
        expense::Expense,
        stop::Stop,
        trip::{Trip, TripStatus},
    },
    routes::{
        budget::ExpenseResponse,
        stops::{self, StopResponse},
    },
    services::{aggregate, ownership},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_trip).get(list_trips))
        .route("/public", get(list_public_trips))
        .route("/shared/:share_id", get(shared_trip))
        .route("/:id", get(get_trip).put(update_trip).delete(delete_trip))
        .route("/:id/stats", get(trip_stats))
        .route("/:id/share", post(generate_share_link))
        .route("/:id/visibility", put(set_visibility))
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripResponse {
    pub id: String,
    pub user_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub destination: Option<String>,
    pub status: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub cover_image: Option<String>,
    pub is_public: bool,
    pub share_id: Option<String>,
    pub total_budget: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Trip> for TripResponse {
    fn from(trip: Trip) -> Self {
        Self {
            id: trip.id,
            user_id: trip.user_id,
            name: trip.name,
            description: trip.description,
            destination: trip.primary_destination,
            status: trip.status,
            start_date: trip.start_date,
            end_date: trip.end_date,
            cover_image: trip.cover_image,
            is_public: trip.is_public,
            share_id: trip.share_id,
            total_budget: trip.total_budget,
            created_at: trip.created_at,
            updated_at: trip.updated_at,
        }
    }
}

/// Listing shape: trips with their raw stops and expenses, no city or
/// activity joins.
#[derive(Debug, Clone, Serialize)]
struct TripListItem {
    #[serde(flatten)]
    trip: TripResponse,
    stops: Vec<StopSummary>,
    expenses: Vec<ExpenseResponse>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct StopSummary {
    id: String,
    trip_id: String,
    city_id: String,
    arrival_date: Option<DateTime<Utc>>,
    departure_date: Option<DateTime<Utc>>,
    estimated_cost: f64,
}

impl From<Stop> for StopSummary {
    fn from(stop: Stop) -> Self {
        Self {
            id: stop.id,
            trip_id: stop.trip_id,
            city_id: stop.city_id,
            arrival_date: stop.arrival_date,
            departure_date: stop.departure_date,
            estimated_cost: stop.estimated_cost,
        }
    }
}

/// Detail shape: stops carry city names and activities, expenses ride
/// along, and `destinations` lists the city names in visiting order.
#[derive(Debug, Clone, Serialize)]
struct TripDetail {
    #[serde(flatten)]
    trip: TripResponse,
    destinations: Vec<String>,
    stops: Vec<StopResponse>,
    expenses: Vec<ExpenseResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTripPayload {
    name: String,
    description: Option<String>,
    destination: Option<String>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    total_budget: Option<f64>,
    is_public: Option<bool>,
    cover_image: Option<String>,
}

async fn create_trip(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(payload): Json<CreateTripPayload>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;

    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::bad_request("trip name is required"));
    }
    let total_budget = validate_budget(payload.total_budget)?;
    validate_range(payload.start_date, payload.end_date)?;

    let now = Utc::now();
    let status = TripStatus::calculated(payload.start_date, payload.end_date, now);
    let trip = Trip {
        id: Uuid::new_v4().to_string(),
        user_id: user.id,
        name,
        description: payload.description,
        primary_destination: payload.destination,
        start_date: payload.start_date,
        end_date: payload.end_date,
        status: status.as_str().to_string(),
        cover_image: payload.cover_image,
        is_public: payload.is_public.unwrap_or(false),
        share_id: None,
        total_budget,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"INSERT INTO trips
               (id, user_id, name, description, primary_destination, start_date, end_date,
                status, cover_image, is_public, share_id, total_budget, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"#,
    )
    .bind(&trip.id)
    .bind(trip.user_id)
    .bind(&trip.name)
    .bind(&trip.description)
    .bind(&trip.primary_destination)
    .bind(trip.start_date)
    .bind(trip.end_date)
    .bind(&trip.status)
    .bind(&trip.cover_image)
    .bind(trip.is_public)
    .bind(&trip.share_id)
    .bind(trip.total_budget)
    .bind(trip.created_at)
    .bind(trip.updated_at)
    .execute(&state.db)
    .await?;

    info!("created trip {} for user {}", trip.id, user.id);
    Ok((StatusCode::CREATED, Json(TripResponse::from(trip))))
}

async fn list_trips(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    let trips = sqlx::query_as::<_, Trip>(
        "SELECT * FROM trips WHERE user_id = ?1 ORDER BY created_at DESC",
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;
    let items = trips_with_children(&state.db, trips).await?;
    Ok(Json(items))
}

async fn list_public_trips(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let trips = sqlx::query_as::<_, Trip>(
        "SELECT * FROM trips WHERE is_public = 1 ORDER BY created_at DESC",
    )
    .fetch_all(&state.db)
    .await?;
    let items = trips_with_children(&state.db, trips).await?;
    Ok(Json(items))
}

async fn get_trip(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    let trip = ownership::trip_for_owner(&state.db, user.id, &trip_id).await?;
    let detail = trip_detail(&state.db, trip).await?;
    Ok(Json(detail))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateTripPayload {
    name: Option<String>,
    description: Option<String>,
    destination: Option<String>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    status: Option<String>,
    total_budget: Option<f64>,
    is_public: Option<bool>,
    cover_image: Option<String>,
}

async fn update_trip(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<String>,
    Json(payload): Json<UpdateTripPayload>,
) -> Result<Json<TripResponse>, AppError> {
    let user = current.require_user()?;
    let mut trip = ownership::trip_for_owner(&state.db, user.id, &trip_id).await?;

    if let Some(name) = payload.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::bad_request("trip name is required"));
        }
        trip.name = name;
    }
    if let Some(description) = payload.description {
        trip.description = Some(description);
    }
    if let Some(destination) = payload.destination {
        trip.primary_destination = Some(destination);
    }
    if let Some(start_date) = payload.start_date {
        trip.start_date = Some(start_date);
    }
    if let Some(end_date) = payload.end_date {
        trip.end_date = Some(end_date);
    }
    validate_range(trip.start_date, trip.end_date)?;
    if let Some(status) = payload.status {
        let status = TripStatus::parse(&status)
            .ok_or_else(|| AppError::bad_request(format!("unknown trip status: {status}")))?;
        trip.status = status.as_str().to_string();
    }
    if payload.total_budget.is_some() {
        trip.total_budget = validate_budget(payload.total_budget)?;
    }
    if let Some(is_public) = payload.is_public {
        trip.is_public = is_public;
    }
    if let Some(cover_image) = payload.cover_image {
        trip.cover_image = Some(cover_image);
    }

    // Trips left in planning pick up the status their dates imply.
    if trip.status == TripStatus::Planning.as_str() {
        trip.status = TripStatus::calculated(trip.start_date, trip.end_date, Utc::now())
            .as_str()
            .to_string();
    }
    trip.updated_at = Utc::now();

    sqlx::query(
        r#"UPDATE trips
           SET name = ?1, description = ?2, primary_destination = ?3, start_date = ?4,
               end_date = ?5, status = ?6, cover_image = ?7, is_public = ?8,
               total_budget = ?9, updated_at = ?10
           WHERE id = ?11"#,
    )
    .bind(&trip.name)
    .bind(&trip.description)
    .bind(&trip.primary_destination)
    .bind(trip.start_date)
    .bind(trip.end_date)
    .bind(&trip.status)
    .bind(&trip.cover_image)
    .bind(trip.is_public)
    .bind(trip.total_budget)
    .bind(trip.updated_at)
    .bind(&trip.id)
    .execute(&state.db)
    .await?;

    Ok(Json(trip.into()))
}

async fn delete_trip(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    let trip = ownership::trip_for_owner(&state.db, user.id, &trip_id).await?;

    // Everything hanging off the trip goes with it, atomically.
    let mut tx = state.db.begin().await?;
    sqlx::query(
        "DELETE FROM activities WHERE stop_id IN (SELECT id FROM stops WHERE trip_id = ?1)",
    )
    .bind(&trip.id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM stops WHERE trip_id = ?1")
        .bind(&trip.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM expenses WHERE trip_id = ?1")
        .bind(&trip.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM trips WHERE id = ?1")
        .bind(&trip.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!("deleted trip {} and its children", trip.id);
    Ok(Json(json!({ "message": "trip deleted" })))
}

async fn trip_stats(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<String>,
) -> Result<Json<aggregate::TripStats>, AppError> {
    let user = current.require_user()?;
    let trip = ownership::trip_for_owner(&state.db, user.id, &trip_id).await?;
    let stats = aggregate::trip_stats(&state.db, &trip).await?;
    Ok(Json(stats))
}

async fn generate_share_link(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    let trip = ownership::trip_for_owner(&state.db, user.id, &trip_id).await?;

    let share_id = match trip.share_id {
        Some(existing) => existing,
        None => {
            let minted = Uuid::new_v4().simple().to_string();
            sqlx::query("UPDATE trips SET share_id = ?1, updated_at = ?2 WHERE id = ?3")
                .bind(&minted)
                .bind(Utc::now())
                .bind(&trip.id)
                .execute(&state.db)
                .await?;
            minted
        }
    };

    let share_url = state
        .config
        .public_base_url
        .join(&format!("shared/{share_id}"))
        .map_err(|err| AppError::Other(anyhow::anyhow!("share url: {err}")))?;

    Ok(Json(json!({
        "shareId": share_id,
        "shareUrl": share_url.to_string(),
        "message": "share link generated",
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VisibilityPayload {
    is_public: bool,
}

async fn set_visibility(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<String>,
    Json(payload): Json<VisibilityPayload>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    let trip = ownership::trip_for_owner(&state.db, user.id, &trip_id).await?;
    sqlx::query("UPDATE trips SET is_public = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(payload.is_public)
        .bind(Utc::now())
        .bind(&trip.id)
        .execute(&state.db)
        .await?;
    Ok(Json(json!({
        "message": if payload.is_public { "trip made public" } else { "trip made private" },
        "isPublic": payload.is_public,
    })))
}

/// Read-only view for share links: resolved by share id, or by trip id
/// when the trip is public. Deliberately independent of ownership.
async fn shared_trip(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let trip = sqlx::query_as::<_, Trip>(
        "SELECT * FROM trips WHERE share_id = ?1 OR (id = ?1 AND is_public = 1)",
    )
    .bind(&share_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound)?;

    let detail = trip_detail(&state.db, trip).await?;
    Ok(Json(detail))
}

async fn trip_detail(db: &DbPool, trip: Trip) -> Result<TripDetail, AppError> {
    let stop_rows = stops::stops_with_cities(db, &trip.id).await?;
    let mut grouped = stops::activities_by_stop(db, &trip.id).await?;

    let mut destinations = Vec::with_capacity(stop_rows.len());
    let mut stop_responses = Vec::with_capacity(stop_rows.len());
    for row in stop_rows {
        destinations.push(row.city_name.clone());
        let activities = grouped.remove(&row.stop.id).unwrap_or_default();
        stop_responses.push(StopResponse::from_parts(row, activities));
    }

    let expenses = sqlx::query_as::<_, Expense>(
        "SELECT * FROM expenses WHERE trip_id = ?1 ORDER BY created_at DESC",
    )
    .bind(&trip.id)
    .fetch_all(db)
    .await?;

    Ok(TripDetail {
        trip: trip.into(),
        destinations,
        stops: stop_responses,
        expenses: expenses.into_iter().map(Into::into).collect(),
    })
}

async fn trips_with_children(
    db: &DbPool,
    trips: Vec<Trip>,
) -> Result<Vec<TripListItem>, AppError> {
    let mut items = Vec::with_capacity(trips.len());
    for trip in trips {
        let stops = sqlx::query_as::<_, Stop>(
            "SELECT * FROM stops WHERE trip_id = ?1 ORDER BY arrival_date",
        )
        .bind(&trip.id)
        .fetch_all(db)
        .await?;
        let expenses = sqlx::query_as::<_, Expense>(
            "SELECT * FROM expenses WHERE trip_id = ?1 ORDER BY created_at DESC",
        )
        .bind(&trip.id)
        .fetch_all(db)
        .await?;
        items.push(TripListItem {
            trip: trip.into(),
            stops: stops.into_iter().map(Into::into).collect(),
            expenses: expenses.into_iter().map(Into::into).collect(),
        });
    }
    Ok(items)
}

fn validate_budget(budget: Option<f64>) -> Result<f64, AppError> {
    let budget = budget.unwrap_or(0.0);
    if !budget.is_finite() || budget < 0.0 {
        return Err(AppError::bad_request(
            "total budget must be a non-negative number",
        ));
    }
    Ok(budget)
}

fn validate_range(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<(), AppError> {
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(AppError::bad_request(
                "end date must not precede start date",
            ));
        }
    }
    Ok(())
}
