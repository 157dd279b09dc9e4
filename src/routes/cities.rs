use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_with::skip_serializing_none;

use crate::{
    auth::CurrentUser,
    error::AppError,
    models::city::City,
    services::cities::{self, find_or_create_city},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(search_cities).post(create_city))
        .route("/:id", get(get_city).put(update_city).delete(delete_city))
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CityResponse {
    pub id: String,
    pub name: String,
    pub country: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<City> for CityResponse {
    fn from(city: City) -> Self {
        Self {
            id: city.id,
            name: city.name,
            country: city.country,
            description: city.description,
            created_at: city.created_at,
            updated_at: city.updated_at,
        }
    }
}

#[derive(Deserialize)]
struct CitySearchParams {
    search: Option<String>,
    country: Option<String>,
}

async fn search_cities(
    State(state): State<AppState>,
    Query(params): Query<CitySearchParams>,
) -> Result<Json<Vec<CityResponse>>, AppError> {
    let search = params.search.unwrap_or_default();
    let country = params.country.unwrap_or_default();
    // SQLite LIKE is already case-insensitive for ASCII; results are
    // capped the way the original endpoint capped them.
    let results = sqlx::query_as::<_, City>(
        r#"SELECT * FROM cities
           WHERE (?1 = '' OR name LIKE '%' || ?1 || '%')
             AND (?2 = '' OR country LIKE '%' || ?2 || '%')
           ORDER BY name
           LIMIT 100"#,
    )
    .bind(search.trim())
    .bind(country.trim())
    .fetch_all(&state.db)
    .await?;
    Ok(Json(results.into_iter().map(Into::into).collect()))
}

async fn get_city(
    State(state): State<AppState>,
    Path(city_id): Path<String>,
) -> Result<Json<CityResponse>, AppError> {
    let city = sqlx::query_as::<_, City>("SELECT * FROM cities WHERE id = ?1")
        .bind(&city_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(city.into()))
}

#[derive(Deserialize)]
struct CityPayload {
    name: String,
    country: String,
    description: Option<String>,
}

/// Create-if-absent: a case-insensitive (name, country) match returns the
/// existing record unchanged instead of erroring.
async fn create_city(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(payload): Json<CityPayload>,
) -> Result<impl IntoResponse, AppError> {
    current.require_user()?;
    let (city, created) = find_or_create_city(
        &state.db,
        &payload.name,
        &payload.country,
        payload.description,
    )
    .await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(CityResponse::from(city))))
}

async fn update_city(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(city_id): Path<String>,
    Json(payload): Json<CityPayload>,
) -> Result<Json<CityResponse>, AppError> {
    current.require_admin()?;

    let mut city = sqlx::query_as::<_, City>("SELECT * FROM cities WHERE id = ?1")
        .bind(&city_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound)?;

    let name = payload.name.trim().to_string();
    let country = payload.country.trim().to_string();
    if name.is_empty() || country.is_empty() {
        return Err(AppError::bad_request("name and country are required"));
    }
    city.name = name;
    city.country = country;
    city.description = payload.description.or(city.description);
    city.updated_at = Utc::now();

    let updated = sqlx::query(
        r#"UPDATE cities SET name = ?1, country = ?2, description = ?3, updated_at = ?4
           WHERE id = ?5"#,
    )
    .bind(&city.name)
    .bind(&city.country)
    .bind(&city.description)
    .bind(city.updated_at)
    .bind(&city.id)
    .execute(&state.db)
    .await;

    match updated {
        Ok(_) => Ok(Json(city.into())),
        Err(err) if cities::is_unique_violation(&err) => Err(AppError::Conflict(
            "another city with that name and country already exists".into(),
        )),
        Err(err) => Err(err.into()),
    }
}

async fn delete_city(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(city_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    current.require_admin()?;
    let affected = sqlx::query("DELETE FROM cities WHERE id = ?1")
        .bind(&city_id)
        .execute(&state.db)
        .await?
        .rows_affected();
    if affected == 0 {
        return Err(AppError::NotFound);
    }
    Ok(Json(json!({ "message": "city deleted" })))
}
