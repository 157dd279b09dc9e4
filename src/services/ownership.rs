//! Owner-scoped lookups for trip-rooted resources.
//!
//! Stops, activities and expenses carry only their parent id, so every
//! access resolves the chain up to the owning trip. All lookups filter by
//! owner inside the query itself: a resource owned by someone else yields
//! the same `NotFound` as a missing one.

use crate::{
    db::DbPool,
    error::AppError,
    models::{activity::Activity, expense::Expense, stop::Stop, trip::Trip},
};

pub async fn trip_for_owner(
    db: &DbPool,
    user_id: i64,
    trip_id: &str,
) -> Result<Trip, AppError> {
    sqlx::query_as::<_, Trip>("SELECT * FROM trips WHERE id = ?1 AND user_id = ?2")
        .bind(trip_id)
        .bind(user_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn stop_for_owner(
    db: &DbPool,
    user_id: i64,
    stop_id: &str,
) -> Result<Stop, AppError> {
    sqlx::query_as::<_, Stop>(
        r#"SELECT s.* FROM stops s
           JOIN trips t ON t.id = s.trip_id
           WHERE s.id = ?1 AND t.user_id = ?2"#,
    )
    .bind(stop_id)
    .bind(user_id)
    .fetch_optional(db)
    .await?
    .ok_or(AppError::NotFound)
}

pub async fn activity_for_owner(
    db: &DbPool,
    user_id: i64,
    activity_id: &str,
) -> Result<Activity, AppError> {
    sqlx::query_as::<_, Activity>(
        r#"SELECT a.* FROM activities a
           JOIN stops s ON s.id = a.stop_id
           JOIN trips t ON t.id = s.trip_id
           WHERE a.id = ?1 AND t.user_id = ?2"#,
    )
    .bind(activity_id)
    .bind(user_id)
    .fetch_optional(db)
    .await?
    .ok_or(AppError::NotFound)
}

pub async fn expense_for_owner(
    db: &DbPool,
    user_id: i64,
    expense_id: &str,
) -> Result<Expense, AppError> {
    sqlx::query_as::<_, Expense>(
        r#"SELECT e.* FROM expenses e
           JOIN trips t ON t.id = e.trip_id
           WHERE e.id = ?1 AND t.user_id = ?2"#,
    )
    .bind(expense_id)
    .bind(user_id)
    .fetch_optional(db)
    .await?
    .ok_or(AppError::NotFound)
}

/// Ids of all trips the user owns, for scoping collection listings.
pub async fn owned_trip_ids(db: &DbPool, user_id: i64) -> Result<Vec<String>, AppError> {
    let ids = sqlx::query_scalar("SELECT id FROM trips WHERE user_id = ?1")
        .bind(user_id)
        .fetch_all(db)
        .await?;
    Ok(ids)
}

/// Ids of all stops inside the user's trips (second hop of the chain).
pub async fn owned_stop_ids(db: &DbPool, user_id: i64) -> Result<Vec<String>, AppError> {
    let ids = sqlx::query_scalar(
        r#"SELECT s.id FROM stops s
           JOIN trips t ON t.id = s.trip_id
           WHERE t.user_id = ?1"#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(ids)
}
