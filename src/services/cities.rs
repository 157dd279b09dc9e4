//! Shared city reference table with create-if-absent semantics.

use chrono::Utc;
use uuid::Uuid;

use crate::{db::DbPool, error::AppError, models::city::City};

/// Case-insensitive exact match on (name, country).
pub async fn lookup_city(
    db: &DbPool,
    name: &str,
    country: &str,
) -> Result<Option<City>, AppError> {
    let city = sqlx::query_as::<_, City>(
        r#"SELECT * FROM cities
           WHERE name = ?1 COLLATE NOCASE AND country = ?2 COLLATE NOCASE"#,
    )
    .bind(name)
    .bind(country)
    .fetch_optional(db)
    .await?;
    Ok(city)
}

/// Return the existing record for a case-insensitive (name, country) match,
/// creating one otherwise. First write wins for the description. The
/// returned flag is true when a new row was inserted.
pub async fn find_or_create_city(
    db: &DbPool,
    name: &str,
    country: &str,
    description: Option<String>,
) -> Result<(City, bool), AppError> {
    let name = name.trim();
    let country = country.trim();
    if name.is_empty() || country.is_empty() {
        return Err(AppError::bad_request("name and country are required"));
    }

    if let Some(existing) = lookup_city(db, name, country).await? {
        return Ok((existing, false));
    }

    let now = Utc::now();
    let city = City {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        country: country.to_string(),
        description,
        created_at: now,
        updated_at: now,
    };

    let inserted = sqlx::query(
        r#"INSERT INTO cities (id, name, country, description, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
    )
    .bind(&city.id)
    .bind(&city.name)
    .bind(&city.country)
    .bind(&city.description)
    .bind(city.created_at)
    .bind(city.updated_at)
    .execute(db)
    .await;

    match inserted {
        Ok(_) => Ok((city, true)),
        // Lost a create race; the unique index held, so the winner's row
        // is the answer.
        Err(err) if is_unique_violation(&err) => {
            let existing = lookup_city(db, name, country)
                .await?
                .ok_or(AppError::Database(err))?;
            Ok((existing, false))
        }
        Err(err) => Err(err.into()),
    }
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}
