use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::user::{User, UserRole},
    state::AppState,
};

pub const SESSION_COOKIE: &str = "globetrotter_session";

const SESSION_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: i64,
    pub uuid: String,
    pub username: String,
    pub email: String,
    pub role: UserRole,
}

#[derive(Debug, Clone, Default)]
pub struct CurrentUser(pub Option<AuthenticatedUser>);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar: PrivateCookieJar = PrivateCookieJar::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::Unauthorized)?;

        let Some(cookie) = jar.get(SESSION_COOKIE) else {
            return Ok(Self(None));
        };

        Ok(Self(resolve_session(state, cookie.value()).await?))
    }
}

impl CurrentUser {
    pub fn require_user(&self) -> Result<&AuthenticatedUser, AppError> {
        self.0.as_ref().ok_or(AppError::Unauthorized)
    }

    pub fn require_admin(&self) -> Result<&AuthenticatedUser, AppError> {
        let user = self.require_user()?;
        if user.role == UserRole::Admin {
            Ok(user)
        } else {
            Err(AppError::Forbidden)
        }
    }
}

async fn resolve_session(
    state: &AppState,
    session_id: &str,
) -> Result<Option<AuthenticatedUser>, AppError> {
    let row = sqlx::query(
        r#"SELECT s.id AS session_id, s.expires_at,
                  u.id, u.uuid, u.username, u.email, u.role
           FROM sessions s JOIN users u ON u.id = s.user_id
           WHERE s.id = ?1"#,
    )
    .bind(session_id)
    .fetch_optional(&state.db)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    if let Some(expires_at) = row.get::<Option<DateTime<Utc>>, _>("expires_at") {
        if expires_at <= Utc::now() {
            debug!("session expired, discarding");
            destroy_session(state, session_id).await?;
            return Ok(None);
        }
    }

    sqlx::query("UPDATE sessions SET last_seen_at = ?1 WHERE id = ?2")
        .bind(Utc::now())
        .bind(session_id)
        .execute(&state.db)
        .await?;

    Ok(Some(AuthenticatedUser {
        id: row.get("id"),
        uuid: row.get("uuid"),
        username: row.get("username"),
        email: row.get("email"),
        role: UserRole::from_str(&row.get::<String, _>("role")),
    }))
}

pub async fn register_user(
    state: &AppState,
    username: &str,
    email: &str,
    password: &str,
) -> Result<AuthenticatedUser, AppError> {
    let username = username.trim();
    let email = email.trim().to_lowercase();

    if username.is_empty() {
        return Err(AppError::bad_request("name is required"));
    }
    if !email.contains('@') {
        return Err(AppError::bad_request("invalid email"));
    }
    if password.len() < 6 {
        return Err(AppError::bad_request("password must be at least 6 characters"));
    }

    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_some() {
        return Err(AppError::Conflict("user already exists".into()));
    }

    let password_hash = hash_password(password)?;
    let uuid = Uuid::new_v4().to_string();
    let now = Utc::now();

    let result = sqlx::query(
        r#"INSERT INTO users (uuid, username, email, password_hash, role, created_at)
           VALUES (?1, ?2, ?3, ?4, 'user', ?5)"#,
    )
    .bind(&uuid)
    .bind(username)
    .bind(&email)
    .bind(&password_hash)
    .bind(now)
    .execute(&state.db)
    .await?;

    Ok(AuthenticatedUser {
        id: result.last_insert_rowid(),
        uuid,
        username: username.to_string(),
        email,
        role: UserRole::User,
    })
}

pub async fn authenticate_user(
    state: &AppState,
    email: &str,
    password: &str,
) -> Result<AuthenticatedUser, AppError> {
    let email = email.trim().to_lowercase();
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;

    let Some(user) = user else {
        return Err(AppError::bad_request("invalid credentials"));
    };

    if !verify_password(password, &user.password_hash)? {
        return Err(AppError::bad_request("invalid credentials"));
    }

    sqlx::query("UPDATE users SET last_login_at = ?1 WHERE id = ?2")
        .bind(Utc::now())
        .bind(user.id)
        .execute(&state.db)
        .await?;

    Ok(AuthenticatedUser {
        id: user.id,
        uuid: user.uuid,
        username: user.username,
        email: user.email,
        role: UserRole::from_str(&user.role),
    })
}

pub async fn create_session(state: &AppState, user_id: i64) -> Result<String, AppError> {
    let session_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        r#"INSERT INTO sessions (id, user_id, created_at, last_seen_at, expires_at)
           VALUES (?1, ?2, ?3, ?3, ?4)"#,
    )
    .bind(&session_id)
    .bind(user_id)
    .bind(now)
    .bind(now + Duration::days(SESSION_TTL_DAYS))
    .execute(&state.db)
    .await?;
    Ok(session_id)
}

pub async fn destroy_session(state: &AppState, session_id: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM sessions WHERE id = ?1")
        .bind(session_id)
        .execute(&state.db)
        .await?;
    Ok(())
}

pub fn apply_session_cookie(jar: PrivateCookieJar, session_id: &str) -> PrivateCookieJar {
    let cookie = Cookie::build((SESSION_COOKIE, session_id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .build();
    jar.add(cookie)
}

pub fn clear_session_cookie(jar: PrivateCookieJar) -> PrivateCookieJar {
    jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/").build())
}

fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AppError::Other(anyhow::anyhow!("password hashing failed: {err}")))
}

fn verify_password(password: &str, stored: &str) -> Result<bool, AppError> {
    let parsed = PasswordHash::new(stored)
        .map_err(|err| AppError::Other(anyhow::anyhow!("stored hash unreadable: {err}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
