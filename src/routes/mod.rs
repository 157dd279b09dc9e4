pub mod activities;
pub mod admin;
pub mod auth;
pub mod budget;
pub mod cities;
pub mod community;
pub mod stops;
pub mod trips;

use axum::{
    http::{header, HeaderValue, Method},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::{config::AppConfig, state::AppState};

pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    Router::new()
        .nest("/api/auth", auth::router())
        .nest("/api/trips", trips::router())
        .nest("/api/stops", stops::router())
        .nest("/api/activities", activities::router())
        .nest("/api/budget", budget::router())
        .nest("/api/expenses", budget::expense_router())
        .nest("/api/cities", cities::router())
        .nest("/api/community", community::router())
        .nest("/api/admin", admin::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// The browser client lives on another origin and sends the session
/// cookie, so credentials must be allowed and origins listed explicitly.
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("skipping unparseable CORS origin: {origin}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}
