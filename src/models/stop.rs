use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Stop {
    pub id: String,
    pub trip_id: String,
    pub city_id: String,
    pub arrival_date: Option<DateTime<Utc>>,
    pub departure_date: Option<DateTime<Utc>>,
    pub estimated_cost: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
