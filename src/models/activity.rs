use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const ACTIVITY_CATEGORIES: &[&str] = &[
    "Sightseeing",
    "Food",
    "Culture",
    "Adventure",
    "Shopping",
    "Nightlife",
    "Transportation",
    "Accommodation",
    "Other",
];

pub fn is_valid_category(raw: &str) -> bool {
    ACTIVITY_CATEGORIES.contains(&raw)
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Activity {
    pub id: String,
    pub stop_id: String,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub cost: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Activity {
    /// Hours between start and end, rounded to one decimal. `None` when
    /// either endpoint is missing.
    pub fn duration_hours(&self) -> Option<f64> {
        crate::services::aggregate::duration_hours(self.start_time, self.end_time)
    }
}
