use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TripStatus {
    #[default]
    Planning,
    Upcoming,
    Ongoing,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Planning => "planning",
            TripStatus::Upcoming => "upcoming",
            TripStatus::Ongoing => "ongoing",
            TripStatus::Completed => "completed",
            TripStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "planning" => Some(TripStatus::Planning),
            "upcoming" => Some(TripStatus::Upcoming),
            "ongoing" => Some(TripStatus::Ongoing),
            "completed" => Some(TripStatus::Completed),
            "cancelled" => Some(TripStatus::Cancelled),
            _ => None,
        }
    }

    /// Status derived from the trip's date range relative to `now`. Trips
    /// without both dates stay in planning.
    pub fn calculated(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        let (Some(start), Some(end)) = (start, end) else {
            return TripStatus::Planning;
        };
        if now < start {
            TripStatus::Upcoming
        } else if now <= end {
            TripStatus::Ongoing
        } else {
            TripStatus::Completed
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trip {
    pub id: String,
    pub user_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub primary_destination: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub status: String,
    pub cover_image: Option<String>,
    pub is_public: bool,
    pub share_id: Option<String>,
    pub total_budget: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
