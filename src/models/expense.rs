use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const EXPENSE_TYPES: &[&str] = &[
    "Accommodation",
    "Transportation",
    "Food",
    "Activities",
    "Shopping",
    "Other",
];

pub fn is_valid_expense_type(raw: &str) -> bool {
    EXPENSE_TYPES.contains(&raw)
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Expense {
    pub id: String,
    pub trip_id: String,
    pub expense_type: String,
    pub amount: f64,
    pub date: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
