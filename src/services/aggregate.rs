//! Derived read-only views over stored collections: budget rollups, trip
//! statistics and community engagement. Callers are expected to have
//! cleared the ownership guard first; nothing here re-checks it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        community::{self, Comment},
        expense::Expense,
        trip::Trip,
    },
};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSummary {
    pub total_expenses: f64,
    pub trip_budget: f64,
    /// May be negative; an overspent trip is a displayable state, not an
    /// error.
    pub budget_remaining: f64,
    pub expenses_by_type: Vec<ExpenseTypeTotal>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExpenseTypeTotal {
    #[serde(rename = "type")]
    pub expense_type: String,
    pub total: f64,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TripStats {
    pub stop_count: i64,
    pub activity_count: i64,
    pub duration_days: i64,
    /// Sum of the stops' planning estimates. Tracked independently of the
    /// expense collection; the two figures are never reconciled.
    pub estimated_cost: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeEntry {
    pub user_id: i64,
    pub user_name: String,
}

/// Group expenses by type in first-seen order. An empty slice yields a
/// zero-valued summary.
pub fn summarize_expenses(expenses: &[Expense], trip_budget: f64) -> BudgetSummary {
    let mut by_type: Vec<ExpenseTypeTotal> = Vec::new();
    let mut total = 0.0;

    for expense in expenses {
        total += expense.amount;
        match by_type
            .iter_mut()
            .find(|group| group.expense_type == expense.expense_type)
        {
            Some(group) => {
                group.total += expense.amount;
                group.count += 1;
            }
            None => by_type.push(ExpenseTypeTotal {
                expense_type: expense.expense_type.clone(),
                total: expense.amount,
                count: 1,
            }),
        }
    }

    BudgetSummary {
        total_expenses: total,
        trip_budget,
        budget_remaining: trip_budget - total,
        expenses_by_type: by_type,
    }
}

pub async fn budget_summary(db: &DbPool, trip: &Trip) -> Result<BudgetSummary, AppError> {
    let expenses = sqlx::query_as::<_, Expense>(
        "SELECT * FROM expenses WHERE trip_id = ?1 ORDER BY created_at DESC",
    )
    .bind(&trip.id)
    .fetch_all(db)
    .await?;
    Ok(summarize_expenses(&expenses, trip.total_budget))
}

pub async fn trip_stats(db: &DbPool, trip: &Trip) -> Result<TripStats, AppError> {
    let row = sqlx::query(
        r#"SELECT COUNT(*) AS stop_count,
                  COALESCE(SUM(estimated_cost), 0) AS estimated_cost
           FROM stops WHERE trip_id = ?1"#,
    )
    .bind(&trip.id)
    .fetch_one(db)
    .await?;
    let stop_count: i64 = row.get("stop_count");
    let estimated_cost: f64 = row.get("estimated_cost");

    let activity_count: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM activities a
           JOIN stops s ON s.id = a.stop_id
           WHERE s.trip_id = ?1"#,
    )
    .bind(&trip.id)
    .fetch_one(db)
    .await?;

    Ok(TripStats {
        stop_count,
        activity_count,
        duration_days: duration_days(trip.start_date, trip.end_date),
        estimated_cost,
    })
}

/// Whole days covered by the range, rounded up. 0 when either date is
/// missing or the range is inverted.
pub fn duration_days(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> i64 {
    let (Some(start), Some(end)) = (start, end) else {
        return 0;
    };
    let seconds = (end - start).num_seconds();
    if seconds <= 0 {
        return 0;
    }
    (seconds as f64 / 86_400.0).ceil() as i64
}

/// Hours between the endpoints, rounded to one decimal.
pub fn duration_hours(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Option<f64> {
    let (start, end) = (start?, end?);
    let hours = (end - start).num_seconds() as f64 / 3600.0;
    Some((hours * 10.0).round() / 10.0)
}

/// Remove the user's like if present, add it otherwise. Likes are keyed by
/// `(post_id, user_id)`, so concurrent toggles by different users cannot
/// clobber each other. Returns the resulting like list.
pub async fn toggle_like(
    db: &DbPool,
    post_id: &str,
    user_id: i64,
) -> Result<Vec<LikeEntry>, AppError> {
    let removed = sqlx::query("DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2")
        .bind(post_id)
        .bind(user_id)
        .execute(db)
        .await?
        .rows_affected();

    if removed == 0 {
        sqlx::query(
            "INSERT INTO post_likes (post_id, user_id, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(post_id)
        .bind(user_id)
        .bind(Utc::now())
        .execute(db)
        .await?;
    }

    like_entries(db, post_id).await
}

pub async fn like_entries(db: &DbPool, post_id: &str) -> Result<Vec<LikeEntry>, AppError> {
    let rows = sqlx::query(
        r#"SELECT l.user_id, u.username
           FROM post_likes l JOIN users u ON u.id = l.user_id
           WHERE l.post_id = ?1
           ORDER BY l.created_at"#,
    )
    .bind(post_id)
    .fetch_all(db)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| LikeEntry {
            user_id: row.get("user_id"),
            user_name: row.get("username"),
        })
        .collect())
}

/// Validate and append a comment. Comments are an append-only log; there
/// is no edit or delete path.
pub async fn add_comment(
    db: &DbPool,
    post_id: &str,
    author_id: i64,
    content: &str,
) -> Result<Comment, AppError> {
    let content = community::validate_comment(content)?;
    let comment = Comment {
        id: Uuid::new_v4().to_string(),
        post_id: post_id.to_string(),
        author_id,
        content,
        created_at: Utc::now(),
    };
    sqlx::query(
        r#"INSERT INTO post_comments (id, post_id, author_id, content, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)"#,
    )
    .bind(&comment.id)
    .bind(&comment.post_id)
    .bind(comment.author_id)
    .bind(&comment.content)
    .bind(comment.created_at)
    .execute(db)
    .await?;
    Ok(comment)
}

pub async fn engagement_counts(db: &DbPool, post_id: &str) -> Result<(i64, i64), AppError> {
    let likes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM post_likes WHERE post_id = ?1")
        .bind(post_id)
        .fetch_one(db)
        .await?;
    let comments: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM post_comments WHERE post_id = ?1")
            .bind(post_id)
            .fetch_one(db)
            .await?;
    Ok((likes, comments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn expense(expense_type: &str, amount: f64) -> Expense {
        let now = Utc::now();
        Expense {
            id: Uuid::new_v4().to_string(),
            trip_id: "trip".into(),
            expense_type: expense_type.into(),
            amount,
            date: None,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn summary_groups_by_type() {
        let expenses = vec![
            expense("Food", 10.0),
            expense("Food", 5.0),
            expense("Transportation", 20.0),
        ];
        let summary = summarize_expenses(&expenses, 100.0);
        assert_eq!(summary.total_expenses, 35.0);
        assert_eq!(summary.budget_remaining, 65.0);
        assert_eq!(summary.expenses_by_type.len(), 2);
        let food = summary
            .expenses_by_type
            .iter()
            .find(|g| g.expense_type == "Food")
            .unwrap();
        assert_eq!(food.total, 15.0);
        assert_eq!(food.count, 2);
        let transport = summary
            .expenses_by_type
            .iter()
            .find(|g| g.expense_type == "Transportation")
            .unwrap();
        assert_eq!(transport.total, 20.0);
        assert_eq!(transport.count, 1);
    }

    #[test]
    fn summary_allows_negative_remaining() {
        let expenses = vec![expense("Shopping", 150.0)];
        let summary = summarize_expenses(&expenses, 100.0);
        assert_eq!(summary.budget_remaining, -50.0);
    }

    #[test]
    fn summary_of_nothing_is_zero() {
        let summary = summarize_expenses(&[], 0.0);
        assert_eq!(summary.total_expenses, 0.0);
        assert_eq!(summary.budget_remaining, 0.0);
        assert!(summary.expenses_by_type.is_empty());
    }

    #[test]
    fn duration_rounds_to_one_decimal() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap();
        assert_eq!(duration_hours(Some(start), Some(end)), Some(2.5));
    }

    #[test]
    fn duration_requires_both_endpoints() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        assert_eq!(duration_hours(Some(start), None), None);
        assert_eq!(duration_hours(None, None), None);
    }

    #[test]
    fn day_count_rounds_up_partial_days() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 6, 4, 18, 0, 0).unwrap();
        assert_eq!(duration_days(Some(start), Some(end)), 4);
        assert_eq!(duration_days(Some(start), None), 0);
    }
}
