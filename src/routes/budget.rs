use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::{
    auth::CurrentUser,
    error::AppError,
    models::expense::{self, Expense},
    services::{aggregate, ownership},
    state::AppState,
};

/// Trip-scoped expense endpoints, nested under `/api/budget`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:trip_id", get(list_expenses).post(create_expense))
        .route("/:trip_id/summary", get(budget_summary))
}

/// Individual expense endpoints, nested under `/api/expenses`.
pub fn expense_router() -> Router<AppState> {
    Router::new().route("/:id", put(update_expense).delete(delete_expense))
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseResponse {
    pub id: String,
    pub trip_id: String,
    #[serde(rename = "type")]
    pub expense_type: String,
    pub amount: f64,
    pub date: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Expense> for ExpenseResponse {
    fn from(expense: Expense) -> Self {
        Self {
            id: expense.id,
            trip_id: expense.trip_id,
            expense_type: expense.expense_type,
            amount: expense.amount,
            date: expense.date,
            description: expense.description,
            created_at: expense.created_at,
            updated_at: expense.updated_at,
        }
    }
}

async fn list_expenses(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<String>,
) -> Result<Json<Vec<ExpenseResponse>>, AppError> {
    let user = current.require_user()?;
    let trip = ownership::trip_for_owner(&state.db, user.id, &trip_id).await?;
    let expenses = sqlx::query_as::<_, Expense>(
        "SELECT * FROM expenses WHERE trip_id = ?1 ORDER BY created_at DESC",
    )
    .bind(&trip.id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(expenses.into_iter().map(Into::into).collect()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateExpensePayload {
    #[serde(rename = "type")]
    expense_type: String,
    amount: f64,
    date: Option<DateTime<Utc>>,
    description: Option<String>,
}

async fn create_expense(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<String>,
    Json(payload): Json<CreateExpensePayload>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    let trip = ownership::trip_for_owner(&state.db, user.id, &trip_id).await?;

    validate_expense_type(&payload.expense_type)?;
    validate_amount(payload.amount)?;

    let now = Utc::now();
    let expense = Expense {
        id: Uuid::new_v4().to_string(),
        trip_id: trip.id,
        expense_type: payload.expense_type,
        amount: payload.amount,
        date: payload.date,
        description: payload.description,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"INSERT INTO expenses
               (id, trip_id, expense_type, amount, date, description, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
    )
    .bind(&expense.id)
    .bind(&expense.trip_id)
    .bind(&expense.expense_type)
    .bind(expense.amount)
    .bind(expense.date)
    .bind(&expense.description)
    .bind(expense.created_at)
    .bind(expense.updated_at)
    .execute(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(ExpenseResponse::from(expense))))
}

async fn budget_summary(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<String>,
) -> Result<Json<aggregate::BudgetSummary>, AppError> {
    let user = current.require_user()?;
    let trip = ownership::trip_for_owner(&state.db, user.id, &trip_id).await?;
    let summary = aggregate::budget_summary(&state.db, &trip).await?;
    Ok(Json(summary))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateExpensePayload {
    #[serde(rename = "type")]
    expense_type: Option<String>,
    amount: Option<f64>,
    date: Option<DateTime<Utc>>,
    description: Option<String>,
}

async fn update_expense(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(expense_id): Path<String>,
    Json(payload): Json<UpdateExpensePayload>,
) -> Result<Json<ExpenseResponse>, AppError> {
    let user = current.require_user()?;
    let mut expense = ownership::expense_for_owner(&state.db, user.id, &expense_id).await?;

    if let Some(expense_type) = payload.expense_type {
        validate_expense_type(&expense_type)?;
        expense.expense_type = expense_type;
    }
    if let Some(amount) = payload.amount {
        validate_amount(amount)?;
        expense.amount = amount;
    }
    if let Some(date) = payload.date {
        expense.date = Some(date);
    }
    if let Some(description) = payload.description {
        expense.description = Some(description);
    }
    expense.updated_at = Utc::now();

    sqlx::query(
        r#"UPDATE expenses
           SET expense_type = ?1, amount = ?2, date = ?3, description = ?4, updated_at = ?5
           WHERE id = ?6"#,
    )
    .bind(&expense.expense_type)
    .bind(expense.amount)
    .bind(expense.date)
    .bind(&expense.description)
    .bind(expense.updated_at)
    .bind(&expense.id)
    .execute(&state.db)
    .await?;

    Ok(Json(expense.into()))
}

async fn delete_expense(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(expense_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    let expense = ownership::expense_for_owner(&state.db, user.id, &expense_id).await?;
    sqlx::query("DELETE FROM expenses WHERE id = ?1")
        .bind(&expense.id)
        .execute(&state.db)
        .await?;
    Ok(Json(json!({ "message": "expense deleted" })))
}

fn validate_expense_type(expense_type: &str) -> Result<(), AppError> {
    if !expense::is_valid_expense_type(expense_type) {
        return Err(AppError::bad_request(format!(
            "unknown expense type: {expense_type}"
        )));
    }
    Ok(())
}

fn validate_amount(amount: f64) -> Result<(), AppError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(AppError::bad_request("amount must be a non-negative number"));
    }
    Ok(())
}
