use std::{collections::HashMap, fmt, net::SocketAddr};

use anyhow::Context;
use chrono::Utc;
use cucumber::{given, then, when, World as _};
use globetrotter::{
    auth::{self, AuthenticatedUser},
    config::AppConfig,
    db::{init_pool, DbPool},
    error::AppError,
    models::trip::Trip,
    services::{aggregate, cities, ownership},
    state::AppState,
};
use tempfile::TempDir;
use uuid::Uuid;

#[derive(Debug, cucumber::World, Default)]
struct AppWorld {
    state: Option<TestState>,
    users: HashMap<String, AuthenticatedUser>,
    trips: HashMap<String, String>,
    stop_id: Option<String>,
    activity_id: Option<String>,
    expense_id: Option<String>,
    post_id: Option<String>,
    summary: Option<aggregate::BudgetSummary>,
    comment_outcome: Option<Result<(), String>>,
    resolved_cities: Vec<String>,
}

impl AppWorld {
    fn app_state(&self) -> &AppState {
        self.state
            .as_ref()
            .expect("state must be initialised first")
            .app()
    }

    fn db(&self) -> &DbPool {
        &self.app_state().db
    }

    fn user(&self, name: &str) -> &AuthenticatedUser {
        self.users
            .get(name)
            .unwrap_or_else(|| panic!("user {name} must be registered first"))
    }

    fn trip_id(&self, name: &str) -> &str {
        self.trips
            .get(name)
            .unwrap_or_else(|| panic!("trip {name} must exist first"))
    }
}

struct TestState {
    app: AppState,
    _root: TempDir,
}

impl fmt::Debug for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestState").finish()
    }
}

impl TestState {
    async fn new() -> anyhow::Result<Self> {
        let root = TempDir::new().context("create temp dir for bdd world")?;
        let db_path = root.path().join("bdd.sqlite");
        let database_url = format!("sqlite://{}", db_path.to_string_lossy());

        let config = AppConfig {
            database_url: database_url.clone(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            cookie_secret: "bdd-cookie-secret".into(),
            public_base_url: "http://localhost:3000".parse()?,
            allowed_origins: vec!["http://localhost:5173".into()],
        };

        let db = init_pool(&config.database_url).await?;
        sqlx::migrate!("./migrations").run(&db).await?;

        let app = AppState::new(config, db);
        Ok(Self { app, _root: root })
    }

    fn app(&self) -> &AppState {
        &self.app
    }
}

#[given("a fresh application state")]
async fn given_fresh_state(world: &mut AppWorld) {
    world.state = Some(TestState::new().await.expect("state"));
    world.users.clear();
    world.trips.clear();
    world.stop_id = None;
    world.activity_id = None;
    world.expense_id = None;
    world.post_id = None;
    world.summary = None;
    world.comment_outcome = None;
    world.resolved_cities.clear();
}

#[given(
    regex = r#"^a registered user \"([^\"]+)\" with email \"([^\"]+)\" and password \"([^\"]+)\"$"#
)]
async fn given_registered_user(
    world: &mut AppWorld,
    username: String,
    email: String,
    password: String,
) {
    let user = auth::register_user(world.app_state(), &username, &email, &password)
        .await
        .expect("register user");
    world.users.insert(username, user);
}

#[given(regex = r#"^\"([^\"]+)\" has a trip named \"([^\"]+)\"$"#)]
async fn given_trip(world: &mut AppWorld, owner: String, trip_name: String) {
    create_trip(world, &owner, &trip_name, 0.0).await;
}

#[given(
    regex = r#"^\"([^\"]+)\" has a trip named \"([^\"]+)\" with a total budget of (-?\d+(?:\.\d+)?)$"#
)]
async fn given_trip_with_budget(
    world: &mut AppWorld,
    owner: String,
    trip_name: String,
    budget: f64,
) {
    create_trip(world, &owner, &trip_name, budget).await;
}

#[given(regex = r#"^the trip \"([^\"]+)\" has a stop in \"([^\"]+)\", \"([^\"]+)\"$"#)]
async fn given_stop(world: &mut AppWorld, trip_name: String, city: String, country: String) {
    let trip_id = world.trip_id(&trip_name).to_string();
    let (city, _) = cities::find_or_create_city(world.db(), &city, &country, None)
        .await
        .expect("find or create city");
    let stop_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        r#"INSERT INTO stops (id, trip_id, city_id, estimated_cost, created_at, updated_at)
           VALUES (?1, ?2, ?3, 0, ?4, ?4)"#,
    )
    .bind(&stop_id)
    .bind(&trip_id)
    .bind(&city.id)
    .bind(now)
    .execute(world.db())
    .await
    .expect("insert stop");
    world.stop_id = Some(stop_id);
}

#[given(regex = r#"^the stop has an activity named \"([^\"]+)\"$"#)]
async fn given_activity(world: &mut AppWorld, name: String) {
    let stop_id = world.stop_id.clone().expect("a stop must exist first");
    let activity_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        r#"INSERT INTO activities (id, stop_id, name, category, cost, created_at, updated_at)
           VALUES (?1, ?2, ?3, 'Other', 0, ?4, ?4)"#,
    )
    .bind(&activity_id)
    .bind(&stop_id)
    .bind(&name)
    .bind(now)
    .execute(world.db())
    .await
    .expect("insert activity");
    world.activity_id = Some(activity_id);
}

#[given(
    regex = r#"^the trip \"([^\"]+)\" has a \"([^\"]+)\" expense of (-?\d+(?:\.\d+)?)$"#
)]
async fn given_expense(
    world: &mut AppWorld,
    trip_name: String,
    expense_type: String,
    amount: f64,
) {
    let trip_id = world.trip_id(&trip_name).to_string();
    let expense_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        r#"INSERT INTO expenses (id, trip_id, expense_type, amount, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?5)"#,
    )
    .bind(&expense_id)
    .bind(&trip_id)
    .bind(&expense_type)
    .bind(amount)
    .bind(now)
    .execute(world.db())
    .await
    .expect("insert expense");
    world.expense_id = Some(expense_id);
}

#[given(regex = r#"^\"([^\"]+)\" has a community post titled \"([^\"]+)\"$"#)]
async fn given_post(world: &mut AppWorld, author: String, title: String) {
    let author_id = world.user(&author).id;
    let post_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        r#"INSERT INTO community_posts
               (id, author_id, title, content, category, tags, is_published, views,
                created_at, updated_at)
           VALUES (?1, ?2, ?3, 'Worth sharing.', 'general', '[]', 1, 0, ?4, ?4)"#,
    )
    .bind(&post_id)
    .bind(author_id)
    .bind(&title)
    .bind(now)
    .execute(world.db())
    .await
    .expect("insert post");
    world.post_id = Some(post_id);
}

#[then(regex = r#"^\"([^\"]+)\" can fetch the trip \"([^\"]+)\"$"#)]
async fn then_can_fetch_trip(world: &mut AppWorld, username: String, trip_name: String) {
    let user_id = world.user(&username).id;
    let trip_id = world.trip_id(&trip_name).to_string();
    let trip = ownership::trip_for_owner(world.db(), user_id, &trip_id)
        .await
        .expect("owner fetch");
    assert_eq!(trip.name, trip_name);
}

#[then(regex = r#"^\"([^\"]+)\" cannot fetch the trip \"([^\"]+)\"$"#)]
async fn then_cannot_fetch_trip(world: &mut AppWorld, username: String, trip_name: String) {
    let user_id = world.user(&username).id;
    let trip_id = world.trip_id(&trip_name).to_string();
    let err = ownership::trip_for_owner(world.db(), user_id, &trip_id)
        .await
        .expect_err("foreign trip must be invisible");
    assert!(matches!(err, AppError::NotFound));
}

#[then(regex = r#"^\"([^\"]+)\" cannot update the trip \"([^\"]+)\"$"#)]
async fn then_cannot_update_trip(world: &mut AppWorld, username: String, trip_name: String) {
    let user_id = world.user(&username).id;
    let trip_id = world.trip_id(&trip_name).to_string();
    let err = ownership::trip_for_owner(world.db(), user_id, &trip_id)
        .await
        .expect_err("guard must reject before any update");
    assert!(matches!(err, AppError::NotFound));

    let stored = sqlx::query_as::<_, Trip>("SELECT * FROM trips WHERE id = ?1")
        .bind(&trip_id)
        .fetch_one(world.db())
        .await
        .expect("trip still stored");
    assert_eq!(stored.name, trip_name, "trip must be untouched");
}

#[then(regex = r#"^\"([^\"]+)\" cannot delete the trip \"([^\"]+)\"$"#)]
async fn then_cannot_delete_trip(world: &mut AppWorld, username: String, trip_name: String) {
    let user_id = world.user(&username).id;
    let trip_id = world.trip_id(&trip_name).to_string();
    let err = ownership::trip_for_owner(world.db(), user_id, &trip_id)
        .await
        .expect_err("guard must reject before any delete");
    assert!(matches!(err, AppError::NotFound));

    let still_there: Option<String> = sqlx::query_scalar("SELECT id FROM trips WHERE id = ?1")
        .bind(&trip_id)
        .fetch_optional(world.db())
        .await
        .expect("lookup");
    assert!(still_there.is_some(), "trip must survive the attempt");
}

#[then(regex = r#"^\"([^\"]+)\" can fetch the stop$"#)]
async fn then_can_fetch_stop(world: &mut AppWorld, username: String) {
    let user_id = world.user(&username).id;
    let stop_id = world.stop_id.clone().expect("stop");
    ownership::stop_for_owner(world.db(), user_id, &stop_id)
        .await
        .expect("owner fetch of stop");
}

#[then(regex = r#"^\"([^\"]+)\" cannot fetch the stop$"#)]
async fn then_cannot_fetch_stop(world: &mut AppWorld, username: String) {
    let user_id = world.user(&username).id;
    let stop_id = world.stop_id.clone().expect("stop");
    let err = ownership::stop_for_owner(world.db(), user_id, &stop_id)
        .await
        .expect_err("foreign stop must be invisible");
    assert!(matches!(err, AppError::NotFound));
}

#[then(regex = r#"^\"([^\"]+)\" cannot fetch the activity$"#)]
async fn then_cannot_fetch_activity(world: &mut AppWorld, username: String) {
    let user_id = world.user(&username).id;
    let activity_id = world.activity_id.clone().expect("activity");
    let err = ownership::activity_for_owner(world.db(), user_id, &activity_id)
        .await
        .expect_err("foreign activity must be invisible");
    assert!(matches!(err, AppError::NotFound));
}

#[then(regex = r#"^\"([^\"]+)\" cannot fetch the expense$"#)]
async fn then_cannot_fetch_expense(world: &mut AppWorld, username: String) {
    let user_id = world.user(&username).id;
    let expense_id = world.expense_id.clone().expect("expense");
    let err = ownership::expense_for_owner(world.db(), user_id, &expense_id)
        .await
        .expect_err("foreign expense must be invisible");
    assert!(matches!(err, AppError::NotFound));
}

#[then(regex = r#"^listing \"([^\"]+)\"'s trips yields (\d+) trips?$"#)]
async fn then_owned_trip_count(world: &mut AppWorld, username: String, expected: usize) {
    let user_id = world.user(&username).id;
    let ids = ownership::owned_trip_ids(world.db(), user_id)
        .await
        .expect("owned trip ids");
    assert_eq!(ids.len(), expected);
}

#[then(regex = r#"^listing \"([^\"]+)\"'s stops yields (\d+) results?$"#)]
async fn then_owned_stop_count(world: &mut AppWorld, username: String, expected: usize) {
    let user_id = world.user(&username).id;
    let ids = ownership::owned_stop_ids(world.db(), user_id)
        .await
        .expect("owned stop ids");
    assert_eq!(ids.len(), expected);
}

#[when(regex = r#"^the budget summary for \"([^\"]+)\" is computed$"#)]
async fn when_budget_summary(world: &mut AppWorld, trip_name: String) {
    let trip_id = world.trip_id(&trip_name).to_string();
    let trip = sqlx::query_as::<_, Trip>("SELECT * FROM trips WHERE id = ?1")
        .bind(&trip_id)
        .fetch_one(world.db())
        .await
        .expect("trip");
    let summary = aggregate::budget_summary(world.db(), &trip)
        .await
        .expect("summary");
    world.summary = Some(summary);
}

#[then(regex = r#"^the summary total is (-?\d+(?:\.\d+)?) and (-?\d+(?:\.\d+)?) remains$"#)]
async fn then_summary_totals(world: &mut AppWorld, total: f64, remaining: f64) {
    let summary = world.summary.as_ref().expect("summary computed first");
    assert_eq!(summary.total_expenses, total);
    assert_eq!(summary.budget_remaining, remaining);
}

#[then(
    regex = r#"^the summary has a \"([^\"]+)\" group totalling (-?\d+(?:\.\d+)?) from (\d+) expenses?$"#
)]
async fn then_summary_group(
    world: &mut AppWorld,
    expense_type: String,
    total: f64,
    count: u32,
) {
    let summary = world.summary.as_ref().expect("summary computed first");
    let group = summary
        .expenses_by_type
        .iter()
        .find(|group| group.expense_type == expense_type)
        .unwrap_or_else(|| panic!("no {expense_type} group in summary"));
    assert_eq!(group.total, total);
    assert_eq!(group.count, count);
}

#[then("the summary has no expense groups")]
async fn then_summary_empty(world: &mut AppWorld) {
    let summary = world.summary.as_ref().expect("summary computed first");
    assert!(summary.expenses_by_type.is_empty());
}

#[when(regex = r#"^\"([^\"]+)\" toggles a like on the post$"#)]
async fn when_toggle_like(world: &mut AppWorld, username: String) {
    let user_id = world.user(&username).id;
    let post_id = world.post_id.clone().expect("post");
    aggregate::toggle_like(world.db(), &post_id, user_id)
        .await
        .expect("toggle like");
}

#[then(regex = r#"^the post has (\d+) likes?$"#)]
async fn then_like_count(world: &mut AppWorld, expected: i64) {
    let post_id = world.post_id.clone().expect("post");
    let (likes, _) = aggregate::engagement_counts(world.db(), &post_id)
        .await
        .expect("engagement counts");
    assert_eq!(likes, expected);
}

#[when(regex = r#"^\"([^\"]+)\" comments with (\d+) characters$"#)]
async fn when_comment_n_chars(world: &mut AppWorld, username: String, length: usize) {
    let content = "x".repeat(length);
    submit_comment(world, &username, &content).await;
}

#[when(regex = r#"^\"([^\"]+)\" comments with \"([^\"]*)\"$"#)]
async fn when_comment_text(world: &mut AppWorld, username: String, content: String) {
    submit_comment(world, &username, &content).await;
}

#[then("the comment is accepted")]
async fn then_comment_accepted(world: &mut AppWorld) {
    let outcome = world.comment_outcome.as_ref().expect("comment submitted");
    assert!(outcome.is_ok(), "comment should be accepted: {outcome:?}");
}

#[then("the comment is rejected as invalid input")]
async fn then_comment_rejected(world: &mut AppWorld) {
    let outcome = world.comment_outcome.as_ref().expect("comment submitted");
    assert!(outcome.is_err(), "comment should be rejected");
}

#[then(regex = r#"^the post has (\d+) comments?$"#)]
async fn then_comment_count(world: &mut AppWorld, expected: i64) {
    let post_id = world.post_id.clone().expect("post");
    let (_, comments) = aggregate::engagement_counts(world.db(), &post_id)
        .await
        .expect("engagement counts");
    assert_eq!(comments, expected);
}

#[when(regex = r#"^the city \"([^\"]+)\", \"([^\"]+)\" is requested$"#)]
async fn when_city_requested(world: &mut AppWorld, name: String, country: String) {
    let (city, _) = cities::find_or_create_city(world.db(), &name, &country, None)
        .await
        .expect("find or create city");
    world.resolved_cities.push(city.id);
}

#[then("every request resolved to the same city")]
async fn then_same_city(world: &mut AppWorld) {
    let first = world.resolved_cities.first().expect("at least one request");
    assert!(
        world.resolved_cities.iter().all(|id| id == first),
        "city ids diverged: {:?}",
        world.resolved_cities
    );
}

#[then(regex = r#"^there is exactly (\d+) stored city$"#)]
async fn then_city_count(world: &mut AppWorld, expected: i64) {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cities")
        .fetch_one(world.db())
        .await
        .expect("count cities");
    assert_eq!(count, expected);
}

async fn create_trip(world: &mut AppWorld, owner: &str, trip_name: &str, budget: f64) {
    let user_id = world.user(owner).id;
    let trip_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        r#"INSERT INTO trips
               (id, user_id, name, status, is_public, total_budget, created_at, updated_at)
           VALUES (?1, ?2, ?3, 'planning', 0, ?4, ?5, ?5)"#,
    )
    .bind(&trip_id)
    .bind(user_id)
    .bind(trip_name)
    .bind(budget)
    .bind(now)
    .execute(world.db())
    .await
    .expect("insert trip");
    world.trips.insert(trip_name.to_string(), trip_id);
}

async fn submit_comment(world: &mut AppWorld, username: &str, content: &str) {
    let user_id = world.user(username).id;
    let post_id = world.post_id.clone().expect("post");
    let outcome = aggregate::add_comment(world.db(), &post_id, user_id, content).await;
    world.comment_outcome = Some(match outcome {
        Ok(_) => Ok(()),
        Err(AppError::BadRequest(msg)) => Err(msg),
        Err(other) => panic!("expected invalid-input rejection, got {other:?}"),
    });
}

#[tokio::main]
async fn main() {
    AppWorld::cucumber()
        .fail_on_skipped()
        .with_default_cli()
        .run("tests/features")
        .await;
}
