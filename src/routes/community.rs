use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_with::skip_serializing_none;
use sqlx::{FromRow, QueryBuilder, Row, Sqlite};
use uuid::Uuid;

use crate::{
    auth::CurrentUser,
    db::DbPool,
    error::AppError,
    models::community::{self, CommunityPost},
    services::aggregate::{self, LikeEntry},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_posts).post(create_post))
        .route("/my-posts", get(my_posts))
        .route(
            "/posts/:id",
            get(get_post).put(update_post).delete(delete_post),
        )
        .route("/posts/:id/like", post(toggle_like))
        .route("/posts/:id/comments", post(add_comment))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthorBody {
    id: i64,
    name: String,
    email: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommentBody {
    id: String,
    author: AuthorBody,
    content: String,
    created_at: DateTime<Utc>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PostBody {
    id: String,
    author: AuthorBody,
    title: String,
    content: String,
    category: String,
    destination: Option<String>,
    tags: Vec<String>,
    image: Option<String>,
    likes: Vec<LikeEntry>,
    comments: Vec<CommentBody>,
    views: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    like_count: usize,
    comment_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    current_page: i64,
    total_pages: i64,
    total_posts: i64,
    has_next_page: bool,
    has_prev_page: bool,
}

#[derive(Debug, Clone, Serialize)]
struct PostPage {
    posts: Vec<PostBody>,
    pagination: Pagination,
}

#[derive(FromRow)]
struct PostWithAuthor {
    #[sqlx(flatten)]
    post: CommunityPost,
    author_name: String,
    author_email: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PostListParams {
    page: Option<i64>,
    limit: Option<i64>,
    category: Option<String>,
    destination: Option<String>,
    search: Option<String>,
    tags: Option<String>,
    sort_by: Option<String>,
    sort_order: Option<String>,
}

struct PostFilters {
    category: Option<String>,
    destination: Option<String>,
    search: Option<String>,
    tags: Vec<String>,
}

impl PostFilters {
    fn from_params(params: &PostListParams) -> Self {
        let category = params
            .category
            .as_deref()
            .filter(|c| !c.is_empty() && *c != "all")
            .map(str::to_string);
        let tags = params
            .tags
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(|tag| tag.trim().to_lowercase())
                    .filter(|tag| !tag.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            category,
            destination: params.destination.clone().filter(|d| !d.is_empty()),
            search: params.search.clone().filter(|s| !s.is_empty()),
            tags,
        }
    }

    fn push_conditions(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(category) = &self.category {
            qb.push(" AND p.category = ").push_bind(category.clone());
        }
        if let Some(destination) = &self.destination {
            qb.push(" AND p.destination LIKE ")
                .push_bind(format!("%{destination}%"));
        }
        if let Some(search) = &self.search {
            let pattern = format!("%{search}%");
            qb.push(" AND (p.title LIKE ").push_bind(pattern.clone());
            qb.push(" OR p.content LIKE ").push_bind(pattern.clone());
            qb.push(" OR p.destination LIKE ").push_bind(pattern.clone());
            qb.push(" OR p.tags LIKE ").push_bind(pattern);
            qb.push(")");
        }
        if !self.tags.is_empty() {
            qb.push(" AND (");
            for (i, tag) in self.tags.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                // Tags live in a JSON array column; match the quoted form.
                qb.push("p.tags LIKE ").push_bind(format!("%\"{tag}\"%"));
            }
            qb.push(")");
        }
    }
}

async fn list_posts(
    State(state): State<AppState>,
    Query(params): Query<PostListParams>,
) -> Result<Json<PostPage>, AppError> {
    let filters = PostFilters::from_params(&params);
    let (page, limit) = page_and_limit(&params);

    let sort_column = match params.sort_by.as_deref() {
        Some("views") => "p.views",
        _ => "p.created_at",
    };
    let sort_dir = match params.sort_order.as_deref() {
        Some("asc") => "ASC",
        _ => "DESC",
    };

    let mut count_qb = QueryBuilder::new(
        "SELECT COUNT(*) FROM community_posts p WHERE p.is_published = 1",
    );
    filters.push_conditions(&mut count_qb);
    let total_posts: i64 = count_qb
        .build_query_scalar()
        .fetch_one(&state.db)
        .await?;

    let mut qb = QueryBuilder::new(
        r#"SELECT p.*, u.username AS author_name, u.email AS author_email
           FROM community_posts p JOIN users u ON u.id = p.author_id
           WHERE p.is_published = 1"#,
    );
    filters.push_conditions(&mut qb);
    qb.push(format!(" ORDER BY {sort_column} {sort_dir} LIMIT "));
    qb.push_bind(limit);
    qb.push(" OFFSET ");
    qb.push_bind((page - 1) * limit);

    let rows: Vec<PostWithAuthor> = qb.build_query_as().fetch_all(&state.db).await?;
    let posts = post_bodies(&state.db, rows).await?;

    Ok(Json(PostPage {
        posts,
        pagination: pagination(page, limit, total_posts),
    }))
}

async fn get_post(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
) -> Result<Json<PostBody>, AppError> {
    // Every fetch counts as a view, like the original.
    sqlx::query("UPDATE community_posts SET views = views + 1 WHERE id = ?1")
        .bind(&post_id)
        .execute(&state.db)
        .await?;
    let row = fetch_post(&state.db, &post_id).await?;
    let body = post_bodies(&state.db, vec![row]).await?.remove(0);
    Ok(Json(body))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePostPayload {
    title: String,
    content: String,
    category: Option<String>,
    destination: Option<String>,
    tags: Option<Vec<String>>,
    image: Option<String>,
}

async fn create_post(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(payload): Json<CreatePostPayload>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;

    let title = community::validate_title(&payload.title)?;
    let content = community::validate_content(&payload.content)?;
    let category = validate_post_category(payload.category)?;
    let destination = validate_destination(payload.destination)?;
    let tags = community::normalize_tags(&payload.tags.unwrap_or_default());

    let now = Utc::now();
    let post = CommunityPost {
        id: Uuid::new_v4().to_string(),
        author_id: user.id,
        title,
        content,
        category,
        destination,
        tags: serde_json::to_string(&tags).map_err(anyhow::Error::from)?,
        image: payload.image.map(|image| image.trim().to_string()),
        is_published: true,
        views: 0,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"INSERT INTO community_posts
               (id, author_id, title, content, category, destination, tags, image,
                is_published, views, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
    )
    .bind(&post.id)
    .bind(post.author_id)
    .bind(&post.title)
    .bind(&post.content)
    .bind(&post.category)
    .bind(&post.destination)
    .bind(&post.tags)
    .bind(&post.image)
    .bind(post.is_published)
    .bind(post.views)
    .bind(post.created_at)
    .bind(post.updated_at)
    .execute(&state.db)
    .await?;

    let row = PostWithAuthor {
        post,
        author_name: user.username.clone(),
        author_email: user.email.clone(),
    };
    let body = post_bodies(&state.db, vec![row]).await?.remove(0);
    Ok((StatusCode::CREATED, Json(body)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePostPayload {
    title: Option<String>,
    content: Option<String>,
    category: Option<String>,
    destination: Option<String>,
    tags: Option<Vec<String>>,
    image: Option<String>,
}

async fn update_post(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(post_id): Path<String>,
    Json(payload): Json<UpdatePostPayload>,
) -> Result<Json<PostBody>, AppError> {
    let user = current.require_user()?;
    let mut row = fetch_post(&state.db, &post_id).await?;

    // Posts are public; a non-author gets a plain forbidden, not a 404.
    if row.post.author_id != user.id {
        return Err(AppError::Forbidden);
    }

    if let Some(title) = payload.title {
        row.post.title = community::validate_title(&title)?;
    }
    if let Some(content) = payload.content {
        row.post.content = community::validate_content(&content)?;
    }
    if payload.category.is_some() {
        row.post.category = validate_post_category(payload.category)?;
    }
    if payload.destination.is_some() {
        row.post.destination = validate_destination(payload.destination)?;
    }
    if let Some(tags) = payload.tags {
        let tags = community::normalize_tags(&tags);
        row.post.tags = serde_json::to_string(&tags).map_err(anyhow::Error::from)?;
    }
    if let Some(image) = payload.image {
        row.post.image = Some(image.trim().to_string());
    }
    row.post.updated_at = Utc::now();

    sqlx::query(
        r#"UPDATE community_posts
           SET title = ?1, content = ?2, category = ?3, destination = ?4, tags = ?5,
               image = ?6, updated_at = ?7
           WHERE id = ?8"#,
    )
    .bind(&row.post.title)
    .bind(&row.post.content)
    .bind(&row.post.category)
    .bind(&row.post.destination)
    .bind(&row.post.tags)
    .bind(&row.post.image)
    .bind(row.post.updated_at)
    .bind(&row.post.id)
    .execute(&state.db)
    .await?;

    let body = post_bodies(&state.db, vec![row]).await?.remove(0);
    Ok(Json(body))
}

async fn delete_post(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(post_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    let row = fetch_post(&state.db, &post_id).await?;
    if row.post.author_id != user.id {
        return Err(AppError::Forbidden);
    }

    let mut tx = state.db.begin().await?;
    sqlx::query("DELETE FROM post_comments WHERE post_id = ?1")
        .bind(&post_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM post_likes WHERE post_id = ?1")
        .bind(&post_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM community_posts WHERE id = ?1")
        .bind(&post_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(Json(json!({ "message": "post deleted" })))
}

async fn my_posts(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(params): Query<PostListParams>,
) -> Result<Json<PostPage>, AppError> {
    let user = current.require_user()?;
    let (page, limit) = page_and_limit(&params);

    let total_posts: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM community_posts WHERE author_id = ?1")
            .bind(user.id)
            .fetch_one(&state.db)
            .await?;

    let rows = sqlx::query_as::<_, PostWithAuthor>(
        r#"SELECT p.*, u.username AS author_name, u.email AS author_email
           FROM community_posts p JOIN users u ON u.id = p.author_id
           WHERE p.author_id = ?1
           ORDER BY p.created_at DESC
           LIMIT ?2 OFFSET ?3"#,
    )
    .bind(user.id)
    .bind(limit)
    .bind((page - 1) * limit)
    .fetch_all(&state.db)
    .await?;
    let posts = post_bodies(&state.db, rows).await?;

    Ok(Json(PostPage {
        posts,
        pagination: pagination(page, limit, total_posts),
    }))
}

async fn toggle_like(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(post_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    ensure_post_exists(&state.db, &post_id).await?;
    let likes = aggregate::toggle_like(&state.db, &post_id, user.id).await?;
    let like_count = likes.len();
    Ok(Json(json!({ "likes": likes, "likeCount": like_count })))
}

#[derive(Deserialize)]
struct CommentPayload {
    content: String,
}

async fn add_comment(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(post_id): Path<String>,
    Json(payload): Json<CommentPayload>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    ensure_post_exists(&state.db, &post_id).await?;

    let comment = aggregate::add_comment(&state.db, &post_id, user.id, &payload.content).await?;
    let (_, comment_count) = aggregate::engagement_counts(&state.db, &post_id).await?;

    let body = CommentBody {
        id: comment.id,
        author: AuthorBody {
            id: user.id,
            name: user.username.clone(),
            email: None,
        },
        content: comment.content,
        created_at: comment.created_at,
    };
    Ok((
        StatusCode::CREATED,
        Json(json!({ "comment": body, "commentCount": comment_count })),
    ))
}

async fn fetch_post(db: &DbPool, post_id: &str) -> Result<PostWithAuthor, AppError> {
    sqlx::query_as::<_, PostWithAuthor>(
        r#"SELECT p.*, u.username AS author_name, u.email AS author_email
           FROM community_posts p JOIN users u ON u.id = p.author_id
           WHERE p.id = ?1"#,
    )
    .bind(post_id)
    .fetch_optional(db)
    .await?
    .ok_or(AppError::NotFound)
}

async fn ensure_post_exists(db: &DbPool, post_id: &str) -> Result<(), AppError> {
    let exists: Option<String> =
        sqlx::query_scalar("SELECT id FROM community_posts WHERE id = ?1")
            .bind(post_id)
            .fetch_optional(db)
            .await?;
    exists.map(|_| ()).ok_or(AppError::NotFound)
}

async fn post_bodies(
    db: &DbPool,
    rows: Vec<PostWithAuthor>,
) -> Result<Vec<PostBody>, AppError> {
    let mut bodies = Vec::with_capacity(rows.len());
    for row in rows {
        let likes = aggregate::like_entries(db, &row.post.id).await?;
        let comments = post_comments(db, &row.post.id).await?;
        let tags = row.post.tag_list();
        bodies.push(PostBody {
            id: row.post.id,
            author: AuthorBody {
                id: row.post.author_id,
                name: row.author_name,
                email: Some(row.author_email),
            },
            title: row.post.title,
            content: row.post.content,
            category: row.post.category,
            destination: row.post.destination,
            tags,
            image: row.post.image,
            like_count: likes.len(),
            comment_count: comments.len(),
            likes,
            comments,
            views: row.post.views,
            created_at: row.post.created_at,
            updated_at: row.post.updated_at,
        });
    }
    Ok(bodies)
}

async fn post_comments(db: &DbPool, post_id: &str) -> Result<Vec<CommentBody>, AppError> {
    let rows = sqlx::query(
        r#"SELECT c.id, c.content, c.created_at, u.id AS author_id, u.username
           FROM post_comments c JOIN users u ON u.id = c.author_id
           WHERE c.post_id = ?1
           ORDER BY c.created_at"#,
    )
    .bind(post_id)
    .fetch_all(db)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| CommentBody {
            id: row.get("id"),
            author: AuthorBody {
                id: row.get("author_id"),
                name: row.get("username"),
                email: None,
            },
            content: row.get("content"),
            created_at: row.get("created_at"),
        })
        .collect())
}

fn page_and_limit(params: &PostListParams) -> (i64, i64) {
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(10).clamp(1, 100);
    (page, limit)
}

fn pagination(page: i64, limit: i64, total_posts: i64) -> Pagination {
    let total_pages = (total_posts + limit - 1) / limit;
    Pagination {
        current_page: page,
        total_pages,
        total_posts,
        has_next_page: page < total_pages,
        has_prev_page: page > 1,
    }
}

fn validate_post_category(category: Option<String>) -> Result<String, AppError> {
    match category {
        Some(category) if community::is_valid_post_category(&category) => Ok(category),
        Some(category) => Err(AppError::bad_request(format!(
            "unknown post category: {category}"
        ))),
        None => Ok("general".to_string()),
    }
}

fn validate_destination(destination: Option<String>) -> Result<Option<String>, AppError> {
    let Some(destination) = destination else {
        return Ok(None);
    };
    let destination = destination.trim().to_string();
    if destination.chars().count() > community::DESTINATION_MAX_CHARS {
        return Err(AppError::bad_request(format!(
            "destination must be {} characters or less",
            community::DESTINATION_MAX_CHARS
        )));
    }
    Ok(Some(destination).filter(|d| !d.is_empty()))
}
