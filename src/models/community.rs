use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::AppError;

pub const POST_CATEGORIES: &[&str] = &[
    "general",
    "tips",
    "photos",
    "destinations",
    "budget",
    "solo",
    "family",
    "other",
];

pub const TITLE_MAX_CHARS: usize = 200;
pub const CONTENT_MAX_CHARS: usize = 5000;
pub const DESTINATION_MAX_CHARS: usize = 100;
pub const COMMENT_MAX_CHARS: usize = 1000;

pub fn is_valid_post_category(raw: &str) -> bool {
    POST_CATEGORIES.contains(&raw)
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CommunityPost {
    pub id: String,
    pub author_id: i64,
    pub title: String,
    pub content: String,
    pub category: String,
    pub destination: Option<String>,
    /// JSON array of lowercase tags, decoded at the API edge.
    pub tags: String,
    pub image: Option<String>,
    pub is_published: bool,
    pub views: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommunityPost {
    pub fn tag_list(&self) -> Vec<String> {
        serde_json::from_str(&self.tags).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

pub fn validate_title(raw: &str) -> Result<String, AppError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("title and content are required"));
    }
    if title.chars().count() > TITLE_MAX_CHARS {
        return Err(AppError::bad_request(format!(
            "title must be {TITLE_MAX_CHARS} characters or less"
        )));
    }
    Ok(title.to_string())
}

pub fn validate_content(raw: &str) -> Result<String, AppError> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(AppError::bad_request("title and content are required"));
    }
    if content.chars().count() > CONTENT_MAX_CHARS {
        return Err(AppError::bad_request(format!(
            "content must be {CONTENT_MAX_CHARS} characters or less"
        )));
    }
    Ok(content.to_string())
}

pub fn validate_comment(raw: &str) -> Result<String, AppError> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(AppError::bad_request("comment content is required"));
    }
    if content.chars().count() > COMMENT_MAX_CHARS {
        return Err(AppError::bad_request(format!(
            "comment must be {COMMENT_MAX_CHARS} characters or less"
        )));
    }
    Ok(content.to_string())
}

/// Tags are stored lowercase and trimmed; empties are dropped. Duplicates
/// are kept as submitted, matching the source behavior.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect()
}
