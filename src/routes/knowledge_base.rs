use std::fmt;
use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{limits, non_empty, optional_within, required, required_within, within};
use crate::auth::{rbac, AuthenticatedUser};
use crate::error::{AppError, AppResult};
use crate::models::{KnowledgeArticle, NewKnowledgeArticle};
use crate::schema::knowledge_articles;
use crate::sla::InvalidValue;
use crate::state::AppState;
use crate::utils::response::{success, to_iso, Envelope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArticleStatus {
    Draft,
    Published,
}

impl ArticleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ArticleStatus::Draft => "draft",
            ArticleStatus::Published => "published",
        }
    }
}

impl fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArticleStatus {
    type Err = InvalidValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(ArticleStatus::Draft),
            "published" => Ok(ArticleStatus::Published),
            _ => Err(InvalidValue::new("status", value)),
        }
    }
}

#[derive(Deserialize)]
pub struct ArticleListQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateArticleRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: Option<String>,
    #[serde(alias = "opd_id")]
    pub org_unit_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct UpdateArticleRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub status: Option<String>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = knowledge_articles)]
struct ArticleChangeset {
    title: Option<String>,
    content: Option<String>,
    category: Option<String>,
    tags: Option<Vec<String>>,
    status: Option<String>,
    updated_at: Option<chrono::NaiveDateTime>,
}

#[derive(Serialize)]
pub struct ArticleResponse {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub category: String,
    pub tags: Vec<String>,
    pub status: String,
    pub author_id: Option<Uuid>,
    pub org_unit_id: Option<Uuid>,
    pub view_count: i32,
    pub helpful_count: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl From<KnowledgeArticle> for ArticleResponse {
    fn from(article: KnowledgeArticle) -> Self {
        Self {
            id: article.id,
            title: article.title,
            content: article.content,
            category: article.category,
            tags: article.tags,
            status: article.status,
            author_id: article.author_id,
            org_unit_id: article.org_unit_id,
            view_count: article.view_count,
            helpful_count: article.helpful_count,
            created_at: to_iso(article.created_at),
            updated_at: to_iso(article.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct ArticlePayload {
    pub article: ArticleResponse,
}

#[derive(Serialize)]
pub struct ArticleListPayload {
    pub articles: Vec<ArticleResponse>,
    pub count: usize,
}

#[derive(Serialize)]
pub struct HelpfulPayload {
    pub helpful_count: i32,
}

fn is_admin(caller: &Option<AuthenticatedUser>) -> bool {
    caller.as_ref().is_some_and(|user| user.role.is_admin())
}

fn require_editor(state: &AppState, caller: &AuthenticatedUser) -> AppResult<()> {
    caller.require_admin()?;
    caller.require_permission(&state.access, rbac::KNOWLEDGE_BASE_WRITE)
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = tags
        .into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect();
    cleaned.sort();
    cleaned.dedup();
    cleaned
}

pub async fn list_articles(
    State(state): State<AppState>,
    caller: Option<AuthenticatedUser>,
    Query(params): Query<ArticleListQuery>,
) -> AppResult<Json<Envelope<ArticleListPayload>>> {
    let mut query = knowledge_articles::table.into_boxed();

    if is_admin(&caller) {
        if let Some(status) = non_empty(params.status.as_deref()) {
            let status: ArticleStatus = status.parse()?;
            query = query.filter(knowledge_articles::status.eq(status.as_str()));
        }
    } else {
        query = query.filter(knowledge_articles::status.eq(ArticleStatus::Published.as_str()));
    }
    if let Some(category) = non_empty(params.category.as_deref()) {
        query = query.filter(knowledge_articles::category.eq(category.to_string()));
    }
    if let Some(search) = non_empty(params.search.as_deref()) {
        let pattern = format!("%{search}%");
        query = query.filter(
            knowledge_articles::title
                .ilike(pattern.clone())
                .or(knowledge_articles::content.ilike(pattern)),
        );
    }

    let mut conn = state.db()?;
    let rows: Vec<KnowledgeArticle> = query
        .order((
            knowledge_articles::view_count.desc(),
            knowledge_articles::created_at.desc(),
        ))
        .load(&mut conn)?;
    let articles: Vec<ArticleResponse> = rows.into_iter().map(ArticleResponse::from).collect();

    Ok(success(ArticleListPayload {
        count: articles.len(),
        articles,
    }))
}

/// Reading an article counts a view in the same statement that returns it.
pub async fn get_article(
    State(state): State<AppState>,
    caller: Option<AuthenticatedUser>,
    Path(article_id): Path<Uuid>,
) -> AppResult<Json<Envelope<ArticlePayload>>> {
    let mut conn = state.db()?;

    let mut target = knowledge_articles::table
        .filter(knowledge_articles::id.eq(article_id))
        .into_boxed();
    if !is_admin(&caller) {
        target = target.filter(knowledge_articles::status.eq(ArticleStatus::Published.as_str()));
    }
    let visible: Option<Uuid> = target
        .select(knowledge_articles::id)
        .first(&mut conn)
        .optional()?;
    let article_id = visible.ok_or_else(AppError::not_found)?;

    let article: KnowledgeArticle = diesel::update(knowledge_articles::table.find(article_id))
        .set(knowledge_articles::view_count.eq(knowledge_articles::view_count + 1))
        .get_result(&mut conn)?;

    Ok(success(ArticlePayload {
        article: article.into(),
    }))
}

pub async fn create_article(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Json(payload): Json<CreateArticleRequest>,
) -> AppResult<(StatusCode, Json<Envelope<ArticlePayload>>)> {
    require_editor(&state, &caller)?;

    let title = required_within(payload.title.as_deref(), "title", limits::TEXT)?;
    let content = required(payload.content.as_deref(), "content")?;
    let category = optional_within(payload.category.as_deref(), "category", limits::CATEGORY)?
        .unwrap_or(super::tickets::DEFAULT_CATEGORY);
    let status = match non_empty(payload.status.as_deref()) {
        Some(value) => value.parse()?,
        None => ArticleStatus::Draft,
    };

    let new_article = NewKnowledgeArticle {
        id: Uuid::new_v4(),
        title: title.to_string(),
        content: content.to_string(),
        category: category.to_string(),
        tags: clean_tags(payload.tags),
        status: status.as_str().to_string(),
        author_id: Some(caller.user_id),
        org_unit_id: payload.org_unit_id.or(caller.org_unit_id),
    };

    let mut conn = state.db()?;
    if let Some(org_unit_id) = new_article.org_unit_id {
        super::opd::ensure_org_unit_exists(&mut conn, org_unit_id)?;
    }
    let article: KnowledgeArticle = diesel::insert_into(knowledge_articles::table)
        .values(&new_article)
        .get_result(&mut conn)?;

    Ok((
        StatusCode::CREATED,
        success(ArticlePayload {
            article: article.into(),
        }),
    ))
}

pub async fn update_article(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(article_id): Path<Uuid>,
    Json(payload): Json<UpdateArticleRequest>,
) -> AppResult<Json<Envelope<ArticlePayload>>> {
    require_editor(&state, &caller)?;

    let mut changes = ArticleChangeset::default();
    if let Some(title) = payload.title.as_deref() {
        let title = non_empty(Some(title))
            .ok_or_else(|| AppError::bad_request("title must not be empty"))?;
        changes.title = Some(within(title, "title", limits::TEXT)?.to_string());
    }
    if let Some(content) = payload.content.as_deref() {
        let content = non_empty(Some(content))
            .ok_or_else(|| AppError::bad_request("content must not be empty"))?;
        changes.content = Some(content.to_string());
    }
    if let Some(category) = optional_within(payload.category.as_deref(), "category", limits::CATEGORY)? {
        changes.category = Some(category.to_string());
    }
    if let Some(tags) = payload.tags {
        changes.tags = Some(clean_tags(tags));
    }
    if let Some(status) = payload.status.as_deref() {
        let status: ArticleStatus = status.parse()?;
        changes.status = Some(status.as_str().to_string());
    }
    changes.updated_at = Some(Utc::now().naive_utc());

    let mut conn = state.db()?;
    let article: KnowledgeArticle = diesel::update(knowledge_articles::table.find(article_id))
        .set(&changes)
        .get_result(&mut conn)?;

    Ok(success(ArticlePayload {
        article: article.into(),
    }))
}

pub async fn mark_helpful(
    State(state): State<AppState>,
    Path(article_id): Path<Uuid>,
) -> AppResult<Json<Envelope<HelpfulPayload>>> {
    let mut conn = state.db()?;

    let helpful_count: i32 = diesel::update(
        knowledge_articles::table
            .filter(knowledge_articles::id.eq(article_id))
            .filter(knowledge_articles::status.eq(ArticleStatus::Published.as_str())),
    )
    .set(knowledge_articles::helpful_count.eq(knowledge_articles::helpful_count + 1))
    .returning(knowledge_articles::helpful_count)
    .get_result(&mut conn)?;

    Ok(success(HelpfulPayload { helpful_count }))
}
