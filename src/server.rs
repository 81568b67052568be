//! HTTP server.
//!
//! Serves content as JSON, proxies the third-party widgets, relays chat
//! tokens and emits the crawler documents.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/home` | Latest posts, featured projects, latest news |
//! | `GET`  | `/api/posts` | Paginated posts (`page`, `q`, `tag`) |
//! | `GET`  | `/api/posts/{slug}` | One post with rendered HTML; counts a view |
//! | `GET`  | `/api/projects` | Paginated projects (`page`, `q`, `tag`) |
//! | `GET`  | `/api/milestones` | Employment/education (`kind`) |
//! | `GET`  | `/api/publications` | Publications |
//! | `GET`  | `/api/news` | News (`limit`) |
//! | `GET`  | `/api/uses` | Uses categories |
//! | `POST` | `/api/markdown` | Render Markdown |
//! | `GET`  | `/api/placeholder` | Blur placeholder (`src`) |
//! | `GET`  | `/api/github` | GitHub profile proxy |
//! | `GET`  | `/api/wakatime` | WakaTime stats proxy |
//! | `GET`  | `/api/spotify/now-playing` | Spotify proxy |
//! | `POST` | `/api/chat` | Streaming chat relay (`text/plain`) |
//! | `GET`  | `/robots.txt`, `/sitemap.xml`, `/manifest.webmanifest` | Crawler documents |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "post not found: hello" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `upstream_error`
//! (the provider's status), `not_configured` (500), `internal` (500).
//! Malformed query strings and request bodies are `bad_request` too.
//! Content load failures report only "failed to fetch <kind>"; the cause
//! goes to the log.

use axum::{
    body::Body,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::blog;
use crate::chat::{validate_history, ChatMessage, ChatService};
use crate::config::Config;
use crate::content::{self, ContentError};
use crate::integrations::{Integrations, NowPlaying, UpstreamError};
use crate::markdown::MarkdownRenderer;
use crate::metadata;
use crate::models::{
    Milestone, MilestoneKind, NewsItem, PostDetail, PostSummary, ProjectView, Publication,
    UsesCategory,
};
use crate::paginate::{self, Page};
use crate::placeholder::PlaceholderService;
use crate::views::ViewCounter;

const HOME_POSTS: usize = 3;
const HOME_PROJECTS: usize = 4;
const HOME_NEWS: usize = 5;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    renderer: MarkdownRenderer,
    views: Arc<ViewCounter>,
    placeholders: Arc<PlaceholderService>,
    integrations: Integrations,
    chat: ChatService,
}

impl AppState {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            config: Arc::new(config.clone()),
            renderer: MarkdownRenderer::new(config.markdown.theme.clone()),
            views: Arc::new(ViewCounter::new(&config.content.dir)),
            placeholders: Arc::new(PlaceholderService::new(
                config.placeholders.clone(),
                config.site_url(),
            )?),
            integrations: Integrations::new(config.integrations.clone())?,
            chat: ChatService::from_config(&config.chat)?,
        })
    }

    /// Replaces the chat relay, e.g. with a different backend.
    pub fn with_chat(mut self, chat: ChatService) -> Self {
        self.chat = chat;
        self
    }
}

/// Builds the router with every route and layer.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/home", get(handle_home))
        .route("/api/posts", get(handle_list_posts))
        .route("/api/posts/{slug}", get(handle_get_post))
        .route("/api/projects", get(handle_projects))
        .route("/api/milestones", get(handle_milestones))
        .route("/api/publications", get(handle_publications))
        .route("/api/news", get(handle_news))
        .route("/api/uses", get(handle_uses))
        .route("/api/markdown", post(handle_markdown))
        .route("/api/placeholder", get(handle_placeholder))
        .route("/api/github", get(handle_github))
        .route("/api/wakatime", get(handle_wakatime))
        .route("/api/spotify/now-playing", get(handle_spotify))
        .route("/api/chat", post(handle_chat))
        .route("/robots.txt", get(handle_robots))
        .route("/sitemap.xml", get(handle_sitemap))
        .route("/manifest.webmanifest", get(handle_manifest))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Starts the server on `[server].bind` and runs until the process ends.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::new(config)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(
        content = %config.content.dir.display(),
        "listening on http://{}",
        config.server.bind
    );
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<ContentError>() {
            Some(ContentError::NotFound { .. }) => AppError {
                status: StatusCode::NOT_FOUND,
                code: "not_found",
                message: err.to_string(),
            },
            Some(ContentError::Fetch(kind)) => {
                error!("{:#}", err);
                internal(format!("failed to fetch {}", kind))
            }
            None => {
                error!("request failed: {:#}", err);
                internal("something went wrong")
            }
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<UpstreamError> for AppError {
    fn from(err: UpstreamError) -> Self {
        match &err {
            UpstreamError::NotConfigured { .. } => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "not_configured",
                message: err.to_string(),
            },
            _ => AppError {
                status: err
                    .status()
                    .and_then(|s| StatusCode::from_u16(s).ok())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                code: "upstream_error",
                message: err.to_string(),
            },
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Placeholders ============

async fn attach_post_placeholders(state: &AppState, posts: &mut [PostSummary]) {
    for post in posts {
        post.blur_data_url = state
            .placeholders
            .try_data_url(post.post.thumbnail.as_deref())
            .await;
    }
}

async fn attach_project_placeholders(state: &AppState, projects: &mut [ProjectView]) {
    for project in projects {
        project.blur_data_url = state
            .placeholders
            .try_data_url(project.project.thumbnail.as_deref())
            .await;
    }
}

// ============ GET /api/home ============

#[derive(Serialize)]
struct HomeResponse {
    posts: Vec<PostSummary>,
    projects: Vec<ProjectView>,
    news: Vec<NewsItem>,
}

async fn handle_home(State(state): State<AppState>) -> Result<Json<HomeResponse>, AppError> {
    let dir = &state.config.content.dir;

    let mut posts = blog::list_posts(dir, Some(HOME_POSTS))?;
    let featured = content::featured_projects(&content::load_projects(dir)?, Some(HOME_PROJECTS));
    let mut projects = content::join_projects_with_repos(featured, &[]);
    let news = content::load_news(dir, Some(HOME_NEWS))?;

    attach_post_placeholders(&state, &mut posts).await;
    attach_project_placeholders(&state, &mut projects).await;

    Ok(Json(HomeResponse {
        posts,
        projects,
        news,
    }))
}

// ============ GET /api/posts ============

#[derive(Deserialize)]
struct ListParams {
    page: Option<usize>,
    q: Option<String>,
    tag: Option<String>,
}

#[derive(Serialize)]
struct ListResponse<T> {
    #[serde(flatten)]
    page: Page<T>,
    tags: Vec<String>,
}

async fn handle_list_posts(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<ListResponse<PostSummary>>, AppError> {
    let Query(params) = params?;
    let posts = blog::list_posts(&state.config.content.dir, None)?;
    let tags = paginate::all_tags(&posts);

    let posts = paginate::filter_tag(posts, params.tag.as_deref());
    let posts = paginate::filter(posts, params.q.as_deref());
    let mut page = paginate::paginate(
        posts,
        params.page.unwrap_or(1),
        state.config.pagination.per_page,
    );
    attach_post_placeholders(&state, &mut page.items).await;

    Ok(Json(ListResponse { page, tags }))
}

// ============ GET /api/posts/{slug} ============

async fn handle_get_post(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<PostDetail>, AppError> {
    let mut post = blog::get_post(&state.config.content.dir, &state.renderer, &slug)?;

    match state.views.increment(&slug).await {
        Ok(views) => post.summary.post.views = views,
        Err(e) => warn!(slug = %slug, "view count not updated: {:#}", e),
    }

    post.summary.blur_data_url = state
        .placeholders
        .try_data_url(post.summary.post.thumbnail.as_deref())
        .await;

    Ok(Json(post))
}

// ============ GET /api/projects ============

async fn handle_projects(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<ListResponse<ProjectView>>, AppError> {
    let Query(params) = params?;
    let projects = content::load_projects(&state.config.content.dir)?;

    let repos = if state.integrations.github_configured() {
        match state.integrations.github_repositories().await {
            Ok(repos) => repos,
            Err(e) => {
                warn!("projects served without GitHub stats: {}", e);
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let projects = content::join_projects_with_repos(projects, &repos);
    let tags = paginate::all_tags(&projects);

    let projects = paginate::filter_tag(projects, params.tag.as_deref());
    let projects = paginate::filter(projects, params.q.as_deref());
    let mut page = paginate::paginate(
        projects,
        params.page.unwrap_or(1),
        state.config.pagination.per_page,
    );
    attach_project_placeholders(&state, &mut page.items).await;

    Ok(Json(ListResponse { page, tags }))
}

// ============ Other content ============

#[derive(Deserialize)]
struct MilestoneParams {
    kind: Option<MilestoneKind>,
}

async fn handle_milestones(
    State(state): State<AppState>,
    params: Result<Query<MilestoneParams>, QueryRejection>,
) -> Result<Json<Vec<Milestone>>, AppError> {
    let Query(params) = params?;
    Ok(Json(content::load_milestones(
        &state.config.content.dir,
        params.kind,
    )?))
}

async fn handle_publications(
    State(state): State<AppState>,
) -> Result<Json<Vec<Publication>>, AppError> {
    Ok(Json(content::load_publications(&state.config.content.dir)?))
}

#[derive(Deserialize)]
struct NewsParams {
    limit: Option<usize>,
}

async fn handle_news(
    State(state): State<AppState>,
    params: Result<Query<NewsParams>, QueryRejection>,
) -> Result<Json<Vec<NewsItem>>, AppError> {
    let Query(params) = params?;
    Ok(Json(content::load_news(
        &state.config.content.dir,
        params.limit,
    )?))
}

async fn handle_uses(State(state): State<AppState>) -> Result<Json<Vec<UsesCategory>>, AppError> {
    Ok(Json(content::load_uses(&state.config.content.dir)?))
}

// ============ POST /api/markdown ============

#[derive(Deserialize)]
struct MarkdownRequest {
    markdown: String,
}

#[derive(Serialize)]
struct MarkdownResponse {
    html: String,
}

async fn handle_markdown(
    State(state): State<AppState>,
    req: Result<Json<MarkdownRequest>, JsonRejection>,
) -> Result<Json<MarkdownResponse>, AppError> {
    let Json(req) = req?;
    Ok(Json(MarkdownResponse {
        html: state.renderer.render(&req.markdown),
    }))
}

// ============ GET /api/placeholder ============

#[derive(Deserialize)]
struct PlaceholderParams {
    src: String,
}

#[derive(Serialize)]
struct PlaceholderResponse {
    src: String,
    blur_data_url: String,
}

async fn handle_placeholder(
    State(state): State<AppState>,
    params: Result<Query<PlaceholderParams>, QueryRejection>,
) -> Result<Json<PlaceholderResponse>, AppError> {
    let Query(params) = params?;
    if !state.placeholders.enabled() {
        return Err(AppError {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: "placeholders are disabled".to_string(),
        });
    }
    if params.src.trim().is_empty() {
        return Err(bad_request("src must not be empty"));
    }
    let blur_data_url = state
        .placeholders
        .data_url(&params.src)
        .await
        .map_err(|e| {
            warn!(src = %params.src, "placeholder failed: {:#}", e);
            bad_request(format!("cannot create placeholder for {}", params.src))
        })?;
    Ok(Json(PlaceholderResponse {
        src: params.src,
        blur_data_url,
    }))
}

// ============ Integrations ============

async fn handle_github(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    Ok(Json(state.integrations.github_profile().await?))
}

async fn handle_wakatime(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    Ok(Json(state.integrations.wakatime_stats().await?))
}

async fn handle_spotify(State(state): State<AppState>) -> Result<Json<NowPlaying>, AppError> {
    Ok(Json(state.integrations.spotify_now_playing().await?))
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
struct ChatRequest {
    messages: Vec<ChatMessage>,
}

/// Streams the reply as `text/plain`, one chunk per token.
async fn handle_chat(
    State(state): State<AppState>,
    req: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = req?;
    validate_history(&req.messages).map_err(bad_request)?;

    let rx = state.chat.relay(req.messages);
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|token| (Ok::<_, Infallible>(token), rx))
    });

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

// ============ Crawler documents ============

async fn handle_robots(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        metadata::robots_txt(&state.config),
    )
}

async fn handle_sitemap(State(state): State<AppState>) -> Result<Response, AppError> {
    let posts = blog::list_posts(&state.config.content.dir, None)?;
    Ok((
        [(header::CONTENT_TYPE, "application/xml")],
        metadata::sitemap_xml(&state.config, &posts),
    )
        .into_response())
}

async fn handle_manifest(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/manifest+json")],
        Json(metadata::manifest(&state.config)),
    )
}
