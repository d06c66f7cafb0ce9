use std::io;
use std::io::ErrorKind;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use ntex::http::StatusCode;
use ntex::web;
use ntex::web::HttpRequest;
use serde::{Deserialize, Serialize};
use spdlog::{error, info, warn};
use toml::Table;

use crate::config::Config;
use crate::error::StoreError;
use crate::post::{Language, NewPost, PostPatch};
use crate::query_string::QueryString;
use crate::store::ContentStore;

pub const API_KEY_HEADER: &str = "X-API-Key";
const DEFAULT_COMMIT_LIMIT: usize = 10;

struct AppState {
    store: ContentStore,
    api_keys: Vec<String>,
}

#[derive(Deserialize)]
struct CreateRequest {
    title: String,
    content: String,
    #[serde(default)]
    language: Language,
    #[serde(default)]
    tags: Vec<String>,
    categories: Option<Vec<String>>,
    #[serde(default)]
    draft: bool,
    date: Option<DateTime<FixedOffset>>,
    filename: Option<String>,
    #[serde(default)]
    extra: Table,
}

#[derive(Deserialize)]
struct UpdateRequest {
    title: Option<String>,
    content: Option<String>,
    date: Option<DateTime<FixedOffset>>,
    draft: Option<bool>,
    tags: Option<Vec<String>>,
    categories: Option<Vec<String>>,
    #[serde(default)]
    extra: Table,
}

#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    data: T,
}

#[derive(Serialize)]
struct ApiError {
    success: bool,
    error: String,
    kind: &'static str,
    retryable: bool,
}

impl From<CreateRequest> for NewPost {
    fn from(req: CreateRequest) -> Self {
        NewPost {
            title: req.title,
            body: req.content,
            language: req.language,
            tags: req.tags,
            categories: req.categories,
            draft: req.draft,
            date: req.date,
            filename: req.filename,
            extra: req.extra,
        }
    }
}

impl From<UpdateRequest> for PostPatch {
    fn from(req: UpdateRequest) -> Self {
        PostPatch {
            title: req.title,
            body: req.content,
            date: req.date,
            draft: req.draft,
            tags: req.tags,
            categories: req.categories,
            extra: req.extra,
        }
    }
}

pub fn status_code(e: &StoreError) -> StatusCode {
    match e {
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::Conflict { .. } | StoreError::GitConflict { .. } => StatusCode::CONFLICT,
        StoreError::Validation(_) => StatusCode::BAD_REQUEST,
        StoreError::LockTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::GitOperationFailed { .. } => StatusCode::BAD_GATEWAY,
        StoreError::InvalidPost { .. } | StoreError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: StoreError) -> web::HttpResponse {
    let status = status_code(&e);
    if status.is_server_error() {
        error!("Request failed: {}", e);
    } else {
        warn!("Request rejected: {}", e);
    }
    web::HttpResponse::build(status).json(&ApiError {
        success: false,
        error: e.to_string(),
        kind: e.kind(),
        retryable: e.is_retryable(),
    })
}

fn reply<T: Serialize>(status: StatusCode, res: Result<T, StoreError>) -> web::HttpResponse {
    match res {
        Ok(data) => web::HttpResponse::build(status).json(&ApiResponse { success: true, data }),
        Err(e) => error_response(e),
    }
}

fn plain_error(status: StatusCode, message: &str) -> web::HttpResponse {
    web::HttpResponse::build(status).json(&ApiError {
        success: false,
        error: message.to_string(),
        kind: "auth",
        retryable: false,
    })
}

/// No key configured is a 503, a missing key 401, a wrong one 403.
pub fn check_api_key(keys: &[String], provided: Option<&str>) -> Result<(), StatusCode> {
    if keys.is_empty() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    match provided {
        None | Some("") => Err(StatusCode::UNAUTHORIZED),
        Some(key) if keys.iter().any(|k| k == key) => Ok(()),
        Some(_) => Err(StatusCode::FORBIDDEN),
    }
}

fn authorize(req: &HttpRequest, state: &AppState) -> Result<(), web::HttpResponse> {
    let provided = req.headers().get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    check_api_key(&state.api_keys, provided).map_err(|status| {
        let message = match status {
            StatusCode::SERVICE_UNAVAILABLE => "API keys are not configured",
            StatusCode::UNAUTHORIZED => "Missing API key",
            _ => "Invalid API key",
        };
        warn!("Unauthorized request to {}: {}", req.path(), message);
        plain_error(status, message)
    })
}

fn query(req: &HttpRequest) -> QueryString {
    QueryString::from(req.uri().query().unwrap_or(""))
}

#[web::get("/health")]
async fn health() -> web::HttpResponse {
    web::HttpResponse::Ok().json(&serde_json::json!({ "status": "healthy" }))
}

#[web::get("/posts")]
async fn list_posts(req: HttpRequest, state: web::types::State<Arc<AppState>>) -> web::HttpResponse {
    if let Err(res) = authorize(&req, &state) {
        return res;
    }
    let res = query(&req).list_filter().and_then(|filter| state.store.list(&filter));
    reply(StatusCode::OK, res)
}

#[web::get("/posts/{filename}")]
async fn get_post(req: HttpRequest, path: web::types::Path<String>, state: web::types::State<Arc<AppState>>) -> web::HttpResponse {
    if let Err(res) = authorize(&req, &state) {
        return res;
    }
    let res = query(&req).get_language("language")
        .and_then(|language| state.store.get(&path, language));
    reply(StatusCode::OK, res)
}

#[web::post("/posts")]
async fn create_post(req: HttpRequest, body: web::types::Json<CreateRequest>, state: web::types::State<Arc<AppState>>) -> web::HttpResponse {
    if let Err(res) = authorize(&req, &state) {
        return res;
    }
    let res = state.store.create(body.into_inner().into()).await;
    reply(StatusCode::CREATED, res)
}

#[web::put("/posts/{filename}")]
async fn update_post(req: HttpRequest, path: web::types::Path<String>, body: web::types::Json<UpdateRequest>,
                     state: web::types::State<Arc<AppState>>) -> web::HttpResponse {
    if let Err(res) = authorize(&req, &state) {
        return res;
    }
    let language = match query(&req).get_language("language") {
        Ok(language) => language,
        Err(e) => return error_response(e),
    };
    let res = state.store.update(&path, language, body.into_inner().into()).await;
    reply(StatusCode::OK, res)
}

#[web::delete("/posts/{filename}")]
async fn delete_post(req: HttpRequest, path: web::types::Path<String>, state: web::types::State<Arc<AppState>>) -> web::HttpResponse {
    if let Err(res) = authorize(&req, &state) {
        return res;
    }
    let language = match query(&req).get_language("language") {
        Ok(language) => language,
        Err(e) => return error_response(e),
    };
    let res = state.store.delete(&path, language).await;
    reply(StatusCode::OK, res)
}

#[web::get("/search")]
async fn search(req: HttpRequest, state: web::types::State<Arc<AppState>>) -> web::HttpResponse {
    if let Err(res) = authorize(&req, &state) {
        return res;
    }
    let qs = query(&req);
    let res = qs.get_language("language")
        .and_then(|language| state.store.search(qs.get("q").unwrap_or(""), language));
    reply(StatusCode::OK, res)
}

#[web::post("/sync")]
async fn sync(req: HttpRequest, state: web::types::State<Arc<AppState>>) -> web::HttpResponse {
    if let Err(res) = authorize(&req, &state) {
        return res;
    }
    reply(StatusCode::OK, state.store.sync().await)
}

#[web::get("/status")]
async fn repo_status(req: HttpRequest, state: web::types::State<Arc<AppState>>) -> web::HttpResponse {
    if let Err(res) = authorize(&req, &state) {
        return res;
    }
    reply(StatusCode::OK, state.store.status().await)
}

#[web::get("/commits")]
async fn commits(req: HttpRequest, state: web::types::State<Arc<AppState>>) -> web::HttpResponse {
    if let Err(res) = authorize(&req, &state) {
        return res;
    }
    let limit = match query(&req).get_usize("limit") {
        Ok(limit) => limit.unwrap_or(DEFAULT_COMMIT_LIMIT).clamp(1, 100),
        Err(e) => return error_response(e),
    };
    reply(StatusCode::OK, state.store.recent_commits(limit).await)
}

#[web::get("/translations")]
async fn translations(req: HttpRequest, state: web::types::State<Arc<AppState>>) -> web::HttpResponse {
    if let Err(res) = authorize(&req, &state) {
        return res;
    }
    let qs = query(&req);
    let res = qs.get_language("source").and_then(|source| {
        let target = qs.get_language("target")?;
        state.store.translation_status(source.unwrap_or(Language::Ko), target.unwrap_or(Language::En))
    });
    reply(StatusCode::OK, res)
}

pub async fn server_run(config: Config) -> io::Result<()> {
    let store = ContentStore::open(&config).await
        .map_err(|e| io::Error::new(ErrorKind::Other, format!("Error opening repository: {}", e)))?;

    match store.sync().await {
        Ok(outcome) => info!("Initial sync done, head={}", outcome.head.as_deref().unwrap_or("-")),
        Err(e) => warn!("Initial sync failed, serving the local tree: {}", e),
    }

    if config.server.api_keys.is_empty() {
        warn!("No API key configured. Every authenticated route answers 503");
    }

    let bind_addr = config.server.address.clone();
    let bind_port = config.server.port;
    let app_state = Arc::new(AppState {
        store,
        api_keys: config.server.api_keys.clone(),
    });

    web::HttpServer::new(move || {
        web::App::new()
            .state(app_state.clone())
            .service(health)
            .service(list_posts)
            .service(get_post)
            .service(create_post)
            .service(update_post)
            .service(delete_post)
            .service(search)
            .service(sync)
            .service(repo_status)
            .service(commits)
            .service(translations)
    })
        .bind((bind_addr, bind_port))?
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_api_key() {
        let keys = vec!["k1".to_string(), "k2".to_string()];
        assert_eq!(check_api_key(&keys, Some("k2")), Ok(()));
        assert_eq!(check_api_key(&keys, Some("nope")), Err(StatusCode::FORBIDDEN));
        assert_eq!(check_api_key(&keys, None), Err(StatusCode::UNAUTHORIZED));
        assert_eq!(check_api_key(&keys, Some("")), Err(StatusCode::UNAUTHORIZED));
        assert_eq!(check_api_key(&[], Some("k1")), Err(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(status_code(&StoreError::not_found("a.md", None)), StatusCode::NOT_FOUND);
        assert_eq!(status_code(&StoreError::Validation("x".to_string())), StatusCode::BAD_REQUEST);
        assert_eq!(status_code(&StoreError::GitConflict { command: "push".to_string(), detail: String::new() }), StatusCode::CONFLICT);
        assert_eq!(status_code(&StoreError::GitOperationFailed { command: "push".to_string(), status: Some(1), stderr: String::new() }), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_error_responses() {
        let res = error_response(StoreError::not_found("a.md", None));
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let res = error_response(StoreError::LockTimeout { path: "blog-git.lock".into(), waited: std::time::Duration::from_secs(60) });
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(plain_error(StatusCode::FORBIDDEN, "Invalid API key").status(), StatusCode::FORBIDDEN);
        assert_eq!(reply(StatusCode::CREATED, Ok::<_, StoreError>("done")).status(), StatusCode::CREATED);
    }

    #[test]
    fn test_create_request() {
        let req: CreateRequest = serde_json::from_str(r#"{
            "title": "Hello World",
            "content": "Body",
            "tags": ["rust"],
            "date": "2024-02-28T10:00:00+09:00",
            "extra": {"cover": {"image": "a.png"}}
        }"#).unwrap();
        let new_post: NewPost = req.into();
        assert_eq!(new_post.language, Language::Ko);
        assert_eq!(new_post.body, "Body");
        assert!(new_post.categories.is_none());
        assert_eq!(new_post.date.unwrap().to_rfc3339(), "2024-02-28T10:00:00+09:00");
        assert!(new_post.extra.get("cover").unwrap().is_table());

        let patch: PostPatch = serde_json::from_str::<UpdateRequest>(r#"{"draft": true}"#).unwrap().into();
        assert_eq!(patch.draft, Some(true));
        assert!(patch.title.is_none());
    }
}
