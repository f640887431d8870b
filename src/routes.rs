use std::future::{ready, Ready};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use actix_web::dev::Payload;
use actix_web::http::header::{
    self, CacheControl, CacheDirective, Charset, ContentDisposition, DispositionParam, DispositionType, ExtendedValue,
};
use actix_web::{web, FromRequest, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::{error, warn};
use utoipa::{IntoParams, ToSchema};

use crate::analytics::aggregate_stats;
use crate::auth::{AdminCredentials, AuthKeys, Role};
use crate::config::UploadLimits;
use crate::content;
use crate::error::ApiError;
use crate::models::*;
use crate::rate_limit::RateLimiterFacade;
use crate::repo::{Repo, RepoError};
use crate::storage::{DiskStore, StoreError};
use crate::upload;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| ApiError::bad_request("invalid_json", err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| ApiError::bad_request("invalid_query", err.to_string()).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|err, _req| ApiError::bad_request("invalid_path", err.to_string()).into()),
    );
    cfg.service(
        web::scope("/api")
            .service(web::resource("/presentations").route(web::get().to(list_presentations)))
            // registered ahead of `/presentations/{id}`
            .service(web::resource("/presentations/search/{query}").route(web::get().to(search_presentations)))
            .service(
                web::resource("/presentations/{id}")
                    .route(web::get().to(get_presentation))
                    .route(web::put().to(update_presentation))
                    .route(web::delete().to(delete_presentation)),
            )
            .service(web::resource("/presentations/{id}/download").route(web::get().to(download_presentation)))
            .service(web::resource("/presentations/{id}/analytics").route(web::get().to(presentation_analytics)))
            .service(web::resource("/upload").route(web::post().to(upload::upload_presentation)))
            .service(web::resource("/upload/validate").route(web::post().to(upload::validate_upload)))
            .service(web::resource("/content/stats").route(web::get().to(content::content_stats)))
            .service(web::resource("/content/categories").route(web::get().to(content::list_categories)))
            .service(web::resource("/content/recent").route(web::get().to(content::recent_presentations)))
            .service(web::resource("/content/popular").route(web::get().to(content::popular_presentations)))
            .service(web::resource("/content/admin/all").route(web::get().to(content::admin_list_all)))
            .service(web::resource("/content/admin/bulk").route(web::post().to(content::admin_bulk)))
            .service(web::resource("/thumbnails/{filename}").route(web::get().to(get_thumbnail)))
            .service(web::resource("/files/{id}/download").route(web::get().to(download_file)))
            .service(web::resource("/auth/login").route(web::post().to(login)))
            .service(web::resource("/health").route(web::get().to(health))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub store: DiskStore,
    pub limits: UploadLimits,
    pub auth: AuthKeys,
    pub admin: Option<AdminCredentials>,
    pub rate_limiter: Option<RateLimiterFacade>,
    /// Take the client address from `Forwarded`/`X-Forwarded-For` instead of the socket peer.
    pub trust_proxy: bool,
}

impl FromRequest for ClientInfo {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _pl: &mut Payload) -> Self::Future {
        let user_agent = req.headers().get(header::USER_AGENT).and_then(|v| v.to_str().ok()).map(str::to_string);
        let trust_proxy = req.app_data::<web::Data<AppState>>().is_some_and(|s| s.trust_proxy);
        // forwarded headers are client controlled; only honoured behind a known proxy
        let ip = if trust_proxy {
            req.connection_info().realip_remote_addr().map(strip_port)
        } else {
            req.peer_addr().map(|addr| addr.ip().to_string())
        };
        ready(Ok(ClientInfo { user_agent, ip }))
    }
}

fn strip_port(addr: &str) -> String {
    match addr.parse::<SocketAddr>() {
        Ok(sock) => sock.ip().to_string(),
        Err(_) => addr.to_string(),
    }
}

pub(crate) fn limited(retry_after: Duration) -> ApiError {
    let secs = retry_after.as_millis().div_ceil(1000) as u64;
    ApiError::RateLimited { retry_after_secs: secs.max(1) }
}

/// Analytics are instrumentation: a failed insert is logged and the request carries on.
pub(crate) async fn record_event(repo: &dyn Repo, event: NewEvent) {
    let kind = event.event_type.clone();
    if let Err(e) = repo.record_event(event).await {
        warn!(event_type = %kind, "analytics event not recorded: {e}");
    }
}

/// Removes a presentation's files from disk (best effort) and then its row; dependent rows
/// follow through the schema's cascade rules.
pub(crate) async fn remove_presentation(repo: &dyn Repo, store: &DiskStore, id: &str) -> Result<(), RepoError> {
    let presentation = repo.get_presentation(id).await?;
    let files = repo.list_files(id).await?;
    let mut paths = vec![presentation.file_path];
    paths.extend(presentation.thumbnail_path);
    for file in files {
        if !paths.contains(&file.file_path) {
            paths.push(file.file_path);
        }
    }
    for path in &paths {
        store.remove_best_effort(path).await;
    }
    repo.delete_presentation(id).await
}

/// `attachment` disposition; non-ASCII names also get an RFC 5987 `filename*`.
fn attachment(name: &str) -> ContentDisposition {
    let clean: String = name
        .chars()
        .map(|c| if matches!(c, '"' | '\\' | '/') || c.is_control() { '_' } else { c })
        .collect();
    let ascii: String = clean.chars().map(|c| if c.is_ascii() { c } else { '_' }).collect();
    let mut parameters = vec![DispositionParam::Filename(ascii)];
    if !clean.is_ascii() {
        parameters.push(DispositionParam::FilenameExt(ExtendedValue {
            charset: Charset::Ext("UTF-8".to_string()),
            language_tag: None,
            value: clean.into_bytes(),
        }));
    }
    ContentDisposition { disposition: DispositionType::Attachment, parameters }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Upper bound for any client supplied page size.
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Positive limits are capped at `MAX_PAGE_LIMIT`; zero or negative means "not given".
pub(crate) fn clamp_limit(limit: Option<i64>) -> Option<i64> {
    limit.filter(|l| *l > 0).map(|l| l.min(MAX_PAGE_LIMIT))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Exact category match
    pub category: Option<String>,
    /// Substring of the author name
    pub author: Option<String>,
    /// Substring of title, description or tags
    pub search: Option<String>,
    /// Page size, at most 100
    pub limit: Option<i64>,
    /// 1-based page, used together with `limit`
    pub page: Option<i64>,
    /// `date_created` (default), `title`, `view_count` or `download_count`
    pub sort: Option<String>,
    /// `desc` (default) or `asc`
    pub order: Option<String>,
}

impl ListQuery {
    pub fn filters(&self) -> PresentationFilters {
        let limit = clamp_limit(self.limit);
        let page = self.page();
        PresentationFilters {
            category: non_empty(&self.category),
            author: non_empty(&self.author),
            search: non_empty(&self.search),
            limit,
            offset: limit.map(|l| (page - 1).saturating_mul(l)),
            sort: SortKey::parse(self.sort.as_deref()),
            order: SortOrder::parse(self.order.as_deref()),
            include_private: false,
        }
    }

    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }
}

#[utoipa::path(
    get,
    path = "/api/presentations",
    tag = "presentations",
    params(ListQuery),
    responses((status = 200, description = "Public presentations with pagination"))
)]
pub async fn list_presentations(data: web::Data<AppState>, query: web::Query<ListQuery>) -> Result<HttpResponse, ApiError> {
    let filters = query.filters();
    let presentations = data.repo.list_presentations(&filters).await?;
    let total = data.repo.count_presentations(&filters).await?;
    let page = query.page();
    let (limit, pages) = match filters.limit {
        Some(l) => (l, (total.max(0) as u64).div_ceil(l as u64) as i64),
        None => (presentations.len() as i64, 1),
    };
    let views: Vec<PresentationView> = presentations.into_iter().map(PresentationView::from).collect();
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": views,
        "pagination": { "page": page, "limit": limit, "total": total, "pages": pages }
    })))
}

#[utoipa::path(
    get,
    path = "/api/presentations/{id}",
    tag = "presentations",
    params(("id" = String, Path, description = "Presentation id")),
    responses(
        (status = 200, description = "Presentation with its files; counts as a view", body = PresentationView),
        (status = 404, description = "Unknown presentation", body = crate::error::ApiErrorBody)
    )
)]
pub async fn get_presentation(
    data: web::Data<AppState>,
    client: ClientInfo,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let mut presentation = data.repo.get_presentation(&id).await?;
    let files = data.repo.list_files(&id).await?;
    data.repo.increment_view_count(&id).await?;
    record_event(&*data.repo, NewEvent::new(EventKind::View, Some(&id), &client)).await;
    // report the count including this view
    presentation.view_count += 1;
    let view = PresentationView::from(presentation).with_files(files);
    Ok(HttpResponse::Ok().json(json!({ "success": true, "data": view })))
}

#[utoipa::path(
    get,
    path = "/api/presentations/{id}/download",
    tag = "presentations",
    params(("id" = String, Path, description = "Presentation id")),
    responses(
        (status = 200, description = "Primary file as an attachment", content_type = "application/octet-stream"),
        (status = 404, description = "Unknown presentation or file missing on disk", body = crate::error::ApiErrorBody)
    )
)]
pub async fn download_presentation(
    data: web::Data<AppState>,
    client: ClientInfo,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let presentation = data.repo.get_presentation(&id).await?;
    let file = data.store.open(&presentation.file_path).await?;
    data.repo.increment_download_count(&id).await?;
    let event = NewEvent::new(EventKind::Download, Some(&id), &client)
        .with_metadata(json!({ "file_type": presentation.file_type, "file_size": presentation.file_size }));
    record_event(&*data.repo, event).await;
    Ok(HttpResponse::Ok()
        .content_type("application/octet-stream")
        .insert_header(attachment(&format!("{}{}", presentation.title, presentation.file_type)))
        .streaming(ReaderStream::new(file)))
}

#[utoipa::path(
    get,
    path = "/api/files/{id}/download",
    tag = "presentations",
    params(("id" = String, Path, description = "File id")),
    responses(
        (status = 200, description = "Single uploaded file as an attachment"),
        (status = 404, description = "Unknown file or file missing on disk", body = crate::error::ApiErrorBody)
    )
)]
pub async fn download_file(
    data: web::Data<AppState>,
    client: ClientInfo,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let file = data.repo.get_file(&id).await.map_err(|e| match e {
        RepoError::NotFound => ApiError::NotFound("file"),
        other => other.into(),
    })?;
    let handle = data.store.open(&file.file_path).await?;
    let event = NewEvent::new(EventKind::Download, file.presentation_id.as_deref(), &client)
        .with_metadata(json!({ "file_id": file.id, "file_size": file.file_size }));
    record_event(&*data.repo, event).await;
    Ok(HttpResponse::Ok()
        .content_type(file.mime_type.as_deref().unwrap_or("application/octet-stream"))
        .insert_header(attachment(&file.original_name))
        .streaming(ReaderStream::new(handle)))
}

#[utoipa::path(
    put,
    path = "/api/presentations/{id}",
    tag = "presentations",
    params(("id" = String, Path, description = "Presentation id")),
    request_body = UpdatePresentation,
    responses(
        (status = 200, description = "Updated presentation", body = PresentationView),
        (status = 400, description = "No valid fields or a required field blanked", body = crate::error::ApiErrorBody),
        (status = 404, description = "Unknown presentation", body = crate::error::ApiErrorBody)
    )
)]
pub async fn update_presentation(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdatePresentation>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let updates = payload.into_inner();
    data.repo.get_presentation(&id).await?;
    updates
        .validate()
        .map_err(|field| ApiError::bad_request("missing_fields", format!("{field} cannot be empty")))?;
    let updated = data.repo.update_presentation(&id, updates).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Presentation updated successfully",
        "data": PresentationView::from(updated),
    })))
}

#[utoipa::path(
    delete,
    path = "/api/presentations/{id}",
    tag = "presentations",
    params(("id" = String, Path, description = "Presentation id")),
    responses(
        (status = 200, description = "Presentation, its rows and files removed"),
        (status = 404, description = "Unknown presentation", body = crate::error::ApiErrorBody)
    )
)]
pub async fn delete_presentation(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    remove_presentation(&*data.repo, &data.store, &id).await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "message": "Presentation deleted successfully" })))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TimeframeQuery {
    /// `7d`, `30d` (default), `90d` or `1y`
    pub timeframe: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/presentations/{id}/analytics",
    tag = "analytics",
    params(("id" = String, Path, description = "Presentation id"), TimeframeQuery),
    responses(
        (status = 200, description = "Per event type totals and daily series"),
        (status = 404, description = "Unknown presentation", body = crate::error::ApiErrorBody)
    )
)]
pub async fn presentation_analytics(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    query: web::Query<TimeframeQuery>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let presentation = data.repo.get_presentation(&id).await?;
    let timeframe = Timeframe::parse(query.timeframe.as_deref());
    let rows = data.repo.event_stats(Some(&id), timeframe).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": {
            "presentation_id": id,
            "timeframe": timeframe.as_str(),
            "stats": aggregate_stats(rows),
            "summary": {
                "total_views": presentation.view_count,
                "total_downloads": presentation.download_count,
            }
        }
    })))
}

pub const DEFAULT_SEARCH_LIMIT: i64 = 20;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    /// Defaults to 20, at most 100
    pub limit: Option<i64>,
    pub category: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/presentations/search/{query}",
    tag = "presentations",
    params(("query" = String, Path, description = "Substring of title, description or tags"), SearchQuery),
    responses(
        (status = 200, description = "Matching public presentations"),
        (status = 429, description = "Too many searches", body = crate::error::ApiErrorBody)
    )
)]
pub async fn search_presentations(
    data: web::Data<AppState>,
    client: ClientInfo,
    path: web::Path<String>,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, ApiError> {
    if let Some(rl) = &data.rate_limiter {
        rl.allow_search(client.rate_key()).map_err(limited)?;
    }
    let term = path.into_inner();
    let category = non_empty(&query.category);
    let filters = PresentationFilters {
        search: Some(term.clone()),
        category: category.clone(),
        limit: Some(clamp_limit(query.limit).unwrap_or(DEFAULT_SEARCH_LIMIT)),
        ..Default::default()
    };
    let results = data.repo.list_presentations(&filters).await?;
    let event = NewEvent::new(EventKind::Search, None, &client)
        .with_metadata(json!({ "query": term, "results_count": results.len(), "category": category }));
    record_event(&*data.repo, event).await;
    let total_results = results.len();
    let views: Vec<PresentationView> = results.into_iter().map(PresentationView::from).collect();
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": views,
        "query": term,
        "total_results": total_results,
    })))
}

#[utoipa::path(
    get,
    path = "/api/thumbnails/{filename}",
    tag = "content",
    params(("filename" = String, Path, description = "Thumbnail file name")),
    responses(
        (status = 200, description = "JPEG thumbnail", content_type = "image/jpeg"),
        (status = 404, description = "No such thumbnail", body = crate::error::ApiErrorBody)
    )
)]
pub async fn get_thumbnail(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let bytes = data.store.read_thumbnail(&path.into_inner()).await.map_err(|e| match e {
        StoreError::NotFound => ApiError::NotFound("thumbnail"),
        other => other.into(),
    })?;
    Ok(HttpResponse::Ok()
        .content_type("image/jpeg")
        .insert_header(CacheControl(vec![CacheDirective::Public, CacheDirective::MaxAge(86400)]))
        .body(bytes))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Admin bearer token"),
        (status = 401, description = "Wrong credentials", body = crate::error::ApiErrorBody),
        (status = 503, description = "Admin login not configured", body = crate::error::ApiErrorBody)
    )
)]
pub async fn login(
    data: web::Data<AppState>,
    client: ClientInfo,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    if let Some(rl) = &data.rate_limiter {
        rl.allow_login(client.rate_key()).map_err(limited)?;
    }
    let admin = data.admin.as_ref().ok_or(ApiError::Unavailable("admin login is not configured"))?;
    if !admin.verify(&payload.username, &payload.password) {
        warn!(ip = client.rate_key(), "failed admin login");
        return Err(ApiError::Unauthorized);
    }
    let token = data.auth.create_jwt(&payload.username, vec![Role::Admin]).map_err(|e| {
        error!("jwt encode failed: {e}");
        ApiError::Internal
    })?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "token": token })))
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "Database reachable"),
        (status = 503, description = "Database unavailable", body = crate::error::ApiErrorBody)
    )
)]
pub async fn health(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    data.repo.ping().await.map_err(|e| {
        error!("health check failed: {e}");
        ApiError::Unavailable("database unavailable")
    })?;
    Ok(HttpResponse::Ok().json(json!({ "status": "ok" })))
}
