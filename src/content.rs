//! Aggregate and administrative views over the presentation catalogue.

use std::collections::BTreeMap;

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::auth::{Auth, Role};
use crate::error::ApiError;
use crate::models::*;
use crate::repo::RepoError;
use crate::require_role;
use crate::routes::{clamp_limit, remove_presentation, AppState, ListQuery, TimeframeQuery};

pub const DEFAULT_FEED_LIMIT: i64 = 10;
const RECENT_ACTIVITY_ROWS: usize = 10;
const TOP_BY_VIEWS: i64 = 5;

#[utoipa::path(
    get,
    path = "/api/content/stats",
    tag = "content",
    params(TimeframeQuery),
    responses((status = 200, description = "Totals, per category counts, recent activity and most viewed"))
)]
pub async fn content_stats(data: web::Data<AppState>, query: web::Query<TimeframeQuery>) -> Result<HttpResponse, ApiError> {
    let timeframe = Timeframe::parse(query.timeframe.as_deref());
    let totals = data.repo.content_totals().await?;
    let categories: BTreeMap<String, i64> =
        data.repo.category_summaries().await?.into_iter().map(|c| (c.name, c.count)).collect();
    let mut activity = data.repo.event_stats(None, timeframe).await?;
    activity.truncate(RECENT_ACTIVITY_ROWS);
    let top = data
        .repo
        .list_presentations(&PresentationFilters {
            sort: SortKey::Views,
            limit: Some(TOP_BY_VIEWS),
            ..Default::default()
        })
        .await?;
    let popular: Vec<_> = top
        .into_iter()
        .map(|p| {
            json!({
                "id": p.id,
                "title": p.title,
                "author": p.author,
                "view_count": p.view_count,
                "download_count": p.download_count,
            })
        })
        .collect();
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": {
            "total_presentations": totals.total_presentations,
            "total_views": totals.total_views,
            "total_downloads": totals.total_downloads,
            "categories": categories,
            "recent_activity": activity,
            "popular_presentations": popular,
        },
        "timeframe": timeframe.as_str(),
    })))
}

#[utoipa::path(
    get,
    path = "/api/content/categories",
    tag = "content",
    responses((status = 200, description = "Categories of public presentations, most used first", body = [CategorySummary]))
)]
pub async fn list_categories(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let categories = data.repo.category_summaries().await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "data": categories })))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FeedQuery {
    /// Defaults to 10, at most 100
    pub limit: Option<i64>,
    /// Echoed back only
    pub timeframe: Option<String>,
}

impl FeedQuery {
    fn limit(&self) -> i64 {
        clamp_limit(self.limit).unwrap_or(DEFAULT_FEED_LIMIT)
    }
}

#[utoipa::path(
    get,
    path = "/api/content/recent",
    tag = "content",
    params(FeedQuery),
    responses((status = 200, description = "Newest public presentations"))
)]
pub async fn recent_presentations(data: web::Data<AppState>, query: web::Query<FeedQuery>) -> Result<HttpResponse, ApiError> {
    let filters = PresentationFilters { limit: Some(query.limit()), ..Default::default() };
    let views: Vec<PresentationView> =
        data.repo.list_presentations(&filters).await?.into_iter().map(PresentationView::from).collect();
    Ok(HttpResponse::Ok().json(json!({ "success": true, "data": views })))
}

#[utoipa::path(
    get,
    path = "/api/content/popular",
    tag = "content",
    params(FeedQuery),
    responses((status = 200, description = "Public presentations ranked by views + 2 x downloads"))
)]
pub async fn popular_presentations(data: web::Data<AppState>, query: web::Query<FeedQuery>) -> Result<HttpResponse, ApiError> {
    let filters = PresentationFilters {
        sort: SortKey::Popularity,
        limit: Some(query.limit()),
        ..Default::default()
    };
    let views: Vec<PresentationView> =
        data.repo.list_presentations(&filters).await?.into_iter().map(PresentationView::from).collect();
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": views,
        "timeframe": Timeframe::parse(query.timeframe.as_deref()).as_str(),
    })))
}

#[utoipa::path(
    get,
    path = "/api/content/admin/all",
    tag = "admin",
    params(ListQuery),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "All presentations, private ones included"),
        (status = 401, description = "Missing or invalid token", body = crate::error::ApiErrorBody),
        (status = 403, description = "Token lacks the admin role", body = crate::error::ApiErrorBody)
    )
)]
pub async fn admin_list_all(
    auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let filters = PresentationFilters { include_private: true, ..query.filters() };
    let total = data.repo.count_presentations(&filters).await?;
    let views: Vec<PresentationView> = data
        .repo
        .list_presentations(&filters)
        .await?
        .into_iter()
        .map(|p| PresentationView::from(p).for_admin())
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "success": true, "data": views, "total": total })))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    Update,
    Delete,
}

impl BulkAction {
    fn as_str(self) -> &'static str {
        match self {
            BulkAction::Update => "update",
            BulkAction::Delete => "delete",
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkRequest {
    pub action: BulkAction,
    pub presentation_ids: Vec<Id>,
    #[serde(default)]
    pub updates: Option<UpdatePresentation>,
}

#[derive(Debug, serde::Serialize, ToSchema)]
pub struct BulkItemResult {
    pub id: Id,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BulkItemResult {
    fn from_outcome(id: Id, outcome: Result<(), RepoError>) -> Self {
        match outcome {
            Ok(()) => Self { id, success: true, error: None },
            Err(RepoError::NotFound) => Self { id, success: false, error: Some("Presentation not found".into()) },
            Err(e) => {
                tracing::error!(presentation_id = %id, "bulk item failed: {e}");
                Self { id, success: false, error: Some(e.to_string()) }
            }
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/content/admin/bulk",
    tag = "admin",
    request_body = BulkRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Per id outcome", body = [BulkItemResult]),
        (status = 400, description = "Unknown action or missing updates", body = crate::error::ApiErrorBody),
        (status = 401, description = "Missing or invalid token", body = crate::error::ApiErrorBody),
        (status = 403, description = "Token lacks the admin role", body = crate::error::ApiErrorBody)
    )
)]
pub async fn admin_bulk(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<BulkRequest>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let BulkRequest { action, presentation_ids, updates } = payload.into_inner();
    let mut results = Vec::with_capacity(presentation_ids.len());
    match action {
        BulkAction::Update => {
            let updates = match updates {
                Some(u) if !u.is_empty() => u,
                _ => return Err(ApiError::bad_request("updates_required", "updates with at least one valid field are required")),
            };
            updates
                .validate()
                .map_err(|field| ApiError::bad_request("missing_fields", format!("{field} cannot be empty")))?;
            for id in presentation_ids {
                let outcome = data.repo.update_presentation(&id, updates.clone()).await.map(|_| ());
                results.push(BulkItemResult::from_outcome(id, outcome));
            }
        }
        BulkAction::Delete => {
            for id in presentation_ids {
                let outcome = remove_presentation(&*data.repo, &data.store, &id).await;
                results.push(BulkItemResult::from_outcome(id, outcome));
            }
        }
    }
    let succeeded = results.iter().filter(|r| r.success).count();
    info!(action = action.as_str(), succeeded, total = results.len(), admin = %auth.0.sub, "bulk operation");
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": format!("Bulk {} completed", action.as_str()),
        "results": results,
    })))
}
