use crate::analytics::{DayCount, EventSeries};
use crate::content::{BulkAction, BulkItemResult, BulkRequest};
use crate::error::ApiErrorBody;
use crate::models::{
    AnalyticsEvent, CategorySummary, ContentTotals, DailyStat, FileRecord, FileView, Presentation, PresentationView,
    Timeframe, UpdatePresentation,
};
use crate::routes::LoginRequest;
use crate::upload::{UploadRequest, ValidateRequest};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_presentations,
        crate::routes::search_presentations,
        crate::routes::get_presentation,
        crate::routes::update_presentation,
        crate::routes::delete_presentation,
        crate::routes::download_presentation,
        crate::routes::presentation_analytics,
        crate::routes::download_file,
        crate::routes::get_thumbnail,
        crate::routes::login,
        crate::routes::health,
        crate::upload::upload_presentation,
        crate::upload::validate_upload,
        crate::content::content_stats,
        crate::content::list_categories,
        crate::content::recent_presentations,
        crate::content::popular_presentations,
        crate::content::admin_list_all,
        crate::content::admin_bulk,
    ),
    components(schemas(
        Presentation, PresentationView, FileRecord, FileView, UpdatePresentation,
        AnalyticsEvent, DailyStat, Timeframe, CategorySummary, ContentTotals,
        DayCount, EventSeries, BulkAction, BulkRequest, BulkItemResult,
        LoginRequest, UploadRequest, ValidateRequest, ApiErrorBody
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "presentations", description = "Browse, fetch, edit and delete presentations"),
        (name = "upload", description = "Multipart upload and validation"),
        (name = "analytics", description = "Per presentation event statistics"),
        (name = "content", description = "Catalogue aggregates and thumbnails"),
        (name = "admin", description = "Admin only listing and bulk operations"),
        (name = "auth", description = "Admin login"),
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("JWT").build()),
            );
        }
    }
}
