use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value; // tags / metadata blobs
use utoipa::ToSchema;

// Presentations, files and comments use uuid v4 text ids; analytics rows are autoincrement.
pub type Id = String;

pub const DEFAULT_CATEGORY: &str = "general";

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Presentation {
    pub id: Id,
    pub title: String,
    pub description: Option<String>,
    pub author: String,
    pub date_created: DateTime<Utc>,
    pub date_presented: Option<NaiveDate>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    #[serde(skip_serializing)]
    pub file_path: String, // server-local, relative to the uploads root
    pub file_type: String,
    pub file_size: i64,
    #[serde(skip_serializing)]
    pub thumbnail_path: Option<String>, // server-local, relative to the uploads root
    #[schema(value_type = Object)]
    pub metadata: Value,
    pub is_public: bool,
    pub view_count: i64,
    pub download_count: i64,
}

impl Presentation {
    /// Public URL of the thumbnail, derived from the stored file name only.
    pub fn thumbnail_url(&self) -> Option<String> {
        let stored = self.thumbnail_path.as_deref()?;
        let name = std::path::Path::new(stored).file_name()?.to_str()?;
        Some(format!("/api/thumbnails/{name}"))
    }
    pub fn download_url(&self) -> String { format!("/api/presentations/{}/download", self.id) }
    pub fn view_url(&self) -> String { format!("/api/presentations/{}", self.id) }
}

#[derive(Debug, Clone)]
pub struct NewPresentation {
    pub id: Id,
    pub title: String,
    pub description: Option<String>,
    pub author: String,
    pub date_presented: Option<NaiveDate>,
    pub category: String,
    pub tags: Vec<String>,
    pub file_path: String,
    pub file_type: String,
    pub file_size: i64,
    pub thumbnail_path: Option<String>,
    pub metadata: Value,
    pub is_public: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema, sqlx::FromRow)]
pub struct FileRecord {
    pub id: Id,
    pub presentation_id: Option<Id>,
    pub original_name: String,
    #[serde(skip_serializing)]
    pub file_path: String,
    pub file_type: String,
    pub file_size: i64,
    pub mime_type: Option<String>,
    pub upload_date: DateTime<Utc>,
    pub is_primary: bool,
}

impl FileRecord {
    pub fn download_url(&self) -> String { format!("/api/files/{}/download", self.id) }
}

#[derive(Debug, Clone)]
pub struct NewFile {
    pub id: Id,
    pub presentation_id: Id,
    pub original_name: String,
    pub file_path: String,
    pub file_type: String,
    pub file_size: i64,
    pub mime_type: String,
    pub is_primary: bool,
}

// No route reads or writes comments; the table exists so cascades have something to act on.
#[derive(Debug, Clone, Serialize, ToSchema, sqlx::FromRow)]
pub struct Comment {
    pub id: Id,
    pub presentation_id: Id,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub content: String,
    pub date_created: DateTime<Utc>,
    pub is_approved: bool,
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub presentation_id: Id,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub content: String,
}

/// Event kinds emitted by the API. Storage keeps `event_type` as free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    View,
    Download,
    Upload,
    Search,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::View => "view",
            EventKind::Download => "download",
            EventKind::Upload => "upload",
            EventKind::Search => "search",
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AnalyticsEvent {
    pub id: i64,
    pub presentation_id: Option<Id>,
    pub event_type: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[schema(value_type = Object)]
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub presentation_id: Option<Id>,
    pub event_type: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub metadata: Value,
}

impl NewEvent {
    pub fn new(kind: EventKind, presentation_id: Option<&str>, client: &ClientInfo) -> Self {
        Self {
            presentation_id: presentation_id.map(str::to_string),
            event_type: kind.as_str().to_string(),
            user_agent: client.user_agent.clone(),
            ip_address: client.ip.clone(),
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Request-level caller details attached to analytics events.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

impl ClientInfo {
    /// Key for per-client rate limiting.
    pub fn rate_key(&self) -> &str { self.ip.as_deref().unwrap_or("unknown") }
}

/// One aggregated analytics row: events of one type on one calendar day.
#[derive(Debug, Clone, Serialize, ToSchema, sqlx::FromRow)]
pub struct DailyStat {
    pub event_type: String,
    pub date: String,
    pub count: i64,
}

/// Lookback window for analytics queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Timeframe {
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
    #[serde(rename = "1y")]
    Year,
}

impl Default for Timeframe {
    fn default() -> Self { Timeframe::Month }
}

impl Timeframe {
    /// Unknown or missing tokens fall back to 30 days.
    pub fn parse(token: Option<&str>) -> Self {
        match token.map(str::trim) {
            Some("7d") => Timeframe::Week,
            Some("90d") => Timeframe::Quarter,
            Some("1y") => Timeframe::Year,
            _ => Timeframe::Month,
        }
    }

    pub fn days(self) -> i64 {
        match self {
            Timeframe::Week => 7,
            Timeframe::Month => 30,
            Timeframe::Quarter => 90,
            Timeframe::Year => 365,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::Week => "7d",
            Timeframe::Month => "30d",
            Timeframe::Quarter => "90d",
            Timeframe::Year => "1y",
        }
    }

    pub fn cutoff(self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::days(self.days())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    DateCreated,
    Title,
    Views,
    Downloads,
    /// views + 2 * downloads
    Popularity,
}

impl SortKey {
    pub fn parse(token: Option<&str>) -> Self {
        match token {
            Some("title") => SortKey::Title,
            Some("view_count") | Some("views") => SortKey::Views,
            Some("download_count") | Some("downloads") => SortKey::Downloads,
            Some("popularity") => SortKey::Popularity,
            _ => SortKey::DateCreated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(token: Option<&str>) -> Self {
        match token.map(|t| t.to_ascii_lowercase()) {
            Some(t) if t == "asc" => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }
}

/// Listing filters accepted by the query layer.
#[derive(Debug, Clone, Default)]
pub struct PresentationFilters {
    pub category: Option<String>,
    pub author: Option<String>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub sort: SortKey,
    pub order: SortOrder,
    /// Admin bypass of the public-only rule.
    pub include_private: bool,
}

/// Allow-listed mutable fields. Unknown keys in the request body are ignored.
///
/// The nullable columns use a double option: an absent key leaves the column alone,
/// an explicit `null` clears it.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdatePresentation {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub author: Option<String>,
    /// `YYYY-MM-DD` or RFC 3339
    #[serde(default, deserialize_with = "nullable_date")]
    #[schema(value_type = Option<String>, format = Date)]
    pub date_presented: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<String>)]
    pub category: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub is_public: Option<bool>,
}

impl UpdatePresentation {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.author.is_none()
            && self.date_presented.is_none()
            && self.category.is_none()
            && self.tags.is_none()
            && self.is_public.is_none()
    }

    /// Rejects blanking the required fields. Returns the offending field name.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.title.as_deref().is_some_and(|t| t.trim().is_empty()) { return Err("title"); }
        if self.author.as_deref().is_some_and(|a| a.trim().is_empty()) { return Err("author"); }
        Ok(())
    }
}

/// Only runs for keys that are present, so `null` becomes `Some(None)`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn nullable_date<'de, D>(deserializer: D) -> Result<Option<Option<NaiveDate>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(Some(None)),
        Some(raw) if raw.trim().is_empty() => Ok(Some(None)),
        Some(raw) => parse_calendar_date(&raw)
            .map(|d| Some(Some(d)))
            .ok_or_else(|| serde::de::Error::custom(format!("invalid date '{raw}', expected YYYY-MM-DD or RFC 3339"))),
    }
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp (reduced to its date).
pub fn parse_calendar_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|d| d.date_naive()))
}

/// Accepts either a JSON list or a comma separated string.
fn deserialize_tags<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Tags {
        List(Vec<String>),
        Csv(String),
    }
    Ok(Option::<Tags>::deserialize(deserializer)?.map(|t| match t {
        Tags::List(items) => normalize_tags(items),
        Tags::Csv(csv) => split_tags(&csv),
    }))
}

/// Trims every tag and drops empty entries. Order and duplicates are kept.
pub fn normalize_tags<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

pub fn split_tags(csv: &str) -> Vec<String> { normalize_tags(csv.split(',')) }

#[derive(Debug, Clone, Serialize, ToSchema, sqlx::FromRow)]
pub struct CategorySummary {
    pub name: String,
    pub count: i64,
    pub latest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema, sqlx::FromRow)]
pub struct ContentTotals {
    pub total_presentations: i64,
    pub total_views: i64,
    pub total_downloads: i64,
}

// ---------------- response views -----------------------------------

/// Presentation as sent to clients: server paths stripped, public URLs added.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PresentationView {
    #[serde(flatten)]
    pub presentation: Presentation,
    pub thumbnail: Option<String>,
    pub download_url: String,
    pub view_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileView>>,
}

impl From<Presentation> for PresentationView {
    fn from(presentation: Presentation) -> Self {
        Self {
            thumbnail: presentation.thumbnail_url(),
            download_url: presentation.download_url(),
            view_url: presentation.view_url(),
            file_url: None,
            files: None,
            presentation,
        }
    }
}

impl PresentationView {
    pub fn with_files(mut self, files: Vec<FileRecord>) -> Self {
        self.files = Some(files.into_iter().map(FileView::from).collect());
        self
    }

    /// Admin listings expose the primary file download link under `file_url` as well.
    pub fn for_admin(mut self) -> Self {
        self.file_url = Some(self.download_url.clone());
        self
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FileView {
    #[serde(flatten)]
    pub file: FileRecord,
    pub download_url: String,
}

impl From<FileRecord> for FileView {
    fn from(file: FileRecord) -> Self {
        Self { download_url: file.download_url(), file }
    }
}
