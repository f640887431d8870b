//! Multipart upload intake: staging files on disk, validating the form, and registering the
//! result as one presentation with its file rows.

use std::collections::HashMap;

use actix_multipart::{Field, Multipart, MultipartError};
use actix_web::{web, HttpResponse};
use chrono::{NaiveDate, Utc};
use futures_util::TryStreamExt as _;
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt as _;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::UploadLimits;
use crate::error::ApiError;
use crate::models::*;
use crate::repo::Repo;
use crate::routes::{limited, AppState};
use crate::storage::{file_type_of, sanitize_file_name, DiskStore};
use crate::thumbnail;

pub const FILES_FIELD: &str = "files";
pub const VALIDATE_FIELD: &str = "file";
/// Number of extracted characters kept in the metadata blob.
pub const EXTRACTED_TEXT_PREFIX: usize = 5000;
const MAX_TEXT_FIELD_BYTES: usize = 64 * 1024;
/// Text parts accepted per request; the form only knows a handful of fields.
pub const MAX_TEXT_FIELDS: usize = 32;

pub const ALLOWED_MIME_TYPES: &[&str] = &[
    // documents
    "application/pdf",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.oasis.opendocument.presentation",
    // images
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/svg+xml",
    // archives
    "application/zip",
    "application/x-rar-compressed",
    "application/x-7z-compressed",
    // text
    "text/plain",
    "application/json",
    "text/markdown",
    // latex
    "application/x-tex",
    "text/x-tex",
];

pub fn is_allowed(mime_type: &str) -> bool {
    ALLOWED_MIME_TYPES.contains(&mime_type)
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No files uploaded")]
    NoFiles,
    #[error("File type {0} is not allowed")]
    DisallowedType(String),
    #[error("File exceeds the {limit} byte limit")]
    FileTooLarge { limit: usize },
    #[error("At most {0} files may be uploaded at once")]
    TooManyFiles(usize),
    #[error("Title and author are required")]
    MissingFields,
    #[error("Invalid date: {0}")]
    InvalidDate(String),
    #[error("Malformed multipart body: {0}")]
    Multipart(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MultipartError> for UploadError {
    fn from(e: MultipartError) -> Self {
        UploadError::Multipart(e.to_string())
    }
}

impl From<UploadError> for ApiError {
    fn from(e: UploadError) -> Self {
        let code = match &e {
            UploadError::NoFiles => "no_files",
            UploadError::DisallowedType(_) => "invalid_file_type",
            UploadError::FileTooLarge { .. } => "file_too_large",
            UploadError::TooManyFiles(_) => "too_many_files",
            UploadError::MissingFields => "missing_fields",
            UploadError::InvalidDate(_) => "invalid_date",
            UploadError::Multipart(_) => "invalid_multipart",
            UploadError::Io(err) => {
                tracing::error!("upload io error: {err}");
                return ApiError::Internal;
            }
        };
        ApiError::bad_request(code, e.to_string())
    }
}

/// One file written to the uploads root for the current request.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub original_name: String,
    /// Path relative to the uploads root.
    pub stored: String,
    pub mime_type: String,
    pub size: i64,
    pub sha256: String,
}

#[derive(Debug, Default)]
pub struct UploadForm {
    pub files: Vec<StagedFile>,
    pub fields: HashMap<String, Vec<String>>,
}

impl UploadForm {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.last()).map(String::as_str)
    }

    /// Deletes every staged file. Failures are logged only.
    pub async fn discard(&self, store: &DiskStore) {
        for file in &self.files {
            store.remove_best_effort(&file.stored).await;
        }
    }
}

/// Streams the multipart body to disk. File parts must arrive under `file_field`; their declared
/// mime type is checked before anything is written. On error every file already staged is removed.
pub async fn read_multipart(
    mut payload: Multipart,
    store: &DiskStore,
    limits: UploadLimits,
    file_field: &str,
) -> Result<UploadForm, UploadError> {
    let mut form = UploadForm::default();
    match collect_parts(&mut payload, store, limits, file_field, &mut form).await {
        Ok(()) => Ok(form),
        Err(e) => {
            form.discard(store).await;
            Err(e)
        }
    }
}

async fn collect_parts(
    payload: &mut Multipart,
    store: &DiskStore,
    limits: UploadLimits,
    file_field: &str,
    form: &mut UploadForm,
) -> Result<(), UploadError> {
    let mut text_fields = 0usize;
    while let Some(mut field) = payload.try_next().await? {
        let disposition = field.content_disposition();
        let name = disposition.get_name().unwrap_or_default().to_string();
        let file_name = disposition.get_filename().map(sanitize_file_name);

        let Some(original_name) = file_name else {
            text_fields += 1;
            if text_fields > MAX_TEXT_FIELDS {
                return Err(UploadError::Multipart(format!("more than {MAX_TEXT_FIELDS} form fields")));
            }
            let value = read_text(&mut field, &name).await?;
            form.fields.entry(name).or_default().push(value);
            continue;
        };
        if name != file_field {
            return Err(UploadError::Multipart(format!("unexpected file field '{name}'")));
        }
        if original_name.is_empty() {
            // empty file input
            while field.try_next().await?.is_some() {}
            continue;
        }
        if form.files.len() >= limits.max_files {
            return Err(UploadError::TooManyFiles(limits.max_files));
        }
        let mime_type = field
            .content_type()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        if !is_allowed(&mime_type) {
            return Err(UploadError::DisallowedType(mime_type));
        }

        tokio::fs::create_dir_all(store.root()).await?;
        let stored = store.staging_name(file_field, &original_name);
        let dest = store.resolve(&stored);
        // recorded before writing so a failed stream is cleaned up too
        form.files.push(StagedFile { original_name, stored, mime_type, size: 0, sha256: String::new() });
        let (size, sha256) = write_field(&mut field, &dest, limits.max_file_size).await?;
        if let Some(staged) = form.files.last_mut() {
            staged.size = size;
            staged.sha256 = sha256;
        }
    }
    Ok(())
}

async fn read_text(field: &mut Field, name: &str) -> Result<String, UploadError> {
    let mut value = Vec::new();
    while let Some(chunk) = field.try_next().await? {
        if value.len() + chunk.len() > MAX_TEXT_FIELD_BYTES {
            return Err(UploadError::Multipart(format!("field '{name}' is too large")));
        }
        value.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&value).into_owned())
}

async fn write_field(field: &mut Field, dest: &std::path::Path, max_size: usize) -> Result<(i64, String), UploadError> {
    let mut out = tokio::fs::File::create(dest).await?;
    let mut hasher = Sha256::new();
    let mut size = 0usize;
    while let Some(chunk) = field.try_next().await? {
        size += chunk.len();
        if size > max_size {
            return Err(UploadError::FileTooLarge { limit: max_size });
        }
        hasher.update(&chunk);
        out.write_all(&chunk).await?;
    }
    out.flush().await?;
    Ok((size as i64, format!("{:x}", hasher.finalize())))
}

/// Validated text fields of an upload form.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadMetadata {
    pub title: String,
    pub description: Option<String>,
    pub author: String,
    pub date_presented: Option<NaiveDate>,
    pub category: String,
    pub tags: Vec<String>,
    pub is_public: bool,
}

impl UploadMetadata {
    pub fn from_fields(fields: &HashMap<String, Vec<String>>) -> Result<Self, UploadError> {
        let last = |name: &str| {
            fields
                .get(name)
                .and_then(|v| v.last())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let (Some(title), Some(author)) = (last("title"), last("author")) else {
            return Err(UploadError::MissingFields);
        };
        let date_presented = last("date_presented").map(|d| parse_date(&d)).transpose()?;

        // `tags` carries comma separated text, `tags[]` one tag per part
        let mut tags = Vec::new();
        for csv in fields.get("tags").into_iter().flatten() {
            tags.extend(split_tags(csv));
        }
        tags.extend(normalize_tags(fields.get("tags[]").into_iter().flatten()));

        Ok(Self {
            title,
            author,
            description: last("description"),
            date_presented,
            category: last("category").unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            tags,
            is_public: last("is_public").as_deref() != Some("false"),
        })
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, UploadError> {
    parse_calendar_date(raw).ok_or_else(|| UploadError::InvalidDate(raw.to_string()))
}

/// Status recorded next to `extracted_text` in the metadata blob.
pub const TEXT_EXTRACTION_STATUS: &str = "not_implemented";

/// Extension point for document text extraction. No extractor is wired in, so this is always empty.
pub fn extract_text(_source: &std::path::Path, _mime_type: &str) -> String {
    String::new()
}

/// Turns a staged form into a presentation and its file rows. Staged files and the thumbnail
/// are removed when validation or the database write fails.
pub async fn register_upload(
    repo: &dyn Repo,
    store: &DiskStore,
    form: UploadForm,
    client: &ClientInfo,
) -> Result<(Presentation, Vec<FileRecord>), ApiError> {
    if form.files.is_empty() {
        return Err(UploadError::NoFiles.into());
    }
    let meta = match UploadMetadata::from_fields(&form.fields) {
        Ok(meta) => meta,
        Err(e) => {
            form.discard(store).await;
            return Err(e.into());
        }
    };

    let id = Uuid::new_v4().to_string();
    let primary = &form.files[0];
    let primary_path = store.resolve(&primary.stored);
    let thumb_name = store.thumbnail_name(&id);
    let thumbnail_kind = thumbnail::generate(&primary_path, &primary.mime_type, &store.resolve(&thumb_name)).await;
    let thumbnail_path = thumbnail_kind.map(|_| thumb_name);

    let extracted: String = extract_text(&primary_path, &primary.mime_type).chars().take(EXTRACTED_TEXT_PREFIX).collect();
    let checksums: Vec<&str> = form.files.iter().map(|f| f.sha256.as_str()).collect();
    let total_size: i64 = form.files.iter().map(|f| f.size).sum();
    let metadata = json!({
        "original_filename": primary.original_name,
        "mime_type": primary.mime_type,
        "extracted_text": extracted,
        "text_extraction": TEXT_EXTRACTION_STATUS,
        "thumbnail_kind": thumbnail_kind,
        "upload_timestamp": Utc::now().to_rfc3339(),
        "files_count": form.files.len(),
        "checksums": checksums,
    });

    let new = NewPresentation {
        id: id.clone(),
        title: meta.title,
        description: meta.description,
        author: meta.author,
        date_presented: meta.date_presented,
        category: meta.category,
        tags: meta.tags,
        file_path: primary.stored.clone(),
        file_type: file_type_of(&primary.original_name),
        file_size: primary.size,
        thumbnail_path: thumbnail_path.clone(),
        metadata,
        is_public: meta.is_public,
    };
    let files: Vec<NewFile> = form
        .files
        .iter()
        .enumerate()
        .map(|(i, f)| NewFile {
            id: Uuid::new_v4().to_string(),
            presentation_id: id.clone(),
            original_name: f.original_name.clone(),
            file_path: f.stored.clone(),
            file_type: file_type_of(&f.original_name),
            file_size: f.size,
            mime_type: f.mime_type.clone(),
            is_primary: i == 0,
        })
        .collect();

    let presentation = match repo.create_upload(new, files).await {
        Ok(p) => p,
        Err(e) => {
            form.discard(store).await;
            if let Some(thumb) = &thumbnail_path {
                store.remove_best_effort(thumb).await;
            }
            return Err(e.into());
        }
    };

    let event = NewEvent::new(EventKind::Upload, Some(&presentation.id), client)
        .with_metadata(json!({ "files_count": form.files.len(), "total_size": total_size }));
    if let Err(e) = repo.record_event(event).await {
        warn!(presentation_id = %presentation.id, "upload event not recorded: {e}");
    }
    info!(presentation_id = %presentation.id, files = form.files.len(), total_size, "presentation uploaded");

    let records = repo.list_files(&presentation.id).await?;
    Ok((presentation, records))
}

/// Multipart layout of `POST /api/upload` as documented in the OpenAPI schema.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadRequest {
    /// One to five files; the first becomes the primary file
    #[schema(value_type = Vec<String>, format = Binary)]
    files: Vec<Vec<u8>>,
    title: String,
    author: String,
    description: Option<String>,
    /// `YYYY-MM-DD` or RFC 3339
    date_presented: Option<String>,
    category: Option<String>,
    /// Comma separated; repeated `tags[]` parts are accepted too
    tags: Option<String>,
    /// Only the literal `false` makes the upload private
    is_public: Option<String>,
}

#[derive(ToSchema)]
#[allow(dead_code)]
pub struct ValidateRequest {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

#[utoipa::path(
    post,
    path = "/api/upload",
    tag = "upload",
    request_body(content = UploadRequest, content_type = "multipart/form-data", description = "Files plus presentation metadata"),
    responses(
        (status = 201, description = "Presentation created"),
        (status = 400, description = "Invalid upload", body = crate::error::ApiErrorBody),
        (status = 429, description = "Too many uploads", body = crate::error::ApiErrorBody)
    )
)]
pub async fn upload_presentation(
    data: web::Data<AppState>,
    client: ClientInfo,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    if let Some(rl) = &data.rate_limiter {
        rl.allow_upload(client.rate_key()).map_err(limited)?;
    }
    let form = read_multipart(payload, &data.store, data.limits, FILES_FIELD).await?;
    let (presentation, files) = register_upload(&*data.repo, &data.store, form, &client).await?;
    let files: Vec<FileView> = files.into_iter().map(FileView::from).collect();
    Ok(HttpResponse::Created().json(json!({
        "success": true,
        "message": "Presentation uploaded successfully",
        "data": {
            "presentation": {
                "id": presentation.id,
                "title": presentation.title,
                "description": presentation.description,
                "author": presentation.author,
                "category": presentation.category,
                "tags": presentation.tags,
                "thumbnail": presentation.thumbnail_url(),
                "created_at": presentation.date_created,
            },
            "files": files,
        }
    })))
}

#[utoipa::path(
    post,
    path = "/api/upload/validate",
    tag = "upload",
    request_body(content = ValidateRequest, content_type = "multipart/form-data", description = "Single `file` part"),
    responses(
        (status = 200, description = "File accepted"),
        (status = 400, description = "File rejected", body = crate::error::ApiErrorBody)
    )
)]
pub async fn validate_upload(data: web::Data<AppState>, payload: Multipart) -> Result<HttpResponse, ApiError> {
    let limits = UploadLimits { max_files: 1, ..data.limits };
    let form = read_multipart(payload, &data.store, limits, VALIDATE_FIELD).await?;
    let Some(candidate) = form.files.first() else {
        return Err(UploadError::NoFiles.into());
    };
    let detected = match infer::get_from_path(data.store.resolve(&candidate.stored)) {
        Ok(kind) => kind.map(|k| k.mime_type().to_string()),
        Err(e) => {
            warn!("could not sniff uploaded file: {e}");
            None
        }
    };
    let body = json!({
        "success": true,
        "valid": true,
        "message": "File is valid",
        "fileInfo": {
            "originalName": candidate.original_name,
            "mimeType": candidate.mime_type,
            "size": candidate.size,
            "detectedMimeType": detected,
        }
    });
    form.discard(&data.store).await;
    Ok(HttpResponse::Ok().json(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (k, v) in pairs {
            map.entry(k.to_string()).or_default().push(v.to_string());
        }
        map
    }

    #[test]
    fn metadata_defaults() {
        let meta = UploadMetadata::from_fields(&fields(&[("title", " Intro "), ("author", "Alice")])).unwrap();
        assert_eq!(meta.title, "Intro");
        assert_eq!(meta.category, "general");
        assert!(meta.is_public);
        assert!(meta.tags.is_empty());
        assert_eq!(meta.date_presented, None);
    }

    #[test]
    fn metadata_requires_title_and_author() {
        let err = UploadMetadata::from_fields(&fields(&[("title", "x"), ("author", "   ")])).unwrap_err();
        assert!(matches!(err, UploadError::MissingFields));
    }

    #[test]
    fn only_literal_false_hides() {
        let base = [("title", "t"), ("author", "a")];
        for (raw, expected) in [("false", false), ("0", true), ("no", true), ("true", true)] {
            let mut f = fields(&base);
            f.insert("is_public".into(), vec![raw.into()]);
            assert_eq!(UploadMetadata::from_fields(&f).unwrap().is_public, expected, "{raw}");
        }
    }

    #[test]
    fn tags_from_csv_and_list_parts() {
        let meta = UploadMetadata::from_fields(&fields(&[
            ("title", "t"),
            ("author", "a"),
            ("tags", "rust, web ,,"),
            ("tags[]", " db "),
            ("tags[]", "rust"),
        ]))
        .unwrap();
        assert_eq!(meta.tags, vec!["rust", "web", "db", "rust"]);
    }

    #[test]
    fn dates() {
        assert_eq!(parse_date("2024-03-01").unwrap(), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(parse_date("2024-03-01T10:00:00Z").unwrap(), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert!(matches!(parse_date("next tuesday"), Err(UploadError::InvalidDate(_))));
    }

    #[test]
    fn allow_list() {
        assert!(is_allowed("application/pdf"));
        assert!(is_allowed("text/x-tex"));
        assert!(!is_allowed("application/x-msdownload"));
        assert_eq!(ALLOWED_MIME_TYPES.len(), 17);
    }
}
