#![allow(dead_code)] // each test binary uses a different subset

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use folio::auth::{AdminCredentials, AuthKeys, Role};
use folio::config::UploadLimits;
use folio::models::NewPresentation;
use folio::repo::sqlite::{self, SqliteRepo};
use folio::storage::DiskStore;
use folio::AppState;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;

pub const SECRET: &str = "test-secret-must-be-32-bytes-long!!";
pub const ADMIN_USER: &str = "admin";
pub const ADMIN_PASS: &str = "correct horse battery staple";

/// Fresh database and uploads root under one temp dir. Dropping it removes everything.
pub struct TestEnv {
    pub dir: TempDir,
    pub db_url: String,
    pub repo: Arc<SqliteRepo>,
    pub state: AppState,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_limits(UploadLimits::default()).await
    }

    pub async fn with_limits(limits: UploadLimits) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_url = format!("sqlite://{}", dir.path().join("test.db").display());
        let pool = sqlite::connect(&db_url).await.unwrap();
        let repo = Arc::new(SqliteRepo::new(pool));
        let store = DiskStore::new(dir.path().join("uploads"));
        store.ensure_dirs().await.unwrap();
        let state = AppState {
            repo: repo.clone(),
            store,
            limits,
            auth: AuthKeys::new(SECRET),
            admin: Some(AdminCredentials::new(ADMIN_USER, ADMIN_PASS)),
            rate_limiter: None,
            trust_proxy: false,
        };
        Self { dir, db_url, repo, state }
    }

    pub fn uploads(&self) -> &Path {
        self.state.store.root()
    }

    /// Regular files under the uploads root and its thumbnails dir.
    pub fn stored_files(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for dir in [self.uploads().to_path_buf(), self.state.store.thumbnails_dir()] {
            for entry in std::fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_file() {
                    out.push(path);
                }
            }
        }
        out
    }

    pub fn admin_token(&self) -> String {
        self.state.auth.create_jwt(ADMIN_USER, vec![Role::Admin]).unwrap()
    }

    pub fn user_token(&self) -> String {
        self.state.auth.create_jwt("someone", vec![Role::User]).unwrap()
    }

    /// Writes `bytes` under the uploads root and returns the relative path.
    pub fn put_file(&self, name: &str, bytes: &[u8]) -> String {
        std::fs::write(self.uploads().join(name), bytes).unwrap();
        name.to_string()
    }
}

pub fn new_presentation(id: &str, title: &str) -> NewPresentation {
    NewPresentation {
        id: id.to_string(),
        title: title.to_string(),
        description: None,
        author: "Alice".to_string(),
        date_presented: None,
        category: "general".to_string(),
        tags: vec![],
        file_path: format!("files-{id}.pdf"),
        file_type: ".pdf".to_string(),
        file_size: 3,
        thumbnail_path: None,
        metadata: serde_json::json!({}),
        is_public: true,
    }
}

pub enum Part<'a> {
    Text(&'a str, &'a str),
    File { field: &'a str, name: &'a str, mime: &'a str, bytes: &'a [u8] },
}

pub const BOUNDARY: &str = "----folio-test-boundary";

/// Hand-built multipart body; returns (content-type, body).
pub fn multipart(parts: &[Part<'_>]) -> (String, Vec<u8>) {
    let mut body: Vec<u8> = Vec::new();
    for part in parts {
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
                );
            }
            Part::File { field, name, mime, bytes } => {
                body.extend_from_slice(
                    format!(
                        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{name}\"\r\nContent-Type: {mime}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
}

pub fn sample_pdf() -> Vec<u8> {
    b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\ntrailer\n<< /Root 1 0 R >>\n%%EOF".to_vec()
}

pub fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([200, 30, 60]));
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img).write_to(&mut Cursor::new(&mut out), ImageFormat::Png).unwrap();
    out
}
