use log::{info, warn};
use rand::Rng;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not_found")]
    NotFound,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub const THUMBNAILS_DIR: &str = "thumbnails";

/// Uploaded originals live directly under `root`, generated previews under `root/thumbnails`.
/// Paths handed to the database are relative to `root`.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path { &self.root }

    pub fn thumbnails_dir(&self) -> PathBuf { self.root.join(THUMBNAILS_DIR) }

    pub async fn ensure_dirs(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(self.thumbnails_dir()).await?;
        info!("upload directories ready under '{}'", self.root.display());
        Ok(())
    }

    /// Fresh relative path `<field>-<millis>-<random><.ext>` for an incoming file.
    pub fn staging_name(&self, field: &str, original_name: &str) -> String {
        let millis = chrono::Utc::now().timestamp_millis();
        let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
        let ext = storage_extension(original_name);
        format!("{field}-{millis}-{suffix}{ext}")
    }

    /// Relative path of the thumbnail for one presentation.
    pub fn thumbnail_name(&self, presentation_id: &str) -> String {
        format!("{THUMBNAILS_DIR}/thumb-{presentation_id}.jpg")
    }

    /// Absolute (or cwd-relative) location of a stored relative path.
    pub fn resolve(&self, stored: &str) -> PathBuf {
        let p = Path::new(stored);
        if p.is_absolute() { p.to_path_buf() } else { self.root.join(p) }
    }

    /// Opens a stored regular file for streaming.
    pub async fn open(&self, stored: &str) -> Result<tokio::fs::File, StoreError> {
        let file = match tokio::fs::File::open(self.resolve(stored)).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StoreError::NotFound),
            Err(e) => return Err(e.into()),
        };
        if !file.metadata().await?.is_file() {
            return Err(StoreError::NotFound);
        }
        Ok(file)
    }

    pub async fn read(&self, stored: &str) -> Result<Vec<u8>, StoreError> {
        match tokio::fs::read(self.resolve(stored)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads a thumbnail by bare file name; anything that is not a plain name is not found.
    pub async fn read_thumbnail(&self, file_name: &str) -> Result<Vec<u8>, StoreError> {
        if !is_plain_file_name(file_name) {
            return Err(StoreError::NotFound);
        }
        self.read(&format!("{THUMBNAILS_DIR}/{file_name}")).await
    }

    /// Removes a stored file. Failures are logged and swallowed.
    pub async fn remove_best_effort(&self, stored: &str) {
        let path = self.resolve(stored);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!("could not delete file '{}': {e}", path.display());
        }
    }
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!((components.next(), components.next()), (Some(Component::Normal(_)), None))
        && !name.contains('\\')
}

/// Extension of the client file name, kept for the stored copy (`.pdf`), empty when absent
/// or not purely alphanumeric.
fn storage_extension(original_name: &str) -> String {
    match Path::new(original_name).extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => format!(".{ext}"),
        _ => String::new(),
    }
}

/// Lower-cased extension with leading dot, as recorded in `file_type`.
pub fn file_type_of(original_name: &str) -> String {
    storage_extension(original_name).to_ascii_lowercase()
}

/// Client supplied names may carry directories (old browsers send full paths).
pub fn sanitize_file_name(raw: &str) -> String {
    raw.rsplit(['/', '\\']).next().unwrap_or_default().trim().to_string()
}
