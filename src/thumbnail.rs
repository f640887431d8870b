//! Preview images for the primary file of an upload.
//!
//! Images are scaled down to fit 200x150 and re-encoded as JPEG. PDFs get a flat placeholder
//! until page rendering exists; every other type gets no thumbnail.

use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

pub const THUMB_WIDTH: u32 = 200;
pub const THUMB_HEIGHT: u32 = 150;
pub const JPEG_QUALITY: u8 = 80;
const PLACEHOLDER_GREY: Rgb<u8> = Rgb([240, 240, 240]);

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("decode: {0}")]
    Image(#[from] image::ImageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("worker: {0}")]
    Blocking(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailKind {
    /// Downscaled copy of an image upload.
    Resized,
    /// Flat stand-in for PDFs; real page rendering is not implemented.
    Placeholder,
}

/// Which strategy applies to a declared mime type.
pub fn plan(mime_type: &str) -> Option<ThumbnailKind> {
    if mime_type.starts_with("image/") {
        Some(ThumbnailKind::Resized)
    } else if mime_type == "application/pdf" {
        Some(ThumbnailKind::Placeholder)
    } else {
        None
    }
}

/// Target size fitting inside `max_w` x `max_h` with the aspect ratio kept. Never upscales.
pub fn fit_within(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if width == 0 || height == 0 || (width <= max_w && height <= max_h) {
        return (width, height);
    }
    let scale = f64::min(max_w as f64 / width as f64, max_h as f64 / height as f64);
    let w = ((width as f64 * scale).round() as u32).clamp(1, max_w);
    let h = ((height as f64 * scale).round() as u32).clamp(1, max_h);
    (w, h)
}

pub fn render_resized(source: &[u8]) -> Result<Vec<u8>, ThumbnailError> {
    let img = image::load_from_memory(source)?;
    let (w, h) = fit_within(img.width(), img.height(), THUMB_WIDTH, THUMB_HEIGHT);
    let scaled = if (w, h) == (img.width(), img.height()) { img } else { img.resize_exact(w, h, FilterType::Lanczos3) };
    encode_jpeg(&scaled)
}

/// Stand-in for PDF first-page rendering.
pub fn render_pdf_placeholder() -> Result<Vec<u8>, ThumbnailError> {
    let canvas = RgbImage::from_pixel(THUMB_WIDTH, THUMB_HEIGHT, PLACEHOLDER_GREY);
    encode_jpeg(&DynamicImage::ImageRgb8(canvas))
}

fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>, ThumbnailError> {
    // JPEG has no alpha channel
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(Cursor::new(&mut buf), JPEG_QUALITY);
    encoder.encode_image(&rgb)?;
    Ok(buf)
}

/// Renders the thumbnail for `source` into `dest`. Failures are logged and yield `None`;
/// an upload never fails because of its preview.
pub async fn generate(source: &Path, mime_type: &str, dest: &Path) -> Option<ThumbnailKind> {
    let kind = plan(mime_type)?;
    match write_thumbnail(kind, source, dest).await {
        Ok(()) => Some(kind),
        Err(e) => {
            error!(source = %source.display(), mime_type, "thumbnail generation failed: {e}");
            if tokio::fs::metadata(dest).await.is_ok() {
                if let Err(e) = tokio::fs::remove_file(dest).await {
                    warn!("could not remove partial thumbnail '{}': {e}", dest.display());
                }
            }
            None
        }
    }
}

async fn write_thumbnail(kind: ThumbnailKind, source: &Path, dest: &Path) -> Result<(), ThumbnailError> {
    let bytes = match kind {
        ThumbnailKind::Resized => {
            let original = tokio::fs::read(source).await?;
            actix_web::web::block(move || render_resized(&original))
                .await
                .map_err(|e| ThumbnailError::Blocking(e.to_string()))??
        }
        ThumbnailKind::Placeholder => actix_web::web::block(render_pdf_placeholder)
            .await
            .map_err(|e| ThumbnailError::Blocking(e.to_string()))??,
    };
    if let Some(dir) = dest.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(dest, bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_keeps_aspect_and_never_upscales() {
        assert_eq!(fit_within(400, 300, 200, 150), (200, 150));
        assert_eq!(fit_within(1000, 100, 200, 150), (200, 20));
        assert_eq!(fit_within(100, 1000, 200, 150), (15, 150));
        assert_eq!(fit_within(50, 40, 200, 150), (50, 40));
    }

    #[test]
    fn plan_by_mime() {
        assert_eq!(plan("image/png"), Some(ThumbnailKind::Resized));
        assert_eq!(plan("application/pdf"), Some(ThumbnailKind::Placeholder));
        assert_eq!(plan("application/zip"), None);
    }

    #[test]
    fn placeholder_is_a_200x150_jpeg() {
        let bytes = render_pdf_placeholder().unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (200, 150));
        assert_eq!(infer::get(&bytes).unwrap().mime_type(), "image/jpeg");
    }

    #[test]
    fn resized_fits_box() {
        let src = RgbImage::from_pixel(800, 300, Rgb([10, 20, 30]));
        let mut png = Vec::new();
        DynamicImage::ImageRgb8(src).write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png).unwrap();
        let out = image::load_from_memory(&render_resized(&png).unwrap()).unwrap();
        assert_eq!((out.width(), out.height()), (200, 75));
    }
}
