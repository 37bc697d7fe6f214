//! Input checks run before any database or filesystem access.

use super::image_service::{ImageError, ImageResult};
use crate::models::image::{NewImage, PageRequest};

pub const MIN_PAGE_LIMIT: i64 = 1;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Image extensions accepted on insert, without the leading dot.
pub const ALLOWED_EXTENSIONS: [&str; 8] = [
    "gif", "jpg", "jpeg", "tif", "tiff", "png", "webp", "bmp",
];

pub fn ensure_name_valid(name: &str) -> ImageResult<()> {
    if name.is_empty() {
        return Err(ImageError::InvalidName);
    }
    Ok(())
}

/// The extension must be exactly `.` followed by an allowed name
/// (case-insensitive), so it can never smuggle a path separator into the
/// blob filename.
pub fn ensure_extension_valid(extension: &str) -> ImageResult<()> {
    let valid = extension.strip_prefix('.').is_some_and(|ext| {
        ALLOWED_EXTENSIONS
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(ext))
    });
    if valid {
        Ok(())
    } else {
        Err(ImageError::InvalidExtension(extension.to_string()))
    }
}

pub fn ensure_metadata_valid(metadata: &NewImage) -> ImageResult<()> {
    ensure_name_valid(&metadata.name)?;
    ensure_extension_valid(&metadata.extension)
}

pub fn ensure_page_valid(page: &PageRequest) -> ImageResult<()> {
    if !(MIN_PAGE_LIMIT..=MAX_PAGE_LIMIT).contains(&page.limit) {
        return Err(ImageError::InvalidLimit(page.limit));
    }
    if page.offset < 0 {
        return Err(ImageError::InvalidOffset(page.offset));
    }
    Ok(())
}

/// A public url is a blob filename: one path segment, no traversal, and
/// never a hidden (temporary) file.
pub fn ensure_url_safe(url: &str) -> ImageResult<()> {
    let invalid = url.is_empty()
        || url.starts_with('.')
        || url.contains("..")
        || url
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'/' || b == b'\\');
    if invalid {
        return Err(ImageError::InvalidUrl(url.to_string()));
    }
    Ok(())
}
