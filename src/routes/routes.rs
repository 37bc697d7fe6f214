//! Defines routes for all image operations.
//!
//! ## Structure
//! - **Collection endpoints**
//!   - `GET    /images` — list images (supports limit, offset)
//!   - `POST   /images` — upload an image (multipart, field `file`)
//!
//! - **Image endpoints**
//!   - `GET    /images/{id}` — image view
//!   - `PUT    /images/{id}` — replace content with the request body
//!   - `DELETE /images/{id}` — remove image
//!
//! - **Blobs**
//!   - `GET    /static/{url}` — image bytes, `url` as returned in views

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        image_handlers::{
            MAX_UPLOAD_BYTES, delete_image, get_image, list_images, replace_image, serve_blob,
            upload_image,
        },
    },
    services::image_service::ImageService,
};
use axum::{Router, extract::DefaultBodyLimit, routing::get};

/// Build and return the router for all image routes.
///
/// The router carries shared state (`ImageService`) to all handlers.
/// `DefaultBodyLimit` caps multipart uploads; `replace_image` applies the
/// same cap to its raw body itself.
pub fn routes() -> Router<ImageService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/images", get(list_images).post(upload_image))
        .route(
            "/images/{id}",
            get(get_image).put(replace_image).delete(delete_image),
        )
        .route("/static/{url}", get(serve_blob))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}
