//! Image asset store: metadata rows in SQLite, image bytes as files under a
//! storage root, and an axum router exposing both.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

pub use models::image::{
    ImageLookup, ImageQuery, ImageRecord, ImageView, InsertedImage, NewImage, PageRequest,
};
pub use services::image_service::{ImageError, ImageErrorKind, ImageResult, ImageService};
