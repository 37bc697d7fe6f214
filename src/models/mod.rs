//! Core data models for the image store.
//!
//! `ImageRecord` maps onto the `images` table via `sqlx::FromRow`; the other
//! types are the shapes callers pass in and get back.

pub mod image;
