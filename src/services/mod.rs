pub mod identifier;
pub mod image_service;
pub mod validation;
