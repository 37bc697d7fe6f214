//! Represents an image asset: the persisted row and the caller-facing view.

use crate::services::image_service::ImageError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// A single row of the `images` table.
///
/// The row only carries metadata; the bytes live on disk under
/// `{storage_root}/{unique_name}{extension}`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct ImageRecord {
    /// Database-assigned identifier, never reused.
    pub id: i64,

    /// Display name without extension (usually the original file stem).
    pub name: String,

    /// Generated storage identifier, used as the blob filename stem.
    pub unique_name: String,

    /// Extension including the leading dot, e.g. `.png`.
    pub extension: String,
}

impl ImageRecord {
    /// Filename of the blob inside the storage root. Doubles as the public url.
    pub fn blob_file_name(&self) -> String {
        format!("{}{}", self.unique_name, self.extension)
    }

    /// Build the caller-facing view of this row.
    pub fn view(&self) -> ImageView {
        ImageView {
            id: self.id,
            name: format!("{}{}", self.name, self.extension),
            url: self.blob_file_name(),
        }
    }
}

/// What callers get back from reads. Nothing here is persisted as-is.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ImageView {
    pub id: i64,
    /// `name + extension`
    pub name: String,
    /// `unique_name + extension`
    pub url: String,
}

/// Caller-supplied metadata for a new image.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NewImage {
    pub name: String,
    pub extension: String,
}

impl NewImage {
    pub fn new(name: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extension: extension.into(),
        }
    }
}

/// Result of a successful insert.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct InsertedImage {
    pub id: i64,
}

/// Page window for listing. Bounds are checked by the service, not here.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: i64,
    pub offset: i64,
}

/// Lookup criteria accepted by `ImageService::get`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageQuery {
    ById(i64),
    Page(PageRequest),
}

/// Output of `ImageService::get`, one variant per query shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageLookup {
    Single(ImageView),
    Page(Vec<ImageView>),
}

impl TryFrom<Value> for ImageQuery {
    type Error = ImageError;

    /// Interpret loosely-typed criteria: an integer selects one image, an
    /// object with integer `limit` and `offset` selects a page.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match &value {
            Value::Number(n) => n
                .as_i64()
                .map(ImageQuery::ById)
                .ok_or_else(|| ImageError::UnexpectedArgument(value.to_string())),
            Value::Object(map) => {
                let limit = map.get("limit").and_then(Value::as_i64);
                let offset = map.get("offset").and_then(Value::as_i64);
                match (limit, offset) {
                    (Some(limit), Some(offset)) => {
                        Ok(ImageQuery::Page(PageRequest { limit, offset }))
                    }
                    _ => Err(ImageError::UnexpectedArgument(value.to_string())),
                }
            }
            _ => Err(ImageError::UnexpectedArgument(value.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn view_concatenates_name_and_url() {
        let record = ImageRecord {
            id: 7,
            name: "holiday".into(),
            unique_name: "AbC-_123".into(),
            extension: ".jpg".into(),
        };
        let view = record.view();
        assert_eq!(view.id, 7);
        assert_eq!(view.name, "holiday.jpg");
        assert_eq!(view.url, "AbC-_123.jpg");
    }

    #[test]
    fn query_from_json_shapes() {
        assert_eq!(ImageQuery::try_from(json!(3)).unwrap(), ImageQuery::ById(3));
        assert_eq!(
            ImageQuery::try_from(json!({"limit": 10, "offset": 0})).unwrap(),
            ImageQuery::Page(PageRequest {
                limit: 10,
                offset: 0
            })
        );
    }

    #[test]
    fn query_from_json_rejects_other_shapes() {
        for value in [
            json!("3"),
            json!(1.5),
            json!(null),
            json!([1, 2]),
            json!({"limit": 10}),
            json!({"limit": "10", "offset": 0}),
        ] {
            let err = ImageQuery::try_from(value).unwrap_err();
            assert!(matches!(err, ImageError::UnexpectedArgument(_)));
        }
    }
}
