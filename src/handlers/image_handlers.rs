//! HTTP handlers for image operations.
//! Upload bodies are streamed into `ImageService` without buffering, and
//! blobs are streamed back out of the storage root.

use crate::{
    errors::AppError,
    models::image::{ImageView, NewImage, PageRequest},
    services::image_service::{ImageError, ImageService},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use http_body_util::{LengthLimitError, Limited};
use serde::Deserialize;
use std::io;
use tokio_util::io::ReaderStream;

/// Largest accepted upload body, for both multipart uploads and raw replaces.
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Page size used when `GET /images` is called without `limit`.
pub const DEFAULT_PAGE_LIMIT: i64 = 20;

/// Query params accepted by `GET /images`.
#[derive(Debug, Deserialize)]
pub struct ListImagesQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET `/images` — list images, supports ?limit=&offset=
pub async fn list_images(
    State(service): State<ImageService>,
    Query(q): Query<ListImagesQuery>,
) -> Result<Json<Vec<ImageView>>, AppError> {
    let page = PageRequest {
        limit: q.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        offset: q.offset.unwrap_or(0),
    };
    Ok(Json(service.list_page(page).await?))
}

/// GET `/images/{id}`
pub async fn get_image(
    State(service): State<ImageService>,
    Path(id): Path<i64>,
) -> Result<Json<ImageView>, AppError> {
    Ok(Json(service.get_by_id(id).await?))
}

/// POST `/images` — multipart upload.
///
/// The `file` field carries the bytes; its filename supplies the display
/// name and extension. A `name` field sent before `file` overrides the
/// display name.
pub async fn upload_image(
    State(service): State<ImageService>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut display_name: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?
    {
        let field_name = field.name().map(str::to_owned);
        match field_name.as_deref() {
            Some("name") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(err.to_string()))?;
                display_name = Some(text);
            }
            Some("file") => {
                let file_name = field
                    .file_name()
                    .map(str::to_owned)
                    .ok_or_else(|| AppError::bad_request("field `file` has no filename"))?;
                let (stem, extension) = split_file_name(&file_name);
                let metadata = NewImage::new(display_name.take().unwrap_or(stem), extension);

                let stream = field
                    .map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)));
                let inserted = service.insert(metadata, stream).await?;
                return Ok((StatusCode::CREATED, Json(inserted)));
            }
            _ => {}
        }
    }

    Err(AppError::bad_request("missing multipart field `file`"))
}

/// PUT `/images/{id}` — replace the content with the raw request body.
///
/// Bodies over `MAX_UPLOAD_BYTES` get 413 and the stored content stays as it
/// was.
pub async fn replace_image(
    State(service): State<ImageService>,
    Path(id): Path<i64>,
    body: Body,
) -> Result<StatusCode, AppError> {
    let stream = Body::new(Limited::new(body, MAX_UPLOAD_BYTES))
        .into_data_stream()
        .map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)));

    match service.update(id, stream).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(ImageError::Io(err)) if exceeds_length_limit(&err) => Err(AppError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("request body exceeds {MAX_UPLOAD_BYTES} bytes"),
        )),
        Err(err) => Err(err.into()),
    }
}

/// True if `err` was raised by the `Limited` body wrapper.
fn exceeds_length_limit(err: &io::Error) -> bool {
    let mut source = err
        .get_ref()
        .map(|inner| inner as &(dyn std::error::Error + 'static));
    while let Some(current) = source {
        if current.is::<LengthLimitError>() {
            return true;
        }
        source = current.source();
    }
    false
}

/// DELETE `/images/{id}`
pub async fn delete_image(
    State(service): State<ImageService>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    service.remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/static/{url}` — stream the blob behind a view's `url`.
pub async fn serve_blob(
    State(service): State<ImageService>,
    Path(url): Path<String>,
) -> Result<Response, AppError> {
    let (record, file) = service.open_blob(&url).await?;
    let length = file.metadata().await.map_err(ImageError::from)?.len();

    let mime = mime_guess::from_ext(record.extension.trim_start_matches('.'))
        .first_or_octet_stream();

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    Ok(response)
}

/// Split an uploaded filename into display name and dotted extension.
///
/// `holiday.JPG` gives `("holiday", ".JPG")`. Any directory part some
/// clients send along is dropped. Without a usable extension the whole
/// name is returned with an empty extension, which insert rejects.
fn split_file_name(file_name: &str) -> (String, String) {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
        _ => (base.to_string(), String::new()),
    }
}
