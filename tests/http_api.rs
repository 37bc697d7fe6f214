use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use futures::stream;
use image_store::{
    ImageService, handlers::image_handlers::MAX_UPLOAD_BYTES, routes::routes::routes,
};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use std::{io, sync::Arc};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "image-store-test-boundary";

async fn app() -> (Router, TempDir) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let dir = TempDir::new().unwrap();
    let service = ImageService::new(Arc::new(pool), dir.path());
    service.create_table().await.unwrap();
    (routes().with_state(service), dir)
}

fn multipart_upload(file_name: &str, content: &[u8], display_name: Option<&str>) -> Request<Body> {
    let mut body = Vec::new();
    if let Some(name) = display_name {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\n{name}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/images")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

async fn upload(app: &Router, file_name: &str, content: &[u8]) -> i64 {
    let response = send(app, multipart_upload(file_name, content, None)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["id"].as_i64().unwrap()
}

#[tokio::test]
async fn healthz_is_ok() {
    let (app, _dir) = app().await;
    let response = send(&app, get("/healthz")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn readyz_reports_each_check() {
    let (app, dir) = app().await;
    let response = send(&app, get("/readyz")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    for check in ["sqlite", "schema", "disk"] {
        assert_eq!(body["checks"][check]["ok"], true, "{check} failed: {body}");
    }
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn upload_then_fetch_view_and_blob() {
    let (app, _dir) = app().await;
    let id = upload(&app, "kitten.PNG", b"not really a png").await;

    let response = send(&app, get(&format!("/images/{id}"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let view = body_json(response).await;
    assert_eq!(view["id"], id);
    assert_eq!(view["name"], "kitten.PNG");
    let url = view["url"].as_str().unwrap().to_string();
    assert!(url.ends_with(".PNG"));

    let response = send(&app, get(&format!("/static/{url}"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "16");
    assert_eq!(body_bytes(response).await, b"not really a png");
}

#[tokio::test]
async fn upload_uses_explicit_display_name() {
    let (app, _dir) = app().await;
    let response = send(
        &app,
        multipart_upload("IMG_0001.jpg", b"jpeg bytes", Some("beach")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_json(response).await["id"].as_i64().unwrap();

    let view = body_json(send(&app, get(&format!("/images/{id}"))).await).await;
    assert_eq!(view["name"], "beach.jpg");
}

#[tokio::test]
async fn upload_rejects_non_image_extension() {
    let (app, dir) = app().await;
    let response = send(&app, multipart_upload("notes.txt", b"hello", None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["status"], 400);
    assert!(body["error"].as_str().unwrap().contains(".txt"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn list_validates_and_pages() {
    let (app, _dir) = app().await;
    let first = upload(&app, "a.gif", b"a").await;
    let second = upload(&app, "b.gif", b"b").await;
    let third = upload(&app, "c.gif", b"c").await;

    let all = body_json(send(&app, get("/images")).await).await;
    let ids: Vec<i64> = all
        .as_array()
        .unwrap()
        .iter()
        .map(|view| view["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![first, second, third]);

    let page = body_json(send(&app, get("/images?limit=1&offset=1")).await).await;
    assert_eq!(page.as_array().unwrap().len(), 1);
    assert_eq!(page[0]["id"], second);

    for uri in ["/images?limit=0", "/images?limit=101", "/images?offset=-1"] {
        let response = send(&app, get(uri)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test]
async fn replace_then_delete() {
    let (app, _dir) = app().await;
    let id = upload(&app, "photo.webp", b"first version").await;
    let view = body_json(send(&app, get(&format!("/images/{id}"))).await).await;
    let url = view["url"].as_str().unwrap().to_string();

    let response = send(
        &app,
        Request::builder()
            .method("PUT")
            .uri(format!("/images/{id}"))
            .body(Body::from("second version"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let blob = body_bytes(send(&app, get(&format!("/static/{url}"))).await).await;
    assert_eq!(blob, b"second version");
    let after = body_json(send(&app, get(&format!("/images/{id}"))).await).await;
    assert_eq!(after, view);

    let delete = || {
        Request::builder()
            .method("DELETE")
            .uri(format!("/images/{id}"))
            .body(Body::empty())
            .unwrap()
    };
    assert_eq!(send(&app, delete()).await.status(), StatusCode::NO_CONTENT);
    assert_eq!(send(&app, delete()).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        send(&app, get(&format!("/images/{id}"))).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        send(&app, get(&format!("/static/{url}"))).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn unknown_ids_are_404() {
    let (app, _dir) = app().await;
    let response = send(&app, get("/images/999")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["status"], 404);

    let response = send(
        &app,
        Request::builder()
            .method("PUT")
            .uri("/images/999")
            .body(Body::from("data"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn non_integer_id_is_rejected() {
    let (app, _dir) = app().await;
    let response = send(&app, get("/images/abc")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_replace_is_rejected_and_keeps_content() {
    let (app, dir) = app().await;
    let id = upload(&app, "keep.png", b"small original").await;
    let view = body_json(send(&app, get(&format!("/images/{id}"))).await).await;
    let url = view["url"].as_str().unwrap().to_string();

    let chunk = Bytes::from(vec![0u8; 1024 * 1024]);
    let chunk_count = MAX_UPLOAD_BYTES / chunk.len() + 1;
    let body = Body::from_stream(stream::iter(
        std::iter::repeat_n(chunk, chunk_count).map(Ok::<_, io::Error>),
    ));
    let response = send(
        &app,
        Request::builder()
            .method("PUT")
            .uri(format!("/images/{id}"))
            .body(body)
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let blob = body_bytes(send(&app, get(&format!("/static/{url}"))).await).await;
    assert_eq!(blob, b"small original");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}
