#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use image_service::services::image_fetcher::DEFAULT_FETCH_TIMEOUT;
use image_service::services::providers::mock::MockImageProvider;
use image_service::services::ImageFetcher;
use image_service::startup::{build_router, AppState};
use std::sync::Arc;
use tower::util::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub provider: Arc<MockImageProvider>,
}

impl TestApp {
    pub fn new(provider: MockImageProvider) -> Self {
        let provider = Arc::new(provider);
        let fetcher = ImageFetcher::new(DEFAULT_FETCH_TIMEOUT).expect("Failed to build fetcher");
        let router = build_router(AppState::new(provider.clone(), fetcher));

        Self { router, provider }
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response {
        self.post_raw(uri, body.to_string()).await
    }

    pub async fn post_raw(&self, uri: &str, body: String) -> Response {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap()
    }
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body")
        .to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("Failed to parse JSON")
}

/// Split an NDJSON body into parsed lines.
pub async fn body_lines(response: Response) -> Vec<serde_json::Value> {
    let body = String::from_utf8(body_bytes(response).await).expect("Body is not UTF-8");
    assert!(body.is_empty() || body.ends_with('\n'), "NDJSON body must end with a newline");
    body.lines()
        .map(|line| serde_json::from_str(line).expect("Each line must be standalone JSON"))
        .collect()
}

pub fn assert_status(response: &Response, status: StatusCode) {
    assert_eq!(response.status(), status, "unexpected status");
}
