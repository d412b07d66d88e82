//! HTTP mocking utilities using wiremock.

use serde::Serialize;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// HTTP mock server wrapper with convenience methods
pub struct TestHttpServer {
    server: MockServer,
}

impl TestHttpServer {
    /// Start a new mock server
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Get the server URL
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Get URL for a specific path
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.server.uri(), path)
    }

    /// Access the underlying MockServer
    pub fn inner(&self) -> &MockServer {
        &self.server
    }

    /// Register an endpoint answering `verb` with a JSON body
    pub async fn json<T: Serialize>(&self, verb: &str, endpoint: &str, status: u16, body: &T) {
        Mock::given(method(verb))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Register a GET endpoint that returns JSON
    pub async fn get_json<T: Serialize>(&self, endpoint: &str, response: &T) {
        self.json("GET", endpoint, 200, response).await;
    }

    /// Register a GET endpoint returning raw bytes with the given content type
    pub async fn get_bytes(&self, endpoint: &str, body: Vec<u8>, content_type: &str) {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, content_type))
            .mount(&self.server)
            .await;
    }

    /// Register an endpoint (any verb) that returns an error
    pub async fn error(&self, endpoint: &str, status: u16, message: &str) {
        Mock::given(path(endpoint))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_json(serde_json::json!({ "error": message })),
            )
            .mount(&self.server)
            .await;
    }

    /// Register an endpoint with simulated latency
    pub async fn with_latency<T: Serialize>(&self, endpoint: &str, response: &T, latency: Duration) {
        Mock::given(path(endpoint))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(response)
                    .set_delay(latency),
            )
            .mount(&self.server)
            .await;
    }

    /// Register an endpoint that answers every verb by echoing the request body
    pub async fn echo(&self, endpoint: &str) {
        Mock::given(path(endpoint))
            .respond_with(EchoResponder)
            .mount(&self.server)
            .await;
    }

    /// Register a redirect from `endpoint` to `location`
    pub async fn redirect(&self, endpoint: &str, status: u16, location: &str) {
        Mock::given(path(endpoint))
            .respond_with(ResponseTemplate::new(status).insert_header("Location", location))
            .mount(&self.server)
            .await;
    }

    /// Register a sequence of responses, each served once, in order
    pub async fn sequence(&self, endpoint: &str, responses: Vec<ResponseTemplate>) {
        for (i, response) in responses.into_iter().enumerate() {
            Mock::given(path(endpoint))
                .respond_with(response)
                .up_to_n_times(1)
                .with_priority(u8::try_from(i + 1).unwrap_or(u8::MAX))
                .mount(&self.server)
                .await;
        }
    }

    /// Number of requests received for a path
    pub async fn received_count(&self, endpoint: &str) -> usize {
        self.received_requests()
            .await
            .iter()
            .filter(|r| r.url.path() == endpoint)
            .count()
    }

    /// Verify that a path was hit exactly `times` times
    pub async fn verify_received(&self, endpoint: &str, times: usize) {
        let count = self.received_count(endpoint).await;
        assert_eq!(
            count, times,
            "Expected {} requests to {}, got {}",
            times, endpoint, count
        );
    }

    /// Get all received requests
    pub async fn received_requests(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    /// Clear all mocks and recorded requests
    pub async fn reset(&self) {
        self.server.reset().await;
    }
}

/// Responds with the request body, keeping its content type.
///
/// The request's method and content type are reflected in
/// `x-echo-method` / `x-echo-content-type` so tests can assert on what the
/// client actually sent.
pub struct EchoResponder;

impl Respond for EchoResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let content_type = request
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        ResponseTemplate::new(200)
            .insert_header("x-echo-method", request.method.as_str())
            .insert_header("x-echo-content-type", content_type.as_str())
            .set_body_raw(request.body.clone(), &content_type)
    }
}

/// Common response templates
pub mod responses {
    use super::*;

    pub fn ok() -> ResponseTemplate {
        ResponseTemplate::new(200)
    }

    pub fn no_content() -> ResponseTemplate {
        ResponseTemplate::new(204)
    }

    pub fn not_found() -> ResponseTemplate {
        ResponseTemplate::new(404).set_body_json(serde_json::json!({ "error": "Not found" }))
    }

    pub fn server_error() -> ResponseTemplate {
        ResponseTemplate::new(500)
            .set_body_json(serde_json::json!({ "error": "Internal server error" }))
    }

    pub fn delayed(delay: Duration) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .set_body_json(serde_json::json!({ "late": true }))
            .set_delay(delay)
    }

    /// A download with a `Content-Disposition` attachment header
    pub fn attachment(body: Vec<u8>, disposition: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("Content-Disposition", disposition)
            .set_body_raw(body, "application/octet-stream")
    }
}
