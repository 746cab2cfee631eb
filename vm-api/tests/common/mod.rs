//! Common test utilities and helpers for vm-api tests
//!
//! Wraps the orchestrator test harness (in-memory database, scripted
//! hypervisor, recording notifier) in a router and a small request client.

#![allow(dead_code)]

use axum::{body::Body, http::Request, response::Response, Router};
use serde_json::Value;
use tower::ServiceExt; // for `oneshot`
use vm_orchestrator::test_utils::TestHarness;

/// Read a response body as JSON
pub async fn extract_json_body<T>(response: Response) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}

/// TestClient to encapsulate API interaction logic
pub struct TestClient {
    pub app: Router,
    pub harness: TestHarness,
}

impl TestClient {
    /// Fresh database with the default plans seeded
    pub async fn new() -> Self {
        let harness = TestHarness::new().await;
        let app = vm_api::create_app(harness.orchestrator.clone());
        Self { app, harness }
    }

    /// Send a request to the API
    pub async fn send_request(&self, request: Request<Body>) -> Response {
        // Clone the app to allow reuse (Router is cheap to clone)
        self.app.clone().oneshot(request).await.unwrap()
    }

    fn builder(method: &str, uri: &str, user: Option<&str>) -> axum::http::request::Builder {
        let builder = Request::builder().method(method).uri(uri);
        match user {
            Some(user) => builder.header("x-vm-user", user),
            None => builder,
        }
    }

    /// Post JSON to an endpoint
    pub async fn post(&self, uri: &str, user: Option<&str>, body: Value) -> Response {
        let request = Self::builder("POST", uri, user)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send_request(request).await
    }

    /// Put JSON to an endpoint
    pub async fn put(&self, uri: &str, user: Option<&str>, body: Value) -> Response {
        let request = Self::builder("PUT", uri, user)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send_request(request).await
    }

    /// Get request to an endpoint
    pub async fn get(&self, uri: &str, user: Option<&str>) -> Response {
        let request = Self::builder("GET", uri, user)
            .body(Body::empty())
            .unwrap();
        self.send_request(request).await
    }

    /// Delete request to an endpoint
    pub async fn delete(&self, uri: &str, user: Option<&str>) -> Response {
        let request = Self::builder("DELETE", uri, user)
            .body(Body::empty())
            .unwrap();
        self.send_request(request).await
    }

    /// Create a VM as `user` and return the response body
    pub async fn create_vm(&self, user: &str, name: &str, disk_size_mb: u32) -> Value {
        let response = self
            .post(
                "/api/v1/vms",
                Some(user),
                serde_json::json!({
                    "name": name,
                    "disk_size_mb": disk_size_mb,
                    "cpus": 1,
                    "memory_mb": 512,
                }),
            )
            .await;
        assert_eq!(response.status(), 200, "create_vm {} failed", name);
        extract_json_body(response).await
    }
}
