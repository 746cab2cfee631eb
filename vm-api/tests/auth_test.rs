//! Integration tests for authentication middleware
//!
//! The middleware maps the proxy-supplied username onto a tenant and its
//! role; these tests check that mapping through real routes.

mod common;

use axum::http::StatusCode;
use common::{extract_json_body, TestClient};
use serde_json::{json, Value};
use vm_core::Role;

#[tokio::test]
async fn test_empty_user_header_is_rejected() {
    let client = TestClient::new().await;

    let response = client.get("/api/v1/vms", Some("   ")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_known_user_passes() {
    let client = TestClient::new().await;
    client.harness.tenant("alice", Role::Standard).await;

    let response = client.get("/api/v1/vms", Some("alice")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let vms: Vec<Value> = extract_json_body(response).await;
    assert!(vms.is_empty());
}

#[tokio::test]
async fn test_guest_role_comes_from_tenant_record() {
    let client = TestClient::new().await;
    client.harness.tenant("visitor", Role::Guest).await;

    let response = client
        .post("/api/v1/subscription", Some("visitor"), json!({ "plan": "bronze" }))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = extract_json_body(response).await;
    assert_eq!(body["code"], "forbidden");

    // Read-only routes stay open to guests.
    let response = client.get("/api/v1/vms", Some("visitor")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_admin_sees_every_vm() {
    let client = TestClient::new().await;
    client.harness.subscribed("alice", "silver").await;
    client.harness.subscribed("bob", "silver").await;
    client.harness.admin().await;
    client.create_vm("alice", "alice-vm", 1024).await;
    client.create_vm("bob", "bob-vm", 1024).await;

    let response = client.get("/api/v1/vms", Some("alice")).await;
    let own: Vec<Value> = extract_json_body(response).await;
    assert_eq!(own.len(), 1);

    let response = client.get("/api/v1/vms", Some("root")).await;
    let all: Vec<Value> = extract_json_body(response).await;
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_empty_plan_is_bad_request() {
    let client = TestClient::new().await;
    client.harness.tenant("alice", Role::Standard).await;

    let response = client
        .post("/api/v1/subscription", Some("alice"), json!({ "plan": " " }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
