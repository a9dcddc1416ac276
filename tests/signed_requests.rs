//! Version 0.1 request signing and the unversioned public resources
mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use chrono::Utc;
use common::{Harness, UA};
use serde_json::json;
use tapglue::auth::signature::{digest, encode_id, SignedRequest};

struct Signer<'a> {
    secret: &'a str,
    id: String,
    session: &'a str,
}

impl Signer<'_> {
    fn request(&self, method: Method, path: &str, scope: &str, body: &str) -> Request<Body> {
        let date = Utc::now().to_rfc3339();
        let payload_hash = digest(body);
        let signature = SignedRequest {
            method: method.as_str(),
            path,
            host: "",
            date: &date,
            payload_hash: &payload_hash,
            id: &self.id,
            session: self.session,
        }
        .sign(self.secret, scope, "tg_0.1_request");

        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("user-agent", UA)
            .header("content-type", "application/json")
            .header("x-tapglue-id", &self.id)
            .header("x-tapglue-date", &date)
            .header("x-tapglue-payload-hash", &payload_hash)
            .header("x-tapglue-signature", signature);
        if !self.session.is_empty() {
            builder = builder.header("x-tapglue-session", self.session);
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }
}

async fn account(h: &Harness) -> (i64, String) {
    let created = h
        .send(Method::POST, "/0.1/accounts", &[], Some(json!({"name": "legacy", "description": ""})))
        .await;
    assert_eq!(created.status, StatusCode::CREATED, "{:?}", created.body);
    (created.id(), created.body["auth_token"].as_str().expect("token").to_string())
}

#[tokio::test]
async fn test_signed_operator_create() {
    let h = Harness::new();
    let (account_id, token) = account(&h).await;
    let signer = Signer {
        secret: &token,
        id: encode_id(account_id, None),
        session: "",
    };

    let body = json!({"user_name": "owner", "email": "owner@legacy.com", "password": "hunter22"}).to_string();
    let path = format!("/0.1/account/{}/users", account_id);
    let reply = h
        .raw(signer.request(Method::POST, &path, "/account/:account_id/users", &body))
        .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{:?}", reply.body);
    assert_eq!(reply.body["account_id"], account_id);
}

#[tokio::test]
async fn test_tampered_payload_is_rejected() {
    let h = Harness::new();
    let (account_id, token) = account(&h).await;
    let signer = Signer {
        secret: &token,
        id: encode_id(account_id, None),
        session: "",
    };

    let path = format!("/0.1/account/{}/users", account_id);
    let signed = json!({"user_name": "owner", "email": "owner@legacy.com", "password": "hunter22"}).to_string();
    let mut request = signer.request(Method::POST, &path, "/account/:account_id/users", &signed);
    *request.body_mut() = Body::from(json!({"user_name": "intruder", "email": "x@legacy.com", "password": "hunter22"}).to_string());

    let reply = h.raw(request).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signature_from_wrong_secret_is_rejected() {
    let h = Harness::new();
    let (account_id, _) = account(&h).await;
    let signer = Signer {
        secret: "not-the-account-token",
        id: encode_id(account_id, None),
        session: "",
    };

    let body = json!({"user_name": "owner", "email": "owner@legacy.com", "password": "hunter22"}).to_string();
    let path = format!("/0.1/account/{}/users", account_id);
    let reply = h
        .raw(signer.request(Method::POST, &path, "/account/:account_id/users", &body))
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.error_message(), "signature mismatch");
}

#[tokio::test]
async fn test_missing_user_agent_is_bad_request() {
    let h = Harness::new();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/0.4/accounts")
        .header("content-type", "application/json")
        .body(Body::from(json!({"name": "acme"}).to_string()))
        .expect("request");
    let reply = h.raw(request).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error_message(), "User-Agent header must be set");
}

#[tokio::test]
async fn test_oversized_payload_is_bad_request() {
    let h = Harness::new();
    let description = "x".repeat(64 * 1024);
    let reply = h
        .send(Method::POST, "/0.4/accounts", &[], Some(json!({"name": "acme", "description": description})))
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error_message(), "payload too large");
}

#[tokio::test]
async fn test_public_resources_and_security_headers() {
    let h = Harness::new();

    let robots = h.send(Method::GET, "/robots.txt", &[], None).await;
    assert_eq!(robots.status, StatusCode::OK);
    assert!(robots.body.as_str().unwrap_or_default().contains("Disallow: /"));
    assert_eq!(robots.header("x-content-type-options"), "nosniff");
    assert_eq!(robots.header("x-frame-options"), "DENY");
    assert!(!robots.header("strict-transport-security").is_empty());
    assert_eq!(robots.header("x-tapglue-revision"), "dev");

    let humans = h.send(Method::GET, "/humans.txt", &[], None).await;
    assert_eq!(humans.status, StatusCode::OK);

    let health = h.send(Method::GET, "/health", &[], None).await;
    assert_eq!(health.status, StatusCode::OK);
    assert_eq!(health.body["status"], "ok");

    let missing = h.send(Method::GET, "/0.4/nowhere", &[], None).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(missing.body["errors"][0]["code"], 404);

    let unknown_version = h.send(Method::GET, "/0.9/accounts", &[], None).await;
    assert_eq!(unknown_version.status, StatusCode::NOT_FOUND);
}
