//! Shared harness for the HTTP-level tests
//!
//! Runs the full router over an in-memory store and drives it with `oneshot`.
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tapglue::{
    config::{ServerConfig, StorageBackend},
    context::AppContext,
    kv::MemoryStore,
    server::build_router,
};
use tower::ServiceExt;

pub const UA: &str = "tapglue-tests/1.0";

pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.storage.backend = StorageBackend::Memory;
    config.authentication.password_pepper = "integration-test-pepper".to_string();
    config.service.request_timeout_secs = 3600;
    config.rate_limit.global_requests_per_second = 1_000_000;
    config.rate_limit.global_burst = 1_000_000;
    config
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl Reply {
    pub fn error_message(&self) -> String {
        self.body["errors"][0]["message"].as_str().unwrap_or_default().to_string()
    }

    pub fn id(&self) -> i64 {
        self.body["id"].as_i64().expect("id in body")
    }

    pub fn header(&self, name: &str) -> String {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }
}

pub struct Harness {
    pub ctx: AppContext,
    pub router: Router,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let ctx = AppContext::with_store(config, Arc::new(MemoryStore::new())).expect("context");
        let router = build_router(ctx.clone());
        Self { ctx, router }
    }

    pub async fn raw(&self, request: Request<Body>) -> Reply {
        let response = self.router.clone().oneshot(request).await.expect("infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        Reply { status, headers, body }
    }

    pub async fn send(&self, method: Method, uri: &str, headers: &[(&str, &str)], body: Option<Value>) -> Reply {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("user-agent", UA);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");
        self.raw(request).await
    }
}

/// One account with an operator, an application and a way to add end-users
pub struct Tenant {
    pub account_id: i64,
    pub account_token: String,
    pub operator_id: i64,
    pub operator_session: String,
    pub application_id: i64,
    pub application_token: String,
}

pub struct Member {
    pub id: i64,
    pub session: String,
}

impl Tenant {
    pub async fn create(h: &Harness) -> Self {
        let account = h
            .send(Method::POST, "/0.4/accounts", &[], Some(json!({"name": "acme", "description": "acme corp"})))
            .await;
        assert_eq!(account.status, StatusCode::CREATED, "{:?}", account.body);
        let account_id = account.id();
        let account_token = account.body["auth_token"].as_str().expect("token").to_string();

        let operator = h
            .send(
                Method::POST,
                &format!("/0.4/account/{}/users", account_id),
                &[("x-tapglue-app-key", &account_token)],
                Some(json!({"user_name": "owner", "email": "owner@acme.com", "password": "hunter22"})),
            )
            .await;
        assert_eq!(operator.status, StatusCode::CREATED, "{:?}", operator.body);
        let operator_id = operator.id();

        let operator_session = Self::operator_login(h).await;

        let application = h
            .send(
                Method::POST,
                &format!("/0.4/account/{}/applications", account_id),
                &[
                    ("x-tapglue-app-key", &account_token),
                    ("x-tapglue-session", &operator_session),
                ],
                Some(json!({"name": "pinboard", "description": "photo pins"})),
            )
            .await;
        assert_eq!(application.status, StatusCode::CREATED, "{:?}", application.body);

        Self {
            account_id,
            account_token,
            operator_id,
            operator_session,
            application_id: application.id(),
            application_token: application.body["auth_token"].as_str().expect("token").to_string(),
        }
    }

    pub async fn operator_login(h: &Harness) -> String {
        let login = h
            .send(
                Method::POST,
                "/0.4/account/user/login",
                &[],
                Some(json!({"email": "owner@acme.com", "password": "hunter22"})),
            )
            .await;
        assert_eq!(login.status, StatusCode::CREATED, "{:?}", login.body);
        login.body["session_token"].as_str().expect("session").to_string()
    }

    pub fn app_path(&self) -> String {
        format!("/0.4/account/{}/application/{}", self.account_id, self.application_id)
    }

    pub fn user_path(&self, user_id: i64) -> String {
        format!("{}/user/{}", self.app_path(), user_id)
    }

    pub fn app_key(&self) -> (&'static str, &str) {
        ("x-tapglue-app-key", self.application_token.as_str())
    }

    /// Register an end-user and log them in
    pub async fn member(&self, h: &Harness, user_name: &str, extra: Value) -> Member {
        let mut body = json!({"user_name": user_name, "password": "s3cret!"});
        if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            body.extend(extra.clone());
        }

        let created = h
            .send(
                Method::POST,
                &format!("{}/users", self.app_path()),
                &[self.app_key()],
                Some(body),
            )
            .await;
        assert_eq!(created.status, StatusCode::CREATED, "{:?}", created.body);

        let login = h
            .send(
                Method::POST,
                &format!("{}/user/login", self.app_path()),
                &[self.app_key()],
                Some(json!({"user_name": user_name, "password": "s3cret!"})),
            )
            .await;
        assert_eq!(login.status, StatusCode::CREATED, "{:?}", login.body);

        Member {
            id: created.id(),
            session: login.body["session_token"].as_str().expect("session").to_string(),
        }
    }

    /// Send as an end-user session
    pub async fn as_member(&self, h: &Harness, who: &Member, method: Method, uri: &str, body: Option<Value>) -> Reply {
        h.send(
            method,
            uri,
            &[self.app_key(), ("x-tapglue-session", &who.session)],
            body,
        )
        .await
    }
}
