//! Credential custody endpoints, end to end through the router.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{header as wm_header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use launchpad::config::Config;
use launchpad::hosting::RepoClient;
use launchpad::identity::HttpIdentity;
use launchpad::progress::ProgressBroker;
use launchpad::store::memory::MemoryStore;
use launchpad::{app, AppState};

const SESSION_TOKEN: &str = "session-tok";

async fn test_app(identity_server: &MockServer) -> (axum::Router, Uuid) {
    let user_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .and(wm_header("authorization", format!("Bearer {SESSION_TOKEN}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": user_id,
            "email": "dev@example.com",
            "app_metadata": { "provider": "github" },
            "user_metadata": { "user_name": "octocat" }
        })))
        .mount(identity_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .respond_with(ResponseTemplate::new(401))
        .mount(identity_server)
        .await;

    let state = Arc::new(AppState {
        store: Arc::new(MemoryStore::new()),
        identity: Arc::new(HttpIdentity::new(&identity_server.uri())),
        repos: RepoClient::new("http://127.0.0.1:1").unwrap(),
        broker: ProgressBroker::new(),
        config: Config {
            port: 0,
            database_url: String::new(),
            identity_url: identity_server.uri(),
            hosting_api_url: "http://127.0.0.1:1".to_string(),
            default_redirect: "/dashboard".to_string(),
            dashboard_origin: "http://localhost:3000".to_string(),
        },
    });

    (app(state), user_id)
}

fn authed(req: axum::http::request::Builder) -> axum::http::request::Builder {
    req.header(header::AUTHORIZATION, format!("Bearer {SESSION_TOKEN}"))
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn put_body(token: &str) -> String {
    json!({
        "access_token": token,
        "refresh_token": "ghr_refresh",
        "username": "octocat"
    })
    .to_string()
}

#[tokio::test]
async fn missing_bearer_is_rejected() {
    let identity = MockServer::start().await;
    let (app, _) = test_app(&identity).await;

    let resp = app
        .oneshot(Request::get("/api/v1/credential").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["code"], "unauthenticated");
}

#[tokio::test]
async fn put_then_get_roundtrips_the_credential() {
    let identity = MockServer::start().await;
    let (app, _) = test_app(&identity).await;

    let resp = app
        .clone()
        .oneshot(
            authed(Request::put("/api/v1/credential"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(put_body("gho_abc123")))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["success"], true);

    let resp = app
        .oneshot(authed(Request::get("/api/v1/credential")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["token"], "gho_abc123");
    assert_eq!(body["username"], "octocat");
}

#[tokio::test]
async fn absent_credential_is_distinguishable_from_expired() {
    let identity = MockServer::start().await;
    let (app, _) = test_app(&identity).await;

    // Nothing stored yet.
    let resp = app
        .clone()
        .oneshot(authed(Request::get("/api/v1/credential")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await["error"]["code"], "credential_not_found");

    // Store one that is already past its expiry.
    let expired = json!({
        "access_token": "gho_stale",
        "expires_at": (Utc::now() - Duration::hours(1)).to_rfc3339(),
        "username": "octocat"
    });
    let resp = app
        .clone()
        .oneshot(
            authed(Request::put("/api/v1/credential"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(expired.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(authed(Request::get("/api/v1/credential")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["error"]["code"], "credential_expired");
}

#[tokio::test]
async fn delete_is_idempotent() {
    let identity = MockServer::start().await;
    let (app, _) = test_app(&identity).await;

    let resp = app
        .clone()
        .oneshot(
            authed(Request::put("/api/v1/credential"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(put_body("gho_abc123")))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    for _ in 0..2 {
        let resp = app
            .clone()
            .oneshot(authed(Request::delete("/api/v1/credential")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["success"], true);
    }

    let resp = app
        .oneshot(authed(Request::get("/api/v1/credential")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rapid_consecutive_puts_leave_the_last_token() {
    let identity = MockServer::start().await;
    let (app, _) = test_app(&identity).await;

    for token in ["gho_first", "gho_second"] {
        let resp = app
            .clone()
            .oneshot(
                authed(Request::put("/api/v1/credential"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(put_body(token)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = app
        .oneshot(authed(Request::get("/api/v1/credential")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["token"], "gho_second");
}

#[tokio::test]
async fn responses_carry_request_id_and_no_store() {
    let identity = MockServer::start().await;
    let (app, _) = test_app(&identity).await;

    let resp = app
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-request-id"));
    assert_eq!(resp.headers()["cache-control"], "no-store");
}
