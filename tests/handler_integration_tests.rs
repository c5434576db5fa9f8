use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use gathr::{
    AppError, AppState, InMemoryIdentityService,
    auth::{Session, SessionUser, issue_session_token},
    config::AppConfig,
    create_router, handlers,
    models::{Account, Role, SetRoleRequest},
};
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use tower::util::ServiceExt;

// --- Helper Functions ---

const TEST_SESSION_SECRET: &str = "handler-test-session-secret";

fn test_config(static_dir: &TempDir) -> AppConfig {
    AppConfig {
        session_jwt_secret: TEST_SESSION_SECRET.to_string(),
        static_dir: static_dir.path().to_path_buf(),
        ..AppConfig::default()
    }
}

fn create_app(store: Arc<InMemoryIdentityService>) -> (Router, TempDir) {
    let static_dir = tempfile::tempdir().unwrap();
    std::fs::write(static_dir.path().join("index.html"), "<html>gathr</html>").unwrap();
    let config = test_config(&static_dir);
    (create_router(AppState::new(store, config)), static_dir)
}

fn bearer(user_id: &str) -> String {
    let token =
        issue_session_token(user_id, TEST_SESSION_SECRET, chrono::Duration::minutes(10)).unwrap();
    format!("Bearer {token}")
}

fn callback(query: &str, user_id: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(format!("/auth-callback{query}"));
    if let Some(user_id) = user_id {
        builder = builder.header(header::AUTHORIZATION, bearer(user_id));
    }
    builder.body(Body::empty()).unwrap()
}

fn post_role(user_id: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/api/role")
        .header(header::AUTHORIZATION, bearer(user_id))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn location(response: &Response) -> Option<&str> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn stored_role(store: &InMemoryIdentityService, user_id: &str) -> Option<Role> {
    store.account(user_id).await.and_then(|account| account.role())
}

// --- Role Assignment Handshake ---

#[tokio::test]
async fn test_callback_without_session_goes_to_sign_in() {
    let store = Arc::new(InMemoryIdentityService::with_accounts([Account::new("fresh")]));
    let (app, _dir) = create_app(store.clone());

    let response = app.oneshot(callback("?role=merchant", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/sign-in"));
    assert_eq!(store.reads(), 0);
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn test_callback_assigns_requested_role_once() {
    let store = Arc::new(InMemoryIdentityService::with_accounts([Account::new("fresh")]));
    let (app, _dir) = create_app(store.clone());

    let response = app
        .clone()
        .oneshot(callback("?role=merchant", Some("fresh")))
        .await
        .unwrap();
    assert_eq!(location(&response), Some("/"));
    assert_eq!(stored_role(&store, "fresh").await, Some(Role::Merchant));
    assert_eq!(store.writes(), 1);

    // Replaying the callback with a different intent changes nothing.
    for query in ["?role=carrier", "", "?role=merchant"] {
        let response = app
            .clone()
            .oneshot(callback(query, Some("fresh")))
            .await
            .unwrap();
        assert_eq!(location(&response), Some("/"));
    }
    assert_eq!(stored_role(&store, "fresh").await, Some(Role::Merchant));
    assert_eq!(store.writes(), 1);
}

#[tokio::test]
async fn test_callback_defaults_to_customer() {
    let store = Arc::new(InMemoryIdentityService::with_accounts([
        Account::new("a"),
        Account::new("b"),
    ]));
    let (app, _dir) = create_app(store.clone());

    app.clone().oneshot(callback("", Some("a"))).await.unwrap();
    app.oneshot(callback("?role=", Some("b"))).await.unwrap();

    assert_eq!(stored_role(&store, "a").await, Some(Role::Customer));
    assert_eq!(stored_role(&store, "b").await, Some(Role::Customer));
}

#[tokio::test]
async fn test_callback_ignores_unknown_role_intent() {
    let store = Arc::new(InMemoryIdentityService::with_accounts([Account::new("fresh")]));
    let (app, _dir) = create_app(store.clone());

    let response = app
        .oneshot(callback("?role=admin", Some("fresh")))
        .await
        .unwrap();
    assert_eq!(location(&response), Some("/"));
    assert_eq!(store.writes(), 0);
    assert_eq!(stored_role(&store, "fresh").await, None);
}

#[tokio::test]
async fn test_callback_swallows_provider_failure() {
    let store = Arc::new(InMemoryIdentityService::with_accounts([Account::new("fresh")]));
    store.set_failing(true);
    let (app, _dir) = create_app(store.clone());

    let response = app
        .clone()
        .oneshot(callback("?role=carrier", Some("fresh")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/"));

    // The next visit retries once the provider is back.
    store.set_failing(false);
    app.oneshot(callback("?role=carrier", Some("fresh")))
        .await
        .unwrap();
    assert_eq!(stored_role(&store, "fresh").await, Some(Role::Carrier));
}

#[tokio::test]
async fn test_concurrent_callbacks_write_once() {
    let store = Arc::new(
        InMemoryIdentityService::with_accounts([Account::new("fresh")])
            .with_latency(Duration::from_millis(50)),
    );
    let (app, _dir) = create_app(store.clone());

    let (first, second) = tokio::join!(
        app.clone().oneshot(callback("?role=carrier", Some("fresh"))),
        app.clone().oneshot(callback("?role=carrier", Some("fresh"))),
    );
    assert_eq!(location(&first.unwrap()), Some("/"));
    assert_eq!(location(&second.unwrap()), Some("/"));

    assert_eq!(store.writes(), 1);
    assert_eq!(stored_role(&store, "fresh").await, Some(Role::Carrier));
}

#[tokio::test]
async fn test_assigned_role_unlocks_scoped_route() {
    let store = Arc::new(InMemoryIdentityService::with_accounts([Account::new("fresh")]));
    let (app, _dir) = create_app(store);

    app.clone()
        .oneshot(callback("?role=carrier", Some("fresh")))
        .await
        .unwrap();

    let request = Request::builder()
        .uri("/carrier")
        .header(header::AUTHORIZATION, bearer("fresh"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// --- POST /api/role ---

#[tokio::test]
async fn test_set_role_success() {
    let store = Arc::new(InMemoryIdentityService::with_accounts([Account::new("u1")]));
    let (app, _dir) = create_app(store.clone());

    let response = app
        .clone()
        .oneshot(post_role("u1", json!({ "userId": "u1", "role": "carrier" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body, json!({ "success": true, "userId": "u1", "role": "carrier" }));
    assert_eq!(stored_role(&store, "u1").await, Some(Role::Carrier));

    // The gate sees the new role on the next request.
    let request = Request::builder()
        .uri("/carrier/jobs")
        .header(header::AUTHORIZATION, bearer("u1"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_set_role_missing_fields() {
    let store = Arc::new(InMemoryIdentityService::with_accounts([Account::new("u1")]));
    let (app, _dir) = create_app(store.clone());

    let cases = [
        (json!({ "userId": "", "role": "merchant" }), "missing required field: userId"),
        (json!({ "role": "merchant" }), "missing required field: userId"),
        (json!({ "userId": "u1" }), "missing required field: role"),
        (json!({ "userId": "u1", "role": "  " }), "missing required field: role"),
    ];

    for (payload, expected) in cases {
        let response = app.clone().oneshot(post_role("u1", payload)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"], json!(expected));
    }

    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn test_set_role_rejects_unknown_role() {
    let store = Arc::new(InMemoryIdentityService::with_accounts([Account::new("u1")]));
    let (app, _dir) = create_app(store.clone());

    let response = app
        .oneshot(post_role("u1", json!({ "userId": "u1", "role": "admin" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], json!("invalid role: admin"));
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn test_set_role_for_another_account_is_forbidden() {
    let store = Arc::new(InMemoryIdentityService::with_accounts([
        Account::new("u1"),
        Account::new("u2"),
    ]));
    let (app, _dir) = create_app(store.clone());

    let response = app
        .oneshot(post_role("u1", json!({ "userId": "u2", "role": "merchant" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(stored_role(&store, "u2").await, None);
}

#[tokio::test]
async fn test_set_role_never_overwrites() {
    let store = Arc::new(InMemoryIdentityService::with_accounts([Account::with_role(
        "u1",
        Role::Customer,
    )]));
    let (app, _dir) = create_app(store.clone());

    let response = app
        .clone()
        .oneshot(post_role("u1", json!({ "userId": "u1", "role": "merchant" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Asking for the role already held is not a conflict.
    let response = app
        .oneshot(post_role("u1", json!({ "userId": "u1", "role": "customer" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(store.writes(), 0);
    assert_eq!(stored_role(&store, "u1").await, Some(Role::Customer));
}

#[tokio::test]
async fn test_set_role_without_session_is_redirected_by_gate() {
    let store = Arc::new(InMemoryIdentityService::with_accounts([Account::new("u1")]));
    let (app, _dir) = create_app(store.clone());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/role")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "userId": "u1", "role": "carrier" }).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(location(&response), Some("/sign-in"));
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn test_set_role_and_callback_do_not_both_write() {
    let store = Arc::new(
        InMemoryIdentityService::with_accounts([Account::new("u1")])
            .with_latency(Duration::from_millis(50)),
    );
    let (app, _dir) = create_app(store.clone());

    // The endpoint holds the account while reading and writing; the callback
    // lands in the middle of that window.
    let post = app
        .clone()
        .oneshot(post_role("u1", json!({ "userId": "u1", "role": "carrier" })));
    let landing = async {
        tokio::time::sleep(Duration::from_millis(75)).await;
        app.clone()
            .oneshot(callback("?role=merchant", Some("u1")))
            .await
    };
    let (post, landing) = tokio::join!(post, landing);

    assert_eq!(location(&landing.unwrap()), Some("/"));
    let post = post.unwrap();
    assert_eq!(post.status(), StatusCode::OK);
    assert_eq!(json_body(post).await["role"], json!("carrier"));

    assert_eq!(store.writes(), 1);
    assert_eq!(stored_role(&store, "u1").await, Some(Role::Carrier));
}

#[tokio::test]
async fn test_set_role_while_assignment_running_is_conflict() {
    let store = Arc::new(InMemoryIdentityService::with_accounts([Account::new("u1")]));
    let static_dir = tempfile::tempdir().unwrap();
    let state = AppState::new(store.clone(), test_config(&static_dir));

    let guard = state.in_flight.try_acquire("u1").unwrap();
    let result = handlers::set_role(
        SessionUser(Session {
            user_id: "u1".into(),
        }),
        State(state.clone()),
        Json(SetRoleRequest {
            user_id: Some("u1".into()),
            role: Some("carrier".into()),
        }),
    )
    .await;

    let err = result.unwrap_err();
    assert!(matches!(err, AppError::AssignmentInProgress(ref id) if id == "u1"));
    assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    assert_eq!(store.reads(), 0);
    assert_eq!(store.writes(), 0);

    // Released once the running assignment finishes.
    drop(guard);
    assert!(!state.in_flight.contains("u1"));
    let result = handlers::set_role(
        SessionUser(Session {
            user_id: "u1".into(),
        }),
        State(state.clone()),
        Json(SetRoleRequest {
            user_id: Some("u1".into()),
            role: Some("carrier".into()),
        }),
    )
    .await;
    assert!(result.is_ok());
    assert!(!state.in_flight.contains("u1"));
}

#[tokio::test]
async fn test_set_role_surfaces_provider_failure() {
    let store = Arc::new(InMemoryIdentityService::with_accounts([Account::new("u1")]));
    store.set_failing(true);
    let static_dir = tempfile::tempdir().unwrap();
    let state = AppState::new(store, test_config(&static_dir));

    let result = handlers::set_role(
        SessionUser(Session {
            user_id: "u1".into(),
        }),
        State(state),
        Json(SetRoleRequest {
            user_id: Some("u1".into()),
            role: Some("merchant".into()),
        }),
    )
    .await;

    let err = result.unwrap_err();
    assert!(matches!(err, AppError::Upstream(ref msg) if msg == "identity service unavailable"));

    let response = err.into_response();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json_body(response).await["error"],
        json!("identity service unavailable")
    );
}

#[tokio::test]
async fn test_set_role_unknown_account() {
    let store = Arc::new(InMemoryIdentityService::new());
    let static_dir = tempfile::tempdir().unwrap();
    let state = AppState::new(store, test_config(&static_dir));

    let result = handlers::set_role(
        SessionUser(Session {
            user_id: "ghost".into(),
        }),
        State(state),
        Json(SetRoleRequest {
            user_id: Some("ghost".into()),
            role: Some("carrier".into()),
        }),
    )
    .await;

    let response = result.unwrap_err().into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// --- GET /api/me ---

#[tokio::test]
async fn test_me_reports_resolved_account() {
    let store = Arc::new(InMemoryIdentityService::with_accounts([
        Account::with_role("m1", Role::Merchant),
        Account::new("fresh"),
    ]));
    let (app, _dir) = create_app(store.clone());

    let request = Request::builder()
        .uri("/api/me")
        .header(header::AUTHORIZATION, bearer("m1"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "id": "m1", "role": "merchant" }));

    let request = Request::builder()
        .uri("/api/me")
        .header(header::AUTHORIZATION, bearer("fresh"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(json_body(response).await, json!({ "id": "fresh", "role": null }));

    // The handler reuses the gate's lookup.
    assert_eq!(store.reads(), 2);
}
