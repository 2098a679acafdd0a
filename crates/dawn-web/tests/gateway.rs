//! Integration tests for the static gateway and ancillary endpoints.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tower::ServiceExt;

use dawn_web::bootstrap::{GatewayConfig, bootstrap, seed_user};
use dawn_web::create_router;

struct TestSite {
    app: Router,
    _root: tempfile::TempDir,
}

async fn test_site() -> TestSite {
    let root = tempfile::tempdir().unwrap();
    let www = root.path().join("www");
    std::fs::create_dir_all(www.join("css")).unwrap();
    std::fs::write(www.join("index.html"), "<html>app</html>").unwrap();
    std::fs::write(www.join("login.html"), "<html>login</html>").unwrap();
    std::fs::write(www.join("css/site.css"), "body{}").unwrap();
    // a file outside the document root that must never be reachable
    std::fs::write(root.path().join("secret.txt"), "keep out").unwrap();

    let ctx = bootstrap(GatewayConfig {
        document_root: www,
        ..GatewayConfig::default()
    })
    .expect("bootstrap");
    seed_user(&ctx, "alice", "correct-horse", false)
        .await
        .expect("seed");
    TestSite {
        app: create_router(ctx),
        _root: root,
    }
}

async fn get(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn health_returns_snapshot() {
    let site = test_site().await;
    let response = get(&site.app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["state"], "idle");
    assert_eq!(body["queries"], 0);
    // the immortal local session is always counted
    assert_eq!(body["active_sessions"], 1);
    assert!(body["version"].is_string());
    assert!(body["git_sha"].is_string());
    assert!(body["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn root_redirects_to_index() {
    let site = test_site().await;
    let response = get(&site.app, "/").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/index.html"
    );
}

#[tokio::test]
async fn protected_page_redirects_to_login() {
    let site = test_site().await;
    let response = get(&site.app, "/index.html").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/login.html"
    );
}

#[tokio::test]
async fn public_paths_served_without_cookie() {
    let site = test_site().await;

    let login = get(&site.app, "/login.html").await;
    assert_eq!(login.status(), StatusCode::OK);
    assert_eq!(
        login.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/html; charset=utf-8"
    );

    let css = get(&site.app, "/css/site.css").await;
    assert_eq!(css.status(), StatusCode::OK);
    assert_eq!(css.headers().get(header::CONTENT_TYPE).unwrap(), "text/css");
}

#[tokio::test]
async fn authenticated_request_gets_protected_page() {
    let site = test_site().await;

    // login to obtain a cookie
    let csrf = get(&site.app, "/api/auth/csrf").await;
    let bytes = csrf.into_body().collect().await.unwrap().to_bytes();
    let token = serde_json::from_slice::<serde_json::Value>(&bytes).unwrap()["csrf_token"]
        .as_str()
        .unwrap()
        .to_string();
    let login = site
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "csrf_token": token,
                        "username": "alice",
                        "password": "correct-horse",
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::OK);
    let cookie = login
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let response = site
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/index.html")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"<html>app</html>");
}

#[tokio::test]
async fn traversal_attempts_are_forbidden() {
    let site = test_site().await;
    for uri in [
        "/..%2f..%2fetc%2fpasswd",
        "/%252e%252e/etc/passwd",
        "/%2e%2e/%2e%2e/secret.txt",
        "/css/../../secret.txt",
    ] {
        let response = get(&site.app, uri).await;
        assert_eq!(
            response.status(),
            StatusCode::FORBIDDEN,
            "expected 403 for {uri}"
        );
    }
}

#[tokio::test]
async fn missing_public_file_is_404() {
    let site = test_site().await;
    let response = get(&site.app, "/css/missing.css").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn smartthings_callback_relays_params() {
    let site = test_site().await;
    let response = get(&site.app, "/smartthings/callback?code=abc&state=xyz").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let html = std::str::from_utf8(&body).unwrap();
    assert!(html.contains("postMessage"));
    assert!(html.contains("smartthings-oauth"));
}
