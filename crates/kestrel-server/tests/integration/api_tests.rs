use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

use kestrel_core::models::{BrowserEngine, Cookie};

use crate::integration::common::{setup_memory_app, setup_memory_app_no_auth};

fn cookie(name: &str, value: &str) -> Cookie {
    Cookie {
        name: name.into(),
        value: value.into(),
        domain: ".amazon.com".into(),
        path: "/".into(),
        expires: -1.0,
        http_only: false,
        secure: true,
        same_site: None,
    }
}

fn categories() -> serde_json::Value {
    json!([
        {"name": "Electronics", "depth": 0, "ancestor": null, "parent": null,
         "path": "Electronics", "url": "https://www.amazon.com/s?i=electronics&fs=true", "is_leaf": false},
        {"name": "Computers", "depth": 1, "ancestor": "Electronics", "parent": "Electronics",
         "path": "Electronics > Computers", "url": "https://www.amazon.com/s?rh=n%3A1&fs=true", "is_leaf": false},
        {"name": "Laptops", "depth": -1, "ancestor": "Electronics", "parent": "Computers",
         "path": "Electronics > Computers > Laptops", "url": "https://www.amazon.com/s?rh=n%3A2&fs=true", "is_leaf": true},
    ])
}

#[tokio::test]
async fn health_without_database_is_healthy() {
    let app = setup_memory_app();

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let header = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .expect("x-request-id header");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"], "disabled");
    assert_eq!(json["pools_initialized"], true);
    assert_eq!(json["request_id"], header);
}

#[tokio::test]
async fn every_request_gets_a_fresh_request_id() {
    let app = setup_memory_app();

    let (_, first) = app.get("/meta/cookie/task").await;
    let (_, second) = app.get("/meta/cookie/task").await;

    assert!(first["request_id"].is_string());
    assert_ne!(first["request_id"], second["request_id"]);
}

#[tokio::test]
async fn fetch_from_empty_pool_reports_pool_empty() {
    let app = setup_memory_app();

    let (status, json) = app.post_json("/cookie/fetch", json!({})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "pool empty");
    assert!(json["identity"].is_null());
}

#[tokio::test]
async fn fetch_hands_out_the_newest_identity() {
    let app = setup_memory_app();
    let pool = &app.state.identities;
    assert!(
        pool.add(BrowserEngine::Chromium, "10001", "New York 10001", vec![cookie("session-id", "old")], None)
            .await
    );
    assert!(
        pool.add(BrowserEngine::Chromium, "94103", "San Francisco 94103", vec![cookie("session-id", "new")], None)
            .await
    );

    let (status, json) = app
        .post_json("/cookie/fetch", json!({"engine": "chromium", "do_fetch_pool": true}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "ok");
    assert_eq!(json["identity"]["postcode"], "94103");
    assert_eq!(json["identity"]["engine"], "chromium");
    assert_eq!(json["identity"]["cookies"][0]["name"], "session-id");
    assert_eq!(json["identity"]["cookies"][0]["value"], "new");
    assert_eq!(json["identity"]["cookies"][0]["httpOnly"], false);

    let (_, meta) = app.get("/meta/cookie/pool").await;
    assert_eq!(meta["size"]["chromium"]["current"], 1);
    assert_eq!(meta["size"]["chromium"]["max"], 20);
    assert_eq!(meta["size"]["firefox"]["current"], 0);
    assert_eq!(meta["size"]["firefox"]["max"], 20);
}

#[tokio::test]
async fn fetch_from_declared_but_unfilled_partition_reports_pool_empty() {
    let app = setup_memory_app();

    let (status, json) = app.post_json("/cookie/fetch", json!({"engine": "firefox"})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "pool empty");
}

#[tokio::test]
async fn unknown_engine_is_rejected() {
    let app = setup_memory_app();

    let (status, _) = app.post_json("/cookie/fetch", json!({"engine": "netscape"})).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn fresh_acquisition_without_browser_is_bad_gateway() {
    let app = setup_memory_app();

    let (status, json) = app
        .post_json("/cookie/fetch", json!({"do_fetch_pool": false, "postcode": "10001"}))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"], "browser_error");

    let (status, _) = app.post_json("/cookie/fill", json!({})).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(app.state.identities.pool_size(BrowserEngine::Chromium).await, 0);
}

#[tokio::test]
async fn task_queue_starts_empty() {
    let app = setup_memory_app();

    let (status, json) = app.get("/meta/cookie/task").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["size"], 0);
    assert_eq!(json["capacity"], 5);
    assert_eq!(json["active"], 0);
}

#[tokio::test]
async fn proxy_replace_requires_token() {
    let app = setup_memory_app();

    let (status, json) = app
        .post_json("/proxy/replace", json!({"proxies": ["10.0.0.1:8080"]}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "unauthorized");

    let (status, _) = app
        .send(
            Request::post("/category/replace")
                .header("content-type", "application/json")
                .header("authorization", "Bearer wrong-token")
                .body(Body::from(categories().to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn no_admin_token_returns_403() {
    let app = setup_memory_app_no_auth();

    let (status, json) = app
        .send(
            Request::post("/proxy/replace")
                .header("content-type", "application/json")
                .header("authorization", "Bearer any-token")
                .body(Body::from(json!({"proxies": ["10.0.0.1:8080"]}).to_string()))
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"], "forbidden");
}

#[tokio::test]
async fn rotate_cycles_least_recently_used() {
    let app = setup_memory_app();

    let (status, json) = app
        .post_admin(
            "/proxy/replace",
            json!({"proxies": ["10.0.0.1:8080", "10.0.0.2:8080"], "tag": "listing", "proxy_type": "static"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "ok");
    assert_eq!(json["total"], 2);

    let body = json!({"tag": "listing", "provider": "iproyal", "proxy_type": "static"});
    let mut seen = Vec::new();
    for _ in 0..3 {
        let (status, json) = app.post_json("/proxy/rotate", body.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "ok");
        seen.push(json["proxy"]["content"].as_str().unwrap().to_string());
    }
    assert_ne!(seen[0], seen[1]);
    assert_eq!(seen[0], seen[2]);

    let (_, other) = app.post_json("/proxy/rotate", json!({"tag": "listing"})).await;
    assert_eq!(other["message"], "pool empty");
    assert!(other["proxy"].is_null());
}

#[tokio::test]
async fn failed_replace_keeps_previous_proxies() {
    let app = setup_memory_app();

    app.post_admin("/proxy/replace", json!({"proxies": ["10.0.0.1:8080"]}))
        .await;
    let (status, json) = app
        .post_admin("/proxy/replace", json!({"proxies": ["10.0.0.9:8080", "   "]}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "failed");

    let (_, rotated) = app.post_json("/proxy/rotate", json!({})).await;
    assert_eq!(rotated["proxy"]["content"], "10.0.0.1:8080");
}

#[tokio::test]
async fn format_splits_text_into_lines() {
    let app = setup_memory_app();

    let (status, json) = app
        .send(
            Request::post("/proxy/format")
                .header("content-type", "text/plain")
                .body(Body::from("geo.example.net:12321:u:p\r\ngeo.example.net:12322:u:p\r\n"))
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json["proxies"],
        json!(["geo.example.net:12321:u:p", "geo.example.net:12322:u:p"])
    );
}

#[tokio::test]
async fn category_replace_and_queries() {
    let app = setup_memory_app();

    let (status, json) = app.post_admin("/category/replace", categories()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "ok");
    assert_eq!(json["total"], 3);

    let (_, json) = app.get("/category/get_by_name?name=Computers").await;
    assert_eq!(json["category"]["parent"], "Electronics");
    assert_eq!(json["category"]["depth"], 1);

    let (_, json) = app.get("/category/get_by_name?name=Garden").await;
    assert!(json["category"].is_null());

    let (_, json) = app.get("/category/get_by_depth?depth=1&strict=true").await;
    assert_eq!(json["count"], 1);
    assert_eq!(json["categories"][0]["name"], "Computers");

    let (_, json) = app.get("/category/get_by_depth?depth=1").await;
    assert_eq!(json["count"], 3);

    let (_, json) = app.get("/category/get_by_leaf?is_leaf=true").await;
    assert_eq!(json["count"], 1);
    assert_eq!(json["categories"][0]["name"], "Laptops");

    let (_, json) = app.get("/category/get_by_parent?parent=Computers").await;
    assert_eq!(json["categories"][0]["name"], "Laptops");

    let (_, json) = app.get("/category/get_by_ancestor?ancestor=Electronics").await;
    assert_eq!(json["count"], 2);

    let (_, json) = app
        .post_json(
            "/category/get_by_ancestors_and_depth",
            json!({"ancestors": ["Electronics", "Garden"], "depth": 0}),
        )
        .await;
    assert_eq!(json["count"], 1);
    assert_eq!(json["categories"][0]["name"], "Laptops");
}

#[tokio::test]
async fn invalid_category_batch_leaves_store_untouched() {
    let app = setup_memory_app();
    app.post_admin("/category/replace", categories()).await;

    let (status, json) = app
        .post_admin(
            "/category/replace",
            json!([{"name": "Broken", "depth": -2, "ancestor": null, "parent": null,
                    "path": "Broken", "url": "https://www.amazon.com/s", "is_leaf": false}]),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "failed");

    let (_, json) = app.get("/category/get_by_name?name=Electronics").await;
    assert_eq!(json["category"]["name"], "Electronics");
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = setup_memory_app();

    let (status, json) = app.get("/api-docs/openapi.json").await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["paths"]["/cookie/fetch"].is_object());
    assert!(json["paths"]["/category/get_by_ancestors_and_depth"].is_object());
}
