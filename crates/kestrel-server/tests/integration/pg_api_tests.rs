use axum::http::StatusCode;
use serde_json::json;

use kestrel_core::models::{BrowserEngine, Cookie};

use crate::integration::common::setup_pg_app;

#[tokio::test]
async fn health_reports_database_ok() {
    let app = setup_pg_app().await;

    let (status, json) = app.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"], "ok");
}

#[tokio::test]
async fn fetch_consumes_one_use_of_a_stored_identity() {
    let app = setup_pg_app().await;
    let cookies = vec![Cookie {
        name: "session-id".into(),
        value: "132-000".into(),
        domain: ".amazon.com".into(),
        path: "/".into(),
        expires: -1.0,
        http_only: true,
        secure: true,
        same_site: Some("Lax".into()),
    }];
    assert!(
        app.state
            .identities
            .add(BrowserEngine::Chromium, "99501", "Anchorage 99501", cookies, None)
            .await
    );

    let (status, json) = app.post_json("/cookie/fetch", json!({})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "ok");
    assert_eq!(json["identity"]["location"], "Anchorage 99501");
    assert_eq!(json["identity"]["usable_times"], 4);
    assert_eq!(json["identity"]["cookies"][0]["sameSite"], "Lax");

    let (_, meta) = app.get("/meta/cookie/pool").await;
    assert_eq!(meta["size"]["chromium"]["current"], 1);
}

#[tokio::test]
async fn proxies_round_trip_through_postgres() {
    let app = setup_pg_app().await;

    let (status, json) = app
        .post_admin(
            "/proxy/replace",
            json!({"proxies": ["10.0.0.1:8080", "10.0.0.2:8080"], "tag": "listing"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "ok");

    let body = json!({"tag": "listing"});
    let (_, first) = app.post_json("/proxy/rotate", body.clone()).await;
    let (_, second) = app.post_json("/proxy/rotate", body).await;

    assert_eq!(first["proxy"]["tag"], "listing");
    assert_eq!(first["proxy"]["proxy_type"], "dynamic");
    assert_ne!(first["proxy"]["content"], second["proxy"]["content"]);
}

#[tokio::test]
async fn categories_round_trip_through_postgres() {
    let app = setup_pg_app().await;

    let (status, json) = app
        .post_admin(
            "/category/replace",
            json!([
                {"name": "Pet Supplies", "depth": 0, "ancestor": null, "parent": null,
                 "path": "Pet Supplies", "url": "https://www.amazon.com/s?i=pets&fs=true", "is_leaf": false},
                {"name": "Dogs", "depth": -1, "ancestor": "Pet Supplies", "parent": "Pet Supplies",
                 "path": "Pet Supplies > Dogs", "url": "https://www.amazon.com/s?rh=n%3A9&fs=true", "is_leaf": true},
                {"name": "Dogs", "depth": -1, "ancestor": "Pet Supplies", "parent": "Pet Supplies",
                 "path": "Pet Supplies > Dogs", "url": "https://www.amazon.com/s?rh=n%3A10&fs=true", "is_leaf": true},
            ]),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "ok");

    let (_, json) = app.get("/category/get_by_name?name=Dogs").await;
    assert_eq!(json["category"]["url"], "https://www.amazon.com/s?rh=n%3A10&fs=true");

    let (_, json) = app.get("/category/get_by_leaf?is_leaf=true").await;
    assert_eq!(json["count"], 1);
}
