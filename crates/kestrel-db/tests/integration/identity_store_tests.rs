use std::collections::HashSet;
use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use kestrel_core::models::{BrowserEngine, Cookie, IdentityPolicy, IdentitySet};
use kestrel_core::pool::PoolBackend;
use kestrel_db::PgIdentityStore;

use crate::integration::common::setup_test_db;

fn cookie(value: &str) -> Cookie {
    Cookie {
        name: "session-id".into(),
        value: value.into(),
        domain: ".amazon.com".into(),
        path: "/".into(),
        expires: -1.0,
        http_only: true,
        secure: true,
        same_site: Some("Lax".into()),
    }
}

fn identity(postcode: &str, policy: IdentityPolicy) -> IdentitySet {
    IdentitySet::new(
        BrowserEngine::Chromium,
        postcode,
        format!("Anchorage {postcode}"),
        vec![cookie(postcode)],
        policy,
    )
}

#[tokio::test]
async fn insert_until_full() {
    let (pool, _container) = setup_test_db().await;
    let store = PgIdentityStore::new(pool, BrowserEngine::Chromium, 2);
    let policy = IdentityPolicy::default();

    assert!(store.insert(identity("99501", policy)).await.unwrap());
    assert!(store.insert(identity("99502", policy)).await.unwrap());
    assert!(!store.insert(identity("99503", policy)).await.unwrap());
    assert_eq!(store.current_size().await.unwrap(), 2);
}

#[tokio::test]
async fn take_round_trips_cookies_and_decrements() {
    let (pool, _container) = setup_test_db().await;
    let store = PgIdentityStore::new(pool, BrowserEngine::Chromium, 5);
    let original = identity("99501", IdentityPolicy::default());
    store.insert(original.clone()).await.unwrap();

    let taken = store.take().await.unwrap().expect("one usable set");
    assert_eq!(taken.id, original.id);
    assert_eq!(taken.cookies, original.cookies);
    assert_eq!(taken.usable_times, original.usable_times - 1);
    assert!(taken.last_used.is_some());
}

#[tokio::test]
async fn exhausted_and_expired_sets_are_swept() {
    let (pool, _container) = setup_test_db().await;
    let store = PgIdentityStore::new(pool, BrowserEngine::Chromium, 5);

    let single_use = IdentityPolicy {
        ttl: TimeDelta::days(3),
        usable_times: 1,
    };
    store.insert(identity("99501", single_use)).await.unwrap();

    let mut expired = identity("99502", IdentityPolicy::default());
    expired.expires_at = Utc::now() - TimeDelta::minutes(1);
    store.insert(expired).await.unwrap();

    assert!(store.take().await.unwrap().is_some());
    // The single-use set is exhausted, the other one expired.
    assert!(store.take().await.unwrap().is_none());
    assert_eq!(store.current_size().await.unwrap(), 0);
    assert_eq!(store.sweep().await.unwrap(), 0);
}

#[tokio::test]
async fn partitions_are_isolated() {
    let (pool, _container) = setup_test_db().await;
    let chromium = PgIdentityStore::new(pool.clone(), BrowserEngine::Chromium, 1);
    let firefox = PgIdentityStore::new(pool, BrowserEngine::Firefox, 1);

    chromium
        .insert(identity("99501", IdentityPolicy::default()))
        .await
        .unwrap();

    assert!(firefox.take().await.unwrap().is_none());
    assert_eq!(firefox.current_size().await.unwrap(), 0);
    assert_eq!(chromium.current_size().await.unwrap(), 1);
}

#[tokio::test]
async fn concurrent_takes_never_share_a_set() {
    let (pool, _container) = setup_test_db().await;
    let store = Arc::new(PgIdentityStore::new(pool, BrowserEngine::Chromium, 10));
    let single_use = IdentityPolicy {
        ttl: TimeDelta::days(3),
        usable_times: 1,
    };
    for i in 0..3 {
        store
            .insert(identity(&format!("9950{i}"), single_use))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move { store.take().await.unwrap() }));
    }

    let mut ids = HashSet::new();
    let mut misses = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Some(set) => assert!(ids.insert(set.id), "set handed out twice"),
            None => misses += 1,
        }
    }
    assert_eq!(ids.len(), 3);
    assert_eq!(misses, 5);
}
