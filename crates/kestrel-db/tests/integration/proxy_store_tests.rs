use kestrel_core::error::AppError;
use kestrel_core::models::{ProxyPartition, ProxyType};
use kestrel_core::proxy::ProxyStore;
use kestrel_db::PgProxyStore;

use crate::integration::common::setup_test_db;

fn lines(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn rotate_cycles_least_recently_used() {
    let (pool, _container) = setup_test_db().await;
    let store = PgProxyStore::new(pool);
    let partition = ProxyPartition::default();

    store
        .replace(&partition, &lines(&["a:1:u:p", "b:2:u:p"]))
        .await
        .unwrap();

    let first = store.rotate(&partition).await.unwrap().unwrap();
    let second = store.rotate(&partition).await.unwrap().unwrap();
    let third = store.rotate(&partition).await.unwrap().unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(third.id, first.id);
    assert!(third.last_used.is_some());
}

#[tokio::test]
async fn replace_swaps_only_its_partition() {
    let (pool, _container) = setup_test_db().await;
    let store = PgProxyStore::new(pool);
    let general = ProxyPartition::default();
    let eu = ProxyPartition::new("eu", "iproyal", ProxyType::Static);

    store.replace(&general, &lines(&["a:1:u:p", "b:2:u:p"])).await.unwrap();
    store.replace(&eu, &lines(&["c:3:u:p"])).await.unwrap();
    let inserted = store.replace(&general, &lines(&["d:4:u:p"])).await.unwrap();

    assert_eq!(inserted, 1);
    assert_eq!(store.count(&general).await.unwrap(), 1);
    assert_eq!(store.count(&eu).await.unwrap(), 1);
    assert_eq!(store.tags(ProxyType::Static).await.unwrap(), vec!["eu"]);
    assert_eq!(store.tags(ProxyType::Dynamic).await.unwrap(), vec!["general"]);
}

#[tokio::test]
async fn invalid_replace_leaves_partition_untouched() {
    let (pool, _container) = setup_test_db().await;
    let store = PgProxyStore::new(pool);
    let partition = ProxyPartition::default();

    store.replace(&partition, &lines(&["a:1:u:p"])).await.unwrap();
    let result = store.replace(&partition, &lines(&["b:2:u:p", "   "])).await;

    assert!(result.is_err());
    let only = store.rotate(&partition).await.unwrap().unwrap();
    assert_eq!(only.content, "a:1:u:p");
}

#[tokio::test]
async fn insert_failure_rolls_back_the_delete() {
    let (pool, _container) = setup_test_db().await;
    let store = PgProxyStore::new(pool);
    let partition = ProxyPartition::default();

    store.replace(&partition, &lines(&["a:1:u:p", "b:2:u:p"])).await.unwrap();

    // Passes validation; PostgreSQL rejects NUL bytes in text columns.
    let result = store
        .replace(&partition, &lines(&["c:3:u:p", "d:4:u:p\0"]))
        .await;

    assert!(matches!(result, Err(AppError::DatabaseError(_))));
    assert_eq!(store.count(&partition).await.unwrap(), 2);
    let mut contents = vec![
        store.rotate(&partition).await.unwrap().unwrap().content,
        store.rotate(&partition).await.unwrap().unwrap().content,
    ];
    contents.sort();
    assert_eq!(contents, vec!["a:1:u:p", "b:2:u:p"]);
}

#[tokio::test]
async fn empty_partition_rotates_to_none() {
    let (pool, _container) = setup_test_db().await;
    let store = PgProxyStore::new(pool);

    let partition = ProxyPartition::new("missing", "iproyal", ProxyType::Dynamic);
    assert!(store.rotate(&partition).await.unwrap().is_none());
    assert_eq!(store.count(&partition).await.unwrap(), 0);
}
