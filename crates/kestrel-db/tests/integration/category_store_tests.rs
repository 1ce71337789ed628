use kestrel_core::category::CategoryStore;
use kestrel_core::error::AppError;
use kestrel_core::models::NewCategory;
use kestrel_db::PgCategoryStore;

use crate::integration::common::setup_test_db;

fn category(name: &str, depth: i32, parent: Option<&str>, is_leaf: bool) -> NewCategory {
    let ancestor = (depth > 0).then(|| "Electronics".to_string());
    NewCategory {
        name: name.to_string(),
        depth,
        ancestor,
        parent: parent.map(str::to_string),
        path: match parent {
            Some(p) => format!("{p}/{name}"),
            None => name.to_string(),
        },
        url: format!("https://www.amazon.com/s?rh=n%3A{}&fs=true", name.len()),
        is_leaf,
    }
}

fn graph() -> Vec<NewCategory> {
    vec![
        category("Electronics", 0, None, false),
        category("Audio", 1, Some("Electronics"), false),
        category("Headphones", 2, Some("Audio"), true),
        category("Speakers", 2, Some("Audio"), true),
    ]
}

#[tokio::test]
async fn replace_and_query_the_graph() {
    let (pool, _container) = setup_test_db().await;
    let store = PgCategoryStore::new(pool);

    assert_eq!(store.replace(&graph()).await.unwrap(), 4);

    let root = store.get_by_name("Electronics").await.unwrap().unwrap();
    assert_eq!(root.depth, 0);
    assert!(root.ancestor.is_none());

    assert_eq!(store.get_by_depth(2, true).await.unwrap().len(), 2);
    assert_eq!(store.get_by_depth(1, false).await.unwrap().len(), 2);
    assert_eq!(store.get_by_parent("Audio").await.unwrap().len(), 2);
    assert_eq!(store.get_by_ancestor("Electronics").await.unwrap().len(), 3);
    assert_eq!(store.get_by_leaf(true).await.unwrap().len(), 2);

    let scoped = store
        .get_by_ancestors_and_depth(&["Electronics".to_string()], 1)
        .await
        .unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].name, "Audio");
}

#[tokio::test]
async fn duplicate_keys_resolve_to_the_last_row() {
    let (pool, _container) = setup_test_db().await;
    let store = PgCategoryStore::new(pool);

    let mut rows = graph();
    let mut replacement = category("Speakers", 2, Some("Audio"), true);
    replacement.url = "https://www.amazon.com/s?rh=n%3A999&fs=true".into();
    rows.push(replacement);

    assert_eq!(store.replace(&rows).await.unwrap(), 4);
    let speakers = store.get_by_name("Speakers").await.unwrap().unwrap();
    assert_eq!(speakers.url, "https://www.amazon.com/s?rh=n%3A999&fs=true");
}

#[tokio::test]
async fn replace_discards_the_previous_graph() {
    let (pool, _container) = setup_test_db().await;
    let store = PgCategoryStore::new(pool);

    store.replace(&graph()).await.unwrap();
    store
        .replace(&[category("Pet Supplies", 0, None, true)])
        .await
        .unwrap();

    assert!(store.get_by_name("Audio").await.unwrap().is_none());
    assert_eq!(store.get_by_depth(5, false).await.unwrap().len(), 1);
}

#[tokio::test]
async fn depth_below_marker_is_rejected() {
    let (pool, _container) = setup_test_db().await;
    let store = PgCategoryStore::new(pool);

    store.replace(&graph()).await.unwrap();
    let result = store.replace(&[category("Broken", -2, None, true)]).await;

    assert!(result.is_err());
    assert_eq!(store.get_by_depth(2, false).await.unwrap().len(), 4);
}

#[tokio::test]
async fn insert_failure_rolls_back_the_delete() {
    let (pool, _container) = setup_test_db().await;
    let store = PgCategoryStore::new(pool);

    store.replace(&graph()).await.unwrap();

    // Valid depths, so only the INSERT inside the transaction can fail.
    let batch = vec![
        category("Pet Supplies", 0, None, false),
        category("Dogs\0", 1, Some("Pet Supplies"), true),
    ];
    let result = store.replace(&batch).await;

    assert!(matches!(result, Err(AppError::DatabaseError(_))));
    assert!(store.get_by_name("Pet Supplies").await.unwrap().is_none());
    assert_eq!(store.get_by_depth(2, false).await.unwrap().len(), 4);
    assert_eq!(store.get_by_name("Audio").await.unwrap().unwrap().depth, 1);
}
