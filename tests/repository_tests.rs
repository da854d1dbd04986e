// ============================================================================
// Repository Verb Tests
// ============================================================================

use repokit::{
    key, Entity, KeyDescriptor, KeyField, MemoryStore, Navigation, RepoError, Store, ValueType,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Supervisor {
    id: i64,
    name: String,
}

impl Entity for Supervisor {
    fn set() -> &'static str {
        "supervisors"
    }

    fn key_descriptor() -> KeyDescriptor {
        KeyDescriptor::new(vec![KeyField::new("id", ValueType::Integer)])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    id: i64,
    name: String,
    #[serde(default)]
    supervisor: Option<Supervisor>,
}

impl Entity for User {
    fn set() -> &'static str {
        "users"
    }

    fn key_descriptor() -> KeyDescriptor {
        KeyDescriptor::new(vec![KeyField::new("id", ValueType::Integer)])
    }

    fn navigations() -> Vec<Navigation> {
        vec![Navigation::to_one::<Supervisor>("supervisor")]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Shipment {
    order_id: i64,
    line: i64,
    sku: String,
}

impl Entity for Shipment {
    fn set() -> &'static str {
        "shipments"
    }

    fn key_descriptor() -> KeyDescriptor {
        KeyDescriptor::new(vec![
            KeyField::new("order_id", ValueType::Integer),
            KeyField::new("line", ValueType::Integer),
        ])
    }
}

fn user(id: i64, name: &str) -> User {
    User {
        id,
        name: name.to_string(),
        supervisor: None,
    }
}

/// 21 users, ids 1..=21; user 1 has a supervisor, the rest none.
async fn seeded_store() -> Store {
    let engine = MemoryStore::new();
    engine.register::<User>().unwrap();
    engine.register::<Supervisor>().unwrap();
    engine.register::<Shipment>().unwrap();
    let store = Store::in_memory(engine);

    let txn = store.transaction();
    let users = txn.repository::<User>();
    users
        .insert(User {
            id: 1,
            name: "user-1".to_string(),
            supervisor: Some(Supervisor {
                id: 100,
                name: "boss".to_string(),
            }),
        })
        .await
        .unwrap();
    for id in 2..=21 {
        users.insert(user(id, &format!("user-{}", id))).await.unwrap();
    }
    txn.commit().await.unwrap();
    store
}

#[tokio::test]
async fn test_get_by_key() {
    let store = seeded_store().await;
    let users = store.read_repository::<User>();

    let found = users.get(&key! { id: 7 }).await.unwrap();
    assert_eq!(found.map(|u| u.name), Some("user-7".to_string()));

    // Absence is a soft outcome.
    assert_eq!(users.get(&key! { id: 777 }).await.unwrap(), None);
}

#[tokio::test]
async fn test_get_with_composite_key() {
    let store = seeded_store().await;
    let shipments = store.repository::<Shipment>();
    shipments
        .insert(Shipment {
            order_id: 7,
            line: 3,
            sku: "ABC".to_string(),
        })
        .await
        .unwrap();

    let found = shipments.get(&key! { order_id: 7, line: 3 }).await.unwrap();
    assert_eq!(found.map(|s| s.sku), Some("ABC".to_string()));
    assert_eq!(shipments.get(&key! { order_id: 7, line: 4 }).await.unwrap(), None);

    // A key object missing a declared field is a configuration error.
    let err = shipments.get(&key! { order_id: 7 }).await.unwrap_err();
    assert!(matches!(err, RepoError::KeyFieldMissing(field, _) if field == "line"));
}

#[tokio::test]
async fn test_relations_load_only_when_included() {
    let store = seeded_store().await;

    let plain = store.read_repository::<User>();
    let found = plain.get(&key! { id: 1 }).await.unwrap().unwrap();
    assert_eq!(found.supervisor, None);

    let with_supervisor = plain.include("supervisor").unwrap();
    let found = with_supervisor.get(&key! { id: 1 }).await.unwrap().unwrap();
    assert_eq!(found.supervisor.map(|s| s.name), Some("boss".to_string()));

    // A user that never had one still reads back None.
    let found = with_supervisor.get(&key! { id: 2 }).await.unwrap().unwrap();
    assert_eq!(found.supervisor, None);
}

#[tokio::test]
async fn test_unknown_navigation_is_rejected() {
    let store = seeded_store().await;
    let err = store.read_repository::<User>().include("manager").unwrap_err();
    assert!(matches!(err, RepoError::UnknownNavigation(name, set)
        if name == "manager" && set == "users"));
}

#[tokio::test]
async fn test_insert_and_delete() {
    let store = seeded_store().await;
    let users = store.repository::<User>();

    let inserted = users.insert(user(50, "fresh")).await.unwrap();
    assert!(inserted.is_some());
    assert!(users.get(&key! { id: 50 }).await.unwrap().is_some());

    assert!(users.delete_by_key(&key! { id: 50 }).await.unwrap());
    assert_eq!(users.get(&key! { id: 50 }).await.unwrap(), None);

    // Deleting an already-absent row reports false, not an error.
    assert!(!users.delete_by_key(&key! { id: 50 }).await.unwrap());
}

#[tokio::test]
async fn test_delete_by_entity_identity_uses_key_only() {
    let store = seeded_store().await;
    let users = store.repository::<User>();

    // A detached instance with the same key but different scalars still
    // identifies the stored row.
    let detached = user(9, "someone-else");
    assert!(users.delete(&detached).await.unwrap());
    assert_eq!(users.get(&key! { id: 9 }).await.unwrap(), None);
}

#[tokio::test]
async fn test_update_scalars() {
    let store = seeded_store().await;
    let users = store.repository::<User>();

    let mut u = users.get(&key! { id: 3 }).await.unwrap().unwrap();
    u.name = "renamed".to_string();
    let updated = users.update(u).await.unwrap();
    assert!(updated.is_some());

    let back = users.get(&key! { id: 3 }).await.unwrap().unwrap();
    assert_eq!(back.name, "renamed");
}

#[tokio::test]
async fn test_update_without_include_leaves_relations() {
    let store = seeded_store().await;
    let users = store.repository::<User>();

    // The loaded entity carries no supervisor, and the update must not
    // erase the stored one.
    let mut u = users.get(&key! { id: 1 }).await.unwrap().unwrap();
    assert_eq!(u.supervisor, None);
    u.name = "promoted".to_string();
    users.update(u).await.unwrap();

    let back = store
        .read_repository::<User>()
        .include("supervisor")
        .unwrap()
        .get(&key! { id: 1 })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(back.name, "promoted");
    assert_eq!(back.supervisor.map(|s| s.name), Some("boss".to_string()));
}

#[tokio::test]
async fn test_update_absent_row_is_none() {
    let store = seeded_store().await;
    let users = store.repository::<User>();

    let outcome = users.update(user(999, "ghost")).await.unwrap();
    assert_eq!(outcome, None);
}

#[tokio::test]
async fn test_noop_update_in_auto_mode_affects_nothing() {
    let store = seeded_store().await;
    let users = store.repository::<User>();

    let u = users.get(&key! { id: 4 }).await.unwrap().unwrap();
    // Same values staged again: change detection drops the write.
    let outcome = users.update(u).await.unwrap();
    assert_eq!(outcome, None);
}

#[tokio::test]
async fn test_all_and_count() {
    let store = seeded_store().await;
    let users = store.read_repository::<User>();

    assert_eq!(users.count().await.unwrap(), 21);
    let all = users.all().await.unwrap();
    assert_eq!(all.len(), 21);
}
