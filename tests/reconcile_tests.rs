// ============================================================================
// Update Reconciliation Tests
// ============================================================================
//
// End-to-end update semantics: scalar propagation, and collection diffing
// along the repository's include path.
//
// ============================================================================

use repokit::{
    key, Entity, KeyDescriptor, KeyField, MemoryStore, Navigation, RepoError, Store, ValueType,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Part {
    id: i64,
    label: String,
}

impl Entity for Part {
    fn set() -> &'static str {
        "parts"
    }

    fn key_descriptor() -> KeyDescriptor {
        KeyDescriptor::new(vec![KeyField::new("id", ValueType::Integer)])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Line {
    id: i64,
    qty: i64,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Entity for Line {
    fn set() -> &'static str {
        "lines"
    }

    fn key_descriptor() -> KeyDescriptor {
        KeyDescriptor::new(vec![KeyField::new("id", ValueType::Integer)])
    }

    fn navigations() -> Vec<Navigation> {
        vec![Navigation::to_many::<Part>("parts")]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Order {
    id: i64,
    total: i64,
    #[serde(default)]
    lines: Vec<Line>,
}

impl Entity for Order {
    fn set() -> &'static str {
        "orders"
    }

    fn key_descriptor() -> KeyDescriptor {
        KeyDescriptor::new(vec![KeyField::new("id", ValueType::Integer)])
    }

    fn navigations() -> Vec<Navigation> {
        vec![Navigation::to_many::<Line>("lines")]
    }
}

fn line(id: i64, qty: i64) -> Line {
    Line {
        id,
        qty,
        parts: Vec::new(),
    }
}

/// One order with lines {1, 2}.
async fn seeded_store() -> Store {
    let engine = MemoryStore::new();
    engine.register::<Order>().unwrap();
    engine.register::<Line>().unwrap();
    engine.register::<Part>().unwrap();
    let store = Store::in_memory(engine);

    store
        .repository::<Order>()
        .insert(Order {
            id: 1,
            total: 100,
            lines: vec![line(1, 1), line(2, 2)],
        })
        .await
        .unwrap();
    store
}

async fn load_with_lines(store: &Store) -> Order {
    store
        .read_repository::<Order>()
        .include("lines")
        .unwrap()
        .get(&key! { id: 1 })
        .await
        .unwrap()
        .unwrap()
}

async fn load_deep(store: &Store) -> Order {
    store
        .read_repository::<Order>()
        .include("lines")
        .unwrap()
        .then_include("parts")
        .unwrap()
        .get(&key! { id: 1 })
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_collection_membership_diff() {
    let store = seeded_store().await;
    let orders = store.repository::<Order>().include("lines").unwrap();

    // Stored {1, 2}; incoming {2 (changed), 3}: 1 removed, 2 updated, 3 added.
    let mut order = load_with_lines(&store).await;
    order.lines = vec![line(2, 20), line(3, 3)];
    let updated = orders.update(order).await.unwrap();
    assert!(updated.is_some());

    let back = load_with_lines(&store).await;
    let mut ids: Vec<i64> = back.lines.iter().map(|l| l.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![2, 3]);
    let kept = back.lines.iter().find(|l| l.id == 2).unwrap();
    assert_eq!(kept.qty, 20);
}

#[tokio::test]
async fn test_update_without_include_keeps_collection() {
    let store = seeded_store().await;
    let orders = store.repository::<Order>();

    // No include path: only scalars reconcile, even with lines attached.
    let mut order = load_with_lines(&store).await;
    order.total = 150;
    order.lines.clear();
    orders.update(order).await.unwrap();

    let back = load_with_lines(&store).await;
    assert_eq!(back.total, 150);
    assert_eq!(back.lines.len(), 2);
}

#[tokio::test]
async fn test_nested_include_reconciles_two_levels() {
    let store = seeded_store().await;
    let orders = store.repository::<Order>();

    // Attach a part to line 1 through a two-level include chain.
    let deep = orders.include("lines").unwrap().then_include("parts").unwrap();
    let mut order = load_deep(&store).await;
    for l in order.lines.iter_mut() {
        if l.id == 1 {
            l.parts.push(Part {
                id: 10,
                label: "bolt".to_string(),
            });
        }
    }
    deep.update(order).await.unwrap();

    // Now modify the nested part; the change must reach level two.
    let mut order = load_deep(&store).await;
    let target = order
        .lines
        .iter_mut()
        .find(|l| l.id == 1)
        .unwrap()
        .parts
        .iter_mut()
        .find(|p| p.id == 10)
        .unwrap();
    target.label = "screw".to_string();
    deep.update(order).await.unwrap();

    let back = load_deep(&store).await;
    let part = &back.lines.iter().find(|l| l.id == 1).unwrap().parts[0];
    assert_eq!(part.label, "screw");
}

#[tokio::test]
async fn test_duplicate_collection_keys_are_rejected() {
    let store = seeded_store().await;
    let orders = store.repository::<Order>().include("lines").unwrap();

    let mut order = load_with_lines(&store).await;
    order.lines = vec![line(5, 1), line(5, 2)];
    let err = orders.update(order).await.unwrap_err();
    assert!(matches!(err, RepoError::DuplicateKey(_)));
}

#[tokio::test]
async fn test_reconciled_update_is_change_detected() {
    let store = seeded_store().await;
    let orders = store
        .repository::<Order>()
        .include("lines")
        .unwrap()
        .then_include("parts")
        .unwrap();

    // Re-staging the loaded graph unchanged affects nothing.
    let order = load_deep(&store).await;
    let outcome = orders.update(order).await.unwrap();
    assert_eq!(outcome, None);
}
