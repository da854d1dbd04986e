// ============================================================================
// Graph Reconciliation
// ============================================================================
//
// The diff/patch walk invoked on update: propagates scalar changes onto the
// stored entity graph and synchronizes every navigation named by the
// repository's include path, recursively. Identity is always the declared
// key, never in-memory identity.
//
// ============================================================================

use crate::core::{RepoError, Result, Value};
use crate::engine::Document;
use crate::model::{extract_key, NavKind, Navigation};
use async_recursion::async_recursion;
use futures::future::try_join_all;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Reconcile one (current, incoming) document pair.
///
/// `navigations` are the declared navigations at this level; `chains` are
/// the include chains rooted here. Scalar fields are copied from incoming
/// onto current; each chained navigation is followed one link at a time.
/// Per-collection additions, removals and pair recursions fan out together
/// and all complete before the call returns.
#[async_recursion]
pub(crate) async fn reconcile(
    current: &mut Document,
    incoming: &Document,
    navigations: &[Navigation],
    chains: &[Vec<Navigation>],
) -> Result<()> {
    copy_scalars(current, incoming, navigations);

    for chain in chains {
        let Some(nav) = chain.first() else {
            continue;
        };
        let tail: Vec<Vec<Navigation>> = if chain.len() > 1 {
            vec![chain[1..].to_vec()]
        } else {
            Vec::new()
        };
        match nav.kind {
            NavKind::One => reconcile_reference(current, incoming, nav, &tail).await?,
            NavKind::Many => reconcile_collection(current, incoming, nav, &tail).await?,
        }
    }
    Ok(())
}

/// Copy every incoming non-navigation field onto the current document.
/// This is what marks the tracked entity modified.
fn copy_scalars(current: &mut Document, incoming: &Document, navigations: &[Navigation]) {
    for (field, value) in incoming {
        if navigations.iter().any(|nav| nav.name == field) {
            continue;
        }
        current.insert(field.clone(), value.clone());
    }
}

/// To-one navigation: recurse only when both endpoints are present.
/// Null endpoints are not followed.
async fn reconcile_reference(
    current: &mut Document,
    incoming: &Document,
    nav: &Navigation,
    tail: &[Vec<Navigation>],
) -> Result<()> {
    let Some(JsonValue::Object(incoming_child)) = incoming.get(nav.name) else {
        return Ok(());
    };
    let Some(JsonValue::Object(current_child)) = current.get_mut(nav.name) else {
        return Ok(());
    };
    let target_navigations = (nav.target_navigations)();
    reconcile(current_child, incoming_child, &target_navigations, tail).await
}

/// To-many navigation: diff current and incoming elements by declared key,
/// then apply removals, additions and per-pair recursion.
async fn reconcile_collection(
    current: &mut Document,
    incoming: &Document,
    nav: &Navigation,
    tail: &[Vec<Navigation>],
) -> Result<()> {
    let Some(JsonValue::Array(incoming_items)) = incoming.get(nav.name) else {
        return Ok(());
    };

    // A collection the store has not materialized yet diffs against empty.
    if !current.contains_key(nav.name) {
        current.insert(nav.name.to_string(), JsonValue::Array(Vec::new()));
    }
    let Some(JsonValue::Array(current_items)) = current.get_mut(nav.name) else {
        return Ok(());
    };

    let descriptor = (nav.target_key)();
    let incoming_keys = index_by_key(incoming_items, &descriptor, nav.target_set)?;

    let mut kept: Vec<(Document, &Document)> = Vec::new();
    let mut seen_current: HashMap<Vec<Value>, ()> = HashMap::new();
    for item in current_items.drain(..) {
        let JsonValue::Object(doc) = item else {
            return Err(RepoError::InvalidDocument(format!(
                "collection '{}' of set '{}' holds a non-object element",
                nav.name, nav.target_set
            )));
        };
        let key = extract_key(&descriptor, nav.target_set, &doc)?;
        if seen_current.insert(key.clone(), ()).is_some() {
            return Err(RepoError::DuplicateKey(format!(
                "stored collection '{}' of set '{}' holds two rows with key [{}]",
                nav.name,
                nav.target_set,
                format_key(&key)
            )));
        }
        match incoming_keys.get(&key) {
            // Intersection: kept, reconciled against its incoming twin.
            Some(twin) => kept.push((doc, *twin)),
            // Removal: dropped from the collection.
            None => {}
        }
    }

    let target_navigations = (nav.target_navigations)();
    let pairs = kept.into_iter().map(|(mut doc, twin)| {
        let navs = &target_navigations;
        async move {
            reconcile(&mut doc, twin, navs, tail).await?;
            Ok::<Document, RepoError>(doc)
        }
    });

    // Fan-out/fan-in: every pair completes before the collection is rebuilt.
    let mut rebuilt = try_join_all(pairs).await?;

    // Additions: incoming elements whose key is absent from current.
    for (key, item) in &incoming_keys {
        if !seen_current.contains_key(key) {
            rebuilt.push((*item).clone());
        }
    }

    *current_items = rebuilt.into_iter().map(JsonValue::Object).collect();
    Ok(())
}

/// Index collection elements by their declared key.
///
/// # Errors
/// [`RepoError::DuplicateKey`] when two elements share a key: an integrity
/// condition, never resolved by first-match-wins.
fn index_by_key<'a>(
    items: &'a [JsonValue],
    descriptor: &crate::model::KeyDescriptor,
    set: &str,
) -> Result<HashMap<Vec<Value>, &'a Document>> {
    let mut by_key = HashMap::with_capacity(items.len());
    for item in items {
        let JsonValue::Object(doc) = item else {
            return Err(RepoError::InvalidDocument(format!(
                "incoming collection for set '{}' holds a non-object element",
                set
            )));
        };
        let key = extract_key(descriptor, set, doc)?;
        if by_key.insert(key.clone(), doc).is_some() {
            return Err(RepoError::DuplicateKey(format!(
                "incoming collection for set '{}' holds two rows with key [{}]",
                set,
                format_key(&key)
            )));
        }
    }
    Ok(by_key)
}

fn format_key(key: &[Value]) -> String {
    key.iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ValueType;
    use crate::model::{Entity, KeyDescriptor, KeyField};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Line {
        id: i64,
        qty: i64,
    }

    impl Entity for Line {
        fn set() -> &'static str {
            "lines"
        }

        fn key_descriptor() -> KeyDescriptor {
            KeyDescriptor::new(vec![KeyField::new("id", ValueType::Integer)])
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
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

    fn doc(json: serde_json::Value) -> Document {
        match json {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn line_chain() -> Vec<Vec<Navigation>> {
        vec![vec![Navigation::to_many::<Line>("lines")]]
    }

    #[tokio::test]
    async fn test_scalar_copy_ignores_navigations() {
        let mut current = doc(serde_json::json!({ "id": 1, "total": 10, "lines": [] }));
        let incoming = doc(serde_json::json!({ "id": 1, "total": 20, "lines": [{ "id": 9, "qty": 1 }] }));

        // Empty chain: scalar-only copy, relations untouched.
        reconcile(&mut current, &incoming, &Order::navigations(), &[])
            .await
            .unwrap();
        assert_eq!(current.get("total"), Some(&serde_json::json!(20)));
        assert_eq!(current.get("lines"), Some(&serde_json::json!([])));
    }

    #[tokio::test]
    async fn test_collection_add_remove_keep() {
        let mut current = doc(serde_json::json!({
            "id": 1,
            "total": 10,
            "lines": [{ "id": 1, "qty": 1 }, { "id": 2, "qty": 2 }]
        }));
        let incoming = doc(serde_json::json!({
            "id": 1,
            "total": 10,
            "lines": [{ "id": 2, "qty": 20 }, { "id": 3, "qty": 3 }]
        }));

        reconcile(&mut current, &incoming, &Order::navigations(), &line_chain())
            .await
            .unwrap();

        let lines = current.get("lines").unwrap().as_array().unwrap();
        let mut ids: Vec<i64> = lines
            .iter()
            .map(|line| line.get("id").unwrap().as_i64().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![2, 3]);

        // The kept element received its incoming scalar change.
        let kept = lines
            .iter()
            .find(|line| line.get("id") == Some(&serde_json::json!(2)))
            .unwrap();
        assert_eq!(kept.get("qty"), Some(&serde_json::json!(20)));
    }

    #[tokio::test]
    async fn test_duplicate_incoming_key_is_integrity_error() {
        let mut current = doc(serde_json::json!({ "id": 1, "total": 0, "lines": [] }));
        let incoming = doc(serde_json::json!({
            "id": 1,
            "total": 0,
            "lines": [{ "id": 2, "qty": 1 }, { "id": 2, "qty": 2 }]
        }));

        let err = reconcile(&mut current, &incoming, &Order::navigations(), &line_chain())
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn test_null_reference_endpoints_not_followed() {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct Profile {
            id: i64,
            bio: String,
        }

        impl Entity for Profile {
            fn set() -> &'static str {
                "profiles"
            }

            fn key_descriptor() -> KeyDescriptor {
                KeyDescriptor::new(vec![KeyField::new("id", ValueType::Integer)])
            }
        }

        let nav = Navigation::to_one::<Profile>("profile");
        let chains = vec![vec![nav]];

        let mut current = doc(serde_json::json!({ "id": 1, "profile": null }));
        let incoming = doc(serde_json::json!({ "id": 1, "profile": { "id": 2, "bio": "x" } }));
        reconcile(&mut current, &incoming, &[nav], &chains)
            .await
            .unwrap();
        // Current endpoint was null: no action.
        assert_eq!(current.get("profile"), Some(&serde_json::json!(null)));

        let mut current = doc(serde_json::json!({ "id": 1, "profile": { "id": 2, "bio": "x" } }));
        let incoming = doc(serde_json::json!({ "id": 1, "profile": { "id": 2, "bio": "y" } }));
        reconcile(&mut current, &incoming, &[nav], &chains)
            .await
            .unwrap();
        assert_eq!(
            current.get("profile").unwrap().get("bio"),
            Some(&serde_json::json!("y"))
        );
    }

    #[tokio::test]
    async fn test_missing_current_collection_diffs_against_empty() {
        let mut current = doc(serde_json::json!({ "id": 1, "total": 0 }));
        let incoming = doc(serde_json::json!({
            "id": 1,
            "total": 0,
            "lines": [{ "id": 5, "qty": 5 }]
        }));

        reconcile(&mut current, &incoming, &Order::navigations(), &line_chain())
            .await
            .unwrap();
        let lines = current.get("lines").unwrap().as_array().unwrap();
        assert_eq!(lines.len(), 1);
    }
}
