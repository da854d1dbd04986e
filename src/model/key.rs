// ============================================================================
// Key Resolution
// ============================================================================
//
// Turns a key-shaped object into a point-lookup predicate using an entity's
// declared primary-key shape. Key identity never uses reference equality:
// two documents with equal key values are the same row.
//
// ============================================================================

use crate::core::{RepoError, Result, Value, ValueType};
use crate::engine::Document;
use std::collections::HashMap;

/// One field of a declared primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyField {
    pub name: &'static str,
    pub ty: ValueType,
}

impl KeyField {
    pub const fn new(name: &'static str, ty: ValueType) -> Self {
        Self { name, ty }
    }
}

/// Ordered set of key fields for one entity type.
///
/// Built once at model-registration time; immutable for the lifetime of the
/// model. A descriptor must be non-empty; this is checked where descriptors
/// enter the system (engine registration and predicate resolution).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescriptor {
    fields: Vec<KeyField>,
}

impl KeyDescriptor {
    pub fn new(fields: Vec<KeyField>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[KeyField] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn is_composite(&self) -> bool {
        self.fields.len() > 1
    }
}

/// Ordered value extraction by field name.
///
/// Anything that can supply a value for each declared key field can be used
/// as a key argument: the `key!` macro object, a map of values, or a raw
/// document. Implementations match field names case-insensitively.
pub trait KeySource {
    fn key_value(&self, field: &str) -> Option<Value>;
}

/// An ad-hoc key object, normally built with the [`key!`](crate::key) macro.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyObject {
    values: Vec<(String, Value)>,
}

impl KeyObject {
    pub fn new(values: Vec<(String, Value)>) -> Self {
        Self { values }
    }
}

impl KeySource for KeyObject {
    fn key_value(&self, field: &str) -> Option<Value> {
        self.values
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(field))
            .map(|(_, value)| value.clone())
    }
}

impl KeySource for HashMap<String, Value> {
    fn key_value(&self, field: &str) -> Option<Value> {
        self.iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(field))
            .map(|(_, value)| value.clone())
    }
}

impl KeySource for Document {
    fn key_value(&self, field: &str) -> Option<Value> {
        self.iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(field))
            .map(|(_, value)| Value::from_json(value))
    }
}

/// A point-lookup predicate: the conjunction of one equality term per key
/// field, in declared key order.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyPredicate {
    terms: Vec<(String, Value)>,
}

impl KeyPredicate {
    pub fn terms(&self) -> &[(String, Value)] {
        &self.terms
    }

    /// True when every equality term matches the document.
    pub fn matches(&self, doc: &Document) -> bool {
        self.terms.iter().all(|(field, expected)| {
            doc.iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(field))
                .map(|(_, actual)| Value::from_json(actual) == *expected)
                .unwrap_or(false)
        })
    }
}

impl std::fmt::Display for KeyPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, value) in &self.terms {
            if !first {
                write!(f, " AND ")?;
            }
            write!(f, "{} = {}", field, value)?;
            first = false;
        }
        Ok(())
    }
}

/// Build a point-lookup predicate for `set` from a key-shaped object.
///
/// The source's fields must be a superset of the descriptor's fields,
/// matched case-insensitively. Arity is unbounded: the terms are folded in
/// declared order, whatever the key shape.
///
/// # Errors
/// - [`RepoError::EmptyKey`] when the descriptor has no fields
/// - [`RepoError::KeyFieldMissing`] when the source lacks a key field
/// - [`RepoError::TypeMismatch`] when a supplied value does not fit the
///   declared field type
pub fn resolve(
    descriptor: &KeyDescriptor,
    set: &str,
    source: &dyn KeySource,
) -> Result<KeyPredicate> {
    if descriptor.is_empty() {
        return Err(RepoError::EmptyKey(set.to_string()));
    }

    let mut terms = Vec::with_capacity(descriptor.fields().len());
    for field in descriptor.fields() {
        let value = source
            .key_value(field.name)
            .ok_or_else(|| RepoError::KeyFieldMissing(field.name.to_string(), set.to_string()))?;
        if !field.ty.is_compatible(&value) {
            return Err(RepoError::TypeMismatch(format!(
                "key field '{}' of set '{}' expects {}, got {}",
                field.name,
                set,
                field.ty,
                value.type_name()
            )));
        }
        terms.push((field.name.to_string(), value));
    }
    Ok(KeyPredicate { terms })
}

/// Extract the ordered key values of a document, for diffing by identity.
pub(crate) fn extract_key(
    descriptor: &KeyDescriptor,
    set: &str,
    doc: &Document,
) -> Result<Vec<Value>> {
    descriptor
        .fields()
        .iter()
        .map(|field| {
            doc.key_value(field.name)
                .ok_or_else(|| RepoError::KeyFieldMissing(field.name.to_string(), set.to_string()))
        })
        .collect()
}

/// Build an ad-hoc key object from named values.
///
/// ```
/// use repokit::key;
/// let k = key! { id: 42 };
/// let composite = key! { order_id: 7, line: 3 };
/// ```
#[macro_export]
macro_rules! key {
    ( $( $name:ident : $value:expr ),+ $(,)? ) => {
        $crate::model::KeyObject::new(vec![
            $( (stringify!($name).to_string(), $crate::core::Value::from($value)) ),+
        ])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_key() -> KeyDescriptor {
        KeyDescriptor::new(vec![KeyField::new("id", ValueType::Integer)])
    }

    fn line_key() -> KeyDescriptor {
        KeyDescriptor::new(vec![
            KeyField::new("order_id", ValueType::Integer),
            KeyField::new("line", ValueType::Integer),
        ])
    }

    fn doc(json: serde_json::Value) -> Document {
        match json {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_single_field_predicate() {
        let predicate = resolve(&user_key(), "users", &key! { id: 5 }).unwrap();
        assert!(predicate.matches(&doc(json!({ "id": 5, "name": "a" }))));
        assert!(!predicate.matches(&doc(json!({ "id": 6 }))));
    }

    #[test]
    fn test_composite_predicate_is_conjunction() {
        let predicate = resolve(&line_key(), "lines", &key! { order_id: 7, line: 3 }).unwrap();
        assert!(predicate.matches(&doc(json!({ "order_id": 7, "line": 3 }))));
        assert!(!predicate.matches(&doc(json!({ "order_id": 7, "line": 4 }))));
        assert!(!predicate.matches(&doc(json!({ "order_id": 8, "line": 3 }))));
    }

    #[test]
    fn test_case_insensitive_lookup() {
        // Key object names the field "Id"; descriptor declares "id".
        let source = KeyObject::new(vec![("Id".to_string(), Value::Integer(5))]);
        let predicate = resolve(&user_key(), "users", &source).unwrap();
        assert!(predicate.matches(&doc(json!({ "id": 5 }))));
    }

    #[test]
    fn test_missing_field_is_configuration_error() {
        let err = resolve(&user_key(), "users", &key! { name: "a" }).unwrap_err();
        assert!(matches!(err, RepoError::KeyFieldMissing(field, set)
            if field == "id" && set == "users"));
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let err = resolve(&user_key(), "users", &key! { id: "five" }).unwrap_err();
        assert!(matches!(err, RepoError::TypeMismatch(_)));
    }

    #[test]
    fn test_empty_descriptor_is_rejected() {
        let empty = KeyDescriptor::new(vec![]);
        let err = resolve(&empty, "users", &key! { id: 1 }).unwrap_err();
        assert!(matches!(err, RepoError::EmptyKey(_)));
    }

    #[test]
    fn test_extract_key_ordered() {
        let d = doc(json!({ "line": 3, "order_id": 7 }));
        let values = extract_key(&line_key(), "lines", &d).unwrap();
        assert_eq!(values, vec![Value::Integer(7), Value::Integer(3)]);
    }
}
