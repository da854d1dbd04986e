use crate::core::{RepoError, Result};
use crate::engine::Document;
use crate::model::{KeyDescriptor, Navigation};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

/// A persistable entity type.
///
/// Entities are plain serde types; the layer is shape-agnostic beyond the
/// declared key and navigation metadata. Metadata is registered statically
/// here rather than discovered by runtime reflection.
///
/// Navigation fields must deserialize when absent (use `#[serde(default)]`),
/// because sessions only return the navigations named by a repository's
/// include path.
///
/// ```rust,ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// struct User {
///     id: i64,
///     name: String,
///     #[serde(default)]
///     supervisor: Option<Supervisor>,
/// }
///
/// impl Entity for User {
///     fn set() -> &'static str {
///         "users"
///     }
///
///     fn key_descriptor() -> KeyDescriptor {
///         KeyDescriptor::new(vec![KeyField::new("id", ValueType::Integer)])
///     }
///
///     fn navigations() -> Vec<Navigation> {
///         vec![Navigation::to_one::<Supervisor>("supervisor")]
///     }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Name of the entity set this type is stored in.
    fn set() -> &'static str;

    /// The declared primary key, single or composite.
    fn key_descriptor() -> KeyDescriptor;

    /// Declared navigation properties. Defaults to none.
    fn navigations() -> Vec<Navigation> {
        Vec::new()
    }
}

/// Serialize an entity into its document form.
pub(crate) fn to_document<E: Entity>(entity: &E) -> Result<Document> {
    match serde_json::to_value(entity)? {
        JsonValue::Object(map) => Ok(map),
        other => Err(RepoError::InvalidDocument(format!(
            "entity for set '{}' serialized to {} instead of an object",
            E::set(),
            match other {
                JsonValue::Null => "null",
                JsonValue::Bool(_) => "a boolean",
                JsonValue::Number(_) => "a number",
                JsonValue::String(_) => "a string",
                JsonValue::Array(_) => "an array",
                JsonValue::Object(_) => unreachable!(),
            }
        ))),
    }
}

/// Deserialize a document back into the entity type.
pub(crate) fn from_document<E: Entity>(doc: Document) -> Result<E> {
    serde_json::from_value(JsonValue::Object(doc)).map_err(RepoError::from)
}
