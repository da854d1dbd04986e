mod entity;
mod key;
mod navigation;

pub use entity::Entity;
pub(crate) use entity::{from_document, to_document};
pub use key::{resolve, KeyDescriptor, KeyField, KeyObject, KeyPredicate, KeySource};
pub(crate) use key::extract_key;
pub use navigation::{IncludePath, NavKind, Navigation};
pub(crate) use navigation::find_navigation;
