mod error;
mod value;

pub use error::{RepoError, Result};
pub use value::{Value, ValueType};
