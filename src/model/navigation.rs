use crate::core::{RepoError, Result};
use crate::model::KeyDescriptor;

/// Cardinality of a navigation property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavKind {
    /// A reference to a single related entity (nullable).
    One,
    /// A collection of related entities.
    Many,
}

/// Statically-declared metadata for one navigation property.
///
/// Target metadata is reached through fn pointers so that mutually
/// referencing entity types remain representable.
#[derive(Debug, Clone, Copy)]
pub struct Navigation {
    pub name: &'static str,
    pub kind: NavKind,
    pub target_set: &'static str,
    pub target_key: fn() -> KeyDescriptor,
    pub target_navigations: fn() -> Vec<Navigation>,
}

impl Navigation {
    pub fn to_one<E: crate::model::Entity>(name: &'static str) -> Self {
        Self {
            name,
            kind: NavKind::One,
            target_set: E::set(),
            target_key: E::key_descriptor,
            target_navigations: E::navigations,
        }
    }

    pub fn to_many<E: crate::model::Entity>(name: &'static str) -> Self {
        Self {
            name,
            kind: NavKind::Many,
            target_set: E::set(),
            target_key: E::key_descriptor,
            target_navigations: E::navigations,
        }
    }
}

/// An ordered set of navigation chains attached to a repository.
///
/// Each chain both extends the produced query (the engine eager-loads that
/// relation) and extends the update-reconciliation walk, one link per
/// navigation. `push_chain` starts a new chain; `extend_last` appends one
/// link to the most recently started chain.
#[derive(Debug, Clone, Default)]
pub struct IncludePath {
    chains: Vec<Vec<Navigation>>,
}

impl IncludePath {
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn chains(&self) -> &[Vec<Navigation>] {
        &self.chains
    }

    /// Start a new chain rooted at a navigation of the repository's entity.
    pub fn push_chain(&mut self, navigation: Navigation) {
        self.chains.push(vec![navigation]);
    }

    /// Extend the most recently started chain by one link.
    ///
    /// # Errors
    /// [`RepoError::InvalidIncludePath`] when no chain has been started.
    pub fn extend_last(&mut self, navigation: Navigation) -> Result<()> {
        match self.chains.last_mut() {
            Some(chain) => {
                chain.push(navigation);
                Ok(())
            }
            None => Err(RepoError::InvalidIncludePath(
                "then_include requires a preceding include".to_string(),
            )),
        }
    }

    /// Whether a top-level navigation name is covered by any chain.
    pub fn includes(&self, name: &str) -> bool {
        self.chains
            .iter()
            .any(|chain| chain.first().map(|nav| nav.name == name).unwrap_or(false))
    }
}

/// Look up a navigation by name among a set of declared navigations.
pub(crate) fn find_navigation(
    navigations: &[Navigation],
    name: &str,
    set: &str,
) -> Result<Navigation> {
    navigations
        .iter()
        .find(|nav| nav.name == name)
        .copied()
        .ok_or_else(|| RepoError::UnknownNavigation(name.to_string(), set.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ValueType;
    use crate::model::KeyField;

    fn nav(name: &'static str, kind: NavKind) -> Navigation {
        Navigation {
            name,
            kind,
            target_set: "targets",
            target_key: || KeyDescriptor::new(vec![KeyField::new("id", ValueType::Integer)]),
            target_navigations: Vec::new,
        }
    }

    #[test]
    fn test_include_then_include_builds_one_chain() {
        let mut path = IncludePath::default();
        path.push_chain(nav("orders", NavKind::Many));
        path.extend_last(nav("lines", NavKind::Many)).unwrap();

        assert_eq!(path.chains().len(), 1);
        assert_eq!(path.chains()[0].len(), 2);
        assert!(path.includes("orders"));
        assert!(!path.includes("lines"));
    }

    #[test]
    fn test_two_includes_build_two_chains() {
        let mut path = IncludePath::default();
        path.push_chain(nav("orders", NavKind::Many));
        path.push_chain(nav("supervisor", NavKind::One));

        assert_eq!(path.chains().len(), 2);
        assert!(path.includes("orders"));
        assert!(path.includes("supervisor"));
    }

    #[test]
    fn test_then_include_without_include_fails() {
        let mut path = IncludePath::default();
        let err = path.extend_last(nav("lines", NavKind::Many)).unwrap_err();
        assert!(matches!(err, RepoError::InvalidIncludePath(_)));
    }

    #[test]
    fn test_find_navigation() {
        let navs = [nav("orders", NavKind::Many)];
        assert!(find_navigation(&navs, "orders", "users").is_ok());
        let err = find_navigation(&navs, "missing", "users").unwrap_err();
        assert!(matches!(err, RepoError::UnknownNavigation(name, set)
            if name == "missing" && set == "users"));
    }
}
