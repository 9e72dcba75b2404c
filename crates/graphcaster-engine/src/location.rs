//! Location indexes: where in a nested document a contribution came from.
//!
//! A location is a path of mapping keys and array positions, e.g.
//! `(0, "dependencies", "depends", 3)`. The interpreter tags every vertex
//! contribution with its location; edge discriminants (`match_source`,
//! `exclude_target`) and relation derivation (`relation_from_key`) are
//! expressed over these paths.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LocationStep {
    Item(usize),
    Key(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocationIndex {
    path: Vec<LocationStep>,
}

impl LocationIndex {
    pub fn root() -> Self {
        LocationIndex { path: Vec::new() }
    }

    pub fn push_item(&self, index: usize) -> Self {
        let mut path = self.path.clone();
        path.push(LocationStep::Item(index));
        LocationIndex { path }
    }

    pub fn push_key(&self, key: &str) -> Self {
        let mut path = self.path.clone();
        path.push(LocationStep::Key(key.to_string()));
        LocationIndex { path }
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }

    pub fn steps(&self) -> &[LocationStep] {
        &self.path
    }

    /// Whether the given mapping key occurs anywhere on the path.
    pub fn contains_key(&self, key: &str) -> bool {
        self.path
            .iter()
            .any(|s| matches!(s, LocationStep::Key(k) if k == key))
    }

    /// The deepest mapping key on the path.
    pub fn last_key(&self) -> Option<&str> {
        self.path.iter().rev().find_map(|s| match s {
            LocationStep::Key(k) => Some(k.as_str()),
            LocationStep::Item(_) => None,
        })
    }

    /// The enclosing top-level document element: the leading array step of
    /// the path.
    pub fn document_element(&self) -> LocationIndex {
        LocationIndex {
            path: self.path.iter().take(1).cloned().collect(),
        }
    }

    pub fn starts_with(&self, prefix: &LocationIndex) -> bool {
        self.path.len() >= prefix.path.len() && self.path[..prefix.path.len()] == prefix.path
    }

    /// Length of the longest common prefix with another location.
    pub fn congruence_measure(&self, other: &LocationIndex) -> usize {
        self.path
            .iter()
            .zip(other.path.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }
}

impl fmt::Display for LocationIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, step) in self.path.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match step {
                LocationStep::Item(n) => write!(f, "{n}")?,
                LocationStep::Key(k) => write!(f, "'{k}'")?,
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_key_and_last_key() {
        let loc = LocationIndex::root()
            .push_item(0)
            .push_key("dependencies")
            .push_key("pre-depends")
            .push_item(2);
        assert!(loc.contains_key("dependencies"));
        assert!(loc.contains_key("pre-depends"));
        assert!(!loc.contains_key("suggests"));
        assert_eq!(loc.last_key(), Some("pre-depends"));
        assert_eq!(loc.depth(), 4);
    }

    #[test]
    fn prefix_and_congruence() {
        let base = LocationIndex::root().push_item(1);
        let nested = base.push_key("triple").push_item(0);
        assert!(nested.starts_with(&base));
        assert!(!base.starts_with(&nested));
        assert_eq!(nested.congruence_measure(&base), 1);

        let other = LocationIndex::root().push_item(1).push_key("triple_index");
        assert_eq!(nested.congruence_measure(&other), 1);
    }

    #[test]
    fn ordering_is_by_path() {
        let a = LocationIndex::root().push_item(0);
        let b = LocationIndex::root().push_item(0).push_key("x");
        let c = LocationIndex::root().push_item(1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn display_form() {
        let loc = LocationIndex::root().push_item(0).push_key("triple").push_item(1);
        assert_eq!(loc.to_string(), "(0, 'triple', 1)");
    }

    fn arbitrary_location() -> impl proptest::strategy::Strategy<Value = LocationIndex> {
        use proptest::prelude::*;
        prop::collection::vec(
            prop_oneof![
                (0usize..8).prop_map(LocationStep::Item),
                "[a-z]{1,6}".prop_map(LocationStep::Key),
            ],
            0..6,
        )
        .prop_map(|path| {
            let mut loc = LocationIndex::root();
            for step in path {
                loc = match step {
                    LocationStep::Item(n) => loc.push_item(n),
                    LocationStep::Key(k) => loc.push_key(&k),
                };
            }
            loc
        })
    }

    proptest::proptest! {
        #[test]
        fn congruence_is_bounded_by_depth(a in arbitrary_location(), b in arbitrary_location()) {
            let m = a.congruence_measure(&b);
            proptest::prop_assert!(m <= a.depth().min(b.depth()));
            proptest::prop_assert_eq!(m, b.congruence_measure(&a));
            proptest::prop_assert_eq!(a.congruence_measure(&a), a.depth());
        }

        #[test]
        fn extended_locations_keep_their_prefix(a in arbitrary_location(), key in "[a-z]{1,6}", n in 0usize..8) {
            let deeper = a.push_key(&key).push_item(n);
            proptest::prop_assert!(deeper.starts_with(&a));
            proptest::prop_assert_eq!(deeper.congruence_measure(&a), a.depth());
            proptest::prop_assert_eq!(deeper.last_key(), Some(key.as_str()));
        }
    }
}
