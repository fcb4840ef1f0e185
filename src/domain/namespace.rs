//! Namespace tree - dotted-path registry shared by permission nodes and overrides
//!
//! Paths are split on `.`. Every segment is either a branch holding further
//! segments or a leaf holding a value, never both. A `*` leaf acts as the
//! fallback for any sibling segment that has no exact entry, and keeps
//! covering the descendants of exact branches that have no deeper match.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::application::errors::NamespaceError;

/// Segment that matches any sibling without an exact entry
pub const WILDCARD: &str = "*";

/// A single tree position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node<T> {
    Leaf(T),
    Branch(BTreeMap<String, Node<T>>),
}

/// Recursive segment map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceTree<T> {
    root: BTreeMap<String, Node<T>>,
}

impl<T> Default for NamespaceTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> NamespaceTree<T> {
    pub fn new() -> Self {
        Self {
            root: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Number of leaves in the tree
    pub fn len(&self) -> usize {
        fn count<T>(map: &BTreeMap<String, Node<T>>) -> usize {
            map.values()
                .map(|node| match node {
                    Node::Leaf(_) => 1,
                    Node::Branch(children) => count(children),
                })
                .sum()
        }
        count(&self.root)
    }

    /// Set `path` to `value`, creating intermediate branches.
    ///
    /// Returns the previous leaf at exactly this path, if any. Fails when an
    /// intermediate segment is already a leaf or the terminal segment already
    /// holds children; the tree is left unchanged in both cases.
    pub fn register(&mut self, path: &str, value: T) -> Result<Option<T>, NamespaceError> {
        let segments = split(path)?;
        let Some((last, parents)) = segments.split_last() else {
            return Err(NamespaceError::EmptyPath);
        };

        let current = descend_or_create(&mut self.root, path, parents)?;

        if let Some(Node::Branch(children)) = current.get(*last) {
            if !children.is_empty() {
                return Err(NamespaceError::SubtreeAtTerminal(path.to_string()));
            }
        }

        match current.insert(last.to_string(), Node::Leaf(value)) {
            Some(Node::Leaf(previous)) => Ok(Some(previous)),
            _ => Ok(None),
        }
    }

    /// Leaf at `path`, inserting `default()` when the path is free.
    pub fn get_or_insert_with<F>(&mut self, path: &str, default: F) -> Result<&mut T, NamespaceError>
    where
        F: FnOnce() -> T,
    {
        let segments = split(path)?;
        let Some((last, parents)) = segments.split_last() else {
            return Err(NamespaceError::EmptyPath);
        };

        let current = descend_or_create(&mut self.root, path, parents)?;

        let vacant = match current.get(*last) {
            None => true,
            Some(Node::Branch(children)) if children.is_empty() => true,
            Some(Node::Branch(_)) => {
                return Err(NamespaceError::SubtreeAtTerminal(path.to_string()))
            }
            Some(Node::Leaf(_)) => false,
        };
        if vacant {
            current.insert(last.to_string(), Node::Leaf(default()));
        }

        match current.get_mut(*last) {
            Some(Node::Leaf(value)) => Ok(value),
            _ => Err(NamespaceError::SubtreeAtTerminal(path.to_string())),
        }
    }

    /// Most specific leaf covering `path`.
    ///
    /// An exact leaf always wins over a wildcard. A `*` leaf seen at any
    /// level on the way down is remembered and returned when the walk runs
    /// out of exact segments.
    pub fn lookup(&self, path: &str) -> Option<&T> {
        let mut current = &self.root;
        let mut fallback = None;

        for segment in path.split('.') {
            if let Some(Node::Leaf(value)) = current.get(WILDCARD) {
                fallback = Some(value);
            }
            match current.get(segment) {
                Some(Node::Leaf(value)) => return Some(value),
                Some(Node::Branch(children)) => current = children,
                None => return fallback,
            }
        }

        fallback
    }

    /// Leaf stored at exactly `path`, ignoring wildcards
    pub fn get_exact(&self, path: &str) -> Option<&T> {
        let mut current = &self.root;
        let mut segments = path.split('.').peekable();

        while let Some(segment) = segments.next() {
            match current.get(segment)? {
                Node::Leaf(value) => return segments.peek().is_none().then_some(value),
                Node::Branch(children) => current = children,
            }
        }
        None
    }

    /// Remove the leaf at exactly `path`, pruning branches left empty
    pub fn remove(&mut self, path: &str) -> Option<T> {
        let segments: Vec<&str> = path.split('.').collect();
        remove_in(&mut self.root, &segments)
    }

    /// Every leaf with its full dotted path, in path order
    pub fn entries(&self) -> Vec<(String, &T)> {
        fn walk<'a, T>(map: &'a BTreeMap<String, Node<T>>, prefix: &str, out: &mut Vec<(String, &'a T)>) {
            for (segment, node) in map {
                let path = if prefix.is_empty() {
                    segment.clone()
                } else {
                    format!("{}.{}", prefix, segment)
                };
                match node {
                    Node::Leaf(value) => out.push((path, value)),
                    Node::Branch(children) => walk(children, &path, out),
                }
            }
        }

        let mut out = Vec::new();
        walk(&self.root, "", &mut out);
        out
    }
}

fn split(path: &str) -> Result<Vec<&str>, NamespaceError> {
    if path.is_empty() {
        return Err(NamespaceError::EmptyPath);
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(NamespaceError::EmptySegment(path.to_string()));
    }
    Ok(segments)
}

fn descend_or_create<'a, T>(
    root: &'a mut BTreeMap<String, Node<T>>,
    path: &str,
    parents: &[&str],
) -> Result<&'a mut BTreeMap<String, Node<T>>, NamespaceError> {
    // Refuse before creating anything so a failed registration leaves no stubs.
    let mut cursor = &*root;
    for segment in parents {
        match cursor.get(*segment) {
            Some(Node::Leaf(_)) => {
                return Err(NamespaceError::LeafInPath {
                    path: path.to_string(),
                    segment: segment.to_string(),
                })
            }
            Some(Node::Branch(children)) => cursor = children,
            None => break,
        }
    }

    let mut current = root;
    for segment in parents {
        let node = current
            .entry(segment.to_string())
            .or_insert_with(|| Node::Branch(BTreeMap::new()));
        current = match node {
            Node::Branch(children) => children,
            Node::Leaf(_) => {
                return Err(NamespaceError::LeafInPath {
                    path: path.to_string(),
                    segment: segment.to_string(),
                })
            }
        };
    }
    Ok(current)
}

fn remove_in<T>(map: &mut BTreeMap<String, Node<T>>, segments: &[&str]) -> Option<T> {
    let (first, rest) = segments.split_first()?;

    if rest.is_empty() {
        return match map.remove(*first) {
            Some(Node::Leaf(value)) => Some(value),
            Some(branch) => {
                map.insert(first.to_string(), branch);
                None
            }
            None => None,
        };
    }

    let (removed, now_empty) = match map.get_mut(*first)? {
        Node::Branch(children) => {
            let removed = remove_in(children, rest);
            (removed, children.is_empty())
        }
        Node::Leaf(_) => return None,
    };
    if now_empty {
        map.remove(*first);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_leaf_beats_wildcard_sibling() {
        let mut tree = NamespaceTree::new();
        tree.register("Role.*", "E1").unwrap();
        tree.register("Role.123", "E2").unwrap();

        assert_eq!(tree.lookup("Role.123"), Some(&"E2"));
        assert_eq!(tree.lookup("Role.456"), Some(&"E1"));
        assert_eq!(tree.lookup("User.1"), None);
    }

    #[test]
    fn ancestor_wildcard_covers_unmodeled_descendants() {
        let mut tree = NamespaceTree::new();
        tree.register("Commands.*", "any").unwrap();
        tree.register("Commands.moderation.ban", "ban").unwrap();

        assert_eq!(tree.lookup("Commands.moderation.ban"), Some(&"ban"));
        assert_eq!(tree.lookup("Commands.moderation.kick"), Some(&"any"));
        assert_eq!(tree.lookup("Commands.xp.show"), Some(&"any"));
        // a branch itself is not a leaf
        assert_eq!(tree.lookup("Commands.moderation"), Some(&"any"));
    }

    #[test]
    fn deeper_wildcard_is_more_specific() {
        let mut tree = NamespaceTree::new();
        tree.register("Commands.*", "outer").unwrap();
        tree.register("Commands.moderation.*", "inner").unwrap();

        assert_eq!(tree.lookup("Commands.moderation.kick"), Some(&"inner"));
        assert_eq!(tree.lookup("Commands.fun.roll"), Some(&"outer"));
    }

    #[test]
    fn child_under_leaf_is_rejected() {
        let mut tree = NamespaceTree::new();
        tree.register("Commands.ban", 1).unwrap();

        let err = tree.register("Commands.ban.temp", 2).unwrap_err();
        assert!(matches!(err, NamespaceError::LeafInPath { ref segment, .. } if segment == "ban"));
        assert_eq!(tree.lookup("Commands.ban"), Some(&1));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn leaf_over_subtree_is_rejected() {
        let mut tree = NamespaceTree::new();
        tree.register("Commands.moderation.ban", 1).unwrap();

        let err = tree.register("Commands.moderation", 2).unwrap_err();
        assert_eq!(err, NamespaceError::SubtreeAtTerminal("Commands.moderation".into()));
    }

    #[test]
    fn empty_segments_are_rejected() {
        let mut tree: NamespaceTree<u8> = NamespaceTree::new();
        assert_eq!(tree.register("", 1), Err(NamespaceError::EmptyPath));
        assert!(matches!(tree.register("a..b", 1), Err(NamespaceError::EmptySegment(_))));
        assert!(tree.is_empty());
    }

    #[test]
    fn re_registering_returns_previous_leaf() {
        let mut tree = NamespaceTree::new();
        assert_eq!(tree.register("a.b", 1).unwrap(), None);
        assert_eq!(tree.register("a.b", 2).unwrap(), Some(1));
        assert_eq!(tree.get_exact("a.b"), Some(&2));
    }

    #[test]
    fn get_exact_ignores_wildcards() {
        let mut tree = NamespaceTree::new();
        tree.register("Role.*", 1).unwrap();

        assert_eq!(tree.get_exact("Role.5"), None);
        assert_eq!(tree.get_exact("Role.*"), Some(&1));
        assert_eq!(tree.get_exact("Role.*.x"), None);
    }

    #[test]
    fn remove_prunes_empty_branches() {
        let mut tree = NamespaceTree::new();
        tree.register("a.b.c", 1).unwrap();
        tree.register("a.d", 2).unwrap();

        assert_eq!(tree.remove("a.b.c"), Some(1));
        assert_eq!(tree.entries(), vec![("a.d".to_string(), &2)]);
        assert_eq!(tree.remove("a"), None);
        assert_eq!(tree.remove("a.d"), Some(2));
        assert!(tree.is_empty());
    }

    #[test]
    fn get_or_insert_with_reuses_existing_leaf() {
        let mut tree: NamespaceTree<Vec<u8>> = NamespaceTree::new();
        tree.get_or_insert_with("x.y", Vec::new).unwrap().push(1);
        tree.get_or_insert_with("x.y", Vec::new).unwrap().push(2);

        assert_eq!(tree.get_exact("x.y"), Some(&vec![1, 2]));
        assert!(tree.get_or_insert_with("x", Vec::new).is_err());
    }

    #[test]
    fn deserializes_nested_json() {
        let tree: NamespaceTree<u32> =
            serde_json::from_value(serde_json::json!({ "Role": { "*": 1, "9": 2 } })).unwrap();

        assert_eq!(tree.lookup("Role.9"), Some(&2));
        assert_eq!(tree.lookup("Role.10"), Some(&1));
    }

    mod proptest_namespace {
        use super::*;
        use proptest::prelude::*;

        fn segment() -> impl Strategy<Value = String> {
            "[a-z0-9]{1,6}"
        }

        proptest! {
            /// At every depth, an exact leaf is preferred over a wildcard sibling
            #[test]
            fn exact_sibling_wins_at_every_depth(
                prefix in prop::collection::vec(segment(), 0..5),
                exact in segment(),
                other in segment(),
            ) {
                prop_assume!(exact != other);

                let mut tree = NamespaceTree::new();
                let base = prefix.join(".");
                let join = |last: &str| if base.is_empty() { last.to_string() } else { format!("{}.{}", base, last) };

                tree.register(&join(WILDCARD), "wildcard").unwrap();
                tree.register(&join(&exact), "exact").unwrap();

                prop_assert_eq!(tree.lookup(&join(&exact)), Some(&"exact"));
                prop_assert_eq!(tree.lookup(&join(&other)), Some(&"wildcard"));
            }
        }
    }
}
