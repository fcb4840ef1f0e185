use serde::{Deserialize, Serialize};

use crate::application::errors::NamespaceError;
use crate::domain::namespace::NamespaceTree;

/// Allow and deny lists attached to one override path.
///
/// Entries are permission node paths such as `Role.123` or `User.456`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverrideNode {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

impl OverrideNode {
    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }
}

/// Per-tenant override tree, stored as nested JSON in the tenant document.
///
/// Leaves and branches share one JSON shape, so a branch whose only
/// children are named `allow` or `deny` would read back as a leaf. Those
/// names are refused as path segments when the tree is built.
pub type OverrideTree = NamespaceTree<OverrideNode>;

const RESERVED_SEGMENTS: [&str; 2] = ["allow", "deny"];

fn check_segments(path: &str) -> Result<(), NamespaceError> {
    match path.split('.').find(|s| RESERVED_SEGMENTS.contains(s)) {
        Some(segment) => Err(NamespaceError::ReservedSegment {
            path: path.to_string(),
            segment: segment.to_string(),
        }),
        None => Ok(()),
    }
}

/// Operator-facing view: one subject with the paths it is allowed or denied
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideEntry {
    pub id: String,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

impl NamespaceTree<OverrideNode> {
    /// Build a tree from subject entries.
    ///
    /// `{id: "Role.1", allow: ["Commands.ban"]}` puts `Role.1` on the allow
    /// list of the `Commands.ban` override.
    pub fn from_entries(entries: &[OverrideEntry]) -> Result<Self, NamespaceError> {
        let mut tree = NamespaceTree::new();
        for entry in entries {
            for path in &entry.allow {
                check_segments(path)?;
                let node = tree.get_or_insert_with(path, OverrideNode::default)?;
                if !node.allow.contains(&entry.id) {
                    node.allow.push(entry.id.clone());
                }
            }
            for path in &entry.deny {
                check_segments(path)?;
                let node = tree.get_or_insert_with(path, OverrideNode::default)?;
                if !node.deny.contains(&entry.id) {
                    node.deny.push(entry.id.clone());
                }
            }
        }
        Ok(tree)
    }

    /// Inverse of [`from_entries`](Self::from_entries), sorted by subject id
    pub fn to_entries(&self) -> Vec<OverrideEntry> {
        let mut by_id: std::collections::BTreeMap<String, OverrideEntry> = Default::default();
        for (path, node) in self.entries() {
            for id in &node.allow {
                by_id
                    .entry(id.clone())
                    .or_insert_with(|| OverrideEntry { id: id.clone(), ..Default::default() })
                    .allow
                    .push(path.clone());
            }
            for id in &node.deny {
                by_id
                    .entry(id.clone())
                    .or_insert_with(|| OverrideEntry { id: id.clone(), ..Default::default() })
                    .deny
                    .push(path.clone());
            }
        }
        by_id.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entries_round_trip() {
        let entries = vec![
            OverrideEntry {
                id: "Role.1".into(),
                allow: vec!["Commands.ban".into(), "Commands.kick".into()],
                deny: vec![],
            },
            OverrideEntry {
                id: "User.9".into(),
                allow: vec![],
                deny: vec!["Commands.ban".into()],
            },
        ];
        let tree = OverrideTree::from_entries(&entries).unwrap();

        let ban = tree.get_exact("Commands.ban").unwrap();
        assert_eq!(ban.allow, vec!["Role.1"]);
        assert_eq!(ban.deny, vec!["User.9"]);
        assert_eq!(tree.to_entries(), entries);
    }

    #[test]
    fn conflicting_entry_paths_are_rejected() {
        let entries = vec![OverrideEntry {
            id: "Role.1".into(),
            allow: vec!["Commands.ban".into(), "Commands.ban.temp".into()],
            deny: vec![],
        }];
        assert!(OverrideTree::from_entries(&entries).is_err());
    }

    #[test]
    fn reserved_segments_are_rejected() {
        for path in ["Commands.allow", "deny", "Commands.deny.ban"] {
            let entries = vec![OverrideEntry {
                id: "Role.1".into(),
                allow: vec![path.into()],
                deny: vec![],
            }];
            assert!(matches!(
                OverrideTree::from_entries(&entries),
                Err(NamespaceError::ReservedSegment { .. })
            ));
        }

        let entries = vec![OverrideEntry {
            id: "Role.1".into(),
            allow: vec![],
            deny: vec!["Commands.allowed".into()],
        }];
        assert!(OverrideTree::from_entries(&entries).is_ok());
    }

    #[test]
    fn stored_document_shape() {
        let tree: OverrideTree = serde_json::from_value(json!({
            "Commands": { "*": { "allow": ["Role.1"] } }
        }))
        .unwrap();

        let node = tree.lookup("Commands.anything").unwrap();
        assert_eq!(node.allow, vec!["Role.1"]);
        assert!(node.deny.is_empty());
        assert_eq!(
            serde_json::to_value(&tree).unwrap(),
            json!({"Commands": {"*": {"allow": ["Role.1"], "deny": []}}})
        );
    }
}
