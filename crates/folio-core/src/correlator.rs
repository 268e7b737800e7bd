//! Leader/follower forest over result sets.
//!
//! Every result set has at most one leader and the relation never contains a
//! cycle. Each node keeps its leader's name (for ancestor checks) and an
//! ordered list of follower links (for traversal). A failed link leaves the
//! forest untouched.

use std::collections::HashMap;

use tracing::info;

use crate::catalog::QueryCatalog;
use crate::error::{EntityKind, FolioError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    /// Follower advances once per leader advance.
    Positional,
    /// N:1 on `leader_field = follower_field`.
    Keyed {
        leader_field: String,
        follower_field: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub follower: String,
    pub kind: LinkKind,
}

#[derive(Debug, Default)]
struct Node {
    leader: Option<String>,
    followers: Vec<Link>,
}

#[derive(Debug, Default)]
pub struct Correlator {
    nodes: HashMap<String, Node>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional 1:1 link.
    pub fn link(&mut self, catalog: &QueryCatalog, leader: &str, follower: &str) -> Result<()> {
        self.check(catalog, leader, follower)?;
        self.insert(leader, follower, LinkKind::Positional);
        info!("Linked '{}' -> '{}' (positional)", leader, follower);
        Ok(())
    }

    /// Keyed N:1 link. Fields are checked against any schema already known.
    pub fn link_keyed(
        &mut self,
        catalog: &QueryCatalog,
        leader: &str,
        leader_field: &str,
        follower: &str,
        follower_field: &str,
    ) -> Result<()> {
        if leader_field.is_empty() || follower_field.is_empty() {
            return Err(FolioError::InvalidParameters(
                "keyed link fields must not be empty".to_string(),
            ));
        }
        self.check(catalog, leader, follower)?;
        for (result, field) in [(leader, leader_field), (follower, follower_field)] {
            if let Some(schema) = catalog.by_name(result)?.schema() {
                if !schema.contains(field) {
                    return Err(FolioError::FieldNotFound {
                        result: result.to_string(),
                        field: field.to_string(),
                    });
                }
            }
        }
        self.insert(
            leader,
            follower,
            LinkKind::Keyed {
                leader_field: leader_field.to_string(),
                follower_field: follower_field.to_string(),
            },
        );
        info!(
            "Linked '{}.{}' -> '{}.{}' (keyed)",
            leader, leader_field, follower, follower_field
        );
        Ok(())
    }

    fn check(&self, catalog: &QueryCatalog, leader: &str, follower: &str) -> Result<()> {
        for name in [leader, follower] {
            if !catalog.contains(name) {
                return Err(FolioError::not_found(EntityKind::ResultSet, name));
            }
        }
        if leader == follower || self.is_ancestor(follower, leader) {
            return Err(FolioError::CycleDetected {
                leader: leader.to_string(),
                follower: follower.to_string(),
            });
        }
        if let Some(existing) = self.leader_of(follower) {
            return Err(FolioError::AlreadyLinked {
                follower: follower.to_string(),
                leader: existing.to_string(),
            });
        }
        Ok(())
    }

    fn insert(&mut self, leader: &str, follower: &str, kind: LinkKind) {
        self.nodes
            .entry(follower.to_string())
            .or_default()
            .leader = Some(leader.to_string());
        self.nodes
            .entry(leader.to_string())
            .or_default()
            .followers
            .push(Link {
                follower: follower.to_string(),
                kind,
            });
    }

    pub fn leader_of(&self, name: &str) -> Option<&str> {
        self.nodes.get(name).and_then(|n| n.leader.as_deref())
    }

    /// Follower links of `name` in insertion order.
    pub fn followers_of(&self, name: &str) -> &[Link] {
        self.nodes
            .get(name)
            .map(|n| n.followers.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `ancestor` is `name` itself or reachable by following leaders up from it.
    pub fn is_ancestor(&self, ancestor: &str, name: &str) -> bool {
        let mut current = Some(name);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.leader_of(n);
        }
        false
    }

    /// `root` and its descendants in depth-first preorder, followers in link order.
    pub fn subtree(&self, root: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![root.to_string()];
        while let Some(name) = stack.pop() {
            for link in self.followers_of(&name).iter().rev() {
                stack.push(link.follower.clone());
            }
            out.push(name);
        }
        out
    }

    /// Every link as `(leader, link)`.
    pub fn links(&self) -> impl Iterator<Item = (&str, &Link)> {
        self.nodes
            .iter()
            .flat_map(|(leader, node)| node.followers.iter().map(move |l| (leader.as_str(), l)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::{DatasourceRegistry, DatasourceSpec, FileFormat};

    fn catalog(names: &[&str]) -> QueryCatalog {
        let mut reg = DatasourceRegistry::new();
        reg.register(
            "files",
            DatasourceSpec::File {
                format: FileFormat::Csv,
                base_dir: None,
            },
        )
        .unwrap();
        let mut catalog = QueryCatalog::new();
        for name in names {
            catalog
                .add_query(&reg, "files", &format!("{}.csv", name), name)
                .unwrap();
        }
        catalog
    }

    #[test]
    fn test_disjoint_links_keep_forest() {
        let cat = catalog(&["a", "b", "c", "d"]);
        let mut c = Correlator::new();
        c.link(&cat, "a", "b").unwrap();
        c.link(&cat, "c", "d").unwrap();
        assert_eq!(c.leader_of("b"), Some("a"));
        assert_eq!(c.leader_of("d"), Some("c"));
        assert_eq!(c.leader_of("a"), None);
        assert_eq!(c.subtree("a"), vec!["a", "b"]);
    }

    #[test]
    fn test_reverse_link_is_cycle() {
        let cat = catalog(&["a", "b"]);
        let mut c = Correlator::new();
        c.link(&cat, "a", "b").unwrap();
        let err = c.link(&cat, "b", "a").unwrap_err();
        assert!(matches!(err, FolioError::CycleDetected { .. }));
        assert!(c.followers_of("b").is_empty());
        assert_eq!(c.leader_of("a"), None);
    }

    #[test]
    fn test_self_and_transitive_cycles() {
        let cat = catalog(&["a", "b", "c"]);
        let mut c = Correlator::new();
        assert!(matches!(
            c.link(&cat, "a", "a").unwrap_err(),
            FolioError::CycleDetected { .. }
        ));
        c.link(&cat, "a", "b").unwrap();
        c.link(&cat, "b", "c").unwrap();
        assert!(matches!(
            c.link(&cat, "c", "a").unwrap_err(),
            FolioError::CycleDetected { .. }
        ));
    }

    #[test]
    fn test_second_leader_rejected() {
        let cat = catalog(&["a", "b", "c"]);
        let mut c = Correlator::new();
        c.link(&cat, "a", "c").unwrap();
        match c.link(&cat, "b", "c").unwrap_err() {
            FolioError::AlreadyLinked { follower, leader } => {
                assert_eq!(follower, "c");
                assert_eq!(leader, "a");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(c.followers_of("b").is_empty());
    }

    #[test]
    fn test_unknown_result() {
        let cat = catalog(&["a"]);
        let mut c = Correlator::new();
        assert!(matches!(
            c.link(&cat, "a", "ghost").unwrap_err(),
            FolioError::NotFound { .. }
        ));
        assert!(matches!(
            c.link_keyed(&cat, "ghost", "id", "a", "id").unwrap_err(),
            FolioError::NotFound { .. }
        ));
    }

    #[test]
    fn test_subtree_preorder_follows_link_order() {
        let cat = catalog(&["root", "x", "y", "x1", "x2"]);
        let mut c = Correlator::new();
        c.link(&cat, "root", "x").unwrap();
        c.link_keyed(&cat, "root", "id", "y", "rid").unwrap();
        c.link(&cat, "x", "x1").unwrap();
        c.link(&cat, "x", "x2").unwrap();
        assert_eq!(c.subtree("root"), vec!["root", "x", "x1", "x2", "y"]);
        assert_eq!(c.subtree("x"), vec!["x", "x1", "x2"]);
        assert_eq!(c.links().count(), 4);
    }
}
