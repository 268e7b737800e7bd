//! The composite cursor: one navigable position over a leader/follower tree.
//!
//! Nodes are stored flattened in depth-first preorder, so "traversal order"
//! for unqualified field lookups is simply index order. Advancing moves the
//! root one row and then synchronises each follower in link order:
//!
//! - a positional follower sits on the same row index as its leader and
//!   reads `Null` past its own last row;
//! - a keyed follower only moves when the leader's key changes, jumping to
//!   the first matching row (or to "no data" when nothing matches);
//! - a follower that did not move leaves its own followers where they are,
//!   and a follower without a current row gives its followers no data.

use std::collections::HashMap;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::debug;

use crate::correlator::{Correlator, LinkKind};
use crate::error::{EntityKind, FolioError, Result};
use crate::metrics::EngineMetrics;
use crate::result_set::{Position, ResultSet};
use crate::value::{JoinKey, Value};

#[derive(Debug, Clone, Copy)]
enum Follow {
    Root,
    Positional,
    Keyed {
        leader_column: usize,
        follower_column: usize,
    },
}

#[derive(Debug)]
struct CursorNode {
    name: String,
    parent: Option<usize>,
    children: Vec<usize>,
    follow: Follow,
    /// `None` when the query (or a leader's query) failed.
    cursor: Option<ResultSet>,
    failure: Option<String>,
    /// Positional follower whose leader had no row.
    no_data: bool,
    /// Key the follower was last positioned for; `None` until first sync.
    last_key: Option<Option<JoinKey>>,
    repositions: u64,
}

impl CursorNode {
    fn has_row(&self) -> bool {
        !self.no_data && self.cursor.as_ref().is_some_and(|c| c.current().is_some())
    }
}

/// One composite row: every available result's columns, qualified as `result.column`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeRow {
    fields: Vec<(String, Value)>,
}

impl CompositeRow {
    pub fn get(&self, qualified: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == qualified)
            .map(|(_, v)| v)
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for CompositeRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[derive(Debug)]
pub struct CompositeCursor {
    nodes: Vec<CursorNode>,
    index: HashMap<String, usize>,
    metrics: Option<Arc<EngineMetrics>>,
}

impl CompositeCursor {
    /// Build the cursor for `root`'s subtree.
    ///
    /// `sets` holds a cursor, or a failure reason, for every result in the subtree.
    pub(crate) fn build(
        root: &str,
        correlator: &Correlator,
        mut sets: HashMap<String, std::result::Result<ResultSet, String>>,
        metrics: Option<Arc<EngineMetrics>>,
    ) -> Result<Self> {
        let mut cursor = Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            metrics,
        };
        cursor.push_node(root, None, Follow::Root, &mut sets)?;
        cursor.attach_followers(0, correlator, &mut sets)?;
        Ok(cursor)
    }

    fn push_node(
        &mut self,
        name: &str,
        parent: Option<usize>,
        follow: Follow,
        sets: &mut HashMap<String, std::result::Result<ResultSet, String>>,
    ) -> Result<usize> {
        let (cursor, failure) = match sets.remove(name) {
            Some(Ok(rs)) => (Some(rs), None),
            Some(Err(reason)) => (None, Some(reason)),
            None => return Err(FolioError::not_found(EntityKind::ResultSet, name)),
        };
        let idx = self.nodes.len();
        self.nodes.push(CursorNode {
            name: name.to_string(),
            parent,
            children: Vec::new(),
            follow,
            cursor,
            failure,
            no_data: false,
            last_key: None,
            repositions: 0,
        });
        self.index.insert(name.to_string(), idx);
        if let Some(p) = parent {
            self.nodes[p].children.push(idx);
        }
        Ok(idx)
    }

    fn attach_followers(
        &mut self,
        leader: usize,
        correlator: &Correlator,
        sets: &mut HashMap<String, std::result::Result<ResultSet, String>>,
    ) -> Result<()> {
        let leader_name = self.nodes[leader].name.clone();
        for link in correlator.followers_of(&leader_name) {
            let follow = match &link.kind {
                LinkKind::Positional => Follow::Positional,
                LinkKind::Keyed {
                    leader_field,
                    follower_field,
                } => {
                    let leader_column = self.column_for(leader, &leader_name, leader_field)?;
                    let follower_column = match sets.get(&link.follower) {
                        Some(Ok(rs)) => rs.schema().index_of(follower_field).ok_or_else(|| {
                            FolioError::FieldNotFound {
                                result: link.follower.clone(),
                                field: follower_field.clone(),
                            }
                        })?,
                        _ => 0,
                    };
                    Follow::Keyed {
                        leader_column: leader_column.unwrap_or(0),
                        follower_column,
                    }
                }
            };
            let idx = self.push_node(&link.follower, Some(leader), follow, sets)?;
            self.attach_followers(idx, correlator, sets)?;
        }
        Ok(())
    }

    /// Column index in a live node; `None` for a failed node.
    fn column_for(&self, idx: usize, result: &str, field: &str) -> Result<Option<usize>> {
        match &self.nodes[idx].cursor {
            Some(rs) => rs
                .schema()
                .index_of(field)
                .map(Some)
                .ok_or_else(|| FolioError::FieldNotFound {
                    result: result.to_string(),
                    field: field.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Move to the next composite row. Returns `false` once the primary is exhausted.
    pub fn advance(&mut self) -> bool {
        let moved = match self.nodes[0].cursor.as_mut() {
            Some(rs) => rs.next(),
            None => false,
        };
        self.sync_children(0);
        moved
    }

    fn sync_children(&mut self, idx: usize) {
        let children = self.nodes[idx].children.clone();
        for child in children {
            self.sync(child);
        }
    }

    fn sync(&mut self, idx: usize) {
        if self.nodes[idx].cursor.is_none() {
            return;
        }
        let Some(parent) = self.nodes[idx].parent else {
            return;
        };
        let leader_has_row = self.nodes[parent].has_row();

        match self.nodes[idx].follow {
            Follow::Root => {}
            Follow::Positional => {
                // Row i of the follower pairs with row i of the leader, wherever the leader jumped.
                let leader_row = match self.nodes[parent].cursor.as_ref().map(|rs| rs.position()) {
                    Some(Position::At(row)) if leader_has_row => Some(row),
                    _ => None,
                };
                let node = &mut self.nodes[idx];
                match leader_row {
                    Some(row) => {
                        node.no_data = false;
                        if let Some(rs) = node.cursor.as_mut() {
                            rs.seek(row);
                        }
                    }
                    None => node.no_data = true,
                }
                self.sync_children(idx);
            }
            Follow::Keyed {
                leader_column,
                follower_column,
            } => {
                let key = if leader_has_row {
                    self.nodes[parent]
                        .cursor
                        .as_ref()
                        .and_then(|rs| rs.value_at(leader_column).join_key())
                } else {
                    None
                };
                let node = &mut self.nodes[idx];
                if node.last_key.as_ref() == Some(&key) {
                    return;
                }
                if let Some(rs) = node.cursor.as_mut() {
                    match &key {
                        Some(k) => {
                            match rs.snapshot().find_first(follower_column, k) {
                                Some(row) => rs.seek(row),
                                None => rs.exhaust(),
                            }
                            node.repositions += 1;
                            debug!(
                                "Repositioned '{}' for key {} -> {:?}",
                                node.name,
                                k.as_str(),
                                rs.position()
                            );
                            if let Some(m) = &self.metrics {
                                m.follower_repositions.inc();
                            }
                        }
                        None => rs.exhaust(),
                    }
                }
                node.last_key = Some(key);
                self.sync_children(idx);
            }
        }
    }

    /// Move every cursor back before its first row and clear repositioning counters.
    pub fn rewind(&mut self) {
        for node in &mut self.nodes {
            if let Some(rs) = node.cursor.as_mut() {
                rs.reset();
            }
            node.no_data = false;
            node.last_key = None;
            node.repositions = 0;
        }
    }

    fn node(&self, result: &str) -> Result<&CursorNode> {
        let idx = self
            .index
            .get(result)
            .ok_or_else(|| FolioError::not_found(EntityKind::ResultSet, result))?;
        let node = &self.nodes[*idx];
        if let Some(reason) = &node.failure {
            return Err(FolioError::SubtreeFailed {
                result: result.to_string(),
                reason: reason.clone(),
            });
        }
        Ok(node)
    }

    /// Value of `column` in `result`'s current row; `Null` when it has no row.
    pub fn field_of(&self, result: &str, column: &str) -> Result<&Value> {
        let node = self.node(result)?;
        let Some(rs) = node.cursor.as_ref() else {
            return Err(FolioError::SubtreeFailed {
                result: result.to_string(),
                reason: "no result set".to_string(),
            });
        };
        let col = rs
            .schema()
            .index_of(column)
            .ok_or_else(|| FolioError::FieldNotFound {
                result: result.to_string(),
                field: column.to_string(),
            })?;
        if node.no_data {
            return Ok(&Value::Null);
        }
        Ok(rs.value_at(col))
    }

    /// Look up `result.column`, or an unqualified column in traversal order.
    pub fn field(&self, name: &str) -> Result<&Value> {
        if let Some((result, column)) = name.split_once('.') {
            if self.index.contains_key(result) {
                return self.field_of(result, column);
            }
        }
        for node in &self.nodes {
            if let Some(rs) = &node.cursor {
                if rs.schema().contains(name) {
                    return self.field_of(&node.name, name);
                }
            }
        }
        Err(FolioError::FieldNotFound {
            result: self.nodes[0].name.clone(),
            field: name.to_string(),
        })
    }

    /// The current composite row, or `None` before the first advance and after the last.
    pub fn current_row(&self) -> Option<CompositeRow> {
        if !self.nodes[0].has_row() {
            return None;
        }
        let mut fields = Vec::new();
        for node in &self.nodes {
            let Some(rs) = &node.cursor else {
                continue;
            };
            for (i, column) in rs.schema().columns().iter().enumerate() {
                let value = if node.no_data {
                    Value::Null
                } else {
                    rs.value_at(i).clone()
                };
                fields.push((format!("{}.{}", node.name, column), value));
            }
        }
        Some(CompositeRow { fields })
    }

    /// Rewind, then walk every composite row.
    pub fn collect_rows(&mut self) -> Vec<CompositeRow> {
        self.rewind();
        let mut rows = Vec::new();
        while self.advance() {
            if let Some(row) = self.current_row() {
                rows.push(row);
            }
        }
        rows
    }

    /// How often a keyed follower has been repositioned since the last rewind.
    pub fn repositions(&self, result: &str) -> Result<u64> {
        self.node(result).map(|n| n.repositions)
    }

    pub fn primary(&self) -> &str {
        &self.nodes[0].name
    }

    /// Result names in traversal order.
    pub fn results(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    /// Failure reason for a result that could not be produced.
    pub fn failure(&self, result: &str) -> Option<&str> {
        self.index
            .get(result)
            .and_then(|i| self.nodes[*i].failure.as_deref())
    }
}
