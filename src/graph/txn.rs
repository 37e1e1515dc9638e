use std::ops::Deref;

use chrono::{DateTime, Utc};

use super::{Edge, EdgeKind, Graph, Node, NodeData, NodeId};
use crate::error::{Error, Result};

enum Undo {
    NextId(u64),
    Created(NodeId),
    Deleted(Node),
    Linked(Edge),
    Unlinked(Edge),
    Updated(NodeId, NodeData),
}

/// A write batch in progress. Reads through `Deref` see the batch's own writes.
///
/// Every mutation records its inverse; [`GraphStore`](super::GraphStore) replays them in
/// reverse when the batch or its persistence fails.
pub struct Txn<'a> {
    graph: &'a mut Graph,
    undo: Vec<Undo>,
    now: DateTime<Utc>,
}

impl<'a> Txn<'a> {
    pub(super) fn new(graph: &'a mut Graph) -> Self {
        Self {
            graph,
            undo: Vec::new(),
            now: Utc::now(),
        }
    }

    /// Timestamp shared by every node created in this batch.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn create_node(&mut self, data: NodeData) -> NodeId {
        self.undo.push(Undo::NextId(self.graph.next_id()));
        let id = self.graph.mint_id();
        self.graph.insert_node(Node {
            id,
            created_at: self.now,
            data,
        });
        self.undo.push(Undo::Created(id));
        id
    }

    pub fn create_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) -> Result<()> {
        if !self.graph.contains(from) || !self.graph.contains(to) {
            return Err(Error::Persistence(format!(
                "edge {kind:?} {from} -> {to} references a missing node"
            )));
        }
        let edge = Edge { from, to, kind };
        if self.graph.has_edge(&edge) {
            return Err(Error::Persistence(format!(
                "edge {kind:?} {from} -> {to} already exists"
            )));
        }
        if kind.is_parent() && self.graph.parent(to).is_some() {
            return Err(Error::Persistence(format!("node {to} already has a parent")));
        }
        self.graph.insert_edge(edge);
        self.undo.push(Undo::Linked(edge));
        Ok(())
    }

    pub fn remove_edge(&mut self, edge: &Edge) -> bool {
        let removed = self.graph.remove_edge(edge);
        if removed {
            self.undo.push(Undo::Unlinked(*edge));
        }
        removed
    }

    pub fn update_node(&mut self, id: NodeId, f: impl FnOnce(&mut NodeData)) -> Result<()> {
        let data = self
            .graph
            .data_mut(id)
            .ok_or_else(|| Error::Persistence(format!("node {id} does not exist")))?;
        let before = data.clone();
        f(data);
        if data.kind() != before.kind() {
            *data = before;
            return Err(Error::Persistence(format!("update changed the kind of node {id}")));
        }
        self.undo.push(Undo::Updated(id, before));
        Ok(())
    }

    /// Deletes nodes and their incident edges. Missing ids are skipped.
    pub fn delete_nodes(&mut self, ids: &[NodeId]) -> usize {
        let mut deleted = 0;
        for &id in ids {
            let Some((node, edges)) = self.graph.remove_node(id) else {
                continue;
            };
            self.undo.extend(edges.into_iter().map(Undo::Unlinked));
            self.undo.push(Undo::Deleted(node));
            deleted += 1;
        }
        deleted
    }

    pub(super) fn is_dirty(&self) -> bool {
        !self.undo.is_empty()
    }

    pub(super) fn graph(&self) -> &Graph {
        &*self.graph
    }

    pub(super) fn rollback(mut self) {
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::NextId(next_id) => self.graph.set_next_id(next_id),
                Undo::Created(id) => {
                    self.graph.remove_node(id);
                }
                Undo::Deleted(node) => self.graph.insert_node(node),
                Undo::Linked(edge) => {
                    self.graph.remove_edge(&edge);
                }
                Undo::Unlinked(edge) => self.graph.insert_edge(edge),
                Undo::Updated(id, data) => {
                    if let Some(slot) = self.graph.data_mut(id) {
                        *slot = data;
                    }
                }
            }
        }
    }
}

impl Deref for Txn<'_> {
    type Target = Graph;

    fn deref(&self) -> &Graph {
        &*self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{HeadingNode, SubheadingNode};

    fn heading_data(text: &str) -> NodeData {
        NodeData::Heading(HeadingNode {
            text: text.to_owned(),
            page: 1,
            position: 0,
        })
    }

    fn subheading_data(title: &str) -> NodeData {
        NodeData::Subheading(SubheadingNode {
            title: title.to_owned(),
            context: String::new(),
            page: 1,
            position: 0,
        })
    }

    #[test]
    fn rollback_restores_previous_graph_exactly() -> Result<()> {
        let mut graph = Graph::default();
        let (h, s) = {
            let mut txn = Txn::new(&mut graph);
            let h = txn.create_node(heading_data("kept"));
            let s = txn.create_node(subheading_data("kept"));
            txn.create_edge(h, s, EdgeKind::HasSubheading)?;
            (h, s)
        };
        let before = format!("{:?}", graph.to_snapshot());

        let mut txn = Txn::new(&mut graph);
        let extra = txn.create_node(heading_data("extra"));
        let extra_sub = txn.create_node(subheading_data("extra"));
        txn.create_edge(extra, extra_sub, EdgeKind::HasSubheading)?;
        txn.update_node(h, |data| {
            if let NodeData::Heading(heading) = data {
                heading.text = "changed".to_owned();
            }
        })?;
        assert_eq!(txn.delete_nodes(&[s]), 1);
        txn.rollback();

        assert_eq!(format!("{:?}", graph.to_snapshot()), before);
        assert_eq!(graph.targets(h, EdgeKind::HasSubheading).collect::<Vec<_>>(), vec![s]);
        Ok(())
    }

    #[test]
    fn second_parent_edge_is_rejected() {
        let mut graph = Graph::default();
        let mut txn = Txn::new(&mut graph);
        let a = txn.create_node(heading_data("a"));
        let b = txn.create_node(heading_data("b"));
        let s = txn.create_node(subheading_data("s"));
        txn.create_edge(a, s, EdgeKind::HasSubheading).unwrap();
        let err = txn.create_edge(b, s, EdgeKind::HasSubheading).unwrap_err();
        assert!(matches!(err, Error::Persistence(msg) if msg.contains("already has a parent")));
    }

    #[test]
    fn edge_to_missing_node_is_rejected() {
        let mut graph = Graph::default();
        let mut txn = Txn::new(&mut graph);
        let a = txn.create_node(heading_data("a"));
        let err = txn
            .create_edge(a, NodeId(99), EdgeKind::HasSubheading)
            .unwrap_err();
        assert_eq!(err.kind(), "persistence");
    }

    #[test]
    fn update_cannot_change_node_kind() {
        let mut graph = Graph::default();
        let mut txn = Txn::new(&mut graph);
        let a = txn.create_node(heading_data("a"));
        let err = txn
            .update_node(a, |data| *data = subheading_data("s"))
            .unwrap_err();
        assert_eq!(err.kind(), "persistence");
        assert!(txn.node(a).unwrap().as_heading().is_some());
    }
}
