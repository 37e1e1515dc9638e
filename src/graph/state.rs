use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{Edge, EdgeKind, Node, NodeData, NodeId};

/// Serialized form of a [`Graph`]. Indexes are rebuilt on load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub next_id: u64,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// In-memory graph with adjacency indexes in both directions.
#[derive(Debug, Default, Clone)]
pub struct Graph {
    next_id: u64,
    nodes: HashMap<NodeId, Node>,
    outgoing: HashMap<NodeId, Vec<Edge>>,
    incoming: HashMap<NodeId, Vec<Edge>>,
    documents: HashMap<String, NodeId>,
}

impl Graph {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.outgoing.values().map(Vec::len).sum()
    }

    pub fn outgoing(&self, id: NodeId) -> &[Edge] {
        self.outgoing.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn incoming(&self, id: NodeId) -> &[Edge] {
        self.incoming.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn has_edge(&self, edge: &Edge) -> bool {
        self.outgoing(edge.from).contains(edge)
    }

    /// Targets of `id`'s outgoing edges of `kind`, in insertion order.
    pub fn targets(&self, id: NodeId, kind: EdgeKind) -> impl Iterator<Item = NodeId> + '_ {
        self.outgoing(id)
            .iter()
            .filter(move |edge| edge.kind == kind)
            .map(|edge| edge.to)
    }

    pub fn parent(&self, id: NodeId) -> Option<&Edge> {
        self.incoming(id).iter().find(|edge| edge.kind.is_parent())
    }

    pub fn document(&self, document_id: &str) -> Option<&Node> {
        self.documents
            .get(document_id)
            .and_then(|id| self.nodes.get(id))
    }

    pub fn documents(&self) -> impl Iterator<Item = &Node> {
        self.documents.values().filter_map(|id| self.nodes.get(id))
    }

    /// All nodes below `root` reached through heading/subheading/visual edges.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            for edge in self.outgoing(id) {
                if edge.kind.is_structural() {
                    out.push(edge.to);
                    stack.push(edge.to);
                }
            }
        }
        out
    }

    pub fn to_snapshot(&self) -> GraphSnapshot {
        let mut nodes = self.nodes.values().cloned().collect::<Vec<_>>();
        nodes.sort_by_key(|node| node.id);
        let mut edges = self
            .outgoing
            .values()
            .flatten()
            .copied()
            .collect::<Vec<_>>();
        edges.sort_by_key(|edge| (edge.from, edge.to));
        GraphSnapshot {
            next_id: self.next_id,
            nodes,
            edges,
        }
    }

    pub fn from_snapshot(snapshot: GraphSnapshot) -> anyhow::Result<Self> {
        let mut graph = Graph {
            next_id: snapshot.next_id,
            ..Graph::default()
        };
        for node in snapshot.nodes {
            if node.id.0 >= graph.next_id {
                anyhow::bail!("snapshot node {} is beyond next_id {}", node.id, graph.next_id);
            }
            if graph.nodes.contains_key(&node.id) {
                anyhow::bail!("snapshot contains node {} twice", node.id);
            }
            graph.insert_node(node);
        }
        for edge in snapshot.edges {
            if !graph.contains(edge.from) || !graph.contains(edge.to) {
                anyhow::bail!(
                    "snapshot edge {:?} {} -> {} references a missing node",
                    edge.kind,
                    edge.from,
                    edge.to
                );
            }
            graph.insert_edge(edge);
        }
        Ok(graph)
    }

    pub(super) fn next_id(&self) -> u64 {
        self.next_id
    }

    pub(super) fn set_next_id(&mut self, next_id: u64) {
        self.next_id = next_id;
    }

    pub(super) fn mint_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    pub(super) fn insert_node(&mut self, node: Node) {
        if let NodeData::Document(doc) = &node.data {
            self.documents.insert(doc.document_id.clone(), node.id);
        }
        self.nodes.insert(node.id, node);
    }

    /// Removes a node together with every incident edge.
    pub(super) fn remove_node(&mut self, id: NodeId) -> Option<(Node, Vec<Edge>)> {
        if !self.nodes.contains_key(&id) {
            return None;
        }
        let mut edges = self.outgoing.remove(&id).unwrap_or_default();
        edges.extend(self.incoming.remove(&id).unwrap_or_default());
        for edge in &edges {
            if edge.from != id {
                detach(&mut self.outgoing, edge.from, edge);
            }
            if edge.to != id {
                detach(&mut self.incoming, edge.to, edge);
            }
        }
        let node = self.nodes.remove(&id)?;
        if let NodeData::Document(doc) = &node.data {
            self.documents.remove(&doc.document_id);
        }
        Some((node, edges))
    }

    pub(super) fn insert_edge(&mut self, edge: Edge) {
        self.outgoing.entry(edge.from).or_default().push(edge);
        self.incoming.entry(edge.to).or_default().push(edge);
    }

    pub(super) fn remove_edge(&mut self, edge: &Edge) -> bool {
        let removed = detach(&mut self.outgoing, edge.from, edge);
        if removed {
            detach(&mut self.incoming, edge.to, edge);
        }
        removed
    }

    pub(super) fn data_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.nodes.get_mut(&id).map(|node| &mut node.data)
    }
}

fn detach(index: &mut HashMap<NodeId, Vec<Edge>>, key: NodeId, edge: &Edge) -> bool {
    let Some(edges) = index.get_mut(&key) else {
        return false;
    };
    let Some(pos) = edges.iter().position(|candidate| candidate == edge) else {
        return false;
    };
    edges.remove(pos);
    if edges.is_empty() {
        index.remove(&key);
    }
    true
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::graph::{HeadingNode, PageNode};

    fn heading(graph: &mut Graph, text: &str) -> NodeId {
        let id = graph.mint_id();
        graph.insert_node(Node {
            id,
            created_at: Utc::now(),
            data: NodeData::Heading(HeadingNode {
                text: text.to_owned(),
                page: 1,
                position: 0,
            }),
        });
        id
    }

    #[test]
    fn remove_node_drops_incident_edges_on_both_sides() {
        let mut graph = Graph::default();
        let a = heading(&mut graph, "a");
        let b = heading(&mut graph, "b");
        let c = heading(&mut graph, "c");
        graph.insert_edge(Edge {
            from: a,
            to: b,
            kind: EdgeKind::HasSubheading,
        });
        graph.insert_edge(Edge {
            from: b,
            to: c,
            kind: EdgeKind::HasVisual,
        });

        let (_, edges) = graph.remove_node(b).unwrap();
        assert_eq!(edges.len(), 2);
        assert!(graph.outgoing(a).is_empty());
        assert!(graph.incoming(c).is_empty());
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn snapshot_restores_nodes_edges_and_counter() -> anyhow::Result<()> {
        let mut graph = Graph::default();
        let a = heading(&mut graph, "a");
        let id = graph.mint_id();
        graph.insert_node(Node {
            id,
            created_at: Utc::now(),
            data: NodeData::Page(PageNode {
                page_number: 1,
                image_ref: "page-1".to_owned(),
            }),
        });
        graph.insert_edge(Edge {
            from: a,
            to: id,
            kind: EdgeKind::HasPage,
        });

        let restored = Graph::from_snapshot(graph.to_snapshot())?;
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.targets(a, EdgeKind::HasPage).collect::<Vec<_>>(), vec![id]);
        assert_eq!(restored.next_id(), graph.next_id());
        Ok(())
    }

    #[test]
    fn snapshot_with_dangling_edge_is_rejected() {
        let snapshot = GraphSnapshot {
            next_id: 2,
            nodes: Vec::new(),
            edges: vec![Edge {
                from: NodeId(0),
                to: NodeId(1),
                kind: EdgeKind::HasHeading,
            }],
        };
        let err = Graph::from_snapshot(snapshot).unwrap_err().to_string();
        assert!(err.contains("references a missing node"));
    }
}
