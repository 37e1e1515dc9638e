use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::RwLock;

use super::{Edge, EdgeKind, Graph, GraphBackend, MemoryBackend, Node, NodeData, NodeId, Txn};
use crate::error::{Error, Result};

/// Transactional owner of the document graph.
pub struct GraphStore {
    graph: RwLock<Graph>,
    backend: Arc<dyn GraphBackend>,
}

impl GraphStore {
    pub async fn open(backend: Arc<dyn GraphBackend>) -> anyhow::Result<Self> {
        let graph = match backend.load().await.context("load graph snapshot")? {
            Some(snapshot) => Graph::from_snapshot(snapshot).context("rebuild graph")?,
            None => Graph::default(),
        };
        tracing::info!(
            nodes = graph.len(),
            edges = graph.edge_count(),
            "graph store opened"
        );
        Ok(Self {
            graph: RwLock::new(graph),
            backend,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            graph: RwLock::new(Graph::default()),
            backend: Arc::new(MemoryBackend),
        }
    }

    pub async fn read<T>(&self, f: impl FnOnce(&Graph) -> T) -> T {
        let graph = self.graph.read().await;
        f(&graph)
    }

    /// Runs `f` as one transaction.
    ///
    /// The batch becomes visible only after the backend has persisted it. If `f` returns an
    /// error or persisting fails, every change made by `f` is undone before the lock is
    /// released.
    pub async fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Txn<'_>) -> Result<T> + Send,
        T: Send,
    {
        let mut graph = self.graph.write().await;
        let mut txn = Txn::new(&mut graph);
        let value = match f(&mut txn) {
            Ok(value) => value,
            Err(err) => {
                txn.rollback();
                return Err(err);
            }
        };
        if !txn.is_dirty() {
            return Ok(value);
        }
        if let Err(err) = self.backend.persist(txn.graph()).await {
            tracing::warn!(?err, "graph persist failed; rolling back");
            txn.rollback();
            return Err(Error::persistence(err));
        }
        Ok(value)
    }

    pub async fn create_node(&self, data: NodeData) -> Result<NodeId> {
        self.write(|txn| Ok(txn.create_node(data))).await
    }

    pub async fn create_edge(&self, from: NodeId, to: NodeId, kind: EdgeKind) -> Result<()> {
        self.write(|txn| txn.create_edge(from, to, kind)).await
    }

    pub async fn get_node(&self, id: NodeId) -> Option<Node> {
        self.read(|graph| graph.node(id).cloned()).await
    }

    pub async fn outgoing(&self, id: NodeId, kind: EdgeKind) -> Vec<Edge> {
        self.read(|graph| {
            graph
                .outgoing(id)
                .iter()
                .filter(|edge| edge.kind == kind)
                .copied()
                .collect()
        })
        .await
    }

    pub async fn delete_nodes(&self, ids: &[NodeId]) -> Result<usize> {
        self.write(|txn| Ok(txn.delete_nodes(ids))).await
    }
}
