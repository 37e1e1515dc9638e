//! Collection of structural nodes that no bound version can reach.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::blob_store::BlobStore;
use crate::error::Result;
use crate::graph::{EdgeKind, Graph, GraphStore, NodeId, NodeKind, RootState};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Unreachable nodes examined.
    pub scanned: usize,
    pub removed: usize,
    /// Unreachable nodes kept because they are still inside the grace window.
    pub deferred: usize,
    /// Stored images no remaining subtree or page refers to.
    #[serde(default)]
    pub images_removed: usize,
}

pub struct OrphanReconciler {
    graph: Arc<GraphStore>,
    grace: chrono::Duration,
    blobs: Option<Arc<dyn BlobStore>>,
}

impl OrphanReconciler {
    /// `grace` must exceed the longest plausible gap between `create_subtree` and
    /// `bind_version`.
    pub fn new(graph: Arc<GraphStore>, grace: Duration) -> Self {
        let grace =
            chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        Self {
            graph,
            grace,
            blobs: None,
        }
    }

    /// Also removes stored images once nothing in the graph refers to them.
    pub fn with_blobs(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let grace = self.grace;
        let mut report = self
            .graph
            .write(|txn| {
                let plan = plan_sweep(txn, now, grace);
                let removed = txn.delete_nodes(&plan.doomed);
                Ok(SweepReport {
                    scanned: plan.scanned,
                    removed,
                    deferred: plan.deferred,
                    images_removed: 0,
                })
            })
            .await?;
        if let Some(blobs) = &self.blobs {
            report.images_removed = self.collect_images(blobs.as_ref()).await;
        }

        if report.removed > 0 || report.deferred > 0 || report.images_removed > 0 {
            tracing::info!(
                scanned = report.scanned,
                removed = report.removed,
                deferred = report.deferred,
                images_removed = report.images_removed,
                "orphan sweep"
            );
        } else {
            tracing::debug!(scanned = report.scanned, "orphan sweep found nothing");
        }
        Ok(report)
    }

    /// Deletes images of live documents that no subtree or page refers to.
    ///
    /// Regeneration writes images only after staging the subtree that names them, so listing
    /// the store before reading the graph never sees an image whose subtree is still unwritten.
    async fn collect_images(&self, blobs: &dyn BlobStore) -> usize {
        let documents = self
            .graph
            .read(|graph| {
                graph
                    .documents()
                    .filter_map(|node| node.as_document())
                    .filter(|doc| !doc.deleting)
                    .map(|doc| doc.document_id.clone())
                    .collect::<Vec<_>>()
            })
            .await;

        let mut removed = 0;
        for document_id in documents {
            let stored = match blobs.list_images(&document_id).await {
                Ok(stored) => stored,
                Err(err) => {
                    tracing::warn!(%document_id, ?err, "failed to list images");
                    continue;
                }
            };
            if stored.is_empty() {
                continue;
            }
            let referenced = self
                .graph
                .read(|graph| referenced_images(graph, &document_id))
                .await;
            for image_ref in stored {
                if referenced.contains(&image_ref) {
                    continue;
                }
                match blobs.delete_image(&document_id, &image_ref).await {
                    Ok(()) => removed += 1,
                    Err(err) => {
                        tracing::warn!(%document_id, %image_ref, ?err, "failed to remove image")
                    }
                }
            }
        }
        removed
    }

    pub fn spawn_periodic(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = self.sweep().await {
                    tracing::warn!(?err, "periodic orphan sweep failed");
                }
            }
        })
    }
}

struct SweepPlan {
    scanned: usize,
    deferred: usize,
    doomed: Vec<NodeId>,
}

fn plan_sweep(graph: &Graph, now: DateTime<Utc>, grace: chrono::Duration) -> SweepPlan {
    let live = live_nodes(graph);
    let expired = |created_at: DateTime<Utc>| {
        created_at
            .checked_add_signed(grace)
            .is_some_and(|deadline| deadline <= now)
    };

    let mut plan = SweepPlan {
        scanned: 0,
        deferred: 0,
        doomed: Vec::new(),
    };
    for node in graph.nodes() {
        if node.kind() == NodeKind::Document || live.contains(&node.id) {
            continue;
        }
        plan.scanned += 1;

        let collectable = match owning_root(graph, node.id) {
            Some(root_id) => match graph.node(root_id) {
                Some(root) => match root.as_root().map(|r| r.state) {
                    Some(RootState::Superseded | RootState::Abandoned) => true,
                    // Staged, or a bound-marked root that lost its pointer.
                    _ => expired(root.created_at),
                },
                None => expired(node.created_at),
            },
            None => expired(node.created_at),
        };
        if collectable {
            plan.doomed.push(node.id);
        } else {
            plan.deferred += 1;
        }
    }
    plan.doomed.sort();
    plan
}

/// Documents, their pages, and everything under a currently bound root.
fn live_nodes(graph: &Graph) -> HashSet<NodeId> {
    let mut live = HashSet::new();
    for doc in graph.documents() {
        live.insert(doc.id);
        live.extend(graph.targets(doc.id, EdgeKind::HasPage));
        for edge in graph.outgoing(doc.id) {
            if let EdgeKind::Binds(_) = edge.kind {
                live.insert(edge.to);
                live.extend(graph.descendants(edge.to));
            }
        }
    }
    live
}

/// Image refs named by the document's pages and by every subtree it still owns.
fn referenced_images(graph: &Graph, document_id: &str) -> HashSet<String> {
    let mut refs = HashSet::new();
    let Some(doc) = graph.document(document_id) else {
        return refs;
    };
    let mut ids = graph.targets(doc.id, EdgeKind::HasPage).collect::<Vec<_>>();
    for root in graph.targets(doc.id, EdgeKind::Owns) {
        ids.extend(graph.descendants(root));
    }
    for node in ids.into_iter().filter_map(|id| graph.node(id)) {
        if let Some(page) = node.as_page() {
            refs.insert(page.image_ref.clone());
        } else if let Some(visual) = node.as_visual() {
            refs.insert(visual.image_ref.clone());
        }
    }
    refs
}

/// Walks parent edges up to the subtree root, if the chain is intact.
fn owning_root(graph: &Graph, id: NodeId) -> Option<NodeId> {
    let mut current = id;
    loop {
        let node = graph.node(current)?;
        if node.kind() == NodeKind::Root {
            return Some(current);
        }
        let parent = graph.parent(current)?;
        if !parent.kind.is_structural() {
            return None;
        }
        current = parent.from;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{HeadingNode, NodeData};

    #[tokio::test]
    async fn parentless_nodes_wait_for_grace_window() -> Result<()> {
        let graph = Arc::new(GraphStore::in_memory());
        let stray = graph
            .create_node(NodeData::Heading(HeadingNode {
                text: "stray".to_owned(),
                page: 1,
                position: 0,
            }))
            .await?;
        let reconciler = OrphanReconciler::new(graph.clone(), Duration::from_secs(60));

        let report = reconciler.sweep_at(Utc::now()).await?;
        assert_eq!(report.deferred, 1);
        assert_eq!(report.removed, 0);

        let later = Utc::now() + chrono::Duration::seconds(61);
        let report = reconciler.sweep_at(later).await?;
        assert_eq!(report.removed, 1);
        assert!(graph.get_node(stray).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn empty_graph_sweeps_nothing() -> Result<()> {
        let graph = Arc::new(GraphStore::in_memory());
        let reconciler = OrphanReconciler::new(graph, Duration::from_secs(60));
        assert_eq!(reconciler.sweep().await?, SweepReport::default());
        Ok(())
    }
}
