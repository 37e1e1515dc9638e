//! Whole-subtree reads and writes on top of the graph store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::formats::{
    DocumentSummary, Heading, HeadingPage, PageRef, StructureDescription, StructureTree,
    Subheading, Version, VersionMarkers, VisualReference,
};
use crate::graph::{
    DocumentNode, Edge, EdgeKind, Graph, GraphStore, HeadingNode, Node, NodeData, NodeId,
    PageNode, RootNode, RootState, SubheadingNode, Txn, VisualNode,
};
use crate::validate::{dense_order, validate};

/// Handle to a subtree root created by [`StructureRepository::create_subtree`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtreeRef {
    pub document_id: String,
    pub version: Version,
    pub root: NodeId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionReport {
    pub roots_removed: usize,
    pub nodes_removed: usize,
}

pub struct StructureRepository {
    graph: Arc<GraphStore>,
}

impl StructureRepository {
    pub fn new(graph: Arc<GraphStore>) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &Arc<GraphStore> {
        &self.graph
    }

    /// First generation of a document: the document node, its pages and a bound `regular`
    /// subtree, all in one transaction.
    pub async fn create_document(
        &self,
        document_id: &str,
        description: &StructureDescription,
        content_hash: &str,
    ) -> Result<DocumentSummary> {
        validate(description)?;
        let summary = self
            .graph
            .write(|txn| {
                if txn.document(document_id).is_some() {
                    return Err(Error::Conflict(format!(
                        "document {document_id} already exists"
                    )));
                }
                let doc = txn.create_node(NodeData::Document(DocumentNode {
                    document_id: document_id.to_owned(),
                    metadata: description.metadata.clone(),
                    content_hash: content_hash.to_owned(),
                    versions: VersionMarkers::default(),
                    deleting: false,
                }));

                for page in dense_order(&description.pages, |p| Some(p.page_number)) {
                    let page_node = txn.create_node(NodeData::Page(PageNode {
                        page_number: to_page(page.page_number)?,
                        image_ref: page.image_ref.trim().to_owned(),
                    }));
                    txn.create_edge(doc, page_node, EdgeKind::HasPage)?;
                }

                let root = write_subtree(txn, doc, document_id, Version::Regular, description)?;
                bind_in(txn, doc, root, Version::Regular)?;

                txn.node(doc)
                    .and_then(summarize)
                    .ok_or_else(|| Error::Persistence(format!("document node {doc} vanished")))
            })
            .await?;

        tracing::info!(
            document_id,
            headings = description.headings.len(),
            pages = description.pages.len(),
            "document created"
        );
        Ok(summary)
    }

    /// Writes a fresh, unbound subtree for `version`. Existing subtrees are not touched.
    pub async fn create_subtree(
        &self,
        document_id: &str,
        version: Version,
        description: &StructureDescription,
    ) -> Result<SubtreeRef> {
        validate(description)?;
        let root = self
            .graph
            .write(|txn| {
                let doc = live_document(txn, document_id)?;
                write_subtree(txn, doc, document_id, version, description)
            })
            .await?;

        tracing::info!(
            document_id,
            %version,
            %root,
            headings = description.headings.len(),
            "subtree staged"
        );
        Ok(SubtreeRef {
            document_id: document_id.to_owned(),
            version,
            root,
        })
    }

    /// Makes `subtree` the visible version and returns the root it replaced.
    ///
    /// The replaced root is marked superseded in the same transaction.
    pub async fn bind_version(&self, subtree: &SubtreeRef) -> Result<Option<SubtreeRef>> {
        let previous = self
            .graph
            .write(|txn| {
                let doc = live_document(txn, &subtree.document_id)?;
                let root = txn
                    .node(subtree.root)
                    .and_then(Node::as_root)
                    .ok_or_else(|| {
                        Error::Conflict(format!("subtree root {} no longer exists", subtree.root))
                    })?;
                if root.document_id != subtree.document_id || root.version != subtree.version {
                    return Err(Error::Conflict(format!(
                        "subtree root {} belongs to {} ({})",
                        subtree.root, root.document_id, root.version
                    )));
                }
                if root.state != RootState::Staged {
                    return Err(Error::Conflict(format!(
                        "subtree root {} is {:?}, not staged",
                        subtree.root, root.state
                    )));
                }
                bind_in(txn, doc, subtree.root, subtree.version)
            })
            .await?;

        tracing::info!(
            document_id = %subtree.document_id,
            version = %subtree.version,
            root = %subtree.root,
            previous = ?previous,
            "version bound"
        );
        Ok(previous.map(|root| SubtreeRef {
            document_id: subtree.document_id.clone(),
            version: subtree.version,
            root,
        }))
    }

    /// Marks a staged subtree as never-to-be-bound so the reconciler collects it at once.
    pub async fn abandon_subtree(&self, subtree: &SubtreeRef) -> Result<()> {
        let abandoned = self
            .graph
            .write(|txn| {
                let staged = txn
                    .node(subtree.root)
                    .and_then(Node::as_root)
                    .is_some_and(|root| root.state == RootState::Staged);
                if !staged {
                    return Ok(false);
                }
                txn.update_node(subtree.root, |data| {
                    if let NodeData::Root(root) = data {
                        root.state = RootState::Abandoned;
                    }
                })?;
                Ok(true)
            })
            .await?;
        if abandoned {
            tracing::info!(
                document_id = %subtree.document_id,
                version = %subtree.version,
                root = %subtree.root,
                "subtree abandoned"
            );
        }
        Ok(())
    }

    pub async fn read_structure(&self, document_id: &str, version: Version) -> Result<StructureTree> {
        self.graph
            .read(|graph| {
                let doc = live_document(graph, document_id)?;
                let root = bound_root(graph, doc, version).ok_or_else(|| Error::VersionNotFound {
                    document_id: document_id.to_owned(),
                    version,
                })?;
                build_tree(graph, root)
            })
            .await
    }

    /// Reads one specific subtree, bound or not.
    pub async fn read_subtree(&self, subtree: &SubtreeRef) -> Result<StructureTree> {
        self.graph
            .read(|graph| {
                if graph.node(subtree.root).and_then(Node::as_root).is_none() {
                    return Err(Error::NotFound(format!("subtree {}", subtree.root)));
                }
                build_tree(graph, subtree.root)
            })
            .await
    }

    /// Removes the document, every subtree it ever owned and its pages.
    ///
    /// Runs as several transactions. The first marks the document as deleting, which hides it
    /// from readers and blocks new subtrees; calling this again after a failure resumes.
    pub async fn delete_document(&self, document_id: &str) -> Result<DeletionReport> {
        let (roots, pages) = self
            .graph
            .write(|txn| {
                let node = txn
                    .document(document_id)
                    .ok_or_else(|| Error::DocumentNotFound(document_id.to_owned()))?;
                let doc = node.id;
                let resuming = node.as_document().is_some_and(|d| d.deleting);
                if !resuming {
                    txn.update_node(doc, |data| {
                        if let NodeData::Document(document) = data {
                            document.deleting = true;
                        }
                    })?;
                }
                let roots = txn.targets(doc, EdgeKind::Owns).collect::<Vec<_>>();
                let pages = txn.targets(doc, EdgeKind::HasPage).collect::<Vec<_>>();
                Ok((roots, pages))
            })
            .await?;
        tracing::info!(
            document_id,
            roots = roots.len(),
            pages = pages.len(),
            "document deletion started"
        );

        let mut report = DeletionReport::default();
        for root in roots {
            report.nodes_removed += self
                .graph
                .write(|txn| {
                    let mut ids = txn.descendants(root);
                    ids.push(root);
                    Ok(txn.delete_nodes(&ids))
                })
                .await?;
            report.roots_removed += 1;
        }
        report.nodes_removed += self
            .graph
            .write(|txn| Ok(txn.delete_nodes(&pages)))
            .await?;
        report.nodes_removed += self
            .graph
            .write(|txn| {
                let Some(doc) = txn.document(document_id).map(|node| node.id) else {
                    return Ok(0);
                };
                let mut ids = Vec::new();
                for root in txn.targets(doc, EdgeKind::Owns).collect::<Vec<_>>() {
                    ids.extend(txn.descendants(root));
                    ids.push(root);
                }
                ids.extend(txn.targets(doc, EdgeKind::HasPage));
                ids.push(doc);
                Ok(txn.delete_nodes(&ids))
            })
            .await?;

        tracing::info!(
            document_id,
            roots = report.roots_removed,
            nodes = report.nodes_removed,
            "document deleted"
        );
        Ok(report)
    }

    pub async fn list_documents(&self) -> Vec<DocumentSummary> {
        self.graph
            .read(|graph| {
                let mut documents = graph.documents().filter_map(summarize).collect::<Vec<_>>();
                documents.sort_by(|a, b| {
                    a.created_at
                        .cmp(&b.created_at)
                        .then_with(|| a.document_id.cmp(&b.document_id))
                });
                documents
            })
            .await
    }

    pub async fn document(&self, document_id: &str) -> Result<DocumentSummary> {
        self.graph
            .read(|graph| {
                graph
                    .document(document_id)
                    .and_then(summarize)
                    .ok_or_else(|| Error::DocumentNotFound(document_id.to_owned()))
            })
            .await
    }

    pub async fn find_by_content_hash(&self, content_hash: &str) -> Option<DocumentSummary> {
        self.graph
            .read(|graph| {
                graph
                    .documents()
                    .filter_map(summarize)
                    .find(|summary| summary.content_hash == content_hash)
            })
            .await
    }

    pub async fn page(&self, document_id: &str, page_number: u32) -> Result<PageRef> {
        self.graph
            .read(|graph| {
                let doc = live_document(graph, document_id)?;
                find_page(graph, doc, page_number).ok_or_else(|| {
                    Error::NotFound(format!("page {page_number} of document {document_id}"))
                })
            })
            .await
    }

    /// Page on which the first heading titled `heading` appears.
    pub async fn heading_page(
        &self,
        document_id: &str,
        version: Version,
        heading: &str,
    ) -> Result<HeadingPage> {
        self.graph
            .read(|graph| {
                let doc = live_document(graph, document_id)?;
                let root = bound_root(graph, doc, version).ok_or_else(|| Error::VersionNotFound {
                    document_id: document_id.to_owned(),
                    version,
                })?;
                let wanted = heading.trim();
                let found = ordered_children(graph, root, EdgeKind::HasHeading, Node::as_heading)
                    .into_iter()
                    .find(|(_, h)| h.text == wanted)
                    .ok_or_else(|| {
                        Error::NotFound(format!(
                            "heading {wanted:?} in {version} structure of {document_id}"
                        ))
                    })?;
                Ok(HeadingPage {
                    heading: found.1.text.clone(),
                    page_number: found.1.page,
                    page: find_page(graph, doc, found.1.page),
                })
            })
            .await
    }
}

fn live_document(graph: &Graph, document_id: &str) -> Result<NodeId> {
    graph
        .document(document_id)
        .filter(|node| node.as_document().is_some_and(|doc| !doc.deleting))
        .map(|node| node.id)
        .ok_or_else(|| Error::DocumentNotFound(document_id.to_owned()))
}

fn bound_root(graph: &Graph, doc: NodeId, version: Version) -> Option<NodeId> {
    graph.targets(doc, EdgeKind::Binds(version)).next()
}

fn summarize(node: &Node) -> Option<DocumentSummary> {
    let doc = node.as_document()?;
    if doc.deleting {
        return None;
    }
    Some(DocumentSummary {
        document_id: doc.document_id.clone(),
        metadata: doc.metadata.clone(),
        content_hash: doc.content_hash.clone(),
        created_at: node.created_at,
        versions: doc.versions,
    })
}

fn find_page(graph: &Graph, doc: NodeId, page_number: u32) -> Option<PageRef> {
    graph
        .targets(doc, EdgeKind::HasPage)
        .filter_map(|id| graph.node(id).and_then(Node::as_page))
        .find(|page| page.page_number == page_number)
        .map(|page| PageRef {
            page_number: page.page_number,
            image_ref: page.image_ref.clone(),
        })
}

fn to_page(page: i64) -> Result<u32> {
    u32::try_from(page)
        .map_err(|_| Error::Validation(vec![format!("page reference {page} is out of range")]))
}

fn write_subtree(
    txn: &mut Txn<'_>,
    doc: NodeId,
    document_id: &str,
    version: Version,
    description: &StructureDescription,
) -> Result<NodeId> {
    let root = txn.create_node(NodeData::Root(RootNode {
        document_id: document_id.to_owned(),
        version,
        state: RootState::Staged,
    }));
    txn.create_edge(doc, root, EdgeKind::Owns)?;

    for (position, heading) in dense_order(&description.headings, |h| h.position)
        .into_iter()
        .enumerate()
    {
        let heading_id = txn.create_node(NodeData::Heading(HeadingNode {
            text: heading.text.trim().to_owned(),
            page: to_page(heading.page)?,
            position: position as u32,
        }));
        txn.create_edge(root, heading_id, EdgeKind::HasHeading)?;

        for (position, subheading) in dense_order(&heading.subheadings, |s| s.position)
            .into_iter()
            .enumerate()
        {
            let subheading_id = txn.create_node(NodeData::Subheading(SubheadingNode {
                title: subheading.title.trim().to_owned(),
                context: subheading.context.trim().to_owned(),
                page: to_page(subheading.page)?,
                position: position as u32,
            }));
            txn.create_edge(heading_id, subheading_id, EdgeKind::HasSubheading)?;

            for (position, visual) in dense_order(&subheading.visuals, |v| v.position)
                .into_iter()
                .enumerate()
            {
                let visual_id = txn.create_node(NodeData::Visual(VisualNode {
                    caption: visual.caption.trim().to_owned(),
                    image_ref: visual.image_ref.trim().to_owned(),
                    page: to_page(visual.page)?,
                    position: position as u32,
                }));
                txn.create_edge(subheading_id, visual_id, EdgeKind::HasVisual)?;
            }
        }
    }
    Ok(root)
}

/// Swaps the `version` pointer of `doc` to `root` and returns the previous root.
fn bind_in(
    txn: &mut Txn<'_>,
    doc: NodeId,
    root: NodeId,
    version: Version,
) -> Result<Option<NodeId>> {
    let previous = bound_root(txn, doc, version);
    if let Some(previous) = previous {
        txn.remove_edge(&Edge {
            from: doc,
            to: previous,
            kind: EdgeKind::Binds(version),
        });
        txn.update_node(previous, |data| {
            if let NodeData::Root(root) = data {
                root.state = RootState::Superseded;
            }
        })?;
    }

    txn.create_edge(doc, root, EdgeKind::Binds(version))?;
    txn.update_node(root, |data| {
        if let NodeData::Root(root) = data {
            root.state = RootState::Bound;
        }
    })?;
    let generated_at = txn
        .node(root)
        .map(|node| node.created_at)
        .unwrap_or_else(|| txn.now());
    txn.update_node(doc, |data| {
        if let NodeData::Document(document) = data {
            document.versions.set(version, generated_at);
        }
    })?;
    Ok(previous)
}

fn ordered_children<'g, T>(
    graph: &'g Graph,
    parent: NodeId,
    kind: EdgeKind,
    project: fn(&'g Node) -> Option<&'g T>,
) -> Vec<(NodeId, &'g T)> {
    let mut children = graph
        .targets(parent, kind)
        .filter_map(|id| graph.node(id).and_then(project).map(|data| (id, data)))
        .collect::<Vec<_>>();
    children.sort_by_key(|(id, _)| {
        graph
            .node(*id)
            .map(position_of)
            .unwrap_or(u32::MAX)
    });
    children
}

fn position_of(node: &Node) -> u32 {
    match &node.data {
        NodeData::Heading(h) => h.position,
        NodeData::Subheading(s) => s.position,
        NodeData::Visual(v) => v.position,
        NodeData::Page(p) => p.page_number,
        NodeData::Document(_) | NodeData::Root(_) => 0,
    }
}

fn build_tree(graph: &Graph, root: NodeId) -> Result<StructureTree> {
    let root_node = graph
        .node(root)
        .ok_or_else(|| Error::NotFound(format!("subtree {root}")))?;
    let root_data = root_node
        .as_root()
        .ok_or_else(|| Error::Persistence(format!("node {root} is not a subtree root")))?;

    let headings = ordered_children(graph, root, EdgeKind::HasHeading, Node::as_heading)
        .into_iter()
        .map(|(heading_id, heading)| Heading {
            id: heading_id,
            text: heading.text.clone(),
            page: heading.page,
            position: heading.position,
            subheadings: ordered_children(
                graph,
                heading_id,
                EdgeKind::HasSubheading,
                Node::as_subheading,
            )
            .into_iter()
            .map(|(subheading_id, subheading)| Subheading {
                id: subheading_id,
                title: subheading.title.clone(),
                context: subheading.context.clone(),
                page: subheading.page,
                position: subheading.position,
                visuals: ordered_children(
                    graph,
                    subheading_id,
                    EdgeKind::HasVisual,
                    Node::as_visual,
                )
                .into_iter()
                .map(|(visual_id, visual)| VisualReference {
                    id: visual_id,
                    caption: visual.caption.clone(),
                    image_ref: visual.image_ref.clone(),
                    page: visual.page,
                    position: visual.position,
                })
                .collect(),
            })
            .collect(),
        })
        .collect();

    Ok(StructureTree {
        document_id: root_data.document_id.clone(),
        version: root_data.version,
        root,
        generated_at: root_node.created_at,
        headings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{DocumentMetadata, HeadingSpec, PageSpec, SubheadingSpec, VisualSpec};

    fn description(headings: &[&str]) -> StructureDescription {
        StructureDescription {
            metadata: DocumentMetadata {
                title: "Manual".to_owned(),
                page_count: 3,
                author: Some("Ada".to_owned()),
                file_size: 1024,
            },
            headings: headings
                .iter()
                .map(|text| HeadingSpec {
                    text: (*text).to_owned(),
                    page: 1,
                    position: None,
                    subheadings: vec![SubheadingSpec {
                        title: format!("{text} detail"),
                        context: String::new(),
                        page: 2,
                        position: None,
                        visuals: vec![VisualSpec {
                            caption: "Figure".to_owned(),
                            image_ref: format!("{text}-fig"),
                            page: 2,
                            position: None,
                        }],
                    }],
                })
                .collect(),
            pages: (1..=3)
                .map(|n| PageSpec {
                    page_number: n,
                    image_ref: format!("page-{n}"),
                })
                .collect(),
        }
    }

    fn repository() -> StructureRepository {
        StructureRepository::new(Arc::new(GraphStore::in_memory()))
    }

    #[tokio::test]
    async fn create_document_binds_regular_only() -> Result<()> {
        let repo = repository();
        let summary = repo
            .create_document("d1", &description(&["Intro", "Usage"]), "hash")
            .await?;
        assert!(summary.versions.regular.is_some());
        assert!(summary.versions.enhanced.is_none());

        let tree = repo.read_structure("d1", Version::Regular).await?;
        assert_eq!(tree.headings.len(), 2);
        let err = repo
            .read_structure("d1", Version::Enhanced)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VersionNotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_document_id_conflicts() -> Result<()> {
        let repo = repository();
        repo.create_document("d1", &description(&["Intro"]), "h")
            .await?;
        let err = repo
            .create_document("d1", &description(&["Intro"]), "h")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
        Ok(())
    }

    #[tokio::test]
    async fn staged_subtree_is_invisible_until_bound() -> Result<()> {
        let repo = repository();
        repo.create_document("d1", &description(&["Intro"]), "h")
            .await?;
        let staged = repo
            .create_subtree("d1", Version::Enhanced, &description(&["A", "B", "C"]))
            .await?;
        assert!(repo.read_structure("d1", Version::Enhanced).await.is_err());

        assert_eq!(repo.bind_version(&staged).await?, None);
        let tree = repo.read_structure("d1", Version::Enhanced).await?;
        assert_eq!(tree.root, staged.root);
        Ok(())
    }

    #[tokio::test]
    async fn rebinding_supersedes_previous_root() -> Result<()> {
        let repo = repository();
        repo.create_document("d1", &description(&["Intro"]), "h")
            .await?;
        let first = repo
            .create_subtree("d1", Version::Enhanced, &description(&["One"]))
            .await?;
        repo.bind_version(&first).await?;
        let second = repo
            .create_subtree("d1", Version::Enhanced, &description(&["Two"]))
            .await?;
        let previous = repo.bind_version(&second).await?;
        assert_eq!(previous, Some(first.clone()));

        let state = repo
            .graph()
            .read(|graph| graph.node(first.root).and_then(Node::as_root).map(|r| r.state))
            .await;
        assert_eq!(state, Some(RootState::Superseded));

        let err = repo.bind_version(&first).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");
        Ok(())
    }

    #[tokio::test]
    async fn abandoned_subtree_cannot_be_bound() -> Result<()> {
        let repo = repository();
        repo.create_document("d1", &description(&["Intro"]), "h")
            .await?;
        let staged = repo
            .create_subtree("d1", Version::Enhanced, &description(&["One"]))
            .await?;
        repo.abandon_subtree(&staged).await?;
        assert_eq!(repo.bind_version(&staged).await.unwrap_err().kind(), "conflict");
        Ok(())
    }

    #[tokio::test]
    async fn invalid_description_writes_nothing() -> Result<()> {
        let repo = repository();
        repo.create_document("d1", &description(&["Intro"]), "h")
            .await?;
        let before = repo.graph().read(|graph| graph.len()).await;

        let err = repo
            .create_subtree("d1", Version::Enhanced, &description(&["Ok", ""]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(repo.graph().read(|graph| graph.len()).await, before);
        Ok(())
    }

    #[tokio::test]
    async fn heading_page_resolves_page_image_ref() -> Result<()> {
        let repo = repository();
        repo.create_document("d1", &description(&["Intro"]), "h")
            .await?;
        let found = repo.heading_page("d1", Version::Regular, " Intro ").await?;
        assert_eq!(found.page_number, 1);
        assert_eq!(found.page.map(|p| p.image_ref), Some("page-1".to_owned()));

        let err = repo
            .heading_page("d1", Version::Regular, "Missing")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
        Ok(())
    }

    #[tokio::test]
    async fn deleting_flag_hides_document_and_resume_finishes() -> Result<()> {
        let repo = repository();
        repo.create_document("d1", &description(&["Intro"]), "h")
            .await?;
        let doc = repo
            .graph()
            .read(|graph| graph.document("d1").map(|node| node.id))
            .await
            .expect("document exists");
        // Simulate a deletion that stopped after its first stage.
        repo.graph()
            .write(|txn| {
                txn.update_node(doc, |data| {
                    if let NodeData::Document(document) = data {
                        document.deleting = true;
                    }
                })
            })
            .await?;

        assert!(repo.list_documents().await.is_empty());
        assert_eq!(
            repo.read_structure("d1", Version::Regular)
                .await
                .unwrap_err()
                .kind(),
            "document_not_found"
        );

        let report = repo.delete_document("d1").await?;
        assert_eq!(report.roots_removed, 1);
        assert!(repo.graph().read(|graph| graph.is_empty()).await);
        Ok(())
    }
}
