//! Graph persistence layer.
//!
//! Documents are stored as typed nodes joined by typed, directed edges. Every write goes
//! through [`GraphStore::write`], which applies a closure to the graph under an exclusive
//! lock, persists the post-state through a [`GraphBackend`], and replays an undo log if
//! either step fails. Readers never observe a partially applied batch.

mod backend;
mod state;
mod store;
mod txn;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::formats::{DocumentMetadata, Version, VersionMarkers};

pub use backend::{GraphBackend, LocalFsBackend, MemoryBackend};
pub use state::{Graph, GraphSnapshot};
pub use store::GraphStore;
pub use txn::Txn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Root,
    Heading,
    Subheading,
    Visual,
    Page,
}

/// Lifecycle of a subtree root. Only `Bound` roots are reachable by readers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RootState {
    Staged,
    Bound,
    Superseded,
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentNode {
    pub document_id: String,
    pub metadata: DocumentMetadata,
    pub content_hash: String,
    #[serde(default)]
    pub versions: VersionMarkers,
    #[serde(default)]
    pub deleting: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RootNode {
    pub document_id: String,
    pub version: Version,
    pub state: RootState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeadingNode {
    pub text: String,
    pub page: u32,
    pub position: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubheadingNode {
    pub title: String,
    pub context: String,
    pub page: u32,
    pub position: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisualNode {
    pub caption: String,
    pub image_ref: String,
    pub page: u32,
    pub position: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageNode {
    pub page_number: u32,
    pub image_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeData {
    Document(DocumentNode),
    Root(RootNode),
    Heading(HeadingNode),
    Subheading(SubheadingNode),
    Visual(VisualNode),
    Page(PageNode),
}

impl NodeData {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Document(_) => NodeKind::Document,
            Self::Root(_) => NodeKind::Root,
            Self::Heading(_) => NodeKind::Heading,
            Self::Subheading(_) => NodeKind::Subheading,
            Self::Visual(_) => NodeKind::Visual,
            Self::Page(_) => NodeKind::Page,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub created_at: DateTime<Utc>,
    pub data: NodeData,
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        self.data.kind()
    }

    pub fn as_document(&self) -> Option<&DocumentNode> {
        match &self.data {
            NodeData::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_root(&self) -> Option<&RootNode> {
        match &self.data {
            NodeData::Root(root) => Some(root),
            _ => None,
        }
    }

    pub fn as_heading(&self) -> Option<&HeadingNode> {
        match &self.data {
            NodeData::Heading(heading) => Some(heading),
            _ => None,
        }
    }

    pub fn as_subheading(&self) -> Option<&SubheadingNode> {
        match &self.data {
            NodeData::Subheading(subheading) => Some(subheading),
            _ => None,
        }
    }

    pub fn as_visual(&self) -> Option<&VisualNode> {
        match &self.data {
            NodeData::Visual(visual) => Some(visual),
            _ => None,
        }
    }

    pub fn as_page(&self) -> Option<&PageNode> {
        match &self.data {
            NodeData::Page(page) => Some(page),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Document -> Root. Parent edge of every subtree root the document ever created.
    Owns,
    /// Document -> Root. The live pointer for one version; not a parent edge.
    Binds(Version),
    HasHeading,
    HasSubheading,
    HasVisual,
    HasPage,
}

impl EdgeKind {
    /// Parent edges form the ownership tree. Each node has at most one incoming parent edge.
    pub fn is_parent(self) -> bool {
        !matches!(self, Self::Binds(_))
    }

    /// Edges followed when walking a subtree down from its root.
    pub fn is_structural(self) -> bool {
        matches!(self, Self::HasHeading | Self::HasSubheading | Self::HasVisual)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
}
