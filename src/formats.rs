use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::NodeId;

/// One of the two independently generated interpretations of a document.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Version {
    Regular,
    Enhanced,
}

impl Version {
    pub const ALL: [Version; 2] = [Version::Regular, Version::Enhanced];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Enhanced => "enhanced",
        }
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "regular" => Ok(Self::Regular),
            "enhanced" => Ok(Self::Enhanced),
            other => anyhow::bail!("unsupported structure version: {other}"),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub title: String,
    #[serde(default)]
    pub page_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub file_size: u64,
}

/// Generation timestamp per bound version.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionMarkers {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regular: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhanced: Option<DateTime<Utc>>,
}

impl VersionMarkers {
    pub fn get(&self, version: Version) -> Option<DateTime<Utc>> {
        match version {
            Version::Regular => self.regular,
            Version::Enhanced => self.enhanced,
        }
    }

    pub fn set(&mut self, version: Version, at: DateTime<Utc>) {
        match version {
            Version::Regular => self.regular = Some(at),
            Version::Enhanced => self.enhanced = Some(at),
        }
    }
}

// Extraction output. Page references and ordinals are kept signed so malformed
// input reaches validation instead of failing deserialization.

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StructureDescription {
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub headings: Vec<HeadingSpec>,
    #[serde(default)]
    pub pages: Vec<PageSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeadingSpec {
    pub text: String,
    pub page: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    #[serde(default)]
    pub subheadings: Vec<SubheadingSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubheadingSpec {
    pub title: String,
    #[serde(default)]
    pub context: String,
    pub page: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    #[serde(default)]
    pub visuals: Vec<VisualSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisualSpec {
    #[serde(default)]
    pub caption: String,
    pub image_ref: String,
    pub page: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageSpec {
    pub page_number: i64,
    pub image_ref: String,
}

// Read side.

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructureTree {
    pub document_id: String,
    pub version: Version,
    pub root: NodeId,
    pub generated_at: DateTime<Utc>,
    pub headings: Vec<Heading>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Heading {
    pub id: NodeId,
    pub text: String,
    pub page: u32,
    pub position: u32,
    pub subheadings: Vec<Subheading>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subheading {
    pub id: NodeId,
    pub title: String,
    pub context: String,
    pub page: u32,
    pub position: u32,
    pub visuals: Vec<VisualReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisualReference {
    pub id: NodeId,
    pub caption: String,
    pub image_ref: String,
    pub page: u32,
    pub position: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentSummary {
    pub document_id: String,
    pub metadata: DocumentMetadata,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub versions: VersionMarkers,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnhancedAvailability {
    pub available: bool,
    pub generated_at: Option<DateTime<Utc>>,
    pub in_progress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageRef {
    pub page_number: u32,
    pub image_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeadingPage {
    pub heading: String,
    pub page_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<PageRef>,
}
