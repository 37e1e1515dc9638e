use crate::formats::Version;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced by the structure store and the regeneration coordinator.
///
/// Collaborator failures (`anyhow::Error`) are flattened into messages at the seam so the
/// whole enum stays `Clone`; a single regeneration outcome is shared by every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Malformed structure description. Raised before any write.
    #[error("invalid structure description: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// A store transaction failed and was rolled back. Safe to retry.
    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// The document exists but has no bound subtree for `version`.
    #[error("document {document_id} has no {version} structure")]
    VersionNotFound {
        document_id: String,
        version: Version,
    },

    /// A page, image or heading inside an existing document.
    #[error("not found: {0}")]
    NotFound(String),

    /// The extraction collaborator failed, timed out or returned unusable output.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// A bind lost a race it should never have entered.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl Error {
    pub fn persistence(err: anyhow::Error) -> Self {
        Self::Persistence(format!("{err:#}"))
    }

    pub fn extraction(err: anyhow::Error) -> Self {
        Self::Extraction(format!("{err:#}"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DocumentNotFound(_) | Self::VersionNotFound { .. } | Self::NotFound(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Persistence(_) => "persistence",
            Self::DocumentNotFound(_) => "document_not_found",
            Self::VersionNotFound { .. } => "version_not_found",
            Self::NotFound(_) => "not_found",
            Self::Extraction(_) => "extraction",
            Self::Conflict(_) => "conflict",
        }
    }
}
