use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use sha2::Digest as _;

use crate::app::blob_store::{BlobStore, LocalFsBlobStore};
use crate::app::coordinator::{CoordinatorOptions, RegenerationCoordinator, RegenerationStatus};
use crate::app::queue::WorkQueue;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::extract::{self, Extractor, UNTITLED};
use crate::formats::{
    DocumentSummary, EnhancedAvailability, HeadingPage, StructureTree, Version,
};
use crate::graph::{GraphStore, LocalFsBackend};
use crate::reconcile::{OrphanReconciler, SweepReport};
use crate::repository::{DeletionReport, StructureRepository};
use crate::validate::validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingested {
    pub document: DocumentSummary,
    /// False when identical bytes were ingested before and the existing document is returned.
    pub created: bool,
}

/// Operations the transports (HTTP, CLI) call.
pub struct DocumentService {
    repository: Arc<StructureRepository>,
    blobs: Arc<dyn BlobStore>,
    extractor: Arc<dyn Extractor>,
    coordinator: Arc<RegenerationCoordinator>,
    reconciler: Arc<OrphanReconciler>,
    extract_timeout: Duration,
}

impl DocumentService {
    pub fn new(
        graph: Arc<GraphStore>,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn Extractor>,
        config: &Config,
    ) -> Self {
        let repository = Arc::new(StructureRepository::new(Arc::clone(&graph)));
        let coordinator = Arc::new(RegenerationCoordinator::new(
            Arc::clone(&repository),
            Arc::clone(&blobs),
            Arc::clone(&extractor),
            WorkQueue::new(config.max_concurrency),
            CoordinatorOptions {
                result_ttl: config.result_ttl,
                extract_timeout: config.extract_timeout,
            },
        ));
        let reconciler = Arc::new(
            OrphanReconciler::new(graph, config.sweep_grace).with_blobs(Arc::clone(&blobs)),
        );
        Self {
            repository,
            blobs,
            extractor,
            coordinator,
            reconciler,
            extract_timeout: config.extract_timeout,
        }
    }

    /// Opens the on-disk graph and blob store under `config.data_dir`.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let backend = Arc::new(LocalFsBackend::new(&config.data_dir));
        let graph = GraphStore::open(backend)
            .await
            .with_context(|| format!("open graph store in {}", config.data_dir.display()))?;
        let blobs = Arc::new(LocalFsBlobStore::new(&config.data_dir));
        let extractor = extract::from_config(config)?;
        tracing::info!(
            data_dir = %config.data_dir.display(),
            extractor = ?config.extractor,
            max_concurrency = config.max_concurrency,
            "document service ready"
        );
        Ok(Self::new(Arc::new(graph), blobs, extractor, config))
    }

    pub fn repository(&self) -> &Arc<StructureRepository> {
        &self.repository
    }

    pub fn coordinator(&self) -> &Arc<RegenerationCoordinator> {
        &self.coordinator
    }

    pub fn reconciler(&self) -> &Arc<OrphanReconciler> {
        &self.reconciler
    }

    /// Stores the bytes, runs `regular` extraction and creates the document.
    ///
    /// Identical bytes (by SHA-256) resolve to the document created the first time.
    pub async fn ingest(&self, bytes: &[u8], title_hint: Option<&str>) -> Result<Ingested> {
        if bytes.is_empty() {
            return Err(Error::Validation(vec!["document is empty".to_owned()]));
        }
        let content_hash = hex::encode(sha2::Sha256::digest(bytes));
        if let Some(document) = self.repository.find_by_content_hash(&content_hash).await {
            tracing::info!(
                document_id = %document.document_id,
                "identical document already ingested"
            );
            return Ok(Ingested {
                document,
                created: false,
            });
        }

        let document_id = uuid::Uuid::new_v4().to_string();
        let result = self
            .ingest_new(&document_id, bytes, &content_hash, title_hint)
            .await;
        if let Err(err) = &result {
            tracing::warn!(document_id, error = %err, "ingest failed");
            if let Err(cleanup) = self.blobs.delete_document(&document_id).await {
                tracing::warn!(document_id, ?cleanup, "failed to remove blobs of failed ingest");
            }
        }
        result.map(|document| Ingested {
            document,
            created: true,
        })
    }

    async fn ingest_new(
        &self,
        document_id: &str,
        bytes: &[u8],
        content_hash: &str,
        title_hint: Option<&str>,
    ) -> Result<DocumentSummary> {
        self.blobs
            .put_source(document_id, bytes)
            .await
            .map_err(Error::persistence)?;

        let extraction = extract::run_with_timeout(
            self.extractor.as_ref(),
            bytes,
            Version::Regular,
            self.extract_timeout,
        )
        .await?;

        let mut description = extraction.description;
        let metadata = &mut description.metadata;
        if let Some(hint) = title_hint.map(str::trim).filter(|t| !t.is_empty()) {
            if metadata.title.trim().is_empty() || metadata.title == UNTITLED {
                metadata.title = hint.to_owned();
            }
        }
        if metadata.file_size == 0 {
            metadata.file_size = bytes.len() as u64;
        }
        validate(&description)?;

        for image in &extraction.images {
            self.blobs
                .put_image(document_id, &image.image_ref, &image.bytes)
                .await
                .map_err(Error::persistence)?;
        }

        self.repository
            .create_document(document_id, &description, content_hash)
            .await
    }

    pub async fn list_documents(&self) -> Vec<DocumentSummary> {
        self.repository.list_documents().await
    }

    pub async fn get_document(&self, document_id: &str) -> Result<DocumentSummary> {
        self.repository.document(document_id).await
    }

    pub async fn get_structure(&self, document_id: &str, version: Version) -> Result<StructureTree> {
        self.repository.read_structure(document_id, version).await
    }

    pub async fn is_enhanced_available(&self, document_id: &str) -> Result<EnhancedAvailability> {
        let document = self.repository.document(document_id).await?;
        let generated_at = document.versions.get(Version::Enhanced);
        Ok(EnhancedAvailability {
            available: generated_at.is_some(),
            generated_at,
            in_progress: self.coordinator.status(document_id, Version::Enhanced)
                == RegenerationStatus::InProgress,
        })
    }

    /// Returns the bound enhanced structure, generating it when absent or when `force` is set.
    ///
    /// A forced request joins an attempt already in flight, and within the coordinator's
    /// result TTL it returns the tree that attempt produced instead of generating again. Set
    /// `DOCGRAPH_RESULT_TTL_SECS=0` to make every forced request outside a running attempt
    /// generate a new version.
    pub async fn request_enhanced(&self, document_id: &str, force: bool) -> Result<StructureTree> {
        if !force {
            match self
                .repository
                .read_structure(document_id, Version::Enhanced)
                .await
            {
                Ok(tree) => return Ok(tree),
                Err(Error::VersionNotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        } else {
            self.repository.document(document_id).await?;
        }

        let tree = self
            .coordinator
            .regenerate(document_id, Version::Enhanced)
            .await?;
        Ok(Arc::unwrap_or_clone(tree))
    }

    /// Deletes the document from the graph, then its blobs.
    pub async fn delete_document(&self, document_id: &str) -> Result<DeletionReport> {
        let report = self.repository.delete_document(document_id).await?;
        self.coordinator.invalidate(document_id);
        if let Err(err) = self.blobs.delete_document(document_id).await {
            tracing::warn!(document_id, ?err, "failed to remove blobs of deleted document");
        }
        Ok(report)
    }

    pub async fn page_image(&self, document_id: &str, page_number: u32) -> Result<Vec<u8>> {
        let page = self.repository.page(document_id, page_number).await?;
        self.image(document_id, &page.image_ref).await
    }

    pub async fn visual_image(&self, document_id: &str, image_ref: &str) -> Result<Vec<u8>> {
        self.repository.document(document_id).await?;
        self.image(document_id, image_ref).await
    }

    pub async fn heading_page(
        &self,
        document_id: &str,
        version: Version,
        heading: &str,
    ) -> Result<HeadingPage> {
        self.repository
            .heading_page(document_id, version, heading)
            .await
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.reconciler.sweep().await
    }

    /// Starts the background reconciler unless `interval` is zero.
    pub fn spawn_reconciler(&self, interval: Duration) -> Option<tokio::task::JoinHandle<()>> {
        if interval.is_zero() {
            tracing::info!("periodic orphan sweep disabled");
            return None;
        }
        tracing::info!(interval_secs = interval.as_secs(), "periodic orphan sweep enabled");
        Some(Arc::clone(&self.reconciler).spawn_periodic(interval))
    }

    async fn image(&self, document_id: &str, image_ref: &str) -> Result<Vec<u8>> {
        self.blobs
            .get_image(document_id, image_ref)
            .await
            .map_err(Error::persistence)?
            .ok_or_else(|| {
                Error::NotFound(format!("image {image_ref} of document {document_id}"))
            })
    }
}
