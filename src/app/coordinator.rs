//! Single-flight regeneration per `(document, version)`.
//!
//! Each key owns a slot guarded by its own mutex. The first request for an idle key stages an
//! attempt on the work queue and publishes a watch channel; later requests subscribe to that
//! channel instead of starting new work. Attempts are detached tasks, so a waiter giving up
//! never cancels them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::app::blob_store::BlobStore;
use crate::app::queue::WorkQueue;
use crate::error::{Error, Result};
use crate::extract::{self, Extraction, Extractor};
use crate::formats::{StructureTree, Version};
use crate::graph::NodeId;
use crate::repository::{StructureRepository, SubtreeRef};
use crate::validate::validate;

type Outcome = Result<Arc<StructureTree>>;
type Key = (String, Version);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RegenerationStatus {
    Idle,
    InProgress,
    /// A result is cached and will be handed out without new work until it expires.
    Completed {
        root: NodeId,
        generated_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorOptions {
    pub result_ttl: Duration,
    pub extract_timeout: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            result_ttl: Duration::from_secs(30),
            extract_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Default)]
enum Slot {
    #[default]
    Idle,
    InProgress(watch::Receiver<Option<Outcome>>),
    Completed {
        tree: Arc<StructureTree>,
        expires_at: Instant,
    },
}

impl Slot {
    /// Resolves expiry and abandoned channels so callers only see live states.
    fn settle(&mut self, now: Instant) {
        let stale = match self {
            Slot::Idle => false,
            Slot::InProgress(rx) => rx.has_changed().is_err(),
            Slot::Completed { expires_at, .. } => now >= *expires_at,
        };
        if stale {
            *self = Slot::Idle;
        }
    }
}

pub struct RegenerationCoordinator {
    repository: Arc<StructureRepository>,
    blobs: Arc<dyn BlobStore>,
    extractor: Arc<dyn Extractor>,
    queue: WorkQueue,
    options: CoordinatorOptions,
    slots: Mutex<HashMap<Key, Arc<Mutex<Slot>>>>,
}

impl RegenerationCoordinator {
    pub fn new(
        repository: Arc<StructureRepository>,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn Extractor>,
        queue: WorkQueue,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            repository,
            blobs,
            extractor,
            queue,
            options,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Builds and binds a fresh subtree for `version`, or joins the attempt already running.
    ///
    /// Every caller attached to the same attempt receives the same outcome.
    pub async fn regenerate(
        self: &Arc<Self>,
        document_id: &str,
        version: Version,
    ) -> Result<Arc<StructureTree>> {
        let slot = self.slot(document_id, version);
        let mut rx = {
            let mut state = lock(&slot);
            state.settle(Instant::now());
            match &*state {
                Slot::Completed { tree, .. } => {
                    tracing::debug!(document_id, %version, "serving cached regeneration");
                    return Ok(Arc::clone(tree));
                }
                Slot::InProgress(rx) => {
                    tracing::info!(document_id, %version, "joined in-flight regeneration");
                    rx.clone()
                }
                Slot::Idle => {
                    let (tx, rx) = watch::channel(None);
                    *state = Slot::InProgress(rx.clone());
                    self.start(document_id, version, Arc::clone(&slot), tx);
                    rx
                }
            }
        };

        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or_else(|| {
                Err(Error::Extraction(
                    "regeneration finished without an outcome".to_owned(),
                ))
            }),
            Err(_) => Err(Error::Extraction(
                "regeneration task ended without an outcome".to_owned(),
            )),
        }
    }

    pub fn status(&self, document_id: &str, version: Version) -> RegenerationStatus {
        let slot = lock(&self.slots)
            .get(&(document_id.to_owned(), version))
            .cloned();
        let Some(slot) = slot else {
            return RegenerationStatus::Idle;
        };
        let mut state = lock(&slot);
        state.settle(Instant::now());
        match &*state {
            Slot::Idle => RegenerationStatus::Idle,
            Slot::InProgress(_) => RegenerationStatus::InProgress,
            Slot::Completed { tree, .. } => RegenerationStatus::Completed {
                root: tree.root,
                generated_at: tree.generated_at,
            },
        }
    }

    /// Forgets cached results for the document. Running attempts are left alone.
    pub fn invalidate(&self, document_id: &str) {
        let slots = lock(&self.slots);
        for ((id, _), slot) in slots.iter() {
            if id != document_id {
                continue;
            }
            let mut state = lock(slot);
            if matches!(&*state, Slot::Completed { .. }) {
                *state = Slot::Idle;
            }
        }
    }

    fn slot(&self, document_id: &str, version: Version) -> Arc<Mutex<Slot>> {
        let mut slots = lock(&self.slots);
        let now = Instant::now();
        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let mut state = lock(slot);
            state.settle(now);
            !matches!(&*state, Slot::Idle)
        });
        Arc::clone(
            slots
                .entry((document_id.to_owned(), version))
                .or_default(),
        )
    }

    fn start(
        self: &Arc<Self>,
        document_id: &str,
        version: Version,
        slot: Arc<Mutex<Slot>>,
        tx: watch::Sender<Option<Outcome>>,
    ) {
        let coordinator = Arc::clone(self);
        let document_id = document_id.to_owned();
        self.queue.spawn(async move {
            let outcome = coordinator.attempt(&document_id, version).await.map(Arc::new);
            match &outcome {
                Ok(tree) => tracing::info!(
                    document_id = %document_id,
                    %version,
                    root = %tree.root,
                    "regeneration completed"
                ),
                Err(err) => tracing::warn!(
                    document_id = %document_id,
                    %version,
                    error = %err,
                    "regeneration failed"
                ),
            }

            {
                let mut state = lock(&slot);
                *state = match &outcome {
                    Ok(tree) if !coordinator.options.result_ttl.is_zero() => Slot::Completed {
                        tree: Arc::clone(tree),
                        expires_at: Instant::now() + coordinator.options.result_ttl,
                    },
                    _ => Slot::Idle,
                };
            }
            tx.send_replace(Some(outcome));
        });
    }

    async fn attempt(&self, document_id: &str, version: Version) -> Result<StructureTree> {
        let source = self
            .blobs
            .get_source(document_id)
            .await
            .map_err(Error::persistence)?
            .ok_or_else(|| Error::NotFound(format!("source of document {document_id}")))?;

        let extraction = extract::run_with_timeout(
            self.extractor.as_ref(),
            &source,
            version,
            self.options.extract_timeout,
        )
        .await?;
        validate(&extraction.description)?;

        // Images land under refs only this attempt's subtree uses; bound versions keep theirs.
        let attempt_id = uuid::Uuid::new_v4().simple().to_string();
        let extraction = extraction.into_scoped(&format!("{version}-{}", &attempt_id[..12]));

        let staged = self
            .repository
            .create_subtree(document_id, version, &extraction.description)
            .await?;

        let previous = match self.publish(&staged, &extraction).await {
            Ok(previous) => previous,
            Err(err) => {
                self.discard(&staged, &extraction, &err).await;
                return Err(err);
            }
        };
        if let Some(previous) = previous {
            tracing::info!(
                document_id,
                %version,
                previous = %previous.root,
                "previous version superseded"
            );
        }

        self.repository.read_subtree(&staged).await
    }

    /// Stores the attempt's images, then binds its subtree.
    async fn publish(
        &self,
        staged: &SubtreeRef,
        extraction: &Extraction,
    ) -> Result<Option<SubtreeRef>> {
        for image in &extraction.images {
            self.blobs
                .put_image(&staged.document_id, &image.image_ref, &image.bytes)
                .await
                .map_err(Error::persistence)?;
        }
        self.repository.bind_version(staged).await
    }

    /// Abandons a staged subtree that will never be bound and removes the images written for it.
    async fn discard(&self, staged: &SubtreeRef, extraction: &Extraction, cause: &Error) {
        let document_id = staged.document_id.as_str();
        if let Err(err) = self.repository.abandon_subtree(staged).await {
            tracing::warn!(
                document_id,
                root = %staged.root,
                error = %err,
                "failed to abandon staged subtree; the reconciler will collect it after the grace window"
            );
        }

        if matches!(cause, Error::DocumentNotFound(_)) {
            // Deleted mid-attempt: `publish` may have recreated its blob directory.
            if let Err(err) = self.blobs.delete_document(document_id).await {
                tracing::warn!(document_id, ?err, "failed to remove blobs of deleted document");
            }
            return;
        }
        for image in &extraction.images {
            if let Err(err) = self.blobs.delete_image(document_id, &image.image_ref).await {
                tracing::warn!(
                    document_id,
                    image_ref = %image.image_ref,
                    ?err,
                    "failed to remove image of discarded subtree"
                );
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
