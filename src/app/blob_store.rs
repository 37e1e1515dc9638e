use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;

/// Source bytes and extracted images, keyed by document.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_source(&self, document_id: &str, bytes: &[u8]) -> anyhow::Result<()>;
    async fn get_source(&self, document_id: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn put_image(
        &self,
        document_id: &str,
        image_ref: &str,
        bytes: &[u8],
    ) -> anyhow::Result<()>;
    async fn get_image(
        &self,
        document_id: &str,
        image_ref: &str,
    ) -> anyhow::Result<Option<Vec<u8>>>;
    /// References of every image stored for the document, in no particular order.
    async fn list_images(&self, document_id: &str) -> anyhow::Result<Vec<String>>;
    /// Missing images are not an error.
    async fn delete_image(&self, document_id: &str, image_ref: &str) -> anyhow::Result<()>;
    /// Removes everything stored for the document. Missing documents are not an error.
    async fn delete_document(&self, document_id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct LocalFsBlobStore {
    base_dir: PathBuf,
}

impl LocalFsBlobStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn documents_dir(&self) -> PathBuf {
        self.base_dir.join("blobs")
    }

    fn document_dir(&self, document_id: &str) -> anyhow::Result<PathBuf> {
        ensure_segment(document_id).context("invalid document id")?;
        Ok(self.documents_dir().join(document_id))
    }

    fn source_path(&self, document_id: &str) -> anyhow::Result<PathBuf> {
        Ok(self.document_dir(document_id)?.join("source.bin"))
    }

    fn images_dir(&self, document_id: &str) -> anyhow::Result<PathBuf> {
        Ok(self.document_dir(document_id)?.join("images"))
    }

    fn image_path(&self, document_id: &str, image_ref: &str) -> anyhow::Result<PathBuf> {
        ensure_segment(image_ref).context("invalid image reference")?;
        Ok(self.images_dir(document_id)?.join(image_ref))
    }
}

#[async_trait]
impl BlobStore for LocalFsBlobStore {
    async fn put_source(&self, document_id: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let path = self.source_path(document_id)?;
        write_atomic(&path, bytes).await.context("write source")
    }

    async fn get_source(&self, document_id: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let Ok(path) = self.source_path(document_id) else {
            return Ok(None);
        };
        read_optional(&path).await
    }

    async fn put_image(
        &self,
        document_id: &str,
        image_ref: &str,
        bytes: &[u8],
    ) -> anyhow::Result<()> {
        let path = self.image_path(document_id, image_ref)?;
        write_atomic(&path, bytes)
            .await
            .with_context(|| format!("write image {image_ref}"))
    }

    async fn get_image(
        &self,
        document_id: &str,
        image_ref: &str,
    ) -> anyhow::Result<Option<Vec<u8>>> {
        // A reference that cannot name a stored file simply has no image.
        let Ok(path) = self.image_path(document_id, image_ref) else {
            return Ok(None);
        };
        read_optional(&path).await
    }

    async fn list_images(&self, document_id: &str) -> anyhow::Result<Vec<String>> {
        let dir = self.images_dir(document_id)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).with_context(|| format!("read dir: {}", dir.display())),
        };
        let mut refs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("read dir: {}", dir.display()))?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            // Leftovers of interrupted writes are not images.
            if name.contains(".tmp-") || ensure_segment(&name).is_err() {
                continue;
            }
            refs.push(name);
        }
        Ok(refs)
    }

    async fn delete_image(&self, document_id: &str, image_ref: &str) -> anyhow::Result<()> {
        let path = self.image_path(document_id, image_ref)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove: {}", path.display())),
        }
    }

    async fn delete_document(&self, document_id: &str) -> anyhow::Result<()> {
        let dir = self.document_dir(document_id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove dir: {}", dir.display())),
        }
    }
}

/// Accepts identifiers that map to exactly one path segment under the store.
fn ensure_segment(raw: &str) -> anyhow::Result<()> {
    if raw.is_empty() || raw == "." || raw == ".." {
        anyhow::bail!("{raw:?} is not a usable name");
    }
    let ok = raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !ok {
        anyhow::bail!("{raw:?} contains characters outside [A-Za-z0-9._-]");
    }
    Ok(())
}

async fn read_optional(path: &Path) -> anyhow::Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read: {}", path.display())),
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("blob path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create dir: {}", parent.display()))?;

    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("write tmp: {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}
