//! High-level blob API
//!
//! [`BlobService`] is the one entry point the demo talks to. It validates
//! names, handles the local filesystem side of uploads and downloads, does the
//! JSON encoding for typed objects, and forwards everything else to a
//! [`BlobBackend`].

use crate::backend::{BlobBackend, ByteStream};
use crate::clock::{Clock, SystemClock};
use crate::model::{
    validate_blob_name, validate_container_name, validate_metadata, AccessTier, BlobProperties,
    BlobSummary, DeleteOutcome, Metadata, Snapshot,
};
use crate::sas::SasPermissions;
use crate::{Error, Result};
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use url::Url;

/// How long an issued shared access URI stays valid unless told otherwise
pub const DEFAULT_SAS_TTL: std::time::Duration = std::time::Duration::from_secs(10 * 60);

/// Where downloads land unless told otherwise
pub const DEFAULT_DOWNLOAD_DIR: &str = "data";

const JSON_CONTENT_TYPE: &str = "application/json";

/// A reference to a container known to satisfy the naming rules
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Container {
    name: String,
}

impl Container {
    /// Validate `name` without touching the store
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_container_name(&name)?;
        Ok(Container { name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Listing cursor for [`BlobService::list_blobs`]
enum Cursor {
    Start,
    Next(String),
    Done,
}

/// The blob facade
///
/// Every call is independent; nothing is cached between calls.
pub struct BlobService {
    backend: Arc<dyn BlobBackend>,
    clock: Arc<dyn Clock>,
}

impl BlobService {
    pub fn new(backend: impl BlobBackend + 'static) -> Self {
        Self::from_backend(Arc::new(backend))
    }

    /// Share an existing backend handle
    pub fn from_backend(backend: Arc<dyn BlobBackend>) -> Self {
        BlobService {
            backend,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` to compute SAS expiry
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn backend(&self) -> &Arc<dyn BlobBackend> {
        &self.backend
    }

    // === Containers ===

    /// Create the container if needed and hand back a handle to it
    pub async fn get_or_create_container(&self, name: &str) -> Result<Container> {
        let container = Container::new(name)?;
        let created = self.backend.ensure_container(&container.name).await?;
        tracing::debug!(container = %container, created, backend = self.backend.kind(), "container ready");
        Ok(container)
    }

    // === Files ===

    /// Upload a local file to a blob named after the file's base name
    ///
    /// Overwrites any existing blob of that name. Returns the blob name.
    pub async fn upload_file(&self, container: &Container, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("local file '{}'", path.display())))
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            return Err(Error::InvalidArgument(format!(
                "'{}' is not a regular file",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::InvalidArgument(format!("'{}' has no usable file name", path.display()))
            })?
            .to_string();
        validate_blob_name(&name)?;

        let file = tokio::fs::File::open(path).await?;
        let body: ByteStream = ReaderStream::new(file).map_err(Error::from).boxed();
        self.backend
            .put_blob(
                &container.name,
                &name,
                body,
                meta.len(),
                Some(content_type_for(&name)),
            )
            .await?;

        tracing::debug!(container = %container, name = %name, bytes = meta.len(), "blob uploaded");
        Ok(name)
    }

    /// Download a blob into [`DEFAULT_DOWNLOAD_DIR`]
    pub async fn download_file(&self, container: &Container, name: &str) -> Result<PathBuf> {
        self.download_file_to(container, name, DEFAULT_DOWNLOAD_DIR)
            .await
    }

    /// Download a blob into `dir/<name>`, creating directories as needed
    ///
    /// Fails with `NotFound` before anything is written if the blob is missing.
    /// Names that would resolve outside `dir` (`..`, absolute paths) are refused.
    pub async fn download_file_to(
        &self,
        container: &Container,
        name: &str,
        dir: impl AsRef<Path>,
    ) -> Result<PathBuf> {
        validate_blob_name(name)?;
        let target = local_target(dir.as_ref(), name)?;
        let mut content = self.backend.get_blob(&container.name, name).await?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&target).await?;
        let mut written = 0u64;
        while let Some(chunk) = content.try_next().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::info!(bytes = written, path = %target.display(), "Blob '{}' was downloaded", name);
        Ok(target)
    }

    // === Listing ===

    /// Stream every blob in the container, fetching pages as they are consumed
    ///
    /// Each call starts again from the first page.
    pub fn list_blobs(&self, container: &Container) -> BoxStream<'static, Result<BlobSummary>> {
        let backend = Arc::clone(&self.backend);
        let container = container.name.clone();

        stream::try_unfold(Cursor::Start, move |cursor| {
            let backend = Arc::clone(&backend);
            let container = container.clone();
            async move {
                let marker = match cursor {
                    Cursor::Done => return Ok(None),
                    Cursor::Start => None,
                    Cursor::Next(marker) => Some(marker),
                };
                let page = backend.list_page(&container, marker.as_deref()).await?;
                let next = match page.next_marker {
                    Some(marker) => Cursor::Next(marker),
                    None => Cursor::Done,
                };
                let items = stream::iter(page.items.into_iter().map(Ok::<_, Error>));
                Ok::<_, Error>(Some((items, next)))
            }
        })
        .try_flatten()
        .boxed()
    }

    /// Drain [`list_blobs`](Self::list_blobs) into a vector
    pub async fn collect_blobs(&self, container: &Container) -> Result<Vec<BlobSummary>> {
        self.list_blobs(container).try_collect().await
    }

    // === Properties ===

    pub async fn set_access_tier(
        &self,
        container: &Container,
        name: &str,
        tier: AccessTier,
    ) -> Result<()> {
        validate_blob_name(name)?;
        self.backend.set_tier(&container.name, name, tier).await?;
        tracing::debug!(blob = name, tier = %tier, "access tier set");
        Ok(())
    }

    /// Replace the blob's metadata with `metadata` (keys not present are removed)
    pub async fn set_metadata(
        &self,
        container: &Container,
        name: &str,
        metadata: &Metadata,
    ) -> Result<()> {
        validate_blob_name(name)?;
        validate_metadata(metadata)?;
        self.backend
            .set_metadata(&container.name, name, metadata)
            .await
    }

    pub async fn blob_properties(&self, container: &Container, name: &str) -> Result<BlobProperties> {
        validate_blob_name(name)?;
        self.backend.properties(&container.name, name).await
    }

    // === Deletion ===

    /// Delete a blob and its snapshots if it exists
    ///
    /// Returns `true` when something was deleted. A missing blob is not an error.
    pub async fn delete_blob(&self, container: &Container, name: &str) -> Result<bool> {
        validate_blob_name(name)?;
        let deleted = self.backend.delete_blob(&container.name, name).await?;
        tracing::debug!(blob = name, deleted, "delete");
        Ok(deleted)
    }

    /// Delete many blobs in as few round trips as the backend allows
    pub async fn delete_blobs<S: AsRef<str>>(
        &self,
        container: &Container,
        names: &[S],
    ) -> Result<Vec<DeleteOutcome>> {
        let names = names
            .iter()
            .map(|n| {
                let n = n.as_ref();
                validate_blob_name(n).map(|_| n.to_string())
            })
            .collect::<Result<Vec<_>>>()?;
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let outcomes = self.backend.delete_batch(&container.name, &names).await?;
        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        tracing::debug!(requested = names.len(), failed, "batch delete");
        Ok(outcomes)
    }

    // === Snapshots and SAS ===

    pub async fn snapshot_blob(&self, container: &Container, name: &str) -> Result<Snapshot> {
        validate_blob_name(name)?;
        self.backend.snapshot(&container.name, name).await
    }

    /// Issue a read+write URI for one blob valid for [`DEFAULT_SAS_TTL`]
    pub async fn issue_shared_access_uri(&self, container: &Container, name: &str) -> Result<Url> {
        self.issue_shared_access_uri_with_ttl(container, name, DEFAULT_SAS_TTL)
            .await
    }

    pub async fn issue_shared_access_uri_with_ttl(
        &self,
        container: &Container,
        name: &str,
        ttl: std::time::Duration,
    ) -> Result<Url> {
        validate_blob_name(name)?;
        let ttl = chrono::Duration::from_std(ttl)
            .ok()
            .filter(|ttl| *ttl > chrono::Duration::zero())
            .ok_or_else(|| Error::InvalidArgument("SAS lifetime must be positive".into()))?;
        let expiry = self.clock.now().checked_add_signed(ttl).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "SAS lifetime of {}s is out of range",
                ttl.num_seconds()
            ))
        })?;
        self.backend
            .shared_access_uri(&container.name, name, SasPermissions::READ_WRITE, expiry)
            .await
    }

    // === Typed objects ===

    /// Serialize `value` as JSON into one blob, overwriting
    pub async fn write_object<T: Serialize + ?Sized>(
        &self,
        value: &T,
        blob_name: &str,
        container: &Container,
    ) -> Result<()> {
        validate_blob_name(blob_name)?;
        let json = Bytes::from(serde_json::to_vec(value)?);
        let length = json.len() as u64;
        let body: ByteStream = stream::once(async move { Ok(json) }).boxed();
        self.backend
            .put_blob(
                &container.name,
                blob_name,
                body,
                length,
                Some(JSON_CONTENT_TYPE),
            )
            .await?;
        tracing::debug!(blob = blob_name, bytes = length, "object written");
        Ok(())
    }

    /// Serialize a list as one JSON array blob
    pub async fn write_objects<T: Serialize>(
        &self,
        values: &[T],
        blob_name: &str,
        container: &Container,
    ) -> Result<()> {
        self.write_object(values, blob_name, container).await
    }

    /// Read one JSON blob back into `T`
    pub async fn read_object<T: DeserializeOwned>(
        &self,
        blob_name: &str,
        container: &Container,
    ) -> Result<T> {
        validate_blob_name(blob_name)?;
        let chunks: Vec<Bytes> = self
            .backend
            .get_blob(&container.name, blob_name)
            .await?
            .try_collect()
            .await?;
        let text = String::from_utf8(chunks.concat())?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn read_objects<T: DeserializeOwned>(
        &self,
        blob_name: &str,
        container: &Container,
    ) -> Result<Vec<T>> {
        self.read_object(blob_name, container).await
    }
}

/// Where blob `name` lands under `dir`; only plain path segments are allowed
fn local_target(dir: &Path, name: &str) -> Result<PathBuf> {
    let relative = Path::new(name);
    if !relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(Error::InvalidArgument(format!(
            "blob name '{}' does not map to a path inside the download directory",
            name
        )));
    }
    Ok(dir.join(relative))
}

/// Content type from the file extension
fn content_type_for(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "json" => JSON_CONTENT_TYPE,
        "txt" => "text/plain",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}
