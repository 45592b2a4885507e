//! Storage backend trait definition

use crate::model::{
    AccessTier, BlobProperties, BlobSummary, DeleteOutcome, DeleteStatus, Metadata, Snapshot,
};
use crate::sas::SasPermissions;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use url::Url;

/// Blob content flowing to or from a backend
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// One page of a container listing
#[derive(Clone, Debug, Default)]
pub struct ListPage {
    pub items: Vec<BlobSummary>,
    /// Continuation marker; `None` on the last page
    pub next_marker: Option<String>,
}

/// Primitive operations of a blob store
///
/// Implementations:
/// - [`AzureBackend`](super::AzureBackend) talks to Azure Blob Storage or Azurite
/// - [`MemoryBackend`](super::MemoryBackend) keeps everything in process, for tests
///
/// Names are validated by the caller; backends can assume well-formed input.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Short identifier used in logs ("azure", "memory")
    fn kind(&self) -> &str;

    /// Create the container if it is missing. Returns `true` if it was created.
    async fn ensure_container(&self, container: &str) -> Result<bool>;

    /// Store `body` as a block blob, replacing any existing blob of that name
    async fn put_blob(
        &self,
        container: &str,
        name: &str,
        body: ByteStream,
        length: u64,
        content_type: Option<&str>,
    ) -> Result<()>;

    /// Stream the current content of a blob
    async fn get_blob(&self, container: &str, name: &str) -> Result<ByteStream>;

    /// Fetch one page of the listing, starting after `marker`
    async fn list_page(&self, container: &str, marker: Option<&str>) -> Result<ListPage>;

    async fn properties(&self, container: &str, name: &str) -> Result<BlobProperties>;

    async fn set_tier(&self, container: &str, name: &str, tier: AccessTier) -> Result<()>;

    /// Replace the metadata map wholesale
    async fn set_metadata(&self, container: &str, name: &str, metadata: &Metadata) -> Result<()>;

    /// Delete a blob and its snapshots. Returns `false` if nothing existed.
    async fn delete_blob(&self, container: &str, name: &str) -> Result<bool>;

    /// Delete several blobs, reporting each one separately
    ///
    /// Default implementation calls delete_blob() for each name
    async fn delete_batch(&self, container: &str, names: &[String]) -> Result<Vec<DeleteOutcome>> {
        let mut outcomes = Vec::with_capacity(names.len());
        for name in names {
            let status = match self.delete_blob(container, name).await {
                Ok(true) => DeleteStatus::Deleted,
                Ok(false) => DeleteStatus::NotFound,
                Err(e) => DeleteStatus::Failed(e.to_string()),
            };
            outcomes.push(DeleteOutcome::new(name.clone(), status));
        }
        Ok(outcomes)
    }

    async fn snapshot(&self, container: &str, name: &str) -> Result<Snapshot>;

    /// Sign a URI granting `permissions` on one blob until `expiry`
    async fn shared_access_uri(
        &self,
        container: &str,
        name: &str,
        permissions: SasPermissions,
        expiry: DateTime<Utc>,
    ) -> Result<Url>;
}
