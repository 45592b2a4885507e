//! In-process blob store for tests and offline demos
//!
//! Mirrors the service semantics the facade relies on: create-or-reuse
//! containers, overwrite-on-upload, tiers, wholesale metadata replacement,
//! snapshots, and SAS URIs that stop verifying once the injected clock passes
//! their expiry.

use super::{BlobBackend, ByteStream, ListPage};
use crate::clock::{Clock, SystemClock};
use crate::model::{AccessTier, BlobProperties, DeleteOutcome, DeleteStatus, Metadata, Snapshot};
use crate::sas::{verify_blob_sas, BlobSas, SasAccess, SasPermissions, SigningKey};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use url::Url;

/// Account name the in-memory store pretends to be
pub const MEMORY_ACCOUNT: &str = "devstoreaccount1";

/// Secret the store derives its SAS signing key from
const SIGNING_SECRET: &[u8] = b"blobdemo in-memory store";

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:10000/devstoreaccount1";
const DEFAULT_PAGE_SIZE: usize = 5000;

#[derive(Clone, Debug)]
struct StoredSnapshot {
    id: String,
    data: Bytes,
    metadata: Metadata,
}

#[derive(Clone, Debug)]
struct StoredBlob {
    data: Bytes,
    content_type: Option<String>,
    tier: AccessTier,
    metadata: Metadata,
    last_modified: DateTime<Utc>,
    snapshots: Vec<StoredSnapshot>,
}

impl StoredBlob {
    fn properties(&self, name: &str) -> BlobProperties {
        BlobProperties {
            name: name.to_string(),
            last_modified: self.last_modified,
            access_tier: Some(self.tier),
            size: self.data.len() as u64,
            content_type: self.content_type.clone(),
            etag: Some(format!("\"{}\"", hex::encode(blake3::hash(&self.data).as_bytes()))),
            metadata: self.metadata.clone(),
        }
    }
}

type ContainerMap = BTreeMap<String, BTreeMap<String, StoredBlob>>;

/// A blob store that lives entirely in memory
pub struct MemoryBackend {
    containers: RwLock<ContainerMap>,
    clock: Arc<dyn Clock>,
    key: Option<SigningKey>,
    base_url: Url,
    page_size: usize,
}

impl MemoryBackend {
    /// Create an empty store on the system clock
    pub fn new() -> Self {
        MemoryBackend {
            containers: RwLock::new(BTreeMap::new()),
            clock: Arc::new(SystemClock),
            key: Some(SigningKey::derive(MEMORY_ACCOUNT, SIGNING_SECRET)),
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Use `clock` for timestamps and SAS expiry checks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Limit how many blobs a listing page returns
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Behave like a client holding only a SAS token: nothing can be signed
    pub fn without_account_key(mut self) -> Self {
        self.key = None;
        self
    }

    fn blob_url(&self, container: &str, name: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(container).push(name);
        }
        url
    }

    /// Split a URI issued by this store back into container and blob name
    fn locate(&self, uri: &Url) -> Result<(String, String)> {
        let base = self.base_url.path().trim_end_matches('/');
        let rest = uri
            .path()
            .strip_prefix(base)
            .and_then(|p| p.strip_prefix('/'))
            .ok_or_else(|| Error::InvalidArgument(format!("URI {} is not in this store", uri)))?;
        let (container, blob) = rest
            .split_once('/')
            .ok_or_else(|| Error::InvalidArgument(format!("URI {} does not name a blob", uri)))?;
        let decode = |s: &str| {
            url::form_urlencoded::parse(format!("x={}", s.replace('+', "%2B")).as_bytes())
                .next()
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default()
        };
        Ok((decode(container), decode(blob)))
    }

    /// Check a presented SAS URI exactly as the service would
    pub fn verify_shared_access_uri(&self, uri: &Url, access: SasAccess) -> Result<()> {
        let key = self.key.as_ref().ok_or_else(|| {
            Error::InvalidArgument("store has no account key to verify signatures".into())
        })?;
        let (container, blob) = self.locate(uri)?;
        verify_blob_sas(key, uri, &container, &blob, access, self.clock.now())
    }

    /// Read a blob the way an anonymous bearer of a SAS URI would
    pub fn get_with_shared_access(&self, uri: &Url) -> Result<Bytes> {
        self.verify_shared_access_uri(uri, SasAccess::Read)?;
        let (container, blob) = self.locate(uri)?;
        self.with_blob(&container, &blob, |b| b.data.clone())
    }

    /// Snapshots currently held for a blob, oldest first
    pub fn snapshots(&self, container: &str, name: &str) -> Result<Vec<Snapshot>> {
        self.with_blob(container, name, |b| {
            b.snapshots
                .iter()
                .map(|s| Snapshot {
                    blob: name.to_string(),
                    id: s.id.clone(),
                })
                .collect()
        })
    }

    /// Content and metadata captured by one snapshot
    pub fn snapshot_content(
        &self,
        container: &str,
        name: &str,
        id: &str,
    ) -> Result<(Bytes, Metadata)> {
        self.with_blob(container, name, |b| {
            b.snapshots
                .iter()
                .find(|s| s.id == id)
                .map(|s| (s.data.clone(), s.metadata.clone()))
        })?
        .ok_or_else(|| Error::NotFound(format!("snapshot {} of '{}'", id, name)))
    }

    fn with_blob<T>(
        &self,
        container: &str,
        name: &str,
        f: impl FnOnce(&StoredBlob) -> T,
    ) -> Result<T> {
        let containers = self.containers.read();
        let blobs = containers
            .get(container)
            .ok_or_else(|| container_not_found(container))?;
        let blob = blobs
            .get(name)
            .ok_or_else(|| blob_not_found(container, name))?;
        Ok(f(blob))
    }

    fn with_blob_mut<T>(
        &self,
        container: &str,
        name: &str,
        f: impl FnOnce(&mut StoredBlob) -> T,
    ) -> Result<T> {
        let mut containers = self.containers.write();
        let blobs = containers
            .get_mut(container)
            .ok_or_else(|| container_not_found(container))?;
        let blob = blobs
            .get_mut(name)
            .ok_or_else(|| blob_not_found(container, name))?;
        Ok(f(blob))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn container_not_found(container: &str) -> Error {
    Error::NotFound(format!("container '{}'", container))
}

fn blob_not_found(container: &str, name: &str) -> Error {
    Error::NotFound(format!("blob '{}' in container '{}'", name, container))
}

/// Snapshot ids use the service's 7-digit fractional timestamp
fn snapshot_id(at: DateTime<Utc>) -> String {
    format!(
        "{}.{:07}Z",
        at.format("%Y-%m-%dT%H:%M:%S"),
        at.timestamp_subsec_nanos() / 100
    )
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    fn kind(&self) -> &str {
        "memory"
    }

    async fn ensure_container(&self, container: &str) -> Result<bool> {
        let mut containers = self.containers.write();
        if containers.contains_key(container) {
            return Ok(false);
        }
        containers.insert(container.to_string(), BTreeMap::new());
        Ok(true)
    }

    async fn put_blob(
        &self,
        container: &str,
        name: &str,
        body: ByteStream,
        length: u64,
        content_type: Option<&str>,
    ) -> Result<()> {
        let chunks: Vec<Bytes> = body.try_collect().await?;
        let mut data = BytesMut::with_capacity(length as usize);
        for chunk in chunks {
            data.extend_from_slice(&chunk);
        }
        if data.len() as u64 != length {
            return Err(Error::Service {
                status: 400,
                code: Some("InvalidHeaderValue".into()),
                message: format!(
                    "Content-Length {} does not match body of {} bytes",
                    length,
                    data.len()
                ),
            });
        }

        let now = self.clock.now();
        let mut containers = self.containers.write();
        let blobs = containers
            .get_mut(container)
            .ok_or_else(|| container_not_found(container))?;
        // Overwrite keeps snapshots but resets tier and metadata, as a fresh Put Blob does
        let snapshots = blobs
            .remove(name)
            .map(|old| old.snapshots)
            .unwrap_or_default();
        blobs.insert(
            name.to_string(),
            StoredBlob {
                data: data.freeze(),
                content_type: content_type.map(str::to_string),
                tier: AccessTier::Hot,
                metadata: Metadata::new(),
                last_modified: now,
                snapshots,
            },
        );
        Ok(())
    }

    async fn get_blob(&self, container: &str, name: &str) -> Result<ByteStream> {
        let data = self.with_blob(container, name, |b| b.data.clone())?;
        Ok(stream::once(async move { Ok(data) }).boxed())
    }

    async fn list_page(&self, container: &str, marker: Option<&str>) -> Result<ListPage> {
        let containers = self.containers.read();
        let blobs = containers
            .get(container)
            .ok_or_else(|| container_not_found(container))?;

        let lower = match marker {
            Some(m) => Bound::Excluded(m.to_string()),
            None => Bound::Unbounded,
        };
        let mut range = blobs.range((lower, Bound::Unbounded));
        let items: Vec<_> = range
            .by_ref()
            .take(self.page_size)
            .map(|(name, blob)| blob.properties(name).summary())
            .collect();
        let next_marker = match range.next() {
            Some(_) => items.last().map(|s| s.name.clone()),
            None => None,
        };
        Ok(ListPage { items, next_marker })
    }

    async fn properties(&self, container: &str, name: &str) -> Result<BlobProperties> {
        self.with_blob(container, name, |b| b.properties(name))
    }

    async fn set_tier(&self, container: &str, name: &str, tier: AccessTier) -> Result<()> {
        self.with_blob_mut(container, name, |b| b.tier = tier)
    }

    async fn set_metadata(&self, container: &str, name: &str, metadata: &Metadata) -> Result<()> {
        let now = self.clock.now();
        self.with_blob_mut(container, name, |b| {
            b.metadata = metadata.clone();
            b.last_modified = now;
        })
    }

    async fn delete_blob(&self, container: &str, name: &str) -> Result<bool> {
        let mut containers = self.containers.write();
        Ok(containers
            .get_mut(container)
            .is_some_and(|blobs| blobs.remove(name).is_some()))
    }

    // A missing container reports every name as not found.
    async fn delete_batch(&self, container: &str, names: &[String]) -> Result<Vec<DeleteOutcome>> {
        let mut containers = self.containers.write();
        let mut blobs = containers.get_mut(container);
        Ok(names
            .iter()
            .map(|name| {
                let removed = blobs
                    .as_mut()
                    .is_some_and(|blobs| blobs.remove(name).is_some());
                let status = if removed {
                    DeleteStatus::Deleted
                } else {
                    DeleteStatus::NotFound
                };
                DeleteOutcome::new(name.clone(), status)
            })
            .collect())
    }

    async fn snapshot(&self, container: &str, name: &str) -> Result<Snapshot> {
        let now = self.clock.now();
        let id = self.with_blob_mut(container, name, |b| {
            let mut at = now;
            let mut id = snapshot_id(at);
            while b.snapshots.iter().any(|s| s.id == id) {
                at += Duration::nanoseconds(100);
                id = snapshot_id(at);
            }
            b.snapshots.push(StoredSnapshot {
                id: id.clone(),
                data: b.data.clone(),
                metadata: b.metadata.clone(),
            });
            id
        })?;
        Ok(Snapshot {
            blob: name.to_string(),
            id,
        })
    }

    async fn shared_access_uri(
        &self,
        container: &str,
        name: &str,
        permissions: SasPermissions,
        expiry: DateTime<Utc>,
    ) -> Result<Url> {
        let key = self.key.as_ref().ok_or_else(|| {
            Error::InvalidArgument(
                "cannot generate a shared access URI without an account key".into(),
            )
        })?;
        self.with_blob(container, name, |_| ())?;
        let sas = BlobSas::new(container, name, permissions, expiry);
        tracing::debug!(
            container,
            blob = name,
            expiry = %expiry.to_rfc3339_opts(SecondsFormat::Secs, true),
            "signed shared access URI"
        );
        Ok(sas.sign_url(key, &self.blob_url(container, name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn body(data: &'static [u8]) -> ByteStream {
        stream::once(async move { Ok(Bytes::from_static(data)) }).boxed()
    }

    async fn store_with(names: &[&str]) -> MemoryBackend {
        let store = MemoryBackend::new();
        store.ensure_container("temp").await.unwrap();
        for name in names {
            store
                .put_blob("temp", name, body(b"abc"), 3, None)
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_ensure_container_is_idempotent() {
        let store = MemoryBackend::new();
        assert!(store.ensure_container("temp").await.unwrap());
        assert!(!store.ensure_container("temp").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_requires_container() {
        let store = MemoryBackend::new();
        let err = store
            .put_blob("missing", "a", body(b"abc"), 3, None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_put_rejects_length_mismatch() {
        let store = store_with(&[]).await;
        let err = store
            .put_blob("temp", "a", body(b"abc"), 4, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Service { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_list_pages_by_marker() {
        let store = store_with(&["a", "b", "c", "d", "e"]).await.with_page_size(2);

        let first = store.list_page("temp", None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.next_marker.as_deref(), Some("b"));

        let second = store.list_page("temp", Some("b")).await.unwrap();
        let names: Vec<_> = second.items.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["c", "d"]);

        let last = store.list_page("temp", Some("d")).await.unwrap();
        assert_eq!(last.items.len(), 1);
        assert!(last.next_marker.is_none());
    }

    #[tokio::test]
    async fn test_overwrite_resets_tier_and_metadata() {
        let store = store_with(&["a"]).await;
        store.set_tier("temp", "a", AccessTier::Cold).await.unwrap();
        let mut meta = Metadata::new();
        meta.insert("Name".into(), "Bear".into());
        store.set_metadata("temp", "a", &meta).await.unwrap();

        store
            .put_blob("temp", "a", body(b"xyz!"), 4, Some("image/jpeg"))
            .await
            .unwrap();
        let props = store.properties("temp", "a").await.unwrap();
        assert_eq!(props.size, 4);
        assert_eq!(props.access_tier, Some(AccessTier::Hot));
        assert!(props.metadata.is_empty());
        assert_eq!(props.content_type.as_deref(), Some("image/jpeg"));
    }

    #[tokio::test]
    async fn test_snapshot_ids_unique_under_frozen_clock() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryBackend::new().with_clock(clock);
        store.ensure_container("temp").await.unwrap();
        store
            .put_blob("temp", "a", body(b"abc"), 3, None)
            .await
            .unwrap();

        let s1 = store.snapshot("temp", "a").await.unwrap();
        let s2 = store.snapshot("temp", "a").await.unwrap();
        assert_ne!(s1.id, s2.id);
        assert_eq!(store.snapshots("temp", "a").unwrap().len(), 2);
        assert!(s1.id.ends_with('Z'));
    }

    #[tokio::test]
    async fn test_snapshot_keeps_old_content() {
        let store = store_with(&["a"]).await;
        let snap = store.snapshot("temp", "a").await.unwrap();
        store
            .put_blob("temp", "a", body(b"changed"), 7, None)
            .await
            .unwrap();
        let (data, _) = store.snapshot_content("temp", "a", &snap.id).unwrap();
        assert_eq!(&data[..], b"abc");
    }

    #[tokio::test]
    async fn test_delete_batch_reports_each_item() {
        let store = store_with(&["a", "b"]).await;
        let outcomes = store
            .delete_batch("temp", &["a".into(), "zzz".into(), "b".into()])
            .await
            .unwrap();
        let statuses: Vec<_> = outcomes.iter().map(|o| o.status.clone()).collect();
        assert_eq!(
            statuses,
            [
                DeleteStatus::Deleted,
                DeleteStatus::NotFound,
                DeleteStatus::Deleted
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_in_missing_container_is_not_found() {
        let store = MemoryBackend::new();
        assert!(!store.delete_blob("nowhere", "a").await.unwrap());

        let outcomes = store
            .delete_batch("nowhere", &["a".into(), "b".into()])
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|o| o.status == DeleteStatus::NotFound));
        assert!(store.containers.read().is_empty());
    }

    #[tokio::test]
    async fn test_sas_uri_round_trip() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryBackend::new().with_clock(clock.clone());
        store.ensure_container("temp").await.unwrap();
        store
            .put_blob("temp", "fox.jpg", body(b"fox"), 3, None)
            .await
            .unwrap();

        let uri = store
            .shared_access_uri(
                "temp",
                "fox.jpg",
                SasPermissions::READ_WRITE,
                clock.now() + Duration::minutes(10),
            )
            .await
            .unwrap();
        assert!(uri
            .as_str()
            .starts_with("http://127.0.0.1:10000/devstoreaccount1/temp/fox.jpg?"));
        assert_eq!(&store.get_with_shared_access(&uri).unwrap()[..], b"fox");

        clock.advance(Duration::minutes(10));
        assert!(store.get_with_shared_access(&uri).is_err());
    }

    #[tokio::test]
    async fn test_sas_requires_account_key() {
        let store = MemoryBackend::new().without_account_key();
        store.ensure_container("temp").await.unwrap();
        store
            .put_blob("temp", "a", body(b"abc"), 3, None)
            .await
            .unwrap();
        let err = store
            .shared_access_uri("temp", "a", SasPermissions::READ_WRITE, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_snapshot_id_format() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00.1234567Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(snapshot_id(at), "2024-05-01T12:00:00.1234567Z");
    }
}
