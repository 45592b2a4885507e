//! Azure Blob Storage through the `azure_storage_blobs` SDK
//!
//! Requests go through the SDK's pipeline (Shared Key or SAS-token
//! authorization, retries) over a `reqwest` client carrying the configured
//! timeout. Works against Azure and Azurite.

mod connection;

pub use connection::{ConnectionString, Credential};

use super::{BlobBackend, ByteStream, ListPage};
use crate::model::{
    AccessTier, BlobProperties, BlobSummary, DeleteOutcome, DeleteStatus, Metadata, Snapshot,
};
use crate::sas::SasPermissions;
use crate::{Error, Result};
use async_trait::async_trait;
use azure_core::request_options::Metadata as RequestMetadata;
use azure_core::{HttpClient, TransportOptions};
use azure_storage::prelude::{BlobSasPermissions, SasProtocol};
use azure_storage::CloudLocation;
use azure_storage_blobs::prelude::{
    AccessTier as SdkAccessTier, Blob, BlobClient, BlobServiceClient, ClientBuilder,
    ContainerClient, DeleteSnapshotsMethod,
};
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use url::Url;

/// Deletes kept in flight at once by [`AzureBackend::delete_batch`]
const MAX_CONCURRENT_DELETES: usize = 16;

/// Client for one storage account's blob endpoint
pub struct AzureBackend {
    service: BlobServiceClient,
    endpoint: Url,
    account: String,
    can_sign: bool,
}

impl AzureBackend {
    pub fn new(connection: ConnectionString, timeout: Duration) -> Result<Self> {
        let http: Arc<dyn HttpClient> =
            Arc::new(reqwest::Client::builder().timeout(timeout).build()?);
        let location = CloudLocation::Custom {
            account: connection.account.clone(),
            uri: connection
                .blob_endpoint
                .as_str()
                .trim_end_matches('/')
                .to_string(),
        };
        let credentials = connection.credential.storage_credentials(&connection.account)?;
        let service = ClientBuilder::with_location(location, credentials)
            .transport(TransportOptions::new(http))
            .blob_service_client();

        Ok(AzureBackend {
            service,
            endpoint: connection.blob_endpoint,
            account: connection.account,
            can_sign: connection.credential.can_sign(),
        })
    }

    /// Parse `connection_string` and build a client with the given request timeout
    pub fn from_connection_string(connection_string: &str, timeout: Duration) -> Result<Self> {
        Self::new(ConnectionString::parse(connection_string)?, timeout)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    fn container(&self, container: &str) -> ContainerClient {
        self.service.container_client(container)
    }

    fn blob(&self, container: &str, name: &str) -> BlobClient {
        self.container(container).blob_client(name)
    }
}

#[async_trait]
impl BlobBackend for AzureBackend {
    fn kind(&self) -> &str {
        "azure"
    }

    async fn ensure_container(&self, container: &str) -> Result<bool> {
        match self.container(container).create().await {
            Ok(()) => Ok(true),
            Err(e) => match Error::from_storage(e, &container_resource(container)) {
                Error::AlreadyExists(_) => Ok(false),
                e => Err(e),
            },
        }
    }

    // The SDK wants a body it can replay on retry, so the upload is buffered.
    async fn put_blob(
        &self,
        container: &str,
        name: &str,
        body: ByteStream,
        length: u64,
        content_type: Option<&str>,
    ) -> Result<()> {
        let data = body
            .try_fold(BytesMut::new(), |mut buf, chunk| async move {
                buf.extend_from_slice(&chunk);
                Ok(buf)
            })
            .await?;
        if data.len() as u64 != length {
            return Err(Error::InvalidArgument(format!(
                "declared length {} but body has {} bytes",
                length,
                data.len()
            )));
        }

        let mut request = self.blob(container, name).put_block_blob(data.freeze());
        if let Some(content_type) = content_type {
            request = request.content_type(content_type.to_string());
        }
        tracing::debug!(container, name, length, "put block blob");
        request
            .await
            .map_err(|e| Error::from_storage(e, &blob_resource(container, name)))?;
        Ok(())
    }

    async fn get_blob(&self, container: &str, name: &str) -> Result<ByteStream> {
        let resource = blob_resource(container, name);
        let mut ranges = self.blob(container, name).get().into_stream();

        // The first range is awaited here so a missing blob fails the call itself.
        let first = match ranges.next().await {
            Some(response) => response.map_err(|e| Error::from_storage(e, &resource))?,
            None => return Err(Error::NotFound(resource)),
        };
        let rest = ranges
            .map_err(Error::from)
            .map_ok(|response| response.data.map_err(Error::from))
            .try_flatten();
        Ok(first.data.map_err(Error::from).chain(rest).boxed())
    }

    async fn list_page(&self, container: &str, marker: Option<&str>) -> Result<ListPage> {
        let resource = container_resource(container);
        let mut request = self.container(container).list_blobs();
        if let Some(marker) = marker {
            request = request.marker(marker.to_string());
        }
        let page = request
            .into_stream()
            .next()
            .await
            .ok_or_else(|| Error::NotFound(resource.clone()))?
            .map_err(|e| Error::from_storage(e, &resource))?;

        Ok(ListPage {
            items: page.blobs.blobs().map(summary_from).collect(),
            next_marker: page.next_marker.map(|m| m.as_str().to_string()),
        })
    }

    async fn properties(&self, container: &str, name: &str) -> Result<BlobProperties> {
        let response = self
            .blob(container, name)
            .get_properties()
            .await
            .map_err(|e| Error::from_storage(e, &blob_resource(container, name)))?;
        let blob = response.blob;

        Ok(BlobProperties {
            name: name.to_string(),
            last_modified: to_chrono(blob.properties.last_modified),
            access_tier: tier_from(blob.properties.access_tier.as_ref()),
            size: blob.properties.content_length,
            content_type: Some(blob.properties.content_type.clone())
                .filter(|ct| !ct.is_empty()),
            etag: Some(blob.properties.etag.to_string()),
            metadata: blob.metadata.unwrap_or_default().into_iter().collect(),
        })
    }

    async fn set_tier(&self, container: &str, name: &str, tier: AccessTier) -> Result<()> {
        self.blob(container, name)
            .set_blob_tier(sdk_tier(tier))
            .await
            .map_err(|e| Error::from_storage(e, &blob_resource(container, name)))?;
        Ok(())
    }

    async fn set_metadata(&self, container: &str, name: &str, metadata: &Metadata) -> Result<()> {
        let mut request_metadata = RequestMetadata::new();
        for (key, value) in metadata {
            request_metadata.insert(key.clone(), value.clone());
        }
        self.blob(container, name)
            .set_metadata()
            .metadata(request_metadata)
            .await
            .map_err(|e| Error::from_storage(e, &blob_resource(container, name)))?;
        Ok(())
    }

    // Missing blob and missing container both report `false`.
    async fn delete_blob(&self, container: &str, name: &str) -> Result<bool> {
        let result = self
            .blob(container, name)
            .delete()
            .delete_snapshots_method(DeleteSnapshotsMethod::Include)
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(e) => match Error::from_storage(e, &blob_resource(container, name)) {
                Error::NotFound(_) => Ok(false),
                e => Err(e),
            },
        }
    }

    async fn delete_batch(&self, container: &str, names: &[String]) -> Result<Vec<DeleteOutcome>> {
        let deletes: Vec<_> = names
            .iter()
            .map(|name| async move {
                let status = match self.delete_blob(container, name).await {
                    Ok(true) => DeleteStatus::Deleted,
                    Ok(false) => DeleteStatus::NotFound,
                    Err(e) => DeleteStatus::Failed(e.to_string()),
                };
                DeleteOutcome::new(name.clone(), status)
            })
            .collect();
        let outcomes: Vec<DeleteOutcome> = stream::iter(deletes)
            .buffered(MAX_CONCURRENT_DELETES)
            .collect()
            .await;
        Ok(outcomes)
    }

    async fn snapshot(&self, container: &str, name: &str) -> Result<Snapshot> {
        let response = self
            .blob(container, name)
            .snapshot()
            .await
            .map_err(|e| Error::from_storage(e, &blob_resource(container, name)))?;
        // Snapshot ids are opaque; serde is the only public way to read one back.
        let id: String = serde_json::from_value(serde_json::to_value(&response.snapshot)?)?;
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
        if !self.can_sign {
            return Err(Error::InvalidArgument(
                "cannot generate a shared access URI without an account key".into(),
            ));
        }
        let blob = self.blob(container, name);
        let protocol = if self.endpoint.scheme() == "https" {
            SasProtocol::Https
        } else {
            SasProtocol::HttpHttps
        };
        let sas = blob
            .shared_access_signature(sdk_permissions(permissions), to_offset(expiry)?)
            .await?
            .protocol(protocol);
        Ok(blob.generate_signed_blob_url(&sas)?)
    }
}

fn container_resource(container: &str) -> String {
    format!("container '{}'", container)
}

fn blob_resource(container: &str, name: &str) -> String {
    format!("blob '{}' in container '{}'", name, container)
}

fn summary_from(blob: &Blob) -> BlobSummary {
    BlobSummary {
        name: blob.name.clone(),
        last_modified: to_chrono(blob.properties.last_modified),
        access_tier: tier_from(blob.properties.access_tier.as_ref()),
        size: blob.properties.content_length,
    }
}

fn tier_from(tier: Option<&SdkAccessTier>) -> Option<AccessTier> {
    tier.map(|t| match t {
        SdkAccessTier::Hot => AccessTier::Hot,
        SdkAccessTier::Cool => AccessTier::Cool,
        SdkAccessTier::Cold => AccessTier::Cold,
        SdkAccessTier::Archive => AccessTier::Archive,
    })
}

fn sdk_tier(tier: AccessTier) -> SdkAccessTier {
    match tier {
        AccessTier::Hot => SdkAccessTier::Hot,
        AccessTier::Cool => SdkAccessTier::Cool,
        AccessTier::Cold => SdkAccessTier::Cold,
        AccessTier::Archive => SdkAccessTier::Archive,
    }
}

fn sdk_permissions(permissions: SasPermissions) -> BlobSasPermissions {
    BlobSasPermissions {
        read: permissions.read,
        add: permissions.add,
        create: permissions.create,
        write: permissions.write,
        delete: permissions.delete,
        ..Default::default()
    }
}

fn to_chrono(t: OffsetDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(t.unix_timestamp(), t.nanosecond()).unwrap_or_default()
}

fn to_offset(t: DateTime<Utc>) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(t.timestamp())
        .map_err(|e| Error::InvalidArgument(format!("expiry {} is out of range: {}", t, e)))
}
