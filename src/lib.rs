//! # blobdemo
//!
//! A small facade over a cloud blob store, plus the demo program that drives it.
//!
//! ## Core Concepts
//!
//! - **Containers**: named groups of blobs, created on first use
//! - **Blobs**: named byte objects with a tier, metadata and snapshots
//! - **Shared access URIs**: signed, time-limited links to a single blob
//! - **Typed objects**: values stored as JSON blobs and read back with serde
//!
//! Storage is reached through the [`BlobBackend`] trait. [`AzureBackend`] talks to
//! Azure Blob Storage (or Azurite); [`MemoryBackend`] keeps everything in process.
//!
//! ## Example
//!
//! ```ignore
//! use blobdemo::{BlobService, MemoryBackend};
//!
//! let service = BlobService::new(MemoryBackend::new());
//! let temp = service.get_or_create_container("temp").await?;
//! service.upload_file(&temp, "bear.jpg").await?;
//! for blob in service.collect_blobs(&temp).await? {
//!     println!("{} {}", blob.name, blob.size);
//! }
//! ```

pub mod backend;
pub mod clock;
pub mod config;
pub mod model;
pub mod report;
pub mod sas;

mod error;
mod service;

#[cfg(feature = "azure")]
pub use backend::{AzureBackend, ConnectionString, Credential};
pub use backend::{BlobBackend, ByteStream, ListPage, MemoryBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use model::{
    AccessTier, BlobProperties, BlobSummary, Catalog, Category, DeleteOutcome, DeleteStatus,
    Metadata, Product, Snapshot,
};
pub use sas::{SasAccess, SasPermissions};
pub use service::{BlobService, Container, DEFAULT_DOWNLOAD_DIR, DEFAULT_SAS_TTL};
