//! Storage backends behind the [`BlobService`](crate::BlobService) facade

mod traits;

pub mod memory;

#[cfg(feature = "azure")]
pub mod azure;

pub use traits::{BlobBackend, ByteStream, ListPage};

pub use memory::MemoryBackend;

#[cfg(feature = "azure")]
pub use azure::{AzureBackend, ConnectionString, Credential};
