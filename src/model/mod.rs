//! Core data model

mod blob;
mod catalog;

pub use blob::{
    validate_blob_name, validate_container_name, validate_metadata, AccessTier, BlobProperties,
    BlobSummary, DeleteOutcome, DeleteStatus, Metadata, Snapshot,
};
pub use catalog::{Catalog, Category, Product};
