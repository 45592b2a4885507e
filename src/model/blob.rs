//! Blob-level types shared by every backend

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// User-defined key/value metadata attached to a blob
pub type Metadata = BTreeMap<String, String>;

/// Storage class of a blob
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessTier {
    Hot,
    Cool,
    Cold,
    Archive,
}

impl AccessTier {
    /// The spelling the service uses on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessTier::Hot => "Hot",
            AccessTier::Cool => "Cool",
            AccessTier::Cold => "Cold",
            AccessTier::Archive => "Archive",
        }
    }
}

impl fmt::Display for AccessTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hot" => Ok(AccessTier::Hot),
            "cool" => Ok(AccessTier::Cool),
            "cold" => Ok(AccessTier::Cold),
            "archive" => Ok(AccessTier::Archive),
            other => Err(Error::InvalidArgument(format!(
                "unknown access tier '{}' (expected hot, cool, cold or archive)",
                other
            ))),
        }
    }
}

/// One row of a container listing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlobSummary {
    pub name: String,
    pub last_modified: DateTime<Utc>,
    /// Absent for blob types that carry no tier (page/append blobs, premium accounts)
    pub access_tier: Option<AccessTier>,
    /// Content length in bytes
    pub size: u64,
}

impl BlobSummary {
    /// Size in KiB, as shown in listings
    pub fn size_kib(&self) -> f64 {
        self.size as f64 / 1024.0
    }
}

/// Full properties of a single blob
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlobProperties {
    pub name: String,
    pub last_modified: DateTime<Utc>,
    pub access_tier: Option<AccessTier>,
    pub size: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub metadata: Metadata,
}

impl BlobProperties {
    pub fn summary(&self) -> BlobSummary {
        BlobSummary {
            name: self.name.clone(),
            last_modified: self.last_modified,
            access_tier: self.access_tier,
            size: self.size,
        }
    }
}

/// A point-in-time copy of a blob
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub blob: String,
    /// Opaque identifier assigned by the store (a timestamp on Azure)
    pub id: String,
}

/// Result of deleting one blob as part of a batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DeleteStatus {
    Deleted,
    NotFound,
    Failed(String),
}

/// Per-item outcome of a batch delete
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub name: String,
    #[serde(flatten)]
    pub status: DeleteStatus,
}

impl DeleteOutcome {
    pub fn new(name: impl Into<String>, status: DeleteStatus) -> Self {
        DeleteOutcome {
            name: name.into(),
            status,
        }
    }

    /// Deleted or already absent
    pub fn is_success(&self) -> bool {
        !matches!(self.status, DeleteStatus::Failed(_))
    }
}

/// Check a container name against the service naming rules
///
/// 3-63 characters, lowercase letters, digits and hyphens; must start and end
/// with a letter or digit; no consecutive hyphens.
pub fn validate_container_name(name: &str) -> Result<()> {
    let invalid = |why: &str| {
        Err(Error::InvalidArgument(format!(
            "invalid container name '{}': {}",
            name, why
        )))
    };

    if name.len() < 3 || name.len() > 63 {
        return invalid("must be 3-63 characters long");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return invalid("only lowercase letters, digits and '-' are allowed");
    }
    if name.starts_with('-') || name.ends_with('-') {
        return invalid("must start and end with a letter or digit");
    }
    if name.contains("--") {
        return invalid("consecutive hyphens are not allowed");
    }
    Ok(())
}

/// Check a blob name: 1-1024 characters, no trailing dot or slash
pub fn validate_blob_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().count() > 1024 {
        return Err(Error::InvalidArgument(format!(
            "invalid blob name '{}': must be 1-1024 characters long",
            name
        )));
    }
    if name.ends_with('.') || name.ends_with('/') || name.ends_with('\\') {
        return Err(Error::InvalidArgument(format!(
            "invalid blob name '{}': cannot end with '.', '/' or '\\'",
            name
        )));
    }
    Ok(())
}

/// Metadata keys travel as `x-ms-meta-<key>` headers, so they must be C# style identifiers
pub fn validate_metadata(metadata: &Metadata) -> Result<()> {
    for key in metadata.keys() {
        let mut chars = key.chars();
        let valid_start = chars
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false);
        if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::InvalidArgument(format!(
                "invalid metadata key '{}': must be a valid identifier",
                key
            )));
        }
    }
    for (key, value) in metadata {
        if !value.is_ascii() || value.contains(['\r', '\n']) {
            return Err(Error::InvalidArgument(format!(
                "invalid metadata value for '{}': must be single-line ASCII",
                key
            )));
        }
    }
    Ok(())
}
