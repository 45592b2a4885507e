//! Blob-scoped shared access signatures
//!
//! [`SasPermissions`] is shared by every backend. The Azure backend hands it to
//! the storage SDK for signing; the in-memory store issues and checks its own
//! tokens here. Those carry the usual `sv`, `st`, `se`, `sr`, `sp`, `spr` and
//! `sig` fields, with `sig` a keyed BLAKE3 MAC over:
//!
//! ```text
//! sp \n st \n se \n /blob/<account>/<container>/<blob> \n spr \n sv \n sr
//! ```

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::fmt;
use url::Url;

/// Signed version placed in every token
pub const SAS_VERSION: &str = "2022-11-02";

const KEY_CONTEXT: &str = "blobdemo 2024-05-01 shared access signature";

/// Per-account MAC key for locally issued tokens
#[derive(Clone)]
pub struct SigningKey {
    account: String,
    key: [u8; 32],
}

impl SigningKey {
    /// Derive a key for `account` from arbitrary secret material
    pub fn derive(account: impl Into<String>, secret: &[u8]) -> Self {
        SigningKey {
            account: account.into(),
            key: blake3::derive_key(KEY_CONTEXT, secret),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Hex MAC of `string_to_sign`
    pub fn sign(&self, string_to_sign: &str) -> String {
        blake3::keyed_hash(&self.key, string_to_sign.as_bytes())
            .to_hex()
            .to_string()
    }

    /// Constant-time check of a hex signature
    pub fn verify(&self, string_to_sign: &str, signature: &str) -> bool {
        match blake3::Hash::from_hex(signature) {
            Ok(presented) => presented == blake3::keyed_hash(&self.key, string_to_sign.as_bytes()),
            Err(_) => false,
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("account", &self.account)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// What a request against a SAS URI wants to do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SasAccess {
    Read,
    Write,
    Delete,
}

/// Blob SAS permissions, serialized in the service's canonical `racwd` order
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SasPermissions {
    pub read: bool,
    pub add: bool,
    pub create: bool,
    pub write: bool,
    pub delete: bool,
}

impl SasPermissions {
    pub const READ_WRITE: SasPermissions = SasPermissions {
        read: true,
        add: false,
        create: false,
        write: true,
        delete: false,
    };

    pub fn allows(&self, access: SasAccess) -> bool {
        match access {
            SasAccess::Read => self.read,
            SasAccess::Write => self.write || self.create,
            SasAccess::Delete => self.delete,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let mut perms = SasPermissions::default();
        for c in s.chars() {
            match c {
                'r' => perms.read = true,
                'a' => perms.add = true,
                'c' => perms.create = true,
                'w' => perms.write = true,
                'd' => perms.delete = true,
                other => {
                    return Err(Error::InvalidArgument(format!(
                        "unsupported SAS permission '{}'",
                        other
                    )))
                }
            }
        }
        Ok(perms)
    }
}

impl fmt::Display for SasPermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (set, c) in [
            (self.read, 'r'),
            (self.add, 'a'),
            (self.create, 'c'),
            (self.write, 'w'),
            (self.delete, 'd'),
        ] {
            if set {
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

/// A service SAS scoped to one blob
#[derive(Clone, Debug)]
pub struct BlobSas {
    pub container: String,
    pub blob: String,
    pub permissions: SasPermissions,
    pub start: Option<DateTime<Utc>>,
    pub expiry: DateTime<Utc>,
    pub https_only: bool,
}

impl BlobSas {
    pub fn new(
        container: impl Into<String>,
        blob: impl Into<String>,
        permissions: SasPermissions,
        expiry: DateTime<Utc>,
    ) -> Self {
        BlobSas {
            container: container.into(),
            blob: blob.into(),
            permissions,
            start: None,
            expiry,
            https_only: false,
        }
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn https_only(mut self, https_only: bool) -> Self {
        self.https_only = https_only;
        self
    }

    fn protocol(&self) -> &'static str {
        if self.https_only {
            "https"
        } else {
            "https,http"
        }
    }

    fn string_to_sign(&self, account: &str) -> String {
        let start = self.start.map(format_sas_time).unwrap_or_default();
        let resource = format!("/blob/{}/{}/{}", account, self.container, self.blob);
        [
            self.permissions.to_string(),
            start,
            format_sas_time(self.expiry),
            resource,
            self.protocol().to_string(),
            SAS_VERSION.to_string(),
            "b".to_string(),
        ]
        .join("\n")
    }

    /// The query string (without leading `?`)
    pub fn token(&self, key: &SigningKey) -> String {
        let signature = key.sign(&self.string_to_sign(key.account()));
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("sv", SAS_VERSION);
        if let Some(start) = self.start {
            query.append_pair("st", &format_sas_time(start));
        }
        query
            .append_pair("se", &format_sas_time(self.expiry))
            .append_pair("sr", "b")
            .append_pair("sp", &self.permissions.to_string())
            .append_pair("spr", self.protocol())
            .append_pair("sig", &signature);
        query.finish()
    }

    /// Append the token to an unsigned blob URL
    pub fn sign_url(&self, key: &SigningKey, blob_url: &Url) -> Url {
        let mut url = blob_url.clone();
        url.set_query(Some(&self.token(key)));
        url
    }
}

/// Check a presented blob SAS URI the way the service would
///
/// Rejections are reported as `403` service errors with the service's error codes.
pub fn verify_blob_sas(
    key: &SigningKey,
    url: &Url,
    container: &str,
    blob: &str,
    access: SasAccess,
    now: DateTime<Utc>,
) -> Result<()> {
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    let param = |name: &str| params.get(name).map(String::as_str).unwrap_or("");

    let forbidden = |code: &str, message: String| Error::Service {
        status: 403,
        code: Some(code.to_string()),
        message,
    };

    if param("sr") != "b" || param("sig").is_empty() {
        return Err(forbidden(
            "AuthenticationFailed",
            "SAS token is not a blob-scoped signature".into(),
        ));
    }

    let expiry = parse_sas_time(param("se"))
        .map_err(|_| forbidden("AuthenticationFailed", "invalid signed expiry".into()))?;
    let start = match param("st") {
        "" => None,
        st => Some(
            parse_sas_time(st)
                .map_err(|_| forbidden("AuthenticationFailed", "invalid signed start".into()))?,
        ),
    };
    let permissions = SasPermissions::parse(param("sp"))
        .map_err(|e| forbidden("AuthenticationFailed", e.to_string()))?;

    let candidate = BlobSas {
        container: container.to_string(),
        blob: blob.to_string(),
        permissions,
        start,
        expiry,
        https_only: param("spr") == "https",
    };
    let string_to_sign = candidate.string_to_sign(key.account());
    if param("sv") != SAS_VERSION || !key.verify(&string_to_sign, param("sig")) {
        return Err(forbidden(
            "AuthenticationFailed",
            "signature did not match".into(),
        ));
    }

    if now >= expiry {
        return Err(forbidden(
            "AuthenticationFailed",
            format!("signed expiry time {} has passed", format_sas_time(expiry)),
        ));
    }
    if let Some(start) = start {
        if now < start {
            return Err(forbidden(
                "AuthenticationFailed",
                "signed start time is in the future".into(),
            ));
        }
    }
    if !permissions.allows(access) {
        return Err(forbidden(
            "AuthorizationPermissionMismatch",
            format!("SAS does not grant {:?} access", access),
        ));
    }
    Ok(())
}

/// ISO 8601 UTC with whole seconds, as SAS fields require
pub fn format_sas_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_sas_time(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}
