//! Storage connection strings
//!
//! Parsing is done by `azure_storage`, so keys use the standard spelling:
//! `DefaultEndpointsProtocol`, `AccountName`, `AccountKey`, `EndpointSuffix`,
//! `BlobEndpoint`, `SharedAccessSignature`, `UseDevelopmentStorage`,
//! `DevelopmentStorageProxyUri`. This module resolves the blob endpoint and the
//! credential the backend connects with.

use crate::{Error, Result};
use azure_core::auth::Secret;
use azure_storage::clients::{EMULATOR_ACCOUNT, EMULATOR_ACCOUNT_KEY};
use azure_storage::{EndpointProtocol, StorageCredentials};
use std::fmt;
use std::str::FromStr;
use url::Url;

const DEVELOPMENT_STORAGE_HOST: &str = "http://127.0.0.1:10000";
const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

/// How requests are authorized
#[derive(Clone)]
pub enum Credential {
    /// Shared Key signing with the base64 account key; can also sign SAS URIs
    AccessKey(String),
    /// A pre-issued SAS token appended to every request
    SasToken(String),
    /// Unauthenticated access to public containers
    Anonymous,
}

impl Credential {
    pub fn can_sign(&self) -> bool {
        matches!(self, Credential::AccessKey(_))
    }

    pub(crate) fn storage_credentials(&self, account: &str) -> Result<StorageCredentials> {
        match self {
            Credential::AccessKey(key) => Ok(StorageCredentials::access_key(
                account,
                Secret::new(key.clone()),
            )),
            Credential::SasToken(token) => StorageCredentials::sas_token(token).map_err(|e| {
                Error::Config(format!("SharedAccessSignature is not a valid token: {}", e))
            }),
            Credential::Anonymous => Ok(StorageCredentials::anonymous()),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::AccessKey(_) => f.write_str("AccessKey(<redacted>)"),
            Credential::SasToken(_) => f.write_str("SasToken(<redacted>)"),
            Credential::Anonymous => f.write_str("Anonymous"),
        }
    }
}

/// A resolved storage connection string
#[derive(Clone, Debug)]
pub struct ConnectionString {
    pub account: String,
    pub blob_endpoint: Url,
    pub credential: Credential,
}

impl ConnectionString {
    pub fn parse(s: &str) -> Result<Self> {
        let parsed = azure_storage::ConnectionString::new(s).map_err(|e| {
            // the parser echoes the whole string, secrets included
            Error::Config(format!(
                "invalid connection string: {}",
                e.to_string().replace(s, "<redacted>")
            ))
        })?;

        if parsed.use_development_storage == Some(true) {
            let host = parsed
                .development_storage_proxy_uri
                .unwrap_or(DEVELOPMENT_STORAGE_HOST)
                .trim_end_matches('/');
            return Ok(ConnectionString {
                account: EMULATOR_ACCOUNT.to_string(),
                blob_endpoint: endpoint_url(&format!("{}/{}", host, EMULATOR_ACCOUNT))?,
                credential: Credential::AccessKey(EMULATOR_ACCOUNT_KEY.to_string()),
            });
        }

        let blob_endpoint = match (parsed.blob_endpoint, parsed.account_name) {
            (Some(endpoint), _) => endpoint_url(endpoint.trim_end_matches('/'))?,
            (None, Some(account)) => {
                let protocol = parsed
                    .default_endpoints_protocol
                    .unwrap_or(EndpointProtocol::Https);
                let suffix = parsed.endpoint_suffix.unwrap_or(DEFAULT_ENDPOINT_SUFFIX);
                endpoint_url(&format!("{}://{}.blob.{}", protocol, account, suffix))?
            }
            (None, None) => {
                return Err(Error::Config(
                    "connection string needs AccountName or BlobEndpoint".into(),
                ))
            }
        };

        let account = match parsed.account_name {
            Some(account) => account.to_string(),
            None => blob_endpoint
                .host_str()
                .and_then(|h| h.split('.').next())
                .unwrap_or_default()
                .to_string(),
        };

        let credential = match (parsed.account_key, parsed.sas) {
            (Some(key), _) => Credential::AccessKey(key.to_string()),
            (None, Some(sas)) => Credential::SasToken(sas.trim_start_matches('?').to_string()),
            (None, None) => Credential::Anonymous,
        };

        Ok(ConnectionString {
            account,
            blob_endpoint,
            credential,
        })
    }
}

impl FromStr for ConnectionString {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ConnectionString::parse(s)
    }
}

fn endpoint_url(s: &str) -> Result<Url> {
    Url::parse(s).map_err(|e| Error::Config(format!("blob endpoint '{}' is not a URL: {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "c2VjcmV0LWtleS1ieXRlcw==";

    #[test]
    fn test_parse_account_key_form() {
        let cs = ConnectionString::parse(&format!(
            "DefaultEndpointsProtocol=https;AccountName=demo;AccountKey={};EndpointSuffix=core.windows.net",
            KEY
        ))
        .unwrap();
        assert_eq!(cs.account, "demo");
        assert_eq!(cs.blob_endpoint.as_str(), "https://demo.blob.core.windows.net/");
        assert!(cs.credential.can_sign());
    }

    #[test]
    fn test_parse_development_storage() {
        let cs = ConnectionString::parse("UseDevelopmentStorage=true").unwrap();
        assert_eq!(cs.account, "devstoreaccount1");
        assert_eq!(
            cs.blob_endpoint.as_str(),
            "http://127.0.0.1:10000/devstoreaccount1"
        );
        assert!(cs.credential.can_sign());
    }

    #[test]
    fn test_development_storage_proxy() {
        let cs = ConnectionString::parse(
            "UseDevelopmentStorage=true;DevelopmentStorageProxyUri=http://azurite:10000/",
        )
        .unwrap();
        assert_eq!(
            cs.blob_endpoint.as_str(),
            "http://azurite:10000/devstoreaccount1"
        );
    }

    #[test]
    fn test_parse_blob_endpoint_with_sas() {
        let cs = ConnectionString::parse(
            "BlobEndpoint=https://demo.blob.core.windows.net/;SharedAccessSignature=?sv=2022-11-02&sig=abc%3D",
        )
        .unwrap();
        assert_eq!(cs.account, "demo");
        match &cs.credential {
            Credential::SasToken(token) => assert_eq!(token, "sv=2022-11-02&sig=abc%3D"),
            other => panic!("unexpected credential {:?}", other),
        }
        assert!(!cs.credential.can_sign());
        assert!(cs.credential.storage_credentials(&cs.account).is_ok());
    }

    #[test]
    fn test_key_with_padding_survives_split() {
        let cs = ConnectionString::parse(&format!("AccountName=demo;AccountKey={}", KEY)).unwrap();
        match cs.credential {
            Credential::AccessKey(key) => assert_eq!(key, KEY),
            other => panic!("unexpected credential {:?}", other),
        }
    }

    #[test]
    fn test_missing_account_is_config_error() {
        let err = ConnectionString::parse(&format!("AccountKey={}", KEY)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = ConnectionString::parse("AccountName=demo;Colour=blue").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_malformed_segment_is_redacted() {
        let err = ConnectionString::parse(&format!("AccountName=demo;AccountKey={};Broken", KEY))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(!err.to_string().contains(KEY));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let cs = ConnectionString::parse(
            "BlobEndpoint=https://demo.blob.core.windows.net;SharedAccessSignature=sig=topsecret",
        )
        .unwrap();
        assert!(!format!("{:?}", cs).contains("topsecret"));

        let cs = ConnectionString::parse(&format!("AccountName=demo;AccountKey={}", KEY)).unwrap();
        assert!(!format!("{:?}", cs).contains(KEY));
    }
}
