//! Error types for blobdemo

use thiserror::Error;

/// Result type alias for blobdemo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in blobdemo operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Service error ({status}{}): {message}", .code.as_deref().map(|c| format!(", {}", c)).unwrap_or_default())]
    Service {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error means the addressed container or blob does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Error::Serialization(format!("blob content is not valid UTF-8: {}", e))
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::InvalidArgument(format!("invalid URL: {}", e))
    }
}

#[cfg(feature = "azure")]
impl Error {
    /// Map a storage SDK failure, naming `resource` in not-found and conflict errors
    pub(crate) fn from_storage(e: azure_core::Error, resource: &str) -> Self {
        use azure_core::error::ErrorKind;

        match e.kind() {
            ErrorKind::HttpResponse { status, error_code } => {
                let code = error_code.clone();
                match u16::from(*status) {
                    404 => Error::NotFound(match code {
                        Some(code) => format!("{} ({})", resource, code),
                        None => resource.to_string(),
                    }),
                    409 if code.as_deref().is_some_and(|c| c.ends_with("AlreadyExists")) => {
                        Error::AlreadyExists(resource.to_string())
                    }
                    other => Error::Service {
                        status: other,
                        message: e
                            .as_http_error()
                            .and_then(|http| http.error_message())
                            .and_then(|m| m.lines().next())
                            .unwrap_or(status.canonical_reason())
                            .to_string(),
                        code,
                    },
                }
            }
            ErrorKind::Credential => Error::Config(e.to_string()),
            ErrorKind::DataConversion => Error::Serialization(e.to_string()),
            _ => Error::Transport(e.to_string()),
        }
    }
}

#[cfg(feature = "azure")]
impl From<azure_core::Error> for Error {
    fn from(e: azure_core::Error) -> Self {
        Error::from_storage(e, "resource")
    }
}

#[cfg(feature = "azure")]
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}
