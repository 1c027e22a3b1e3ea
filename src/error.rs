use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the NHGIS client and the archive readers.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied argument cannot be used as given.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A local resource (directory, archive entry, metadata endpoint) does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The API has no extract with this number in this collection.
    #[error(
        "There is no IPUMS extract number {id} in collection {collection}. \
         Submit the extract before trying to download it."
    )]
    ExtractNotFound { id: u64, collection: String },

    /// The extract failed to process on the server.
    #[error(
        "IPUMS {collection} extract number {id} failed to complete. \
         Resubmit the extract; if the problem persists, contact ipums@umn.edu."
    )]
    ExtractFailure { id: u64, collection: String },

    /// The extract is still processing, or its files have expired.
    #[error("{0}")]
    ExtractNotReady(String),

    /// Metadata pagination went past the configured page limit.
    #[error("metadata listing did not finish within {limit} page(s)")]
    PageLimitExceeded { limit: usize },

    /// The API answered with a non-success status.
    #[error("{message}")]
    Api { status: StatusCode, message: String },

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("shapefile error: {0}")]
    Shapefile(#[from] shapefile::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// HTTP status of an [`Error::Api`] or [`Error::Http`] failure, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Api { status, .. } => Some(*status),
            Error::Http(e) => e.status(),
            _ => None,
        }
    }
}

#[derive(Debug, Default, serde::Deserialize)]
pub(crate) struct IpumsErrorResponse {
    #[serde(default, rename = "type")]
    pub(crate) kind: Option<String>,
    // Either {"code": 400, "name": "Bad Request"} or a bare number.
    #[serde(default)]
    pub(crate) status: Option<Value>,
    // A string, or a list of validation messages.
    #[serde(default)]
    pub(crate) detail: Option<Value>,
    #[serde(default)]
    pub(crate) error: Option<String>,
}

impl IpumsErrorResponse {
    fn detail_lines(&self) -> String {
        match &self.detail {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => format!("- {}", s),
                    other => format!("- {}", other),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Some(other) => other.to_string(),
            None => self.error.clone().unwrap_or_default(),
        }
    }

    fn status_name(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

pub(crate) fn format_ipums_error(status: StatusCode, url: &str, e: &IpumsErrorResponse) -> Error {
    let detail = e.detail_lines();
    let kind = e.kind.as_deref().unwrap_or("");

    let message = if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        format!(
            "IPUMS API authentication failed (HTTP {}).\n- Check that IPUMS_API_KEY (or `key:` in .ipumsrc) holds a current API key from https://account.ipums.org/api_keys\n- Make sure your IPUMS account is registered for NHGIS\n\nServer message: {} {}\n{}\nrequest: {}",
            status.as_u16(),
            kind,
            e.status_name(),
            detail,
            url
        )
    } else if status == StatusCode::NOT_FOUND {
        format!(
            "IPUMS API resource not found (HTTP 404).\n- Check the extract number, dataset or table name\n- Check the configured base URL (default https://api.ipums.org)\n\nServer message: {}\nrequest: {}",
            detail, url
        )
    } else if status == StatusCode::BAD_REQUEST {
        format!(
            "IPUMS API rejected the request (HTTP 400) for url ({}).\nThe server reported:\n{}",
            url, detail
        )
    } else {
        format!(
            "API request failed: HTTP {} for url ({})\n{} {}\n{}",
            status.as_u16(),
            url,
            kind,
            e.status_name(),
            detail
        )
    };

    Error::Api { status, message }
}
