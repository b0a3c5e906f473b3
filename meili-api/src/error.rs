//! Errors returned by `MeiliClient`
//!
use snafu::prelude::*;

/// Errors returned by meili crate
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MeiliError {
    // Http connection or timeout error
    #[snafu(display("HTTP error {method} url:{url}"))]
    Http {
        method: String,
        url: String,
        source: reqwest::Error,
    },

    /// Meilisearch responded with an error status.
    /// `message` holds the response body, which for Meilisearch is a json object
    /// with `message`, `code`, `type` and `link` fields.
    #[snafu(display("Api Server reported error ({code}) {method} {url}: {message}"))]
    ApiError {
        code: u16,
        method: String,
        url: String,
        message: String,
    },

    /// The request was malformed or rejected by server-side validation (http 400).
    #[snafu(display("Validation error: {message}"))]
    Validation { message: String },

    /// Deserialization error. This means we didn't deserialize a server response correctly.
    #[snafu(display("Deserialization: {source}"))]
    Deserialization { source: serde_json::Error },

    /// Serialization error. unlikely to occur.
    #[snafu(display("Serialization: {source}"))]
    Serialization { source: serde_json::Error },

    /// A response body parsed as json but did not have the expected shape.
    #[snafu(display("Unexpected response format ({found}): {sample}"))]
    UnexpectedShape { found: String, sample: String },

    /// Requested resource was not found (http 404 or 410).
    /// `message` holds the response body when the server sent one.
    #[snafu(display("{kind} {key} not found: {message}"))]
    NotFound {
        kind: String,
        key: String,
        message: String,
    },

    /// Missing or invalid api key.
    #[snafu(display("Unauthorized: missing or invalid api key"))]
    Unauthorized,

    /// Key is valid, but does not grant the requested action.
    #[snafu(display("Permission denied: api key does not allow this action"))]
    Forbidden,

    /// Some other error occurred
    #[snafu(display("{message}"))]
    Other { message: String },
}

impl MeiliError {
    /// Text suitable for a log line: the server's response body for api errors,
    /// otherwise the display form.
    pub fn body_text(&self) -> String {
        match self {
            Self::ApiError { message, .. }
            | Self::Validation { message }
            | Self::NotFound { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
