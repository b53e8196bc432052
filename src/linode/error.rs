//! Error types for the Linode REST client.

use thiserror::Error;

/// Errors raised by [`super::LinodeClient`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LinodeError {
    /// Raised when the client is built without a token.
    #[error("Linode personal access token is empty")]
    MissingToken,
    /// Raised when the request could not be sent or the response body could
    /// not be read.
    #[error("{method} {path} failed: {message}")]
    Http {
        /// HTTP method.
        method: &'static str,
        /// Request path relative to the API base.
        path: String,
        /// Transport error message.
        message: String,
    },
    /// Raised when the API answers with a non-success status.
    #[error("{method} {path} returned {status}: {joined}", joined = .reasons.join("; "))]
    Api {
        /// HTTP method.
        method: &'static str,
        /// Request path relative to the API base.
        path: String,
        /// HTTP status code.
        status: u16,
        /// Reasons reported in the `errors` array, prefixed by the offending
        /// field when the API names one.
        reasons: Vec<String>,
    },
    /// Raised when a success response does not match the expected schema.
    #[error("failed to decode {path} response: {message}")]
    Decode {
        /// Request path relative to the API base.
        path: String,
        /// Parser error message.
        message: String,
    },
}
