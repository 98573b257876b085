//! Failures while minting or signing secret material.

use chrono::{DateTime, Utc};

/// Why a secret could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    /// The requested password cannot hold one character of every class.
    #[error("password length {requested} is below the minimum of {minimum}")]
    PasswordTooShort {
        /// The requested length.
        requested: usize,
        /// The smallest allowed length.
        minimum: usize,
    },
    /// The storage account key was not valid base64.
    #[error("storage account key is not valid base64")]
    InvalidAccountKey(#[from] base64::DecodeError),
    /// The signing window does not contain any instant.
    #[error("signing window is empty: start {start} is not before end {end}")]
    EmptyWindow {
        /// Inclusive start of the rejected window.
        start: DateTime<Utc>,
        /// Exclusive end of the rejected window.
        end: DateTime<Utc>,
    },
    /// The HMAC signer rejected the decoded key.
    #[error("failed to initialise the URL signer")]
    Signer,
}
