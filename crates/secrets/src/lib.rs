#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Gantry Secrets
//!
//! Secret material and the two places it is minted:
//!
//! - [`SecureString`]: a string that never renders its contents
//! - [`generate_password`]: random passwords with guaranteed character
//!   classes
//! - [`SignedWindow`] / [`sign_blob_url`]: HMAC-SHA256 signed, time-limited
//!   blob download URLs
//!
//! Nothing here logs, serializes or displays secret bytes; redaction is the
//! default and exposure is an explicit, greppable call.

pub mod error;
pub mod password;
pub mod sas;
pub mod secure;

pub use error::SecretsError;
pub use password::{MIN_PASSWORD_LENGTH, generate_password};
pub use sas::{BLOB_SERVICE_DOMAIN, ContentHeaders, SAS_VERSION, SignedWindow, sign_blob_url};
pub use secure::SecureString;
