//! Time-limited signed blob URLs.
//!
//! Implements the blob service shared-access-signature scheme: an
//! HMAC-SHA256 over a fixed sixteen-field layout, keyed with the storage
//! account key, rendered as a query string appended to the blob URL. The
//! signature is container-scoped, so one token covers every blob in the
//! container while the URL itself names one blob.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, KeyInit, Mac};
use sha2::Sha256;
use url::form_urlencoded;

use crate::error::SecretsError;
use crate::secure::SecureString;

/// The service version every signature is issued against.
pub const SAS_VERSION: &str = "2022-11-02";

/// Host suffix of blob endpoints.
pub const BLOB_SERVICE_DOMAIN: &str = "blob.core.windows.net";

type HmacSha256 = Hmac<Sha256>;

/// The validity window of a signature: `[start, end)`.
///
/// The start instant is valid, the end instant is not, so back-to-back
/// windows cover every instant exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl SignedWindow {
    /// A window from `start` (inclusive) to `end` (exclusive).
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, SecretsError> {
        if start >= end {
            return Err(SecretsError::EmptyWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// A window opening at `start` and lasting `validity`.
    pub fn from_start(start: DateTime<Utc>, validity: Duration) -> Result<Self, SecretsError> {
        Self::new(start, start + validity)
    }

    /// Inclusive start.
    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Exclusive end.
    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Whether `instant` falls inside the window.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// Response-header overrides baked into the signature.
///
/// The service returns these headers on every read through the signed URL.
/// Empty fields are left out of the query string but still occupy their line
/// in the signed layout, so presence and value are both signature-relevant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentHeaders {
    /// `Cache-Control` returned with the blob.
    pub cache_control: String,
    /// `Content-Disposition` returned with the blob.
    pub content_disposition: String,
    /// `Content-Encoding` returned with the blob.
    pub content_encoding: String,
    /// `Content-Type` returned with the blob.
    pub content_type: String,
}

/// Builds a read-only signed URL for one blob.
///
/// The result is `https://{account}.blob.core.windows.net/{container}/{blob}`
/// followed by the signature token. The token grants read on the whole
/// container for the window, nothing else. The same inputs always produce
/// the same URL; any changed input changes the signature.
///
/// The URL grants access to whoever holds it. Treat the result as secret.
pub fn sign_blob_url(
    account: &str,
    account_key: &SecureString,
    container: &str,
    blob_name: &str,
    window: &SignedWindow,
    headers: &ContentHeaders,
) -> Result<String, SecretsError> {
    let key = B64.decode(account_key.expose())?;
    let start = format_instant(window.start());
    let expiry = format_instant(window.end());

    let to_sign = string_to_sign(account, container, &start, &expiry, headers);
    let mut mac = HmacSha256::new_from_slice(&key).map_err(|_| SecretsError::Signer)?;
    mac.update(to_sign.as_bytes());
    let signature = B64.encode(mac.finalize().into_bytes());

    let mut token = form_urlencoded::Serializer::new(String::new());
    token
        .append_pair("sv", SAS_VERSION)
        .append_pair("spr", "https")
        .append_pair("st", &start)
        .append_pair("se", &expiry)
        .append_pair("sr", "c")
        .append_pair("sp", "r");
    for (name, value) in [
        ("rscc", &headers.cache_control),
        ("rscd", &headers.content_disposition),
        ("rsce", &headers.content_encoding),
        ("rsct", &headers.content_type),
    ] {
        if !value.is_empty() {
            token.append_pair(name, value);
        }
    }
    let token = token.append_pair("sig", &signature).finish();

    Ok(format!(
        "https://{account}.{BLOB_SERVICE_DOMAIN}/{container}/{blob_name}?{token}"
    ))
}

/// The fixed sixteen-field layout the service verifies. Unused fields are
/// present as empty lines; dropping them changes the digest and breaks
/// verification.
fn string_to_sign(
    account: &str,
    container: &str,
    start: &str,
    expiry: &str,
    headers: &ContentHeaders,
) -> String {
    let canonicalized = format!("/blob/{account}/{container}");
    format!(
        "r\n{start}\n{expiry}\n{canonicalized}\n\n\nhttps\n{SAS_VERSION}\nc\n\n\n{rscc}\n{rscd}\n{rsce}\n\n{rsct}",
        rscc = headers.cache_control,
        rscd = headers.content_disposition,
        rsce = headers.content_encoding,
        rsct = headers.content_type,
    )
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
