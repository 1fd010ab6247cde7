//! HMAC-SHA256 payload signatures.
//!
//! Header format: `t=<unix seconds>,v1=<hex digest>[,v1=<hex digest>...]`,
//! where the digest covers `"<t>.<raw body>"`. Several `v1` entries are
//! accepted so the shared secret can be rotated.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// HTTP header carrying the signature.
pub const SIGNATURE_HEADER: &str = "payment-signature";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature")]
    Missing,

    #[error("malformed signature header: {0}")]
    Malformed(String),

    #[error("signature timestamp {timestamp} outside tolerance ({tolerance_secs}s)")]
    Expired { timestamp: i64, tolerance_secs: i64 },

    #[error("signature mismatch")]
    Mismatch,

    #[error("signing secret must not be empty")]
    EmptySecret,
}

#[derive(Clone)]
pub struct SignatureVerifier {
    keyed: HmacSha256,
    tolerance: Duration,
}

impl core::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    pub fn new(secret: impl AsRef<[u8]>, tolerance: Duration) -> Result<Self, SignatureError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(SignatureError::EmptySecret);
        }
        let keyed = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::EmptySecret)?;
        Ok(Self { keyed, tolerance })
    }

    fn mac(&self, timestamp: i64, body: &[u8]) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        mac
    }

    /// Builds a header value for `body` signed at `timestamp`.
    pub fn sign(&self, timestamp: i64, body: &[u8]) -> String {
        let digest = hex::encode(self.mac(timestamp, body).finalize().into_bytes());
        format!("t={timestamp},v1={digest}")
    }

    /// Verifies a header against the raw body.
    pub fn verify(&self, header: Option<&str>, body: &[u8], now: DateTime<Utc>) -> Result<(), SignatureError> {
        let header = header.map(str::trim).filter(|h| !h.is_empty()).ok_or(SignatureError::Missing)?;

        let mut timestamp: Option<i64> = None;
        let mut candidates: Vec<Vec<u8>> = Vec::new();
        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                return Err(SignatureError::Malformed(format!("unexpected segment {part:?}")));
            };
            match key {
                "t" => {
                    timestamp = Some(value.parse().map_err(|_| {
                        SignatureError::Malformed(format!("timestamp is not a number: {value:?}"))
                    })?)
                }
                "v1" => candidates.push(
                    hex::decode(value)
                        .map_err(|_| SignatureError::Malformed("digest is not hex".into()))?,
                ),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| SignatureError::Malformed("missing t=".into()))?;
        if candidates.is_empty() {
            return Err(SignatureError::Malformed("missing v1=".into()));
        }

        if now.timestamp().abs_diff(timestamp) > self.tolerance.num_seconds().unsigned_abs() {
            return Err(SignatureError::Expired {
                timestamp,
                tolerance_secs: self.tolerance.num_seconds(),
            });
        }

        let matched = candidates
            .iter()
            .any(|candidate| self.mac(timestamp, body).verify_slice(candidate).is_ok());
        if matched {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }
}
