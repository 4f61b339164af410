//! Transaction key authentication.
//!
//! Every secured call carries a transaction key: base64 of
//! `nonce (4 bytes BE) || timestamp ^ salt (4 bytes BE) || signature`.
//! The guard recomputes the full payload from the embedded nonce and
//! timestamp through a [`KeyDerivation`] and compares it with the presented
//! bytes, then checks the timestamp against the configured clock skew.
//!
//! Keys are not single-use: a key stays valid for replay for as long as its
//! timestamp is within the skew window.

use crate::errors::{ErrorCode, IntegrationError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Fixed protocol salt XORed into the timestamp on the wire.
pub const TIMESTAMP_SALT: u32 = 0x34A4_9F41;

/// Length of the nonce + masked timestamp header.
pub const HEADER_LEN: usize = 8;

/// Produces the expected key payload for a nonce and timestamp.
pub trait KeyDerivation: Send + Sync {
    /// Full payload bytes (header included) for `(nonce, timestamp)`.
    fn derive(&self, nonce: u32, timestamp: u32) -> Vec<u8>;
}

/// HMAC-SHA256 over the key header, keyed by the shared secret.
#[derive(Clone)]
pub struct HmacKeyDerivation {
    mac: HmacSha256,
}

impl HmacKeyDerivation {
    pub fn new(secret: &[u8]) -> Result<Self> {
        let mac = HmacSha256::new_from_slice(secret).map_err(|e| {
            IntegrationError::configuration(format!("invalid signing secret: {}", e))
        })?;
        Ok(Self { mac })
    }
}

impl std::fmt::Debug for HmacKeyDerivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacKeyDerivation").finish_non_exhaustive()
    }
}

impl KeyDerivation for HmacKeyDerivation {
    fn derive(&self, nonce: u32, timestamp: u32) -> Vec<u8> {
        let header = encode_header(nonce, timestamp);
        let mut mac = self.mac.clone();
        mac.update(&header);
        let signature = mac.finalize().into_bytes();

        let mut payload = Vec::with_capacity(HEADER_LEN + signature.len());
        payload.extend_from_slice(&header);
        payload.extend_from_slice(&signature);
        payload
    }
}

fn encode_header(nonce: u32, timestamp: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(&nonce.to_be_bytes());
    header[4..].copy_from_slice(&(timestamp ^ TIMESTAMP_SALT).to_be_bytes());
    header
}

/// Decoded transaction key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionKey {
    pub nonce: u32,
    /// Claimed request time in Unix seconds (salt removed).
    pub timestamp: u32,
    payload: Vec<u8>,
}

impl TransactionKey {
    /// Decode a base64 key. The signature itself is not checked here.
    pub fn decode(encoded: &str) -> Result<Self> {
        let payload = STANDARD.decode(encoded.trim()).map_err(|e| {
            IntegrationError::authentication("Security exception")
                .with_code(ErrorCode::AuthMalformedKey)
                .with_source(e)
        })?;
        Self::from_payload(payload)
    }

    pub fn from_payload(payload: Vec<u8>) -> Result<Self> {
        if payload.len() < HEADER_LEN {
            return Err(IntegrationError::authentication("Security exception")
                .with_code(ErrorCode::AuthMalformedKey));
        }
        let nonce = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let masked = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        Ok(Self {
            nonce,
            timestamp: masked ^ TIMESTAMP_SALT,
            payload,
        })
    }

    /// Mint a fresh key for `timestamp`.
    pub fn mint(derivation: &dyn KeyDerivation, nonce: u32, timestamp: u32) -> Self {
        Self {
            nonce,
            timestamp,
            payload: derivation.derive(nonce, timestamp),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn encode(&self) -> String {
        STANDARD.encode(&self.payload)
    }
}

/// Validates transaction keys on every secured call.
pub struct AuthGuard {
    derivation: Box<dyn KeyDerivation>,
    max_skew_secs: u64,
}

impl AuthGuard {
    /// `max_skew_secs == 0` disables expiry.
    pub fn new(derivation: Box<dyn KeyDerivation>, max_skew_secs: u64) -> Self {
        Self {
            derivation,
            max_skew_secs,
        }
    }

    pub fn max_skew_secs(&self) -> u64 {
        self.max_skew_secs
    }

    /// Verify `encoded` against the current wall clock.
    pub fn verify(&self, encoded: &str) -> Result<()> {
        self.verify_at(encoded, unix_now())
    }

    /// Verify `encoded` as if the current time were `now` (Unix seconds).
    pub fn verify_at(&self, encoded: &str, now: u64) -> Result<()> {
        let key = TransactionKey::decode(encoded)?;
        let expected = self.derivation.derive(key.nonce, key.timestamp);

        if !bool::from(expected.as_slice().ct_eq(key.payload())) {
            warn!(nonce = key.nonce, "Transaction key signature mismatch");
            return Err(IntegrationError::authentication("Security exception")
                .with_code(ErrorCode::AuthSignatureMismatch));
        }

        let skew = now.abs_diff(u64::from(key.timestamp));
        if self.max_skew_secs > 0 && skew > self.max_skew_secs {
            warn!(
                nonce = key.nonce,
                skew,
                max_skew = self.max_skew_secs,
                "Transaction key outside permitted clock skew"
            );
            return Err(IntegrationError::authentication("Security timing exception")
                .with_code(ErrorCode::AuthKeyExpired));
        }

        debug!(nonce = key.nonce, skew, "Transaction key accepted");
        Ok(())
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Random nonce for locally minted keys.
pub fn random_nonce() -> u32 {
    (uuid::Uuid::new_v4().as_u128() >> 96) as u32
}
