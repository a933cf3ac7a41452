//! Presigned URLs for part uploads and object downloads
//!
//! A URL carries `expires` (unix seconds) and `signature`, a keyed blake3
//! hash over a canonical string:
//!
//! ```text
//! PUT\n{uploadId}\n{partNumber}\n{expires}
//! GET\n{storageKey}\n{expires}
//! ```
//!
//! The signing key is derived from the server secret, so the raw secret
//! never keys the hash directly.

use chrono::{DateTime, TimeZone, Utc};
use partwise_core::StorageKey;
use subtle::ConstantTimeEq;

use crate::{join_url, object_path, parse_query, part_path, ProtocolError};

const KEY_CONTEXT: &str = "partwise 2024-06 presigned url signing key";

pub const EXPIRES_PARAM: &str = "expires";
pub const SIGNATURE_PARAM: &str = "signature";

/// Signs and verifies presigned URLs
#[derive(Clone)]
pub struct UrlSigner {
    key: [u8; 32],
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner").finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(secret: &[u8]) -> Self {
        UrlSigner {
            key: blake3::derive_key(KEY_CONTEXT, secret),
        }
    }

    fn sign(&self, canonical: &str) -> String {
        blake3::keyed_hash(&self.key, canonical.as_bytes())
            .to_hex()
            .to_string()
    }

    pub fn part_signature(&self, upload_id: &str, part_number: u32, expires: i64) -> String {
        self.sign(&format!("PUT\n{}\n{}\n{}", upload_id, part_number, expires))
    }

    pub fn download_signature(&self, key: &StorageKey, expires: i64) -> String {
        self.sign(&format!("GET\n{}\n{}", key.as_str(), expires))
    }

    /// Absolute URL permitting one part PUT until `expires_at`
    pub fn presign_part(
        &self,
        base_url: &str,
        upload_id: &str,
        part_number: u32,
        expires_at: DateTime<Utc>,
    ) -> String {
        let expires = expires_at.timestamp();
        format!(
            "{}?{}={}&{}={}",
            join_url(base_url, &part_path(upload_id, part_number)),
            EXPIRES_PARAM,
            expires,
            SIGNATURE_PARAM,
            self.part_signature(upload_id, part_number, expires)
        )
    }

    /// Absolute URL permitting object GETs until `expires_at`
    pub fn presign_download(
        &self,
        base_url: &str,
        key: &StorageKey,
        expires_at: DateTime<Utc>,
    ) -> String {
        let expires = expires_at.timestamp();
        format!(
            "{}?{}={}&{}={}",
            join_url(base_url, &object_path(key)),
            EXPIRES_PARAM,
            expires,
            SIGNATURE_PARAM,
            self.download_signature(key, expires)
        )
    }

    pub fn verify_part(
        &self,
        upload_id: &str,
        part_number: u32,
        query: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ProtocolError> {
        let (expires, signature) = signed_params(query)?;
        check_expiry(expires, now)?;
        check_signature(&self.part_signature(upload_id, part_number, expires), signature)
    }

    pub fn verify_download(
        &self,
        key: &StorageKey,
        query: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ProtocolError> {
        let (expires, signature) = signed_params(query)?;
        check_expiry(expires, now)?;
        check_signature(&self.download_signature(key, expires), signature)
    }
}

fn signed_params(query: &str) -> Result<(i64, &str), ProtocolError> {
    let params = parse_query(query);
    let lookup = |name: &str| {
        params
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| *v)
            .ok_or_else(|| ProtocolError::MissingField(name.to_string()))
    };

    let expires = lookup(EXPIRES_PARAM)?
        .parse::<i64>()
        .map_err(|e| ProtocolError::MalformedQuery(format!("{}: {}", EXPIRES_PARAM, e)))?;
    let signature = lookup(SIGNATURE_PARAM)?;
    Ok((expires, signature))
}

fn check_expiry(expires: i64, now: DateTime<Utc>) -> Result<(), ProtocolError> {
    match Utc.timestamp_opt(expires, 0).single() {
        Some(deadline) if now < deadline => Ok(()),
        _ => Err(ProtocolError::Expired(expires)),
    }
}

fn check_signature(expected: &str, provided: &str) -> Result<(), ProtocolError> {
    let matches = expected.len() == provided.len()
        && bool::from(expected.as_bytes().ct_eq(provided.as_bytes()));
    if matches {
        Ok(())
    } else {
        Err(ProtocolError::BadSignature)
    }
}
