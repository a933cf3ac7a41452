//! Core identifier types for partwise

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Prefix under which every large upload is stored
pub const STORAGE_KEY_PREFIX: &str = "large-uploads";

const KEY_SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const KEY_SUFFIX_LEN: usize = 6;
const MAX_KEY_LEN: usize = 1024;
const MAX_FILENAME_LEN: usize = 200;

/// Upload session identifier using ULID for time-ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(ulid::Ulid);

impl SessionId {
    /// Generate a new session id with current timestamp
    pub fn new() -> Self {
        SessionId(ulid::Ulid::new())
    }

    /// Create session id from ULID
    pub fn from_ulid(ulid: ulid::Ulid) -> Self {
        SessionId(ulid)
    }

    /// Get the underlying ULID
    pub fn as_ulid(&self) -> ulid::Ulid {
        self.0
    }

    /// Big-endian bytes, which sort in creation order
    pub fn to_bytes(&self) -> [u8; 16] {
        self.0.to_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        SessionId(ulid::Ulid::from_bytes(bytes))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> crate::Result<Self> {
        ulid::Ulid::from_string(s)
            .map(SessionId)
            .map_err(|e| crate::CoreError::InvalidSessionId(format!("'{}': {}", s, e)))
    }
}

/// Destination object key in the storage backend
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageKey(String);

impl StorageKey {
    /// Create a key with validation
    pub fn new(key: &str) -> crate::Result<Self> {
        if key.is_empty() {
            return Err(crate::CoreError::InvalidStorageKey("empty key".to_string()));
        }

        if key.len() > MAX_KEY_LEN {
            return Err(crate::CoreError::InvalidStorageKey(format!(
                "key is {} bytes (max: {})",
                key.len(),
                MAX_KEY_LEN
            )));
        }

        if key.chars().any(|c| c.is_control()) {
            return Err(crate::CoreError::InvalidStorageKey(
                "control characters not allowed".to_string(),
            ));
        }

        if key.starts_with('/') || key.split('/').any(|segment| segment.is_empty() || segment == "..") {
            return Err(crate::CoreError::InvalidStorageKey(format!(
                "'{}' has an empty or relative path segment",
                key
            )));
        }

        Ok(StorageKey(key.to_string()))
    }

    /// Generate a fresh key for an upload of `filename`:
    /// `large-uploads/{unix_millis}-{random}-{filename}`
    pub fn generate(filename: &str) -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let mut rng = rand::thread_rng();
        let suffix: String = (0..KEY_SUFFIX_LEN)
            .map(|_| KEY_SUFFIX_ALPHABET[rng.gen_range(0..KEY_SUFFIX_ALPHABET.len())] as char)
            .collect();

        Self::from_parts(millis, &suffix, filename)
    }

    /// Deterministic form of [`StorageKey::generate`]
    pub fn from_parts(unix_millis: i64, suffix: &str, filename: &str) -> Self {
        StorageKey(format!(
            "{}/{}-{}-{}",
            STORAGE_KEY_PREFIX,
            unix_millis,
            suffix,
            sanitize_filename(filename)
        ))
    }

    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for StorageKey {
    type Error = crate::CoreError;

    fn try_from(value: String) -> crate::Result<Self> {
        StorageKey::new(&value)
    }
}

impl From<StorageKey> for String {
    fn from(key: StorageKey) -> Self {
        key.0
    }
}

/// Reduce a filename to characters that are safe in keys and URL paths
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim();

    let safe: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILENAME_LEN)
        .collect();

    let safe = safe.trim_start_matches('.');
    if safe.is_empty() {
        "file".to_string()
    } else {
        safe.to_string()
    }
}

/// Integrity token the storage backend returns for an accepted part
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Etag(String);

impl Etag {
    /// Wrap a bare, unquoted etag value
    pub fn new(value: impl Into<String>) -> Self {
        Etag(value.into())
    }

    /// Build from a raw header value, stripping surrounding quotes.
    /// Returns `None` when nothing is left.
    pub fn from_header(raw: &str) -> Option<Self> {
        let value = raw.trim().trim_matches('"').trim();
        if value.is_empty() {
            None
        } else {
            Some(Etag(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Quoted form used in HTTP headers
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl std::fmt::Display for Etag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_roundtrip() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(SessionId::from_bytes(id.to_bytes()), id);
        assert!("not-a-ulid".parse::<SessionId>().is_err());
    }

    #[test]
    fn test_storage_key_validation() {
        assert!(StorageKey::new("large-uploads/a.bin").is_ok());
        assert!(StorageKey::new("").is_err());
        assert!(StorageKey::new("/absolute").is_err());
        assert!(StorageKey::new("a/../b").is_err());
        assert!(StorageKey::new("a//b").is_err());
        assert!(StorageKey::new("tab\tkey").is_err());
    }

    #[test]
    fn test_storage_key_layout() {
        let key = StorageKey::from_parts(1700000000000, "k3x9ab", "My Video (final).mp4");
        assert_eq!(key.as_str(), "large-uploads/1700000000000-k3x9ab-My_Video__final_.mp4");

        let generated = StorageKey::generate("report.pdf");
        assert!(generated.as_str().starts_with("large-uploads/"));
        assert!(generated.as_str().ends_with("-report.pdf"));
        assert!(StorageKey::new(generated.as_str()).is_ok());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\data\\big.iso"), "big.iso");
        assert_eq!(sanitize_filename("..."), "file");
        assert_eq!(sanitize_filename(""), "file");
    }

    #[test]
    fn test_etag_strips_quotes() {
        assert_eq!(Etag::from_header("\"abc123\"").unwrap().as_str(), "abc123");
        assert_eq!(Etag::from_header("abc123").unwrap().as_str(), "abc123");
        assert_eq!(Etag::from_header(" \"abc\" ").unwrap().quoted(), "\"abc\"");
        assert!(Etag::from_header("\"\"").is_none());
        assert!(Etag::from_header("").is_none());
    }
}
