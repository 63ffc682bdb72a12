//! Content-derived blob identifiers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

const KEY_HEX_LEN: usize = 64;

/// Suffix some clients append to image keys. Never part of a stored key.
pub const LEGACY_IMAGE_SUFFIX: &str = ".jpg";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContentKeyError {
    #[error("content key must be 64 hex characters, got {0}")]
    BadLength(usize),

    #[error("content key contains non-hex character {0:?}")]
    BadCharacter(char),
}

/// Lowercase hex SHA-256 digest of a blob's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentKey(String);

impl ContentKey {
    pub fn parse<S: AsRef<str>>(s: S) -> Result<Self, ContentKeyError> {
        let s = s.as_ref();
        if s.len() != KEY_HEX_LEN {
            return Err(ContentKeyError::BadLength(s.len()));
        }
        if let Some(c) = s.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(ContentKeyError::BadCharacter(c));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Parses a key taken from a request path, dropping the legacy `.jpg`
    /// suffix when the value has no sub-path.
    pub fn parse_request_param(s: &str) -> Result<Self, ContentKeyError> {
        let trimmed = match s.strip_suffix(LEGACY_IMAGE_SUFFIX) {
            Some(stripped) if !s.contains('/') => stripped,
            _ => s,
        };
        Self::parse(trimmed)
    }

    pub fn for_bytes(data: &[u8]) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.update(data);
        hasher.finish()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Relative bucket path `<shard>/<key>`.
    pub fn shard_path(&self) -> String {
        let len = self.0.len();
        format!("{}/{}", &self.0[len - 5..len - 2], self.0)
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentKey {
    type Error = ContentKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ContentKey> for String {
    fn from(key: ContentKey) -> Self {
        key.0
    }
}

/// Incremental key derivation for streamed content.
#[derive(Default)]
pub struct ContentHasher {
    hasher: Sha256,
    bytes: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    pub fn finish(self) -> ContentKey {
        ContentKey(format!("{:x}", self.hasher.finalize()))
    }
}
