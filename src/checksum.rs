//! Content hashing for schema deduplication

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::schema::SchemaFormat;

/// SHA256 digest of a schema's bytes, salted with its format tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash `data` as content of the given format.
    ///
    /// The format participates in the digest so identical text registered as
    /// two different formats never collides.
    pub fn compute(format: SchemaFormat, data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(data);
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify that content matches this hash
    pub fn verify(&self, format: SchemaFormat, data: &[u8]) -> bool {
        Self::compute(format, data) == *self
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
