//! BLAKE3 content hashing.

use crate::error::{DcsError, DcsResult};
use serde::{Deserialize, Serialize};

/// Hex-encoded BLAKE3 digest of a canonical byte representation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    /// Hash the canonical JSON form of a value.
    ///
    /// `serde_json` maps are ordered by key, so a given value always
    /// serializes to the same bytes.
    pub fn of_json<T: Serialize + ?Sized>(value: &T) -> DcsResult<Self> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| DcsError::InvalidInput(e.to_string()))?;
        Ok(Self::of_bytes(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
