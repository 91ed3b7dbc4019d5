//! Content hashing for synthesized programs and derived secrets.
//!
//! - `ObjectHash`: a 20-character truncated hash identifying a serialized value
//! - `ContentHash`: a full 64-character hash of arbitrary bytes

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::OBJ_HASH_PREFIX_LEN;

pub type HashError = serde_json::Error;

/// A content-addressed hash identifying a serialized value.
///
/// The hash is a 20-character truncated SHA-256 of the JSON-serialized value,
/// as a lowercase hexadecimal string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHash(pub String);

impl std::fmt::Display for ObjectHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ObjectHash, HashError> {
    let serialized = serde_json::to_string(self)?;
    let full = hash_bytes(serialized.as_bytes());
    Ok(ObjectHash(full.0[..OBJ_HASH_PREFIX_LEN].to_string()))
  }
}

/// A full 64-character SHA256 hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Serialize)]
  struct Sample {
    name: &'static str,
    size: u32,
  }

  impl Hashable for Sample {}

  #[test]
  fn object_hash_is_truncated_and_stable() {
    let a = Sample { name: "bucket", size: 1 }.compute_hash().unwrap();
    let b = Sample { name: "bucket", size: 1 }.compute_hash().unwrap();
    assert_eq!(a, b);
    assert_eq!(a.0.len(), OBJ_HASH_PREFIX_LEN);
  }

  #[test]
  fn object_hash_changes_with_content() {
    let a = Sample { name: "bucket", size: 1 }.compute_hash().unwrap();
    let b = Sample { name: "bucket", size: 2 }.compute_hash().unwrap();
    assert_ne!(a, b);
  }

  #[test]
  fn hash_bytes_matches_known_digest() {
    let hash = hash_bytes(b"hello world");
    assert_eq!(hash.0, "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9");
  }
}
