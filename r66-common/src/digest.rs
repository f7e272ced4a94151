//! Digest algorithms for authentication keys, block checks and file hashes
//!
//! Streaming digests are used twice during a data phase: once per block
//! (when the transfer mode asks for it) and once across every block for the
//! final end-to-end check. File hashing runs on the blocking pool so large
//! files never stall async workers.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;

use crate::HASH_BUFFER_SIZE;

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DigestAlgo {
    #[default]
    Sha256,
    Sha512,
    Blake3,
}

impl DigestAlgo {
    /// Name used in capability extensions and configuration
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
            Self::Blake3 => "BLAKE3",
        }
    }

    /// Parse an algorithm name (case-insensitive, dashes ignored)
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "SHA256" => Some(Self::Sha256),
            "SHA512" => Some(Self::Sha512),
            "BLAKE3" => Some(Self::Blake3),
            _ => None,
        }
    }

    /// Parse an algorithm name, falling back to `default` when unknown
    #[must_use]
    pub fn parse_or(name: &str, default: Self) -> Self {
        Self::parse(name).unwrap_or(default)
    }

    /// Start a streaming digest
    #[must_use]
    pub fn hasher(&self) -> StreamDigest {
        match self {
            Self::Sha256 => StreamDigest::Sha256(Sha256::new()),
            Self::Sha512 => StreamDigest::Sha512(Sha512::new()),
            Self::Blake3 => StreamDigest::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    /// Digest a byte slice, hex encoded
    #[must_use]
    pub fn digest_hex(&self, data: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize_hex()
    }
}

impl fmt::Display for DigestAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incremental digest over one of the supported algorithms
#[derive(Clone)]
pub enum StreamDigest {
    Sha256(Sha256),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl StreamDigest {
    /// Feed more bytes
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    /// Consume the digest and return lowercase hex
    #[must_use]
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

impl fmt::Debug for StreamDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sha256(_) => "Sha256",
            Self::Sha512(_) => "Sha512",
            Self::Blake3(_) => "Blake3",
        };
        f.debug_tuple("StreamDigest").field(&name).finish()
    }
}

/// Derive the authentication key announced for a shared secret
///
/// Keys always use SHA-256 so that partners with different transfer digests
/// still agree on the key.
#[must_use]
pub fn auth_key(secret: &str) -> String {
    DigestAlgo::Sha256.digest_hex(secret.as_bytes())
}

/// Compare two keys in constant time
///
/// Keys of different lengths never match.
#[must_use]
pub fn keys_match(expected: &str, received: &str) -> bool {
    let a = expected.as_bytes();
    let b = received.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Digest an entire file on the blocking pool
pub async fn hash_file(path: &Path, algo: DigestAlgo) -> io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash_file_sync(&path, algo))
        .await
        .map_err(|e| io::Error::other(format!("hash task failed: {e}")))?
}

fn hash_file_sync(path: &Path, algo: DigestAlgo) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = algo.hasher();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize_hex())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_names() {
        assert_eq!(DigestAlgo::parse("sha256"), Some(DigestAlgo::Sha256));
        assert_eq!(DigestAlgo::parse("SHA-512"), Some(DigestAlgo::Sha512));
        assert_eq!(DigestAlgo::parse("Blake3"), Some(DigestAlgo::Blake3));
        assert_eq!(DigestAlgo::parse("MD5"), None);
    }

    #[test]
    fn test_parse_or_falls_back() {
        assert_eq!(
            DigestAlgo::parse_or("MD5", DigestAlgo::Sha512),
            DigestAlgo::Sha512
        );
    }

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            DigestAlgo::Sha256.digest_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        for algo in [DigestAlgo::Sha256, DigestAlgo::Sha512, DigestAlgo::Blake3] {
            let mut hasher = algo.hasher();
            hasher.update(b"hello ");
            hasher.update(b"world");
            assert_eq!(hasher.finalize_hex(), algo.digest_hex(b"hello world"));
        }
    }

    #[test]
    fn test_keys_match() {
        let key = auth_key("secret");
        assert!(keys_match(&key, &auth_key("secret")));
        assert!(!keys_match(&key, &auth_key("other")));
        assert!(!keys_match(&key, &key[..10]));
    }

    #[tokio::test]
    async fn test_hash_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        let hash = hash_file(file.path(), DigestAlgo::Sha256).await.unwrap();
        assert_eq!(hash, DigestAlgo::Sha256.digest_hex(b"abc"));
    }
}
