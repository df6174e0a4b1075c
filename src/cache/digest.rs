use anyhow::{Context, Result};
use sha2::{Digest as _, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Represents a content-addressable digest (e.g., "sha256:abc123...")
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: String,
    hash: String,
}

impl Digest {
    /// Parse a digest string in format "algorithm:hash"
    pub fn parse(digest: &str) -> Result<Self> {
        let (algorithm, hash) = digest.split_once(':').with_context(|| {
            format!(
                "Invalid digest format (expected 'algorithm:hash'): {}",
                digest
            )
        })?;
        if algorithm.is_empty() || hash.is_empty() {
            anyhow::bail!("Invalid digest format (empty component): {}", digest);
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            hash: hash.to_string(),
        })
    }

    /// sha256 digest of a byte slice
    pub fn sha256(bytes: &[u8]) -> Self {
        Self {
            algorithm: "sha256".to_string(),
            hash: hex::encode(Sha256::digest(bytes)),
        }
    }

    /// sha256 digest of a file's contents, streamed
    pub fn sha256_file(path: &Path) -> std::io::Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self {
            algorithm: "sha256".to_string(),
            hash: hex::encode(hasher.finalize()),
        })
    }

    /// Get the algorithm part (e.g., "sha256")
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Get the hash part
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// First 12 hex characters, as shown in build output
    pub fn short(&self) -> &str {
        &self.hash[..self.hash.len().min(12)]
    }

    /// Path of the layer tarball for this digest within a layers directory
    pub fn to_layer_path(&self, layers_dir: &Path) -> PathBuf {
        layers_dir
            .join(&self.algorithm)
            .join(format!("{}.tar.gz", self.hash))
    }

    /// Format as "algorithm:hash" string
    pub fn as_str(&self) -> String {
        format!("{}:{}", self.algorithm, self.hash)
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hash)
    }
}
