//! Layer cache
//!
//! Each filesystem-mutating directive is keyed by a digest chained from its
//! parent key and its own fingerprint, so a key only repeats when every
//! earlier directive's inputs repeat too. A cached layer is a gzip tarball of
//! the whole rootfs after the directive ran.

use super::digest::Digest;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Layer {0} is not in the cache")]
    MissingLayer(String),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone)]
pub struct LayerCache {
    root: PathBuf,
}

impl LayerCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Chain a directive fingerprint onto its parent key
    pub fn chain_key(parent: Option<&Digest>, fingerprint: &str) -> Digest {
        let mut input = String::new();
        if let Some(parent) = parent {
            input.push_str(&parent.as_str());
        }
        input.push('\n');
        input.push_str(fingerprint);
        Digest::sha256(input.as_bytes())
    }

    pub fn layer_path(&self, key: &Digest) -> PathBuf {
        key.to_layer_path(&self.root)
    }

    pub fn contains(&self, key: &Digest) -> bool {
        self.layer_path(key).is_file()
    }

    /// Archive the rootfs under `key`. The tarball is written beside its
    /// final path and renamed into place, so a crash never leaves a partial
    /// layer visible.
    pub fn snapshot(&self, key: &Digest, rootfs: &Path) -> Result<PathBuf, CacheError> {
        let path = self.layer_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let partial = path.with_extension(format!("partial-{}", uuid::Uuid::new_v4()));

        let file = File::create(&partial).map_err(io_err(&partial))?;
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::fast());
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);
        builder
            .append_dir_all(".", rootfs)
            .map_err(io_err(rootfs))?;
        let encoder = builder.into_inner().map_err(io_err(&partial))?;
        let mut writer = encoder.finish().map_err(io_err(&partial))?;
        writer.flush().map_err(io_err(&partial))?;

        fs::rename(&partial, &path).map_err(io_err(&path))?;
        debug!(layer = %key.short(), path = %path.display(), "Layer stored");
        Ok(path)
    }

    /// Replace the rootfs contents with the cached layer
    pub fn restore(&self, key: &Digest, rootfs: &Path) -> Result<(), CacheError> {
        let path = self.layer_path(key);
        if !path.is_file() {
            return Err(CacheError::MissingLayer(key.as_str()));
        }

        if rootfs.exists() {
            fs::remove_dir_all(rootfs).map_err(io_err(rootfs))?;
        }
        fs::create_dir_all(rootfs).map_err(io_err(rootfs))?;

        let file = File::open(&path).map_err(io_err(&path))?;
        let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
        archive.set_preserve_permissions(true);
        archive.unpack(rootfs).map_err(io_err(rootfs))?;

        debug!(layer = %key.short(), "Layer restored");
        Ok(())
    }

    /// Keys of every stored layer
    pub fn keys(&self) -> Vec<Digest> {
        let dir = self.root.join("sha256");
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut keys: Vec<Digest> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                let hash = name.strip_suffix(".tar.gz")?;
                Digest::parse(&format!("sha256:{}", hash)).ok()
            })
            .collect();
        keys.sort_by_key(|k| k.as_str());
        keys
    }

    /// Delete a stored layer. Returns the bytes freed.
    pub fn remove(&self, key: &Digest) -> Result<u64, CacheError> {
        let path = self.layer_path(key);
        let size = fs::metadata(&path).map_err(io_err(&path))?.len();
        fs::remove_file(&path).map_err(io_err(&path))?;
        debug!(layer = %key.short(), "Layer removed");
        Ok(size)
    }

    /// Number of stored layers
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
