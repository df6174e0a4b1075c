//! Local image store
//!
//! Layout under the store root:
//!
//! ```text
//! layers/sha256/<key>.tar.gz     cached directive layers
//! images/<id>/config.json        committed image config
//! images/<id>/rootfs/            committed filesystem
//! tags/<name>.json               tag -> image id
//! tmp/<uuid>/rootfs/             build in progress
//! ```
//!
//! A tag only ever points at a fully committed image: the tag file is
//! written to a temporary name and renamed over the old one. Images and
//! layers are only removed by [`ImageStore::prune`], which must not run
//! alongside a build.

use super::image::ImageConfig;
use crate::cache::LayerCache;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What a prune removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub images_removed: Vec<String>,
    pub layers_removed: usize,
    pub bytes_freed: u64,
}

impl fmt::Display for PruneReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Removed {} image(s) and {} layer(s), {:.1} MiB freed",
            self.images_removed.len(),
            self.layers_removed,
            self.bytes_freed as f64 / (1024.0 * 1024.0)
        )?;
        for id in &self.images_removed {
            writeln!(f, "  {}", id)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub image: String,
    pub id: String,
    pub updated: DateTime<Utc>,
}

/// Scratch area of one build; removed on drop unless committed
#[derive(Debug)]
pub struct WorkDir {
    root: PathBuf,
    committed: bool,
}

impl WorkDir {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn rootfs(&self) -> PathBuf {
        self.root.join("rootfs")
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if !self.committed && self.root.exists() {
            if let Err(e) = fs::remove_dir_all(&self.root) {
                warn!(path = %self.root.display(), error = %e, "Failed to remove build scratch directory");
            } else {
                debug!(path = %self.root.display(), "Removed build scratch directory");
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layer_cache(&self) -> LayerCache {
        LayerCache::new(self.root.join("layers"))
    }

    fn tag_path(&self, image: &str) -> PathBuf {
        let safe_name = image.replace(|c: char| matches!(c, '/' | ':' | '@' | '\\'), "_");
        self.root.join("tags").join(format!("{}.json", safe_name))
    }

    fn image_dir(&self, id: &str) -> PathBuf {
        let hash = id.split_once(':').map(|(_, h)| h).unwrap_or(id);
        self.root.join("images").join(hash)
    }

    /// Start a build: a fresh scratch directory with an empty rootfs
    pub fn begin(&self) -> Result<WorkDir> {
        let root = self
            .root
            .join("tmp")
            .join(uuid::Uuid::new_v4().to_string());
        fs::create_dir_all(root.join("rootfs"))
            .with_context(|| format!("Failed to create build directory {}", root.display()))?;
        debug!(path = %root.display(), "Build scratch directory created");
        Ok(WorkDir {
            root,
            committed: false,
        })
    }

    /// Commit a finished build and point `config.tag` at it
    pub fn commit(&self, mut work: WorkDir, mut config: ImageConfig) -> Result<ImageConfig> {
        config.id = config.compute_id().as_str();
        config.created = Some(Utc::now());

        let image_dir = self.image_dir(&config.id);
        if image_dir.join("config.json").is_file() {
            debug!(id = %config.id, "Identical image already stored");
        } else {
            if image_dir.exists() {
                fs::remove_dir_all(&image_dir).with_context(|| {
                    format!("Failed to clear incomplete image {}", image_dir.display())
                })?;
            }
            fs::create_dir_all(&image_dir)
                .with_context(|| format!("Failed to create {}", image_dir.display()))?;
            fs::rename(work.rootfs(), image_dir.join("rootfs"))
                .context("Failed to move rootfs into the image store")?;
            write_atomic(
                &image_dir.join("config.json"),
                &serde_json::to_vec_pretty(&config)?,
            )?;
        }

        let record = TagRecord {
            image: config.tag.clone(),
            id: config.id.clone(),
            updated: Utc::now(),
        };
        write_atomic(&self.tag_path(&config.tag), &serde_json::to_vec_pretty(&record)?)?;

        // Tag points at the image now; the scratch directory is only leftovers
        work.committed = true;
        if let Err(e) = fs::remove_dir_all(work.root()) {
            warn!(path = %work.root().display(), error = %e, "Failed to remove build scratch directory");
        }

        info!(image = %config.tag, id = %config.id, "Image committed");
        Ok(config)
    }

    pub fn tag(&self, image: &str) -> Result<Option<TagRecord>> {
        let path = self.tag_path(image);
        if !path.is_file() {
            return Ok(None);
        }
        let content =
            fs::read(&path).with_context(|| format!("Failed to read tag {}", path.display()))?;
        let record = serde_json::from_slice(&content)
            .with_context(|| format!("Corrupt tag file {}", path.display()))?;
        Ok(Some(record))
    }

    /// Every tag record, sorted by image reference
    pub fn tags(&self) -> Result<Vec<TagRecord>> {
        let dir = self.root.join("tags");
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("Failed to list {}", dir.display()))? {
            let path = entry.context("Failed to read tag entry")?.path();
            let is_tag = path.extension().map_or(false, |ext| ext == "json")
                && !path
                    .file_name()
                    .map_or(true, |name| name.to_string_lossy().starts_with('.'));
            if !is_tag {
                continue;
            }
            let content =
                fs::read(&path).with_context(|| format!("Failed to read tag {}", path.display()))?;
            let record: TagRecord = serde_json::from_slice(&content)
                .with_context(|| format!("Corrupt tag file {}", path.display()))?;
            records.push(record);
        }
        records.sort_by(|a, b| a.image.cmp(&b.image));
        Ok(records)
    }

    fn read_config(&self, id: &str) -> Result<ImageConfig> {
        let path = self.image_dir(id).join("config.json");
        let content =
            fs::read(&path).with_context(|| format!("Missing image config {}", path.display()))?;
        serde_json::from_slice(&content)
            .with_context(|| format!("Corrupt image config {}", path.display()))
    }

    /// Config of the image a tag points at
    pub fn resolve(&self, image: &str) -> Result<Option<ImageConfig>> {
        let Some(record) = self.tag(image)? else {
            return Ok(None);
        };
        let mut config = self
            .read_config(&record.id)
            .with_context(|| format!("Tag {} points at missing image {}", image, record.id))?;
        // identical images are stored once, under whichever tag committed first
        config.tag = record.image;
        Ok(Some(config))
    }

    /// Remove images no tag points at, then layers no remaining image lists
    pub fn prune(&self) -> Result<PruneReport> {
        let tagged: BTreeSet<String> = self.tags()?.into_iter().map(|r| r.id).collect();
        let mut report = PruneReport::default();
        let mut kept_layers = BTreeSet::new();

        let images_dir = self.root.join("images");
        if images_dir.is_dir() {
            let entries = fs::read_dir(&images_dir)
                .with_context(|| format!("Failed to list {}", images_dir.display()))?;
            for entry in entries {
                let entry = entry.context("Failed to read image entry")?;
                let id = format!("sha256:{}", entry.file_name().to_string_lossy());
                if tagged.contains(&id) {
                    kept_layers.extend(self.read_config(&id)?.layers);
                    continue;
                }
                report.bytes_freed += dir_size(&entry.path());
                fs::remove_dir_all(entry.path())
                    .with_context(|| format!("Failed to remove image {}", id))?;
                debug!(id = %id, "Image removed");
                report.images_removed.push(id);
            }
        }
        report.images_removed.sort();

        let cache = self.layer_cache();
        for key in cache.keys() {
            if kept_layers.contains(&key.as_str()) {
                continue;
            }
            report.bytes_freed += cache.remove(&key)?;
            report.layers_removed += 1;
        }

        info!(
            images = report.images_removed.len(),
            layers = report.layers_removed,
            bytes = report.bytes_freed,
            "Store pruned"
        );
        Ok(report)
    }

    pub fn rootfs(&self, id: &str) -> PathBuf {
        self.image_dir(id).join("rootfs")
    }
}

fn dir_size(path: &Path) -> u64 {
    let Ok(metadata) = fs::symlink_metadata(path) else {
        return 0;
    };
    if !metadata.is_dir() {
        return metadata.len();
    }
    fs::read_dir(path)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| dir_size(&e.path()))
                .sum()
        })
        .unwrap_or(0)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    let temp = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
    fs::write(&temp, bytes).with_context(|| format!("Failed to write {}", temp.display()))?;
    fs::rename(&temp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
