//! Build context: the source tree a build stages into the image
//!
//! The walk honours `.dockerignore` files and the recipe's exclude patterns,
//! and nothing else (no gitignore), so the local and Docker backends see the
//! same set of files.

use crate::cache::Digest;
use anyhow::{Context, Result};
use ignore::{overrides::OverrideBuilder, WalkBuilder};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEntry {
    /// Path relative to the context root
    pub path: PathBuf,
    pub kind: EntryKind,
}

#[derive(Debug, Clone)]
pub struct BuildContext {
    root: PathBuf,
    exclude: Vec<String>,
}

impl BuildContext {
    pub fn new(root: impl Into<PathBuf>, exclude: Vec<String>) -> Self {
        Self {
            root: root.into(),
            exclude,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All staged entries, sorted by relative path
    pub fn entries(&self) -> Result<Vec<ContextEntry>> {
        if !self.root.is_dir() {
            anyhow::bail!("Build context {} is not a directory", self.root.display());
        }

        let mut override_builder = OverrideBuilder::new(&self.root);
        for pattern in &self.exclude {
            override_builder
                .add(&format!("!{}", pattern))
                .with_context(|| format!("Invalid exclude pattern '{}'", pattern))?;
        }
        let overrides = override_builder
            .build()
            .context("Failed to build exclude patterns")?;

        let mut entries = Vec::new();
        for result in WalkBuilder::new(&self.root)
            .standard_filters(false)
            .hidden(false)
            .follow_links(false)
            .add_custom_ignore_filename(".dockerignore")
            .overrides(overrides)
            .build()
        {
            let entry = result.context("Failed to read build context entry")?;
            if entry.depth() == 0 {
                continue;
            }
            let Some(file_type) = entry.file_type() else {
                continue;
            };
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink
            } else if file_type.is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::File
            };
            let path = entry
                .path()
                .strip_prefix(&self.root)
                .context("Failed to strip context prefix")?
                .to_path_buf();
            trace!(path = %path.display(), ?kind, "Context entry");
            entries.push(ContextEntry { path, kind });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(
            root = %self.root.display(),
            entries = entries.len(),
            "Build context scanned"
        );
        Ok(entries)
    }

    /// Digest over every staged path and its content. Any added, removed,
    /// renamed or edited file changes it.
    pub fn digest(&self) -> Result<Digest> {
        let mut listing = String::new();
        for entry in self.entries()? {
            let full = self.root.join(&entry.path);
            match entry.kind {
                EntryKind::Dir => listing.push_str(&format!("D {}\n", entry.path.display())),
                EntryKind::File => {
                    let digest = Digest::sha256_file(&full)
                        .with_context(|| format!("Failed to hash {}", full.display()))?;
                    listing.push_str(&format!("F {} {}\n", entry.path.display(), digest));
                }
                EntryKind::Symlink => {
                    let target = fs::read_link(&full)
                        .with_context(|| format!("Failed to read link {}", full.display()))?;
                    listing.push_str(&format!(
                        "L {} {}\n",
                        entry.path.display(),
                        target.display()
                    ));
                }
            }
        }
        Ok(Digest::sha256(listing.as_bytes()))
    }

    /// Digest of a single file in the context
    pub fn file_digest(&self, relative: &str) -> Result<Digest> {
        let path = self.root.join(relative);
        Digest::sha256_file(&path).with_context(|| format!("Failed to read {}", path.display()))
    }

    /// Copy one file into `dest_dir`, keeping its file name
    pub fn stage_file(&self, relative: &str, dest_dir: &Path) -> Result<PathBuf> {
        let source = self.root.join(relative);
        if !source.is_file() {
            anyhow::bail!("{} not found in build context", relative);
        }
        let name = source
            .file_name()
            .with_context(|| format!("{} has no file name", relative))?;
        fs::create_dir_all(dest_dir)
            .with_context(|| format!("Failed to create {}", dest_dir.display()))?;
        let dest = dest_dir.join(name);
        fs::copy(&source, &dest).with_context(|| format!("Failed to copy {}", relative))?;
        Ok(dest)
    }

    /// Copy the whole context into `dest_dir`, overwriting files already
    /// there. Returns the number of entries copied.
    pub fn stage_all(&self, dest_dir: &Path) -> Result<usize> {
        let entries = self.entries()?;
        fs::create_dir_all(dest_dir)
            .with_context(|| format!("Failed to create {}", dest_dir.display()))?;

        for entry in &entries {
            let source = self.root.join(&entry.path);
            let dest = dest_dir.join(&entry.path);
            match entry.kind {
                EntryKind::Dir => fs::create_dir_all(&dest)
                    .with_context(|| format!("Failed to create {}", dest.display()))?,
                EntryKind::File => {
                    if let Some(parent) = dest.parent() {
                        fs::create_dir_all(parent)
                            .with_context(|| format!("Failed to create {}", parent.display()))?;
                    }
                    fs::copy(&source, &dest)
                        .with_context(|| format!("Failed to copy {}", entry.path.display()))?;
                }
                EntryKind::Symlink => copy_symlink(&source, &dest)
                    .with_context(|| format!("Failed to copy link {}", entry.path.display()))?,
            }
        }

        Ok(entries.len())
    }

    /// Write the context as an uncompressed tar stream, followed by
    /// generated files (e.g. the rendered Dockerfile) that replace any
    /// context file of the same name.
    pub fn write_tar<W: Write>(&self, writer: W, generated: &[(&str, &str)]) -> Result<W> {
        let mut builder = tar::Builder::new(writer);
        builder.follow_symlinks(false);

        for entry in self.entries()? {
            let shadowed = generated
                .iter()
                .any(|(name, _)| Path::new(name) == entry.path.as_path());
            if shadowed {
                continue;
            }
            builder
                .append_path_with_name(self.root.join(&entry.path), &entry.path)
                .with_context(|| format!("Failed to archive {}", entry.path.display()))?;
        }

        for (name, content) in generated {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .with_context(|| format!("Failed to archive generated {}", name))?;
        }

        builder.into_inner().context("Failed to finish context archive")
    }
}

#[cfg(unix)]
fn copy_symlink(source: &Path, dest: &Path) -> std::io::Result<()> {
    let target = fs::read_link(source)?;
    if dest.symlink_metadata().is_ok() {
        fs::remove_file(dest)?;
    }
    std::os::unix::fs::symlink(target, dest)
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, dest: &Path) -> std::io::Result<()> {
    fs::copy(source, dest).map(|_| ())
}
