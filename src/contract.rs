//! Runtime contract of a built image
//!
//! What the orchestrator relies on when it starts the bot: the baked
//! environment, a deterministic exec-form main process, and writable data
//! directories.

use crate::backend::ImageConfig;
use crate::output::schema::ImageRecipe;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

const SHELLS: &[&str] = &["sh", "/bin/sh", "bash", "/bin/bash", "/usr/bin/env"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContractCheck {
    Environment,
    Entrypoint,
    DataDirectory,
}

impl fmt::Display for ContractCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContractCheck::Environment => "environment",
            ContractCheck::Entrypoint => "entrypoint",
            ContractCheck::DataDirectory => "data-directory",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub check: ContractCheck,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractReport {
    pub image: String,
    /// Whether data directories could be checked on disk
    pub filesystem_checked: bool,
    pub violations: Vec<Violation>,
}

impl ContractReport {
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }
}

impl fmt::Display for ContractReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            writeln!(f, "{}: runtime contract satisfied", self.image)?;
        } else {
            writeln!(
                f,
                "{}: {} contract violation(s)",
                self.image,
                self.violations.len()
            )?;
            for violation in &self.violations {
                writeln!(f, "  [{}] {}", violation.check, violation.message)?;
            }
        }
        if !self.filesystem_checked {
            writeln!(f, "  (data directories not checked: image filesystem not available)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeContract {
    pub workdir: String,
    pub env: BTreeMap<String, String>,
    pub entrypoint: Vec<String>,
    pub data_dirs: Vec<String>,
}

impl Default for RuntimeContract {
    fn default() -> Self {
        Self::from_recipe(&ImageRecipe::python_bot())
    }
}

impl RuntimeContract {
    /// Contract of the image a recipe builds. `PYTHONUNBUFFERED=1` and a
    /// `PYTHONPATH` of the working directory are always part of it; a recipe
    /// can only override their values.
    pub fn from_recipe(recipe: &ImageRecipe) -> Self {
        let mut env = recipe.env.clone();
        env.entry("PYTHONUNBUFFERED".to_string())
            .or_insert_with(|| "1".to_string());
        env.entry("PYTHONPATH".to_string())
            .or_insert_with(|| recipe.workdir.clone());

        Self {
            workdir: recipe.workdir.clone(),
            env,
            entrypoint: recipe.runtime.entrypoint.clone(),
            data_dirs: recipe.data_dirs.clone(),
        }
    }

    /// Check a built image. Data directories are only checked when the
    /// image's root filesystem is available on disk.
    pub fn check(&self, config: &ImageConfig, rootfs: Option<&Path>) -> ContractReport {
        let mut violations = Vec::new();

        for (key, expected) in &self.env {
            match config.env.get(key) {
                Some(actual) if actual == expected => {}
                Some(actual) => violations.push(Violation {
                    check: ContractCheck::Environment,
                    message: format!("{} is '{}', expected '{}'", key, actual, expected),
                }),
                None => violations.push(Violation {
                    check: ContractCheck::Environment,
                    message: format!("{} is not set in the image", key),
                }),
            }
        }

        if let Some(first) = config.entrypoint.first() {
            if SHELLS.contains(&first.as_str()) {
                violations.push(Violation {
                    check: ContractCheck::Entrypoint,
                    message: format!(
                        "main process runs through a shell ({:?}); signals will not reach it",
                        config.entrypoint
                    ),
                });
            }
        }
        if config.entrypoint != self.entrypoint {
            violations.push(Violation {
                check: ContractCheck::Entrypoint,
                message: format!(
                    "main process is {:?}, expected {:?}",
                    config.entrypoint, self.entrypoint
                ),
            });
        }

        if let Some(rootfs) = rootfs {
            for dir in &self.data_dirs {
                if let Some(message) = check_writable_dir(&resolve(rootfs, &self.workdir, dir)) {
                    violations.push(Violation {
                        check: ContractCheck::DataDirectory,
                        message: format!("{}: {}", dir, message),
                    });
                }
            }
        }

        ContractReport {
            image: config.tag.clone(),
            filesystem_checked: rootfs.is_some(),
            violations,
        }
    }
}

fn resolve(rootfs: &Path, workdir: &str, dir: &str) -> PathBuf {
    let image_path = Path::new(workdir).join(dir);
    let relative: PathBuf = image_path
        .components()
        .filter(|c| matches!(c, std::path::Component::Normal(_)))
        .collect();
    rootfs.join(relative)
}

/// `None` when `dir` exists and accepts a new file
fn check_writable_dir(dir: &Path) -> Option<String> {
    if !dir.is_dir() {
        return Some("does not exist".to_string());
    }
    let probe = dir.join(format!(".botpack-probe-{}", uuid::Uuid::new_v4()));
    match fs::write(&probe, b"") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            None
        }
        Err(e) => Some(format!("not writable ({})", e)),
    }
}
