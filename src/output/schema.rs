//! ImageRecipe schema data structures
//!
//! This module defines the schema for the ImageRecipe format - a declarative
//! description of a Python bot image from which the ordered build plan is
//! lowered. Recipes are read from and written to YAML or JSON.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_WORKDIR: &str = "/app";
pub const DEFAULT_MANIFEST: &str = "requirements.txt";
pub const DEFAULT_DATA_DIR: &str = "/app/data";

fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

fn deserialize_null_default_version<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_else(default_version))
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_workdir() -> String {
    DEFAULT_WORKDIR.to_string()
}

/// Main ImageRecipe structure representing a complete bot image description
///
/// Every field has a default matching the canonical Python bot image, so a
/// recipe file only needs to state what differs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageRecipe {
    /// Schema version (e.g., "1.0")
    #[serde(deserialize_with = "deserialize_null_default_version")]
    pub version: String,
    /// Image name and default tag
    #[serde(deserialize_with = "deserialize_null_default")]
    pub metadata: RecipeMetadata,
    /// Pinned runtime base image
    #[serde(deserialize_with = "deserialize_null_default")]
    pub base: BaseImage,
    /// Resolution root for every relative path in the image
    #[serde(deserialize_with = "deserialize_null_default")]
    pub workdir: String,
    /// OS packages installed before Python dependencies (e.g., ["gcc"])
    #[serde(deserialize_with = "deserialize_null_default")]
    pub system_packages: Vec<String>,
    /// Python dependency manifest and installer
    #[serde(deserialize_with = "deserialize_null_default")]
    pub dependencies: DependencySpec,
    /// Application source staging
    #[serde(deserialize_with = "deserialize_null_default")]
    pub source: SourceSpec,
    /// Writable directories provisioned at build time
    #[serde(deserialize_with = "deserialize_null_default")]
    pub data_dirs: Vec<String>,
    /// Environment variables baked into the image
    #[serde(deserialize_with = "deserialize_null_default")]
    pub env: BTreeMap<String, String>,
    /// Process contract exposed to the orchestrator
    #[serde(deserialize_with = "deserialize_null_default")]
    pub runtime: RuntimeSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RecipeMetadata {
    /// Image repository name (e.g., "x-telegram-bot")
    #[serde(deserialize_with = "deserialize_null_default")]
    pub name: String,
    /// Tag applied when none is given on the command line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Base image reference split into repository and pinned tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseImage {
    #[serde(deserialize_with = "deserialize_null_default")]
    pub image: String,
    #[serde(deserialize_with = "deserialize_null_default")]
    pub tag: String,
}

impl Default for BaseImage {
    fn default() -> Self {
        Self {
            image: "python".to_string(),
            tag: "3.11-slim".to_string(),
        }
    }
}

impl BaseImage {
    /// Parse "image:tag". A reference without a tag keeps an empty tag so
    /// validation can reject it as unpinned.
    pub fn parse(reference: &str) -> Self {
        let reference = reference.trim();
        // A colon inside the last path segment separates the tag; earlier
        // colons belong to a registry port.
        let last_segment = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
        match reference[last_segment..].rfind(':') {
            Some(pos) => {
                let split = last_segment + pos;
                Self {
                    image: reference[..split].to_string(),
                    tag: reference[split + 1..].to_string(),
                }
            }
            None => Self {
                image: reference.to_string(),
                tag: String::new(),
            },
        }
    }

    pub fn reference(&self) -> String {
        if self.tag.is_empty() {
            self.image.clone()
        } else {
            format!("{}:{}", self.image, self.tag)
        }
    }

    /// True when the tag names a concrete version rather than a floating alias
    pub fn is_pinned(&self) -> bool {
        !self.tag.is_empty() && self.tag != "latest"
    }
}

impl fmt::Display for BaseImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencySpec {
    /// Manifest path relative to the build context
    #[serde(deserialize_with = "deserialize_null_default")]
    pub manifest: String,
    /// Installer argv prefix; the manifest flag is appended
    #[serde(deserialize_with = "deserialize_null_default")]
    pub installer: Vec<String>,
    /// Disable the installer's local package cache
    pub no_cache: bool,
}

impl Default for DependencySpec {
    fn default() -> Self {
        Self {
            manifest: DEFAULT_MANIFEST.to_string(),
            installer: vec!["pip".to_string(), "install".to_string()],
            no_cache: true,
        }
    }
}

impl DependencySpec {
    /// Full install argv, e.g. `pip install --no-cache-dir -r requirements.txt`
    pub fn install_argv(&self) -> Vec<String> {
        let mut argv = self.installer.clone();
        if self.no_cache {
            argv.push("--no-cache-dir".to_string());
        }
        argv.push("-r".to_string());
        argv.push(self.manifest.clone());
        argv
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSpec {
    /// Build context directory staged into the workdir
    #[serde(deserialize_with = "deserialize_null_default")]
    pub context: String,
    /// Glob patterns never staged (in addition to .dockerignore)
    #[serde(deserialize_with = "deserialize_null_default")]
    pub exclude: Vec<String>,
}

impl Default for SourceSpec {
    fn default() -> Self {
        Self {
            context: ".".to_string(),
            exclude: vec![".git".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSpec {
    /// Exec-form argv of the main process
    #[serde(deserialize_with = "deserialize_null_default")]
    pub entrypoint: Vec<String>,
    /// Ports to expose (none by default)
    #[serde(deserialize_with = "deserialize_null_default")]
    pub ports: Vec<u16>,
    /// Optional container health check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,
    /// Variables the orchestrator must supply at start (never baked)
    #[serde(deserialize_with = "deserialize_null_default")]
    pub required_env: Vec<String>,
}

impl Default for RuntimeSpec {
    fn default() -> Self {
        Self {
            entrypoint: vec!["python".to_string(), "main.py".to_string()],
            ports: vec![],
            healthcheck: None,
            required_env: vec![],
        }
    }
}

/// Container health check configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Healthcheck {
    /// Exec-form health check argv (e.g., ["python", "health_check.py"])
    #[serde(deserialize_with = "deserialize_null_default")]
    pub test: Vec<String>,
    /// Interval between health checks (e.g., "30s")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    /// Timeout for each health check (e.g., "10s")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// Number of consecutive failures before marking unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

impl Default for ImageRecipe {
    fn default() -> Self {
        Self::python_bot()
    }
}

impl ImageRecipe {
    /// The canonical bot image: slim Python 3.11, gcc for native wheels,
    /// requirements installed before the source is staged, `/app/data`
    /// provisioned, unbuffered output, and `python main.py` as the main process.
    pub fn python_bot() -> Self {
        let mut env = BTreeMap::new();
        env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
        env.insert("PYTHONPATH".to_string(), DEFAULT_WORKDIR.to_string());

        Self {
            version: default_version(),
            metadata: RecipeMetadata {
                name: "bot".to_string(),
                tag: Some("latest".to_string()),
                description: None,
            },
            base: BaseImage::default(),
            workdir: default_workdir(),
            system_packages: vec!["gcc".to_string()],
            dependencies: DependencySpec::default(),
            source: SourceSpec::default(),
            data_dirs: vec![DEFAULT_DATA_DIR.to_string()],
            env,
            runtime: RuntimeSpec::default(),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse ImageRecipe from YAML")
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse ImageRecipe from JSON")
    }

    /// Load a recipe file, choosing the parser by extension (`.json` or YAML)
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read recipe {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    /// Serialize the ImageRecipe to YAML format
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize ImageRecipe to YAML")
    }

    /// Image name with the recipe's default tag, e.g. "bot:latest"
    pub fn image_ref(&self) -> String {
        match &self.metadata.tag {
            Some(tag) if !tag.is_empty() => format!("{}:{}", self.metadata.name, tag),
            _ => format!("{}:latest", self.metadata.name),
        }
    }
}

fn format_list(items: &[String], limit: usize) -> String {
    if items.len() > limit {
        format!(
            "{} (and {} more)",
            items[..limit].join(", "),
            items.len() - limit
        )
    } else {
        items.join(", ")
    }
}

impl fmt::Display for ImageRecipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Image Recipe")?;
        writeln!(f, "============")?;
        writeln!(f, "Image:      {}", self.image_ref())?;
        writeln!(f, "Base:       {}", self.base)?;
        writeln!(f, "Workdir:    {}", self.workdir)?;
        if !self.system_packages.is_empty() {
            writeln!(f, "Packages:   {}", format_list(&self.system_packages, 3))?;
        }
        writeln!(f, "Manifest:   {}", self.dependencies.manifest)?;
        if !self.data_dirs.is_empty() {
            writeln!(f, "Data dirs:  {}", self.data_dirs.join(", "))?;
        }
        for (key, value) in &self.env {
            writeln!(f, "Env:        {}={}", key, value)?;
        }
        writeln!(f, "Entrypoint: {}", self.runtime.entrypoint.join(" "))?;
        if !self.runtime.ports.is_empty() {
            let ports: Vec<String> = self.runtime.ports.iter().map(|p| p.to_string()).collect();
            writeln!(f, "Ports:      {}", format_list(&ports, 5))?;
        }
        if let Some(ref healthcheck) = self.runtime.healthcheck {
            writeln!(f, "Healthcheck: {}", healthcheck.test.join(" "))?;
        }
        if !self.runtime.required_env.is_empty() {
            writeln!(
                f,
                "Runtime env: {}",
                format_list(&self.runtime.required_env, 4)
            )?;
        }
        Ok(())
    }
}
