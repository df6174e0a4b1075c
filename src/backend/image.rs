//! Image configuration as committed by a backend

use crate::cache::Digest;
use crate::output::schema::Healthcheck;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Runtime configuration of a built image: what the container runtime reads
/// when it starts the bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ImageConfig {
    /// Content id ("sha256:..."), empty until the image is committed
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub working_dir: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Full argv of the main process
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub exposed_ports: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,
    /// Layer keys of the filesystem directives, in build order
    #[serde(default)]
    pub layers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

impl ImageConfig {
    /// Content id over everything except the id, tag and timestamp, so
    /// rebuilding identical inputs yields the same id.
    pub fn compute_id(&self) -> Digest {
        let mut canonical = self.clone();
        canonical.id = String::new();
        canonical.tag = String::new();
        canonical.created = None;
        let json = serde_json::to_string(&canonical).unwrap_or_default();
        Digest::sha256(json.as_bytes())
    }

    /// `KEY=VALUE` list in the form container runtimes use
    pub fn env_list(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }

    /// Parse a `KEY=VALUE` list; entries without `=` map to an empty value
    pub fn env_from_list(list: &[String]) -> BTreeMap<String, String> {
        list.iter()
            .map(|entry| match entry.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (entry.clone(), String::new()),
            })
            .collect()
    }
}

impl fmt::Display for ImageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Image:       {}", self.tag)?;
        if !self.id.is_empty() {
            writeln!(f, "Id:          {}", self.id)?;
        }
        if !self.base.is_empty() {
            writeln!(f, "Base:        {}", self.base)?;
        }
        writeln!(f, "Workdir:     {}", self.working_dir)?;
        writeln!(f, "Entrypoint:  {:?}", self.entrypoint)?;
        if !self.env.is_empty() {
            writeln!(f, "Env:")?;
            for entry in self.env_list() {
                writeln!(f, "  {}", entry)?;
            }
        }
        if !self.exposed_ports.is_empty() {
            let ports: Vec<String> = self.exposed_ports.iter().map(|p| p.to_string()).collect();
            writeln!(f, "Ports:       {}", ports.join(", "))?;
        }
        if !self.layers.is_empty() {
            writeln!(f, "Layers:      {}", self.layers.len())?;
        }
        if let Some(created) = self.created {
            writeln!(f, "Created:     {}", created.to_rfc3339())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ImageConfig {
        let mut env = BTreeMap::new();
        env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
        env.insert("PYTHONPATH".to_string(), "/app".to_string());
        ImageConfig {
            tag: "bot:latest".to_string(),
            base: "python:3.11-slim".to_string(),
            working_dir: "/app".to_string(),
            env,
            entrypoint: vec!["python".to_string(), "main.py".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_id_ignores_tag_and_timestamp() {
        let a = config();
        let mut b = config();
        b.tag = "bot:v2".to_string();
        b.created = Some(Utc::now());
        assert_eq!(a.compute_id(), b.compute_id());

        b.env.insert("EXTRA".to_string(), "1".to_string());
        assert_ne!(a.compute_id(), b.compute_id());
    }

    #[test]
    fn test_env_list_roundtrip() {
        let config = config();
        let list = config.env_list();
        assert_eq!(list, vec!["PYTHONPATH=/app", "PYTHONUNBUFFERED=1"]);
        assert_eq!(ImageConfig::env_from_list(&list), config.env);
        assert_eq!(
            ImageConfig::env_from_list(&["FLAG".to_string()]).get("FLAG"),
            Some(&String::new())
        );
    }

    #[test]
    fn test_display() {
        let output = config().to_string();
        assert!(output.contains("Image:       bot:latest"));
        assert!(output.contains("PYTHONUNBUFFERED=1"));
        assert!(output.contains("Entrypoint:  [\"python\", \"main.py\"]"));
    }
}
