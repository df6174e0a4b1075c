//! Start-up variable checks
//!
//! Secrets such as bot tokens and API keys are supplied by the orchestrator
//! when the container starts, never baked into the image. Preflight reports
//! which of the recipe's required variables are missing from a given
//! environment before the bot is started.

use crate::extractors::env_file;
use crate::output::schema::ImageRecipe;
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreflightReport {
    /// Where the variables were read from
    pub source: String,
    pub present: Vec<String>,
    /// Unset or empty
    pub missing: Vec<String>,
    /// Required variables the recipe also bakes into the image
    pub baked: Vec<String>,
}

impl PreflightReport {
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty()
    }
}

impl fmt::Display for PreflightReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Runtime variables ({})", self.source)?;
        for name in &self.present {
            writeln!(f, "  ok       {}", name)?;
        }
        for name in &self.missing {
            writeln!(f, "  missing  {}", name)?;
        }
        for name in &self.baked {
            writeln!(f, "  warning: {} is baked into the image; supply it at start instead", name)?;
        }
        if self.is_ok() {
            writeln!(f, "All {} required variable(s) set", self.present.len())?;
        } else {
            writeln!(f, "{} required variable(s) missing", self.missing.len())?;
        }
        Ok(())
    }
}

/// Check the recipe's required variables against `vars`
pub fn check(
    recipe: &ImageRecipe,
    vars: &BTreeMap<String, String>,
    source: impl Into<String>,
) -> PreflightReport {
    let mut present = Vec::new();
    let mut missing = Vec::new();
    for name in &recipe.runtime.required_env {
        match vars.get(name) {
            Some(value) if !value.trim().is_empty() => present.push(name.clone()),
            _ => missing.push(name.clone()),
        }
    }
    let baked = recipe
        .runtime
        .required_env
        .iter()
        .filter(|name| recipe.env.contains_key(*name))
        .cloned()
        .collect();

    PreflightReport {
        source: source.into(),
        present,
        missing,
        baked,
    }
}

pub fn check_process_env(recipe: &ImageRecipe) -> PreflightReport {
    let vars: BTreeMap<String, String> = std::env::vars().collect();
    check(recipe, &vars, "process environment")
}

pub fn check_env_file(recipe: &ImageRecipe, path: &Path) -> Result<PreflightReport> {
    let vars = env_file::parse_file(path)?;
    Ok(check(recipe, &vars, path.display().to_string()))
}
