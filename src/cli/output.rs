//! Output formatting for multiple formats
//!
//! Every command result can be printed as JSON, YAML or human-readable text.
//!
//! # Example
//!
//! ```
//! use botpack::cli::output::{OutputFormat, OutputFormatter};
//! use botpack::{BuildPlan, ImageRecipe};
//!
//! let plan = BuildPlan::from_recipe(&ImageRecipe::python_bot());
//! let output = OutputFormatter::new(OutputFormat::Json).format(&plan).unwrap();
//! assert!(output.contains("\"select-base\""));
//! ```

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::{self, Display, Write as _};

use crate::backend::{BuildOutcome, DirectiveStatus};
use crate::config::BotpackConfig;
use crate::extractors::dockerfile::{LintReport, Severity};

/// Output format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// YAML format (human-friendly, version-control friendly)
    Yaml,
    /// Human-readable formatted text
    Human,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Serialize for json/yaml, `Display` for human output
    pub fn format<T: Serialize + Display>(&self, value: &T) -> Result<String> {
        match self.format {
            OutputFormat::Json => self.format_json(value),
            OutputFormat::Yaml => self.format_yaml(value),
            OutputFormat::Human => Ok(value.to_string()),
        }
    }

    pub fn format_lint(&self, report: &LintReport) -> Result<String> {
        match self.format {
            OutputFormat::Human => Ok(LintDisplay(report).to_string()),
            _ => self.format_serialized(report),
        }
    }

    pub fn format_build(&self, outcome: &BuildOutcome) -> Result<String> {
        match self.format {
            OutputFormat::Human => Ok(BuildDisplay(outcome).to_string()),
            _ => self.format_serialized(outcome),
        }
    }

    pub fn format_config(&self, config: &BotpackConfig) -> Result<String> {
        match self.format {
            OutputFormat::Human => Ok(config.to_string()),
            _ => self.format_serialized(&config.to_display_map()),
        }
    }

    fn format_serialized<T: Serialize>(&self, value: &T) -> Result<String> {
        match self.format {
            OutputFormat::Yaml => self.format_yaml(value),
            _ => self.format_json(value),
        }
    }

    fn format_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        serde_json::to_string_pretty(value).context("Failed to serialize output to JSON")
    }

    fn format_yaml<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        serde_yaml::to_string(value).context("Failed to serialize output to YAML")
    }
}

struct LintDisplay<'a>(&'a LintReport);

impl Display for LintDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        if report.findings.is_empty() {
            return writeln!(f, "{}: no issues found", report.path);
        }
        for finding in &report.findings {
            let location = match finding.line {
                Some(line) => format!("{}:{}", report.path, line),
                None => report.path.clone(),
            };
            writeln!(
                f,
                "{}: {} [{}] {}",
                location, finding.severity, finding.rule, finding.message
            )?;
        }
        writeln!(
            f,
            "{} error(s), {} warning(s)",
            report.count(Severity::Error),
            report.count(Severity::Warning)
        )
    }
}

struct BuildDisplay<'a>(&'a BuildOutcome);

impl Display for BuildDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = self.0;
        writeln!(f, "Built {} ({} backend)", outcome.image, outcome.backend)?;
        for record in &outcome.directives {
            let status = match record.status {
                DirectiveStatus::Cached => "CACHED",
                DirectiveStatus::Executed => "done",
            };
            let mut line = format!(
                "  {:>2}. {:<24} {:<6}",
                record.index,
                record.directive.name(),
                status
            );
            if record.status == DirectiveStatus::Executed && record.duration_ms > 0 {
                let _ = write!(line, " {}ms", record.duration_ms);
            }
            writeln!(f, "{}", line.trim_end())?;
        }
        writeln!(
            f,
            "{} executed, {} cached in {}ms",
            outcome.executed(),
            outcome.cached(),
            outcome.duration_ms
        )?;
        if !outcome.config.id.is_empty() {
            writeln!(f, "Image id: {}", outcome.config.id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DirectiveRecord, ImageConfig};
    use crate::extractors::dockerfile::lint_str;
    use crate::output::schema::ImageRecipe;
    use crate::pipeline::directive::DirectiveKind;
    use crate::pipeline::plan::BuildPlan;

    fn outcome() -> BuildOutcome {
        BuildOutcome {
            image: "bot:latest".to_string(),
            backend: "local".to_string(),
            config: ImageConfig {
                id: "sha256:abc".to_string(),
                ..Default::default()
            },
            directives: vec![
                DirectiveRecord {
                    index: 5,
                    directive: DirectiveKind::InstallDependencies,
                    status: DirectiveStatus::Cached,
                    duration_ms: 0,
                    layer: Some("sha256:def".to_string()),
                },
                DirectiveRecord {
                    index: 6,
                    directive: DirectiveKind::StageSource,
                    status: DirectiveStatus::Executed,
                    duration_ms: 12,
                    layer: Some("sha256:123".to_string()),
                },
            ],
            duration_ms: 40,
        }
    }

    #[test]
    fn test_format_plan_all_formats() {
        let plan = BuildPlan::from_recipe(&ImageRecipe::python_bot());

        let json = OutputFormatter::new(OutputFormat::Json).format(&plan).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["image"], "bot:latest");
        assert_eq!(parsed["directives"].as_array().unwrap().len(), 9);

        let yaml = OutputFormatter::new(OutputFormat::Yaml).format(&plan).unwrap();
        assert!(yaml.contains("directive: install-dependencies"));

        let human = OutputFormatter::new(OutputFormat::Human).format(&plan).unwrap();
        assert!(human.starts_with("Build plan for bot:latest"));
    }

    #[test]
    fn test_format_build_human() {
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_build(&outcome())
            .unwrap();
        assert!(output.contains("Built bot:latest (local backend)"));
        assert!(output.contains("install-dependencies"));
        assert!(output.contains("CACHED"));
        assert!(output.contains("1 executed, 1 cached"));
    }

    #[test]
    fn test_format_build_json() {
        let output = OutputFormatter::new(OutputFormat::Json)
            .format_build(&outcome())
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["directives"][0]["status"], "cached");
        assert_eq!(parsed["config"]["id"], "sha256:abc");
    }

    #[test]
    fn test_format_lint_human() {
        let report = LintReport {
            path: "Dockerfile".to_string(),
            findings: lint_str("FROM python:latest\nCOPY . .\nRUN pip install -r requirements.txt\nCMD python main.py\n"),
        };
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_lint(&report)
            .unwrap();
        assert!(output.contains("Dockerfile:4: error [ExecFormEntrypoint]"));
        assert!(output.contains("error(s)"));

        let clean = LintReport {
            path: "Dockerfile".to_string(),
            findings: vec![],
        };
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_lint(&clean)
            .unwrap();
        assert_eq!(output, "Dockerfile: no issues found\n");
    }
}
