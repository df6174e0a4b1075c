//! Dockerfile parsing and linting
//!
//! Parses an existing Dockerfile into instructions, classifies each one as a
//! build directive where possible, and reports violations of the same
//! invariants the build plan validator enforces.

use crate::pipeline::directive::{DirectiveKind, APT_LISTS_DIR};
use crate::pipeline::plan::cache_ordering_violation;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

const MANIFEST_FILES: &[&str] = &[
    "requirements.txt",
    "requirements.in",
    "pyproject.toml",
    "poetry.lock",
    "setup.py",
    "setup.cfg",
    "Pipfile",
    "Pipfile.lock",
    "uv.lock",
];

/// A logical Dockerfile instruction (continuation lines joined)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// 1-based line the instruction starts on
    pub line: usize,
    /// Upper-cased keyword, e.g. "RUN"
    pub keyword: String,
    pub args: String,
}

impl Instruction {
    /// Classify the instruction as one of the build directives
    pub fn directive_kind(&self) -> Option<DirectiveKind> {
        match self.keyword.as_str() {
            "FROM" => Some(DirectiveKind::SelectBase),
            "WORKDIR" => Some(DirectiveKind::SetWorkdir),
            "ENV" => Some(DirectiveKind::SetEnv),
            "EXPOSE" => Some(DirectiveKind::Expose),
            "HEALTHCHECK" => Some(DirectiveKind::Healthcheck),
            "CMD" | "ENTRYPOINT" => Some(DirectiveKind::Entrypoint),
            "COPY" | "ADD" => Some(classify_copy(&self.args)),
            "RUN" => classify_run(&self.args),
            _ => None,
        }
    }

    fn is_exec_form(&self) -> bool {
        self.args.trim_start().starts_with('[')
    }
}

fn classify_copy(args: &str) -> DirectiveKind {
    let operands: Vec<&str> = args
        .split_whitespace()
        .filter(|token| !token.starts_with("--"))
        .collect();
    let sources = match operands.split_last() {
        Some((_, sources)) if !sources.is_empty() => sources,
        _ => return DirectiveKind::StageSource,
    };
    let all_manifests = sources.iter().all(|source| {
        let name = source.trim_start_matches("./");
        MANIFEST_FILES.contains(&name) || (name.starts_with("requirements") && name.ends_with(".txt"))
    });
    if all_manifests {
        DirectiveKind::StageManifest
    } else {
        DirectiveKind::StageSource
    }
}

fn classify_run(args: &str) -> Option<DirectiveKind> {
    let dependency_re =
        Regex::new(r"\b(pip3?|uv pip|poetry|pipenv)\s+(install|sync)\b").expect("valid regex");
    let system_re =
        Regex::new(r"\b(apt-get|apt|apk|yum|dnf)\s+(install|add)\b").expect("valid regex");

    if dependency_re.is_match(args) {
        Some(DirectiveKind::InstallDependencies)
    } else if system_re.is_match(args) {
        Some(DirectiveKind::InstallSystemPackages)
    } else if args.contains("mkdir") {
        Some(DirectiveKind::ProvisionDataDir)
    } else {
        None
    }
}

/// Parse Dockerfile text into logical instructions
pub fn parse(content: &str) -> Vec<Instruction> {
    let mut instructions = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if pending.is_none() && (line.is_empty() || line.starts_with('#')) {
            continue;
        }
        // Comment lines inside a continuation are dropped by the builder too
        if pending.is_some() && line.starts_with('#') {
            continue;
        }

        let (continues, body) = match line.strip_suffix('\\') {
            Some(body) => (true, body.trim_end()),
            None => (false, line),
        };

        let (start, mut text) = pending.take().unwrap_or((idx + 1, String::new()));
        if !text.is_empty() && !body.is_empty() {
            text.push(' ');
        }
        text.push_str(body);

        if continues {
            pending = Some((start, text));
        } else if let Some(instruction) = split_instruction(start, &text) {
            instructions.push(instruction);
        }
    }

    if let Some((start, text)) = pending {
        if let Some(instruction) = split_instruction(start, &text) {
            instructions.push(instruction);
        }
    }

    instructions
}

fn split_instruction(line: usize, text: &str) -> Option<Instruction> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let (keyword, args) = match text.split_once(char::is_whitespace) {
        Some((keyword, args)) => (keyword, args.trim()),
        None => (text, ""),
    };
    Some(Instruction {
        line,
        keyword: keyword.to_uppercase(),
        args: args.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintFinding {
    pub rule: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub message: String,
}

impl LintFinding {
    fn new(rule: &str, severity: Severity, line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            severity,
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LintReport {
    pub path: String,
    pub findings: Vec<LintFinding>,
}

impl LintReport {
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }
}

/// Lint Dockerfile text
pub fn lint_str(content: &str) -> Vec<LintFinding> {
    let instructions = parse(content);
    let mut findings = Vec::new();

    // Only the final stage ends up in the image
    let stage_start = instructions
        .iter()
        .rposition(|i| i.keyword == "FROM")
        .unwrap_or(0);
    let stage = &instructions[stage_start..];

    check_base(stage, &mut findings);
    check_ordering(stage, &mut findings);
    check_entrypoint(stage, &mut findings);
    check_run_hygiene(stage, &mut findings);
    check_unbuffered(stage, &mut findings);

    findings.sort_by_key(|f| (std::cmp::Reverse(f.severity), f.line));
    findings
}

/// Lint a Dockerfile on disk
pub fn lint_file(path: &Path) -> Result<LintReport> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read Dockerfile {}", path.display()))?;
    Ok(LintReport {
        path: path.display().to_string(),
        findings: lint_str(&content),
    })
}

fn check_base(stage: &[Instruction], findings: &mut Vec<LintFinding>) {
    let Some(from) = stage.iter().find(|i| i.keyword == "FROM") else {
        findings.push(LintFinding::new(
            "RequiredFields",
            Severity::Error,
            None,
            "No FROM instruction",
        ));
        return;
    };

    let image = from
        .args
        .split_whitespace()
        .find(|token| !token.starts_with("--"))
        .unwrap_or("");
    if image.contains('@') {
        return;
    }
    let base = crate::output::schema::BaseImage::parse(image);
    if !base.is_pinned() {
        findings.push(LintFinding::new(
            "PinnedBase",
            Severity::Warning,
            Some(from.line),
            format!("Base image '{}' is not pinned to a version", image),
        ));
    }
}

fn check_ordering(stage: &[Instruction], findings: &mut Vec<LintFinding>) {
    let classified: Vec<(DirectiveKind, usize)> = stage
        .iter()
        .filter_map(|i| i.directive_kind().map(|kind| (kind, i.line)))
        .collect();

    let Some(&(_, install_line)) = classified
        .iter()
        .find(|(kind, _)| *kind == DirectiveKind::InstallDependencies)
    else {
        findings.push(LintFinding::new(
            "CacheOrdering",
            Severity::Warning,
            None,
            "No dependency installation found",
        ));
        return;
    };

    let kinds: Vec<DirectiveKind> = classified.iter().map(|(kind, _)| *kind).collect();
    if let Some(violation) = cache_ordering_violation(&kinds) {
        findings.push(LintFinding::new(
            "CacheOrdering",
            Severity::Error,
            Some(install_line),
            violation,
        ));
    }
}

fn check_entrypoint(stage: &[Instruction], findings: &mut Vec<LintFinding>) {
    let Some(last) = stage
        .iter()
        .rev()
        .find(|i| i.keyword == "CMD" || i.keyword == "ENTRYPOINT")
    else {
        findings.push(LintFinding::new(
            "ExecFormEntrypoint",
            Severity::Error,
            None,
            "No CMD or ENTRYPOINT; the image has no main process",
        ));
        return;
    };

    if !last.is_exec_form() {
        findings.push(LintFinding::new(
            "ExecFormEntrypoint",
            Severity::Error,
            Some(last.line),
            format!(
                "{} uses shell form; signals go to /bin/sh instead of the main process",
                last.keyword
            ),
        ));
    }
}

fn check_run_hygiene(stage: &[Instruction], findings: &mut Vec<LintFinding>) {
    for instruction in stage.iter().filter(|i| i.keyword == "RUN") {
        match classify_run(&instruction.args) {
            Some(DirectiveKind::InstallSystemPackages)
                if instruction.args.contains("apt-get") && !instruction.args.contains(APT_LISTS_DIR) =>
            {
                findings.push(LintFinding::new(
                    "AptListsRemoved",
                    Severity::Warning,
                    Some(instruction.line),
                    format!("apt package lists are left in the layer; remove {}/*", APT_LISTS_DIR),
                ));
            }
            Some(DirectiveKind::InstallDependencies)
                if instruction.args.contains("pip") && !instruction.args.contains("--no-cache-dir") =>
            {
                findings.push(LintFinding::new(
                    "PipNoCache",
                    Severity::Warning,
                    Some(instruction.line),
                    "pip install keeps its download cache; add --no-cache-dir",
                ));
            }
            _ => {}
        }
    }
}

fn check_unbuffered(stage: &[Instruction], findings: &mut Vec<LintFinding>) {
    let unbuffered_re =
        Regex::new(r#"\bPYTHONUNBUFFERED(?:=|\s+)["']?1["']?(?:\s|$)"#).expect("valid regex");
    let is_set = stage
        .iter()
        .any(|i| i.keyword == "ENV" && unbuffered_re.is_match(&i.args));
    if !is_set {
        findings.push(LintFinding::new(
            "UnbufferedOutput",
            Severity::Warning,
            None,
            "PYTHONUNBUFFERED=1 is not set; log lines may be delayed",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r#"
FROM python:3.11-slim

WORKDIR /app

# toolchain for native wheels
RUN apt-get update && apt-get install -y gcc \
    && rm -rf /var/lib/apt/lists/*

COPY requirements.txt .
RUN pip install --no-cache-dir -r requirements.txt

COPY . .

RUN mkdir -p /app/data

ENV PYTHONUNBUFFERED=1
ENV PYTHONPATH=/app

CMD ["python", "main.py"]
"#;

    #[test]
    fn test_parse_joins_continuations() {
        let instructions = parse(GOOD);
        assert_eq!(instructions.len(), 10);
        assert_eq!(instructions[0].keyword, "FROM");
        assert_eq!(instructions[0].line, 2);
        assert_eq!(instructions[2].keyword, "RUN");
        assert_eq!(instructions[2].line, 7);
        assert!(instructions[2].args.ends_with("rm -rf /var/lib/apt/lists/*"));
    }

    #[test]
    fn test_classification() {
        let kinds: Vec<Option<DirectiveKind>> =
            parse(GOOD).iter().map(Instruction::directive_kind).collect();
        assert_eq!(
            kinds,
            vec![
                Some(DirectiveKind::SelectBase),
                Some(DirectiveKind::SetWorkdir),
                Some(DirectiveKind::InstallSystemPackages),
                Some(DirectiveKind::StageManifest),
                Some(DirectiveKind::InstallDependencies),
                Some(DirectiveKind::StageSource),
                Some(DirectiveKind::ProvisionDataDir),
                Some(DirectiveKind::SetEnv),
                Some(DirectiveKind::SetEnv),
                Some(DirectiveKind::Entrypoint),
            ]
        );
    }

    #[test]
    fn test_good_dockerfile_is_clean() {
        assert!(lint_str(GOOD).is_empty(), "{:?}", lint_str(GOOD));
    }

    #[test]
    fn test_source_copied_before_install() {
        let content = r#"
FROM python:3.11-slim
WORKDIR /app
COPY . .
RUN pip install --no-cache-dir -r requirements.txt
ENV PYTHONUNBUFFERED=1
CMD ["python", "main.py"]
"#;
        let findings = lint_str(content);
        let ordering = findings
            .iter()
            .find(|f| f.rule == "CacheOrdering")
            .unwrap();
        assert_eq!(ordering.severity, Severity::Error);
        assert_eq!(ordering.line, Some(5));
    }

    #[test]
    fn test_shell_form_cmd_and_floating_base() {
        let content = r#"
FROM python:latest
COPY requirements.txt .
RUN pip install -r requirements.txt
COPY . .
CMD python main.py
"#;
        let findings = lint_str(content);
        let rules: Vec<&str> = findings.iter().map(|f| f.rule.as_str()).collect();
        assert!(rules.contains(&"ExecFormEntrypoint"));
        assert!(rules.contains(&"PinnedBase"));
        assert!(rules.contains(&"PipNoCache"));
        assert!(rules.contains(&"UnbufferedOutput"));
        // errors sort first
        assert_eq!(findings[0].severity, Severity::Error);
    }

    #[test]
    fn test_apt_lists_kept() {
        let content = "FROM python:3.11-slim\nRUN apt-get update && apt-get install -y gcc\nCMD [\"python\"]\n";
        let findings = lint_str(content);
        assert!(findings.iter().any(|f| f.rule == "AptListsRemoved" && f.line == Some(2)));
    }

    #[test]
    fn test_only_final_stage_is_linted() {
        let content = r#"
FROM python:latest AS builder
RUN pip wheel -r requirements.txt
FROM python:3.11-slim@sha256:abcdef
COPY requirements.txt .
RUN pip install --no-cache-dir -r requirements.txt
COPY . .
ENV PYTHONUNBUFFERED=1
ENTRYPOINT ["python", "main.py"]
"#;
        assert!(lint_str(content).is_empty());
    }

    #[test]
    fn test_copy_flags_are_ignored() {
        assert_eq!(
            classify_copy("--chown=app:app requirements.txt ./"),
            DirectiveKind::StageManifest
        );
        assert_eq!(classify_copy("--chown=app:app . ."), DirectiveKind::StageSource);
        assert_eq!(
            classify_copy("requirements-dev.txt /app/"),
            DirectiveKind::StageManifest
        );
    }

    #[test]
    fn test_lint_file_missing() {
        assert!(lint_file(Path::new("/nonexistent/Dockerfile")).is_err());
    }
}
