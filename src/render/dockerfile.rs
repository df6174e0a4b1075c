//! Dockerfile rendering
//!
//! Renders a [`BuildPlan`] as a Dockerfile whose instruction order is the
//! plan's directive order. Each directive maps to at most one instruction so
//! builder output can be traced back to the directive that produced it.

use crate::pipeline::directive::{Directive, DirectiveKind};
use crate::pipeline::plan::BuildPlan;
use std::fmt::Write as _;

/// One rendered instruction and the directive it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedInstruction {
    pub kind: DirectiveKind,
    pub text: String,
}

/// Exec-form JSON array, e.g. `["python", "main.py"]`
pub fn exec_form(argv: &[String]) -> String {
    let items: Vec<String> = argv
        .iter()
        .map(|arg| serde_json::to_string(arg).unwrap_or_else(|_| format!("\"{}\"", arg)))
        .collect();
    format!("[{}]", items.join(", "))
}

fn env_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\\' | '$' | '\''));
    if needs_quotes {
        serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
    } else {
        value.to_string()
    }
}

fn render_directive(directive: &Directive) -> Option<String> {
    match directive {
        Directive::SelectBase { image } => Some(format!("FROM {}", image)),
        Directive::SetWorkdir { path } => Some(format!("WORKDIR {}", path)),
        Directive::InstallSystemPackages { .. }
        | Directive::InstallDependencies { .. }
        | Directive::ProvisionDataDir { .. } => directive
            .shell_command()
            .map(|command| format!("RUN {}", command)),
        Directive::StageManifest { manifest } => Some(format!("COPY {} .", manifest)),
        Directive::StageSource { context, .. } => Some(format!("COPY {} .", context)),
        Directive::SetEnv { vars } if !vars.is_empty() => {
            let pairs: Vec<String> = vars
                .iter()
                .map(|(k, v)| format!("{}={}", k, env_value(v)))
                .collect();
            Some(format!("ENV {}", pairs.join(" \\\n    ")))
        }
        Directive::SetEnv { .. } => None,
        Directive::Expose { ports } => {
            let ports: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
            Some(format!("EXPOSE {}", ports.join(" ")))
        }
        Directive::Healthcheck { check } => {
            let mut line = String::from("HEALTHCHECK");
            if let Some(ref interval) = check.interval {
                let _ = write!(line, " --interval={}", interval);
            }
            if let Some(ref timeout) = check.timeout {
                let _ = write!(line, " --timeout={}", timeout);
            }
            if let Some(retries) = check.retries {
                let _ = write!(line, " --retries={}", retries);
            }
            let _ = write!(line, " CMD {}", exec_form(&check.test));
            Some(line)
        }
        Directive::Entrypoint { argv } => Some(format!("CMD {}", exec_form(argv))),
    }
}

/// Rendered instructions in plan order; no-op directives are skipped
pub fn render_instructions(plan: &BuildPlan) -> Vec<RenderedInstruction> {
    plan.directives
        .iter()
        .filter_map(|directive| {
            render_directive(directive).map(|text| RenderedInstruction {
                kind: directive.kind(),
                text,
            })
        })
        .collect()
}

/// Complete Dockerfile text
pub fn render(plan: &BuildPlan) -> String {
    let instructions = render_instructions(plan);
    let mut out = String::new();
    let mut previous: Option<DirectiveKind> = None;

    for instruction in instructions {
        // The manifest copy and its install stay visually grouped
        let grouped = previous == Some(DirectiveKind::StageManifest)
            && instruction.kind == DirectiveKind::InstallDependencies;
        if previous.is_some() && !grouped {
            out.push('\n');
        }
        out.push_str(&instruction.text);
        out.push('\n');
        previous = Some(instruction.kind);
    }

    out
}

/// `.dockerignore` content for the source-staging excludes
pub fn render_dockerignore(plan: &BuildPlan) -> Option<String> {
    match plan.get(DirectiveKind::StageSource) {
        Some(Directive::StageSource { exclude, .. }) if !exclude.is_empty() => {
            let mut out = exclude.join("\n");
            out.push('\n');
            Some(out)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::schema::{Healthcheck, ImageRecipe};

    #[test]
    fn test_render_canonical_plan() {
        let plan = BuildPlan::from_recipe(&ImageRecipe::python_bot());
        let dockerfile = render(&plan);

        let expected = "\
FROM python:3.11-slim

WORKDIR /app

RUN apt-get update && apt-get install -y gcc && rm -rf /var/lib/apt/lists/*

COPY requirements.txt .
RUN pip install --no-cache-dir -r requirements.txt

COPY . .

RUN mkdir -p /app/data

ENV PYTHONPATH=/app \\
    PYTHONUNBUFFERED=1

CMD [\"python\", \"main.py\"]
";
        assert_eq!(dockerfile, expected);
    }

    #[test]
    fn test_instruction_order_matches_plan() {
        let plan = BuildPlan::from_recipe(&ImageRecipe::python_bot());
        let kinds: Vec<DirectiveKind> = render_instructions(&plan).iter().map(|i| i.kind).collect();
        assert_eq!(kinds, DirectiveKind::CORE_ORDER.to_vec());
    }

    #[test]
    fn test_render_healthcheck_and_expose() {
        let mut recipe = ImageRecipe::python_bot();
        recipe.runtime.ports = vec![8080];
        recipe.runtime.healthcheck = Some(Healthcheck {
            test: vec!["python".to_string(), "health_check.py".to_string()],
            interval: Some("5m".to_string()),
            timeout: Some("30s".to_string()),
            retries: Some(3),
        });

        let dockerfile = render(&BuildPlan::from_recipe(&recipe));
        assert!(dockerfile.contains("EXPOSE 8080\n"));
        assert!(dockerfile.contains(
            "HEALTHCHECK --interval=5m --timeout=30s --retries=3 CMD [\"python\", \"health_check.py\"]"
        ));
        let health = dockerfile.find("HEALTHCHECK").unwrap();
        let cmd = dockerfile.find("CMD [\"python\", \"main.py\"]").unwrap();
        assert!(health < cmd);
    }

    #[test]
    fn test_env_values_with_spaces_are_quoted() {
        let mut recipe = ImageRecipe::python_bot();
        recipe
            .env
            .insert("GREETING".to_string(), "hello world".to_string());
        let dockerfile = render(&BuildPlan::from_recipe(&recipe));
        assert!(dockerfile.contains("GREETING=\"hello world\""));
    }

    #[test]
    fn test_no_system_packages_skips_run() {
        let mut recipe = ImageRecipe::python_bot();
        recipe.system_packages.clear();
        let dockerfile = render(&BuildPlan::from_recipe(&recipe));
        assert!(!dockerfile.contains("apt-get"));
    }

    #[test]
    fn test_dockerignore() {
        let plan = BuildPlan::from_recipe(&ImageRecipe::python_bot());
        assert_eq!(render_dockerignore(&plan).as_deref(), Some(".git\n"));
    }

    #[test]
    fn test_exec_form_escapes() {
        let argv = vec!["echo".to_string(), "say \"hi\"".to_string()];
        assert_eq!(exec_form(&argv), r#"["echo", "say \"hi\""]"#);
    }
}
