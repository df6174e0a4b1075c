use crate::pipeline::directive::{Directive, DirectiveKind};
use crate::pipeline::plan::{cache_ordering_violation, BuildPlan};
use anyhow::Result;
use regex::Regex;

const SHELLS: &[&str] = &["sh", "/bin/sh", "bash", "/bin/bash", "/usr/bin/env"];

pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, plan: &BuildPlan) -> Result<()>;
}

pub struct RequiredFieldsRule;

impl ValidationRule for RequiredFieldsRule {
    fn name(&self) -> &'static str {
        "RequiredFields"
    }

    fn validate(&self, plan: &BuildPlan) -> Result<()> {
        if plan.image.is_empty() {
            anyhow::bail!("Image reference cannot be empty");
        }
        for directive in &plan.directives {
            match directive {
                Directive::SelectBase { image } if image.image.is_empty() => {
                    anyhow::bail!("Base image cannot be empty");
                }
                Directive::SetWorkdir { path } if path.is_empty() => {
                    anyhow::bail!("Working directory cannot be empty");
                }
                Directive::StageManifest { manifest } if manifest.is_empty() => {
                    anyhow::bail!("Dependency manifest path cannot be empty");
                }
                Directive::InstallDependencies { argv } if argv.is_empty() => {
                    anyhow::bail!("Dependency installer command cannot be empty");
                }
                Directive::StageSource { context, .. } if context.is_empty() => {
                    anyhow::bail!("Source context cannot be empty");
                }
                Directive::Entrypoint { argv } if argv.is_empty() => {
                    anyhow::bail!("Entrypoint cannot be empty");
                }
                _ => {}
            }
        }
        Ok(())
    }
}

pub struct DirectiveOrderRule;

impl ValidationRule for DirectiveOrderRule {
    fn name(&self) -> &'static str {
        "DirectiveOrder"
    }

    fn validate(&self, plan: &BuildPlan) -> Result<()> {
        let core: Vec<DirectiveKind> = plan
            .kinds()
            .into_iter()
            .filter(|k| DirectiveKind::CORE_ORDER.contains(k))
            .collect();
        if core != DirectiveKind::CORE_ORDER {
            let found: Vec<&str> = core.iter().map(|k| k.name()).collect();
            anyhow::bail!(
                "Core directives must appear once each in build order, got [{}]",
                found.join(", ")
            );
        }

        let env = plan.position(DirectiveKind::SetEnv).unwrap_or(0);
        let entrypoint = plan.position(DirectiveKind::Entrypoint).unwrap_or(0);
        for optional in [DirectiveKind::Expose, DirectiveKind::Healthcheck] {
            if let Some(pos) = plan.position(optional) {
                if pos < env || pos > entrypoint {
                    anyhow::bail!(
                        "Directive {} must be placed between set-env and entrypoint",
                        optional
                    );
                }
            }
        }
        Ok(())
    }
}

pub struct CacheOrderingRule;

impl ValidationRule for CacheOrderingRule {
    fn name(&self) -> &'static str {
        "CacheOrdering"
    }

    fn validate(&self, plan: &BuildPlan) -> Result<()> {
        if let Some(violation) = cache_ordering_violation(&plan.kinds()) {
            anyhow::bail!("{}", violation);
        }
        Ok(())
    }
}

pub struct PinnedBaseRule;

impl ValidationRule for PinnedBaseRule {
    fn name(&self) -> &'static str {
        "PinnedBase"
    }

    fn validate(&self, plan: &BuildPlan) -> Result<()> {
        if let Some(Directive::SelectBase { image }) = plan.get(DirectiveKind::SelectBase) {
            if !image.is_pinned() {
                anyhow::bail!(
                    "Base image '{}' must be pinned to a version, not a floating tag",
                    image
                );
            }
        }
        Ok(())
    }
}

pub struct AbsolutePathsRule;

impl ValidationRule for AbsolutePathsRule {
    fn name(&self) -> &'static str {
        "AbsolutePaths"
    }

    fn validate(&self, plan: &BuildPlan) -> Result<()> {
        for directive in &plan.directives {
            match directive {
                Directive::SetWorkdir { path } if !path.starts_with('/') => {
                    anyhow::bail!("Working directory '{}' must be absolute", path);
                }
                Directive::ProvisionDataDir { paths } => {
                    if let Some(path) = paths.iter().find(|p| !p.starts_with('/')) {
                        anyhow::bail!("Data directory '{}' must be absolute", path);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

pub struct ExecFormEntrypointRule;

impl ValidationRule for ExecFormEntrypointRule {
    fn name(&self) -> &'static str {
        "ExecFormEntrypoint"
    }

    fn validate(&self, plan: &BuildPlan) -> Result<()> {
        if let Some(Directive::Entrypoint { argv }) = plan.get(DirectiveKind::Entrypoint) {
            if let Some(first) = argv.first() {
                if SHELLS.contains(&first.as_str()) {
                    anyhow::bail!(
                        "Entrypoint runs through '{}'; the main process must be started directly",
                        first
                    );
                }
                if argv.len() == 1 && first.contains(' ') {
                    anyhow::bail!(
                        "Entrypoint '{}' looks like a shell string; give it as an argv list",
                        first
                    );
                }
            }
        }
        Ok(())
    }
}

pub struct ValidEnvKeysRule;

impl ValidationRule for ValidEnvKeysRule {
    fn name(&self) -> &'static str {
        "ValidEnvKeys"
    }

    fn validate(&self, plan: &BuildPlan) -> Result<()> {
        let key_re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex");
        if let Some(Directive::SetEnv { vars }) = plan.get(DirectiveKind::SetEnv) {
            if let Some(key) = vars.keys().find(|k| !key_re.is_match(k)) {
                anyhow::bail!("Invalid environment variable name '{}'", key);
            }
        }
        Ok(())
    }
}

/// The interpreter must flush output immediately and resolve imports from
/// the working directory
pub struct PythonRuntimeEnvRule;

impl ValidationRule for PythonRuntimeEnvRule {
    fn name(&self) -> &'static str {
        "PythonRuntimeEnv"
    }

    fn validate(&self, plan: &BuildPlan) -> Result<()> {
        let workdir = match plan.get(DirectiveKind::SetWorkdir) {
            Some(Directive::SetWorkdir { path }) => path.trim_end_matches('/'),
            _ => "",
        };
        let vars = match plan.get(DirectiveKind::SetEnv) {
            Some(Directive::SetEnv { vars }) => Some(vars),
            _ => None,
        };
        let get = |key: &str| vars.and_then(|v| v.get(key)).map(String::as_str);

        if get("PYTHONUNBUFFERED") != Some("1") {
            anyhow::bail!("PYTHONUNBUFFERED must be set to 1");
        }
        let on_path = get("PYTHONPATH")
            .map(|path| path.split(':').any(|p| p.trim_end_matches('/') == workdir))
            .unwrap_or(false);
        if !on_path {
            anyhow::bail!(
                "PYTHONPATH must include the working directory {}",
                if workdir.is_empty() { "/" } else { workdir }
            );
        }
        Ok(())
    }
}

pub struct ValidHealthcheckRule;

impl ValidationRule for ValidHealthcheckRule {
    fn name(&self) -> &'static str {
        "ValidHealthcheck"
    }

    fn validate(&self, plan: &BuildPlan) -> Result<()> {
        if let Some(Directive::Healthcheck { check }) = plan.get(DirectiveKind::Healthcheck) {
            if check.test.is_empty() {
                anyhow::bail!("Healthcheck command cannot be empty");
            }
        }
        if let Some(Directive::Expose { ports }) = plan.get(DirectiveKind::Expose) {
            if ports.contains(&0) {
                anyhow::bail!("Port 0 cannot be exposed");
            }
        }
        Ok(())
    }
}
