//! Build directives
//!
//! A directive is one ordered instruction of the image build. The nine core
//! kinds always appear, in the order of [`DirectiveKind::CORE_ORDER`]; `Expose`
//! and `Healthcheck` are optional metadata placed between `SetEnv` and
//! `Entrypoint`.

use crate::output::schema::{BaseImage, Healthcheck};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Directory the OS package manager keeps its index metadata in
pub const APT_LISTS_DIR: &str = "/var/lib/apt/lists";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DirectiveKind {
    SelectBase,
    SetWorkdir,
    InstallSystemPackages,
    StageManifest,
    InstallDependencies,
    StageSource,
    ProvisionDataDir,
    SetEnv,
    Expose,
    Healthcheck,
    Entrypoint,
}

impl DirectiveKind {
    pub const CORE_ORDER: [DirectiveKind; 9] = [
        DirectiveKind::SelectBase,
        DirectiveKind::SetWorkdir,
        DirectiveKind::InstallSystemPackages,
        DirectiveKind::StageManifest,
        DirectiveKind::InstallDependencies,
        DirectiveKind::StageSource,
        DirectiveKind::ProvisionDataDir,
        DirectiveKind::SetEnv,
        DirectiveKind::Entrypoint,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DirectiveKind::SelectBase => "select-base",
            DirectiveKind::SetWorkdir => "set-workdir",
            DirectiveKind::InstallSystemPackages => "install-system-packages",
            DirectiveKind::StageManifest => "stage-manifest",
            DirectiveKind::InstallDependencies => "install-dependencies",
            DirectiveKind::StageSource => "stage-source",
            DirectiveKind::ProvisionDataDir => "provision-data-dir",
            DirectiveKind::SetEnv => "set-env",
            DirectiveKind::Expose => "expose",
            DirectiveKind::Healthcheck => "healthcheck",
            DirectiveKind::Entrypoint => "entrypoint",
        }
    }

    /// Whether executing the directive changes the image filesystem (and so
    /// produces a cacheable layer) rather than only the image config
    pub fn mutates_filesystem(&self) -> bool {
        matches!(
            self,
            DirectiveKind::SetWorkdir
                | DirectiveKind::InstallSystemPackages
                | DirectiveKind::StageManifest
                | DirectiveKind::InstallDependencies
                | DirectiveKind::StageSource
                | DirectiveKind::ProvisionDataDir
        )
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "directive", rename_all = "kebab-case")]
pub enum Directive {
    SelectBase { image: BaseImage },
    SetWorkdir { path: String },
    InstallSystemPackages { packages: Vec<String> },
    StageManifest { manifest: String },
    InstallDependencies { argv: Vec<String> },
    StageSource { context: String, exclude: Vec<String> },
    ProvisionDataDir { paths: Vec<String> },
    SetEnv { vars: BTreeMap<String, String> },
    Expose { ports: Vec<u16> },
    Healthcheck { check: Healthcheck },
    Entrypoint { argv: Vec<String> },
}

impl Directive {
    pub fn kind(&self) -> DirectiveKind {
        match self {
            Directive::SelectBase { .. } => DirectiveKind::SelectBase,
            Directive::SetWorkdir { .. } => DirectiveKind::SetWorkdir,
            Directive::InstallSystemPackages { .. } => DirectiveKind::InstallSystemPackages,
            Directive::StageManifest { .. } => DirectiveKind::StageManifest,
            Directive::InstallDependencies { .. } => DirectiveKind::InstallDependencies,
            Directive::StageSource { .. } => DirectiveKind::StageSource,
            Directive::ProvisionDataDir { .. } => DirectiveKind::ProvisionDataDir,
            Directive::SetEnv { .. } => DirectiveKind::SetEnv,
            Directive::Expose { .. } => DirectiveKind::Expose,
            Directive::Healthcheck { .. } => DirectiveKind::Healthcheck,
            Directive::Entrypoint { .. } => DirectiveKind::Entrypoint,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Shell command RUN-type directives execute inside the image, `None`
    /// for the rest
    pub fn shell_command(&self) -> Option<String> {
        match self {
            Directive::InstallSystemPackages { packages } if !packages.is_empty() => Some(format!(
                "apt-get update && apt-get install -y {} && rm -rf {}/*",
                packages.join(" "),
                APT_LISTS_DIR
            )),
            Directive::InstallDependencies { argv } => Some(argv.join(" ")),
            Directive::ProvisionDataDir { paths } if !paths.is_empty() => {
                Some(format!("mkdir -p {}", paths.join(" ")))
            }
            _ => None,
        }
    }

    /// Stable description of the directive's declared inputs. File content
    /// digests are mixed in separately by the layer cache.
    pub fn fingerprint(&self) -> String {
        // Struct fields serialize in declaration order and env is a BTreeMap,
        // so the JSON form is deterministic.
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }

    /// One-line summary used by progress output and plan display
    pub fn summary(&self) -> String {
        match self {
            Directive::SelectBase { image } => format!("base {}", image),
            Directive::SetWorkdir { path } => format!("workdir {}", path),
            Directive::InstallSystemPackages { packages } => {
                format!("install {}", packages.join(" "))
            }
            Directive::StageManifest { manifest } => format!("copy {}", manifest),
            Directive::InstallDependencies { argv } => argv.join(" "),
            Directive::StageSource { context, .. } => format!("copy {} (full source)", context),
            Directive::ProvisionDataDir { paths } => format!("mkdir -p {}", paths.join(" ")),
            Directive::SetEnv { vars } => vars
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(" "),
            Directive::Expose { ports } => ports
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(" "),
            Directive::Healthcheck { check } => check.test.join(" "),
            Directive::Entrypoint { argv } => argv.join(" "),
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.summary())
    }
}
