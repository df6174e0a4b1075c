//! Build plan: the ordered directive list lowered from a recipe

use super::directive::{Directive, DirectiveKind};
use crate::output::schema::ImageRecipe;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildPlan {
    /// Image reference the build commits to, e.g. "bot:latest"
    pub image: String,
    pub directives: Vec<Directive>,
}

impl BuildPlan {
    /// Lower a recipe into directives. The order is fixed here and nowhere
    /// else: the manifest is staged and dependencies installed before the
    /// full source tree is copied, so a source-only change reuses the
    /// dependency layer.
    pub fn from_recipe(recipe: &ImageRecipe) -> Self {
        let mut directives = vec![
            Directive::SelectBase {
                image: recipe.base.clone(),
            },
            Directive::SetWorkdir {
                path: recipe.workdir.clone(),
            },
            Directive::InstallSystemPackages {
                packages: recipe.system_packages.clone(),
            },
            Directive::StageManifest {
                manifest: recipe.dependencies.manifest.clone(),
            },
            Directive::InstallDependencies {
                argv: recipe.dependencies.install_argv(),
            },
            Directive::StageSource {
                context: recipe.source.context.clone(),
                exclude: recipe.source.exclude.clone(),
            },
            Directive::ProvisionDataDir {
                paths: recipe.data_dirs.clone(),
            },
            Directive::SetEnv {
                vars: recipe.env.clone(),
            },
        ];

        if !recipe.runtime.ports.is_empty() {
            directives.push(Directive::Expose {
                ports: recipe.runtime.ports.clone(),
            });
        }
        if let Some(ref check) = recipe.runtime.healthcheck {
            directives.push(Directive::Healthcheck {
                check: check.clone(),
            });
        }

        directives.push(Directive::Entrypoint {
            argv: recipe.runtime.entrypoint.clone(),
        });

        Self {
            image: recipe.image_ref(),
            directives,
        }
    }

    /// Same plan, committed under a different image reference
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn kinds(&self) -> Vec<DirectiveKind> {
        self.directives.iter().map(Directive::kind).collect()
    }

    pub fn position(&self, kind: DirectiveKind) -> Option<usize> {
        self.directives.iter().position(|d| d.kind() == kind)
    }

    pub fn get(&self, kind: DirectiveKind) -> Option<&Directive> {
        self.directives.iter().find(|d| d.kind() == kind)
    }

    /// Working directory in effect at the end of the plan ("/" when unset)
    pub fn workdir(&self) -> &str {
        self.directives
            .iter()
            .rev()
            .find_map(|d| match d {
                Directive::SetWorkdir { path } => Some(path.as_str()),
                _ => None,
            })
            .unwrap_or("/")
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }
}

/// Check the dependency-layer ordering over a sequence of directive kinds:
/// stage-manifest, then install-dependencies, then stage-source. Returns a
/// description of the first violation.
pub fn cache_ordering_violation(kinds: &[DirectiveKind]) -> Option<String> {
    let position = |kind: DirectiveKind| kinds.iter().position(|k| *k == kind);

    let install = match position(DirectiveKind::InstallDependencies) {
        Some(pos) => pos,
        None => return Some("no dependency installation directive".to_string()),
    };
    let manifest = match position(DirectiveKind::StageManifest) {
        Some(pos) => pos,
        None => {
            return Some(
                "dependencies are installed without staging the manifest on its own first"
                    .to_string(),
            )
        }
    };
    if manifest > install {
        return Some("manifest is staged after dependencies are installed".to_string());
    }
    if let Some(source) = position(DirectiveKind::StageSource) {
        if source < install {
            return Some(
                "full source is staged before dependencies are installed; every source change would reinstall dependencies"
                    .to_string(),
            );
        }
    }
    None
}

impl fmt::Display for BuildPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Build plan for {}", self.image)?;
        for (i, directive) in self.directives.iter().enumerate() {
            writeln!(
                f,
                "  {:>2}. {:<24} {}",
                i + 1,
                directive.name(),
                directive.summary()
            )?;
        }
        Ok(())
    }
}
