//! Build error taxonomy
//!
//! Every failure that can abort a build, tagged with the directive it
//! happened in so the caller can report where the build stopped.

use crate::cache::CacheError;
use crate::pipeline::directive::DirectiveKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Build plan is invalid: {0}")]
    Validation(String),

    #[error("Base image {reference} could not be resolved: {message}")]
    BaseImage { reference: String, message: String },

    #[error("System package installation failed: {0}")]
    PackageInstall(String),

    #[error("Dependency installation failed: {0}")]
    DependencyInstall(String),

    #[error("Copying {path} into the image failed: {message}")]
    SourceCopy {
        directive: DirectiveKind,
        path: String,
        message: String,
    },

    #[error("Provisioning directory {path} failed: {message}")]
    DirectoryProvision { path: String, message: String },

    #[error("Directive {directive} failed: {message}")]
    Directive {
        directive: DirectiveKind,
        message: String,
    },

    #[error("Layer cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Image store error: {0}")]
    Store(String),

    #[error("Docker error: {0}")]
    Docker(String),
}

impl BuildError {
    /// Error for a directive whose command or file operation failed
    pub fn directive_failed(kind: DirectiveKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            DirectiveKind::InstallSystemPackages => BuildError::PackageInstall(message),
            DirectiveKind::InstallDependencies => BuildError::DependencyInstall(message),
            directive => BuildError::Directive { directive, message },
        }
    }

    /// The directive the build stopped at, when known
    pub fn directive(&self) -> Option<DirectiveKind> {
        match self {
            BuildError::BaseImage { .. } => Some(DirectiveKind::SelectBase),
            BuildError::PackageInstall(_) => Some(DirectiveKind::InstallSystemPackages),
            BuildError::DependencyInstall(_) => Some(DirectiveKind::InstallDependencies),
            BuildError::SourceCopy { directive, .. } => Some(*directive),
            BuildError::DirectoryProvision { .. } => Some(DirectiveKind::ProvisionDataDir),
            BuildError::Directive { directive, .. } => Some(*directive),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_failed_maps_taxonomy() {
        let err = BuildError::directive_failed(DirectiveKind::InstallDependencies, "exit 1");
        assert!(matches!(err, BuildError::DependencyInstall(_)));
        assert_eq!(err.directive(), Some(DirectiveKind::InstallDependencies));

        let err = BuildError::directive_failed(DirectiveKind::SetWorkdir, "denied");
        assert_eq!(err.directive(), Some(DirectiveKind::SetWorkdir));
        assert_eq!(err.to_string(), "Directive set-workdir failed: denied");
    }

    #[test]
    fn test_display() {
        let err = BuildError::SourceCopy {
            directive: DirectiveKind::StageSource,
            path: "main.py".to_string(),
            message: "permission denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Copying main.py into the image failed: permission denied"
        );
        assert_eq!(err.directive(), Some(DirectiveKind::StageSource));
        assert_eq!(BuildError::Store("full".to_string()).directive(), None);
    }
}
