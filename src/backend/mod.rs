//! Build backends
//!
//! A backend executes a validated [`BuildPlan`] directive by directive and
//! commits the result under the plan's image reference. `local` builds into
//! botpack's own image store; `docker` drives the Docker daemon.

pub mod context;
pub mod docker;
pub mod image;
pub mod local;
pub mod runner;
pub mod store;

pub use context::BuildContext;
pub use docker::DockerBackend;
pub use image::ImageConfig;
pub use local::LocalBackend;
pub use runner::{CommandRunner, HostRunner, RunInvocation, RunOutput, SkipRunner};
pub use store::{ImageStore, PruneReport};

use crate::error::BuildError;
use crate::pipeline::directive::DirectiveKind;
use crate::pipeline::plan::BuildPlan;
use crate::progress::ProgressHandler;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Directory the recipe's source context is resolved against
    pub context: PathBuf,
    /// Look up cached layers (layers are recorded either way)
    pub use_cache: bool,
}

impl BuildRequest {
    pub fn new(context: impl Into<PathBuf>) -> Self {
        Self {
            context: context.into(),
            use_cache: true,
        }
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectiveStatus {
    Executed,
    Cached,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectiveRecord {
    pub index: usize,
    pub directive: DirectiveKind,
    pub status: DirectiveStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
}

/// Result of a successful build
#[derive(Debug, Clone, Serialize)]
pub struct BuildOutcome {
    pub image: String,
    pub backend: String,
    pub config: ImageConfig,
    pub directives: Vec<DirectiveRecord>,
    pub duration_ms: u64,
}

impl BuildOutcome {
    pub fn executed(&self) -> usize {
        self.count(DirectiveStatus::Executed)
    }

    pub fn cached(&self) -> usize {
        self.count(DirectiveStatus::Cached)
    }

    fn count(&self, status: DirectiveStatus) -> usize {
        self.directives.iter().filter(|r| r.status == status).count()
    }

    pub fn status_of(&self, directive: DirectiveKind) -> Option<DirectiveStatus> {
        self.directives
            .iter()
            .find(|r| r.directive == directive)
            .map(|r| r.status)
    }
}

/// A stored image and, for the local backend, its filesystem
#[derive(Debug, Clone)]
pub struct InspectedImage {
    pub config: ImageConfig,
    pub rootfs: Option<PathBuf>,
}

#[async_trait]
pub trait BuildBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Execute the plan strictly in order. The first failing directive
    /// aborts the build and the image reference keeps whatever it pointed
    /// at before.
    async fn build(
        &self,
        plan: &BuildPlan,
        request: &BuildRequest,
        progress: &dyn ProgressHandler,
    ) -> Result<BuildOutcome, BuildError>;

    async fn inspect(&self, image: &str) -> Result<Option<InspectedImage>, BuildError>;
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
