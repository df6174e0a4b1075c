//! botpack - container images for long-running Python bots
//!
//! A bot image is described by an [`ImageRecipe`] and resolved into a
//! [`BuildPlan`]: nine directives in a fixed order that keeps the expensive
//! dependency layer cached across source edits. The plan can be rendered as
//! a Dockerfile, executed by a [`BuildBackend`], and the resulting image
//! checked against its runtime contract.
//!
//! # Core Concepts
//!
//! - **Recipe**: the declarative description of the image (base, packages,
//!   dependency manifest, environment, entrypoint)
//! - **Plan**: the ordered directive sequence derived from a recipe
//! - **Backend**: executes a plan, either into botpack's own image store
//!   or through the Docker daemon
//! - **Contract**: what the container runtime relies on at start
//!   (environment, exec-form main process, writable data directories)
//!
//! # Example Usage
//!
//! ```no_run
//! use botpack::{BuildOrchestrator, BuildPlan, BuildRequest, ImageRecipe, ImageStore, LocalBackend};
//! use botpack::progress::LoggingHandler;
//!
//! # async fn run() -> Result<(), botpack::BuildError> {
//! let plan = BuildPlan::from_recipe(&ImageRecipe::python_bot());
//! let backend = LocalBackend::new(ImageStore::new("/var/lib/botpack"));
//! let outcome = BuildOrchestrator::default()
//!     .execute(&plan, &backend, &BuildRequest::new("."), &LoggingHandler)
//!     .await?;
//! println!("{} executed, {} cached", outcome.executed(), outcome.cached());
//! # Ok(())
//! # }
//! ```
//!
//! # Project Structure
//!
//! - [`output`]: recipe schema
//! - [`pipeline`]: directives, plans and build orchestration
//! - [`backend`]: local and Docker build backends
//! - [`render`]: Dockerfile rendering
//! - [`extractors`]: Dockerfile linting and dotenv parsing

pub mod backend;
pub mod cache;
pub mod cli;
pub mod config;
pub mod contract;
pub mod error;
pub mod extractors;
pub mod output;
pub mod pipeline;
pub mod preflight;
pub mod progress;
pub mod render;
pub mod util;
pub mod validation;

pub use backend::{
    BuildBackend, BuildOutcome, BuildRequest, DockerBackend, ImageConfig, ImageStore,
    LocalBackend,
};
pub use config::{BackendKind, BotpackConfig, ConfigError};
pub use contract::{ContractReport, RuntimeContract};
pub use error::BuildError;
pub use output::schema::ImageRecipe;
pub use pipeline::{BuildOrchestrator, BuildPlan, Directive, DirectiveKind};
pub use util::{init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
