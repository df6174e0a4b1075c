pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{
    BuildArgs, CliArgs, Commands, ConfigArgs, LintArgs, PlanArgs, PreflightArgs, PruneArgs,
    RenderArgs, VerifyArgs,
};
pub use output::{OutputFormat, OutputFormatter};
