//! Subcommand handlers
//!
//! Each handler prints its result to stdout and returns the process exit
//! code: 0 on success, 1 when the command ran but found a failure, 2 for
//! usage and configuration errors.

use super::commands::{
    BuildArgs, ConfigArgs, LintArgs, OutputFormatArg, PlanArgs, PreflightArgs, PruneArgs,
    RenderArgs, VerifyArgs,
};
use super::output::OutputFormatter;
use crate::backend::BuildRequest;
use crate::config::{BackendKind, BotpackConfig};
use crate::contract::RuntimeContract;
use crate::extractors::dockerfile;
use crate::output::schema::ImageRecipe;
use crate::pipeline::{BuildOrchestrator, BuildPlan};
use crate::preflight;
use crate::progress::{LoggingHandler, NoOpHandler, ProgressHandler};
use crate::render;
use crate::validation::Validator;
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

/// Recipe file names looked up when `--recipe` is not given
pub const RECIPE_FILES: &[&str] = &["botpack.yaml", "botpack.yml", "botpack.json"];

/// Load the explicit recipe, else the first recipe file in `dir`, else the
/// built-in bot recipe
pub fn resolve_recipe(explicit: Option<&Path>, dir: &Path) -> Result<ImageRecipe> {
    if let Some(path) = explicit {
        return ImageRecipe::load(path);
    }
    for name in RECIPE_FILES {
        let candidate = dir.join(name);
        if candidate.is_file() {
            debug!("Using recipe {}", candidate.display());
            return ImageRecipe::load(&candidate);
        }
    }
    debug!("No recipe file found; using the built-in bot recipe");
    Ok(ImageRecipe::python_bot())
}

fn current_dir() -> PathBuf {
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn emit(result: Result<String>) -> i32 {
    match result {
        Ok(output) => {
            print!("{}", output);
            if !output.ends_with('\n') {
                println!();
            }
            EXIT_OK
        }
        Err(e) => {
            error!("Failed to format output: {:#}", e);
            EXIT_FAILURE
        }
    }
}

fn load_config(backend: Option<BackendKind>) -> Result<BotpackConfig> {
    let config = match backend {
        // an explicit flag overrides an unparseable BOTPACK_BACKEND
        Some(kind) => BotpackConfig {
            backend: kind,
            ..BotpackConfig::default()
        },
        None => BotpackConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

pub fn handle_plan(args: &PlanArgs) -> i32 {
    let recipe = match resolve_recipe(args.recipe.as_deref(), &current_dir()) {
        Ok(recipe) => recipe,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_USAGE;
        }
    };
    let plan = BuildPlan::from_recipe(&recipe);
    let code = emit(OutputFormatter::new(args.format.into()).format(&plan));
    if code != EXIT_OK {
        return code;
    }

    match Validator::new().validate(&plan) {
        Ok(()) => EXIT_OK,
        Err(e) => {
            error!("{}", e);
            EXIT_FAILURE
        }
    }
}

pub fn handle_render(args: &RenderArgs) -> i32 {
    match render_to(args) {
        Ok(()) => EXIT_OK,
        Err(e) => {
            error!("{:#}", e);
            EXIT_USAGE
        }
    }
}

fn render_to(args: &RenderArgs) -> Result<()> {
    let recipe = resolve_recipe(args.recipe.as_deref(), &current_dir())?;
    let plan = BuildPlan::from_recipe(&recipe);
    Validator::new().validate(&plan)?;
    let dockerfile = render::render(&plan);

    match &args.output {
        Some(path) => {
            std::fs::write(path, &dockerfile)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Dockerfile written to {}", path.display());
        }
        None => print!("{}", dockerfile),
    }
    Ok(())
}

pub fn handle_lint(args: &LintArgs) -> i32 {
    let report = match dockerfile::lint_file(&args.dockerfile) {
        Ok(report) => report,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_USAGE;
        }
    };
    let code = emit(OutputFormatter::new(args.format.into()).format_lint(&report));
    if code != EXIT_OK {
        return code;
    }
    if report.has_errors() {
        EXIT_FAILURE
    } else {
        EXIT_OK
    }
}

/// Cached layers are skipped when `--no-cache` is given or the
/// configuration disables the cache
fn build_request(context: &Path, no_cache: bool, config: &BotpackConfig) -> BuildRequest {
    let request = BuildRequest::new(context);
    if no_cache || !config.cache_enabled {
        request.without_cache()
    } else {
        request
    }
}

pub async fn handle_build(args: &BuildArgs, quiet: bool) -> i32 {
    let context = args.context.clone().unwrap_or_else(current_dir);
    if !context.is_dir() {
        error!("Build context {} is not a directory", context.display());
        return EXIT_USAGE;
    }

    let recipe = match resolve_recipe(args.recipe.as_deref(), &context) {
        Ok(recipe) => recipe,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_USAGE;
        }
    };
    let config = match load_config(args.backend) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_USAGE;
        }
    };

    let mut plan = BuildPlan::from_recipe(&recipe);
    if let Some(tag) = &args.tag {
        plan = plan.with_image(tag.clone());
    }

    let request = build_request(&context, args.no_cache, &config);

    let backend = config.create_backend(args.dry_run);
    let progress: Box<dyn ProgressHandler> = if quiet {
        Box::new(NoOpHandler)
    } else {
        Box::new(LoggingHandler)
    };

    let orchestrator = BuildOrchestrator::default();
    match orchestrator
        .execute(&plan, backend.as_ref(), &request, progress.as_ref())
        .await
    {
        Ok(outcome) => emit(OutputFormatter::new(args.format.into()).format_build(&outcome)),
        Err(e) => {
            match e.directive() {
                Some(directive) => error!(directive = %directive, "Build failed: {}", e),
                None => error!("Build failed: {}", e),
            }
            EXIT_FAILURE
        }
    }
}

pub async fn handle_verify(args: &VerifyArgs) -> i32 {
    let recipe = match resolve_recipe(args.recipe.as_deref(), &current_dir()) {
        Ok(recipe) => recipe,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_USAGE;
        }
    };
    let config = match load_config(args.backend) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_USAGE;
        }
    };

    let image = args.image.clone().unwrap_or_else(|| recipe.image_ref());
    let backend = config.create_backend(false);
    let inspected = match backend.inspect(&image).await {
        Ok(Some(inspected)) => inspected,
        Ok(None) => {
            error!("Image {} not found ({} backend)", image, backend.name());
            return EXIT_FAILURE;
        }
        Err(e) => {
            error!("Failed to inspect {}: {}", image, e);
            return EXIT_FAILURE;
        }
    };

    let report =
        RuntimeContract::from_recipe(&recipe).check(&inspected.config, inspected.rootfs.as_deref());
    if args.format == OutputFormatArg::Human {
        println!("{}", inspected.config);
    }
    let code = emit(OutputFormatter::new(args.format.into()).format(&report));
    if code != EXIT_OK {
        return code;
    }
    if report.is_ok() {
        EXIT_OK
    } else {
        EXIT_FAILURE
    }
}

pub fn handle_preflight(args: &PreflightArgs) -> i32 {
    let recipe = match resolve_recipe(args.recipe.as_deref(), &current_dir()) {
        Ok(recipe) => recipe,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_USAGE;
        }
    };

    let report = match &args.env_file {
        Some(path) => match preflight::check_env_file(&recipe, path) {
            Ok(report) => report,
            Err(e) => {
                error!("{:#}", e);
                return EXIT_USAGE;
            }
        },
        None => preflight::check_process_env(&recipe),
    };

    let code = emit(OutputFormatter::new(args.format.into()).format(&report));
    if code != EXIT_OK {
        return code;
    }
    if report.is_ok() {
        EXIT_OK
    } else {
        EXIT_FAILURE
    }
}

pub fn handle_prune(args: &PruneArgs) -> i32 {
    let config = match load_config(None) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_USAGE;
        }
    };
    match config.image_store().prune() {
        Ok(report) => emit(OutputFormatter::new(args.format.into()).format(&report)),
        Err(e) => {
            error!("Prune failed: {:#}", e);
            EXIT_FAILURE
        }
    }
}

pub fn handle_config(args: &ConfigArgs) -> i32 {
    let config = match BotpackConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return EXIT_USAGE;
        }
    };
    let code = emit(OutputFormatter::new(args.format.into()).format_config(&config));
    if code != EXIT_OK {
        return code;
    }
    match config.validate() {
        Ok(()) => EXIT_OK,
        Err(e) => {
            error!("{}", e);
            EXIT_USAGE
        }
    }
}
