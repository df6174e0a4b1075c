use botpack::cli::commands::{CliArgs, Commands};
use botpack::cli::handlers::{
    handle_build, handle_config, handle_lint, handle_plan, handle_preflight, handle_prune,
    handle_render, handle_verify,
};
use botpack::util::{init_logging, LoggingConfig};
use botpack::VERSION;

use clap::Parser;
use tracing::debug;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging(LoggingConfig::from_flags(
        args.log_level.as_deref(),
        args.verbose,
        args.quiet,
    ));

    debug!("botpack v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Plan(plan_args) => handle_plan(plan_args),
        Commands::Render(render_args) => handle_render(render_args),
        Commands::Lint(lint_args) => handle_lint(lint_args),
        Commands::Build(build_args) => handle_build(build_args, args.quiet).await,
        Commands::Verify(verify_args) => handle_verify(verify_args).await,
        Commands::Preflight(preflight_args) => handle_preflight(preflight_args),
        Commands::Config(config_args) => handle_config(config_args),
        Commands::Prune(prune_args) => handle_prune(prune_args),
    };

    std::process::exit(exit_code);
}
