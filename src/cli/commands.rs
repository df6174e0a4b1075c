use crate::config::BackendKind;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Container image builder for long-running Python bots
#[derive(Parser, Debug)]
#[command(
    name = "botpack",
    about = "Container image builder for long-running Python bots",
    version,
    author,
    long_about = "botpack turns a bot repository into a container image with a fixed, \
                  cache-friendly directive order: dependencies are installed before the \
                  source is staged, so code edits rebuild in seconds. It can build into \
                  its own image store or through the Docker daemon."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Show the directive sequence for a recipe",
        long_about = "Resolves the recipe into its nine ordered directives and prints them.\n\n\
                      Examples:\n  \
                      botpack plan\n  \
                      botpack plan --recipe botpack.yaml --format json"
    )]
    Plan(PlanArgs),

    #[command(
        about = "Render the recipe as a Dockerfile",
        long_about = "Writes the Dockerfile equivalent of the build plan.\n\n\
                      Examples:\n  \
                      botpack render\n  \
                      botpack render -o Dockerfile"
    )]
    Render(RenderArgs),

    #[command(
        about = "Lint an existing Dockerfile",
        long_about = "Checks a Dockerfile for cache-ordering mistakes, shell-form entrypoints, \
                      buffered output and unpinned base images.\n\n\
                      Examples:\n  \
                      botpack lint Dockerfile\n  \
                      botpack lint Dockerfile --format json"
    )]
    Lint(LintArgs),

    #[command(
        about = "Build the bot image",
        long_about = "Executes the build plan against a context directory and tags the result.\n\n\
                      Examples:\n  \
                      botpack build\n  \
                      botpack build /path/to/bot -t mybot:dev\n  \
                      botpack build --backend docker --no-cache"
    )]
    Build(BuildArgs),

    #[command(
        about = "Verify a built image against the runtime contract",
        long_about = "Inspects a built image and checks its environment, entrypoint and data \
                      directory.\n\n\
                      Examples:\n  \
                      botpack verify bot:latest\n  \
                      botpack verify mybot:dev --backend docker"
    )]
    Verify(VerifyArgs),

    #[command(
        about = "Check runtime variables before starting the bot",
        long_about = "Reports which of the recipe's required variables are unset.\n\n\
                      Examples:\n  \
                      botpack preflight\n  \
                      botpack preflight --env-file .env"
    )]
    Preflight(PreflightArgs),

    #[command(about = "Show the effective configuration")]
    Config(ConfigArgs),

    #[command(
        about = "Remove untagged images and unused layers from the local store",
        long_about = "Deletes images no tag points at, then cached layers that no remaining \
                      image was built from. Do not run it while a local build is in progress.\n\n\
                      Examples:\n  \
                      botpack prune\n  \
                      botpack prune --format json"
    )]
    Prune(PruneArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    #[arg(
        short = 'r',
        long,
        value_name = "FILE",
        help = "Recipe file (defaults to botpack.yaml, then the built-in bot recipe)"
    )]
    pub recipe: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct RenderArgs {
    #[arg(short = 'r', long, value_name = "FILE", help = "Recipe file")]
    pub recipe: Option<PathBuf>,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write output to file instead of stdout"
    )]
    pub output: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct LintArgs {
    #[arg(value_name = "DOCKERFILE", help = "Dockerfile to lint")]
    pub dockerfile: PathBuf,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    #[arg(
        value_name = "CONTEXT",
        help = "Build context directory (defaults to current directory)"
    )]
    pub context: Option<PathBuf>,

    #[arg(short = 'r', long, value_name = "FILE", help = "Recipe file")]
    pub recipe: Option<PathBuf>,

    #[arg(
        short = 't',
        long,
        value_name = "TAG",
        help = "Image reference to tag the result with"
    )]
    pub tag: Option<String>,

    #[arg(
        short = 'b',
        long,
        value_enum,
        help = "Build backend (overrides BOTPACK_BACKEND)"
    )]
    pub backend: Option<BackendKind>,

    #[arg(long, help = "Ignore cached layers")]
    pub no_cache: bool,

    #[arg(
        long,
        help = "Skip RUN commands and tag the result TAG-dry-run; file directives and config still apply (local store)"
    )]
    pub dry_run: bool,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct VerifyArgs {
    #[arg(
        value_name = "TAG",
        help = "Image to verify (defaults to the recipe's image reference)"
    )]
    pub image: Option<String>,

    #[arg(short = 'r', long, value_name = "FILE", help = "Recipe file")]
    pub recipe: Option<PathBuf>,

    #[arg(short = 'b', long, value_enum, help = "Backend the image was built with")]
    pub backend: Option<BackendKind>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct PreflightArgs {
    #[arg(short = 'r', long, value_name = "FILE", help = "Recipe file")]
    pub recipe: Option<PathBuf>,

    #[arg(
        short = 'e',
        long,
        value_name = "FILE",
        help = "Read variables from a dotenv file instead of the process environment"
    )]
    pub env_file: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct PruneArgs {
    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct ConfigArgs {
    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_args_verify() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_prune_args() {
        let args = CliArgs::parse_from(["botpack", "prune", "-f", "json"]);
        match args.command {
            Commands::Prune(prune_args) => assert_eq!(prune_args.format, OutputFormatArg::Json),
            _ => panic!("Expected Prune command"),
        }
    }

    #[test]
    fn test_default_build_args() {
        let args = CliArgs::parse_from(["botpack", "build"]);
        match args.command {
            Commands::Build(build_args) => {
                assert!(build_args.context.is_none());
                assert!(build_args.recipe.is_none());
                assert!(build_args.tag.is_none());
                assert!(build_args.backend.is_none());
                assert!(!build_args.no_cache);
                assert!(!build_args.dry_run);
                assert_eq!(build_args.format, OutputFormatArg::Human);
            }
            _ => panic!("Expected Build command"),
        }
    }

    #[test]
    fn test_build_with_options() {
        let args = CliArgs::parse_from([
            "botpack",
            "build",
            "/srv/bot",
            "--recipe",
            "bot.yaml",
            "-t",
            "mybot:dev",
            "--backend",
            "docker",
            "--no-cache",
            "--format",
            "json",
        ]);
        match args.command {
            Commands::Build(build_args) => {
                assert_eq!(build_args.context, Some(PathBuf::from("/srv/bot")));
                assert_eq!(build_args.recipe, Some(PathBuf::from("bot.yaml")));
                assert_eq!(build_args.tag.as_deref(), Some("mybot:dev"));
                assert_eq!(build_args.backend, Some(BackendKind::Docker));
                assert!(build_args.no_cache);
                assert_eq!(build_args.format, OutputFormatArg::Json);
            }
            _ => panic!("Expected Build command"),
        }
    }

    #[test]
    fn test_invalid_backend_rejected() {
        let result = CliArgs::try_parse_from(["botpack", "build", "--backend", "podman"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_lint_requires_path() {
        assert!(CliArgs::try_parse_from(["botpack", "lint"]).is_err());
        let args = CliArgs::parse_from(["botpack", "lint", "Dockerfile", "-f", "yaml"]);
        match args.command {
            Commands::Lint(lint_args) => {
                assert_eq!(lint_args.dockerfile, PathBuf::from("Dockerfile"));
                assert_eq!(lint_args.format, OutputFormatArg::Yaml);
            }
            _ => panic!("Expected Lint command"),
        }
    }

    #[test]
    fn test_verify_and_preflight() {
        let args = CliArgs::parse_from(["botpack", "verify", "bot:latest"]);
        match args.command {
            Commands::Verify(verify_args) => {
                assert_eq!(verify_args.image.as_deref(), Some("bot:latest"));
            }
            _ => panic!("Expected Verify command"),
        }

        let args = CliArgs::parse_from(["botpack", "preflight", "--env-file", ".env"]);
        match args.command {
            Commands::Preflight(preflight_args) => {
                assert_eq!(preflight_args.env_file, Some(PathBuf::from(".env")));
                assert!(preflight_args.recipe.is_none());
            }
            _ => panic!("Expected Preflight command"),
        }
    }

    #[test]
    fn test_render_output() {
        let args = CliArgs::parse_from(["botpack", "render", "-o", "Dockerfile"]);
        match args.command {
            Commands::Render(render_args) => {
                assert_eq!(render_args.output, Some(PathBuf::from("Dockerfile")));
            }
            _ => panic!("Expected Render command"),
        }
    }

    #[test]
    fn test_global_flags() {
        let args = CliArgs::parse_from(["botpack", "-v", "plan"]);
        assert!(args.verbose);
        assert!(!args.quiet);

        let args = CliArgs::parse_from(["botpack", "plan", "-q"]);
        assert!(args.quiet);

        let args = CliArgs::parse_from(["botpack", "--log-level", "debug", "config"]);
        assert_eq!(args.log_level, Some("debug".to_string()));

        assert!(CliArgs::try_parse_from(["botpack", "-v", "-q", "plan"]).is_err());
    }
}
