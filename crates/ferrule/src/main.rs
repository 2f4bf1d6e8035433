//! Ferrule CLI - resilient reference lookups from the command line.
//!
//! Resolves references and definitions through rust-analyzer when it is
//! available, and through a tree-sitter scan when it is not.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use ferrule::ResolverConfig;
use ferrule::config::CONFIG_FILE_NAME;
use tracing_subscriber::EnvFilter;

mod cli;

/// Ferrule: reference resolution with caching, retries and fallback.
#[derive(Parser)]
#[command(name = "ferrule")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Workspace root directory (defaults to current directory)
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Config file (defaults to `ferrule.yaml` in the workspace root)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Skip the language server and answer from the syntax scan only
    #[arg(long, global = true)]
    no_lsp: bool,

    /// Print lookup metrics and cache statistics afterwards
    #[arg(long, global = true)]
    stats: bool,

    /// Output in JSON format for programmatic use
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find references to the identifier at a position
    Refs {
        /// Source file
        file: PathBuf,
        /// 1-based line
        line: u32,
        /// 1-based column (bytes)
        column: u32,
    },

    /// Find the definition of the identifier at a position
    Def {
        /// Source file
        file: PathBuf,
        /// 1-based line
        line: u32,
        /// 1-based column (bytes)
        column: u32,
    },

    /// Resolve every identifier in a file as one batch
    Batch {
        /// Source file
        file: PathBuf,

        /// Look up definitions instead of references
        #[arg(short, long)]
        definitions: bool,

        /// Maximum concurrent lookups (overrides `batch.size`)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Whole-batch deadline such as `30s` (overrides `batch.timeout`)
        #[arg(long, value_parser = ferrule::config::duration::parse)]
        timeout: Option<std::time::Duration>,
    },

    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate the config file and print the effective values
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Determine workspace root
    let workspace = match cli.workspace {
        Some(w) => w,
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!(
                    "{}: failed to get current directory: {e}",
                    "error".red().bold()
                );
                return ExitCode::FAILURE;
            }
        },
    };
    let config_path = cli
        .config
        .unwrap_or_else(|| workspace.join(CONFIG_FILE_NAME));

    // `config init` must work even when the existing file is broken
    let loaded = match &cli.command {
        Commands::Config {
            action: ConfigAction::Init { .. },
        } => Ok(ResolverConfig::default()),
        _ => ResolverConfig::load(&config_path).await,
    };

    init_logging(cli.verbose, loaded.as_ref().ok());

    let result = match loaded {
        Ok(config) => {
            let context = cli::Context {
                workspace,
                config_path,
                config,
                no_lsp: cli.no_lsp,
                stats: cli.stats,
                json: cli.json,
            };

            match cli.command {
                Commands::Refs { file, line, column } => {
                    cli::lookup::run(&context, &file, line, column, ferrule::LookupKind::References)
                        .await
                }
                Commands::Def { file, line, column } => {
                    cli::lookup::run(&context, &file, line, column, ferrule::LookupKind::Definition)
                        .await
                }
                Commands::Batch {
                    file,
                    definitions,
                    concurrency,
                    timeout,
                } => {
                    let kind = if definitions {
                        ferrule::LookupKind::Definition
                    } else {
                        ferrule::LookupKind::References
                    };
                    cli::batch::run(&context, &file, kind, concurrency, timeout).await
                }
                Commands::Config { action } => match action {
                    ConfigAction::Init { force } => cli::config::init(&context, force).await,
                    ConfigAction::Check => cli::config::check(&context),
                },
            }
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            // Show cause chain for nested errors
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                eprintln!("  {}: {cause}", "caused by".dimmed());
                source = std::error::Error::source(cause);
            }
            ExitCode::FAILURE
        }
    }
}

/// Verbosity flags win over `logging.level`; `RUST_LOG` wins over both.
fn init_logging(verbose: u8, config: Option<&ResolverConfig>) {
    let filter = match verbose {
        0 => config.map_or("warn", |c| c.logging.level.as_str()).to_string(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
