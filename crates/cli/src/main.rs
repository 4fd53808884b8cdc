mod commands;
mod logging;
mod serve;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use intentful_engine::EngineConfig;

use crate::commands::check::cmd_check;
use crate::commands::diff::cmd_diff;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Intentful reconciliation engine.
#[derive(Parser)]
#[command(name = "intentful", version, about = "Intentful reconciliation engine")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and the reconciliation loops over in-memory storage
    Serve {
        /// Engine configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Port to listen on (overrides the configured server_port)
        #[arg(long)]
        port: Option<u16>,
        /// Provider definitions (JSON) to register at startup
        providers: Vec<PathBuf>,
    },

    /// Compile every signature and schema of a provider definition
    Check {
        /// Path to the provider JSON file
        provider: PathBuf,
    },

    /// Compute the diffs between a spec and a status for one kind
    Diff {
        /// Path to the provider JSON file
        provider: PathBuf,
        /// Kind name within the provider
        #[arg(long)]
        kind: String,
        /// Path to the spec JSON file
        #[arg(long)]
        spec: PathBuf,
        /// Path to the status JSON file (defaults to an empty status)
        #[arg(long)]
        status: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            port,
            providers,
        } => {
            let mut config = match EngineConfig::load(config.as_deref()) {
                Ok(c) => c,
                Err(e) => {
                    report_error(&format!("config error: {}", e), cli.output, cli.quiet);
                    process::exit(1);
                }
            };
            if let Some(port) = port {
                config.server_port = port;
            }
            logging::init(&config.logging_level, config.pretty_print);

            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("failed to create tokio runtime: {}", e);
                    process::exit(1);
                }
            };
            if let Err(e) = rt.block_on(serve::start_server(config, providers)) {
                eprintln!("Server error: {}", e);
                process::exit(1);
            }
        }
        Commands::Check { provider } => {
            cmd_check(&provider, cli.output, cli.quiet);
        }
        Commands::Diff {
            provider,
            kind,
            spec,
            status,
        } => {
            cmd_diff(
                &provider,
                &kind,
                &spec,
                status.as_deref(),
                cli.output,
                cli.quiet,
            );
        }
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
