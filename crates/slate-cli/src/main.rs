//! Slate CLI - incremental cell evaluation from the terminal.

mod colors;
mod driver;
mod notebook;
mod output;
mod repl;
mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use slate_core::EngineConfig;

#[derive(Parser)]
#[command(name = "slate")]
#[command(about = "Incremental cell evaluation engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every cell of a notebook file
    Run {
        /// Path to the notebook file
        file: PathBuf,

        /// Use a console session (cells freeze after they run)
        #[arg(long)]
        console: bool,

        /// Culture used when results carry none
        #[arg(long, default_value = "en-US")]
        culture: String,

        /// Working directory passed to the compilation workspace
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Add a top-level reference before running (repeatable)
        #[arg(long = "reference", value_name = "NAME")]
        references: Vec<String>,
    },

    /// Read submissions from stdin, one per line
    Repl {
        /// Culture used when results carry none
        #[arg(long, default_value = "en-US")]
        culture: String,

        /// Working directory passed to the compilation workspace
        #[arg(long)]
        cwd: Option<PathBuf>,
    },
}

fn engine_config(console: bool, culture: String, cwd: Option<PathBuf>) -> EngineConfig {
    let config = if console {
        EngineConfig::console()
    } else {
        EngineConfig::default()
    };
    let config = config.with_default_culture(culture);
    match cwd {
        Some(dir) => config.with_working_directory(dir),
        None => config,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so cell output stays clean
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            file,
            console,
            culture,
            cwd,
            references,
        } => {
            let config = engine_config(console, culture, cwd);
            run::execute(&file, config, &references).await?;
        }

        Commands::Repl { culture, cwd } => {
            let config = engine_config(true, culture, cwd);
            repl::execute(config).await?;
        }
    }

    Ok(())
}
