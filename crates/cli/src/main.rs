mod config;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use runtime::{Orchestrator, Stats, ToolResult};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use error::{Error, Result};

#[derive(Parser)]
#[command(name = "toolbridge")]
#[command(about = "Tool orchestration for function-calling models", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: ./toolbridge.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the config, start every tool and list the catalog
    Check,
    /// Print the function declarations offered for a prompt
    Declarations {
        /// The user prompt
        prompt: String,
    },
    /// Invoke one function and print the result as JSON
    Call {
        tool: String,
        function: String,
        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
        /// Include orchestrator counters in the output
        #[arg(long)]
        stats: bool,
    },
}

#[derive(Serialize)]
struct CallOutput<'a> {
    result: &'a ToolResult,
    stats: Stats,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;
    debug!(tools = config.tools.len(), root = %config.builtins.root.display(), "config loaded");
    let orchestrator = Orchestrator::new(config)?;

    let outcome = match cli.command {
        Commands::Check => cmd_check(&orchestrator).await,
        Commands::Declarations { prompt } => cmd_declarations(&orchestrator, &prompt).await,
        Commands::Call {
            tool,
            function,
            args,
            stats,
        } => cmd_call(&orchestrator, &tool, &function, &args, stats).await,
    };

    orchestrator.shutdown().await;
    outcome
}

async fn cmd_check(orchestrator: &Orchestrator) -> Result<ExitCode> {
    let mut healthy = true;
    for (tool, outcome) in orchestrator.warm_up().await {
        match outcome {
            Ok(count) => println!("{tool}: ok ({count} functions)"),
            Err(failure) => {
                healthy = false;
                println!("{tool}: {failure}");
            }
        }
    }

    println!();
    println!("{:<16}  FUNCTIONS", "TOOL");
    println!("{}", "-".repeat(60));
    for entry in orchestrator.catalog() {
        let names: Vec<_> = entry.declarations.iter().map(|d| d.name.as_str()).collect();
        println!("{:<16}  {}", entry.tool, names.join(", "));
    }

    Ok(if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn cmd_declarations(orchestrator: &Orchestrator, prompt: &str) -> Result<ExitCode> {
    let declarations = orchestrator.available_declarations(prompt).await;
    println!("{}", serde_json::to_string_pretty(&declarations)?);
    Ok(ExitCode::SUCCESS)
}

async fn cmd_call(
    orchestrator: &Orchestrator,
    tool: &str,
    function: &str,
    args: &str,
    with_stats: bool,
) -> Result<ExitCode> {
    let args: Value = serde_json::from_str(args).map_err(Error::InvalidArgs)?;
    let result = orchestrator.invoke(tool, function, args).await;

    let json = if with_stats {
        serde_json::to_string_pretty(&CallOutput {
            result: &result,
            stats: orchestrator.stats(),
        })?
    } else {
        serde_json::to_string_pretty(&result)?
    };
    println!("{json}");

    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
