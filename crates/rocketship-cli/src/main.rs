// Rocketship CLI
//
// Design Decision: clap derive for argument parsing, matching everruns-cli.
// Design Decision: text/json/yaml output formats for scripting.
// Design Decision: tonic gRPC client instead of reqwest, since the engine
// speaks gRPC rather than HTTP.

mod client;
mod commands;
mod output;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rocketship")]
#[command(about = "Rocketship CLI - submit suites and inspect runs")]
#[command(version)]
pub struct Cli {
    /// Engine gRPC address
    #[arg(
        long,
        env = "ROCKETSHIP_ENGINE_ADDR",
        default_value = "http://localhost:7700"
    )]
    pub engine_addr: String,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a suite and stream its logs
    Run(commands::run::RunArgs),

    /// Inspect and manage runs
    Runs {
        #[command(subcommand)]
        command: commands::runs::RunsCommand,
    },

    /// Check engine connectivity
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut client = client::Client::connect(&cli.engine_addr).await?;
    let output_format = output::OutputFormat::from_str(&cli.output);

    match cli.command {
        Commands::Run(args) => commands::run::run(args, &mut client, output_format, cli.quiet).await,
        Commands::Runs { command } => commands::runs::run(command, &mut client, output_format).await,
        Commands::Health => {
            let health = client.health().await?;
            if output_format.is_text() {
                println!("{}", health.status);
            } else {
                output_format.print_value(&serde_json::json!({ "status": health.status }));
            }
            Ok(())
        }
    }
}
