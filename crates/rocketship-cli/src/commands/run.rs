// Run submission and log streaming.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use futures::StreamExt;

use crate::client::Client;
use crate::output::{print_field, OutputFormat};

#[derive(Args)]
pub struct RunArgs {
    /// Path to the suite YAML file
    pub suite: PathBuf,

    /// Project ID to attach to the run
    #[arg(long)]
    pub project_id: Option<String>,

    /// Source of the trigger, e.g. "cli", "ci", "schedule"
    #[arg(long, default_value = "cli")]
    pub source: String,

    /// Git branch the run is associated with
    #[arg(long)]
    pub branch: Option<String>,

    /// Git commit SHA the run is associated with
    #[arg(long)]
    pub commit_sha: Option<String>,

    /// Name of the schedule that triggered this run, if any
    #[arg(long)]
    pub schedule_name: Option<String>,

    /// Env file (KEY=VALUE per line) loaded into the `env` template scope.
    /// Forwarded verbatim to the engine; never written to disk by the CLI
    /// or persisted by the engine beyond the run's lifetime.
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Submit the run and print its ID without streaming logs
    #[arg(long)]
    pub no_stream: bool,
}

pub async fn run(
    args: RunArgs,
    client: &mut Client,
    output: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let yaml_payload = std::fs::read_to_string(&args.suite)
        .with_context(|| format!("reading suite file {}", args.suite.display()))?;

    let env = load_env_file(args.env_file.as_deref())?;

    let context = rocketship_engine::proto::RunContext {
        project_id: args.project_id,
        source: Some(args.source),
        branch: args.branch,
        commit_sha: args.commit_sha,
        trigger: Some("manual".to_string()),
        schedule_name: args.schedule_name,
        metadata_json: "{}".to_string(),
        env,
    };

    let run_id = client.create_run(yaml_payload, context).await?;

    if args.no_stream {
        if output.is_text() {
            if quiet {
                println!("{run_id}");
            } else {
                println!("Run submitted: {run_id}");
            }
        } else {
            output.print_value(&serde_json::json!({ "run_id": run_id }));
        }
        return Ok(());
    }

    if !quiet && output.is_text() {
        print_field("Run", &run_id);
    }

    stream(client, run_id).await
}

async fn stream(client: &mut Client, run_id: String) -> Result<()> {
    let mut stream = client.stream_logs(run_id).await?;
    while let Some(line) = stream.next().await {
        let line = line?;
        println!("{}", format_line(&line));
    }
    Ok(())
}

fn format_line(line: &rocketship_engine::proto::LogLine) -> String {
    let prefix = match (&line.test_name, &line.step_name) {
        (Some(test), Some(step)) => format!("[{test}/{step}] "),
        (Some(test), None) => format!("[{test}] "),
        (None, _) => String::new(),
    };
    let body = format!("{prefix}{}", line.msg);
    colorize(&body, &line.color, line.bold)
}

fn colorize(text: &str, color: &str, bold: bool) -> String {
    let code = match color {
        "green" => "32",
        "red" => "31",
        "purple" => "35",
        _ => return if bold { format!("\x1b[1m{text}\x1b[0m") } else { text.to_string() },
    };
    if bold {
        format!("\x1b[1;{code}m{text}\x1b[0m")
    } else {
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

/// Parses a `KEY=VALUE`-per-line env file without touching the process
/// environment, so secrets never leak beyond the forwarded map.
fn load_env_file(path: Option<&std::path::Path>) -> Result<HashMap<String, String>> {
    let Some(path) = path else {
        return Ok(HashMap::new());
    };
    let mut env = HashMap::new();
    for item in dotenvy::from_path_iter(path)
        .with_context(|| format!("reading env file {}", path.display()))?
    {
        let (key, value) = item.with_context(|| format!("parsing env file {}", path.display()))?;
        env.insert(key, value);
    }
    Ok(env)
}
