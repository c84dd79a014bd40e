// Run inspection and lifecycle commands: list, get, cancel.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;

use crate::client::{Client, ClientError};
use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};

/// JSON/YAML view of `ListRunsResponse`. The tonic-generated proto types
/// don't derive `Serialize`, so --output json/yaml renders through these
/// instead, same as internal-protocol's types stay separate from the
/// schema types they're converted to/from.
#[derive(Serialize)]
struct RunSummaryView {
    run_id: String,
    suite_name: String,
    status: String,
    started_at: String,
    ended_at: Option<String>,
}

#[derive(Serialize)]
struct ListRunsView {
    runs: Vec<RunSummaryView>,
    next_cursor: Option<String>,
    total: u64,
}

#[derive(Serialize)]
struct TestDetailsView {
    test_name: String,
    status: String,
    started_at: String,
    ended_at: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct RunDetailsView {
    run_id: String,
    suite_name: String,
    status: String,
    started_at: String,
    ended_at: Option<String>,
    tests: Vec<TestDetailsView>,
}

#[derive(Subcommand)]
pub enum RunsCommand {
    /// List runs, most recent first
    List {
        #[arg(long)]
        project_id: Option<String>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        schedule_name: Option<String>,
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long, default_value = "50")]
        limit: u32,
        #[arg(long, default_value = "started_at", value_parser = ["started_at", "ended_at", "duration"])]
        order_by: String,
        #[arg(long)]
        ascending: bool,
    },

    /// Get a single run's details, including per-test status
    Get {
        /// Run ID
        run_id: String,
    },

    /// Cancel a running run
    Cancel {
        /// Run ID
        run_id: String,
    },
}

pub async fn run(command: RunsCommand, client: &mut Client, output: OutputFormat) -> Result<()> {
    match command {
        RunsCommand::List {
            project_id,
            source,
            branch,
            status,
            schedule_name,
            cursor,
            limit,
            order_by,
            ascending,
        } => {
            list(
                client,
                output,
                project_id,
                source,
                branch,
                status,
                schedule_name,
                cursor,
                limit,
                order_by,
                !ascending,
            )
            .await
        }
        RunsCommand::Get { run_id } => get(client, output, run_id).await,
        RunsCommand::Cancel { run_id } => cancel(client, output, run_id).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn list(
    client: &mut Client,
    output: OutputFormat,
    project_id: Option<String>,
    source: Option<String>,
    branch: Option<String>,
    status: Option<String>,
    schedule_name: Option<String>,
    cursor: Option<String>,
    limit: u32,
    order_by: String,
    descending: bool,
) -> Result<()> {
    let request = rocketship_engine::proto::ListRunsRequest {
        project_id,
        source,
        branch,
        status,
        schedule_name,
        cursor,
        limit,
        order_by,
        descending,
    };

    let response = client.list_runs(request).await?;

    if output.is_text() {
        if response.runs.is_empty() {
            println!("No runs found");
            return Ok(());
        }

        print_table_header(&[
            ("RUN ID", 36),
            ("SUITE", 24),
            ("STATUS", 10),
            ("STARTED", 20),
        ]);

        for run in &response.runs {
            print_table_row(&[
                (&run.run_id, 36),
                (&run.suite_name, 24),
                (&run.status, 10),
                (&run.started_at, 20),
            ]);
        }

        if let Some(next) = &response.next_cursor {
            println!("\nnext cursor: {next}");
        }
    } else {
        let view = ListRunsView {
            runs: response
                .runs
                .into_iter()
                .map(|r| RunSummaryView {
                    run_id: r.run_id,
                    suite_name: r.suite_name,
                    status: r.status,
                    started_at: r.started_at,
                    ended_at: r.ended_at,
                })
                .collect(),
            next_cursor: response.next_cursor,
            total: response.total,
        };
        output.print_value(&view);
    }

    Ok(())
}

async fn get(client: &mut Client, output: OutputFormat, run_id: String) -> Result<()> {
    let details = client.get_run(run_id.clone()).await.map_err(|e| match e {
        ClientError::NotFound => anyhow::anyhow!("run not found: {run_id}"),
        e => e.into(),
    })?;

    if output.is_text() {
        print_field("Run ID", &details.run_id);
        print_field("Suite", &details.suite_name);
        print_field("Status", &details.status);
        print_field("Started", &details.started_at);
        if let Some(ended) = &details.ended_at {
            print_field("Ended", ended);
        }

        if !details.tests.is_empty() {
            println!();
            print_table_header(&[("TEST", 30), ("STATUS", 10), ("ERROR", 40)]);
            for test in &details.tests {
                let error = test.error.as_deref().unwrap_or("-");
                print_table_row(&[(&test.test_name, 30), (&test.status, 10), (error, 40)]);
            }
        }
    } else {
        let view = RunDetailsView {
            run_id: details.run_id,
            suite_name: details.suite_name,
            status: details.status,
            started_at: details.started_at,
            ended_at: details.ended_at,
            tests: details
                .tests
                .into_iter()
                .map(|t| TestDetailsView {
                    test_name: t.test_name,
                    status: t.status,
                    started_at: t.started_at,
                    ended_at: t.ended_at,
                    error: t.error,
                })
                .collect(),
        };
        output.print_value(&view);
    }

    Ok(())
}

async fn cancel(client: &mut Client, output: OutputFormat, run_id: String) -> Result<()> {
    let response = client.cancel_run(run_id).await?;

    if output.is_text() {
        println!("{}", response.message);
    } else {
        output.print_value(&serde_json::json!({
            "success": response.success,
            "message": response.message,
        }));
    }

    Ok(())
}
