use anyhow::Result;
use clap::{Parser, Subcommand};
use shelfkeeper::runner::record::{JobGroup, JobTrigger};
use shelfkeeper::runner::{batch, JobRunner, RunContext};
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "shelfkeeper",
    about = "Scheduled maintenance jobs for the Shelfkeeper digital library",
    version,
    long_about = None
)]
struct Cli {
    /// SQLite database path
    #[arg(long, global = true, default_value = "data/shelfkeeper.db")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job group's batch (fail-fast; exit code 1 on any failure)
    Run {
        /// Job group to run
        #[arg(long, default_value = "daily")]
        group: JobGroup,

        /// Who fired the batch: system (cron) or manual
        #[arg(long, default_value = "system")]
        trigger: JobTrigger,
    },

    /// Run a single registered job outside its schedule
    RunJob {
        /// Job name as recorded in the log
        #[arg(long)]
        name: String,

        /// Group tag to record the run under
        #[arg(long, default_value = "daily")]
        group: JobGroup,
    },

    /// List registered jobs
    Jobs,

    /// Show recent job log records
    History {
        /// Filter by job group
        #[arg(long)]
        group: Option<JobGroup>,

        /// Number of records to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { group, trigger } => {
            tracing::info!(%group, %trigger, "Starting batch");
            let pool = shelfkeeper::storage::open_pool(&cli.db)?;
            let jobs = shelfkeeper::jobs::for_group(group);
            if jobs.is_empty() {
                anyhow::bail!("No jobs registered for group '{group}'");
            }

            let ctx = RunContext { group, trigger };
            let result = batch::run_batch(&pool, ctx, &jobs).await?;

            match &result.failed {
                None => println!(
                    "All {} jobs completed successfully in {:.2}s",
                    result.succeeded.len(),
                    result.total_duration.as_secs_f64()
                ),
                Some(f) => eprintln!("Batch aborted: job '{}' failed: {}", f.name, f.error),
            }

            Ok(ExitCode::from(result.exit_code()))
        }

        Commands::RunJob { name, group } => {
            let Some(job) = shelfkeeper::jobs::find_job(&name) else {
                anyhow::bail!("Unknown job '{name}'. Use 'shelfkeeper jobs' to list jobs.");
            };

            let pool = shelfkeeper::storage::open_pool(&cli.db)?;
            let runner = JobRunner::new(pool);
            let ctx = RunContext {
                group,
                trigger: JobTrigger::Manual,
            };

            match runner.run_with_log(ctx, None, job.as_ref()).await {
                Ok(result) => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => {
                    eprintln!("Job '{name}' failed: {err}");
                    Ok(ExitCode::from(1))
                }
            }
        }

        Commands::Jobs => {
            println!("{:<25} | Group", "Job");
            println!("{:-<25}-|-{:-<10}", "", "");
            for job in shelfkeeper::jobs::daily_jobs() {
                println!("{:<25} | daily", job.name());
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::History { group, limit } => {
            let pool = shelfkeeper::storage::open_pool(&cli.db)?;
            let rows = shelfkeeper::storage::list_job_logs(&pool, group, limit)?;

            if rows.is_empty() {
                println!("No job log records found.");
            } else {
                println!(
                    "{:<5} | {:<25} | {:<8} | {:<8} | {:<25} | {:>8} | Error",
                    "ID", "Job", "Group", "Status", "Started", "Dur (ms)"
                );
                println!(
                    "{:-<5}-|-{:-<25}-|-{:-<8}-|-{:-<8}-|-{:-<25}-|-{:-<8}-|-{:-<20}",
                    "", "", "", "", "", "", ""
                );
                for row in rows {
                    println!(
                        "{:<5} | {:<25} | {:<8} | {:<8} | {:<25} | {:>8} | {}",
                        row.id,
                        row.job_name,
                        row.group,
                        row.status,
                        row.started_at,
                        row.duration_ms,
                        row.error.as_deref().unwrap_or("-")
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
