//! `selvedge migrate` and `selvedge rollback`

use anyhow::Context;

use selvedge_migrate::runner::{MigrationRun, StepStatus};
use selvedge_migrate::{catalog, connect, DatabaseConfig, MigrationRunner};

pub async fn run() -> anyhow::Result<()> {
    let config = DatabaseConfig::from_env().context("database configuration")?;
    let pool = connect(&config).await.context("connecting to database")?;
    let runner = MigrationRunner::new(pool);

    let steps = catalog::steps();
    println!("Applying {} migration steps", steps.len());

    let run = runner.run(&steps).await?;
    print_run(&run);
    fail_on_halt(&run)
}

pub async fn rollback() -> anyhow::Result<()> {
    let config = DatabaseConfig::from_env().context("database configuration")?;
    let pool = connect(&config).await.context("connecting to database")?;
    let runner = MigrationRunner::new(pool);

    let steps = catalog::steps();
    println!("Reverting {} migration steps (reverse order)", steps.len());

    let run = runner.revert(&steps).await?;
    print_run(&run);
    fail_on_halt(&run)
}

fn print_run(run: &MigrationRun) {
    for outcome in &run.outcomes {
        match &outcome.status {
            StepStatus::Applied { backfill: Some(report) } => println!(
                "  applied  {} ({} ms, matched {}, unmatched {})",
                outcome.step, outcome.duration_ms, report.matched_count, report.unmatched_count
            ),
            StepStatus::Applied { backfill: None } => {
                println!("  applied  {} ({} ms)", outcome.step, outcome.duration_ms)
            }
            StepStatus::Skipped => println!("  skipped  {}", outcome.step),
            // The database error goes out verbatim: this is an operator
            // tool, not a public API.
            StepStatus::Failed { error } => println!("  FAILED   {}: {}", outcome.step, error),
        }
    }
    println!(
        "{} applied, {} skipped",
        run.applied_count(),
        run.skipped_count()
    );
}

fn fail_on_halt(run: &MigrationRun) -> anyhow::Result<()> {
    match run.failure() {
        Some(failure) => anyhow::bail!(
            "run halted at step '{}'; earlier steps remain committed and the \
             sequence is safe to re-run after inspection",
            failure.step
        ),
        None => Ok(()),
    }
}
