//! `selvedge status`

use anyhow::Context;

use selvedge_migrate::{catalog, connect, DatabaseConfig, MigrationRunner};

pub async fn run(json: bool) -> anyhow::Result<()> {
    let config = DatabaseConfig::from_env().context("database configuration")?;
    let pool = connect(&config).await.context("connecting to database")?;
    let runner = MigrationRunner::new(pool);

    let steps = catalog::steps();
    let lines = runner.status(&steps).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&lines)?);
        return Ok(());
    }

    let pending = lines.iter().filter(|l| !l.satisfied).count();
    for line in &lines {
        let marker = if line.satisfied { "satisfied" } else { "pending  " };
        println!("  {} {}", marker, line.step);
    }
    println!("{} of {} steps pending", pending, lines.len());
    Ok(())
}
