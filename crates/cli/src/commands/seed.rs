//! `selvedge seed`
//!
//! Runs the migration sequence first (idempotent: an up-to-date schema skips
//! every step), then inserts baseline rows behind the schema-ready gate.
//! Each seeder checks for existing rows and does nothing on a populated
//! table, so seeding is as re-runnable as migration.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Row};

use selvedge_migrate::{catalog, connect, DatabaseConfig, MigrationRunner, SeedRunner, Seeder};

pub async fn run() -> anyhow::Result<()> {
    let config = DatabaseConfig::from_env().context("database configuration")?;
    let pool = connect(&config).await.context("connecting to database")?;
    let runner = MigrationRunner::new(pool.clone());

    let migration_run = runner.run(&catalog::steps()).await?;
    if let Some(failure) = migration_run.failure() {
        anyhow::bail!(
            "cannot seed: migration halted at step '{}'",
            failure.step
        );
    }

    let seeded = SeedRunner::new(pool)
        .register(Box::new(BaselineBuyers))
        .register(Box::new(BaselineSuppliers))
        .run_all(migration_run.schema_ready())
        .await?;

    println!("{} seeders completed", seeded);
    Ok(())
}

async fn table_is_empty(pool: &PgPool, table: &str) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {}", table))
        .fetch_one(pool)
        .await?;
    let n: i64 = row.try_get("n")?;
    Ok(n == 0)
}

/// Reference buyers, matching the dataset operators expect on a fresh
/// install.
struct BaselineBuyers;

#[async_trait]
impl Seeder for BaselineBuyers {
    fn name(&self) -> &str {
        "baseline_buyers"
    }

    fn priority(&self) -> i32 {
        10
    }

    async fn run(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        if !table_is_empty(pool, "buyers").await? {
            tracing::info!("buyers already populated, skipping");
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO buyers (buyer_name, brand_name) VALUES \
             ('H&M', 'H&M'), ('Zara', 'Zara'), ('C&A', 'C&A')",
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}

/// Reference suppliers, including the fields added by the supplier-fields
/// migration.
struct BaselineSuppliers;

#[async_trait]
impl Seeder for BaselineSuppliers {
    fn name(&self) -> &str {
        "baseline_suppliers"
    }

    fn priority(&self) -> i32 {
        20
    }

    async fn run(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        if !table_is_empty(pool, "suppliers").await? {
            tracing::info!("suppliers already populated, skipping");
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO suppliers (supplier_name, supplier_type, country) VALUES \
             ('Dhaka Knitwear Ltd', 'fabric', 'Bangladesh'), \
             ('Pacific Trims Co', 'trims', 'Vietnam')",
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}
