//! Baseline data seeding
//!
//! Seeders insert reference rows (an admin account, the operation master
//! list) once the schema is current. They are collaborators of the engine,
//! not part of it: the only coupling is the `schema_ready` signal from a
//! completed [`crate::runner::MigrationRun`], and the seed runner refuses to
//! touch the database while that signal is false.
//!
//! Every seeder is expected to check for its own marker rows and do nothing
//! when they already exist, so seeding is as re-runnable as migration.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::{MigrateError, MigrateResult};

/// A unit of baseline data.
#[async_trait]
pub trait Seeder: Send + Sync {
    /// Name used in logs and error reports.
    fn name(&self) -> &str;

    /// Lower numbers run first.
    fn priority(&self) -> i32 {
        100
    }

    /// Insert the seeder's rows. Must be a no-op when they already exist.
    async fn run(&self, pool: &PgPool) -> Result<(), sqlx::Error>;
}

/// Runs registered seeders in priority order behind the schema-ready gate.
pub struct SeedRunner {
    pool: PgPool,
    seeders: Vec<Box<dyn Seeder>>,
}

impl SeedRunner {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            seeders: Vec::new(),
        }
    }

    pub fn register(mut self, seeder: Box<dyn Seeder>) -> Self {
        self.seeders.push(seeder);
        self
    }

    /// Run every registered seeder, lowest priority number first.
    ///
    /// `schema_ready` is the completed migration run's signal; when false the
    /// runner refuses outright rather than inserting rows into a partially
    /// migrated schema.
    pub async fn run_all(&self, schema_ready: bool) -> MigrateResult<usize> {
        if !schema_ready {
            return Err(MigrateError::SchemaNotReady);
        }

        let mut order: Vec<&Box<dyn Seeder>> = self.seeders.iter().collect();
        order.sort_by_key(|s| s.priority());

        for seeder in &order {
            tracing::info!(seeder = %seeder.name(), "running seeder");
            seeder
                .run(&self.pool)
                .await
                .map_err(|e| MigrateError::Seeder {
                    seeder: seeder.name().to_string(),
                    source: e,
                })?;
        }

        Ok(order.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn lazy_pool() -> PgPool {
        // connect_lazy performs no I/O; good enough for gate tests.
        PgPoolOptions::new()
            .connect_lazy("postgres://localhost/selvedge_test")
            .unwrap()
    }

    struct RecordingSeeder {
        name: &'static str,
        priority: i32,
        log: Arc<AtomicUsize>,
        position: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Seeder for RecordingSeeder {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        async fn run(&self, _pool: &PgPool) -> Result<(), sqlx::Error> {
            self.position
                .store(self.log.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn refuses_to_seed_when_schema_not_ready() {
        let runner = SeedRunner::new(lazy_pool());
        let result = runner.run_all(false).await;
        assert!(matches!(result, Err(MigrateError::SchemaNotReady)));
    }

    #[tokio::test]
    async fn runs_seeders_in_priority_order() {
        let log = Arc::new(AtomicUsize::new(0));
        let first_pos = Arc::new(AtomicUsize::new(usize::MAX));
        let second_pos = Arc::new(AtomicUsize::new(usize::MAX));

        let runner = SeedRunner::new(lazy_pool())
            .register(Box::new(RecordingSeeder {
                name: "buyers",
                priority: 50,
                log: log.clone(),
                position: second_pos.clone(),
            }))
            .register(Box::new(RecordingSeeder {
                name: "admin_user",
                priority: 10,
                log: log.clone(),
                position: first_pos.clone(),
            }));

        let count = runner.run_all(true).await.unwrap();
        assert_eq!(count, 2);
        // admin_user has the lower priority number, so it ran first despite
        // being registered second.
        assert!(first_pos.load(Ordering::SeqCst) < second_pos.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn empty_registry_is_a_no_op() {
        let runner = SeedRunner::new(lazy_pool());
        assert_eq!(runner.run_all(true).await.unwrap(), 0);
    }
}
