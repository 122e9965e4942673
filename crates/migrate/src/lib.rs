//! # selvedge-migrate: schema migration and backfill engine
//!
//! Idempotent, ordered, per-step-transactional schema evolution for
//! PostgreSQL, with bulk foreign-key backfill from legacy string natural
//! keys.
//!
//! There is no migration-history ledger table. Whether a step has run is
//! decided solely by inspecting the live schema (and, for backfills, the
//! data): each step carries a precise precondition, the runner takes a fresh
//! [`inspector::SchemaSnapshot`] before every decision, skips satisfied
//! steps, and asserts each step's postcondition inside the step's own
//! transaction before committing.

pub mod backfill;
pub mod catalog;
pub mod database;
pub mod error;
pub mod inspector;
pub mod runner;
pub mod seeding;
pub mod step;

pub use backfill::{backfill, BackfillReport, BackfillSpec};
pub use database::{connect, DatabaseConfig};
pub use error::{MigrateError, MigrateResult};
pub use inspector::{Inspector, SchemaSnapshot};
pub use runner::{MigrationRun, MigrationRunner, StepOutcome, StepStatus};
pub use seeding::{SeedRunner, Seeder};
pub use step::{MigrationStep, StepAction};
