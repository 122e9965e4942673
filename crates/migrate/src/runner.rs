//! Migration Runner
//!
//! Executes an ordered sequence of steps, one transaction per step. For each
//! step in declaration order: take a fresh snapshot, skip if the step is
//! already satisfied, otherwise apply inside a transaction, re-inspect
//! through that same transaction, assert the step's own precondition now
//! holds, and commit. Any failure rolls the step back and halts the run;
//! commits from earlier steps stand, and the whole sequence is safe to re-run
//! because every step is independently idempotent.
//!
//! Step order is significant and is the caller's responsibility: a column
//! must exist before an index on it, a backfill must run after its column
//! exists and before any NOT NULL constraint on it. The runner deliberately
//! does not infer dependency order: the step count is small and manually
//! curated, and an explicit list is easier to review than a solver.
//!
//! Execution is strictly sequential on a single connection per step. There
//! is no timeout and no cancellation: this runs as an operator-invoked,
//! one-shot maintenance action, not on a live-traffic-serving path.
//!
//! The per-step atomicity guarantee leans on PostgreSQL's transactional DDL:
//! other connections see either the complete pre-step or complete post-step
//! schema. On engines with non-transactional DDL the guarantee would narrow
//! to data-only steps.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::backfill::BackfillReport;
use crate::error::{MigrateError, MigrateResult};
use crate::inspector::Inspector;
use crate::step::MigrationStep;

/// Outcome of one step within a run.
#[derive(Debug, Clone, Serialize)]
pub enum StepStatus {
    /// The step executed and its postcondition holds.
    Applied {
        backfill: Option<BackfillReport>,
    },
    /// The precondition already held; nothing executed.
    Skipped,
    /// The step failed; its transaction was rolled back.
    Failed { error: String },
}

/// One step's record in a [`MigrationRun`].
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub step: String,
    pub status: StepStatus,
    pub duration_ms: u128,
}

/// The record of one runner invocation.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<StepOutcome>,
}

impl MigrationRun {
    /// True once the sequence completed with no failures. The data seeder
    /// consumes this signal and refuses to insert sample rows when false.
    pub fn schema_ready(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| !matches!(o.status, StepStatus::Failed { .. }))
    }

    pub fn applied_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, StepStatus::Applied { .. }))
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, StepStatus::Skipped))
            .count()
    }

    /// The failing step, if the run halted.
    pub fn failure(&self) -> Option<&StepOutcome> {
        self.outcomes
            .iter()
            .find(|o| matches!(o.status, StepStatus::Failed { .. }))
    }
}

/// Satisfied/pending listing for one step, used by status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct StepStatusLine {
    pub step: String,
    pub satisfied: bool,
}

enum Direction {
    Forward,
    Reverse,
}

/// Orders and executes migration steps against a single database.
///
/// The pool is passed in explicitly; the runner exclusively owns each step's
/// transaction for the step's duration.
pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the steps in declaration order.
    ///
    /// Step failures are recorded in the returned run and halt it; only
    /// connectivity-class errors (pool unreachable) surface as `Err`.
    pub async fn run(&self, steps: &[MigrationStep]) -> MigrateResult<MigrationRun> {
        self.execute(steps.iter(), Direction::Forward).await
    }

    /// Revert the steps in reverse declaration order, with the same per-step
    /// transaction and postcondition discipline (the postcondition here is
    /// that the step's effect is absent).
    pub async fn revert(&self, steps: &[MigrationStep]) -> MigrateResult<MigrationRun> {
        self.execute(steps.iter().rev(), Direction::Reverse).await
    }

    /// Evaluate every step's precondition without mutating anything.
    pub async fn status(&self, steps: &[MigrationStep]) -> MigrateResult<Vec<StepStatusLine>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(MigrateError::Connectivity)?;
        let snapshot = Inspector::snapshot_with(&mut conn).await?;

        let mut lines = Vec::with_capacity(steps.len());
        for step in steps {
            let satisfied = step.is_satisfied(&snapshot, &mut conn).await?;
            lines.push(StepStatusLine {
                step: step.name().to_string(),
                satisfied,
            });
        }
        Ok(lines)
    }

    async fn execute<'a, I>(&self, steps: I, direction: Direction) -> MigrateResult<MigrationRun>
    where
        I: Iterator<Item = &'a MigrationStep>,
    {
        let started_at = Utc::now();
        let mut outcomes = Vec::new();

        for step in steps {
            match direction {
                Direction::Forward => println!("Running step: {}", step.name()),
                Direction::Reverse => println!("Reverting step: {}", step.name()),
            }

            let start = Instant::now();
            let result = match direction {
                Direction::Forward => self.execute_forward(step).await,
                Direction::Reverse => self.execute_reverse(step).await,
            };

            match result {
                Ok(status) => {
                    match &status {
                        StepStatus::Applied { backfill } => {
                            tracing::info!(step = %step.name(), "step applied");
                            if let Some(report) = backfill {
                                if report.unmatched_count > 0 {
                                    tracing::warn!(
                                        step = %step.name(),
                                        unmatched = report.unmatched_count,
                                        "backfill left unmatched rows"
                                    );
                                }
                            }
                        }
                        StepStatus::Skipped => {
                            tracing::info!(step = %step.name(), "step already satisfied, skipped");
                        }
                        StepStatus::Failed { .. } => {}
                    }
                    outcomes.push(StepOutcome {
                        step: step.name().to_string(),
                        status,
                        duration_ms: start.elapsed().as_millis(),
                    });
                }
                Err(MigrateError::Connectivity(e)) => {
                    // Unreachable database is fatal outright; there is no
                    // meaningful partial outcome to record.
                    return Err(MigrateError::Connectivity(e));
                }
                Err(e) => {
                    tracing::error!(step = %step.name(), error = %e, "step failed, halting run");
                    outcomes.push(StepOutcome {
                        step: step.name().to_string(),
                        status: StepStatus::Failed {
                            error: e.to_string(),
                        },
                        duration_ms: start.elapsed().as_millis(),
                    });
                    break;
                }
            }
        }

        Ok(MigrationRun {
            started_at,
            finished_at: Utc::now(),
            outcomes,
        })
    }

    async fn execute_forward(&self, step: &MigrationStep) -> MigrateResult<StepStatus> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(MigrateError::Connectivity)?;
        let snapshot = Inspector::snapshot_with(&mut conn).await?;
        if step.is_satisfied(&snapshot, &mut conn).await? {
            return Ok(StepStatus::Skipped);
        }
        drop(conn);

        let mut tx = self.pool.begin().await.map_err(MigrateError::Connectivity)?;
        let backfill = match step.apply(&mut tx).await {
            Ok(report) => report,
            Err(e) => {
                tx.rollback().await.ok();
                return Err(e);
            }
        };

        // Postcondition: the step's own precondition must hold now. Checked
        // through the still-open transaction so a violation rolls the whole
        // step back. Catches steps whose apply silently did the wrong thing.
        let post = Inspector::snapshot_with(&mut tx).await?;
        if !step.is_satisfied(&post, &mut tx).await? {
            tx.rollback().await.ok();
            return Err(MigrateError::Postcondition {
                step: step.name().to_string(),
            });
        }

        tx.commit().await.map_err(|e| MigrateError::Step {
            step: step.name().to_string(),
            source: e,
        })?;

        Ok(StepStatus::Applied { backfill })
    }

    async fn execute_reverse(&self, step: &MigrationStep) -> MigrateResult<StepStatus> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(MigrateError::Connectivity)?;
        let snapshot = Inspector::snapshot_with(&mut conn).await?;
        if step.is_reverted(&snapshot, &mut conn).await? {
            return Ok(StepStatus::Skipped);
        }
        drop(conn);

        let mut tx = self.pool.begin().await.map_err(MigrateError::Connectivity)?;
        if let Err(e) = step.revert(&mut tx).await {
            tx.rollback().await.ok();
            return Err(e);
        }

        let post = Inspector::snapshot_with(&mut tx).await?;
        if !step.is_reverted(&post, &mut tx).await? {
            tx.rollback().await.ok();
            return Err(MigrateError::Postcondition {
                step: step.name().to_string(),
            });
        }

        tx.commit().await.map_err(|e| MigrateError::Step {
            step: step.name().to_string(),
            source: e,
        })?;

        Ok(StepStatus::Applied { backfill: None })
    }
}
