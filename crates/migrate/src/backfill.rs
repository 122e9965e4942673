//! Backfill Engine
//!
//! Populates a freshly added foreign-key column in bulk by joining the target
//! table's legacy string natural key against the source table. Updates run in
//! batches so a single statement never locks or materializes more rows than
//! `batch_size`, which matters when the table is large and the database is
//! serving production traffic.
//!
//! The backfill is restartable: only rows whose foreign key is still NULL are
//! ever touched, so re-running it once all matches are resolved updates zero
//! rows. Rows with a pre-existing non-null foreign key are left alone even if
//! their natural key would resolve to a different source row, to avoid
//! clobbering manual corrections.
//!
//! When several source rows share a natural key, the lowest source id wins.
//! That tie-break is deterministic but not semantically principled; callers
//! with duplicated natural keys should clean the source data first.

use serde::Serialize;
use sqlx::{PgConnection, Row};

use crate::error::{MigrateError, MigrateResult};

/// Describes one foreign-key backfill.
#[derive(Debug, Clone, Serialize)]
pub struct BackfillSpec {
    /// Table holding the surrogate ids to resolve to.
    pub source_table: String,
    /// Primary-key column on the source table (usually `id`).
    pub source_id_column: String,
    /// Natural-key column on the source table.
    pub source_natural_key: String,
    /// Table whose foreign-key column gets populated.
    pub target_table: String,
    /// Primary-key column on the target table (usually `id`).
    pub target_id_column: String,
    /// Natural-key column on the target table.
    pub target_natural_key: String,
    /// Foreign-key column to populate.
    pub target_fk_column: String,
    /// Maximum rows resolved per UPDATE statement.
    pub batch_size: u32,
}

impl BackfillSpec {
    /// A spec joining `target.natural_key` to `source.natural_key`, resolving
    /// into `target.fk_column`, with `id` primary keys on both sides.
    pub fn new(
        source_table: impl Into<String>,
        target_table: impl Into<String>,
        natural_key: impl Into<String>,
        fk_column: impl Into<String>,
    ) -> Self {
        let natural_key = natural_key.into();
        Self {
            source_table: source_table.into(),
            source_id_column: "id".to_string(),
            source_natural_key: natural_key.clone(),
            target_table: target_table.into(),
            target_id_column: "id".to_string(),
            target_natural_key: natural_key,
            target_fk_column: fk_column.into(),
            batch_size: 1000,
        }
    }

    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// UPDATE statement resolving one batch of NULL-FK rows.
    ///
    /// `MIN` on the source id makes the duplicate-natural-key tie-break
    /// deterministic. The `IS NULL` guard keeps the statement restartable and
    /// non-destructive.
    pub(crate) fn batch_update_sql(&self) -> String {
        format!(
            "WITH pending AS (\n    \
                 SELECT t.{target_id} AS target_id, MIN(s.{source_id}) AS resolved_id\n    \
                 FROM {target} t\n    \
                 JOIN {source} s ON s.{source_nat} = t.{target_nat}\n    \
                 WHERE t.{fk} IS NULL\n    \
                 GROUP BY t.{target_id}\n    \
                 ORDER BY t.{target_id}\n    \
                 LIMIT {batch}\n\
             )\n\
             UPDATE {target} AS t\n\
             SET {fk} = pending.resolved_id\n\
             FROM pending\n\
             WHERE t.{target_id} = pending.target_id",
            target = self.target_table,
            source = self.source_table,
            target_id = self.target_id_column,
            source_id = self.source_id_column,
            source_nat = self.source_natural_key,
            target_nat = self.target_natural_key,
            fk = self.target_fk_column,
            batch = self.batch_size,
        )
    }

    /// Counts target rows still carrying a NULL foreign key.
    pub(crate) fn unmatched_count_sql(&self) -> String {
        format!(
            "SELECT COUNT(*) AS unmatched FROM {target} WHERE {fk} IS NULL",
            target = self.target_table,
            fk = self.target_fk_column,
        )
    }

    /// True when any target row carries a resolved (non-null) foreign key.
    /// Used as the revert postcondition: a reverted backfill leaves none.
    pub(crate) fn resolved_probe_sql(&self) -> String {
        format!(
            "SELECT EXISTS(SELECT 1 FROM {target} WHERE {fk} IS NOT NULL) AS resolved",
            target = self.target_table,
            fk = self.target_fk_column,
        )
    }

    /// True when at least one NULL-FK row still has a joinable natural key.
    /// Used as the step precondition probe: the backfill's effect is data,
    /// not schema, so the snapshot alone cannot answer it.
    pub(crate) fn pending_probe_sql(&self) -> String {
        format!(
            "SELECT EXISTS(\n    \
                 SELECT 1 FROM {target} t\n    \
                 JOIN {source} s ON s.{source_nat} = t.{target_nat}\n    \
                 WHERE t.{fk} IS NULL\n\
             ) AS pending",
            target = self.target_table,
            source = self.source_table,
            source_nat = self.source_natural_key,
            target_nat = self.target_natural_key,
            fk = self.target_fk_column,
        )
    }
}

/// Outcome of one backfill pass.
#[derive(Debug, Clone, Serialize)]
pub struct BackfillReport {
    /// Rows whose foreign key was populated by this pass.
    pub matched_count: u64,
    /// Rows left with a NULL foreign key because no source row carries their
    /// natural key. Reported, not an error: orphaned legacy rows are expected
    /// and must not block the migration.
    pub unmatched_count: u64,
}

/// Run a backfill to completion on the given connection.
///
/// Loops one batched UPDATE at a time until a batch resolves zero rows, then
/// counts the leftovers. When invoked through the runner this executes inside
/// the step's transaction.
pub async fn backfill(
    conn: &mut PgConnection,
    spec: &BackfillSpec,
) -> MigrateResult<BackfillReport> {
    let update_sql = spec.batch_update_sql();
    let mut matched_count: u64 = 0;

    loop {
        let result = sqlx::query(&update_sql)
            .execute(&mut *conn)
            .await
            .map_err(|e| MigrateError::Step {
                step: format!("backfill {}.{}", spec.target_table, spec.target_fk_column),
                source: e,
            })?;

        let resolved = result.rows_affected();
        if resolved == 0 {
            break;
        }
        matched_count += resolved;
        tracing::debug!(
            target_table = %spec.target_table,
            resolved,
            total = matched_count,
            "backfill batch resolved"
        );
    }

    let row = sqlx::query(&spec.unmatched_count_sql())
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| MigrateError::Step {
            step: format!("backfill {}.{}", spec.target_table, spec.target_fk_column),
            source: e,
        })?;
    let unmatched: i64 = row.try_get("unmatched").map_err(MigrateError::Inspector)?;
    let unmatched_count = unmatched.max(0) as u64;

    if unmatched_count > 0 {
        tracing::warn!(
            target_table = %spec.target_table,
            fk_column = %spec.target_fk_column,
            unmatched_count,
            "backfill left rows without a match; orphaned natural keys remain NULL"
        );
    }

    Ok(BackfillReport {
        matched_count,
        unmatched_count,
    })
}

/// True when no joinable NULL-FK row remains.
pub(crate) async fn is_complete(
    conn: &mut PgConnection,
    spec: &BackfillSpec,
) -> MigrateResult<bool> {
    let row = sqlx::query(&spec.pending_probe_sql())
        .fetch_one(conn)
        .await
        .map_err(MigrateError::Inspector)?;
    let pending: bool = row.try_get("pending").map_err(MigrateError::Inspector)?;
    Ok(!pending)
}

/// True when no target row carries a resolved foreign key.
pub(crate) async fn is_unresolved(
    conn: &mut PgConnection,
    spec: &BackfillSpec,
) -> MigrateResult<bool> {
    let row = sqlx::query(&spec.resolved_probe_sql())
        .fetch_one(conn)
        .await
        .map_err(MigrateError::Inspector)?;
    let resolved: bool = row.try_get("resolved").map_err(MigrateError::Inspector)?;
    Ok(!resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> BackfillSpec {
        BackfillSpec::new("samples", "sample_tna", "sample_id", "sample_fk_id")
    }

    #[test]
    fn new_spec_shares_natural_key_and_defaults() {
        let spec = sample_spec();
        assert_eq!(spec.source_natural_key, "sample_id");
        assert_eq!(spec.target_natural_key, "sample_id");
        assert_eq!(spec.source_id_column, "id");
        assert_eq!(spec.batch_size, 1000);
    }

    #[test]
    fn batch_update_guards_null_fk_only() {
        let sql = sample_spec().batch_update_sql();
        assert!(sql.contains("WHERE t.sample_fk_id IS NULL"));
        assert!(sql.contains("JOIN samples s ON s.sample_id = t.sample_id"));
        assert!(sql.contains("UPDATE sample_tna AS t"));
    }

    #[test]
    fn batch_update_breaks_duplicates_with_min_id() {
        let sql = sample_spec().batch_update_sql();
        assert!(sql.contains("MIN(s.id)"));
    }

    #[test]
    fn batch_update_respects_batch_size() {
        let sql = sample_spec().batch_size(1).batch_update_sql();
        assert!(sql.contains("LIMIT 1"));
    }

    #[test]
    fn unmatched_count_counts_remaining_nulls() {
        let sql = sample_spec().unmatched_count_sql();
        assert_eq!(
            sql,
            "SELECT COUNT(*) AS unmatched FROM sample_tna WHERE sample_fk_id IS NULL"
        );
    }

    #[test]
    fn resolved_probe_checks_for_non_null_fk() {
        let sql = sample_spec().resolved_probe_sql();
        assert_eq!(
            sql,
            "SELECT EXISTS(SELECT 1 FROM sample_tna WHERE sample_fk_id IS NOT NULL) AS resolved"
        );
    }

    #[test]
    fn pending_probe_joins_on_natural_key() {
        let sql = sample_spec().pending_probe_sql();
        assert!(sql.contains("SELECT EXISTS("));
        assert!(sql.contains("s.sample_id = t.sample_id"));
        assert!(sql.contains("t.sample_fk_id IS NULL"));
    }
}
