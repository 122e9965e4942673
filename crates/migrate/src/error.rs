//! Error types for the migration engine
//!
//! Every failure mode an operator can hit maps to one variant here. The
//! engine never retries on its own: a broken connection or a failed step is
//! surfaced immediately and the process exits non-zero.

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Error types for migration operations
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// The database is unreachable. Fatal to the run; retrying a broken
    /// connection indefinitely risks masking a real outage.
    #[error("database unreachable: {0}")]
    Connectivity(#[source] sqlx::Error),

    /// Schema metadata could not be read.
    #[error("schema inspection failed: {0}")]
    Inspector(#[source] sqlx::Error),

    /// A step's apply or revert failed. The step's transaction has been
    /// rolled back; commits from earlier steps stand.
    #[error("migration step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: sqlx::Error,
    },

    /// A step's apply completed without error but left the schema not
    /// satisfying its own precondition. Treated as a bug in the step
    /// definition, never silently ignored.
    #[error("migration step '{step}' completed but its postcondition does not hold")]
    Postcondition { step: String },

    /// Seeding was requested before the migration sequence completed
    /// successfully.
    #[error("schema is not ready: refusing to seed against a partially migrated database")]
    SchemaNotReady,

    /// A seeder failed while inserting baseline rows.
    #[error("seeder '{seeder}' failed: {source}")]
    Seeder {
        seeder: String,
        #[source]
        source: sqlx::Error,
    },

    /// Connection configuration is invalid (bad URL, missing environment).
    #[error("configuration error: {0}")]
    Configuration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_error_names_the_step() {
        let err = MigrateError::Step {
            step: "add_supplier_fields".to_string(),
            source: sqlx::Error::PoolClosed,
        };
        let msg = err.to_string();
        assert!(msg.contains("add_supplier_fields"));
    }

    #[test]
    fn postcondition_error_is_explicit() {
        let err = MigrateError::Postcondition {
            step: "normalize_sample_tna".to_string(),
        };
        assert!(err.to_string().contains("postcondition"));
        assert!(err.to_string().contains("normalize_sample_tna"));
    }

    #[test]
    fn schema_not_ready_refuses_seeding() {
        let err = MigrateError::SchemaNotReady;
        assert!(err.to_string().contains("refusing to seed"));
    }
}
