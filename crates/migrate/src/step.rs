//! Migration Step
//!
//! A step is an immutable descriptor: a name plus one [`StepAction`] drawn
//! from a closed set of schema operations. Each action knows how to render
//! its forward and reverse SQL and how to decide, against a fresh
//! [`SchemaSnapshot`], whether its effect is already present. That
//! precondition is the engine's only idempotence record: there is no
//! migration-history ledger table, so every predicate must be a precise,
//! inspectable condition rather than a side-channel flag.
//!
//! Schema actions answer `is_satisfied` from the snapshot alone. The
//! [`StepAction::Backfill`] action additionally probes the data through the
//! connection, because its effect lives in rows, not in the catalog.
//!
//! Steps never read or write outside their declared tables. Apply and revert
//! run inside the transaction the runner opens for them, so a failure leaves
//! either the full step effect or none of it.

use serde::Serialize;
use sqlx::PgConnection;

use crate::backfill::{self, BackfillReport, BackfillSpec};
use crate::error::{MigrateError, MigrateResult};
use crate::inspector::SchemaSnapshot;

/// A column declaration used by table and column steps.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: String,
    pub nullable: bool,
    pub default: Option<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable: true,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Raw SQL default expression, e.g. `false` or `'[]'::jsonb`.
    pub fn default_sql(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.sql_type);
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

/// A foreign-key clause on a new table.
#[derive(Debug, Clone, Serialize)]
pub struct TableForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
    pub on_delete_cascade: bool,
}

/// Full definition of a table, carried by both create and drop steps so each
/// direction can rebuild the other.
#[derive(Debug, Clone, Serialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub foreign_keys: Vec<TableForeignKey>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn foreign_key(
        mut self,
        column: impl Into<String>,
        references_table: impl Into<String>,
        references_column: impl Into<String>,
        on_delete_cascade: bool,
    ) -> Self {
        self.foreign_keys.push(TableForeignKey {
            column: column.into(),
            references_table: references_table.into(),
            references_column: references_column.into(),
            on_delete_cascade,
        });
        self
    }

    fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(|c| c.to_sql()).collect();
        for fk in &self.foreign_keys {
            let mut clause = format!(
                "FOREIGN KEY ({}) REFERENCES {} ({})",
                fk.column, fk.references_table, fk.references_column
            );
            if fk.on_delete_cascade {
                clause.push_str(" ON DELETE CASCADE");
            }
            parts.push(clause);
        }
        format!("CREATE TABLE {} (\n    {}\n)", self.name, parts.join(",\n    "))
    }
}

/// An index definition. Column entries are raw SQL expressions so ordered
/// indexes like `created_at DESC` can be declared directly.
#[derive(Debug, Clone, Serialize)]
pub struct IndexDef {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, table: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    fn create_sql(&self) -> String {
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if self.unique { "UNIQUE " } else { "" },
            self.name,
            self.table,
            self.columns.join(", ")
        )
    }
}

/// A named foreign-key constraint between existing tables.
#[derive(Debug, Clone, Serialize)]
pub struct ForeignKeyDef {
    pub name: String,
    pub table: String,
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

impl ForeignKeyDef {
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
        references_table: impl Into<String>,
        references_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            column: column.into(),
            references_table: references_table.into(),
            references_column: references_column.into(),
        }
    }

    fn add_sql(&self) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.table, self.name, self.column, self.references_table, self.references_column
        )
    }

    fn drop_sql(&self) -> String {
        format!("ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}", self.table, self.name)
    }
}

/// A named unique constraint.
#[derive(Debug, Clone, Serialize)]
pub struct UniqueDef {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
}

impl UniqueDef {
    pub fn new(name: impl Into<String>, table: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn add_sql(&self) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
            self.table,
            self.name,
            self.columns.join(", ")
        )
    }

    fn drop_sql(&self) -> String {
        format!("ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}", self.table, self.name)
    }
}

/// The closed set of schema operations a step can perform.
#[derive(Debug, Clone, Serialize)]
pub enum StepAction {
    CreateTable(TableDef),
    DropTable(TableDef),
    AddColumn { table: String, column: ColumnDef },
    DropColumn { table: String, column: ColumnDef },
    CreateIndex(IndexDef),
    DropIndex(IndexDef),
    AddForeignKey(ForeignKeyDef),
    DropForeignKey(ForeignKeyDef),
    AddUnique(UniqueDef),
    DropUnique(UniqueDef),
    SetColumnNotNull { table: String, column: String },
    MakeColumnNullable { table: String, column: String },
    Backfill(BackfillSpec),
}

impl StepAction {
    /// SQL applying this action. `None` for [`StepAction::Backfill`], whose
    /// apply is the batched engine loop rather than one statement.
    pub fn forward_sql(&self) -> Option<String> {
        match self {
            StepAction::CreateTable(def) => Some(def.create_sql()),
            StepAction::DropTable(def) => Some(format!("DROP TABLE IF EXISTS {}", def.name)),
            StepAction::AddColumn { table, column } => Some(format!(
                "ALTER TABLE {} ADD COLUMN {}",
                table,
                column.to_sql()
            )),
            StepAction::DropColumn { table, column } => Some(format!(
                "ALTER TABLE {} DROP COLUMN {}",
                table, column.name
            )),
            StepAction::CreateIndex(def) => Some(def.create_sql()),
            StepAction::DropIndex(def) => Some(format!("DROP INDEX IF EXISTS {}", def.name)),
            StepAction::AddForeignKey(def) => Some(def.add_sql()),
            StepAction::DropForeignKey(def) => Some(def.drop_sql()),
            StepAction::AddUnique(def) => Some(def.add_sql()),
            StepAction::DropUnique(def) => Some(def.drop_sql()),
            StepAction::SetColumnNotNull { table, column } => Some(format!(
                "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
                table, column
            )),
            StepAction::MakeColumnNullable { table, column } => Some(format!(
                "ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL",
                table, column
            )),
            StepAction::Backfill(_) => None,
        }
    }

    /// SQL reverting this action. `None` for [`StepAction::Backfill`]; its
    /// revert clears the populated column (see [`MigrationStep::revert`]).
    pub fn reverse_sql(&self) -> Option<String> {
        match self {
            StepAction::CreateTable(def) => Some(format!("DROP TABLE IF EXISTS {}", def.name)),
            StepAction::DropTable(def) => Some(def.create_sql()),
            StepAction::AddColumn { table, column } => Some(format!(
                "ALTER TABLE {} DROP COLUMN {}",
                table, column.name
            )),
            StepAction::DropColumn { table, column } => Some(format!(
                "ALTER TABLE {} ADD COLUMN {}",
                table,
                column.to_sql()
            )),
            StepAction::CreateIndex(def) => Some(format!("DROP INDEX IF EXISTS {}", def.name)),
            StepAction::DropIndex(def) => Some(def.create_sql()),
            StepAction::AddForeignKey(def) => Some(def.drop_sql()),
            StepAction::DropForeignKey(def) => Some(def.add_sql()),
            StepAction::AddUnique(def) => Some(def.drop_sql()),
            StepAction::DropUnique(def) => Some(def.add_sql()),
            StepAction::SetColumnNotNull { table, column } => Some(format!(
                "ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL",
                table, column
            )),
            StepAction::MakeColumnNullable { table, column } => Some(format!(
                "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
                table, column
            )),
            StepAction::Backfill(_) => None,
        }
    }

    /// Evaluate the precondition from schema metadata alone.
    ///
    /// `None` means the snapshot cannot answer and a data probe is required.
    /// That happens only for the backfill action, and only once its column
    /// and tables exist.
    pub fn schema_satisfied(&self, snapshot: &SchemaSnapshot) -> Option<bool> {
        match self {
            StepAction::CreateTable(def) => Some(snapshot.has_table(&def.name)),
            StepAction::DropTable(def) => Some(!snapshot.has_table(&def.name)),
            StepAction::AddColumn { table, column } => {
                Some(snapshot.has_column(table, &column.name))
            }
            StepAction::DropColumn { table, column } => {
                Some(!snapshot.has_column(table, &column.name))
            }
            StepAction::CreateIndex(def) => Some(snapshot.has_index(&def.name)),
            StepAction::DropIndex(def) => Some(!snapshot.has_index(&def.name)),
            StepAction::AddForeignKey(def) => Some(snapshot.has_constraint(&def.name)),
            StepAction::DropForeignKey(def) => Some(!snapshot.has_constraint(&def.name)),
            StepAction::AddUnique(def) => Some(snapshot.has_constraint(&def.name)),
            StepAction::DropUnique(def) => Some(!snapshot.has_constraint(&def.name)),
            StepAction::SetColumnNotNull { table, column } => Some(
                snapshot
                    .column(table, column)
                    .map(|c| !c.nullable)
                    .unwrap_or(false),
            ),
            StepAction::MakeColumnNullable { table, column } => Some(
                snapshot
                    .column(table, column)
                    .map(|c| c.nullable)
                    .unwrap_or(false),
            ),
            StepAction::Backfill(spec) => {
                if !snapshot.has_table(&spec.source_table)
                    || !snapshot.has_table(&spec.target_table)
                    || !snapshot.has_column(&spec.target_table, &spec.target_fk_column)
                {
                    return Some(false);
                }
                None
            }
        }
    }
}

/// One atomic, idempotent, reversible schema or backfill change.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStep {
    name: String,
    action: StepAction,
}

impl MigrationStep {
    pub fn new(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            action,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action(&self) -> &StepAction {
        &self.action
    }

    /// Whether the step's effect is already present.
    ///
    /// Calling apply on a satisfied step is safe, but the runner checks this
    /// first and skips instead.
    pub async fn is_satisfied(
        &self,
        snapshot: &SchemaSnapshot,
        conn: &mut PgConnection,
    ) -> MigrateResult<bool> {
        match self.action.schema_satisfied(snapshot) {
            Some(satisfied) => Ok(satisfied),
            None => match &self.action {
                StepAction::Backfill(spec) => backfill::is_complete(conn, spec).await,
                // schema_satisfied returns None only for Backfill
                _ => Ok(false),
            },
        }
    }

    /// Whether the step's effect is absent, i.e. the revert postcondition.
    ///
    /// For schema actions this is the negation of [`Self::is_satisfied`].
    /// For a backfill the two are not mirror images (on empty tables both
    /// "nothing pending" and "nothing resolved" hold), so revert is judged by
    /// whether any resolved foreign key remains.
    pub async fn is_reverted(
        &self,
        snapshot: &SchemaSnapshot,
        conn: &mut PgConnection,
    ) -> MigrateResult<bool> {
        match &self.action {
            StepAction::Backfill(spec) => {
                if !snapshot.has_table(&spec.target_table)
                    || !snapshot.has_column(&spec.target_table, &spec.target_fk_column)
                {
                    return Ok(true);
                }
                backfill::is_unresolved(conn, spec).await
            }
            _ => Ok(!self.is_satisfied(snapshot, conn).await?),
        }
    }

    /// Execute the step's forward action on the given connection.
    ///
    /// Runs inside the transaction the runner opened for this step. Returns
    /// the backfill report when the action is a backfill.
    pub async fn apply(&self, conn: &mut PgConnection) -> MigrateResult<Option<BackfillReport>> {
        if let StepAction::Backfill(spec) = &self.action {
            let report = backfill::backfill(conn, spec).await?;
            return Ok(Some(report));
        }

        if let Some(sql) = self.action.forward_sql() {
            tracing::debug!(step = %self.name, sql = %sql, "applying step");
            sqlx::query(&sql)
                .execute(conn)
                .await
                .map_err(|e| MigrateError::Step {
                    step: self.name.clone(),
                    source: e,
                })?;
        }
        Ok(None)
    }

    /// Execute the step's reverse action on the given connection.
    ///
    /// For a backfill this clears the populated foreign-key column; the
    /// resolved values are not preserved anywhere, matching the convention
    /// that a reverted normalization drops the column entirely in the
    /// following revert step.
    pub async fn revert(&self, conn: &mut PgConnection) -> MigrateResult<()> {
        let sql = match &self.action {
            StepAction::Backfill(spec) => format!(
                "UPDATE {} SET {} = NULL WHERE {} IS NOT NULL",
                spec.target_table, spec.target_fk_column, spec.target_fk_column
            ),
            _ => match self.action.reverse_sql() {
                Some(sql) => sql,
                None => return Ok(()),
            },
        };

        tracing::debug!(step = %self.name, sql = %sql, "reverting step");
        sqlx::query(&sql)
            .execute(conn)
            .await
            .map_err(|e| MigrateError::Step {
                step: self.name.clone(),
                source: e,
            })?;
        Ok(())
    }
}
