//! Schema Inspector
//!
//! Reads table, column, index, and constraint metadata from the live
//! database. Every migration decision (skip a step, assert a postcondition)
//! is made against a fresh [`SchemaSnapshot`], never a cached one, because a
//! prior step may have altered the schema.
//!
//! The inspector is strictly read-only and works against any reachable
//! database regardless of prior migration state.

use serde::Serialize;
use sqlx::{PgConnection, PgPool, Row};

use crate::error::{MigrateError, MigrateResult};

/// A column as declared in the live schema.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
}

/// A table with its columns in ordinal order.
#[derive(Debug, Clone, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

/// An index on a table.
#[derive(Debug, Clone, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Constraint kinds the inspector distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
    Check,
}

/// A table constraint. For foreign keys, `referenced_table` and
/// `referenced_columns` carry the target side.
#[derive(Debug, Clone, Serialize)]
pub struct ConstraintInfo {
    pub name: String,
    pub table: String,
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
    pub referenced_table: Option<String>,
    pub referenced_columns: Vec<String>,
}

/// Point-in-time view of the schema, used for idempotence decisions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaSnapshot {
    pub tables: Vec<TableInfo>,
    pub indexes: Vec<IndexInfo>,
    pub constraints: Vec<ConstraintInfo>,
}

impl SchemaSnapshot {
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t.name == table)
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.column(table, column).is_some()
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnInfo> {
        self.tables
            .iter()
            .find(|t| t.name == table)?
            .columns
            .iter()
            .find(|c| c.name == column)
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.iter().any(|i| i.name == name)
    }

    pub fn has_constraint(&self, name: &str) -> bool {
        self.constraints.iter().any(|c| c.name == name)
    }

    /// Constraints of a given kind on one table.
    pub fn constraints_on(&self, table: &str, kind: ConstraintKind) -> Vec<&ConstraintInfo> {
        self.constraints
            .iter()
            .filter(|c| c.table == table && c.kind == kind)
            .collect()
    }
}

const COLUMNS_SQL: &str = "\
    SELECT table_name, column_name, data_type, is_nullable, column_default \
    FROM information_schema.columns \
    WHERE table_schema = 'public' \
    ORDER BY table_name, ordinal_position";

const TABLES_SQL: &str = "\
    SELECT table_name \
    FROM information_schema.tables \
    WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
    ORDER BY table_name";

const INDEXES_SQL: &str = "\
    SELECT i.relname AS index_name, t.relname AS table_name, \
           ix.indisunique AS is_unique, a.attname AS column_name \
    FROM pg_class t \
    JOIN pg_index ix ON t.oid = ix.indrelid \
    JOIN pg_class i ON i.oid = ix.indexrelid \
    JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
    JOIN pg_namespace n ON n.oid = t.relnamespace \
    WHERE n.nspname = 'public' AND t.relkind = 'r' \
    ORDER BY i.relname, a.attnum";

const CONSTRAINTS_SQL: &str = "\
    SELECT tc.constraint_name, tc.table_name, tc.constraint_type, \
           kcu.column_name, ccu.table_name AS referenced_table, \
           ccu.column_name AS referenced_column \
    FROM information_schema.table_constraints tc \
    LEFT JOIN information_schema.key_column_usage kcu \
      ON kcu.constraint_name = tc.constraint_name \
     AND kcu.table_schema = tc.table_schema \
    LEFT JOIN information_schema.constraint_column_usage ccu \
      ON ccu.constraint_name = tc.constraint_name \
     AND ccu.table_schema = tc.table_schema \
    WHERE tc.table_schema = 'public' \
      AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE', 'FOREIGN KEY', 'CHECK') \
    ORDER BY tc.table_name, tc.constraint_name, kcu.ordinal_position";

/// Reads schema metadata through an explicitly provided pool.
pub struct Inspector {
    pool: PgPool,
}

impl Inspector {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Take a fresh snapshot on a pooled connection.
    pub async fn snapshot(&self) -> MigrateResult<SchemaSnapshot> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(MigrateError::Connectivity)?;
        Self::snapshot_with(&mut conn).await
    }

    /// Take a fresh snapshot through a specific connection.
    ///
    /// The runner uses this inside a step's open transaction so the
    /// postcondition check sees the step's uncommitted DDL.
    pub async fn snapshot_with(conn: &mut PgConnection) -> MigrateResult<SchemaSnapshot> {
        let tables = Self::read_tables(conn).await?;
        let indexes = Self::read_indexes(conn).await?;
        let constraints = Self::read_constraints(conn).await?;
        Ok(SchemaSnapshot {
            tables,
            indexes,
            constraints,
        })
    }

    async fn read_tables(conn: &mut PgConnection) -> MigrateResult<Vec<TableInfo>> {
        let table_rows = sqlx::query(TABLES_SQL)
            .fetch_all(&mut *conn)
            .await
            .map_err(MigrateError::Inspector)?;

        let mut tables: Vec<TableInfo> = table_rows
            .iter()
            .map(|row| {
                Ok(TableInfo {
                    name: row.try_get("table_name").map_err(MigrateError::Inspector)?,
                    columns: Vec::new(),
                })
            })
            .collect::<MigrateResult<_>>()?;

        let column_rows = sqlx::query(COLUMNS_SQL)
            .fetch_all(&mut *conn)
            .await
            .map_err(MigrateError::Inspector)?;

        for row in column_rows {
            let table: String = row.try_get("table_name").map_err(MigrateError::Inspector)?;
            let nullable: String = row.try_get("is_nullable").map_err(MigrateError::Inspector)?;
            let column = ColumnInfo {
                name: row.try_get("column_name").map_err(MigrateError::Inspector)?,
                data_type: row.try_get("data_type").map_err(MigrateError::Inspector)?,
                nullable: nullable == "YES",
                default: row
                    .try_get("column_default")
                    .map_err(MigrateError::Inspector)?,
            };
            if let Some(t) = tables.iter_mut().find(|t| t.name == table) {
                t.columns.push(column);
            }
        }

        Ok(tables)
    }

    async fn read_indexes(conn: &mut PgConnection) -> MigrateResult<Vec<IndexInfo>> {
        let rows = sqlx::query(INDEXES_SQL)
            .fetch_all(&mut *conn)
            .await
            .map_err(MigrateError::Inspector)?;

        let mut indexes: Vec<IndexInfo> = Vec::new();
        for row in rows {
            let name: String = row.try_get("index_name").map_err(MigrateError::Inspector)?;
            let column: String = row.try_get("column_name").map_err(MigrateError::Inspector)?;
            match indexes.iter_mut().find(|i| i.name == name) {
                Some(index) => index.columns.push(column),
                None => indexes.push(IndexInfo {
                    name,
                    table: row.try_get("table_name").map_err(MigrateError::Inspector)?,
                    columns: vec![column],
                    unique: row.try_get("is_unique").map_err(MigrateError::Inspector)?,
                }),
            }
        }

        Ok(indexes)
    }

    async fn read_constraints(conn: &mut PgConnection) -> MigrateResult<Vec<ConstraintInfo>> {
        let rows = sqlx::query(CONSTRAINTS_SQL)
            .fetch_all(&mut *conn)
            .await
            .map_err(MigrateError::Inspector)?;

        let mut constraints: Vec<ConstraintInfo> = Vec::new();
        for row in rows {
            let name: String = row
                .try_get("constraint_name")
                .map_err(MigrateError::Inspector)?;
            let column: Option<String> =
                row.try_get("column_name").map_err(MigrateError::Inspector)?;
            let referenced_column: Option<String> = row
                .try_get("referenced_column")
                .map_err(MigrateError::Inspector)?;

            // The join fans out one row per (column, referenced column) pair;
            // fold them back into a single constraint entry.
            let idx = match constraints.iter().position(|c| c.name == name) {
                Some(idx) => idx,
                None => {
                    let kind_str: String = row
                        .try_get("constraint_type")
                        .map_err(MigrateError::Inspector)?;
                    let kind = match kind_str.as_str() {
                        "PRIMARY KEY" => ConstraintKind::PrimaryKey,
                        "UNIQUE" => ConstraintKind::Unique,
                        "FOREIGN KEY" => ConstraintKind::ForeignKey,
                        _ => ConstraintKind::Check,
                    };
                    let referenced_table: Option<String> = row
                        .try_get("referenced_table")
                        .map_err(MigrateError::Inspector)?;
                    constraints.push(ConstraintInfo {
                        name,
                        table: row.try_get("table_name").map_err(MigrateError::Inspector)?,
                        kind,
                        columns: Vec::new(),
                        referenced_table: if kind == ConstraintKind::ForeignKey {
                            referenced_table
                        } else {
                            None
                        },
                        referenced_columns: Vec::new(),
                    });
                    constraints.len() - 1
                }
            };
            let entry = &mut constraints[idx];

            if let Some(column) = column {
                if !entry.columns.contains(&column) {
                    entry.columns.push(column);
                }
            }
            if entry.kind == ConstraintKind::ForeignKey {
                if let Some(rc) = referenced_column {
                    if !entry.referenced_columns.contains(&rc) {
                        entry.referenced_columns.push(rc);
                    }
                }
            }
        }

        Ok(constraints)
    }
}
