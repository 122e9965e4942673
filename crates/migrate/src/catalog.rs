//! The shipped step catalog
//!
//! The ordered schema history of the garment-manufacturing ERP, expressed
//! with the generic step descriptors. The order in this file is load-bearing
//! data, not an accident of definition order: a foreign-key column is added
//! before it is backfilled, backfilled before it is indexed and constrained.
//! The runner consumes the list exactly as declared.

use crate::backfill::BackfillSpec;
use crate::step::{ColumnDef, ForeignKeyDef, IndexDef, MigrationStep, StepAction, TableDef, UniqueDef};

/// The full ordered migration sequence.
pub fn steps() -> Vec<MigrationStep> {
    let mut steps = Vec::new();
    steps.extend(normalize_sample_references());
    steps.extend(add_supplier_fields());
    steps.extend(add_performance_indexes());
    steps.extend(add_multicolor_support());
    steps.extend(add_set_and_size_support());
    steps.extend(add_user_department_access());
    steps.extend(relax_tna_sample_uniqueness());
    steps
}

/// Normalize `sample_tna` and `sample_plan`: both tables historically carried
/// only the string `sample_id` business identifier. Each gains a surrogate
/// `sample_fk_id` resolved against `samples`, then an index and a foreign-key
/// constraint. The column stays nullable: orphaned legacy rows with no match
/// in `samples` are expected and must not block the migration.
pub fn normalize_sample_references() -> Vec<MigrationStep> {
    let mut steps = Vec::new();
    for table in ["sample_tna", "sample_plan"] {
        steps.push(MigrationStep::new(
            format!("add_{}_sample_fk_column", table),
            StepAction::AddColumn {
                table: table.to_string(),
                column: ColumnDef::new("sample_fk_id", "INTEGER"),
            },
        ));
        steps.push(MigrationStep::new(
            format!("backfill_{}_sample_fk", table),
            StepAction::Backfill(BackfillSpec::new(
                "samples",
                table,
                "sample_id",
                "sample_fk_id",
            )),
        ));
        steps.push(MigrationStep::new(
            format!("index_{}_sample_fk", table),
            StepAction::CreateIndex(IndexDef::new(
                format!("idx_{}_sample_fk_id", table),
                table,
                &["sample_fk_id"],
            )),
        ));
        steps.push(MigrationStep::new(
            format!("constrain_{}_sample_fk", table),
            StepAction::AddForeignKey(ForeignKeyDef::new(
                format!("fk_{}_samples", table),
                table,
                "sample_fk_id",
                "samples",
                "id",
            )),
        ));
    }
    steps
}

/// Supplier master data grew three optional fields.
pub fn add_supplier_fields() -> Vec<MigrationStep> {
    ["supplier_type", "contact_person", "country"]
        .iter()
        .map(|field| {
            MigrationStep::new(
                format!("add_suppliers_{}", field),
                StepAction::AddColumn {
                    table: "suppliers".to_string(),
                    column: ColumnDef::new(*field, "VARCHAR"),
                },
            )
        })
        .collect()
}

/// Query-path indexes over the hot tables.
pub fn add_performance_indexes() -> Vec<MigrationStep> {
    let indexes = [
        ("idx_samples_submit_status", "samples", vec!["submit_status"]),
        ("idx_samples_sample_type", "samples", vec!["sample_type"]),
        ("idx_samples_created_at", "samples", vec!["created_at DESC"]),
        ("idx_samples_buyer_style", "samples", vec!["buyer_id", "style_id"]),
        ("idx_orders_order_status", "order_management", vec!["order_status"]),
        ("idx_orders_order_date", "order_management", vec!["order_date DESC"]),
        ("idx_orders_delivery_date", "order_management", vec!["delivery_date"]),
        ("idx_orders_buyer_status", "order_management", vec!["buyer_id", "order_status"]),
        ("idx_orders_created_at", "order_management", vec!["created_at DESC"]),
        ("idx_buyers_email", "buyers", vec!["email"]),
        ("idx_buyers_created_at", "buyers", vec!["created_at DESC"]),
        ("idx_suppliers_email", "suppliers", vec!["email"]),
        ("idx_suppliers_created_at", "suppliers", vec!["created_at DESC"]),
        ("idx_styles_buyer_id", "style_summaries", vec!["buyer_id"]),
        ("idx_styles_created_at", "style_summaries", vec!["created_at DESC"]),
        ("idx_contacts_buyer_id", "contact_persons", vec!["buyer_id"]),
        ("idx_contacts_supplier_id", "contact_persons", vec!["supplier_id"]),
        ("idx_shipping_buyer_id", "shipping_info", vec!["buyer_id"]),
        ("idx_sample_ops_sample_id", "sample_operations", vec!["sample_id"]),
    ];

    indexes
        .iter()
        .map(|(name, table, columns)| {
            let columns: Vec<&str> = columns.to_vec();
            MigrationStep::new(
                format!("create_{}", name),
                StepAction::CreateIndex(IndexDef::new(*name, *table, &columns)),
            )
        })
        .collect()
}

/// Multi-color garments: a polo can have differently colored body, collar,
/// and sleeves. Color parts move into their own table keyed to the variant.
pub fn add_multicolor_support() -> Vec<MigrationStep> {
    vec![
        MigrationStep::new(
            "create_style_variant_colors",
            StepAction::CreateTable(
                TableDef::new("style_variant_colors")
                    .column(ColumnDef::new("id", "SERIAL PRIMARY KEY"))
                    .column(ColumnDef::new("style_variant_id", "INTEGER").not_null())
                    .column(ColumnDef::new("part_name", "VARCHAR").not_null())
                    .column(ColumnDef::new("colour_name", "VARCHAR").not_null())
                    .column(ColumnDef::new("colour_code", "VARCHAR"))
                    .column(ColumnDef::new("sort_order", "INTEGER").not_null().default_sql("0"))
                    .column(
                        ColumnDef::new("created_at", "TIMESTAMPTZ").default_sql("now()"),
                    )
                    .column(ColumnDef::new("updated_at", "TIMESTAMPTZ"))
                    .foreign_key("style_variant_id", "style_variants", "id", true),
            ),
        ),
        MigrationStep::new(
            "index_variant_colors_variant_id",
            StepAction::CreateIndex(IndexDef::new(
                "idx_variant_colors_variant_id",
                "style_variant_colors",
                &["style_variant_id"],
            )),
        ),
        MigrationStep::new(
            "index_variant_colors_part_name",
            StepAction::CreateIndex(IndexDef::new(
                "idx_variant_colors_part_name",
                "style_variant_colors",
                &["part_name"],
            )),
        ),
        MigrationStep::new(
            "add_style_variants_is_multicolor",
            StepAction::AddColumn {
                table: "style_variants".to_string(),
                column: ColumnDef::new("is_multicolor", "BOOLEAN")
                    .not_null()
                    .default_sql("false"),
            },
        ),
        MigrationStep::new(
            "add_style_variants_display_name",
            StepAction::AddColumn {
                table: "style_variants".to_string(),
                column: ColumnDef::new("display_name", "VARCHAR"),
            },
        ),
    ]
}

/// Sets (top + bottom + jacket) and per-variant size runs.
pub fn add_set_and_size_support() -> Vec<MigrationStep> {
    vec![
        MigrationStep::new(
            "add_style_summaries_set_piece_count",
            StepAction::AddColumn {
                table: "style_summaries".to_string(),
                column: ColumnDef::new("set_piece_count", "INTEGER"),
            },
        ),
        MigrationStep::new(
            "add_style_variants_piece_name",
            StepAction::AddColumn {
                table: "style_variants".to_string(),
                column: ColumnDef::new("piece_name", "VARCHAR"),
            },
        ),
        MigrationStep::new(
            "add_style_variants_sizes",
            StepAction::AddColumn {
                table: "style_variants".to_string(),
                column: ColumnDef::new("sizes", "JSONB"),
            },
        ),
    ]
}

/// Per-user department visibility, stored as a JSON array of department ids.
pub fn add_user_department_access() -> Vec<MigrationStep> {
    vec![MigrationStep::new(
        "add_users_department_access",
        StepAction::AddColumn {
            table: "users".to_string(),
            column: ColumnDef::new("department_access", "JSONB").default_sql("'[]'::jsonb"),
        },
    )]
}

/// Set pieces need one TNA record per piece for the same sample id, so the
/// unique constraint goes away; a plain index stays for lookup performance.
pub fn relax_tna_sample_uniqueness() -> Vec<MigrationStep> {
    vec![
        MigrationStep::new(
            "drop_sample_tna_sample_id_unique",
            StepAction::DropUnique(UniqueDef::new(
                "sample_tna_sample_id_key",
                "sample_tna",
                &["sample_id"],
            )),
        ),
        MigrationStep::new(
            "index_sample_tna_sample_id",
            StepAction::CreateIndex(IndexDef::new(
                "ix_sample_tna_sample_id",
                "sample_tna",
                &["sample_id"],
            )),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn step_names_are_unique() {
        let steps = steps();
        let names: HashSet<&str> = steps.iter().map(|s| s.name()).collect();
        assert_eq!(names.len(), steps.len());
    }

    #[test]
    fn fk_column_precedes_backfill_index_and_constraint() {
        let steps = steps();
        let position = |name: &str| {
            steps
                .iter()
                .position(|s| s.name() == name)
                .unwrap_or_else(|| panic!("missing step {}", name))
        };

        for table in ["sample_tna", "sample_plan"] {
            let add = position(&format!("add_{}_sample_fk_column", table));
            let backfill = position(&format!("backfill_{}_sample_fk", table));
            let index = position(&format!("index_{}_sample_fk", table));
            let constrain = position(&format!("constrain_{}_sample_fk", table));
            assert!(add < backfill, "{}: column must exist before backfill", table);
            assert!(backfill < index, "{}: backfill precedes index", table);
            assert!(index < constrain, "{}: index precedes constraint", table);
        }
    }

    #[test]
    fn backfill_steps_target_the_samples_table() {
        for step in normalize_sample_references() {
            if let StepAction::Backfill(spec) = step.action() {
                assert_eq!(spec.source_table, "samples");
                assert_eq!(spec.source_natural_key, "sample_id");
                assert_eq!(spec.target_fk_column, "sample_fk_id");
            }
        }
    }

    #[test]
    fn uniqueness_relaxation_keeps_a_plain_index() {
        let steps = relax_tna_sample_uniqueness();
        assert_eq!(steps.len(), 2);
        assert!(matches!(steps[0].action(), StepAction::DropUnique(_)));
        match steps[1].action() {
            StepAction::CreateIndex(def) => assert!(!def.unique),
            other => panic!("expected index step, got {:?}", other),
        }
    }

    #[test]
    fn performance_index_count_matches_schema_history() {
        assert_eq!(add_performance_indexes().len(), 19);
    }
}
