//! End-to-end properties against a real PostgreSQL database.
//!
//! These tests mutate schema and data, so they are ignored by default. Point
//! `DATABASE_URL` at a disposable database and run with `--ignored` to
//! exercise them.

use sqlx::{PgPool, Row};

use selvedge_migrate::backfill::{backfill, BackfillSpec};
use selvedge_migrate::runner::{MigrationRunner, StepStatus};
use selvedge_migrate::step::{ColumnDef, MigrationStep, StepAction};

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a test database");
    PgPool::connect(&url).await.expect("connect to test database")
}

async fn reset(pool: &PgPool, tables: &[&str]) {
    for table in tables {
        sqlx::query(&format!("DROP TABLE IF EXISTS {} CASCADE", table))
            .execute(pool)
            .await
            .unwrap();
    }
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database via DATABASE_URL"]
async fn backfill_resolves_matches_and_reports_orphans() {
    let pool = test_pool().await;
    reset(&pool, &["bf_items", "bf_sources"]).await;

    sqlx::query("CREATE TABLE bf_sources (id INTEGER PRIMARY KEY, natural_key VARCHAR)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "CREATE TABLE bf_items (id SERIAL PRIMARY KEY, natural_key VARCHAR, source_fk_id INTEGER)",
    )
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query("INSERT INTO bf_sources (id, natural_key) VALUES (1, 'A'), (2, 'B')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO bf_items (natural_key) VALUES ('A'), ('B'), ('C')")
        .execute(&pool)
        .await
        .unwrap();

    let spec = BackfillSpec {
        source_table: "bf_sources".into(),
        source_id_column: "id".into(),
        source_natural_key: "natural_key".into(),
        target_table: "bf_items".into(),
        target_id_column: "id".into(),
        target_natural_key: "natural_key".into(),
        target_fk_column: "source_fk_id".into(),
        batch_size: 1,
    };

    let mut conn = pool.acquire().await.unwrap();
    let report = backfill(&mut conn, &spec).await.unwrap();
    assert_eq!(report.matched_count, 2);
    assert_eq!(report.unmatched_count, 1);

    let rows = sqlx::query("SELECT natural_key, source_fk_id FROM bf_items ORDER BY id")
        .fetch_all(&pool)
        .await
        .unwrap();
    let resolved: Vec<(String, Option<i32>)> = rows
        .iter()
        .map(|r| (r.get("natural_key"), r.get("source_fk_id")))
        .collect();
    assert_eq!(
        resolved,
        vec![
            ("A".to_string(), Some(1)),
            ("B".to_string(), Some(2)),
            ("C".to_string(), None),
        ]
    );

    // Re-running touches zero additional rows.
    let again = backfill(&mut conn, &spec).await.unwrap();
    assert_eq!(again.matched_count, 0);
    assert_eq!(again.unmatched_count, 1);

    reset(&pool, &["bf_items", "bf_sources"]).await;
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database via DATABASE_URL"]
async fn backfill_never_overwrites_manual_corrections() {
    let pool = test_pool().await;
    reset(&pool, &["bf_corrected", "bf_lookup"]).await;

    sqlx::query("CREATE TABLE bf_lookup (id INTEGER PRIMARY KEY, natural_key VARCHAR)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "CREATE TABLE bf_corrected (id SERIAL PRIMARY KEY, natural_key VARCHAR, lookup_fk_id INTEGER)",
    )
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query("INSERT INTO bf_lookup (id, natural_key) VALUES (1, 'A'), (99, 'MANUAL')")
        .execute(&pool)
        .await
        .unwrap();
    // The row already carries a manually corrected foreign key that the
    // natural key would NOT resolve to.
    sqlx::query("INSERT INTO bf_corrected (natural_key, lookup_fk_id) VALUES ('A', 99)")
        .execute(&pool)
        .await
        .unwrap();

    let spec = BackfillSpec {
        source_table: "bf_lookup".into(),
        source_id_column: "id".into(),
        source_natural_key: "natural_key".into(),
        target_table: "bf_corrected".into(),
        target_id_column: "id".into(),
        target_natural_key: "natural_key".into(),
        target_fk_column: "lookup_fk_id".into(),
        batch_size: 100,
    };

    let mut conn = pool.acquire().await.unwrap();
    let report = backfill(&mut conn, &spec).await.unwrap();
    assert_eq!(report.matched_count, 0);

    let fk: i32 = sqlx::query("SELECT lookup_fk_id FROM bf_corrected")
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("lookup_fk_id");
    assert_eq!(fk, 99);

    reset(&pool, &["bf_corrected", "bf_lookup"]).await;
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database via DATABASE_URL"]
async fn failed_step_halts_run_and_preserves_prior_commits() {
    let pool = test_pool().await;
    reset(&pool, &["iso_widgets"]).await;

    sqlx::query("CREATE TABLE iso_widgets (id SERIAL PRIMARY KEY)")
        .execute(&pool)
        .await
        .unwrap();

    let steps = vec![
        MigrationStep::new(
            "add_widget_label",
            StepAction::AddColumn {
                table: "iso_widgets".into(),
                column: ColumnDef::new("label", "VARCHAR"),
            },
        ),
        // Declared out of order on purpose: the column this constraint
        // targets is never added.
        MigrationStep::new(
            "constrain_missing_column",
            StepAction::SetColumnNotNull {
                table: "iso_widgets".into(),
                column: "no_such_column".into(),
            },
        ),
        MigrationStep::new(
            "add_widget_grade",
            StepAction::AddColumn {
                table: "iso_widgets".into(),
                column: ColumnDef::new("grade", "VARCHAR"),
            },
        ),
    ];

    let runner = MigrationRunner::new(pool.clone());
    let run = runner.run(&steps).await.unwrap();

    assert!(!run.schema_ready());
    assert_eq!(run.outcomes.len(), 2, "third step must never execute");
    assert!(matches!(run.outcomes[0].status, StepStatus::Applied { .. }));
    assert!(matches!(run.outcomes[1].status, StepStatus::Failed { .. }));

    // Step 1's effect is committed; step 3's is absent.
    let columns: Vec<String> = sqlx::query(
        "SELECT column_name FROM information_schema.columns WHERE table_name = 'iso_widgets'",
    )
    .fetch_all(&pool)
    .await
    .unwrap()
    .iter()
    .map(|r| r.get("column_name"))
    .collect();
    assert!(columns.contains(&"label".to_string()));
    assert!(!columns.contains(&"grade".to_string()));

    reset(&pool, &["iso_widgets"]).await;
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database via DATABASE_URL"]
async fn second_run_skips_every_step_and_revert_round_trips() {
    let pool = test_pool().await;
    reset(&pool, &["rt_garments"]).await;

    sqlx::query("CREATE TABLE rt_garments (id SERIAL PRIMARY KEY)")
        .execute(&pool)
        .await
        .unwrap();

    let steps = vec![
        MigrationStep::new(
            "add_garment_fabric",
            StepAction::AddColumn {
                table: "rt_garments".into(),
                column: ColumnDef::new("fabric", "VARCHAR"),
            },
        ),
        MigrationStep::new(
            "index_garment_fabric",
            StepAction::CreateIndex(selvedge_migrate::step::IndexDef::new(
                "idx_rt_garments_fabric",
                "rt_garments",
                &["fabric"],
            )),
        ),
    ];

    let runner = MigrationRunner::new(pool.clone());

    let first = runner.run(&steps).await.unwrap();
    assert!(first.schema_ready());
    assert_eq!(first.applied_count(), 2);

    // Idempotence: the second run applies nothing.
    let second = runner.run(&steps).await.unwrap();
    assert!(second.schema_ready());
    assert_eq!(second.applied_count(), 0);
    assert_eq!(second.skipped_count(), 2);

    // Revert walks back in reverse order and restores the pre-state.
    let reverted = runner.revert(&steps).await.unwrap();
    assert!(reverted.schema_ready());
    assert_eq!(reverted.applied_count(), 2);

    let columns: Vec<String> = sqlx::query(
        "SELECT column_name FROM information_schema.columns WHERE table_name = 'rt_garments'",
    )
    .fetch_all(&pool)
    .await
    .unwrap()
    .iter()
    .map(|r| r.get("column_name"))
    .collect();
    assert!(!columns.contains(&"fabric".to_string()));

    reset(&pool, &["rt_garments"]).await;
}
