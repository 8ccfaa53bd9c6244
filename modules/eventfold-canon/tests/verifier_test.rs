//! Integration tests for the integrity verifier.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use chrono::{Duration, NaiveDate};
use sqlx::PgPool;
use uuid::Uuid;

use eventfold_canon::{
    HierarchyStore, IntegrityVerifier, NewCanonicalEvent, NewDailyMention, VerifyOptions,
};

async fn test_store() -> Option<HierarchyStore> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    let store = HierarchyStore::new(pool);
    store.migrate().await.ok()?;
    Some(store)
}

fn unique_country(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn options(country: &str) -> VerifyOptions {
    VerifyOptions {
        countries: vec![country.to_string()],
        ..Default::default()
    }
}

async fn seed_event(store: &HierarchyStore, country: &str, master: Option<Uuid>) -> Uuid {
    store
        .insert_canonical_event(NewCanonicalEvent {
            master_event_id: master,
            name: "Fuel subsidy protests".to_string(),
            country: country.to_string(),
            first_mention_date: date(2024, 1, 1),
            last_mention_date: date(2024, 1, 1),
            story_phase: "developing".to_string(),
            validated: true,
        })
        .await
        .unwrap()
}

async fn seed_mention(
    store: &HierarchyStore,
    event_id: Uuid,
    country: &str,
    day: NaiveDate,
    docs: &[&str],
) -> Uuid {
    store
        .insert_mention(NewDailyMention {
            canonical_event_id: event_id,
            country: country.to_string(),
            mention_date: day,
            article_count: 3,
            headline: "Protests spread to the capital".to_string(),
            summary: String::new(),
            source_names: vec!["Reuters".to_string()],
            doc_ids: docs.iter().map(|d| d.to_string()).collect(),
        })
        .await
        .unwrap()
}

async fn seed_document(store: &HierarchyStore, doc_id: &str) {
    sqlx::query(
        "INSERT INTO documents (doc_id, title, source_name) VALUES ($1, 'x', 'Reuters')
         ON CONFLICT (doc_id) DO NOTHING",
    )
    .bind(doc_id)
    .execute(store.pool())
    .await
    .unwrap();
}

async fn seed_cluster(store: &HierarchyStore, country: &str, docs: &[&str], processed: bool, deconflicted: bool) {
    sqlx::query(
        r#"
        INSERT INTO event_clusters
            (country, cluster_date, cluster_id, doc_ids, cluster_size, processed, deconflicted)
        VALUES ($1, '2024-01-01', 1, $2, cardinality($2::text[]), $3, $4)
        "#,
    )
    .bind(country)
    .bind(docs.iter().map(|d| d.to_string()).collect::<Vec<_>>())
    .bind(processed)
    .bind(deconflicted)
    .execute(store.pool())
    .await
    .unwrap();
}

fn check<'a>(report: &'a eventfold_canon::IntegrityReport, name: &str) -> &'a eventfold_canon::CheckResult {
    report
        .checks
        .iter()
        .find(|c| c.name == name)
        .unwrap_or_else(|| panic!("missing check {name}"))
}

#[tokio::test]
async fn clean_dataset_passes() {
    let Some(store) = test_store().await else {
        return;
    };
    let country = unique_country("verify");

    seed_document(&store, "doc-clean").await;
    let master = seed_event(&store, &country, None).await;
    seed_mention(&store, master, &country, date(2024, 1, 1), &["doc-clean"]).await;
    seed_cluster(&store, &country, &["doc-clean"], true, true).await;

    let verifier = IntegrityVerifier::new(store.pool().clone());
    let report = verifier.run(&options(&country)).await.unwrap();

    assert!(report.passed(), "expected pass, got:\n{report}");
}

#[tokio::test]
async fn mentions_with_empty_doc_sets_fail_the_run() {
    let Some(store) = test_store().await else {
        return;
    };
    let country = unique_country("verify");

    // 500 mentions, 3 of them with an empty document set.
    seed_document(&store, "doc-known").await;
    let master = seed_event(&store, &country, None).await;
    let start = date(2024, 1, 1);
    for i in 0..500i64 {
        let docs: &[&str] = if i < 3 { &[] } else { &["doc-known"] };
        seed_mention(&store, master, &country, start + Duration::days(i), docs).await;
    }

    let verifier = IntegrityVerifier::new(store.pool().clone());
    let opts = VerifyOptions {
        countries: vec![country.clone()],
        sample_size: 2,
        full_scan: true,
    };
    let report = verifier.run(&opts).await.unwrap();

    let missing = check(&report, "mentions_without_docs");
    assert_eq!(missing.count, 3);
    assert_eq!(missing.samples.len(), 2);
    assert!(!report.passed());
}

#[tokio::test]
async fn dangling_document_references_are_detected() {
    let Some(store) = test_store().await else {
        return;
    };
    let country = unique_country("verify");

    seed_document(&store, "doc-real").await;
    let master = seed_event(&store, &country, None).await;
    seed_mention(
        &store,
        master,
        &country,
        date(2024, 1, 1),
        &["doc-real", "doc-ghost"],
    )
    .await;

    let verifier = IntegrityVerifier::new(store.pool().clone());

    // The recent-window default catches it...
    let report = verifier.run(&options(&country)).await.unwrap();
    let missing = check(&report, "missing_documents");
    assert_eq!(missing.count, 1);
    assert!(missing.samples[0].contains("doc-ghost"));

    // ...and so does the exhaustive scan.
    let full = verifier
        .run(&VerifyOptions {
            countries: vec![country.clone()],
            full_scan: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(check(&full, "missing_documents").count, 1);
}

#[tokio::test]
async fn events_without_mentions_are_reported_with_role() {
    let Some(store) = test_store().await else {
        return;
    };
    let country = unique_country("verify");

    let master = seed_event(&store, &country, None).await;
    seed_event(&store, &country, Some(master)).await;

    let verifier = IntegrityVerifier::new(store.pool().clone());
    let report = verifier.run(&options(&country)).await.unwrap();

    let orphans = check(&report, "orphaned_events");
    assert_eq!(orphans.count, 2);
    assert!(orphans.samples.iter().any(|s| s.starts_with("master ")));
    assert!(orphans.samples.iter().any(|s| s.starts_with("child ")));
    assert!(!report.passed());
}

#[tokio::test]
async fn clusters_with_empty_doc_sets_are_reported() {
    let Some(store) = test_store().await else {
        return;
    };
    let country = unique_country("verify");

    seed_document(&store, "doc-c").await;
    let master = seed_event(&store, &country, None).await;
    seed_mention(&store, master, &country, date(2024, 1, 1), &["doc-c"]).await;
    seed_cluster(&store, &country, &["doc-c"], true, false).await;
    seed_cluster(&store, &country, &[], false, false).await;

    let verifier = IntegrityVerifier::new(store.pool().clone());
    let report = verifier.run(&options(&country)).await.unwrap();

    assert_eq!(check(&report, "clusters_without_docs").count, 1);
    assert!(!report.passed());
}

#[tokio::test]
async fn two_level_hierarchy_is_reported() {
    let Some(store) = test_store().await else {
        return;
    };
    let country = unique_country("verify");

    seed_document(&store, "doc-h").await;
    let master = seed_event(&store, &country, None).await;
    seed_mention(&store, master, &country, date(2024, 1, 1), &["doc-h"]).await;
    let child = seed_event(&store, &country, Some(master)).await;
    seed_mention(&store, child, &country, date(2024, 1, 1), &["doc-h"]).await;

    // A grandchild can only exist if something bypassed the store's parent
    // validation — which is exactly what the check is for.
    let grandchild = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO canonical_events
            (id, master_event_id, name, country, first_mention_date, last_mention_date)
        VALUES ($1, $2, 'grandchild', $3, '2024-01-02', '2024-01-02')
        "#,
    )
    .bind(grandchild)
    .bind(child)
    .bind(&country)
    .execute(store.pool())
    .await
    .unwrap();
    seed_mention(&store, grandchild, &country, date(2024, 1, 2), &["doc-h"]).await;

    let verifier = IntegrityVerifier::new(store.pool().clone());
    let report = verifier.run(&options(&country)).await.unwrap();

    let refs = check(&report, "hierarchy_refs");
    assert_eq!(refs.count, 1);
    assert!(refs.samples[0].starts_with("two-level "));
    assert!(!report.passed());
}

#[tokio::test]
async fn pipeline_stats_aggregate_by_country() {
    let Some(store) = test_store().await else {
        return;
    };
    let country = unique_country("verify");

    seed_document(&store, "doc-p").await;
    seed_cluster(&store, &country, &["doc-p"], true, true).await;
    seed_cluster(&store, &country, &["doc-p"], true, false).await;
    seed_cluster(&store, &country, &["doc-p"], false, false).await;
    seed_cluster(&store, &country, &["doc-p"], false, false).await;

    let master = seed_event(&store, &country, None).await;
    seed_mention(&store, master, &country, date(2024, 1, 1), &["doc-p"]).await;
    let scored = seed_event(&store, &country, None).await;
    seed_mention(&store, scored, &country, date(2024, 1, 2), &["doc-p"]).await;
    sqlx::query("UPDATE canonical_events SET materiality_score = 0.8 WHERE id = $1")
        .bind(scored)
        .execute(store.pool())
        .await
        .unwrap();

    let verifier = IntegrityVerifier::new(store.pool().clone());
    let report = verifier.run(&options(&country)).await.unwrap();

    assert_eq!(report.pipeline.len(), 1);
    let stats = &report.pipeline[0];
    assert_eq!(stats.country, country);
    assert_eq!(stats.clusters_total, 4);
    assert_eq!(stats.clusters_processed, 2);
    assert_eq!(stats.clusters_deconflicted, 1);
    assert_eq!(stats.events_total, 2);
    assert_eq!(stats.events_materiality_scored, 1);
    assert!((stats.pct_processed() - 50.0).abs() < f64::EPSILON);
    assert!((stats.pct_deconflicted() - 25.0).abs() < f64::EPSILON);
    assert!((stats.pct_materiality_scored() - 50.0).abs() < f64::EPSILON);

    assert!(report.passed());
}

#[tokio::test]
async fn country_scope_hides_other_countries_violations() {
    let Some(store) = test_store().await else {
        return;
    };
    let dirty = unique_country("verify-dirty");
    let clean = unique_country("verify-clean");

    // Violation lives in the dirty country only.
    seed_event(&store, &dirty, None).await;

    seed_document(&store, "doc-s").await;
    let master = seed_event(&store, &clean, None).await;
    seed_mention(&store, master, &clean, date(2024, 1, 1), &["doc-s"]).await;

    let verifier = IntegrityVerifier::new(store.pool().clone());
    let scoped = verifier.run(&options(&clean)).await.unwrap();
    assert!(scoped.passed());

    let dirty_report = verifier.run(&options(&dirty)).await.unwrap();
    assert!(!dirty_report.passed());
}
