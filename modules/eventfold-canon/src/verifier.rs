//! Read-only integrity sweep over the document → mention → event chain.
//!
//! Each check returns a count plus a small sample of offending rows.
//! Violations are reported, never repaired — remediation is a separate,
//! explicit operation.

use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, warn};

use eventfold_common::Result;

/// Rows examined by the missing-document check when not in full-scan mode.
/// The check joins every referenced doc id against the documents table, which
/// is expensive at scale, so it defaults to the most recent mentions.
const SAMPLED_SCAN_LIMIT: i64 = 1000;

pub struct IntegrityVerifier {
    pool: PgPool,
}

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Country scope; empty means every country.
    pub countries: Vec<String>,
    /// Max offending rows reported per check.
    pub sample_size: i64,
    /// Check every mention's doc references instead of the recent window.
    pub full_scan: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            countries: Vec::new(),
            sample_size: 10,
            full_scan: false,
        }
    }
}

/// One integrity check: how many rows violate it, and which (sampled).
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub count: i64,
    pub samples: Vec<String>,
}

impl CheckResult {
    fn new(name: &str, count: i64, samples: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            count,
            samples,
        }
    }
}

/// Per-country operational statistics (informational, never fails the run).
#[derive(Debug, Clone, Default, Serialize)]
pub struct CountryPipelineStats {
    pub country: String,
    pub clusters_total: i64,
    pub clusters_processed: i64,
    pub clusters_deconflicted: i64,
    pub events_total: i64,
    pub events_materiality_scored: i64,
}

impl CountryPipelineStats {
    pub fn pct_processed(&self) -> f64 {
        pct(self.clusters_processed, self.clusters_total)
    }

    pub fn pct_deconflicted(&self) -> f64 {
        pct(self.clusters_deconflicted, self.clusters_total)
    }

    pub fn pct_materiality_scored(&self) -> f64 {
        pct(self.events_materiality_scored, self.events_total)
    }
}

fn pct(part: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

/// Structured result of a verification run, suitable for automation gating.
#[derive(Debug, Serialize)]
pub struct IntegrityReport {
    pub checks: Vec<CheckResult>,
    pub pipeline: Vec<CountryPipelineStats>,
}

impl IntegrityReport {
    /// True iff every integrity check came back empty. Pipeline statistics
    /// do not participate in the verdict.
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.count == 0)
    }
}

impl std::fmt::Display for IntegrityReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Integrity Report ===")?;
        for check in &self.checks {
            if check.count == 0 {
                writeln!(f, "  ok    {}", check.name)?;
            } else {
                writeln!(f, "  FAIL  {} ({} offending)", check.name, check.count)?;
                for sample in &check.samples {
                    writeln!(f, "          {sample}")?;
                }
            }
        }
        if !self.pipeline.is_empty() {
            writeln!(f, "--- Pipeline ---")?;
            for stats in &self.pipeline {
                writeln!(
                    f,
                    "  {}: {} clusters ({:.1}% processed, {:.1}% deconflicted), {} events ({:.1}% materiality-scored)",
                    stats.country,
                    stats.clusters_total,
                    stats.pct_processed(),
                    stats.pct_deconflicted(),
                    stats.events_total,
                    stats.pct_materiality_scored(),
                )?;
            }
        }
        write!(f, "verdict: {}", if self.passed() { "PASS" } else { "FAIL" })
    }
}

impl IntegrityVerifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run every check. Read-only; safe to run concurrently with anything.
    pub async fn run(&self, options: &VerifyOptions) -> Result<IntegrityReport> {
        let checks = vec![
            self.check_mentions_without_docs(options).await?,
            self.check_missing_documents(options).await?,
            self.check_orphaned_events(options).await?,
            self.check_empty_clusters(options).await?,
            self.check_hierarchy_refs(options).await?,
        ];
        let pipeline = self.pipeline_stats(options).await?;

        for check in &checks {
            if check.count > 0 {
                warn!(check = check.name.as_str(), count = check.count, "Integrity check failed");
            } else {
                info!(check = check.name.as_str(), "Integrity check passed");
            }
        }

        Ok(IntegrityReport { checks, pipeline })
    }

    /// (a) Mentions whose document-identifier set is null or empty: the
    /// day's observation can no longer be traced to any source document.
    async fn check_mentions_without_docs(&self, options: &VerifyOptions) -> Result<CheckResult> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT count(*) FROM daily_event_mentions
            WHERE (doc_ids IS NULL OR cardinality(doc_ids) = 0)
              AND (cardinality($1::text[]) = 0 OR country = ANY($1))
            "#,
        )
        .bind(&options.countries)
        .fetch_one(&self.pool)
        .await?;

        let samples = sqlx::query_scalar::<_, String>(
            r#"
            SELECT id::text FROM daily_event_mentions
            WHERE (doc_ids IS NULL OR cardinality(doc_ids) = 0)
              AND (cardinality($1::text[]) = 0 OR country = ANY($1))
            ORDER BY mention_date DESC
            LIMIT $2
            "#,
        )
        .bind(&options.countries)
        .bind(options.sample_size)
        .fetch_all(&self.pool)
        .await?;

        Ok(CheckResult::new("mentions_without_docs", count, samples))
    }

    /// (b) Document ids referenced by mentions that do not exist in the
    /// documents table. Scans the recent window unless `full_scan` is set.
    async fn check_missing_documents(&self, options: &VerifyOptions) -> Result<CheckResult> {
        // LIMIT NULL scans everything.
        let scan_limit: Option<i64> = if options.full_scan {
            None
        } else {
            Some(SAMPLED_SCAN_LIMIT)
        };

        let count = sqlx::query_scalar::<_, i64>(
            r#"
            WITH scanned AS (
                SELECT id, doc_ids FROM daily_event_mentions
                WHERE cardinality($1::text[]) = 0 OR country = ANY($1)
                ORDER BY mention_date DESC
                LIMIT $2
            )
            SELECT count(*)
            FROM scanned s, unnest(s.doc_ids) AS d(doc)
            WHERE NOT EXISTS (SELECT 1 FROM documents WHERE doc_id = d.doc)
            "#,
        )
        .bind(&options.countries)
        .bind(scan_limit)
        .fetch_one(&self.pool)
        .await?;

        let samples = sqlx::query_scalar::<_, String>(
            r#"
            WITH scanned AS (
                SELECT id, doc_ids FROM daily_event_mentions
                WHERE cardinality($1::text[]) = 0 OR country = ANY($1)
                ORDER BY mention_date DESC
                LIMIT $2
            )
            SELECT 'mention ' || s.id::text || ' -> doc ' || d.doc
            FROM scanned s, unnest(s.doc_ids) AS d(doc)
            WHERE NOT EXISTS (SELECT 1 FROM documents WHERE doc_id = d.doc)
            LIMIT $3
            "#,
        )
        .bind(&options.countries)
        .bind(scan_limit)
        .bind(options.sample_size)
        .fetch_all(&self.pool)
        .await?;

        Ok(CheckResult::new("missing_documents", count, samples))
    }

    /// (c) Canonical events that own no mentions at all. Children are
    /// expected here only transiently; masters should never appear post-merge.
    async fn check_orphaned_events(&self, options: &VerifyOptions) -> Result<CheckResult> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT count(*) FROM canonical_events ce
            WHERE (cardinality($1::text[]) = 0 OR ce.country = ANY($1))
              AND NOT EXISTS (
                  SELECT 1 FROM daily_event_mentions m WHERE m.canonical_event_id = ce.id
              )
            "#,
        )
        .bind(&options.countries)
        .fetch_one(&self.pool)
        .await?;

        let samples = sqlx::query_scalar::<_, String>(
            r#"
            SELECT (CASE WHEN ce.master_event_id IS NULL THEN 'master ' ELSE 'child ' END) || ce.id::text
            FROM canonical_events ce
            WHERE (cardinality($1::text[]) = 0 OR ce.country = ANY($1))
              AND NOT EXISTS (
                  SELECT 1 FROM daily_event_mentions m WHERE m.canonical_event_id = ce.id
              )
            ORDER BY ce.created_at DESC
            LIMIT $2
            "#,
        )
        .bind(&options.countries)
        .bind(options.sample_size)
        .fetch_all(&self.pool)
        .await?;

        Ok(CheckResult::new("orphaned_events", count, samples))
    }

    /// (d) Upstream clusters with an empty document set. Not owned by the
    /// core, but surfaced so the producer defect is visible.
    async fn check_empty_clusters(&self, options: &VerifyOptions) -> Result<CheckResult> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT count(*) FROM event_clusters
            WHERE (doc_ids IS NULL OR cardinality(doc_ids) = 0)
              AND (cardinality($1::text[]) = 0 OR country = ANY($1))
            "#,
        )
        .bind(&options.countries)
        .fetch_one(&self.pool)
        .await?;

        let samples = sqlx::query_scalar::<_, String>(
            r#"
            SELECT id::text FROM event_clusters
            WHERE (doc_ids IS NULL OR cardinality(doc_ids) = 0)
              AND (cardinality($1::text[]) = 0 OR country = ANY($1))
            ORDER BY cluster_date DESC
            LIMIT $2
            "#,
        )
        .bind(&options.countries)
        .bind(options.sample_size)
        .fetch_all(&self.pool)
        .await?;

        Ok(CheckResult::new("clusters_without_docs", count, samples))
    }

    /// (e) Hierarchy reference integrity: every non-null master_event_id must
    /// resolve to an existing row that is itself a root.
    async fn check_hierarchy_refs(&self, options: &VerifyOptions) -> Result<CheckResult> {
        let dangling = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT count(*) FROM canonical_events ce
            WHERE ce.master_event_id IS NOT NULL
              AND (cardinality($1::text[]) = 0 OR ce.country = ANY($1))
              AND NOT EXISTS (
                  SELECT 1 FROM canonical_events p WHERE p.id = ce.master_event_id
              )
            "#,
        )
        .bind(&options.countries)
        .fetch_one(&self.pool)
        .await?;

        let two_level = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT count(*)
            FROM canonical_events ce
            JOIN canonical_events p ON p.id = ce.master_event_id
            WHERE p.master_event_id IS NOT NULL
              AND (cardinality($1::text[]) = 0 OR ce.country = ANY($1))
            "#,
        )
        .bind(&options.countries)
        .fetch_one(&self.pool)
        .await?;

        let mut samples = sqlx::query_scalar::<_, String>(
            r#"
            SELECT 'dangling ' || ce.id::text || ' -> ' || ce.master_event_id::text
            FROM canonical_events ce
            WHERE ce.master_event_id IS NOT NULL
              AND (cardinality($1::text[]) = 0 OR ce.country = ANY($1))
              AND NOT EXISTS (
                  SELECT 1 FROM canonical_events p WHERE p.id = ce.master_event_id
              )
            LIMIT $2
            "#,
        )
        .bind(&options.countries)
        .bind(options.sample_size)
        .fetch_all(&self.pool)
        .await?;

        let two_level_samples = sqlx::query_scalar::<_, String>(
            r#"
            SELECT 'two-level ' || ce.id::text || ' -> ' || p.id::text
            FROM canonical_events ce
            JOIN canonical_events p ON p.id = ce.master_event_id
            WHERE p.master_event_id IS NOT NULL
              AND (cardinality($1::text[]) = 0 OR ce.country = ANY($1))
            LIMIT $2
            "#,
        )
        .bind(&options.countries)
        .bind(options.sample_size)
        .fetch_all(&self.pool)
        .await?;

        samples.extend(two_level_samples);
        samples.truncate(options.sample_size.max(0) as usize);

        Ok(CheckResult::new("hierarchy_refs", dangling + two_level, samples))
    }

    /// (f) Aggregate pipeline statistics by country.
    async fn pipeline_stats(&self, options: &VerifyOptions) -> Result<Vec<CountryPipelineStats>> {
        let cluster_rows = sqlx::query_as::<_, (String, i64, i64, i64)>(
            r#"
            SELECT country,
                   count(*),
                   count(*) FILTER (WHERE processed),
                   count(*) FILTER (WHERE deconflicted)
            FROM event_clusters
            WHERE cardinality($1::text[]) = 0 OR country = ANY($1)
            GROUP BY country
            "#,
        )
        .bind(&options.countries)
        .fetch_all(&self.pool)
        .await?;

        let event_rows = sqlx::query_as::<_, (String, i64, i64)>(
            r#"
            SELECT country,
                   count(*),
                   count(*) FILTER (WHERE materiality_score IS NOT NULL)
            FROM canonical_events
            WHERE cardinality($1::text[]) = 0 OR country = ANY($1)
            GROUP BY country
            "#,
        )
        .bind(&options.countries)
        .fetch_all(&self.pool)
        .await?;

        let mut by_country: std::collections::BTreeMap<String, CountryPipelineStats> =
            std::collections::BTreeMap::new();

        for (country, total, processed, deconflicted) in cluster_rows {
            let entry = by_country.entry(country.clone()).or_default();
            entry.country = country;
            entry.clusters_total = total;
            entry.clusters_processed = processed;
            entry.clusters_deconflicted = deconflicted;
        }
        for (country, total, scored) in event_rows {
            let entry = by_country.entry(country.clone()).or_default();
            entry.country = country;
            entry.events_total = total;
            entry.events_materiality_scored = scored;
        }

        Ok(by_country.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(name: &str, count: i64) -> CheckResult {
        CheckResult::new(name, count, vec![])
    }

    #[test]
    fn report_passes_when_all_checks_empty() {
        let report = IntegrityReport {
            checks: vec![check("a", 0), check("b", 0)],
            pipeline: vec![],
        };
        assert!(report.passed());
    }

    #[test]
    fn report_fails_on_any_nonzero_check() {
        let report = IntegrityReport {
            checks: vec![check("a", 0), check("b", 3)],
            pipeline: vec![],
        };
        assert!(!report.passed());
    }

    #[test]
    fn pipeline_stats_never_fail_the_report() {
        let report = IntegrityReport {
            checks: vec![check("a", 0)],
            pipeline: vec![CountryPipelineStats {
                country: "kenya".to_string(),
                clusters_total: 10,
                clusters_processed: 4,
                clusters_deconflicted: 2,
                events_total: 0,
                events_materiality_scored: 0,
            }],
        };
        assert!(report.passed());
    }

    #[test]
    fn percentages_handle_zero_totals() {
        let stats = CountryPipelineStats::default();
        assert_eq!(stats.pct_processed(), 0.0);
        assert_eq!(stats.pct_materiality_scored(), 0.0);

        let stats = CountryPipelineStats {
            clusters_total: 8,
            clusters_processed: 2,
            ..Default::default()
        };
        assert!((stats.pct_processed() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn display_renders_verdict_and_failing_samples() {
        let report = IntegrityReport {
            checks: vec![CheckResult::new(
                "mentions_without_docs",
                2,
                vec!["abc".to_string(), "def".to_string()],
            )],
            pipeline: vec![],
        };
        let rendered = format!("{report}");
        assert!(rendered.contains("FAIL  mentions_without_docs (2 offending)"));
        assert!(rendered.contains("abc"));
        assert!(rendered.contains("verdict: FAIL"));
    }
}
