//! Postgres persistence for the canonical event hierarchy.
//!
//! Queries only — all consolidation policy lives in the merger. Mutations are
//! transaction-scoped so a country's consolidation commits as one atomic unit.

use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use eventfold_common::{CanonicalEvent, DailyEventMention, EventfoldError, Result};

#[derive(Clone)]
pub struct HierarchyStore {
    pool: PgPool,
}

/// Parameters for inserting a canonical event. Used by tests and the
/// ingestion seam; the merger itself never creates events.
pub struct NewCanonicalEvent {
    pub master_event_id: Option<Uuid>,
    pub name: String,
    pub country: String,
    pub first_mention_date: NaiveDate,
    pub last_mention_date: NaiveDate,
    pub story_phase: String,
    pub validated: bool,
}

/// Parameters for inserting a daily mention.
pub struct NewDailyMention {
    pub canonical_event_id: Uuid,
    pub country: String,
    pub mention_date: NaiveDate,
    pub article_count: i32,
    pub headline: String,
    pub summary: String,
    pub source_names: Vec<String>,
    pub doc_ids: Vec<String>,
}

/// Master aggregate columns recomputed after consolidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterRollup {
    pub first_mention_date: NaiveDate,
    pub last_mention_date: NaiveDate,
    pub total_mention_days: i32,
    pub total_article_count: i32,
    pub peak_mention_date: NaiveDate,
    pub peak_article_count: i32,
    pub source_names: Vec<String>,
}

impl HierarchyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EventfoldError::Migration(e.to_string()))?;
        Ok(())
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    // --- Read side (pool-scoped, no locks; dry run and tests) ---

    /// Root events eligible for consolidation: no parent, validation flag set.
    pub async fn validated_masters(&self, country: &str) -> Result<Vec<CanonicalEvent>> {
        let rows = sqlx::query_as::<_, CanonicalEvent>(
            r#"
            SELECT * FROM canonical_events
            WHERE country = $1 AND master_event_id IS NULL AND validated = true
            ORDER BY first_mention_date ASC, id ASC
            "#,
        )
        .bind(country)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn children_of(&self, master_id: Uuid) -> Result<Vec<CanonicalEvent>> {
        let rows = sqlx::query_as::<_, CanonicalEvent>(
            r#"
            SELECT * FROM canonical_events
            WHERE master_event_id = $1
            ORDER BY first_mention_date ASC, id ASC
            "#,
        )
        .bind(master_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn mentions_of(&self, event_id: Uuid) -> Result<Vec<DailyEventMention>> {
        let rows = sqlx::query_as::<_, DailyEventMention>(
            r#"
            SELECT * FROM daily_event_mentions
            WHERE canonical_event_id = $1
            ORDER BY mention_date ASC
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn event_by_id(&self, id: Uuid) -> Result<Option<CanonicalEvent>> {
        let row = sqlx::query_as::<_, CanonicalEvent>(
            "SELECT * FROM canonical_events WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // --- Transaction-scoped reads (row-locked for the country transaction) ---

    /// Same eligibility gate as `validated_masters`, locking the master rows
    /// for the duration of the transaction.
    pub async fn validated_masters_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        country: &str,
    ) -> Result<Vec<CanonicalEvent>> {
        let rows = sqlx::query_as::<_, CanonicalEvent>(
            r#"
            SELECT * FROM canonical_events
            WHERE country = $1 AND master_event_id IS NULL AND validated = true
            ORDER BY first_mention_date ASC, id ASC
            FOR UPDATE
            "#,
        )
        .bind(country)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows)
    }

    pub async fn children_of_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        master_id: Uuid,
    ) -> Result<Vec<CanonicalEvent>> {
        let rows = sqlx::query_as::<_, CanonicalEvent>(
            r#"
            SELECT * FROM canonical_events
            WHERE master_event_id = $1
            ORDER BY first_mention_date ASC, id ASC
            FOR UPDATE
            "#,
        )
        .bind(master_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows)
    }

    /// Mention rows of one event, locked. Covers both the child enumeration
    /// and the master's existing mentions used for conflict detection.
    pub async fn mentions_of_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event_id: Uuid,
    ) -> Result<Vec<DailyEventMention>> {
        let rows = sqlx::query_as::<_, DailyEventMention>(
            r#"
            SELECT * FROM daily_event_mentions
            WHERE canonical_event_id = $1
            ORDER BY mention_date ASC
            FOR UPDATE
            "#,
        )
        .bind(event_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows)
    }

    // --- Transaction-scoped mutations ---

    /// Additive merge: fold a child's mention for a conflicting date into the
    /// master's existing row for that date, then delete the child's row.
    /// Article volume is conserved and document references are carried over.
    pub async fn fold_mention_into(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        master_mention_id: Uuid,
        child_mention: &DailyEventMention,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE daily_event_mentions
            SET article_count = article_count + $2,
                doc_ids = ARRAY(SELECT DISTINCT d FROM unnest(doc_ids || $3) AS d),
                source_names = ARRAY(SELECT DISTINCT s FROM unnest(source_names || $4) AS s),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(master_mention_id)
        .bind(child_mention.article_count)
        .bind(&child_mention.doc_ids)
        .bind(&child_mention.source_names)
        .execute(&mut **tx)
        .await?;

        sqlx::query("DELETE FROM daily_event_mentions WHERE id = $1")
            .bind(child_mention.id)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    /// Reassignment: flip the mention's owner to the master. Same row, no
    /// count change.
    pub async fn reassign_mention(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        mention_id: Uuid,
        new_owner: Uuid,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE daily_event_mentions
            SET canonical_event_id = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(mention_id)
        .bind(new_owner)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Compare-and-delete guard: the child is deleted only if it truly owns
    /// zero mentions at delete time. Returns false when a mention slipped in
    /// between enumeration and deletion — the caller must abort the country.
    pub async fn delete_child_if_drained(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        child_id: Uuid,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM canonical_events
            WHERE id = $1
              AND NOT EXISTS (
                  SELECT 1 FROM daily_event_mentions WHERE canonical_event_id = $1
              )
            "#,
        )
        .bind(child_id)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn update_master_rollup(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        master_id: Uuid,
        rollup: &MasterRollup,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE canonical_events
            SET first_mention_date = $2,
                last_mention_date = $3,
                total_mention_days = $4,
                total_article_count = $5,
                peak_mention_date = $6,
                peak_article_count = $7,
                source_names = $8,
                days_since_last_mention = (CURRENT_DATE - $3),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(master_id)
        .bind(rollup.first_mention_date)
        .bind(rollup.last_mention_date)
        .bind(rollup.total_mention_days)
        .bind(rollup.total_article_count)
        .bind(rollup.peak_mention_date)
        .bind(rollup.peak_article_count)
        .bind(&rollup.source_names)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    // --- Insert helpers (ingestion seam + tests) ---

    /// Insert a canonical event, enforcing the one-level hierarchy invariant:
    /// a parent reference must resolve to an existing row that is itself a root.
    pub async fn insert_canonical_event(&self, event: NewCanonicalEvent) -> Result<Uuid> {
        if let Some(parent_id) = event.master_event_id {
            self.ensure_valid_parent(parent_id).await?;
        }

        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO canonical_events
                (master_event_id, name, country,
                 first_mention_date, last_mention_date, story_phase, validated,
                 validated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, CASE WHEN $7 THEN now() END)
            RETURNING id
            "#,
        )
        .bind(event.master_event_id)
        .bind(&event.name)
        .bind(&event.country)
        .bind(event.first_mention_date)
        .bind(event.last_mention_date)
        .bind(&event.story_phase)
        .bind(event.validated)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn insert_mention(&self, mention: NewDailyMention) -> Result<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO daily_event_mentions
                (canonical_event_id, country, mention_date, article_count,
                 headline, summary, source_names, doc_ids)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(mention.canonical_event_id)
        .bind(&mention.country)
        .bind(mention.mention_date)
        .bind(mention.article_count)
        .bind(&mention.headline)
        .bind(&mention.summary)
        .bind(&mention.source_names)
        .bind(&mention.doc_ids)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn ensure_valid_parent(&self, parent_id: Uuid) -> Result<()> {
        let parent = self.event_by_id(parent_id).await?;
        match parent {
            None => Err(EventfoldError::InvariantBreach(format!(
                "master_event_id {parent_id} does not resolve to any canonical event"
            ))),
            Some(p) if !p.is_master() => Err(EventfoldError::InvariantBreach(format!(
                "master_event_id {parent_id} points to a child — hierarchy is one level deep"
            ))),
            Some(_) => Ok(()),
        }
    }
}

/// Recompute a master's aggregate columns from its mention rows.
/// Returns `None` when the master owns no mentions (nothing to roll up).
pub fn compute_rollup(mentions: &[DailyEventMention]) -> Option<MasterRollup> {
    let first = mentions.iter().map(|m| m.mention_date).min()?;
    let last = mentions.iter().map(|m| m.mention_date).max()?;

    // Peak day: highest article count, earliest date wins ties.
    let peak = mentions
        .iter()
        .max_by(|a, b| {
            a.article_count
                .cmp(&b.article_count)
                .then(b.mention_date.cmp(&a.mention_date))
        })?;

    let mut source_names: Vec<String> = mentions
        .iter()
        .flat_map(|m| m.source_names.iter().cloned())
        .collect::<std::collections::HashSet<_>>()
        .into_iter()
        .collect();
    source_names.sort();

    Some(MasterRollup {
        first_mention_date: first,
        last_mention_date: last,
        total_mention_days: mentions.len() as i32,
        total_article_count: mentions.iter().map(|m| m.article_count).sum(),
        peak_mention_date: peak.mention_date,
        peak_article_count: peak.article_count,
        source_names,
    })
}
