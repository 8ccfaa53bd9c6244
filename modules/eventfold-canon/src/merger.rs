//! Canonical event consolidation.
//!
//! For every validated master, fold all child mentions into the master and
//! remove the drained children. Conflicting dates merge additively so total
//! article volume is conserved; non-conflicting dates are reassigned in place.
//! Each country commits as one atomic transaction, so a mid-run failure rolls
//! the country back and a retry is safe: once children are gone there is
//! nothing left to fold.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use eventfold_common::{EventfoldError, Result};

use crate::store::{compute_rollup, HierarchyStore};

pub struct Merger {
    store: HierarchyStore,
}

/// The two-case state transition for one child mention. Conflicting dates
/// accumulate (commutative addition), free dates move in place — which is why
/// the outcome is independent of child and mention processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MergeAction {
    /// Master already owns a mention on this date: add counts into it,
    /// then drop the child's row.
    Accumulate { master_mention_id: Uuid },
    /// No mention on this date yet: flip the row's owner to the master.
    Reassign,
}

pub(crate) fn plan_mention(
    owned_dates: &HashMap<NaiveDate, Uuid>,
    date: NaiveDate,
) -> MergeAction {
    match owned_dates.get(&date) {
        Some(master_mention_id) => MergeAction::Accumulate {
            master_mention_id: *master_mention_id,
        },
        None => MergeAction::Reassign,
    }
}

/// Stats from consolidating one country.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub master_count: u32,
    pub child_count: u32,
    pub mentions_reassigned: u32,
    pub events_deleted: u32,
}

impl MergeStats {
    pub fn add(&mut self, other: &MergeStats) {
        self.master_count += other.master_count;
        self.child_count += other.child_count;
        self.mentions_reassigned += other.mentions_reassigned;
        self.events_deleted += other.events_deleted;
    }
}

impl std::fmt::Display for MergeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} masters, {} children, {} mentions folded, {} events deleted",
            self.master_count, self.child_count, self.mentions_reassigned, self.events_deleted,
        )
    }
}

/// Outcome of one country in a consolidation batch.
#[derive(Debug, Clone, Serialize)]
pub enum CountryOutcome {
    Completed(MergeStats),
    Failed(String),
}

/// Per-country outcomes for a whole consolidation run. One country failing
/// does not stop the batch; committed countries stay committed.
#[derive(Debug, Default, Serialize)]
pub struct ConsolidationSummary {
    pub dry_run: bool,
    pub countries: Vec<(String, CountryOutcome)>,
}

impl ConsolidationSummary {
    pub fn all_succeeded(&self) -> bool {
        self.countries
            .iter()
            .all(|(_, outcome)| matches!(outcome, CountryOutcome::Completed(_)))
    }

    pub fn totals(&self) -> MergeStats {
        let mut totals = MergeStats::default();
        for (_, outcome) in &self.countries {
            if let CountryOutcome::Completed(stats) = outcome {
                totals.add(stats);
            }
        }
        totals
    }
}

impl std::fmt::Display for ConsolidationSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = if self.dry_run { " (dry run)" } else { "" };
        writeln!(f, "=== Consolidation{mode} ===")?;
        for (country, outcome) in &self.countries {
            match outcome {
                CountryOutcome::Completed(stats) => writeln!(f, "{country}: {stats}")?,
                CountryOutcome::Failed(reason) => writeln!(f, "{country}: FAILED — {reason}")?,
            }
        }
        write!(f, "total: {}", self.totals())
    }
}

impl Merger {
    pub fn new(store: HierarchyStore) -> Self {
        Self { store }
    }

    /// Consolidate every country in scope, isolating failures per country.
    pub async fn consolidate(&self, countries: &[String], dry_run: bool) -> ConsolidationSummary {
        let mut summary = ConsolidationSummary {
            dry_run,
            countries: Vec::new(),
        };

        if countries.is_empty() {
            warn!("Empty country scope — nothing to consolidate");
            return summary;
        }

        for country in countries {
            let outcome = match self.consolidate_country(country, dry_run).await {
                Ok(stats) => {
                    info!(country = country.as_str(), %stats, dry_run, "Country consolidated");
                    CountryOutcome::Completed(stats)
                }
                Err(e) => {
                    error!(country = country.as_str(), error = %e, "Country consolidation failed, rolled back");
                    CountryOutcome::Failed(e.to_string())
                }
            };
            summary.countries.push((country.clone(), outcome));
        }

        summary
    }

    /// Consolidate a single country as one atomic transaction.
    pub async fn consolidate_country(&self, country: &str, dry_run: bool) -> Result<MergeStats> {
        if dry_run {
            return self.dry_run_country(country).await;
        }

        let mut tx = self.store.begin().await?;
        let mut stats = MergeStats::default();

        let masters = self.store.validated_masters_tx(&mut tx, country).await?;
        for master in &masters {
            stats.master_count += 1;

            let children = self.store.children_of_tx(&mut tx, master.id).await?;
            if children.is_empty() {
                continue;
            }

            // Lock the master's own mention rows and index them by date:
            // this map is the conflict-detection state for the whole group.
            let mut owned_dates: HashMap<NaiveDate, Uuid> = self
                .store
                .mentions_of_tx(&mut tx, master.id)
                .await?
                .into_iter()
                .map(|m| (m.mention_date, m.id))
                .collect();

            for child in &children {
                let mentions = self.store.mentions_of_tx(&mut tx, child.id).await?;
                for mention in &mentions {
                    match plan_mention(&owned_dates, mention.mention_date) {
                        MergeAction::Accumulate { master_mention_id } => {
                            self.store
                                .fold_mention_into(&mut tx, master_mention_id, mention)
                                .await?;
                        }
                        MergeAction::Reassign => {
                            self.store
                                .reassign_mention(&mut tx, mention.id, master.id)
                                .await?;
                            owned_dates.insert(mention.mention_date, mention.id);
                        }
                    }
                    stats.mentions_reassigned += 1;
                }

                // The child must be empty now. If a mention appeared between
                // enumeration and deletion, abort the country rather than
                // silently delete a non-empty child.
                let deleted = self.store.delete_child_if_drained(&mut tx, child.id).await?;
                if !deleted {
                    return Err(EventfoldError::InvariantBreach(format!(
                        "child {} of master {} still owns mentions after drain",
                        child.id, master.id
                    )));
                }
                stats.child_count += 1;
                stats.events_deleted += 1;

                info!(
                    master_id = %master.id,
                    child_id = %child.id,
                    mentions = mentions.len(),
                    "Child folded into master"
                );
            }

            // Downstream rollups read the master's aggregate columns, so
            // leave them consistent with the mention rows it now owns.
            let merged = self.store.mentions_of_tx(&mut tx, master.id).await?;
            if let Some(rollup) = compute_rollup(&merged) {
                self.store
                    .update_master_rollup(&mut tx, master.id, &rollup)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(stats)
    }

    /// Identical enumeration and statistics on the read side, no writes and
    /// no locks. The owned-dates map simulates the writes the real run would
    /// perform, so the numbers match exactly.
    async fn dry_run_country(&self, country: &str) -> Result<MergeStats> {
        let mut stats = MergeStats::default();

        let masters = self.store.validated_masters(country).await?;
        for master in &masters {
            stats.master_count += 1;

            let children = self.store.children_of(master.id).await?;
            if children.is_empty() {
                continue;
            }

            let mut owned_dates: HashMap<NaiveDate, Uuid> = self
                .store
                .mentions_of(master.id)
                .await?
                .into_iter()
                .map(|m| (m.mention_date, m.id))
                .collect();

            for child in &children {
                let mentions = self.store.mentions_of(child.id).await?;
                for mention in &mentions {
                    if let MergeAction::Reassign = plan_mention(&owned_dates, mention.mention_date)
                    {
                        owned_dates.insert(mention.mention_date, mention.id);
                    }
                    stats.mentions_reassigned += 1;
                }
                stats.child_count += 1;
                stats.events_deleted += 1;
            }
        }

        Ok(stats)
    }
}
