use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Source documents ---

/// An immutable source record. Owned by the ingestion side; the core only
/// references it by `doc_id`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Document {
    pub doc_id: String,
    pub title: String,
    pub source_name: String,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// --- Raw clusters (upstream input) ---

/// A raw per-day cluster of event mentions produced by the upstream
/// clustering job. Immutable once written; the core reads it only for
/// integrity diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EventCluster {
    pub id: Uuid,
    pub country: String,
    pub cluster_date: NaiveDate,
    pub batch_number: i32,
    pub cluster_id: i32,
    pub event_names: Vec<String>,
    pub doc_ids: Vec<String>,
    pub cluster_size: i32,
    pub is_noise: bool,
    pub representative_name: String,
    pub processed: bool,
    pub deconflicted: bool,
    pub created_at: DateTime<Utc>,
}

// --- Canonical events ---

/// The unit of tracked story. A row with `master_event_id = None` is a root
/// ("master"); a row pointing at a master is a child fragment awaiting
/// consolidation. The hierarchy is exactly one level deep.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CanonicalEvent {
    pub id: Uuid,
    pub master_event_id: Option<Uuid>,
    pub name: String,
    pub country: String,
    pub first_mention_date: NaiveDate,
    pub last_mention_date: NaiveDate,
    pub total_mention_days: i32,
    pub total_article_count: i32,
    pub story_phase: String,
    pub days_since_last_mention: i32,
    pub source_names: Vec<String>,
    pub peak_mention_date: Option<NaiveDate>,
    pub peak_article_count: i32,
    pub description: String,
    pub key_facts: serde_json::Value,
    pub embedding: Option<Vec<f32>>,
    pub alternate_names: Vec<String>,
    pub category_aggregates: serde_json::Value,
    pub materiality_score: Option<f32>,
    pub materiality_justification: Option<String>,
    pub validated: bool,
    pub validated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalEvent {
    pub fn is_master(&self) -> bool {
        self.master_event_id.is_none()
    }
}

// --- Daily mentions ---

/// A per-(event, calendar date) observation linking a canonical event to the
/// source documents and article volume seen on that date.
/// At most one row exists per (canonical_event_id, mention_date) pair.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailyEventMention {
    pub id: Uuid,
    pub canonical_event_id: Uuid,
    pub country: String,
    pub mention_date: NaiveDate,
    pub article_count: i32,
    pub headline: String,
    pub summary: String,
    pub source_names: Vec<String>,
    pub source_diversity: f32,
    pub context_tag: Option<String>,
    pub intensity: String,
    pub doc_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(master: Option<Uuid>) -> CanonicalEvent {
        CanonicalEvent {
            id: Uuid::new_v4(),
            master_event_id: master,
            name: "Border closure at Moyale".to_string(),
            country: "kenya".to_string(),
            first_mention_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            last_mention_date: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            total_mention_days: 3,
            total_article_count: 12,
            story_phase: "developing".to_string(),
            days_since_last_mention: 0,
            source_names: vec!["Daily Nation".to_string()],
            peak_mention_date: None,
            peak_article_count: 0,
            description: String::new(),
            key_facts: serde_json::json!({}),
            embedding: None,
            alternate_names: vec![],
            category_aggregates: serde_json::json!({}),
            materiality_score: None,
            materiality_justification: None,
            validated: false,
            validated_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn master_is_event_without_parent() {
        assert!(event(None).is_master());
        assert!(!event(Some(Uuid::new_v4())).is_master());
    }
}
