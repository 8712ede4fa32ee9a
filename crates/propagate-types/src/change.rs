use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity ladder of spec §4.3, highest-wins ordering via the derived
/// `Ord` (declaration order is worst-to-best so `max()` picks correctly when
/// paired with a reversed comparator — see `Severity::worst_of`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn worst_of(self, other: Severity) -> Severity {
        self.max(other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

/// In-memory output of the classifier, before persistence. `ContractChange`
/// is the row actually written; this is the richer intermediate the
/// classifier hands to the bundle builder and the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedChange {
    pub is_breaking: bool,
    pub severity: Severity,
    pub summary: String,
    pub changed_routes: Vec<String>,
    pub field_details: Vec<String>,
}

/// Persisted outcome of a classification run. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractChange {
    pub change_id: i64,
    pub base_ref: String,
    pub head_ref: String,
    pub is_breaking: bool,
    pub severity: Severity,
    pub summary: String,
    pub changed_routes: Vec<String>,
    pub field_details: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ContractChange {
    pub fn from_classification(
        change_id: i64,
        base_ref: impl Into<String>,
        head_ref: impl Into<String>,
        classified: &ClassifiedChange,
    ) -> Self {
        Self {
            change_id,
            base_ref: base_ref.into(),
            head_ref: head_ref.into(),
            is_breaking: classified.is_breaking,
            severity: classified.severity,
            summary: classified.summary.clone(),
            changed_routes: classified.changed_routes.clone(),
            field_details: classified.field_details.clone(),
            created_at: Utc::now(),
        }
    }
}
