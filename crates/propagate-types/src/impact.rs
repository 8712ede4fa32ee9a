use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// One row per (change, caller_service, method, route_template). Created
/// during impact resolution, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactRecord {
    pub change_id: i64,
    pub caller_service: String,
    pub method: String,
    pub route_template: String,
    pub calls_last_7d: u64,
    pub confidence: Confidence,
    /// True when this record is the synthesized placeholder for a declared
    /// dependent with no telemetry in the window (spec §4.5 step 2).
    pub declared_only: bool,
}
