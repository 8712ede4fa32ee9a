use async_trait::async_trait;

use crate::{AuditLogEntry, ContractChange, ContractSnapshot, ImpactRecord, RemediationJob};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("persistence backend error: {0}")]
    Backend(String),
    #[error("row not found")]
    NotFound,
}

/// Narrow repository interface per entity (spec §9's "polymorphism over
/// persistence backends" note) — the concrete backend (Postgres in
/// production, SQLite in tests) is injected at wiring time behind these
/// traits, never chosen by the core pipeline.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn latest(&self) -> Result<Option<ContractSnapshot>, StoreError>;
    async fn put(&self, snapshot: ContractSnapshot) -> Result<ContractSnapshot, StoreError>;
}

#[async_trait]
pub trait ChangeStore: Send + Sync {
    async fn create(&self, change: ContractChange) -> Result<ContractChange, StoreError>;
    async fn get(&self, change_id: i64) -> Result<ContractChange, StoreError>;
    async fn put_impact_records(&self, records: Vec<ImpactRecord>) -> Result<(), StoreError>;
    async fn impact_records_for(&self, change_id: i64) -> Result<Vec<ImpactRecord>, StoreError>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: RemediationJob) -> Result<RemediationJob, StoreError>;
    async fn update(&self, job: RemediationJob) -> Result<RemediationJob, StoreError>;
    async fn get(&self, job_id: uuid::Uuid) -> Result<RemediationJob, StoreError>;
    async fn by_change(&self, change_id: i64) -> Result<Vec<RemediationJob>, StoreError>;
    /// Non-terminal jobs, or terminal jobs still holding a PR URL reference
    /// (spec §4.10's reconciler scan predicate).
    async fn needing_reconciliation(&self) -> Result<Vec<RemediationJob>, StoreError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: AuditLogEntry) -> Result<AuditLogEntry, StoreError>;
    async fn for_job(&self, job_id: uuid::Uuid) -> Result<Vec<AuditLogEntry>, StoreError>;
    /// Count of prior rows for `job_id` whose detail contains `marker` —
    /// backs the CI-unknown attempt counter without a dedicated column.
    async fn count_with_marker(&self, job_id: uuid::Uuid, marker: &str) -> Result<u32, StoreError>;
}
