//! Shared domain types for the contract-change propagation engine.
//!
//! Every entity in here corresponds to a table or an ephemeral in-memory
//! record of the propagation pipeline. Persisted entities derive
//! `Serialize`/`Deserialize` so `propagate-store` can round-trip them through
//! `sqlx`'s JSON columns without a separate DTO layer.

pub mod audit;
pub mod bundle;
pub mod change;
pub mod diff;
pub mod impact;
pub mod job;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod usage;

pub use audit::{AuditLogEntry, CI_UNKNOWN_MARKER};
pub use bundle::RepoFixBundle;
pub use change::{ClassifiedChange, ContractChange, Severity};
pub use diff::{ContractDiff, DiffKind};
pub use impact::ImpactRecord;
pub use job::{JobStatus, RemediationJob};
pub use schema::Schema;
pub use snapshot::ContractSnapshot;
pub use store::{AuditStore, ChangeStore, JobStore, SnapshotStore, StoreError};
pub use usage::UsageRequest;
