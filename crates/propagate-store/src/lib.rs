//! `sqlx`-backed implementation of the repository traits from
//! `propagate-types`. Uses `sqlx`'s `Any` driver so the same pool type and
//! query text serve both the Postgres production backend and the SQLite
//! backend this crate's own test suite runs against (spec §9's
//! "polymorphism over persistence backends" note, after
//! `original_source/src/database.py`'s dual-backend setup).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use propagate_types::{
    AuditLogEntry, AuditStore, ChangeStore, ContractChange, ContractSnapshot, ImpactRecord, JobStatus, JobStore,
    RemediationJob, Severity, SnapshotStore, StoreError,
};
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};

fn backend_err(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// One pooled connection handle shared process-wide, matching spec §5's
/// "one pooled client per process" resource rule for the persistence layer.
#[derive(Clone)]
pub struct Store {
    pool: AnyPool,
}

impl Store {
    /// Connect and apply the portable schema. `database_url` may point at
    /// either Postgres (`postgres://...`) or SQLite (`sqlite::memory:`,
    /// `sqlite://path/to/file.db`).
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(backend_err)?;
        let store = Self { pool };
        store.apply_schema().await?;
        Ok(store)
    }

    async fn apply_schema(&self) -> Result<(), StoreError> {
        const SCHEMA: &str = include_str!("../migrations/0001_init.sql");
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await.map_err(backend_err)?;
        }
        Ok(())
    }
}

fn parse_severity(raw: &str) -> Severity {
    match raw {
        "critical" => Severity::Critical,
        "high" => Severity::High,
        "medium" => Severity::Medium,
        _ => Severity::Low,
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl SnapshotStore for Store {
    async fn latest(&self) -> Result<Option<ContractSnapshot>, StoreError> {
        let row = sqlx::query("SELECT version_hash, content, source_ref, captured_at FROM contract_snapshots ORDER BY captured_at DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(row.map(|row| ContractSnapshot {
            version_hash: row.get("version_hash"),
            content: row.get("content"),
            source_ref: row.try_get("source_ref").ok(),
            captured_at: parse_timestamp(&row.get::<String, _>("captured_at")),
        }))
    }

    async fn put(&self, snapshot: ContractSnapshot) -> Result<ContractSnapshot, StoreError> {
        // Idempotent on version_hash: an existing row with the same hash is
        // left untouched rather than overwritten (spec §4.1).
        sqlx::query(
            "INSERT INTO contract_snapshots (version_hash, content, source_ref, captured_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT (version_hash) DO NOTHING",
        )
        .bind(&snapshot.version_hash)
        .bind(&snapshot.content)
        .bind(&snapshot.source_ref)
        .bind(snapshot.captured_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(snapshot)
    }
}

#[async_trait]
impl ChangeStore for Store {
    async fn create(&self, change: ContractChange) -> Result<ContractChange, StoreError> {
        let next_id: i64 = sqlx::query("SELECT COALESCE(MAX(change_id), 0) + 1 AS next_id FROM contract_changes")
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?
            .get("next_id");

        let mut change = change;
        change.change_id = next_id;

        sqlx::query(
            "INSERT INTO contract_changes \
             (change_id, base_ref, head_ref, is_breaking, severity, summary, changed_routes, field_details, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(change.change_id)
        .bind(&change.base_ref)
        .bind(&change.head_ref)
        .bind(change.is_breaking)
        .bind(change.severity.as_str())
        .bind(&change.summary)
        .bind(serde_json::to_string(&change.changed_routes).map_err(|e| StoreError::Backend(e.to_string()))?)
        .bind(serde_json::to_string(&change.field_details).map_err(|e| StoreError::Backend(e.to_string()))?)
        .bind(change.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(change)
    }

    async fn get(&self, change_id: i64) -> Result<ContractChange, StoreError> {
        let row = sqlx::query(
            "SELECT change_id, base_ref, head_ref, is_breaking, severity, summary, changed_routes, field_details, created_at \
             FROM contract_changes WHERE change_id = ?",
        )
        .bind(change_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?
        .ok_or(StoreError::NotFound)?;

        Ok(ContractChange {
            change_id: row.get("change_id"),
            base_ref: row.get("base_ref"),
            head_ref: row.get("head_ref"),
            is_breaking: row.get("is_breaking"),
            severity: parse_severity(&row.get::<String, _>("severity")),
            summary: row.get("summary"),
            changed_routes: serde_json::from_str(&row.get::<String, _>("changed_routes")).unwrap_or_default(),
            field_details: serde_json::from_str(&row.get::<String, _>("field_details")).unwrap_or_default(),
            created_at: parse_timestamp(&row.get::<String, _>("created_at")),
        })
    }

    async fn put_impact_records(&self, records: Vec<ImpactRecord>) -> Result<(), StoreError> {
        for record in records {
            sqlx::query(
                "INSERT INTO impact_sets (change_id, caller_service, method, route_template, calls_last_7d, confidence, declared_only) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(record.change_id)
            .bind(&record.caller_service)
            .bind(&record.method)
            .bind(&record.route_template)
            .bind(record.calls_last_7d as i64)
            .bind(match record.confidence {
                propagate_types::impact::Confidence::High => "high",
                propagate_types::impact::Confidence::Medium => "medium",
                propagate_types::impact::Confidence::Low => "low",
            })
            .bind(record.declared_only)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        }
        Ok(())
    }

    async fn impact_records_for(&self, change_id: i64) -> Result<Vec<ImpactRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT change_id, caller_service, method, route_template, calls_last_7d, confidence, declared_only \
             FROM impact_sets WHERE change_id = ?",
        )
        .bind(change_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(rows
            .into_iter()
            .map(|row| ImpactRecord {
                change_id: row.get("change_id"),
                caller_service: row.get("caller_service"),
                method: row.get("method"),
                route_template: row.get("route_template"),
                calls_last_7d: row.get::<i64, _>("calls_last_7d") as u64,
                confidence: match row.get::<String, _>("confidence").as_str() {
                    "high" => propagate_types::impact::Confidence::High,
                    "medium" => propagate_types::impact::Confidence::Medium,
                    _ => propagate_types::impact::Confidence::Low,
                },
                declared_only: row.get("declared_only"),
            })
            .collect())
    }
}

#[async_trait]
impl JobStore for Store {
    async fn create(&self, job: RemediationJob) -> Result<RemediationJob, StoreError> {
        sqlx::query(
            "INSERT INTO remediation_jobs \
             (job_id, change_id, target_repo, status, agent_run_id, pr_url, bundle_hash, error_summary, created_at, updated_at, is_dry_run) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.job_id.to_string())
        .bind(job.change_id)
        .bind(&job.target_repo)
        .bind(job.status.as_str())
        .bind(&job.agent_run_id)
        .bind(&job.pr_url)
        .bind(&job.bundle_hash)
        .bind(&job.error_summary)
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .bind(job.is_dry_run)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(job)
    }

    async fn update(&self, job: RemediationJob) -> Result<RemediationJob, StoreError> {
        sqlx::query(
            "UPDATE remediation_jobs SET status = ?, agent_run_id = ?, pr_url = ?, error_summary = ?, updated_at = ? \
             WHERE job_id = ?",
        )
        .bind(job.status.as_str())
        .bind(&job.agent_run_id)
        .bind(&job.pr_url)
        .bind(&job.error_summary)
        .bind(job.updated_at.to_rfc3339())
        .bind(job.job_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(job)
    }

    async fn get(&self, job_id: uuid::Uuid) -> Result<RemediationJob, StoreError> {
        let row = sqlx::query(
            "SELECT job_id, change_id, target_repo, status, agent_run_id, pr_url, bundle_hash, error_summary, created_at, updated_at, is_dry_run \
             FROM remediation_jobs WHERE job_id = ?",
        )
        .bind(job_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?
        .ok_or(StoreError::NotFound)?;
        Ok(row_to_job(row))
    }

    async fn by_change(&self, change_id: i64) -> Result<Vec<RemediationJob>, StoreError> {
        let rows = sqlx::query(
            "SELECT job_id, change_id, target_repo, status, agent_run_id, pr_url, bundle_hash, error_summary, created_at, updated_at, is_dry_run \
             FROM remediation_jobs WHERE change_id = ?",
        )
        .bind(change_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(rows.into_iter().map(row_to_job).collect())
    }

    async fn needing_reconciliation(&self) -> Result<Vec<RemediationJob>, StoreError> {
        let rows = sqlx::query(
            "SELECT job_id, change_id, target_repo, status, agent_run_id, pr_url, bundle_hash, error_summary, created_at, updated_at, is_dry_run \
             FROM remediation_jobs WHERE status NOT IN ('ci_failed', 'needs_human', 'green') OR pr_url IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(rows.into_iter().map(row_to_job).collect())
    }
}

fn row_to_job(row: sqlx::any::AnyRow) -> RemediationJob {
    RemediationJob {
        job_id: row.get::<String, _>("job_id").parse().unwrap_or_else(|_| uuid::Uuid::nil()),
        change_id: row.get("change_id"),
        target_repo: row.get("target_repo"),
        status: row.get::<String, _>("status").parse().unwrap_or(JobStatus::NeedsHuman),
        agent_run_id: row.try_get("agent_run_id").ok(),
        pr_url: row.try_get("pr_url").ok(),
        bundle_hash: row.get("bundle_hash"),
        error_summary: row.try_get("error_summary").ok(),
        created_at: parse_timestamp(&row.get::<String, _>("created_at")),
        updated_at: parse_timestamp(&row.get::<String, _>("updated_at")),
        is_dry_run: row.get("is_dry_run"),
    }
}

#[async_trait]
impl AuditStore for Store {
    async fn append(&self, entry: AuditLogEntry) -> Result<AuditLogEntry, StoreError> {
        let next_id: i64 = sqlx::query("SELECT COALESCE(MAX(id), 0) + 1 AS next_id FROM audit_log")
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?
            .get("next_id");

        let mut entry = entry;
        entry.id = next_id;

        sqlx::query("INSERT INTO audit_log (id, job_id, old_status, new_status, changed_at, detail) VALUES (?, ?, ?, ?, ?, ?)")
            .bind(entry.id)
            .bind(entry.job_id.to_string())
            .bind(&entry.old_status)
            .bind(&entry.new_status)
            .bind(entry.changed_at.to_rfc3339())
            .bind(&entry.detail)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;

        Ok(entry)
    }

    async fn for_job(&self, job_id: uuid::Uuid) -> Result<Vec<AuditLogEntry>, StoreError> {
        let rows = sqlx::query("SELECT id, job_id, old_status, new_status, changed_at, detail FROM audit_log WHERE job_id = ? ORDER BY changed_at ASC")
            .bind(job_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(rows
            .into_iter()
            .map(|row| AuditLogEntry {
                id: row.get("id"),
                job_id: row.get::<String, _>("job_id").parse().unwrap_or_else(|_| uuid::Uuid::nil()),
                old_status: row.try_get("old_status").ok(),
                new_status: row.get("new_status"),
                changed_at: parse_timestamp(&row.get::<String, _>("changed_at")),
                detail: row.try_get("detail").ok(),
            })
            .collect())
    }

    async fn count_with_marker(&self, job_id: uuid::Uuid, marker: &str) -> Result<u32, StoreError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM audit_log WHERE job_id = ? AND detail LIKE ?")
            .bind(job_id.to_string())
            .bind(format!("%{marker}%"))
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?
            .get("n");
        Ok(count as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use propagate_types::JobStatus;

    async fn test_store() -> Store {
        Store::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn put_is_idempotent_on_version_hash() {
        let store = test_store().await;
        let snap = ContractSnapshot::new("abc123", "{}", None);
        store.put(snap.clone()).await.unwrap();
        store.put(snap.clone()).await.unwrap();
        let latest = store.latest().await.unwrap().unwrap();
        assert_eq!(latest.version_hash, "abc123");
    }

    #[tokio::test]
    async fn job_lifecycle_round_trips() {
        let store = test_store().await;
        let change = store
            .create(ContractChange {
                change_id: 0,
                base_ref: "H0".into(),
                head_ref: "H1".into(),
                is_breaking: true,
                severity: Severity::Critical,
                summary: "test".into(),
                changed_routes: vec!["POST /x".into()],
                field_details: vec![],
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let job = store
            .create(RemediationJob::new_queued(change.change_id, "org/repo", "hash123", false))
            .await
            .unwrap();

        let mut updated = job.clone();
        updated.status = JobStatus::Running;
        let updated = store.update(updated).await.unwrap();
        assert_eq!(updated.status.as_str(), "running");

        let fetched = store.get(job.job_id).await.unwrap();
        assert_eq!(fetched.status.as_str(), "running");
    }

    #[tokio::test]
    async fn audit_marker_count_reflects_appended_rows() {
        let store = test_store().await;
        let job_id = uuid::Uuid::new_v4();
        for _ in 0..3 {
            store
                .append(AuditLogEntry {
                    id: 0,
                    job_id,
                    old_status: Some("pr_opened".into()),
                    new_status: "pr_opened".into(),
                    changed_at: Utc::now(),
                    detail: Some("CI status unknown, retrying".into()),
                })
                .await
                .unwrap();
        }
        let count = store.count_with_marker(job_id, propagate_types::audit::CI_UNKNOWN_MARKER).await.unwrap();
        assert_eq!(count, 3);
    }
}
