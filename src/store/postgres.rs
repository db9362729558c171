//! PostgreSQL store for production use.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)
//!
//! ## Concurrency
//!
//! Custody appends take a transaction-scoped advisory lock keyed by the
//! evidence id, so two concurrent appends for the same evidence serialize and
//! each sees the true chain head. Analysis claims are a single-statement
//! compare-and-set on the status column.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;

use crate::canonical::canonical_now;
use crate::types::{
    Analysis, AnalysisStatus, AnalysisType, CustodyDraft, CustodyRecord, Evidence, EvidenceQuery,
    EvidenceStatus, EvidenceType, Finding, Policy, PolicyEffect, PolicyVersion,
};
use crate::types::policy::ChangeKind;

use super::{
    AnalysisStore, CustodyStore, EvidenceStore, HealthProbe, PolicyStore, StoreError,
};

/// SQL schema for the live policy table.
pub const POLICIES_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS policies (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    effect TEXT NOT NULL,
    resources TEXT[] NOT NULL DEFAULT '{}',
    actions TEXT[] NOT NULL DEFAULT '{}',
    subjects TEXT[] NOT NULL DEFAULT '{}',
    conditions JSONB NOT NULL DEFAULT '{}',
    priority INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL,
    active BOOLEAN NOT NULL DEFAULT TRUE,
    metadata JSONB NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL,
    created_by TEXT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    updated_by TEXT NOT NULL,

    CONSTRAINT policies_effect_check CHECK (effect IN ('allow', 'deny'))
);

CREATE INDEX IF NOT EXISTS idx_policies_active_priority
    ON policies(active, priority DESC);
"#;

/// SQL schema for the policy history table.
pub const POLICY_VERSIONS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS policy_versions (
    id TEXT PRIMARY KEY,
    policy_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    policy_data JSONB NOT NULL,
    change_kind TEXT NOT NULL,
    changed_by TEXT NOT NULL,
    changed_at TIMESTAMPTZ NOT NULL,
    reason TEXT NOT NULL DEFAULT '',

    CONSTRAINT policy_versions_unique UNIQUE (policy_id, version),
    CONSTRAINT policy_versions_kind_check CHECK (change_kind IN ('created', 'updated', 'deleted'))
);

CREATE INDEX IF NOT EXISTS idx_policy_versions_policy
    ON policy_versions(policy_id, version);
"#;

/// SQL schema for the evidence catalogue table.
pub const EVIDENCE_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS evidence (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    evidence_type TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    content_hash TEXT NOT NULL,
    hash_algorithm TEXT NOT NULL DEFAULT 'sha256',
    size_bytes BIGINT NOT NULL,
    storage_location TEXT NOT NULL,
    tags TEXT[] NOT NULL DEFAULT '{}',
    metadata JSONB NOT NULL DEFAULT '{}',
    status TEXT NOT NULL,
    collected_at TIMESTAMPTZ NOT NULL,
    collected_by TEXT NOT NULL,
    verified_at TIMESTAMPTZ,
    verified_by TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_evidence_collected_at
    ON evidence(collected_at DESC);
CREATE INDEX IF NOT EXISTS idx_evidence_status
    ON evidence(status);
"#;

/// SQL schema for the custody chain table.
pub const CUSTODY_RECORDS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS custody_records (
    id TEXT PRIMARY KEY,
    evidence_id TEXT NOT NULL,
    handler TEXT NOT NULL,
    action TEXT NOT NULL,
    location TEXT NOT NULL DEFAULT '',
    notes TEXT NOT NULL DEFAULT '',
    signature TEXT NOT NULL DEFAULT '',
    prev_hash TEXT NOT NULL DEFAULT '',
    record_hash TEXT NOT NULL,
    "timestamp" TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_custody_evidence_timestamp
    ON custody_records(evidence_id, "timestamp");
"#;

/// SQL schema for the analysis orchestration table.
pub const ANALYSIS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS analysis (
    id TEXT PRIMARY KEY,
    evidence_id TEXT NOT NULL,
    analysis_type TEXT NOT NULL,
    status TEXT NOT NULL,
    parameters JSONB NOT NULL DEFAULT '{}',
    results JSONB NOT NULL DEFAULT '{}',
    findings JSONB NOT NULL DEFAULT '[]',
    processed_by TEXT NOT NULL DEFAULT '',
    started_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    error_message TEXT NOT NULL DEFAULT '',
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,

    CONSTRAINT analysis_status_check CHECK (status IN ('pending', 'running', 'completed', 'failed', 'cancelled'))
);

CREATE INDEX IF NOT EXISTS idx_analysis_evidence
    ON analysis(evidence_id);
CREATE INDEX IF NOT EXISTS idx_analysis_pending
    ON analysis(created_at) WHERE status = 'pending';
"#;

/// Configuration for PostgreSQL connection pool.
///
/// Defaults balance pool size against managed-Postgres connection limits;
/// timeouts are aggressive to fail fast, and max lifetime forces periodic
/// reconnection.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/custody".to_string()),
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            min_connections: std::env::var("DB_MIN_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            connect_timeout_secs: std::env::var("DB_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            idle_timeout_secs: std::env::var("DB_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            max_lifetime_secs: std::env::var("DB_MAX_LIFETIME_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1800),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    /// Current pool size.
    pub size: u32,
    /// Number of idle connections.
    pub idle: usize,
    /// Maximum pool size.
    pub max: u32,
}

/// PostgreSQL store implementing every persistence trait.
///
/// Uses connection pooling with production-tuned settings.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new store with the given configuration.
    pub async fn new(config: PostgresConfig) -> Result<Self, sqlx::Error> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            idle_timeout_secs = config.idle_timeout_secs,
            max_lifetime_secs = config.max_lifetime_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self, sqlx::Error> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Apply the table schemas. Idempotent.
    pub async fn apply_schema(&self) -> Result<(), sqlx::Error> {
        for schema in [
            POLICIES_TABLE_SCHEMA,
            POLICY_VERSIONS_TABLE_SCHEMA,
            EVIDENCE_TABLE_SCHEMA,
            CUSTODY_RECORDS_TABLE_SCHEMA,
            ANALYSIS_TABLE_SCHEMA,
        ] {
            sqlx::raw_sql(schema).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Get the connection pool for health checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get pool statistics for monitoring.
    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.pool.options().get_max_connections(),
        }
    }

    fn decode_err(column: &str, value: &str) -> sqlx::Error {
        sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: format!("unrecognized {} value: {}", column, value).into(),
        }
    }

    fn json_err(e: serde_json::Error) -> sqlx::Error {
        sqlx::Error::Decode(Box::new(e))
    }

    /// Parse a policy from a database row.
    fn parse_policy_row(row: &PgRow) -> Result<Policy, sqlx::Error> {
        let effect_str: String = row.try_get("effect")?;
        let effect = PolicyEffect::from_str(&effect_str)
            .ok_or_else(|| Self::decode_err("effect", &effect_str))?;

        let conditions: serde_json::Value = row.try_get("conditions")?;
        let metadata: serde_json::Value = row.try_get("metadata")?;
        let version: i32 = row.try_get("version")?;

        Ok(Policy {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            effect,
            resources: row.try_get("resources")?,
            actions: row.try_get("actions")?,
            subjects: row.try_get("subjects")?,
            conditions: serde_json::from_value(conditions).map_err(Self::json_err)?,
            priority: row.try_get("priority")?,
            version: version as u32,
            active: row.try_get("active")?,
            metadata: serde_json::from_value(metadata).map_err(Self::json_err)?,
            created_at: row.try_get("created_at")?,
            created_by: row.try_get("created_by")?,
            updated_at: row.try_get("updated_at")?,
            updated_by: row.try_get("updated_by")?,
        })
    }

    /// Parse a policy history entry from a database row.
    fn parse_version_row(row: &PgRow) -> Result<PolicyVersion, sqlx::Error> {
        let kind_str: String = row.try_get("change_kind")?;
        let change_kind = ChangeKind::from_str(&kind_str)
            .ok_or_else(|| Self::decode_err("change_kind", &kind_str))?;
        let policy_data: serde_json::Value = row.try_get("policy_data")?;
        let version: i32 = row.try_get("version")?;

        Ok(PolicyVersion {
            id: row.try_get("id")?,
            policy_id: row.try_get("policy_id")?,
            version: version as u32,
            policy_data: serde_json::from_value(policy_data).map_err(Self::json_err)?,
            change_kind,
            changed_by: row.try_get("changed_by")?,
            changed_at: row.try_get("changed_at")?,
            reason: row.try_get("reason")?,
        })
    }

    /// Parse an evidence record from a database row.
    fn parse_evidence_row(row: &PgRow) -> Result<Evidence, sqlx::Error> {
        let type_str: String = row.try_get("evidence_type")?;
        let evidence_type = EvidenceType::from_str(&type_str)
            .ok_or_else(|| Self::decode_err("evidence_type", &type_str))?;
        let status_str: String = row.try_get("status")?;
        let status = EvidenceStatus::from_str(&status_str)
            .ok_or_else(|| Self::decode_err("status", &status_str))?;

        let metadata: serde_json::Value = row.try_get("metadata")?;
        let size_bytes: i64 = row.try_get("size_bytes")?;

        Ok(Evidence {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            evidence_type,
            source: row.try_get("source")?,
            description: row.try_get("description")?,
            content_hash: row.try_get("content_hash")?,
            hash_algorithm: row.try_get("hash_algorithm")?,
            size_bytes: size_bytes as u64,
            storage_location: row.try_get("storage_location")?,
            tags: row.try_get("tags")?,
            metadata: serde_json::from_value(metadata).map_err(Self::json_err)?,
            status,
            collected_at: row.try_get("collected_at")?,
            collected_by: row.try_get("collected_by")?,
            verified_at: row.try_get("verified_at")?,
            verified_by: row.try_get("verified_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Parse a custody record from a database row.
    fn parse_custody_row(row: &PgRow) -> Result<CustodyRecord, sqlx::Error> {
        Ok(CustodyRecord {
            id: row.try_get("id")?,
            evidence_id: row.try_get("evidence_id")?,
            handler: row.try_get("handler")?,
            action: row.try_get("action")?,
            location: row.try_get("location")?,
            notes: row.try_get("notes")?,
            signature: row.try_get("signature")?,
            prev_hash: row.try_get("prev_hash")?,
            record_hash: row.try_get("record_hash")?,
            timestamp: row.try_get("timestamp")?,
            created_at: row.try_get("created_at")?,
        })
    }

    /// Parse an analysis row from the database.
    fn parse_analysis_row(row: &PgRow) -> Result<Analysis, sqlx::Error> {
        let type_str: String = row.try_get("analysis_type")?;
        let analysis_type = AnalysisType::from_str(&type_str)
            .ok_or_else(|| Self::decode_err("analysis_type", &type_str))?;
        let status_str: String = row.try_get("status")?;
        let status = AnalysisStatus::from_str(&status_str)
            .ok_or_else(|| Self::decode_err("status", &status_str))?;

        let parameters: serde_json::Value = row.try_get("parameters")?;
        let results: serde_json::Value = row.try_get("results")?;
        let findings: serde_json::Value = row.try_get("findings")?;

        Ok(Analysis {
            id: row.try_get("id")?,
            evidence_id: row.try_get("evidence_id")?,
            analysis_type,
            status,
            parameters: serde_json::from_value(parameters).map_err(Self::json_err)?,
            results: serde_json::from_value(results).map_err(Self::json_err)?,
            findings: serde_json::from_value::<Vec<Finding>>(findings).map_err(Self::json_err)?,
            processed_by: row.try_get("processed_by")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn insert_version_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        version: &PolicyVersion,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO policy_versions
                (id, policy_id, version, policy_data, change_kind, changed_by, changed_at, reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&version.id)
        .bind(&version.policy_id)
        .bind(version.version as i32)
        .bind(serde_json::to_value(&version.policy_data).map_err(Self::json_err)?)
        .bind(version.change_kind.to_string())
        .bind(&version.changed_by)
        .bind(version.changed_at)
        .bind(&version.reason)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_custody_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        record: &CustodyRecord,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO custody_records
                (id, evidence_id, handler, action, location, notes, signature,
                 prev_hash, record_hash, "timestamp", created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&record.id)
        .bind(&record.evidence_id)
        .bind(&record.handler)
        .bind(&record.action)
        .bind(&record.location)
        .bind(&record.notes)
        .bind(&record.signature)
        .bind(&record.prev_hash)
        .bind(&record.record_hash)
        .bind(record.timestamp)
        .bind(record.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Transient(e.to_string())
    }
}

const POLICY_COLUMNS: &str = "id, name, description, effect, resources, actions, subjects, \
     conditions, priority, version, active, metadata, created_at, created_by, updated_at, updated_by";

const EVIDENCE_COLUMNS: &str = "id, name, evidence_type, source, description, content_hash, \
     hash_algorithm, size_bytes, storage_location, tags, metadata, status, collected_at, \
     collected_by, verified_at, verified_by, created_at, updated_at";

const ANALYSIS_COLUMNS: &str = "id, evidence_id, analysis_type, status, parameters, results, \
     findings, processed_by, started_at, completed_at, error_message, created_at, updated_at";

#[async_trait]
impl PolicyStore for PostgresStore {
    async fn get_policy(&self, id: &str) -> Result<Option<Policy>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM policies WHERE id = $1",
            POLICY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(Self::parse_policy_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_policies(
        &self,
        active_only: bool,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<Policy>, u64), StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}, COUNT(*) OVER() AS total
            FROM policies
            WHERE (NOT $1) OR active
            ORDER BY created_at DESC, id
            OFFSET $2 LIMIT $3
            "#,
            POLICY_COLUMNS
        ))
        .bind(active_only)
        .bind(offset as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let total = rows
            .first()
            .map(|r| r.try_get::<i64, _>("total"))
            .transpose()?
            .unwrap_or(0) as u64;
        let policies = rows
            .iter()
            .map(Self::parse_policy_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((policies, total))
    }

    async fn find_applicable(
        &self,
        resource_type: &str,
        action: &str,
    ) -> Result<Vec<Policy>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM policies
            WHERE active
              AND ('*' = ANY(resources) OR $1 = ANY(resources))
              AND ('*' = ANY(actions) OR $2 = ANY(actions))
            ORDER BY priority DESC, created_at DESC
            "#,
            POLICY_COLUMNS
        ))
        .bind(resource_type)
        .bind(action)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(Self::parse_policy_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    async fn insert_policy(
        &self,
        policy: &Policy,
        version: &PolicyVersion,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO policies
                (id, name, description, effect, resources, actions, subjects, conditions,
                 priority, version, active, metadata, created_at, created_by, updated_at, updated_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(&policy.id)
        .bind(&policy.name)
        .bind(&policy.description)
        .bind(policy.effect.to_string())
        .bind(&policy.resources)
        .bind(&policy.actions)
        .bind(&policy.subjects)
        .bind(serde_json::to_value(&policy.conditions).map_err(Self::json_err)?)
        .bind(policy.priority)
        .bind(policy.version as i32)
        .bind(policy.active)
        .bind(serde_json::to_value(&policy.metadata).map_err(Self::json_err)?)
        .bind(policy.created_at)
        .bind(&policy.created_by)
        .bind(policy.updated_at)
        .bind(&policy.updated_by)
        .execute(&mut *tx)
        .await?;

        Self::insert_version_tx(&mut tx, version).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_policy(
        &self,
        policy: &Policy,
        version: &PolicyVersion,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE policies SET
                name = $2, description = $3, effect = $4, resources = $5, actions = $6,
                subjects = $7, conditions = $8, priority = $9, version = $10, active = $11,
                metadata = $12, updated_at = $13, updated_by = $14
            WHERE id = $1
            "#,
        )
        .bind(&policy.id)
        .bind(&policy.name)
        .bind(&policy.description)
        .bind(policy.effect.to_string())
        .bind(&policy.resources)
        .bind(&policy.actions)
        .bind(&policy.subjects)
        .bind(serde_json::to_value(&policy.conditions).map_err(Self::json_err)?)
        .bind(policy.priority)
        .bind(policy.version as i32)
        .bind(policy.active)
        .bind(serde_json::to_value(&policy.metadata).map_err(Self::json_err)?)
        .bind(policy.updated_at)
        .bind(&policy.updated_by)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::insert_version_tx(&mut tx, version).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn delete_policy(&self, id: &str, version: &PolicyVersion) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM policies WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::insert_version_tx(&mut tx, version).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn policy_history(
        &self,
        policy_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<PolicyVersion>, u64), StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, policy_id, version, policy_data, change_kind, changed_by,
                   changed_at, reason, COUNT(*) OVER() AS total
            FROM policy_versions
            WHERE policy_id = $1
            ORDER BY version
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(policy_id)
        .bind(offset as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let total = rows
            .first()
            .map(|r| r.try_get::<i64, _>("total"))
            .transpose()?
            .unwrap_or(0) as u64;
        let versions = rows
            .iter()
            .map(Self::parse_version_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((versions, total))
    }

    async fn get_policy_version(
        &self,
        policy_id: &str,
        version: u32,
    ) -> Result<Option<PolicyVersion>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, policy_id, version, policy_data, change_kind, changed_by, changed_at, reason
            FROM policy_versions
            WHERE policy_id = $1 AND version = $2
            "#,
        )
        .bind(policy_id)
        .bind(version as i32)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(Self::parse_version_row(r)?)),
            None => Ok(None),
        }
    }

    async fn max_policy_version(&self, policy_id: &str) -> Result<Option<u32>, StoreError> {
        let row = sqlx::query(
            "SELECT MAX(version) AS max_version FROM policy_versions WHERE policy_id = $1",
        )
        .bind(policy_id)
        .fetch_one(&self.pool)
        .await?;

        let max: Option<i32> = row.try_get("max_version")?;
        Ok(max.map(|v| v as u32))
    }
}

#[async_trait]
impl EvidenceStore for PostgresStore {
    async fn insert_evidence(
        &self,
        evidence: &Evidence,
        first_record: &CustodyRecord,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO evidence
                (id, name, evidence_type, source, description, content_hash, hash_algorithm,
                 size_bytes, storage_location, tags, metadata, status, collected_at, collected_by,
                 verified_at, verified_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(&evidence.id)
        .bind(&evidence.name)
        .bind(evidence.evidence_type.to_string())
        .bind(&evidence.source)
        .bind(&evidence.description)
        .bind(&evidence.content_hash)
        .bind(&evidence.hash_algorithm)
        .bind(evidence.size_bytes as i64)
        .bind(&evidence.storage_location)
        .bind(&evidence.tags)
        .bind(serde_json::to_value(&evidence.metadata).map_err(Self::json_err)?)
        .bind(evidence.status.to_string())
        .bind(evidence.collected_at)
        .bind(&evidence.collected_by)
        .bind(evidence.verified_at)
        .bind(&evidence.verified_by)
        .bind(evidence.created_at)
        .bind(evidence.updated_at)
        .execute(&mut *tx)
        .await?;

        Self::insert_custody_tx(&mut tx, first_record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_evidence(&self, id: &str) -> Result<Option<Evidence>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM evidence WHERE id = $1",
            EVIDENCE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(Self::parse_evidence_row(r)?)),
            None => Ok(None),
        }
    }

    async fn update_evidence(&self, evidence: &Evidence) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE evidence SET
                name = $2, source = $3, description = $4, tags = $5, metadata = $6,
                status = $7, verified_at = $8, verified_by = $9, updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(&evidence.id)
        .bind(&evidence.name)
        .bind(&evidence.source)
        .bind(&evidence.description)
        .bind(&evidence.tags)
        .bind(serde_json::to_value(&evidence.metadata).map_err(Self::json_err)?)
        .bind(evidence.status.to_string())
        .bind(evidence.verified_at)
        .bind(&evidence.verified_by)
        .bind(evidence.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn evidence_exists(&self, id: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 AS one FROM evidence WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn search_evidence(
        &self,
        query: &EvidenceQuery,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<Evidence>, u64), StoreError> {
        let types: Vec<String> = query.types.iter().map(|t| t.to_string()).collect();

        let rows = sqlx::query(&format!(
            r#"
            SELECT {}, COUNT(*) OVER() AS total
            FROM evidence
            WHERE ($1 = '' OR name ILIKE '%' || $1 || '%'
                   OR description ILIKE '%' || $1 || '%'
                   OR source ILIKE '%' || $1 || '%')
              AND (cardinality($2::text[]) = 0 OR evidence_type = ANY($2))
              AND ($3::timestamptz IS NULL OR collected_at >= $3)
              AND ($4::timestamptz IS NULL OR collected_at <= $4)
              AND (cardinality($5::text[]) = 0 OR tags @> $5)
            ORDER BY collected_at DESC, id
            OFFSET $6 LIMIT $7
            "#,
            EVIDENCE_COLUMNS
        ))
        .bind(&query.text)
        .bind(&types)
        .bind(query.collected_after)
        .bind(query.collected_before)
        .bind(&query.tags)
        .bind(offset as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let total = rows
            .first()
            .map(|r| r.try_get::<i64, _>("total"))
            .transpose()?
            .unwrap_or(0) as u64;
        let items = rows
            .iter()
            .map(Self::parse_evidence_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((items, total))
    }
}

#[async_trait]
impl CustodyStore for PostgresStore {
    async fn append_custody(&self, draft: CustodyDraft) -> Result<CustodyRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serialize appends per evidence id for the life of the transaction.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&draft.evidence_id)
            .execute(&mut *tx)
            .await?;

        let head = sqlx::query(
            r#"
            SELECT record_hash, "timestamp"
            FROM custody_records
            WHERE evidence_id = $1
            ORDER BY "timestamp" DESC
            LIMIT 1
            "#,
        )
        .bind(&draft.evidence_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (prev_hash, head_ts) = match head {
            Some(ref r) => (
                r.try_get::<String, _>("record_hash")?,
                Some(r.try_get::<chrono::DateTime<chrono::Utc>, _>("timestamp")?),
            ),
            None => (String::new(), None),
        };

        let mut timestamp = canonical_now();
        if let Some(head_ts) = head_ts {
            if timestamp <= head_ts {
                timestamp = head_ts + chrono::Duration::microseconds(1);
            }
        }

        let record = CustodyRecord::finalize(draft, prev_hash, timestamp);
        Self::insert_custody_tx(&mut tx, &record).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn custody_chain(&self, evidence_id: &str) -> Result<Vec<CustodyRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, evidence_id, handler, action, location, notes, signature,
                   prev_hash, record_hash, "timestamp", created_at
            FROM custody_records
            WHERE evidence_id = $1
            ORDER BY "timestamp"
            "#,
        )
        .bind(evidence_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(Self::parse_custody_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl AnalysisStore for PostgresStore {
    async fn insert_analysis(&self, analysis: &Analysis) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO analysis
                (id, evidence_id, analysis_type, status, parameters, results, findings,
                 processed_by, started_at, completed_at, error_message, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&analysis.id)
        .bind(&analysis.evidence_id)
        .bind(analysis.analysis_type.to_string())
        .bind(analysis.status.to_string())
        .bind(serde_json::to_value(&analysis.parameters).map_err(Self::json_err)?)
        .bind(serde_json::to_value(&analysis.results).map_err(Self::json_err)?)
        .bind(serde_json::to_value(&analysis.findings).map_err(Self::json_err)?)
        .bind(&analysis.processed_by)
        .bind(analysis.started_at)
        .bind(analysis.completed_at)
        .bind(&analysis.error_message)
        .bind(analysis.created_at)
        .bind(analysis.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_analysis(&self, id: &str) -> Result<Option<Analysis>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM analysis WHERE id = $1",
            ANALYSIS_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(Self::parse_analysis_row(r)?)),
            None => Ok(None),
        }
    }

    async fn claim_analysis(
        &self,
        id: &str,
        worker: &str,
    ) -> Result<Option<Analysis>, StoreError> {
        let now = canonical_now();
        let row = sqlx::query(&format!(
            r#"
            UPDATE analysis
            SET status = 'running', processed_by = $2, started_at = $3, updated_at = $3
            WHERE id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            ANALYSIS_COLUMNS
        ))
        .bind(id)
        .bind(worker)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(Self::parse_analysis_row(r)?)),
            None => Ok(None),
        }
    }

    async fn cancel_analysis(&self, id: &str) -> Result<Option<Analysis>, StoreError> {
        let now = canonical_now();
        let row = sqlx::query(&format!(
            r#"
            UPDATE analysis
            SET status = 'cancelled', completed_at = $2, updated_at = $2
            WHERE id = $1 AND status IN ('pending', 'running')
            RETURNING {}
            "#,
            ANALYSIS_COLUMNS
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(Self::parse_analysis_row(r)?)),
            None => Ok(None),
        }
    }

    async fn complete_analysis(&self, analysis: &Analysis) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE analysis
            SET status = $2, results = $3, findings = $4, completed_at = $5,
                error_message = $6, updated_at = $7
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(&analysis.id)
        .bind(analysis.status.to_string())
        .bind(serde_json::to_value(&analysis.results).map_err(Self::json_err)?)
        .bind(serde_json::to_value(&analysis.findings).map_err(Self::json_err)?)
        .bind(analysis.completed_at)
        .bind(&analysis.error_message)
        .bind(analysis.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn pending_analyses(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT id FROM analysis WHERE status = 'pending' ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| r.try_get("id").map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl HealthProbe for PostgresStore {
    async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}
