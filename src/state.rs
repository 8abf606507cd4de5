//! Fingerprint-keyed analysis cache.
//!
//! [`StateStore`] maps `(kind, key)` to the last [`StateRecord`] written for
//! that artifact. Persistence is delegated to a [`StateBackend`], a small
//! string KV interface with per-entry expiry:
//!
//! | Backend | Storage |
//! |---------|---------|
//! | [`SqliteStateBackend`] | `state_entries` table, absolute `expires_at` in ms |
//! | [`MemoryStateBackend`] | `HashMap` behind a mutex |
//!
//! Keys are `"{prefix}:{kind}:{key}"`, so a ticket and a pull request with
//! the same identifier never collide.
//!
//! # Failure policy
//!
//! The store never propagates backend failures to callers: a failed read is
//! a miss and a failed write returns `false`. Both are logged.
//!
//! # Record versions
//!
//! Records are written as schema version 2 (`{"schema_version": 2, ...}`).
//! Records without a `schema_version` are the version 1 layout
//! (`ticket_key`/`pr_key`, `analysis_result`/`verification_result`, ISO
//! string timestamps) and are migrated on read. Version 1 records were kept
//! under the `jira`/`github` key segments; `get` falls back to those keys.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::config::CacheConfig;
use crate::error::RecordError;
use crate::models::{
    clamp_confidence, AnalysisResult, ArtifactKind, Finding, Fingerprint, StateRecord,
    DEFAULT_ANALYZER_VERSION,
};

/// Schema version written by [`encode_record`].
pub const RECORD_SCHEMA_VERSION: u64 = 2;

// ============ Backend boundary ============

/// String KV store with per-entry expiry.
///
/// Expired entries must be invisible to `get`. Purging them is up to the
/// backend; `entries` reports them until they are gone.
#[async_trait]
pub trait StateBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value, expiring
    /// after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Remove `key`. Returns whether a live entry existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Every stored key starting with `prefix`, with its expiry in
    /// milliseconds since the epoch. Includes expired entries not yet purged.
    async fn entries(&self, prefix: &str) -> Result<Vec<(String, i64)>>;
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_ms(ttl: Duration) -> i64 {
    now_ms().saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64)
}

/// [`StateBackend`] over the `state_entries` table.
///
/// TTL is enforced at read time; every write first purges elapsed rows.
pub struct SqliteStateBackend {
    pool: SqlitePool,
}

impl SqliteStateBackend {
    /// Expects a pool on which `run_migrations` has already run.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateBackend for SqliteStateBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM state_entries WHERE key = ? AND expires_at > ?")
                .bind(key)
                .bind(now_ms())
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        let purged = sqlx::query("DELETE FROM state_entries WHERE expires_at <= ?")
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if purged > 0 {
            debug!(purged, "Purged expired state entries");
        }

        sqlx::query(
            r#"
            INSERT INTO state_entries (key, value, expires_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expiry_ms(ttl))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let expires_at: Option<i64> =
            sqlx::query_scalar("DELETE FROM state_entries WHERE key = ? RETURNING expires_at")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(matches!(expires_at, Some(at) if at > now_ms()))
    }

    async fn entries(&self, prefix: &str) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT key, expires_at FROM state_entries WHERE instr(key, ?) = 1 ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// In-process [`StateBackend`] with the same expiry semantics as
/// [`SqliteStateBackend`].
#[derive(Default)]
pub struct MemoryStateBackend {
    entries: Mutex<HashMap<String, (String, i64)>>,
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (String, i64)>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("state backend lock poisoned"))
    }
}

#[async_trait]
impl StateBackend for MemoryStateBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = now_ms();
        Ok(self
            .lock()?
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = now_ms();
        let mut entries = self.lock()?;
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.insert(key.to_string(), (value.to_string(), expiry_ms(ttl)));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed = self.lock()?.remove(key);
        Ok(matches!(removed, Some((_, at)) if at > now_ms()))
    }

    async fn entries(&self, prefix: &str) -> Result<Vec<(String, i64)>> {
        let mut out: Vec<(String, i64)> = self
            .lock()?
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, (_, at))| (k.clone(), *at))
            .collect();
        out.sort();
        Ok(out)
    }
}

// ============ Record encoding ============

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    schema_version: u64,
    #[serde(flatten)]
    record: &'a StateRecord,
}

#[derive(Deserialize)]
struct Envelope {
    #[allow(dead_code)]
    schema_version: u64,
    #[serde(flatten)]
    record: StateRecord,
}

/// Serialize a record as the current schema version.
pub fn encode_record(record: &StateRecord) -> Result<String, RecordError> {
    Ok(serde_json::to_string(&EnvelopeRef {
        schema_version: RECORD_SCHEMA_VERSION,
        record,
    })?)
}

/// Decode any supported schema version into a current [`StateRecord`],
/// checking it describes an artifact of kind `expected`.
pub fn decode_record(raw: &str, expected: ArtifactKind) -> Result<StateRecord, RecordError> {
    let value: Value = serde_json::from_str(raw)?;

    let record = match value.get("schema_version") {
        None => migrate_v1(serde_json::from_value(value)?)?,
        Some(version) => match version.as_u64() {
            Some(RECORD_SCHEMA_VERSION) => serde_json::from_value::<Envelope>(value)?.record,
            Some(other) => return Err(RecordError::UnsupportedVersion(other)),
            None => {
                return Err(RecordError::Malformed(serde_json::Error::custom(
                    "schema_version is not an unsigned integer",
                )))
            }
        },
    };

    let found = record.kind();
    if found != expected {
        return Err(RecordError::KindMismatch {
            key: record.key,
            expected,
            found,
        });
    }
    Ok(record)
}

/// Version 1 record layout.
#[derive(Deserialize)]
struct LegacyRecord {
    #[serde(default)]
    ticket_key: Option<String>,
    #[serde(default)]
    content_hash: Option<String>,
    #[serde(default)]
    pr_key: Option<String>,
    #[serde(default)]
    commit_sha: Option<String>,
    #[serde(default)]
    files_hash: Option<String>,
    last_analyzed: String,
    #[serde(default)]
    analysis_result: Option<LegacyAnalysisResult>,
    #[serde(default)]
    verification_result: Option<LegacyAnalysisResult>,
    #[serde(default)]
    metadata: Option<BTreeMap<String, Value>>,
}

#[derive(Deserialize)]
struct LegacyAnalysisResult {
    score: f64,
    #[serde(default)]
    issues: Vec<Value>,
    #[serde(default)]
    recommendations: Vec<Value>,
    confidence: f64,
    timestamp: String,
    #[serde(default)]
    analyzer_version: Option<String>,
}

fn migrate_v1(legacy: LegacyRecord) -> Result<StateRecord, RecordError> {
    let missing = |field: &str| {
        RecordError::Malformed(serde_json::Error::custom(format!(
            "version 1 record is missing {}",
            field
        )))
    };

    let (key, fingerprint, result) = if let Some(key) = legacy.ticket_key {
        let content_hash = legacy.content_hash.ok_or_else(|| missing("content_hash"))?;
        (key, Fingerprint::Ticket { content_hash }, legacy.analysis_result)
    } else if let Some(key) = legacy.pr_key {
        let fingerprint = Fingerprint::PullRequest {
            commit_sha: legacy.commit_sha.ok_or_else(|| missing("commit_sha"))?,
            files_hash: legacy.files_hash.ok_or_else(|| missing("files_hash"))?,
        };
        (key, fingerprint, legacy.verification_result)
    } else {
        return Err(missing("ticket_key or pr_key"));
    };

    let result = match result {
        Some(r) => Some(AnalysisResult {
            score: r.score,
            issues: r.issues.into_iter().map(legacy_finding).collect(),
            recommendations: r.recommendations.into_iter().map(legacy_finding).collect(),
            confidence: clamp_confidence(r.confidence),
            timestamp: parse_timestamp(&r.timestamp)?,
            analyzer_version: r
                .analyzer_version
                .unwrap_or_else(|| DEFAULT_ANALYZER_VERSION.to_string()),
        }),
        None => None,
    };

    let mut metadata = legacy.metadata.unwrap_or_default();
    metadata.insert("migrated_from_schema".to_string(), Value::from(1));

    Ok(StateRecord {
        key,
        fingerprint,
        last_analyzed: parse_timestamp(&legacy.last_analyzed)?,
        result,
        metadata,
    })
}

fn legacy_finding(value: Value) -> Finding {
    match value {
        Value::Object(_) => serde_json::from_value(value.clone()).unwrap_or_else(|_| Finding {
            message: Some(value.to_string()),
            ..Finding::default()
        }),
        Value::String(s) => Finding {
            message: Some(s),
            ..Finding::default()
        },
        other => Finding {
            message: Some(other.to_string()),
            ..Finding::default()
        },
    }
}

/// RFC 3339 (`Z` or offset), or a naive ISO timestamp taken as UTC.
pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, RecordError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(RecordError::Timestamp(s.to_string()))
}

// ============ Store ============

/// Inspection counters returned by [`StateStore::stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateStats {
    /// Live entries across all kinds.
    pub total_entries: usize,
    /// Live entries per kind, keyed by `ArtifactKind::as_str`.
    pub per_kind: BTreeMap<String, usize>,
    /// Entries past their expiry that have not been purged yet.
    pub expired: usize,
}

pub struct StateStore {
    backend: Arc<dyn StateBackend>,
    key_prefix: String,
    default_ttl: Duration,
}

impl StateStore {
    pub fn new(backend: Arc<dyn StateBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            key_prefix: config.key_prefix.clone(),
            default_ttl: config.default_ttl(),
        }
    }

    pub fn key_for(&self, kind: ArtifactKind, key: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, kind.as_str(), key)
    }

    fn legacy_key_for(&self, kind: ArtifactKind, key: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, kind.legacy_segment(), key)
    }

    /// Cached record, or `None` on a miss, an undecodable record, or any
    /// backend failure.
    pub async fn get(&self, kind: ArtifactKind, key: &str) -> Option<StateRecord> {
        let primary = self.key_for(kind, key);
        let legacy = self.legacy_key_for(kind, key);

        for storage_key in [&primary, &legacy] {
            let raw = match self.backend.get(storage_key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %storage_key, error = %e, "Failed to read state");
                    return None;
                }
            };

            return match decode_record(&raw, kind) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(key = %storage_key, error = %e, "Ignoring unreadable state record");
                    None
                }
            };
        }
        None
    }

    /// Write `record` under its kind and key. `ttl` defaults to the
    /// configured TTL. Returns `false` if the write did not happen.
    pub async fn put(&self, record: &StateRecord, ttl: Option<Duration>) -> bool {
        let storage_key = self.key_for(record.kind(), &record.key);
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            warn!(key = %storage_key, "Refusing to cache state with zero TTL");
            return false;
        }

        let encoded = match encode_record(record) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(key = %storage_key, error = %e, "Failed to encode state");
                return false;
            }
        };

        match self.backend.set_ex(&storage_key, &encoded, ttl).await {
            Ok(()) => {
                debug!(key = %storage_key, ttl_secs = ttl.as_secs(), "Cached state");
                // The current key supersedes any v1 record for the same artifact.
                let legacy = self.legacy_key_for(record.kind(), &record.key);
                if let Err(e) = self.backend.delete(&legacy).await {
                    warn!(key = %legacy, error = %e, "Failed to drop superseded legacy state");
                }
                true
            }
            Err(e) => {
                error!(key = %storage_key, error = %e, "Failed to write state");
                false
            }
        }
    }

    /// Remove the record for `(kind, key)`. Returns whether one existed.
    pub async fn invalidate(&self, kind: ArtifactKind, key: &str) -> bool {
        let mut existed = false;
        for storage_key in [self.key_for(kind, key), self.legacy_key_for(kind, key)] {
            match self.backend.delete(&storage_key).await {
                Ok(removed) => existed |= removed,
                Err(e) => {
                    error!(key = %storage_key, error = %e, "Failed to invalidate state");
                }
            }
        }
        debug!(kind = %kind, key, existed, "Invalidated state");
        existed
    }

    pub async fn stats(&self) -> Result<StateStats> {
        let prefix = format!("{}:", self.key_prefix);
        let now = now_ms();

        let mut stats = StateStats::default();
        for kind in ArtifactKind::ALL {
            stats.per_kind.insert(kind.as_str().to_string(), 0);
        }

        for (key, expires_at) in self.backend.entries(&prefix).await? {
            if expires_at <= now {
                stats.expired += 1;
                continue;
            }
            stats.total_entries += 1;

            let segment = key[prefix.len()..].split(':').next().unwrap_or_default();
            if let Some(kind) = ArtifactKind::ALL
                .into_iter()
                .find(|k| k.as_str() == segment || k.legacy_segment() == segment)
            {
                *stats.per_kind.entry(kind.as_str().to_string()).or_default() += 1;
            }
        }
        Ok(stats)
    }

    /// Count entries whose expiry has elapsed but that are still stored.
    /// Purely informational; nothing is removed.
    pub async fn count_expired(&self) -> usize {
        match self.stats().await {
            Ok(stats) => {
                info!(expired = stats.expired, "Counted expired state entries");
                stats.expired
            }
            Err(e) => {
                error!(error = %e, "Failed to count expired state entries");
                0
            }
        }
    }
}
