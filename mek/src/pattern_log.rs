//! Pattern / Non-Action log.
//!
//! Append-only record of every refusal and every execution. Each record is
//! chained to its predecessor with a SHA-256 hash so tampering with history
//! is detectable. The log is observability only: it is read, counted and
//! verified, never fed back into thresholds — that feedback path is a
//! prohibited behavior and trapped below.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock;
use crate::error::KernelError;
use crate::negative::{block_learning, ProhibitedBehaviorError};
use crate::snapshot::canonical;
use crate::types::{EventType, GuardRefusalReason, NonActionReason};

struct DbConn(Mutex<Connection>);

const CREATE_PATTERN_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS pattern_log (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id       TEXT    NOT NULL,
    event_type      TEXT    NOT NULL,
    capability_name TEXT,
    context_id      TEXT,
    recorded_at_utc TEXT    NOT NULL,
    data            TEXT    NOT NULL,
    chain_hash      TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pattern_capability ON pattern_log(capability_name);
CREATE INDEX IF NOT EXISTS idx_pattern_context    ON pattern_log(context_id);
";

/// What a record documents: a success or a structured refusal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordedOutcome {
    Success,
    NonAction {
        reason: NonActionReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        sub_reason: Option<GuardRefusalReason>,
    },
}

/// A single fact about what the kernel did or refused to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub record_id: String,
    /// Monotonic ns.
    pub recorded_at: u64,
    pub recorded_at_utc: String,
    pub event_type: EventType,
    pub capability_name: Option<String>,
    pub context_id: Option<String>,
    pub principal_id: Option<String>,
    pub outcome: RecordedOutcome,
    pub details: BTreeMap<String, Value>,
}

impl PatternRecord {
    pub fn new(
        event_type: EventType,
        capability_name: Option<String>,
        context_id: Option<String>,
        principal_id: Option<String>,
        outcome: RecordedOutcome,
        details: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            record_id: uuid::Uuid::new_v4().to_string(),
            recorded_at: clock::now_monotonic_ns(),
            recorded_at_utc: clock::now_utc_iso8601(),
            event_type,
            capability_name,
            context_id,
            principal_id,
            outcome,
            details,
        }
    }
}

/// Filter for read-only log queries.
#[derive(Debug, Default, Clone)]
pub struct PatternQuery {
    pub capability_name: Option<String>,
    pub context_id: Option<String>,
    pub reason: Option<NonActionReason>,
    pub limit: Option<usize>,
}

impl PatternQuery {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Aggregate counts over the log. Counting only; nothing here adapts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatternStatistics {
    pub total: u64,
    pub successes: u64,
    pub non_actions: u64,
    pub by_reason: BTreeMap<String, u64>,
    pub by_capability: BTreeMap<String, u64>,
}

#[derive(Default)]
struct LogInner {
    records: Vec<PatternRecord>,
    chain: Vec<String>,
}

/// Append-only, hash-chained observability log.
#[derive(Default)]
pub struct PatternLog {
    inner: Mutex<LogInner>,
    conn: Option<DbConn>,
}

impl PatternLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or create) the SQLite-backed log at `path`, rehydrating the
    /// persisted records and their chain in insertion order.
    pub fn open_db(path: &Path) -> Result<Self, KernelError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| KernelError::Storage(format!("create pattern db dir: {}", e)))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| KernelError::Storage(format!("open pattern db: {}", e)))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch(CREATE_PATTERN_SCHEMA_SQL)
            .map_err(|e| KernelError::Storage(format!("initialise pattern schema: {}", e)))?;

        let mut inner = LogInner::default();
        {
            let mut stmt = conn
                .prepare("SELECT data, chain_hash FROM pattern_log ORDER BY id ASC")
                .map_err(|e| KernelError::Storage(format!("prepare pattern SELECT: {}", e)))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .and_then(|mapped| mapped.collect::<Result<Vec<_>, _>>())
                .map_err(|e| KernelError::Storage(format!("load pattern rows: {}", e)))?;
            for (data, chain_hash) in rows {
                let record: PatternRecord = serde_json::from_str(&data)
                    .map_err(|e| KernelError::Storage(format!("deserialize record: {}", e)))?;
                inner.records.push(record);
                inner.chain.push(chain_hash);
            }
        }

        log::info!(
            target: "mek::pattern",
            "opened pattern log at {} ({} records)",
            path.display(),
            inner.records.len()
        );

        Ok(Self {
            inner: Mutex::new(inner),
            conn: Some(DbConn(Mutex::new(conn))),
        })
    }

    fn record_hash(record: &PatternRecord) -> Result<String, KernelError> {
        let value = serde_json::to_value(record)
            .map_err(|e| KernelError::Storage(format!("serialize record: {}", e)))?;
        Ok(canonical::hash_value(&value))
    }

    fn chain_hash(prev: Option<&String>, record_hash: &str) -> String {
        match prev {
            Some(prev) => canonical::hash_str(&format!("{}{}", prev, record_hash)),
            None => canonical::hash_str(record_hash),
        }
    }

    /// Append a record. There is no update and no delete.
    pub fn append(&self, record: PatternRecord) -> Result<(), KernelError> {
        let record_hash = Self::record_hash(&record)?;

        let mut inner = self.inner.lock().expect("pattern log lock poisoned");
        let chain_hash = Self::chain_hash(inner.chain.last(), &record_hash);

        if let Some(db) = &self.conn {
            let data = serde_json::to_string(&record)
                .map_err(|e| KernelError::Storage(format!("serialize record: {}", e)))?;
            let conn = db.0.lock().expect("pattern db lock poisoned");
            conn.execute(
                "INSERT INTO pattern_log \
                 (record_id, event_type, capability_name, context_id, recorded_at_utc, data, chain_hash) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.record_id,
                    record.event_type.as_str(),
                    record.capability_name.as_deref(),
                    record.context_id.as_deref(),
                    record.recorded_at_utc,
                    data,
                    chain_hash,
                ],
            )
            .map_err(|e| KernelError::Storage(format!("INSERT pattern record: {}", e)))?;
        }

        inner.records.push(record);
        inner.chain.push(chain_hash);
        Ok(())
    }

    /// Read-only listing with optional filters; `limit` keeps the most
    /// recent matches.
    pub fn records(&self, query: &PatternQuery) -> Vec<PatternRecord> {
        let inner = self.inner.lock().expect("pattern log lock poisoned");
        let mut matches: Vec<PatternRecord> = inner
            .records
            .iter()
            .filter(|r| match &query.capability_name {
                Some(c) => r.capability_name.as_deref() == Some(c.as_str()),
                None => true,
            })
            .filter(|r| match &query.context_id {
                Some(c) => r.context_id.as_deref() == Some(c.as_str()),
                None => true,
            })
            .filter(|r| match query.reason {
                Some(reason) => {
                    matches!(&r.outcome, RecordedOutcome::NonAction { reason: got, .. } if *got == reason)
                }
                None => true,
            })
            .cloned()
            .collect();
        if let Some(limit) = query.limit {
            let start = matches.len().saturating_sub(limit);
            matches = matches.split_off(start);
        }
        matches
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("pattern log lock poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate counts by outcome, reason and capability.
    pub fn statistics(&self) -> PatternStatistics {
        let inner = self.inner.lock().expect("pattern log lock poisoned");
        let mut stats = PatternStatistics::default();
        let mut by_reason: HashMap<&'static str, u64> = HashMap::new();
        for record in &inner.records {
            stats.total += 1;
            match &record.outcome {
                RecordedOutcome::Success => stats.successes += 1,
                RecordedOutcome::NonAction { reason, .. } => {
                    stats.non_actions += 1;
                    *by_reason.entry(reason.as_str()).or_default() += 1;
                }
            }
            if let Some(capability) = &record.capability_name {
                *stats.by_capability.entry(capability.clone()).or_default() += 1;
            }
        }
        stats.by_reason = by_reason
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        stats
    }

    /// Recompute the chain over the in-memory records.
    pub fn verify_integrity(&self) -> bool {
        let inner = self.inner.lock().expect("pattern log lock poisoned");
        let mut prev: Option<&String> = None;
        for (i, record) in inner.records.iter().enumerate() {
            let record_hash = match Self::record_hash(record) {
                Ok(h) => h,
                Err(_) => return false,
            };
            if inner.chain[i] != Self::chain_hash(prev, &record_hash) {
                return false;
            }
            prev = Some(&inner.chain[i]);
        }
        true
    }

    /// Deriving behavior from recorded patterns is structurally impossible.
    pub fn learn_from_patterns(&self) -> Result<(), ProhibitedBehaviorError> {
        Err(block_learning("pattern log feedback into kernel behavior"))
    }
}
