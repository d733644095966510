//! Append-only snapshot store.
//!
//! In-memory vector plus optional SQLite persistence. The persisted table
//! is INSERT-only: the shipping code contains no UPDATE and no DELETE, and
//! the store exposes no mutating query. Rows are rehydrated at open so the
//! audit trail survives restarts.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::KernelError;
use crate::snapshot::types::Snapshot;

struct DbConn(Mutex<Connection>);

const CREATE_SNAPSHOT_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS snapshot_log (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_id     TEXT    NOT NULL,
    principal_id    TEXT    NOT NULL,
    grant_id        TEXT    NOT NULL,
    capability_name TEXT    NOT NULL,
    captured_at_utc TEXT    NOT NULL,
    data            TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_snapshot_id  ON snapshot_log(snapshot_id);
CREATE INDEX IF NOT EXISTS idx_principal    ON snapshot_log(principal_id);
CREATE INDEX IF NOT EXISTS idx_capability   ON snapshot_log(capability_name);
";

/// Filter for read-only snapshot listing.
#[derive(Debug, Default, Clone)]
pub struct SnapshotQuery {
    pub principal_id: Option<String>,
    pub capability_name: Option<String>,
    /// Monotonic ns bounds on `captured_at`, inclusive.
    pub time_range: Option<(u64, u64)>,
    pub limit: Option<usize>,
}

impl SnapshotQuery {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Aggregate counts over the store. Visibility into execution reality;
/// counting only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SnapshotStatistics {
    pub total: u64,
    pub by_principal: std::collections::BTreeMap<String, u64>,
    pub by_capability: std::collections::BTreeMap<String, u64>,
    pub by_confidence_range: std::collections::BTreeMap<String, u64>,
}

#[derive(Default)]
struct StoreInner {
    snapshots: Vec<Snapshot>,
    by_id: HashMap<String, usize>,
}

/// Append-only mapping `snapshot_id -> Snapshot`.
#[derive(Default)]
pub struct SnapshotStore {
    inner: Mutex<StoreInner>,
    conn: Option<DbConn>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or create) the SQLite-backed store at `path` and load the
    /// persisted rows into the in-memory working set, in insertion order.
    pub fn open_db(path: &Path) -> Result<Self, KernelError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| KernelError::Storage(format!("create snapshot db dir: {}", e)))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| KernelError::Storage(format!("open snapshot db: {}", e)))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch(CREATE_SNAPSHOT_SCHEMA_SQL)
            .map_err(|e| KernelError::Storage(format!("initialise snapshot schema: {}", e)))?;

        let mut inner = StoreInner::default();
        {
            let mut stmt = conn
                .prepare("SELECT data FROM snapshot_log ORDER BY id ASC")
                .map_err(|e| KernelError::Storage(format!("prepare snapshot SELECT: {}", e)))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .and_then(|mapped| mapped.collect::<Result<Vec<_>, _>>())
                .map_err(|e| KernelError::Storage(format!("load snapshot rows: {}", e)))?;
            for data in rows {
                let snapshot: Snapshot = serde_json::from_str(&data)
                    .map_err(|e| KernelError::Storage(format!("deserialize snapshot: {}", e)))?;
                let idx = inner.snapshots.len();
                inner.by_id.insert(snapshot.snapshot_id.clone(), idx);
                inner.snapshots.push(snapshot);
            }
        }

        log::info!(
            target: "mek::snapshot",
            "opened snapshot log at {} ({} snapshots)",
            path.display(),
            inner.snapshots.len()
        );

        Ok(Self {
            inner: Mutex::new(inner),
            conn: Some(DbConn(Mutex::new(conn))),
        })
    }

    /// Append a snapshot. There is no update and no delete.
    pub fn append(&self, snapshot: Snapshot) -> Result<(), KernelError> {
        if let Some(db) = &self.conn {
            let data = serde_json::to_string(&snapshot)
                .map_err(|e| KernelError::Storage(format!("serialize snapshot: {}", e)))?;
            let conn = db.0.lock().expect("snapshot db lock poisoned");
            conn.execute(
                "INSERT INTO snapshot_log \
                 (snapshot_id, principal_id, grant_id, capability_name, captured_at_utc, data) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    snapshot.snapshot_id,
                    snapshot.principal_id,
                    snapshot.grant_id,
                    snapshot.capability_name,
                    snapshot.captured_at_utc,
                    data,
                ],
            )
            .map_err(|e| KernelError::Storage(format!("INSERT snapshot: {}", e)))?;
        }

        let mut inner = self.inner.lock().expect("snapshot store lock poisoned");
        if inner.by_id.contains_key(&snapshot.snapshot_id) {
            return Err(KernelError::InvariantViolation(format!(
                "snapshot {} already stored",
                snapshot.snapshot_id
            )));
        }
        let idx = inner.snapshots.len();
        inner.by_id.insert(snapshot.snapshot_id.clone(), idx);
        inner.snapshots.push(snapshot);
        Ok(())
    }

    pub fn get(&self, snapshot_id: &str) -> Option<Snapshot> {
        let inner = self.inner.lock().expect("snapshot store lock poisoned");
        inner
            .by_id
            .get(snapshot_id)
            .map(|&idx| inner.snapshots[idx].clone())
    }

    /// Read-only listing with optional principal/capability/time filters.
    /// `limit` keeps the most recent matches.
    pub fn query(&self, query: &SnapshotQuery) -> Vec<Snapshot> {
        let inner = self.inner.lock().expect("snapshot store lock poisoned");
        let mut matches: Vec<Snapshot> = inner
            .snapshots
            .iter()
            .filter(|s| match &query.principal_id {
                Some(p) => &s.principal_id == p,
                None => true,
            })
            .filter(|s| match &query.capability_name {
                Some(c) => &s.capability_name == c,
                None => true,
            })
            .filter(|s| match query.time_range {
                Some((start, end)) => s.captured_at >= start && s.captured_at <= end,
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
        self.inner
            .lock()
            .expect("snapshot store lock poisoned")
            .snapshots
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn statistics(&self) -> SnapshotStatistics {
        let inner = self.inner.lock().expect("snapshot store lock poisoned");
        let mut stats = SnapshotStatistics::default();
        for snapshot in &inner.snapshots {
            stats.total += 1;
            *stats
                .by_principal
                .entry(snapshot.principal_id.clone())
                .or_default() += 1;
            *stats
                .by_capability
                .entry(snapshot.capability_name.clone())
                .or_default() += 1;
            *stats
                .by_confidence_range
                .entry(snapshot.confidence_range.clone())
                .or_default() += 1;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::snapshot::types::Snapshot;

    fn snapshot(principal: &str, capability: &str) -> Snapshot {
        Snapshot::capture(
            principal,
            "g1",
            capability,
            "scope".to_string(),
            BTreeMap::new(),
            capability,
            capability,
            0.9,
            1,
            1_000,
            None,
        )
    }

    #[test]
    fn append_then_get() {
        let store = SnapshotStore::new();
        let s = snapshot("p1", "greet");
        let id = s.snapshot_id.clone();
        store.append(s).unwrap();
        assert_eq!(store.get(&id).unwrap().snapshot_id, id);
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn duplicate_snapshot_id_is_refused() {
        let store = SnapshotStore::new();
        let s = snapshot("p1", "greet");
        store.append(s.clone()).unwrap();
        assert!(store.append(s).is_err());
    }

    #[test]
    fn query_filters_by_principal_and_capability() {
        let store = SnapshotStore::new();
        store.append(snapshot("p1", "greet")).unwrap();
        store.append(snapshot("p1", "fs.read")).unwrap();
        store.append(snapshot("p2", "greet")).unwrap();

        let q = SnapshotQuery {
            principal_id: Some("p1".to_string()),
            ..SnapshotQuery::new()
        };
        assert_eq!(store.query(&q).len(), 2);

        let q = SnapshotQuery {
            capability_name: Some("greet".to_string()),
            limit: Some(1),
            ..SnapshotQuery::new()
        };
        let hits = store.query(&q);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].principal_id, "p2");
    }
}
