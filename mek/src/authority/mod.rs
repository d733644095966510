//! Authority store and guard.
//!
//! The store owns `grant_id -> Grant`, the revocation set, the per-principal
//! index and the monotonic `authority_version`. Use-count decrements are a
//! lock-free CAS on the stored entry, so the hot path never takes the store
//! lock. The version counter can be persisted to an INSERT-only SQLite log
//! so snapshots refuse to validate across a restart that lost authority
//! history.

pub mod types;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection};

use crate::clock;
use crate::error::KernelError;
use crate::negative::{block_escalation, ProhibitedBehaviorError};
use crate::observer::ObserverHub;
use crate::types::{EventType, ObservationEvent};

pub use types::{Grant, Principal, RevocationEvent, RevocationReason, MAX_PRINCIPAL_ID_LEN};

/// `rusqlite::Connection` is `Send` but not `Sync`; the `Mutex` makes the
/// store shareable across threads.
struct DbConn(Mutex<Connection>);

const CREATE_VERSION_LOG_SQL: &str = "
CREATE TABLE IF NOT EXISTS authority_version_log (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    version   INTEGER NOT NULL,
    event     TEXT    NOT NULL,
    bumped_at TEXT    NOT NULL
);
";

/// A grant plus its live use counter.
///
/// `remaining_uses` is `None` for unbounded grants. The counter is the only
/// mutable cell in the authority layer and it only ever decreases.
pub struct GrantEntry {
    grant: Grant,
    remaining_uses: Option<AtomicI64>,
}

impl GrantEntry {
    fn new(grant: Grant) -> Self {
        let remaining_uses = grant.max_uses().map(|n| AtomicI64::new(n as i64));
        Self {
            grant,
            remaining_uses,
        }
    }

    pub fn grant(&self) -> &Grant {
        &self.grant
    }

    pub fn remaining_uses(&self) -> Option<i64> {
        self.remaining_uses
            .as_ref()
            .map(|counter| counter.load(Ordering::Acquire))
    }

    pub fn has_remaining_uses(&self) -> bool {
        match self.remaining_uses() {
            Some(remaining) => remaining > 0,
            None => true,
        }
    }

    /// Atomic check-and-decrement. Exactly `max_uses` callers ever see
    /// `true`; the CAS loop guards against underflow.
    pub fn try_consume(&self) -> bool {
        let counter = match &self.remaining_uses {
            Some(counter) => counter,
            None => return true,
        };
        let mut current = counter.load(Ordering::Acquire);
        loop {
            if current <= 0 {
                return false;
            }
            match counter.compare_exchange(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Kernel-owned authority state.
#[derive(Default)]
pub struct AuthorityStore {
    grants: Mutex<HashMap<String, Arc<GrantEntry>>>,
    issuance_order: Mutex<Vec<String>>,
    revocations: Mutex<HashMap<String, RevocationEvent>>,
    principal_index: Mutex<HashMap<String, Vec<String>>>,
    version: AtomicU64,
    conn: Option<DbConn>,
}

impl AuthorityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the INSERT-only version log at `path` and restore the counter
    /// from its highest recorded value.
    pub fn open_db(path: &Path) -> Result<Self, KernelError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| KernelError::Storage(format!("create authority db dir: {}", e)))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| KernelError::Storage(format!("open authority db: {}", e)))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch(CREATE_VERSION_LOG_SQL)
            .map_err(|e| KernelError::Storage(format!("initialise authority schema: {}", e)))?;

        let restored: u64 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM authority_version_log",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|v| v as u64)
            .map_err(|e| KernelError::Storage(format!("restore authority version: {}", e)))?;

        log::info!(
            target: "mek::authority",
            "opened authority version log at {} (version {})",
            path.display(),
            restored
        );

        Ok(Self {
            version: AtomicU64::new(restored),
            conn: Some(DbConn(Mutex::new(conn))),
            ..Self::default()
        })
    }

    pub(crate) fn insert_grant(&self, grant: Grant) -> Result<Arc<GrantEntry>, KernelError> {
        let entry = Arc::new(GrantEntry::new(grant));
        let grant_id = entry.grant().grant_id().to_string();
        let principal_id = entry.grant().principal_id().to_string();

        let mut grants = self.grants.lock().expect("grant map lock poisoned");
        if grants.contains_key(&grant_id) {
            return Err(KernelError::InvariantViolation(format!(
                "grant {} already exists",
                grant_id
            )));
        }
        grants.insert(grant_id.clone(), entry.clone());
        drop(grants);

        self.issuance_order
            .lock()
            .expect("issuance order lock poisoned")
            .push(grant_id.clone());
        self.principal_index
            .lock()
            .expect("principal index lock poisoned")
            .entry(principal_id)
            .or_default()
            .push(grant_id);
        Ok(entry)
    }

    pub fn get(&self, grant_id: &str) -> Option<Arc<GrantEntry>> {
        self.grants
            .lock()
            .expect("grant map lock poisoned")
            .get(grant_id)
            .cloned()
    }

    pub fn is_revoked(&self, grant_id: &str) -> bool {
        self.revocations
            .lock()
            .expect("revocation map lock poisoned")
            .contains_key(grant_id)
    }

    pub fn revocation(&self, grant_id: &str) -> Option<RevocationEvent> {
        self.revocations
            .lock()
            .expect("revocation map lock poisoned")
            .get(grant_id)
            .cloned()
    }

    /// Record a revocation. Returns the canonical event and whether this
    /// call was the one that recorded it (repeats get the original event).
    pub(crate) fn record_revocation(&self, event: RevocationEvent) -> (RevocationEvent, bool) {
        let mut revocations = self.revocations.lock().expect("revocation map lock poisoned");
        if let Some(existing) = revocations.get(&event.grant_id) {
            return (existing.clone(), false);
        }
        revocations.insert(event.grant_id.clone(), event.clone());
        (event, true)
    }

    /// Atomic use-decrement for a grant; `false` when exhausted or unknown.
    pub fn try_consume(&self, grant_id: &str) -> bool {
        match self.get(grant_id) {
            Some(entry) => entry.try_consume(),
            None => false,
        }
    }

    pub fn authority_version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Increment the version counter and append to the persisted log.
    pub(crate) fn bump_version(&self, event: &str) -> Result<u64, KernelError> {
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(db) = &self.conn {
            let conn = db.0.lock().expect("authority db lock poisoned");
            conn.execute(
                "INSERT INTO authority_version_log (version, event, bumped_at) VALUES (?1, ?2, ?3)",
                params![version as i64, event, clock::now_utc_iso8601()],
            )
            .map_err(|e| KernelError::Storage(format!("INSERT authority version: {}", e)))?;
        }
        Ok(version)
    }

    /// Grants in issuance order, optionally filtered by principal.
    pub fn list_grants(&self, principal_id: Option<&str>) -> Vec<Grant> {
        let grants = self.grants.lock().expect("grant map lock poisoned");
        let order = self.issuance_order.lock().expect("issuance order lock poisoned");
        order
            .iter()
            .filter_map(|id| grants.get(id))
            .filter(|entry| match principal_id {
                Some(p) => entry.grant().principal_id() == p,
                None => true,
            })
            .map(|entry| entry.grant().clone())
            .collect()
    }
}

/// Grant issuance and revocation. The only component that can mint a Grant.
pub struct AuthorityGuard {
    store: Arc<AuthorityStore>,
    hub: Arc<ObserverHub>,
}

impl AuthorityGuard {
    pub fn new(store: Arc<AuthorityStore>, hub: Arc<ObserverHub>) -> Self {
        Self { store, hub }
    }

    /// Issue a time-bound grant. Bumps `authority_version` and emits
    /// `grant_issued`.
    ///
    /// A zero or negative TTL produces a grant that is born already expired
    /// and refused on first use.
    pub fn issue_grant(
        &self,
        principal_id: &str,
        capability_name: &str,
        scope: &str,
        ttl_seconds: f64,
        max_uses: Option<u32>,
    ) -> Result<Grant, KernelError> {
        let principal = Principal::new(principal_id)?;
        let now = clock::now_monotonic_ns();
        let grant = Grant::new(
            uuid::Uuid::new_v4().to_string(),
            principal.principal_id(),
            capability_name,
            scope,
            now,
            now.saturating_add(clock::ttl_to_ns(ttl_seconds)),
            max_uses,
            true,
        )?;
        let entry = self.store.insert_grant(grant)?;
        self.store.bump_version("grant_issued")?;

        let mut details = std::collections::BTreeMap::new();
        details.insert(
            "grant_id".to_string(),
            serde_json::Value::from(entry.grant().grant_id()),
        );
        details.insert(
            "principal_id".to_string(),
            serde_json::Value::from(entry.grant().principal_id()),
        );
        details.insert(
            "capability_name".to_string(),
            serde_json::Value::from(entry.grant().capability_name()),
        );
        details.insert(
            "scope".to_string(),
            serde_json::Value::from(entry.grant().scope()),
        );
        self.hub
            .emit(&ObservationEvent::new(EventType::GrantIssued, details));

        log::debug!(
            target: "mek::authority",
            "issued grant {} to {} for '{}'",
            entry.grant().grant_id(),
            entry.grant().principal_id(),
            entry.grant().capability_name()
        );
        Ok(entry.grant().clone())
    }

    /// Revoke a grant. Idempotent: repeated revocations return the original
    /// event and bump the version only once. Revocation always wins.
    pub fn revoke_grant(
        &self,
        grant_id: &str,
        revoked_by_principal: &str,
        reason: RevocationReason,
    ) -> Result<RevocationEvent, KernelError> {
        let event = RevocationEvent::new(
            grant_id,
            revoked_by_principal,
            reason,
            clock::now_monotonic_ns(),
        )?;
        let (recorded, newly_recorded) = self.store.record_revocation(event);
        if newly_recorded {
            self.store.bump_version("grant_revoked")?;
            let mut details = std::collections::BTreeMap::new();
            details.insert(
                "grant_id".to_string(),
                serde_json::Value::from(recorded.grant_id.as_str()),
            );
            details.insert(
                "revoked_by_principal".to_string(),
                serde_json::Value::from(recorded.revoked_by_principal.as_str()),
            );
            details.insert(
                "reason".to_string(),
                serde_json::Value::from(recorded.reason.as_str()),
            );
            self.hub
                .emit(&ObservationEvent::new(EventType::GrantRevoked, details));
            log::debug!(
                target: "mek::authority",
                "revoked grant {} ({})",
                recorded.grant_id,
                recorded.reason.as_str()
            );
        }
        Ok(recorded)
    }

    /// Autonomous widening of a grant is structurally impossible.
    pub fn escalate_grant(&self, grant_id: &str) -> Result<Grant, ProhibitedBehaviorError> {
        Err(block_escalation(&format!(
            "escalate_grant({})",
            grant_id
        )))
    }
}
