//! Kernel facade.
//!
//! Wires the registry, the authority and snapshot stores, the observer hub,
//! the pattern log and the execution guard, and exposes the public API
//! surface: registration, grant lifecycle, the three execute forms,
//! observer management and the read-only queries.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::authority::{AuthorityGuard, AuthorityStore, Grant, RevocationEvent, RevocationReason};
use crate::capability::{CapabilityContract, CapabilityRegistry};
use crate::clock;
use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::guard::ExecutionGuard;
use crate::negative::ProhibitedBehaviorError;
use crate::observer::{Observer, ObserverHub};
use crate::pattern_log::{PatternLog, PatternQuery, PatternRecord, PatternStatistics, RecordedOutcome};
use crate::capability::{filesystem, network, process, screen};
use crate::snapshot::{Snapshot, SnapshotQuery, SnapshotStatistics, SnapshotStore};
use crate::types::{
    Context, EventType, NonAction, NonActionReason, ObservationEvent, Outcome,
};

/// The assembled kernel. One instance owns all kernel state.
pub struct Kernel {
    registry: Arc<CapabilityRegistry>,
    authority_store: Arc<AuthorityStore>,
    authority_guard: AuthorityGuard,
    snapshots: Arc<SnapshotStore>,
    pattern_log: Arc<PatternLog>,
    hub: Arc<ObserverHub>,
    guard: ExecutionGuard,
}

impl Kernel {
    /// Fully in-memory kernel.
    pub fn new() -> Self {
        Self::assemble(
            AuthorityStore::new(),
            SnapshotStore::new(),
            PatternLog::new(),
        )
    }

    /// Kernel with the append-only stores persisted per `config`.
    pub fn with_config(config: &KernelConfig) -> Result<Self, KernelError> {
        let authority = match &config.storage.authority_db {
            Some(path) => AuthorityStore::open_db(path)?,
            None => AuthorityStore::new(),
        };
        let snapshots = match &config.storage.snapshot_db {
            Some(path) => SnapshotStore::open_db(path)?,
            None => SnapshotStore::new(),
        };
        let pattern_log = match &config.storage.pattern_db {
            Some(path) => PatternLog::open_db(path)?,
            None => PatternLog::new(),
        };
        Ok(Self::assemble(authority, snapshots, pattern_log))
    }

    fn assemble(
        authority: AuthorityStore,
        snapshots: SnapshotStore,
        pattern_log: PatternLog,
    ) -> Self {
        let registry = Arc::new(CapabilityRegistry::new());
        let authority_store = Arc::new(authority);
        let snapshots = Arc::new(snapshots);
        let pattern_log = Arc::new(pattern_log);
        let hub = Arc::new(ObserverHub::new());
        let authority_guard = AuthorityGuard::new(authority_store.clone(), hub.clone());
        let guard = ExecutionGuard::new(
            registry.clone(),
            authority_store.clone(),
            snapshots.clone(),
            pattern_log.clone(),
            hub.clone(),
        );
        Self {
            registry,
            authority_store,
            authority_guard,
            snapshots,
            pattern_log,
            hub,
            guard,
        }
    }

    // ------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------

    /// Register a capability. Startup only.
    pub fn register_capability(&self, contract: CapabilityContract) -> Result<(), KernelError> {
        self.registry.register(contract)
    }

    /// Startup terminator: freeze the registered capability set.
    pub fn lock_registry(&self) {
        self.registry.lock()
    }

    /// Register the strict filesystem family (`fs.read`, `fs.write`,
    /// `fs.delete`) under `config`'s policy. Startup only.
    pub fn register_strict_filesystem(
        &self,
        config: filesystem::FilesystemConfig,
    ) -> Result<(), KernelError> {
        self.registry
            .register(filesystem::read_contract(config.clone())?)?;
        self.registry
            .register(filesystem::write_contract(config.clone())?)?;
        self.registry.register(filesystem::delete_contract(config)?)
    }

    /// Register the strict process capability (`proc.run`). Startup only.
    pub fn register_strict_process(
        &self,
        config: process::ProcessConfig,
    ) -> Result<(), KernelError> {
        self.registry.register(process::run_contract(config)?)
    }

    /// Register the strict network capability (`net.fetch`) with a
    /// caller-supplied transport. Startup only.
    pub fn register_strict_network(
        &self,
        config: network::NetworkConfig,
        transport: impl Fn(&network::NetworkRequest) -> Result<Value, crate::error::CapabilityError>
            + Send
            + Sync
            + 'static,
    ) -> Result<(), KernelError> {
        self.registry
            .register(network::fetch_contract(config, transport)?)
    }

    /// Register the strict screen capability (`screen.capture`) with a
    /// caller-supplied frame grabber. Startup only.
    pub fn register_strict_screen(
        &self,
        config: screen::ScreenConfig,
        grabber: impl Fn(&screen::CaptureRegion) -> Result<Value, crate::error::CapabilityError>
            + Send
            + Sync
            + 'static,
    ) -> Result<(), KernelError> {
        self.registry
            .register(screen::capture_contract(config, grabber)?)
    }

    // ------------------------------------------------------------------
    // Authority lifecycle
    // ------------------------------------------------------------------

    pub fn issue_grant(
        &self,
        principal_id: &str,
        capability_name: &str,
        scope: &str,
        ttl_seconds: f64,
        max_uses: Option<u32>,
    ) -> Result<Grant, KernelError> {
        self.authority_guard
            .issue_grant(principal_id, capability_name, scope, ttl_seconds, max_uses)
    }

    pub fn revoke_grant(
        &self,
        grant_id: &str,
        revoked_by_principal: &str,
        reason: RevocationReason,
    ) -> Result<RevocationEvent, KernelError> {
        self.authority_guard
            .revoke_grant(grant_id, revoked_by_principal, reason)
    }

    /// Autonomous grant widening is structurally impossible.
    pub fn escalate_grant(&self, grant_id: &str) -> Result<Grant, ProhibitedBehaviorError> {
        self.authority_guard.escalate_grant(grant_id)
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    pub fn execute(&self, intent_name: &str, context: &Context) -> Outcome {
        self.guard.execute(intent_name, context)
    }

    pub fn execute_with_authority(
        &self,
        principal_id: &str,
        capability_name: &str,
        context: &Context,
        grant_id: &str,
    ) -> Outcome {
        self.guard
            .execute_with_authority(principal_id, capability_name, context, grant_id)
    }

    pub fn execute_with_snapshot(
        &self,
        principal_id: &str,
        grant_id: &str,
        capability_name: &str,
        context: &Context,
        confidence: f64,
    ) -> Outcome {
        self.guard
            .execute_with_snapshot(principal_id, grant_id, capability_name, context, confidence)
    }

    /// Retrying a terminal refusal is structurally impossible.
    pub fn retry_refusal(&self, refusal: &NonAction) -> Result<Outcome, ProhibitedBehaviorError> {
        self.guard.retry_refusal(refusal)
    }

    /// Reordering the gate sequence is structurally impossible.
    pub fn optimize_execution_paths(&self) -> Result<(), ProhibitedBehaviorError> {
        self.guard.optimize_gate_order()
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub fn register_observer(&self, observer: Arc<dyn Observer>) {
        self.hub.register(observer)
    }

    pub fn clear_observers(&self) {
        self.hub.clear()
    }

    // ------------------------------------------------------------------
    // Read-only queries
    // ------------------------------------------------------------------

    pub fn authority_version(&self) -> u64 {
        self.authority_store.authority_version()
    }

    pub fn list_grants(&self, principal_id: Option<&str>) -> Vec<Grant> {
        self.authority_store.list_grants(principal_id)
    }

    pub fn get_snapshot(&self, snapshot_id: &str) -> Option<Snapshot> {
        self.snapshots.get(snapshot_id)
    }

    pub fn list_snapshots(&self, query: &SnapshotQuery) -> Vec<Snapshot> {
        self.snapshots.query(query)
    }

    pub fn snapshot_statistics(&self) -> SnapshotStatistics {
        self.snapshots.statistics()
    }

    pub fn pattern_records(&self, query: &PatternQuery) -> Vec<PatternRecord> {
        self.pattern_log.records(query)
    }

    pub fn pattern_statistics(&self) -> PatternStatistics {
        self.pattern_log.statistics()
    }

    pub fn verify_pattern_log(&self) -> bool {
        self.pattern_log.verify_integrity()
    }

    // ------------------------------------------------------------------
    // Ingress refusals (client binding layer)
    // ------------------------------------------------------------------

    /// Surface a refusal raised before a Context could be constructed.
    /// Logged and emitted like every other Non-Action.
    pub(crate) fn ingress_refusal(
        &self,
        reason: NonActionReason,
        mut details: BTreeMap<String, Value>,
    ) -> Outcome {
        details.insert(
            "timestamp_utc".to_string(),
            Value::from(clock::now_utc_iso8601()),
        );
        let non_action = NonAction::new(reason, None, details);

        let record = PatternRecord::new(
            EventType::NonAction,
            None,
            None,
            None,
            RecordedOutcome::NonAction {
                reason,
                sub_reason: None,
            },
            non_action.details.clone(),
        );
        if let Err(e) = self.pattern_log.append(record) {
            log::warn!(target: "mek::kernel", "pattern log append failed: {}", e);
        }

        let mut event_details = non_action.details.clone();
        event_details.insert("reason".to_string(), Value::from(reason.as_str()));
        self.hub
            .emit(&ObservationEvent::new(EventType::NonAction, event_details));

        Outcome::NonAction(non_action)
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}
