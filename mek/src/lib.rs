// MEK Library
// Minimal Execution Kernel - policy-enforcing execution gateway

// Core primitives and errors
pub mod clock;
pub mod error;
pub mod negative;
pub mod types;

// Capability system
pub mod capability;

// Authority and snapshot layers
pub mod authority;
pub mod snapshot;

// Observation
pub mod observer;
pub mod pattern_log;

// The guard and its friction gate
pub mod friction;
pub mod guard;

// Assembly and ingress
pub mod binding;
pub mod config;
pub mod kernel;

pub use authority::{Grant, Principal, RevocationEvent, RevocationReason};
pub use binding::{ClientBinding, ExternalRequest};
pub use capability::{CapabilityContract, CapabilityRegistry};
pub use config::KernelConfig;
pub use error::{CapabilityError, KernelError, ValidationError};
pub use kernel::Kernel;
pub use negative::{ProhibitedBehaviorError, ProhibitedClass};
pub use observer::{BufferObserver, LogObserver, Observer};
pub use pattern_log::{PatternQuery, PatternRecord, PatternStatistics};
pub use snapshot::{Snapshot, SnapshotQuery, SnapshotStatistics};
pub use types::{
    ConsequenceLevel, Context, EventType, GuardRefusalReason, Intent, NonAction, NonActionReason,
    ObservationEvent, Outcome,
};
