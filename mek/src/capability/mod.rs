//! Capability system: contracts, the locked registry, and the strict
//! built-in capability families with their refusal taxonomies.

pub mod contract;
pub mod filesystem;
pub mod network;
pub mod process;
pub mod registry;
pub mod screen;

pub use contract::CapabilityContract;
pub use registry::CapabilityRegistry;
