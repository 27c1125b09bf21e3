//! Execution against the external capability.

#[allow(clippy::module_inception)]
pub mod agent;
pub mod capability;
pub mod confidence;
pub mod pool;

pub use agent::ExecutionAgent;
pub use capability::{CapabilityRequest, CapabilityResponse, ExecutionCapability};
pub use confidence::{ConfidenceEvaluator, ConfidenceScore};
pub use pool::WorkerPool;
