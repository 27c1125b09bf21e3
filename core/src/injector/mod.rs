//! Context injection: turns a profile lineage into an isolated, single-use
//! execution context and tears it down afterwards.

pub mod context;
#[allow(clippy::module_inception)]
pub mod injector;
pub mod permissions;

pub use context::{ContextPayload, ExecutionContext, RawContext};
pub use injector::ContextInjector;
pub use permissions::PermissionSet;
