//! Decomposition, profile selection, execution dispatch and escalation.

mod decompose;
mod escalation;
mod graph;
mod plan;
#[allow(clippy::module_inception)]
mod router;
mod scoring;

pub use decompose::Decomposer;
pub use escalation::{EscalationContext, EscalationPolicy, StandardEscalationPolicy};
pub use graph::{GraphNode, TaskGraph};
pub use plan::ExecutionPlan;
pub use router::{RouterSettings, TaskRouter};
pub use scoring::{compare_ranked, rank, CompiledProfile, MatchKind, MatchScore, RankedProfile, TaskFeatures};
