//! Role-profile execution pipeline.
//!
//! A task enters through [`pipeline::Pipeline::submit`], is decomposed and
//! routed to a [`profile::RoleProfile`], gets an isolated
//! [`injector::ExecutionContext`], runs against an external
//! [`agent::ExecutionCapability`] and comes back as a
//! [`task::TaskOutcome`].
//!
//! ```text
//! Task
//!   ↓
//! TaskRouter::decompose() → Vec<Task> (+ TaskGraph stages)
//!   ↓
//! TaskRouter::select_profile() ← ProfileRepository
//!   ↓
//! ContextInjector::inject() → ExecutionContext
//!   ↓
//! ExecutionAgent::execute() → TaskResult (context wiped)
//!   ↓
//! TaskRouter::handle_escalation() | TaskOutcome::Completed
//! ```

pub mod agent;
pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod injector;
pub mod pipeline;
pub mod profile;
pub mod router;
pub mod task;
