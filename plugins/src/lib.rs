//! Concrete collaborators for `mare-core`: profile stores, execution
//! capabilities and the REP definition importer.

pub mod capability;
pub mod factory;
pub mod rep;
pub mod store;
