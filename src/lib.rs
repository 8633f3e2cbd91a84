//! Relation negotiation and mount reconciliation for filesystem charms
//!
//! Filesystem providers publish how to reach a filesystem over a relation,
//! clients react to what changed in the relation's scopes and converge the
//! machine's mounts to what their providers currently publish.

pub mod charm;
pub mod cmd;
pub mod codec;
pub mod diff;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod hook_tools;
pub mod interfaces;
pub mod model;
pub mod mounts;
pub mod negotiation;
pub mod paths;
pub mod secret;
pub mod testing;
