//! Relation interfaces spoken by the filesystem charms
//!
//! Each interface is split into the side that provides something and the
//! side that requires it. `handle` classifies a host event for that side and
//! returns the semantic events it implies; writes go through methods that
//! take a `LeadershipToken` whenever they touch application scope.

pub mod cephfs_share;
pub mod filesystem_info;
pub mod mount_info;

use crate::model::{Agent, Bag};

/// This unit's own scope
pub(crate) fn own_bag<M: Agent + ?Sized>(model: &M) -> Bag {
    Bag::Unit(model.unit_name().to_string())
}

/// This application's own scope
pub(crate) fn own_app_bag<M: Agent + ?Sized>(model: &M) -> Bag {
    Bag::App(model.app_name().to_string())
}
