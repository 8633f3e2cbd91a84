//! The `mount_info` interface
//!
//! A workload charm (the requirer) asks a filesystem client subordinate (the
//! provider) to mount the filesystem the client is integrated with, at a
//! given mountpoint. The provider reports back through a `mounted` flag in
//! its unit scope.

use log::debug;
use serde_derive::{Deserialize, Serialize};

use super::{own_app_bag, own_bag};
use crate::codec;
use crate::diff;
use crate::error::CharmError;
use crate::event::HostEvent;
use crate::model::{Bag, Databag, LeadershipToken, Model, Relation};
use crate::negotiation::{
    ProviderInput, ProviderSignal, ProviderState, RequirerInput, RequirerSignal, RequirerState,
};

const MOUNTPOINT_KEY: &str = "mountpoint";
const MOUNTED_KEY: &str = "mounted";

/// Where and how to mount a filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountInfo {
    /// Location to mount the filesystem on the machine
    pub mountpoint: String,

    /// Block execution of binaries on the filesystem
    #[serde(default)]
    pub noexec: bool,

    /// Do not honor suid and sgid bits on the filesystem
    #[serde(default)]
    pub nosuid: bool,

    /// Block interpretation of character and block devices on the filesystem
    #[serde(default)]
    pub nodev: bool,

    /// Mount the filesystem read-only
    #[serde(default)]
    pub read_only: bool,
}

impl MountInfo {
    pub fn new<S: Into<String>>(mountpoint: S) -> Self {
        Self {
            mountpoint: mountpoint.into(),
            noexec: false,
            nosuid: false,
            nodev: false,
            read_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountRequiresEvent {
    /// The provider is ready to receive mount info
    ProviderConnected(Relation),
    MountedFilesystem(Relation),
    UnmountedFilesystem(Relation),
    ProviderDisconnected(Relation),
}

/// Requirer side of `mount_info`
#[derive(Debug, Clone)]
pub struct MountRequires {
    endpoint: String,
}

impl MountRequires {
    pub fn new<S: Into<String>>(endpoint: S) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    pub fn relations<M: Model + ?Sized>(&self, model: &M) -> Result<Vec<Relation>, CharmError> {
        model.relations(&self.endpoint)
    }

    pub fn handle<M: Model + ?Sized>(
        &self,
        model: &mut M,
        event: &HostEvent,
    ) -> Result<Vec<MountRequiresEvent>, CharmError> {
        let relation = match event.relation_on(&self.endpoint) {
            Some(r) => r.clone(),
            None => return Ok(vec![]),
        };

        let signal = match event {
            // Only the leader reacts to topology changes, since they affect app data
            HostEvent::RelationCreated { .. } if model.leadership()?.is_some() => {
                RequirerState::Disconnected.step(RequirerInput::Created).1
            }
            HostEvent::RelationBroken { .. } if model.leadership()?.is_some() => {
                RequirerState::Connected.step(RequirerInput::Broken).1
            }
            HostEvent::RelationChanged {
                unit: Some(unit), ..
            } => self.provider_changed(model, &relation, unit)?,
            _ => None,
        };

        let event = match signal {
            Some(RequirerSignal::Connected) => MountRequiresEvent::ProviderConnected(relation),
            Some(RequirerSignal::Mounted) => MountRequiresEvent::MountedFilesystem(relation),
            Some(RequirerSignal::Unmounted) => MountRequiresEvent::UnmountedFilesystem(relation),
            Some(RequirerSignal::Disconnected) => {
                MountRequiresEvent::ProviderDisconnected(relation)
            }
            None => return Ok(vec![]),
        };

        debug!("emitting {:?}", event);
        Ok(vec![event])
    }

    fn provider_changed<M: Model + ?Sized>(
        &self,
        model: &mut M,
        relation: &Relation,
        unit: &str,
    ) -> Result<Option<RequirerSignal>, CharmError> {
        let own = own_bag(model);
        let observed = Bag::Unit(unit.to_string());

        let previous = diff::cached(model, relation, &own, &observed)?;
        let state = RequirerState::observe(previous.get(MOUNTED_KEY).map(|m| m == "true"));

        let transaction = diff::diff(model, relation, &own, &observed)?;
        let input = if transaction.deleted.contains(MOUNTED_KEY) {
            RequirerInput::NotReady
        } else if transaction.touched(MOUNTED_KEY) {
            match model.read(relation, &observed)?.get(MOUNTED_KEY) {
                Some(m) if m == "true" => RequirerInput::Ready,
                _ => RequirerInput::NotReady,
            }
        } else {
            return Ok(None);
        };

        Ok(state.step(input).1)
    }

    /// Publishes the requested mount
    ///
    /// Refuses to publish info that conflicts with what another active
    /// relation on this endpoint already carries.
    pub fn set_mount_info<M: Model + ?Sized>(
        &self,
        model: &mut M,
        token: &LeadershipToken,
        relation: &Relation,
        info: &MountInfo,
    ) -> Result<(), CharmError> {
        let data = codec::save(info)?;
        let own_app = own_app_bag(model);

        for other in self.relations(model)? {
            if &other == relation {
                continue;
            }

            let existing = model.read(&other, &own_app)?;
            if let Some(mountpoint) = existing.get(MOUNTPOINT_KEY) {
                if mountpoint != &data[MOUNTPOINT_KEY] {
                    return Err(CharmError::RelationConflict(
                        self.endpoint.clone(),
                        format!(
                            "`{}` already requests mountpoint {}",
                            other, mountpoint
                        ),
                    ));
                }
            }
        }

        debug!("requesting a mounted filesystem with info `{:?}`", info);
        model.update_app(relation, &data, token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountProvidesEvent {
    MountRequested(Relation),
    MountUnrequested(Relation),
}

/// Provider side of `mount_info`
#[derive(Debug, Clone)]
pub struct MountProvides {
    endpoint: String,
}

impl MountProvides {
    pub fn new<S: Into<String>>(endpoint: S) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    pub fn relations<M: Model + ?Sized>(&self, model: &M) -> Result<Vec<Relation>, CharmError> {
        model.relations(&self.endpoint)
    }

    pub fn handle<M: Model + ?Sized>(
        &self,
        model: &mut M,
        event: &HostEvent,
    ) -> Result<Vec<MountProvidesEvent>, CharmError> {
        let (relation, app) = match event {
            HostEvent::RelationChanged { relation, app, .. } if relation.endpoint == self.endpoint => {
                (relation.clone(), app.clone())
            }
            _ => return Ok(vec![]),
        };

        let own = own_bag(model);
        let observed = Bag::App(app);

        let previous = diff::cached(model, &relation, &own, &observed)?;
        let served = model.read(&relation, &own)?.contains_key(MOUNTED_KEY);
        let state = ProviderState::observe(previous.contains_key(MOUNTPOINT_KEY), served);

        let transaction = diff::diff(model, &relation, &own, &observed)?;
        let input = if transaction.added.contains(MOUNTPOINT_KEY) {
            ProviderInput::RequestAdded
        } else if transaction.deleted.contains(MOUNTPOINT_KEY) {
            ProviderInput::RequestWithdrawn
        } else if !transaction.is_empty() {
            // Any other option changing means the mount has to be redone
            ProviderInput::RequestChanged
        } else {
            ProviderInput::Retry
        };

        let event = match state.step(input).1 {
            Some(ProviderSignal::Requested) if self.mount_info(model, &relation)?.is_some() => {
                MountProvidesEvent::MountRequested(relation)
            }
            Some(ProviderSignal::Requested) => return Ok(vec![]),
            Some(ProviderSignal::Unrequested) => MountProvidesEvent::MountUnrequested(relation),
            None => return Ok(vec![]),
        };

        debug!("emitting {:?}", event);
        Ok(vec![event])
    }

    /// The mount requested over `relation`, if the requirer has provided one
    ///
    /// Fails with `RelationBroken` when used for a relation being torn down.
    pub fn mount_info<M: Model + ?Sized>(
        &self,
        model: &M,
        relation: &Relation,
    ) -> Result<Option<MountInfo>, CharmError> {
        let app = match model.remote_app(relation)? {
            Some(app) => app,
            None => return Ok(None),
        };
        let data = model.read(relation, &Bag::App(app))?;

        match data.get(MOUNTPOINT_KEY) {
            Some(m) if !m.is_empty() => Ok(Some(codec::load(&data)?)),
            _ => Ok(None),
        }
    }

    /// Reports the mount status to every requirer
    pub fn set_mount_status<M: Model + ?Sized>(
        &self,
        model: &mut M,
        mounted: bool,
    ) -> Result<(), CharmError> {
        let mut data = Databag::new();
        data.insert(MOUNTED_KEY.to_string(), codec::flag(mounted));

        for relation in self.relations(model)? {
            model.update_unit(&relation, &data)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Agent;
    use crate::testing::Harness;

    fn flag(mounted: &str) -> Databag {
        let mut data = Databag::new();
        data.insert(MOUNTED_KEY.into(), mounted.into());
        data
    }

    fn changed(relation: &Relation, unit: Option<&str>) -> HostEvent {
        HostEvent::RelationChanged {
            relation: relation.clone(),
            app: "fs-client".into(),
            unit: unit.map(String::from),
        }
    }

    #[test]
    fn test_requirer_mount_cycle() {
        let mut harness = Harness::new("workload", "workload/0");
        let relation = harness.add_relation("mount", "fs-client");
        let provider = Bag::Unit("fs-client/0".into());
        let requires = MountRequires::new("mount");
        let event = changed(&relation, Some("fs-client/0"));

        harness.remote_update(&relation, &provider, flag("true"));
        assert_eq!(
            requires.handle(&mut harness, &event).unwrap(),
            vec![MountRequiresEvent::MountedFilesystem(relation.clone())]
        );

        harness.remote_update(&relation, &provider, flag("false"));
        assert_eq!(
            requires.handle(&mut harness, &event).unwrap(),
            vec![MountRequiresEvent::UnmountedFilesystem(relation.clone())]
        );

        // Redelivery without a change is not a new unmount
        assert!(requires.handle(&mut harness, &event).unwrap().is_empty());
    }

    #[test]
    fn test_requirer_connected_leader_only() {
        let mut harness = Harness::new("workload", "workload/1");
        let relation = harness.add_relation("mount", "fs-client");
        let requires = MountRequires::new("mount");
        let created = HostEvent::RelationCreated {
            relation: relation.clone(),
            app: "fs-client".into(),
        };

        assert!(requires.handle(&mut harness, &created).unwrap().is_empty());

        harness.set_leader(true);
        assert_eq!(
            requires.handle(&mut harness, &created).unwrap(),
            vec![MountRequiresEvent::ProviderConnected(relation)]
        );
    }

    #[test]
    fn test_set_mount_info_conflict() {
        let mut harness = Harness::new("workload", "workload/0");
        harness.set_leader(true);
        let first = harness.add_relation("mount", "client-a");
        let second = harness.add_relation("mount", "client-b");
        let requires = MountRequires::new("mount");
        let token = harness.leadership().unwrap().unwrap();

        requires
            .set_mount_info(&mut harness, &token, &first, &MountInfo::new("/data"))
            .unwrap();

        // Same mountpoint on both relations is consistent
        requires
            .set_mount_info(&mut harness, &token, &second, &MountInfo::new("/data"))
            .unwrap();

        match requires.set_mount_info(&mut harness, &token, &second, &MountInfo::new("/other")) {
            Err(CharmError::RelationConflict(..)) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(
            harness.bag(&second, &Bag::App("workload".into()))[MOUNTPOINT_KEY],
            "\"/data\""
        );
    }

    #[test]
    fn test_provider_requested_and_unrequested() {
        let mut harness = Harness::new("fs-client", "fs-client/0");
        let relation = harness.add_relation("mount", "workload");
        let requirer = Bag::App("workload".into());
        let provides = MountProvides::new("mount");
        let event = HostEvent::RelationChanged {
            relation: relation.clone(),
            app: "workload".into(),
            unit: None,
        };

        let info = MountInfo {
            read_only: true,
            ..MountInfo::new("/data")
        };
        harness.remote_update(&relation, &requirer, codec::save(&info).unwrap());

        assert_eq!(
            provides.handle(&mut harness, &event).unwrap(),
            vec![MountProvidesEvent::MountRequested(relation.clone())]
        );
        assert_eq!(provides.mount_info(&harness, &relation).unwrap(), Some(info.clone()));

        provides.set_mount_status(&mut harness, true).unwrap();
        assert_eq!(
            harness.bag(&relation, &Bag::Unit("fs-client/0".into()))[MOUNTED_KEY],
            "true"
        );

        let mut withdrawn = Databag::new();
        for key in codec::save(&info).unwrap().keys() {
            withdrawn.insert(key.clone(), String::new());
        }
        harness.remote_update(&relation, &requirer, withdrawn);

        assert_eq!(
            provides.handle(&mut harness, &event).unwrap(),
            vec![MountProvidesEvent::MountUnrequested(relation.clone())]
        );
        assert_eq!(provides.mount_info(&harness, &relation).unwrap(), None);
    }

    #[test]
    fn test_mount_info_of_broken_relation() {
        let mut harness = Harness::new("fs-client", "fs-client/0");
        let relation = harness.add_relation("mount", "workload");
        harness.break_relation(&relation);

        match MountProvides::new("mount").mount_info(&harness, &relation) {
            Err(CharmError::RelationBroken(_)) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }
}
