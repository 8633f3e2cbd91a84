//! Workload that asks a filesystem client to mount its filesystem

use log::info;
use serde_derive::Deserialize;

use jujufs::charm::{Charm, Handled};
use jujufs::error::CharmError;
use jujufs::event::HostEvent;
use jujufs::interfaces::mount_info::{MountInfo, MountRequires, MountRequiresEvent};
use jujufs::model::{load_config, Model, Status};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MountClientConfig {
    #[serde(default)]
    pub mountpoint: Option<String>,
}

pub struct MountClient {
    mount: MountRequires,
}

impl Default for MountClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MountClient {
    pub fn new() -> Self {
        Self {
            mount: MountRequires::new("mount"),
        }
    }

    /// Sends the configured mountpoint to every provider
    fn request_mount<M: Model>(&self, model: &mut M) -> Result<(), CharmError> {
        let config: MountClientConfig = load_config(model)?;

        let mountpoint = match config.mountpoint.filter(|m| !m.is_empty()) {
            Some(m) => m,
            None => return model.set_status(Status::Blocked("No configured mountpoint".into())),
        };

        if let Some(token) = model.leadership()? {
            let info = MountInfo::new(mountpoint);

            for relation in self.mount.relations(model)? {
                match self.mount.set_mount_info(model, &token, &relation, &info) {
                    Ok(()) => {}
                    Err(CharmError::RelationConflict(_, msg)) => {
                        return model.set_status(Status::Blocked(msg));
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        model.set_status(Status::Active(String::new()))
    }
}

impl<M: Model> Charm<M> for MountClient {
    fn handle(&mut self, model: &mut M, event: &HostEvent) -> Result<Handled, CharmError> {
        if let HostEvent::ConfigChanged = event {
            self.request_mount(model)?;
        }

        for event in self.mount.handle(model, event)? {
            match event {
                MountRequiresEvent::ProviderConnected(relation) => {
                    info!("mount provider connected on `{}`", relation);
                    self.request_mount(model)?;
                }
                MountRequiresEvent::MountedFilesystem(_) => {
                    model.set_status(Status::Active("Mounted filesystem".into()))?;
                }
                MountRequiresEvent::UnmountedFilesystem(_) => {
                    model.set_status(Status::Waiting("Unmounted filesystem".into()))?;
                }
                MountRequiresEvent::ProviderDisconnected(_) => {
                    model.set_status(Status::Blocked("Waiting for mount provider".into()))?;
                }
            }
        }

        Ok(Handled::Done)
    }
}
