//! Subordinate that mounts the filesystem of its provider on every machine
//!
//! The charm is holistic: any event it cares about recomputes the whole
//! desired state from configuration and relation data, instead of reacting
//! to the event itself. The mountpoint comes either from the `mountpoint`
//! config option or from a workload charm over the `mount` relation.

use serde_derive::Deserialize;

use jujufs::charm::{Charm, Handled};
use jujufs::error::CharmError;
use jujufs::event::HostEvent;
use jujufs::interfaces::filesystem_info::{Endpoint, FilesystemRequires};
use jujufs::interfaces::mount_info::{MountInfo, MountProvides};
use jujufs::model::{load_config, Model, Status};
use jujufs::mounts::{MountExecutor, MountOptions, Mounts, MountsManager};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClientConfig {
    #[serde(default)]
    pub mountpoint: Option<String>,

    #[serde(default)]
    pub noexec: bool,

    #[serde(default)]
    pub nosuid: bool,

    #[serde(default)]
    pub nodev: bool,

    #[serde(default)]
    pub read_only: bool,
}

/// Why nothing can be mounted right now
#[derive(Debug)]
struct Stop {
    status: Status,

    /// Whether the application status should reflect it as well
    app: bool,
}

impl Stop {
    fn blocked<S: Into<String>>(msg: S, app: bool) -> Self {
        Self {
            status: Status::Blocked(msg.into()),
            app,
        }
    }
}

pub struct FilesystemClient<E> {
    filesystem: FilesystemRequires,
    mount: MountProvides,
    manager: MountsManager<E>,
}

impl<E: MountExecutor> FilesystemClient<E> {
    pub fn new(executor: E) -> Self {
        Self {
            filesystem: FilesystemRequires::new("filesystem"),
            mount: MountProvides::new("mount"),
            manager: MountsManager::new(executor),
        }
    }

    pub fn manager(&self) -> &MountsManager<E> {
        &self.manager
    }

    /// The endpoint to mount
    fn endpoint<M: Model>(&self, model: &M) -> Result<Result<Endpoint, Stop>, CharmError> {
        let by_type = match self.filesystem.endpoints_by_type(model) {
            Ok(by_type) => by_type,
            Err(CharmError::RelationConflict(_, msg)) => return Ok(Err(Stop::blocked(msg, true))),
            Err(err) => return Err(err),
        };

        // Only a single filesystem is mounted at a time
        match by_type.into_iter().next() {
            Some((_, endpoint)) => Ok(Ok(endpoint)),
            None => Ok(Err(Stop::blocked(
                "Waiting for an integration with a filesystem provider",
                true,
            ))),
        }
    }

    /// Where and how to mount, from either the config or the `mount` relation
    fn mount_info<M: Model>(&self, model: &M) -> Result<Result<MountInfo, Stop>, CharmError> {
        let config: ClientConfig = load_config(model)?;
        let relations = self.mount.relations(model)?;

        let mountpoint = match config.mountpoint.filter(|m| !m.is_empty()) {
            Some(mountpoint) => mountpoint,
            None => {
                return match relations.as_slice() {
                    [] => Ok(Err(Stop::blocked(
                        "Missing `mountpoint` config or `mount` integration",
                        true,
                    ))),
                    [relation] => match self.mount.mount_info(model, relation)? {
                        Some(info) => Ok(Ok(info)),
                        None => Ok(Err(Stop {
                            status: Status::Waiting(
                                "Waiting for mountpoint from `mount` integration".into(),
                            ),
                            app: false,
                        })),
                    },
                    _ => Ok(Err(Stop::blocked(
                        "Cannot mount using more than one relation at the same time",
                        true,
                    ))),
                };
            }
        };

        if !relations.is_empty() {
            return Ok(Err(Stop::blocked(
                "Cannot mount using both the `mountpoint` config and the `mount` integration",
                true,
            )));
        }

        Ok(Ok(MountInfo {
            mountpoint,
            noexec: config.noexec,
            nosuid: config.nosuid,
            nodev: config.nodev,
            read_only: config.read_only,
        }))
    }

    fn converge<M: Model>(&mut self, model: &mut M) -> Result<(), CharmError> {
        model.set_status(Status::Maintenance("Updating status".into()))?;

        if !self.manager.supported() {
            return model.set_status(Status::Blocked(
                "Cannot mount filesystems on LXD containers".into(),
            ));
        }

        if !self.manager.installed()? {
            model.set_status(Status::Maintenance("Installing required packages".into()))?;
            self.manager.install()?;
        }

        let endpoint = match self.endpoint(model)? {
            Ok(endpoint) => endpoint,
            Err(stop) => return self.stop(model, stop),
        };

        if let Some(token) = model.leadership()? {
            let status = Status::Active(format!(
                "Integrated with `{}` provider",
                endpoint.info.filesystem_type()
            ));
            model.set_app_status(status, &token)?;
        }

        let info = match self.mount_info(model)? {
            Ok(info) => info,
            Err(stop) => return self.stop(model, stop),
        };

        model.set_status(Status::Maintenance("Mounting filesystem".into()))?;

        let mut mounts = Mounts::new();
        let options = MountOptions::from(&info);
        if let Err(err) = mounts.add(&endpoint.info, &info.mountpoint, &options) {
            return self.stop(model, Stop::blocked(err.to_string(), false));
        }
        self.manager.reconcile(&mounts, false)?;

        self.mount.set_mount_status(model, true)?;
        model.set_status(Status::Active(format!(
            "Mounted filesystem at `{}`",
            info.mountpoint
        )))
    }

    fn stop<M: Model>(&mut self, model: &mut M, stop: Stop) -> Result<(), CharmError> {
        self.mount.set_mount_status(model, false)?;

        if stop.app {
            if let Some(token) = model.leadership()? {
                model.set_app_status(stop.status.clone(), &token)?;
            }
        }

        model.set_status(stop.status)
    }
}

impl<M: Model, E: MountExecutor> Charm<M> for FilesystemClient<E> {
    fn handle(&mut self, model: &mut M, event: &HostEvent) -> Result<Handled, CharmError> {
        let lifecycle = match event {
            HostEvent::UpgradeCharm | HostEvent::UpdateStatus | HostEvent::ConfigChanged => true,
            _ => false,
        };

        let filesystem_events = self.filesystem.handle(model, event)?;
        let mount_events = self.mount.handle(model, event)?;

        if lifecycle || !filesystem_events.is_empty() || !mount_events.is_empty() {
            self.converge(model)?;
        }

        Ok(Handled::Done)
    }
}
