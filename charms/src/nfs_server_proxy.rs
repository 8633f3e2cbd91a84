//! Publishes an externally managed NFS export

use serde_derive::Deserialize;

use jujufs::charm::{Charm, Handled};
use jujufs::endpoint::FilesystemInfo;
use jujufs::error::CharmError;
use jujufs::event::HostEvent;
use jujufs::interfaces::filesystem_info::FilesystemProvides;
use jujufs::model::{load_config, Model, Status};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NfsConfig {
    #[serde(default)]
    pub hostname: Option<String>,

    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,
}

impl NfsConfig {
    pub fn to_info(&self) -> Result<FilesystemInfo, Status> {
        let hostname = match &self.hostname {
            Some(h) if !h.is_empty() => h.clone(),
            _ => return Err(Status::Blocked("No configured hostname".into())),
        };

        let path = match &self.path {
            Some(p) if !p.is_empty() => p.clone(),
            _ => return Err(Status::Blocked("No configured path".into())),
        };

        let info = FilesystemInfo::Nfs {
            hostname,
            port: self.port,
            path,
        };

        info.validate()
            .map_err(|err| Status::Blocked(format!("Invalid configuration: {}", err)))?;

        Ok(info)
    }
}

pub struct NfsServerProxy {
    filesystem: FilesystemProvides,
}

impl Default for NfsServerProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl NfsServerProxy {
    pub fn new() -> Self {
        Self {
            filesystem: FilesystemProvides::new("filesystem", "server-peers"),
        }
    }

    fn configure<M: Model>(&self, model: &mut M) -> Result<(), CharmError> {
        let config: NfsConfig = load_config(model)?;

        let info = match config.to_info() {
            Ok(info) => info,
            Err(status) => return model.set_status(status),
        };

        if let Some(token) = model.leadership()? {
            self.filesystem.set_info(model, &token, &info)?;
        }

        model.set_status(Status::Active(String::new()))
    }
}

impl<M: Model> Charm<M> for NfsServerProxy {
    fn handle(&mut self, model: &mut M, event: &HostEvent) -> Result<Handled, CharmError> {
        match event {
            HostEvent::ConfigChanged | HostEvent::LeaderElected | HostEvent::UpgradeCharm => {
                self.configure(model)?
            }
            _ => {}
        }

        self.filesystem.handle(model, event)?;

        Ok(Handled::Done)
    }
}
