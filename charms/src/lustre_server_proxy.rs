//! Publishes an externally managed Lustre filesystem

use serde_derive::Deserialize;

use jujufs::charm::{Charm, Handled};
use jujufs::endpoint::FilesystemInfo;
use jujufs::error::CharmError;
use jujufs::event::HostEvent;
use jujufs::interfaces::filesystem_info::FilesystemProvides;
use jujufs::model::{load_config, Model, Status};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LustreConfig {
    /// Space separated NIDs of the management servers
    #[serde(default)]
    pub mgs_nids: Option<String>,

    #[serde(default)]
    pub fs_name: Option<String>,
}

impl LustreConfig {
    pub fn to_info(&self) -> Result<FilesystemInfo, Status> {
        let mgs_ids: Vec<String> = self
            .mgs_nids
            .as_ref()
            .map(|n| n.split_whitespace().map(String::from).collect())
            .unwrap_or_default();

        if mgs_ids.is_empty() {
            return Err(Status::Blocked("No configured mgs-nids".into()));
        }

        let fs_name = match &self.fs_name {
            Some(f) if !f.is_empty() => f.clone(),
            _ => return Err(Status::Blocked("No configured fs-name".into())),
        };

        Ok(FilesystemInfo::Lustre { mgs_ids, fs_name })
    }
}

pub struct LustreServerProxy {
    filesystem: FilesystemProvides,
}

impl Default for LustreServerProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl LustreServerProxy {
    pub fn new() -> Self {
        Self {
            filesystem: FilesystemProvides::new("filesystem", "server-peers"),
        }
    }

    fn configure<M: Model>(&self, model: &mut M) -> Result<(), CharmError> {
        let config: LustreConfig = load_config(model)?;

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

impl<M: Model> Charm<M> for LustreServerProxy {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_info() {
        let config: LustreConfig = serde_yaml::from_str(
            "mgs-nids: '192.168.227.11@tcp1  192.168.227.12@tcp1'\nfs-name: lustre",
        )
        .unwrap();

        assert_eq!(
            config.to_info().unwrap(),
            FilesystemInfo::Lustre {
                mgs_ids: vec!["192.168.227.11@tcp1".into(), "192.168.227.12@tcp1".into()],
                fs_name: "lustre".into(),
            }
        );
    }

    #[test]
    fn test_to_info_missing() {
        let cases = vec![
            ("fs-name: lustre", "No configured mgs-nids"),
            ("mgs-nids: '  '\nfs-name: lustre", "No configured mgs-nids"),
            ("mgs-nids: 10.0.0.1@tcp", "No configured fs-name"),
        ];

        for (yaml, expected) in cases {
            println!("Testing {}", yaml);
            let config: LustreConfig = serde_yaml::from_str(yaml).unwrap();

            assert_eq!(
                config.to_info().unwrap_err(),
                Status::Blocked(expected.into())
            );
        }
    }
}
