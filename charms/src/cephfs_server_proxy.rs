//! Publishes an externally managed CephFS share
//!
//! Besides the `filesystem` endpoint, the proxy answers share requests on the
//! older `cephfs-share` endpoint. A request that arrives before the proxy is
//! configured is deferred and served once the configuration is valid.

use log::{error, info};
use serde_derive::Deserialize;

use jujufs::charm::{Charm, Handled};
use jujufs::endpoint::{parse_host, FilesystemInfo};
use jujufs::error::CharmError;
use jujufs::event::HostEvent;
use jujufs::interfaces::cephfs_share::{
    CephfsAuthInfo, CephfsShareInfo, ShareProvides, ShareProvidesEvent,
};
use jujufs::interfaces::filesystem_info::FilesystemProvides;
use jujufs::model::{load_config, Model, Status};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CephfsConfig {
    #[serde(default)]
    pub fsid: Option<String>,

    /// `<filesystem name>:<exported path>`
    #[serde(default)]
    pub sharepoint: Option<String>,

    /// Space separated `<host>:<port>` addresses of the MONs
    #[serde(default)]
    pub monitor_hosts: Option<String>,

    /// `<username>:<cephx key>`
    #[serde(default)]
    pub auth_info: Option<String>,
}

/// Splits `left:right`, where neither side may be empty
fn split_pair(value: &str) -> Option<(String, String)> {
    let mut parts = value.splitn(2, ':');

    match (parts.next(), parts.next()) {
        (Some(left), Some(right)) if !left.is_empty() && !right.is_empty() => {
            Some((left.to_string(), right.to_string()))
        }
        _ => None,
    }
}

fn blocked(msg: String) -> Status {
    error!("{}", msg);
    Status::Blocked(msg)
}

impl CephfsConfig {
    pub fn to_share(&self) -> Result<(CephfsShareInfo, CephfsAuthInfo), Status> {
        let set = |v: &Option<String>| v.as_ref().filter(|v| !v.trim().is_empty()).cloned();

        let (fsid, sharepoint, monitor_hosts, auth_info) = match (
            set(&self.fsid),
            set(&self.sharepoint),
            set(&self.monitor_hosts),
            set(&self.auth_info),
        ) {
            (Some(f), Some(s), Some(m), Some(a)) => (f, s, m, a),
            (f, s, m, a) => {
                let missing: Vec<String> = vec![
                    ("fsid", f.is_none()),
                    ("sharepoint", s.is_none()),
                    ("monitor-hosts", m.is_none()),
                    ("auth-info", a.is_none()),
                ]
                .into_iter()
                .filter(|(_, missing)| *missing)
                .map(|(k, _)| format!("`{}`", k))
                .collect();

                return Err(blocked(format!(
                    "Missing required configuration for {}",
                    missing.join(", ")
                )));
            }
        };

        let (name, path) = split_pair(&sharepoint)
            .ok_or_else(|| blocked(format!("Invalid sharepoint `{}`", sharepoint)))?;

        let (username, key) = split_pair(&auth_info)
            .ok_or_else(|| blocked(format!("Invalid auth-info `{}`", auth_info)))?;

        let monitor_hosts: Vec<String> = monitor_hosts.split_whitespace().map(String::from).collect();
        if let Some(host) = monitor_hosts.iter().find(|h| parse_host(h).is_err()) {
            return Err(blocked(format!("Invalid monitor host `{}`", host)));
        }

        let share = CephfsShareInfo {
            fsid,
            name,
            path,
            monitor_hosts,
        };

        Ok((share, CephfsAuthInfo { username, key }))
    }
}

fn to_info(share: &CephfsShareInfo, auth: &CephfsAuthInfo) -> FilesystemInfo {
    FilesystemInfo::Cephfs {
        fsid: share.fsid.clone(),
        name: share.name.clone(),
        path: share.path.clone(),
        monitor_hosts: share.monitor_hosts.clone(),
        user: auth.username.clone(),
        key: auth.key.clone(),
    }
}

pub struct CephfsServerProxy {
    filesystem: FilesystemProvides,
    share: ShareProvides,
}

impl Default for CephfsServerProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl CephfsServerProxy {
    pub fn new() -> Self {
        Self {
            filesystem: FilesystemProvides::new("filesystem", "server-peers"),
            share: ShareProvides::new("cephfs-share"),
        }
    }

    fn configure<M: Model>(&self, model: &mut M) -> Result<(), CharmError> {
        let config: CephfsConfig = load_config(model)?;

        let (share, auth) = match config.to_share() {
            Ok(parts) => parts,
            Err(status) => return model.set_status(status),
        };

        if let Some(token) = model.leadership()? {
            self.filesystem
                .set_info(model, &token, &to_info(&share, &auth))?;
        }

        model.set_status(Status::Active(String::new()))
    }

    fn serve_share<M: Model>(
        &self,
        model: &mut M,
        event: ShareProvidesEvent,
    ) -> Result<Handled, CharmError> {
        let ShareProvidesEvent::ShareRequested { relation, name } = event;
        let config: CephfsConfig = load_config(model)?;

        let (share, auth) = match config.to_share() {
            Ok(parts) => parts,
            Err(_) => {
                model.set_status(Status::Blocked("No configured filesystem info".into()))?;
                return Ok(Handled::Defer);
            }
        };

        // Requests are only ever seen by the leader
        if let Some(token) = model.leadership()? {
            info!("serving share `{}` requested as `{}` on `{}`", share.name, name, relation);
            self.share.set_share(model, &token, &relation, &share, &auth)?;
        }

        Ok(Handled::Done)
    }
}

impl<M: Model> Charm<M> for CephfsServerProxy {
    fn handle(&mut self, model: &mut M, event: &HostEvent) -> Result<Handled, CharmError> {
        match event {
            HostEvent::ConfigChanged | HostEvent::LeaderElected | HostEvent::UpgradeCharm => {
                self.configure(model)?
            }
            // Drops any status left behind by a request on the departed relation
            HostEvent::RelationBroken { relation, .. } if relation.endpoint == "cephfs-share" => {
                self.configure(model)?
            }
            _ => {}
        }

        self.filesystem.handle(model, event)?;

        let mut handled = Handled::Done;
        for share_event in self.share.handle(model, event)? {
            if self.serve_share(model, share_event)? == Handled::Defer {
                handled = Handled::Defer;
            }
        }

        Ok(handled)
    }
}
