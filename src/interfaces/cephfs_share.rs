//! The `cephfs_share` interface
//!
//! The client asks for a share by `name` in its application scope. The
//! server answers with `share_info`, a JSON object describing the share, and
//! `auth`, a secret pointer to the CephX credentials.

use log::{debug, warn};
use serde_derive::{Deserialize, Serialize};

use super::{own_app_bag, own_bag};
use crate::diff;
use crate::error::CharmError;
use crate::event::HostEvent;
use crate::model::{Bag, Databag, LeadershipToken, Model, Relation};
use crate::negotiation::{
    ProviderInput, ProviderSignal, ProviderState, RequirerInput, RequirerSignal, RequirerState,
};
use crate::secret::SecretRef;

const NAME_KEY: &str = "name";
const SHARE_INFO_KEY: &str = "share_info";
const AUTH_KEY: &str = "auth";

/// Information about a shared CephFS filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CephfsShareInfo {
    /// ID of the Ceph cluster
    pub fsid: String,

    /// Name of the exported filesystem
    pub name: String,

    /// Exported path within the filesystem
    pub path: String,

    /// Addresses of the available MON nodes
    pub monitor_hosts: Vec<String>,
}

/// CephX credentials for a share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CephfsAuthInfo {
    pub username: String,
    pub key: String,
}

impl CephfsAuthInfo {
    fn to_databag(&self) -> Databag {
        let mut content = Databag::new();
        content.insert("username".into(), self.username.clone());
        content.insert("key".into(), self.key.clone());
        content
    }

    fn from_databag(content: &Databag) -> Option<Self> {
        Some(Self {
            username: content.get("username")?.clone(),
            key: content.get("key")?.clone(),
        })
    }
}

fn secret_label(relation: &Relation) -> String {
    format!("auth-info-{}", relation.id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareProvidesEvent {
    ShareRequested { relation: Relation, name: String },
}

/// Server side of `cephfs_share`
#[derive(Debug, Clone)]
pub struct ShareProvides {
    endpoint: String,
}

impl ShareProvides {
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
    ) -> Result<Vec<ShareProvidesEvent>, CharmError> {
        let relation = match event.relation_on(&self.endpoint) {
            Some(r) => r.clone(),
            None => return Ok(vec![]),
        };

        if model.leadership()?.is_none() {
            return Ok(vec![]);
        }

        let app = match event {
            HostEvent::RelationChanged { app, .. } => app.clone(),
            HostEvent::RelationBroken { .. } => {
                if let Some(id) = model.lookup_secret(&secret_label(&relation))? {
                    debug!("revoking `{}` from `{}`", id, relation);
                    model.revoke_secret(&id, &relation)?;
                }
                return Ok(vec![]);
            }
            _ => return Ok(vec![]),
        };

        let own = own_bag(model);
        let observed = Bag::App(app);

        let previous = diff::cached(model, &relation, &own, &observed)?;
        let served = model
            .read(&relation, &own_app_bag(model))?
            .contains_key(SHARE_INFO_KEY);
        let state = ProviderState::observe(previous.contains_key(NAME_KEY), served);

        let transaction = diff::diff(model, &relation, &own, &observed)?;
        let input = if transaction.added.contains(NAME_KEY) {
            ProviderInput::RequestAdded
        } else if transaction.changed.contains(NAME_KEY) {
            ProviderInput::RequestChanged
        } else if transaction.deleted.contains(NAME_KEY) {
            ProviderInput::RequestWithdrawn
        } else if transaction.is_empty() {
            ProviderInput::Retry
        } else {
            return Ok(vec![]);
        };

        match state.step(input).1 {
            Some(ProviderSignal::Requested) => {
                let name = model
                    .read(&relation, &observed)?
                    .remove(NAME_KEY)
                    .unwrap_or_default();
                let event = ShareProvidesEvent::ShareRequested { relation, name };

                debug!("emitting {:?}", event);
                Ok(vec![event])
            }
            _ => Ok(vec![]),
        }
    }

    /// Answers the request on `relation`
    pub fn set_share<M: Model + ?Sized>(
        &self,
        model: &mut M,
        token: &LeadershipToken,
        relation: &Relation,
        share_info: &CephfsShareInfo,
        auth_info: &CephfsAuthInfo,
    ) -> Result<(), CharmError> {
        let pointer = SecretRef::seal(
            &mut *model,
            &auth_info.to_databag(),
            &secret_label(relation),
            "Auth info to authenticate against the CephFS share",
        )?;

        if let SecretRef::Secret(id) = &pointer {
            model.grant_secret(id, relation)?;
        }

        let mut data = Databag::new();
        data.insert(
            SHARE_INFO_KEY.to_string(),
            serde_json::to_string(share_info)?,
        );
        data.insert(AUTH_KEY.to_string(), pointer.to_string());

        debug!("exporting CephFS share with info {:?}", share_info);
        model.update_app(relation, &data, token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareRequiresEvent {
    ServerConnected(Relation),
    MountShare(Relation),
    UmountShare(Relation),
}

/// Client side of `cephfs_share`
#[derive(Debug, Clone)]
pub struct ShareRequires {
    endpoint: String,
}

impl ShareRequires {
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
    ) -> Result<Vec<ShareRequiresEvent>, CharmError> {
        let relation = match event.relation_on(&self.endpoint) {
            Some(r) => r.clone(),
            None => return Ok(vec![]),
        };

        let signal = match event {
            HostEvent::RelationJoined { .. } if model.leadership()?.is_some() => {
                RequirerState::Disconnected.step(RequirerInput::Created).1
            }
            HostEvent::RelationChanged { app, .. } => {
                let own = own_bag(model);
                let observed = Bag::App(app.clone());

                let previous = diff::cached(model, &relation, &own, &observed)?;
                let state =
                    RequirerState::observe(previous.get(SHARE_INFO_KEY).map(|_| true));

                let transaction = diff::diff(model, &relation, &own, &observed)?;
                if transaction.added.contains(SHARE_INFO_KEY) {
                    state.step(RequirerInput::Ready).1
                } else if transaction.deleted.contains(SHARE_INFO_KEY) {
                    state.step(RequirerInput::NotReady).1
                } else {
                    None
                }
            }
            HostEvent::RelationDeparted { .. } => Some(RequirerSignal::Unmounted),
            _ => None,
        };

        let event = match signal {
            Some(RequirerSignal::Connected) => ShareRequiresEvent::ServerConnected(relation),
            Some(RequirerSignal::Mounted) => ShareRequiresEvent::MountShare(relation),
            Some(RequirerSignal::Unmounted) => ShareRequiresEvent::UmountShare(relation),
            _ => return Ok(vec![]),
        };

        debug!("emitting {:?}", event);
        Ok(vec![event])
    }

    /// Asks the server on `relation` for the share `name`
    ///
    /// Only a single server can be asked at a time.
    pub fn request_share<M: Model + ?Sized>(
        &self,
        model: &mut M,
        token: &LeadershipToken,
        relation: &Relation,
        name: &str,
    ) -> Result<(), CharmError> {
        let relations = self.relations(model)?;
        if relations.iter().any(|r| r != relation) {
            return Err(CharmError::RelationConflict(
                self.endpoint.clone(),
                "Cannot request a share using more than one relation at the same time".into(),
            ));
        }

        let mut data = Databag::new();
        data.insert(NAME_KEY.to_string(), name.to_string());

        debug!("requesting CephFS share `{}`", name);
        model.update_app(relation, &data, token)
    }

    fn server_data<M: Model + ?Sized>(
        &self,
        model: &M,
        relation: &Relation,
    ) -> Result<Databag, CharmError> {
        match model.remote_app(relation)? {
            Some(app) => model.read(relation, &Bag::App(app)),
            None => Ok(Databag::new()),
        }
    }

    /// The share published on `relation`, if any
    pub fn share_info<M: Model + ?Sized>(
        &self,
        model: &M,
        relation: &Relation,
    ) -> Result<Option<CephfsShareInfo>, CharmError> {
        let raw = match self.server_data(model, relation)?.remove(SHARE_INFO_KEY) {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Ok(None),
        };

        match serde_json::from_str(&raw) {
            Ok(info) => Ok(Some(info)),
            Err(err) => {
                warn!("ignoring share info from `{}`: {}", relation, err);
                Ok(None)
            }
        }
    }

    /// The credentials published on `relation`, if any
    ///
    /// Malformed pointers are reported as missing. Failing to fetch a
    /// well-formed secret is an error.
    pub fn auth_info<M: Model + ?Sized>(
        &self,
        model: &M,
        relation: &Relation,
    ) -> Result<Option<CephfsAuthInfo>, CharmError> {
        let pointer = match self.server_data(model, relation)?.remove(AUTH_KEY) {
            Some(raw) if !raw.is_empty() => match SecretRef::parse_lenient(&raw) {
                Some(pointer) => pointer,
                None => return Ok(None),
            },
            _ => return Ok(None),
        };

        let content = pointer.resolve(model)?;
        let auth = CephfsAuthInfo::from_databag(&content);
        if auth.is_none() {
            warn!("ignoring incomplete auth info from `{}`", relation);
        }

        Ok(auth)
    }
}
