//! The `filesystem_info` interface
//!
//! A filesystem provider publishes a single endpoint URI under the `endpoint`
//! key of its application scope. The URI is also kept in the provider's peer
//! relation, so that relations created later can be served without having to
//! rebuild it from configuration.

use std::collections::BTreeMap;

use log::{debug, warn};

use super::own_bag;
use crate::diff;
use crate::endpoint::{FilesystemInfo, FilesystemType};
use crate::error::CharmError;
use crate::event::HostEvent;
use crate::model::{Bag, Databag, LeadershipToken, Model, Relation, SecretId};
use crate::negotiation::{RequirerInput, RequirerSignal, RequirerState};
use crate::secret::SecretRef;

const ENDPOINT_KEY: &str = "endpoint";
const SECRET_KEY: &str = "secret";
const SECRET_LABEL: &str = "filesystem-info-auth";

/// A provider's endpoint, as seen by a requirer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub info: FilesystemInfo,
    pub uri: String,
    pub relation: Relation,
}

/// Provider side of `filesystem_info`
#[derive(Debug, Clone)]
pub struct FilesystemProvides {
    endpoint: String,
    peers: String,
}

impl FilesystemProvides {
    pub fn new<S: Into<String>, P: Into<String>>(endpoint: S, peers: P) -> Self {
        Self {
            endpoint: endpoint.into(),
            peers: peers.into(),
        }
    }

    /// The URI and secret currently published, as stored in the peer relation
    fn stored<M: Model + ?Sized>(
        &self,
        model: &M,
    ) -> Result<Option<(String, Option<SecretId>)>, CharmError> {
        let peer = match model.relations(&self.peers)?.into_iter().next() {
            Some(p) => p,
            None => return Ok(None),
        };

        let data = model.read(&peer, &Bag::App(model.app_name().to_string()))?;
        let secret = data.get(SECRET_KEY).map(|id| SecretId(id.clone()));

        Ok(data.get(ENDPOINT_KEY).map(|uri| (uri.clone(), secret)))
    }

    fn publish<M: Model + ?Sized>(
        &self,
        model: &mut M,
        token: &LeadershipToken,
        relation: &Relation,
        uri: &str,
        secret: Option<&SecretId>,
    ) -> Result<(), CharmError> {
        if let Some(id) = secret {
            model.grant_secret(id, relation)?;
        }

        let mut data = Databag::new();
        data.insert(ENDPOINT_KEY.to_string(), uri.to_string());

        debug!("publishing endpoint to `{}`", relation);
        model.update_app(relation, &data, token)
    }

    /// Publishes `info` to every current and future relation
    ///
    /// Records that fail `FilesystemInfo::validate` are refused, so requirers
    /// never see an endpoint they can't decode.
    pub fn set_info<M: Model + ?Sized>(
        &self,
        model: &mut M,
        token: &LeadershipToken,
        info: &FilesystemInfo,
    ) -> Result<(), CharmError> {
        info.validate()?;

        let (uri, secret) = match info.secret_content() {
            Some(content) => match SecretRef::seal(
                &mut *model,
                &content,
                SECRET_LABEL,
                "Auth info to authenticate against the filesystem",
            )? {
                SecretRef::Secret(id) => (info.to_uri_sealed(&id), Some(id)),
                SecretRef::Plain(_) => (info.to_uri(), None),
            },
            None => (info.to_uri(), None),
        };

        if let Some(peer) = model.relations(&self.peers)?.into_iter().next() {
            let mut data = Databag::new();
            data.insert(ENDPOINT_KEY.to_string(), uri.clone());
            data.insert(
                SECRET_KEY.to_string(),
                secret.as_ref().map(|s| s.0.clone()).unwrap_or_default(),
            );
            model.update_app(&peer, &data, token)?;
        }

        for relation in model.relations(&self.endpoint)? {
            self.publish(model, token, &relation, &uri, secret.as_ref())?;
        }

        Ok(())
    }

    /// Serves new relations and releases grants of broken ones
    pub fn handle<M: Model + ?Sized>(
        &self,
        model: &mut M,
        event: &HostEvent,
    ) -> Result<(), CharmError> {
        let relation = match event.relation_on(&self.endpoint) {
            Some(r) => r.clone(),
            None => return Ok(()),
        };

        let token = match model.leadership()? {
            Some(t) => t,
            None => return Ok(()),
        };

        match event {
            HostEvent::RelationJoined { .. } => {
                if let Some((uri, secret)) = self.stored(model)? {
                    self.publish(model, &token, &relation, &uri, secret.as_ref())?;
                }
            }
            HostEvent::RelationBroken { .. } => {
                if let Some((_, Some(id))) = self.stored(model)? {
                    debug!("revoking `{}` from `{}`", id, relation);
                    model.revoke_secret(&id, &relation)?;
                }
            }
            _ => {}
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilesystemRequiresEvent {
    MountFilesystem(Relation),
    UmountFilesystem(Relation),
}

/// Requirer side of `filesystem_info`
#[derive(Debug, Clone)]
pub struct FilesystemRequires {
    endpoint: String,
}

impl FilesystemRequires {
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
    ) -> Result<Vec<FilesystemRequiresEvent>, CharmError> {
        let relation = match event.relation_on(&self.endpoint) {
            Some(r) => r.clone(),
            None => return Ok(vec![]),
        };

        let signal = match event {
            HostEvent::RelationChanged { app, .. } => {
                let own = own_bag(model);
                let observed = Bag::App(app.clone());

                let previous = diff::cached(model, &relation, &own, &observed)?;
                let state = RequirerState::observe(previous.get(ENDPOINT_KEY).map(|_| true));

                let transaction = diff::diff(model, &relation, &own, &observed)?;
                if transaction.touched(ENDPOINT_KEY) {
                    state.step(RequirerInput::Ready).1
                } else if transaction.deleted.contains(ENDPOINT_KEY) {
                    state.step(RequirerInput::NotReady).1
                } else {
                    None
                }
            }
            HostEvent::RelationDeparted { .. } | HostEvent::RelationBroken { .. } => {
                Some(RequirerSignal::Unmounted)
            }
            _ => None,
        };

        let event = match signal {
            Some(RequirerSignal::Mounted) => FilesystemRequiresEvent::MountFilesystem(relation),
            Some(RequirerSignal::Unmounted) => FilesystemRequiresEvent::UmountFilesystem(relation),
            _ => return Ok(vec![]),
        };

        debug!("emitting {:?}", event);
        Ok(vec![event])
    }

    /// Endpoints published over every relation, skipping unusable ones
    pub fn endpoints<M: Model + ?Sized>(&self, model: &M) -> Result<Vec<Endpoint>, CharmError> {
        let mut endpoints = vec![];

        for relation in self.relations(model)? {
            let app = match model.remote_app(&relation)? {
                Some(app) => app,
                None => continue,
            };

            let uri = match model.read(&relation, &Bag::App(app))?.remove(ENDPOINT_KEY) {
                Some(uri) if !uri.is_empty() => uri,
                _ => continue,
            };

            match FilesystemInfo::from_uri_with(&uri, model) {
                Ok(info) => endpoints.push(Endpoint {
                    info,
                    uri,
                    relation,
                }),
                Err(err) => warn!("ignoring endpoint from `{}`: {}", relation, err),
            }
        }

        Ok(endpoints)
    }

    /// Endpoints keyed by filesystem type, allowing a single relation per type
    pub fn endpoints_by_type<M: Model + ?Sized>(
        &self,
        model: &M,
    ) -> Result<BTreeMap<FilesystemType, Endpoint>, CharmError> {
        let mut by_type = BTreeMap::new();

        for endpoint in self.endpoints(model)? {
            let kind = endpoint.info.filesystem_type();

            if by_type.contains_key(&kind) {
                return Err(CharmError::RelationConflict(
                    self.endpoint.clone(),
                    format!("Too many relations for mount type `{}`", kind),
                ));
            }

            by_type.insert(kind, endpoint);
        }

        Ok(by_type)
    }
}
