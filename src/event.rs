//! Events delivered by the Juju agent

use std::env;

use serde_derive::{Deserialize, Serialize};

use crate::error::CharmError;
use crate::model::Relation;

/// A lifecycle event, as delivered by a single dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, tag = "event", rename_all = "kebab-case")]
pub enum HostEvent {
    Install,
    Start,
    ConfigChanged,
    UpdateStatus,
    UpgradeCharm,
    LeaderElected,
    RelationCreated {
        relation: Relation,
        app: String,
    },
    RelationJoined {
        relation: Relation,
        app: String,
        unit: String,
    },
    RelationChanged {
        relation: Relation,
        app: String,
        #[serde(default)]
        unit: Option<String>,
    },
    RelationDeparted {
        relation: Relation,
        app: String,
        unit: String,
    },
    RelationBroken {
        relation: Relation,
        #[serde(default)]
        app: Option<String>,
    },
}

/// Hook-specific values Juju exports to the environment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookEnv {
    pub relation_id: Option<String>,
    pub remote_unit: Option<String>,
    pub remote_app: Option<String>,
}

impl HookEnv {
    pub fn from_env() -> Self {
        Self {
            relation_id: env::var("JUJU_RELATION_ID").ok(),
            remote_unit: env::var("JUJU_REMOTE_UNIT").ok().filter(|u| !u.is_empty()),
            remote_app: env::var("JUJU_REMOTE_APP").ok().filter(|a| !a.is_empty()),
        }
    }

    fn relation(&self, hook: &str) -> Result<Relation, CharmError> {
        let id = self.relation_id.as_ref().ok_or_else(|| {
            CharmError::InvalidRecord(format!("`{}` hook without JUJU_RELATION_ID", hook))
        })?;

        id.parse().map_err(CharmError::InvalidRecord)
    }

    fn app(&self) -> Option<String> {
        self.remote_app.clone().or_else(|| {
            self.remote_unit
                .as_ref()
                .and_then(|u| u.split('/').next())
                .map(String::from)
        })
    }

    fn require_app(&self, hook: &str) -> Result<String, CharmError> {
        self.app().ok_or_else(|| {
            CharmError::InvalidRecord(format!("`{}` hook without a remote application", hook))
        })
    }

    fn require_unit(&self, hook: &str) -> Result<String, CharmError> {
        self.remote_unit.clone().ok_or_else(|| {
            CharmError::InvalidRecord(format!("`{}` hook without JUJU_REMOTE_UNIT", hook))
        })
    }
}

impl HostEvent {
    /// Builds an event from a hook name such as `mount-relation-changed`
    ///
    /// Returns `Ok(None)` for hooks no charm in this family reacts to.
    pub fn from_hook(hook: &str, env: &HookEnv) -> Result<Option<Self>, CharmError> {
        let event = match hook {
            "install" => HostEvent::Install,
            "start" => HostEvent::Start,
            "config-changed" => HostEvent::ConfigChanged,
            "update-status" => HostEvent::UpdateStatus,
            "upgrade-charm" => HostEvent::UpgradeCharm,
            "leader-elected" => HostEvent::LeaderElected,
            _ => {
                let kind = match hook.rfind("-relation-") {
                    Some(i) => &hook[i + "-relation-".len()..],
                    None => return Ok(None),
                };
                let relation = env.relation(hook)?;

                match kind {
                    "created" => HostEvent::RelationCreated {
                        relation,
                        app: env.require_app(hook)?,
                    },
                    "joined" => HostEvent::RelationJoined {
                        relation,
                        app: env.require_app(hook)?,
                        unit: env.require_unit(hook)?,
                    },
                    "changed" => HostEvent::RelationChanged {
                        relation,
                        app: env.require_app(hook)?,
                        unit: env.remote_unit.clone(),
                    },
                    "departed" => HostEvent::RelationDeparted {
                        relation,
                        app: env.require_app(hook)?,
                        unit: env.require_unit(hook)?,
                    },
                    "broken" => HostEvent::RelationBroken {
                        relation,
                        app: env.app(),
                    },
                    _ => return Ok(None),
                }
            }
        };

        Ok(Some(event))
    }

    /// The relation this event concerns, if any
    pub fn relation(&self) -> Option<&Relation> {
        match self {
            HostEvent::RelationCreated { relation, .. }
            | HostEvent::RelationJoined { relation, .. }
            | HostEvent::RelationChanged { relation, .. }
            | HostEvent::RelationDeparted { relation, .. }
            | HostEvent::RelationBroken { relation, .. } => Some(relation),
            _ => None,
        }
    }

    /// The relation this event concerns, if it was delivered for `endpoint`
    pub fn relation_on(&self, endpoint: &str) -> Option<&Relation> {
        self.relation().filter(|r| r.endpoint == endpoint)
    }
}

#[cfg(test)]
mod tests {
    use serde_yaml::{from_str, to_string};

    use super::*;

    fn relation_env() -> HookEnv {
        HookEnv {
            relation_id: Some("mount:4".into()),
            remote_unit: Some("nfs-proxy/0".into()),
            remote_app: None,
        }
    }

    #[test]
    fn test_plain_hooks() {
        let env = HookEnv::default();

        assert_eq!(
            HostEvent::from_hook("config-changed", &env).unwrap(),
            Some(HostEvent::ConfigChanged)
        );
        assert_eq!(
            HostEvent::from_hook("update-status", &env).unwrap(),
            Some(HostEvent::UpdateStatus)
        );
        assert_eq!(HostEvent::from_hook("stop", &env).unwrap(), None);
    }

    #[test]
    fn test_relation_hooks() {
        let env = relation_env();

        assert_eq!(
            HostEvent::from_hook("mount-relation-changed", &env).unwrap(),
            Some(HostEvent::RelationChanged {
                relation: Relation::new("mount", 4),
                app: "nfs-proxy".into(),
                unit: Some("nfs-proxy/0".into()),
            })
        );

        let broken = HostEvent::from_hook("mount-relation-broken", &env)
            .unwrap()
            .unwrap();
        assert_eq!(broken.relation_on("mount"), Some(&Relation::new("mount", 4)));
        assert_eq!(broken.relation_on("filesystem"), None);
    }

    #[test]
    fn test_relation_hook_without_id() {
        assert!(HostEvent::from_hook("mount-relation-joined", &HookEnv::default()).is_err());
    }

    #[test]
    fn test_serialization() {
        let event = HostEvent::RelationChanged {
            relation: Relation::new("cephfs-share", 2),
            app: "cephfs-client".into(),
            unit: None,
        };

        let serialized = to_string(&event).unwrap();
        let parsed: HostEvent = from_str(&serialized).unwrap();

        assert_eq!(parsed, event);
    }
}
