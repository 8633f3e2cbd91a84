//! The host substrate a charm runs against
//!
//! Juju owns all of the state a charm can see: relation databags, leadership,
//! secrets, statuses and configuration. The traits in this module describe
//! the slice of that substrate the relation interfaces consume, so that the
//! same code runs against real hook tools (`crate::hook_tools`) or against
//! the in-memory `crate::testing::Harness`.

use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use nom::bytes::complete::take_till1;
use nom::character::complete::{char, digit1};
use nom::combinator::map_res;
use nom::sequence::separated_pair;
use nom::IResult;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::Value;

use crate::error::CharmError;
use crate::event::HostEvent;

/// Contents of a single relation scope
pub type Databag = BTreeMap<String, String>;

/// Parses a relation id of the form `endpoint:id`
fn parse_relation(input: &str) -> IResult<&str, (&str, u32)> {
    separated_pair(
        take_till1(|c| c == ':'),
        char(':'),
        map_res(digit1, |d: &str| d.parse::<u32>()),
    )(input)
}

/// A relation as identified by Juju, e.g. `mount:3`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Relation {
    pub endpoint: String,
    pub id: u32,
}

impl Relation {
    pub fn new<S: Into<String>>(endpoint: S, id: u32) -> Self {
        Self {
            endpoint: endpoint.into(),
            id,
        }
    }

    pub fn parse(input: &str) -> Result<Self, String> {
        let (remainder, (endpoint, id)) = parse_relation(input)
            .map_err(|err| format!("Couldn't parse relation id: {:?}", err))?;

        if !remainder.is_empty() {
            return Err(format!(
                "Got extra data at end of relation id: `{}`",
                remainder
            ));
        }

        Ok(Self::new(endpoint, id))
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.endpoint, self.id)
    }
}

impl FromStr for Relation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for Relation {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl Serialize for Relation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Relation {
    fn deserialize<D>(deserializer: D) -> Result<Relation, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;
        let s = String::deserialize(deserializer)?;

        s.parse()
            .map_err(|err| Error::custom(format!("Error deserializing Relation: {}", err)))
    }
}

/// One scope of a relation, addressed by its owner
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bag {
    /// Written only by the named unit
    Unit(String),

    /// Written only by the leader of the named application
    App(String),
}

/// Workload status as shown by `juju status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Active(String),
    Blocked(String),
    Waiting(String),
    Maintenance(String),
}

impl Status {
    pub fn name(&self) -> &'static str {
        match self {
            Status::Active(_) => "active",
            Status::Blocked(_) => "blocked",
            Status::Waiting(_) => "waiting",
            Status::Maintenance(_) => "maintenance",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Status::Active(m) | Status::Blocked(m) | Status::Waiting(m) | Status::Maintenance(m) => {
                m
            }
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.message())
    }
}

/// Proof that this unit was the application leader when the token was issued
///
/// Only `Agent::leadership` hands these out. Stores still re-check leadership
/// when the token is used, since it can be lost between two calls.
#[derive(Debug)]
pub struct LeadershipToken {
    _private: (),
}

impl LeadershipToken {
    pub(crate) fn issue() -> Self {
        Self { _private: () }
    }
}

/// Opaque handle for a secret held by the host
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde_derive::Serialize,
    serde_derive::Deserialize,
)]
pub struct SecretId(pub String);

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Access to relation databags
pub trait RelationStore {
    /// Active relations for the given endpoint
    fn relations(&self, endpoint: &str) -> Result<Vec<Relation>, CharmError>;

    /// Name of the application on the other side of the relation
    fn remote_app(&self, relation: &Relation) -> Result<Option<String>, CharmError>;

    /// Units of the remote application that have joined the relation
    fn remote_units(&self, relation: &Relation) -> Result<Vec<String>, CharmError>;

    /// Reads a whole scope. Fails with `RelationBroken` once the relation is torn down.
    fn read(&self, relation: &Relation, bag: &Bag) -> Result<Databag, CharmError>;

    /// Merges `data` into this unit's scope. Empty values delete their key.
    fn update_unit(&mut self, relation: &Relation, data: &Databag) -> Result<(), CharmError>;

    /// Merges `data` into this application's scope. Empty values delete their key.
    fn update_app(
        &mut self,
        relation: &Relation,
        data: &Databag,
        token: &LeadershipToken,
    ) -> Result<(), CharmError>;
}

/// Access to host-held secrets
pub trait SecretStore {
    /// Whether the host supports secrets at all
    fn secrets_available(&self) -> bool;

    /// Creates the secret with the given label, or replaces its content if it exists
    fn ensure_secret(
        &mut self,
        content: &Databag,
        label: &str,
        description: &str,
    ) -> Result<SecretId, CharmError>;

    fn lookup_secret(&self, label: &str) -> Result<Option<SecretId>, CharmError>;

    fn grant_secret(&mut self, id: &SecretId, relation: &Relation) -> Result<(), CharmError>;

    fn revoke_secret(&mut self, id: &SecretId, relation: &Relation) -> Result<(), CharmError>;

    fn secret_content(&self, id: &SecretId) -> Result<Databag, CharmError>;
}

/// The unit agent: identity, leadership, status, config and event deferral
pub trait Agent {
    fn unit_name(&self) -> &str;

    fn app_name(&self) -> &str;

    /// Returns a token if, and only if, this unit currently holds leadership
    fn leadership(&self) -> Result<Option<LeadershipToken>, CharmError>;

    fn set_status(&mut self, status: Status) -> Result<(), CharmError>;

    fn set_app_status(&mut self, status: Status, token: &LeadershipToken)
        -> Result<(), CharmError>;

    /// Raw charm configuration, as reported by `config-get`
    fn config(&self) -> Result<Value, CharmError>;

    /// Asks for `event` to be delivered again on a later dispatch
    fn defer(&mut self, event: &HostEvent) -> Result<(), CharmError>;

    /// Removes and returns every previously deferred event, oldest first
    fn take_deferred(&mut self) -> Result<Vec<HostEvent>, CharmError>;
}

/// Everything a charm needs from its host
pub trait Model: RelationStore + SecretStore + Agent {}

impl<T: RelationStore + SecretStore + Agent> Model for T {}

/// Deserializes the charm configuration into a typed struct
pub fn load_config<T, M>(model: &M) -> Result<T, CharmError>
where
    T: serde::de::DeserializeOwned,
    M: Agent + ?Sized,
{
    let value = match model.config()? {
        Value::Null => Value::Mapping(Default::default()),
        v => v,
    };

    Ok(serde_yaml::from_value(value)?)
}
