//! In-memory stand-ins for the Juju agent and the mount executor
//!
//! `Harness` holds everything a single unit can see of its model, so charms
//! and relation interfaces can be driven event by event without a
//! controller. The remote side of a relation is simulated by writing
//! directly into its scopes with `remote_update`.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;

use serde_yaml::Value;

use crate::charm::{dispatch, Charm};
use crate::error::CharmError;
use crate::event::HostEvent;
use crate::model::{
    Agent, Bag, Databag, LeadershipToken, Relation, RelationStore, SecretId, SecretStore, Status,
};
use crate::mounts::MountExecutor;

/// Merges `data` into `bag` the way `relation-set` does
fn merge(bag: &mut Databag, data: &Databag) {
    for (key, value) in data {
        if value.is_empty() {
            bag.remove(key);
        } else {
            bag.insert(key.clone(), value.clone());
        }
    }
}

#[derive(Debug, Clone, Default)]
struct RelationData {
    remote_app: String,
    remote_units: Vec<String>,
    bags: BTreeMap<Bag, Databag>,
    broken: bool,
}

/// A secret owned by the harness' application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secret {
    pub label: String,
    pub content: Databag,
    pub grants: BTreeSet<Relation>,
}

#[derive(Debug, Clone)]
pub struct Harness {
    app: String,
    unit: String,
    leader: bool,
    config: Value,
    secrets_available: bool,
    relations: BTreeMap<Relation, RelationData>,
    secrets: BTreeMap<SecretId, Secret>,
    next_id: u32,
    unit_status: Option<Status>,
    app_status: Option<Status>,
    deferred: Vec<HostEvent>,
}

impl Harness {
    pub fn new<A: Into<String>, U: Into<String>>(app: A, unit: U) -> Self {
        Self {
            app: app.into(),
            unit: unit.into(),
            leader: false,
            config: Value::Null,
            secrets_available: false,
            relations: BTreeMap::new(),
            secrets: BTreeMap::new(),
            next_id: 0,
            unit_status: None,
            app_status: None,
            deferred: vec![],
        }
    }

    pub fn set_leader(&mut self, leader: bool) {
        self.leader = leader;
    }

    /// Replaces the charm configuration with the given YAML mapping
    pub fn set_config(&mut self, yaml: &str) -> Result<(), CharmError> {
        self.config = serde_yaml::from_str(yaml)?;
        Ok(())
    }

    pub fn set_secrets_available(&mut self, available: bool) {
        self.secrets_available = available;
    }

    /// Creates a relation on `endpoint` with the application `remote_app`
    pub fn add_relation<E: Into<String>, A: Into<String>>(
        &mut self,
        endpoint: E,
        remote_app: A,
    ) -> Relation {
        let relation = Relation::new(endpoint, self.next_id);
        self.next_id += 1;

        self.relations.insert(
            relation.clone(),
            RelationData {
                remote_app: remote_app.into(),
                ..RelationData::default()
            },
        );

        relation
    }

    pub fn add_relation_unit<U: Into<String>>(&mut self, relation: &Relation, unit: U) {
        if let Some(data) = self.relations.get_mut(relation) {
            data.remote_units.push(unit.into());
        }
    }

    pub fn remove_relation_unit(&mut self, relation: &Relation, unit: &str) {
        if let Some(data) = self.relations.get_mut(relation) {
            data.remote_units.retain(|u| u != unit);
            data.bags.remove(&Bag::Unit(unit.to_string()));
        }
    }

    /// Writes into a scope as its owner on the remote side would
    pub fn remote_update(&mut self, relation: &Relation, bag: &Bag, data: Databag) {
        if let Some(rel) = self.relations.get_mut(relation) {
            merge(rel.bags.entry(bag.clone()).or_default(), &data);
        }
    }

    /// Current contents of a scope, whoever owns it
    pub fn bag(&self, relation: &Relation, bag: &Bag) -> Databag {
        self.relations
            .get(relation)
            .and_then(|rel| rel.bags.get(bag))
            .cloned()
            .unwrap_or_default()
    }

    /// Tears the relation down, as seen from within its broken hook
    pub fn break_relation(&mut self, relation: &Relation) {
        if let Some(rel) = self.relations.get_mut(relation) {
            rel.broken = true;
        }
    }

    pub fn unit_status(&self) -> Option<&Status> {
        self.unit_status.as_ref()
    }

    pub fn app_status(&self) -> Option<&Status> {
        self.app_status.as_ref()
    }

    /// Events waiting for the next dispatch
    pub fn deferred(&self) -> &[HostEvent] {
        &self.deferred
    }

    pub fn secret(&self, label: &str) -> Option<&Secret> {
        self.secrets.values().find(|s| s.label == label)
    }

    /// Dispatches `event` to `charm`, as the agent would for a single hook
    pub fn run<C: Charm<Self>>(&mut self, charm: &mut C, event: &HostEvent) -> Result<(), CharmError> {
        dispatch(self, charm, event)
    }

    /// The other side of `relation`, as seen by `unit` of `app`
    ///
    /// The new harness sees this harness' scopes of the relation as remote
    /// data, and shares its secrets.
    pub fn mirror<A: Into<String>, U: Into<String>>(
        &self,
        app: A,
        unit: U,
        relation: &Relation,
    ) -> Harness {
        let mut other = Harness::new(app, unit);
        other.secrets_available = self.secrets_available;
        other.secrets = self.secrets.clone();
        other.next_id = relation.id + 1;

        let mut data = RelationData {
            remote_app: self.app.clone(),
            remote_units: vec![self.unit.clone()],
            ..RelationData::default()
        };

        for bag in &[Bag::App(self.app.clone()), Bag::Unit(self.unit.clone())] {
            let contents = self.bag(relation, bag);
            if !contents.is_empty() {
                data.bags.insert(bag.clone(), contents);
            }
        }

        other.relations.insert(relation.clone(), data);
        other
    }

    fn live(&self, relation: &Relation) -> Result<&RelationData, CharmError> {
        match self.relations.get(relation) {
            Some(rel) if !rel.broken => Ok(rel),
            _ => Err(CharmError::RelationBroken(relation.clone())),
        }
    }

    fn live_mut(&mut self, relation: &Relation) -> Result<&mut RelationData, CharmError> {
        match self.relations.get_mut(relation) {
            Some(rel) if !rel.broken => Ok(rel),
            _ => Err(CharmError::RelationBroken(relation.clone())),
        }
    }

    fn secret_mut(&mut self, id: &SecretId) -> Result<&mut Secret, CharmError> {
        self.secrets
            .get_mut(id)
            .ok_or_else(|| CharmError::SecretError(format!("no secret `{}`", id)))
    }
}

impl RelationStore for Harness {
    fn relations(&self, endpoint: &str) -> Result<Vec<Relation>, CharmError> {
        Ok(self
            .relations
            .iter()
            .filter(|(r, data)| r.endpoint == endpoint && !data.broken)
            .map(|(r, _)| r.clone())
            .collect())
    }

    fn remote_app(&self, relation: &Relation) -> Result<Option<String>, CharmError> {
        Ok(self.relations.get(relation).map(|r| r.remote_app.clone()))
    }

    fn remote_units(&self, relation: &Relation) -> Result<Vec<String>, CharmError> {
        Ok(self.live(relation)?.remote_units.clone())
    }

    fn read(&self, relation: &Relation, bag: &Bag) -> Result<Databag, CharmError> {
        Ok(self.live(relation)?.bags.get(bag).cloned().unwrap_or_default())
    }

    fn update_unit(&mut self, relation: &Relation, data: &Databag) -> Result<(), CharmError> {
        let own = Bag::Unit(self.unit.clone());
        merge(self.live_mut(relation)?.bags.entry(own).or_default(), data);
        Ok(())
    }

    fn update_app(
        &mut self,
        relation: &Relation,
        data: &Databag,
        _token: &LeadershipToken,
    ) -> Result<(), CharmError> {
        if !self.leader {
            return Err(CharmError::NotLeader(self.unit.clone()));
        }

        let own = Bag::App(self.app.clone());
        merge(self.live_mut(relation)?.bags.entry(own).or_default(), data);
        Ok(())
    }
}

impl SecretStore for Harness {
    fn secrets_available(&self) -> bool {
        self.secrets_available
    }

    fn ensure_secret(
        &mut self,
        content: &Databag,
        label: &str,
        _description: &str,
    ) -> Result<SecretId, CharmError> {
        if !self.secrets_available {
            return Err(CharmError::SecretError("secrets are not supported".into()));
        }

        if let Some(id) = self.lookup_secret(label)? {
            self.secret_mut(&id)?.content = content.clone();
            return Ok(id);
        }

        let id = SecretId(format!("secret:harness-{}", self.secrets.len()));
        self.secrets.insert(
            id.clone(),
            Secret {
                label: label.to_string(),
                content: content.clone(),
                grants: BTreeSet::new(),
            },
        );

        Ok(id)
    }

    fn lookup_secret(&self, label: &str) -> Result<Option<SecretId>, CharmError> {
        Ok(self
            .secrets
            .iter()
            .find(|(_, s)| s.label == label)
            .map(|(id, _)| id.clone()))
    }

    fn grant_secret(&mut self, id: &SecretId, relation: &Relation) -> Result<(), CharmError> {
        self.secret_mut(id)?.grants.insert(relation.clone());
        Ok(())
    }

    fn revoke_secret(&mut self, id: &SecretId, relation: &Relation) -> Result<(), CharmError> {
        self.secret_mut(id)?.grants.remove(relation);
        Ok(())
    }

    fn secret_content(&self, id: &SecretId) -> Result<Databag, CharmError> {
        self.secrets
            .get(id)
            .map(|s| s.content.clone())
            .ok_or_else(|| CharmError::SecretError(format!("no secret `{}`", id)))
    }
}

impl Agent for Harness {
    fn unit_name(&self) -> &str {
        &self.unit
    }

    fn app_name(&self) -> &str {
        &self.app
    }

    fn leadership(&self) -> Result<Option<LeadershipToken>, CharmError> {
        Ok(if self.leader {
            Some(LeadershipToken::issue())
        } else {
            None
        })
    }

    fn set_status(&mut self, status: Status) -> Result<(), CharmError> {
        self.unit_status = Some(status);
        Ok(())
    }

    fn set_app_status(
        &mut self,
        status: Status,
        _token: &LeadershipToken,
    ) -> Result<(), CharmError> {
        if !self.leader {
            return Err(CharmError::NotLeader(self.unit.clone()));
        }

        self.app_status = Some(status);
        Ok(())
    }

    fn config(&self) -> Result<Value, CharmError> {
        Ok(self.config.clone())
    }

    fn defer(&mut self, event: &HostEvent) -> Result<(), CharmError> {
        self.deferred.push(event.clone());
        Ok(())
    }

    fn take_deferred(&mut self) -> Result<Vec<HostEvent>, CharmError> {
        Ok(mem::replace(&mut self.deferred, vec![]))
    }
}

/// A side effect requested from `FakeExecutor`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    EnsurePackage(String),
    InitTables,
    CreateMountpoint(String),
    WriteTable,
    Reload,
}

/// Mount executor that records what it was asked to do
#[derive(Debug, Clone, Default)]
pub struct FakeExecutor {
    /// What `systemd-detect-virt` reports; `None` makes detection fail
    pub virtualization: Option<String>,
    pub packages: BTreeSet<String>,
    pub tables: bool,
    pub table: String,
    pub fail_reload: bool,
    pub calls: Vec<Call>,
}

impl FakeExecutor {
    pub fn count(&self, call: &Call) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }
}

impl MountExecutor for FakeExecutor {
    fn virtualization(&self) -> Result<String, CharmError> {
        self.virtualization.clone().ok_or_else(|| {
            CharmError::HookToolError("systemd-detect-virt".into(), "not available".into())
        })
    }

    fn package_present(&self, name: &str) -> Result<bool, CharmError> {
        Ok(self.packages.contains(name))
    }

    fn ensure_package(&mut self, name: &str) -> Result<(), CharmError> {
        self.calls.push(Call::EnsurePackage(name.to_string()));
        self.packages.insert(name.to_string());
        Ok(())
    }

    fn tables_present(&self) -> bool {
        self.tables
    }

    fn init_tables(&mut self) -> Result<(), CharmError> {
        self.calls.push(Call::InitTables);
        self.tables = true;
        Ok(())
    }

    fn read_table(&self) -> Result<String, CharmError> {
        Ok(self.table.clone())
    }

    fn create_mountpoint(&mut self, path: &str) -> Result<(), CharmError> {
        self.calls.push(Call::CreateMountpoint(path.to_string()));
        Ok(())
    }

    fn write_table(&mut self, table: &str) -> Result<(), CharmError> {
        self.calls.push(Call::WriteTable);
        self.table = table.to_string();
        Ok(())
    }

    fn reload_service(&mut self) -> Result<(), CharmError> {
        self.calls.push(Call::Reload);

        if self.fail_reload {
            Err(CharmError::HookToolError(
                "systemctl restart autofs".into(),
                "Job for autofs.service failed".into(),
            ))
        } else {
            Ok(())
        }
    }
}
