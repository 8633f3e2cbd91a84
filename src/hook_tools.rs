//! The model as seen through Juju's hook tools
//!
//! Every read and write shells out to a hook tool, asking for YAML output
//! where the tool supports it. Nothing is cached between calls, since other
//! units can change the model at any point.

use std::collections::BTreeMap;
use std::env;
use std::io::Write;
use std::path::PathBuf;

use ex::fs::{read, remove_file, File};
use log::debug;
use serde_yaml::Value;

use crate::cmd;
use crate::error::CharmError;
use crate::event::HostEvent;
use crate::model::{
    Agent, Bag, Databag, LeadershipToken, Relation, RelationStore, SecretId, SecretStore, Status,
};
use crate::paths;

/// First Juju major version with secret support
const SECRETS_MAJOR_VERSION: u32 = 3;

#[derive(Debug, Clone)]
pub struct HookTools {
    unit: String,
    app: String,
    juju_version: Option<String>,
    deferred_file: PathBuf,

    /// The relation being torn down by the current hook, if any
    broken: Option<Relation>,
}

fn yaml_output<T: serde::de::DeserializeOwned>(cmd: &str, args: &[&str]) -> Result<T, CharmError> {
    let output = cmd::get_output(cmd, args)?;

    // Some tools print nothing at all instead of an empty document
    if output.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(serde_yaml::from_str("null")?);
    }

    Ok(serde_yaml::from_slice(&output)?)
}

/// Turns a YAML mapping with arbitrary scalar values into a databag
fn to_databag(value: Value) -> Databag {
    match value {
        Value::Mapping(mapping) => mapping
            .into_iter()
            .filter_map(|(k, v)| {
                let key = k.as_str()?.to_string();
                let value = match v {
                    Value::String(s) => s,
                    Value::Null => return None,
                    other => serde_yaml::to_string(&other)
                        .ok()?
                        .trim_start_matches("---")
                        .trim()
                        .to_string(),
                };
                Some((key, value))
            })
            .collect(),
        _ => Databag::new(),
    }
}

impl HookTools {
    /// Reads the unit's identity from the hook environment
    pub fn from_env() -> Result<Self, CharmError> {
        let unit = env::var("JUJU_UNIT_NAME").map_err(|_| {
            CharmError::HookToolError("JUJU_UNIT_NAME".into(), "not set".into())
        })?;
        let app = unit.split('/').next().unwrap_or_default().to_string();

        Ok(Self {
            unit,
            app,
            juju_version: env::var("JUJU_VERSION").ok(),
            deferred_file: paths::deferred_events_file(),
            broken: None,
        })
    }

    /// Scopes the model to the hook delivering `event`
    pub fn for_event(mut self, event: &HostEvent) -> Self {
        if let HostEvent::RelationBroken { relation, .. } = event {
            self.broken = Some(relation.clone());
        }
        self
    }

    fn check_live(&self, relation: &Relation) -> Result<(), CharmError> {
        match &self.broken {
            Some(broken) if broken == relation => Err(CharmError::RelationBroken(relation.clone())),
            _ => Ok(()),
        }
    }

    fn relation_set(&self, relation: &Relation, data: &Databag, app: bool) -> Result<(), CharmError> {
        self.check_live(relation)?;

        let rel = relation.to_string();
        let mut args = vec!["-r", rel.as_str()];
        if app {
            args.push("--app");
        }
        args.extend(&["--file", "-"]);

        let input = serde_yaml::to_string(data)?;
        cmd::get_output_with_input("relation-set", &args, input.as_bytes())?;
        Ok(())
    }

    fn is_leader(&self) -> Result<bool, CharmError> {
        yaml_output("is-leader", &["--format", "yaml"])
    }

    fn write_deferred(&self, events: &[HostEvent]) -> Result<(), CharmError> {
        if events.is_empty() {
            if self.deferred_file.exists() {
                remove_file(&self.deferred_file)?;
            }
            return Ok(());
        }

        let yaml = serde_yaml::to_string(events)?;
        File::create(&self.deferred_file)?.write_all(yaml.as_bytes())?;
        Ok(())
    }

    fn read_deferred(&self) -> Result<Vec<HostEvent>, CharmError> {
        if !self.deferred_file.exists() {
            return Ok(vec![]);
        }

        Ok(serde_yaml::from_slice(&read(&self.deferred_file)?)?)
    }
}

impl RelationStore for HookTools {
    fn relations(&self, endpoint: &str) -> Result<Vec<Relation>, CharmError> {
        let ids: Option<Vec<String>> = yaml_output("relation-ids", &[endpoint, "--format", "yaml"])?;

        ids.unwrap_or_default()
            .iter()
            .map(|id| Relation::parse(id).map_err(CharmError::InvalidRecord))
            .filter(|r| match (r, &self.broken) {
                (Ok(r), Some(broken)) => r != broken,
                _ => true,
            })
            .collect()
    }

    fn remote_app(&self, relation: &Relation) -> Result<Option<String>, CharmError> {
        let rel = relation.to_string();
        let app: Option<String> =
            yaml_output("relation-list", &["-r", &rel, "--app", "--format", "yaml"])?;

        Ok(app.filter(|a| !a.is_empty()))
    }

    fn remote_units(&self, relation: &Relation) -> Result<Vec<String>, CharmError> {
        self.check_live(relation)?;

        let rel = relation.to_string();
        let units: Option<Vec<String>> =
            yaml_output("relation-list", &["-r", &rel, "--format", "yaml"])?;

        Ok(units.unwrap_or_default())
    }

    fn read(&self, relation: &Relation, bag: &Bag) -> Result<Databag, CharmError> {
        self.check_live(relation)?;

        let rel = relation.to_string();
        let value: Value = match bag {
            Bag::Unit(unit) => {
                yaml_output("relation-get", &["-r", &rel, "--format", "yaml", "-", unit])?
            }
            Bag::App(app) => yaml_output(
                "relation-get",
                &["-r", &rel, "--app", "--format", "yaml", "-", app],
            )?,
        };

        Ok(to_databag(value))
    }

    fn update_unit(&mut self, relation: &Relation, data: &Databag) -> Result<(), CharmError> {
        self.relation_set(relation, data, false)
    }

    fn update_app(
        &mut self,
        relation: &Relation,
        data: &Databag,
        _token: &LeadershipToken,
    ) -> Result<(), CharmError> {
        if !self.is_leader()? {
            return Err(CharmError::NotLeader(self.unit.clone()));
        }

        self.relation_set(relation, data, true)
    }
}

impl SecretStore for HookTools {
    fn secrets_available(&self) -> bool {
        self.juju_version
            .as_ref()
            .and_then(|v| v.split('.').next())
            .and_then(|major| major.parse::<u32>().ok())
            .map(|major| major >= SECRETS_MAJOR_VERSION)
            .unwrap_or(false)
    }

    fn ensure_secret(
        &mut self,
        content: &Databag,
        label: &str,
        description: &str,
    ) -> Result<SecretId, CharmError> {
        let pairs: Vec<String> = content
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        if let Some(id) = self.lookup_secret(label)? {
            let mut args = vec![id.0.as_str()];
            args.extend(pairs.iter().map(String::as_str));
            cmd::run("secret-set", &args)?;
            return Ok(id);
        }

        let mut args = vec!["--label", label, "--description", description];
        args.extend(pairs.iter().map(String::as_str));
        let output = cmd::get_output("secret-add", &args)?;

        let id = String::from_utf8_lossy(&output).trim().to_string();
        debug!("created secret `{}` labelled `{}`", id, label);
        Ok(SecretId(id))
    }

    fn lookup_secret(&self, label: &str) -> Result<Option<SecretId>, CharmError> {
        match yaml_output::<Option<BTreeMap<String, Value>>>(
            "secret-info-get",
            &["--label", label, "--format", "yaml"],
        ) {
            Ok(info) => Ok(info.and_then(|i| i.keys().next().cloned()).map(SecretId)),
            // Unknown labels are reported as a tool failure
            Err(CharmError::HookToolError(..)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn grant_secret(&mut self, id: &SecretId, relation: &Relation) -> Result<(), CharmError> {
        let rel = relation.to_string();
        cmd::run("secret-grant", &[id.0.as_str(), "-r", rel.as_str()])
    }

    fn revoke_secret(&mut self, id: &SecretId, relation: &Relation) -> Result<(), CharmError> {
        let rel = relation.to_string();
        cmd::run("secret-revoke", &[id.0.as_str(), "-r", rel.as_str()])
    }

    fn secret_content(&self, id: &SecretId) -> Result<Databag, CharmError> {
        yaml_output::<Value>("secret-get", &[id.0.as_str(), "--format", "yaml"])
            .map(to_databag)
            .map_err(|err| CharmError::SecretError(format!("couldn't get `{}`: {}", id, err)))
    }
}

impl Agent for HookTools {
    fn unit_name(&self) -> &str {
        &self.unit
    }

    fn app_name(&self) -> &str {
        &self.app
    }

    fn leadership(&self) -> Result<Option<LeadershipToken>, CharmError> {
        Ok(if self.is_leader()? {
            Some(LeadershipToken::issue())
        } else {
            None
        })
    }

    fn set_status(&mut self, status: Status) -> Result<(), CharmError> {
        cmd::run("status-set", &[status.name(), status.message()])
    }

    fn set_app_status(
        &mut self,
        status: Status,
        _token: &LeadershipToken,
    ) -> Result<(), CharmError> {
        cmd::run(
            "status-set",
            &["--application", status.name(), status.message()],
        )
    }

    fn config(&self) -> Result<Value, CharmError> {
        yaml_output("config-get", &["--format", "yaml"])
    }

    fn defer(&mut self, event: &HostEvent) -> Result<(), CharmError> {
        let mut events = self.read_deferred()?;
        events.push(event.clone());
        self.write_deferred(&events)
    }

    fn take_deferred(&mut self) -> Result<Vec<HostEvent>, CharmError> {
        let events = self.read_deferred()?;
        self.write_deferred(&[])?;
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn tools(dir: &TempDir, version: Option<&str>) -> HookTools {
        HookTools {
            unit: "client/0".into(),
            app: "client".into(),
            juju_version: version.map(String::from),
            deferred_file: dir.path().join(".deferred.yaml"),
            broken: None,
        }
    }

    #[test]
    fn test_secrets_available() {
        let dir = TempDir::new().unwrap();

        for (version, expected) in &[
            (Some("2.9.44"), false),
            (Some("3.1.6"), true),
            (Some("4.0-beta1"), true),
            (None, false),
        ] {
            println!("Testing {:?}", version);
            assert_eq!(tools(&dir, *version).secrets_available(), *expected);
        }
    }

    #[test]
    fn test_deferred_queue() {
        let dir = TempDir::new().unwrap();
        let mut tools = tools(&dir, None);
        let changed = HostEvent::RelationChanged {
            relation: Relation::new("cephfs-share", 4),
            app: "client".into(),
            unit: Some("client/0".into()),
        };

        tools.defer(&changed).unwrap();
        tools.defer(&HostEvent::ConfigChanged).unwrap();

        assert_eq!(
            tools.take_deferred().unwrap(),
            vec![changed, HostEvent::ConfigChanged]
        );
        assert!(tools.take_deferred().unwrap().is_empty());
        assert!(!dir.path().join(".deferred.yaml").exists());
    }

    #[test]
    fn test_broken_relation_unreadable() {
        let dir = TempDir::new().unwrap();
        let relation = Relation::new("filesystem", 2);
        let tools = tools(&dir, None).for_event(&HostEvent::RelationBroken {
            relation: relation.clone(),
            app: None,
        });

        match tools.read(&relation, &Bag::App("server".into())) {
            Err(CharmError::RelationBroken(r)) => assert_eq!(r, relation),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_to_databag() {
        let value: Value = serde_yaml::from_str(
            "mountpoint: '\"/data\"'\nmounted: 'true'\nport: 2049\nempty: null\n",
        )
        .unwrap();
        let bag = to_databag(value);

        assert_eq!(bag["mountpoint"], "\"/data\"");
        assert_eq!(bag["mounted"], "true");
        assert_eq!(bag["port"], "2049");
        assert!(!bag.contains_key("empty"));
    }
}
