//! Structured records on top of string-valued databags
//!
//! A record is stored one field per key, each value JSON-encoded, so that
//! the other side can read single fields without decoding the whole record.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::diff::is_reserved;
use crate::error::CharmError;
use crate::model::Databag;

/// Flattens a record into databag entries
pub fn save<T: Serialize>(record: &T) -> Result<Databag, CharmError> {
    match serde_json::to_value(record)? {
        Value::Object(fields) => fields
            .into_iter()
            .map(|(k, v)| -> Result<(String, String), CharmError> {
                Ok((k, serde_json::to_string(&v)?))
            })
            .collect(),
        other => Err(CharmError::InvalidRecord(format!(
            "expected a record, got `{}`",
            other
        ))),
    }
}

/// Rebuilds a record from databag entries, ignoring reserved keys
pub fn load<T: DeserializeOwned>(bag: &Databag) -> Result<T, CharmError> {
    let fields = bag
        .iter()
        .filter(|(k, _)| !is_reserved(k))
        .map(|(k, v)| {
            serde_json::from_str(v)
                .map(|v| (k.clone(), v))
                .map_err(|err| CharmError::InvalidRecord(format!("field `{}`: {}", k, err)))
        })
        .collect::<Result<Map<String, Value>, CharmError>>()?;

    serde_json::from_value(Value::Object(fields))
        .map_err(|err| CharmError::InvalidRecord(err.to_string()))
}

/// Encodes a flag the way the mount interfaces publish it
pub fn flag(value: bool) -> String {
    let encoded = if value { "true" } else { "false" };
    encoded.to_string()
}

#[cfg(test)]
mod tests {
    use serde_derive::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Share {
        name: String,
        read_only: bool,
        #[serde(default)]
        hosts: Vec<String>,
    }

    #[test]
    fn test_save() {
        let share = Share {
            name: "data".into(),
            read_only: true,
            hosts: vec!["10.0.0.1".into()],
        };

        let bag = save(&share).unwrap();

        assert_eq!(bag["name"], "\"data\"");
        assert_eq!(bag["read_only"], "true");
        assert_eq!(bag["hosts"], "[\"10.0.0.1\"]");
        assert_eq!(load::<Share>(&bag).unwrap(), share);
    }

    #[test]
    fn test_load_ignores_cache() {
        let mut bag = Databag::new();
        bag.insert("name".into(), "\"data\"".into());
        bag.insert("read_only".into(), "false".into());
        bag.insert("cache".into(), "{not json".into());

        let share: Share = load(&bag).unwrap();
        assert_eq!(share.name, "data");
        assert!(share.hosts.is_empty());
    }

    #[test]
    fn test_load_invalid() {
        let mut bag = Databag::new();
        bag.insert("name".into(), "data".into());

        assert!(load::<Share>(&bag).is_err());
    }

    #[test]
    fn test_save_scalar() {
        assert!(save(&42).is_err());
    }
}
