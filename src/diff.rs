//! Change detection for relation scopes
//!
//! Juju only says *that* a scope changed, not *what* changed. To recover the
//! difference, the last observed contents of a remote scope are cached in
//! this unit's own scope of the same relation, under a reserved key.

use std::collections::BTreeSet;

use crate::error::CharmError;
use crate::model::{Bag, Databag, Relation, RelationStore};

/// Key prefix that data keys must never use
const CACHE_KEY: &str = "cache";

/// Keys that differ between two snapshots of the same scope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    pub added: BTreeSet<String>,
    pub changed: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl Transaction {
    /// Compares two snapshots
    pub fn between(old: &Databag, new: &Databag) -> Self {
        let added = new
            .keys()
            .filter(|k| !old.contains_key(*k))
            .cloned()
            .collect();
        let deleted = old
            .keys()
            .filter(|k| !new.contains_key(*k))
            .cloned()
            .collect();
        let changed = new
            .iter()
            .filter(|(k, v)| old.get(*k).map(|o| o != *v).unwrap_or(false))
            .map(|(k, _)| k.clone())
            .collect();

        Self {
            added,
            changed,
            deleted,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.deleted.is_empty()
    }

    /// Whether `key` was added or had its value changed
    pub fn touched(&self, key: &str) -> bool {
        self.added.contains(key) || self.changed.contains(key)
    }
}

/// Whether `key` is reserved for cached snapshots
pub fn is_reserved(key: &str) -> bool {
    key == CACHE_KEY || key.starts_with("cache/")
}

/// Strips reserved keys from a scope's contents
pub fn data_only(bag: Databag) -> Databag {
    bag.into_iter().filter(|(k, _)| !is_reserved(k)).collect()
}

/// Key under which the snapshot of `observed` is cached
pub fn cache_key(observed: &Bag) -> String {
    match observed {
        Bag::App(_) => CACHE_KEY.to_string(),
        Bag::Unit(name) => format!("{}/{}", CACHE_KEY, name),
    }
}

/// The last snapshot of `observed` cached in this unit's scope
pub fn cached<S>(store: &S, relation: &Relation, own: &Bag, observed: &Bag) -> Result<Databag, CharmError>
where
    S: RelationStore + ?Sized,
{
    let local = store.read(relation, own)?;

    match local.get(&cache_key(observed)) {
        Some(snapshot) if !snapshot.is_empty() => Ok(serde_json::from_str(snapshot)?),
        _ => Ok(Databag::new()),
    }
}

/// Diffs the current contents of `observed` against the cached snapshot and
/// advances the snapshot, so a second call without intervening writes yields
/// an empty transaction.
///
/// `own` must be this unit's scope of the same relation. Fails with
/// `RelationBroken` when called for a relation that has been torn down.
pub fn diff<S>(
    store: &mut S,
    relation: &Relation,
    own: &Bag,
    observed: &Bag,
) -> Result<Transaction, CharmError>
where
    S: RelationStore + ?Sized,
{
    let new = data_only(store.read(relation, observed)?);
    let old = cached(store, relation, own, observed)?;

    let transaction = Transaction::between(&old, &new);

    if !transaction.is_empty() {
        let mut update = Databag::new();
        update.insert(cache_key(observed), serde_json::to_string(&new)?);
        store.update_unit(relation, &update)?;
    }

    Ok(transaction)
}
