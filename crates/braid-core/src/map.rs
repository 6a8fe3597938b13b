//! Map field - a key/value mapping where every key is an independent
//! last-writer-wins register.
//!
//! Deleting a key writes a `None` entry under the deleting transaction's id,
//! so a concurrent older write cannot bring the key back. Updates and patches
//! only carry the keys they touch.
//!
//! On the wire every entry is tagged as `{"set": value}` or `"remove"`; a bare
//! option would encode a stored JSON `null` exactly like a removal.

use crate::compose::Compose;
use crate::duplex::DuplexId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// A batch of key writes; `None` removes the key.
pub type MapUpdate = BTreeMap<String, Option<Value>>;

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum EntryRef<'a> {
    Set(&'a Value),
    Remove,
}

impl<'a> From<&'a Option<Value>> for EntryRef<'a> {
    fn from(entry: &'a Option<Value>) -> Self {
        match entry {
            Some(value) => EntryRef::Set(value),
            None => EntryRef::Remove,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum Entry {
    Set(Value),
    Remove,
}

impl From<Entry> for Option<Value> {
    fn from(entry: Entry) -> Self {
        match entry {
            Entry::Set(value) => Some(value),
            Entry::Remove => None,
        }
    }
}

/// Tagged encoding of [`MapUpdate`].
mod tagged_entries {
    use super::*;

    pub fn serialize<S: Serializer>(entries: &MapUpdate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(entries.iter().map(|(key, entry)| (key, EntryRef::from(entry))))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<MapUpdate, D::Error> {
        let tagged = BTreeMap::<String, Entry>::deserialize(deserializer)?;
        Ok(tagged.into_iter().map(|(key, entry)| (key, entry.into())).collect())
    }
}

/// Tagged encoding of per-key write histories.
mod tagged_history {
    use super::*;

    type History = BTreeMap<String, Vec<(DuplexId, Option<Value>)>>;

    pub fn serialize<S: Serializer>(history: &History, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(history.iter().map(|(key, writes)| {
            let writes: Vec<(DuplexId, EntryRef<'_>)> =
                writes.iter().map(|(id, entry)| (*id, EntryRef::from(entry))).collect();
            (key, writes)
        }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<History, D::Error> {
        let tagged = BTreeMap::<String, Vec<(DuplexId, Entry)>>::deserialize(deserializer)?;
        Ok(tagged
            .into_iter()
            .map(|(key, writes)| {
                let writes = writes.into_iter().map(|(id, entry)| (id, entry.into())).collect();
                (key, writes)
            })
            .collect())
    }
}

/// Before/after state of one key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyChange {
    pub previous: Option<Value>,
    pub current: Option<Value>,
}

/// Observer-facing delta of a map.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MapChange {
    pub keys: BTreeMap<String, KeyChange>,
}

impl MapChange {
    /// Keys whose value appeared or was replaced.
    pub fn added_items(&self) -> BTreeMap<&str, &Value> {
        self.keys
            .iter()
            .filter_map(|(k, c)| match (&c.previous, &c.current) {
                (prev, Some(cur)) if prev.as_ref() != Some(cur) => Some((k.as_str(), cur)),
                _ => None,
            })
            .collect()
    }

    /// Keys that disappeared.
    pub fn removed_items(&self) -> BTreeMap<&str, &Value> {
        self.keys
            .iter()
            .filter_map(|(k, c)| match (&c.previous, &c.current) {
                (Some(prev), None) => Some((k.as_str(), prev)),
                _ => None,
            })
            .collect()
    }

    pub fn is_noop(&self) -> bool {
        self.keys.values().all(|c| c.previous == c.current)
    }
}

impl Compose for MapChange {
    fn compose(mut self, later: Self) -> Self {
        for (key, change) in later.keys {
            match self.keys.get_mut(&key) {
                Some(existing) => existing.current = change.current,
                None => {
                    self.keys.insert(key, change);
                }
            }
        }
        self
    }
}

/// Wire-level delta of a map: the touched keys and the id they were
/// written under.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapPatch {
    pub id: DuplexId,
    #[serde(with = "tagged_entries")]
    pub entries: MapUpdate,
}

impl Compose for MapPatch {
    fn compose(mut self, later: Self) -> Self {
        self.id = self.id.max(later.id);
        self.entries.extend(later.entries);
        self
    }
}

/// Per-key last-writer-wins map.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MapField {
    value: BTreeMap<String, Value>,
    /// Per-key write history, sorted by id descending.
    #[serde(with = "tagged_history")]
    history: BTreeMap<String, Vec<(DuplexId, Option<Value>)>>,
}

impl MapField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> &BTreeMap<String, Value> {
        &self.value
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.value.get(key)
    }

    pub fn history(&self, key: &str) -> &[(DuplexId, Option<Value>)] {
        self.history.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn apply_update(&mut self, update: MapUpdate, id: DuplexId) -> (MapChange, MapPatch) {
        let mut change = MapChange::default();
        for (key, value) in &update {
            let key_change = self.integrate(key, id, value.clone());
            change.keys.insert(key.clone(), key_change);
        }
        (change, MapPatch { id, entries: update })
    }

    pub fn apply_patch(&mut self, patch: &MapPatch) -> MapChange {
        let mut change = MapChange::default();
        for (key, value) in &patch.entries {
            let key_change = self.integrate(key, patch.id, value.clone());
            change.keys.insert(key.clone(), key_change);
        }
        change
    }

    fn integrate(&mut self, key: &str, id: DuplexId, value: Option<Value>) -> KeyChange {
        let previous = self.value.get(key).cloned();
        let history = self.history.entry(key.to_string()).or_default();
        match history.binary_search_by(|(existing, _)| id.cmp(existing)) {
            Ok(pos) => history[pos].1 = value,
            Err(pos) => history.insert(pos, (id, value)),
        }

        match history.first().and_then(|(_, head)| head.clone()) {
            Some(head) => {
                self.value.insert(key.to_string(), head);
            }
            None => {
                self.value.remove(key);
            }
        }

        KeyChange {
            previous,
            current: self.value.get(key).cloned(),
        }
    }

    /// Drop losing writes at or below `stable_version`. A key whose winning
    /// write is a stable removal is forgotten entirely.
    pub fn compact(&mut self, stable_version: u64) -> usize {
        let mut pruned = 0;
        self.history.retain(|_, entries| {
            let before = entries.len();
            let mut index = 0;
            entries.retain(|(id, _)| {
                let keep = index == 0 || id.version > stable_version;
                index += 1;
                keep
            });
            pruned += before - entries.len();

            match entries.first() {
                Some((id, None)) if entries.len() == 1 && id.version <= stable_version => {
                    pruned += 1;
                    false
                }
                _ => true,
            }
        });
        pruned
    }
}
