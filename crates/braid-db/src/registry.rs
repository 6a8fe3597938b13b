//! Field registry - tables of records of fields.
//!
//! The registry is a plain keyed container. Fields are created on first
//! reference; a patch naming a table, record or field the local replica has
//! never heard of simply brings it into existence with default state.
//!
//! Two replicas may create the same field concurrently with different kinds.
//! Each address therefore holds a [`FieldSlot`] with one variant per kind ever
//! written there. Every variant keeps absorbing its own patches, and readers
//! see the variant whose latest write carries the greatest id.

use braid_core::{DuplexId, Field, FieldKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Address of a field: table, record, field.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldPath {
    pub table_id: String,
    pub record_id: String,
    pub field_id: String,
}

impl FieldPath {
    pub fn new(
        table_id: impl Into<String>,
        record_id: impl Into<String>,
        field_id: impl Into<String>,
    ) -> Self {
        Self {
            table_id: table_id.into(),
            record_id: record_id.into(),
            field_id: field_id.into(),
        }
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.table_id, self.record_id, self.field_id)
    }
}

/// Every kind written to one field address.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldSlot {
    /// Per kind: the greatest id that wrote it, and its state.
    variants: BTreeMap<FieldKind, (DuplexId, Field)>,
}

impl FieldSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The variant readers see.
    pub fn current(&self) -> Option<&Field> {
        self.winner().map(|(_, (_, field))| field)
    }

    pub fn kind(&self) -> Option<FieldKind> {
        self.winner().map(|(kind, _)| *kind)
    }

    pub fn variant(&self, kind: FieldKind) -> Option<&Field> {
        self.variants.get(&kind).map(|(_, field)| field)
    }

    /// Number of kinds ever written here.
    pub fn variant_count(&self) -> usize {
        self.variants.len()
    }

    /// The variant of `kind`, created empty if missing, for a write under `at`.
    pub fn write(&mut self, kind: FieldKind, at: DuplexId) -> &mut Field {
        let (latest, field) = self
            .variants
            .entry(kind)
            .or_insert_with(|| (at, Field::new(kind)));
        *latest = (*latest).max(at);
        field
    }

    pub(crate) fn variants_mut(&mut self) -> impl Iterator<Item = &mut Field> {
        self.variants.values_mut().map(|(_, field)| field)
    }

    fn winner(&self) -> Option<(&FieldKind, &(DuplexId, Field))> {
        self.variants.iter().max_by_key(|(_, (latest, _))| *latest)
    }
}

/// A record: named fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, FieldSlot>,
}

impl Record {
    pub fn field(&self, field_id: &str) -> Option<&Field> {
        self.fields.get(field_id)?.current()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields
            .iter()
            .filter_map(|(id, slot)| Some((id.as_str(), slot.current()?)))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A table: named records.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    records: BTreeMap<String, Record>,
}

impl Table {
    pub fn record(&self, record_id: &str) -> Option<&Record> {
        self.records.get(record_id)
    }

    pub fn records(&self) -> impl Iterator<Item = (&str, &Record)> {
        self.records.iter().map(|(id, r)| (id.as_str(), r))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// All tables known to a replica.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldRegistry {
    tables: BTreeMap<String, Table>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, table_id: &str) -> Option<&Table> {
        self.tables.get(table_id)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &Table)> {
        self.tables.iter().map(|(id, t)| (id.as_str(), t))
    }

    /// The visible field at `path`.
    pub fn get(&self, path: &FieldPath) -> Option<&Field> {
        self.slot(path)?.current()
    }

    pub fn slot(&self, path: &FieldPath) -> Option<&FieldSlot> {
        self.tables
            .get(&path.table_id)?
            .records
            .get(&path.record_id)?
            .fields
            .get(&path.field_id)
    }

    pub fn contains(&self, path: &FieldPath) -> bool {
        self.slot(path).is_some()
    }

    /// Resolve the `kind` variant of a field for a write under `at`, creating
    /// it (and its table and record) if missing. The flag reports creation.
    pub fn resolve_or_create(
        &mut self,
        path: &FieldPath,
        kind: FieldKind,
        at: DuplexId,
    ) -> (&mut Field, bool) {
        let slot = self
            .tables
            .entry(path.table_id.clone())
            .or_default()
            .records
            .entry(path.record_id.clone())
            .or_default()
            .fields
            .entry(path.field_id.clone())
            .or_default();

        let created = slot.variant(kind).is_none();
        (slot.write(kind, at), created)
    }

    /// Store a slot, replacing any previous one.
    pub fn insert(&mut self, path: FieldPath, slot: FieldSlot) {
        self.tables
            .entry(path.table_id)
            .or_default()
            .records
            .entry(path.record_id)
            .or_default()
            .fields
            .insert(path.field_id, slot);
    }

    /// Iterate over every visible field with its path.
    pub fn fields(&self) -> impl Iterator<Item = (FieldPath, &Field)> {
        self.tables.iter().flat_map(|(table_id, table)| {
            table.records.iter().flat_map(move |(record_id, record)| {
                record.fields().map(move |(field_id, field)| {
                    (FieldPath::new(table_id, record_id, field_id), field)
                })
            })
        })
    }

    /// Every variant of every field, visible or not.
    pub(crate) fn fields_mut(&mut self) -> impl Iterator<Item = &mut Field> {
        self.tables
            .values_mut()
            .flat_map(|t| t.records.values_mut())
            .flat_map(|r| r.fields.values_mut())
            .flat_map(FieldSlot::variants_mut)
    }

    /// Number of field addresses across all tables.
    pub fn len(&self) -> usize {
        self.tables
            .values()
            .flat_map(|t| t.records.values())
            .map(Record::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_creates_missing_structure() {
        let mut registry = FieldRegistry::new();
        let path = FieldPath::new("tasks", "t1", "title");

        let (field, created) = registry.resolve_or_create(&path, FieldKind::Text, DuplexId::new(1, 1));
        assert!(created);
        assert_eq!(field.kind(), FieldKind::Text);

        let (_, created) = registry.resolve_or_create(&path, FieldKind::Text, DuplexId::new(2, 1));
        assert!(!created);
        assert_eq!(registry.len(), 1);
        assert!(registry.table("tasks").unwrap().record("t1").is_some());
    }

    #[test]
    fn test_fields_iteration() {
        let mut registry = FieldRegistry::new();
        let at = DuplexId::new(1, 1);
        registry.resolve_or_create(&FieldPath::new("a", "1", "x"), FieldKind::Register, at);
        registry.resolve_or_create(&FieldPath::new("a", "2", "y"), FieldKind::Map, at);
        registry.resolve_or_create(&FieldPath::new("b", "1", "z"), FieldKind::List, at);

        let paths: Vec<String> = registry.fields().map(|(p, _)| p.to_string()).collect();
        assert_eq!(paths, vec!["a/1/x", "a/2/y", "b/1/z"]);
        assert_eq!(registry.tables().count(), 2);
    }

    #[test]
    fn test_greatest_write_picks_visible_kind() {
        let mut slot = FieldSlot::new();
        slot.write(FieldKind::Text, DuplexId::new(3, 2));
        slot.write(FieldKind::Register, DuplexId::new(2, 1))
            .apply_update(braid_core::Update::Register(json!(1)), DuplexId::new(2, 1))
            .unwrap();
        assert_eq!(slot.kind(), Some(FieldKind::Text));
        assert_eq!(slot.variant_count(), 2);

        // A later register write takes over; the text variant is kept.
        slot.write(FieldKind::Register, DuplexId::new(4, 1));
        assert_eq!(slot.kind(), Some(FieldKind::Register));
        assert_eq!(slot.current().map(Field::value), Some(json!(1)));
        assert!(slot.variant(FieldKind::Text).is_some());
    }
}
