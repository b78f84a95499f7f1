//! A single mutable row.

use std::collections::BTreeSet;

use serde::{Serialize, ser::SerializeMap as _};

use crate::{DatabaseError, DatabaseValue};

/// One row's field map plus new/dirty state.
///
/// The set of field names is fixed when the record is built. A field counts as modified
/// when it was assigned a value different from the one it held; assigning the same value
/// again is a no-op.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Vec<(String, DatabaseValue)>,
    new: bool,
    modified: BTreeSet<String>,
}

impl Record {
    /// Builds a record from ordered `(name, value)` pairs. A repeated name keeps its
    /// first position and its last value.
    #[must_use]
    pub fn new(fields: Vec<(String, DatabaseValue)>, is_new: bool) -> Self {
        let mut deduped: Vec<(String, DatabaseValue)> = Vec::with_capacity(fields.len());

        for (name, value) in fields {
            if let Some(existing) = deduped.iter_mut().find(|(x, _)| *x == name) {
                existing.1 = value;
            } else {
                deduped.push((name, value));
            }
        }

        Self {
            fields: deduped,
            new: is_new,
            modified: BTreeSet::new(),
        }
    }

    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.new
    }

    pub const fn set_new(&mut self, is_new: bool) {
        self.new = is_new;
    }

    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|(x, _)| x == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn fields(&self) -> &[(String, DatabaseValue)] {
        &self.fields
    }

    /// # Errors
    ///
    /// * If `name` is not a field of this record
    pub fn get(&self, name: &str) -> Result<&DatabaseValue, DatabaseError> {
        self.fields
            .iter()
            .find(|(x, _)| x == name)
            .map(|(_, value)| value)
            .ok_or_else(|| unknown_field(name))
    }

    /// Stores `value` and marks the field modified if it differs from the stored value.
    ///
    /// # Errors
    ///
    /// * If `name` is not a field of this record
    pub fn set(&mut self, name: &str, value: impl Into<DatabaseValue>) -> Result<(), DatabaseError> {
        let (field, current) = self
            .fields
            .iter_mut()
            .find(|(x, _)| x == name)
            .ok_or_else(|| unknown_field(name))?;
        let value = same_integer_variant(current, value.into());

        if *current != value {
            *current = value;
            if !self.modified.contains(field.as_str()) {
                self.modified.insert(field.clone());
            }
        }

        Ok(())
    }

    /// Assigns several fields at once. With a non-empty `only` list, names outside of it
    /// are skipped.
    ///
    /// # Errors
    ///
    /// * If an assigned name is not a field of this record
    pub fn set_all<K, V>(
        &mut self,
        values: impl IntoIterator<Item = (K, V)>,
        only: &[&str],
    ) -> Result<(), DatabaseError>
    where
        K: AsRef<str>,
        V: Into<DatabaseValue>,
    {
        for (name, value) in values {
            let name = name.as_ref();
            if !only.is_empty() && !only.contains(&name) {
                continue;
            }
            self.set(name, value)?;
        }

        Ok(())
    }

    /// The field map, restricted to `only` when it isn't empty. Restricted output keeps
    /// declaration order and skips names the record doesn't have.
    #[must_use]
    pub fn values(&self, only: &[&str]) -> Vec<(String, DatabaseValue)> {
        self.fields
            .iter()
            .filter(|(name, _)| only.is_empty() || only.contains(&name.as_str()))
            .cloned()
            .collect()
    }

    /// Modified fields with their current values, in declaration order.
    #[must_use]
    pub fn modified(&self) -> Vec<(String, DatabaseValue)> {
        self.fields
            .iter()
            .filter(|(name, _)| self.modified.contains(name))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn is_modified(&self, name: &str) -> bool {
        self.modified.contains(name)
    }

    pub fn clear_modified(&mut self) {
        self.modified.clear();
    }
}

fn unknown_field(name: &str) -> DatabaseError {
    DatabaseError::UnknownField {
        table: None,
        field: name.to_string(),
    }
}

impl Serialize for Record {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Integers keep the signedness of the stored value when they fit, so `7u32` assigned
/// over `Int64(7)` is the same value.
fn same_integer_variant(current: &DatabaseValue, value: DatabaseValue) -> DatabaseValue {
    match (current, value) {
        (DatabaseValue::Int64(_), DatabaseValue::UInt64(value)) => {
            i64::try_from(value).map_or(DatabaseValue::UInt64(value), DatabaseValue::Int64)
        }
        (DatabaseValue::UInt64(_), DatabaseValue::Int64(value)) => {
            u64::try_from(value).map_or(DatabaseValue::Int64(value), DatabaseValue::UInt64)
        }
        (_, value) => value,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn post() -> Record {
        Record::new(
            vec![
                ("id".to_string(), DatabaseValue::Null),
                ("title".to_string(), DatabaseValue::from("")),
                ("published".to_string(), DatabaseValue::Bool(false)),
            ],
            true,
        )
    }

    #[test_log::test]
    fn set_marks_field_modified() {
        let mut record = post();
        record.set("title", "hello").unwrap();

        assert!(record.is_modified("title"));
        assert_eq!(
            record.modified(),
            vec![("title".to_string(), DatabaseValue::from("hello"))]
        );
    }

    #[test_log::test]
    fn setting_the_same_value_twice_is_idempotent() {
        let mut once = post();
        once.set("title", "x").unwrap();

        let mut twice = post();
        twice.set("title", "x").unwrap();
        twice.set("title", "x").unwrap();

        assert_eq!(once, twice);
    }

    #[test_log::test]
    fn setting_the_stored_value_does_not_mark_dirty() {
        let mut record = post();
        record.set("published", false).unwrap();

        assert!(record.modified().is_empty());
    }

    #[test_log::test]
    fn unknown_fields_are_rejected() {
        let mut record = post();

        assert!(matches!(
            record.get("nope"),
            Err(DatabaseError::UnknownField { field, .. }) if field == "nope"
        ));
        assert!(matches!(
            record.set("nope", 1),
            Err(DatabaseError::UnknownField { .. })
        ));
        assert!(record.modified().is_empty());
    }

    #[test_log::test]
    fn set_all_respects_whitelist() {
        let mut record = post();
        record
            .set_all([("title", "a"), ("nope", "b")], &["title"])
            .unwrap();

        assert_eq!(record.get("title").unwrap(), &DatabaseValue::from("a"));
        assert_eq!(record.modified().len(), 1);
    }

    #[test_log::test]
    fn values_can_be_restricted() {
        let record = post();

        assert_eq!(record.values(&[]).len(), 3);
        assert_eq!(
            record.values(&["title"]),
            vec![("title".to_string(), DatabaseValue::from(""))]
        );
    }

    #[test_log::test]
    fn unsigned_assignment_over_a_signed_value_is_unchanged() {
        let mut record = Record::new(vec![("id".to_string(), DatabaseValue::Int64(7))], false);

        record.set("id", 7u32).unwrap();
        assert!(!record.is_modified("id"));
        assert_eq!(record.get("id").unwrap(), &DatabaseValue::Int64(7));

        record.set("id", 8u64).unwrap();
        assert!(record.is_modified("id"));
        assert_eq!(record.get("id").unwrap(), &DatabaseValue::Int64(8));
    }

    #[test_log::test]
    fn signed_assignment_over_an_unsigned_value_is_unchanged() {
        let mut record = Record::new(vec![("id".to_string(), DatabaseValue::UInt64(7))], false);

        record.set("id", 7).unwrap();
        assert!(!record.is_modified("id"));

        record.set("id", -1).unwrap();
        assert_eq!(record.get("id").unwrap(), &DatabaseValue::Int64(-1));
    }

    #[test_log::test]
    fn repeated_columns_keep_the_last_value() {
        let record = Record::new(
            vec![
                ("id".to_string(), DatabaseValue::Int64(1)),
                ("id".to_string(), DatabaseValue::Int64(2)),
            ],
            false,
        );

        assert_eq!(record.fields().len(), 1);
        assert_eq!(record.get("id").unwrap(), &DatabaseValue::Int64(2));
    }

    #[test_log::test]
    fn serializes_as_json_object() {
        let mut record = post();
        record.set("id", 3).unwrap();

        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"id":3,"title":"","published":false}"#
        );
    }
}
