//! Table schemas and the insert/update logic for [`Record`]s.

use std::{fmt, sync::Arc};

use crate::{
    Database, DatabaseError, DatabaseValue, Params, Record, Row, ValueKind, parameter_name,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    default: DatabaseValue,
    kind: ValueKind,
}

impl Field {
    /// A field whose kind is taken from its default value. A `NULL` default makes a text
    /// field; use [`Field::nullable`] for anything else.
    #[must_use]
    pub fn new(name: impl Into<String>, default: impl Into<DatabaseValue>) -> Self {
        let default = default.into();
        let kind = ValueKind::of(&default).unwrap_or(ValueKind::Text);

        Self {
            name: name.into(),
            default,
            kind,
        }
    }

    #[must_use]
    pub fn nullable(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            default: DatabaseValue::Null,
            kind,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn default(&self) -> &DatabaseValue {
        &self.default
    }

    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        self.kind
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryKey {
    Single(String),
    Composite(Vec<String>),
}

impl PrimaryKey {
    #[must_use]
    pub fn composite<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self::Composite(columns.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        match self {
            Self::Single(column) => std::slice::from_ref(column),
            Self::Composite(columns) => columns,
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(column) => write!(f, "a single column ({column})"),
            Self::Composite(columns) => {
                write!(f, "a composite of {} ({})", columns.len(), columns.join(", "))
            }
        }
    }
}

impl From<&str> for PrimaryKey {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<String> for PrimaryKey {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl<const N: usize> From<[&str; N]> for PrimaryKey {
    fn from(value: [&str; N]) -> Self {
        Self::composite(value)
    }
}

/// The value(s) identifying one row.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimaryKeyValue {
    Single(DatabaseValue),
    Composite(Vec<DatabaseValue>),
}

impl PrimaryKeyValue {
    /// Interprets an option value: a JSON array is a composite key, a scalar a single one.
    ///
    /// # Errors
    ///
    /// * If the value, or an array element, is an object or a nested array
    pub fn from_json(option: &str, value: &serde_json::Value) -> Result<Self, DatabaseError> {
        let invalid = || DatabaseError::InvalidOption {
            option: option.to_string(),
            reason: format!("expected a scalar or a list of scalars, got {value}"),
        };

        if let serde_json::Value::Array(values) = value {
            values
                .iter()
                .map(|x| DatabaseValue::from_json(x).ok_or_else(invalid))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Composite)
        } else {
            DatabaseValue::from_json(value)
                .map(Self::Single)
                .ok_or_else(invalid)
        }
    }
}

impl fmt::Display for PrimaryKeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(value) => write!(f, "a single value ({value})"),
            Self::Composite(values) => write!(f, "a list of {} values", values.len()),
        }
    }
}

impl From<Vec<DatabaseValue>> for PrimaryKeyValue {
    fn from(value: Vec<DatabaseValue>) -> Self {
        Self::Composite(value)
    }
}

impl From<DatabaseValue> for PrimaryKeyValue {
    fn from(value: DatabaseValue) -> Self {
        Self::Single(value)
    }
}

macro_rules! single_key_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for PrimaryKeyValue {
                fn from(value: $ty) -> Self {
                    Self::Single(value.into())
                }
            }
        )*
    };
}

single_key_from!(i32, i64, u32, u64, &str, String);

#[derive(Debug)]
pub struct TableBuilder {
    name: String,
    fields: Vec<Field>,
    primary_key: PrimaryKey,
    auto_id: bool,
    translation: Option<Arc<Table>>,
}

impl TableBuilder {
    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn fields(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Defaults to `id`.
    #[must_use]
    pub fn primary_key(mut self, primary_key: impl Into<PrimaryKey>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    /// Whether the database generates the (single) primary key. Defaults to `true`.
    #[must_use]
    pub const fn auto_id(mut self, auto_id: bool) -> Self {
        self.auto_id = auto_id;
        self
    }

    #[must_use]
    pub fn translation(mut self, translation: Arc<Table>) -> Self {
        self.translation = Some(translation);
        self
    }

    /// # Errors
    ///
    /// * [`DatabaseError::InvalidTableDefinition`] if the primary key is empty or names an
    ///   undeclared field, or if the translation table isn't keyed by at least two columns
    /// * [`DatabaseError::UnsupportedCompositeKeyJoin`] if a translation table is linked
    ///   to a table with a composite key
    /// * [`DatabaseError::TranslatedFieldCollision`] if a translated field shares its name
    ///   with a field of this table
    pub fn build(self, database: Arc<Database>) -> Result<Table, DatabaseError> {
        let invalid = |reason: String| DatabaseError::InvalidTableDefinition {
            table: self.name.clone(),
            reason,
        };

        if self.primary_key.columns().is_empty() {
            return Err(invalid("the composite primary key has no columns".into()));
        }

        for column in self.primary_key.columns() {
            if !self.fields.iter().any(|x| x.name == *column) {
                return Err(invalid(format!(
                    "primary key column '{column}' is not a declared field"
                )));
            }
        }

        if let Some(translation) = &self.translation {
            if matches!(self.primary_key, PrimaryKey::Composite(_)) {
                return Err(DatabaseError::UnsupportedCompositeKeyJoin {
                    table: self.name.clone(),
                });
            }

            if !matches!(&translation.primary_key, PrimaryKey::Composite(columns) if columns.len() >= 2)
            {
                return Err(invalid(format!(
                    "translation table '{}' must be keyed by (owner id, locale)",
                    translation.name
                )));
            }

            if let Some(field) = translation
                .translated_fields()
                .find(|x| self.fields.iter().any(|own| own.name == x.name))
            {
                return Err(DatabaseError::TranslatedFieldCollision {
                    table: self.name.clone(),
                    field: field.name.clone(),
                });
            }
        }

        let auto_id = self.auto_id && matches!(self.primary_key, PrimaryKey::Single(_));

        Ok(Table {
            name: self.name,
            fields: self.fields,
            primary_key: self.primary_key,
            auto_id,
            translation: self.translation,
            database,
        })
    }
}

/// The schema of one SQL table.
///
/// A table with a single primary key may be linked to a translation table: a side table
/// keyed by `(owner id, locale)` whose remaining columns hold per-locale values. Queries
/// join it for the active locale and expose its fields next to the table's own.
#[derive(Debug)]
pub struct Table {
    name: String,
    fields: Vec<Field>,
    primary_key: PrimaryKey,
    auto_id: bool,
    translation: Option<Arc<Self>>,
    database: Arc<Database>,
}

impl Table {
    #[must_use]
    pub fn builder(name: impl Into<String>) -> TableBuilder {
        TableBuilder {
            name: name.into(),
            fields: vec![],
            primary_key: PrimaryKey::Single("id".to_string()),
            auto_id: true,
            translation: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|x| x.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|x| x.name.as_str())
    }

    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    #[must_use]
    pub const fn primary_key(&self) -> &PrimaryKey {
        &self.primary_key
    }

    #[must_use]
    pub const fn uses_auto_id(&self) -> bool {
        self.auto_id
    }

    #[must_use]
    pub const fn translation_table(&self) -> Option<&Arc<Self>> {
        self.translation.as_ref()
    }

    #[must_use]
    pub const fn has_translation_table(&self) -> bool {
        self.translation.is_some()
    }

    #[must_use]
    pub const fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// Fields that are not part of this table's primary key.
    fn translated_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .filter(|x| !self.primary_key.columns().contains(&x.name))
    }

    /// A new record holding every declared default.
    #[must_use]
    pub fn create(&self) -> Record {
        self.record_from_defaults(true)
    }

    /// Like [`Table::create`], for rows known to exist already.
    #[must_use]
    pub fn create_existing(&self) -> Record {
        self.record_from_defaults(false)
    }

    fn record_from_defaults(&self, is_new: bool) -> Record {
        Record::new(
            self.fields
                .iter()
                .map(|x| (x.name.clone(), x.default.clone()))
                .collect(),
            is_new,
        )
    }

    /// Inserts new records and updates existing ones.
    ///
    /// An insert writes every field except a generated key, then stores the generated
    /// key in the record. An update writes only modified fields and issues nothing when
    /// there are none. Both clear the modified set on success.
    ///
    /// # Errors
    ///
    /// * [`DatabaseError::UnknownField`] if a field being saved is not declared
    /// * If the statement fails
    pub fn save(&self, record: &mut Record) -> Result<(), DatabaseError> {
        if record.is_new() {
            self.insert(record)
        } else {
            self.update(record)
        }
    }

    fn insert(&self, record: &mut Record) -> Result<(), DatabaseError> {
        let values = self.save_data(record.fields())?;

        if self.auto_id
            && let PrimaryKey::Single(column) = &self.primary_key
        {
            let mut id = self.database.insert_returning_id(&self.name, &values)?;
            if let Some(field) = self.field(column) {
                id = id.coerce(field.kind);
            }
            log::debug!("insert: '{}' generated {column} {id}", self.name);
            record.set(column, id)?;
        } else {
            self.database.insert(&self.name, &values)?;
        }

        record.set_new(false);
        record.clear_modified();

        Ok(())
    }

    fn update(&self, record: &mut Record) -> Result<(), DatabaseError> {
        let values = self.save_data(&record.modified())?;

        if values.is_empty() {
            log::trace!("update: no modified fields on '{}'", self.name);
            return Ok(());
        }

        let id = self.primary_key_value(record)?;
        let (condition, params) = self.primary_key_condition(&id)?;

        self.database
            .update(&self.name, &values, Some(&condition), &params)?;
        record.clear_modified();

        Ok(())
    }

    /// Checks that every name is declared and drops a generated key.
    fn save_data(
        &self,
        values: &[(String, DatabaseValue)],
    ) -> Result<Vec<(String, DatabaseValue)>, DatabaseError> {
        let mut data = Vec::with_capacity(values.len());

        for (name, value) in values {
            if !self.has_field(name) {
                return Err(DatabaseError::UnknownField {
                    table: Some(self.name.clone()),
                    field: name.clone(),
                });
            }
            if self.auto_id && self.primary_key.columns().contains(name) {
                continue;
            }
            data.push((name.clone(), value.clone()));
        }

        Ok(data)
    }

    /// The key value(s) currently held by `record`.
    ///
    /// # Errors
    ///
    /// * [`DatabaseError::UnknownField`] if the record lacks a key column
    pub fn primary_key_value(&self, record: &Record) -> Result<PrimaryKeyValue, DatabaseError> {
        Ok(match &self.primary_key {
            PrimaryKey::Single(column) => PrimaryKeyValue::Single(record.get(column)?.clone()),
            PrimaryKey::Composite(columns) => PrimaryKeyValue::Composite(
                columns
                    .iter()
                    .map(|x| record.get(x).cloned())
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        })
    }

    /// Builds `(`t`.`id` = :pk_id)` with its parameters. Composite keys AND one term per
    /// column.
    ///
    /// # Errors
    ///
    /// * [`DatabaseError::PrimaryKeyShapeMismatch`] if `id` doesn't have the declared
    ///   shape or arity
    pub fn primary_key_condition(
        &self,
        id: &PrimaryKeyValue,
    ) -> Result<(String, Params), DatabaseError> {
        let terms: Vec<(&String, &DatabaseValue)> = match (&self.primary_key, id) {
            (PrimaryKey::Single(column), PrimaryKeyValue::Single(value)) => vec![(column, value)],
            (PrimaryKey::Composite(columns), PrimaryKeyValue::Composite(values))
                if columns.len() == values.len() =>
            {
                columns.iter().zip(values).collect()
            }
            (expected, actual) => {
                return Err(DatabaseError::PrimaryKeyShapeMismatch {
                    table: self.name.clone(),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        };

        let mut params = Params::new();
        let condition = terms
            .into_iter()
            .map(|(column, value)| {
                let placeholder = parameter_name("pk_", column);
                let term = format!(
                    "{} = {placeholder}",
                    self.database
                        .escape_identifier(&format!("{}.{column}", self.name))
                );
                params.insert(placeholder, value.clone());
                term
            })
            .collect::<Vec<_>>()
            .join(" AND ");

        Ok((format!("({condition})"), params))
    }

    /// Deletes the row identified by `id`, returning the number of deleted rows.
    ///
    /// # Errors
    ///
    /// * [`DatabaseError::PrimaryKeyShapeMismatch`] if `id` doesn't match the key
    /// * If the statement fails
    pub fn delete_by_id(&self, id: impl Into<PrimaryKeyValue>) -> Result<u64, DatabaseError> {
        let (condition, params) = self.primary_key_condition(&id.into())?;

        let mut sql = format!(
            "DELETE FROM {} WHERE {condition}",
            self.database.escape_identifier(&self.name)
        );
        if self.database.dialect().supports_delete_limit() {
            sql.push_str(" LIMIT 1");
        }

        self.database.execute(&sql, &params)
    }

    /// `(alias, qualified column)` pairs for a full select. Translated fields are added
    /// when requested and a translation table exists, without its key columns.
    #[must_use]
    pub fn all_fields(&self, include_translated: bool) -> Vec<(String, String)> {
        let own = self
            .fields
            .iter()
            .map(|x| (x.name.clone(), format!("{}.{}", self.name, x.name)));

        let translated = self
            .translation
            .iter()
            .filter(|_| include_translated)
            .flat_map(|translation| {
                translation
                    .translated_fields()
                    .map(|x| (x.name.clone(), format!("{}.{}", translation.name, x.name)))
            });

        own.chain(translated).collect()
    }

    /// The declared kind of an own or translated field.
    #[must_use]
    pub fn kind_of(&self, name: &str) -> Option<ValueKind> {
        self.field(name)
            .or_else(|| {
                self.translation
                    .as_ref()
                    .and_then(|translation| translation.translated_fields().find(|x| x.name == name))
            })
            .map(|x| x.kind)
    }

    /// Turns a fetched row into an existing record, coercing declared fields to their
    /// kinds. Columns the table doesn't declare are kept as read.
    #[must_use]
    pub fn hydrate(&self, row: Row) -> Record {
        Record::new(
            row.columns
                .into_iter()
                .map(|(name, value)| {
                    let value = match self.kind_of(&name) {
                        Some(kind) => value.coerce(kind),
                        None => value,
                    };
                    (name, value)
                })
                .collect(),
            false,
        )
    }
}

#[cfg(all(test, feature = "simulator"))]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::{Dialect, simulator::SimulationConnector};

    use super::*;

    fn mysql() -> Arc<Database> {
        Arc::new(Database::new(
            "default",
            SimulationConnector::new().with_dialect(Dialect::MySql),
        ))
    }

    fn posts(database: Arc<Database>) -> Table {
        Table::builder("posts")
            .field(Field::nullable("id", ValueKind::Integer))
            .field(Field::new("author", ""))
            .field(Field::new("published", false))
            .build(database)
            .unwrap()
    }

    fn post_translations(database: Arc<Database>) -> Arc<Table> {
        Arc::new(
            Table::builder("post_translations")
                .field(Field::nullable("post_id", ValueKind::Integer))
                .field(Field::new("locale", "en"))
                .field(Field::new("title", ""))
                .primary_key(["post_id", "locale"])
                .auto_id(false)
                .build(database)
                .unwrap(),
        )
    }

    #[test_log::test]
    fn single_key_condition() {
        let table = posts(mysql());

        let (condition, params) = table.primary_key_condition(&7.into()).unwrap();

        assert_eq!(condition, "(`posts`.`id` = :pk_id)");
        assert_eq!(
            params,
            [(":pk_id".to_string(), DatabaseValue::Int64(7))]
                .into_iter()
                .collect()
        );
    }

    #[test_log::test]
    fn composite_key_condition() {
        let table = post_translations(mysql());

        let (condition, params) = table
            .primary_key_condition(&PrimaryKeyValue::Composite(vec![1.into(), "de".into()]))
            .unwrap();

        assert_eq!(
            condition,
            "(`post_translations`.`post_id` = :pk_post_id AND `post_translations`.`locale` = :pk_locale)"
        );
        assert_eq!(params.len(), 2);
        assert_eq!(params[":pk_locale"], DatabaseValue::from("de"));
    }

    #[test_log::test]
    fn key_shape_must_match() {
        let table = posts(mysql());
        let composite = post_translations(mysql());

        assert!(matches!(
            table.primary_key_condition(&PrimaryKeyValue::Composite(vec![1.into(), 2.into()])),
            Err(DatabaseError::PrimaryKeyShapeMismatch { .. })
        ));
        assert!(matches!(
            composite.primary_key_condition(&1.into()),
            Err(DatabaseError::PrimaryKeyShapeMismatch { .. })
        ));
        assert!(matches!(
            composite.primary_key_condition(&PrimaryKeyValue::Composite(vec![1.into()])),
            Err(DatabaseError::PrimaryKeyShapeMismatch { .. })
        ));
    }

    #[test_log::test]
    fn create_uses_defaults() {
        let table = posts(mysql());
        let record = table.create();

        assert!(record.is_new());
        assert!(record.modified().is_empty());
        assert_eq!(
            record.fields(),
            &[
                ("id".to_string(), DatabaseValue::Null),
                ("author".to_string(), DatabaseValue::from("")),
                ("published".to_string(), DatabaseValue::Bool(false)),
            ]
        );
        assert!(!table.create_existing().is_new());
    }

    #[test_log::test]
    fn all_fields_skips_translation_keys() {
        let db = mysql();
        let table = Table::builder("posts")
            .field(Field::nullable("id", ValueKind::Integer))
            .field(Field::new("author", ""))
            .translation(post_translations(db.clone()))
            .build(db)
            .unwrap();

        assert_eq!(
            table.all_fields(true),
            vec![
                ("id".to_string(), "posts.id".to_string()),
                ("author".to_string(), "posts.author".to_string()),
                ("title".to_string(), "post_translations.title".to_string()),
            ]
        );
        assert_eq!(table.all_fields(false).len(), 2);
    }

    #[test_log::test]
    fn composite_tables_cannot_have_translations() {
        let db = mysql();
        let result = Table::builder("pairs")
            .field(Field::new("a", 0))
            .field(Field::new("b", 0))
            .primary_key(["a", "b"])
            .translation(post_translations(db.clone()))
            .build(db);

        assert!(matches!(
            result,
            Err(DatabaseError::UnsupportedCompositeKeyJoin { table }) if table == "pairs"
        ));
    }

    #[test_log::test]
    fn translation_tables_need_composite_keys() {
        let db = mysql();
        let result = Table::builder("posts")
            .field(Field::nullable("id", ValueKind::Integer))
            .translation(Arc::new(posts(db.clone())))
            .build(db);

        assert!(matches!(
            result,
            Err(DatabaseError::InvalidTableDefinition { .. })
        ));
    }

    #[test_log::test]
    fn translated_fields_must_not_collide() {
        let db = mysql();
        let result = Table::builder("posts")
            .field(Field::nullable("id", ValueKind::Integer))
            .field(Field::new("title", ""))
            .translation(post_translations(db.clone()))
            .build(db);

        assert!(matches!(
            result,
            Err(DatabaseError::TranslatedFieldCollision { field, .. }) if field == "title"
        ));
    }

    #[test_log::test]
    fn primary_key_must_be_declared() {
        let result = Table::builder("posts")
            .field(Field::new("title", ""))
            .build(mysql());

        assert!(matches!(
            result,
            Err(DatabaseError::InvalidTableDefinition { .. })
        ));
    }

    #[test_log::test]
    fn composite_keys_are_never_generated() {
        let db = mysql();

        assert!(posts(db.clone()).uses_auto_id());
        assert!(!post_translations(db.clone()).uses_auto_id());

        let forced = Table::builder("pairs")
            .field(Field::new("a", 0))
            .field(Field::new("b", 0))
            .primary_key(["a", "b"])
            .auto_id(true)
            .build(db)
            .unwrap();
        assert!(!forced.uses_auto_id());
    }

    #[test_log::test]
    fn delete_limits_to_one_row_on_mysql() {
        let connector = SimulationConnector::new().with_dialect(Dialect::MySql);
        let log = connector.log();
        let table = posts(Arc::new(Database::new("default", connector)));

        // Executed on SQLite, which rejects DELETE ... LIMIT; only the text matters here.
        let _ = table.delete_by_id(3);

        assert_eq!(
            log.statements()[0].sql,
            "DELETE FROM `posts` WHERE (`posts`.`id` = :pk_id) LIMIT 1"
        );
    }

    #[test_log::test]
    fn delete_has_no_limit_on_sqlite() {
        let connector = SimulationConnector::new()
            .with_setup("CREATE TABLE posts (id INTEGER PRIMARY KEY, author TEXT, published INTEGER)");
        let log = connector.log();
        let table = posts(Arc::new(Database::new("default", connector)));

        let deleted = table.delete_by_id(3).unwrap();

        assert_eq!(deleted, 0);
        assert_eq!(
            log.statements()[0].sql,
            "DELETE FROM \"posts\" WHERE (\"posts\".\"id\" = :pk_id)"
        );
    }

    #[test_log::test]
    fn hydrate_coerces_declared_kinds() {
        let table = posts(mysql());

        let record = table.hydrate(Row {
            columns: vec![
                ("id".to_string(), DatabaseValue::UInt64(4)),
                ("published".to_string(), DatabaseValue::Int64(1)),
                ("extra".to_string(), DatabaseValue::Int64(1)),
            ],
        });

        assert!(!record.is_new());
        assert_eq!(record.get("id").unwrap(), &DatabaseValue::Int64(4));
        assert_eq!(record.get("published").unwrap(), &DatabaseValue::Bool(true));
        assert_eq!(record.get("extra").unwrap(), &DatabaseValue::Int64(1));
    }
}
