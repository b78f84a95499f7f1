//! Option-driven SELECT and COUNT statements.
//!
//! A [`Query`] is bound to one [`Table`] and turns a map of named options into a
//! parameterized statement. Each option is handled by a runner registered under its
//! name; a runner only fires when its option is present and is neither `null` nor
//! `false`.
//!
//! Built-in options:
//!
//! * `id` - primary key lookup; a scalar or, for composite keys, an array
//! * `text` - free-text `LIKE` search over the fields given to
//!   [`Query::with_text_search`]
//! * `use_translated` - join the translation table for the active locale (defaults to
//!   on when the table has one)
//! * `order_by` + `order_dir` - ordering by one of the selected aliases
//! * `page` + `page_size` - pagination, `page_size` in `1..=100`
//!
//! ```rust,ignore
//! let query = Query::new(posts, Arc::new("en")).with_text_search(["post_translations.title"]);
//! let records = query.find(None, &QueryOptions::new().with("text", "rust").with("page", 0).with("page_size", 25))?;
//! ```

use std::{collections::BTreeMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    DatabaseError, DatabaseValue, Params, Record, merge_params, parameter_name,
    table::{PrimaryKey, PrimaryKeyValue, Table},
};

pub const MAX_PAGE_SIZE: i64 = 100;

/// Supplies the locale used to join translation tables.
pub trait LocaleProvider: Send + Sync + fmt::Debug {
    fn current_locale(&self) -> String;
}

impl LocaleProvider for &'static str {
    fn current_locale(&self) -> String {
        (*self).to_string()
    }
}

impl LocaleProvider for String {
    fn current_locale(&self) -> String {
        self.clone()
    }
}

/// Named query options, as they would arrive from a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryOptions(BTreeMap<String, Value>);

impl QueryOptions {
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Present and neither `null` nor `false`.
    #[must_use]
    pub fn is_set(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|x| !matches!(x, Value::Null | Value::Bool(false)))
    }
}

impl From<serde_json::Map<String, Value>> for QueryOptions {
    fn from(value: serde_json::Map<String, Value>) -> Self {
        Self(value.into_iter().collect())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for QueryOptions {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectField {
    /// A column, escaped and selected under its last name segment.
    Column(String),
    /// Raw SQL, rendered as-is. Never build this from request input.
    Expression {
        expression: String,
        alias: Option<String>,
    },
}

impl SelectField {
    #[must_use]
    pub fn column(name: impl Into<String>) -> Self {
        Self::Column(name.into())
    }

    #[must_use]
    pub fn expression(expression: impl Into<String>, alias: Option<&str>) -> Self {
        Self::Expression {
            expression: expression.into(),
            alias: alias.map(ToString::to_string),
        }
    }

    fn alias(&self) -> Option<&str> {
        match self {
            Self::Column(name) => name.rsplit('.').next(),
            Self::Expression { alias, .. } => alias.as_deref(),
        }
    }
}

/// A piece of SQL plus the parameters it binds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub sql: String,
    pub params: Params,
}

impl Fragment {
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Params::new(),
        }
    }

    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// Turns one named option into a WHERE fragment. Returning `Ok(None)` contributes
/// nothing.
pub trait ConditionContributor: Send + Sync {
    /// # Errors
    ///
    /// * If the option value can't be interpreted
    fn contribute(
        &self,
        table: &Table,
        value: &Value,
        options: &QueryOptions,
    ) -> Result<Option<Fragment>, DatabaseError>;
}

impl<F> ConditionContributor for F
where
    F: Fn(&Table, &Value, &QueryOptions) -> Result<Option<Fragment>, DatabaseError> + Send + Sync,
{
    fn contribute(
        &self,
        table: &Table,
        value: &Value,
        options: &QueryOptions,
    ) -> Result<Option<Fragment>, DatabaseError> {
        self(table, value, options)
    }
}

/// Turns one named option into a complete join clause (`LEFT JOIN ... ON ...`).
pub trait JoinContributor: Send + Sync {
    /// # Errors
    ///
    /// * If the option value can't be interpreted
    fn contribute_join(
        &self,
        table: &Table,
        value: &Value,
        options: &QueryOptions,
    ) -> Result<Option<Fragment>, DatabaseError>;
}

impl<F> JoinContributor for F
where
    F: Fn(&Table, &Value, &QueryOptions) -> Result<Option<Fragment>, DatabaseError> + Send + Sync,
{
    fn contribute_join(
        &self,
        table: &Table,
        value: &Value,
        options: &QueryOptions,
    ) -> Result<Option<Fragment>, DatabaseError> {
        self(table, value, options)
    }
}

struct IdCondition;

impl ConditionContributor for IdCondition {
    fn contribute(
        &self,
        table: &Table,
        value: &Value,
        _options: &QueryOptions,
    ) -> Result<Option<Fragment>, DatabaseError> {
        let id = PrimaryKeyValue::from_json("id", value)?;
        let (sql, params) = table.primary_key_condition(&id)?;
        Ok(Some(Fragment { sql, params }))
    }
}

struct TextSearch {
    fields: Vec<String>,
}

impl ConditionContributor for TextSearch {
    fn contribute(
        &self,
        table: &Table,
        value: &Value,
        _options: &QueryOptions,
    ) -> Result<Option<Fragment>, DatabaseError> {
        let Some(text) = value.as_str().filter(|x| !x.is_empty()) else {
            return Ok(None);
        };
        if self.fields.is_empty() {
            return Ok(None);
        }

        let database = table.database();
        let pattern = format!("%{}%", text.replace('%', "\\%"));
        let escape = database.dialect().like_escape_clause();
        let mut fragment = Fragment::default();

        let terms = self
            .fields
            .iter()
            .map(|field| {
                let placeholder = parameter_name("", field);
                fragment
                    .params
                    .insert(placeholder.clone(), pattern.clone().into());
                format!(
                    "{} LIKE {placeholder}{escape}",
                    database.escape_identifier(field)
                )
            })
            .collect::<Vec<_>>();

        fragment.sql = format!("({})", terms.join(" OR "));

        Ok(Some(fragment))
    }
}

/// Which statement to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectKind {
    /// Ordered and paginated (`LIMIT 1` without pagination options).
    Find,
    /// Unordered, `LIMIT 1`.
    FindOne,
    /// `SELECT COUNT(1)`, no ordering or limit.
    Count,
}

/// A composed statement, ready for [`Database::query`](crate::Database::query).
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Params,
}

pub struct Query {
    table: Arc<Table>,
    locale: Arc<dyn LocaleProvider>,
    conditions: Vec<(String, Box<dyn ConditionContributor>)>,
    joins: Vec<(String, Box<dyn JoinContributor>)>,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("table", &self.table.name())
            .field("locale", &self.locale)
            .field(
                "conditions",
                &self.conditions.iter().map(|(x, _)| x).collect::<Vec<_>>(),
            )
            .field(
                "joins",
                &self.joins.iter().map(|(x, _)| x).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Query {
    #[must_use]
    pub fn new(table: Arc<Table>, locale: Arc<dyn LocaleProvider>) -> Self {
        Self {
            table,
            locale,
            conditions: vec![],
            joins: vec![],
        }
        .with_condition("id", IdCondition)
    }

    /// Enables the `text` option over the given columns (`table.column` or `column`).
    #[must_use]
    pub fn with_text_search<S: Into<String>>(self, fields: impl IntoIterator<Item = S>) -> Self {
        self.with_condition(
            "text",
            TextSearch {
                fields: fields.into_iter().map(Into::into).collect(),
            },
        )
    }

    /// Registers a condition runner. Registering a name twice replaces the runner and
    /// keeps its original position.
    #[must_use]
    pub fn with_condition(
        mut self,
        option: impl Into<String>,
        contributor: impl ConditionContributor + 'static,
    ) -> Self {
        let runner: Box<dyn ConditionContributor> = Box::new(contributor);
        register(&mut self.conditions, option.into(), runner);
        self
    }

    #[must_use]
    pub fn with_join(
        mut self,
        option: impl Into<String>,
        contributor: impl JoinContributor + 'static,
    ) -> Self {
        let runner: Box<dyn JoinContributor> = Box::new(contributor);
        register(&mut self.joins, option.into(), runner);
        self
    }

    #[must_use]
    pub const fn table(&self) -> &Arc<Table> {
        &self.table
    }

    /// # Errors
    ///
    /// * If an option can't be interpreted
    /// * If the statement fails
    pub fn find(
        &self,
        fields: Option<&[SelectField]>,
        options: &QueryOptions,
    ) -> Result<Vec<Record>, DatabaseError> {
        let statement = self.select_statement(SelectKind::Find, fields, options)?;

        Ok(self
            .table
            .database()
            .fetch_rows(&statement.sql, &statement.params)?
            .into_iter()
            .map(|row| self.table.hydrate(row))
            .collect())
    }

    /// # Errors
    ///
    /// * If an option can't be interpreted
    /// * If the statement fails
    pub fn find_one(
        &self,
        fields: Option<&[SelectField]>,
        options: &QueryOptions,
    ) -> Result<Option<Record>, DatabaseError> {
        let statement = self.select_statement(SelectKind::FindOne, fields, options)?;

        Ok(self
            .table
            .database()
            .fetch_row(&statement.sql, &statement.params)?
            .map(|row| self.table.hydrate(row)))
    }

    /// # Errors
    ///
    /// * If an option can't be interpreted
    /// * If the statement fails
    pub fn find_count(&self, options: &QueryOptions) -> Result<i64, DatabaseError> {
        let statement = self.count_statement(options)?;

        Ok(self
            .table
            .database()
            .fetch_scalar(&statement.sql, &statement.params, 0)?
            .and_then(|x| x.coerce(crate::ValueKind::Integer).as_i64())
            .unwrap_or(0))
    }

    /// # Errors
    ///
    /// * [`DatabaseError::PrimaryKeyShapeMismatch`] if `id` doesn't match the key
    /// * If the statement fails
    pub fn find_by_id(
        &self,
        id: impl Into<PrimaryKeyValue>,
        use_translated: bool,
    ) -> Result<Option<Record>, DatabaseError> {
        let (sql, params) = self.table.primary_key_condition(&id.into())?;

        let options = QueryOptions::new();
        let mut builder = Builder::new(self, &options, use_translated);
        let mut statement = builder.select(SelectKind::FindOne, None)?;
        builder.conditions.push(sql);
        merge_params(&mut builder.params, params)?;
        statement.push_str(&builder.where_clause());
        statement.push_str(" LIMIT 1");

        Ok(self
            .table
            .database()
            .fetch_row(&statement, &builder.params)?
            .map(|row| self.table.hydrate(row)))
    }

    /// Composes a statement without running it.
    ///
    /// # Errors
    ///
    /// * If an option can't be interpreted
    pub fn select_statement(
        &self,
        kind: SelectKind,
        fields: Option<&[SelectField]>,
        options: &QueryOptions,
    ) -> Result<Statement, DatabaseError> {
        let use_translated = self.table.has_translation_table()
            && options
                .get("use_translated")
                .filter(|x| !x.is_null())
                .is_none_or(is_truthy);

        let mut builder = Builder::new(self, options, use_translated);
        let mut sql = builder.select(kind, fields)?;
        builder.run_conditions()?;
        sql.push_str(&builder.where_clause());

        match kind {
            SelectKind::Find => {
                sql.push_str(&builder.order_clause());
                sql.push_str(&builder.limit_clause());
            }
            SelectKind::FindOne => sql.push_str(" LIMIT 1"),
            SelectKind::Count => {}
        }

        Ok(Statement {
            sql,
            params: builder.params,
        })
    }

    /// # Errors
    ///
    /// * If an option can't be interpreted
    pub fn count_statement(&self, options: &QueryOptions) -> Result<Statement, DatabaseError> {
        self.select_statement(SelectKind::Count, None, options)
    }
}

fn register<T: ?Sized>(registry: &mut Vec<(String, Box<T>)>, option: String, runner: Box<T>) {
    if let Some(existing) = registry.iter_mut().find(|(x, _)| *x == option) {
        existing.1 = runner;
    } else {
        registry.push((option, runner));
    }
}

/// State for one statement. Dropped when the statement is done.
struct Builder<'a> {
    query: &'a Query,
    options: &'a QueryOptions,
    use_translated: bool,
    params: Params,
    conditions: Vec<String>,
    orderable: Vec<String>,
}

impl<'a> Builder<'a> {
    fn new(query: &'a Query, options: &'a QueryOptions, use_translated: bool) -> Self {
        Self {
            query,
            options,
            use_translated: use_translated && query.table.has_translation_table(),
            params: Params::new(),
            conditions: vec![],
            orderable: vec![],
        }
    }

    fn escape(&self, name: &str) -> String {
        self.query.table.database().escape_identifier(name)
    }

    /// `SELECT ... FROM ...` plus every join.
    fn select(
        &mut self,
        kind: SelectKind,
        fields: Option<&[SelectField]>,
    ) -> Result<String, DatabaseError> {
        let query = self.query;
        let table = &query.table;
        let escape = |name: &str| table.database().escape_identifier(name);

        let columns = if kind == SelectKind::Count {
            "COUNT(1)".to_string()
        } else {
            match fields.filter(|x| !x.is_empty()) {
                None => table
                    .all_fields(self.use_translated)
                    .into_iter()
                    .map(|(alias, column)| {
                        let rendered = format!("{} AS {}", escape(&column), escape(&alias));
                        self.orderable.push(alias);
                        rendered
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
                Some(fields) => fields
                    .iter()
                    .map(|field| {
                        if let Some(alias) = field.alias() {
                            self.orderable.push(alias.to_string());
                        }
                        match field {
                            SelectField::Column(name) => escape(name),
                            SelectField::Expression {
                                expression,
                                alias: Some(alias),
                            } => format!("{expression} AS {}", escape(alias)),
                            SelectField::Expression {
                                expression,
                                alias: None,
                            } => expression.clone(),
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
            }
        };

        let mut sql = format!("SELECT {columns} FROM {}", escape(table.name()));

        if self.use_translated {
            sql.push(' ');
            sql.push_str(&self.translation_join()?);
        }

        for (option, contributor) in &query.joins {
            let Some(value) = self.options.get(option).filter(|_| self.options.is_set(option))
            else {
                continue;
            };
            if let Some(fragment) = contributor.contribute_join(table, value, self.options)? {
                log::trace!("select: join from option '{option}'");
                sql.push(' ');
                sql.push_str(&fragment.sql);
                merge_params(&mut self.params, fragment.params)?;
            }
        }

        Ok(sql)
    }

    fn translation_join(&mut self) -> Result<String, DatabaseError> {
        let table = &self.query.table;

        let PrimaryKey::Single(owner_key) = table.primary_key() else {
            return Err(DatabaseError::UnsupportedCompositeKeyJoin {
                table: table.name().to_string(),
            });
        };
        let Some(translation) = table.translation_table() else {
            return Ok(String::new());
        };
        let [owner_column, locale_column, ..] = translation.primary_key().columns() else {
            return Err(DatabaseError::InvalidTableDefinition {
                table: translation.name().to_string(),
                reason: "translation tables must be keyed by (owner id, locale)".into(),
            });
        };

        self.params.insert(
            ":tr_locale".to_string(),
            self.query.locale.current_locale().into(),
        );

        Ok(format!(
            "JOIN {} ON {} = {} AND {} = :tr_locale",
            self.escape(translation.name()),
            self.escape(&format!("{}.{owner_column}", translation.name())),
            self.escape(&format!("{}.{owner_key}", table.name())),
            self.escape(&format!("{}.{locale_column}", translation.name())),
        ))
    }

    fn run_conditions(&mut self) -> Result<(), DatabaseError> {
        let query = self.query;
        for (option, contributor) in &query.conditions {
            let Some(value) = self.options.get(option).filter(|_| self.options.is_set(option))
            else {
                continue;
            };
            if let Some(fragment) = contributor.contribute(&query.table, value, self.options)? {
                log::trace!("select: condition from option '{option}'");
                self.conditions.push(fragment.sql);
                merge_params(&mut self.params, fragment.params)?;
            }
        }

        Ok(())
    }

    fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    fn order_clause(&self) -> String {
        let (Some(order_by), Some(order_dir)) = (
            self.options.get("order_by").and_then(Value::as_str),
            self.options.get("order_dir").filter(|x| !x.is_null()),
        ) else {
            return String::new();
        };

        if !self.orderable.iter().any(|x| x == order_by) {
            log::debug!("select: ignoring order by unselected '{order_by}'");
            return String::new();
        }

        let direction = if order_dir
            .as_str()
            .is_some_and(|x| x.eq_ignore_ascii_case("desc"))
        {
            "desc"
        } else {
            "asc"
        };

        format!(" ORDER BY {} {direction}", self.escape(order_by))
    }

    fn limit_clause(&self) -> String {
        let (Some(page), Some(page_size)) = (
            self.options.get("page").filter(|x| !x.is_null()).map(option_integer),
            self.options
                .get("page_size")
                .filter(|x| !x.is_null())
                .map(option_integer),
        ) else {
            return " LIMIT 1".to_string();
        };

        let page = page.max(0);
        let page_size = if (1..=MAX_PAGE_SIZE).contains(&page_size) {
            page_size
        } else {
            1
        };

        format!(" LIMIT {}, {page_size}", page.saturating_mul(page_size))
    }
}

/// Reads a pagination value. Numeric strings are accepted; anything else counts as 0.
#[allow(clippy::cast_possible_truncation)]
fn option_integer(value: &Value) -> i64 {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|x| x as i64))
            .unwrap_or(0),
        Value::String(value) => {
            let value = value.trim();
            value
                .parse::<i64>()
                .ok()
                .or_else(|| value.parse::<f64>().ok().map(|x| x as i64))
                .unwrap_or(0)
        }
        Value::Bool(value) => i64::from(*value),
        Value::Null | Value::Array(_) | Value::Object(_) => 0,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(value) => *value,
        Value::Number(number) => number.as_f64().is_some_and(|x| x != 0.0),
        Value::String(value) => !value.is_empty() && value != "0",
        Value::Array(values) => !values.is_empty(),
        Value::Object(_) => true,
    }
}
