//! `where` predicates and their compilation to SQL.
//!
//! Filters name fields and relations by string and are checked against the
//! entity [`Schema`] while they are compiled, so a bad field name or an
//! operator that does not apply to a column surfaces as
//! [`Error::Validation`] before anything is sent to the database.

use sqlx::{QueryBuilder, Sqlite};

use crate::{
    error::{Error, Result},
    schema::{Field, FieldKind, Relation, RelationKind, Schema},
    value::{format_timestamp, parse_timestamp, Value},
};

pub(crate) type Sql = QueryBuilder<'static, Sqlite>;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All(Vec<Filter>),
    Any(Vec<Filter>),
    Not(Box<Filter>),
    Field {
        field: String,
        condition: Condition,
    },
    Relation {
        relation: String,
        condition: RelationCondition,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals(Value),
    NotEquals(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    Text {
        op: TextOp,
        value: String,
        mode: QueryMode,
    },
    /// List contains the element.
    Has(String),
    HasEvery(Vec<String>),
    HasSome(Vec<String>),
    IsEmpty(bool),
    Json(JsonFilter),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOp {
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryMode {
    #[default]
    Default,
    Insensitive,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelationCondition {
    Is(Box<Filter>),
    IsNot(Box<Filter>),
    Some(Box<Filter>),
    Every(Box<Filter>),
    None(Box<Filter>),
}

/// Structural filter on a JSON column. `path` uses SQLite JSON path syntax
/// (`$.a.b[0]`) and defaults to the document root.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonFilter {
    pub path: Option<String>,
    pub op: JsonOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JsonOp {
    Equals(serde_json::Value),
    NotEquals(serde_json::Value),
    StringContains(String),
    StringStartsWith(String),
    StringEndsWith(String),
    /// Array holds the element, or every element when given an array.
    ArrayContains(serde_json::Value),
    ArrayStartsWith(serde_json::Value),
    ArrayEndsWith(serde_json::Value),
}

impl JsonFilter {
    pub fn new(op: JsonOp) -> Self {
        Self { path: None, op }
    }

    pub fn at(path: impl Into<String>, op: JsonOp) -> Self {
        Self {
            path: Some(path.into()),
            op,
        }
    }
}

impl Filter {
    pub fn field(name: impl Into<String>) -> FieldFilter {
        FieldFilter { field: name.into() }
    }

    pub fn relation(name: impl Into<String>) -> RelationFilter {
        RelationFilter {
            relation: name.into(),
        }
    }

    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::All(filters.into_iter().collect())
    }

    pub fn any(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Any(filters.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::All(mut filters) => {
                filters.push(other);
                Filter::All(filters)
            }
            this => Filter::All(vec![this, other]),
        }
    }
}

/// Builder returned by [`Filter::field`].
pub struct FieldFilter {
    field: String,
}

impl FieldFilter {
    pub fn condition(self, condition: Condition) -> Filter {
        Filter::Field {
            field: self.field,
            condition,
        }
    }

    pub fn equals(self, value: impl Into<Value>) -> Filter {
        self.condition(Condition::Equals(value.into()))
    }

    pub fn not_equals(self, value: impl Into<Value>) -> Filter {
        self.condition(Condition::NotEquals(value.into()))
    }

    pub fn is_null(self) -> Filter {
        self.condition(Condition::Equals(Value::Null))
    }

    pub fn is_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Filter {
        self.condition(Condition::In(values.into_iter().map(Into::into).collect()))
    }

    pub fn not_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Filter {
        self.condition(Condition::NotIn(values.into_iter().map(Into::into).collect()))
    }

    pub fn lt(self, value: impl Into<Value>) -> Filter {
        self.condition(Condition::Lt(value.into()))
    }

    pub fn lte(self, value: impl Into<Value>) -> Filter {
        self.condition(Condition::Lte(value.into()))
    }

    pub fn gt(self, value: impl Into<Value>) -> Filter {
        self.condition(Condition::Gt(value.into()))
    }

    pub fn gte(self, value: impl Into<Value>) -> Filter {
        self.condition(Condition::Gte(value.into()))
    }

    pub fn contains(self, value: impl Into<String>) -> Filter {
        self.text(TextOp::Contains, value, QueryMode::Default)
    }

    pub fn starts_with(self, value: impl Into<String>) -> Filter {
        self.text(TextOp::StartsWith, value, QueryMode::Default)
    }

    pub fn ends_with(self, value: impl Into<String>) -> Filter {
        self.text(TextOp::EndsWith, value, QueryMode::Default)
    }

    pub fn text(self, op: TextOp, value: impl Into<String>, mode: QueryMode) -> Filter {
        self.condition(Condition::Text {
            op,
            value: value.into(),
            mode,
        })
    }

    pub fn has(self, value: impl Into<String>) -> Filter {
        self.condition(Condition::Has(value.into()))
    }

    pub fn has_every<S: Into<String>>(self, values: impl IntoIterator<Item = S>) -> Filter {
        self.condition(Condition::HasEvery(values.into_iter().map(Into::into).collect()))
    }

    pub fn has_some<S: Into<String>>(self, values: impl IntoIterator<Item = S>) -> Filter {
        self.condition(Condition::HasSome(values.into_iter().map(Into::into).collect()))
    }

    pub fn is_empty(self, empty: bool) -> Filter {
        self.condition(Condition::IsEmpty(empty))
    }

    pub fn json(self, filter: JsonFilter) -> Filter {
        self.condition(Condition::Json(filter))
    }
}

/// Builder returned by [`Filter::relation`].
pub struct RelationFilter {
    relation: String,
}

impl RelationFilter {
    fn condition(self, condition: RelationCondition) -> Filter {
        Filter::Relation {
            relation: self.relation,
            condition,
        }
    }

    pub fn is(self, filter: Filter) -> Filter {
        self.condition(RelationCondition::Is(Box::new(filter)))
    }

    pub fn is_not(self, filter: Filter) -> Filter {
        self.condition(RelationCondition::IsNot(Box::new(filter)))
    }

    pub fn some(self, filter: Filter) -> Filter {
        self.condition(RelationCondition::Some(Box::new(filter)))
    }

    pub fn every(self, filter: Filter) -> Filter {
        self.condition(RelationCondition::Every(Box::new(filter)))
    }

    pub fn none(self, filter: Filter) -> Filter {
        self.condition(RelationCondition::None(Box::new(filter)))
    }
}

/// A value checked against its column, ready to bind.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Bound {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

fn kind_name(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Id | FieldKind::Text => "string",
        FieldKind::Int => "int",
        FieldKind::Float => "float",
        FieldKind::Bool => "bool",
        FieldKind::Timestamp => "timestamp",
        FieldKind::Enum(_) => "enum",
        FieldKind::StringList => "string list",
        FieldKind::Json => "json",
    }
}

pub(crate) fn coerce(field: &Field, value: &Value) -> Result<Bound> {
    if value.is_null() {
        return if field.nullable {
            Ok(Bound::Null)
        } else {
            Err(Error::validation(format!(
                "field `{}` is required and cannot be null",
                field.name
            )))
        };
    }
    match (field.kind, value) {
        (FieldKind::Id | FieldKind::Text, Value::Text(s)) => Ok(Bound::Text(s.clone())),
        (FieldKind::Enum(variants), Value::Text(s)) => {
            if variants.contains(&s.as_str()) {
                Ok(Bound::Text(s.clone()))
            } else {
                Err(Error::validation(format!(
                    "`{s}` is not a valid value for `{}`, expected one of {variants:?}",
                    field.name
                )))
            }
        }
        (FieldKind::Int, Value::Int(i)) => Ok(Bound::Int(*i)),
        (FieldKind::Float, Value::Int(i)) => Ok(Bound::Float(*i as f64)),
        (FieldKind::Float, Value::Float(f)) => Ok(Bound::Float(*f)),
        (FieldKind::Bool, Value::Bool(b)) => Ok(Bound::Bool(*b)),
        (FieldKind::Timestamp, Value::Timestamp(ts)) => Ok(Bound::Text(format_timestamp(ts))),
        (FieldKind::Timestamp, Value::Text(s)) => parse_timestamp(s)
            .map(|ts| Bound::Text(format_timestamp(&ts)))
            .ok_or_else(|| {
                Error::validation(format!(
                    "`{s}` is not an RFC 3339 timestamp for `{}`",
                    field.name
                ))
            }),
        (FieldKind::StringList, Value::Json(list @ serde_json::Value::Array(items)))
            if items.iter().all(serde_json::Value::is_string) =>
        {
            Ok(Bound::Text(list.to_string()))
        }
        (FieldKind::Json, value) => Ok(Bound::Text(value.to_json().to_string())),
        (kind, value) => Err(Error::validation(format!(
            "field `{}` expects a {}, got {}",
            field.name,
            kind_name(kind),
            value.type_name()
        ))),
    }
}

pub(crate) fn push_bound(qb: &mut Sql, bound: Bound) {
    match bound {
        Bound::Null => qb.push("NULL"),
        Bound::Bool(b) => qb.push_bind(b),
        Bound::Int(i) => qb.push_bind(i),
        Bound::Float(f) => qb.push_bind(f),
        Bound::Text(s) => qb.push_bind(s),
    };
}

pub(crate) fn push_value(qb: &mut Sql, field: &Field, value: &Value) -> Result<()> {
    push_bound(qb, coerce(field, value)?);
    Ok(())
}

pub(crate) fn push_filter(qb: &mut Sql, schema: &'static Schema, filter: &Filter) -> Result<()> {
    match filter {
        Filter::All(filters) => push_joined(qb, schema, filters, " AND ", "1"),
        Filter::Any(filters) => push_joined(qb, schema, filters, " OR ", "0"),
        Filter::Not(inner) => {
            qb.push("((");
            push_filter(qb, schema, inner)?;
            qb.push(") IS NOT 1)");
            Ok(())
        }
        Filter::Field { field, condition } => {
            let field = schema.field(field)?;
            push_condition(qb, &schema.column(field.name), field, condition)
        }
        Filter::Relation {
            relation,
            condition,
        } => push_relation(qb, schema, schema.relation(relation)?, condition),
    }
}

fn push_joined(
    qb: &mut Sql,
    schema: &'static Schema,
    filters: &[Filter],
    separator: &str,
    empty: &str,
) -> Result<()> {
    if filters.is_empty() {
        qb.push(empty);
        return Ok(());
    }
    qb.push("(");
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 {
            qb.push(separator);
        }
        push_filter(qb, schema, filter)?;
    }
    qb.push(")");
    Ok(())
}

fn push_relation(
    qb: &mut Sql,
    schema: &'static Schema,
    relation: &'static Relation,
    condition: &RelationCondition,
) -> Result<()> {
    let target = relation.target.schema();
    match (relation.kind, condition) {
        (
            RelationKind::BelongsTo { foreign_key },
            RelationCondition::Is(inner) | RelationCondition::IsNot(inner),
        ) => {
            let op = if matches!(condition, RelationCondition::Is(_)) {
                " IN "
            } else {
                " NOT IN "
            };
            qb.push(schema.column(foreign_key))
                .push(op)
                .push("(SELECT ")
                .push(target.id_column())
                .push(format!(" FROM \"{}\" WHERE ", target.table));
            push_filter(qb, target, inner)?;
            qb.push(")");
        }
        (
            RelationKind::HasMany { foreign_key },
            RelationCondition::Some(inner)
            | RelationCondition::None(inner)
            | RelationCondition::Every(inner),
        ) => {
            let op = if matches!(condition, RelationCondition::Some(_)) {
                " IN "
            } else {
                " NOT IN "
            };
            qb.push(schema.id_column())
                .push(op)
                .push("(SELECT ")
                .push(target.column(foreign_key))
                .push(format!(" FROM \"{}\" WHERE ", target.table));
            if matches!(condition, RelationCondition::Every(_)) {
                qb.push("((");
                push_filter(qb, target, inner)?;
                qb.push(") IS NOT 1)");
            } else {
                push_filter(qb, target, inner)?;
            }
            qb.push(")");
        }
        (RelationKind::BelongsTo { .. }, _) => {
            return Err(Error::validation(format!(
                "relation `{}` on {} points at a single record, use `is` or `is_not`",
                relation.name, schema.model
            )))
        }
        (RelationKind::HasMany { .. }, _) => {
            return Err(Error::validation(format!(
                "relation `{}` on {} is a list, use `some`, `every` or `none`",
                relation.name, schema.model
            )))
        }
    }
    Ok(())
}

fn unsupported(field: &Field, op: &str) -> Error {
    Error::validation(format!(
        "`{op}` cannot be applied to {} field `{}`",
        kind_name(field.kind),
        field.name
    ))
}

/// Compiles one condition against `expr`, which is either a column or an
/// aggregate expression described by `field`.
pub(crate) fn push_condition(
    qb: &mut Sql,
    expr: &str,
    field: &Field,
    condition: &Condition,
) -> Result<()> {
    match condition {
        Condition::Equals(value) => push_equals(qb, expr, field, value, false),
        Condition::NotEquals(value) => push_equals(qb, expr, field, value, true),
        Condition::In(values) => push_in(qb, expr, field, values, false),
        Condition::NotIn(values) => push_in(qb, expr, field, values, true),
        Condition::Lt(value) => push_compare(qb, expr, field, "<", value),
        Condition::Lte(value) => push_compare(qb, expr, field, "<=", value),
        Condition::Gt(value) => push_compare(qb, expr, field, ">", value),
        Condition::Gte(value) => push_compare(qb, expr, field, ">=", value),
        Condition::Text { op, value, mode } => push_text(qb, expr, field, *op, value, *mode),
        Condition::Has(value) => {
            require_list(field, "has")?;
            push_list_has(qb, expr, value);
            Ok(())
        }
        Condition::HasEvery(values) => {
            require_list(field, "has_every")?;
            if values.is_empty() {
                qb.push("1");
                return Ok(());
            }
            qb.push("(");
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    qb.push(" AND ");
                }
                push_list_has(qb, expr, value);
            }
            qb.push(")");
            Ok(())
        }
        Condition::HasSome(values) => {
            require_list(field, "has_some")?;
            if values.is_empty() {
                qb.push("0");
                return Ok(());
            }
            qb.push(format!(
                "EXISTS (SELECT 1 FROM json_each({expr}) WHERE json_each.value IN ("
            ));
            let mut list = qb.separated(", ");
            for value in values {
                list.push_bind(value.clone());
            }
            qb.push("))");
            Ok(())
        }
        Condition::IsEmpty(empty) => {
            require_list(field, "is_empty")?;
            let op = if *empty { "= 0" } else { "> 0" };
            qb.push(format!("json_array_length({expr}) {op}"));
            Ok(())
        }
        Condition::Json(filter) => {
            if field.kind != FieldKind::Json {
                return Err(unsupported(field, "json filter"));
            }
            push_json_filter(qb, expr, filter)
        }
    }
}

fn push_equals(
    qb: &mut Sql,
    expr: &str,
    field: &Field,
    value: &Value,
    negated: bool,
) -> Result<()> {
    if value.is_null() {
        coerce(field, value)?;
        qb.push(expr)
            .push(if negated { " IS NOT NULL" } else { " IS NULL" });
        return Ok(());
    }
    let op = if negated { " IS NOT " } else { " = " };
    if field.kind.is_document() {
        qb.push(format!("json({expr})")).push(op).push("json(");
        push_value(qb, field, value)?;
        qb.push(")");
    } else {
        qb.push(expr).push(op);
        push_value(qb, field, value)?;
    }
    Ok(())
}

fn push_in(qb: &mut Sql, expr: &str, field: &Field, values: &[Value], negated: bool) -> Result<()> {
    if field.kind.is_document() {
        return Err(unsupported(field, if negated { "not_in" } else { "in" }));
    }
    if values.is_empty() {
        qb.push(if negated { "1" } else { "0" });
        return Ok(());
    }
    let mut bound = Vec::with_capacity(values.len());
    for value in values {
        if value.is_null() {
            return Err(Error::validation(format!(
                "null is not allowed in the value list for `{}`",
                field.name
            )));
        }
        bound.push(coerce(field, value)?);
    }
    qb.push("(");
    if negated && field.nullable {
        qb.push(expr).push(" IS NULL OR ");
    }
    qb.push(expr)
        .push(if negated { " NOT IN (" } else { " IN (" });
    for (i, value) in bound.into_iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        push_bound(qb, value);
    }
    qb.push("))");
    Ok(())
}

fn push_compare(qb: &mut Sql, expr: &str, field: &Field, op: &str, value: &Value) -> Result<()> {
    if !matches!(
        field.kind,
        FieldKind::Id | FieldKind::Text | FieldKind::Int | FieldKind::Float | FieldKind::Timestamp
    ) {
        return Err(unsupported(field, op));
    }
    if value.is_null() {
        return Err(Error::validation(format!(
            "`{op}` on `{}` needs a non-null value",
            field.name
        )));
    }
    qb.push(format!("{expr} {op} "));
    push_value(qb, field, value)
}

/// `%`, `_` and the escape character itself are matched literally.
fn like_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn push_text(
    qb: &mut Sql,
    expr: &str,
    field: &Field,
    op: TextOp,
    value: &str,
    mode: QueryMode,
) -> Result<()> {
    if !field.kind.is_textual() {
        return Err(unsupported(field, "text match"));
    }
    if value.is_empty() {
        qb.push(format!("{expr} IS NOT NULL"));
        return Ok(());
    }
    match mode {
        QueryMode::Insensitive => {
            let escaped = like_escape(value);
            let pattern = match op {
                TextOp::Contains => format!("%{escaped}%"),
                TextOp::StartsWith => format!("{escaped}%"),
                TextOp::EndsWith => format!("%{escaped}"),
            };
            qb.push(format!("{expr} LIKE "))
                .push_bind(pattern)
                .push(" ESCAPE '\\'");
        }
        QueryMode::Default => push_exact_text(qb, expr, op, value),
    }
    Ok(())
}

fn push_exact_text(qb: &mut Sql, expr: &str, op: TextOp, value: &str) {
    let len = value.chars().count() as i64;
    match op {
        TextOp::Contains => {
            qb.push(format!("instr({expr}, "))
                .push_bind(value.to_string())
                .push(") > 0");
        }
        TextOp::StartsWith => {
            qb.push(format!("substr({expr}, 1, "))
                .push_bind(len)
                .push(") = ")
                .push_bind(value.to_string());
        }
        TextOp::EndsWith => {
            qb.push(format!("substr({expr}, -"))
                .push_bind(len)
                .push(") = ")
                .push_bind(value.to_string());
        }
    }
}

fn require_list(field: &Field, op: &str) -> Result<()> {
    if field.kind == FieldKind::StringList {
        Ok(())
    } else {
        Err(unsupported(field, op))
    }
}

fn push_list_has(qb: &mut Sql, expr: &str, value: &str) {
    qb.push(format!(
        "EXISTS (SELECT 1 FROM json_each({expr}) WHERE json_each.value = "
    ))
    .push_bind(value.to_string())
    .push(")");
}

/// Where a JSON value is read from: a path inside a column, or the current
/// row of a `json_each` scan.
enum JsonTarget<'a> {
    Path { expr: &'a str, path: String },
    Each,
}

impl JsonTarget<'_> {
    fn push_type(&self, qb: &mut Sql) {
        match self {
            JsonTarget::Path { expr, path } => {
                qb.push(format!("json_type({expr}, "))
                    .push_bind(path.clone())
                    .push(")");
            }
            JsonTarget::Each => {
                qb.push("json_each.type");
            }
        }
    }

    fn push_value(&self, qb: &mut Sql) {
        match self {
            JsonTarget::Path { expr, path } => {
                qb.push(format!("json_extract({expr}, "))
                    .push_bind(path.clone())
                    .push(")");
            }
            JsonTarget::Each => {
                qb.push("json_each.value");
            }
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(true) => "true",
        serde_json::Value::Bool(false) => "false",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "text",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Pushes a predicate that holds when `target` is exactly `expected`.
fn push_json_match(qb: &mut Sql, target: &JsonTarget<'_>, expected: &serde_json::Value) {
    qb.push("(");
    target.push_type(qb);
    match expected {
        serde_json::Value::Null | serde_json::Value::Bool(_) => {
            qb.push(format!(" = '{}'", json_type_name(expected)));
        }
        serde_json::Value::Number(n) => {
            qb.push(" IN ('integer', 'real') AND ");
            target.push_value(qb);
            qb.push(" = ");
            match n.as_i64() {
                Some(i) => qb.push_bind(i),
                None => qb.push_bind(n.as_f64().unwrap_or_default()),
            };
        }
        serde_json::Value::String(s) => {
            qb.push(" = 'text' AND ");
            target.push_value(qb);
            qb.push(" = ").push_bind(s.clone());
        }
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
            qb.push(format!(" = '{}' AND ", json_type_name(expected)));
            target.push_value(qb);
            qb.push(" = json(").push_bind(expected.to_string()).push(")");
        }
    }
    qb.push(")");
}

fn push_json_filter(qb: &mut Sql, expr: &str, filter: &JsonFilter) -> Result<()> {
    let path = filter.path.clone().unwrap_or_else(|| "$".to_string());
    if !path.starts_with('$') {
        return Err(Error::validation(format!(
            "json path `{path}` must start with `$`"
        )));
    }
    let at = |path: String| JsonTarget::Path { expr, path };

    match &filter.op {
        JsonOp::Equals(expected) => push_json_match(qb, &at(path), expected),
        JsonOp::NotEquals(expected) => {
            qb.push("(");
            push_json_match(qb, &at(path), expected);
            qb.push(" IS NOT 1)");
        }
        JsonOp::StringContains(s) | JsonOp::StringStartsWith(s) | JsonOp::StringEndsWith(s) => {
            let target = at(path);
            qb.push("(");
            target.push_type(qb);
            qb.push(" = 'text'");
            if !s.is_empty() {
                let op = match &filter.op {
                    JsonOp::StringContains(_) => TextOp::Contains,
                    JsonOp::StringStartsWith(_) => TextOp::StartsWith,
                    _ => TextOp::EndsWith,
                };
                qb.push(" AND ");
                match op {
                    TextOp::Contains => {
                        qb.push("instr(");
                        target.push_value(qb);
                        qb.push(", ").push_bind(s.clone()).push(") > 0");
                    }
                    TextOp::StartsWith => {
                        qb.push("substr(");
                        target.push_value(qb);
                        qb.push(", 1, ")
                            .push_bind(s.chars().count() as i64)
                            .push(") = ")
                            .push_bind(s.clone());
                    }
                    TextOp::EndsWith => {
                        qb.push("substr(");
                        target.push_value(qb);
                        qb.push(", -")
                            .push_bind(s.chars().count() as i64)
                            .push(") = ")
                            .push_bind(s.clone());
                    }
                }
            }
            qb.push(")");
        }
        JsonOp::ArrayContains(expected) => {
            let wanted: Vec<&serde_json::Value> = match expected {
                serde_json::Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            qb.push("(");
            at(path.clone()).push_type(qb);
            qb.push(" = 'array'");
            for item in wanted {
                qb.push(format!(" AND EXISTS (SELECT 1 FROM json_each({expr}, "))
                    .push_bind(path.clone())
                    .push(") WHERE ");
                push_json_match(qb, &JsonTarget::Each, item);
                qb.push(")");
            }
            qb.push(")");
        }
        JsonOp::ArrayStartsWith(expected) | JsonOp::ArrayEndsWith(expected) => {
            let from_end = matches!(filter.op, JsonOp::ArrayEndsWith(_));
            let items: Vec<&serde_json::Value> = match expected {
                serde_json::Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            let count = items.len();
            qb.push("(");
            at(path.clone()).push_type(qb);
            qb.push(" = 'array'");
            for (i, item) in items.into_iter().enumerate() {
                let index = if from_end {
                    format!("[#-{}]", count - i)
                } else {
                    format!("[{i}]")
                };
                qb.push(" AND ");
                push_json_match(qb, &at(format!("{path}{index}")), item);
            }
            qb.push(")");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntityKind;

    fn compile(kind: EntityKind, filter: &Filter) -> Result<String> {
        let mut qb = Sql::new("");
        push_filter(&mut qb, kind.schema(), filter)?;
        Ok(qb.sql().to_string())
    }

    #[test]
    fn compiles_nested_relation_filters() {
        let filter = Filter::relation("problem").is(Filter::field("difficulty").equals("HARD"));
        let sql = compile(EntityKind::Submission, &filter).unwrap();
        assert_eq!(
            sql,
            "\"submissions\".\"problem_id\" IN (SELECT \"problems\".\"id\" FROM \"problems\" WHERE \"problems\".\"difficulty\" = ?)"
        );
    }

    #[test]
    fn every_negates_inside_the_subquery() {
        let filter =
            Filter::relation("test_case_results").every(Filter::field("passed").equals(true));
        let sql = compile(EntityKind::Submission, &filter).unwrap();
        assert!(sql.starts_with(
            "\"submissions\".\"id\" NOT IN (SELECT \"test_case_results\".\"submission_id\""
        ));
        assert!(sql.contains("IS NOT 1"));
    }

    #[test]
    fn empty_combinators_are_constants() {
        assert_eq!(compile(EntityKind::User, &Filter::all([])).unwrap(), "1");
        assert_eq!(compile(EntityKind::User, &Filter::any([])).unwrap(), "0");
        let none = Filter::field("email").is_in(Vec::<String>::new());
        assert_eq!(compile(EntityKind::User, &none).unwrap(), "0");
    }

    #[test]
    fn rejects_mismatched_operators() {
        let cases = [
            (EntityKind::User, Filter::field("missing").equals("x")),
            (EntityKind::User, Filter::field("email").has("x")),
            (EntityKind::User, Filter::field("email").is_null()),
            (EntityKind::User, Filter::field("role").equals("ROOT")),
            (EntityKind::Problem, Filter::field("tags").gt("a")),
            (
                EntityKind::Problem,
                Filter::field("title").json(JsonFilter::new(JsonOp::Equals(1.into()))),
            ),
            (EntityKind::Problem, Filter::relation("submissions").is(Filter::all([]))),
            (EntityKind::Problem, Filter::relation("user").some(Filter::all([]))),
            (EntityKind::TestCaseResult, Filter::field("test_case").equals("one")),
        ];
        for (kind, filter) in cases {
            assert!(
                matches!(compile(kind, &filter), Err(Error::Validation(_))),
                "{filter:?} should be rejected"
            );
        }
    }

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(like_escape("50%_off\\"), "50\\%\\_off\\\\");
    }

    #[test]
    fn json_paths_must_be_rooted() {
        let filter =
            Filter::field("examples").json(JsonFilter::at("a.b", JsonOp::Equals(1.into())));
        assert!(matches!(compile(EntityKind::Problem, &filter), Err(Error::Validation(_))));
    }
}
