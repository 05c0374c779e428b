//! Ordering, cursors and pagination for `find_*` and `select`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use crate::{
    entity::UniqueKey,
    error::{Error, Result},
    filter::{push_filter, Filter, Sql},
    schema::{Field, FieldKind, Schema},
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    fn reversed(self) -> Self {
        match self {
            Direction::Asc => Direction::Desc,
            Direction::Desc => Direction::Asc,
        }
    }

    pub(crate) fn keyword(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// Where null values sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nulls {
    First,
    Last,
}

impl Nulls {
    fn reversed(self) -> Self {
        match self {
            Nulls::First => Nulls::Last,
            Nulls::Last => Nulls::First,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
    /// Defaults to SQLite's placement: first when ascending, last when descending.
    pub nulls: Option<Nulls>,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
            nulls: None,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
            nulls: None,
        }
    }

    pub fn nulls(mut self, nulls: Nulls) -> Self {
        self.nulls = Some(nulls);
        self
    }
}

/// Arguments of `find_many`, `find_first` and `select`.
#[derive(Debug, Clone)]
pub struct FindArgs<K> {
    pub filter: Option<Filter>,
    pub order_by: Vec<OrderBy>,
    /// The row at the cursor is part of the result.
    pub cursor: Option<K>,
    /// Negative values take from the end of the ordering.
    pub take: Option<i64>,
    pub skip: Option<u64>,
    /// Keeps the first row of every distinct combination of these fields.
    pub distinct: Vec<String>,
}

impl<K> Default for FindArgs<K> {
    fn default() -> Self {
        Self {
            filter: None,
            order_by: Vec::new(),
            cursor: None,
            take: None,
            skip: None,
            distinct: Vec::new(),
        }
    }
}

impl<K> FindArgs<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn cursor(mut self, key: K) -> Self {
        self.cursor = Some(key);
        self
    }

    pub fn take(mut self, take: i64) -> Self {
        self.take = Some(take);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn distinct<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.distinct.extend(fields.into_iter().map(Into::into));
        self
    }
}

impl<K: UniqueKey> FindArgs<K> {
    pub(crate) fn into_window(self) -> Window {
        Window {
            filter: self.filter,
            order_by: self.order_by,
            cursor: self.cursor.map(UniqueKey::into_filter),
            take: self.take,
            skip: self.skip,
            distinct: self.distinct,
        }
    }
}

/// [`FindArgs`] with the cursor already turned into a filter.
#[derive(Debug, Clone, Default)]
pub(crate) struct Window {
    pub filter: Option<Filter>,
    pub order_by: Vec<OrderBy>,
    pub cursor: Option<Filter>,
    pub take: Option<i64>,
    pub skip: Option<u64>,
    pub distinct: Vec<String>,
}

impl Window {
    pub(crate) fn filtered(filter: Option<Filter>) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }
}

/// One resolved `ORDER BY` term.
#[derive(Debug, Clone)]
pub(crate) struct OrderTerm {
    pub expr: String,
    pub direction: Direction,
    pub nulls: Nulls,
    pub nullable: bool,
}

impl OrderTerm {
    pub(crate) fn reversed(&self) -> Self {
        Self {
            direction: self.direction.reversed(),
            nulls: self.nulls.reversed(),
            ..self.clone()
        }
    }
}

/// Checks the requested ordering and appends the rowid tiebreaker, so equal
/// keys come back in insertion order.
pub(crate) fn order_terms(schema: &'static Schema, order_by: &[OrderBy]) -> Result<Vec<OrderTerm>> {
    let mut terms = Vec::with_capacity(order_by.len() + 1);
    for order in order_by {
        let field = schema.field(&order.field)?;
        if !field.kind.is_orderable() {
            return Err(Error::validation(format!(
                "cannot order {} by `{}`",
                schema.model, field.name
            )));
        }
        let nulls = order.nulls.unwrap_or(match order.direction {
            Direction::Asc => Nulls::First,
            Direction::Desc => Nulls::Last,
        });
        terms.push(OrderTerm {
            expr: schema.column(field.name),
            direction: order.direction,
            nulls,
            nullable: field.nullable,
        });
    }
    terms.push(OrderTerm {
        expr: format!("\"{}\".rowid", schema.table),
        direction: Direction::Asc,
        nulls: Nulls::First,
        nullable: false,
    });
    Ok(terms)
}

pub(crate) fn push_order(qb: &mut Sql, terms: &[OrderTerm]) {
    qb.push(" ORDER BY ");
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(format!("{} {}", term.expr, term.direction.keyword()));
        if term.nullable {
            qb.push(match term.nulls {
                Nulls::First => " NULLS FIRST",
                Nulls::Last => " NULLS LAST",
            });
        }
    }
}

/// `expr` read from the cursor row.
fn cursor_value(schema: &Schema, term: &OrderTerm, cursor_id: &str, qb: &mut Sql) {
    qb.push(format!(
        "(SELECT {} FROM \"{}\" WHERE {} = ",
        term.expr,
        schema.table,
        schema.id_column()
    ))
    .push_bind(cursor_id.to_string())
    .push(")");
}

/// The row sorts strictly after the cursor on this term.
fn push_after(qb: &mut Sql, schema: &Schema, term: &OrderTerm, cursor_id: &str) {
    let op = match term.direction {
        Direction::Asc => " > ",
        Direction::Desc => " < ",
    };
    qb.push("(");
    if term.nullable {
        match term.nulls {
            Nulls::First => {
                qb.push(format!("({} IS NOT NULL AND ", term.expr));
                cursor_value(schema, term, cursor_id, qb);
                qb.push(" IS NULL) OR ");
            }
            Nulls::Last => {
                qb.push(format!("({} IS NULL AND ", term.expr));
                cursor_value(schema, term, cursor_id, qb);
                qb.push(" IS NOT NULL) OR ");
            }
        }
    }
    qb.push(format!("{}{op}", term.expr));
    cursor_value(schema, term, cursor_id, qb);
    qb.push(")");
}

/// Rows at or after the cursor row in the given ordering. The last term is
/// the unique rowid, so the equality branch only matches the cursor itself.
pub(crate) fn push_cursor(qb: &mut Sql, schema: &Schema, terms: &[OrderTerm], cursor_id: &str) {
    qb.push("(");
    for i in 0..terms.len() {
        if i > 0 {
            qb.push(" OR ");
        }
        qb.push("(");
        for term in &terms[..i] {
            qb.push(format!("{} IS ", term.expr));
            cursor_value(schema, term, cursor_id, qb);
            qb.push(" AND ");
        }
        push_after(qb, schema, &terms[i], cursor_id);
        qb.push(")");
    }
    qb.push(format!(" OR {} = ", schema.id_column()))
        .push_bind(cursor_id.to_string())
        .push(")");
}

/// Looks up the id of the row a cursor points at.
pub(crate) async fn resolve_cursor(
    conn: &mut SqliteConnection,
    schema: &'static Schema,
    cursor: &Filter,
) -> Result<Option<String>> {
    let mut qb = Sql::new(format!(
        "SELECT {} FROM \"{}\" WHERE ",
        schema.id_column(),
        schema.table
    ));
    push_filter(&mut qb, schema, cursor)?;
    qb.push(" LIMIT 1");
    let id = qb
        .build_query_scalar::<String>()
        .fetch_optional(&mut *conn)
        .await?;
    Ok(id)
}

fn push_where(
    qb: &mut Sql,
    schema: &'static Schema,
    filter: Option<&Filter>,
    cursor: Option<(&[OrderTerm], &str)>,
) -> Result<()> {
    qb.push(" WHERE ");
    match filter {
        Some(filter) => push_filter(qb, schema, filter)?,
        None => {
            qb.push("1");
        }
    }
    if let Some((terms, cursor_id)) = cursor {
        qb.push(" AND ");
        push_cursor(qb, schema, terms, cursor_id);
    }
    Ok(())
}

/// Validated column list for a projection.
pub(crate) fn projection_fields(
    schema: &'static Schema,
    fields: &[String],
) -> Result<Vec<&'static Field>> {
    if fields.is_empty() {
        return Err(Error::validation(format!(
            "a projection of {} must name at least one field",
            schema.model
        )));
    }
    fields.iter().map(|name| schema.field(name)).collect()
}

/// Runs a windowed query and returns the raw rows in their final order.
pub(crate) async fn fetch_rows(
    conn: &mut SqliteConnection,
    schema: &'static Schema,
    window: &Window,
) -> Result<Vec<SqliteRow>> {
    let mut terms = order_terms(schema, &window.order_by)?;
    let distinct = window
        .distinct
        .iter()
        .map(|name| schema.field(name))
        .collect::<Result<Vec<_>>>()?;

    let cursor_id = match &window.cursor {
        Some(cursor) => match resolve_cursor(conn, schema, cursor).await? {
            Some(id) => Some(id),
            None => return Ok(Vec::new()),
        },
        None => None,
    };

    let backwards = matches!(window.take, Some(take) if take < 0);
    if backwards {
        terms = terms.iter().map(OrderTerm::reversed).collect();
    }

    let mut qb = Sql::new(format!("SELECT * FROM \"{}\"", schema.table));
    push_where(
        &mut qb,
        schema,
        window.filter.as_ref(),
        cursor_id.as_deref().map(|id| (terms.as_slice(), id)),
    )?;
    push_order(&mut qb, &terms);

    let limit = window.take.map(i64::unsigned_abs);
    let skip = window.skip.unwrap_or(0);
    if distinct.is_empty() {
        match limit {
            Some(limit) => {
                qb.push(" LIMIT ").push_bind(limit as i64);
            }
            None if skip > 0 => {
                qb.push(" LIMIT -1");
            }
            None => {}
        }
        if skip > 0 {
            qb.push(" OFFSET ").push_bind(skip as i64);
        }
    }

    tracing::debug!(sql = qb.sql(), "fetching {}", schema.model);
    let mut rows = qb.build().fetch_all(&mut *conn).await?;

    if !distinct.is_empty() {
        rows = distinct_rows(rows, &distinct)?
            .into_iter()
            .skip(skip as usize)
            .take(limit.map_or(usize::MAX, |limit| limit as usize))
            .collect();
    }
    if backwards {
        rows.reverse();
    }
    Ok(rows)
}

fn distinct_rows(rows: Vec<SqliteRow>, fields: &[&'static Field]) -> Result<Vec<SqliteRow>> {
    let mut seen: Vec<Vec<Value>> = Vec::new();
    let mut kept = Vec::new();
    for row in rows {
        let key = fields
            .iter()
            .map(|field| decode_value(&row, field.name, field.kind))
            .collect::<Result<Vec<_>>>()?;
        if !seen.contains(&key) {
            seen.push(key);
            kept.push(row);
        }
    }
    Ok(kept)
}

fn decode_document(text: Option<String>) -> Result<Value> {
    match text {
        Some(text) => serde_json::from_str(&text)
            .map(Value::Json)
            .map_err(|err| Error::Unknown(sqlx::Error::Decode(Box::new(err)))),
        None => Ok(Value::Null),
    }
}

/// Reads one column as a dynamically typed value.
pub(crate) fn decode_value(row: &SqliteRow, column: &str, kind: FieldKind) -> Result<Value> {
    let value = match kind {
        FieldKind::Id | FieldKind::Text | FieldKind::Enum(_) => {
            row.try_get::<Option<String>, _>(column)?.into()
        }
        FieldKind::Int => row.try_get::<Option<i64>, _>(column)?.into(),
        FieldKind::Float => row.try_get::<Option<f64>, _>(column)?.into(),
        FieldKind::Bool => row.try_get::<Option<bool>, _>(column)?.into(),
        FieldKind::Timestamp => row.try_get::<Option<DateTime<Utc>>, _>(column)?.into(),
        FieldKind::StringList | FieldKind::Json => {
            decode_document(row.try_get::<Option<String>, _>(column)?)?
        }
    };
    Ok(value)
}

/// A record reduced to the selected fields.
pub type Projection = BTreeMap<String, Value>;

pub(crate) fn project(row: &SqliteRow, fields: &[&'static Field]) -> Result<Projection> {
    fields
        .iter()
        .map(|field| Ok((field.name.to_string(), decode_value(row, field.name, field.kind)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntityKind;

    #[test]
    fn tiebreaker_is_appended() {
        let schema = EntityKind::Problem.schema();
        let terms = order_terms(schema, &[OrderBy::desc("title")]).unwrap();
        let mut qb = Sql::new("SELECT *");
        push_order(&mut qb, &terms);
        assert_eq!(
            qb.sql(),
            "SELECT * ORDER BY \"problems\".\"title\" DESC, \"problems\".rowid ASC"
        );
    }

    #[test]
    fn nullable_terms_place_nulls_explicitly() {
        let schema = EntityKind::Problem.schema();
        let terms = order_terms(schema, &[OrderBy::asc("hints").nulls(Nulls::Last)]).unwrap();
        let reversed: Vec<_> = terms.iter().map(OrderTerm::reversed).collect();
        let mut qb = Sql::new("");
        push_order(&mut qb, &reversed);
        assert_eq!(
            qb.sql(),
            " ORDER BY \"problems\".\"hints\" DESC NULLS FIRST, \"problems\".rowid DESC"
        );
    }

    #[test]
    fn ordering_by_documents_is_rejected() {
        let schema = EntityKind::Problem.schema();
        assert!(matches!(
            order_terms(schema, &[OrderBy::asc("tags")]),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            order_terms(schema, &[OrderBy::asc("nope")]),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn empty_projection_is_rejected() {
        let schema = EntityKind::User.schema();
        assert!(projection_fields(schema, &[]).is_err());
        assert_eq!(projection_fields(schema, &["email".into()]).unwrap().len(), 1);
    }
}
