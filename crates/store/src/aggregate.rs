//! `aggregate` and `group_by`.

use std::collections::BTreeMap;

use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use crate::{
    entity::UniqueKey,
    error::{Error, Result},
    filter::{push_condition, push_filter, Condition, Filter, Sql},
    query::{
        decode_value, order_terms, push_cursor, push_order, resolve_cursor, Direction, FindArgs,
        Nulls, OrderBy, OrderTerm, Window,
    },
    schema::{Field, FieldKind, Schema},
    value::Value,
};

/// Which aggregates to compute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateSelection {
    pub count_all: bool,
    pub count: Vec<String>,
    pub min: Vec<String>,
    pub max: Vec<String>,
    pub avg: Vec<String>,
    pub sum: Vec<String>,
}

impl AggregateSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_all(mut self) -> Self {
        self.count_all = true;
        self
    }

    /// Non-null values of `field`.
    pub fn count(mut self, field: impl Into<String>) -> Self {
        self.count.push(field.into());
        self
    }

    pub fn min(mut self, field: impl Into<String>) -> Self {
        self.min.push(field.into());
        self
    }

    pub fn max(mut self, field: impl Into<String>) -> Self {
        self.max.push(field.into());
        self
    }

    pub fn avg(mut self, field: impl Into<String>) -> Self {
        self.avg.push(field.into());
        self
    }

    pub fn sum(mut self, field: impl Into<String>) -> Self {
        self.sum.push(field.into());
        self
    }

    fn is_empty(&self) -> bool {
        !self.count_all
            && self.count.is_empty()
            && self.min.is_empty()
            && self.max.is_empty()
            && self.avg.is_empty()
            && self.sum.is_empty()
    }

    fn columns(&self, schema: &'static Schema) -> Result<Vec<AggregateColumn>> {
        let mut columns = Vec::new();
        if self.count_all {
            columns.push(AggregateColumn {
                function: AggregateFn::Count,
                field: None,
            });
        }
        let groups = [
            (AggregateFn::Count, &self.count),
            (AggregateFn::Min, &self.min),
            (AggregateFn::Max, &self.max),
            (AggregateFn::Avg, &self.avg),
            (AggregateFn::Sum, &self.sum),
        ];
        for (function, fields) in groups {
            for name in fields {
                let field = schema.field(name)?;
                function.check(schema, field)?;
                columns.push(AggregateColumn {
                    function,
                    field: Some(field),
                });
            }
        }
        Ok(columns)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Min,
    Max,
    Avg,
    Sum,
}

impl AggregateFn {
    fn sql(self) -> &'static str {
        match self {
            AggregateFn::Count => "COUNT",
            AggregateFn::Min => "MIN",
            AggregateFn::Max => "MAX",
            AggregateFn::Avg => "AVG",
            AggregateFn::Sum => "SUM",
        }
    }

    fn label(self) -> &'static str {
        match self {
            AggregateFn::Count => "count",
            AggregateFn::Min => "min",
            AggregateFn::Max => "max",
            AggregateFn::Avg => "avg",
            AggregateFn::Sum => "sum",
        }
    }

    fn check(self, schema: &Schema, field: &Field) -> Result<()> {
        let fits = match self {
            AggregateFn::Count => true,
            AggregateFn::Min | AggregateFn::Max => field.kind.is_orderable(),
            AggregateFn::Avg | AggregateFn::Sum => field.kind.is_numeric(),
        };
        if fits {
            Ok(())
        } else {
            Err(Error::validation(format!(
                "`{}` cannot be applied to {}.{}",
                self.label(),
                schema.model,
                field.name
            )))
        }
    }

    /// Describes the aggregate's result so `having` conditions can be
    /// checked and bound like a column.
    fn result_field(self, field: &'static Field) -> Field {
        let kind = match self {
            AggregateFn::Count => FieldKind::Int,
            AggregateFn::Avg => FieldKind::Float,
            AggregateFn::Min | AggregateFn::Max | AggregateFn::Sum => field.kind,
        };
        Field {
            name: field.name,
            kind,
            nullable: self != AggregateFn::Count,
        }
    }
}

struct AggregateColumn {
    function: AggregateFn,
    /// `None` is `COUNT(*)`.
    field: Option<&'static Field>,
}

impl AggregateColumn {
    fn alias(&self) -> String {
        match self.field {
            Some(field) => format!("_{}_{}", self.function.label(), field.name),
            None => "_count_all".to_string(),
        }
    }

    fn expr(&self, schema: &Schema) -> String {
        match self.field {
            Some(field) => format!("{}({})", self.function.sql(), schema.column(field.name)),
            None => "COUNT(*)".to_string(),
        }
    }
}

/// Aggregate results keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregates {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count_all: Option<u64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub count: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub min: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub max: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub avg: BTreeMap<String, Option<f64>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub sum: BTreeMap<String, Value>,
}

impl Aggregates {
    fn read(row: &SqliteRow, columns: &[AggregateColumn]) -> Result<Self> {
        let mut out = Aggregates::default();
        for column in columns {
            let alias = column.alias();
            let Some(field) = column.field else {
                out.count_all = Some(row.try_get::<i64, _>(alias.as_str())? as u64);
                continue;
            };
            let name = field.name.to_string();
            match column.function {
                AggregateFn::Count => {
                    out.count
                        .insert(name, row.try_get::<i64, _>(alias.as_str())? as u64);
                }
                AggregateFn::Avg => {
                    out.avg
                        .insert(name, row.try_get::<Option<f64>, _>(alias.as_str())?);
                }
                AggregateFn::Min => {
                    out.min.insert(name, decode_value(row, &alias, field.kind)?);
                }
                AggregateFn::Max => {
                    out.max.insert(name, decode_value(row, &alias, field.kind)?);
                }
                AggregateFn::Sum => {
                    out.sum.insert(name, decode_value(row, &alias, field.kind)?);
                }
            }
        }
        Ok(out)
    }
}

fn push_columns(qb: &mut Sql, schema: &Schema, columns: &[AggregateColumn]) {
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(format!("{} AS \"{}\"", column.expr(schema), column.alias()));
    }
}

/// Arguments of `aggregate`: the rows are windowed like `find_many` first.
#[derive(Debug, Clone)]
pub struct AggregateArgs<K> {
    pub find: FindArgs<K>,
    pub select: AggregateSelection,
}

impl<K> AggregateArgs<K> {
    pub fn new(select: AggregateSelection) -> Self {
        Self {
            find: FindArgs::default(),
            select,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.find = self.find.filter(filter);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.find = self.find.order_by(order);
        self
    }

    pub fn cursor(mut self, key: K) -> Self {
        self.find = self.find.cursor(key);
        self
    }

    pub fn take(mut self, take: i64) -> Self {
        self.find = self.find.take(take);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.find = self.find.skip(skip);
        self
    }
}

pub(crate) async fn aggregate<K: UniqueKey>(
    conn: &mut SqliteConnection,
    schema: &'static Schema,
    args: AggregateArgs<K>,
) -> Result<Aggregates> {
    if args.select.is_empty() {
        return Err(Error::validation(format!(
            "an aggregate over {} must select at least one value",
            schema.model
        )));
    }
    let columns = args.select.columns(schema)?;
    let window = args.find.into_window();
    if !window.distinct.is_empty() {
        return Err(Error::validation("`distinct` is not supported by aggregate"));
    }

    let mut terms = order_terms(schema, &window.order_by)?;
    let cursor_id = match &window.cursor {
        Some(cursor) => Some(resolve_cursor(conn, schema, cursor).await?),
        None => None,
    };
    if matches!(window.take, Some(take) if take < 0) {
        terms = terms.iter().map(OrderTerm::reversed).collect();
    }

    // The windowed rows are selected under the table's own name so the
    // aggregate expressions can reuse qualified column names.
    let mut qb = Sql::new("SELECT ");
    push_columns(&mut qb, schema, &columns);
    qb.push(format!(" FROM (SELECT * FROM \"{}\" WHERE ", schema.table));
    push_window_filter(&mut qb, schema, &window, &terms, cursor_id.as_ref())?;
    push_order(&mut qb, &terms);
    let skip = window.skip.unwrap_or(0);
    match window.take {
        Some(take) => {
            qb.push(" LIMIT ").push_bind(take.unsigned_abs() as i64);
        }
        None => {
            qb.push(" LIMIT -1");
        }
    }
    qb.push(" OFFSET ").push_bind(skip as i64);
    qb.push(format!(") AS \"{}\"", schema.table));

    tracing::debug!(sql = qb.sql(), "aggregating {}", schema.model);
    let row = qb.build().fetch_one(&mut *conn).await?;
    Aggregates::read(&row, &columns)
}

fn push_window_filter(
    qb: &mut Sql,
    schema: &'static Schema,
    window: &Window,
    terms: &[OrderTerm],
    cursor_id: Option<&Option<String>>,
) -> Result<()> {
    match &window.filter {
        Some(filter) => push_filter(qb, schema, filter)?,
        None => {
            qb.push("1");
        }
    }
    match cursor_id {
        Some(Some(cursor_id)) => {
            qb.push(" AND ");
            push_cursor(qb, schema, terms, cursor_id);
        }
        // A cursor pointing at no row selects nothing.
        Some(None) => {
            qb.push(" AND 0");
        }
        None => {}
    }
    Ok(())
}

/// A `having` predicate over grouped rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Having {
    All(Vec<Having>),
    Any(Vec<Having>),
    Not(Box<Having>),
    /// Condition on one of the `by` fields.
    Field { field: String, condition: Condition },
    Aggregate {
        function: AggregateFn,
        field: String,
        condition: Condition,
    },
    /// Condition on the number of rows in the group.
    CountAll(Condition),
}

impl Having {
    pub fn field(field: impl Into<String>, condition: Condition) -> Self {
        Having::Field {
            field: field.into(),
            condition,
        }
    }

    pub fn aggregate(
        function: AggregateFn,
        field: impl Into<String>,
        condition: Condition,
    ) -> Self {
        Having::Aggregate {
            function,
            field: field.into(),
            condition,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupOrder {
    /// One of the `by` fields.
    Field(OrderBy),
    Aggregate {
        function: AggregateFn,
        field: String,
        direction: Direction,
    },
    CountAll(Direction),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupByArgs {
    pub by: Vec<String>,
    pub filter: Option<Filter>,
    pub select: AggregateSelection,
    pub having: Option<Having>,
    pub order_by: Vec<GroupOrder>,
    pub take: Option<u64>,
    pub skip: Option<u64>,
}

impl GroupByArgs {
    pub fn by<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            by: fields.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn select(mut self, select: AggregateSelection) -> Self {
        self.select = select;
        self
    }

    pub fn having(mut self, having: Having) -> Self {
        self.having = Some(having);
        self
    }

    pub fn order_by(mut self, order: GroupOrder) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn take(mut self, take: u64) -> Self {
        self.take = Some(take);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }
}

/// One group: the values of the `by` fields and the selected aggregates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupRow {
    #[serde(flatten)]
    pub key: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub aggregates: Aggregates,
}

impl GroupRow {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.key.get(field)
    }
}

fn by_field(schema: &'static Schema, by: &[&'static Field], name: &str) -> Result<&'static Field> {
    let field = schema.field(name)?;
    if by.iter().any(|b| b.name == field.name) {
        Ok(field)
    } else {
        Err(Error::validation(format!(
            "`{name}` must be one of the group-by fields of {}",
            schema.model
        )))
    }
}

fn push_having(
    qb: &mut Sql,
    schema: &'static Schema,
    by: &[&'static Field],
    having: &Having,
) -> Result<()> {
    match having {
        Having::All(items) | Having::Any(items) => {
            let (separator, empty) = if matches!(having, Having::All(_)) {
                (" AND ", "1")
            } else {
                (" OR ", "0")
            };
            if items.is_empty() {
                qb.push(empty);
                return Ok(());
            }
            qb.push("(");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    qb.push(separator);
                }
                push_having(qb, schema, by, item)?;
            }
            qb.push(")");
        }
        Having::Not(inner) => {
            qb.push("((");
            push_having(qb, schema, by, inner)?;
            qb.push(") IS NOT 1)");
        }
        Having::Field { field, condition } => {
            let field = by_field(schema, by, field)?;
            push_condition(qb, &schema.column(field.name), field, condition)?;
        }
        Having::Aggregate {
            function,
            field,
            condition,
        } => {
            let field = schema.field(field)?;
            function.check(schema, field)?;
            let column = AggregateColumn {
                function: *function,
                field: Some(field),
            };
            let described = function.result_field(field);
            push_condition(qb, &column.expr(schema), &described, condition)?;
        }
        Having::CountAll(condition) => {
            let described = Field::required("_count_all", FieldKind::Int);
            push_condition(qb, "COUNT(*)", &described, condition)?;
        }
    }
    Ok(())
}

fn push_group_order(
    qb: &mut Sql,
    schema: &'static Schema,
    by: &[&'static Field],
    order_by: &[GroupOrder],
) -> Result<()> {
    qb.push(" ORDER BY ");
    for (i, order) in order_by.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        match order {
            GroupOrder::Field(order) => {
                let field = by_field(schema, by, &order.field)?;
                qb.push(format!(
                    "{} {}",
                    schema.column(field.name),
                    order.direction.keyword()
                ));
                if let Some(nulls) = order.nulls {
                    qb.push(match nulls {
                        Nulls::First => " NULLS FIRST",
                        Nulls::Last => " NULLS LAST",
                    });
                }
            }
            GroupOrder::Aggregate {
                function,
                field,
                direction,
            } => {
                let field = schema.field(field)?;
                function.check(schema, field)?;
                let column = AggregateColumn {
                    function: *function,
                    field: Some(field),
                };
                qb.push(format!("{} {}", column.expr(schema), direction.keyword()));
            }
            GroupOrder::CountAll(direction) => {
                qb.push(format!("COUNT(*) {}", direction.keyword()));
            }
        }
    }
    Ok(())
}

pub(crate) async fn group_by(
    conn: &mut SqliteConnection,
    schema: &'static Schema,
    args: GroupByArgs,
) -> Result<Vec<GroupRow>> {
    if args.by.is_empty() {
        return Err(Error::validation(format!(
            "group_by on {} needs at least one field",
            schema.model
        )));
    }
    let by = args
        .by
        .iter()
        .map(|name| {
            let field = schema.field(name)?;
            if field.kind.is_document() {
                return Err(Error::validation(format!(
                    "cannot group {} by `{}`",
                    schema.model, field.name
                )));
            }
            Ok(field)
        })
        .collect::<Result<Vec<_>>>()?;
    if (args.take.is_some() || args.skip.is_some()) && args.order_by.is_empty() {
        return Err(Error::validation(
            "`take` and `skip` on group_by require an explicit order_by",
        ));
    }
    let columns = args.select.columns(schema)?;

    let mut qb = Sql::new("SELECT ");
    for (i, field) in by.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(format!("{} AS \"{}\"", schema.column(field.name), field.name));
    }
    if !columns.is_empty() {
        qb.push(", ");
        push_columns(&mut qb, schema, &columns);
    }
    qb.push(format!(" FROM \"{}\" WHERE ", schema.table));
    match &args.filter {
        Some(filter) => push_filter(&mut qb, schema, filter)?,
        None => {
            qb.push("1");
        }
    }
    qb.push(" GROUP BY ");
    for (i, field) in by.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(schema.column(field.name));
    }
    if let Some(having) = &args.having {
        qb.push(" HAVING ");
        push_having(&mut qb, schema, &by, having)?;
    }
    if !args.order_by.is_empty() {
        push_group_order(&mut qb, schema, &by, &args.order_by)?;
    }
    if args.take.is_some() || args.skip.is_some() {
        qb.push(" LIMIT ")
            .push_bind(args.take.map_or(-1, |take| take as i64));
        qb.push(" OFFSET ")
            .push_bind(args.skip.unwrap_or(0) as i64);
    }

    tracing::debug!(sql = qb.sql(), "grouping {}", schema.model);
    let rows = qb.build().fetch_all(&mut *conn).await?;
    rows.iter()
        .map(|row| {
            let key = by
                .iter()
                .map(|field| {
                    Ok((
                        field.name.to_string(),
                        decode_value(row, field.name, field.kind)?,
                    ))
                })
                .collect::<Result<BTreeMap<_, _>>>()?;
            Ok(GroupRow {
                key,
                aggregates: Aggregates::read(row, &columns)?,
            })
        })
        .collect()
}
