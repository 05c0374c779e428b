//! The per-model repository facade.

use std::{
    marker::PhantomData,
    ops::{Deref, DerefMut},
};

use chrono::Utc;
use serde::Serialize;
use sqlx::{pool::PoolConnection, Sqlite, SqliteConnection, SqlitePool};

use crate::{
    aggregate::{self, AggregateArgs, Aggregates, GroupByArgs, GroupRow},
    entity::{AssignOp, Assignment, Changes, Entity, Insertable, UniqueKey},
    error::{Error, Result},
    filter::{coerce, push_bound, push_filter, Bound, Filter, Sql},
    include::{load_relations, Include, Loaded},
    query::{fetch_rows, project, projection_fields, FindArgs, Projection, Window},
    schema::{FieldKind, Schema},
    value::Value,
};

/// Rows per `INSERT` statement in `create_many`.
const INSERT_CHUNK: usize = 50;

/// Where a delegate runs its statements.
pub(crate) enum Source<'a> {
    Pool(&'a SqlitePool),
    Conn(&'a mut SqliteConnection),
}

impl<'a> Source<'a> {
    async fn acquire(self) -> Result<Conn<'a>> {
        match self {
            Source::Pool(pool) => Ok(Conn::Pooled(pool.acquire().await?)),
            Source::Conn(conn) => Ok(Conn::Borrowed(conn)),
        }
    }
}

enum Conn<'a> {
    Pooled(PoolConnection<Sqlite>),
    Borrowed(&'a mut SqliteConnection),
}

impl Deref for Conn<'_> {
    type Target = SqliteConnection;

    fn deref(&self) -> &SqliteConnection {
        match self {
            Conn::Pooled(conn) => conn,
            Conn::Borrowed(conn) => conn,
        }
    }
}

impl DerefMut for Conn<'_> {
    fn deref_mut(&mut self) -> &mut SqliteConnection {
        match self {
            Conn::Pooled(conn) => conn,
            Conn::Borrowed(conn) => conn,
        }
    }
}

/// Number of rows touched by a bulk operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchCount {
    pub count: u64,
}

/// Operations on one model, bound to the pool or to an open transaction.
pub struct Delegate<'a, E> {
    source: Source<'a>,
    _entity: PhantomData<fn() -> E>,
}

impl<'a, E: Entity> Delegate<'a, E> {
    pub(crate) fn new(source: Source<'a>) -> Self {
        Self {
            source,
            _entity: PhantomData,
        }
    }

    fn schema() -> &'static Schema {
        E::schema()
    }

    fn not_found() -> Error {
        Error::NotFound {
            model: Self::schema().model,
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(model = E::schema().model))]
    pub async fn find_unique(self, key: E::Key) -> Result<Option<E>> {
        let mut conn = self.source.acquire().await?;
        find_one::<E>(&mut conn, &key.into_filter()).await
    }

    pub async fn find_unique_or_throw(self, key: E::Key) -> Result<E> {
        self.find_unique(key).await?.ok_or_else(Self::not_found)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(model = E::schema().model))]
    pub async fn find_first(self, args: FindArgs<E::Key>) -> Result<Option<E>> {
        let mut window = args.into_window();
        window.take = Some(if matches!(window.take, Some(take) if take < 0) { -1 } else { 1 });
        let mut conn = self.source.acquire().await?;
        Ok(find_window::<E>(&mut conn, &window).await?.into_iter().next())
    }

    pub async fn find_first_or_throw(self, args: FindArgs<E::Key>) -> Result<E> {
        self.find_first(args).await?.ok_or_else(Self::not_found)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(model = E::schema().model))]
    pub async fn find_many(self, args: FindArgs<E::Key>) -> Result<Vec<E>> {
        let mut conn = self.source.acquire().await?;
        find_window::<E>(&mut conn, &args.into_window()).await
    }

    pub async fn find_unique_including(
        self,
        key: E::Key,
        includes: Vec<Include>,
    ) -> Result<Option<Loaded<E>>> {
        let window = Window {
            take: Some(1),
            ..Window::filtered(Some(key.into_filter()))
        };
        Ok(self.load(window, includes).await?.into_iter().next())
    }

    pub async fn find_first_including(
        self,
        args: FindArgs<E::Key>,
        includes: Vec<Include>,
    ) -> Result<Option<Loaded<E>>> {
        let mut window = args.into_window();
        window.take = Some(if matches!(window.take, Some(take) if take < 0) { -1 } else { 1 });
        Ok(self.load(window, includes).await?.into_iter().next())
    }

    pub async fn find_many_including(
        self,
        args: FindArgs<E::Key>,
        includes: Vec<Include>,
    ) -> Result<Vec<Loaded<E>>> {
        self.load(args.into_window(), includes).await
    }

    /// Reads the window and its relations against one snapshot.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(model = E::schema().model, relations = includes.len())
    )]
    async fn load(self, window: Window, includes: Vec<Include>) -> Result<Vec<Loaded<E>>> {
        let mut conn = self.source.acquire().await?;
        let mut tx = sqlx::Connection::begin(&mut *conn).await?;
        let records = find_window::<E>(&mut tx, &window).await?;
        let parents: Vec<_> = records.iter().cloned().map(Entity::into_any).collect();
        let relations = load_relations(&mut tx, E::KIND, &parents, &includes).await?;
        tx.commit().await?;
        Ok(records
            .into_iter()
            .zip(relations)
            .map(|(record, relations)| Loaded { record, relations })
            .collect())
    }

    /// The named fields of every row in the window.
    #[tracing::instrument(level = "debug", skip_all, fields(model = E::schema().model))]
    pub async fn select(self, args: FindArgs<E::Key>, fields: &[&str]) -> Result<Vec<Projection>> {
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let fields = projection_fields(Self::schema(), &fields)?;
        let mut conn = self.source.acquire().await?;
        let rows = fetch_rows(&mut conn, Self::schema(), &args.into_window()).await?;
        rows.iter().map(|row| project(row, &fields)).collect()
    }

    #[tracing::instrument(level = "debug", skip_all, fields(model = E::schema().model))]
    pub async fn create(self, data: E::Create) -> Result<E> {
        let row = checked_row(Self::schema(), data.into_row(Utc::now()))?;
        let mut qb = insert_statement(Self::schema(), &row, false);
        push_row_values(&mut qb, row);
        qb.push(" RETURNING *");
        let mut conn = self.source.acquire().await?;
        let created = qb.build_query_as::<E>().fetch_one(&mut *conn).await?;
        tracing::debug!(id = created.id(), "created");
        Ok(created)
    }

    /// Inserts every row, or none of them. With `skip_duplicates`, rows that
    /// would violate a unique constraint are left out and not counted.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(model = E::schema().model, rows = data.len())
    )]
    pub async fn create_many(
        self,
        data: Vec<E::Create>,
        skip_duplicates: bool,
    ) -> Result<BatchCount> {
        let now = Utc::now();
        let rows = data
            .into_iter()
            .map(|item| checked_row(Self::schema(), item.into_row(now)))
            .collect::<Result<Vec<_>>>()?;
        if rows.is_empty() {
            return Ok(BatchCount { count: 0 });
        }

        let mut conn = self.source.acquire().await?;
        let mut tx = sqlx::Connection::begin(&mut *conn).await?;
        let mut count = 0;
        let mut rows = rows.into_iter().peekable();
        while let Some(first) = rows.next() {
            let mut qb = insert_statement(Self::schema(), &first, skip_duplicates);
            push_row_values(&mut qb, first);
            for _ in 1..INSERT_CHUNK {
                let Some(row) = rows.next() else { break };
                qb.push(", ");
                push_row_values(&mut qb, row);
            }
            count += qb.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(BatchCount { count })
    }

    #[tracing::instrument(level = "debug", skip_all, fields(model = E::schema().model))]
    pub async fn update(self, key: E::Key, data: E::Update) -> Result<E> {
        let mut conn = self.source.acquire().await?;
        update_one::<E>(&mut conn, &key.into_filter(), data)
            .await?
            .ok_or_else(Self::not_found)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(model = E::schema().model))]
    pub async fn update_many(self, filter: Filter, data: E::Update) -> Result<BatchCount> {
        let schema = Self::schema();
        let assignments = assignments(schema, data)?;
        let mut conn = self.source.acquire().await?;
        if assignments.is_empty() {
            let count = count_rows(&mut conn, schema, Some(&filter)).await?;
            return Ok(BatchCount { count });
        }
        let mut qb = Sql::new(format!("UPDATE \"{}\" SET ", schema.table));
        push_assignments(&mut qb, schema, assignments)?;
        qb.push(" WHERE ");
        push_filter(&mut qb, schema, &filter)?;
        tracing::debug!(sql = qb.sql(), "updating many");
        let count = qb.build().execute(&mut *conn).await?.rows_affected();
        Ok(BatchCount { count })
    }

    /// Updates the row matching `key`, or creates it from `create`.
    #[tracing::instrument(level = "debug", skip_all, fields(model = E::schema().model))]
    pub async fn upsert(self, key: E::Key, create: E::Create, update: E::Update) -> Result<E> {
        let schema = Self::schema();
        let filter = key.into_filter();
        let mut conn = self.source.acquire().await?;
        let mut tx = sqlx::Connection::begin(&mut *conn).await?;
        let record = match find_one::<E>(&mut tx, &filter).await? {
            Some(existing) => {
                let by_id = Filter::field("id").equals(existing.id());
                update_one::<E>(&mut tx, &by_id, update)
                    .await?
                    .ok_or_else(Self::not_found)?
            }
            None => {
                let row = checked_row(schema, create.into_row(Utc::now()))?;
                let mut qb = insert_statement(schema, &row, false);
                push_row_values(&mut qb, row);
                qb.push(" RETURNING *");
                qb.build_query_as::<E>().fetch_one(&mut *tx).await?
            }
        };
        tx.commit().await?;
        Ok(record)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(model = E::schema().model))]
    pub async fn delete(self, key: E::Key) -> Result<E> {
        let schema = Self::schema();
        let mut qb = Sql::new(format!("DELETE FROM \"{}\" WHERE ", schema.table));
        push_filter(&mut qb, schema, &key.into_filter())?;
        qb.push(" RETURNING *");
        let mut conn = self.source.acquire().await?;
        qb.build_query_as::<E>()
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(Self::not_found)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(model = E::schema().model))]
    pub async fn delete_many(self, filter: Filter) -> Result<BatchCount> {
        let schema = Self::schema();
        let mut qb = Sql::new(format!("DELETE FROM \"{}\" WHERE ", schema.table));
        push_filter(&mut qb, schema, &filter)?;
        let mut conn = self.source.acquire().await?;
        let count = qb.build().execute(&mut *conn).await?.rows_affected();
        Ok(BatchCount { count })
    }

    pub async fn count(self, filter: Option<Filter>) -> Result<u64> {
        let mut conn = self.source.acquire().await?;
        count_rows(&mut conn, Self::schema(), filter.as_ref()).await
    }

    #[tracing::instrument(level = "debug", skip_all, fields(model = E::schema().model))]
    pub async fn aggregate(self, args: AggregateArgs<E::Key>) -> Result<Aggregates> {
        let mut conn = self.source.acquire().await?;
        aggregate::aggregate(&mut conn, Self::schema(), args).await
    }

    #[tracing::instrument(level = "debug", skip_all, fields(model = E::schema().model))]
    pub async fn group_by(self, args: GroupByArgs) -> Result<Vec<GroupRow>> {
        let mut conn = self.source.acquire().await?;
        aggregate::group_by(&mut conn, Self::schema(), args).await
    }
}

async fn find_window<E: Entity>(conn: &mut SqliteConnection, window: &Window) -> Result<Vec<E>> {
    let rows = fetch_rows(conn, E::schema(), window).await?;
    rows.iter()
        .map(|row| E::from_row(row).map_err(Error::from))
        .collect()
}

async fn find_one<E: Entity>(conn: &mut SqliteConnection, filter: &Filter) -> Result<Option<E>> {
    let window = Window {
        take: Some(1),
        ..Window::filtered(Some(filter.clone()))
    };
    Ok(find_window::<E>(conn, &window).await?.into_iter().next())
}

async fn count_rows(
    conn: &mut SqliteConnection,
    schema: &'static Schema,
    filter: Option<&Filter>,
) -> Result<u64> {
    let mut qb = Sql::new(format!("SELECT COUNT(*) FROM \"{}\" WHERE ", schema.table));
    match filter {
        Some(filter) => push_filter(&mut qb, schema, filter)?,
        None => {
            qb.push("1");
        }
    }
    let count = qb.build_query_scalar::<i64>().fetch_one(&mut *conn).await?;
    Ok(count as u64)
}

async fn update_one<E: Entity>(
    conn: &mut SqliteConnection,
    filter: &Filter,
    data: E::Update,
) -> Result<Option<E>> {
    let schema = E::schema();
    let assignments = assignments(schema, data)?;
    if assignments.is_empty() {
        return find_one::<E>(conn, filter).await;
    }
    let mut qb = Sql::new(format!("UPDATE \"{}\" SET ", schema.table));
    push_assignments(&mut qb, schema, assignments)?;
    qb.push(" WHERE ");
    push_filter(&mut qb, schema, filter)?;
    qb.push(" RETURNING *");
    tracing::debug!(sql = qb.sql(), "updating");
    Ok(qb.build_query_as::<E>().fetch_optional(&mut *conn).await?)
}

/// Validates every column of a new row against the schema.
fn checked_row(
    schema: &'static Schema,
    row: Vec<(&'static str, Value)>,
) -> Result<Vec<(&'static str, Bound)>> {
    row.into_iter()
        .map(|(name, value)| Ok((name, coerce(schema.field(name)?, &value)?)))
        .collect()
}

fn insert_statement(schema: &Schema, row: &[(&'static str, Bound)], skip_duplicates: bool) -> Sql {
    let columns = row
        .iter()
        .map(|(name, _)| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let verb = if skip_duplicates {
        "INSERT OR IGNORE"
    } else {
        "INSERT"
    };
    Sql::new(format!(
        "{verb} INTO \"{}\" ({columns}) VALUES ",
        schema.table
    ))
}

fn push_row_values(qb: &mut Sql, row: Vec<(&'static str, Bound)>) {
    qb.push("(");
    for (i, (_, value)) in row.into_iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        push_bound(qb, value);
    }
    qb.push(")");
}

/// The update's assignments plus the `updated_at` refresh where the model has one.
fn assignments<U: Changes>(schema: &Schema, data: U) -> Result<Vec<Assignment>> {
    let mut assignments = data.into_assignments();
    if assignments.iter().any(|a| a.field == "id") {
        return Err(Error::validation(format!(
            "the id of a {} cannot be changed",
            schema.model
        )));
    }
    if !assignments.is_empty() && schema.has_field("updated_at") {
        assignments.retain(|a| a.field != "updated_at");
        assignments.push(Assignment::set("updated_at", Utc::now()));
    }
    Ok(assignments)
}

fn push_assignments(
    qb: &mut Sql,
    schema: &'static Schema,
    assignments: Vec<Assignment>,
) -> Result<()> {
    for (i, assignment) in assignments.into_iter().enumerate() {
        let field = schema.field(assignment.field)?;
        let column = format!("\"{}\"", field.name);
        if i > 0 {
            qb.push(", ");
        }
        let arithmetic = |op: &str, operand: i64, qb: &mut Sql| -> Result<()> {
            if !field.kind.is_numeric() {
                return Err(Error::validation(format!(
                    "`{}` is not numeric and cannot be updated arithmetically",
                    field.name
                )));
            }
            qb.push(format!("{column} = {column} {op} ")).push_bind(operand);
            Ok(())
        };
        match assignment.op {
            AssignOp::Set(value) => {
                qb.push(format!("{column} = "));
                push_bound(qb, coerce(field, &value)?);
            }
            AssignOp::Push(items) => {
                if field.kind != FieldKind::StringList {
                    return Err(Error::validation(format!(
                        "`push` needs a list field, `{}` is not one",
                        field.name
                    )));
                }
                if items.is_empty() {
                    qb.push(format!("{column} = {column}"));
                    continue;
                }
                qb.push(format!("{column} = json_insert({column}"));
                for item in items {
                    qb.push(", '$[#]', ").push_bind(item);
                }
                qb.push(")");
            }
            AssignOp::Increment(n) => arithmetic("+", n, qb)?,
            AssignOp::Decrement(n) => arithmetic("-", n, qb)?,
            AssignOp::Multiply(n) => arithmetic("*", n, qb)?,
            AssignOp::Divide(0) => {
                return Err(Error::validation(format!(
                    "division of `{}` by zero",
                    field.name
                )))
            }
            AssignOp::Divide(n) => arithmetic("/", n, qb)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{entity::IntUpdate, models::TestCaseResultUpdate, schema::EntityKind};

    fn compile(data: TestCaseResultUpdate) -> Result<String> {
        let schema = EntityKind::TestCaseResult.schema();
        let mut qb = Sql::new("");
        push_assignments(&mut qb, schema, assignments(schema, data)?)?;
        Ok(qb.sql().to_string())
    }

    #[test]
    fn arithmetic_updates_compile_in_place() {
        let sql = compile(TestCaseResultUpdate {
            test_case: Some(IntUpdate::Increment(2)),
            passed: Some(true),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(sql, "\"test_case\" = \"test_case\" + ?, \"passed\" = ?");
    }

    #[test]
    fn division_by_zero_is_rejected() {
        let err = compile(TestCaseResultUpdate {
            test_case: Some(IntUpdate::Divide(0)),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn updated_at_is_refreshed() {
        let schema = EntityKind::Playlist.schema();
        let data = crate::models::PlaylistUpdate {
            name: Some("renamed".into()),
            ..Default::default()
        };
        let fields: Vec<_> = assignments(schema, data)
            .unwrap()
            .into_iter()
            .map(|a| a.field)
            .collect();
        assert_eq!(fields, ["name", "updated_at"]);
    }
}
