//! Loading related records for `*_including` reads.
//!
//! Every requested relation costs one query for the whole set of parents;
//! rows are stitched back to their parents in memory.

use std::collections::{BTreeMap, HashMap, HashSet};

use futures::future::BoxFuture;
use serde::Serialize;
use sqlx::SqliteConnection;

use crate::{
    entity::{AnyModel, Entity},
    error::{Error, Result},
    filter::Filter,
    models::{
        ChatHistory, Playlist, Problem, ProblemInPlaylist, ProblemSolved, Submission,
        TestCaseResult, TokenBlacklist, User,
    },
    query::{fetch_rows, OrderBy, Window},
    schema::{EntityKind, RelationKind, Schema},
};

/// Parent ids bound per relation query, well under SQLite's variable limit.
const PARENT_CHUNK: usize = 500;

/// Filtering and pagination of the children of a has-many relation,
/// applied per parent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncludeArgs {
    pub filter: Option<Filter>,
    pub order_by: Vec<OrderBy>,
    /// Negative values keep the last children of the ordering.
    pub take: Option<i64>,
    pub skip: Option<u64>,
}

impl IncludeArgs {
    fn is_empty(&self) -> bool {
        self.filter.is_none()
            && self.order_by.is_empty()
            && self.take.is_none()
            && self.skip.is_none()
    }
}

/// A relation to load, with the relations of the related rows to load in turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Include {
    pub relation: String,
    pub args: IncludeArgs,
    pub include: Vec<Include>,
}

impl Include {
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            args: IncludeArgs::default(),
            include: Vec::new(),
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.args.filter = Some(filter);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.args.order_by.push(order);
        self
    }

    pub fn take(mut self, take: i64) -> Self {
        self.args.take = Some(take);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.args.skip = Some(skip);
        self
    }

    pub fn include(mut self, nested: Include) -> Self {
        self.include.push(nested);
        self
    }
}

/// The rows loaded for one relation of one parent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Related {
    One(Option<Box<Loaded<AnyModel>>>),
    Many(Vec<Loaded<AnyModel>>),
}

/// A record together with the relations that were requested for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Loaded<E> {
    #[serde(flatten)]
    pub record: E,
    #[serde(flatten)]
    pub relations: BTreeMap<String, Related>,
}

impl<E> Loaded<E> {
    pub fn related(&self, relation: &str) -> Option<&Related> {
        self.relations.get(relation)
    }

    /// The record behind a belongs-to relation.
    pub fn one<T: Entity>(&self, relation: &str) -> Option<&T> {
        match self.relations.get(relation)? {
            Related::One(Some(loaded)) => T::from_any(&loaded.record),
            _ => None,
        }
    }

    /// The records of a has-many relation, in their loaded order.
    pub fn many<T: Entity>(&self, relation: &str) -> Vec<&T> {
        match self.relations.get(relation) {
            Some(Related::Many(items)) => items
                .iter()
                .filter_map(|loaded| T::from_any(&loaded.record))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// The loaded wrapper of a belongs-to relation, for nested relations.
    pub fn one_loaded(&self, relation: &str) -> Option<&Loaded<AnyModel>> {
        match self.relations.get(relation)? {
            Related::One(Some(loaded)) => Some(loaded),
            _ => None,
        }
    }

    /// The loaded wrappers of a has-many relation, for nested relations.
    pub fn many_loaded(&self, relation: &str) -> &[Loaded<AnyModel>] {
        match self.relations.get(relation) {
            Some(Related::Many(items)) => items.as_slice(),
            _ => &[],
        }
    }
}

async fn fetch_typed<E: Entity>(
    conn: &mut SqliteConnection,
    window: &Window,
) -> Result<Vec<AnyModel>> {
    let rows = fetch_rows(conn, E::schema(), window).await?;
    rows.iter()
        .map(|row| Ok(E::from_row(row)?.into_any()))
        .collect()
}

/// Reads rows of a kind only known at runtime.
pub(crate) async fn fetch_any(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    window: &Window,
) -> Result<Vec<AnyModel>> {
    match kind {
        EntityKind::User => fetch_typed::<User>(conn, window).await,
        EntityKind::TokenBlacklist => fetch_typed::<TokenBlacklist>(conn, window).await,
        EntityKind::Problem => fetch_typed::<Problem>(conn, window).await,
        EntityKind::Submission => fetch_typed::<Submission>(conn, window).await,
        EntityKind::TestCaseResult => fetch_typed::<TestCaseResult>(conn, window).await,
        EntityKind::ProblemSolved => fetch_typed::<ProblemSolved>(conn, window).await,
        EntityKind::Playlist => fetch_typed::<Playlist>(conn, window).await,
        EntityKind::ProblemInPlaylist => fetch_typed::<ProblemInPlaylist>(conn, window).await,
        EntityKind::ChatHistory => fetch_typed::<ChatHistory>(conn, window).await,
    }
}

fn distinct_ids<'p>(values: impl Iterator<Item = Option<&'p str>>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .flatten()
        .filter(|value| seen.insert(*value))
        .map(str::to_string)
        .collect()
}

/// Fetches the rows of `kind` whose `column` is one of `ids`, one query per
/// chunk of ids. Rows of one id always come from the same query, so `order_by`
/// holds among them.
async fn fetch_scoped(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    column: &'static str,
    ids: &[String],
    filter: Option<&Filter>,
    order_by: &[OrderBy],
) -> Result<Vec<AnyModel>> {
    let mut rows = Vec::new();
    for chunk in ids.chunks(PARENT_CHUNK) {
        let scope = Filter::field(column).is_in(chunk.to_vec());
        let window = Window {
            filter: Some(match filter {
                Some(filter) => scope.and(filter.clone()),
                None => scope,
            }),
            order_by: order_by.to_vec(),
            ..Window::default()
        };
        rows.extend(fetch_any(&mut *conn, kind, &window).await?);
    }
    Ok(rows)
}

/// Applies skip/take to the children of one parent.
fn paginate(mut children: Vec<Loaded<AnyModel>>, args: &IncludeArgs) -> Vec<Loaded<AnyModel>> {
    let skip = args.skip.unwrap_or(0) as usize;
    match args.take {
        Some(take) if take < 0 => {
            let keep = take.unsigned_abs() as usize;
            let end = children.len().saturating_sub(skip);
            let start = end.saturating_sub(keep);
            children.truncate(end);
            children.drain(..start);
            children
        }
        Some(take) => children.into_iter().skip(skip).take(take as usize).collect(),
        None => children.into_iter().skip(skip).collect(),
    }
}

/// Loads `includes` for `parents` of `kind`, returning the relation map of
/// each parent in the same order.
pub(crate) fn load_relations<'c>(
    conn: &'c mut SqliteConnection,
    kind: EntityKind,
    parents: &'c [AnyModel],
    includes: &'c [Include],
) -> BoxFuture<'c, Result<Vec<BTreeMap<String, Related>>>> {
    Box::pin(async move {
        let schema: &'static Schema = kind.schema();
        let mut maps = vec![BTreeMap::new(); parents.len()];
        if parents.is_empty() {
            return Ok(maps);
        }

        for include in includes {
            let relation = schema.relation(&include.relation)?;
            let target = relation.target;
            match relation.kind {
                RelationKind::BelongsTo { foreign_key } => {
                    if !include.args.is_empty() {
                        return Err(Error::validation(format!(
                            "relation `{}` on {} points at a single record and takes no arguments",
                            relation.name, schema.model
                        )));
                    }
                    let ids = distinct_ids(parents.iter().map(|p| p.reference(foreign_key)));
                    let rows = fetch_scoped(&mut *conn, target, "id", &ids, None, &[]).await?;
                    let nested = load_relations(&mut *conn, target, &rows, &include.include).await?;
                    let by_id: HashMap<String, Loaded<AnyModel>> = rows
                        .into_iter()
                        .zip(nested)
                        .map(|(record, relations)| {
                            (record.id().to_string(), Loaded { record, relations })
                        })
                        .collect();
                    for (parent, map) in parents.iter().zip(maps.iter_mut()) {
                        let related = parent
                            .reference(foreign_key)
                            .and_then(|id| by_id.get(id))
                            .cloned()
                            .map(Box::new);
                        map.insert(relation.name.to_string(), Related::One(related));
                    }
                }
                RelationKind::HasMany { foreign_key } => {
                    let ids = distinct_ids(parents.iter().map(|p| Some(p.id())));
                    let rows = fetch_scoped(
                        &mut *conn,
                        target,
                        foreign_key,
                        &ids,
                        include.args.filter.as_ref(),
                        &include.args.order_by,
                    )
                    .await?;
                    let nested = load_relations(&mut *conn, target, &rows, &include.include).await?;
                    let mut grouped: HashMap<String, Vec<Loaded<AnyModel>>> = HashMap::new();
                    for (record, relations) in rows.into_iter().zip(nested) {
                        let Some(parent_id) = record.reference(foreign_key).map(str::to_string)
                        else {
                            continue;
                        };
                        grouped
                            .entry(parent_id)
                            .or_default()
                            .push(Loaded { record, relations });
                    }
                    for (parent, map) in parents.iter().zip(maps.iter_mut()) {
                        let children = grouped.remove(parent.id()).unwrap_or_default();
                        map.insert(
                            relation.name.to_string(),
                            Related::Many(paginate(children, &include.args)),
                        );
                    }
                }
            }
        }
        Ok(maps)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chat(id: &str) -> Loaded<AnyModel> {
        Loaded {
            record: AnyModel::ChatHistory(ChatHistory {
                id: id.to_string(),
                user_id: "u".into(),
                problem_id: "p".into(),
                message: "hi".into(),
                response: "hello".into(),
                message_type: "general".into(),
                created_at: Utc::now(),
            }),
            relations: BTreeMap::new(),
        }
    }

    fn ids(items: &[Loaded<AnyModel>]) -> Vec<&str> {
        items.iter().map(|l| l.record.id()).collect()
    }

    #[test]
    fn paginates_from_either_end() {
        let all = || ["a", "b", "c", "d"].into_iter().map(chat).collect::<Vec<_>>();
        let args = IncludeArgs {
            take: Some(2),
            skip: Some(1),
            ..IncludeArgs::default()
        };
        assert_eq!(ids(&paginate(all(), &args)), ["b", "c"]);

        let args = IncludeArgs {
            take: Some(-2),
            ..IncludeArgs::default()
        };
        assert_eq!(ids(&paginate(all(), &args)), ["c", "d"]);

        let args = IncludeArgs {
            take: Some(-3),
            skip: Some(2),
            ..IncludeArgs::default()
        };
        assert_eq!(ids(&paginate(all(), &args)), ["a", "b"]);
    }

    #[test]
    fn typed_accessors_downcast() {
        let mut parent = chat("parent");
        parent
            .relations
            .insert("children".into(), Related::Many(vec![chat("x"), chat("y")]));
        assert_eq!(parent.many::<ChatHistory>("children").len(), 2);
        assert!(parent.many::<User>("children").is_empty());
        assert!(parent.one::<ChatHistory>("children").is_none());
    }
}
