//! Persistence for the judge: typed records over SQLite with runtime-checked
//! filters, relation loading, aggregates and transactions.
//!
//! ```no_run
//! # async fn demo() -> codejudge_store::Result<()> {
//! use codejudge_store::{Database, Filter, FindArgs, OrderBy, StoreConfig};
//!
//! let db = Database::connect(&StoreConfig::from_env()).await?;
//! db.run_migrations().await?;
//! let easy = db
//!     .problems()
//!     .find_many(
//!         FindArgs::new()
//!             .filter(Filter::field("difficulty").equals("EASY"))
//!             .order_by(OrderBy::asc("title")),
//!     )
//!     .await?;
//! # let _ = easy;
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod config;
pub mod db;
pub mod delegate;
pub mod entity;
pub mod error;
pub mod filter;
pub mod include;
pub mod models;
pub mod query;
pub mod schema;
pub mod tx;
pub mod value;

pub use aggregate::{
    AggregateArgs, AggregateFn, AggregateSelection, Aggregates, GroupByArgs, GroupOrder, GroupRow,
    Having,
};
pub use config::StoreConfig;
pub use db::Database;
pub use delegate::{BatchCount, Delegate};
pub use entity::{AnyModel, Entity, IntUpdate, ListUpdate, UniqueKey};
pub use error::{Error, ErrorKind, Result};
pub use filter::{Condition, Filter, JsonFilter, JsonOp, QueryMode, RelationCondition, TextOp};
pub use include::{Include, IncludeArgs, Loaded, Related};
pub use query::{Direction, FindArgs, Nulls, OrderBy, Projection};
pub use tx::{step, BatchOutput, BatchStep, IsolationLevel, Tx, TxOptions};
pub use value::Value;
