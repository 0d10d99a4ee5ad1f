//! Aggregation and reporting over operational records: search, filter, sort,
//! group, summarize, paginate and export.
//!
//! The engine modules are pure functions over a borrowed record snapshot;
//! [`query::run`] chains them in order. `loader` and `config` are the
//! command-line side.

pub mod config;
pub mod debounce;
pub mod export;
pub mod filter;
pub mod group;
pub mod html;
pub mod loader;
pub mod markdown;
pub mod normalize;
pub mod page;
pub mod query;
pub mod record;
pub mod sort;
pub mod stats;

pub use filter::{FilterSpec, Operator, Predicate, QuickRange};
pub use group::{group_by, Group, GroupKeyMode};
pub use page::{paginate, Page, PageState};
pub use query::{run, Query, ReportView, Rows};
pub use record::{FieldRegistry, FieldType, Record, Value};
pub use sort::{Comparator, Direction, SortSpec};
pub use stats::{aggregate, Statistics, StatsSpec, Trend};
