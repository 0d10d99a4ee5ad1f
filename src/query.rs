//! One full engine pass: filter, sort, group, summarize, paginate.

use anyhow::Result;
use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::filter::FilterSpec;
use crate::group::{field_key, group_by, GroupKeyMode};
use crate::page::{paginate, Page, PageState};
use crate::record::{FieldRegistry, Record};
use crate::sort::{Comparator, SortSpec};
use crate::stats::{aggregate, Statistics, StatsSpec};

/// Caller-owned query state. The engine keeps nothing between runs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub filter: FilterSpec,
    pub sort: Option<SortSpec>,
    pub group_by: Option<String>,
    #[serde(default)]
    pub group_key_mode: GroupKeyMode,
    #[serde(default)]
    pub page: PageState,
    /// Attach a statistics summary to each group on the page.
    #[serde(default)]
    pub group_stats: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroupView<'a> {
    pub key: String,
    pub records: Vec<&'a Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<Statistics>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rows<'a> {
    Flat(Page<&'a Record>),
    Grouped(Page<GroupView<'a>>),
}

impl Rows<'_> {
    pub fn page(&self) -> usize {
        match self { Rows::Flat(p) => p.page, Rows::Grouped(p) => p.page }
    }

    pub fn display_total_pages(&self) -> usize {
        match self { Rows::Flat(p) => p.display_total_pages(), Rows::Grouped(p) => p.display_total_pages() }
    }

    /// Records visible on the current page, in display order.
    pub fn visible(&self) -> Vec<&Record> {
        match self {
            Rows::Flat(p) => p.items.to_vec(),
            Rows::Grouped(p) => p.items.iter().flat_map(|g| g.records.iter().copied()).collect(),
        }
    }
}

/// Everything a renderer or exporter needs from one pass.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReportView<'a> {
    /// Filtered and sorted population; exports default to this.
    pub records: Vec<&'a Record>,
    /// Computed over `records`, never over the page.
    pub stats: Statistics,
    pub rows: Rows<'a>,
    pub total_input: usize,
}

/// Runs the pipeline. Only caller defects (sorting by an unregistered field)
/// fail; bad data and out-of-range pages resolve to documented defaults.
pub fn run<'a, Tz: TimeZone>(
    records: &'a [Record],
    registry: &FieldRegistry,
    stats: &StatsSpec,
    query: &Query,
    now: &DateTime<Tz>,
) -> Result<ReportView<'a>> {
    let filtered = query.filter.apply(records, registry, now);
    let sorted = match query.sort.as_ref() {
        Some(spec) => Comparator::new(registry, spec)?.sort(&filtered),
        None => filtered,
    };
    let tz = now.timezone();
    let summary = aggregate(&sorted, stats, registry, &tz);
    let PageState { page, page_size } = query.page;
    let rows = match query.group_by.as_deref() {
        Some(field) => {
            let groups: Vec<GroupView> = group_by(&sorted, field_key(field, query.group_key_mode))
                .into_iter()
                .map(|g| GroupView {
                    stats: query.group_stats.then(|| aggregate(&g.records, stats, registry, &tz)),
                    key: g.key,
                    records: g.records,
                })
                .collect();
            Rows::Grouped(paginate(&groups, page, page_size))
        }
        None => Rows::Flat(paginate(&sorted, page, page_size)),
    };
    log::debug!("query: {} of {} records, page {} of {}", sorted.len(), records.len(), rows.page(), rows.display_total_pages());
    Ok(ReportView { records: sorted, stats: summary, rows, total_input: records.len() })
}
