use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::export::{Column, Zone};
use crate::filter::{Predicate, QuickRange};
use crate::group::GroupKeyMode;
use crate::html::Theme;
use crate::record::{FieldDef, FieldRegistry};
use crate::sort::Direction;
use crate::stats::StatsSpec;

pub const DEFAULT_CONFIG_FILE: &str = "FleetReport.toml";

/// Report definition read from TOML. Every key is optional.
///
/// ```toml
/// name = "speed violations"
/// date_field = "at"
/// search_fields = ["plate", "driver"]
///
/// [[fields]]
/// name = "speed_over_limit"
/// type = "number"
///
/// [stats.buckets]
/// field = "speed_over_limit"
/// rules = [{ label = "low", op = "lte", value = 10 }, { label = "critical", op = "gt", value = 10 }]
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportConfig {
    /// Used for export file names.
    pub name: Option<String>,
    pub title: Option<String>,
    pub fields: Vec<FieldDef>,
    pub columns: Vec<Column>,
    pub search_fields: Vec<String>,
    pub date_field: Option<String>,
    pub stats: StatsSpec,
    pub filters: Vec<Predicate>,
    pub range: Option<QuickRange>,
    pub sort: Option<String>,
    pub direction: Option<Direction>,
    pub group_by: Option<String>,
    pub group_key_mode: Option<GroupKeyMode>,
    pub page_size: Option<usize>,
    pub theme: Option<Theme>,
    pub time_zone: Option<Zone>,
    pub time_format: Option<String>,
}

impl ReportConfig {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid report configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Explicit path, else `FleetReport.toml` in the working directory, else defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit { return Self::load(p); }
        let def = Path::new(DEFAULT_CONFIG_FILE);
        if def.is_file() {
            log::debug!("using {}", DEFAULT_CONFIG_FILE);
            return Self::load(def);
        }
        Ok(Self::default())
    }

    pub fn registry(&self) -> FieldRegistry { FieldRegistry::from_defs(self.fields.clone()) }

    /// Configured columns, or one per registered field.
    pub fn columns(&self, registry: &FieldRegistry) -> Vec<Column> {
        if self.columns.is_empty() { Column::defaults(registry) } else { self.columns.clone() }
    }

    /// Stats to compute. The timeline and the trend order follow `date_field`
    /// (the configured one when `None`) unless set explicitly.
    pub fn stats_spec(&self, date_field: Option<&str>) -> StatsSpec {
        let date_field = date_field.map(str::to_string).or_else(|| self.date_field.clone());
        let mut spec = self.stats.clone();
        if spec.timeline_field.is_none() { spec.timeline_field = date_field.clone(); }
        if let Some(t) = spec.trend.as_mut() && t.date_field.is_none() {
            t.date_field = date_field;
        }
        spec
    }

    pub fn report_name(&self) -> &str { self.name.as_deref().unwrap_or("report") }

    pub fn title(&self) -> &str { self.title.as_deref().or(self.name.as_deref()).unwrap_or("Report") }
}
