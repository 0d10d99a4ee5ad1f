//! Derived summaries over a filtered record population.
//!
//! Everything here is recomputed from the records passed in; callers hand over
//! the whole filtered set, never a page slice.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::normalize::normalize;
use crate::record::{FieldRegistry, Record};

/// Label of the implicit bucket for records no rule claims.
pub const UNKNOWN_BUCKET: &str = "unknown";

/// Breakdown label for records without a value.
pub const NO_VALUE: &str = "(none)";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BucketRule {
    pub label: String,
    pub op: ThresholdOp,
    pub value: f64,
}

impl BucketRule {
    pub fn new(label: &str, op: ThresholdOp, value: f64) -> Self {
        Self { label: label.to_string(), op, value }
    }

    pub fn matches(&self, v: f64) -> bool {
        match self.op {
            ThresholdOp::Lt => v < self.value,
            ThresholdOp::Lte => v <= self.value,
            ThresholdOp::Gt => v > self.value,
            ThresholdOp::Gte => v >= self.value,
            ThresholdOp::Eq => v == self.value,
        }
    }
}

/// Ordered rules over one numeric field; list them from least to most severe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub field: String,
    pub rules: Vec<BucketRule>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCount {
    pub label: String,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub field: String,
    pub buckets: Vec<BucketCount>,
}

impl Distribution {
    pub fn total(&self) -> usize { self.buckets.iter().map(|b| b.count).sum() }

    pub fn get(&self, label: &str) -> usize {
        self.buckets.iter().find(|b| b.label == label).map(|b| b.count).unwrap_or(0)
    }
}

/// First matching rule wins; the unknown bucket is always present.
pub fn classify(records: &[&Record], spec: &BucketSpec) -> Distribution {
    let mut counts = vec![0usize; spec.rules.len()];
    let mut unknown = 0usize;
    for r in records {
        let hit = r.number(&spec.field).and_then(|v| spec.rules.iter().position(|rule| rule.matches(v)));
        match hit { Some(i) => counts[i] += 1, None => unknown += 1 }
    }
    let mut buckets: Vec<BucketCount> = Vec::with_capacity(spec.rules.len() + 1);
    for (rule, count) in spec.rules.iter().zip(counts) {
        // repeated labels share one bucket
        match buckets.iter_mut().find(|b| b.label == rule.label) {
            Some(b) => b.count += count,
            None => buckets.push(BucketCount { label: rule.label.clone(), count }),
        }
    }
    match buckets.iter_mut().find(|b| b.label == UNKNOWN_BUCKET) {
        Some(b) => b.count += unknown,
        None => buckets.push(BucketCount { label: UNKNOWN_BUCKET.to_string(), count: unknown }),
    }
    Distribution { field: spec.field.clone(), buckets }
}

/// Per-value counts: declared values first (zero-filled), then values seen in the
/// data in first-seen order, then the unknown bucket for missing values.
pub fn distribution(records: &[&Record], field: &str, declared: &[String]) -> Distribution {
    let mut buckets: Vec<BucketCount> = declared.iter().map(|v| BucketCount { label: v.clone(), count: 0 }).collect();
    let mut index: HashMap<String, usize> = declared.iter().enumerate().map(|(i, v)| (normalize(v), i)).collect();
    let mut unknown = 0usize;
    for r in records {
        let Some(v) = r.text(field) else { unknown += 1; continue };
        let key = normalize(&v);
        match index.get(&key) {
            Some(&i) => buckets[i].count += 1,
            None => {
                index.insert(key, buckets.len());
                buckets.push(BucketCount { label: v, count: 1 });
            }
        }
    }
    buckets.push(BucketCount { label: UNKNOWN_BUCKET.to_string(), count: unknown });
    Distribution { field: field.to_string(), buckets }
}

/// Top-N values by count, ties broken by value text.
pub fn breakdown(records: &[&Record], field: &str, top: usize) -> Distribution {
    let mut m: HashMap<String, usize> = HashMap::new();
    for r in records {
        let k = r.text(field).unwrap_or_else(|| NO_VALUE.to_string());
        *m.entry(k).or_insert(0) += 1;
    }
    let mut v: Vec<(String, usize)> = m.into_iter().collect();
    v.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Distribution { field: field.to_string(), buckets: v.into_iter().take(top).map(|(label, count)| BucketCount { label, count }).collect() }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NumericSummary {
    pub field: String,
    /// Records that carried a usable value.
    pub samples: usize,
    pub sum: f64,
    pub average: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Sum/average/min/max over the records carrying `field`; the average of nothing is 0.
pub fn summarize(records: &[&Record], field: &str) -> NumericSummary {
    let values: Vec<f64> = records.iter().filter_map(|r| r.number(field)).collect();
    let sum: f64 = values.iter().sum();
    let average = if values.is_empty() { 0.0 } else { sum / values.len() as f64 };
    NumericSummary {
        field: field.to_string(),
        samples: values.len(),
        sum,
        average,
        min: values.iter().copied().reduce(f64::min),
        max: values.iter().copied().reduce(f64::max),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Trend {
    Insufficient,
    Delta { first_half_avg: f64, second_half_avg: f64, percent: f64 },
}

impl Trend {
    pub fn percent(&self) -> Option<f64> {
        match self { Trend::Delta { percent, .. } => Some(*percent), Trend::Insufficient => None }
    }

    pub fn describe(&self) -> String {
        match self {
            Trend::Insufficient => "insufficient data".to_string(),
            Trend::Delta { percent, .. } => format!("{:+.1}%", percent),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrendSpec {
    pub field: String,
    /// Chronological order for the split; input order is used when absent.
    pub date_field: Option<String>,
}

/// Signed percentage change between the index halves of the series.
pub fn trend(records: &[&Record], spec: &TrendSpec) -> Trend {
    let mut series: Vec<(Option<DateTime<Utc>>, f64)> = records
        .iter()
        .filter_map(|r| r.number(&spec.field).map(|v| (spec.date_field.as_deref().and_then(|d| r.date(d)), v)))
        .collect();
    if series.len() < 2 { return Trend::Insufficient; }
    if spec.date_field.is_some() {
        // stable: equal instants keep input order, undated points lead
        series.sort_by(|a, b| a.0.cmp(&b.0));
    }
    let values: Vec<f64> = series.into_iter().map(|(_, v)| v).collect();
    let (first, second) = values.split_at(values.len() / 2);
    let avg = |s: &[f64]| s.iter().sum::<f64>() / s.len() as f64;
    let (a, b) = (avg(first), avg(second));
    let percent = if a == 0.0 {
        if b > 0.0 { 100.0 } else { 0.0 }
    } else {
        (b - a) / a * 100.0
    };
    Trend::Delta { first_half_avg: a, second_half_avg: b, percent }
}

/// Counts per calendar bucket in `tz`: hourly when the data spans under two
/// days, daily otherwise.
pub fn timeline<Tz: TimeZone>(records: &[&Record], date_field: &str, tz: &Tz) -> Vec<BucketCount> {
    let dates: Vec<DateTime<Utc>> = records.iter().filter_map(|r| r.date(date_field)).collect();
    let (Some(min), Some(max)) = (dates.iter().min(), dates.iter().max()) else { return vec![] };
    let hourly = (*max - *min).num_days() < 2;
    let mut buckets: BTreeMap<String, usize> = BTreeMap::new();
    for d in &dates {
        let local = d.with_timezone(tz).naive_local();
        let key = if hourly { local.format("%Y-%m-%d %H:00").to_string() } else { local.format("%Y-%m-%d").to_string() };
        *buckets.entry(key).or_insert(0) += 1;
    }
    buckets.into_iter().map(|(label, count)| BucketCount { label, count }).collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BreakdownSpec {
    pub field: String,
    #[serde(default = "default_top")]
    pub top: usize,
}

fn default_top() -> usize { 10 }

/// Which summaries to derive.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSpec {
    #[serde(default)]
    pub numeric_fields: Vec<String>,
    pub buckets: Option<BucketSpec>,
    pub trend: Option<TrendSpec>,
    /// Enum fields reported as full value distributions.
    #[serde(default)]
    pub distributions: Vec<String>,
    pub breakdown: Option<BreakdownSpec>,
    pub timeline_field: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub count: usize,
    pub numeric: Vec<NumericSummary>,
    pub buckets: Option<Distribution>,
    pub trend: Option<Trend>,
    pub distributions: Vec<Distribution>,
    pub breakdown: Option<Distribution>,
    pub timeline: Vec<BucketCount>,
}

impl Statistics {
    pub fn numeric(&self, field: &str) -> Option<&NumericSummary> {
        self.numeric.iter().find(|n| n.field == field)
    }
}

/// Calendar buckets are labelled in `tz`.
pub fn aggregate<Tz: TimeZone>(records: &[&Record], spec: &StatsSpec, registry: &FieldRegistry, tz: &Tz) -> Statistics {
    let stats = Statistics {
        count: records.len(),
        numeric: spec.numeric_fields.iter().map(|f| summarize(records, f)).collect(),
        buckets: spec.buckets.as_ref().map(|b| classify(records, b)),
        trend: spec.trend.as_ref().map(|t| trend(records, t)),
        distributions: spec
            .distributions
            .iter()
            .map(|f| distribution(records, f, registry.def(f).map(|d| d.values.as_slice()).unwrap_or(&[])))
            .collect(),
        breakdown: spec.breakdown.as_ref().map(|b| breakdown(records, &b.field, b.top)),
        timeline: spec.timeline_field.as_deref().map(|f| timeline(records, f, tz)).unwrap_or_default(),
    };
    log::debug!("stats: {} records, {} numeric summaries", stats.count, stats.numeric.len());
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldType;

    fn speeds(values: &[Option<f64>]) -> Vec<Record> {
        values.iter().enumerate().map(|(i, v)| {
            let r = Record::new((i + 1).to_string());
            match v { Some(x) => r.with("speed_over_limit", *x), None => r }
        }).collect()
    }

    fn severity() -> BucketSpec {
        BucketSpec {
            field: "speed_over_limit".into(),
            rules: vec![
                BucketRule::new("low", ThresholdOp::Lte, 10.0),
                BucketRule::new("medium", ThresholdOp::Lte, 20.0),
                BucketRule::new("high", ThresholdOp::Lte, 30.0),
                BucketRule::new("critical", ThresholdOp::Gt, 30.0),
            ],
        }
    }

    #[test]
    fn severity_buckets_first_match_wins() {
        let d = speeds(&[Some(5.0), Some(12.0), Some(22.0), Some(35.0), Some(8.0)]);
        let refs: Vec<&Record> = d.iter().collect();
        let dist = classify(&refs, &severity());
        assert_eq!(dist.get("low"), 2);
        assert_eq!(dist.get("medium"), 1);
        assert_eq!(dist.get("high"), 1);
        assert_eq!(dist.get("critical"), 1);
        assert_eq!(dist.get(UNKNOWN_BUCKET), 0);
        assert_eq!(dist.total(), 5);
        assert_eq!(dist.buckets.last().map(|b| b.label.as_str()), Some(UNKNOWN_BUCKET));
    }

    #[test]
    fn unmatched_and_missing_values_land_in_unknown() {
        let d = speeds(&[Some(5.0), None, Some(-1.0)]);
        let refs: Vec<&Record> = d.iter().collect();
        let spec = BucketSpec { field: "speed_over_limit".into(), rules: vec![BucketRule::new("ok", ThresholdOp::Gte, 0.0)] };
        let dist = classify(&refs, &spec);
        assert_eq!(dist.get("ok"), 1);
        assert_eq!(dist.get(UNKNOWN_BUCKET), 2);
        assert_eq!(dist.total(), refs.len());
    }

    #[test]
    fn averages_of_nothing_are_zero() {
        let s = summarize(&[], "km");
        assert_eq!(s.average, 0.0);
        assert_eq!(s.sum, 0.0);
        assert_eq!(s.min, None);
        let d = speeds(&[Some(4.0), None, Some(8.0)]);
        let refs: Vec<&Record> = d.iter().collect();
        let s = summarize(&refs, "speed_over_limit");
        assert_eq!((s.samples, s.sum, s.average, s.min, s.max), (2, 12.0, 6.0, Some(4.0), Some(8.0)));
    }

    #[test]
    fn trend_over_index_halves() {
        let d = speeds(&[Some(10.0), Some(10.0), Some(20.0), Some(20.0)]);
        let refs: Vec<&Record> = d.iter().collect();
        let t = trend(&refs, &TrendSpec { field: "speed_over_limit".into(), date_field: None });
        assert_eq!(t.percent(), Some(100.0));
        assert_eq!(t.describe(), "+100.0%");
        let one = speeds(&[Some(3.0)]);
        let refs: Vec<&Record> = one.iter().collect();
        assert_eq!(trend(&refs, &TrendSpec { field: "speed_over_limit".into(), date_field: None }), Trend::Insufficient);
    }

    #[test]
    fn trend_zero_baseline() {
        let spec = TrendSpec { field: "speed_over_limit".into(), date_field: None };
        let up = speeds(&[Some(0.0), Some(5.0)]);
        let refs: Vec<&Record> = up.iter().collect();
        assert_eq!(trend(&refs, &spec).percent(), Some(100.0));
        let flat = speeds(&[Some(0.0), Some(0.0)]);
        let refs: Vec<&Record> = flat.iter().collect();
        assert_eq!(trend(&refs, &spec).percent(), Some(0.0));
        let down = speeds(&[Some(20.0), Some(15.0)]);
        let refs: Vec<&Record> = down.iter().collect();
        assert_eq!(trend(&refs, &spec).percent(), Some(-25.0));
    }

    #[test]
    fn trend_orders_by_date_first() {
        let d = vec![
            Record::new("a").with("v", 20.0).with("at", "2025-01-04"),
            Record::new("b").with("v", 10.0).with("at", "2025-01-01"),
            Record::new("c").with("v", 20.0).with("at", "2025-01-03"),
            Record::new("d").with("v", 10.0).with("at", "2025-01-02"),
        ];
        let refs: Vec<&Record> = d.iter().collect();
        let t = trend(&refs, &TrendSpec { field: "v".into(), date_field: Some("at".into()) });
        assert_eq!(t.percent(), Some(100.0));
    }

    #[test]
    fn enum_distribution_zero_fills_declared_values() {
        let reg = FieldRegistry::new().declare_enum("method", &["GET", "POST", "DELETE"]).declare("n", FieldType::Number);
        let d = vec![
            Record::new("1").with("method", "get"),
            Record::new("2").with("method", "PATCH"),
            Record::new("3").with("method", "GET"),
            Record::new("4"),
        ];
        let refs: Vec<&Record> = d.iter().collect();
        let spec = StatsSpec { distributions: vec!["method".into()], ..Default::default() };
        let s = aggregate(&refs, &spec, &reg, &Utc);
        let dist = &s.distributions[0];
        let labels: Vec<(&str, usize)> = dist.buckets.iter().map(|b| (b.label.as_str(), b.count)).collect();
        assert_eq!(labels, vec![("GET", 2), ("POST", 0), ("DELETE", 0), ("PATCH", 1), (UNKNOWN_BUCKET, 1)]);
        assert_eq!(dist.total(), s.count);
    }

    #[test]
    fn breakdown_is_top_n_by_count() {
        let d: Vec<Record> = ["x", "y", "x", "z", "y", "x"].iter().enumerate().map(|(i, p)| Record::new(i.to_string()).with("plate", *p)).collect();
        let refs: Vec<&Record> = d.iter().collect();
        let b = breakdown(&refs, "plate", 2);
        assert_eq!(b.buckets, vec![BucketCount { label: "x".into(), count: 3 }, BucketCount { label: "y".into(), count: 2 }]);
    }

    #[test]
    fn breakdown_keeps_missing_apart_from_a_literal_unknown() {
        let d = vec![
            Record::new("1").with("plate", "unknown"),
            Record::new("2"),
            Record::new("3").with("plate", ""),
            Record::new("4").with("plate", "unknown"),
        ];
        let refs: Vec<&Record> = d.iter().collect();
        let b = breakdown(&refs, "plate", 10);
        assert_eq!(b.get("unknown"), 2);
        assert_eq!(b.get(NO_VALUE), 2);
    }

    #[test]
    fn timeline_picks_hourly_or_daily() {
        let short = vec![
            Record::new("1").with("at", "2025-01-01T10:15:00Z"),
            Record::new("2").with("at", "2025-01-01T10:45:00Z"),
            Record::new("3").with("at", "2025-01-01T12:00:00Z"),
            Record::new("4").with("at", "bad"),
        ];
        let refs: Vec<&Record> = short.iter().collect();
        let t = timeline(&refs, "at", &Utc);
        assert_eq!(t, vec![BucketCount { label: "2025-01-01 10:00".into(), count: 2 }, BucketCount { label: "2025-01-01 12:00".into(), count: 1 }]);
        let long = vec![Record::new("1").with("at", "2025-01-01"), Record::new("2").with("at", "2025-01-05")];
        let refs: Vec<&Record> = long.iter().collect();
        assert_eq!(timeline(&refs, "at", &Utc).len(), 2);
        assert_eq!(timeline(&refs, "at", &Utc)[1].label, "2025-01-05");
    }

    #[test]
    fn timeline_labels_follow_the_zone() {
        let d = vec![Record::new("1").with("at", "2025-01-01T23:30:00Z"), Record::new("2").with("at", "2025-01-02T00:15:00Z")];
        let refs: Vec<&Record> = d.iter().collect();
        let labels = |t: Vec<BucketCount>| t.into_iter().map(|b| b.label).collect::<Vec<_>>();
        assert_eq!(labels(timeline(&refs, "at", &Utc)), vec!["2025-01-01 23:00", "2025-01-02 00:00"]);
        let east = chrono::FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(labels(timeline(&refs, "at", &east)), vec!["2025-01-02 01:00", "2025-01-02 02:00"]);
    }
}
