use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, Duration, NaiveDate, TimeZone, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::normalize::normalize;
use crate::record::{parse_date_only, parse_naive, FieldRegistry, FieldType, Record};

/// Relative date window resolved against the evaluation instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum QuickRange {
    #[serde(rename = "today")]
    Today,
    #[serde(rename = "yesterday")]
    Yesterday,
    #[serde(rename = "last7days")]
    Last7Days,
    #[serde(rename = "last30days")]
    Last30Days,
    #[default]
    #[serde(rename = "all")]
    All,
}

impl FromStr for QuickRange {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "today" => Ok(QuickRange::Today),
            "yesterday" => Ok(QuickRange::Yesterday),
            "last7days" => Ok(QuickRange::Last7Days),
            "last30days" => Ok(QuickRange::Last30Days),
            "all" | "" => Ok(QuickRange::All),
            other => Err(format!("unknown quick range '{}' (today, yesterday, last7days, last30days, all)", other)),
        }
    }
}

impl fmt::Display for QuickRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self { QuickRange::Today => "today", QuickRange::Yesterday => "yesterday", QuickRange::Last7Days => "last7days", QuickRange::Last30Days => "last30days", QuickRange::All => "all" };
        f.write_str(s)
    }
}

impl QuickRange {
    /// Calendar days in the zone of `now`; `last7days` is `[today - 6, today]`.
    pub fn resolve<Tz: TimeZone>(self, now: &DateTime<Tz>) -> Option<DateRange> {
        let today = now.date_naive();
        let (first, last) = match self {
            QuickRange::Today => (today, today),
            QuickRange::Yesterday => { let y = today.pred_opt()?; (y, y) }
            QuickRange::Last7Days => (today.checked_sub_days(Days::new(6))?, today),
            QuickRange::Last30Days => (today.checked_sub_days(Days::new(29))?, today),
            QuickRange::All => return None,
        };
        let tz = now.timezone();
        Some(DateRange { from: day_start(&tz, first), to: day_end(&tz, last) })
    }
}

/// Inclusive instant window; an open side is unconstrained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn is_open(&self) -> bool { self.from.is_none() && self.to.is_none() }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.from.is_none_or(|f| t >= f) && self.to.is_none_or(|u| t <= u)
    }
}

fn day_start<Tz: TimeZone>(tz: &Tz, d: NaiveDate) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&d.and_hms_opt(0, 0, 0)?).earliest().map(|t| t.with_timezone(&Utc))
}

fn day_end<Tz: TimeZone>(tz: &Tz, d: NaiveDate) -> Option<DateTime<Utc>> {
    day_start(tz, d.succ_opt()?).map(|t| t - Duration::nanoseconds(1))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side { From, To }

/// Query-side bound: explicit offsets are honored, zone-less text is read in `tz`,
/// and a bare date as the upper bound covers that whole day.
fn resolve_bound<Tz: TimeZone>(text: &str, side: Side, tz: &Tz) -> Option<DateTime<Utc>> {
    let t = text.trim();
    if t.is_empty() { return None; }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) { return Some(dt.with_timezone(&Utc)); }
    if let Some(d) = parse_date_only(t) {
        return match side { Side::From => day_start(tz, d), Side::To => day_end(tz, d) };
    }
    let naive = parse_naive(t)?;
    tz.from_local_datetime(&naive).earliest().map(|x| x.with_timezone(&Utc))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Contains,
    OneOf,
    NoneOf,
    Gte,
    Lte,
    Matches,
}

impl FromStr for Operator {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eq" | "=" | "==" => Ok(Operator::Eq),
            "ne" | "!=" => Ok(Operator::Ne),
            "contains" | "~" => Ok(Operator::Contains),
            "one_of" | "in" => Ok(Operator::OneOf),
            "none_of" | "not_in" => Ok(Operator::NoneOf),
            "gte" | ">=" => Ok(Operator::Gte),
            "lte" | "<=" => Ok(Operator::Lte),
            "matches" | "re" => Ok(Operator::Matches),
            other => Err(format!("unknown operator '{}'", other)),
        }
    }
}

/// `{field, operator, value}`; a blank value leaves the predicate inactive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: String,
    pub op: Operator,
    pub value: String,
}

impl Predicate {
    pub fn new(field: &str, op: Operator, value: &str) -> Self {
        Self { field: field.to_string(), op, value: value.to_string() }
    }

    pub fn is_active(&self) -> bool { !self.value.trim().is_empty() }
}

/// Parses `field:op:value` or the `field=value` shorthand.
impl FromStr for Predicate {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        if let (Some(f), Some(op), Some(v)) = (parts.next(), parts.next(), parts.next())
            && !f.trim().is_empty()
            && let Ok(op) = op.parse::<Operator>()
        {
            return Ok(Predicate { field: f.trim().to_string(), op, value: v.to_string() });
        }
        match s.split_once('=') {
            Some((f, v)) if !f.trim().is_empty() => Ok(Predicate::new(f.trim(), Operator::Eq, v)),
            _ => Err(format!("expected field:op:value or field=value, got '{}'", s)),
        }
    }
}

/// Every active part must hold for a record to be kept.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub search: Option<String>,
    /// Fields the search term is matched against; empty means every field.
    #[serde(default)]
    pub search_fields: Vec<String>,
    #[serde(default)]
    pub predicates: Vec<Predicate>,
    /// Field the date window applies to.
    pub date_field: Option<String>,
    pub range: Option<QuickRange>,
    pub from: Option<String>,
    pub to: Option<String>,
}

impl FilterSpec {
    fn explicit_window(&self) -> bool {
        self.from.as_deref().is_some_and(|s| !s.trim().is_empty()) || self.to.as_deref().is_some_and(|s| !s.trim().is_empty())
    }

    /// Window in force at `now`: a non-empty explicit pair beats the quick range.
    /// Unparsable explicit bounds are dropped on their own side.
    pub fn window<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DateRange {
        let tz = now.timezone();
        if self.explicit_window() {
            let from = self.from.as_deref().filter(|s| !s.trim().is_empty()).and_then(|s| {
                let b = resolve_bound(s, Side::From, &tz);
                if b.is_none() { log::warn!("Ignoring unparsable 'from' date: {}", s); }
                b
            });
            let to = self.to.as_deref().filter(|s| !s.trim().is_empty()).and_then(|s| {
                let b = resolve_bound(s, Side::To, &tz);
                if b.is_none() { log::warn!("Ignoring unparsable 'to' date: {}", s); }
                b
            });
            return DateRange { from, to };
        }
        self.range.and_then(|r| r.resolve(now)).unwrap_or_default()
    }

    pub fn apply<'a, Tz: TimeZone>(&self, records: &'a [Record], registry: &FieldRegistry, now: &DateTime<Tz>) -> Vec<&'a Record> {
        let compiled = self.compile(registry, now);
        let out: Vec<&Record> = records.iter().filter(|r| compiled.keep(r)).collect();
        log::debug!("filter: kept {} of {} records", out.len(), records.len());
        out
    }

    /// Resolves the filter once per evaluation.
    pub fn compile<Tz: TimeZone>(&self, registry: &FieldRegistry, now: &DateTime<Tz>) -> CompiledFilter {
        let term = self.search.as_deref().map(normalize).unwrap_or_default();
        let window = match self.date_field.as_ref() {
            Some(f) => {
                let w = self.window(now);
                if w.is_open() { None } else { Some((f.clone(), w)) }
            }
            None => None,
        };
        let tz = now.timezone();
        let tests = self.predicates.iter().filter(|p| p.is_active()).filter_map(|p| compile_predicate(p, registry, &tz)).collect();
        CompiledFilter { term, search_fields: self.search_fields.clone(), window, tests }
    }
}

pub struct CompiledFilter {
    term: String,
    search_fields: Vec<String>,
    window: Option<(String, DateRange)>,
    tests: Vec<(String, Test)>,
}

enum Test {
    Text { op: Operator, needles: Vec<String> },
    Number { op: Operator, operands: Vec<f64> },
    Window { negate: bool, range: DateRange },
    Pattern(Regex),
}

impl CompiledFilter {
    pub fn keep(&self, r: &Record) -> bool {
        self.matches_search(r) && self.matches_window(r) && self.tests.iter().all(|(field, t)| eval(t, r, field))
    }

    fn matches_search(&self, r: &Record) -> bool {
        if self.term.is_empty() { return true; }
        let hit = |s: &str| normalize(s).contains(&self.term);
        if self.search_fields.is_empty() {
            hit(&r.id) || r.fields.values().filter_map(|v| v.as_text()).any(|s| hit(&s))
        } else {
            self.search_fields.iter().any(|f| r.text(f).is_some_and(|s| hit(&s)))
        }
    }

    fn matches_window(&self, r: &Record) -> bool {
        match &self.window {
            Some((field, w)) => r.date(field).is_some_and(|t| w.contains(t)),
            None => true,
        }
    }
}

fn compile_predicate<Tz: TimeZone>(p: &Predicate, registry: &FieldRegistry, tz: &Tz) -> Option<(String, Test)> {
    let kind = registry.kind_or_string(&p.field);
    let list = || -> Vec<&str> {
        match p.op {
            Operator::OneOf | Operator::NoneOf => p.value.split(',').map(str::trim).filter(|s| !s.is_empty()).collect(),
            _ => vec![p.value.as_str()],
        }
    };
    let test = match (p.op, kind) {
        (Operator::Matches, _) => match RegexBuilder::new(&p.value).case_insensitive(true).build() {
            Ok(re) => Test::Pattern(re),
            Err(e) => { log::warn!("Ignoring filter on '{}': invalid pattern: {}", p.field, e); return None; }
        },
        (Operator::Contains, _) => Test::Text { op: p.op, needles: vec![normalize(&p.value)] },
        (_, FieldType::Number) => {
            let parsed: Option<Vec<f64>> = list().into_iter().map(|s| s.parse::<f64>().ok()).collect();
            match parsed {
                Some(operands) if !operands.is_empty() => Test::Number { op: p.op, operands },
                _ => { log::warn!("Ignoring filter on '{}': '{}' is not numeric", p.field, p.value); return None; }
            }
        }
        (Operator::Eq | Operator::Ne | Operator::Gte | Operator::Lte, FieldType::Date) => {
            let from = resolve_bound(&p.value, Side::From, tz);
            let to = resolve_bound(&p.value, Side::To, tz);
            if from.is_none() { log::warn!("Ignoring filter on '{}': '{}' is not a date", p.field, p.value); return None; }
            let range = match p.op {
                Operator::Gte => DateRange { from, to: None },
                Operator::Lte => DateRange { from: None, to },
                _ => DateRange { from, to },
            };
            Test::Window { negate: p.op == Operator::Ne, range }
        }
        _ => {
            let needles: Vec<String> = list().into_iter().map(normalize).filter(|s| !s.is_empty()).collect();
            if needles.is_empty() { return None; }
            Test::Text { op: p.op, needles }
        }
    };
    Some((p.field.clone(), test))
}

fn eval(t: &Test, r: &Record, field: &str) -> bool {
    match t {
        Test::Pattern(re) => r.text(field).is_some_and(|s| re.is_match(&s)),
        Test::Window { negate, range } => match r.date(field) {
            Some(d) => range.contains(d) != *negate,
            None => *negate,
        },
        Test::Number { op, operands } => {
            let Some(v) = r.number(field) else { return matches!(op, Operator::Ne | Operator::NoneOf) };
            match op {
                Operator::Eq => v == operands[0],
                Operator::Ne => v != operands[0],
                Operator::OneOf => operands.contains(&v),
                Operator::NoneOf => !operands.contains(&v),
                Operator::Gte => v >= operands[0],
                Operator::Lte => v <= operands[0],
                _ => true,
            }
        }
        Test::Text { op, needles } => {
            let Some(hay) = r.text(field).map(|s| normalize(&s)) else { return matches!(op, Operator::Ne | Operator::NoneOf) };
            match op {
                Operator::Eq => hay == needles[0],
                Operator::Ne => hay != needles[0],
                Operator::Contains => hay.contains(&needles[0]),
                Operator::OneOf => needles.contains(&hay),
                Operator::NoneOf => !needles.contains(&hay),
                Operator::Gte => hay >= needles[0],
                Operator::Lte => hay <= needles[0],
                Operator::Matches => true,
            }
        }
    }
}
