use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::normalize::normalize;
use crate::record::{compare_ids, FieldRegistry, FieldType, Record};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

impl Direction {
    pub fn flip(self) -> Self {
        match self { Direction::Ascending => Direction::Descending, Direction::Descending => Direction::Ascending }
    }
}

impl FromStr for Direction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Direction::Ascending),
            "desc" | "descending" => Ok(Direction::Descending),
            other => Err(format!("unknown sort direction '{}'", other)),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self { Direction::Ascending => "asc", Direction::Descending => "desc" })
    }
}

/// The single active sort key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub key: String,
    #[serde(default)]
    pub direction: Direction,
}

impl SortSpec {
    pub fn new(key: &str, direction: Direction) -> Self {
        Self { key: key.to_string(), direction }
    }

    /// Column-header click: the same key flips direction, a new key starts ascending.
    pub fn toggle(current: Option<&SortSpec>, key: &str) -> SortSpec {
        match current {
            Some(s) if s.key == key => SortSpec { key: s.key.clone(), direction: s.direction.flip() },
            _ => SortSpec::new(key, Direction::Ascending),
        }
    }
}

/// Total order over records for one sort key, dispatched on the declared field type.
#[derive(Clone, Debug)]
pub struct Comparator {
    key: String,
    kind: FieldType,
    direction: Direction,
}

impl Comparator {
    /// Sorting by a field the registry does not know is a caller defect.
    pub fn new(registry: &FieldRegistry, spec: &SortSpec) -> Result<Self> {
        let Some(kind) = registry.kind(&spec.key) else {
            bail!("cannot sort by unregistered field '{}'", spec.key);
        };
        Ok(Self { key: spec.key.clone(), kind, direction: spec.direction })
    }

    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let primary = match self.kind {
            // missing or unparsable values order before every real value
            FieldType::Number => cmp_opt(a.number(&self.key), b.number(&self.key), |x, y| x.total_cmp(y)),
            FieldType::Date => cmp_opt(a.date(&self.key), b.date(&self.key), |x, y| x.cmp(y)),
            FieldType::String | FieldType::Enum => {
                let x = a.text(&self.key).map(|s| normalize(&s)).unwrap_or_default();
                let y = b.text(&self.key).map(|s| normalize(&s)).unwrap_or_default();
                x.cmp(&y)
            }
        };
        let primary = match self.direction { Direction::Ascending => primary, Direction::Descending => primary.reverse() };
        primary.then_with(|| compare_ids(&a.id, &b.id))
    }

    /// Stable sort into a new view; the input is left untouched.
    pub fn sort<'a>(&self, records: &[&'a Record]) -> Vec<&'a Record> {
        let mut out = records.to_vec();
        out.sort_by(|a, b| self.compare(a, b));
        out
    }
}

fn cmp_opt<T>(a: Option<T>, b: Option<T>, f: impl Fn(&T, &T) -> Ordering) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => f(&x, &y),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg() -> FieldRegistry {
        FieldRegistry::new().declare("km", FieldType::Number).declare("at", FieldType::Date).declare("driver", FieldType::String)
    }

    fn data() -> Vec<Record> {
        vec![
            Record::new("3").with("km", 10.0).with("at", "2025-01-03").with("driver", "zoe"),
            Record::new("1").with("km", 2.5).with("at", "broken").with("driver", "Ämir"),
            Record::new("2").with("km", 10.0).with("at", "2025-01-01").with("driver", "amir"),
            Record::new("10").with("at", "2025-01-02").with("driver", "Bob"),
        ]
    }

    fn sorted(key: &str, dir: Direction) -> Vec<String> {
        let d = data();
        let refs: Vec<&Record> = d.iter().collect();
        let c = Comparator::new(&reg(), &SortSpec::new(key, dir)).unwrap();
        c.sort(&refs).iter().map(|r| r.id.clone()).collect()
    }

    #[test]
    fn numbers_sort_with_missing_first_and_id_tiebreak() {
        assert_eq!(sorted("km", Direction::Ascending), vec!["10", "1", "2", "3"]);
        assert_eq!(sorted("km", Direction::Descending), vec!["2", "3", "1", "10"]);
    }

    #[test]
    fn broken_dates_sort_earliest() {
        assert_eq!(sorted("at", Direction::Ascending), vec!["1", "2", "10", "3"]);
        assert_eq!(sorted("at", Direction::Descending), vec!["3", "10", "2", "1"]);
    }

    #[test]
    fn strings_compare_normalized() {
        // "Ämir" and "amir" normalize equal; ids break the tie
        assert_eq!(sorted("driver", Direction::Ascending), vec!["1", "2", "10", "3"]);
    }

    #[test]
    fn order_is_total_and_resort_is_noop() {
        let d = data();
        let refs: Vec<&Record> = d.iter().collect();
        for key in ["km", "at", "driver", "id"] {
            let c = Comparator::new(&reg(), &SortSpec::new(key, Direction::Descending)).unwrap();
            for a in &refs {
                for b in &refs {
                    if a.id != b.id {
                        assert_eq!(c.compare(a, b), c.compare(b, a).reverse());
                        assert_ne!(c.compare(a, b), Ordering::Equal);
                    }
                }
            }
            let once = c.sort(&refs);
            let twice = c.sort(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn mixed_ids_break_ties_the_same_for_any_input_order() {
        let d: Vec<Record> = ["9", "10", "1a"].iter().map(|id| Record::new(*id).with("driver", "X")).collect();
        let c = Comparator::new(&reg(), &SortSpec::new("driver", Direction::Ascending)).unwrap();
        let (a, b, x) = (&d[0], &d[1], &d[2]);
        assert_eq!(c.compare(a, b), Ordering::Less);
        assert_eq!(c.compare(b, x), Ordering::Less);
        assert_eq!(c.compare(a, x), Ordering::Less);
        let orders = [[a, b, x], [x, a, b], [b, x, a], [x, b, a], [a, x, b], [b, a, x]];
        for input in orders {
            let got: Vec<&str> = c.sort(&input).iter().map(|r| r.id.as_str()).collect();
            assert_eq!(got, vec!["9", "10", "1a"]);
        }
    }

    #[test]
    fn unregistered_key_is_an_error() {
        assert!(Comparator::new(&reg(), &SortSpec::new("nope", Direction::Ascending)).is_err());
    }

    #[test]
    fn toggle_flips_or_resets() {
        let s = SortSpec::toggle(None, "km");
        assert_eq!(s.direction, Direction::Ascending);
        let s = SortSpec::toggle(Some(&s), "km");
        assert_eq!(s.direction, Direction::Descending);
        let s = SortSpec::toggle(Some(&s), "at");
        assert_eq!(s, SortSpec::new("at", Direction::Ascending));
    }
}
