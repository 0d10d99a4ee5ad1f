use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::record::Record;

/// How raw key text becomes a group identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupKeyMode {
    /// Keys group only when spelled identically ("ab-12" and "AB-12" stay apart).
    #[default]
    Exact,
    /// Keys are trimmed and upper-cased first.
    Canonical,
}

impl GroupKeyMode {
    pub fn apply(self, key: String) -> String {
        match self {
            GroupKeyMode::Exact => key,
            GroupKeyMode::Canonical => key.trim().to_uppercase(),
        }
    }
}

impl FromStr for GroupKeyMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(GroupKeyMode::Exact),
            "canonical" => Ok(GroupKeyMode::Canonical),
            other => Err(format!("unknown group key mode '{}'", other)),
        }
    }
}

impl fmt::Display for GroupKeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self { GroupKeyMode::Exact => "exact", GroupKeyMode::Canonical => "canonical" })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Group<'a> {
    pub key: String,
    pub records: Vec<&'a Record>,
}

/// Buckets `records` by `key_fn` in one pass. Groups come out in first-seen key
/// order and each group keeps the input order of its records.
pub fn group_by<'a, F>(records: &[&'a Record], key_fn: F) -> Vec<Group<'a>>
where
    F: Fn(&Record) -> String,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Group<'a>> = Vec::new();
    for &r in records {
        let key = key_fn(r);
        match index.get(&key) {
            Some(&i) => groups[i].records.push(r),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(Group { key, records: vec![r] });
            }
        }
    }
    log::debug!("group: {} records into {} groups", records.len(), groups.len());
    groups
}

/// Key function over one field; records without the field share the `""` group.
pub fn field_key(field: &str, mode: GroupKeyMode) -> impl Fn(&Record) -> String + '_ {
    move |r: &Record| mode.apply(r.text(field).unwrap_or_default())
}
