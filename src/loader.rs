//! Record source for the command line: JSON arrays, NDJSON files, or a
//! directory of either. Type coercion from the transport shape happens here,
//! before the engine sees anything.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::record::{parse_timestamp, FieldDef, FieldRegistry, FieldType, Record, Value};

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    /// Only files whose path matches are read from a directory.
    pub glob: Option<String>,
    pub recursive: bool,
    pub progress: bool,
}

fn build_glob(pattern: &str) -> Result<GlobSet> {
    let mut gs = GlobSetBuilder::new();
    gs.add(GlobBuilder::new(pattern).case_insensitive(true).build().with_context(|| format!("invalid glob '{}'", pattern))?);
    Ok(gs.build()?)
}

fn is_record_file(p: &Path) -> bool {
    p.extension().and_then(|e| e.to_str()).is_some_and(|e| ["json", "ndjson", "jsonl"].iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// Loads one file, or every record file under a directory. Unreadable files
/// inside a directory are skipped with a warning; a missing root is an error.
pub fn load_path(path: &Path, opts: &LoadOptions) -> Result<Vec<Record>> {
    if path.is_file() {
        let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        return parse_records(&text, 0).with_context(|| format!("failed to parse {}", path.display()));
    }
    if !path.is_dir() { bail!("input not found: {}", path.display()); }
    let set = opts.glob.as_deref().map(build_glob).transpose()?;
    let wd = if opts.recursive { WalkDir::new(path) } else { WalkDir::new(path).max_depth(1) };
    let pb = if opts.progress { Some(indicatif::ProgressBar::new_spinner()) } else { None };
    let mut out: Vec<Record> = Vec::new();
    let mut files = 0usize;
    for de in wd.sort_by_file_name().into_iter().filter_map(Result::ok) {
        let fp = de.path();
        if !fp.is_file() { continue; }
        match &set {
            Some(set) if !set.is_match(fp) => continue,
            None if !is_record_file(fp) => continue,
            _ => {}
        }
        if let Some(ref pb) = pb { pb.set_message(format!("Reading {}", fp.display())); pb.tick(); }
        let parsed = std::fs::read_to_string(fp).map_err(anyhow::Error::from).and_then(|t| parse_records(&t, out.len()));
        match parsed {
            Ok(mut recs) => {
                files += 1;
                out.append(&mut recs);
            }
            Err(e) => log::warn!("Skipping {}: {:#}", fp.display(), e),
        }
    }
    if let Some(pb) = pb { pb.finish_and_clear(); }
    log::info!("loaded {} records from {} files under {}", out.len(), files, path.display());
    Ok(out)
}

/// A JSON array of objects, or one object per line. Records without an id get
/// their 1-based position (offset by `start`). Malformed NDJSON lines are skipped.
pub fn parse_records(text: &str, start: usize) -> Result<Vec<Record>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        let items: Vec<serde_json::Value> = serde_json::from_str(trimmed).context("expected a JSON array of objects")?;
        return Ok(items.into_iter().enumerate().filter_map(|(i, v)| record_from_json(v, start + i + 1)).collect());
    }
    let mut out = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() { continue; }
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(v) => {
                let pos = start + out.len() + 1;
                if let Some(r) = record_from_json(v, pos) { out.push(r); }
            }
            Err(e) => log::warn!("line {}: {}", n + 1, e),
        }
    }
    Ok(out)
}

/// Non-object values are not records and yield `None`.
pub fn record_from_json(v: serde_json::Value, position: usize) -> Option<Record> {
    let serde_json::Value::Object(map) = v else {
        log::trace!("skipping non-object at position {}", position);
        return None;
    };
    let mut id = None;
    let mut fields = BTreeMap::new();
    for (k, v) in map {
        if k == "id" {
            id = match &v {
                serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            };
            continue;
        }
        fields.insert(k, value_from_json(v));
    }
    Some(Record { id: id.unwrap_or_else(|| position.to_string()), fields })
}

fn value_from_json(v: serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
        serde_json::Value::String(s) => Value::Text(s),
        other => Value::Text(other.to_string()),
    }
}

/// Registry guessed from the data when none is configured: all-numeric fields
/// are numbers, all-timestamp text fields are dates, everything else is a string.
pub fn infer_registry(records: &[Record]) -> FieldRegistry {
    let mut seen: BTreeMap<&str, (bool, bool)> = BTreeMap::new();
    for r in records {
        for (k, v) in &r.fields {
            if v.is_missing() { continue; }
            let e = seen.entry(k.as_str()).or_insert((true, true));
            e.0 &= matches!(v, Value::Number(_));
            e.1 &= match v { Value::Date(_) => true, Value::Text(s) => parse_timestamp(s).is_some(), _ => false };
        }
    }
    let defs = seen
        .into_iter()
        .map(|(name, (num, date))| {
            let kind = if num { FieldType::Number } else if date { FieldType::Date } else { FieldType::String };
            FieldDef { name: name.to_string(), kind, values: vec![] }
        })
        .collect();
    FieldRegistry::from_defs(defs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_array_with_mixed_ids() {
        let recs = parse_records(r#"[{"id": 7, "plate": "AB-1"}, {"plate": "CD-2", "km": 3.5}, 42, {"id": "x9"}]"#, 0).unwrap();
        let ids: Vec<&str> = recs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["7", "2", "x9"]);
        assert_eq!(recs[1].number("km"), Some(3.5));
    }

    #[test]
    fn ndjson_skips_bad_lines() {
        let recs = parse_records("{\"a\":1}\nnot json\n\n{\"a\":2}\n", 10).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].id, "11");
        assert_eq!(recs[1].id, "12");
    }

    #[test]
    fn nested_values_become_text() {
        let r = record_from_json(serde_json::json!({"id": "1", "tags": ["a", "b"], "ok": true, "gone": null}), 1).unwrap();
        assert_eq!(r.text("tags").as_deref(), Some("[\"a\",\"b\"]"));
        assert_eq!(r.text("ok").as_deref(), Some("true"));
        assert_eq!(r.text("gone"), None);
    }

    #[test]
    fn registry_inference() {
        let recs = parse_records(r#"[
            {"km": 1, "at": "2025-01-01 10:00", "plate": "A", "mixed": 1},
            {"km": 2.5, "at": "2025-01-02T10:00:00Z", "plate": "B", "mixed": "x"},
            {"km": null, "at": "", "plate": "C"}
        ]"#, 0).unwrap();
        let reg = infer_registry(&recs);
        assert_eq!(reg.kind("km"), Some(FieldType::Number));
        assert_eq!(reg.kind("at"), Some(FieldType::Date));
        assert_eq!(reg.kind("plate"), Some(FieldType::String));
        assert_eq!(reg.kind("mixed"), Some(FieldType::String));
    }

    #[test]
    fn directory_load_with_glob() {
        let dir = std::env::temp_dir().join(format!("fleetreport_load_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.json"), r#"[{"id":"a1"},{"id":"a2"}]"#).unwrap();
        std::fs::write(dir.join("b.ndjson"), "{\"id\":\"b1\"}\n").unwrap();
        std::fs::write(dir.join("broken.json"), "[{").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();
        let all = load_path(&dir, &LoadOptions::default()).unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2", "b1"]);
        let only = load_path(&dir, &LoadOptions { glob: Some("*.ndjson".into()), ..Default::default() }).unwrap();
        assert_eq!(only.len(), 1);
        assert!(load_path(&dir.join("missing"), &LoadOptions::default()).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
