use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::query::{ReportView, Rows};
use crate::record::{FieldRegistry, FieldType, Record};

pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// One table column, shared by the on-screen table and every exporter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub header: String,
    pub field: String,
}

impl Column {
    pub fn new(header: &str, field: &str) -> Self {
        Self { header: header.to_string(), field: field.to_string() }
    }

    /// `id` followed by every registered field, headed by its name.
    pub fn defaults(registry: &FieldRegistry) -> Vec<Column> {
        std::iter::once(Column::new("id", "id")).chain(registry.iter().map(|d| Column::new(&d.name, &d.name))).collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    #[default]
    Local,
    Utc,
}

impl FromStr for Zone {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Zone::Local),
            "utc" => Ok(Zone::Utc),
            other => Err(format!("unknown time zone '{}'", other)),
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self { Zone::Local => "local", Zone::Utc => "utc" })
    }
}

/// Renders record fields to display text through the field registry.
#[derive(Clone, Debug)]
pub struct CellRenderer<'r> {
    registry: &'r FieldRegistry,
    zone: Zone,
    time_format: String,
}

impl<'r> CellRenderer<'r> {
    /// An invalid strftime pattern falls back to the default format.
    pub fn new(registry: &'r FieldRegistry, zone: Zone, time_format: Option<&str>) -> Self {
        let time_format = match time_format {
            Some(f) if StrftimeItems::new(f).any(|i| matches!(i, Item::Error)) => {
                log::warn!("Ignoring invalid time format '{}'", f);
                DEFAULT_TIME_FORMAT
            }
            Some(f) => f,
            None => DEFAULT_TIME_FORMAT,
        };
        Self { registry, zone, time_format: time_format.to_string() }
    }

    pub fn time(&self, t: DateTime<Utc>) -> String {
        match self.zone {
            Zone::Local => t.with_timezone(&Local).format(&self.time_format).to_string(),
            Zone::Utc => t.format(&self.time_format).to_string(),
        }
    }

    /// Missing values render as an empty cell. Unparsable dates keep their raw text.
    pub fn cell(&self, r: &Record, field: &str) -> String {
        if self.registry.kind(field) == Some(FieldType::Date)
            && let Some(t) = r.date(field)
        {
            return self.time(t);
        }
        r.text(field).unwrap_or_default()
    }

    pub fn row(&self, r: &Record, columns: &[Column]) -> Vec<String> {
        columns.iter().map(|c| self.cell(r, &c.field)).collect()
    }
}

/// Which records an export covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportScope {
    /// The whole filtered and sorted population.
    #[default]
    Filtered,
    CurrentPage,
}

impl ExportScope {
    pub fn select<'a>(self, view: &ReportView<'a>) -> Vec<&'a Record> {
        match self {
            ExportScope::Filtered => view.records.clone(),
            ExportScope::CurrentPage => match &view.rows {
                Rows::Flat(p) => p.items.clone(),
                Rows::Grouped(p) => p.items.iter().flat_map(|g| g.records.iter().copied()).collect(),
            },
        }
    }
}

/// `<report-name>_<YYYY-MM-DD>.<ext>`, with whitespace in the name turned into dashes.
pub fn export_file_name(report_name: &str, date: NaiveDate, ext: &str) -> String {
    let slug = report_name.split_whitespace().collect::<Vec<_>>().join("-");
    let slug = if slug.is_empty() { "report".to_string() } else { slug };
    format!("{}_{}.{}", slug, date.format("%Y-%m-%d"), ext.trim_start_matches('.'))
}

fn write_delimited<W: Write>(out: W, delimiter: u8, records: &[&Record], columns: &[Column], cells: &CellRenderer) -> std::io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().delimiter(delimiter).quote_style(csv::QuoteStyle::Necessary).from_writer(out);
    wtr.write_record(columns.iter().map(|c| c.header.as_str()))?;
    for r in records {
        wtr.write_record(cells.row(r, columns))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Quoted CSV: one header row, one row per record.
pub fn to_csv(records: &[&Record], columns: &[Column], cells: &CellRenderer) -> std::io::Result<String> {
    let mut buf = Vec::new();
    write_delimited(&mut buf, b',', records, columns, cells)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

pub fn to_tsv(records: &[&Record], columns: &[Column], cells: &CellRenderer) -> std::io::Result<String> {
    let mut buf = Vec::new();
    write_delimited(&mut buf, b'\t', records, columns, cells)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// One JSON object per line keyed by column field.
pub fn to_ndjson(records: &[&Record], columns: &[Column], cells: &CellRenderer) -> String {
    let mut s = String::new();
    for r in records {
        let obj: serde_json::Map<String, serde_json::Value> = columns
            .iter()
            .map(|c| (c.field.clone(), serde_json::Value::String(cells.cell(r, &c.field))))
            .collect();
        s.push_str(&serde_json::Value::Object(obj).to_string());
        s.push('\n');
    }
    s
}

pub fn write_csv(path: &Path, records: &[&Record], columns: &[Column], cells: &CellRenderer) -> std::io::Result<()> {
    let file = std::fs::File::create(path)?;
    write_delimited(file, b',', records, columns, cells)
}

pub fn write_tsv(path: &Path, records: &[&Record], columns: &[Column], cells: &CellRenderer) -> std::io::Result<()> {
    let file = std::fs::File::create(path)?;
    write_delimited(file, b'\t', records, columns, cells)
}

pub fn write_ndjson(path: &Path, records: &[&Record], columns: &[Column], cells: &CellRenderer) -> std::io::Result<()> {
    std::fs::write(path, to_ndjson(records, columns, cells))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg() -> FieldRegistry {
        FieldRegistry::new().declare("vendor", FieldType::String).declare("amount", FieldType::Number).declare("at", FieldType::Date)
    }

    fn cols() -> Vec<Column> {
        vec![Column::new("ID", "id"), Column::new("Vendor", "vendor"), Column::new("Amount", "amount"), Column::new("When", "at")]
    }

    #[test]
    fn csv_quotes_only_when_needed() {
        let reg = reg();
        let cells = CellRenderer::new(&reg, Zone::Utc, None);
        let d = vec![
            Record::new("1").with("vendor", "Apex, Inc").with("amount", 12.0).with("at", "2025-02-01T09:05:00Z"),
            Record::new("2").with("vendor", "Say \"hi\"").with("amount", 3.25),
        ];
        let refs: Vec<&Record> = d.iter().collect();
        let out = to_csv(&refs, &cols(), &cells).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "ID,Vendor,Amount,When");
        assert_eq!(lines[1], "1,\"Apex, Inc\",12,2025-02-01 09:05");
        assert_eq!(lines[2], "2,\"Say \"\"hi\"\"\",3.25,");
        assert!(!out.contains("null") && !out.contains("undefined"));
    }

    #[test]
    fn broken_dates_keep_raw_text() {
        let reg = reg();
        let cells = CellRenderer::new(&reg, Zone::Utc, Some("%d/%m/%Y"));
        let ok = Record::new("1").with("at", "2025-02-01");
        let bad = Record::new("2").with("at", "soon");
        assert_eq!(cells.cell(&ok, "at"), "01/02/2025");
        assert_eq!(cells.cell(&bad, "at"), "soon");
        assert_eq!(cells.cell(&bad, "vendor"), "");
        let fallback = CellRenderer::new(&reg, Zone::Utc, Some("%Q"));
        assert_eq!(fallback.cell(&ok, "at"), "2025-02-01 00:00");
    }

    #[test]
    fn tsv_and_ndjson_share_columns() {
        let reg = reg();
        let cells = CellRenderer::new(&reg, Zone::Utc, None);
        let d = vec![Record::new("7").with("vendor", "Tab\there")];
        let refs: Vec<&Record> = d.iter().collect();
        let tsv = to_tsv(&refs, &cols(), &cells).unwrap();
        assert!(tsv.starts_with("ID\tVendor\tAmount\tWhen\n"));
        assert!(tsv.contains("\"Tab\there\""));
        let nd = to_ndjson(&refs, &cols(), &cells);
        let v: serde_json::Value = serde_json::from_str(nd.trim()).unwrap();
        assert_eq!(v["vendor"], "Tab\there");
        assert_eq!(v["amount"], "");
    }

    #[test]
    fn file_names_follow_convention() {
        let d = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        assert_eq!(export_file_name("speed violations", d, "csv"), "speed-violations_2025-03-09.csv");
        assert_eq!(export_file_name("  ", d, ".html"), "report_2025-03-09.html");
    }

    #[test]
    fn write_csv_to_disk() {
        let reg = reg();
        let cells = CellRenderer::new(&reg, Zone::Utc, None);
        let d = vec![Record::new("1").with("vendor", "Apex")];
        let refs: Vec<&Record> = d.iter().collect();
        let path = std::env::temp_dir().join(format!("fleetreport_export_{}.csv", std::process::id()));
        write_csv(&path, &refs, &cols(), &cells).unwrap();
        let back = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(back, to_csv(&refs, &cols(), &cells).unwrap());
    }

    #[test]
    fn default_columns_follow_registry() {
        let c = Column::defaults(&reg());
        let fields: Vec<&str> = c.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["id", "vendor", "amount", "at"]);
    }
}
