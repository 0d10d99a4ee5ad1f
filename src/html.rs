use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::export::{CellRenderer, Column};
use crate::group::Group;
use crate::record::{format_number, Record};
use crate::stats::{Distribution, Statistics, NO_VALUE};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl FromStr for Theme {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dark" => Ok(Theme::Dark),
            "light" => Ok(Theme::Light),
            other => Err(format!("unknown theme '{}'", other)),
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self { Theme::Dark => "dark", Theme::Light => "light" })
    }
}

const DARK_VARS: &str = ":root{--bg:#0a0e13;--fg:#ffffff;--muted:#c0c4cc;--card:#0d131a;--border:#243041;--accent:#3b82f6;--ok:#22c55e;--warn:#f59e0b;--err:#ef4444;--head:#0c1118;--stripe:#0b0f14}";
const LIGHT_VARS: &str = ":root{--bg:#f7fafc;--fg:#111827;--muted:#6b7280;--card:#ffffff;--border:#e5e7eb;--accent:#2563eb;--ok:#16a34a;--warn:#d97706;--err:#dc2626;--head:#f3f4f6;--stripe:#fbfdff}";
const BASE_CSS: &str = "body{margin:0;background:var(--bg);color:var(--fg);font-family:Segoe UI,system-ui,-apple-system,Arial,sans-serif} .container{max-width:1200px;margin:0 auto;padding:24px} .header{display:flex;align-items:baseline;justify-content:space-between;gap:12px;margin-bottom:16px} .title{font-size:20px;font-weight:600} .sub{color:var(--muted);font-size:13px} .grid{display:grid;grid-template-columns:repeat(4,minmax(0,1fr));gap:12px} .card{background:var(--card);border:1px solid var(--border);border-radius:10px;padding:14px} .metric .label{color:var(--muted);font-size:12px} .metric .value{font-size:22px;font-weight:700} .value.err{color:var(--err)} .value.ok{color:var(--ok)} .section{margin-top:18px} .section h3{margin:0 0 10px 0;font-size:16px;font-weight:600} .split{display:grid;grid-template-columns:repeat(2,minmax(0,1fr));gap:12px} .table{width:100%;border-collapse:collapse;background:var(--card);border:1px solid var(--border)} .table th{background:var(--head);text-align:left;font-weight:600;padding:8px 10px;border-bottom:1px solid var(--border)} .table td{padding:8px 10px;border-bottom:1px solid var(--border);vertical-align:top} .table tr:nth-child(odd) td{background:var(--stripe)} .num{text-align:right} .pill{display:inline-block;padding:4px 10px;border-radius:999px;border:1px solid var(--border);font-size:12px;margin:4px 6px 0 0} .bar{height:8px;border-radius:4px;background:var(--accent)} .footer{margin-top:22px;color:var(--muted);font-size:12px} @media print{body{background:#fff;color:#000}.card,.table{border-color:#999}.section{break-inside:avoid}} @media (max-width:900px){.grid{grid-template-columns:repeat(2,minmax(0,1fr))}.split{grid-template-columns:1fr}}";

pub struct HtmlOptions<'a> {
    pub title: &'a str,
    pub theme: Theme,
    /// Already formatted generation time shown under the title.
    pub generated: String,
}

/// Self-contained printable report: embedded styles, no scripts, no external links.
/// Groups, when given, replace the single detail table with one table per group.
pub fn render_html(records: &[&Record], groups: Option<&[Group]>, stats: &Statistics, columns: &[Column], cells: &CellRenderer, opts: &HtmlOptions) -> String {
    let mut s = String::new();
    s.push_str(&format!("<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\"><meta name=\"viewport\" content=\"width=device-width, initial-scale=1\"><title>{}</title><style>", html_escape(opts.title)));
    s.push_str(match opts.theme { Theme::Dark => DARK_VARS, Theme::Light => LIGHT_VARS });
    s.push(' ');
    s.push_str(BASE_CSS);
    s.push_str("</style></head><body><div class=\"container\">");
    s.push_str(&format!("<div class=\"header\"><div class=\"title\">{}</div><div class=\"sub\">Generated {}</div></div>", html_escape(opts.title), html_escape(&opts.generated)));

    s.push_str("<div class=\"grid\">");
    s.push_str(&metric("Records", &stats.count.to_string(), ""));
    for n in &stats.numeric {
        s.push_str(&metric(&format!("Total {}", n.field), &format_number(round2(n.sum)), ""));
        s.push_str(&metric(&format!("Average {}", n.field), &format_number(round2(n.average)), ""));
    }
    if let Some(t) = &stats.trend {
        let cls = match t.percent() { Some(p) if p > 0.0 => "err", Some(p) if p < 0.0 => "ok", _ => "" };
        s.push_str(&metric("Trend", &t.describe(), cls));
    }
    s.push_str("</div>");

    let mut tables: Vec<(&str, &Distribution)> = Vec::new();
    if let Some(b) = &stats.buckets { tables.push(("Severity", b)); }
    for d in &stats.distributions { tables.push(("Distribution", d)); }
    if let Some(b) = &stats.breakdown { tables.push(("Top", b)); }
    if !tables.is_empty() {
        s.push_str("<div class=\"section split\">");
        for (kind, d) in tables {
            s.push_str(&format!("<div class=\"card\"><h3>{} · {}</h3><table class=\"table\"><thead><tr><th>Value</th><th class=\"num\">Count</th></tr></thead><tbody>", kind, html_escape(&d.field)));
            for b in &d.buckets { s.push_str(&format!("<tr><td>{}</td><td class=\"num\">{}</td></tr>", html_escape(&b.label), b.count)); }
            s.push_str("</tbody></table></div>");
        }
        s.push_str("</div>");
    }

    if !stats.timeline.is_empty() {
        let max = stats.timeline.iter().map(|b| b.count).max().unwrap_or(1).max(1);
        s.push_str("<div class=\"section\"><h3>Timeline</h3><div class=\"card\">");
        for b in &stats.timeline {
            let w = b.count as f64 / max as f64 * 100.0;
            s.push_str(&format!("<div style=\"display:flex;align-items:center;gap:8px;margin:6px 0\"><div class=\"sub\" style=\"min-width:130px\">{}</div><div style=\"flex:1\"><div class=\"bar\" style=\"width:{:.0}%\"></div></div><div class=\"sub\">{}</div></div>", html_escape(&b.label), w, b.count));
        }
        s.push_str("</div></div>");
    }

    match groups {
        Some(groups) => {
            for g in groups {
                let key = if g.key.is_empty() { NO_VALUE } else { g.key.as_str() };
                s.push_str(&format!("<div class=\"section\"><h3>{} <span class=\"pill\">{}</span></h3>", html_escape(key), g.records.len()));
                push_table(&mut s, &g.records, columns, cells);
                s.push_str("</div>");
            }
        }
        None => {
            s.push_str("<div class=\"section\"><h3>Records</h3>");
            push_table(&mut s, records, columns, cells);
            s.push_str("</div>");
        }
    }
    s.push_str(&format!("<div class=\"footer\">{} records</div></div></body></html>", records.len()));
    s
}

fn metric(label: &str, value: &str, cls: &str) -> String {
    format!("<div class=\"card metric\"><div class=\"label\">{}</div><div class=\"value {}\">{}</div></div>", html_escape(label), cls, html_escape(value))
}

fn push_table(s: &mut String, records: &[&Record], columns: &[Column], cells: &CellRenderer) {
    s.push_str("<table class=\"table\"><thead><tr>");
    for c in columns { s.push_str(&format!("<th>{}</th>", html_escape(&c.header))); }
    s.push_str("</tr></thead><tbody>");
    if records.is_empty() {
        s.push_str(&format!("<tr><td colspan=\"{}\" class=\"sub\">No records</td></tr>", columns.len().max(1)));
    }
    for r in records {
        s.push_str("<tr>");
        for cell in cells.row(r, columns) { s.push_str(&format!("<td>{}</td>", html_escape(&cell))); }
        s.push_str("</tr>");
    }
    s.push_str("</tbody></table>");
}

fn round2(v: f64) -> f64 { (v * 100.0).round() / 100.0 }

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;").replace('\'', "&#39;")
}
