use crate::export::{CellRenderer, Column};
use crate::record::{format_number, Record};
use crate::stats::Statistics;

pub fn render_markdown(title: &str, records: &[&Record], stats: &Statistics, columns: &[Column], cells: &CellRenderer) -> String {
    let mut s = String::new();
    s.push_str(&format!("# {}\n\n", title));

    s.push_str("## Summary\n");
    s.push_str(&format!("- Records: {}\n", stats.count));
    for n in &stats.numeric {
        s.push_str(&format!("- {}: total {}, average {}", n.field, format_number(n.sum), format_number((n.average * 100.0).round() / 100.0)));
        if let (Some(lo), Some(hi)) = (n.min, n.max) { s.push_str(&format!(", range {}..{}", format_number(lo), format_number(hi))); }
        s.push('\n');
    }
    if let Some(t) = &stats.trend { s.push_str(&format!("- Trend: {}\n", t.describe())); }
    s.push('\n');

    if let Some(b) = &stats.buckets {
        s.push_str(&format!("## Severity ({})\n", b.field));
        for x in &b.buckets { s.push_str(&format!("- {}: {}\n", x.label, x.count)); }
        s.push('\n');
    }
    for d in &stats.distributions {
        s.push_str(&format!("## {}\n", d.field));
        for x in &d.buckets { s.push_str(&format!("- {}: {}\n", x.label, x.count)); }
        s.push('\n');
    }
    if let Some(b) = &stats.breakdown {
        s.push_str(&format!("## Top {}\n", b.field));
        if b.buckets.is_empty() { s.push_str("None\n"); }
        for x in &b.buckets { s.push_str(&format!("- {} ({})\n", x.label, x.count)); }
        s.push('\n');
    }
    if !stats.timeline.is_empty() {
        s.push_str("## Timeline\n");
        for x in &stats.timeline { s.push_str(&format!("- {}  {}\n", x.label, x.count)); }
        s.push('\n');
    }

    s.push_str("## Records\n");
    if records.is_empty() || columns.is_empty() {
        s.push_str("None\n");
        return s;
    }
    s.push_str(&format!("| {} |\n", columns.iter().map(|c| md_cell(&c.header)).collect::<Vec<_>>().join(" | ")));
    s.push_str(&format!("|{}\n", "---|".repeat(columns.len())));
    for r in records {
        let row: Vec<String> = cells.row(r, columns).iter().map(|c| md_cell(c)).collect();
        s.push_str(&format!("| {} |\n", row.join(" | ")));
    }
    s
}

fn md_cell(s: &str) -> String {
    s.replace('|', "\\|").replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::Zone;
    use crate::record::{FieldRegistry, FieldType};
    use crate::stats::{aggregate, BreakdownSpec, StatsSpec};

    #[test]
    fn summary_and_table() {
        let reg = FieldRegistry::new().declare("route", FieldType::String).declare("km", FieldType::Number);
        let d = vec![
            Record::new("1").with("route", "A|B").with("km", 12.5),
            Record::new("2").with("route", "line\nbreak").with("km", 7.5),
        ];
        let refs: Vec<&Record> = d.iter().collect();
        let spec = StatsSpec { numeric_fields: vec!["km".into()], breakdown: Some(BreakdownSpec { field: "route".into(), top: 5 }), ..Default::default() };
        let stats = aggregate(&refs, &spec, &reg, &chrono::Utc);
        let cells = CellRenderer::new(&reg, Zone::Utc, None);
        let md = render_markdown("Trips", &refs, &stats, &Column::defaults(&reg), &cells);
        assert!(md.starts_with("# Trips\n"));
        assert!(md.contains("- km: total 20, average 10, range 7.5..12.5\n"));
        assert!(md.contains("| id | route | km |\n|---|---|---|\n"));
        assert!(md.contains("| 1 | A\\|B | 12.5 |"));
        assert!(md.contains("| 2 | line break | 7.5 |"));
    }

    #[test]
    fn empty_population() {
        let reg = FieldRegistry::new();
        let stats = aggregate(&[], &StatsSpec::default(), &reg, &chrono::Utc);
        let cells = CellRenderer::new(&reg, Zone::Utc, None);
        let md = render_markdown("Empty", &[], &stats, &Column::defaults(&reg), &cells);
        assert!(md.contains("- Records: 0\n"));
        assert!(md.ends_with("## Records\nNone\n"));
    }
}
