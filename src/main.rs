use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};
use clap::{ArgAction, ColorChoice, CommandFactory, Parser, ValueEnum};
use clap_complete::Shell;
use comfy_table::{ContentArrangement, Table};
use is_terminal::IsTerminal;
use serde::{Deserialize, Serialize};

use fleetreport::config::ReportConfig;
use fleetreport::export::{self, export_file_name, CellRenderer, Column, ExportScope, Zone};
use fleetreport::filter::{FilterSpec, Predicate, QuickRange};
use fleetreport::group::{field_key, group_by, GroupKeyMode};
use fleetreport::html::{render_html, HtmlOptions, Theme};
use fleetreport::loader::{infer_registry, load_path, LoadOptions};
use fleetreport::markdown::render_markdown;
use fleetreport::page::{PageState, DEFAULT_PAGE_SIZE};
use fleetreport::query::{self, Query, ReportView, Rows};
use fleetreport::record::{format_number, Record};
use fleetreport::sort::{Direction, SortSpec};
use fleetreport::stats::{Distribution, Statistics, NO_VALUE};

static ENABLE_COLOR: OnceLock<bool> = OnceLock::new();

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
enum OutputFmt { Text, Json }

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
enum TextFormat { Lines, Table }

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
enum LogLevel { Error, Warn, Info, Debug, Trace }

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
enum LogFormat { Text, Json }

#[derive(Parser, Debug)]
#[command(
    name = "FleetReport",
    about = "Search, filter, group and summarize operational records",
    long_about = "Loads operational records (trips, violations, log lines, expenses) from JSON or NDJSON, applies search, filters and quick date ranges, sorts, groups, computes statistics and exports CSV, TSV, NDJSON, HTML and Markdown reports.",
    after_long_help = "Examples:\n  FleetReport --input trips.json --range last7days --sort km --desc\n  FleetReport --input logs/ --input-glob *.ndjson --filter method:one_of:GET,POST --output json\n  FleetReport --input violations.json --group-by plate --group-key-mode canonical --html report.html\n  FleetReport --input expenses.ndjson --search apex --export-dir out",
    color = ColorChoice::Auto
)]
struct Args {
    /// Record file (JSON array or NDJSON) or a directory of them
    #[arg(long, short = 'i')]
    input: Option<String>,
    /// Only read matching files from an input directory
    #[arg(long)]
    input_glob: Option<String>,
    #[arg(long, default_value_t = false)]
    recursive: bool,
    #[arg(long, short = 'c')]
    config: Option<String>,
    /// Case, diacritic and script-variant insensitive search term
    #[arg(long, short = 's')]
    search: Option<String>,
    /// Predicate as field:op:value (eq, ne, contains, one_of, none_of, gte, lte, matches) or field=value
    #[arg(long = "filter", short = 'f')]
    filters: Vec<Predicate>,
    /// Quick date range: today, yesterday, last7days, last30days, all
    #[arg(long, short = 'r')]
    range: Option<QuickRange>,
    #[arg(long)]
    from: Option<String>,
    #[arg(long)]
    to: Option<String>,
    /// Field the date range applies to
    #[arg(long)]
    date_field: Option<String>,
    #[arg(long)]
    sort: Option<String>,
    #[arg(long, default_value_t = false)]
    desc: bool,
    #[arg(long, short = 'g')]
    group_by: Option<String>,
    /// exact or canonical (trimmed, upper-cased keys)
    #[arg(long)]
    group_key_mode: Option<GroupKeyMode>,
    /// Compute statistics per group as well
    #[arg(long, default_value_t = false)]
    group_stats: bool,
    #[arg(long, short = 'p', default_value_t = 1)]
    page: usize,
    #[arg(long, short = 'n')]
    page_size: Option<usize>,
    #[arg(long, short = 'o', value_enum, default_value = "text")]
    output: OutputFmt,
    #[arg(long, value_enum, default_value = "lines")]
    text_format: TextFormat,
    #[arg(long, short = 'j')]
    json_path: Option<String>,
    #[arg(long)]
    csv: Option<String>,
    #[arg(long)]
    tsv: Option<String>,
    #[arg(long)]
    ndjson: Option<String>,
    #[arg(long)]
    html: Option<String>,
    #[arg(long)]
    md: Option<String>,
    /// Write CSV, HTML, Markdown and NDJSON named <report-name>_<date>.<ext>
    #[arg(long)]
    export_dir: Option<String>,
    /// Export only the current page instead of every filtered record
    #[arg(long, default_value_t = false)]
    page_only: bool,
    /// dark or light
    #[arg(long)]
    theme: Option<Theme>,
    /// local or utc
    #[arg(long)]
    time_zone: Option<Zone>,
    #[arg(long)]
    time_format: Option<String>,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    report_name: Option<String>,
    #[arg(long, default_value_t = false)]
    progress: bool,
    #[arg(long, short = 'v', action = ArgAction::Count)]
    verbose: u8,
    #[arg(long, short = 'q', default_value_t = false)]
    quiet: bool,
    #[arg(long)]
    log_level: Option<LogLevel>,
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
    #[arg(long)]
    log_path: Option<String>,
    #[arg(long, short = 'C', default_value_t = false)]
    no_color: bool,
    #[arg(long, default_value_t = false)]
    force_color: bool,
    #[arg(long, value_enum)]
    completions: Option<Shell>,
    #[arg(long)]
    completions_out: Option<String>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            input: None,
            input_glob: None,
            recursive: false,
            config: None,
            search: None,
            filters: vec![],
            range: None,
            from: None,
            to: None,
            date_field: None,
            sort: None,
            desc: false,
            group_by: None,
            group_key_mode: None,
            group_stats: false,
            page: 1,
            page_size: None,
            output: OutputFmt::Text,
            text_format: TextFormat::Lines,
            json_path: None,
            csv: None,
            tsv: None,
            ndjson: None,
            html: None,
            md: None,
            export_dir: None,
            page_only: false,
            theme: None,
            time_zone: None,
            time_format: None,
            title: None,
            report_name: None,
            progress: false,
            verbose: 0,
            quiet: false,
            log_level: None,
            log_format: None,
            log_path: None,
            no_color: false,
            force_color: false,
            completions: None,
            completions_out: None,
        }
    }
}

fn main() {
    let args = Args::parse();
    if let Some(sh) = args.completions {
        let mut cmd = Args::command();
        if let Some(path) = args.completions_out.as_ref() {
            if let Ok(mut f) = std::fs::File::create(path) { clap_complete::generate(sh, &mut cmd, "FleetReport", &mut f); } else { clap_complete::generate(sh, &mut cmd, "FleetReport", &mut std::io::stdout()); }
        } else {
            clap_complete::generate(sh, &mut cmd, "FleetReport", &mut std::io::stdout());
        }
        return;
    }
    init_logger(&args);
    let term = std::env::var("TERM").unwrap_or_default();
    let no_color_env = std::env::var_os("NO_COLOR").is_some();
    let color_default = std::io::stdout().is_terminal() && !no_color_env && term != "dumb";
    let enable_color = if args.force_color { true } else { color_default && !args.no_color };
    let _ = ENABLE_COLOR.set(enable_color);
    if let Err(e) = run(args) {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn init_logger(args: &Args) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
    if args.quiet {
        builder.filter_level(log::LevelFilter::Error);
    } else if let Some(lvl) = args.log_level {
        let f = match lvl { LogLevel::Error => log::LevelFilter::Error, LogLevel::Warn => log::LevelFilter::Warn, LogLevel::Info => log::LevelFilter::Info, LogLevel::Debug => log::LevelFilter::Debug, LogLevel::Trace => log::LevelFilter::Trace };
        builder.filter_level(f);
    } else if args.verbose > 0 {
        let f = if args.verbose >= 3 { log::LevelFilter::Trace } else if args.verbose == 2 { log::LevelFilter::Debug } else { log::LevelFilter::Info };
        builder.filter_level(f);
    }
    if let Some(fmt) = args.log_format {
        match fmt {
            LogFormat::Json => {
                builder.format(|buf, record| {
                    use std::io::Write;
                    let obj = serde_json::json!({
                        "ts": Local::now().to_rfc3339(),
                        "level": record.level().to_string(),
                        "target": record.target(),
                        "msg": record.args().to_string(),
                    });
                    writeln!(buf, "{}", obj)
                });
            }
            LogFormat::Text => {
                builder.format(|buf, record| {
                    use std::io::Write;
                    writeln!(buf, "[{:<5} {}] {}", record.level(), Local::now().format("%H:%M:%S"), record.args())
                });
            }
        }
    }
    if let Some(path) = args.log_path.as_ref() {
        match std::fs::File::create(path) {
            Ok(f) => { builder.target(env_logger::Target::Pipe(Box::new(f))); }
            Err(e) => eprintln!("Failed to open log file {}: {}", path, e),
        }
    }
    builder.init();
}

/// Config values fill in whatever was not given on the command line.
fn apply_config(args: &mut Args, cfg: &ReportConfig) {
    if args.filters.is_empty() { args.filters = cfg.filters.clone(); }
    if args.range.is_none() { args.range = cfg.range; }
    if args.date_field.is_none() { args.date_field = cfg.date_field.clone(); }
    if args.sort.is_none() && let Some(k) = cfg.sort.as_ref() {
        args.sort = Some(k.clone());
        if !args.desc { args.desc = cfg.direction == Some(Direction::Descending); }
    }
    if args.group_by.is_none() { args.group_by = cfg.group_by.clone(); }
    if args.group_key_mode.is_none() { args.group_key_mode = cfg.group_key_mode; }
    if args.page_size.is_none() { args.page_size = cfg.page_size; }
    if args.theme.is_none() { args.theme = cfg.theme; }
    if args.time_zone.is_none() { args.time_zone = cfg.time_zone; }
    if args.time_format.is_none() { args.time_format = cfg.time_format.clone(); }
    if args.title.is_none() { args.title = Some(cfg.title().to_string()); }
    if args.report_name.is_none() { args.report_name = Some(cfg.report_name().to_string()); }
}

fn build_query(args: &Args, cfg: &ReportConfig) -> Query {
    let filter = FilterSpec {
        search: args.search.clone(),
        search_fields: cfg.search_fields.clone(),
        predicates: args.filters.clone(),
        date_field: args.date_field.clone(),
        range: args.range,
        from: args.from.clone(),
        to: args.to.clone(),
    };
    if filter.date_field.is_none() && (args.range.is_some_and(|r| r != QuickRange::All) || args.from.is_some() || args.to.is_some()) {
        log::warn!("date range given without --date-field; ignoring it");
    }
    Query {
        filter,
        sort: args.sort.as_deref().map(|k| SortSpec::new(k, if args.desc { Direction::Descending } else { Direction::Ascending })),
        group_by: args.group_by.clone(),
        group_key_mode: args.group_key_mode.unwrap_or_default(),
        page: PageState::new(args.page, args.page_size.unwrap_or(DEFAULT_PAGE_SIZE)),
        group_stats: args.group_stats,
    }
}

fn run(mut args: Args) -> Result<()> {
    let cfg = ReportConfig::discover(args.config.as_deref().map(Path::new))?;
    apply_config(&mut args, &cfg);
    let Some(input) = args.input.clone() else { bail!("no input given; pass --input <file|dir>") };
    let opts = LoadOptions { glob: args.input_glob.clone(), recursive: args.recursive, progress: args.progress && std::io::stderr().is_terminal() };
    let records = load_path(Path::new(&input), &opts)?;
    let registry = if cfg.fields.is_empty() {
        let reg = infer_registry(&records);
        log::debug!("inferred {} field types", reg.iter().count());
        reg
    } else {
        cfg.registry()
    };
    let query = build_query(&args, &cfg);
    let stats_spec = cfg.stats_spec(args.date_field.as_deref());
    let zone = args.time_zone.unwrap_or_default();
    let view = match zone {
        Zone::Local => query::run(&records, &registry, &stats_spec, &query, &Local::now()),
        Zone::Utc => query::run(&records, &registry, &stats_spec, &query, &Utc::now()),
    }?;
    let columns = cfg.columns(&registry);
    let cells = CellRenderer::new(&registry, zone, args.time_format.as_deref());

    match args.output {
        OutputFmt::Text => match args.text_format {
            TextFormat::Lines => print_text(&view, &columns, &cells),
            TextFormat::Table => print_text_table(&view, &columns, &cells),
        },
        OutputFmt::Json => {
            let body = serde_json::to_vec_pretty(&view).context("failed to serialize report")?;
            if let Some(p) = args.json_path.as_ref() {
                match std::fs::write(p, body) {
                    Ok(_) => { if !args.quiet { println!("{}", paint(&format!("JSON written: {}", p), "1;36")); } }
                    Err(e) => log::error!("JSON write failed for {}: {}", p, e),
                }
            } else if !args.quiet {
                println!("{}", String::from_utf8_lossy(&body));
            }
        }
    }
    write_exports(&args, &view, &columns, &cells);
    Ok(())
}

fn write_exports(args: &Args, view: &ReportView, columns: &[Column], cells: &CellRenderer) {
    let scope = if args.page_only { ExportScope::CurrentPage } else { ExportScope::Filtered };
    let records = scope.select(view);
    let title = args.title.as_deref().unwrap_or("Report");
    let html = || {
        let groups = args.group_by.as_deref().map(|f| group_by(&records, field_key(f, args.group_key_mode.unwrap_or_default())));
        let opts = HtmlOptions { title, theme: args.theme.unwrap_or_default(), generated: cells.time(Utc::now()) };
        render_html(&records, groups.as_deref(), &view.stats, columns, cells, &opts)
    };
    let md = || render_markdown(title, &records, &view.stats, columns, cells);

    if let Some(p) = args.csv.as_ref() {
        if let Err(e) = export::write_csv(Path::new(p), &records, columns, cells) { log::error!("CSV write failed for {}: {}", p, e); } else { written("CSV", p, args.quiet); }
    }
    if let Some(p) = args.tsv.as_ref() {
        if let Err(e) = export::write_tsv(Path::new(p), &records, columns, cells) { log::error!("TSV write failed for {}: {}", p, e); } else { written("TSV", p, args.quiet); }
    }
    if let Some(p) = args.ndjson.as_ref() {
        if let Err(e) = export::write_ndjson(Path::new(p), &records, columns, cells) { log::error!("NDJSON write failed for {}: {}", p, e); } else { written("NDJSON", p, args.quiet); }
    }
    if let Some(p) = args.html.as_ref() {
        match std::fs::write(p, html()) {
            Ok(_) => written("HTML", p, args.quiet),
            Err(e) => log::error!("HTML write failed for {}: {}", p, e),
        }
    }
    if let Some(p) = args.md.as_ref() {
        match std::fs::write(p, md()) {
            Ok(_) => written("Markdown", p, args.quiet),
            Err(e) => log::error!("Markdown write failed for {}: {}", p, e),
        }
    }
    if let Some(dir) = args.export_dir.as_ref() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            log::error!("Cannot create export directory {}: {}", dir, e);
            return;
        }
        let base = PathBuf::from(dir);
        let name = args.report_name.as_deref().unwrap_or("report");
        let today = Local::now().date_naive();
        let path = |ext: &str| base.join(export_file_name(name, today, ext));
        let csv_path = path("csv");
        if let Err(e) = export::write_csv(&csv_path, &records, columns, cells) { log::error!("CSV write failed for {}: {}", csv_path.display(), e); } else { written("CSV", &csv_path.to_string_lossy(), args.quiet); }
        let nd_path = path("ndjson");
        if let Err(e) = export::write_ndjson(&nd_path, &records, columns, cells) { log::error!("NDJSON write failed for {}: {}", nd_path.display(), e); } else { written("NDJSON", &nd_path.to_string_lossy(), args.quiet); }
        let html_path = path("html");
        match std::fs::write(&html_path, html()) {
            Ok(_) => written("HTML", &html_path.to_string_lossy(), args.quiet),
            Err(e) => log::error!("HTML write failed for {}: {}", html_path.display(), e),
        }
        let md_path = path("md");
        match std::fs::write(&md_path, md()) {
            Ok(_) => written("Markdown", &md_path.to_string_lossy(), args.quiet),
            Err(e) => log::error!("Markdown write failed for {}: {}", md_path.display(), e),
        }
    }
}

fn written(kind: &str, path: &str, quiet: bool) {
    if !quiet { println!("{}", paint(&format!("{} written: {}", kind, path), "1;36")); }
}

fn print_header(view: &ReportView) {
    let shown = view.rows.visible().len();
    println!("{}", paint(&format!("Records: {} of {} | page {} of {} ({} shown)", view.records.len(), view.total_input, view.rows.page(), view.rows.display_total_pages(), shown), "1;36"));
}

fn print_stats(stats: &Statistics) {
    for n in &stats.numeric {
        println!("{} total {}  avg {}", paint(&format!("{}:", n.field), "1"), format_number(n.sum), format_number((n.average * 100.0).round() / 100.0));
    }
    if let Some(t) = &stats.trend {
        let code = match t.percent() { Some(p) if p > 0.0 => "31", Some(p) if p < 0.0 => "32", _ => "37" };
        println!("{} {}", paint("Trend:", "1"), paint(&t.describe(), code));
    }
    let print_dist = |title: &str, d: &Distribution| {
        println!("{}", paint(&format!("{} ({}):", title, d.field), "1"));
        let max = d.buckets.iter().map(|b| b.count).max().unwrap_or(0);
        for b in &d.buckets { println!("  {:<16} {:>6} {}", truncate(&b.label, 16), b.count, bar(b.count, max, 20)); }
    };
    if let Some(b) = &stats.buckets { print_dist("Severity", b); }
    for d in &stats.distributions { print_dist("Distribution", d); }
    if let Some(b) = &stats.breakdown { print_dist("Top", b); }
    if !stats.timeline.is_empty() {
        println!("{}", paint("Timeline:", "1"));
        let max = stats.timeline.iter().map(|b| b.count).max().unwrap_or(0);
        for b in &stats.timeline { println!("  {:<16} {:>6} {}", b.label, b.count, bar(b.count, max, 20)); }
    }
}

fn print_text(view: &ReportView, columns: &[Column], cells: &CellRenderer) {
    print_header(view);
    print_stats(&view.stats);
    let line = |r: &Record| cells.row(r, columns).into_iter().map(|c| truncate(&c.replace('\n', " "), 40)).collect::<Vec<_>>().join("  ");
    match &view.rows {
        Rows::Flat(p) => { for r in &p.items { println!("{}", line(*r)); } }
        Rows::Grouped(p) => {
            for g in &p.items {
                let key = if g.key.is_empty() { NO_VALUE } else { g.key.as_str() };
                println!("{}", paint(&format!("== {} ({})", key, g.records.len()), "1;33"));
                for r in &g.records { println!("  {}", line(*r)); }
            }
        }
    }
}

fn print_text_table(view: &ReportView, columns: &[Column], cells: &CellRenderer) {
    print_header(view);
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    let grouped = matches!(view.rows, Rows::Grouped(_));
    let mut hdr: Vec<String> = Vec::new();
    if grouped { hdr.push(paint("Group", "1")); }
    for c in columns { hdr.push(paint(&c.header, "1")); }
    table.set_header(hdr);
    match &view.rows {
        Rows::Flat(p) => { for r in &p.items { table.add_row(cells.row(r, columns)); } }
        Rows::Grouped(p) => {
            for g in &p.items {
                for r in &g.records {
                    let mut row = vec![g.key.clone()];
                    row.extend(cells.row(r, columns));
                    table.add_row(row);
                }
            }
        }
    }
    println!("{}", table);
    print_stats(&view.stats);
}

fn bar(v: usize, max: usize, width: usize) -> String {
    if max == 0 { return String::new(); }
    let filled = ((v as f64 / max as f64) * width as f64).round() as usize;
    "█".repeat(filled)
}

fn truncate(s: &str, n: usize) -> String {
    let mut out: String = s.chars().take(n).collect();
    if s.chars().count() > n { out.push_str("..."); }
    out
}

fn paint(s: &str, code: &str) -> String {
    if *ENABLE_COLOR.get().unwrap_or(&true) { format!("\x1b[{}m{}\x1b[0m", code, s) } else { s.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetreport::filter::Operator;

    #[test]
    fn truncate_adds_ellipsis() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abcdef", 6), "abcdef");
    }

    #[test]
    fn bar_scales_to_width() {
        assert_eq!(bar(5, 10, 20).chars().count(), 10);
        assert_eq!(bar(0, 0, 20), "");
    }

    #[test]
    fn flags_beat_config() {
        let cfg = ReportConfig::parse("sort = 'km'\ndirection = 'descending'\npage_size = 50\nrange = 'today'\ntheme = 'light'\nname = 'trips'").unwrap();
        let mut args = Args { range: Some(QuickRange::Last30Days), page_size: Some(5), ..Default::default() };
        apply_config(&mut args, &cfg);
        assert_eq!(args.range, Some(QuickRange::Last30Days));
        assert_eq!(args.page_size, Some(5));
        assert_eq!(args.sort.as_deref(), Some("km"));
        assert!(args.desc);
        assert_eq!(args.theme, Some(Theme::Light));
        assert_eq!(args.report_name.as_deref(), Some("trips"));
    }

    #[test]
    fn query_from_args() {
        let cfg = ReportConfig::parse("search_fields = ['plate']\ndate_field = 'at'").unwrap();
        let mut args = Args {
            search: Some("apex".into()),
            filters: vec!["km:gte:10".parse().unwrap()],
            sort: Some("km".into()),
            page: 3,
            ..Default::default()
        };
        apply_config(&mut args, &cfg);
        let q = build_query(&args, &cfg);
        assert_eq!(q.filter.search_fields, vec!["plate".to_string()]);
        assert_eq!(q.filter.date_field.as_deref(), Some("at"));
        assert_eq!(q.filter.predicates[0].op, Operator::Gte);
        assert_eq!(q.sort, Some(SortSpec::new("km", Direction::Ascending)));
        assert_eq!(q.page, PageState::new(3, DEFAULT_PAGE_SIZE));
    }

    #[test]
    fn cli_parses_library_types() {
        let args = Args::try_parse_from(["FleetReport", "-i", "x.json", "--range", "last7days", "--theme", "light", "--time-zone", "utc", "--group-key-mode", "canonical", "-f", "plate=AB-1"]).unwrap();
        assert_eq!(args.range, Some(QuickRange::Last7Days));
        assert_eq!(args.theme, Some(Theme::Light));
        assert_eq!(args.time_zone, Some(Zone::Utc));
        assert_eq!(args.group_key_mode, Some(GroupKeyMode::Canonical));
        assert_eq!(args.filters, vec![Predicate::new("plate", Operator::Eq, "AB-1")]);
        Args::command().debug_assert();
    }
}
