//! visu-cli: terminal front end for the Visu Analytics dashboard service
//!
//! Calls the Visu HTTP API and renders each view as plain-text tables, or
//! passes the server's JSON straight through with `--json`.
//!
//! # Subcommands
//! - `dashboard [-w <window>] [--exclude-city <city>]... [--json]`: every view
//! - `sessions  [-w <window>] [--exclude-city <city>]... [--json]`: session durations
//! - `lookup <token> [--session] [-w <window>] [--json]`         : per-session timelines
//! - `last [-n <count>] [-w <window>] [--exclude-city <city>]...` : most recent sessions
//! - `cities [-w <window>] [--json]`                              : cities seen in the window
//! - `status`                                                     : show server health

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8767";
const DEFAULT_LAST: usize = 10;
const PAGINATED_NOTICE: &str = "Results are paginated: showing the first page only";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "visu-cli",
    version,
    about = "Visu Analytics: dashboard views in the terminal"
)]
struct Cli {
    /// Visu HTTP server URL (overrides VISU_HTTP_URL env var)
    #[arg(long, env = "VISU_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct WindowArgs {
    /// Time window: today, 24h, 7d, 30d, 90d, 1y
    #[arg(short, long, default_value = "today")]
    window: String,

    /// Print the server's JSON response instead of tables
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Every aggregation view plus the session table
    Dashboard {
        #[command(flatten)]
        view: WindowArgs,

        /// Hide all traffic from visitors seen in this city (repeatable)
        #[arg(long = "exclude-city")]
        exclude_city: Vec<String>,
    },

    /// Session durations, longest first
    Sessions {
        #[command(flatten)]
        view: WindowArgs,

        /// Hide all traffic from visitors seen in this city (repeatable)
        #[arg(long = "exclude-city")]
        exclude_city: Vec<String>,
    },

    /// Timelines for a visitor token (or session id with --session)
    Lookup {
        /// Visitor token or session id
        token: String,

        /// Match the token against session ids instead of visitor tokens
        #[arg(long)]
        session: bool,

        #[command(flatten)]
        view: WindowArgs,

        /// Hide all traffic from visitors seen in this city (repeatable)
        #[arg(long = "exclude-city")]
        exclude_city: Vec<String>,
    },

    /// Most recently active sessions
    Last {
        /// Number of sessions to show
        #[arg(short = 'n', long, default_value_t = DEFAULT_LAST)]
        count: usize,

        #[command(flatten)]
        view: WindowArgs,

        /// Hide all traffic from visitors seen in this city (repeatable)
        #[arg(long = "exclude-city")]
        exclude_city: Vec<String>,
    },

    /// Cities seen in the window
    Cities {
        #[command(flatten)]
        view: WindowArgs,
    },

    /// Show Visu server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

/// One row of the session table
#[derive(Debug, Deserialize)]
pub struct SessionRow {
    pub uat: String,
    pub saidi: String,
    pub country: String,
    pub region: Option<String>,
    pub city: Option<String>,
    pub device_type: Option<String>,
    pub referrer: Option<String>,
    pub seconds: u64,
    pub total_time: String,
}

#[derive(Debug, Deserialize)]
pub struct TimelineEntry {
    pub date: String,
    #[serde(default)]
    pub fields: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct SessionTimeline {
    pub saidi: String,
    #[serde(default)]
    pub uat: Option<String>,
    pub referrers: String,
    #[serde(default)]
    pub url_params: Vec<String>,
    pub entries: Vec<TimelineEntry>,
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

/// POST a view request and return the response body.
pub fn post_view(server: &str, path: &str, body: &Value) -> anyhow::Result<Value> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()?;

    let url = format!("{}{}", server, path);
    let resp = client
        .post(&url)
        .json(body)
        .send()
        .map_err(|e| anyhow::anyhow!("connection failed to {}: {}", url, e))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().unwrap_or_default();
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v["error"].as_str().map(str::to_string))
            .unwrap_or(text);
        anyhow::bail!("server returned {}: {}", status, message);
    }

    Ok(resp.json()?)
}

/// GET /health and render the status block.
pub fn fetch_status(server: &str) -> anyhow::Result<String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let url = format!("{}/health", server);
    let resp = client
        .get(&url)
        .send()
        .map_err(|e| anyhow::anyhow!("cannot reach {}: {}", url, e))?;

    if !resp.status().is_success() {
        anyhow::bail!("server unhealthy (HTTP {})", resp.status());
    }

    let body: Value = resp.json().unwrap_or_default();
    Ok(format!(
        "Visu server: {}\nVersion:     {}\nStore:       {} ({})\nSocket:      {}\n",
        body["status"].as_str().unwrap_or("unknown"),
        body["version"].as_str().unwrap_or("?"),
        body["store"].as_str().unwrap_or("?"),
        body["store_version"].as_str().unwrap_or("?"),
        body["socket"].as_str().unwrap_or("?"),
    ))
}

// ============================================================================
// Rendering
// ============================================================================

/// Left-aligned text table with a dashed rule under the header.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(widths.len()) {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let line = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("{:<width$}", cell, width = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&line(headers.to_vec()));
    out.push('\n');
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&line(rule.iter().map(String::as_str).collect()));
    out.push('\n');
    for row in rows {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
        out.push('\n');
    }
    out
}

fn text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

/// Window heading, e.g. `Last 7 days (1234 events)`.
pub fn render_header(report: &Value) -> String {
    format!(
        "{} ({} events)\n",
        report["label"].as_str().unwrap_or("?"),
        report["event_count"].as_u64().unwrap_or(0)
    )
}

pub fn render_sessions(sessions: &[SessionRow]) -> String {
    if sessions.is_empty() {
        return "No sessions in this window.\n".to_string();
    }

    let rows: Vec<Vec<String>> = sessions
        .iter()
        .map(|s| {
            vec![
                s.uat.clone(),
                s.saidi.clone(),
                s.country.clone(),
                opt(&s.region),
                opt(&s.city),
                opt(&s.device_type),
                opt(&s.referrer),
                s.total_time.clone(),
            ]
        })
        .collect();

    render_table(
        &["UAT", "SAIDI", "COUNTRY", "REGION", "CITY", "DEVICE", "REFERRER", "TOTAL TIME"],
        &rows,
    )
}

/// Render a `{<key>, count}` list as a two-column table.
fn render_counts(title: &str, key: &str, items: &Value) -> String {
    let rows: Vec<Vec<String>> = items
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|item| vec![text(&item[key]), text(&item["count"])])
                .collect()
        })
        .unwrap_or_default();

    if rows.is_empty() {
        return format!("{}: none\n", title);
    }
    format!("{}\n{}", title, render_table(&[key, "count"], &rows))
}

pub fn render_dashboard(report: &Value) -> anyhow::Result<String> {
    let mut out = render_header(report);
    out.push_str(&format!(
        "Unique visitors: {}   Events: {}\n\n",
        report["totals"]["unique_visitors"].as_u64().unwrap_or(0),
        report["totals"]["events"].as_u64().unwrap_or(0)
    ));

    let buckets: Vec<Vec<String>> = report["visitors_over_time"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|b| vec![text(&b["label"]), text(&b["unique_visitors"]), text(&b["events"])])
                .collect()
        })
        .unwrap_or_default();
    out.push_str("Visitors over time\n");
    out.push_str(&render_table(&["period", "visitors", "events"], &buckets));
    out.push('\n');

    let countries: Vec<Vec<String>> = report["countries"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|c| {
                    vec![
                        text(&c["country"]),
                        text(&c["count"]),
                        format!("{:.2}%", c["percent"].as_f64().unwrap_or(0.0)),
                    ]
                })
                .collect()
        })
        .unwrap_or_default();
    out.push_str("Countries\n");
    out.push_str(&render_table(&["country", "count", "share"], &countries));
    out.push('\n');

    for (title, field) in [
        ("URL parameters", "url_params"),
        ("Referrers", "referrers"),
        ("Dashboard layouts", "dash_layouts"),
        ("Page views", "page_views"),
        ("News types", "news_types"),
    ] {
        out.push_str(&render_counts(title, "value", &report[field]));
        out.push('\n');
    }
    out.push_str(&render_counts("Interactions", "label", &report["interactions"]));
    out.push('\n');

    let locations: Vec<Vec<String>> = report["locations"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|l| {
                    vec![
                        text(&l["country"]),
                        text(&l["region"]),
                        text(&l["city"]),
                        text(&l["count"]),
                    ]
                })
                .collect()
        })
        .unwrap_or_default();
    out.push_str("Locations\n");
    out.push_str(&render_table(&["country", "region", "city", "count"], &locations));
    out.push('\n');

    let visitor_locations: Vec<Vec<String>> = report["visitor_locations"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|l| {
                    vec![
                        text(&l["uat"]),
                        text(&l["country"]),
                        text(&l["region"]),
                        text(&l["city"]),
                        text(&l["count"]),
                    ]
                })
                .collect()
        })
        .unwrap_or_default();
    out.push_str("Visits by token and location\n");
    out.push_str(&render_table(
        &["uat", "country", "region", "city", "count"],
        &visitor_locations,
    ));
    out.push('\n');

    let visitor_interactions: Vec<Vec<String>> = report["visitor_interactions"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|v| {
                    vec![
                        text(&v["uat"]),
                        text(&v["country"]),
                        text(&v["region"]),
                        text(&v["city"]),
                        text(&v["device_type"]),
                        text(&v["count"]),
                    ]
                })
                .collect()
        })
        .unwrap_or_default();
    out.push_str("Interactions per visitor\n");
    out.push_str(&render_table(
        &["uat", "country", "region", "city", "device", "count"],
        &visitor_interactions,
    ));
    out.push('\n');

    let sessions: Vec<SessionRow> = serde_json::from_value(report["sessions"].clone())?;
    out.push_str("Sessions\n");
    out.push_str(&render_sessions(&sessions));
    Ok(out)
}

pub fn render_timelines(timelines: &[SessionTimeline]) -> String {
    if timelines.is_empty() {
        return "No sessions found.\n".to_string();
    }

    let mut out = String::new();
    for t in timelines {
        out.push_str(&format!("Session {}\n", t.saidi));
        if let Some(uat) = &t.uat {
            out.push_str(&format!("  UAT:        {}\n", uat));
        }
        out.push_str(&format!("  Referrers:  {}\n", t.referrers));
        if !t.url_params.is_empty() {
            out.push_str(&format!("  URL params: {}\n", t.url_params.join(", ")));
        }
        for entry in &t.entries {
            let fields: Vec<String> = entry
                .fields
                .iter()
                .map(|(k, v)| format!("{}={}", k, text(v)))
                .collect();
            out.push_str(&format!("  {}  {}\n", entry.date, fields.join(" ")));
        }
        out.push('\n');
    }
    out
}

pub fn render_cities(report: &Value) -> String {
    let cities: Vec<String> = report["cities"]
        .as_array()
        .map(|arr| arr.iter().filter_map(|c| c.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    if cities.is_empty() {
        return "No cities in this window.\n".to_string();
    }
    cities.iter().map(|c| format!("{}\n", c)).collect()
}

// ============================================================================
// Command dispatch
// ============================================================================

fn run_view(
    server: &str,
    path: &str,
    body: Value,
    json: bool,
    render: impl FnOnce(&Value) -> anyhow::Result<String>,
) -> anyhow::Result<()> {
    let report = post_view(server, path, &body)?;

    if report["paginated"].as_bool().unwrap_or(false) {
        eprintln!("warning: {}", PAGINATED_NOTICE);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render(&report)?);
    }
    Ok(())
}

/// Request body for POST /lookup.
pub fn lookup_body(token: &str, session: bool, window: &str, exclude_cities: &[String]) -> Value {
    serde_json::json!({
        "window": window,
        "token": token,
        "by": if session { "session" } else { "visitor" },
        "exclude_cities": exclude_cities,
    })
}

fn render_timeline_report(report: &Value) -> anyhow::Result<String> {
    let timelines: Vec<SessionTimeline> = serde_json::from_value(report["sessions"].clone())?;
    Ok(format!("{}\n{}", render_header(report), render_timelines(&timelines)))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let server = cli.server.trim_end_matches('/').to_string();

    match cli.command {
        Commands::Dashboard { view, exclude_city } => run_view(
            &server,
            "/dashboard",
            serde_json::json!({"window": view.window, "exclude_cities": exclude_city}),
            view.json,
            render_dashboard,
        ),
        Commands::Sessions { view, exclude_city } => run_view(
            &server,
            "/sessions",
            serde_json::json!({"window": view.window, "exclude_cities": exclude_city}),
            view.json,
            |report| {
                let sessions: Vec<SessionRow> =
                    serde_json::from_value(report["sessions"].clone())?;
                Ok(format!("{}\n{}", render_header(report), render_sessions(&sessions)))
            },
        ),
        Commands::Lookup {
            token,
            session,
            view,
            exclude_city,
        } => run_view(
            &server,
            "/lookup",
            lookup_body(&token, session, &view.window, &exclude_city),
            view.json,
            render_timeline_report,
        ),
        Commands::Last {
            count,
            view,
            exclude_city,
        } => run_view(
            &server,
            "/last-sessions",
            serde_json::json!({
                "window": view.window,
                "limit": count,
                "exclude_cities": exclude_city,
            }),
            view.json,
            render_timeline_report,
        ),
        Commands::Cities { view } => run_view(
            &server,
            "/cities",
            serde_json::json!({"window": view.window}),
            view.json,
            |report| Ok(render_cities(report)),
        ),
        Commands::Status => {
            print!("{}", fetch_status(&server)?);
            Ok(())
        }
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("visu-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
