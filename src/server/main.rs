//! HTTP front door for the gazetteer service.
//!
//! Serves city searches across loaded countries plus the operator surface:
//! a JSON fleet snapshot, a small admin page, and the `/cmd/*` endpoints
//! that map one-to-one onto country manager commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, Json},
    routing::get,
    Router,
};
use bytesize::ByteSize;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use gazetteer::catalog::Catalog;
use gazetteer::config::Config;
use gazetteer::country::Settings;
use gazetteer::manager::{
    self, CommandResult, CountryStatus, ManagerHandle, SortColumn, SortDirection,
};
use gazetteer::models::City;
use gazetteer::search::{self, MatchOptions};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

const FROM_SERVER: &str = "country_manager";

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Geonames city search service")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "gazetteer.toml")]
    config: PathBuf,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<String>,
}

/// Application state shared across handlers
struct AppState {
    manager: ManagerHandle,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = Config::load_from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let listen = args.listen.unwrap_or_else(|| config.listen.clone());

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

    let catalog = Catalog::load_from_file(&config.country_info)?;
    info!(countries = catalog.len(), "catalog loaded");

    let (manager, manager_join) = manager::spawn(catalog, config, Settings::default())?;

    let state = Arc::new(AppState {
        manager: manager.clone(),
    });
    let app = Router::new()
        .route("/search", get(search_handler))
        .route("/server_info", get(server_info_handler))
        .route("/server_status", get(server_status_handler))
        .route("/cmd/{action}", get(cmd_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("starting server on {listen}");
    let listener = tokio::net::TcpListener::bind(&listen).await?;

    // Ctrl-C is the operator's terminate.
    let signal_manager = manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, terminating");
            let _ = signal_manager.terminate().await;
        }
    });

    // The process lives exactly as long as the manager; the server drains
    // in-flight requests (the terminate farewell included) before exiting.
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let watcher = tokio::spawn(async move {
        let result = manager_join.await;
        let _ = done_tx.send(());
        result
    });
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = done_rx.await;
        })
        .await?;

    match watcher.await {
        Ok(Ok(())) => {
            info!("country manager exited, shutting down");
            Ok(())
        }
        Ok(Err(e)) => anyhow::bail!("country manager crashed: {e}"),
        Err(e) => anyhow::bail!("manager watcher failed: {e}"),
    }
}

#[derive(Deserialize)]
struct SearchQueryParams {
    search_term: String,
    #[serde(default)]
    starts_with: bool,
    #[serde(default)]
    whole_word: bool,
}

/// City search across every loaded country.
async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchQueryParams>,
) -> Result<Json<Vec<City>>, (StatusCode, String)> {
    let term = params.search_term.trim();
    if term.chars().count() < search::MIN_TERM_LEN {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("search_term must be at least {} characters", search::MIN_TERM_LEN),
        ));
    }

    let opts = MatchOptions {
        starts_with: params.starts_with,
        whole_word: params.whole_word,
    };
    let indexes = state.manager.indexes().await.map_err(internal)?;

    let mut found = Vec::new();
    for (_code, cities) in &indexes {
        found.extend(search::match_cities(cities, term, opts).into_iter().cloned());
    }
    Ok(Json(found))
}

#[derive(Serialize)]
struct ServerStatusResponse {
    country_manager_trace: bool,
    memory_usage: String,
    servers: Vec<CountryStatus>,
}

/// Fleet snapshot for the admin page.
async fn server_status_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ServerStatusResponse>, (StatusCode, String)> {
    let snapshot = state.manager.status().await.map_err(internal)?;
    let memory = manager::process_memory().unwrap_or(0);
    Ok(Json(ServerStatusResponse {
        country_manager_trace: snapshot.country_manager_trace,
        memory_usage: ByteSize::b(memory).display().iec().to_string(),
        servers: snapshot.servers,
    }))
}

async fn server_info_handler() -> Html<&'static str> {
    Html(ADMIN_PAGE)
}

#[derive(Deserialize)]
struct CmdParams {
    code: Option<String>,
    value: Option<String>,
    column: Option<String>,
    direction: Option<String>,
}

/// Reply envelope shared by every admin command.
#[derive(Serialize)]
struct CmdResponse {
    from_server: &'static str,
    cmd: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl CmdResponse {
    fn ok(cmd: &str, payload: impl Serialize) -> Self {
        Self {
            from_server: FROM_SERVER,
            cmd: cmd.to_string(),
            status: "ok",
            payload: serde_json::to_value(payload).ok(),
            reason: None,
        }
    }

    fn error(cmd: &str, reason: String) -> Self {
        Self {
            from_server: FROM_SERVER,
            cmd: cmd.to_string(),
            status: "error",
            payload: None,
            reason: Some(reason),
        }
    }

    fn goodbye(cmd: &str) -> Self {
        Self {
            from_server: FROM_SERVER,
            cmd: cmd.to_string(),
            status: "goodbye",
            payload: None,
            reason: None,
        }
    }

    fn from_result(cmd: &str, result: CommandResult) -> Self {
        match result {
            Ok(status) => Self::ok(cmd, status),
            Err(e) => Self::error(cmd, e.to_string()),
        }
    }
}

/// Operator commands, mapped one-to-one onto the manager contract.
async fn cmd_handler(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
    Query(params): Query<CmdParams>,
) -> Result<Json<CmdResponse>, (StatusCode, String)> {
    let manager = &state.manager;
    let response = match action.as_str() {
        "start" => {
            let code = require_code(&params)?;
            CmdResponse::from_result(&action, manager.start(&code).await.map_err(internal)?)
        }
        "stop" => {
            let code = require_code(&params)?;
            CmdResponse::from_result(&action, manager.shutdown(&code).await.map_err(internal)?)
        }
        "reset" => {
            let code = require_code(&params)?;
            CmdResponse::from_result(&action, manager.reset(&code).await.map_err(internal)?)
        }
        "start_all" => CmdResponse::ok(&action, manager.start_all().await.map_err(internal)?),
        "stop_all" => CmdResponse::ok(&action, manager.shutdown_all().await.map_err(internal)?),
        "reset_all" => CmdResponse::ok(&action, manager.reset_all().await.map_err(internal)?),
        "trace" => {
            let on = matches!(params.value.as_deref(), Some("on"));
            match params.code.as_deref() {
                Some(code) => CmdResponse::from_result(
                    &action,
                    manager.trace_country(code, on).await.map_err(internal)?,
                ),
                None => {
                    let trace = manager.trace(on).await.map_err(internal)?;
                    CmdResponse::ok(&action, serde_json::json!({ "country_manager_trace": trace }))
                }
            }
        }
        "sort" => {
            let column: SortColumn = params
                .column
                .as_deref()
                .unwrap_or("")
                .parse()
                .map_err(|e: String| (StatusCode::BAD_REQUEST, e))?;
            let direction = SortDirection::parse(params.direction.as_deref().unwrap_or(""));
            CmdResponse::ok(
                &action,
                manager.sort(direction, column).await.map_err(internal)?,
            )
        }
        "terminate" => {
            manager.terminate().await.map_err(internal)?;
            CmdResponse::goodbye(&action)
        }
        _ => {
            return Err((StatusCode::NOT_FOUND, format!("unknown command {action:?}")));
        }
    };
    Ok(Json(response))
}

fn require_code(params: &CmdParams) -> Result<String, (StatusCode, String)> {
    params
        .code
        .clone()
        .ok_or((StatusCode::BAD_REQUEST, "missing code parameter".to_string()))
}

fn internal(e: anyhow::Error) -> (StatusCode, String) {
    tracing::error!("manager request failed: {e}");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

const ADMIN_PAGE: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>Gazetteer fleet</title>
<style>
  body { font-family: sans-serif; margin: 2em; }
  table { border-collapse: collapse; margin-top: 1em; }
  th, td { border: 1px solid #ccc; padding: 0.3em 0.7em; text-align: left; }
  th { cursor: pointer; background: #f4f4f4; }
  .toolbar button { margin-right: 0.5em; }
  .crashed { color: #b00; }
  .started { color: #080; }
</style>
</head>
<body>
<h1>Gazetteer fleet</h1>
<div class="toolbar">
  <button onclick="cmd('start_all')">Start all</button>
  <button onclick="cmd('stop_all')">Stop all</button>
  <button onclick="cmd('reset_all')">Reset all crashed</button>
  <span id="memory"></span>
</div>
<table id="fleet">
  <thead>
    <tr>
      <th onclick="sortBy('country_code')">Code</th>
      <th onclick="sortBy('country_name')">Country</th>
      <th onclick="sortBy('continent')">Continent</th>
      <th>Status</th>
      <th>Progress</th>
      <th onclick="sortBy('city_count')">Cities</th>
      <th onclick="sortBy('startup_time')">Startup ms</th>
      <th onclick="sortBy('mem_usage')">Memory</th>
      <th>Actions</th>
    </tr>
  </thead>
  <tbody></tbody>
</table>
<script>
let direction = 'ascending';
async function cmd(action, params) {
  const query = new URLSearchParams(params || {}).toString();
  await fetch('/cmd/' + action + (query ? '?' + query : ''));
  refresh();
}
function sortBy(column) {
  direction = direction === 'ascending' ? 'descending' : 'ascending';
  cmd('sort', { column: column, direction: direction });
}
async function refresh() {
  const res = await fetch('/server_status');
  const data = await res.json();
  document.getElementById('memory').textContent = 'process: ' + data.memory_usage;
  const rows = data.servers.map(s => {
    const sub = s.substatus ? ' (' + s.substatus + ')' : '';
    return '<tr>' +
      '<td>' + s.country_code + '</td>' +
      '<td>' + s.country_name + '</td>' +
      '<td>' + s.continent + '</td>' +
      '<td class="' + s.status + '">' + s.status + sub + '</td>' +
      '<td>' + s.progress + '%</td>' +
      '<td>' + (s.city_count ?? '') + '</td>' +
      '<td>' + (s.startup_time ?? '') + '</td>' +
      '<td>' + (s.mem_usage ?? '') + '</td>' +
      '<td>' +
      '<button onclick="cmd(\'start\', {code: \'' + s.country_code + '\'})">start</button>' +
      '<button onclick="cmd(\'stop\', {code: \'' + s.country_code + '\'})">stop</button>' +
      '<button onclick="cmd(\'reset\', {code: \'' + s.country_code + '\'})">reset</button>' +
      '</td></tr>';
  });
  document.querySelector('#fleet tbody').innerHTML = rows.join('');
}
refresh();
setInterval(refresh, 2000);
</script>
</body>
</html>
"#;
