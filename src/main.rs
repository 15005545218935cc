use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use clap::{Parser, Subcommand};
use reqwest::blocking::Client;
use tab_auto_refresh::host::{HostEvent, TabCommand, TabId, TabStatus};
use tab_auto_refresh::prefs::{IntervalUnit, PrefsStore, RefreshMode, RefreshPrefs};
use tab_auto_refresh::scheduler::Scheduler;
use tab_auto_refresh::tabs::TabTracker;
use tokio::{net::TcpListener, sync::mpsc};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "127.0.0.1:8377";

#[derive(Parser, Debug)]
#[command(author, version, about = "Per-tab automatic page refresh scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler and its HTTP command channel (default command)
    Serve {
        /// Listen address; falls back to REFRESH_ADDR, then 127.0.0.1:8377
        #[arg(long)]
        addr: Option<String>,
    },
    /// Arm the reload cycle for a tab on a running scheduler
    Start {
        #[arg(long)]
        tab: TabId,
        #[arg(long)]
        addr: Option<String>,
    },
    /// Disarm the reload cycle for a tab on a running scheduler
    Stop {
        #[arg(long)]
        tab: TabId,
        #[arg(long)]
        addr: Option<String>,
    },
    /// Query the live schedule state of a tab
    Status {
        #[arg(long)]
        tab: TabId,
        #[arg(long)]
        addr: Option<String>,
    },
    /// Print every tracked tab's preferences
    Show,
    /// Edit one tab's preferences, tracking the tab if needed
    Set {
        #[arg(long)]
        tab: TabId,
        /// Interval unit: seconds, minutes or hours
        #[arg(long)]
        unit: Option<String>,
        /// Delay mode: fixed or random
        #[arg(long)]
        mode: Option<String>,
        /// Fixed delay magnitude, in the interval unit
        #[arg(long)]
        fixed: Option<f64>,
        #[arg(long)]
        random_min: Option<u64>,
        #[arg(long)]
        random_max: Option<u64>,
    },
    /// Delete the preference file
    Reset,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve { addr: None }) {
        Command::Serve { addr } => run_serve(addr),
        Command::Start { tab, addr } => send_command("start", tab, addr),
        Command::Stop { tab, addr } => send_command("stop", tab, addr),
        Command::Status { tab, addr } => show_status(tab, addr),
        Command::Show => show_prefs(),
        Command::Set {
            tab,
            unit,
            mode,
            fixed,
            random_min,
            random_max,
        } => set_prefs(tab, unit, mode, fixed, random_min, random_max),
        Command::Reset => reset_prefs(),
    }
}

fn resolve_addr(addr: Option<String>) -> Result<SocketAddr> {
    let raw = addr
        .or_else(|| env::var("REFRESH_ADDR").ok())
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());
    raw.parse()
        .with_context(|| format!("Invalid scheduler address {raw}"))
}

fn run_serve(addr: Option<String>) -> Result<()> {
    let addr = resolve_addr(addr)?;
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(serve(addr))
}

struct AppState {
    store: Arc<PrefsStore>,
    scheduler: Arc<Scheduler>,
    tracker: TabTracker,
}

type SharedState = Arc<AppState>;

type AppResult<T> = Result<T, (StatusCode, String)>;

async fn serve(addr: SocketAddr) -> Result<()> {
    let store = Arc::new(PrefsStore::new()?);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let scheduler = Arc::new(Scheduler::new(store.clone(), events_tx));
    let tracker = TabTracker::new(store.clone(), scheduler.clone());
    tokio::spawn(apply_host_events(events_rx));

    let state = Arc::new(AppState {
        store: store.clone(),
        scheduler,
        tracker,
    });
    let app = Router::new()
        .route("/start", post(start_handler))
        .route("/stop", post(stop_handler))
        .route("/status/:tab_id", get(status_handler))
        .route("/tabs", post(tab_created_handler))
        .route("/tabs/:tab_id", delete(tab_removed_handler))
        .with_state(state);

    println!(
        "Refresh scheduler listening on http://{addr} (preferences: {})",
        store.path().display()
    );

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Refresh scheduler crashed")?;

    Ok(())
}

/// Stand-in for the browser side of the host boundary: reload and badge
/// effects end up as log lines instead of tab navigations.
async fn apply_host_events(mut events: mpsc::UnboundedReceiver<HostEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            HostEvent::Reload { tab_id } => info!(tab_id, "reloading tab"),
            HostEvent::BadgeText { tab_id, text } => debug!(tab_id, text, "badge updated"),
        }
    }
}

async fn start_handler(
    State(state): State<SharedState>,
    Json(command): Json<TabCommand>,
) -> AppResult<impl IntoResponse> {
    state.scheduler.start(command.tab_id).map_err(bad_request)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stop_handler(
    State(state): State<SharedState>,
    Json(command): Json<TabCommand>,
) -> AppResult<impl IntoResponse> {
    state.scheduler.stop(command.tab_id).map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn status_handler(
    State(state): State<SharedState>,
    Path(tab_id): Path<TabId>,
) -> AppResult<impl IntoResponse> {
    let record = state.store.get(tab_id).map_err(internal_error)?;
    if record.is_none() {
        return Err((StatusCode::NOT_FOUND, format!("No record for tab {tab_id}")));
    }
    Ok(Json(TabStatus {
        tab_id,
        running: state.scheduler.is_armed(tab_id),
        delay_ms: state.scheduler.armed_delay_ms(tab_id),
    }))
}

async fn tab_created_handler(
    State(state): State<SharedState>,
    Json(command): Json<TabCommand>,
) -> AppResult<impl IntoResponse> {
    state
        .tracker
        .tab_created(command.tab_id)
        .map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn tab_removed_handler(
    State(state): State<SharedState>,
    Path(tab_id): Path<TabId>,
) -> AppResult<impl IntoResponse> {
    state.tracker.tab_removed(tab_id).map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

fn bad_request(err: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, err.to_string())
}

fn internal_error(err: anyhow::Error) -> (StatusCode, String) {
    tracing::error!("scheduler error: {err:?}");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")
}

fn send_command(action: &str, tab: TabId, addr: Option<String>) -> Result<()> {
    let base = resolve_addr(addr)?;
    let response = http_client()?
        .post(format!("http://{base}/{action}"))
        .json(&TabCommand { tab_id: tab })
        .send()
        .context("Failed to reach the refresh scheduler")?;
    if !response.status().is_success() {
        bail!("{action} for tab {tab} failed with status {}", response.status());
    }
    println!("Sent {action} for tab {tab}.");
    Ok(())
}

fn show_status(tab: TabId, addr: Option<String>) -> Result<()> {
    let base = resolve_addr(addr)?;
    let status: TabStatus = http_client()?
        .get(format!("http://{base}/status/{tab}"))
        .send()
        .context("Failed to reach the refresh scheduler")?
        .error_for_status()
        .context("Refresh scheduler returned an error status")?
        .json()
        .context("Failed to parse status response")?;
    match status.delay_ms {
        Some(delay_ms) => println!("Tab {}: running, cycle delay {delay_ms} ms", status.tab_id),
        None => println!("Tab {}: idle", status.tab_id),
    }
    Ok(())
}

fn show_prefs() -> Result<()> {
    let store = PrefsStore::new()?;
    let records = store.read_all()?;
    if records.is_empty() {
        println!("No tabs tracked yet.");
        return Ok(());
    }
    for record in &records {
        println!(" - {}", describe(record));
    }
    Ok(())
}

fn describe(record: &RefreshPrefs) -> String {
    let unit = match record.interval_unit {
        IntervalUnit::Seconds => "seconds",
        IntervalUnit::Minutes => "minutes",
        IntervalUnit::Hours => "hours",
    };
    let delay = match record.mode {
        RefreshMode::Fixed => format!("every {} {unit}", record.fixed_value),
        RefreshMode::Random => {
            format!("random {}..={} {unit}", record.random_min, record.random_max)
        }
    };
    let state = match record.initiated_at {
        Some(since) if record.running => {
            format!("running since {}", since.format("%Y-%m-%d %H:%M:%S"))
        }
        _ => "idle".to_string(),
    };
    format!("tab {} | {delay} | {state}", record.tab_id)
}

fn set_prefs(
    tab: TabId,
    unit: Option<String>,
    mode: Option<String>,
    fixed: Option<f64>,
    random_min: Option<u64>,
    random_max: Option<u64>,
) -> Result<()> {
    let unit = unit.as_deref().map(parse_unit).transpose()?;
    let mode = mode.as_deref().map(parse_mode).transpose()?;
    if let Some(value) = fixed {
        if value <= 0.0 {
            bail!("Fixed delay must be positive, got {value}");
        }
    }

    let store = PrefsStore::new()?;
    store.insert_default(tab)?;
    store.patch(tab, |record| {
        if let Some(unit) = unit {
            record.interval_unit = unit;
        }
        if let Some(mode) = mode {
            record.mode = mode;
        }
        if let Some(value) = fixed {
            record.fixed_value = value;
        }
        if let Some(value) = random_min {
            record.random_min = value;
        }
        if let Some(value) = random_max {
            record.random_max = value;
        }
    })?;

    if let Some(record) = store.get(tab)? {
        println!("Updated {}", describe(&record));
    }
    Ok(())
}

fn parse_unit(raw: &str) -> Result<IntervalUnit> {
    match raw {
        "seconds" => Ok(IntervalUnit::Seconds),
        "minutes" => Ok(IntervalUnit::Minutes),
        "hours" => Ok(IntervalUnit::Hours),
        other => bail!("Unknown interval unit {other} (expected seconds, minutes or hours)"),
    }
}

fn parse_mode(raw: &str) -> Result<RefreshMode> {
    match raw {
        "fixed" => Ok(RefreshMode::Fixed),
        "random" => Ok(RefreshMode::Random),
        other => bail!("Unknown mode {other} (expected fixed or random)"),
    }
}

fn reset_prefs() -> Result<()> {
    let store = PrefsStore::new()?;
    store.clear()?;
    println!("Cleared tracked tab preferences.");
    Ok(())
}
