use crate::effect::EventSurface;
use crate::engine::{HttpBackend, WsConnector};
use crate::model::{ParameterTable, SyncConfig, SyncEvent};
use crate::orchestrator::{self, spawn_supervisor, SupervisorParts, SyncHandle};
use crate::storage;
use crate::text_summary::{build_text_summary, SessionTally};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::macros::format_description;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "moodlight",
    version,
    about = "Keep a lighting surface in sync with a live emotion detector"
)]
pub struct Cli {
    /// Base URL of the detection backend
    #[arg(long, default_value = "http://localhost:8000")]
    pub base_url: String,

    /// Push channel URL (defaults to the backend's /ws/emotions)
    #[arg(long)]
    pub ws_url: Option<String>,

    /// Status polling interval
    #[arg(long, default_value = "500ms")]
    pub poll_interval: humantime::Duration,

    /// Report the push channel as not open after this long
    #[arg(long, default_value = "2s")]
    pub fallback_after: humantime::Duration,

    /// Timeout for individual HTTP requests
    #[arg(long, default_value = "2s")]
    pub request_timeout: humantime::Duration,

    /// Mapping table file (JSON keyed by emotion)
    #[arg(long)]
    pub mappings: Option<PathBuf>,

    /// Stream updates as text until Ctrl-C (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Stream events as JSON lines until Ctrl-C (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Start detection as soon as the TUI launches
    #[arg(long)]
    pub start: bool,

    /// Log at info level
    #[arg(short, long)]
    pub verbose: bool,

    /// Log at debug level
    #[arg(long)]
    pub debug: bool,

    /// Write logs to this file (the only log sink in TUI mode)
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    fn uses_tui(&self) -> bool {
        cfg!(feature = "tui") && !self.text && !self.json
    }

    /// Explicit `--mappings`, else the per-user default location.
    pub fn mappings_path(&self) -> Option<PathBuf> {
        self.mappings.clone().or_else(storage::default_mappings_path)
    }
}

/// Install the tracing subscriber.
///
/// Filter precedence: `--debug` > `--verbose` > `RUST_LOG` > `warn`. HTTP and WebSocket
/// internals stay at warn. The TUI owns the terminal, so there logs only go to `--log-file`.
pub fn init_tracing(args: &Cli) -> Result<()> {
    const QUIET: &str = "hyper=warn,h2=warn,reqwest=warn,rustls=warn,tungstenite=warn,tokio_tungstenite=warn";
    let filter = if args.debug {
        EnvFilter::new(format!("debug,{QUIET}"))
    } else if args.verbose {
        EnvFilter::new(format!("info,{QUIET}"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    if let Some(path) = args.log_file.as_deref() {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else if !args.uses_tui() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

pub async fn run(args: Cli) -> Result<()> {
    if args.text && args.json {
        return Err(anyhow::anyhow!("--text and --json are mutually exclusive"));
    }

    if args.uses_tui() {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await;
        }
    }

    run_text(args).await
}

/// Build a `SyncConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> SyncConfig {
    SyncConfig {
        base_url: args.base_url.clone(),
        ws_url: args
            .ws_url
            .clone()
            .unwrap_or_else(|| SyncConfig::ws_url_for(&args.base_url)),
        poll_interval: Duration::from(args.poll_interval),
        fallback_after: Duration::from(args.fallback_after),
        request_timeout: Duration::from(args.request_timeout),
        user_agent: format!("moodlight-sync/{}", env!("CARGO_PKG_VERSION")),
    }
}

/// Wire the HTTP backend, WebSocket connector and an event-forwarding surface into a
/// running supervisor.
pub(crate) fn start_session(
    cfg: &SyncConfig,
    table: ParameterTable,
    event_tx: mpsc::UnboundedSender<SyncEvent>,
) -> Result<(SyncHandle, JoinHandle<()>)> {
    let backend = Arc::new(HttpBackend::new(cfg)?);
    let connector = Arc::new(WsConnector::new(cfg.ws_url.clone()));
    Ok(spawn_supervisor(
        cfg,
        SupervisorParts {
            backend,
            connector,
            effector: Box::new(EventSurface::new(event_tx.clone())),
            table,
            events: event_tx,
        },
    ))
}

fn timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_default()
}

/// Render one event for text mode; `None` for events that only feed the summary.
fn format_event(ev: &SyncEvent) -> Option<OutputLine> {
    let line = match ev {
        SyncEvent::ChannelState { state } => {
            OutputLine::Stderr(format!("[{}] push: {}", timestamp(), state.badge()))
        }
        SyncEvent::Accepted {
            origin,
            label,
            confidence,
        } => OutputLine::Stdout(format!(
            "[{}] {:<9} {:>5.1}%  ({origin:?})",
            timestamp(),
            label.as_str(),
            confidence.value()
        )),
        SyncEvent::Applied { fill } => OutputLine::Stdout(format!(
            "           surface -> {} over {:.1}s",
            fill.css(),
            fill.transition.as_secs_f64()
        )),
        SyncEvent::MappingMissing { label } => {
            OutputLine::Stderr(format!("[{}] no mapping for {label}", timestamp()))
        }
        SyncEvent::MappingUpdated { label, params } => OutputLine::Stderr(format!(
            "[{}] mapping {label}: {} {}% {:.1}s",
            timestamp(),
            params.color,
            params.brightness,
            params.transition_seconds
        )),
        SyncEvent::Reset => OutputLine::Stderr(format!("[{}] surface reset", timestamp())),
        SyncEvent::Info { message } => OutputLine::Stderr(format!("[{}] {message}", timestamp())),
        SyncEvent::Rejected { .. } => return None,
    };
    Some(line)
}

async fn run_text(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let table = storage::load_table_or_default(args.mappings_path().as_deref())?;
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<SyncEvent>();
    let (handle, task) = start_session(&cfg, table, evt_tx)?;

    let emit = |ev: &SyncEvent| {
        let line = if args.json {
            serde_json::to_string(ev).ok().map(OutputLine::Stdout)
        } else {
            format_event(ev)
        };
        if let Some(line) = line {
            let _ = out_tx.send(line);
        }
    };

    if let Err(e) = handle.set_enabled(true).await {
        handle.shutdown();
        return Err(e).context("could not start detection; is the backend running?");
    }

    let mut tally = SessionTally::default();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            ev = evt_rx.recv() => match ev {
                Some(ev) => {
                    tally.record(&ev);
                    emit(&ev);
                }
                None => break,
            },
        }
    }

    orchestrator::shutdown(&handle).await;
    drop(handle);
    // The supervisor drops its senders once teardown completes.
    while let Some(ev) = evt_rx.recv().await {
        tally.record(&ev);
        emit(&ev);
    }
    let _ = task.await;

    if !args.json {
        for line in build_text_summary(&tally).lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}
