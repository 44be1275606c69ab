// Fieldpatch Bridge - Service shell for the telemetry pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Fieldpatch Bridge
//!
//! Runs the ingress flusher and the case engine on dedicated threads,
//! accepts device updates over HTTP and exposes Prometheus metrics.
//!
//! ## Usage
//!
//! ```bash
//! # Hold case on D100, patching a REST table
//! SINK_URL=https://api.example.com/rest/v1/lines?id=eq.1 \
//! SINK_API_KEY=... TRIGGER_DEVICE=d100,hold fieldpatch-bridge
//!
//! # Upsert with write-back of the response status fields
//! fieldpatch-bridge --insert-mode upsert --sink-method POST \
//!     --write-back-upsert-devices D,10,1,1,D,11,1,1,M,12,1,1
//! ```

mod error;
mod metrics;
mod sink;
mod writer;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use error::BridgeError;
use fieldpatch::ingress::IngressSnapshot;
use fieldpatch::{
    CaseSettings, Engine, EngineConfig, EngineSnapshot, EngineStats, IngressBuffer,
    IngressConfig, IngressError, Message, SinkMode, Value, WriteBackConfig,
};
use metrics::encode_metrics;
use serde::Serialize;
use sink::HttpSink;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;
use writer::LoggingDeviceWriter;

/// Fieldpatch telemetry bridge
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "9100")]
    port: u16,

    /// REST endpoint receiving documents
    #[arg(long, env = "SINK_URL")]
    sink_url: String,

    /// Key sent as `apikey` and bearer token
    #[arg(long, env = "SINK_API_KEY", default_value = "")]
    sink_api_key: String,

    /// Request verb; also namespaces the session
    #[arg(long, env = "SINK_METHOD", default_value = "PATCH")]
    sink_method: String,

    /// Sink mode (patch or upsert)
    #[arg(long, env = "INSERT_MODE", default_value = "patch")]
    insert_mode: String,

    /// Trigger configuration, e.g. `d100,hold,d200,weight`
    #[arg(long, env = "TRIGGER_DEVICE", default_value = "")]
    trigger: String,

    /// Accumulation window of the blocking cases, in seconds
    #[arg(long, env = "LOOP_SECONDS", default_value = "1")]
    loop_seconds: f64,

    /// Re-poll period inside an accumulation window, in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "1000")]
    poll_interval_ms: u64,

    /// Device that must be nonzero for the trigger case to send
    #[arg(long, env = "FILTER_DEVICE", default_value = "d174")]
    filter_device: String,

    /// Write-back target after each successful send
    #[arg(long, env = "WRITE_BACK_DEVICE")]
    write_back_device: Option<String>,

    /// Document field written back instead of the constant value
    #[arg(long, env = "WRITE_BACK_FIELD")]
    write_back_field: Option<String>,

    /// Constant written back after each successful send
    #[arg(long, env = "WRITE_BACK_VALUE")]
    write_back_value: Option<String>,

    /// Devices receiving the upsert response fields
    #[arg(long, env = "WRITE_BACK_UPSERT_DEVICES")]
    write_back_upsert_devices: Option<String>,

    /// Response fields zipped against the upsert devices
    #[arg(
        long,
        env = "UPSERT_RESPONSE_FIELDS",
        value_delimiter = ',',
        default_value = "y_status,x_status,vacuum_status"
    )]
    upsert_response_fields: Vec<String>,

    /// Queue length that triggers an early flush
    #[arg(long, env = "MIN_FLUSH_SIZE", default_value = "100")]
    min_flush_size: usize,

    /// Maximum time between flushes, in milliseconds
    #[arg(long, env = "FLUSH_INTERVAL_MS", default_value = "1000")]
    flush_interval_ms: u64,

    /// Batches queued for the engine before new ones are dropped
    #[arg(long, env = "QUEUE_CAPACITY", default_value = "16")]
    queue_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn engine_config(&self) -> Result<EngineConfig, BridgeError> {
        let config = EngineConfig {
            method: self.sink_method.trim().to_uppercase(),
            trigger: self.trigger.clone(),
            loop_seconds: self.loop_seconds,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            filter_key: self.filter_device.trim().to_lowercase(),
            mode: self.insert_mode.parse()?,
            write_back: WriteBackConfig {
                device: self.write_back_device.clone(),
                field: self.write_back_field.clone(),
                value: self.write_back_value.as_deref().map(parse_value),
                upsert_devices: self.write_back_upsert_devices.clone(),
                response_fields: self.upsert_response_fields.clone(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn ingress_config(&self) -> IngressConfig {
        IngressConfig {
            min_flush_size: self.min_flush_size,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            output_capacity: self.queue_capacity,
            ..Default::default()
        }
    }
}

/// Numbers stay numeric, anything else is written as text
fn parse_value(raw: &str) -> Value {
    match raw.trim().parse::<f64>() {
        Ok(n) => Value::Number(n),
        Err(_) => Value::Text(raw.to_string()),
    }
}

/// Application state shared across handlers.
struct AppState {
    ingress: Arc<IngressBuffer>,
    stats: Arc<EngineStats>,
    engine_running: Arc<AtomicBool>,
    triggers: usize,
    mode: SinkMode,
    start_time: Instant,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Fieldpatch Bridge v{}", env!("CARGO_PKG_VERSION"));

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Start the workers, serve HTTP until a signal or an engine failure,
/// then shut down in order: ingress, final flush, engine.
fn run(args: Args) -> Result<(), BridgeError> {
    let config = args.engine_config()?;
    let settings = CaseSettings::from_env();
    let mode = config.mode;

    // The blocking client is built and dropped off the async runtime
    let sink = HttpSink::new(&args.sink_url, &config.method, &args.sink_api_key)?;
    info!("Sink: {} {} ({})", sink.method(), args.sink_url, mode);

    let engine = Engine::new(config, settings, Arc::new(sink))
        .with_writer(Arc::new(LoggingDeviceWriter::new()));
    let stats = engine.stats();
    let triggers = engine.triggers().len();

    let (buffer, batches) = IngressBuffer::new(args.ingress_config());
    let ingress = Arc::new(buffer);
    let ingress_stop = Arc::new(AtomicBool::new(false));
    let engine_stop = Arc::new(AtomicBool::new(false));
    let engine_running = Arc::new(AtomicBool::new(true));
    let (engine_done, engine_done_rx) = oneshot::channel();

    let flusher = {
        let ingress = Arc::clone(&ingress);
        let stop = Arc::clone(&ingress_stop);
        thread::Builder::new()
            .name("ingress".to_string())
            .spawn(move || ingress.run(&stop))?
    };

    let engine_thread = {
        let stop = Arc::clone(&engine_stop);
        let running = Arc::clone(&engine_running);
        thread::Builder::new()
            .name("engine".to_string())
            .spawn(move || {
                let result = engine.run(&batches, &stop);
                running.store(false, Ordering::SeqCst);
                let _ = engine_done.send(());
                result
            })?
    };

    let state = Arc::new(AppState {
        ingress: Arc::clone(&ingress),
        stats,
        engine_running,
        triggers,
        mode,
        start_time: Instant::now(),
    });

    let runtime = tokio::runtime::Runtime::new()?;
    let served = runtime.block_on(serve(args.port, state, engine_done_rx));

    info!("Shutting down");
    ingress_stop.store(true, Ordering::SeqCst);
    flusher
        .join()
        .map_err(|_| BridgeError::ThreadPanicked("ingress"))?;
    engine_stop.store(true, Ordering::SeqCst);
    let engine_result = engine_thread
        .join()
        .map_err(|_| BridgeError::ThreadPanicked("engine"))?;

    served?;
    engine_result?;
    info!("Bridge stopped");
    Ok(())
}

async fn serve(
    port: u16,
    state: Arc<AppState>,
    engine_done: oneshot::Receiver<()>,
) -> Result<(), BridgeError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting server on http://{}", addr);
    info!("Metrics endpoint: http://{}/metrics", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(engine_done))
        .await?;
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ingest", post(ingest_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

/// Resolves on Ctrl-C, SIGTERM or when the engine thread ends.
async fn shutdown_signal(engine_done: oneshot::Receiver<()>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Shutdown signal received"),
        _ = terminate => info!("Terminate signal received"),
        _ = engine_done => warn!("Engine stopped, shutting down"),
    }
}

/// Parse one `{address, value}` object or an array of them.
fn parse_ingest(body: &[u8]) -> Result<Vec<Message>, serde_json::Error> {
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Payload {
        Many(Vec<Message>),
        One(Message),
    }

    Ok(match serde_json::from_slice(body)? {
        Payload::Many(messages) => messages,
        Payload::One(message) => vec![message],
    })
}

/// Ingest response.
#[derive(Serialize)]
struct IngestResponse {
    accepted: usize,
}

/// Ingest handler - queues device updates for the next batch.
async fn ingest_handler(State(state): State<Arc<AppState>>, body: Bytes) -> impl IntoResponse {
    let messages = match parse_ingest(&body) {
        Ok(messages) => messages,
        Err(e) => {
            warn!("Rejected malformed ingest payload: {}", e);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let mut accepted = 0;
    for message in messages {
        match state.ingress.enqueue(message) {
            Ok(()) => accepted += 1,
            Err(IngressError::Closed) => {
                return (StatusCode::SERVICE_UNAVAILABLE, "Ingress closed").into_response();
            }
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        }
    }
    (StatusCode::ACCEPTED, Json(IngestResponse { accepted })).into_response()
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    metrics::update_engine_metrics(&state.stats.snapshot());
    metrics::update_ingress_metrics(&state.ingress.snapshot());
    metrics::update_engine_running(state.engine_running.load(Ordering::SeqCst));

    let metrics = encode_metrics();
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler.
async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.engine_running.load(Ordering::SeqCst) {
        (StatusCode::OK, "Ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Engine stopped")
    }
}

/// Status information response.
#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_secs: u64,
    mode: String,
    triggers: usize,
    engine_running: bool,
    engine: EngineSnapshot,
    ingress: IngressSnapshot,
}

/// Status handler - returns JSON status information.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        mode: state.mode.to_string(),
        triggers: state.triggers,
        engine_running: state.engine_running.load(Ordering::SeqCst),
        engine: state.stats.snapshot(),
        ingress: state.ingress.snapshot(),
    })
}
