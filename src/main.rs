use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::Level;
use zone_heatmap::aggregation::{self, AggregationEngine};
use zone_heatmap::config::{self, Config};
use zone_heatmap::detection::DetectionSource;
use zone_heatmap::detection::jsonl::JsonLinesSource;
use zone_heatmap::publish::http::HttpSink;
use zone_heatmap::publish::memory::MemorySink;
use zone_heatmap::publish::{PublishScheduler, SnapshotSink};
use zone_heatmap::{api, monitor, state};

/// Snapshots kept in memory when no consumer endpoint is configured.
const DRY_RUN_RETAIN: usize = 16;

fn init_tracing(level: &str) {
    let parsed = level.parse::<Level>();
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(*parsed.as_ref().unwrap_or(&Level::INFO))
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
    if parsed.is_err() {
        tracing::warn!(level, "Unknown log level, falling back to info");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match config::load_default() {
        Ok(config) => config,
        Err(err) => {
            init_tracing("info");
            tracing::error!(
                config_path = config::DEFAULT_CONFIG_PATH,
                error = %err,
                "Failed to load config"
            );
            return Err(err.into());
        }
    };
    init_tracing(&config.logging.level);
    tracing::info!(
        config_path = config::DEFAULT_CONFIG_PATH,
        app = %config.app.name,
        "zone-heatmap starting"
    );

    let zones = config.zone_table()?;
    if zones.is_empty() {
        tracing::warn!("No zones configured, every detection will be unzoned");
    } else {
        tracing::info!(count = zones.len(), "Zones loaded");
    }

    let interval = config.publish_interval();
    let scheduler = if config.publish_on_start() {
        PublishScheduler::immediate(interval)
    } else {
        PublishScheduler::new(interval, Instant::now())
    };
    let sink = build_sink(&config)?;
    let engine = AggregationEngine::new(config.aggregation_settings(), zones, scheduler, sink);

    let source = open_source(&config)?;
    let state = Arc::new(RwLock::new(state::AppState::new()));
    {
        let guard = state
            .read()
            .map_err(|_| zone_heatmap::error::AppError::StateLock)?;
        tokio::spawn(monitor::watch_publish(guard.subscribe_publish()));
        tokio::spawn(monitor::watch_rush_status(guard.subscribe_snapshot()));
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    let _frame_handle = aggregation::spawn_frame_thread(
        source,
        engine,
        Arc::clone(&state),
        Arc::clone(&stop_flag),
    );

    let app = api::router(Arc::clone(&state));
    let port = config.server_port();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app).await?;

    // Signal frame thread to stop
    stop_flag.store(true, Ordering::Relaxed);

    Ok(())
}

fn build_sink(config: &Config) -> Result<Box<dyn SnapshotSink>, Box<dyn std::error::Error>> {
    match config.publish_endpoint() {
        Some(endpoint) => {
            let sink = HttpSink::new(endpoint.to_string(), config.publish_timeout())?;
            tracing::info!(
                endpoint,
                interval_ms = config.publish_interval().as_millis(),
                timeout_ms = config.publish_timeout().as_millis(),
                "Publishing snapshots over HTTP"
            );
            Ok(Box::new(sink))
        }
        None => {
            tracing::warn!("No publish endpoint configured, snapshots stay in memory");
            Ok(Box::new(MemorySink::bounded(DRY_RUN_RETAIN)))
        }
    }
}

fn open_source(
    config: &Config,
) -> Result<Box<dyn DetectionSource + Send>, Box<dyn std::error::Error>> {
    let min_confidence = config.min_confidence();
    match config.source_path() {
        Some(path) => {
            let file = File::open(path)?;
            tracing::info!(path = %path.display(), min_confidence, "Reading detections from file");
            Ok(Box::new(JsonLinesSource::new(
                BufReader::new(file),
                min_confidence,
            )))
        }
        None => {
            tracing::info!(min_confidence, "Reading detections from stdin");
            Ok(Box::new(JsonLinesSource::new(
                BufReader::new(std::io::stdin()),
                min_confidence,
            )))
        }
    }
}
