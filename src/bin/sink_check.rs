//! Publishes one synthetic snapshot to the configured consumer and reports
//! the acknowledgement. Pass an endpoint as the first argument to override
//! the one in `config/config.toml`.

use std::process::ExitCode;
use std::time::SystemTime;
use zone_heatmap::aggregation::snapshot::aggregate_frame;
use zone_heatmap::aggregation::zones::{Zone, ZoneError, ZoneRect, ZoneTable};
use zone_heatmap::config;
use zone_heatmap::detection::{BoundingBox, Detection};
use zone_heatmap::publish::SnapshotSink;
use zone_heatmap::publish::http::HttpSink;

fn sample_zones(width: f64, height: f64) -> Result<ZoneTable, ZoneError> {
    ZoneTable::new(vec![
        Zone::new(
            "entrance",
            ZoneRect {
                x1: 0.0,
                y1: 0.0,
                x2: width / 2.0,
                y2: height,
            },
            10,
        ),
        Zone::new(
            "exit",
            ZoneRect {
                x1: width / 2.0,
                y1: 0.0,
                x2: width,
                y2: height,
            },
            10,
        ),
    ])
}

fn sample_detections(width: f64, height: f64) -> Vec<Detection> {
    [(0.25, 0.5), (0.3, 0.4), (0.75, 0.6)]
        .iter()
        .zip(1..)
        .map(|(&(fx, fy), track_id)| {
            let (cx, cy) = (width * fx, height * fy);
            Detection::new(
                track_id,
                BoundingBox::new(cx - 20.0, cy - 50.0, cx + 20.0, cy + 50.0),
                0.9,
            )
        })
        .collect()
}

fn main() -> ExitCode {
    let subscriber = tracing_subscriber::fmt().with_target(false).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let config = match config::load_default() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "Failed to load config");
            return ExitCode::FAILURE;
        }
    };

    let endpoint = match std::env::args()
        .nth(1)
        .or_else(|| config.publish_endpoint().map(str::to_string))
    {
        Some(endpoint) => endpoint,
        None => {
            tracing::error!("No endpoint given and none configured in [publish]");
            return ExitCode::FAILURE;
        }
    };

    let sink = match HttpSink::new(endpoint, config.publish_timeout()) {
        Ok(sink) => sink,
        Err(err) => {
            tracing::error!(error = %err, "Invalid endpoint");
            return ExitCode::FAILURE;
        }
    };

    let frame = config.frame_size();
    let (width, height) = (f64::from(frame.width), f64::from(frame.height));
    let zones = match sample_zones(width, height) {
        Ok(zones) => zones,
        Err(err) => {
            tracing::error!(error = %err, "Failed to build sample zones");
            return ExitCode::FAILURE;
        }
    };
    let detections = sample_detections(width, height);
    let (_grid, snapshot) = aggregate_frame(
        &detections,
        &zones,
        &config.aggregation_settings(),
        SystemTime::now(),
    );

    match sink.publish(&snapshot) {
        Ok(ack) => {
            tracing::info!(
                endpoint = sink.endpoint(),
                status = ack.status,
                alerts_triggered = ?ack.alerts_triggered,
                "Sink accepted snapshot"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(endpoint = sink.endpoint(), error = %err, "Sink check failed");
            ExitCode::FAILURE
        }
    }
}
