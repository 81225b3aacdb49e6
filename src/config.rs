use crate::aggregation::zones::{Zone, ZoneError, ZoneRect, ZoneTable};
use crate::aggregation::{
    AggregationSettings, DEFAULT_AREA_UNIT, DEFAULT_GRID_SIZE, MAX_GRID_SIZE,
};
use crate::detection::FrameSize;
use crate::publish::http::DEFAULT_TIMEOUT;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_PUBLISH_INTERVAL_SECS: f64 = 5.0;
pub const STDIN_SOURCE: &str = "-";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    pub frame: FrameSection,
    #[serde(default)]
    pub grid: Option<GridSection>,
    #[serde(default)]
    pub publish: Option<PublishSection>,
    #[serde(default)]
    pub source: Option<SourceSection>,
    #[serde(default)]
    pub server: Option<ServerSection>,
    /// Classification order is the order of appearance.
    #[serde(default)]
    pub zones: Vec<ZoneSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FrameSection {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GridSection {
    /// Cells per axis (default: 20)
    pub size: Option<usize>,
    /// Square pixels per density unit (default: 10000)
    pub area_unit: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublishSection {
    /// Consumer URL; snapshots are only logged when absent
    pub endpoint: Option<String>,
    /// Minimum seconds between publishes (default: 5)
    pub interval_secs: Option<f64>,
    /// Per-request timeout in seconds (default: 2)
    pub timeout_secs: Option<f64>,
    /// Publish on the first frame instead of one interval after start
    #[serde(default)]
    pub publish_on_start: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceSection {
    /// JSON-lines tracker feed, "-" for stdin (default)
    pub path: Option<PathBuf>,
    /// Detections below this confidence are ignored (default: 0)
    pub min_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8080)
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ZoneSection {
    pub id: String,
    pub name: Option<String>,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub capacity: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid zone: {0}")]
    Zone(#[from] ZoneError),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Reject anything the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame.width == 0 || self.frame.height == 0 {
            return Err(ConfigError::Invalid(
                "frame width and height must be positive".to_string(),
            ));
        }
        let grid_size = self.grid_size();
        if !(1..=MAX_GRID_SIZE).contains(&grid_size) {
            return Err(ConfigError::Invalid(format!(
                "grid size must be within [1, {MAX_GRID_SIZE}], got {grid_size}"
            )));
        }
        require_positive("grid area_unit", self.area_unit())?;
        require_positive("publish interval_secs", self.publish_interval_secs())?;
        require_positive("publish timeout_secs", self.publish_timeout_secs())?;

        let min_confidence = self.min_confidence();
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(ConfigError::Invalid(format!(
                "source min_confidence must be within [0, 1], got {min_confidence}"
            )));
        }

        self.zone_table()?;
        Ok(())
    }

    pub fn frame_size(&self) -> FrameSize {
        FrameSize {
            width: self.frame.width,
            height: self.frame.height,
        }
    }

    /// Returns the grid resolution per axis (default: 20)
    pub fn grid_size(&self) -> usize {
        self.grid
            .as_ref()
            .and_then(|g| g.size)
            .unwrap_or(DEFAULT_GRID_SIZE)
    }

    pub fn area_unit(&self) -> f64 {
        self.grid
            .as_ref()
            .and_then(|g| g.area_unit)
            .unwrap_or(DEFAULT_AREA_UNIT)
    }

    pub fn aggregation_settings(&self) -> AggregationSettings {
        AggregationSettings {
            frame: self.frame_size(),
            grid_size: self.grid_size(),
            area_unit: self.area_unit(),
        }
    }

    pub fn zone_table(&self) -> Result<ZoneTable, ConfigError> {
        let zones = self
            .zones
            .iter()
            .map(|section| {
                let zone = Zone::new(
                    section.id.clone(),
                    ZoneRect {
                        x1: section.x1,
                        y1: section.y1,
                        x2: section.x2,
                        y2: section.y2,
                    },
                    section.capacity,
                );
                match &section.name {
                    Some(name) if !name.trim().is_empty() => zone.with_display_name(name.clone()),
                    _ => zone,
                }
            })
            .collect();
        Ok(ZoneTable::new(zones)?)
    }

    /// Returns the consumer endpoint, treating an empty string as missing.
    pub fn publish_endpoint(&self) -> Option<&str> {
        let endpoint = self.publish.as_ref()?.endpoint.as_deref()?;
        if endpoint.trim().is_empty() {
            None
        } else {
            Some(endpoint)
        }
    }

    fn publish_interval_secs(&self) -> f64 {
        self.publish
            .as_ref()
            .and_then(|p| p.interval_secs)
            .unwrap_or(DEFAULT_PUBLISH_INTERVAL_SECS)
    }

    fn publish_timeout_secs(&self) -> f64 {
        self.publish
            .as_ref()
            .and_then(|p| p.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT.as_secs_f64())
    }

    /// Returns the publish interval as Duration (default: 5 seconds)
    pub fn publish_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.publish_interval_secs())
            .unwrap_or(Duration::from_secs(DEFAULT_PUBLISH_INTERVAL_SECS as u64))
    }

    /// Returns the sink request timeout (default: 2 seconds)
    pub fn publish_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.publish_timeout_secs()).unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn publish_on_start(&self) -> bool {
        self.publish.as_ref().is_some_and(|p| p.publish_on_start)
    }

    /// Returns the tracker feed path, or `None` for stdin.
    pub fn source_path(&self) -> Option<&Path> {
        let path = self.source.as_ref()?.path.as_deref()?;
        if path.as_os_str().is_empty() || path == Path::new(STDIN_SOURCE) {
            None
        } else {
            Some(path)
        }
    }

    pub fn min_confidence(&self) -> f32 {
        self.source
            .as_ref()
            .and_then(|s| s.min_confidence)
            .unwrap_or(0.0)
    }

    /// Returns the server port (default: 8080)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }
}

fn require_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be a positive number, got {value}"
        )))
    }
}
