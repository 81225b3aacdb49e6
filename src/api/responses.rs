use crate::aggregation::alert::{AlertLevel, RushStatus};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HeatmapSuccessResponse {
    pub timestamp: String,
    pub overall_people_count: usize,
    pub unzoned_people_count: usize,
    pub overall_rush_status: RushStatus,
    pub zones: Vec<ZoneSummaryResponse>,
    pub frame_width: u32,
    pub frame_height: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ZoneSummaryResponse {
    pub zone_id: String,
    pub zone_name: String,
    pub people_count: usize,
    pub density: f64,
    pub alert_level: AlertLevel,
    pub heatmap_grid: Vec<Vec<f64>>,
    pub track_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ZoneDetailResponse {
    pub zone: ZoneSummaryResponse,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DisplayGridResponse {
    pub grid_size: usize,
    pub kernel_size: usize,
    pub grid: Vec<Vec<f64>>,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Ko,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PublishState {
    Delivered,
    Failed,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct LastPublishResponse {
    pub state: PublishState,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alerts_triggered: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthSuccessResponse {
    pub status: HealthStatus,
    pub frames_processed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_publish: Option<LastPublishResponse>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ApiErrorResponse {
    pub error_code: ApiErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    NoData,
    UnknownZone,
    InternalError,
}
