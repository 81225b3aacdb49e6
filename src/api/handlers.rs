use crate::aggregation::grid::DISPLAY_KERNEL_SIZE;
use crate::aggregation::snapshot::{ZoneSnapshot, format_timestamp, round_density};
use crate::api::responses::{
    ApiErrorCode, ApiErrorResponse, DisplayGridResponse, HealthStatus, HealthSuccessResponse,
    HeatmapSuccessResponse, LastPublishResponse, PublishState, ZoneDetailResponse,
    ZoneSummaryResponse,
};
use crate::state::{AppState, PublishRecord, PublishStatus};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tracing::error;

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";
const FALLBACK_TIMESTAMP: &str = "1970-01-01T00:00:00Z";

pub enum ApiResponse<T> {
    Success {
        status: StatusCode,
        body: T,
    },
    Error {
        status: StatusCode,
        body: ApiErrorResponse,
    },
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match self {
            ApiResponse::Success { status, body } => (status, Json(body)).into_response(),
            ApiResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

impl<T> ApiResponse<T> {
    fn ok(body: T) -> Self {
        ApiResponse::Success {
            status: StatusCode::OK,
            body,
        }
    }
}

pub type HeatmapResponse = ApiResponse<HeatmapSuccessResponse>;
pub type DisplayResponse = ApiResponse<DisplayGridResponse>;
pub type ZoneResponse = ApiResponse<ZoneDetailResponse>;
pub type HealthResponse = ApiResponse<HealthSuccessResponse>;

pub async fn get_heatmap(State(state): State<Arc<RwLock<AppState>>>) -> impl IntoResponse {
    build_heatmap_response(state, SystemTime::now())
}

pub async fn get_display_grid(State(state): State<Arc<RwLock<AppState>>>) -> impl IntoResponse {
    build_display_response(state, SystemTime::now())
}

pub async fn get_zone(
    State(state): State<Arc<RwLock<AppState>>>,
    Path(zone_id): Path<String>,
) -> impl IntoResponse {
    build_zone_response(state, &zone_id, SystemTime::now())
}

pub async fn get_health(State(state): State<Arc<RwLock<AppState>>>) -> impl IntoResponse {
    build_health_response(state, SystemTime::now())
}

fn build_heatmap_response(state: Arc<RwLock<AppState>>, now: SystemTime) -> HeatmapResponse {
    let guard = match state.read() {
        Ok(guard) => guard,
        Err(_) => {
            return internal_error("/api/heatmap", "state lock poisoned while reading snapshot");
        }
    };
    let snapshot = guard.snapshot().cloned();
    drop(guard);

    let Some(snapshot) = snapshot else {
        return no_data_response("No frame has been aggregated yet", now);
    };

    let timestamp = match format_timestamp(snapshot.timestamp) {
        Ok(formatted) => formatted,
        Err(_) => return internal_error("/api/heatmap", "timestamp formatting failure"),
    };

    ApiResponse::ok(HeatmapSuccessResponse {
        timestamp,
        overall_people_count: snapshot.overall_count,
        unzoned_people_count: snapshot.unzoned_count(),
        overall_rush_status: snapshot.rush_status(),
        zones: snapshot.zones.iter().map(zone_summary).collect(),
        frame_width: snapshot.frame.width,
        frame_height: snapshot.frame.height,
    })
}

fn build_display_response(state: Arc<RwLock<AppState>>, now: SystemTime) -> DisplayResponse {
    let guard = match state.read() {
        Ok(guard) => guard,
        Err(_) => {
            return internal_error(
                "/api/heatmap/display",
                "state lock poisoned while reading grid",
            );
        }
    };
    let grid = guard.grid().cloned();
    let captured_at = guard.snapshot().map(|snapshot| snapshot.timestamp);
    drop(guard);

    let Some(grid) = grid else {
        return no_data_response("No occupancy grid available", now);
    };

    let timestamp = match format_timestamp(captured_at.unwrap_or(now)) {
        Ok(formatted) => formatted,
        Err(_) => return internal_error("/api/heatmap/display", "timestamp formatting failure"),
    };

    ApiResponse::ok(DisplayGridResponse {
        grid_size: grid.size(),
        kernel_size: DISPLAY_KERNEL_SIZE,
        grid: grid.smoothed(DISPLAY_KERNEL_SIZE),
        timestamp,
    })
}

fn build_zone_response(
    state: Arc<RwLock<AppState>>,
    zone_id: &str,
    now: SystemTime,
) -> ZoneResponse {
    let guard = match state.read() {
        Ok(guard) => guard,
        Err(_) => {
            return internal_error("/api/zones", "state lock poisoned while reading snapshot");
        }
    };
    let found = guard.snapshot().map(|snapshot| {
        (
            snapshot.timestamp,
            snapshot.zone(zone_id).map(zone_summary),
        )
    });
    drop(guard);

    let (captured_at, zone) = match found {
        Some(found) => found,
        None => return no_data_response("No frame has been aggregated yet", now),
    };
    let Some(zone) = zone else {
        return error_response(
            StatusCode::NOT_FOUND,
            ApiErrorCode::UnknownZone,
            format!("No zone named {zone_id}"),
            now,
        );
    };

    match format_timestamp(captured_at) {
        Ok(timestamp) => ApiResponse::ok(ZoneDetailResponse { zone, timestamp }),
        Err(_) => internal_error("/api/zones", "timestamp formatting failure"),
    }
}

fn build_health_response(state: Arc<RwLock<AppState>>, now: SystemTime) -> HealthResponse {
    let guard = match state.read() {
        Ok(guard) => guard,
        Err(_) => {
            return internal_error("/api/health", "state lock poisoned while reading state");
        }
    };
    let has_snapshot = guard.snapshot().is_some();
    let frames_processed = guard.frames_processed();
    let last_publish = guard.last_publish().cloned();
    drop(guard);

    let status = derive_health_status(has_snapshot, last_publish.as_ref());

    let timestamp = match format_timestamp(now) {
        Ok(formatted) => formatted,
        Err(_) => return internal_error("/api/health", "timestamp formatting failure"),
    };
    let last_publish = match last_publish.map(last_publish_response).transpose() {
        Ok(last_publish) => last_publish,
        Err(_) => return internal_error("/api/health", "timestamp formatting failure"),
    };

    let status_code = match status {
        HealthStatus::Ko => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Ok | HealthStatus::Degraded => StatusCode::OK,
    };

    ApiResponse::Success {
        status: status_code,
        body: HealthSuccessResponse {
            status,
            frames_processed,
            last_publish,
            timestamp,
        },
    }
}

fn derive_health_status(has_snapshot: bool, last_publish: Option<&PublishRecord>) -> HealthStatus {
    if !has_snapshot {
        return HealthStatus::Ko;
    }
    match last_publish.map(|record| &record.status) {
        Some(PublishStatus::Failed { .. }) => HealthStatus::Degraded,
        Some(PublishStatus::Delivered { .. }) | None => HealthStatus::Ok,
    }
}

fn last_publish_response(
    record: PublishRecord,
) -> Result<LastPublishResponse, time::error::Format> {
    let timestamp = format_timestamp(record.at)?;
    Ok(match record.status {
        PublishStatus::Delivered { alerts_triggered } => LastPublishResponse {
            state: PublishState::Delivered,
            timestamp,
            alerts_triggered,
            reason: None,
        },
        PublishStatus::Failed { reason } => LastPublishResponse {
            state: PublishState::Failed,
            timestamp,
            alerts_triggered: None,
            reason: Some(reason),
        },
    })
}

fn zone_summary(zone: &ZoneSnapshot) -> ZoneSummaryResponse {
    ZoneSummaryResponse {
        zone_id: zone.zone_id.clone(),
        zone_name: zone.display_name.clone(),
        people_count: zone.people_count,
        density: round_density(zone.density),
        alert_level: zone.alert_level,
        heatmap_grid: zone.grid_slice.clone(),
        track_ids: zone
            .bounding_boxes
            .iter()
            .map(|tracked| tracked.track_id)
            .collect(),
    }
}

fn no_data_response<T>(message: &str, now: SystemTime) -> ApiResponse<T> {
    error_response(
        StatusCode::SERVICE_UNAVAILABLE,
        ApiErrorCode::NoData,
        message.to_string(),
        now,
    )
}

fn error_response<T>(
    status: StatusCode,
    error_code: ApiErrorCode,
    error_message: String,
    now: SystemTime,
) -> ApiResponse<T> {
    let timestamp = format_timestamp(now).unwrap_or_else(|err| {
        error!(error = %err, "Failed to format error timestamp");
        FALLBACK_TIMESTAMP.to_string()
    });
    ApiResponse::Error {
        status,
        body: ApiErrorResponse {
            error_code,
            error_message,
            timestamp,
        },
    }
}

fn internal_error<T>(route: &str, message: &str) -> ApiResponse<T> {
    error!(route, message, "Internal error while handling request");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ApiErrorCode::InternalError,
        INTERNAL_ERROR_MESSAGE.to_string(),
        SystemTime::now(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::alert::{AlertLevel, RushStatus};
    use crate::aggregation::grid::OccupancyGrid;
    use crate::aggregation::snapshot::{FrameSnapshot, TrackedBox};
    use crate::detection::{BoundingBox, FrameSize};
    use std::time::{Duration, UNIX_EPOCH};

    const FRAME: FrameSize = FrameSize {
        width: 100,
        height: 100,
    };

    fn zone(id: &str, people_count: usize, alert_level: AlertLevel) -> ZoneSnapshot {
        ZoneSnapshot {
            zone_id: id.to_string(),
            display_name: id.to_uppercase(),
            people_count,
            density: 1.0 / 3.0,
            alert_level,
            grid_slice: vec![vec![people_count as f64]],
            bounding_boxes: (0..people_count as i64)
                .map(|track_id| TrackedBox {
                    bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
                    track_id,
                })
                .collect(),
        }
    }

    fn populated_state() -> Arc<RwLock<AppState>> {
        let mut app_state = AppState::new();
        let mut grid = OccupancyGrid::new(2);
        grid.deposit(10.0, 10.0, FRAME);
        grid.deposit(90.0, 90.0, FRAME);
        grid.deposit(90.0, 90.0, FRAME);
        app_state.set_frame(
            FrameSnapshot {
                timestamp: UNIX_EPOCH + Duration::from_secs(1),
                overall_count: 4,
                zones: vec![
                    zone("entrance", 1, AlertLevel::Normal),
                    zone("darshan", 2, AlertLevel::High),
                ],
                frame: FRAME,
            },
            grid,
        );
        Arc::new(RwLock::new(app_state))
    }

    fn poisoned_state() -> Arc<RwLock<AppState>> {
        let state = Arc::new(RwLock::new(AppState::new()));
        let state_for_thread = Arc::clone(&state);
        let _ = std::thread::spawn(move || {
            let _guard = state_for_thread.write().expect("lock for poison");
            panic!("poison lock");
        })
        .join();
        state
    }

    #[test]
    fn heatmap_handler_returns_latest_snapshot() {
        let response = build_heatmap_response(populated_state(), UNIX_EPOCH);

        match response {
            ApiResponse::Success { status, body } => {
                assert_eq!(status, StatusCode::OK);
                assert_eq!(body.timestamp, "1970-01-01T00:00:01Z");
                assert_eq!(body.overall_people_count, 4);
                assert_eq!(body.unzoned_people_count, 1);
                assert_eq!(body.overall_rush_status, RushStatus::High);
                assert_eq!(body.zones.len(), 2);
                assert_eq!(body.zones[1].zone_id, "darshan");
                assert_eq!(body.zones[1].track_ids, vec![0, 1]);
                assert_eq!(body.zones[0].density, 0.33);
            }
            ApiResponse::Error { status, .. } => {
                panic!("expected success response, got error: {status}");
            }
        }
    }

    #[test]
    fn heatmap_handler_returns_no_data_before_first_frame() {
        let state = Arc::new(RwLock::new(AppState::new()));

        let response = build_heatmap_response(state, UNIX_EPOCH);

        match response {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body.error_code, ApiErrorCode::NoData);
                assert_eq!(body.timestamp, "1970-01-01T00:00:00Z");
            }
            ApiResponse::Success { .. } => panic!("expected no data error response"),
        }
    }

    #[test]
    fn heatmap_handler_returns_internal_error_when_lock_poisoned() {
        let response = build_heatmap_response(poisoned_state(), UNIX_EPOCH);

        match response {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body.error_code, ApiErrorCode::InternalError);
                assert_eq!(body.error_message, "Internal server error");
            }
            ApiResponse::Success { .. } => panic!("expected internal error response"),
        }
    }

    #[test]
    fn display_handler_returns_smoothed_grid() {
        let response = build_display_response(populated_state(), UNIX_EPOCH);

        match response {
            ApiResponse::Success { body, .. } => {
                assert_eq!(body.grid_size, 2);
                assert_eq!(body.kernel_size, DISPLAY_KERNEL_SIZE);
                assert_eq!(body.grid.len(), 2);
                assert!(body.grid[1][1] < 2.0);
                assert!(body.grid[0][1] > 0.0);
            }
            ApiResponse::Error { status, .. } => {
                panic!("expected success response, got error: {status}");
            }
        }
    }

    #[test]
    fn display_handler_leaves_stored_grid_untouched() {
        let state = populated_state();

        let _ = build_display_response(Arc::clone(&state), UNIX_EPOCH);

        let guard = state.read().expect("state lock");
        let grid = guard.grid().expect("stored grid");
        assert_eq!(grid.get(1, 1), Some(2.0));
        assert_eq!(grid.get(0, 1), Some(0.0));
    }

    #[test]
    fn zone_handler_returns_named_zone() {
        let response = build_zone_response(populated_state(), "darshan", UNIX_EPOCH);

        match response {
            ApiResponse::Success { body, .. } => {
                assert_eq!(body.zone.zone_name, "DARSHAN");
                assert_eq!(body.zone.people_count, 2);
                assert_eq!(body.zone.alert_level, AlertLevel::High);
                assert_eq!(body.timestamp, "1970-01-01T00:00:01Z");
            }
            ApiResponse::Error { status, .. } => {
                panic!("expected success response, got error: {status}");
            }
        }
    }

    #[test]
    fn zone_handler_returns_not_found_for_unknown_zone() {
        let response = build_zone_response(populated_state(), "lobby", UNIX_EPOCH);

        match response {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body.error_code, ApiErrorCode::UnknownZone);
                assert_eq!(body.error_message, "No zone named lobby");
            }
            ApiResponse::Success { .. } => panic!("expected unknown zone response"),
        }
    }

    #[test]
    fn health_handler_returns_ko_before_first_frame() {
        let state = Arc::new(RwLock::new(AppState::new()));

        let response = build_health_response(state, UNIX_EPOCH);

        match response {
            ApiResponse::Success { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body.status, HealthStatus::Ko);
                assert_eq!(body.frames_processed, 0);
                assert!(body.last_publish.is_none());
            }
            ApiResponse::Error { status, .. } => {
                panic!("expected health response, got error: {status}");
            }
        }
    }

    #[test]
    fn health_handler_returns_degraded_after_failed_publish() {
        let state = populated_state();
        state
            .write()
            .expect("state lock")
            .set_last_publish(PublishRecord {
                at: UNIX_EPOCH + Duration::from_secs(5),
                status: PublishStatus::Failed {
                    reason: "connect error: refused".to_string(),
                },
            });

        let response = build_health_response(state, UNIX_EPOCH);

        match response {
            ApiResponse::Success { status, body } => {
                assert_eq!(status, StatusCode::OK);
                assert_eq!(body.status, HealthStatus::Degraded);
                assert_eq!(body.frames_processed, 1);
                let last = body.last_publish.expect("last publish");
                assert_eq!(last.state, PublishState::Failed);
                assert_eq!(last.timestamp, "1970-01-01T00:00:05Z");
                assert_eq!(last.reason.as_deref(), Some("connect error: refused"));
            }
            ApiResponse::Error { status, .. } => {
                panic!("expected health response, got error: {status}");
            }
        }
    }

    #[test]
    fn health_handler_returns_ok_after_delivery() {
        let state = populated_state();
        state
            .write()
            .expect("state lock")
            .set_last_publish(PublishRecord {
                at: UNIX_EPOCH,
                status: PublishStatus::Delivered {
                    alerts_triggered: Some(1),
                },
            });

        let response = build_health_response(state, UNIX_EPOCH);

        match response {
            ApiResponse::Success { status, body } => {
                assert_eq!(status, StatusCode::OK);
                assert_eq!(body.status, HealthStatus::Ok);
                let last = body.last_publish.expect("last publish");
                assert_eq!(last.alerts_triggered, Some(1));
            }
            ApiResponse::Error { status, .. } => {
                panic!("expected health response, got error: {status}");
            }
        }
    }

    #[test]
    fn health_handler_returns_internal_error_when_lock_poisoned() {
        let response = build_health_response(poisoned_state(), UNIX_EPOCH);

        match response {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body.error_code, ApiErrorCode::InternalError);
            }
            ApiResponse::Success { .. } => panic!("expected internal error response"),
        }
    }
}
