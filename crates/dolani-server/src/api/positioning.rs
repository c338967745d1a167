//! Positioning API endpoints.
//!
//! Exposes the scanner snapshot, the most recent resolution and the
//! start/stop/lifecycle controls of the positioning subsystem.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use dolani_core::{BeaconReading, LocationId, ProcessState, ResolvedLocation, ScannerStatus};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the positioning router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_status))
        .route("/beacons", get(get_beacons))
        .route("/location", get(get_location))
        .route("/start", post(start_scanning))
        .route("/stop", post(stop_scanning))
        .route("/lifecycle", put(set_lifecycle))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// One tracked beacon.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "identifier": "f7826da6-4fa2-4e98-8024-bc5b71e0893e",
    "raw_rssi": -61,
    "smoothed_rssi": -63.33,
    "distance_m": 1.45,
    "last_seen_ms_ago": 120
}))]
pub struct BeaconResponse {
    /// Stable beacon identifier.
    #[schema(example = "f7826da6-4fa2-4e98-8024-bc5b71e0893e")]
    pub identifier: String,

    /// Last raw RSSI sample (dBm).
    #[schema(example = -61)]
    pub raw_rssi: i16,

    /// Smoothed RSSI (dBm).
    #[schema(example = -63.33)]
    pub smoothed_rssi: f64,

    /// Estimated distance in metres.
    #[schema(example = 1.45)]
    pub distance_m: f64,

    /// Milliseconds since the beacon was last heard.
    #[schema(example = 120)]
    pub last_seen_ms_ago: u64,
}

impl BeaconResponse {
    fn from_reading(reading: &BeaconReading, now: Instant) -> Self {
        let age = now.saturating_duration_since(reading.last_seen);
        Self {
            identifier: reading.identifier.clone(),
            raw_rssi: reading.raw_rssi,
            smoothed_rssi: reading.smoothed_rssi,
            distance_m: reading.distance_m,
            last_seen_ms_ago: u64::try_from(age.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Positioning status.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "scanning",
    "error": null,
    "session_id": "01928c3e-8f0a-7c41-9a3e-5b1f2d3c4e5f",
    "beacon_count": 3,
    "strongest": {
        "identifier": "f7826da6-4fa2-4e98-8024-bc5b71e0893e",
        "raw_rssi": -61,
        "smoothed_rssi": -63.33,
        "distance_m": 1.45,
        "last_seen_ms_ago": 120
    },
    "current_location_id": 40,
    "resolve_cooldown_ms": 3000,
    "max_resolve_distance_m": 15.0,
    "checked_at_utc": "2025-01-15T03:30:00Z"
}))]
pub struct PositioningStatusResponse {
    /// Scanner lifecycle state.
    pub status: ScannerStatus,

    /// Last scanner error, if any.
    #[schema(example = json!(null))]
    pub error: Option<String>,

    /// Id of the current scan session.
    pub session_id: Option<String>,

    /// Number of tracked beacons.
    #[schema(example = 3, minimum = 0)]
    pub beacon_count: usize,

    /// The strongest tracked beacon.
    pub strongest: Option<BeaconResponse>,

    /// Location currently published.
    #[schema(example = 40)]
    pub current_location_id: Option<LocationId>,

    /// Minimum interval between resolves of the same beacon.
    #[schema(example = 3000)]
    pub resolve_cooldown_ms: u64,

    /// Beacons estimated further away than this are never resolved.
    #[schema(example = 15.0)]
    pub max_resolve_distance_m: f64,

    /// When this status was taken.
    #[schema(example = "2025-01-15T03:30:00Z")]
    pub checked_at_utc: String,
}

/// Tracked beacons, strongest first.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BeaconsResponse {
    /// Scanner lifecycle state.
    pub status: ScannerStatus,

    /// Beacons ordered by smoothed RSSI, strongest first.
    pub beacons: Vec<BeaconResponse>,

    /// When this snapshot was taken.
    #[schema(example = "2025-01-15T03:30:00Z")]
    pub captured_at_utc: String,
}

/// Host process lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "state": "background" }))]
pub struct LifecycleRequest {
    /// New process state.
    pub state: ProcessState,
}

/// Acknowledgement of a control command.
///
/// Commands are applied asynchronously; `status` is the state at the time
/// the command was accepted.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "accepted": true, "status": "idle" }))]
pub struct CommandResponse {
    /// Whether the command was queued.
    #[schema(example = true)]
    pub accepted: bool,

    /// Scanner state when the command was accepted.
    pub status: ScannerStatus,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the positioning status.
#[utoipa::path(
    get,
    path = "/api/positioning",
    tag = "positioning",
    operation_id = "getPositioningStatus",
    summary = "Get positioning status",
    description = "Returns the scanner state, the last error, the strongest \
        beacon and the currently published location id.",
    responses(
        (status = 200, description = "Current status", body = PositioningStatusResponse)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> Json<PositioningStatusResponse> {
    let snapshot = state.positioning().snapshot();
    let resolver = &state.config().resolver;
    let now = Instant::now();

    Json(PositioningStatusResponse {
        status: snapshot.status,
        error: snapshot.error.clone(),
        session_id: snapshot.session.map(|id| id.to_string()),
        beacon_count: snapshot.beacons.len(),
        strongest: snapshot
            .strongest()
            .map(|reading| BeaconResponse::from_reading(reading, now)),
        current_location_id: state.current_location(),
        resolve_cooldown_ms: resolver.cooldown_ms,
        max_resolve_distance_m: resolver.max_distance_m,
        checked_at_utc: Utc::now().to_rfc3339(),
    })
}

/// List tracked beacons.
#[utoipa::path(
    get,
    path = "/api/positioning/beacons",
    tag = "positioning",
    operation_id = "listBeacons",
    summary = "List tracked beacons",
    description = "Returns every beacon heard within the stale timeout, \
        strongest first. Updated at most twice per second.",
    responses(
        (status = 200, description = "Beacon snapshot", body = BeaconsResponse)
    )
)]
pub async fn get_beacons(State(state): State<SharedState>) -> Json<BeaconsResponse> {
    let snapshot = state.positioning().snapshot();
    let now = Instant::now();

    Json(BeaconsResponse {
        status: snapshot.status,
        beacons: snapshot
            .beacons
            .iter()
            .map(|reading| BeaconResponse::from_reading(reading, now))
            .collect(),
        captured_at_utc: Utc::now().to_rfc3339(),
    })
}

/// Get the most recently resolved location.
#[utoipa::path(
    get,
    path = "/api/positioning/location",
    tag = "positioning",
    operation_id = "getResolvedLocation",
    summary = "Get resolved location",
    description = "Returns the location of the most recently resolved beacon. \
        Failed resolves never clear it.",
    responses(
        (status = 200, description = "Resolved location", body = ResolvedLocation),
        (status = 404, description = "No beacon has been resolved yet", body = super::error::ErrorResponse)
    )
)]
pub async fn get_location(State(state): State<SharedState>) -> ApiResult<Json<ResolvedLocation>> {
    state
        .positioning()
        .resolved_location()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound {
            error_code: "NO_RESOLVED_LOCATION".to_string(),
            message: "No beacon has been resolved yet".to_string(),
        })
}

/// Start scanning.
#[utoipa::path(
    post,
    path = "/api/positioning/start",
    tag = "positioning",
    operation_id = "startScanning",
    summary = "Start scanning",
    description = "Expresses intent to scan. If Bluetooth is off the scanner \
        waits in `bt-off` and resumes once it powers on.",
    responses(
        (status = 202, description = "Command accepted", body = CommandResponse),
        (status = 503, description = "Positioning subsystem stopped", body = super::error::ErrorResponse)
    )
)]
pub async fn start_scanning(
    State(state): State<SharedState>,
) -> ApiResult<(StatusCode, Json<CommandResponse>)> {
    state.positioning().start()?;
    Ok(accepted(&state))
}

/// Stop scanning.
#[utoipa::path(
    post,
    path = "/api/positioning/stop",
    tag = "positioning",
    operation_id = "stopScanning",
    summary = "Stop scanning",
    description = "Drops the intent to scan, halts the hardware scan and \
        unsubscribes from adapter power changes.",
    responses(
        (status = 202, description = "Command accepted", body = CommandResponse),
        (status = 503, description = "Positioning subsystem stopped", body = super::error::ErrorResponse)
    )
)]
pub async fn stop_scanning(
    State(state): State<SharedState>,
) -> ApiResult<(StatusCode, Json<CommandResponse>)> {
    state.positioning().stop()?;
    Ok(accepted(&state))
}

/// Report a foreground/background transition.
#[utoipa::path(
    put,
    path = "/api/positioning/lifecycle",
    tag = "positioning",
    operation_id = "setLifecycle",
    summary = "Report process lifecycle",
    description = "Backgrounding pauses an active scan; returning to the \
        foreground resumes it.",
    request_body = LifecycleRequest,
    responses(
        (status = 202, description = "Command accepted", body = CommandResponse),
        (status = 503, description = "Positioning subsystem stopped", body = super::error::ErrorResponse)
    )
)]
pub async fn set_lifecycle(
    State(state): State<SharedState>,
    Json(request): Json<LifecycleRequest>,
) -> ApiResult<(StatusCode, Json<CommandResponse>)> {
    tracing::debug!(state = ?request.state, "Process lifecycle change");
    state.positioning().set_process_state(request.state)?;
    Ok(accepted(&state))
}

fn accepted(state: &SharedState) -> (StatusCode, Json<CommandResponse>) {
    (
        StatusCode::ACCEPTED,
        Json(CommandResponse {
            accepted: true,
            status: state.positioning().status(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum_test::TestServer;
    use dolani_core::{
        AdapterState, BeaconResolver, Config, LocationStore, MockAdapter, Positioning,
        ResolveError, ResolveResponse, ResolveResult,
    };
    use tokio_test::assert_ok;

    use crate::api::create_router;
    use crate::state::AppState;

    struct OfflineResolver;

    #[async_trait]
    impl BeaconResolver for OfflineResolver {
        async fn resolve(&self, _identifier: &str) -> ResolveResult<ResolveResponse> {
            Err(ResolveError::Backend("offline".to_string()))
        }
    }

    fn server(adapter: &MockAdapter, auto_start: bool) -> (TestServer, SharedState) {
        let mut config = Config::default();
        config.scanner.auto_start = auto_start;
        server_with(adapter, config)
    }

    fn server_with(adapter: &MockAdapter, config: Config) -> (TestServer, SharedState) {
        let location = Arc::new(LocationStore::new());
        let positioning = Positioning::spawn(
            Arc::new(adapter.clone()),
            Arc::new(OfflineResolver),
            Arc::clone(&location),
            &config,
        )
        .unwrap();
        let state = AppState::new(config, positioning, location).shared();
        let server = assert_ok!(TestServer::new(create_router(Arc::clone(&state))));
        (server, state)
    }

    async fn wait_status(state: &SharedState, status: ScannerStatus) {
        let mut rx = state.positioning().subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.status == status))
            .await
            .expect("timed out waiting for scanner")
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_when_idle() {
        let adapter = MockAdapter::powered_on();
        let (server, _state) = server(&adapter, false);

        let response = server.get("/api/positioning").await;
        response.assert_status_ok();
        let body: PositioningStatusResponse = response.json();
        assert_eq!(body.status, ScannerStatus::Idle);
        assert_eq!(body.beacon_count, 0);
        assert!(body.strongest.is_none());
        assert!(body.current_location_id.is_none());
        assert_eq!(body.resolve_cooldown_ms, 3_000);
        assert!((body.max_resolve_distance_m - 15.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_status_reports_configured_thresholds() {
        let adapter = MockAdapter::powered_on();
        let mut config = Config::default();
        config.scanner.auto_start = false;
        config.resolver.cooldown_ms = 5_000;
        config.resolver.max_distance_m = 8.5;
        let (server, _state) = server_with(&adapter, config);

        let body: PositioningStatusResponse = server.get("/api/positioning").await.json();
        assert_eq!(body.resolve_cooldown_ms, 5_000);
        assert!((body.max_resolve_distance_m - 8.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_start_then_list_beacons() {
        let adapter = MockAdapter::powered_on();
        let (server, state) = server(&adapter, false);

        let response = server.post("/api/positioning/start").await;
        response.assert_status(StatusCode::ACCEPTED);
        wait_status(&state, ScannerStatus::Scanning).await;

        adapter.advertise("hall", -59);
        let mut rx = state.positioning().subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| !s.beacons.is_empty()))
            .await
            .expect("timed out waiting for beacons")
            .unwrap();

        let body: BeaconsResponse = server.get("/api/positioning/beacons").await.json();
        assert_eq!(body.status, ScannerStatus::Scanning);
        assert_eq!(body.beacons.len(), 1);
        assert_eq!(body.beacons[0].identifier, "hall");
        assert!((body.beacons[0].distance_m - 1.0).abs() < f64::EPSILON);

        let body: PositioningStatusResponse = server.get("/api/positioning").await.json();
        assert!(body.session_id.is_some());
        assert_eq!(body.strongest.unwrap().identifier, "hall");
    }

    #[tokio::test]
    async fn test_bt_off_is_reported() {
        let adapter = MockAdapter::new(AdapterState::PoweredOff);
        let (server, state) = server(&adapter, true);
        wait_status(&state, ScannerStatus::BtOff).await;

        let body: PositioningStatusResponse = server.get("/api/positioning").await.json();
        assert_eq!(body.status, ScannerStatus::BtOff);
        assert_eq!(body.error.as_deref(), Some("Bluetooth is turned off"));
    }

    #[tokio::test]
    async fn test_lifecycle_pauses_scan() {
        let adapter = MockAdapter::powered_on();
        let (server, state) = server(&adapter, true);
        wait_status(&state, ScannerStatus::Scanning).await;

        server
            .put("/api/positioning/lifecycle")
            .json(&serde_json::json!({ "state": "background" }))
            .await
            .assert_status(StatusCode::ACCEPTED);
        wait_status(&state, ScannerStatus::Paused).await;
        assert!(!adapter.is_scanning());

        server
            .put("/api/positioning/lifecycle")
            .json(&serde_json::json!({ "state": "foreground" }))
            .await
            .assert_status(StatusCode::ACCEPTED);
        wait_status(&state, ScannerStatus::Scanning).await;
    }

    #[tokio::test]
    async fn test_stop_returns_to_idle() {
        let adapter = MockAdapter::powered_on();
        let (server, state) = server(&adapter, true);
        wait_status(&state, ScannerStatus::Scanning).await;

        server
            .post("/api/positioning/stop")
            .await
            .assert_status(StatusCode::ACCEPTED);
        wait_status(&state, ScannerStatus::Idle).await;
        assert!(!adapter.is_scanning());
        assert_eq!(adapter.state_subscribers(), 0);
    }

    #[tokio::test]
    async fn test_location_not_resolved_yet() {
        let adapter = MockAdapter::powered_on();
        let (server, _state) = server(&adapter, false);

        let response = server.get("/api/positioning/location").await;
        response.assert_status_not_found();
        let body: crate::api::ErrorResponse = response.json();
        assert_eq!(body.error, "NO_RESOLVED_LOCATION");
    }

    #[tokio::test]
    async fn test_commands_after_shutdown_are_unavailable() {
        let adapter = MockAdapter::powered_on();
        let (server, state) = server(&adapter, false);
        assert_ok!(state.positioning().shutdown().await);

        let response = server.post("/api/positioning/start").await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        let body: crate::api::ErrorResponse = response.json();
        assert_eq!(body.error, "SUBSYSTEM_STOPPED");

        let health: dolani_core::HealthResponse = server.get("/health").await.json();
        assert_eq!(health.status, "degraded");
    }

    #[test]
    fn test_lifecycle_request_accepts_inactive() {
        let request: LifecycleRequest = serde_json::from_str(r#"{"state":"inactive"}"#).unwrap();
        assert_eq!(request.state, ProcessState::Background);
    }
}
