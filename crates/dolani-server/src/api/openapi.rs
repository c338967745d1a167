//! OpenAPI specification generation for the dolani API.
//!
//! The generated document is served at `/api/openapi.json` and written to
//! disk by the `gen-openapi` binary for client generation.

use axum::Json;
use dolani_core::{
    Department, Floor, HealthResponse, Location, ProcessState, ResolvedLocation, ScannerStatus,
};
use utoipa::OpenApi;

use super::error::ErrorResponse;
use super::positioning::{
    BeaconResponse, BeaconsResponse, CommandResponse, LifecycleRequest, PositioningStatusResponse,
};

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as a pretty printed string.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> serde_json::Result<String> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for dolani.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "dolani API",
        version = "0.1.0",
        description = r#"
# dolani API

dolani estimates which room a device is in from nearby BLE beacons.

## Overview

1. **Scanning**: the daemon scans continuously for beacon advertisements
   while Bluetooth is on and the host is in the foreground.
2. **Smoothing**: RSSI is smoothed per beacon and converted to a distance.
3. **Resolution**: the strongest nearby beacon is resolved to a location at
   most once per cooldown window.

## Scanner states

`idle`, `scanning`, `paused` (host in background), `bt-off` (waiting for
Bluetooth) and `error` (scan could not start; `start` retries).
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local dolani daemon")
    ),
    tags(
        (
            name = "system",
            description = "Health checks"
        ),
        (
            name = "positioning",
            description = "Beacon scanning, readings and the resolved location"
        )
    ),
    paths(
        super::health::health_check,
        super::positioning::get_status,
        super::positioning::get_beacons,
        super::positioning::get_location,
        super::positioning::start_scanning,
        super::positioning::stop_scanning,
        super::positioning::set_lifecycle,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            ScannerStatus,
            ProcessState,
            BeaconResponse,
            BeaconsResponse,
            PositioningStatusResponse,
            LifecycleRequest,
            CommandResponse,
            ResolvedLocation,
            Location,
            Floor,
            Department,
        )
    )
)]
pub struct ApiDoc;
