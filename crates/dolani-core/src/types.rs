//! Shared types and OpenAPI schemas.
//!
//! Types that cross module boundaries: beacon readings produced by the
//! scanner, the scanner status, host process state and the location
//! records returned by the beacon resolver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use utoipa::ToSchema;

/// Identifier of a resolved location on the backend.
pub type LocationId = i64;

/// Latest state of one beacon.
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconReading {
    /// Stable identifier of the physical beacon.
    pub identifier: String,

    /// Last unfiltered RSSI sample (dBm).
    pub raw_rssi: i16,

    /// Weighted moving average of recent samples (dBm).
    pub smoothed_rssi: f64,

    /// Estimated distance in metres, never below 0.1.
    pub distance_m: f64,

    /// When this beacon was last heard.
    pub last_seen: Instant,
}

/// Lifecycle state of the scanner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ScannerStatus {
    /// Not scanning and no intent to scan.
    #[default]
    Idle,
    /// Hardware scan running.
    Scanning,
    /// Host process is in the background; resumes on foreground.
    Paused,
    /// Adapter is off or unauthorized; resumes when it powers on.
    BtOff,
    /// Scan could not be started. `start()` may retry.
    Error,
}

impl ScannerStatus {
    /// Lowercase name as used on the wire (`"bt-off"`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Paused => "paused",
            Self::BtOff => "bt-off",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ScannerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Foreground/background state of the host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// Visible and active.
    Foreground,
    /// Backgrounded or inactive.
    #[serde(alias = "inactive")]
    Background,
}

/// Floor summary embedded in a resolved location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Floor {
    /// Floor id.
    pub id: i64,

    /// Floor number within the building.
    #[schema(example = 2)]
    pub floor_number: i32,

    /// Floor plan image, if uploaded.
    pub floor_plan_image_url: Option<String>,

    /// Building the floor belongs to.
    pub building_id: i64,
}

/// Department owning a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Department {
    /// Department id.
    pub id: i64,

    /// Department name.
    pub name: String,

    /// Department category.
    #[serde(rename = "type")]
    pub kind: String,
}

/// A location a beacon is installed at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Location {
    /// Location id.
    pub id: LocationId,

    /// Location category (`CLASSROOM`, `OFFICE`, `EXIT`, ...).
    #[serde(rename = "type")]
    #[schema(example = "CLASSROOM")]
    pub kind: String,

    /// Display name.
    #[schema(example = "Lecture Hall B")]
    pub name: String,

    /// Room number, if any.
    pub room_number: Option<String>,

    /// X coordinate on the floor plan.
    pub coordinate_x: f64,

    /// Y coordinate on the floor plan.
    pub coordinate_y: f64,

    /// Floor id.
    pub floor_id: i64,

    /// Floor details.
    pub floor: Floor,

    /// Owning department.
    pub department: Option<Department>,
}

/// Body returned by the beacon resolve endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResponse {
    /// Backend id of the beacon.
    pub beacon_id: i64,

    /// Human readable beacon name.
    pub beacon_name: Option<String>,

    /// Whether the beacon is currently in service.
    pub operating: bool,

    /// Where the beacon is installed.
    #[serde(default)]
    pub location: Option<Location>,
}

/// The most recent successful resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResolvedLocation {
    /// Identifier of the beacon that was resolved.
    pub beacon_identifier: String,

    /// Backend id of the beacon.
    pub beacon_id: i64,

    /// Human readable beacon name.
    pub beacon_name: Option<String>,

    /// Resolved location.
    pub location: Location,

    /// When the resolution completed.
    pub resolved_at_utc: DateTime<Utc>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version.
    #[schema(example = "0.1.0")]
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESOLVE_BODY: &str = r#"{
        "beaconId": 12,
        "beaconName": "Hall B door",
        "operating": true,
        "location": {
            "id": 40,
            "type": "CLASSROOM",
            "name": "Lecture Hall B",
            "room_number": "B-104",
            "coordinate_x": 12.5,
            "coordinate_y": 3.0,
            "floor_id": 2,
            "floor": {
                "id": 2,
                "floor_number": 1,
                "floor_plan_image_url": null,
                "building_id": 1
            },
            "department": { "id": 3, "name": "Physics", "type": "ACADEMIC" }
        }
    }"#;

    #[test]
    fn test_resolve_response_deserialization() {
        let response: ResolveResponse = serde_json::from_str(RESOLVE_BODY).unwrap();
        assert_eq!(response.beacon_id, 12);
        assert!(response.operating);
        let location = response.location.unwrap();
        assert_eq!(location.id, 40);
        assert_eq!(location.kind, "CLASSROOM");
        assert_eq!(location.floor.floor_number, 1);
        assert_eq!(location.department.unwrap().kind, "ACADEMIC");
    }

    #[test]
    fn test_resolve_response_without_location() {
        let body = r#"{"beaconId": 1, "beaconName": null, "operating": false}"#;
        let response: ResolveResponse = serde_json::from_str(body).unwrap();
        assert!(!response.operating);
        assert!(response.location.is_none());
    }

    #[test]
    fn test_scanner_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&ScannerStatus::BtOff).unwrap(),
            "\"bt-off\""
        );
        assert_eq!(ScannerStatus::Paused.to_string(), "paused");
        assert_eq!(ScannerStatus::default(), ScannerStatus::Idle);
    }

    #[test]
    fn test_process_state_accepts_inactive() {
        let state: ProcessState = serde_json::from_str("\"inactive\"").unwrap();
        assert_eq!(state, ProcessState::Background);
    }
}
