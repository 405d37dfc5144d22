//! Canonical incident models shared between the pipeline, the store and the hub

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type carried by every change notification
pub const NOTIFICATION_EVENT_TYPE: &str = "Traffic.Ingested";

/// Subject carried by every change notification
pub const NOTIFICATION_SUBJECT: &str = "traffic/ingestion";

/// Location used when an upstream record names none
pub const UNKNOWN_LOCATION: &str = "Unknown location";

/// Incident status as reported upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventStatus {
    Active,
    Inactive,
    #[default]
    Unknown,
}

impl EventStatus {
    /// Parse an upstream status string; anything unrecognised maps to `Unknown`
    pub fn from_upstream(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => EventStatus::Active,
            "INACTIVE" => EventStatus::Inactive,
            _ => EventStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Active => "ACTIVE",
            EventStatus::Inactive => "INACTIVE",
            EventStatus::Unknown => "UNKNOWN",
        }
    }
}

/// Persisted lifecycle status of a stored incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StoredStatus {
    Active,
    Inactive,
}

impl StoredStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoredStatus::Active => "ACTIVE",
            StoredStatus::Inactive => "INACTIVE",
        }
    }
}

impl std::str::FromStr for StoredStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(StoredStatus::Active),
            "INACTIVE" => Ok(StoredStatus::Inactive),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown stored status: {}",
                other
            ))),
        }
    }
}

/// Longitude/latitude pair
///
/// Serialized in GeoJSON order as `[longitude, latitude]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl From<[f64; 2]> for GeoPoint {
    fn from([longitude, latitude]: [f64; 2]) -> Self {
        Self { longitude, latitude }
    }
}

impl From<GeoPoint> for [f64; 2] {
    fn from(point: GeoPoint) -> Self {
        [point.longitude, point.latitude]
    }
}

/// Normalized representation of one traffic incident
///
/// `id` is stable across snapshots of the same real-world incident. Free-text
/// fields have already been restricted to printable ASCII.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    pub id: String,
    #[serde(default = "default_event_type")]
    pub event_type: String,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default)]
    pub geo_coordinates: Option<GeoPoint>,
}

fn default_event_type() -> String {
    "UNKNOWN".to_string()
}

fn default_location() -> String {
    UNKNOWN_LOCATION.to_string()
}

/// Incident as held by the reconciling store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEventRecord {
    pub id: String,
    pub event_type: String,
    pub location: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub priority: String,
    /// Status as last reported upstream
    pub reported_status: EventStatus,
    /// Lifecycle status maintained by reconciliation
    pub status: StoredStatus,
    pub geo_coordinates: Option<GeoPoint>,
    pub last_seen: DateTime<Utc>,
}

impl StoredEventRecord {
    /// Canonical view of the stored incident
    pub fn to_event(&self) -> CanonicalEvent {
        CanonicalEvent {
            id: self.id.clone(),
            event_type: self.event_type.clone(),
            location: self.location.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            priority: self.priority.clone(),
            status: self.reported_status,
            geo_coordinates: self.geo_coordinates,
        }
    }
}

/// "Snapshot changed" notification, built once per changed cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub notification_id: Uuid,
    pub event_time: DateTime<Utc>,
    pub subject: String,
    pub event_type: String,
    pub events: Vec<CanonicalEvent>,
}

impl ChangeNotification {
    pub fn new(events: Vec<CanonicalEvent>) -> Self {
        Self {
            notification_id: Uuid::new_v4(),
            event_time: Utc::now(),
            subject: NOTIFICATION_SUBJECT.to_string(),
            event_type: NOTIFICATION_EVENT_TYPE.to_string(),
            events,
        }
    }

    /// Frame pushed to real-time clients for this notification
    pub fn push_frame(&self) -> PushFrame {
        PushFrame {
            events: self.events.clone(),
        }
    }
}

/// JSON frame pushed to connected viewers: `{"events": [...]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushFrame {
    pub events: Vec<CanonicalEvent>,
}
