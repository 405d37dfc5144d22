//! Raw incident decoding and canonicalization
//!
//! Upstream records arrive in one of two shapes. Each record is first decoded
//! into [`RawIncident`], an explicit tagged type; only then is it mapped to a
//! [`CanonicalEvent`]. A record that fits neither shape is a per-record
//! failure and never aborts the batch.

use otw_common::models::UNKNOWN_LOCATION;
use otw_common::sanitize::sanitize_text;
use otw_common::time::parse_upstream_timestamp;
use otw_common::{CanonicalEvent, EventStatus, GeoPoint};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

/// Per-record canonicalization failure
#[derive(Debug, Error)]
pub enum CanonicalizeError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("record {id:?} matches no known incident shape")]
    UnknownShape { id: Option<String> },

    #[error("record {id:?} is malformed: {source}")]
    Malformed {
        id: Option<String>,
        #[source]
        source: serde_json::Error,
    },

    #[error("record has no usable id")]
    MissingId,
}

impl CanonicalizeError {
    /// Id of the offending record, when one could be read
    pub fn record_id(&self) -> Option<&str> {
        match self {
            CanonicalizeError::UnknownShape { id } | CanonicalizeError::Malformed { id, .. } => {
                id.as_deref()
            }
            CanonicalizeError::NotAnObject | CanonicalizeError::MissingId => None,
        }
    }
}

/// Fields shared by both upstream shapes
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentCommon {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub event_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub headline: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub created: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub updated: Option<String>,
    #[serde(default)]
    pub geodata: Option<Geodata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Geodata {
    #[serde(default)]
    pub coordinates: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    pub start_date_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub end_date_time: Option<String>,
}

/// Shape carrying a schedule list and a free-text headline
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduledIncident {
    #[serde(flatten)]
    pub common: IncidentCommon,
    pub schedule: Vec<ScheduleEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocationField {
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: Option<String>,
}

/// Shape carrying priority/status/location directly
#[derive(Debug, Clone, Deserialize)]
pub struct DirectIncident {
    #[serde(flatten)]
    pub common: IncidentCommon,
    #[serde(default)]
    pub location: Option<LocationField>,
}

/// One upstream record, decoded into a known shape
#[derive(Debug, Clone)]
pub enum RawIncident {
    Scheduled(ScheduledIncident),
    Direct(DirectIncident),
}

impl RawIncident {
    /// Decode one upstream JSON record
    pub fn decode(value: &Value) -> Result<Self, CanonicalizeError> {
        let object = value.as_object().ok_or(CanonicalizeError::NotAnObject)?;
        let id = object
            .get("id")
            .and_then(value_to_string)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        let malformed = |source| CanonicalizeError::Malformed {
            id: id.clone(),
            source,
        };

        if matches!(object.get("schedule"), Some(Value::Array(_))) {
            return ScheduledIncident::deserialize(value)
                .map(RawIncident::Scheduled)
                .map_err(malformed);
        }

        if ["priority", "status", "location"]
            .iter()
            .any(|key| object.contains_key(*key))
        {
            return DirectIncident::deserialize(value)
                .map(RawIncident::Direct)
                .map_err(malformed);
        }

        Err(CanonicalizeError::UnknownShape { id })
    }

    fn common(&self) -> &IncidentCommon {
        match self {
            RawIncident::Scheduled(incident) => &incident.common,
            RawIncident::Direct(incident) => &incident.common,
        }
    }

    /// Map this record to its canonical form
    pub fn canonicalize(&self) -> Result<CanonicalEvent, CanonicalizeError> {
        let common = self.common();

        let id = common
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(CanonicalizeError::MissingId)?;

        let (start, end) = match self {
            RawIncident::Scheduled(incident) if !incident.schedule.is_empty() => (
                incident.schedule[0].start_date_time.as_deref(),
                incident.schedule[0].end_date_time.as_deref(),
            ),
            _ => (common.created.as_deref(), common.updated.as_deref()),
        };

        let location = match self {
            RawIncident::Scheduled(_) => first_text([&common.headline, &common.message]),
            RawIncident::Direct(incident) => {
                let description = incident.location.as_ref().and_then(|l| l.description.clone());
                first_text([&description, &common.headline, &common.message])
            }
        };

        Ok(CanonicalEvent {
            id: sanitize_text(id),
            event_type: sanitize_text(non_empty(common.event_type.as_deref()).unwrap_or("UNKNOWN")),
            location: sanitize_text(location.as_deref().unwrap_or(UNKNOWN_LOCATION)),
            start_time: start.and_then(|value| parse_timestamp_field(id, "start", value)),
            end_time: end.and_then(|value| parse_timestamp_field(id, "end", value)),
            priority: sanitize_text(common.priority.as_deref().unwrap_or("").trim()),
            status: common
                .status
                .as_deref()
                .map(EventStatus::from_upstream)
                .unwrap_or_default(),
            geo_coordinates: common
                .geodata
                .as_ref()
                .and_then(|g| g.coordinates.as_ref())
                .and_then(parse_geo_point),
        })
    }
}

/// Result of canonicalizing a whole snapshot
#[derive(Debug, Default)]
pub struct CanonicalBatch {
    pub events: Vec<CanonicalEvent>,
    pub rejected: Vec<CanonicalizeError>,
}

impl CanonicalBatch {
    /// Ids carried by rejected records, normalized the same way as accepted ids
    pub fn rejected_ids(&self) -> HashSet<String> {
        self.rejected
            .iter()
            .filter_map(|e| e.record_id())
            .map(sanitize_text)
            .collect()
    }
}

/// Canonicalize every record, logging and skipping the ones that fail
pub fn canonicalize_batch(records: &[Value]) -> CanonicalBatch {
    let mut batch = CanonicalBatch::default();

    for (index, record) in records.iter().enumerate() {
        match RawIncident::decode(record).and_then(|raw| raw.canonicalize()) {
            Ok(event) => batch.events.push(event),
            Err(e) => {
                warn!(index, error = %e, "Skipping incident record");
                batch.rejected.push(e);
            }
        }
    }

    debug!(
        accepted = batch.events.len(),
        rejected = batch.rejected.len(),
        "Canonicalized snapshot"
    );
    batch
}

/// Parse `geodata.coordinates` into a point
///
/// Accepts a `[lon, lat]` pair, a JSON string holding such a pair, or a
/// nested coordinate list (first point wins).
pub fn parse_geo_point(value: &Value) -> Option<GeoPoint> {
    match value {
        Value::Array(items) => match items.as_slice() {
            [Value::Number(lon), Value::Number(lat)] => {
                let point = GeoPoint {
                    longitude: lon.as_f64()?,
                    latitude: lat.as_f64()?,
                };
                valid_point(point).then_some(point)
            }
            [first @ Value::Array(_), ..] => parse_geo_point(first),
            _ => None,
        },
        Value::String(text) => serde_json::from_str::<Value>(text)
            .ok()
            .filter(|parsed| !parsed.is_string())
            .and_then(|parsed| parse_geo_point(&parsed)),
        _ => None,
    }
}

fn valid_point(point: GeoPoint) -> bool {
    point.longitude.is_finite()
        && point.latitude.is_finite()
        && (-180.0..=180.0).contains(&point.longitude)
        && (-90.0..=90.0).contains(&point.latitude)
}

fn parse_timestamp_field(id: &str, field: &str, value: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let parsed = parse_upstream_timestamp(value);
    if parsed.is_none() && !value.trim().is_empty() {
        warn!(id, field, value, "Unparseable incident timestamp dropped");
    }
    parsed
}

fn first_text<const N: usize>(candidates: [&Option<String>; N]) -> Option<String> {
    candidates
        .into_iter()
        .find_map(|c| non_empty(c.as_deref()).map(str::to_string))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Accepts strings, numbers and booleans as text; anything else is absent
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_to_string))
}
