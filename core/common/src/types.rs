//! Domain records persisted by the store and exchanged between crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Setting key holding the user's language code.
pub const LANGUAGE_SETTING: &str = "language";

/// Language used until the user picks one.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Identifier of a queued write.
///
/// Generated once at enqueue time and stable for the whole offline period.
/// Replays send it as an idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingId(Uuid);

impl PendingId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id from its hyphenated string form.
    ///
    /// # Errors
    /// - Returns error if `s` is not a valid UUID
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidInput(format!("Invalid pending id '{}': {}", s, e)))
    }
}

impl fmt::Display for PendingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Geographic position of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Create validated coordinates.
    ///
    /// # Errors
    /// - Latitude outside [-90, 90] or longitude outside [-180, 180]
    /// - Non-finite values
    pub fn new(latitude: f64, longitude: f64) -> crate::Result<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(crate::Error::InvalidInput(format!(
                "Latitude out of range: {}",
                latitude
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(crate::Error::InvalidInput(format!(
                "Longitude out of range: {}",
                longitude
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Key fragment rounded to two decimals, so nearby captures share cache
    /// entries.
    pub fn cache_fragment(&self) -> String {
        format!("{:.2}_{:.2}", self.latitude, self.longitude)
    }
}

/// Context stored alongside a queued binary payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteContext {
    pub coordinates: Coordinates,
    /// Free-form capture metadata (content type, language, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl WriteContext {
    pub fn new(coordinates: Coordinates) -> Self {
        Self {
            coordinates,
            metadata: Map::new(),
        }
    }

    /// Attach a metadata field.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Read a string metadata field.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// A write that could not be delivered live and waits for a drain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub id: PendingId,
    pub binary_payload: Vec<u8>,
    pub context: WriteContext,
    pub enqueued_at: DateTime<Utc>,
    /// Failed delivery attempts so far. Diagnostic, and the dead-letter bound.
    pub attempt_count: u32,
    pub last_error: Option<String>,
}

impl PendingWrite {
    /// Create a new queue item stamped with the current time.
    pub fn new(binary_payload: Vec<u8>, context: WriteContext) -> Self {
        Self::with_id(PendingId::generate(), binary_payload, context)
    }

    /// Create a queue item under an id already sent with a live attempt.
    pub fn with_id(id: PendingId, binary_payload: Vec<u8>, context: WriteContext) -> Self {
        Self {
            id,
            binary_payload,
            context,
            enqueued_at: Utc::now(),
            attempt_count: 0,
            last_error: None,
        }
    }
}

/// A write removed from the replay queue after too many failed attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub write: PendingWrite,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Result of a successful delivery, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    pub result_payload: Value,
    pub coordinates: Coordinates,
    /// When the capture was originally queued, for replayed writes.
    pub source_timestamp: Option<DateTime<Utc>>,
}

impl NewRecord {
    /// Record for a write delivered live.
    pub fn live(result_payload: Value, coordinates: Coordinates) -> Self {
        Self {
            result_payload,
            coordinates,
            source_timestamp: None,
        }
    }

    /// Record for a write delivered by a drain.
    pub fn replayed(result_payload: Value, pending: &PendingWrite) -> Self {
        Self {
            result_payload,
            coordinates: pending.context.coordinates,
            source_timestamp: Some(pending.enqueued_at),
        }
    }
}

/// A delivered analysis. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedRecord {
    pub id: i64,
    pub result_payload: Value,
    pub coordinates: Coordinates,
    pub captured_at: DateTime<Utc>,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub synced: bool,
}

impl CompletedRecord {
    /// Typed view of the stored payload.
    pub fn analysis(&self) -> crate::Result<AnalysisResult> {
        Ok(serde_json::from_value(self.result_payload.clone())?)
    }
}

/// Body returned by the analyze endpoint.
///
/// Only the fields the engine relies on are typed; everything else the server
/// sends is kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub disease: String,
    pub confidence: f64,
    pub risk_score: f64,
    pub risk_level: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_pending_id_roundtrip() {
        let id = PendingId::generate();
        let parsed = PendingId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(PendingId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_coordinates_validation() {
        assert!(Coordinates::new(17.385, 78.4867).is_ok());
        assert!(Coordinates::new(91.0, 0.0).is_err());
        assert!(Coordinates::new(0.0, -181.0).is_err());
        assert!(Coordinates::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_cache_fragment_rounds() {
        let coords = Coordinates::new(17.3851, 78.4867).unwrap();
        assert_eq!(coords.cache_fragment(), "17.39_78.49");
    }

    #[test]
    fn test_analysis_keeps_extra_fields() {
        let payload = serde_json::json!({
            "disease": "Tomato___Late_blight",
            "confidence": 0.93,
            "risk_score": 71.5,
            "risk_level": "high",
            "crop": "Tomato"
        });
        let record = CompletedRecord {
            id: 1,
            result_payload: payload,
            coordinates: Coordinates::new(10.0, 20.0).unwrap(),
            captured_at: Utc::now(),
            source_timestamp: None,
            synced: true,
        };
        let analysis = record.analysis().unwrap();
        assert_eq!(analysis.risk_level, "high");
        assert_eq!(analysis.extra.get("crop"), Some(&Value::from("Tomato")));
    }

    proptest! {
        #[test]
        fn nearby_coordinates_share_fragment(lat in 1.0f64..89.0, lon in 1.0f64..179.0) {
            let base = Coordinates::new((lat * 100.0).round() / 100.0, (lon * 100.0).round() / 100.0).unwrap();
            let nudged = Coordinates::new(base.latitude + 0.001, base.longitude + 0.001).unwrap();
            prop_assert_eq!(base.cache_fragment(), nudged.cache_fragment());
        }
    }
}
