use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Loosely typed candidate record, as produced by any conversion strategy
/// before it went through the [crate::validator::Validator].
pub type Candidate = Value;

/// Position fields. Any of these makes a record position-bearing.
pub const POSITION_FIELDS: [&str; 3] = ["latitude", "longitude", "altitude"];

/// Satellite observation fields.
pub const OBSERVATION_FIELDS: [&str; 5] = [
    "satellite_number",
    "pseudorange",
    "carrier_phase",
    "doppler",
    "signal_strength",
];

/// [CanonicalRecord] is one observation or position sample,
/// whatever the input format.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CanonicalRecord {
    /// Milliseconds since UNIX epoch
    pub timestamp_ms: i64,

    /// Latitude in decimal degrees (WGS84)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,

    /// Longitude in decimal degrees (WGS84)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,

    /// Altitude in meters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_satellites: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hdop: Option<f64>,

    /// Fix quality code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub satellite_system: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub satellite_number: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pseudorange: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub carrier_phase: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub doppler: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<f64>,

    /// Speed over ground in m/s
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,

    /// Course over ground in degrees
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course: Option<f64>,
}

impl CanonicalRecord {
    /// Builds an empty record at this timestamp
    pub fn at(timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            ..Default::default()
        }
    }

    /// Loosely typed view of this record, as seen by the validator.
    pub fn to_candidate(&self) -> Candidate {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Coerces a validated candidate into a [CanonicalRecord].
    /// Returns None when the candidate is not an object or has no usable timestamp.
    /// Optional fields that do not coerce are dropped.
    pub fn from_candidate(candidate: &Candidate) -> Option<Self> {
        let map = candidate.as_object()?;
        let timestamp_ms = map.get("timestamp_ms").and_then(as_i64)?;

        let float = |key: &str| map.get(key).and_then(as_f64);
        let int = |key: &str| map.get(key).and_then(as_i64);

        Some(Self {
            timestamp_ms,
            latitude: float("latitude"),
            longitude: float("longitude"),
            altitude: float("altitude"),
            num_satellites: int("num_satellites").and_then(|n| u32::try_from(n).ok()),
            hdop: float("hdop"),
            quality: int("quality").and_then(|q| u8::try_from(q).ok()),
            satellite_system: map.get("satellite_system").and_then(as_label),
            satellite_number: int("satellite_number").and_then(|n| u16::try_from(n).ok()),
            pseudorange: float("pseudorange"),
            carrier_phase: float("carrier_phase"),
            doppler: float("doppler"),
            signal_strength: float("signal_strength"),
            speed: float("speed"),
            course: float("course"),
        })
    }

    /// True when this record carries (part of) a position.
    /// Records carrying satellite observations only are not.
    pub fn is_position_bearing(&self) -> bool {
        let position =
            self.latitude.is_some() || self.longitude.is_some() || self.altitude.is_some();
        let observation = self.satellite_number.is_some()
            || self.pseudorange.is_some()
            || self.carrier_phase.is_some()
            || self.doppler.is_some()
            || self.signal_strength.is_some();
        position || !observation
    }

    /// Satellite identity, when this record is a satellite observation
    pub fn satellite(&self) -> Option<(&str, u16)> {
        let number = self.satellite_number?;
        Some((self.satellite_system.as_deref().unwrap_or_default(), number))
    }

    /// Number of populated optional fields
    pub fn completeness(&self) -> usize {
        [
            self.latitude.is_some(),
            self.longitude.is_some(),
            self.altitude.is_some(),
            self.num_satellites.is_some(),
            self.hdop.is_some(),
            self.quality.is_some(),
            self.satellite_system.is_some(),
            self.satellite_number.is_some(),
            self.pseudorange.is_some(),
            self.carrier_phase.is_some(),
            self.doppler.is_some(),
            self.signal_strength.is_some(),
            self.speed.is_some(),
            self.course.is_some(),
        ]
        .iter()
        .filter(|populated| **populated)
        .count()
    }

    /// Fills our missing fields with the ones `other` carries.
    pub fn merge(&mut self, other: CanonicalRecord) {
        macro_rules! fill {
            ($($field:ident),*) => {
                $(
                    if self.$field.is_none() {
                        self.$field = other.$field;
                    }
                )*
            };
        }
        fill!(
            latitude,
            longitude,
            altitude,
            num_satellites,
            hdop,
            quality,
            satellite_system,
            satellite_number,
            pseudorange,
            carrier_phase,
            doppler,
            signal_strength,
            speed,
            course
        );
    }
}

/// [LocationRecord] is the standardized output schema, one JSON object
/// per line. Field order is part of the output contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_satellites: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hdop: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satellite_system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satellite_number: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pseudorange: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier_phase: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doppler: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<f64>,
}

impl From<CanonicalRecord> for LocationRecord {
    fn from(record: CanonicalRecord) -> Self {
        Self {
            timestamp_ms: record.timestamp_ms,
            latitude: record.latitude,
            longitude: record.longitude,
            altitude: record.altitude,
            num_satellites: record.num_satellites,
            hdop: record.hdop,
            quality: record.quality,
            satellite_system: record.satellite_system,
            satellite_number: record.satellite_number,
            pseudorange: record.pseudorange,
            carrier_phase: record.carrier_phase,
            doppler: record.doppler,
            signal_strength: record.signal_strength,
            speed: record.speed,
            course: record.course,
        }
    }
}

/// Float coercion: JSON numbers and numeric strings.
pub fn as_f64(value: &Value) -> Option<f64> {
    let coerced = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    coerced.filter(|v| v.is_finite())
}

/// Integer coercion: JSON integers, integral floats and their string forms.
pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        },
        _ => None,
    }
}

fn integral(v: f64) -> Option<i64> {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

fn as_label(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn candidate_coercion() {
        let candidate = json!({
            "timestamp_ms": "1700000000000",
            "latitude": "48.5",
            "longitude": 11.25,
            "num_satellites": 8.0,
            "quality": "1",
            "satellite_system": "GPS",
            "hdop": "n/a",
        });

        let record = CanonicalRecord::from_candidate(&candidate).unwrap();
        assert_eq!(record.timestamp_ms, 1_700_000_000_000);
        assert_eq!(record.latitude, Some(48.5));
        assert_eq!(record.longitude, Some(11.25));
        assert_eq!(record.num_satellites, Some(8));
        assert_eq!(record.quality, Some(1));
        assert_eq!(record.satellite_system.as_deref(), Some("GPS"));
        assert_eq!(record.hdop, None);

        assert!(CanonicalRecord::from_candidate(&json!([1, 2])).is_none());
        assert!(CanonicalRecord::from_candidate(&json!({"latitude": 1.0})).is_none());
        assert!(CanonicalRecord::from_candidate(&json!({"timestamp_ms": 1.5})).is_none());
    }

    #[test]
    fn position_bearing() {
        let mut record = CanonicalRecord::at(0);
        assert!(record.is_position_bearing());

        record.satellite_number = Some(12);
        record.pseudorange = Some(2.2e7);
        assert!(!record.is_position_bearing());

        record.latitude = Some(1.0);
        assert!(record.is_position_bearing());
    }

    #[test]
    fn merge_fills_missing_fields_only() {
        let mut gga = CanonicalRecord::at(1000);
        gga.latitude = Some(48.0);
        gga.quality = Some(1);

        let mut rmc = CanonicalRecord::at(1000);
        rmc.latitude = Some(47.0);
        rmc.speed = Some(2.0);

        gga.merge(rmc);
        assert_eq!(gga.latitude, Some(48.0));
        assert_eq!(gga.speed, Some(2.0));
        assert_eq!(gga.completeness(), 3);
    }

    #[test]
    fn absent_fields_are_not_serialized() {
        let mut record = CanonicalRecord::at(42);
        record.latitude = Some(1.5);
        record.longitude = Some(-2.5);
        let line = serde_json::to_string(&LocationRecord::from(record)).unwrap();
        assert_eq!(line, r#"{"timestamp_ms":42,"latitude":1.5,"longitude":-2.5}"#);
    }
}
