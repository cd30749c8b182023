use std::{collections::HashMap, str::FromStr};

use itertools::Itertools;
use log::{debug, trace};

use crate::{
    record::{Candidate, CanonicalRecord, LocationRecord},
    validator::has_required_fields,
};

/// Duplicate collapse policy
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum DedupPolicy {
    /// Records collapse when they share timestamp and satellite identity
    #[default]
    PerSatellite,
    /// Records collapse when they share a timestamp
    PerTimestamp,
}

impl FromStr for DedupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "per-satellite" => Ok(Self::PerSatellite),
            "per-timestamp" => Ok(Self::PerTimestamp),
            other => Err(format!("unknown dedup policy \"{}\"", other)),
        }
    }
}

/// Physical plausibility bounds, inclusive.
/// Only the fields a record carries are checked.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Plausibility {
    /// Altitude in meters
    pub altitude: (f64, f64),
    pub hdop: (f64, f64),
    pub max_satellites: u32,
    /// Speed in m/s
    pub speed: (f64, f64),
    /// Course in degrees
    pub course: (f64, f64),
}

impl Default for Plausibility {
    fn default() -> Self {
        Self {
            altitude: (-1000.0, 9000.0),
            hdop: (0.0, 50.0),
            max_satellites: 50,
            speed: (0.0, 278.0),
            course: (0.0, 360.0),
        }
    }
}

impl Plausibility {
    /// Returns the first implausible field
    pub fn check(&self, record: &CanonicalRecord) -> Result<(), String> {
        let bounded = |field: &str, value: Option<f64>, (min, max): (f64, f64)| match value {
            Some(v) if !(min..=max).contains(&v) => {
                Err(format!("{} {} not within [{}, {}]", field, v, min, max))
            },
            _ => Ok(()),
        };

        bounded("altitude", record.altitude, self.altitude)?;
        bounded("hdop", record.hdop, self.hdop)?;
        bounded("speed", record.speed, self.speed)?;
        bounded("course", record.course, self.course)?;

        match record.num_satellites {
            Some(n) if n > self.max_satellites => Err(format!(
                "num_satellites {} exceeds {}",
                n, self.max_satellites
            )),
            _ => Ok(()),
        }
    }
}

type Key = (i64, Option<(String, u16)>);

/// [Extractor] reduces validated candidates to the ordered,
/// de-duplicated [LocationRecord] stream.
#[derive(Debug, Clone)]
pub struct Extractor {
    policy: DedupPolicy,
    /// Implausible records are dropped, unless disabled
    plausibility: Option<Plausibility>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(DedupPolicy::default())
    }
}

impl Extractor {
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            policy,
            plausibility: Some(Plausibility::default()),
        }
    }

    /// Replaces the plausibility bounds, None disables the check
    pub fn with_plausibility(mut self, plausibility: Option<Plausibility>) -> Self {
        self.plausibility = plausibility;
        self
    }

    fn key(&self, record: &CanonicalRecord) -> Key {
        match self.policy {
            DedupPolicy::PerTimestamp => (record.timestamp_ms, None),
            DedupPolicy::PerSatellite => (
                record.timestamp_ms,
                record
                    .satellite()
                    .map(|(system, number)| (system.to_string(), number)),
            ),
        }
    }

    /// Quality first, then number of populated fields
    fn score(record: &CanonicalRecord) -> (u8, usize) {
        (record.quality.unwrap_or_default(), record.completeness())
    }

    pub fn extract(&self, candidates: &[Candidate]) -> Vec<LocationRecord> {
        let mut kept = Vec::<CanonicalRecord>::with_capacity(candidates.len());
        let mut index = HashMap::<Key, usize>::with_capacity(candidates.len());
        let mut dropped = 0;

        for record in candidates.iter().filter_map(CanonicalRecord::from_candidate) {
            if !has_required_fields(&record) {
                dropped += 1;
                continue;
            }

            if let Some(plausibility) = &self.plausibility {
                if let Err(reason) = plausibility.check(&record) {
                    trace!("{} - implausible record: {}", record.timestamp_ms, reason);
                    dropped += 1;
                    continue;
                }
            }

            match index.get(&self.key(&record)) {
                Some(&i) => {
                    if Self::score(&record) > Self::score(&kept[i]) {
                        kept[i] = record;
                    }
                    dropped += 1;
                },
                None => {
                    index.insert(self.key(&record), kept.len());
                    kept.push(record);
                },
            }
        }

        debug!(
            "extracted {} records ({} dropped or collapsed)",
            kept.len(),
            dropped
        );

        kept.into_iter()
            .sorted_by_key(|record| record.timestamp_ms)
            .map(LocationRecord::from)
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::validator::Validator;
    use serde_json::json;

    #[test]
    fn ordering_and_collapse() {
        let candidates = vec![
            json!({"timestamp_ms": 3000, "latitude": 1.0, "longitude": 1.0}),
            json!({"timestamp_ms": 1000, "latitude": 2.0, "longitude": 2.0, "quality": 1}),
            json!({"timestamp_ms": 1000, "latitude": 3.0, "longitude": 3.0, "quality": 4}),
            json!({"timestamp_ms": 2000, "latitude": 4.0, "longitude": 4.0, "hdop": 0.8}),
            json!({"timestamp_ms": 2000, "latitude": 5.0, "longitude": 5.0}),
        ];

        let records = Extractor::default().extract(&candidates);
        let summary = records
            .iter()
            .map(|r| (r.timestamp_ms, r.latitude))
            .collect::<Vec<_>>();

        assert_eq!(
            summary,
            vec![(1000, Some(3.0)), (2000, Some(4.0)), (3000, Some(1.0))]
        );
    }

    #[test]
    fn ties_keep_first_occurrence() {
        let candidates = vec![
            json!({"timestamp_ms": 1000, "latitude": 1.0, "longitude": 1.0}),
            json!({"timestamp_ms": 1000, "latitude": 2.0, "longitude": 2.0}),
        ];
        let records = Extractor::default().extract(&candidates);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].latitude, Some(1.0));
    }

    #[test]
    fn satellites_survive_per_satellite_policy() {
        let candidates = vec![
            json!({"timestamp_ms": 1000, "satellite_system": "GPS", "satellite_number": 1,
                "pseudorange": 2.0e7}),
            json!({"timestamp_ms": 1000, "satellite_system": "GPS", "satellite_number": 2,
                "pseudorange": 2.1e7}),
            json!({"timestamp_ms": 1000, "satellite_system": "GPS", "satellite_number": 2,
                "pseudorange": 2.1e7, "doppler": 1.0}),
        ];

        let records = Extractor::default().extract(&candidates);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].doppler, Some(1.0));

        let records = Extractor::new(DedupPolicy::PerTimestamp).extract(&candidates);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].satellite_number, Some(2));
    }

    #[test]
    fn extraction_keeps_records_valid() {
        let candidates = vec![
            json!({"timestamp_ms": "2000", "latitude": "48.1", "longitude": 11.5, "altitude": 500}),
            json!({"timestamp_ms": 1000, "satellite_number": 12, "signal_strength": 40}),
        ];
        assert!(Validator::default().validate(&candidates).is_pass());

        let records = Extractor::default().extract(&candidates);
        let reprojected = records
            .iter()
            .map(|r| serde_json::to_value(r).unwrap())
            .collect::<Vec<_>>();

        assert!(Validator::default().validate(&reprojected).is_pass());
        assert_eq!(records[0].timestamp_ms, 1000);
    }

    #[test]
    fn incomplete_positions_are_dropped() {
        let candidates = vec![
            json!({"timestamp_ms": 1000, "altitude": 12.0}),
            json!({"timestamp_ms": 2000, "latitude": 1.0, "longitude": 1.0}),
        ];
        let records = Extractor::default().extract(&candidates);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp_ms, 2000);
    }

    #[test]
    fn implausible_records_are_dropped() {
        let candidates = vec![
            json!({"timestamp_ms": 1000, "latitude": 1.0, "longitude": 1.0, "course": 720.0}),
            json!({"timestamp_ms": 2000, "latitude": 1.0, "longitude": 1.0, "altitude": 12000.0}),
            json!({"timestamp_ms": 3000, "latitude": 1.0, "longitude": 1.0, "hdop": 99.9}),
            json!({"timestamp_ms": 4000, "latitude": 1.0, "longitude": 1.0, "num_satellites": 64}),
            json!({"timestamp_ms": 5000, "latitude": 1.0, "longitude": 1.0, "speed": 300.0}),
            json!({"timestamp_ms": 6000, "latitude": 1.0, "longitude": 1.0, "altitude": -12.5,
                "hdop": 0.8, "num_satellites": 12, "speed": 3.2, "course": 360.0}),
            json!({"timestamp_ms": 7000, "satellite_system": "GPS", "satellite_number": 3,
                "pseudorange": 2.2e7}),
        ];

        let records = Extractor::default().extract(&candidates);
        let timestamps = records.iter().map(|r| r.timestamp_ms).collect::<Vec<_>>();
        assert_eq!(timestamps, vec![6000, 7000]);

        let records = Extractor::default()
            .with_plausibility(None)
            .extract(&candidates);
        assert_eq!(records.len(), 7);
    }

    #[test]
    fn custom_plausibility_bounds() {
        let aircraft = Plausibility {
            altitude: (-1000.0, 15000.0),
            ..Default::default()
        };

        let record = CanonicalRecord {
            altitude: Some(12000.0),
            ..CanonicalRecord::at(1000)
        };
        assert!(Plausibility::default().check(&record).is_err());
        assert!(aircraft.check(&record).is_ok());

        let record = CanonicalRecord {
            course: Some(720.0),
            ..CanonicalRecord::at(1000)
        };
        assert_eq!(
            aircraft.check(&record),
            Err("course 720 not within [0, 360]".to_string())
        );
    }

    #[test]
    fn policy_from_str() {
        assert_eq!(
            DedupPolicy::from_str("per-timestamp"),
            Ok(DedupPolicy::PerTimestamp)
        );
        assert!(DedupPolicy::from_str("never").is_err());
    }
}
