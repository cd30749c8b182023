use serde::Serialize;
use serde_json::{Map, Value};

use crate::record::{
    CanonicalRecord, Candidate, OBSERVATION_FIELDS, POSITION_FIELDS, as_f64, as_i64,
};

/// Default number of reported violations
pub const DEFAULT_MAX_REPORTED: usize = 20;

/// Fields that must coerce to a floating point number when present
const NUMERIC_FIELDS: [&str; 5] = ["latitude", "longitude", "altitude", "hdop", "speed"];

/// Fields that may not be negative when present
const NON_NEGATIVE_FIELDS: [&str; 3] = ["hdop", "num_satellites", "speed"];

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rule {
    RecordShape,
    RequiredField,
    NumericType,
    Range,
    NonNegative,
    NonEmpty,
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RecordShape => write!(f, "record-shape"),
            Self::RequiredField => write!(f, "required-field"),
            Self::NumericType => write!(f, "numeric-type"),
            Self::Range => write!(f, "range"),
            Self::NonNegative => write!(f, "non-negative"),
            Self::NonEmpty => write!(f, "non-empty"),
        }
    }
}

/// One rule violation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    /// Offending record index, None for set-level rules
    pub index: Option<usize>,
    pub rule: Rule,
    pub field: Option<String>,
    /// Offending value as found
    pub actual: Option<String>,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(index) = self.index {
            write!(f, "record #{}: ", index)?;
        }
        write!(f, "{} rule violated", self.rule)?;
        if let Some(field) = &self.field {
            write!(f, " by \"{}\"", field)?;
        }
        if let Some(actual) = &self.actual {
            write!(f, " (actual: {})", actual)?;
        }
        Ok(())
    }
}

/// First violations of a failed validation, and their total count
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
    pub total: usize,
    pub records: usize,
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} violation(s) over {} record(s)",
            self.total, self.records
        )?;
        for violation in self.violations.iter() {
            write!(f, "\n- {}", violation)?;
        }
        let hidden = self.total.saturating_sub(self.violations.len());
        if hidden > 0 {
            write!(f, "\n- ... and {} more", hidden)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Pass,
    Fail(ValidationReport),
}

impl Validation {
    #[cfg(test)]
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// [Validator] gates every candidate record set. One violating record
/// fails the whole set.
#[derive(Debug, Clone)]
pub struct Validator {
    max_reported: usize,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REPORTED)
    }
}

impl Validator {
    pub fn new(max_reported: usize) -> Self {
        Self {
            max_reported: max_reported.max(1),
        }
    }

    pub fn validate(&self, candidates: &[Candidate]) -> Validation {
        let mut report = ValidationReport {
            records: candidates.len(),
            ..Default::default()
        };

        let mut push = |violation: Violation| {
            if report.violations.len() < self.max_reported {
                report.violations.push(violation);
            }
            report.total += 1;
        };

        if candidates.is_empty() {
            push(Violation {
                index: None,
                rule: Rule::NonEmpty,
                field: None,
                actual: Some("0 records".to_string()),
            });
        }

        for (index, candidate) in candidates.iter().enumerate() {
            check(index, candidate, &mut push);
        }

        if report.total == 0 {
            Validation::Pass
        } else {
            Validation::Fail(report)
        }
    }
}

/// Required field rule, on a typed record
pub fn has_required_fields(record: &CanonicalRecord) -> bool {
    !record.is_position_bearing() || (record.latitude.is_some() && record.longitude.is_some())
}

fn present<'a>(map: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    map.get(field).filter(|value| !value.is_null())
}

fn check(index: usize, candidate: &Candidate, push: &mut impl FnMut(Violation)) {
    let violation = |rule: Rule, field: &str, actual: Option<&Value>| Violation {
        index: Some(index),
        rule,
        field: Some(field.to_string()),
        actual: actual.map(|value| value.to_string()),
    };

    let Some(map) = candidate.as_object() else {
        push(Violation {
            index: Some(index),
            rule: Rule::RecordShape,
            field: None,
            actual: Some(truncate(&candidate.to_string(), 64)),
        });
        return;
    };

    match present(map, "timestamp_ms") {
        None => push(violation(Rule::RequiredField, "timestamp_ms", None)),
        Some(value) => {
            if as_i64(value).is_none() {
                push(violation(Rule::NumericType, "timestamp_ms", Some(value)));
            }
        },
    }

    let position = POSITION_FIELDS
        .iter()
        .any(|field| present(map, field).is_some());

    let observation = OBSERVATION_FIELDS
        .iter()
        .any(|field| present(map, field).is_some());

    if position || !observation {
        for field in ["latitude", "longitude"] {
            if present(map, field).is_none() {
                push(violation(Rule::RequiredField, field, None));
            }
        }
    }

    for field in NUMERIC_FIELDS {
        if let Some(value) = present(map, field) {
            if as_f64(value).is_none() {
                push(violation(Rule::NumericType, field, Some(value)));
            }
        }
    }

    for (field, limit) in [("latitude", 90.0), ("longitude", 180.0)] {
        if let Some(value) = present(map, field) {
            if as_f64(value).is_some_and(|v| !(-limit..=limit).contains(&v)) {
                push(violation(Rule::Range, field, Some(value)));
            }
        }
    }

    for field in NON_NEGATIVE_FIELDS {
        if let Some(value) = present(map, field) {
            if as_f64(value).is_some_and(|v| v < 0.0) {
                push(violation(Rule::NonNegative, field, Some(value)));
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut truncated = s.chars().take(max).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}
