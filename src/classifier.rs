use std::str::FromStr;

use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use serde::Serialize;

use crate::{input::RawInput, utils::nmea_checksum};

/// Default content sample size, in bytes
pub const DEFAULT_SAMPLE_SIZE: usize = 4096;

/// RINEX header labels (columns 61-80) that fingerprint a RINEX file
const RINEX_LABELS: [&str; 8] = [
    "RINEX VERSION / TYPE",
    "CRINEX VERS   / TYPE",
    "MARKER NAME",
    "# / TYPES OF OBSERV",
    "SYS / # / OBS TYPES",
    "APPROX POSITION XYZ",
    "TIME OF FIRST OBS",
    "END OF HEADER",
];

lazy_static! {
    static ref NMEA_SENTENCE: Regex =
        Regex::new(r"^\$(?P<payload>[A-Z]{2}[A-Z]{3},[^*]*)(\*(?P<cksum>[0-9A-Fa-f]{2}))?")
            .expect("Failed to compile regex");
    static ref RINEX_V2_EXTENSION: Regex =
        Regex::new(r"^\d{2}[od]$").expect("Failed to compile regex");
}

/// Input format class
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Format {
    Rinex,
    Nmea,
    Unknown,
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rinex => write!(f, "RINEX"),
            Self::Nmea => write!(f, "NMEA"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rinex" | "obs" => Ok(Self::Rinex),
            "nmea" => Ok(Self::Nmea),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown format \"{}\"", other)),
        }
    }
}

/// What a [Classification] relied on
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Basis {
    /// Format declared by the caller
    Declared,
    /// Unambiguous header signature
    Signature,
    /// File extension
    Extension,
    /// Content fingerprint over the sample
    Fingerprint,
    /// Extension and content disagree
    Ambiguous,
    /// Nothing recognizable
    Unrecognized,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Classification {
    pub format: Format,
    pub basis: Basis,
}

/// [Classifier] decides the [Format] of a [RawInput].
/// It only reads a bounded prefix and never fails.
#[derive(Debug, Clone)]
pub struct Classifier {
    sample_size: usize,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_SIZE)
    }
}

impl Classifier {
    pub fn new(sample_size: usize) -> Self {
        Self {
            sample_size: sample_size.max(64),
        }
    }

    pub fn classify(&self, raw: &RawInput) -> Classification {
        if let Some(format) = raw.declared_format() {
            return Classification {
                format,
                basis: Basis::Declared,
            };
        }

        let sample = self.sample(raw);

        if let Some(format) = signature(&sample) {
            return Classification {
                format,
                basis: Basis::Signature,
            };
        }

        let by_extension = raw.extension().as_deref().and_then(extension);
        let by_content = fingerprint(&sample);

        debug!(
            "{} - extension: {:?}, fingerprint: {:?}",
            raw.filename(),
            by_extension,
            by_content
        );

        match (by_extension, by_content) {
            (Some(ext), Format::Unknown) => Classification {
                format: ext,
                basis: Basis::Extension,
            },
            (Some(ext), content) if ext == content => Classification {
                format: ext,
                basis: Basis::Extension,
            },
            (Some(ext), content) => {
                warn!(
                    "{} - classification ambiguous: extension says {}, content says {}",
                    raw.filename(),
                    ext,
                    content
                );
                Classification {
                    format: Format::Unknown,
                    basis: Basis::Ambiguous,
                }
            },
            (None, Format::Unknown) => Classification {
                format: Format::Unknown,
                basis: Basis::Unrecognized,
            },
            (None, content) => Classification {
                format: content,
                basis: Basis::Fingerprint,
            },
        }
    }

    /// Bounded text prefix; None for binary looking content
    fn sample(&self, raw: &RawInput) -> Option<String> {
        let bytes = raw.bytes();
        let prefix = &bytes[..bytes.len().min(self.sample_size)];

        if looks_binary(prefix) {
            return None;
        }

        Some(String::from_utf8_lossy(prefix).to_string())
    }
}

/// NUL bytes or more than 10% control characters
fn looks_binary(prefix: &[u8]) -> bool {
    if prefix.contains(&0) {
        return true;
    }

    let controls = prefix
        .iter()
        .filter(|b| **b < 0x20 && !matches!(**b, b'\n' | b'\r' | b'\t'))
        .count();

    controls * 10 > prefix.len()
}

fn signature(sample: &Option<String>) -> Option<Format> {
    let first = sample.as_ref()?.lines().find(|l| !l.trim().is_empty())?;

    if rinex_label(first).is_some_and(|label| {
        label == "RINEX VERSION / TYPE" || label == "CRINEX VERS   / TYPE"
    }) {
        return Some(Format::Rinex);
    }

    if checksum_sentence(first.trim()) {
        return Some(Format::Nmea);
    }

    None
}

fn extension(ext: &str) -> Option<Format> {
    match ext {
        "obs" | "rnx" | "crx" => Some(Format::Rinex),
        "nmea" | "nma" | "nme" | "gps" => Some(Format::Nmea),
        ext if RINEX_V2_EXTENSION.is_match(ext) => Some(Format::Rinex),
        _ => None,
    }
}

fn fingerprint(sample: &Option<String>) -> Format {
    let Some(sample) = sample else {
        return Format::Unknown;
    };

    let lines = sample
        .lines()
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<_>>();

    if lines.is_empty() {
        return Format::Unknown;
    }

    if lines
        .iter()
        .any(|l| rinex_label(l).is_some_and(|label| RINEX_LABELS.contains(&label)))
    {
        return Format::Rinex;
    }

    let sentences = lines
        .iter()
        .filter(|l| NMEA_SENTENCE.is_match(l.trim()))
        .count();

    if sentences > 0 && sentences * 2 >= lines.len() {
        Format::Nmea
    } else {
        Format::Unknown
    }
}

/// RINEX header label, found in columns 61-80
fn rinex_label(line: &str) -> Option<&str> {
    let label = line.get(60..)?.trim();
    if label.is_empty() { None } else { Some(label) }
}

/// NMEA sentence carrying a valid checksum
fn checksum_sentence(line: &str) -> bool {
    let Some(caps) = NMEA_SENTENCE.captures(line) else {
        return false;
    };

    let Some(cksum) = caps.name("cksum") else {
        return false;
    };

    u8::from_str_radix(cksum.as_str(), 16)
        .is_ok_and(|cksum| cksum == nmea_checksum(&caps["payload"]))
}

#[cfg(test)]
mod test {
    use super::*;

    fn raw(name: &str, content: &[u8]) -> RawInput {
        RawInput::from_bytes(name, content.to_vec()).unwrap()
    }

    const RINEX_HEADER: &str =
        "     2.11           OBSERVATION DATA    M (MIXED)           RINEX VERSION / TYPE\n";

    #[test]
    fn rinex_signature() {
        let c = Classifier::default().classify(&raw("anything.txt", RINEX_HEADER.as_bytes()));
        assert_eq!(c.format, Format::Rinex);
        assert_eq!(c.basis, Basis::Signature);
    }

    #[test]
    fn nmea_signature() {
        let content = b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\n";
        let c = Classifier::default().classify(&raw("capture.log", content));
        assert_eq!(c.format, Format::Nmea);
        assert_eq!(c.basis, Basis::Signature);
    }

    #[test]
    fn extension_only() {
        let c = Classifier::default().classify(&raw("ABCD0010.20o", b"garbage"));
        assert_eq!(c.format, Format::Rinex);
        assert_eq!(c.basis, Basis::Extension);

        let c = Classifier::default().classify(&raw("drive.nmea", b""));
        assert_eq!(c.format, Format::Nmea);
    }

    #[test]
    fn fingerprint_without_checksums() {
        let content = b"header line
$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,,M,,
$GPRMC,123519,A
";
        let c = Classifier::default().classify(&raw("capture.log", content));
        assert_eq!(c.format, Format::Nmea);
        assert_eq!(c.basis, Basis::Fingerprint);
    }

    #[test]
    fn ambiguous_routes_to_unknown() {
        let content = b"$GPGGA,1\n$GPGGA,2\n";
        let c = Classifier::default().classify(&raw("station.obs", content));
        assert_eq!(c.format, Format::Unknown);
        assert_eq!(c.basis, Basis::Ambiguous);
    }

    #[test]
    fn binary_is_unknown() {
        let content = [0xb5, 0x62, 0x01, 0x07, 0x00, 0x5c, 0x00, 0x00];
        let c = Classifier::default().classify(&raw("capture.ubx", &content));
        assert_eq!(c.format, Format::Unknown);
        assert_eq!(c.basis, Basis::Unrecognized);
    }

    #[test]
    fn declared_wins() {
        let c = Classifier::default()
            .classify(&raw("capture.ubx", b"").with_declared_format(Some(Format::Nmea)));
        assert_eq!(c.format, Format::Nmea);
        assert_eq!(c.basis, Basis::Declared);
    }

    #[test]
    fn format_from_str() {
        assert_eq!(Format::from_str("RINEX"), Ok(Format::Rinex));
        assert_eq!(Format::from_str(" nmea"), Ok(Format::Nmea));
        assert!(Format::from_str("ubx").is_err());
    }
}
