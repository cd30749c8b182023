use std::collections::BTreeMap;

use hifitime::prelude::TimeScale;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use crate::{
    converter::ConversionStrategy,
    error::ConversionError,
    input::RawInput,
    record::{Candidate, CanonicalRecord},
    utils::{
        DAY_MS, KNOTS_TO_MPS, constellation_name, full_year, nmea_checksum, nmea_to_decimal,
        talker_to_constellation, unix_ms,
    },
};

use gnss::prelude::Constellation;

/// Reported skipped lines, at most
const MAX_REPORTED_ISSUES: usize = 10;

lazy_static! {
    static ref SENTENCE: Regex = Regex::new(
        r"^\$(?P<payload>(?P<talker>[A-Z]{2})(?P<kind>[A-Z]{3}),(?P<data>[^*]*?))(\*(?P<cksum>[0-9A-Fa-f]{2}))?(,(?P<host>\d{10,}))?\s*$"
    )
    .expect("Failed to compile regex");
}

/// One checked NMEA sentence
#[derive(Debug)]
struct Sentence<'a> {
    talker: &'a str,
    kind: &'a str,
    fields: Vec<&'a str>,
    /// Host (logger) timestamp suffix, in ms
    host_ms: Option<i64>,
}

impl<'a> Sentence<'a> {
    fn parse(line: &'a str) -> Result<Self, String> {
        let caps = SENTENCE
            .captures(line)
            .ok_or_else(|| "not an NMEA sentence".to_string())?;

        if let Some(cksum) = caps.name("cksum") {
            let expected = u8::from_str_radix(cksum.as_str(), 16)
                .map_err(|_| "invalid checksum".to_string())?;

            let computed = nmea_checksum(caps.name("payload").map_or("", |m| m.as_str()));

            if expected != computed {
                return Err(format!(
                    "checksum mismatch (expected {:02X}, computed {:02X})",
                    expected, computed
                ));
            }
        }

        let capture = |name: &str| caps.name(name).map_or("", |m| m.as_str());

        Ok(Self {
            talker: capture("talker"),
            kind: capture("kind"),
            fields: capture("data").split(',').collect(),
            host_ms: caps.name("host").and_then(|m| m.as_str().parse::<i64>().ok()),
        })
    }

    /// Trimmed field, empty when absent
    fn field(&self, index: usize) -> &'a str {
        self.fields.get(index).map_or("", |f| f.trim())
    }

    fn float(&self, index: usize) -> Option<f64> {
        self.field(index).parse::<f64>().ok().filter(|v| v.is_finite())
    }

    fn int<T: std::str::FromStr>(&self, index: usize) -> Option<T> {
        self.field(index).parse::<T>().ok()
    }
}

/// Tracks the current date while sentences only carry a time of day.
#[derive(Debug, Default)]
struct Clock {
    /// UNIX time of current day start, in ms
    day_start_ms: i64,
    /// Latest time of day, in ms
    last_tod_ms: Option<i64>,
    /// Latest resolved timestamp
    latest: Option<i64>,
}

impl Clock {
    fn set_day(&mut self, day_start_ms: i64) {
        if day_start_ms != self.day_start_ms {
            self.day_start_ms = day_start_ms;
            self.last_tod_ms = None;
        }
    }

    /// Resolves a time of day, detecting midnight rollovers
    fn resolve(&mut self, tod_ms: i64) -> i64 {
        if let Some(last) = self.last_tod_ms {
            if last - tod_ms > DAY_MS / 2 {
                self.day_start_ms += DAY_MS;
            }
        }
        self.last_tod_ms = Some(tod_ms);
        let t = self.day_start_ms + tod_ms;
        self.latest = Some(t);
        t
    }

    /// Host timestamps bypass the time of day logic
    fn latch(&mut self, t: i64) -> i64 {
        self.latest = Some(t);
        t
    }
}

/// `hhmmss(.sss)` to ms within the day
fn time_of_day(field: &str) -> Option<i64> {
    let hh = field.get(0..2)?.parse::<i64>().ok()?;
    let mm = field.get(2..4)?.parse::<i64>().ok()?;
    let ss = field.get(4..)?.parse::<f64>().ok()?;

    if hh > 23 || mm > 59 || !(0.0..61.0).contains(&ss) {
        return None;
    }

    Some((hh * 3600 + mm * 60) * 1000 + (ss * 1000.0).round() as i64)
}

/// `ddmmyy` to UNIX time of that day start, in ms
fn rmc_day(field: &str) -> Option<i64> {
    let dd = field.get(0..2)?.parse::<u8>().ok()?;
    let mm = field.get(2..4)?.parse::<u8>().ok()?;
    let yy = field.get(4..6)?.parse::<i32>().ok()?;
    unix_ms(full_year(yy), mm, dd, 0, 0, 0.0, TimeScale::UTC).ok()
}

/// ZDA day, month, year fields to UNIX time of that day start, in ms
fn zda_day(sentence: &Sentence) -> Option<i64> {
    let dd = sentence.int::<u8>(1)?;
    let mm = sentence.int::<u8>(2)?;
    let yyyy = sentence.int::<i32>(3)?;
    unix_ms(yyyy, mm, dd, 0, 0, 0.0, TimeScale::UTC).ok()
}

/// GNS mode indicator to GGA like quality code
fn gns_quality(mode: &str) -> Option<u8> {
    match mode.chars().next()? {
        'N' => Some(0),
        'A' => Some(1),
        'D' => Some(2),
        'P' => Some(3),
        'R' => Some(4),
        'F' => Some(5),
        'E' => Some(6),
        'M' => Some(7),
        'S' => Some(8),
        _ => None,
    }
}

#[derive(Debug, Default)]
struct Statistics {
    lines: usize,
    sentences: BTreeMap<String, usize>,
    skipped: usize,
    issues: Vec<(usize, String)>,
}

impl Statistics {
    fn skip(&mut self, line: usize, reason: String) {
        self.skipped += 1;
        if self.issues.len() < MAX_REPORTED_ISSUES {
            self.issues.push((line, reason));
        }
    }

    fn summary(&self) -> String {
        let mut summary = format!(
            "{} line(s) read, {} skipped, no position fix or satellite observation found",
            self.lines, self.skipped
        );
        for (line, reason) in self.issues.iter() {
            summary.push_str(&format!("\nline {}: {}", line, reason));
        }
        summary
    }
}

/// Sentence based NMEA converter. Recognizes GGA, GNS, RMC and GSV
/// (ZDA only contributes the date). Malformed sentences are skipped.
#[derive(Debug, Default, Copy, Clone)]
pub struct NmeaConverter;

impl NmeaConverter {
    /// First date found anywhere in the content, as day start in ms
    fn first_day(text: &str) -> Option<i64> {
        text.lines().find_map(|line| {
            let sentence = Sentence::parse(line.trim()).ok()?;
            match sentence.kind {
                "RMC" => rmc_day(sentence.field(8)),
                "ZDA" => zda_day(&sentence),
                _ => None,
            }
        })
    }

    /// Fix sentence (GGA, GNS, RMC) to timestamp and optional position record.
    /// None means the sentence is valid but has no fix.
    fn fix(
        sentence: &Sentence,
        clock: &mut Clock,
    ) -> Result<(i64, Option<CanonicalRecord>), String> {
        let tod = time_of_day(sentence.field(0));

        if sentence.kind == "RMC" {
            if let Some(day) = rmc_day(sentence.field(8)) {
                clock.set_day(day);
            }
        }

        let t = match (sentence.host_ms, tod) {
            (Some(host), _) => clock.latch(host),
            (None, Some(tod)) => clock.resolve(tod),
            (None, None) => return Err(format!("invalid time \"{}\"", sentence.field(0))),
        };

        // coordinates field offset
        let (offset, void) = match sentence.kind {
            "RMC" => (2, sentence.field(1) == "V"),
            "GNS" => (1, sentence.field(5).starts_with('N')),
            _ => (1, false),
        };

        let (lat, lon) = (sentence.field(offset), sentence.field(offset + 2));

        if void || (lat.is_empty() && lon.is_empty()) {
            return Ok((t, None));
        }

        let latitude = nmea_to_decimal(lat, sentence.field(offset + 1))
            .ok_or_else(|| format!("invalid latitude \"{}\"", lat))?;

        let longitude = nmea_to_decimal(lon, sentence.field(offset + 3))
            .ok_or_else(|| format!("invalid longitude \"{}\"", lon))?;

        if !(-90.0..=90.0).contains(&latitude) {
            return Err(format!("latitude out of range \"{}\"", lat));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(format!("longitude out of range \"{}\"", lon));
        }

        let mut record = CanonicalRecord::at(t);
        record.latitude = Some(latitude);
        record.longitude = Some(longitude);

        match sentence.kind {
            "RMC" => {
                record.speed = sentence.float(6).map(|knots| knots * KNOTS_TO_MPS);
                record.course = sentence.float(7);
            },
            "GNS" => {
                record.quality = gns_quality(sentence.field(5));
                record.num_satellites = sentence.int(6);
                record.hdop = sentence.float(7);
                record.altitude = sentence.float(8);
            },
            _ => {
                record.quality = sentence.int(5);
                record.num_satellites = sentence.int(6);
                record.hdop = sentence.float(7);
                record.altitude = sentence.float(8);
            },
        }

        Ok((t, Some(record)))
    }

    /// GSV sentence to one record per tracked satellite
    fn satellites(sentence: &Sentence, t: i64) -> Vec<CanonicalRecord> {
        let constellation = talker_to_constellation(sentence.talker);

        sentence
            .fields
            .get(3..)
            .unwrap_or_default()
            .chunks(4)
            .filter(|group| group.len() == 4)
            .filter_map(|group| {
                let mut prn = group[0].trim().parse::<u16>().ok()?;
                let snr = group[3].trim().parse::<f64>().ok()?;

                if constellation == Some(Constellation::Glonass) && prn > 64 {
                    prn -= 64;
                }

                let mut record = CanonicalRecord::at(t);
                record.satellite_system = constellation.map(|c| constellation_name(c).to_string());
                record.satellite_number = Some(prn);
                record.signal_strength = Some(snr);
                Some(record)
            })
            .collect()
    }
}

impl ConversionStrategy for NmeaConverter {
    fn name(&self) -> &'static str {
        "NMEA"
    }

    fn convert(&self, raw: &RawInput) -> Result<Vec<Candidate>, ConversionError> {
        let text = raw.text();

        let mut clock = Clock::default();
        if let Some(day) = Self::first_day(text) {
            clock.set_day(day);
        }

        let mut stats = Statistics::default();
        let mut records = Vec::<CanonicalRecord>::new();
        let mut pending: Option<CanonicalRecord> = None;

        for (index, line) in text.lines().enumerate() {
            let line_number = index + 1;
            let line = line.trim();

            if line.is_empty() {
                continue;
            }

            stats.lines += 1;

            let sentence = match Sentence::parse(line) {
                Ok(sentence) => sentence,
                Err(reason) => {
                    stats.skip(line_number, reason);
                    continue;
                },
            };

            *stats.sentences.entry(sentence.kind.to_string()).or_default() += 1;

            match sentence.kind {
                "GGA" | "GNS" | "RMC" => match Self::fix(&sentence, &mut clock) {
                    Ok((_, Some(record))) => match pending.as_mut() {
                        Some(current) if current.timestamp_ms == record.timestamp_ms => {
                            current.merge(record);
                        },
                        _ => {
                            if let Some(done) = pending.replace(record) {
                                records.push(done);
                            }
                        },
                    },
                    Ok((_, None)) => {},
                    Err(reason) => stats.skip(line_number, reason),
                },
                "GSV" => match clock.latest {
                    Some(t) => records.extend(Self::satellites(&sentence, t)),
                    None => stats.skip(
                        line_number,
                        "satellites in view before any timed sentence".to_string(),
                    ),
                },
                "ZDA" => {
                    if let Some(day) = zda_day(&sentence) {
                        clock.set_day(day);
                    }
                },
                _ => {},
            }
        }

        if let Some(done) = pending.take() {
            records.push(done);
        }

        debug!(
            "{} - {} lines, sentences: {:?}, skipped: {}",
            raw.filename(),
            stats.lines,
            stats.sentences,
            stats.skipped
        );

        if records.is_empty() {
            return Err(ConversionError::Empty(stats.summary()));
        }

        Ok(records.iter().map(|r| r.to_candidate()).collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::record::CanonicalRecord;
    use crate::validator::Validator;

    fn sentence(payload: &str) -> String {
        format!("${}*{:02X}", payload, nmea_checksum(payload))
    }

    fn convert(content: &str) -> Result<Vec<CanonicalRecord>, ConversionError> {
        let raw = RawInput::from_bytes("test.nmea", content.as_bytes().to_vec()).unwrap();
        NmeaConverter.convert(&raw).map(|candidates| {
            candidates
                .iter()
                .filter_map(CanonicalRecord::from_candidate)
                .collect()
        })
    }

    #[test]
    fn gga_scenario() {
        let records =
            convert("$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\n")
                .unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!((record.latitude.unwrap() - 48.1173).abs() < 1.0E-4);
        assert!((record.longitude.unwrap() - 11.516_666).abs() < 1.0E-4);
        assert_eq!(record.altitude, Some(545.4));
        assert_eq!(record.num_satellites, Some(8));
        assert_eq!(record.hdop, Some(0.9));
        assert_eq!(record.quality, Some(1));
        // no date in the file: time of day on 1970-01-01
        assert_eq!(record.timestamp_ms, 45_319_000);
    }

    #[test]
    fn rmc_date_and_fold() {
        let content = [
            sentence("GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W"),
            sentence("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,"),
            sentence("GPGGA,123520,4807.040,N,01131.002,E,1,08,0.9,545.6,M,46.9,M,,"),
        ]
        .join("\r\n");

        let records = convert(&content).unwrap();
        assert_eq!(records.len(), 2);

        let day = unix_ms(1994, 3, 23, 0, 0, 0.0, TimeScale::UTC).unwrap();
        assert_eq!(records[0].timestamp_ms, day + 45_319_000);
        assert_eq!(records[1].timestamp_ms, day + 45_320_000);

        // RMC and GGA of the same fix fold together
        assert_eq!(records[0].quality, Some(1));
        assert!((records[0].speed.unwrap() - 22.4 * KNOTS_TO_MPS).abs() < 1.0E-9);
        assert_eq!(records[0].course, Some(84.4));
        assert_eq!(records[1].speed, None);
    }

    #[test]
    fn bad_sentences_are_skipped() {
        let content = [
            "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*48".to_string(),
            "garbage".to_string(),
            sentence("GPGGA,123521,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,"),
        ]
        .join("\n");

        let records = convert(&content).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp_ms, 45_321_000);
    }

    #[test]
    fn out_of_range_coordinates_are_skipped() {
        let content = [
            sentence("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,"),
            sentence("GPGGA,123520,9507.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,"),
            sentence("GPGGA,123521,4807.038,N,18131.000,E,1,08,0.9,545.4,M,46.9,M,,"),
            sentence("GPGGA,123522,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,"),
        ]
        .join("\n");

        let raw = RawInput::from_bytes("test.nmea", content.into_bytes()).unwrap();
        let candidates = NmeaConverter.convert(&raw).unwrap();
        assert_eq!(candidates.len(), 2);
        assert!(Validator::default().validate(&candidates).is_pass());

        let timestamps = candidates
            .iter()
            .filter_map(CanonicalRecord::from_candidate)
            .map(|r| r.timestamp_ms)
            .collect::<Vec<_>>();
        assert_eq!(timestamps, vec![45_319_000, 45_322_000]);
    }

    #[test]
    fn gsv_before_any_time_is_skipped() {
        let content = [
            sentence("GPGSV,1,1,01,12,40,083,46"),
            sentence("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,"),
            sentence("GPGSV,1,1,01,24,10,300,41"),
        ]
        .join("\n");

        let records = convert(&content).unwrap();
        assert_eq!(records.len(), 2);

        let sats = records.iter().filter_map(|r| r.satellite()).collect::<Vec<_>>();
        assert_eq!(sats, vec![("GPS", 24)]);
        assert!(records.iter().all(|r| r.timestamp_ms == 45_319_000));

        let only_gsv = sentence("GPGSV,1,1,01,12,40,083,46");
        match convert(&only_gsv) {
            Err(ConversionError::Empty(summary)) => {
                assert!(summary.contains("line 1: satellites in view before any timed sentence"));
            },
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn host_timestamp_without_checksum() {
        let content =
            "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,,1700000000123\n";
        let records = convert(content).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp_ms, 1_700_000_000_123);
        assert_eq!(records[0].altitude, Some(545.4));
    }

    #[test]
    fn nothing_usable() {
        let content = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*48\nhello\n";
        match convert(content) {
            Err(ConversionError::Empty(summary)) => {
                assert!(summary.contains("line 1: checksum mismatch"));
                assert!(summary.contains("line 2: not an NMEA sentence"));
            },
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn host_timestamp_suffix() {
        let content = format!(
            "{},1700000000123\n",
            sentence("GNGGA,123519,4807.038,S,01131.000,W,2,12,0.7,10.0,M,46.9,M,,")
        );
        let records = convert(&content).unwrap();
        assert_eq!(records[0].timestamp_ms, 1_700_000_000_123);
        assert!(records[0].latitude.unwrap() < 0.0);
        assert!(records[0].longitude.unwrap() < 0.0);
        assert_eq!(records[0].quality, Some(2));
    }

    #[test]
    fn gns_and_gsv() {
        let content = [
            sentence("GNGNS,000001,4807.038,N,01131.000,E,AN,10,1.1,500.0,46.9,,"),
            sentence("GPGSV,1,1,02,12,40,083,46,24,10,300,"),
            sentence("GLGSV,1,1,01,70,40,083,38"),
        ]
        .join("\n");

        let records = convert(&content).unwrap();
        assert_eq!(records.len(), 3);

        let fix = records.iter().find(|r| r.latitude.is_some()).unwrap();
        assert_eq!(fix.quality, Some(1));
        assert_eq!(fix.num_satellites, Some(10));

        let sats = records
            .iter()
            .filter_map(|r| r.satellite())
            .map(|(sys, prn)| (sys.to_string(), prn))
            .collect::<Vec<_>>();
        assert_eq!(sats, vec![("GPS".to_string(), 12), ("GLONASS".to_string(), 6)]);

        assert!(records.iter().all(|r| r.timestamp_ms == 1_000));
    }

    #[test]
    fn midnight_rollover() {
        let content = [
            sentence("GPGGA,235959,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,"),
            sentence("GPGGA,000000,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,"),
        ]
        .join("\n");

        let records = convert(&content).unwrap();
        assert_eq!(records[1].timestamp_ms - records[0].timestamp_ms, 1_000);
    }

    #[test]
    fn output_passes_validation() {
        let content = [
            sentence("GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W"),
            sentence("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,"),
            sentence("GPGSV,1,1,01,12,40,083,46"),
            sentence("GPGGA,123520,,,,,0,00,,,M,,M,,"),
        ]
        .join("\n");

        let raw = RawInput::from_bytes("test.nmea", content.into_bytes()).unwrap();
        let candidates = NmeaConverter.convert(&raw).unwrap();
        assert!(Validator::default().validate(&candidates).is_pass());
    }
}
