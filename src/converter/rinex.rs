use std::{collections::HashMap, str::FromStr};

use hifitime::prelude::TimeScale;
use log::debug;

use crate::{
    converter::ConversionStrategy,
    error::ConversionError,
    input::RawInput,
    record::{Candidate, CanonicalRecord},
    utils::{constellation_name, full_year, time_system_to_timescale, unix_ms},
};

use gnss::prelude::SV;

/// Observations per line, in V2 files
const V2_OBS_PER_LINE: usize = 5;

/// Satellites per epoch line, in V2 files
const V2_SATS_PER_LINE: usize = 12;

/// Width of one observation (value, LLI, SSI)
const OBS_WIDTH: usize = 16;

/// Width of one observation value
const VALUE_WIDTH: usize = 14;

/// Trimmed content of columns [start, end), empty when out of range
fn col(line: &str, start: usize, end: usize) -> &str {
    line.get(start..end.min(line.len())).map_or("", str::trim)
}

fn line_error(line: usize, reason: impl Into<String>) -> ConversionError {
    ConversionError::Line {
        line,
        reason: reason.into(),
    }
}

fn parse<T: FromStr>(line: usize, field: &str, what: &str) -> Result<T, ConversionError> {
    field
        .parse::<T>()
        .map_err(|_| line_error(line, format!("invalid {} \"{}\"", what, field)))
}

/// Kind of observable, from the first letter of its code
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
enum Observable {
    Pseudorange,
    CarrierPhase,
    Doppler,
    SignalStrength,
}

impl Observable {
    fn from_code(code: &str) -> Option<Self> {
        match code.chars().next()? {
            'C' | 'P' => Some(Self::Pseudorange),
            'L' => Some(Self::CarrierPhase),
            'D' => Some(Self::Doppler),
            'S' => Some(Self::SignalStrength),
            _ => None,
        }
    }
}

/// Observation code indexes to consider, per [Observable], by order of preference:
/// first frequency band first, then header order.
#[derive(Debug, Default, Clone)]
struct Selection(HashMap<Observable, Vec<usize>>);

impl Selection {
    fn new(codes: &[String]) -> Self {
        let mut selection = HashMap::<Observable, Vec<usize>>::new();

        let mut indexes = (0..codes.len()).collect::<Vec<_>>();
        indexes.sort_by_key(|i| codes[*i].chars().nth(1) != Some('1'));

        for index in indexes {
            if let Some(observable) = Observable::from_code(&codes[index]) {
                selection.entry(observable).or_default().push(index);
            }
        }

        Self(selection)
    }

    fn pick(&self, observable: Observable, values: &[Option<f64>]) -> Option<f64> {
        self.0
            .get(&observable)?
            .iter()
            .find_map(|i| values.get(*i).copied().flatten())
    }
}

#[derive(Debug)]
struct Header {
    /// Major revision
    major: u8,
    timescale: TimeScale,
    /// Observation codes, V2 files declare one set for all systems
    common: Vec<String>,
    per_system: HashMap<char, Vec<String>>,
}

impl Header {
    fn codes(&self, system: char) -> &[String] {
        self.per_system
            .get(&system)
            .map_or(self.common.as_slice(), Vec::as_slice)
    }

    fn parse<'a>(
        lines: &mut impl Iterator<Item = (usize, &'a str)>,
    ) -> Result<Self, ConversionError> {
        let mut major = Option::<u8>::None;
        let mut file_system = ' ';
        let mut timescale = Option::<TimeScale>::None;
        let mut common = Vec::<String>::new();
        let mut per_system = HashMap::<char, Vec<String>>::new();

        // pending (system, remaining codes) for continuation lines
        let mut pending = (' ', 0_usize);
        let mut last = 0;

        for (number, line) in lines.by_ref() {
            last = number;
            let label = col(line, 60, line.len());

            match label {
                "RINEX VERSION / TYPE" => {
                    let version = parse::<f64>(number, col(line, 0, 9), "version")?;
                    let kind = col(line, 20, 21);

                    if kind != "O" {
                        return Err(ConversionError::Unsupported(format!(
                            "RINEX type \"{}\" not supported: observation data only",
                            kind
                        )));
                    }

                    let revision = version.trunc() as u8;
                    if !(2..=4).contains(&revision) {
                        return Err(ConversionError::Unsupported(format!(
                            "RINEX V{} not supported",
                            version
                        )));
                    }

                    major = Some(revision);
                    file_system = line.chars().nth(40).unwrap_or(' ');
                },
                "CRINEX VERS   / TYPE" => {
                    return Err(ConversionError::Unsupported(
                        "compact RINEX not supported".to_string(),
                    ));
                },
                "# / TYPES OF OBSERV" => {
                    let count = col(line, 0, 6);
                    if !count.is_empty() {
                        pending = (' ', parse::<usize>(number, count, "observation count")?);
                    }
                    for i in 0..9 {
                        let code = col(line, 6 + 6 * i, 12 + 6 * i);
                        if !code.is_empty() && pending.1 > 0 {
                            common.push(code.to_string());
                            pending.1 -= 1;
                        }
                    }
                },
                "SYS / # / OBS TYPES" => {
                    let system = line.chars().next().unwrap_or(' ');
                    if system != ' ' {
                        let count = parse::<usize>(number, col(line, 3, 6), "observation count")?;
                        pending = (system, count);
                    }
                    for i in 0..13 {
                        let code = col(line, 7 + 4 * i, 10 + 4 * i);
                        if !code.is_empty() && pending.1 > 0 {
                            per_system
                                .entry(pending.0)
                                .or_default()
                                .push(code.to_string());
                            pending.1 -= 1;
                        }
                    }
                },
                "TIME OF FIRST OBS" => {
                    let system = col(line, 48, 51);
                    if !system.is_empty() {
                        timescale = Some(time_system_to_timescale(system));
                    }
                },
                "END OF HEADER" => {
                    let major = major.ok_or_else(|| {
                        line_error(number, "missing \"RINEX VERSION / TYPE\" header")
                    })?;

                    if common.is_empty() && per_system.is_empty() {
                        return Err(line_error(number, "no observation types declared"));
                    }

                    let timescale = timescale.unwrap_or(match file_system {
                        'R' => TimeScale::UTC,
                        'E' => TimeScale::GST,
                        'C' => TimeScale::BDT,
                        _ => TimeScale::GPST,
                    });

                    return Ok(Self {
                        major,
                        timescale,
                        common,
                        per_system,
                    });
                },
                _ => {},
            }
        }

        Err(line_error(last, "missing \"END OF HEADER\""))
    }
}

/// Epoch description line
#[derive(Debug)]
struct EpochLine {
    flag: u8,
    count: usize,
    timestamp_ms: Option<i64>,
}

/// RINEX observation converter (V2, V3 and V4 layouts).
/// Each satellite observed at each epoch becomes one record.
#[derive(Debug, Default, Copy, Clone)]
pub struct RinexConverter;

impl RinexConverter {
    fn timestamp(
        number: usize,
        fields: [&str; 6],
        timescale: TimeScale,
    ) -> Result<i64, ConversionError> {
        let [year, month, day, hour, minute, seconds] = fields;

        let year = full_year(parse::<i32>(number, year, "year")?);
        let month = parse::<u8>(number, month, "month")?;
        let day = parse::<u8>(number, day, "day")?;
        let hour = parse::<u8>(number, hour, "hour")?;
        let minute = parse::<u8>(number, minute, "minute")?;
        let seconds = parse::<f64>(number, seconds, "seconds")?;

        unix_ms(year, month, day, hour, minute, seconds, timescale)
            .map_err(|e| line_error(number, format!("invalid epoch: {}", e)))
    }

    /// Parses an epoch line. Event epochs (flags 2 to 5) carry no timestamp.
    fn epoch_line(
        number: usize,
        line: &str,
        header: &Header,
    ) -> Result<EpochLine, ConversionError> {
        let (flag, count, fields) = if header.major == 2 {
            (
                col(line, 26, 29),
                col(line, 29, 32),
                [
                    col(line, 0, 3),
                    col(line, 3, 6),
                    col(line, 6, 9),
                    col(line, 9, 12),
                    col(line, 12, 15),
                    col(line, 15, 26),
                ],
            )
        } else {
            if !line.starts_with('>') {
                return Err(line_error(number, "expecting an epoch record"));
            }
            (
                col(line, 31, 32),
                col(line, 32, 35),
                [
                    col(line, 2, 6),
                    col(line, 7, 9),
                    col(line, 10, 12),
                    col(line, 13, 15),
                    col(line, 16, 18),
                    col(line, 18, 29),
                ],
            )
        };

        let flag = if flag.is_empty() {
            0
        } else {
            parse::<u8>(number, flag, "epoch flag")?
        };

        let count = parse::<usize>(number, count, "satellite count")?;

        let timestamp_ms = if (2..=5).contains(&flag) {
            None
        } else {
            Some(Self::timestamp(number, fields, header.timescale)?)
        };

        Ok(EpochLine {
            flag,
            count,
            timestamp_ms,
        })
    }

    fn next_line<'a>(
        lines: &mut impl Iterator<Item = (usize, &'a str)>,
        after: usize,
    ) -> Result<(usize, &'a str), ConversionError> {
        lines
            .next()
            .ok_or_else(|| line_error(after, "unexpected end of file within epoch"))
    }

    fn value(number: usize, line: &str, start: usize) -> Result<Option<f64>, ConversionError> {
        let field = col(line, start, start + VALUE_WIDTH);
        if field.is_empty() {
            Ok(None)
        } else {
            parse::<f64>(number, field, "observation").map(Some)
        }
    }

    fn satellite(number: usize, id: &str) -> Result<SV, ConversionError> {
        let system = id.chars().next().filter(|c| *c != ' ').unwrap_or('G');
        let prn = parse::<u8>(number, id.get(1..).unwrap_or("").trim(), "satellite")?;

        SV::from_str(&format!("{}{:02}", system, prn))
            .map_err(|_| line_error(number, format!("invalid satellite \"{}\"", id)))
    }

    fn record(
        timestamp_ms: i64,
        sv: SV,
        values: &[Option<f64>],
        selection: &Selection,
    ) -> Option<CanonicalRecord> {
        let mut record = CanonicalRecord::at(timestamp_ms);
        record.pseudorange = selection.pick(Observable::Pseudorange, values);
        record.carrier_phase = selection.pick(Observable::CarrierPhase, values);
        record.doppler = selection.pick(Observable::Doppler, values);
        record.signal_strength = selection.pick(Observable::SignalStrength, values);

        if record.pseudorange.is_none()
            && record.carrier_phase.is_none()
            && record.doppler.is_none()
            && record.signal_strength.is_none()
        {
            return None;
        }

        record.satellite_system = Some(constellation_name(sv.constellation).to_string());
        record.satellite_number = Some(sv.prn as u16);
        Some(record)
    }

    /// V2 epoch body: satellite list (continued every 12 satellites),
    /// then observations wrapped every 5 values.
    fn v2_epoch<'a>(
        number: usize,
        line: &str,
        epoch: &EpochLine,
        header: &Header,
        selection: &Selection,
        lines: &mut impl Iterator<Item = (usize, &'a str)>,
        records: &mut Vec<CanonicalRecord>,
    ) -> Result<(), ConversionError> {
        let mut satellites = Vec::with_capacity(epoch.count);
        let (mut number, mut line) = (number, line.to_string());

        loop {
            for i in 0..V2_SATS_PER_LINE {
                if satellites.len() == epoch.count {
                    break;
                }
                let start = 32 + 3 * i;
                let id = line.get(start..(start + 3).min(line.len())).unwrap_or("");
                if id.trim().is_empty() {
                    return Err(line_error(number, "missing satellite in epoch record"));
                }
                satellites.push(Self::satellite(number, id)?);
            }
            if satellites.len() == epoch.count {
                break;
            }
            let (n, l) = Self::next_line(lines, number)?;
            number = n;
            line = l.to_string();
        }

        let nobs = header.common.len();
        let rows = nobs.div_ceil(V2_OBS_PER_LINE);

        for sv in satellites {
            let mut values = Vec::with_capacity(nobs);

            for _ in 0..rows {
                let (n, l) = Self::next_line(lines, number)?;
                number = n;
                for k in 0..V2_OBS_PER_LINE {
                    if values.len() == nobs {
                        break;
                    }
                    values.push(Self::value(n, l, k * OBS_WIDTH)?);
                }
            }

            if let Some(t) = epoch.timestamp_ms.filter(|_| epoch.flag < 2) {
                records.extend(Self::record(t, sv, &values, selection));
            }
        }

        Ok(())
    }

    /// V3/V4 epoch body: one line per satellite
    fn v3_epoch<'a>(
        number: usize,
        epoch: &EpochLine,
        header: &Header,
        selections: &HashMap<char, Selection>,
        lines: &mut impl Iterator<Item = (usize, &'a str)>,
        records: &mut Vec<CanonicalRecord>,
    ) -> Result<(), ConversionError> {
        let mut number = number;

        for _ in 0..epoch.count {
            let (n, line) = Self::next_line(lines, number)?;
            number = n;

            let sv = Self::satellite(n, line.get(0..3).unwrap_or(line))?;
            let system = line.chars().next().unwrap_or('G');
            let nobs = header.codes(system).len();

            let values = (0..nobs)
                .map(|k| Self::value(n, line, 3 + k * OBS_WIDTH))
                .collect::<Result<Vec<_>, _>>()?;

            let Some(selection) = selections.get(&system) else {
                continue;
            };

            if let Some(t) = epoch.timestamp_ms.filter(|_| epoch.flag < 2) {
                records.extend(Self::record(t, sv, &values, selection));
            }
        }

        Ok(())
    }
}

impl ConversionStrategy for RinexConverter {
    fn name(&self) -> &'static str {
        "RINEX"
    }

    fn convert(&self, raw: &RawInput) -> Result<Vec<Candidate>, ConversionError> {
        let mut lines = raw.text().lines().enumerate().map(|(i, l)| (i + 1, l));

        let header = Header::parse(&mut lines)?;

        let common = Selection::new(&header.common);
        let selections = header
            .per_system
            .iter()
            .map(|(system, codes)| (*system, Selection::new(codes)))
            .collect::<HashMap<_, _>>();

        let mut epochs = 0;
        let mut records = Vec::<CanonicalRecord>::new();

        while let Some((number, line)) = lines.next() {
            if line.trim().is_empty() {
                continue;
            }

            let epoch = Self::epoch_line(number, line, &header)?;

            if epoch.timestamp_ms.is_none() {
                // event: special records follow
                for _ in 0..epoch.count {
                    Self::next_line(&mut lines, number)?;
                }
                continue;
            }

            epochs += 1;

            if header.major == 2 {
                Self::v2_epoch(
                    number,
                    line,
                    &epoch,
                    &header,
                    &common,
                    &mut lines,
                    &mut records,
                )?;
            } else {
                Self::v3_epoch(number, &epoch, &header, &selections, &mut lines, &mut records)?;
            }
        }

        debug!(
            "{} - RINEX V{} ({:?}): {} epochs, {} observations",
            raw.filename(),
            header.major,
            header.timescale,
            epochs,
            records.len()
        );

        if records.is_empty() {
            return Err(ConversionError::Empty(format!(
                "{} epoch(s) without any usable observation",
                epochs
            )));
        }

        Ok(records.iter().map(|r| r.to_candidate()).collect())
    }
}
