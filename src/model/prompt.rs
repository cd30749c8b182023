use std::collections::HashSet;

use crate::{classifier::Format, input::RawInput, model::CompletionRequest};

/// Leading lines always part of the sample
const HEAD_LINES: usize = 15;

/// Extra lines introducing new record types
const EXTRA_LINES: usize = 10;

/// Binary inputs are sampled as a hex dump of that many bytes
const HEX_DUMP_BYTES: usize = 512;

const RINEX_INSTRUCTIONS: &str = "You are an expert in RINEX observation files. Write a script that:
1. Parses the RINEX header (version, observation types, time system) and every epoch record.
2. Emits one record per satellite and per epoch, with the pseudorange, carrier phase, doppler and signal strength observations that are available.
3. Converts epoch times into UNIX time in milliseconds.
Each record must contain timestamp_ms, satellite_system (e.g. \"GPS\", \"GLONASS\"), satellite_number and the available measurements (pseudorange, carrier_phase, doppler, signal_strength).";

const NMEA_INSTRUCTIONS: &str = "You are an expert in NMEA 0183 data processing. Write a script that:
1. Parses NMEA sentences, focusing on GGA, RMC and GNS.
2. Converts NMEA coordinates (DDMM.MMMMM) into decimal degrees.
3. Extracts timestamp, latitude, longitude, altitude, number of satellites, HDOP and fix quality, and speed (m/s) and course from RMC.
Each record must contain timestamp_ms, latitude and longitude, plus any additional available field. Skip malformed sentences rather than failing.";

const UNKNOWN_INSTRUCTIONS: &str = "You are a seasoned GNSS data format expert. Identify the format of the provided sample, then write a script converting the whole file into location records.
Each record must contain at least timestamp_ms (milliseconds since UNIX epoch) and latitude and longitude in decimal degrees, plus any available altitude, satellite or quality metrics.";

const SCRIPT_CONTRACT: &str = "Your answer is evaluated by the Rhai scripting engine, in a sandbox without file, network or process access.
The script sees these constants:
- `input`: whole file content as text
- `bytes`: whole file content as a blob
- `filename`: file name
- `format_hint`: RINEX, NMEA or UNKNOWN
and these helper functions:
- `nmea_to_decimal(value, hemisphere)`: DDMM.MMMM coordinate to decimal degrees, () when invalid
- `unix_ms(year, month, day, hour, minute, seconds)`: UTC calendar date to UNIX milliseconds
- `nmea_checksum_ok(sentence)`: true when the sentence checksum is valid
The script must evaluate to an array of object maps, one per record, using these keys only:
timestamp_ms (integer), latitude, longitude, altitude, num_satellites, hdop, quality, satellite_system, satellite_number, pseudorange, carrier_phase, doppler, signal_strength, speed, course.
Latitude must lie within [-90, 90], longitude within [-180, 180]; hdop, num_satellites and speed are never negative. Omit unknown values rather than inventing them.
Reply with the script in a single ```rhai fenced block. When the records are easier to extract by hand, you may instead reply with a ```json fenced block containing the array of records.";

const FEEDBACK_NOTE: &str = "You will receive execution and validation feedback: use it to repair your previous answer rather than starting over.";

const REPAIR_INSTRUCTION: &str =
    "Fix this specific problem and reply with the complete corrected answer.";

/// Format specific system instructions
pub fn system_prompt(format: Format) -> String {
    let instructions = match format {
        Format::Rinex => RINEX_INSTRUCTIONS,
        Format::Nmea => NMEA_INSTRUCTIONS,
        Format::Unknown => UNKNOWN_INSTRUCTIONS,
    };

    format!("{}\n\n{}\n\n{}", instructions, SCRIPT_CONTRACT, FEEDBACK_NOTE)
}

/// Record type of a text line: sentence identifier, RINEX label
/// or leading token with its digits removed
fn line_kind(line: &str) -> String {
    let line = line.trim_end();

    if line.starts_with('$') || line.starts_with('!') {
        return line.split(',').next().unwrap_or(line).to_string();
    }

    if let Some(label) = line.get(60..).map(str::trim).filter(|l| !l.is_empty()) {
        return label.to_string();
    }

    line.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .find(|token| !token.is_empty())
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_ascii_digit())
        .collect()
}

/// Hex dump, 16 bytes per line, with printable characters
fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .chunks(16)
        .enumerate()
        .map(|(i, chunk)| {
            let hex = chunk
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(" ");

            let ascii = chunk
                .iter()
                .map(|b| {
                    if b.is_ascii_graphic() || *b == b' ' {
                        *b as char
                    } else {
                        '.'
                    }
                })
                .collect::<String>();

            format!("{:08x}  {:<47}  |{}|", i * 16, hex, ascii)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Marks a line cut at the sample budget
const TRUNCATED: &str = " [truncated]\n";

/// Longest prefix of at most `max` bytes ending on a char boundary
fn char_prefix(line: &str, max: usize) -> &str {
    let mut end = max.min(line.len());
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

/// Bounded content sample: leading lines, then lines introducing
/// record types not seen yet. Binary content is hex dumped.
pub fn sample(raw: &RawInput, budget: usize) -> String {
    let bytes = raw.bytes();
    let prefix = &bytes[..bytes.len().min(budget.max(HEX_DUMP_BYTES))];

    if prefix.contains(&0) {
        return format!(
            "(binary content, {} bytes, hex dump of the first {} bytes)\n{}",
            bytes.len(),
            bytes.len().min(HEX_DUMP_BYTES),
            hex_dump(&bytes[..bytes.len().min(HEX_DUMP_BYTES)])
        );
    }

    let lines = raw.text().lines().collect::<Vec<_>>();
    let mut kinds = HashSet::new();
    let mut selected = Vec::with_capacity(HEAD_LINES + EXTRA_LINES);

    for line in lines.iter().take(HEAD_LINES) {
        kinds.insert(line_kind(line));
        selected.push(*line);
    }

    for line in lines.iter().skip(HEAD_LINES) {
        if selected.len() >= HEAD_LINES + EXTRA_LINES {
            break;
        }
        if kinds.insert(line_kind(line)) {
            selected.push(*line);
        }
    }

    let mut sample = String::with_capacity(budget);
    for line in selected {
        if sample.len() + line.len() + 1 > budget {
            let room = budget.saturating_sub(sample.len() + TRUNCATED.len());
            if room > 0 {
                sample.push_str(char_prefix(line, room));
                sample.push_str(TRUNCATED);
            }
            break;
        }
        sample.push_str(line);
        sample.push('\n');
    }

    sample
}

fn header(raw: &RawInput, format: Format, budget: usize) -> String {
    format!(
        "File: {}\nFormat hint: {}\nTotal size: {} bytes, {} lines\nSample data:\n{}",
        raw.filename(),
        format,
        raw.bytes().len(),
        raw.text().lines().count(),
        sample(raw, budget)
    )
}

/// First LLM attempt request
pub fn initial_request(raw: &RawInput, format: Format, budget: usize) -> CompletionRequest {
    CompletionRequest {
        system: system_prompt(format),
        user: format!(
            "{}\nWrite the conversion script for this file.",
            header(raw, format, budget)
        ),
    }
}

/// Repair request: previous logic and its error detail, for a targeted fix
pub fn repair_request(
    raw: &RawInput,
    format: Format,
    budget: usize,
    previous_attempt: u32,
    previous_logic: Option<&str>,
    error_detail: &str,
) -> CompletionRequest {
    let previous = match previous_logic {
        Some(logic) => format!("Your previous answer:\n```\n{}\n```\n", logic),
        None => String::new(),
    };

    CompletionRequest {
        system: system_prompt(format),
        user: format!(
            "{}\n{}Attempt {} failed:\n{}\n{}",
            header(raw, format, budget),
            previous,
            previous_attempt,
            error_detail,
            REPAIR_INSTRUCTION
        ),
    }
}
