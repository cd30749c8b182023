use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use serde_json::Value;

use crate::{
    classifier::Format,
    converter::ConversionStrategy,
    error::ConversionError,
    input::RawInput,
    record::Candidate,
    utils::{nmea_checksum, nmea_to_decimal, unix_ms},
};

use hifitime::prelude::TimeScale;

lazy_static! {
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"(?s)```[ \t]*(?P<lang>[A-Za-z0-9_+-]*)[^\n]*\n(?P<body>.*?)```")
            .expect("Failed to compile regex");
}

/// Resource caps of one generated logic evaluation
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SandboxLimits {
    /// Wall clock execution cap
    pub exec_timeout: Duration,
    /// Maximal number of script operations
    pub max_operations: u64,
    /// Maximal number of produced records
    pub max_records: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            exec_timeout: Duration::from_secs(30),
            max_operations: 500_000_000,
            max_records: 2_000_000,
        }
    }
}

/// What one generative model response provides
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedLogic {
    /// Conversion script, evaluated in the sandbox
    Script(String),
    /// Directly returned records
    Records(Vec<Candidate>),
}

impl GeneratedLogic {
    /// Interprets a model response. A fenced `json` block (or bare JSON)
    /// is taken as records, anything else as a script.
    pub fn parse(response: &str) -> Result<Self, ConversionError> {
        let response = response.trim();

        if response.is_empty() {
            return Err(ConversionError::Script(
                "generative model returned an empty response".to_string(),
            ));
        }

        let blocks = FENCED_BLOCK
            .captures_iter(response)
            .map(|caps| {
                (
                    caps.name("lang").map_or("", |m| m.as_str()).to_lowercase(),
                    caps.name("body").map_or("", |m| m.as_str()).trim().to_string(),
                )
            })
            .filter(|(_, body)| !body.is_empty())
            .collect::<Vec<_>>();

        if let Some((_, body)) = blocks.iter().find(|(lang, _)| lang == "json") {
            return Self::records(body);
        }

        if let Some((_, body)) = blocks
            .iter()
            .find(|(lang, _)| lang == "rhai")
            .or_else(|| blocks.first())
        {
            return Ok(Self::Script(body.clone()));
        }

        if response.starts_with('[') || response.starts_with('{') {
            if let Ok(records) = Self::records(response) {
                return Ok(records);
            }
        }

        Ok(Self::Script(response.to_string()))
    }

    fn records(content: &str) -> Result<Self, ConversionError> {
        let value = serde_json::from_str::<Value>(content)
            .map_err(|e| ConversionError::Script(format!("malformed JSON records: {}", e)))?;

        match value {
            Value::Array(records) => Ok(Self::Records(records)),
            Value::Object(mut map) => match map.remove("records") {
                Some(Value::Array(records)) => Ok(Self::Records(records)),
                _ => Err(ConversionError::Script(
                    "JSON object without a \"records\" array".to_string(),
                )),
            },
            _ => Err(ConversionError::Script(
                "JSON records must be an array".to_string(),
            )),
        }
    }

    /// Generated logic as text, for audit and repair prompts
    pub fn source(&self) -> String {
        match self {
            Self::Script(script) => script.clone(),
            Self::Records(records) => {
                serde_json::to_string(records).unwrap_or_else(|_| "[]".to_string())
            },
        }
    }
}

/// Dynamic [ConversionStrategy] whose behavior is the [GeneratedLogic]
/// returned by the generative model.
#[derive(Debug, Clone)]
pub struct GeneratedStrategy {
    logic: GeneratedLogic,
    limits: SandboxLimits,
    format_hint: Format,
}

impl GeneratedStrategy {
    pub fn new(logic: GeneratedLogic, limits: SandboxLimits, format_hint: Format) -> Self {
        Self {
            logic,
            limits,
            format_hint,
        }
    }

    /// Fresh, capped [Engine]: no module resolution, no output,
    /// helpers only.
    fn engine(&self) -> Engine {
        let mut engine = Engine::new();

        engine.set_max_operations(self.limits.max_operations);
        engine.set_max_call_levels(64);
        engine.set_max_expr_depths(128, 64);
        engine.set_max_string_size(64 * 1024 * 1024);
        engine.set_max_array_size(self.limits.max_records.max(1024) * 4);
        engine.set_max_map_size(4096);
        engine.set_max_modules(0);
        engine.disable_symbol("eval");

        engine.on_print(|text| debug!("script: {}", text));
        engine.on_debug(|text, _, _| debug!("script: {}", text));

        let deadline = Instant::now() + self.limits.exec_timeout;
        engine.on_progress(move |ops| {
            if ops % 1024 == 0 && Instant::now() > deadline {
                Some("deadline".into())
            } else {
                None
            }
        });

        engine.register_fn("nmea_to_decimal", |value: &str, hemisphere: &str| {
            nmea_to_decimal(value, hemisphere).map_or(Dynamic::UNIT, Dynamic::from_float)
        });

        engine.register_fn("nmea_checksum_ok", |sentence: &str| {
            let sentence = sentence.trim().trim_start_matches('$');
            match sentence.split_once('*') {
                Some((payload, cksum)) => u8::from_str_radix(cksum.get(..2).unwrap_or(cksum), 16)
                    .is_ok_and(|cksum| cksum == nmea_checksum(payload)),
                None => false,
            }
        });

        engine.register_fn(
            "unix_ms",
            |y: i64, mo: i64, d: i64, h: i64, mi: i64, s: f64| script_unix_ms(y, mo, d, h, mi, s),
        );

        engine.register_fn(
            "unix_ms",
            |y: i64, mo: i64, d: i64, h: i64, mi: i64, s: i64| {
                script_unix_ms(y, mo, d, h, mi, s as f64)
            },
        );

        engine
    }

    fn evaluate(&self, script: &str, raw: &RawInput) -> Result<Vec<Candidate>, ConversionError> {
        let engine = self.engine();

        let mut scope = Scope::new();
        scope.push_constant("input", raw.text().to_string());
        scope.push_constant("bytes", Dynamic::from_blob(raw.bytes().to_vec()));
        scope.push_constant("filename", raw.filename().to_string());
        scope.push_constant("format_hint", self.format_hint.to_string());

        let started = Instant::now();

        let output = engine
            .eval_with_scope::<Dynamic>(&mut scope, script)
            .map_err(|e| match *e {
                EvalAltResult::ErrorTerminated(..) => {
                    ConversionError::Timeout(self.limits.exec_timeout)
                },
                e => ConversionError::Script(e.to_string()),
            })?;

        debug!(
            "{} - script evaluated in {:?}",
            raw.filename(),
            started.elapsed()
        );

        if !output.is_array() {
            return Err(ConversionError::Script(format!(
                "script must evaluate to an array of maps, got {}",
                output.type_name()
            )));
        }

        rhai::serde::from_dynamic::<Vec<Value>>(&output)
            .map_err(|e| ConversionError::Script(format!("unusable script output: {}", e)))
    }
}

fn script_unix_ms(
    year: i64,
    month: i64,
    day: i64,
    hour: i64,
    minute: i64,
    seconds: f64,
) -> Result<i64, Box<EvalAltResult>> {
    let narrow = |v: i64| u8::try_from(v).map_err(|_| format!("invalid date field {}", v));

    let year = i32::try_from(year).map_err(|_| format!("invalid year {}", year))?;

    unix_ms(
        year,
        narrow(month)?,
        narrow(day)?,
        narrow(hour)?,
        narrow(minute)?,
        seconds,
        TimeScale::UTC,
    )
    .map_err(|e| e.into())
}

impl ConversionStrategy for GeneratedStrategy {
    fn name(&self) -> &'static str {
        "generated"
    }

    fn convert(&self, raw: &RawInput) -> Result<Vec<Candidate>, ConversionError> {
        let records = match &self.logic {
            GeneratedLogic::Records(records) => records.clone(),
            GeneratedLogic::Script(script) => self.evaluate(script, raw)?,
        };

        if records.len() > self.limits.max_records {
            return Err(ConversionError::Script(format!(
                "{} records exceed the {} records cap",
                records.len(),
                self.limits.max_records
            )));
        }

        Ok(records)
    }
}
