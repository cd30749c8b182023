use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::{Arg, ArgAction, ArgMatches, ColorChoice, Command, value_parser};

use crate::{
    classifier::Format,
    converter::SandboxLimits,
    engine::{DEFAULT_MAX_ATTEMPTS, DEFAULT_PROMPT_SAMPLE, EngineSettings},
    extractor::DedupPolicy,
    model::{Flavor, ModelSettings},
    output::Settings as OutputSettings,
};

pub struct Cli {
    /// Arguments passed by user
    matches: ArgMatches,
}

impl Cli {
    /// Build new command line interface
    pub fn new() -> Self {
        Self {
            matches: Self::command().get_matches(),
        }
    }

    fn command() -> Command {
        Command::new("gnss2jsonl")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Adaptive GNSS (RINEX, NMEA, other) to JSONL location records converter")
            .color(ColorChoice::Always)
            .arg_required_else_help(true)
            .next_help_heading("Input")
            .arg(
                Arg::new("file")
                    .value_name("FILE")
                    .action(ArgAction::Append)
                    .required(true)
                    .value_parser(value_parser!(PathBuf))
                    .help("Input file, or \"-\" for standard input. Use as many as needed, each one is converted by its own task.
Gzip files are supported."),
            )
            .arg(
                Arg::new("format")
                    .long("format")
                    .short('f')
                    .value_name("rinex|nmea|unknown")
                    .value_parser(Format::from_str)
                    .help("Declare the input format, bypassing classification."),
            )
            .next_help_heading("Conversion")
            .arg(
                Arg::new("no-llm")
                    .long("no-llm")
                    .action(ArgAction::SetTrue)
                    .help("Disable the generative fallback: only the standard converters are used."),
            )
            .arg(
                Arg::new("max-attempts")
                    .long("max-attempts")
                    .value_name("N")
                    .value_parser(value_parser!(u32))
                    .help("Generative attempts budget, on top of the standard attempt. Default is 10."),
            )
            .arg(
                Arg::new("timeout")
                    .long("timeout")
                    .value_name("SECONDS")
                    .value_parser(value_parser!(u64))
                    .help("Execution time cap of generated conversion logic. Default is 30s."),
            )
            .arg(
                Arg::new("sample-size")
                    .long("sample-size")
                    .value_name("BYTES")
                    .value_parser(value_parser!(usize))
                    .help("Content sample submitted to the generative model. Default is 8192 bytes."),
            )
            .arg(
                Arg::new("jobs")
                    .long("jobs")
                    .short('j')
                    .value_name("N")
                    .value_parser(value_parser!(usize))
                    .help("Maximal number of files converted concurrently. Default is 4."),
            )
            .next_help_heading("Output")
            .arg(
                Arg::new("prefix")
                    .long("prefix")
                    .value_name("DIRECTORY")
                    .help("Custom output directory. By default, output files are written next to the input files."),
            )
            .arg(
                Arg::new("gzip")
                    .long("gzip")
                    .action(ArgAction::SetTrue)
                    .help("Gzip compress the JSONL output."),
            )
            .arg(
                Arg::new("dedup")
                    .long("dedup")
                    .value_name("per-satellite|per-timestamp")
                    .value_parser(DedupPolicy::from_str)
                    .help("Duplicate timestamps collapse policy. Default is per-satellite:
observations of distinct satellites sharing one timestamp are all preserved."),
            )
            .arg(
                Arg::new("lenient")
                    .long("lenient")
                    .action(ArgAction::SetTrue)
                    .help("Keep implausible records: altitude outside [-1000, 9000] m, HDOP above 50,
more than 50 satellites, speed above 278 m/s or course outside [0, 360] degrees."),
            )
            .next_help_heading("Generative model")
            .arg(
                Arg::new("endpoint")
                    .long("endpoint")
                    .env("GNSS2JSONL_ENDPOINT")
                    .value_name("URL")
                    .help("Chat completions service base URL."),
            )
            .arg(
                Arg::new("api-key")
                    .long("api-key")
                    .env("GNSS2JSONL_API_KEY")
                    .hide_env_values(true)
                    .value_name("KEY")
                    .help("Chat completions service key."),
            )
            .arg(
                Arg::new("model")
                    .long("model")
                    .short('m')
                    .env("GNSS2JSONL_MODEL")
                    .value_name("NAME")
                    .help("Model name, or deployment name for Azure."),
            )
            .arg(
                Arg::new("flavor")
                    .long("flavor")
                    .value_name("openai|azure")
                    .value_parser(Flavor::from_str)
                    .help("Service API flavor. Default is openai."),
            )
            .arg(
                Arg::new("api-version")
                    .long("api-version")
                    .value_name("VERSION")
                    .help("Azure API version."),
            )
            .arg(
                Arg::new("temperature")
                    .long("temperature")
                    .value_parser(value_parser!(f64))
                    .help("Sampling temperature. Default is 0.7."),
            )
            .arg(
                Arg::new("request-timeout")
                    .long("request-timeout")
                    .value_name("SECONDS")
                    .value_parser(value_parser!(u64))
                    .help("Generative model request timeout. Default is 120s."),
            )
    }

    /// Input file paths
    pub fn filepaths(&self) -> Vec<&PathBuf> {
        if let Some(fp) = self.matches.get_many::<PathBuf>("file") {
            fp.collect()
        } else {
            Vec::new()
        }
    }

    /// Declared input [Format]
    pub fn format(&self) -> Option<Format> {
        self.matches.get_one::<Format>("format").copied()
    }

    /// Concurrent tasks
    pub fn jobs(&self) -> usize {
        self.matches.get_one::<usize>("jobs").copied().unwrap_or(4)
    }

    pub fn output_settings(&self) -> OutputSettings {
        OutputSettings {
            gzip: self.matches.get_flag("gzip"),
            prefix: self.matches.get_one::<String>("prefix").cloned(),
            dedup: self
                .matches
                .get_one::<DedupPolicy>("dedup")
                .copied()
                .unwrap_or_default(),
            lenient: self.matches.get_flag("lenient"),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let mut limits = SandboxLimits::default();

        if let Some(timeout) = self.matches.get_one::<u64>("timeout") {
            limits.exec_timeout = Duration::from_secs(*timeout);
        }

        EngineSettings {
            limits,
            no_llm: self.matches.get_flag("no-llm"),
            max_attempts: self
                .matches
                .get_one::<u32>("max-attempts")
                .copied()
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            sample_size: self
                .matches
                .get_one::<usize>("sample-size")
                .copied()
                .unwrap_or(DEFAULT_PROMPT_SAMPLE),
            ..Default::default()
        }
    }

    pub fn model_settings(&self) -> ModelSettings {
        let mut settings = ModelSettings {
            endpoint: self.matches.get_one::<String>("endpoint").cloned(),
            api_key: self.matches.get_one::<String>("api-key").cloned(),
            model: self.matches.get_one::<String>("model").cloned(),
            ..Default::default()
        };

        if let Some(flavor) = self.matches.get_one::<Flavor>("flavor") {
            settings.flavor = *flavor;
        }
        if let Some(version) = self.matches.get_one::<String>("api-version") {
            settings.api_version = version.clone();
        }
        if let Some(temperature) = self.matches.get_one::<f64>("temperature") {
            settings.temperature = *temperature;
        }
        if let Some(timeout) = self.matches.get_one::<u64>("request-timeout") {
            settings.timeout = Duration::from_secs(*timeout);
        }

        settings
    }
}
