use std::sync::Arc;

use itertools::Itertools;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::watch;

use crate::{
    classifier::Format,
    converter::{
        ConversionStrategy, GeneratedLogic, GeneratedStrategy, SandboxLimits, standard_strategy,
    },
    error::{AttemptError, ConversionError, Error},
    input::RawInput,
    model::{GenerativeModel, prompt},
    record::Candidate,
    report::{Method, Outcome, Reporter},
    validator::{DEFAULT_MAX_REPORTED, Rule, Validation, Validator},
};

/// Default LLM attempt budget
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default sample size sent to the generative model, in bytes
pub const DEFAULT_PROMPT_SAMPLE: usize = 8192;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// LLM attempts, on top of the standard attempt
    pub max_attempts: u32,
    /// Prompt sample budget, in bytes
    pub sample_size: usize,
    pub limits: SandboxLimits,
    /// Violations reported per failed validation
    pub max_reported: usize,
    /// Disables the generative fallback
    pub no_llm: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            sample_size: DEFAULT_PROMPT_SAMPLE,
            limits: SandboxLimits::default(),
            max_reported: DEFAULT_MAX_REPORTED,
            no_llm: false,
        }
    }
}

type AttemptResult = Result<Vec<Candidate>, AttemptError>;

/// Conversion state machine
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EngineState {
    StandardAttempted,
    /// 1-based LLM attempt
    LlmAttempt(u32),
    Validated,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptValidation {
    pub passed: bool,
    pub violated_rules: Vec<Rule>,
}

/// Audit record of one attempt, immutable once validated
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionAttempt {
    pub attempt_number: u32,
    pub method: Method,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_code: Option<String>,
    /// None when no candidate set reached the validator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_result: Option<AttemptValidation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

/// Terminal state of one [Engine] run, with its audit trail
#[derive(Debug)]
pub struct EngineRun {
    pub state: EngineState,
    pub attempts: Vec<ConversionAttempt>,
    pub result: Result<Vec<Candidate>, Error>,
}

/// [Engine] drives the standard attempt and the generative repair loop
/// of one [RawInput]. Attempts are strictly sequential.
pub struct Engine {
    settings: EngineSettings,
    model: Arc<dyn GenerativeModel>,
    validator: Validator,
}

impl Engine {
    pub fn new(settings: EngineSettings, model: Arc<dyn GenerativeModel>) -> Self {
        let validator = Validator::new(settings.max_reported);
        Self {
            settings,
            model,
            validator,
        }
    }

    /// Validates a candidate set, gating the whole attempt
    fn gate(&self, candidates: Vec<Candidate>) -> (AttemptValidation, AttemptResult) {
        match self.validator.validate(&candidates) {
            Validation::Pass => (
                AttemptValidation {
                    passed: true,
                    violated_rules: Vec::new(),
                },
                Ok(candidates),
            ),
            Validation::Fail(report) => (
                AttemptValidation {
                    passed: false,
                    violated_rules: report
                        .violations
                        .iter()
                        .map(|violation| violation.rule)
                        .unique()
                        .collect(),
                },
                Err(AttemptError::Validation(report)),
            ),
        }
    }

    fn standard_attempt(
        &self,
        raw: &RawInput,
        format: Format,
    ) -> (ConversionAttempt, AttemptResult) {
        let converted = match standard_strategy(format) {
            Some(strategy) => {
                debug!("{} - {} conversion", raw.filename(), strategy.name());
                strategy.convert(raw)
            },
            None => Err(ConversionError::Unsupported(format!(
                "no standard converter for {} format",
                format
            ))),
        };

        self.conclude(1, Method::Standard, None, converted.map_err(AttemptError::from))
    }

    fn llm_attempt(
        &self,
        raw: &RawInput,
        format: Format,
        attempt_number: u32,
        previous: Option<&ConversionAttempt>,
    ) -> (ConversionAttempt, AttemptResult) {
        let request = match previous.filter(|p| p.method == Method::Llm) {
            Some(previous) => prompt::repair_request(
                raw,
                format,
                self.settings.sample_size,
                previous.attempt_number,
                previous.generated_code.as_deref(),
                previous.error_detail.as_deref().unwrap_or_default(),
            ),
            None => prompt::initial_request(raw, format, self.settings.sample_size),
        };

        let logic = match self.model.complete(&request) {
            Ok(response) => GeneratedLogic::parse(&response),
            Err(e) => return self.conclude(attempt_number, Method::Llm, None, Err(e.into())),
        };

        let logic = match logic {
            Ok(logic) => logic,
            Err(e) => return self.conclude(attempt_number, Method::Llm, None, Err(e.into())),
        };

        let code = logic.source();
        let strategy = GeneratedStrategy::new(logic, self.settings.limits, format);

        let converted = strategy.convert(raw).map_err(AttemptError::from);
        self.conclude(attempt_number, Method::Llm, Some(code), converted)
    }

    fn conclude(
        &self,
        attempt_number: u32,
        method: Method,
        generated_code: Option<String>,
        converted: AttemptResult,
    ) -> (ConversionAttempt, AttemptResult) {
        let (validation_result, result) = match converted {
            Ok(candidates) => {
                let (validation, result) = self.gate(candidates);
                (Some(validation), result)
            },
            Err(e) => (None, Err(e)),
        };

        let attempt = ConversionAttempt {
            attempt_number,
            method,
            generated_code,
            validation_result,
            error_detail: result.as_ref().err().map(|e| e.to_string()),
        };

        (attempt, result)
    }

    /// Runs the state machine to a terminal state.
    /// Cancellation is honored at the top of each LLM attempt.
    pub fn run(
        &self,
        raw: &RawInput,
        format: Format,
        reporter: &Reporter,
        cancel: &watch::Receiver<bool>,
    ) -> EngineRun {
        let name = reporter.name();
        let mut state = EngineState::StandardAttempted;
        let mut attempts =
            Vec::<ConversionAttempt>::with_capacity(1 + self.settings.max_attempts as usize);
        let mut records = Option::<Vec<Candidate>>::None;
        let mut terminal = Option::<Error>::None;

        loop {
            state = match state {
                EngineState::StandardAttempted => {
                    let message = format!("{} conversion", format);
                    reporter.emit(1, Method::Standard, Outcome::Started, &message);

                    let (attempt, result) = self.standard_attempt(raw, format);
                    attempts.push(attempt);

                    match result {
                        Ok(candidates) => {
                            let message = format!("{} records", candidates.len());
                            info!("{} - standard {} conversion passed: {}", name, format, message);
                            reporter.emit(1, Method::Standard, Outcome::Passed, &message);
                            records = Some(candidates);
                            EngineState::Validated
                        },
                        Err(e) => {
                            warn!("{} - standard {} conversion failed: {}", name, format, e);
                            reporter.emit(1, Method::Standard, Outcome::Failed, &e.to_string());

                            if self.settings.no_llm || self.settings.max_attempts == 0 {
                                EngineState::Failed
                            } else {
                                EngineState::LlmAttempt(1)
                            }
                        },
                    }
                },
                EngineState::LlmAttempt(n) => {
                    let attempt_number = n + 1;

                    if *cancel.borrow() {
                        info!("{} - cancelled", name);
                        terminal = Some(Error::Cancelled(attempt_number));
                        EngineState::Failed
                    } else {
                        reporter.emit(
                            attempt_number,
                            Method::Llm,
                            Outcome::Started,
                            &format!("generative attempt {}/{}", n, self.settings.max_attempts),
                        );

                        let (attempt, result) =
                            self.llm_attempt(raw, format, attempt_number, attempts.last());
                        attempts.push(attempt);

                        match result {
                            Ok(candidates) => {
                                let message = format!("{} records", candidates.len());
                                info!("{} - attempt #{} passed: {}", name, attempt_number, message);
                                reporter.emit(
                                    attempt_number,
                                    Method::Llm,
                                    Outcome::Passed,
                                    &message,
                                );
                                records = Some(candidates);
                                EngineState::Validated
                            },
                            Err(e) => {
                                warn!("{} - attempt #{} failed: {}", name, attempt_number, e);
                                let message = e.to_string();
                                reporter.emit(
                                    attempt_number,
                                    Method::Llm,
                                    Outcome::Failed,
                                    &message,
                                );

                                if n < self.settings.max_attempts {
                                    EngineState::LlmAttempt(n + 1)
                                } else {
                                    EngineState::Failed
                                }
                            },
                        }
                    }
                },
                EngineState::Validated => EngineState::Succeeded,
                EngineState::Succeeded | EngineState::Failed => break,
            };
        }

        let result = match (state, records) {
            (EngineState::Succeeded, Some(records)) => Ok(records),
            _ => Err(terminal.unwrap_or_else(|| Error::RetryBudgetExhausted {
                attempts: attempts.len() as u32,
                last_error: attempts
                    .last()
                    .and_then(|attempt| attempt.error_detail.clone())
                    .unwrap_or_default(),
            })),
        };

        EngineRun {
            state,
            attempts,
            result,
        }
    }
}
