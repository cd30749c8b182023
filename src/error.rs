use std::time::Duration;

use thiserror::Error;

use crate::validator::ValidationReport;

/// One conversion attempt failed to produce records:
/// deterministic parser failure, sandbox failure or malformed generated output.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    #[error("line {line}: {reason}")]
    Line { line: usize, reason: String },

    #[error("{0}")]
    Unsupported(String),

    #[error("no records produced: {0}")]
    Empty(String),

    #[error("generated logic failed: {0}")]
    Script(String),

    #[error("generated logic exceeded its {0:?} execution budget")]
    Timeout(Duration),
}

/// Generative model service failures.
/// All of them are transient from the pipeline point of view:
/// they consume one attempt.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("generative model is not configured")]
    NotConfigured,

    #[error("failed to connect to \"{0}\"")]
    Connection(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("service replied {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed service response: {0}")]
    Response(String),

    #[error("http client: {0}")]
    Http(String),
}

/// Why one attempt failed. Its text is the error detail
/// fed to the next attempt.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttemptError {
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("validation failure: {0}")]
    Validation(ValidationReport),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(#[from] ModelError),
}

/// Task level (terminal) failures
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read \"{path}\": {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("all {attempts} attempts failed, last error: {last_error}")]
    RetryBudgetExhausted { attempts: u32, last_error: String },

    #[error("none of the {0} validated record(s) is plausible")]
    NoPlausibleRecords(usize),

    #[error("cancelled before attempt #{0}")]
    Cancelled(u32),

    #[error("failed to write \"{path}\": {source}")]
    Output {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
