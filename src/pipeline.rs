use std::path::PathBuf;

use log::{debug, info};
use serde::Serialize;
use tokio::sync::watch;

use crate::{
    classifier::{Classifier, Format},
    engine::{ConversionAttempt, Engine},
    error::Error,
    extractor::{Extractor, Plausibility},
    input::RawInput,
    output::{Settings as OutputSettings, write_jsonl},
    report::Reporter,
};

/// Durable conversion result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub records: usize,
}

/// Outcome of one [Pipeline] run, with the attempts audit trail
#[derive(Debug)]
pub struct Processed {
    /// Classified format. None when the input could not be read
    pub format: Option<Format>,
    pub attempts: Vec<ConversionAttempt>,
    pub result: Result<Artifact, Error>,
}

impl Processed {
    /// Input could not be acquired
    pub fn unreadable(error: Error) -> Self {
        Self {
            format: None,
            attempts: Vec::new(),
            result: Err(error),
        }
    }
}

/// Classification, conversion, extraction and artifact writing
/// of one [RawInput], serially.
pub struct Pipeline {
    classifier: Classifier,
    engine: Engine,
}

impl Pipeline {
    pub fn new(classifier: Classifier, engine: Engine) -> Self {
        Self { classifier, engine }
    }

    pub fn process(
        &self,
        raw: &RawInput,
        output: &OutputSettings,
        reporter: &Reporter,
        cancel: &watch::Receiver<bool>,
    ) -> Processed {
        let classification = self.classifier.classify(raw);

        info!(
            "{} - \"{}\" classified as {} ({:?})",
            reporter.name(),
            raw.filename(),
            classification.format,
            classification.basis
        );

        let run = self.engine.run(raw, classification.format, reporter, cancel);

        debug!(
            "{} - {:?} after {} attempt(s)",
            reporter.name(),
            run.state,
            run.attempts.len()
        );

        let result = run.result.and_then(|candidates| {
            let records = Extractor::new(output.dedup)
                .with_plausibility((!output.lenient).then(Plausibility::default))
                .extract(&candidates);

            if records.is_empty() {
                return Err(Error::NoPlausibleRecords(candidates.len()));
            }

            let path = PathBuf::from(output.filename(&raw.stem()));

            write_jsonl(&path, output.gzip, &records)?;

            info!(
                "{} - {} location records written to \"{}\"",
                reporter.name(),
                records.len(),
                path.display()
            );

            Ok(Artifact {
                path,
                records: records.len(),
            })
        });

        Processed {
            format: Some(classification.format),
            attempts: run.attempts,
            result,
        }
    }
}
