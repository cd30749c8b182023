use log::warn;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// How one attempt produced its records
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Standard,
    Llm,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "STANDARD"),
            Self::Llm => write!(f, "LLM"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Started,
    Passed,
    Failed,
}

/// Progress event, emitted on every attempt transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptEvent {
    pub attempt_number: u32,
    pub method: Method,
    pub outcome: Outcome,
    pub message: String,
}

/// [Reporter] forwards [AttemptEvent]s to the task layer.
/// It never blocks and never fails the pipeline.
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    /// Task identifier, for logging purposes
    name: String,
    tx: Option<UnboundedSender<AttemptEvent>>,
}

impl Reporter {
    pub fn new(name: &str, tx: UnboundedSender<AttemptEvent>) -> Self {
        Self {
            name: name.to_string(),
            tx: Some(tx),
        }
    }

    /// [Reporter] with no listener
    #[cfg(test)]
    pub fn disconnected(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tx: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn emit(&self, attempt_number: u32, method: Method, outcome: Outcome, message: &str) {
        let Some(tx) = &self.tx else {
            return;
        };

        let event = AttemptEvent {
            attempt_number,
            method,
            outcome,
            message: message.to_string(),
        };

        match tx.send(event) {
            Ok(_) => {},
            Err(e) => {
                warn!("{} - failed to report attempt #{}: {}", self.name, attempt_number, e);
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn events_are_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = Reporter::new("task", tx);

        reporter.emit(1, Method::Standard, Outcome::Failed, "no records produced");

        let event = rx.try_recv().unwrap();
        assert_eq!(event.attempt_number, 1);
        assert_eq!(event.method, Method::Standard);
        assert_eq!(
            serde_json::to_value(&event).unwrap()["method"],
            serde_json::json!("STANDARD")
        );
    }

    #[test]
    fn closed_channel_is_not_fatal() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        Reporter::new("task", tx).emit(2, Method::Llm, Outcome::Started, "");
        Reporter::disconnected("task").emit(3, Method::Llm, Outcome::Started, "");
    }
}
