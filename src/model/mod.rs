//! Generative model collaborator: a black-box text completion service.

use crate::error::ModelError;

mod chat;
pub mod prompt;

pub use chat::{ChatModel, Flavor, ModelSettings};

/// One single-shot completion request
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Format specific system instructions
    pub system: String,
    /// Sample and (when repairing) previous logic and error detail
    pub user: String,
}

/// [GenerativeModel] turns one [CompletionRequest] into response text.
/// Implementations must not hold any resource across calls.
pub trait GenerativeModel: Send + Sync {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError>;
}

#[cfg(test)]
pub use scripted::ScriptedModel;

#[cfg(test)]
mod scripted {
    use std::{collections::VecDeque, sync::Mutex};

    use super::{CompletionRequest, GenerativeModel};
    use crate::error::ModelError;

    /// Replays prepared responses, in order. The last one is repeated
    /// once the others are consumed.
    pub struct ScriptedModel {
        responses: Mutex<VecDeque<Result<String, ModelError>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedModel {
        pub fn new(responses: Vec<Result<String, ModelError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Always replies with this response
        pub fn always(response: &str) -> Self {
            Self::new(vec![Ok(response.to_string())])
        }

        /// Requests received so far
        pub fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl GenerativeModel for ScriptedModel {
        fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
            self.requests.lock().unwrap().push(request.clone());

            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.pop_front().unwrap()
            } else {
                responses
                    .front()
                    .cloned()
                    .unwrap_or(Err(ModelError::NotConfigured))
            }
        }
    }
}
