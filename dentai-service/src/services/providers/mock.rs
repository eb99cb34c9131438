//! Mock provider for tests and offline runs.

use super::{
    GenerateRequest, GenerativeProvider, GroundingChunk, GroundingTool, Part, ProviderError,
    ProviderResponse,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// Scripted provider. Queued responses are returned first; once the queue is
/// drained it echoes the request back in a plausible shape.
#[derive(Default)]
pub struct MockProvider {
    scripted: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<GenerateRequest>>,
    failing: bool,
    gate: Option<Arc<Semaphore>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider whose every call fails with a network error.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// A provider whose calls block until [`MockProvider::release`] hands out
    /// a permit.
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    /// Queue the result of the next unscripted call.
    pub fn push_response(&self, response: Result<ProviderResponse, ProviderError>) {
        if let Ok(mut scripted) = self.scripted.lock() {
            scripted.push_back(response);
        }
    }

    /// Let `calls` blocked or future calls through the gate.
    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .map(|requests| requests.len())
            .unwrap_or_default()
    }

    fn echo(request: &GenerateRequest) -> ProviderResponse {
        let prompt = request.last_user_text().unwrap_or_default();

        let image = request.contents.iter().rev().find_map(|turn| {
            turn.parts.iter().find_map(|part| match part {
                Part::InlineData { data, .. } => Some(data.clone()),
                Part::Text(_) => None,
            })
        });

        if let Some(data) = image {
            return ProviderResponse::from_parts(vec![Part::InlineData {
                mime_type: "image/png".to_string(),
                data,
            }]);
        }

        let response = ProviderResponse::from_text(format!("Mock response for: {}", prompt));
        let response = ProviderResponse {
            input_tokens: prompt.len() as i32 / 4,
            output_tokens: 10,
            ..response
        };

        match &request.grounding {
            None => response,
            Some(GroundingTool::Search) => response.with_grounding(vec![GroundingChunk::Web {
                title: "Mock source".to_string(),
                uri: "https://example.com/mock-source".to_string(),
            }]),
            Some(GroundingTool::Maps { .. }) => {
                response.with_grounding(vec![GroundingChunk::Maps {
                    title: "Mock Dental Specialists".to_string(),
                    uri: "https://maps.google.com/?cid=0".to_string(),
                }])
            }
        }
    }
}

#[async_trait]
impl GenerativeProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<ProviderResponse, ProviderError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| ProviderError::NetworkError(e.to_string()))?;
            permit.forget();
        }

        if self.failing {
            return Err(ProviderError::NetworkError(
                "Mock provider is unavailable".to_string(),
            ));
        }

        let scripted = self
            .scripted
            .lock()
            .ok()
            .and_then(|mut scripted| scripted.pop_front());

        match scripted {
            Some(result) => result,
            None => Ok(Self::echo(request)),
        }
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.failing {
            Err(ProviderError::NotConfigured(
                "Mock provider is unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}
