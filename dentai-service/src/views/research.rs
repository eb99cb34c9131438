use super::{require_input, RequestSlot, RequestState, ViewError, ViewKind, ViewLifetime};
use crate::models::GroundedAnswer;
use crate::services::ClinicGateway;
use serde::Serialize;

pub const SEARCH_FAILED: &str = "Search failed. Please try again.";

pub struct ResearchView {
    gateway: ClinicGateway,
    answer: RequestSlot<GroundedAnswer>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResearchSnapshot {
    pub answer: RequestState<GroundedAnswer>,
}

impl ResearchView {
    pub fn new(gateway: ClinicGateway, lifetime: ViewLifetime) -> Self {
        debug_assert_eq!(lifetime.kind(), ViewKind::Research);
        Self {
            gateway,
            answer: RequestSlot::new(lifetime),
        }
    }

    pub async fn search(&self, query: &str) -> Result<RequestState<GroundedAnswer>, ViewError> {
        require_input("query", query)?;
        self.answer
            .run(self.gateway.search(query), SEARCH_FAILED)
            .await
    }

    pub fn snapshot(&self) -> ResearchSnapshot {
        ResearchSnapshot {
            answer: self.answer.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::services::providers::mock::MockProvider;
    use crate::services::providers::GroundingTool;
    use std::sync::Arc;

    fn view(provider: Arc<MockProvider>, lifetime: ViewLifetime) -> ResearchView {
        let gateway = ClinicGateway::new(provider, ModelConfig::default());
        ResearchView::new(gateway, lifetime)
    }

    #[tokio::test]
    async fn search_returns_grounded_answer() {
        let provider = Arc::new(MockProvider::new());
        let research = view(provider.clone(), ViewLifetime::new(ViewKind::Research));

        let state = research.search("Latest guidance on fluoride varnish").await.unwrap();

        let answer = state.result().unwrap();
        assert_eq!(answer.text, "Mock response for: Latest guidance on fluoride varnish");
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(provider.requests()[0].grounding, Some(GroundingTool::Search));
    }

    #[tokio::test]
    async fn failure_settles_to_retry_message() {
        let research = view(
            Arc::new(MockProvider::failing()),
            ViewLifetime::new(ViewKind::Research),
        );

        let state = research.search("implant failure rates").await.unwrap();

        assert_eq!(
            state,
            RequestState::Failed {
                message: SEARCH_FAILED.to_string()
            }
        );
    }

    #[tokio::test]
    async fn second_search_while_awaiting_is_rejected() {
        let provider = Arc::new(MockProvider::gated());
        let research = Arc::new(view(provider.clone(), ViewLifetime::new(ViewKind::Research)));

        let first = {
            let research = research.clone();
            tokio::spawn(async move { research.search("first").await })
        };
        while provider.call_count() == 0 {
            tokio::task::yield_now().await;
        }

        let second = research.search("second").await;
        assert_eq!(second.unwrap_err(), ViewError::Busy(ViewKind::Research));

        provider.release(1);
        assert!(first.await.unwrap().unwrap().result().is_some());
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn result_after_disposal_is_ignored() {
        let provider = Arc::new(MockProvider::gated());
        let lifetime = ViewLifetime::new(ViewKind::Research);
        let research = Arc::new(view(provider.clone(), lifetime.clone()));

        let pending = {
            let research = research.clone();
            tokio::spawn(async move { research.search("periodontal charting").await })
        };
        while provider.call_count() == 0 {
            tokio::task::yield_now().await;
        }

        lifetime.dispose();
        provider.release(1);

        assert_eq!(
            pending.await.unwrap().unwrap_err(),
            ViewError::Disposed(ViewKind::Research)
        );
        assert_eq!(research.snapshot().answer, RequestState::Awaiting);
    }

    #[tokio::test]
    async fn blank_query_is_rejected_before_any_call() {
        let provider = Arc::new(MockProvider::new());
        let research = view(provider.clone(), ViewLifetime::new(ViewKind::Research));

        assert!(matches!(
            research.search(" ").await,
            Err(ViewError::InvalidInput(_))
        ));
        assert_eq!(provider.call_count(), 0);
    }
}
