//! Default agent
//!
//! Fallback for low-confidence or unmatched intents. Answers from retrieved
//! context and conversation history only; never calls the data provider.

use crate::agents::{chunk_citations, format_context, format_history, AgentRequest, SpecialistAgent};
use crate::backend::{CompletionBackend, CompletionRequest};
use crate::config::AgentSettings;
use crate::models::{AgentResponse, AgentRole};
use crate::Result;
use std::sync::Arc;
use tracing::warn;

const SYSTEM_PROMPT: &str = "You are a helpful financial assistant. You can answer general \
financial questions, explain concepts, and give guidance on investment strategies. If you \
don't know something, be honest about it.";

pub struct DefaultAgent {
    backend: Arc<dyn CompletionBackend>,
    settings: AgentSettings,
}

impl DefaultAgent {
    pub fn new(backend: Arc<dyn CompletionBackend>, settings: AgentSettings) -> Self {
        Self { backend, settings }
    }

    async fn answer(&self, request: &AgentRequest) -> Result<AgentResponse> {
        let mut user_prompt = format_history(&request.history);
        user_prompt.push_str(&format_context(&request.context_chunks));
        user_prompt.push_str("\nQuestion: ");
        user_prompt.push_str(&request.query);

        let completion = CompletionRequest::new(&self.settings, SYSTEM_PROMPT, user_prompt);
        let text = self.backend.complete(&completion).await?;

        Ok(AgentResponse {
            text,
            citations: chunk_citations(&request.context_chunks),
            confidence: 0.6,
        })
    }
}

#[async_trait::async_trait]
impl SpecialistAgent for DefaultAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Default
    }

    async fn handle(&self, request: &AgentRequest) -> AgentResponse {
        match self.answer(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Default agent failed, returning degraded response: {}", e);
                AgentResponse::degraded(
                    "I couldn't process that question right now. Please try again shortly.",
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FailingBackend, ScriptedBackend};
    use crate::models::ConversationTurn;

    fn settings() -> AgentSettings {
        AgentSettings {
            role: AgentRole::Default,
            model: "openai/gpt-4o-mini".to_string(),
            temperature: 0.7,
        }
    }

    #[tokio::test]
    async fn test_history_is_threaded_into_prompt() {
        let backend = Arc::new(ScriptedBackend::new(vec!["An index fund tracks a market index."]));
        let agent = DefaultAgent::new(backend.clone(), settings());

        let request = AgentRequest {
            query: "And how do fees compare?".to_string(),
            context_chunks: Vec::new(),
            history: vec![
                ConversationTurn::user("What is an index fund?"),
                ConversationTurn::agent("An index fund tracks a market index.", "default_agent"),
            ],
        };

        let response = agent.handle(&request).await;
        assert!(response.confidence > 0.0);

        let recorded = backend.recorded();
        assert!(recorded[0].user.contains("What is an index fund?"));
        assert_eq!(recorded[0].temperature, 0.7);
    }

    #[tokio::test]
    async fn test_backend_failure_becomes_zero_confidence() {
        let agent = DefaultAgent::new(Arc::new(FailingBackend), settings());

        let request = AgentRequest {
            query: "hello".to_string(),
            context_chunks: Vec::new(),
            history: Vec::new(),
        };

        let response = agent.handle(&request).await;
        assert_eq!(response.confidence, 0.0);
    }
}
