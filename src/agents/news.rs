//! News agent
//!
//! Fetches recent articles from the market/news provider, merges them with
//! retrieved context, and asks its backend to summarize with citations.
//! Provider failures degrade to a context-only answer with a caveat rather
//! than propagating.

use crate::agents::{chunk_citations, format_context, format_history, AgentRequest, SpecialistAgent};
use crate::backend::{CompletionBackend, CompletionRequest};
use crate::classifier::extract_symbols;
use crate::config::AgentSettings;
use crate::models::{AgentResponse, AgentRole, Citation, NewsArticle};
use crate::provider::MarketDataProvider;
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};

const ARTICLE_LIMIT: usize = 10;

const SYSTEM_PROMPT: &str = "You are a financial news assistant. Summarize the provided \
articles and indexed context into a clear, concise answer. Reference the articles you \
draw on by title. Be honest when the available coverage is thin.";

pub struct NewsAgent {
    backend: Arc<dyn CompletionBackend>,
    provider: Arc<dyn MarketDataProvider>,
    settings: AgentSettings,
}

impl NewsAgent {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        provider: Arc<dyn MarketDataProvider>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            backend,
            provider,
            settings,
        }
    }

    async fn answer(&self, request: &AgentRequest) -> Result<AgentResponse> {
        let symbols = extract_symbols(&request.query);

        let (articles, provider_failed) =
            match self.provider.fetch_news(&symbols, ARTICLE_LIMIT).await {
                Ok(articles) => (articles, false),
                Err(e) => {
                    warn!("News provider unavailable, degrading to context only: {}", e);
                    (Vec::new(), true)
                }
            };

        info!(
            symbols = ?symbols,
            article_count = articles.len(),
            "News agent gathered sources"
        );

        let mut user_prompt = format_history(&request.history);
        user_prompt.push_str(&format_articles(&articles));
        user_prompt.push_str(&format_context(&request.context_chunks));
        user_prompt.push_str("\nQuestion: ");
        user_prompt.push_str(&request.query);

        let completion = CompletionRequest::new(&self.settings, SYSTEM_PROMPT, user_prompt);
        let mut text = self.backend.complete(&completion).await?;

        if provider_failed {
            text.push_str(
                "\n\nNote: live news data was unavailable, so this answer draws on \
                 indexed context only.",
            );
        }

        let mut citations: Vec<Citation> = articles
            .iter()
            .map(|article| Citation::Article {
                title: article.title.clone(),
                url: article.url.clone(),
            })
            .collect();
        citations.extend(chunk_citations(&request.context_chunks));

        let confidence = if provider_failed {
            0.4
        } else if articles.is_empty() {
            0.5
        } else {
            0.85
        };

        Ok(AgentResponse {
            text,
            citations,
            confidence,
        })
    }
}

fn format_articles(articles: &[NewsArticle]) -> String {
    if articles.is_empty() {
        return "No recent articles were available.\n".to_string();
    }

    let mut out = String::from("Recent articles:\n");
    for article in articles {
        out.push_str(&format!("- \"{}\" ({})", article.title, article.url));
        if let Some(sentiment) = &article.sentiment {
            out.push_str(&format!(" [sentiment: {}]", sentiment));
        }
        if let Some(published) = &article.published_at {
            out.push_str(&format!(" [published: {}]", published));
        }
        out.push('\n');
    }
    out
}

#[async_trait::async_trait]
impl SpecialistAgent for NewsAgent {
    fn role(&self) -> AgentRole {
        AgentRole::News
    }

    async fn handle(&self, request: &AgentRequest) -> AgentResponse {
        match self.answer(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("News agent failed, returning degraded response: {}", e);
                AgentResponse::degraded(
                    "I couldn't complete the news lookup right now. Please try again shortly.",
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FailingBackend, ScriptedBackend};
    use crate::provider::StaticProvider;

    fn settings() -> AgentSettings {
        AgentSettings {
            role: AgentRole::News,
            model: "openai/gpt-4o-mini".to_string(),
            temperature: 0.3,
        }
    }

    fn articles() -> Vec<NewsArticle> {
        vec![
            NewsArticle {
                title: "Company X beats earnings estimates".to_string(),
                url: "https://example.com/earnings-beat".to_string(),
                published_at: Some("2025-01-02".to_string()),
                sentiment: Some("positive".to_string()),
            },
            NewsArticle {
                title: "Company X guidance raised for next quarter".to_string(),
                url: "https://example.com/guidance".to_string(),
                published_at: None,
                sentiment: None,
            },
        ]
    }

    fn request() -> AgentRequest {
        AgentRequest {
            query: "Any news on Company X earnings?".to_string(),
            context_chunks: Vec::new(),
            history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_cites_every_fetched_article() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            "Company X beat estimates and raised guidance.",
        ]));
        let agent = NewsAgent::new(
            backend.clone(),
            Arc::new(StaticProvider::new(articles())),
            settings(),
        );

        let response = agent.handle(&request()).await;

        let article_citations: Vec<_> = response
            .citations
            .iter()
            .filter(|c| matches!(c, Citation::Article { .. }))
            .collect();
        assert_eq!(article_citations.len(), 2);
        assert!(response.confidence > 0.5);

        // Both articles made it into the backend prompt.
        let recorded = backend.recorded();
        assert!(recorded[0].user.contains("beats earnings estimates"));
        assert!(recorded[0].user.contains("guidance raised"));
    }

    #[tokio::test]
    async fn test_provider_outage_degrades_with_caveat() {
        let agent = NewsAgent::new(
            Arc::new(ScriptedBackend::new(vec!["Indexed context suggests strong results."])),
            Arc::new(StaticProvider::failing()),
            settings(),
        );

        let response = agent.handle(&request()).await;

        assert!(response.text.contains("live news data was unavailable"));
        assert!(response.confidence < 0.5);
        assert!(response.confidence > 0.0);
    }

    #[tokio::test]
    async fn test_backend_failure_becomes_zero_confidence() {
        let agent = NewsAgent::new(
            Arc::new(FailingBackend),
            Arc::new(StaticProvider::new(articles())),
            settings(),
        );

        let response = agent.handle(&request()).await;
        assert_eq!(response.confidence, 0.0);
        assert!(!response.text.is_empty());
    }
}
