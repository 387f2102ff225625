//! Orchestrator - implements the per-query state machine
//!
//! RECEIVED → CLASSIFIED → DISPATCHED → AGGREGATED → RESPONDED
//!
//! Fan-out dispatch runs agents as structured concurrent tasks joined at a
//! single aggregation point; the per-query timeout wraps the whole machine,
//! and dropping the timed-out future cancels every in-flight sub-call.

use crate::agents::{AgentRegistry, AgentRequest, SpecialistAgent};
use crate::backend::{CompletionBackend, CompletionRequest};
use crate::classifier::IntentClassifier;
use crate::config::{AgentSettings, OrchestratorConfig};
use crate::index::Retriever;
use crate::models::{AgentResponse, AgentRole, ConversationTurn, QueryOutcome};
use crate::session::SessionManager;
use futures::future::join_all;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const TIMEOUT_MESSAGE: &str =
    "I wasn't able to complete the analysis in time. Please try again in a moment.";

const RECONCILE_SYSTEM_PROMPT: &str = "You merge answers from specialist financial agents \
into one coherent response. When sub-answers conflict, prefer the one with higher \
confidence. Do not mention the agents or the merging process.";

/// Coordinates classification, retrieval, dispatch and aggregation for
/// every query.
pub struct Orchestrator {
    classifier: IntentClassifier,
    registry: AgentRegistry,
    retriever: Arc<Retriever>,
    sessions: Arc<SessionManager>,
    reconciler: Arc<dyn CompletionBackend>,
    reconciler_settings: AgentSettings,
    options: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        classifier: IntentClassifier,
        registry: AgentRegistry,
        retriever: Arc<Retriever>,
        sessions: Arc<SessionManager>,
        reconciler: Arc<dyn CompletionBackend>,
        reconciler_settings: AgentSettings,
        options: OrchestratorConfig,
    ) -> Self {
        Self {
            classifier,
            registry,
            retriever,
            sessions,
            reconciler,
            reconciler_settings,
            options,
        }
    }

    /// Single entry point: answer a query within the configured bound. The
    /// caller always receives an outcome, degraded if the machine ran out
    /// of time.
    pub async fn query(&self, text: &str, session_id: &str) -> QueryOutcome {
        let start = Instant::now();

        let outcome =
            match tokio::time::timeout(self.options.query_timeout, self.run(text, session_id))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(session_id, "Per-query timeout elapsed, responding degraded");

                    let outcome = QueryOutcome {
                        text: TIMEOUT_MESSAGE.to_string(),
                        citations: Vec::new(),
                    };
                    if let Err(e) = self
                        .sessions
                        .append(
                            session_id,
                            ConversationTurn::agent(TIMEOUT_MESSAGE, "orchestrator"),
                        )
                        .await
                    {
                        warn!("Failed to record timeout turn: {}", e);
                    }
                    outcome
                }
            };

        info!(
            session_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Orchestrator: query answered"
        );

        outcome
    }

    async fn run(&self, text: &str, session_id: &str) -> QueryOutcome {
        let mut trace: Vec<String> = Vec::new();

        // === RECEIVED ===
        info!(session_id, query = %text, "Orchestrator: query received");
        trace.push("RECEIVED: query accepted".to_string());

        // Prior turns only; the current query is appended afterwards.
        let history = match self
            .sessions
            .history(session_id, self.options.history_turns)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!("Session history unavailable, continuing without it: {}", e);
                Vec::new()
            }
        };

        if let Err(e) = self
            .sessions
            .append(session_id, ConversationTurn::user(text))
            .await
        {
            warn!("Failed to record user turn: {}", e);
        }

        // === CLASSIFIED ===
        let classification = self.classifier.classify(text, &history).await;
        trace.push(format!(
            "CLASSIFIED: {:?} (confidence {:.2}, symbols {:?})",
            classification.roles, classification.confidence, classification.symbols
        ));

        let roles = if classification.confidence < self.options.confidence_threshold {
            info!(
                confidence = classification.confidence,
                threshold = self.options.confidence_threshold,
                "Low-confidence classification, routing to default agent"
            );
            vec![AgentRole::Default]
        } else {
            classification.roles
        };

        let context = match self
            .retriever
            .retrieve(text, self.options.retrieval_top_k)
            .await
        {
            Ok(context) => context,
            Err(e) => {
                warn!("Retrieval failed, continuing without context: {}", e);
                Vec::new()
            }
        };
        trace.push(format!("RETRIEVED: {} context chunk(s)", context.len()));

        // === DISPATCHED ===
        let request = Arc::new(AgentRequest {
            query: text.to_string(),
            context_chunks: context,
            history,
        });

        let tasks = roles.iter().map(|role| {
            let role = *role;
            let agent = self.registry.get(role);
            let request = Arc::clone(&request);
            let agent_timeout = self.options.agent_timeout;

            async move { dispatch_one(role, agent, request, agent_timeout).await }
        });

        let responses = join_all(tasks).await;
        trace.push(format!("DISPATCHED: {} agent(s) completed", responses.len()));

        // === AGGREGATED ===
        let aggregated = self.aggregate(text, responses).await;
        trace.push(format!(
            "AGGREGATED: final confidence {:.2}",
            aggregated.confidence
        ));

        // === RESPONDED ===
        let source = roles
            .iter()
            .map(AgentRole::as_str)
            .collect::<Vec<_>>()
            .join("+");
        if let Err(e) = self
            .sessions
            .append(
                session_id,
                ConversationTurn::agent(aggregated.text.clone(), source),
            )
            .await
        {
            warn!("Failed to record agent turn: {}", e);
        }
        trace.push("RESPONDED: turn recorded".to_string());

        debug!(?trace, "Query trace");

        QueryOutcome {
            text: aggregated.text,
            citations: aggregated.citations,
        }
    }

    /// Merge dispatched responses. One response passes through; several are
    /// reconciled by an extra backend call that prefers higher-confidence
    /// sub-answers on conflict, with confidence-ordered concatenation as
    /// the degraded fallback.
    async fn aggregate(&self, query: &str, mut responses: Vec<AgentResponse>) -> AgentResponse {
        if responses.len() <= 1 {
            return responses
                .pop()
                .unwrap_or_else(|| AgentResponse::degraded("No agent was able to answer."));
        }

        responses.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        });

        let mut citations = Vec::new();
        let mut seen = HashSet::new();
        for response in &responses {
            for citation in &response.citations {
                if seen.insert(citation.key()) {
                    citations.push(citation.clone());
                }
            }
        }

        let mut prompt =
            String::from("Sub-answers from specialist agents, highest confidence first:\n\n");
        for (i, response) in responses.iter().enumerate() {
            prompt.push_str(&format!(
                "[answer {} | confidence {:.2}]\n{}\n\n",
                i + 1,
                response.confidence,
                response.text
            ));
        }
        prompt.push_str(&format!(
            "User question: {}\n\nWrite one coherent answer.",
            query
        ));

        let request =
            CompletionRequest::new(&self.reconciler_settings, RECONCILE_SYSTEM_PROMPT, prompt);

        match self.reconciler.complete(&request).await {
            Ok(text) => AgentResponse {
                text,
                citations,
                confidence: responses[0].confidence,
            },
            Err(e) => {
                warn!("Reconciliation failed, concatenating by confidence: {}", e);
                let text = responses
                    .iter()
                    .map(|response| response.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                AgentResponse {
                    text,
                    citations,
                    confidence: responses
                        .last()
                        .map(|response| response.confidence)
                        .unwrap_or(0.0),
                }
            }
        }
    }
}

async fn dispatch_one(
    role: AgentRole,
    agent: Option<Arc<dyn SpecialistAgent>>,
    request: Arc<AgentRequest>,
    agent_timeout: std::time::Duration,
) -> AgentResponse {
    let Some(agent) = agent else {
        warn!(%role, "No agent registered for role");
        return AgentResponse::degraded(format!("No {} is available.", role));
    };

    match tokio::time::timeout(agent_timeout, agent.handle(&request)).await {
        Ok(response) => {
            debug!(%role, confidence = response.confidence, "Agent completed");
            response
        }
        Err(_) => {
            warn!(%role, "Agent timed out");
            AgentResponse::degraded(format!("The {} timed out before finishing.", role))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{DefaultAgent, NewsAgent, PortfolioAgent};
    use crate::backend::{FailingBackend, ScriptedBackend};
    use crate::config::{EmbeddingConfig, EMBEDDING_DIMENSION};
    use crate::index::{HashEmbeddingBackend, InMemoryVectorIndex, Indexer};
    use crate::models::{Citation, NewsArticle};
    use crate::provider::StaticProvider;
    use crate::seed;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    fn settings(role: AgentRole, temperature: f32) -> AgentSettings {
        AgentSettings {
            role,
            model: "openai/gpt-4o-mini".to_string(),
            temperature,
        }
    }

    fn options() -> OrchestratorConfig {
        OrchestratorConfig {
            confidence_threshold: 0.3,
            query_timeout: Duration::from_secs(30),
            agent_timeout: Duration::from_secs(10),
            history_turns: 12,
            retrieval_top_k: 5,
        }
    }

    fn empty_retriever() -> Arc<Retriever> {
        let embedder = Arc::new(HashEmbeddingBackend::new(EMBEDDING_DIMENSION));
        let index = Arc::new(InMemoryVectorIndex::new(EMBEDDING_DIMENSION));
        Arc::new(Retriever::new(embedder, index).unwrap())
    }

    /// Agent stub that counts invocations and replies with a fixed text.
    struct StubAgent {
        role: AgentRole,
        reply: String,
        confidence: f32,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl StubAgent {
        fn new(role: AgentRole, reply: &str, confidence: f32) -> Self {
            Self {
                role,
                reply: reply.to_string(),
                confidence,
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn slow(role: AgentRole, delay: Duration) -> Self {
            Self {
                role,
                reply: "slow reply".to_string(),
                confidence: 0.9,
                delay: Some(delay),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(AtomicOrdering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl SpecialistAgent for StubAgent {
        fn role(&self) -> AgentRole {
            self.role
        }

        async fn handle(&self, _request: &AgentRequest) -> AgentResponse {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            AgentResponse {
                text: self.reply.clone(),
                citations: Vec::new(),
                confidence: self.confidence,
            }
        }
    }

    fn orchestrator_with(
        classifier_backend: Arc<dyn CompletionBackend>,
        registry: AgentRegistry,
        retriever: Arc<Retriever>,
        sessions: Arc<SessionManager>,
        reconciler: Arc<dyn CompletionBackend>,
        options: OrchestratorConfig,
    ) -> Orchestrator {
        Orchestrator::new(
            IntentClassifier::new(classifier_backend, settings(AgentRole::Default, 0.0)),
            registry,
            retriever,
            sessions,
            reconciler,
            settings(AgentRole::Default, 0.0),
            options,
        )
    }

    #[tokio::test]
    async fn test_low_confidence_routes_to_default_agent() {
        let default_stub = Arc::new(StubAgent::new(AgentRole::Default, "DEFAULT REPLY", 0.6));
        let news_stub = Arc::new(StubAgent::new(AgentRole::News, "NEWS REPLY", 0.8));

        let mut registry = AgentRegistry::new();
        registry.register(default_stub.clone());
        registry.register(news_stub.clone());

        // Classifier names the news agent but with confidence below 0.3.
        let classifier_backend = Arc::new(ScriptedBackend::new(vec![
            r#"{"roles": ["news"], "confidence": 0.15, "symbols": []}"#,
        ]));

        let orchestrator = orchestrator_with(
            classifier_backend,
            registry,
            empty_retriever(),
            Arc::new(SessionManager::in_memory()),
            Arc::new(ScriptedBackend::new(vec![])),
            options(),
        );

        let outcome = orchestrator.query("mumble mumble", "s-1").await;

        assert_eq!(outcome.text, "DEFAULT REPLY");
        assert_eq!(default_stub.call_count(), 1);
        assert_eq!(news_stub.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fan_out_reconciles_multiple_agents() {
        let news_stub = Arc::new(StubAgent::new(AgentRole::News, "news view", 0.7));
        let portfolio_stub = Arc::new(StubAgent::new(AgentRole::Portfolio, "portfolio view", 0.9));

        let mut registry = AgentRegistry::new();
        registry.register(news_stub.clone());
        registry.register(portfolio_stub.clone());

        let classifier_backend = Arc::new(ScriptedBackend::new(vec![
            r#"{"roles": ["news", "portfolio"], "confidence": 0.9, "symbols": []}"#,
        ]));
        let reconciler = Arc::new(ScriptedBackend::new(vec!["MERGED ANSWER"]));

        let orchestrator = orchestrator_with(
            classifier_backend,
            registry,
            empty_retriever(),
            Arc::new(SessionManager::in_memory()),
            reconciler.clone(),
            options(),
        );

        let outcome = orchestrator
            .query("How do headlines affect my holdings?", "s-1")
            .await;

        assert_eq!(outcome.text, "MERGED ANSWER");
        assert_eq!(news_stub.call_count(), 1);
        assert_eq!(portfolio_stub.call_count(), 1);

        // The reconciler saw both sub-answers, higher confidence first.
        let recorded = reconciler.recorded();
        assert_eq!(recorded.len(), 1);
        let prompt = &recorded[0].user;
        assert!(prompt.find("portfolio view").unwrap() < prompt.find("news view").unwrap());
    }

    #[tokio::test]
    async fn test_reconciler_failure_concatenates_by_confidence() {
        let news_stub = Arc::new(StubAgent::new(AgentRole::News, "news view", 0.5));
        let portfolio_stub = Arc::new(StubAgent::new(AgentRole::Portfolio, "portfolio view", 0.9));

        let mut registry = AgentRegistry::new();
        registry.register(news_stub);
        registry.register(portfolio_stub);

        let classifier_backend = Arc::new(ScriptedBackend::new(vec![
            r#"{"roles": ["news", "portfolio"], "confidence": 0.9, "symbols": []}"#,
        ]));

        let orchestrator = orchestrator_with(
            classifier_backend,
            registry,
            empty_retriever(),
            Arc::new(SessionManager::in_memory()),
            Arc::new(FailingBackend),
            options(),
        );

        let outcome = orchestrator.query("news and holdings", "s-1").await;

        // Degraded merge keeps both answers, higher confidence first.
        assert!(outcome.text.starts_with("portfolio view"));
        assert!(outcome.text.contains("news view"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_timeout_yields_degraded_response() {
        let slow = Arc::new(StubAgent::slow(AgentRole::Default, Duration::from_secs(120)));
        let mut registry = AgentRegistry::new();
        registry.register(slow);

        let sessions = Arc::new(SessionManager::in_memory());
        let mut opts = options();
        opts.query_timeout = Duration::from_secs(1);

        let orchestrator = orchestrator_with(
            Arc::new(FailingBackend),
            registry,
            empty_retriever(),
            sessions.clone(),
            Arc::new(ScriptedBackend::new(vec![])),
            opts,
        );

        let outcome = orchestrator.query("anything", "s-1").await;
        assert!(outcome.text.contains("in time"));

        // The degraded answer is still recorded as a turn.
        let history = sessions.history("s-1", 10).await.unwrap();
        assert!(history.iter().any(|turn| turn.text.contains("in time")));
    }

    #[tokio::test]
    async fn test_portfolio_concentration_end_to_end() {
        let embedder = Arc::new(HashEmbeddingBackend::new(EMBEDDING_DIMENSION));
        let index = Arc::new(InMemoryVectorIndex::new(EMBEDDING_DIMENSION));
        let embedding_config = EmbeddingConfig {
            base_url: String::new(),
            api_key: String::new(),
            model: "multilingual-e5-large".to_string(),
            dimension: EMBEDDING_DIMENSION,
            batch_size: 16,
            chunk_size: 4000,
            chunk_overlap: 200,
        };
        let indexer = Indexer::new(embedder.clone(), index.clone(), &embedding_config).unwrap();
        indexer
            .ingest(
                seed::SAMPLE_PORTFOLIO_DOC_ID,
                &seed::sample_portfolio_json(),
                HashMap::new(),
            )
            .await
            .unwrap();

        let portfolio_backend = Arc::new(ScriptedBackend::new(vec![
            "Technology makes up the bulk of your portfolio, a clear sector \
             concentration risk worth addressing.",
        ]));
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(PortfolioAgent::new(
            portfolio_backend.clone(),
            settings(AgentRole::Portfolio, 0.2),
        )));

        let classifier_backend = Arc::new(ScriptedBackend::new(vec![
            r#"{"roles": ["portfolio"], "confidence": 0.95, "symbols": []}"#,
        ]));

        let orchestrator = orchestrator_with(
            classifier_backend,
            registry,
            Arc::new(Retriever::new(embedder, index).unwrap()),
            Arc::new(SessionManager::in_memory()),
            Arc::new(ScriptedBackend::new(vec![])),
            options(),
        );

        let outcome = orchestrator
            .query("What's my portfolio's sector concentration risk?", "s-1")
            .await;

        assert!(outcome.text.contains("concentration"));
        assert!(
            outcome
                .citations
                .iter()
                .any(|c| matches!(c, Citation::Chunk { source_doc_id, .. }
                    if source_doc_id == seed::SAMPLE_PORTFOLIO_DOC_ID)),
            "answer must cite the retrieved portfolio chunks"
        );

        // The narrative prompt carried computed allocation metrics.
        let recorded = portfolio_backend.recorded();
        assert!(recorded[0].user.contains("Sector allocations"));
        assert!(recorded[0].user.contains("Technology"));
    }

    #[tokio::test]
    async fn test_news_end_to_end_cites_articles_and_survives_outage() {
        let articles = vec![
            NewsArticle {
                title: "Company X beats earnings estimates".to_string(),
                url: "https://example.com/a".to_string(),
                published_at: None,
                sentiment: None,
            },
            NewsArticle {
                title: "Company X raises guidance".to_string(),
                url: "https://example.com/b".to_string(),
                published_at: None,
                sentiment: None,
            },
        ];

        let build = |provider: StaticProvider| {
            let mut registry = AgentRegistry::new();
            registry.register(Arc::new(NewsAgent::new(
                Arc::new(ScriptedBackend::new(vec!["Earnings beat and raised guidance."])),
                Arc::new(provider),
                settings(AgentRole::News, 0.3),
            )));

            orchestrator_with(
                Arc::new(ScriptedBackend::new(vec![
                    r#"{"roles": ["news"], "confidence": 0.9, "symbols": ["X"]}"#,
                ])),
                registry,
                empty_retriever(),
                Arc::new(SessionManager::in_memory()),
                Arc::new(ScriptedBackend::new(vec![])),
                options(),
            )
        };

        let outcome = build(StaticProvider::new(articles))
            .query("Any news on Company X earnings?", "s-1")
            .await;

        let cited_urls: Vec<_> = outcome
            .citations
            .iter()
            .filter_map(|c| match c {
                Citation::Article { url, .. } => Some(url.clone()),
                _ => None,
            })
            .collect();
        assert!(cited_urls.contains(&"https://example.com/a".to_string()));
        assert!(cited_urls.contains(&"https://example.com/b".to_string()));

        // Provider outage: still answers, degraded, within the bound.
        let outcome = build(StaticProvider::failing())
            .query("Any news on Company X earnings?", "s-2")
            .await;
        assert!(outcome.text.contains("unavailable"));
    }

    #[tokio::test]
    async fn test_second_query_sees_first_turn_in_prompt() {
        let default_backend = Arc::new(ScriptedBackend::new(vec![
            "RSI is a momentum indicator.",
            "Above 70 it usually signals overbought conditions.",
        ]));
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(DefaultAgent::new(
            default_backend.clone(),
            settings(AgentRole::Default, 0.7),
        )));

        let orchestrator = orchestrator_with(
            Arc::new(FailingBackend), // keyword fallback routes both to default
            registry,
            empty_retriever(),
            Arc::new(SessionManager::in_memory()),
            Arc::new(ScriptedBackend::new(vec![])),
            options(),
        );

        orchestrator.query("what is RSI?", "s-1").await;
        orchestrator.query("and when is it overbought?", "s-1").await;

        let recorded = default_backend.recorded();
        assert_eq!(recorded.len(), 2);
        assert!(
            recorded[1].user.contains("what is RSI?"),
            "second prompt must include the first turn's text"
        );
        assert!(recorded[1].user.contains("RSI is a momentum indicator."));
    }
}
