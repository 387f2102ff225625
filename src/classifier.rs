//! Intent classification
//!
//! Decides which specialized agent(s) should handle a query. The primary
//! path is a language-model call over the query plus recent history; if the
//! model output does not parse, a keyword heuristic takes over so routing
//! never fails outright.

use crate::backend::{CompletionBackend, CompletionRequest};
use crate::config::AgentSettings;
use crate::error::AssistantError;
use crate::models::{AgentRole, ConversationTurn, IntentClassification};
use crate::Result;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Static keyword lists — zero allocation
const NEWS_KEYWORDS: &[&str] = &[
    "news", "headline", "headlines", "article", "articles", "announced",
    "announcement", "press", "earnings call", "report",
];

const PORTFOLIO_KEYWORDS: &[&str] = &[
    "portfolio", "holding", "holdings", "allocation", "allocations",
    "exposure", "concentration", "diversif", "risk", "rebalance",
    "my stocks", "my positions",
];

/// Company-name to ticker mapping used for symbol extraction.
const COMPANY_SYMBOLS: &[(&str, &str)] = &[
    ("apple", "AAPL"),
    ("microsoft", "MSFT"),
    ("google", "GOOGL"),
    ("alphabet", "GOOGL"),
    ("amazon", "AMZN"),
    ("meta", "META"),
    ("tesla", "TSLA"),
    ("nvidia", "NVDA"),
    ("taiwan semiconductor", "TSM"),
    ("tsmc", "TSM"),
    ("samsung", "005930.KS"),
    ("alibaba", "BABA"),
    ("pinduoduo", "PDD"),
    ("jpmorgan", "JPM"),
    ("johnson & johnson", "JNJ"),
];

const CLASSIFIER_SYSTEM_PROMPT: &str = r#"You are the routing step of a financial assistant.

Classify the user's query into one or more target agents:
- "news": recent headlines, announcements, market-moving events
- "portfolio": the user's own holdings, allocations, exposure, risk
- "default": general financial questions and anything else

Rules:
- A query may legitimately span several agents.
- Return ONLY valid JSON, no explanation text.
- JSON format:

{
  "roles": ["news"],
  "confidence": 0.9,
  "symbols": ["AAPL"]
}
"#;

/// Language-model-backed classifier with a deterministic keyword fallback.
pub struct IntentClassifier {
    backend: Arc<dyn CompletionBackend>,
    settings: AgentSettings,
}

impl IntentClassifier {
    pub fn new(backend: Arc<dyn CompletionBackend>, settings: AgentSettings) -> Self {
        Self { backend, settings }
    }

    /// Classify a query in the context of recent conversation turns.
    /// Never fails: unparseable or unavailable backends degrade to the
    /// keyword heuristic.
    pub async fn classify(
        &self,
        query: &str,
        history: &[ConversationTurn],
    ) -> IntentClassification {
        let mut user_prompt = String::new();
        if !history.is_empty() {
            user_prompt.push_str("Recent conversation:\n");
            for turn in history {
                user_prompt.push_str(&format!("- {:?}: {}\n", turn.role, turn.text));
            }
            user_prompt.push('\n');
        }
        user_prompt.push_str("Query: ");
        user_prompt.push_str(query);

        let request = CompletionRequest::new(&self.settings, CLASSIFIER_SYSTEM_PROMPT, user_prompt);

        match self.backend.complete(&request).await {
            Ok(raw) => match parse_classification(&raw) {
                Ok(classification) => {
                    debug!(
                        roles = ?classification.roles,
                        confidence = classification.confidence,
                        "Intent classified"
                    );
                    classification
                }
                Err(e) => {
                    warn!("Classification output unparseable, using keywords: {}", e);
                    keyword_classification(query)
                }
            },
            Err(e) => {
                warn!("Classification backend unavailable, using keywords: {}", e);
                keyword_classification(query)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    roles: Vec<String>,
    confidence: f32,
    #[serde(default)]
    symbols: Vec<String>,
}

/// Parse the classifier's JSON reply, tolerating markdown fences.
pub fn parse_classification(response: &str) -> Result<IntentClassification> {
    let cleaned = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let raw: RawClassification = serde_json::from_str(cleaned).map_err(|e| {
        AssistantError::MalformedResponse(format!(
            "failed to parse classification: {} | raw={}",
            e, response
        ))
    })?;

    let mut roles = Vec::new();
    for name in &raw.roles {
        let role = match name.to_lowercase().as_str() {
            "news" | "news_agent" => AgentRole::News,
            "portfolio" | "portfolio_agent" => AgentRole::Portfolio,
            "default" | "default_agent" | "general" => AgentRole::Default,
            other => {
                warn!("Unknown agent role in classification: {}", other);
                continue;
            }
        };
        if !roles.contains(&role) {
            roles.push(role);
        }
    }

    if roles.is_empty() {
        return Err(AssistantError::MalformedResponse(
            "classification named no known roles".to_string(),
        ));
    }

    Ok(IntentClassification {
        roles,
        confidence: raw.confidence.clamp(0.0, 1.0),
        symbols: raw.symbols,
    })
}

/// Deterministic keyword fallback used when the backend is unavailable or
/// returns something unparseable.
pub fn keyword_classification(query: &str) -> IntentClassification {
    let lowered = query.to_lowercase();

    let news_hits = NEWS_KEYWORDS
        .iter()
        .filter(|kw| lowered.contains(**kw))
        .count();
    let portfolio_hits = PORTFOLIO_KEYWORDS
        .iter()
        .filter(|kw| lowered.contains(**kw))
        .count();

    let mut roles = Vec::new();
    if news_hits > 0 {
        roles.push(AgentRole::News);
    }
    if portfolio_hits > 0 {
        roles.push(AgentRole::Portfolio);
    }

    let confidence = if roles.is_empty() {
        roles.push(AgentRole::Default);
        0.2
    } else {
        let hits = news_hits + portfolio_hits;
        (0.5 + 0.1 * hits as f32).min(0.9)
    };

    IntentClassification {
        roles,
        confidence,
        symbols: extract_symbols(query),
    }
}

/// Pull ticker symbols out of a query: known company names first, then any
/// short all-uppercase token that looks like a ticker.
pub fn extract_symbols(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();
    let mut symbols: Vec<String> = Vec::new();

    for (company, symbol) in COMPANY_SYMBOLS {
        if lowered.contains(company) && !symbols.iter().any(|s| s == symbol) {
            symbols.push((*symbol).to_string());
        }
    }

    for word in query.split_whitespace() {
        let token = word.trim_matches(|c: char| !c.is_ascii_alphanumeric());
        if token.len() >= 2
            && token.len() <= 5
            && token.chars().all(|c| c.is_ascii_uppercase())
            && !symbols.iter().any(|s| s == token)
        {
            symbols.push(token.to_string());
        }
    }

    symbols
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_news_query() {
        let classification = keyword_classification("Any news on Apple earnings?");
        assert!(classification.roles.contains(&AgentRole::News));
        assert!(classification.confidence >= 0.5);
        assert!(classification.symbols.contains(&"AAPL".to_string()));
    }

    #[test]
    fn test_keyword_portfolio_query() {
        let classification =
            keyword_classification("What's my portfolio's sector concentration risk?");
        assert!(classification.roles.contains(&AgentRole::Portfolio));
    }

    #[test]
    fn test_keyword_spanning_query_fans_out() {
        let classification =
            keyword_classification("How do today's headlines affect my portfolio exposure?");
        assert!(classification.roles.contains(&AgentRole::News));
        assert!(classification.roles.contains(&AgentRole::Portfolio));
    }

    #[test]
    fn test_unmatched_query_falls_back_with_low_confidence() {
        let classification = keyword_classification("hello there");
        assert_eq!(classification.roles, vec![AgentRole::Default]);
        assert!(classification.confidence < 0.3);
    }

    #[test]
    fn test_parse_classification_strips_fences() {
        let raw = "```json\n{\"roles\": [\"portfolio\"], \"confidence\": 0.85, \"symbols\": []}\n```";
        let classification = parse_classification(raw).unwrap();
        assert_eq!(classification.roles, vec![AgentRole::Portfolio]);
        assert!((classification.confidence - 0.85).abs() < f32::EPSILON);
    }

    #[test]
    fn test_parse_classification_rejects_garbage() {
        assert!(parse_classification("not json at all").is_err());
        assert!(parse_classification("{\"roles\": [\"zzz\"], \"confidence\": 0.9}").is_err());
    }

    #[test]
    fn test_extract_uppercase_tickers() {
        let symbols = extract_symbols("Compare TSLA and NVDA performance");
        assert!(symbols.contains(&"TSLA".to_string()));
        assert!(symbols.contains(&"NVDA".to_string()));
    }
}
