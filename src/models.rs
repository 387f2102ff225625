//! Core data models for the financial assistant

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

//
// ================= Agent Roles =================
//

/// Specialized agent roles the orchestrator can dispatch to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    News,
    Portfolio,
    Default,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::News => "news_agent",
            AgentRole::Portfolio => "portfolio_agent",
            AgentRole::Default => "default_agent",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//
// ================= Document Chunks =================
//

/// A bounded slice of a source document, the unit of retrieval.
/// Immutable once upserted; replaced wholesale on re-ingestion of
/// the same source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub source_doc_id: String,
    pub text: String,
    pub position: usize,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A retrieved chunk together with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Agent,
}

/// A single turn in a session's conversation. Appended monotonically,
/// never mutated after append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub turn_id: Uuid,
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub agent_source: Option<String>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            role: TurnRole::User,
            text: text.into(),
            timestamp: Utc::now(),
            agent_source: None,
        }
    }

    pub fn agent(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            role: TurnRole::Agent,
            text: text.into(),
            timestamp: Utc::now(),
            agent_source: Some(source.into()),
        }
    }
}

//
// ================= Intent Classification =================
//

/// Produced fresh per query; never stored beyond the turn it classifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentClassification {
    pub roles: Vec<AgentRole>,
    pub confidence: f32,
    pub symbols: Vec<String>,
}

//
// ================= Agent Responses =================
//

/// Source reference attached to an answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum Citation {
    Chunk { chunk_id: String, source_doc_id: String },
    Article { title: String, url: String },
}

impl Citation {
    /// Stable key used for de-duplication across merged agent responses.
    pub fn key(&self) -> String {
        match self {
            Citation::Chunk { chunk_id, .. } => format!("chunk:{}", chunk_id),
            Citation::Article { url, .. } => format!("article:{}", url),
        }
    }
}

/// The structured answer every specialized agent produces. Agents never
/// surface raw errors; failures become a degraded response instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub text: String,
    pub citations: Vec<Citation>,
    pub confidence: f32,
}

impl AgentResponse {
    pub fn degraded(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            citations: Vec::new(),
            confidence: 0.0,
        }
    }
}

/// Final outcome returned from the single query entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub text: String,
    pub citations: Vec<Citation>,
}

//
// ================= Provider Data =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsArticle {
    pub title: String,
    pub url: String,
    pub published_at: Option<String>,
    pub sentiment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub change_percent: f64,
    pub date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarningsReport {
    pub symbol: String,
    pub actual_eps: f64,
    pub estimated_eps: f64,
    pub surprise_percent: f64,
    pub date: String,
}

//
// ================= Portfolio =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub name: String,
    pub symbol: String,
    pub shares: f64,
    pub avg_price: f64,
    pub sector: String,
    pub region: String,
}

impl Holding {
    pub fn value(&self) -> f64 {
        self.shares * self.avg_price
    }
}
