//! Specialized agent trait and registry
//!
//! Each agent composes retrieved context, provider data and conversation
//! history into a prompt for its own language-model backend. An agent never
//! surfaces a raw error to the orchestrator: every failure path ends in a
//! well-formed degraded response.

pub mod default;
pub mod news;
pub mod portfolio;

pub use default::DefaultAgent;
pub use news::NewsAgent;
pub use portfolio::PortfolioAgent;

use crate::models::{AgentResponse, AgentRole, Citation, ConversationTurn, ScoredChunk, TurnRole};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything an agent needs to answer one query.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub query: String,
    pub context_chunks: Vec<ScoredChunk>,
    pub history: Vec<ConversationTurn>,
}

/// Common capability all specialized agents implement.
#[async_trait::async_trait]
pub trait SpecialistAgent: Send + Sync {
    fn role(&self) -> AgentRole;
    async fn handle(&self, request: &AgentRequest) -> AgentResponse;
}

/// Role-to-implementation mapping the orchestrator dispatches through.
pub struct AgentRegistry {
    agents: HashMap<AgentRole, Arc<dyn SpecialistAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    pub fn register(&mut self, agent: Arc<dyn SpecialistAgent>) {
        self.agents.insert(agent.role(), agent);
    }

    pub fn get(&self, role: AgentRole) -> Option<Arc<dyn SpecialistAgent>> {
        self.agents.get(&role).cloned()
    }

    pub fn roles(&self) -> Vec<AgentRole> {
        self.agents.keys().copied().collect()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Render retrieved chunks into a prompt section.
pub(crate) fn format_context(chunks: &[ScoredChunk]) -> String {
    if chunks.is_empty() {
        return "No indexed context was retrieved for this query.".to_string();
    }

    let mut out = String::from("Retrieved context:\n");
    for hit in chunks {
        out.push_str(&format!(
            "- [chunk {} from {}] {}\n",
            hit.chunk.id, hit.chunk.source_doc_id, hit.chunk.text
        ));
    }
    out
}

/// Render recent conversation turns into a prompt section.
pub(crate) fn format_history(history: &[ConversationTurn]) -> String {
    if history.is_empty() {
        return String::new();
    }

    let mut out = String::from("Conversation so far:\n");
    for turn in history {
        let speaker = match turn.role {
            TurnRole::User => "User",
            TurnRole::Agent => "Assistant",
        };
        out.push_str(&format!("{}: {}\n", speaker, turn.text));
    }
    out.push('\n');
    out
}

/// Citations for every retrieved chunk an agent drew on.
pub(crate) fn chunk_citations(chunks: &[ScoredChunk]) -> Vec<Citation> {
    chunks
        .iter()
        .map(|hit| Citation::Chunk {
            chunk_id: hit.chunk.id.clone(),
            source_doc_id: hit.chunk.source_doc_id.clone(),
        })
        .collect()
}
