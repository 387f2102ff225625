//! Startup configuration
//!
//! Everything is read from the environment exactly once and frozen into an
//! immutable `Config` that is passed by reference to all components.
//! Validation failures halt initialization.

use crate::error::AssistantError;
use crate::models::AgentRole;
use crate::Result;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Embedding dimension the whole pipeline is built around. The indexer,
/// retriever and vector index must all agree on it.
pub const EMBEDDING_DIMENSION: usize = 1024;

/// Per-role language-model settings, loaded once and immutable for the
/// process lifetime.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub role: AgentRole,
    pub model: String,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct VectorIndexConfig {
    pub environment: String,
    pub index_name: String,
    pub dimension: usize,
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub requests_per_minute: u32,
    pub max_token_wait: Duration,
    pub request_timeout: Duration,
    pub retry_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Classification confidence below this routes to the default agent.
    pub confidence_threshold: f32,
    /// Outer bound on the whole per-query state machine.
    pub query_timeout: Duration,
    /// Bound on each individually dispatched agent.
    pub agent_timeout: Duration,
    /// Number of recent turns threaded into prompts.
    pub history_turns: usize,
    /// Chunks fetched per retrieval call.
    pub retrieval_top_k: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    pub classifier_agent: AgentSettings,
    pub news_agent: AgentSettings,
    pub portfolio_agent: AgentSettings,
    pub default_agent: AgentSettings,
    pub vector_index: VectorIndexConfig,
    pub provider: ProviderConfig,
    pub embedding: EmbeddingConfig,
    pub orchestrator: OrchestratorConfig,
}

impl Config {
    /// Load configuration from the environment. Call once at startup.
    pub fn from_env() -> Result<Self> {
        let backend = BackendConfig {
            base_url: env_or("LLM_BASE_URL", "https://openrouter.ai/api/v1"),
            api_key: env_or("OPENROUTER_API_KEY", ""),
        };

        let config = Self {
            backend,
            classifier_agent: agent_settings_from_env(
                AgentRole::Default,
                "CLASSIFIER",
                "openai/gpt-4o-mini",
                0.0,
            )?,
            news_agent: agent_settings_from_env(
                AgentRole::News,
                "NEWS_AGENT",
                "openai/gpt-4o-mini",
                0.3,
            )?,
            portfolio_agent: agent_settings_from_env(
                AgentRole::Portfolio,
                "PORTFOLIO_AGENT",
                "openai/gpt-4o-mini",
                0.2,
            )?,
            default_agent: agent_settings_from_env(
                AgentRole::Default,
                "DEFAULT_AGENT",
                "openai/gpt-4o-mini",
                0.7,
            )?,
            vector_index: VectorIndexConfig {
                environment: env_or("VECTOR_INDEX_ENVIRONMENT", "us-east-1"),
                index_name: env_or("VECTOR_INDEX_NAME", "financial-assistant"),
                dimension: parse_env("VECTOR_INDEX_DIMENSION", EMBEDDING_DIMENSION)?,
                base_url: env_or("VECTOR_INDEX_BASE_URL", ""),
                api_key: env_or("VECTOR_INDEX_API_KEY", ""),
            },
            provider: ProviderConfig {
                base_url: env_or("PROVIDER_BASE_URL", "https://api.marketaux.com"),
                api_key: env_or("PROVIDER_API_KEY", ""),
                requests_per_minute: parse_env("PROVIDER_RATE_LIMIT", 100)?,
                max_token_wait: Duration::from_secs(parse_env("PROVIDER_MAX_TOKEN_WAIT_SECS", 15)?),
                request_timeout: Duration::from_secs(parse_env("PROVIDER_TIMEOUT_SECS", 10)?),
                retry_attempts: parse_env("PROVIDER_RETRY_ATTEMPTS", 3)?,
            },
            embedding: EmbeddingConfig {
                base_url: env_or("EMBEDDING_BASE_URL", "https://openrouter.ai/api/v1"),
                api_key: env_or("EMBEDDING_API_KEY", ""),
                model: env_or("EMBEDDING_MODEL", "multilingual-e5-large"),
                dimension: parse_env("EMBEDDING_DIMENSION", EMBEDDING_DIMENSION)?,
                batch_size: parse_env("EMBEDDING_BATCH_SIZE", 64)?,
                chunk_size: parse_env("EMBEDDING_CHUNK_SIZE", 800)?,
                chunk_overlap: parse_env("EMBEDDING_CHUNK_OVERLAP", 120)?,
            },
            orchestrator: OrchestratorConfig {
                confidence_threshold: parse_env("INTENT_CONFIDENCE_THRESHOLD", 0.3)?,
                query_timeout: Duration::from_secs(parse_env("QUERY_TIMEOUT_SECS", 45)?),
                agent_timeout: Duration::from_secs(parse_env("AGENT_TIMEOUT_SECS", 25)?),
                history_turns: parse_env("HISTORY_TURNS", 12)?,
                retrieval_top_k: parse_env("RETRIEVAL_TOP_K", 5)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Startup-time validation. Dimension and chunking mistakes are fatal
    /// here rather than surfacing mid-query.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension != self.vector_index.dimension {
            return Err(AssistantError::Configuration(format!(
                "embedding dimension {} does not match vector index dimension {}",
                self.embedding.dimension, self.vector_index.dimension
            )));
        }
        if self.embedding.chunk_overlap >= self.embedding.chunk_size {
            return Err(AssistantError::Configuration(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.embedding.chunk_overlap, self.embedding.chunk_size
            )));
        }
        if self.embedding.batch_size == 0 {
            return Err(AssistantError::Configuration(
                "embedding batch_size must be at least 1".to_string(),
            ));
        }
        if self.provider.requests_per_minute == 0 {
            return Err(AssistantError::Configuration(
                "provider rate limit must be at least 1 request per minute".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.orchestrator.confidence_threshold) {
            return Err(AssistantError::Configuration(format!(
                "confidence threshold {} must be within [0, 1]",
                self.orchestrator.confidence_threshold
            )));
        }
        for settings in [
            &self.classifier_agent,
            &self.news_agent,
            &self.portfolio_agent,
            &self.default_agent,
        ] {
            if settings.model.trim().is_empty() {
                return Err(AssistantError::Configuration(format!(
                    "missing model identifier for {}",
                    settings.role
                )));
            }
        }
        Ok(())
    }

    pub fn agent_settings(&self, role: AgentRole) -> &AgentSettings {
        match role {
            AgentRole::News => &self.news_agent,
            AgentRole::Portfolio => &self.portfolio_agent,
            AgentRole::Default => &self.default_agent,
        }
    }
}

fn agent_settings_from_env(
    role: AgentRole,
    prefix: &str,
    default_model: &str,
    default_temperature: f32,
) -> Result<AgentSettings> {
    Ok(AgentSettings {
        role,
        model: env_or(&format!("{}_MODEL", prefix), default_model),
        temperature: parse_env(&format!("{}_TEMPERATURE", prefix), default_temperature)?,
    })
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse::<T>().map_err(|e| {
            AssistantError::Configuration(format!("invalid value for {}: {}", key, e))
        }),
        Err(_) => Ok(default),
    }
}
