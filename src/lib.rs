//! Financial Assistant Core
//!
//! A multi-agent financial assistant that:
//! - Routes user questions to specialized reasoning agents by intent
//! - Augments each agent with context retrieved from a semantic index
//! - Wraps the market/news provider behind a fair token-bucket rate limiter
//! - Aggregates per-agent answers into a single cited response
//! - Threads conversation history through every prompt for multi-turn coherence
//!
//! PIPELINE:
//! INPUT → CLASSIFY → RETRIEVE → DISPATCH → AGGREGATE → RESPOND

pub mod agents;
pub mod api;
pub mod backend;
pub mod classifier;
pub mod config;
pub mod error;
pub mod index;
pub mod models;
pub mod orchestrator;
pub mod provider;
pub mod seed;
pub mod session;
pub mod speech;

pub use error::Result;

// Re-export common types
pub use classifier::IntentClassifier;
pub use models::*;
pub use orchestrator::Orchestrator;
