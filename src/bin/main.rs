use financial_assistant::{
    agents::{AgentRegistry, DefaultAgent, NewsAgent, PortfolioAgent},
    backend::ScriptedBackend,
    classifier::IntentClassifier,
    config::Config,
    index::{HashEmbeddingBackend, InMemoryVectorIndex, Indexer, Retriever},
    models::NewsArticle,
    orchestrator::Orchestrator,
    provider::StaticProvider,
    seed,
    session::SessionManager,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Offline demo: the full pipeline wired with in-process stand-ins for
/// every external collaborator, seeded with the sample portfolio.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    dotenv::dotenv().ok();

    info!("Financial Assistant demo starting");

    let config = Config::from_env()?;

    // Retrieval pipeline over an in-memory index
    let embedder = Arc::new(HashEmbeddingBackend::new(config.embedding.dimension));
    let index = Arc::new(InMemoryVectorIndex::new(config.vector_index.dimension));
    let indexer = Indexer::new(embedder.clone(), index.clone(), &config.embedding)?;
    let retriever = Arc::new(Retriever::new(embedder, index)?);

    indexer
        .ingest(
            seed::SAMPLE_PORTFOLIO_DOC_ID,
            &seed::sample_portfolio_json(),
            HashMap::new(),
        )
        .await?;
    info!("Sample portfolio ingested");

    // Scripted backends keep the demo runnable without any API keys.
    let classifier_backend = Arc::new(ScriptedBackend::new(vec![
        r#"{"roles": ["portfolio"], "confidence": 0.95, "symbols": []}"#,
        r#"{"roles": ["news"], "confidence": 0.9, "symbols": ["AAPL"]}"#,
    ]));
    let portfolio_backend = Arc::new(ScriptedBackend::new(vec![
        "Technology accounts for roughly two thirds of your portfolio value, which is a \
         clear sector concentration risk; Financial and Healthcare make up the rest.",
    ]));
    let news_backend = Arc::new(ScriptedBackend::new(vec![
        "Apple beat earnings estimates and raised guidance, and coverage has been \
         broadly positive.",
    ]));
    let default_backend = Arc::new(ScriptedBackend::new(vec![]));
    let reconciler = Arc::new(ScriptedBackend::new(vec![]));

    let provider = Arc::new(StaticProvider::new(vec![
        NewsArticle {
            title: "Apple beats earnings estimates".to_string(),
            url: "https://example.com/apple-earnings".to_string(),
            published_at: Some("2025-01-02".to_string()),
            sentiment: Some("positive".to_string()),
        },
        NewsArticle {
            title: "Apple raises full-year guidance".to_string(),
            url: "https://example.com/apple-guidance".to_string(),
            published_at: None,
            sentiment: None,
        },
    ]));

    let mut registry = AgentRegistry::new();
    registry.register(Arc::new(NewsAgent::new(
        news_backend,
        provider,
        config.news_agent.clone(),
    )));
    registry.register(Arc::new(PortfolioAgent::new(
        portfolio_backend,
        config.portfolio_agent.clone(),
    )));
    registry.register(Arc::new(DefaultAgent::new(
        default_backend,
        config.default_agent.clone(),
    )));

    let orchestrator = Orchestrator::new(
        IntentClassifier::new(classifier_backend, config.classifier_agent.clone()),
        registry,
        retriever,
        Arc::new(SessionManager::in_memory()),
        reconciler,
        config.classifier_agent.clone(),
        config.orchestrator.clone(),
    );

    let queries = [
        "What's my portfolio's sector concentration risk?",
        "Any news on Apple earnings?",
    ];

    for query in queries {
        info!(query, "Running query");
        let outcome = orchestrator.query(query, "demo-session").await;

        println!("\n=== QUERY ===");
        println!("{}", query);
        println!("\n--- Answer ---");
        println!("{}", outcome.text);
        println!("\n--- Citations ({}) ---", outcome.citations.len());
        for citation in &outcome.citations {
            println!("  {:?}", citation);
        }
    }

    Ok(())
}
