use financial_assistant::{
    agents::{AgentRegistry, DefaultAgent, NewsAgent, PortfolioAgent},
    api::{start_server, ApiState},
    backend::HttpCompletionBackend,
    classifier::IntentClassifier,
    config::Config,
    index::{HostedVectorIndex, HttpEmbeddingClient, Indexer, Retriever},
    orchestrator::Orchestrator,
    provider::RateLimitedClient,
    session::SessionManager,
    speech::HttpSpeechService,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let config = Config::from_env()?;

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("Financial Assistant - API Server");
    info!("Port: {}", api_port);

    // Shared completion backend; each agent call carries its own model and
    // temperature.
    let backend = Arc::new(HttpCompletionBackend::new(&config.backend)?);

    // Retrieval pipeline against the hosted vector index
    let embedder = Arc::new(HttpEmbeddingClient::new(&config.embedding)?);
    let index = Arc::new(HostedVectorIndex::new(&config.vector_index)?);
    let indexer = Arc::new(Indexer::new(
        embedder.clone(),
        index.clone(),
        &config.embedding,
    )?);
    let retriever = Arc::new(Retriever::new(embedder, index)?);

    // Rate-limited market/news provider
    let provider = Arc::new(RateLimitedClient::new(&config.provider)?);

    let mut registry = AgentRegistry::new();
    registry.register(Arc::new(NewsAgent::new(
        backend.clone(),
        provider,
        config.news_agent.clone(),
    )));
    registry.register(Arc::new(PortfolioAgent::new(
        backend.clone(),
        config.portfolio_agent.clone(),
    )));
    registry.register(Arc::new(DefaultAgent::new(
        backend.clone(),
        config.default_agent.clone(),
    )));

    let orchestrator = Arc::new(Orchestrator::new(
        IntentClassifier::new(backend.clone(), config.classifier_agent.clone()),
        registry,
        retriever,
        Arc::new(SessionManager::from_env()),
        backend,
        config.classifier_agent.clone(),
        config.orchestrator.clone(),
    ));

    // Optional speech collaborator
    let speech = match std::env::var("SPEECH_BASE_URL") {
        Ok(base_url) if !base_url.trim().is_empty() => {
            let api_key = std::env::var("SPEECH_API_KEY").unwrap_or_default();
            info!("Speech service configured");
            Some(Arc::new(HttpSpeechService::new(&base_url, &api_key)?)
                as Arc<dyn financial_assistant::speech::SpeechService>)
        }
        _ => {
            info!("Speech service not configured, /api/voice disabled");
            None
        }
    };

    info!("Assistant initialized");
    info!("Starting API server...");

    start_server(
        ApiState {
            orchestrator,
            indexer,
            speech,
        },
        api_port,
    )
    .await?;

    Ok(())
}
