use anyhow::Result;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::agent::splitter::TextSplitter;
use crate::agent::{
    AgentExecutor, AgentSettings, Guardrails, InferenceClient, StandardTools, TypesenseClient,
    VectorMemory,
};
use crate::api::rest::create_router;
use crate::shared::config::{OllieConfig, StoreBackend};
use crate::shared::history::ChatHistory;
use crate::shared::models::AppState;
use crate::shared::store::{KvStore, MemoryStore, RedisStore};

pub async fn run_rest_server(config: OllieConfig, config_path: Option<PathBuf>) -> Result<()> {
    ctrlc::set_handler(move || {
        info!("Shutting down olliechat API...");
        std::process::exit(0);
    })?;

    // Log startup banner
    info!(
        r#"
       _ _ _           _           _
  ___ | | (_) ___  ___| |__   __ _| |_
 / _ \| | | |/ _ \/ __| '_ \ / _` | __|
| (_) | | | |  __/ (__| | | | (_| | |_
 \___/|_|_|_|\___|\___|_| |_|\__,_|\__|

Starting olliechat REST API service...
PID: {}
"#,
        process::id()
    );

    match &config_path {
        Some(path) => info!("Loaded config from {}", path.display()),
        None => info!("No config file found; using defaults and environment"),
    }

    if config.secrets.uses_default_jwt_secret() {
        warn!("JWT_SECRET not set; tokens are signed with the public development key");
    }

    let store = connect_store(&config).await?;
    let history = Arc::new(ChatHistory::new(store));

    if config.secrets.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY not set; model requests are sent without credentials");
    }
    let inference = Arc::new(InferenceClient::new(
        &config.model.base_url,
        config.secrets.openai_api_key.as_deref(),
        &config.model.embedding_model,
        Duration::from_secs(config.model.request_timeout_secs),
    )?);

    let memory = build_memory(&config, inference.clone())?;
    let tools = StandardTools::from_config(&config, inference.clone(), inference.clone(), memory)?;

    let agent = AgentExecutor::new(
        inference,
        Arc::new(tools),
        history.clone(),
        Guardrails::new(
            config.limits.max_input_chars,
            config.limits.max_tool_output_chars,
        ),
        AgentSettings {
            chat_model: config.model.chat_model.clone(),
            temperature: config.model.temperature,
            max_iterations: config.model.max_iterations,
            system_prefix: config.model.system_prefix.clone(),
        },
    );
    info!(
        model = %config.model.chat_model,
        max_iterations = config.model.max_iterations,
        "Agent ready"
    );

    let app_state = Arc::new(AppState {
        history,
        agent: Arc::new(agent),
        jwt_secret: config.secrets.jwt_secret.clone(),
    });

    // Build REST router
    info!("Building REST API routes...");
    let app = create_router(app_state);

    // Start server
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Binding to: {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("API started successfully!");
    info!(
        "REST API Endpoint: http://{}:{}/api",
        config.server.host, config.server.port
    );
    info!("Ready to accept requests...");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn connect_store(config: &OllieConfig) -> Result<Arc<dyn KvStore>> {
    match config.store.backend {
        StoreBackend::Redis => {
            info!("Connecting to key-value store...");
            match RedisStore::connect(&config.store.url).await {
                Ok(store) => {
                    info!("Connected to key-value store successfully!");
                    Ok(Arc::new(store))
                }
                Err(e) => {
                    error!("Failed to connect to key-value store: {}", e);
                    error!("Please ensure Redis is running and KV_URL is set correctly");
                    error!("Example: KV_URL=redis://127.0.0.1:6379");
                    Err(anyhow::anyhow!(
                        "Key-value store not available. Please check your configuration."
                    ))
                }
            }
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store; chats are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn build_memory(
    config: &OllieConfig,
    inference: Arc<InferenceClient>,
) -> Result<Option<Arc<VectorMemory>>> {
    let (Some(url), Some(api_key)) = (
        config.memory.typesense_url.as_deref(),
        config.secrets.typesense_api_key.as_deref(),
    ) else {
        return Ok(None);
    };

    let typesense = TypesenseClient::new(
        url,
        api_key,
        &config.memory.collection,
        Duration::from_secs(config.model.request_timeout_secs),
    )?;
    info!(url = %url, collection = %config.memory.collection, "Vector memory enabled");

    Ok(Some(Arc::new(VectorMemory::new(
        typesense,
        inference,
        TextSplitter::new(config.memory.chunk_size, config.memory.chunk_overlap),
        config.memory.search_k,
    ))))
}
