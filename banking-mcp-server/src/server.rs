//! Main server implementation

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use tokio::signal;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use banking_mcp_core::rules::default_rules;
use banking_mcp_core::{AgentType, RuleEngine};
use banking_mcp_storage::{
    connect_or_degrade, AgentRegistry, SessionStore, StorageManager, StoreGate, TaskManager,
};

use crate::config::{Config, RulesConfig, SecurityConfig};
use crate::dispatch::{AgentClient, HttpAgentClient};
use crate::health::HealthMonitor;
use crate::orchestrator::Orchestrator;
use crate::routing::ContextRouter;
use crate::{api, seed, Error, Result};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<AgentRegistry>,
    pub sessions: Arc<SessionStore>,
    pub rules: Arc<RuleEngine>,
    /// Absent when running without a durable store
    pub gate: Option<Arc<StoreGate>>,
    pub security: Arc<SecurityConfig>,
    /// Uploaded rule sets are written back here
    pub rules_path: Option<PathBuf>,
}

/// Main server wiring the services together
pub struct Server {
    config: Config,
    state: AppState,
    storage: Option<StorageManager>,
    background: Vec<JoinHandle<()>>,
}

impl Server {
    /// Build every component and start the background jobs
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        info!("Initializing server components");

        let storage = match config.storage() {
            Some(database) => connect_or_degrade(&database).await,
            None => {
                info!("Persistence disabled, running memory-only");
                None
            }
        };

        let registry = Arc::new(AgentRegistry::new(
            storage.as_ref().map(StorageManager::agents),
        ));
        let mut tasks = TaskManager::new(storage.as_ref().map(StorageManager::tasks));
        if let Some(retention) = config.task_retention() {
            tasks = tasks.with_retention(retention);
        }
        let tasks = Arc::new(tasks);
        let sessions = Arc::new(SessionStore::new(
            storage.as_ref().map(StorageManager::sessions),
            config.session_ttl(),
        ));
        let rules = Arc::new(load_rules(&config.rules)?);

        let client: Arc<dyn AgentClient> = Arc::new(
            HttpAgentClient::new(
                config.agents.process_path.clone(),
                config.agents.api_key.clone(),
                config.dispatch_timeout(),
                Duration::from_secs(config.agents.health_check_timeout_secs),
            )
            .map_err(|e| Error::Configuration(e.to_string()))?,
        );

        let router = ContextRouter::new(
            rules.clone(),
            registry.clone(),
            AgentType::new(config.rules.fallback_agent_type.clone()),
        );
        let orchestrator = Arc::new(Orchestrator::new(
            tasks,
            sessions.clone(),
            registry.clone(),
            router,
            client.clone(),
            config.agents.max_concurrent_dispatches,
        ));

        let mut background = Vec::new();
        if let Some(storage) = &storage {
            let loading = registry.spawn_warm_load();
            let storage = storage.clone();
            let registry = registry.clone();
            background.push(tokio::spawn(async move {
                match loading.await {
                    Ok(restored) => info!(restored, "Agent registry warm load finished"),
                    Err(err) => error!(error = %err, "Agent registry warm load aborted"),
                }
                // started degraded: wait for the store, then catch up in both directions
                if !storage.gate().is_available() {
                    storage.recover().await;
                    let restored = registry.warm_load().await;
                    let flushed = registry.flush().await;
                    info!(restored, flushed, "Agent registry resynchronized with durable store");
                }
            }));
        }
        if config.agents.seed_defaults {
            let registry = registry.clone();
            background.push(tokio::spawn(async move {
                seed::seed_default_agents(&registry).await;
            }));
        }
        if let Some(interval) = config.health_check_interval() {
            background.push(HealthMonitor::new(registry.clone(), client, interval).spawn());
        }

        let state = AppState {
            orchestrator,
            registry,
            sessions,
            rules,
            gate: storage.as_ref().map(StorageManager::gate),
            security: Arc::new(config.security.clone()),
            rules_path: config.rules.path.as_ref().map(PathBuf::from),
        };

        Ok(Self {
            config,
            state,
            storage,
            background,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve until Ctrl-C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = self.config.server_addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "Banking MCP server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(wait_for_shutdown())
            .await?;

        info!("Shutting down server...");
        for handle in &self.background {
            handle.abort();
        }
        if let Some(storage) = &self.storage {
            storage.close().await;
        }
        info!("Server shutdown complete");
        Ok(())
    }
}

/// HTTP routes. Everything but `/health` and `/ready` sits behind the API-key check
/// when it is enabled.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(Any)
        .allow_origin(Any);

    let mut protected = Router::new()
        .route("/api/v1/submit-task", post(api::submit_task))
        .route("/api/v1/get-result/:task_id", get(api::get_result))
        .route("/api/v1/register-agent", post(api::register_agent))
        .route("/api/v1/agents", get(api::list_agents))
        .route("/api/v1/agent/:agent_id", get(api::get_agent))
        .route("/api/v1/agent/:agent_id/status", put(api::update_agent_status))
        .route("/api/v1/create-session", post(api::create_session))
        .route("/api/v1/get-session/:session_id", get(api::get_session))
        .route("/api/v1/rules/upload", post(api::upload_rules))
        .route("/api/v1/rules", get(api::get_rules));
    if state.security.require_api_key {
        protected = protected.route_layer(middleware::from_fn_with_state(
            state.clone(),
            api::require_api_key,
        ));
    }

    Router::new()
        .route("/health", get(api::health_check))
        .route("/ready", get(api::readiness))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Active rule set at start-up: the rules file when present, else the defaults
fn load_rules(config: &RulesConfig) -> Result<RuleEngine> {
    let engine = RuleEngine::new();

    if let Some(path) = &config.path {
        if Path::new(path).exists() {
            engine.load_from_file(path)?;
            return Ok(engine);
        }
        info!(path = %path, "Rules file not found, it will be written on the first upload");
    }

    if config.seed_defaults {
        engine.upload(default_rules())?;
    } else {
        warn!("Starting with an empty rule set");
    }
    Ok(engine)
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
