use std::sync::Arc;

use miette::{IntoDiagnostic, WrapErr};
use tracing::info;
use tracing_subscriber::EnvFilter;

use stepflow::config::{EngineConfig, ServerConfig};
use stepflow::engine::Engine;
use stepflow::executors::{Collaborators, ExecutorRegistry};
use stepflow::graph::{Graph, GraphDefinition};
use stepflow::run::RunStore;
use stepflow::server;
use stepflow::stream::StreamHub;

#[tokio::main]
async fn main() -> miette::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let graph_path = std::env::var("STEPFLOW_GRAPH")
        .into_diagnostic()
        .wrap_err("STEPFLOW_GRAPH must point to a graph definition file")?;
    let raw = std::fs::read_to_string(&graph_path)
        .into_diagnostic()
        .wrap_err_with(|| format!("reading graph definition from {graph_path}"))?;
    let definition: GraphDefinition = serde_json::from_str(&raw)
        .into_diagnostic()
        .wrap_err("parsing graph definition")?;

    let engine_config = EngineConfig::from_env();
    let server_config = ServerConfig::from_env()
        .ok_or_else(|| miette::miette!("STEPFLOW_API_KEY must be set"))?;

    let registry = Arc::new(ExecutorRegistry::standard(
        Collaborators::in_memory(),
        &engine_config,
    ));
    let graph = Arc::new(Graph::load(definition, &registry)?);
    info!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "graph loaded"
    );

    let engine = Arc::new(Engine::new(
        graph,
        registry,
        Arc::new(RunStore::new()),
        Arc::new(StreamHub::new()),
        engine_config,
    ));

    let app = server::router(engine, &server_config.api_key);
    let listener = tokio::net::TcpListener::bind(&server_config.bind)
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("binding {}", server_config.bind))?;
    info!(addr = %server_config.bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .into_diagnostic()?;
    Ok(())
}
