use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;
use content_orchestrator::{
    Collaborators, ContentServiceClient, DatabaseConfig, Orchestrator, OrchestratorConfig,
    OrchestratorDeps, SurrealStore, SystemClock, create_connection, ensure_schema,
};

#[derive(Parser)]
#[command(name = "content-orchestrator")]
#[command(about = "Self-evolving content generation orchestrator")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, global = true, env = "ORCHESTRATOR_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, global = true, default_value = "memory", env = "SURREALDB_URL")]
    db_url: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon: periodic cycles plus the operator HTTP API
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
    },
    /// Run one manual burst now, ignoring the pause flag
    Burst,
    /// Run one weekly selection pass now
    Selection,
    /// Run one healing pass now
    Heal,
    /// Initialize the database
    Init,
    /// Register a brand and provision its agent
    AddBrand { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("content_orchestrator=info".parse()?)
                .add_directive("surrealdb=warn".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();
    let db_config = DatabaseConfig {
        url: cli.db_url,
        ..Default::default()
    };
    info!("Using database url: {}", db_config.url);

    match cli.command {
        Commands::Init => {
            info!("Initializing database...");
            let db = create_connection(db_config).await?;
            ensure_schema(&db).await?;
            info!("Database initialized successfully");
        }
        Commands::Serve { bind } => {
            let orchestrator = build(cli.config, db_config).await?;
            orchestrator.start().await?;

            let app = content_orchestrator::api::create_router(orchestrator.clone());
            let listener = tokio::net::TcpListener::bind(&bind).await?;
            info!("Operator API listening on http://{}", bind);

            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Shutdown signal received");
                })
                .await?;
            orchestrator.shutdown();
        }
        Commands::Burst => {
            let orchestrator = build(cli.config, db_config).await?;
            let decision = orchestrator.trigger_burst_now().await;
            orchestrator.wait_for_dispatched().await;
            print_json(&decision)?;
        }
        Commands::Selection => {
            let orchestrator = build(cli.config, db_config).await?;
            print_json(&orchestrator.run_selection_cycle().await)?;
        }
        Commands::Heal => {
            let orchestrator = build(cli.config, db_config).await?;
            let report = orchestrator.run_healing_cycle().await;
            orchestrator.wait_for_dispatched().await;
            print_json(&report)?;
        }
        Commands::AddBrand { name } => {
            let orchestrator = build(cli.config, db_config).await?;
            let (brand, agent) = orchestrator.add_brand(&name).await?;
            println!(
                "Added brand {} ({}) with agent {}",
                brand.name, brand.brand_id, agent.agent_id
            );
        }
    }

    Ok(())
}

async fn build(
    config_path: Option<PathBuf>,
    db_config: DatabaseConfig,
) -> Result<Arc<Orchestrator>> {
    let config = OrchestratorConfig::load(config_path.as_deref())?;

    let db = create_connection(db_config).await?;
    ensure_schema(&db).await?;
    let store = Arc::new(SurrealStore::new(db));
    let client = Arc::new(ContentServiceClient::new(&config.collaborators)?);
    info!("Collaborator services at {}", config.collaborators.base_url);

    let orchestrator = Orchestrator::new(OrchestratorDeps {
        store: store.clone(),
        config_store: store,
        collaborators: Collaborators::from_client(client),
        clock: Arc::new(SystemClock),
        config,
    })?;
    Ok(Arc::new(orchestrator))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
