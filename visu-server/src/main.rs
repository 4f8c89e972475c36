use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};
use visu_core::{EventStore, VisuConfig};

use visu_server::dashboard::Dashboard;
use visu_server::server;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "visu.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience: production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match VisuConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Only the postgres backend needs a pool
    let pool = if config.store.backend == "postgres" {
        match visu_core::db::create_pool(&config.database).await {
            Ok(p) => Some(p),
            Err(e) => {
                eprintln!("Failed to connect to database: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    let store: Arc<dyn EventStore> = match visu_core::create_store(&config.store, pool) {
        Ok(s) => Arc::from(s),
        Err(e) => {
            eprintln!("Failed to create event store: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match store.health().await {
            Ok(v) => println!("✅ {} store reachable: {}", store.name(), v),
            Err(e) => {
                println!("❌ {} store check failed: {}", store.name(), e);
                std::process::exit(1);
            }
        }

        println!("✅ Visu health check passed");
        return Ok(());
    }

    let dashboard = Arc::new(Dashboard::new(store, &config));
    tracing::info!(
        store = dashboard.store_name(),
        ttl_seconds = config.cache.ttl_seconds,
        "Dashboard service ready"
    );

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // HTTP REST API alongside the socket, if enabled
    if config.http.enabled {
        let http_dashboard = Arc::clone(&dashboard);
        let http_config = config.clone();
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) =
                visu_server::http::start_http_server(http_dashboard, http_config, http_shutdown)
                    .await
            {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    let socket_path = config.service.socket_path.clone();
    server::run_unix_server(&socket_path, dashboard, tx.subscribe()).await?;

    Ok(())
}
