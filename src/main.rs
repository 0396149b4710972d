use std::net::SocketAddr;
use trade_recon::application::handlers::router;
use trade_recon::application::services::reconciliation_service::ReconciliationService;
use trade_recon::config::ReconConfig;
use trade_recon::infrastructure::trade_source_factory::TradeSourceFactory;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to load .env: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trade_recon=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ReconConfig::from_env();
    info!(
        data_dir = %config.data_dir.display(),
        trade_source = ?config.trade_source,
        max_parallel_fetches = config.max_parallel_fetches,
        "Starting trade reconciliation server"
    );

    let source = TradeSourceFactory::create(&config);
    let service = ReconciliationService::open(&config, source).await?;
    let app = router(service);

    let addr: SocketAddr = match config.bind_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Invalid RECON_BIND_ADDR '{}': {}, using 127.0.0.1:5001", config.bind_addr, e);
            SocketAddr::from(([127, 0, 0, 1], 5001))
        }
    };
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(listener, app);

    let shutdown_signal = async {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    info!("Server started successfully. Press Ctrl+C to stop.");
    server.with_graceful_shutdown(shutdown_signal).await?;

    info!("Shutdown complete");
    Ok(())
}
