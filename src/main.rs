use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use convene::config::Config;
use convene::server;
use convene::tenant::TenantManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    convene::observability::init(config.metrics_port)?;

    let tls_acceptor = server::load_tls_acceptor(config.tls.as_ref())?;

    std::fs::create_dir_all(&config.data_dir)?;

    let tenant_manager = Arc::new(
        TenantManager::new(config.data_dir.clone(), config.conflict_mode)
            .with_default_tenant(config.default_database.clone()),
    );

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("convene listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_connections: {}", config.max_connections);
    info!("  conflict_mode: {}", config.conflict_mode);
    info!("  default database: {}", config.default_database);
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    server::run(
        listener,
        tenant_manager,
        tls_acceptor,
        config.max_connections,
        server::shutdown_signal(),
    )
    .await;

    info!("convene stopped");
    Ok(())
}
