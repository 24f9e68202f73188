use litesearch_server::{create_router, AppState, Settings};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env()?;
    let addr = settings.addr()?;
    if !settings.auth_enabled() {
        tracing::warn!("SECRET_KEY not set; index routes are unauthenticated");
    }
    let tls = match (&settings.tls_cert_path, &settings.tls_key_path) {
        (Some(cert), Some(key)) => Some(
            axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                .await
                .map_err(|e| anyhow::anyhow!("loading TLS certificate: {e}"))?,
        ),
        _ => None,
    };

    let state = AppState::open(settings)?;
    let app = create_router(state);

    let handle = axum_server::Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            shutdown.graceful_shutdown(Some(Duration::from_secs(10)));
        }
    });

    match tls {
        Some(config) => {
            info!("https listening on {}", addr);
            axum_server::bind_rustls(addr, config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            info!("http listening on {}", addr);
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }
    Ok(())
}
