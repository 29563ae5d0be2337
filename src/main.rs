use chatrelay::error::StartupError;
use std::net::SocketAddr;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,chatrelay=debug";

#[tokio::main]
async fn main() -> ExitCode {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();

    match serve().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "chatrelay failed to start");
            eprintln!("chatrelay: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn serve() -> Result<(), StartupError> {
    let state = chatrelay::app::load_state()?;
    let addr = parse_listen(&state.runtime.listen)?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;
    tracing::info!(
        %addr,
        upstream = %state.runtime.upstream_base_url,
        "relay listening"
    );
    axum::serve(listener, chatrelay::app::build_app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(StartupError::Serve)
}

fn parse_listen(raw: &str) -> Result<SocketAddr, StartupError> {
    raw.parse().map_err(|source| StartupError::ListenAddr {
        addr: raw.to_string(),
        source,
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested, draining connections");
}
