use anyhow::Result;
use axum::http::StatusCode;
use axum::routing::get;
use tracing_subscriber::EnvFilter;

mod assets;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let boot = gproxy_core::bootstrap_from_env().await?;
    let global = boot.state.global.load();
    let bind = format!("{}:{}", global.host, global.port);
    drop(global);

    let app = gproxy_router::build_router(boot.state)
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .route("/__bridge/agent.html", get(assets::agent_page))
        .route("/__bridge/{*path}", get(assets::agent_asset));

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
