use axum::serve;
use tokio::net::TcpListener;
use tracing::info;

use crate::error::WebError;
use crate::routes::router;
use crate::state::WebState;

/// Serves the API until the process receives Ctrl-C; active runs are
/// stopped before returning.
pub async fn run_web_server(bind_addr: &str, state: WebState) -> Result<(), WebError> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(bind = %listener.local_addr()?, "harness-web listening");
    let orchestrator = state.service().orchestrator.clone();
    serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            let stopped = orchestrator.stop_all();
            info!(stopped, "shutting down");
        })
        .await?;
    Ok(())
}
