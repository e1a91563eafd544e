use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use ember_vault::Vault;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::AppState;
use crate::ratelimit::{spawn_cleanup_task, RateLimitState};
use crate::router::build_router;

const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
const BURN_DELETION_SLACK: Duration = Duration::from_secs(5);

/// Ember upload/download server.
pub struct EmberServer {
    config: ServerConfig,
}

impl EmberServer {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve until Ctrl-C.
    pub async fn serve(self) -> ServerResult<()> {
        self.serve_with_shutdown(shutdown_signal()).await
    }

    /// Serve until `signal` resolves. In-flight requests are allowed to
    /// finish; the expiry sweeper is cancelled afterwards.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let vault = Vault::open_filesystem(&self.config.storage_dir, self.config.vault.clone()).await?;
        let listener = TcpListener::bind(self.config.bind_addr).await?;

        let sweeper = vault.start_sweeper();
        let rate_limit = RateLimitState::new(&self.config.rate_limit);
        let cleanup = spawn_cleanup_task(rate_limit.clone(), RATE_LIMIT_CLEANUP_INTERVAL);
        let app = build_router(AppState::new(vault.clone(), rate_limit));

        info!(
            addr = %listener.local_addr()?,
            storage = %self.config.storage_dir.display(),
            "Ember server listening"
        );
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await;

        sweeper.cancel().await;
        if let Some(cleanup) = cleanup {
            cleanup.abort();
        }
        let deadline = self.config.vault.burn_grace() + BURN_DELETION_SLACK;
        if tokio::time::timeout(deadline, vault.wait_for_burn_deletions()).await.is_err() {
            warn!("burn deletions still pending at shutdown; leaving them to the next start");
        }
        info!("Ember server stopped");
        Ok(served?)
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "cannot listen for Ctrl-C; serving until killed");
            std::future::pending::<()>().await;
        }
    }
}
