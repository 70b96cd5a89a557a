pub mod api;

use crate::agent::ChatAgent;
use crate::cli::Args;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use log::{ info, warn, error };
use tokio::net::TcpListener;

pub struct Server {
    addr: String,
    agent: Arc<ChatAgent>,
    args: Args,
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl-C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{ signal, SignalKind };
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}

impl Server {
    pub fn new(addr: String, agent: Arc<ChatAgent>, args: Args) -> Self {
        Self { addr, agent, args }
    }

    fn tls_paths(&self) -> Result<Option<(String, String)>, Box<dyn Error + Send + Sync>> {
        if !self.args.enable_tls {
            return Ok(None);
        }
        match (&self.args.tls_cert_path, &self.args.tls_key_path) {
            (Some(cert), Some(key)) => Ok(Some((cert.clone(), key.clone()))),
            (Some(_), None) | (None, Some(_)) => {
                error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
                Err("Missing TLS certificate or key path".into())
            }
            (None, None) => {
                error!("--enable-tls was set but no certificate/key paths provided.");
                Err("TLS enabled without cert/key".into())
            }
        }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr = self.addr.parse::<SocketAddr>()?;
        let origins = self.args.allowed_origins();
        info!("Allowed CORS origins: {}", origins.join(", "));

        let state = api::AppState { agent: Arc::clone(&self.agent) };
        let app = api::router(state, &origins);

        if let Some((cert_path, key_path)) = self.tls_paths()? {
            info!("TLS enabled. Loading certificate from '{}' and key from '{}'", cert_path, key_path);
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
                cert_path,
                key_path
            ).await?;

            let handle = axum_server::Handle::new();
            let shutdown_handle = handle.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
            });

            info!("Starting HTTPS API server on: https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service()).await?;
        } else {
            let listener = TcpListener::bind(addr).await.map_err(|e| {
                error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
                e
            })?;
            info!("Starting HTTP API server on: http://{}", addr);
            axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
        }

        info!("Server stopped");
        Ok(())
    }
}
