/*!
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * FauxDB - Production-ready MongoDB-compatible database server
 * Built with Rust for superior performance and reliability
 *
 * @file server.rs
 * @brief Server lifecycle: start/stop, credentials bootstrap, cursor sweep (§6.4)
 */

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info};

use crate::auth::{CredentialsProvider, InMemoryCredentialsProvider};
use crate::backend::Backend;
use crate::config::Config;
use crate::connection::handle_connection;
use crate::cursor::CursorManager;
use crate::router::Router;
use crate::session::SessionTable;
use crate::shutdown::{ShutdownManager, ShutdownReason};
use crate::error::Result;

pub struct FauxDBServer {
    config: Config,
    router: Arc<Router>,
    sessions: Arc<SessionTable>,
    cursors: Arc<CursorManager>,
    shutdown: Arc<ShutdownManager>,
    tls_acceptor: Option<TlsAcceptor>,
    bound_addr: parking_lot::Mutex<Option<std::net::SocketAddr>>,
}

impl FauxDBServer {
    /// Bootstraps an in-memory credentials provider seeded from
    /// `auth.bootstrap_username/password` under authDb `admin` (§6.4).
    pub fn new(config: Config, backend: Arc<dyn Backend>) -> Result<Self> {
        let credentials: Arc<dyn CredentialsProvider> = Arc::new(bootstrap_credentials(&config));

        let sessions = Arc::new(SessionTable::new());
        let cursors = Arc::new(CursorManager::new(Duration::from_secs(config.server.cursor_idle_timeout_secs)));

        let router = Arc::new(Router::new(
            backend,
            credentials,
            sessions.clone(),
            cursors.clone(),
            Duration::from_secs(config.authentication.scram_conversation_idle_timeout_secs),
            config.authentication.enabled,
        ));

        let tls_acceptor = if config.ssl.enabled {
            let tls_config = crate::tls::build_server_config(&config.ssl)?;
            Some(TlsAcceptor::from(tls_config))
        } else {
            None
        };

        Ok(Self {
            config,
            router,
            sessions,
            cursors,
            shutdown: Arc::new(ShutdownManager::new(Default::default())),
            tls_acceptor,
            bound_addr: parking_lot::Mutex::new(None),
        })
    }

    /// Binds, listens, and serves connections until a shutdown signal
    /// fires. Spawns the cursor-sweep task alongside the accept loop (§5).
    pub async fn start(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = TcpListener::bind(&addr).await?;
        *self.bound_addr.lock() = listener.local_addr().ok();

        info!("fauxdb listening on {} (tls={})", addr, self.config.ssl.enabled);

        self.shutdown.start_signal_handling().await.map_err(|e| {
            crate::error::FauxDBError::Internal(format!("failed to install signal handlers: {}", e))
        })?;

        let sweep_handle = self.spawn_cursor_sweep();
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!("accept failed: {}", e);
                            continue;
                        }
                    };

                    let router = self.router.clone();
                    let sessions = self.sessions.clone();
                    let tls_acceptor = self.tls_acceptor.clone();

                    tokio::spawn(async move {
                        handle_connection(stream, peer_addr, tls_acceptor, router, sessions).await;
                    });
                }
                reason = shutdown_rx.recv() => {
                    info!("stopping accept loop: {:?}", reason);
                    break;
                }
            }
        }

        sweep_handle.abort();
        Ok(())
    }

    pub async fn stop(&self) {
        self.shutdown.initiate_shutdown(ShutdownReason::Request).await;
    }

    fn spawn_cursor_sweep(&self) -> tokio::task::JoinHandle<()> {
        let cursors = self.cursors.clone();
        let interval = Duration::from_secs(self.config.server.cursor_sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                cursors.cleanup_expired();
            }
        })
    }

    pub fn address(&self) -> Option<std::net::SocketAddr> {
        *self.bound_addr.lock()
    }

    pub fn connection_string(&self) -> String {
        self.config.connection_string()
    }
}

fn bootstrap_credentials(config: &Config) -> InMemoryCredentialsProvider {
    let provider = InMemoryCredentialsProvider::new();
    if let (Some(username), Some(password)) =
        (&config.authentication.bootstrap_username, &config.authentication.bootstrap_password)
    {
        provider.insert("admin", username, password, config.authentication.iteration_count);
    }
    provider
}
