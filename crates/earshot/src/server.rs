//! `VoiceServer` builder and server loop.
//!
//! This is the entry point for running an Earshot voice server. It ties
//! together both listeners, the routing worker, and the resume sweeper
//! around one [`VoiceCore`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use earshot_session::Authenticator;
use earshot_transport::{Transport, WebSocketTransport};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::handler::handle_connection;
use crate::native::NativeListener;
use crate::{EarshotError, VoiceConfig, VoiceCore};

/// How often resume windows and idle native sessions are checked.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Shared state passed to each signaling handler task.
pub(crate) struct ServerState<A: Authenticator> {
    pub(crate) core: Arc<VoiceCore>,
    pub(crate) auth: Arc<A>,
}

/// Builder for configuring and starting a voice server.
///
/// # Example
///
/// ```rust,ignore
/// use earshot::prelude::*;
///
/// let server = VoiceServerBuilder::new()
///     .config(VoiceConfig::default())
///     .build(OpenAuthenticator)
///     .await?;
/// server.run().await
/// ```
#[derive(Debug, Default)]
pub struct VoiceServerBuilder {
    config: VoiceConfig,
}

impl VoiceServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: VoiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the config, builds the core, and binds both listeners.
    ///
    /// # Errors
    /// [`EarshotError::Config`] for an unusable config,
    /// [`EarshotError::Io`] / [`EarshotError::Transport`] if a port can't
    /// be bound.
    pub async fn build<A: Authenticator>(self, auth: A) -> Result<VoiceServer<A>, EarshotError> {
        let (core, worker) = VoiceCore::new(self.config)?;
        let core = Arc::new(core);

        let voice_addr = core.config().voice_addr();
        let socket = UdpSocket::bind(&voice_addr).await.map_err(|e| {
            tracing::error!(addr = %voice_addr, error = %e, "cannot bind voice port");
            e
        })?;
        tracing::info!(addr = %socket.local_addr()?, "native voice listening");

        let transport = WebSocketTransport::bind(&core.config().signaling_addr()).await?;

        let (shutdown, _) = watch::channel(false);
        Ok(VoiceServer {
            core,
            socket: Arc::new(socket),
            transport,
            worker: Some(worker),
            auth: Arc::new(auth),
            shutdown: Arc::new(shutdown),
        })
    }
}

/// A voice server, bound and ready.
///
/// Call [`run()`](Self::run) to start serving.
pub struct VoiceServer<A: Authenticator> {
    core: Arc<VoiceCore>,
    socket: Arc<UdpSocket>,
    transport: WebSocketTransport,
    worker: Option<earshot_router::BridgeWorker>,
    auth: Arc<A>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl<A: Authenticator> VoiceServer<A> {
    /// The core, for feeding player positions and querying sessions.
    pub fn core(&self) -> Arc<VoiceCore> {
        Arc::clone(&self.core)
    }

    /// Address of the native UDP listener.
    pub fn voice_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Address of the browser signaling listener.
    pub fn signaling_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// A handle that stops [`run`](Self::run) when sent `true`.
    pub fn shutdown_handle(&self) -> Arc<watch::Sender<bool>> {
        Arc::clone(&self.shutdown)
    }

    /// Runs until the shutdown handle fires.
    ///
    /// Spawns the routing worker and the native listener, then accepts
    /// signaling connections and sweeps expired sessions once a second.
    /// On the way out every registry is cleared.
    pub async fn run(mut self) -> Result<(), EarshotError> {
        tracing::info!("Earshot voice server running");

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut tasks = Vec::new();
        if let Some(worker) = self.worker.take() {
            tasks.push(worker.spawn(self.shutdown.subscribe()));
        }
        let listener = NativeListener {
            socket: Arc::clone(&self.socket),
            core: Arc::clone(&self.core),
            auth: Arc::clone(&self.auth),
        };
        tasks.push(tokio::spawn(listener.run(self.shutdown.subscribe())));

        let state = Arc::new(ServerState {
            core: Arc::clone(&self.core),
            auth: Arc::clone(&self.auth),
        });
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            tokio::select! {
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },
                _ = sweep.tick() => self.core.sweep(),
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Earshot voice server shutting down");
        let _ = self.transport.shutdown().await;
        for task in tasks {
            let _ = task.await;
        }
        self.core.shutdown();
        Ok(())
    }
}
