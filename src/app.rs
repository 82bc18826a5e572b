//! Application supervision.
//!
//! The supervisor owns the outer router connection loop: every connection
//! gets a freshly built core model, and every loss of the connection tears
//! the model down and starts over.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, SignalStream};
use tokio_stream::StreamMap;
use tonic::transport::Channel;

use crate::config::Config;
use crate::configure;
use crate::discovery::DiscoveryMonitor;
use crate::k8s::PodLister;
use crate::reconcile::Reconciler;
use crate::router::{self, RouterHandle};
use crate::state::SharedState;

const CONNECT_RETRY_PAUSE: Duration = Duration::from_secs(5);

/// The application object of the running daemon.
pub struct App {
    /// The application's runtime config.
    _config: Arc<Config>,
    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,
    /// The join handle of the router connection supervisor.
    supervisor_handle: JoinHandle<Result<()>>,
}

impl App {
    /// Create a new instance.
    pub async fn new(config: Arc<Config>, shutdown_tx: broadcast::Sender<()>) -> Result<Self> {
        let lister = PodLister::new(&config).await?;
        let supervisor_handle = Supervisor::new(config.clone(), lister, shutdown_tx.clone()).spawn();
        Ok(Self {
            _config: config,
            shutdown_rx: BroadcastStream::new(shutdown_tx.subscribe()),
            shutdown_tx,
            supervisor_handle,
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));

        loop {
            tokio::select! {
                Some((_, sig)) = signals.next() => {
                    tracing::debug!(signal = ?sig, "signal received, beginning graceful shutdown");
                    let _res = self.shutdown_tx.send(());
                    break;
                }
                _ = self.shutdown_rx.next() => break,
                res = &mut self.supervisor_handle => {
                    tracing::error!("router connection supervisor exited unexpectedly");
                    let _res = self.shutdown_tx.send(());
                    return res.context("error joining supervisor handle").and_then(|res| res);
                }
            }
        }

        // Begin shutdown routine.
        tracing::debug!("arouterd is shutting down");
        if let Err(err) = self.supervisor_handle.await.context("error joining supervisor handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down router connection supervisor");
        }
        Ok(())
    }
}

/// Supervisor of the router connection lifecycle.
struct Supervisor {
    /// Runtime config.
    config: Arc<Config>,
    /// Pod discovery client, shared across connections.
    lister: PodLister,
    /// The global shutdown channel.
    shutdown: broadcast::Sender<()>,
}

impl Supervisor {
    fn new(config: Arc<Config>, lister: PodLister, shutdown: broadcast::Sender<()>) -> Self {
        Self { config, lister, shutdown }
    }

    fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(self) -> Result<()> {
        let mut global = self.shutdown.subscribe();
        loop {
            // A global shutdown may have fired while no connection-scoped
            // receiver was listening.
            if !matches!(global.try_recv(), Err(broadcast::error::TryRecvError::Empty)) {
                return Ok(());
            }
            let channel = match router::connect(&self.config.afrouter_api_address).await {
                Ok(channel) => channel,
                Err(err) => {
                    tracing::error!(error = ?err, "error connecting to the affinity router, will retry");
                    if self.pause_or_shutdown().await {
                        return Ok(());
                    }
                    continue;
                }
            };
            tracing::info!(address = %self.config.afrouter_api_address, "connected to the affinity router");

            if self.run_connection(channel).await? {
                return Ok(());
            }
            tracing::info!("rebuilding configuration for the new router connection");
        }
    }

    /// Pause before a reconnect attempt; true when global shutdown fired.
    async fn pause_or_shutdown(&self) -> bool {
        let mut shutdown = BroadcastStream::new(self.shutdown.subscribe());
        tokio::select! {
            _ = shutdown.next() => true,
            _ = tokio::time::sleep(CONNECT_RETRY_PAUSE) => false,
        }
    }

    /// Run one full router connection scope; true when the daemon is
    /// shutting down rather than reconnecting.
    async fn run_connection(&self, channel: Channel) -> Result<bool> {
        // Everything below lives until this channel fires: the watchdog
        // trips it on transport failure, and the forwarder relays the
        // global shutdown into it.
        let (conn_tx, _conn_rx) = broadcast::channel(4);
        let mut global_rx = self.shutdown.subscribe();
        let forward_tx = conn_tx.clone();
        let forwarder = tokio::spawn(async move {
            let _res = global_rx.recv().await;
            let _res = forward_tx.send(());
        });

        let mut conn_scope = BroadcastStream::new(conn_tx.subscribe());
        let router = RouterHandle::new(channel, self.config.clone(), conn_tx.clone());

        // Determine config & populate the router.
        let mut configure_shutdown = BroadcastStream::new(conn_tx.subscribe());
        let state = match configure::run(&self.lister, &router, &self.config, &mut configure_shutdown).await {
            Some(state) => state,
            None => {
                let done = forwarder.is_finished();
                forwarder.abort();
                return Ok(done);
            }
        };

        tracing::info!("starting discovery monitoring");
        let state: SharedState = Arc::new(Mutex::new(state));
        let monitor_handle =
            DiscoveryMonitor::new(self.config.clone(), router.clone(), state.clone(), conn_tx.subscribe()).spawn();

        tracing::info!("starting core monitoring");
        let reconciler_handle = Reconciler::new(
            self.config.clone(),
            self.lister.clone(),
            router.clone(),
            state.clone(),
            conn_tx.subscribe(),
        )
        .spawn();

        // Wait out the connection scope, then re-signal so tasks which
        // subscribed after the original trip still observe it.
        let _res = conn_scope.next().await;
        let _res = conn_tx.send(());

        if let Err(err) = monitor_handle.await.context("error joining discovery monitor handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down discovery monitor");
        }
        if let Err(err) = reconciler_handle.await.context("error joining reconciler handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down reconciler");
        }

        let done = forwarder.is_finished();
        forwarder.abort();
        Ok(done)
    }
}
