//! Device discovery monitoring.
//!
//! Consumes discovery events from the event bus and binds every newly
//! discovered device to the backend of its owning core pod.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::stream::StreamExt;
use prost::Message;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message as KafkaMessage};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

use crate::config::Config;
use crate::grpc::{DeviceDiscovered, Envelope};
use crate::router::RouterHandle;
use crate::state::SharedState;

const METRIC_DISCOVERY_EVENT_ERRORS: &str = "arouterd_discovery_event_errors";

/// Monitors the event bus for device discovery events.
pub struct DiscoveryMonitor {
    /// Runtime config.
    config: Arc<Config>,
    /// Handle used to program the discovered affinities.
    router: RouterHandle,
    /// The per-connection core state.
    state: SharedState,
    /// A channel used for triggering shutdown of this router connection.
    shutdown: BroadcastStream<()>,
}

impl DiscoveryMonitor {
    /// Create a new instance.
    pub fn new(config: Arc<Config>, router: RouterHandle, state: SharedState, shutdown: broadcast::Receiver<()>) -> Self {
        metrics::register_counter!(
            METRIC_DISCOVERY_EVENT_ERRORS,
            metrics::Unit::Count,
            "discovery events which could not be received or decoded"
        );
        Self {
            config,
            router,
            state,
            shutdown: BroadcastStream::new(shutdown),
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let consumer = match self.subscribe() {
            Ok(consumer) => consumer,
            Err(err) => {
                // The daemon limps along without discovery; the reconciler
                // still converges affinities from the periodic pod probes.
                tracing::error!(error = ?err, topic = %self.config.kafka_topic, "could not subscribe to discovery events, discovery disabled");
                let _res = self.shutdown.next().await;
                return Ok(());
            }
        };
        tracing::info!(topic = %self.config.kafka_topic, "discovery monitor initialized");

        loop {
            tokio::select! {
                msg = consumer.recv() => match msg {
                    Ok(msg) => self.handle_message(&msg).await,
                    Err(err) => {
                        metrics::increment_counter!(METRIC_DISCOVERY_EVENT_ERRORS);
                        tracing::error!(error = %err, "error receiving from the discovery topic");
                    }
                },
                _ = self.shutdown.next() => break,
            }
        }

        Ok(())
    }

    fn subscribe(&self) -> Result<StreamConsumer> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &self.config.kafka_instance_id)
            .set("bootstrap.servers", format!("{}:{}", self.config.kafka_host, self.config.kafka_port))
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .create()
            .context("error creating event bus consumer")?;
        consumer
            .subscribe(&[self.config.kafka_topic.as_str()])
            .context("error subscribing to the discovery topic")?;
        Ok(consumer)
    }

    #[tracing::instrument(level = "debug", skip(self, msg))]
    async fn handle_message(&self, msg: &BorrowedMessage<'_>) {
        let Some(payload) = msg.payload() else {
            tracing::warn!("dropping discovery event with an empty payload");
            return;
        };
        let device = match decode_discovery(payload) {
            Ok(Some(device)) => device,
            Ok(None) => return,
            Err(err) => {
                metrics::increment_counter!(METRIC_DISCOVERY_EVENT_ERRORS);
                tracing::warn!(error = ?err, "could not decode received discovery event, dropping");
                return;
            }
        };
        tracing::debug!(device = %device.id, "received a device discovery notification");

        let backend = {
            let mut state = self.state.lock().await;
            state.bind_device(&device.id, &device.publisher)
        };
        match backend {
            Some(backend) => self.router.set_affinity(&backend, &device.id).await,
            None => tracing::warn!(device = %device.id, "discovered device does not map to any backend, dropping event"),
        }
    }
}

/// Decode an envelope payload, returning the discovery event it carries.
///
/// Envelopes carrying any other event kind decode to `None`.
pub(crate) fn decode_discovery(payload: &[u8]) -> Result<Option<DeviceDiscovered>> {
    let envelope = Envelope::decode(payload).context("error decoding event envelope")?;
    let Some(body) = envelope.body else {
        bail!("event envelope has no body");
    };
    if !body.type_url.ends_with("DeviceDiscovered") {
        return Ok(None);
    }
    let device = DeviceDiscovered::decode(body.value.as_slice()).context("error decoding device discovery payload")?;
    Ok(Some(device))
}
