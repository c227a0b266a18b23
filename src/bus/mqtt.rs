//! MQTT transport for the command/state bus.
//!
//! [`MqttBus`] is the publishing handle handed to the engine; [`MqttListener`]
//! owns the event loop, re-subscribes after every (re)connect, and forwards
//! parsed commands into an mpsc channel consumed by the command worker.

use super::{BusCommand, PublishedState, StatePublisher};
use crate::config::BusConfig;
use crate::error::{DoorlockError, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Pause after an event-loop error before polling again.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Capacity of the client request queue.
const REQUEST_QUEUE: usize = 16;

/// Publishing half of the MQTT bus.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
    state_topic: String,
    retain: bool,
}

/// Event-loop half of the MQTT bus.
pub struct MqttListener {
    client: AsyncClient,
    eventloop: EventLoop,
    config: BusConfig,
}

impl MqttBus {
    /// Build the client. No network traffic happens until the listener runs.
    pub fn new(config: &BusConfig) -> (Self, MqttListener) {
        let mut options =
            MqttOptions::new(config.client_id.clone(), config.broker.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        options.set_last_will(LastWill::new(
            config.state_topic.clone(),
            PublishedState::Offline.as_str(),
            QoS::AtLeastOnce,
            config.retain_state,
        ));

        let (client, eventloop) = AsyncClient::new(options, REQUEST_QUEUE);
        let bus = Self {
            client: client.clone(),
            state_topic: config.state_topic.clone(),
            retain: config.retain_state,
        };
        let listener = MqttListener {
            client,
            eventloop,
            config: config.clone(),
        };
        (bus, listener)
    }

    /// Ask the broker connection to close. The listener exits once the
    /// disconnect has been sent.
    ///
    /// # Errors
    ///
    /// Returns [`DoorlockError::Bus`] if the request cannot be queued.
    pub async fn disconnect(&self) -> Result<()> {
        self.client
            .disconnect()
            .await
            .map_err(|e| DoorlockError::Bus(e.to_string()))
    }
}

#[async_trait]
impl StatePublisher for MqttBus {
    async fn publish(&self, state: PublishedState) -> Result<()> {
        info!(topic = %self.state_topic, %state, "publishing state");
        self.client
            .publish(
                self.state_topic.clone(),
                QoS::AtLeastOnce,
                self.retain,
                state.as_str(),
            )
            .await
            .map_err(|e| DoorlockError::Bus(e.to_string()))
    }
}

impl MqttListener {
    /// Drive the event loop until a disconnect has been sent.
    ///
    /// Parsed commands go to `commands`; once the receiving side is gone,
    /// further commands are dropped but the loop keeps the connection alive
    /// so pending publications still flush.
    pub fn run(mut self, commands: mpsc::Sender<BusCommand>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                broker = %self.config.broker,
                port = self.config.port,
                "MQTT listener started"
            );
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!(code = ?ack.code, "connected to MQTT broker");
                        self.subscribe();
                    }
                    Ok(Event::Incoming(Packet::Publish(message))) => {
                        info!(topic = %message.topic, payload = ?message.payload, "received MQTT message");
                        forward(&self.config, &commands, &message.topic, &message.payload[..]).await;
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        info!("MQTT disconnect sent");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "MQTT connection error, retrying in {}s", RECONNECT_BACKOFF.as_secs());
                        tokio::time::sleep(RECONNECT_BACKOFF).await;
                    }
                }
            }
            debug!("MQTT listener stopped");
        })
    }

    fn subscribe(&self) {
        for topic in [&self.config.set_topic, &self.config.check_topic] {
            match self.client.try_subscribe(topic.clone(), QoS::AtLeastOnce) {
                Ok(()) => info!(%topic, "subscribed"),
                Err(e) => warn!(%topic, error = %e, "subscribe failed"),
            }
        }
    }
}

/// Parse one incoming message and hand it to the command worker. Returns
/// whether a command was delivered; never waits on a receiver that is gone.
async fn forward(
    config: &BusConfig,
    commands: &mpsc::Sender<BusCommand>,
    topic: &str,
    payload: &[u8],
) -> bool {
    match BusCommand::parse(config, topic, payload) {
        Some(command) => {
            if commands.send(command).await.is_err() {
                debug!(?command, "command worker gone, dropping command");
                return false;
            }
            true
        }
        None => {
            warn!(%topic, "ignoring unrecognised message");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::reconciler::LockAction;

    #[tokio::test]
    async fn parsed_commands_reach_the_worker() {
        let config = BusConfig::default();
        let (tx, mut rx) = mpsc::channel(1);

        assert!(forward(&config, &tx, &config.set_topic, b"UNLOCK").await);
        assert_eq!(rx.recv().await, Some(BusCommand::Apply(LockAction::Unlock)));
        assert!(!forward(&config, &tx, "elsewhere", b"LOCK").await);
    }

    #[tokio::test]
    async fn commands_are_dropped_once_the_worker_is_gone() {
        let config = BusConfig::default();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        // More commands than the queue holds; none may block the event loop.
        for topic in [&config.set_topic, &config.check_topic, &config.set_topic] {
            let delivered = tokio::time::timeout(
                Duration::from_secs(1),
                forward(&config, &tx, topic, b"LOCK"),
            )
            .await
            .expect("forwarding must not block");
            assert!(!delivered);
        }
    }
}
