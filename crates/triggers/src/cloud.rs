use std::{collections::BTreeSet, sync::Arc, time::Duration};

use chrono::Utc;
use dispatcher::{brightness, Dispatcher};
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS, SubscribeFilter};
use shared::{
    domain::{ConfigDocument, ItemKind, SHUTDOWN_ITEM},
    protocol::{ListenerState, TriggerSource},
};
use storage::ConfigAccessor;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{backoff::Backoff, health::HealthHandle, wait_for_change, ListenerError};

pub const DEFAULT_BROKER_HOST: &str = "bemfa.com";
pub const DEFAULT_BROKER_PORT: u16 = 9501;
pub const KEEP_ALIVE: Duration = Duration::from_secs(60);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_RECHECK: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
}

impl BrokerConfig {
    fn options(&self, client_id: &str) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, self.host.as_str(), self.port);
        options.set_keep_alive(KEEP_ALIVE);
        options
    }

    fn label(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.to_string(),
            port: DEFAULT_BROKER_PORT,
        }
    }
}

/// Every item topic plus the legacy global topic.
pub fn topic_set(config: &ConfigDocument) -> BTreeSet<String> {
    config
        .items()
        .filter_map(|(_, item)| item.topic())
        .chain(config.settings.cloud_topic())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudCommand {
    pub item: String,
    pub value: Option<u32>,
}

/// `on#<digits>` or bare `<digits>`.
pub fn parse_level(payload: &str) -> Option<u32> {
    brightness::parse_level(payload.strip_prefix("on#").unwrap_or(payload))
}

/// Items to run for a message, in config order.
pub fn interpret(config: &ConfigDocument, topic: &str, payload: &str) -> Vec<CloudCommand> {
    let payload = payload.trim();
    let mut commands = Vec::new();

    for (name, item) in config.items() {
        if item.topic() != Some(topic) {
            continue;
        }
        let value = if name == SHUTDOWN_ITEM {
            (payload == "off").then_some(None)
        } else if item.kind == ItemKind::Brightness {
            parse_level(payload).map(Some)
        } else {
            (payload == "on").then_some(None)
        };
        if let Some(value) = value {
            commands.push(CloudCommand {
                item: name.to_string(),
                value,
            });
        }
    }

    let global_off = payload == "off" && config.settings.cloud_topic() == Some(topic);
    if global_off
        && config.item(SHUTDOWN_ITEM).is_some()
        && !commands.iter().any(|command| command.item == SHUTDOWN_ITEM)
    {
        commands.push(CloudCommand {
            item: SHUTDOWN_ITEM.to_string(),
            value: None,
        });
    }
    commands
}

/// Subscribes to the configured topics and dispatches matching messages.
pub struct CloudListener {
    config: Arc<dyn ConfigAccessor>,
    dispatcher: Dispatcher,
    broker: BrokerConfig,
    health: HealthHandle,
    backoff: Backoff,
}

impl CloudListener {
    pub fn new(
        config: Arc<dyn ConfigAccessor>,
        dispatcher: Dispatcher,
        broker: BrokerConfig,
        health: HealthHandle,
    ) -> Self {
        Self {
            config,
            dispatcher,
            broker,
            health,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn run(mut self) {
        let mut revisions = self.config.subscribe();
        loop {
            let config = self.config.snapshot().await;
            let uid = config.settings.cloud_uid.trim().to_string();
            let topics = topic_set(&config);
            if uid.is_empty() || topics.is_empty() {
                let reason = if uid.is_empty() {
                    "cloud uid is not set"
                } else {
                    "no cloud topics configured"
                };
                self.health.set(ListenerState::Idle {
                    reason: reason.to_string(),
                });
                wait_for_change(&mut revisions, IDLE_RECHECK).await;
                continue;
            }

            match self.session(&uid, &topics, &mut revisions).await {
                Ok(()) => info!("cloud settings changed; reconnecting"),
                Err(error) => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        broker = %self.broker.label(),
                        %error,
                        retry_in_secs = delay.as_secs(),
                        "cloud connection failed"
                    );
                    self.health.set(ListenerState::Backoff {
                        attempt: self.backoff.attempt(),
                        retry_in_secs: delay.as_secs(),
                        last_error: error.to_string(),
                    });
                    wait_for_change(&mut revisions, delay).await;
                }
            }
        }
    }

    /// Returns `Ok` when the uid or topic set changed.
    async fn session(
        &mut self,
        uid: &str,
        topics: &BTreeSet<String>,
        revisions: &mut watch::Receiver<u64>,
    ) -> Result<(), ListenerError> {
        let target = self.broker.label();
        self.health.set(ListenerState::Connecting {
            target: target.clone(),
        });
        let (client, mut eventloop) = AsyncClient::new(self.broker.options(uid), 16);
        let mut watching = true;

        loop {
            tokio::select! {
                event = eventloop.poll() => match event? {
                    Event::Incoming(Packet::ConnAck(_)) => {
                        self.backoff.reset();
                        self.health.set(ListenerState::Connected {
                            target: target.clone(),
                            since: Utc::now(),
                        });
                        let filters = topics
                            .iter()
                            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtMostOnce));
                        client.subscribe_many(filters).await?;
                        info!(broker = %target, topics = topics.len(), "cloud listener subscribed");
                    }
                    Event::Incoming(Packet::Publish(publish)) => {
                        let payload = String::from_utf8_lossy(&publish.payload);
                        self.handle_message(&publish.topic, &payload).await;
                    }
                    _ => {}
                },
                changed = revisions.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let config = self.config.snapshot().await;
                    if config.settings.cloud_uid.trim() != uid || topic_set(&config) != *topics {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn handle_message(&self, topic: &str, payload: &str) {
        let config = self.config.snapshot().await;
        let commands = interpret(&config, topic, payload);
        if commands.is_empty() {
            debug!(topic, payload, "cloud message ignored");
            return;
        }
        for command in &commands {
            info!(topic, payload, item = %command.item, "cloud message matched");
        }
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            for command in commands {
                dispatcher
                    .dispatch(&config, &command.item, command.value, TriggerSource::Cloud)
                    .await;
            }
        });
    }
}

/// Connects, publishes `payload` once to `topic` and disconnects.
pub async fn publish_once(
    broker: &BrokerConfig,
    client_id: &str,
    topic: &str,
    payload: &str,
) -> Result<(), ListenerError> {
    let (client, mut eventloop) = AsyncClient::new(broker.options(client_id), 8);
    client
        .publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
        .await?;
    client.disconnect().await?;

    let flush = async {
        loop {
            if let Event::Outgoing(Outgoing::Disconnect) = eventloop.poll().await? {
                return Ok::<_, ListenerError>(());
            }
        }
    };
    tokio::time::timeout(PUBLISH_TIMEOUT, flush)
        .await
        .map_err(|_| ListenerError::Timeout(PUBLISH_TIMEOUT))?
}

#[cfg(test)]
#[path = "tests/cloud_tests.rs"]
mod tests;
