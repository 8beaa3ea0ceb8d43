use std::{io, sync::Arc, time::Duration};

use dispatcher::Dispatcher;
use storage::ConfigAccessor;
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};

pub mod backoff;
pub mod card;
pub mod cloud;
pub mod health;

pub use card::{CardListener, CardPortOpener, SerialPortOpener};
pub use cloud::{BrokerConfig, CloudListener};
pub use health::{HealthHandle, ListenerHealthSet};

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("card reader i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("card reader stopped")]
    ReaderStopped,
    #[error("mqtt connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub struct ListenerHandles {
    pub card: JoinHandle<()>,
    pub cloud: JoinHandle<()>,
}

impl ListenerHandles {
    pub fn abort(&self) {
        self.card.abort();
        self.cloud.abort();
    }
}

/// Starts both trigger listeners on the current runtime.
pub fn spawn_listeners(
    config: Arc<dyn ConfigAccessor>,
    dispatcher: Dispatcher,
    broker: BrokerConfig,
    health: &ListenerHealthSet,
) -> ListenerHandles {
    let card = CardListener::new(
        Arc::clone(&config),
        dispatcher.clone(),
        Arc::new(SerialPortOpener),
        health.card.clone(),
    );
    let cloud = CloudListener::new(config, dispatcher, broker, health.cloud.clone());
    ListenerHandles {
        card: tokio::spawn(card.run()),
        cloud: tokio::spawn(cloud.run()),
    }
}

/// Waits for the next store revision, at most `timeout`.
pub(crate) async fn wait_for_change(revisions: &mut watch::Receiver<u64>, timeout: Duration) {
    match tokio::time::timeout(timeout, revisions.changed()).await {
        Ok(Ok(())) | Err(_) => {}
        Ok(Err(_)) => tokio::time::sleep(timeout).await,
    }
}
