use std::{
    io::{self, BufRead, BufReader, Read},
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use dispatcher::Dispatcher;
use shared::{
    domain::ConfigDocument,
    protocol::{ListenerState, TriggerSource},
};
use storage::ConfigAccessor;
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{backoff::Backoff, health::HealthHandle, wait_for_change, ListenerError};

pub const BAUD_RATE: u32 = 9600;
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);
/// Repeated scans of the same card inside this window fire once.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(1500);
const DISABLED_RECHECK: Duration = Duration::from_secs(1);

/// First item in config order whose card set contains `card`.
pub fn match_card<'a>(config: &'a ConfigDocument, card: &str) -> Option<&'a str> {
    config
        .items()
        .find(|(_, item)| item.has_card(card))
        .map(|(name, _)| name)
}

/// Blocking source of scanned card tokens.
pub trait CardReader: Send {
    /// `Ok(None)` when the read timed out without a complete line.
    fn read_token(&mut self) -> io::Result<Option<String>>;
}

pub trait CardPortOpener: Send + Sync {
    fn open(&self, port: &str) -> Result<Box<dyn CardReader>, ListenerError>;
}

/// Opens real serial devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortOpener;

impl CardPortOpener for SerialPortOpener {
    fn open(&self, port: &str) -> Result<Box<dyn CardReader>, ListenerError> {
        let serial = serialport::new(port, BAUD_RATE)
            .timeout(READ_TIMEOUT)
            .open()?;
        Ok(Box::new(LineReader::new(serial)))
    }
}

/// Splits a byte stream into trimmed, newline-terminated tokens. Bytes read
/// before a timeout are kept until the rest of the line arrives.
pub struct LineReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::new(),
        }
    }
}

impl<R: Read + Send> CardReader for LineReader<R> {
    fn read_token(&mut self) -> io::Result<Option<String>> {
        match self.reader.read_until(b'\n', &mut self.pending) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "card reader closed",
            )),
            Ok(_) if self.pending.ends_with(b"\n") => {
                let token = String::from_utf8_lossy(&self.pending).trim().to_string();
                self.pending.clear();
                Ok(Some(token))
            }
            Ok(_) => Ok(None),
            Err(error) if error.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(error) => Err(error),
        }
    }
}

struct Debouncer {
    window: Duration,
    last: Option<(String, Instant)>,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    fn accept(&mut self, token: &str, now: Instant) -> bool {
        if let Some((last, at)) = &self.last {
            if last == token && now.duration_since(*at) < self.window {
                return false;
            }
        }
        self.last = Some((token.to_string(), now));
        true
    }
}

/// Reads card scans from the configured serial port and dispatches the
/// matching item. Runs until the task is dropped.
pub struct CardListener {
    config: Arc<dyn ConfigAccessor>,
    dispatcher: Dispatcher,
    opener: Arc<dyn CardPortOpener>,
    health: HealthHandle,
    backoff: Backoff,
    debounce: Duration,
}

impl CardListener {
    pub fn new(
        config: Arc<dyn ConfigAccessor>,
        dispatcher: Dispatcher,
        opener: Arc<dyn CardPortOpener>,
        health: HealthHandle,
    ) -> Self {
        Self {
            config,
            dispatcher,
            opener,
            health,
            backoff: Backoff::default(),
            debounce: DEBOUNCE_WINDOW,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn run(mut self) {
        let mut revisions = self.config.subscribe();
        loop {
            let settings = self.config.snapshot().await.settings;
            let port = settings.serial_port.trim().to_string();
            if !settings.enable_card_reader || port.is_empty() {
                self.health.set(ListenerState::Disabled);
                wait_for_change(&mut revisions, DISABLED_RECHECK).await;
                continue;
            }

            self.health.set(ListenerState::Connecting {
                target: port.clone(),
            });
            match self.session(&port, &mut revisions).await {
                Ok(()) => info!(port = %port, "card reader settings changed; reopening"),
                Err(error) => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        port = %port,
                        %error,
                        retry_in_secs = delay.as_secs(),
                        "card reader failed"
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

    /// Returns `Ok` when the settings changed and the port must be reopened.
    async fn session(
        &mut self,
        port: &str,
        revisions: &mut watch::Receiver<u64>,
    ) -> Result<(), ListenerError> {
        let opener = Arc::clone(&self.opener);
        let port_name = port.to_string();
        let reader = tokio::task::spawn_blocking(move || opener.open(&port_name)).await??;

        self.backoff.reset();
        self.health.set(ListenerState::Connected {
            target: port.to_string(),
            since: Utc::now(),
        });
        info!(port, "card reader opened");

        let (tx, mut rx) = mpsc::channel(16);
        let reader_task = tokio::task::spawn_blocking(move || read_loop(reader, tx));
        let mut debouncer = Debouncer::new(self.debounce);
        let mut watching = true;

        let result = loop {
            tokio::select! {
                token = rx.recv() => match token {
                    Some(Ok(token)) => self.handle_token(&token, &mut debouncer).await,
                    Some(Err(error)) => break Err(ListenerError::Io(error)),
                    None => break Err(ListenerError::ReaderStopped),
                },
                changed = revisions.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let settings = self.config.snapshot().await.settings;
                    if !settings.enable_card_reader || settings.serial_port.trim() != port {
                        break Ok(());
                    }
                }
            }
        };

        drop(rx);
        if let Err(error) = reader_task.await {
            warn!(%error, "card reader thread panicked");
        }
        result
    }

    async fn handle_token(&self, token: &str, debouncer: &mut Debouncer) {
        if !debouncer.accept(token, Instant::now()) {
            debug!(card = token, "repeated scan ignored");
            return;
        }

        let config = self.config.snapshot().await;
        let Some(name) = match_card(&config, token).map(str::to_string) else {
            info!(card = token, "no item bound to card");
            return;
        };
        info!(card = token, item = %name, "card matched");
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher
                .dispatch(&config, &name, None, TriggerSource::Card)
                .await;
        });
    }
}

fn read_loop(mut reader: Box<dyn CardReader>, tx: mpsc::Sender<io::Result<String>>) {
    while !tx.is_closed() {
        match reader.read_token() {
            Ok(Some(token)) if !token.is_empty() => {
                if tx.blocking_send(Ok(token)).is_err() {
                    return;
                }
            }
            Ok(_) => {}
            Err(error) => {
                let _ = tx.blocking_send(Err(error));
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/card_tests.rs"]
mod tests;
