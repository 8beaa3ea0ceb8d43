use std::{
    collections::VecDeque,
    sync::{mpsc as std_mpsc, Mutex},
};

use async_trait::async_trait;
use dispatcher::{CommandLine, CommandOutput, ProcessLauncher};
use shared::domain::{Item, ItemKind};
use storage::ConfigStore;

use super::*;

struct ScriptedRead(VecDeque<io::Result<Vec<u8>>>);

impl Read for ScriptedRead {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.pop_front() {
            Some(Ok(chunk)) => {
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
            Some(Err(error)) => Err(error),
            None => Ok(0),
        }
    }
}

#[test]
fn line_reader_keeps_partial_lines_across_timeouts() {
    let mut reader = LineReader::new(ScriptedRead(VecDeque::from(vec![
        Ok(b"CA".to_vec()),
        Err(io::Error::new(io::ErrorKind::TimedOut, "timeout")),
        Ok(b"RD1\r\n".to_vec()),
        Ok(b"X\n".to_vec()),
    ])));

    assert_eq!(reader.read_token().expect("timeout"), None);
    assert_eq!(reader.read_token().expect("line"), Some("CARD1".to_string()));
    assert_eq!(reader.read_token().expect("line"), Some("X".to_string()));
    assert_eq!(
        reader.read_token().expect_err("eof").kind(),
        io::ErrorKind::UnexpectedEof
    );
}

#[test]
fn match_card_uses_config_order() {
    let mut config = ConfigDocument::default();
    config
        .upsert_item(None, "first", Item::new(ItemKind::Exe, "a").with_card_ids("11, 22"))
        .expect("first");
    config
        .upsert_item(None, "second", Item::new(ItemKind::Exe, "b").with_card_ids("22,33"))
        .expect("second");

    assert_eq!(match_card(&config, "22"), Some("first"));
    assert_eq!(match_card(&config, "33"), Some("second"));
    assert_eq!(match_card(&config, "2"), None);
}

#[test]
fn debouncer_drops_repeats_inside_window() {
    let mut debouncer = Debouncer::new(DEBOUNCE_WINDOW);
    let start = Instant::now();
    assert!(debouncer.accept("A", start));
    assert!(!debouncer.accept("A", start + Duration::from_millis(1000)));
    assert!(debouncer.accept("B", start + Duration::from_millis(1100)));
    assert!(debouncer.accept("A", start + Duration::from_millis(1200)));
    assert!(debouncer.accept("A", start + Duration::from_millis(2800)));
}

#[derive(Default)]
struct RecordingLauncher {
    spawned: Mutex<Vec<CommandLine>>,
    hang_output: bool,
}

impl RecordingLauncher {
    fn spawned(&self) -> Vec<CommandLine> {
        self.spawned.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ProcessLauncher for RecordingLauncher {
    async fn spawn(&self, command: &CommandLine) -> io::Result<()> {
        self.spawned.lock().expect("lock").push(command.clone());
        Ok(())
    }

    async fn output(&self, _command: &CommandLine) -> io::Result<CommandOutput> {
        if self.hang_output {
            std::future::pending::<()>().await;
        }
        Ok(CommandOutput::default())
    }
}

struct ChannelReader(std_mpsc::Receiver<String>);

impl CardReader for ChannelReader {
    fn read_token(&mut self) -> io::Result<Option<String>> {
        match self.0.recv_timeout(Duration::from_millis(20)) {
            Ok(token) => Ok(Some(token)),
            Err(std_mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(std_mpsc::RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "reader unplugged",
            )),
        }
    }
}

#[derive(Default)]
struct FakeOpener {
    reader: Mutex<Option<Box<dyn CardReader>>>,
    opened: Mutex<Vec<String>>,
}

impl CardPortOpener for FakeOpener {
    fn open(&self, port: &str) -> Result<Box<dyn CardReader>, ListenerError> {
        self.opened.lock().expect("lock").push(port.to_string());
        self.reader
            .lock()
            .expect("lock")
            .take()
            .ok_or_else(|| ListenerError::Io(io::Error::new(io::ErrorKind::NotFound, "no device")))
    }
}

async fn store_with_card_items(dir: &tempfile::TempDir, enabled: bool) -> ConfigStore {
    let store = ConfigStore::open(dir.path().join("config.json"))
        .await
        .expect("store");
    store
        .upsert_item(None, "lamp", Item::new(ItemKind::Exe, "lamp-on").with_card_ids("AA, BB"))
        .await
        .expect("lamp");
    store
        .upsert_item(None, "radio", Item::new(ItemKind::Exe, "radio-on").with_card_ids("BB"))
        .await
        .expect("radio");
    let mut settings = store.settings().await;
    settings.serial_port = "/dev/ttyFAKE".into();
    settings.enable_card_reader = enabled;
    store.update_settings(settings).await.expect("settings");
    store
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn scan_dispatches_first_matching_item_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store_with_card_items(&dir, true).await;
    let (tx, rx) = std_mpsc::channel();
    let opener = Arc::new(FakeOpener::default());
    *opener.reader.lock().expect("lock") = Some(Box::new(ChannelReader(rx)));
    let launcher = Arc::new(RecordingLauncher::default());
    let health = HealthHandle::new(shared::protocol::ListenerKind::Card);

    let listener = CardListener::new(
        Arc::new(store),
        Dispatcher::new(Arc::clone(&launcher) as Arc<dyn ProcessLauncher>),
        Arc::clone(&opener) as Arc<dyn CardPortOpener>,
        health.clone(),
    );
    let task = tokio::spawn(listener.run());

    assert!(
        eventually(|| matches!(health.get().state, ListenerState::Connected { .. })).await,
        "listener never connected: {:?}",
        health.get()
    );
    tx.send("BB".to_string()).expect("send");
    tx.send("BB".to_string()).expect("send");

    assert!(eventually(|| !launcher.spawned().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(launcher.spawned(), vec![CommandLine::shell("lamp-on")]);
    assert_eq!(*opener.opened.lock().expect("lock"), vec!["/dev/ttyFAKE"]);
    task.abort();
}

#[tokio::test]
async fn slow_dispatch_does_not_block_next_scan() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store_with_card_items(&dir, true).await;
    store
        .upsert_item(
            None,
            "phone",
            Item::new(ItemKind::Adb, "adb shell input keyevent 26").with_card_ids("CC"),
        )
        .await
        .expect("phone");
    let (tx, rx) = std_mpsc::channel();
    let opener = Arc::new(FakeOpener::default());
    *opener.reader.lock().expect("lock") = Some(Box::new(ChannelReader(rx)));
    let launcher = Arc::new(RecordingLauncher {
        hang_output: true,
        ..RecordingLauncher::default()
    });
    let health = HealthHandle::new(shared::protocol::ListenerKind::Card);

    let listener = CardListener::new(
        Arc::new(store),
        Dispatcher::new(Arc::clone(&launcher) as Arc<dyn ProcessLauncher>),
        Arc::clone(&opener) as Arc<dyn CardPortOpener>,
        health.clone(),
    );
    let task = tokio::spawn(listener.run());

    assert!(eventually(|| matches!(health.get().state, ListenerState::Connected { .. })).await);
    tx.send("CC".to_string()).expect("send");
    tx.send("AA".to_string()).expect("send");

    let lamp_started = tokio::time::timeout(Duration::from_secs(2), async {
        while !launcher.spawned().contains(&CommandLine::shell("lamp-on")) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(lamp_started.is_ok(), "lamp waited for the phone wake-up");
    task.abort();
}

#[tokio::test]
async fn open_failure_enters_backoff() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store_with_card_items(&dir, true).await;
    let health = HealthHandle::new(shared::protocol::ListenerKind::Card);

    let listener = CardListener::new(
        Arc::new(store),
        Dispatcher::new(Arc::new(RecordingLauncher::default())),
        Arc::new(FakeOpener::default()),
        health.clone(),
    );
    let task = tokio::spawn(listener.run());

    assert!(eventually(|| matches!(health.get().state, ListenerState::Backoff { .. })).await);
    match health.get().state {
        ListenerState::Backoff {
            attempt,
            retry_in_secs,
            last_error,
        } => {
            assert_eq!(attempt, 1);
            assert_eq!(retry_in_secs, 5);
            assert!(last_error.contains("no device"), "{last_error}");
        }
        other => panic!("unexpected state {other:?}"),
    }
    task.abort();
}

#[tokio::test]
async fn disabled_reader_never_opens_port() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store_with_card_items(&dir, false).await;
    let opener = Arc::new(FakeOpener::default());
    let health = HealthHandle::new(shared::protocol::ListenerKind::Card);

    let listener = CardListener::new(
        Arc::new(store),
        Dispatcher::new(Arc::new(RecordingLauncher::default())),
        Arc::clone(&opener) as Arc<dyn CardPortOpener>,
        health.clone(),
    );
    let task = tokio::spawn(listener.run());

    assert!(eventually(|| health.get().state == ListenerState::Disabled).await);
    assert!(opener.opened.lock().expect("lock").is_empty());
    task.abort();
}
