use super::*;
use shared::domain::DEFAULT_SERIAL_PORT;

fn temp_config() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(CONFIG_FILE_NAME);
    (dir, path)
}

#[tokio::test]
async fn missing_file_opens_empty() {
    let (_dir, path) = temp_config();
    let store = ConfigStore::open(&path).await.expect("open");
    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.item_count(), 0);
    assert_eq!(snapshot.settings.serial_port, DEFAULT_SERIAL_PORT);
    assert!(!path.exists(), "opening must not create the file");
}

#[tokio::test]
async fn every_mutation_is_persisted() {
    let (_dir, path) = temp_config();
    let store = ConfigStore::open(&path).await.expect("open");
    store
        .upsert_item(None, "notepad", Item::new(ItemKind::Exe, "notepad.exe"))
        .await
        .expect("save");

    let reopened = ConfigStore::open(&path).await.expect("reopen");
    assert_eq!(
        reopened.item("notepad").await.expect("item").command,
        "notepad.exe"
    );

    store.delete_item("notepad").await.expect("delete");
    let reopened = ConfigStore::open(&path).await.expect("reopen");
    assert!(reopened.item("notepad").await.is_none());
}

#[tokio::test]
async fn written_file_is_four_space_indented_utf8() {
    let (_dir, path) = temp_config();
    let store = ConfigStore::open(&path).await.expect("open");
    store
        .upsert_item(None, "关机", Item::new(ItemKind::Exe, "shutdown -s -t 60"))
        .await
        .expect("save");

    let raw = std::fs::read_to_string(&path).expect("read");
    assert!(raw.contains("\"关机\""), "non-ascii must not be escaped: {raw}");
    assert!(raw.contains("\n    \"关机\": {\n        \"type\": \"exe\""));
}

#[tokio::test]
async fn reserved_names_are_rejected_without_touching_disk() {
    let (_dir, path) = temp_config();
    let store = ConfigStore::open(&path).await.expect("open");
    let err = store
        .upsert_item(None, "_serial_port", Item::new(ItemKind::Exe, "x"))
        .await
        .expect_err("reserved");
    assert!(matches!(err, StorageError::InvalidName(_)));
    assert!(!path.exists());
}

#[tokio::test]
async fn deleting_unknown_item_reports_not_found() {
    let (_dir, path) = temp_config();
    let store = ConfigStore::open(&path).await.expect("open");
    let err = store.delete_item("ghost").await.expect_err("missing");
    assert!(matches!(err, StorageError::NotFound(name) if name == "ghost"));
}

#[tokio::test]
async fn settings_update_bumps_revision() {
    let (_dir, path) = temp_config();
    let store = ConfigStore::open(&path).await.expect("open");
    let mut revisions = ConfigAccessor::subscribe(&store);
    assert_eq!(*revisions.borrow_and_update(), 0);

    let mut settings = store.settings().await;
    settings.serial_port = "/dev/ttyUSB0".into();
    settings.enable_card_reader = false;
    store.update_settings(settings).await.expect("settings");

    assert!(revisions.has_changed().expect("sender alive"));
    assert_eq!(*revisions.borrow_and_update(), 1);
    let reopened = ConfigStore::open(&path).await.expect("reopen");
    let settings = reopened.settings().await;
    assert_eq!(settings.serial_port, "/dev/ttyUSB0");
    assert!(!settings.enable_card_reader);
}

#[tokio::test]
async fn defaults_are_seeded_once() {
    let (_dir, path) = temp_config();
    let store = ConfigStore::open(&path).await.expect("open");
    assert!(store.ensure_defaults().await.expect("seed"));
    assert!(!store.ensure_defaults().await.expect("seed again"));

    let snapshot = store.snapshot().await;
    let shutdown = snapshot.item(SHUTDOWN_ITEM).expect("shutdown");
    assert_eq!(shutdown.kind, ItemKind::Exe);
    assert_eq!(shutdown.topic, "off001");
    let brightness = snapshot.item(BRIGHTNESS_ITEM).expect("brightness");
    assert!(brightness.command.contains("XXX"));
}

#[tokio::test]
async fn seeding_keeps_user_edits() {
    let (_dir, path) = temp_config();
    let store = ConfigStore::open(&path).await.expect("open");
    store
        .upsert_item(None, SHUTDOWN_ITEM, Item::new(ItemKind::Exe, "poweroff"))
        .await
        .expect("save");
    store.ensure_defaults().await.expect("seed");
    assert_eq!(
        store.item(SHUTDOWN_ITEM).await.expect("shutdown").command,
        "poweroff"
    );
}

#[tokio::test]
async fn corrupt_file_is_moved_aside() {
    let (_dir, path) = temp_config();
    std::fs::write(&path, "{ not json").expect("write");

    let store = ConfigStore::open(&path).await.expect("open");
    assert_eq!(store.snapshot().await.item_count(), 0);
    assert!(!path.exists());
    assert!(corrupt_path(&path).exists());
}

#[tokio::test]
async fn mistyped_setting_keeps_file_and_items() {
    let (_dir, path) = temp_config();
    std::fs::write(
        &path,
        r#"{"my item": {"type": "exe", "cmd": "echo hi"}, "_serial_port": null}"#,
    )
    .expect("write");

    let store = ConfigStore::open(&path).await.expect("open");
    assert_eq!(store.item("my item").await.expect("item").command, "echo hi");
    assert_eq!(store.settings().await.serial_port, DEFAULT_SERIAL_PORT);
    assert!(path.exists());
    assert!(!corrupt_path(&path).exists());

    store
        .upsert_item(None, "other", Item::new(ItemKind::Exe, "true"))
        .await
        .expect("save");
    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
    assert_eq!(raw["my item"]["cmd"], "echo hi");
    assert!(raw["_serial_port"].is_null());
}

#[tokio::test]
async fn concurrent_writers_do_not_lose_updates() {
    let (_dir, path) = temp_config();
    let store = ConfigStore::open(&path).await.expect("open");

    let mut tasks = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store
                .upsert_item(None, &format!("item-{i}"), Item::new(ItemKind::Exe, "true"))
                .await
        }));
    }
    for task in tasks {
        task.await.expect("join").expect("save");
    }

    let reopened = ConfigStore::open(&path).await.expect("reopen");
    assert_eq!(reopened.snapshot().await.item_count(), 16);
}
