use shared::domain::{Item, ItemKind, BRIGHTNESS_ITEM};

use super::*;

fn config() -> ConfigDocument {
    let mut config = ConfigDocument::default();
    config.settings.cloud_uid = "uid-1".into();
    config.settings.cloud_topic = "power001".into();
    config
        .upsert_item(
            None,
            SHUTDOWN_ITEM,
            Item::new(ItemKind::Exe, "shutdown -h +1").with_topic("off001"),
        )
        .expect("shutdown");
    config
        .upsert_item(
            None,
            BRIGHTNESS_ITEM,
            Item::new(ItemKind::Brightness, "set XXX").with_topic("brightness002"),
        )
        .expect("brightness");
    config
        .upsert_item(
            None,
            "lamp",
            Item::new(ItemKind::Exe, "lamp on").with_topic("light001"),
        )
        .expect("lamp");
    config
        .upsert_item(
            None,
            "fan",
            Item::new(ItemKind::Exe, "fan on").with_topic("light001"),
        )
        .expect("fan");
    config
}

fn names(commands: &[CloudCommand]) -> Vec<&str> {
    commands.iter().map(|command| command.item.as_str()).collect()
}

#[test]
fn topic_set_includes_items_and_global_topic() {
    let topics: Vec<String> = topic_set(&config()).into_iter().collect();
    assert_eq!(
        topics,
        vec!["brightness002", "light001", "off001", "power001"]
    );
}

#[test]
fn topic_set_skips_blank_topics() {
    let mut config = ConfigDocument::default();
    config
        .upsert_item(None, "x", Item::new(ItemKind::Exe, "x").with_topic("  "))
        .expect("item");
    assert!(topic_set(&config).is_empty());
}

#[test]
fn off_only_triggers_shutdown() {
    let config = config();
    assert_eq!(names(&interpret(&config, "off001", "off")), vec![SHUTDOWN_ITEM]);
    assert!(interpret(&config, "off001", "on").is_empty());
    assert!(interpret(&config, "light001", "off").is_empty());
}

#[test]
fn brightness_accepts_levels() {
    let config = config();
    let commands = interpret(&config, "brightness002", "on#30");
    assert_eq!(
        commands,
        vec![CloudCommand {
            item: BRIGHTNESS_ITEM.to_string(),
            value: Some(30),
        }]
    );
    assert_eq!(interpret(&config, "brightness002", " 75 ")[0].value, Some(75));
    assert!(interpret(&config, "brightness002", "on").is_empty());
    assert!(interpret(&config, "brightness002", "on#dim").is_empty());
}

#[test]
fn on_triggers_every_bound_item_in_order() {
    let config = config();
    assert_eq!(names(&interpret(&config, "light001", "on")), vec!["lamp", "fan"]);
    assert!(interpret(&config, "light001", "toggle").is_empty());
}

#[test]
fn unrelated_topic_is_ignored() {
    assert!(interpret(&config(), "unknown", "on").is_empty());
}

#[test]
fn global_topic_off_runs_shutdown() {
    let config = config();
    assert_eq!(names(&interpret(&config, "power001", "off")), vec![SHUTDOWN_ITEM]);
    assert!(interpret(&config, "power001", "on").is_empty());
}

#[test]
fn global_off_without_shutdown_item_does_nothing() {
    let mut config = config();
    config.remove_item(SHUTDOWN_ITEM);
    assert!(interpret(&config, "power001", "off").is_empty());
}

#[test]
fn level_parsing() {
    assert_eq!(parse_level("on#0"), Some(0));
    assert_eq!(parse_level("100"), Some(100));
    assert_eq!(parse_level("on#"), None);
    assert_eq!(parse_level("-5"), None);
    assert_eq!(parse_level("99999999999"), Some(100));
    assert_eq!(parse_level("on#4294967296"), Some(100));
}
