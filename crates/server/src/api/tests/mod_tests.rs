use dispatcher::CommandLine;

use super::*;
use crate::test_support::test_context;

async fn setup() -> (tempfile::TempDir, ApiContext, std::sync::Arc<crate::test_support::RecordingLauncher>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let (ctx, launcher) = test_context(&dir).await;
    ctx.store
        .upsert_item(
            None,
            "lamp",
            Item::new(ItemKind::Exe, "lamp-on").with_topic("Light001"),
        )
        .await
        .expect("lamp");
    ctx.store
        .upsert_item(
            None,
            "dim",
            Item::new(ItemKind::Brightness, "set XXX").with_topic("brightness002"),
        )
        .await
        .expect("dim");
    (dir, ctx, launcher)
}

fn request(item: Item) -> SaveItemRequest {
    SaveItemRequest {
        old_name: None,
        item,
        run_after_save: false,
    }
}

#[tokio::test]
async fn list_filters_by_type_and_keyword() {
    let (_dir, ctx, _) = setup().await;

    let all = list_items(&ctx, &ItemFilter::default()).await;
    assert_eq!(all.len(), 2);

    let brightness = list_items(
        &ctx,
        &ItemFilter {
            kind: Some("value".into()),
            keyword: None,
        },
    )
    .await;
    assert_eq!(brightness[0].name, "dim");
    assert_eq!(brightness.len(), 1);

    let by_topic = list_items(
        &ctx,
        &ItemFilter {
            kind: None,
            keyword: Some("light".into()),
        },
    )
    .await;
    assert_eq!(by_topic.len(), 1);
    assert_eq!(by_topic[0].name, "lamp");
}

#[tokio::test]
async fn save_renames_and_validates() {
    let (_dir, ctx, _) = setup().await;

    let mut rename = request(Item::new(ItemKind::Exe, "lamp-on --bright"));
    rename.old_name = Some("lamp".into());
    assert!(save_item(&ctx, "desk lamp", rename).await.expect("save").is_none());
    assert!(matches!(
        get_item(&ctx, "lamp").await,
        Err(ApiError { code: ErrorCode::NotFound, .. })
    ));
    assert_eq!(
        get_item(&ctx, "desk lamp").await.expect("renamed").item.command,
        "lamp-on --bright"
    );

    let err = save_item(&ctx, "_serial_port", request(Item::new(ItemKind::Exe, "x")))
        .await
        .expect_err("reserved");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn save_can_run_immediately() {
    let (_dir, ctx, launcher) = setup().await;
    let mut save = request(Item::new(ItemKind::Brightness, "level XXX"));
    save.run_after_save = true;

    let outcome = save_item(&ctx, "level", save)
        .await
        .expect("save")
        .expect("outcome");
    assert!(outcome.ok);
    assert_eq!(launcher.commands(), vec![CommandLine::shell("level 50")]);
}

#[tokio::test]
async fn run_reports_missing_and_failed_items() {
    let (_dir, ctx, launcher) = setup().await;

    let err = run_item(&ctx, "ghost", None).await.expect_err("missing");
    assert_eq!(err.code, ErrorCode::NotFound);

    ctx.store
        .upsert_item(None, "odd", Item::new(ItemKind::parse("script"), "x"))
        .await
        .expect("odd");
    let err = run_item(&ctx, "odd", None).await.expect_err("unknown type");
    assert_eq!(err.code, ErrorCode::Execution);

    let outcome = run_item(&ctx, "dim", Some(80)).await.expect("run");
    assert_eq!(outcome.message, "brightness set to 80");
    assert_eq!(launcher.commands(), vec![CommandLine::shell("set 80")]);
}

#[tokio::test]
async fn delete_missing_item_is_not_found() {
    let (_dir, ctx, _) = setup().await;
    delete_item(&ctx, "lamp").await.expect("delete");
    let err = delete_item(&ctx, "lamp").await.expect_err("gone");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn settings_round_trip_through_store() {
    let (_dir, ctx, _) = setup().await;
    let mut settings = get_settings(&ctx).await;
    settings.adb_ip = "192.168.1.50:5555".into();
    let saved = update_settings(&ctx, settings).await.expect("save");
    assert_eq!(saved.adb_ip, "192.168.1.50:5555");
    assert_eq!(ctx.store.settings().await.adb_ip, "192.168.1.50:5555");
}

#[tokio::test]
async fn connect_falls_back_to_configured_address() {
    let (_dir, ctx, launcher) = setup().await;

    let outcome = connect_device(&ctx, Some("  ")).await;
    assert!(!outcome.ok, "no address configured");
    assert!(launcher.commands().is_empty());

    let mut settings = get_settings(&ctx).await;
    settings.adb_ip = "10.0.0.2".into();
    update_settings(&ctx, settings).await.expect("save");
    let outcome = connect_device(&ctx, None).await;
    assert!(outcome.ok);
    assert_eq!(
        launcher.commands(),
        vec![CommandLine::adb(["connect", "10.0.0.2"])]
    );
}

#[test]
fn parse_link_errors_are_parse_errors() {
    let err = parse_link("kugou://start.weixin").expect_err("no query");
    assert_eq!(err.code, ErrorCode::Parse);
    let pretty = parse_link("kugou://x?%7B%22a%22%3A%201%7D").expect("parse");
    assert_eq!(pretty, "{\n    \"a\": 1\n}");
}

#[tokio::test]
async fn publish_requires_known_command_and_cloud_settings() {
    let (_dir, ctx, _) = setup().await;
    let err = publish_power(&ctx, "toggle").await.expect_err("command");
    assert_eq!(err.code, ErrorCode::Validation);
    let err = publish_power(&ctx, "on").await.expect_err("settings");
    assert_eq!(err.code, ErrorCode::Validation);
}
