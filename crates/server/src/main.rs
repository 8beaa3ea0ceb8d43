use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect},
    routing::{get, post},
    Form, Json, Router,
};
use clap::Parser;
use dispatcher::{brightness, Dispatcher, SystemLauncher};
use serde::Deserialize;
use shared::{
    domain::{Item, ItemKind, Settings},
    error::{ApiError, ErrorCode},
    protocol::{
        DeviceActionRequest, DeviceActionResponse, DispatchOutcome, HealthReport, NamedItem,
        ParseLinkRequest, ParseLinkResponse, RunItemRequest, SaveItemRequest, SaveItemResponse,
    },
};
use storage::ConfigStore;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use triggers::{spawn_listeners, BrokerConfig, ListenerHealthSet};

mod api;
mod app_state;
mod config;
mod page;
#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

use api::{ApiContext, ItemFilter};
use app_state::{AppState, FlashMessages};
use config::load_settings;

const MAX_BODY_BYTES: usize = 256 * 1024;

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Parser)]
#[command(name = "smartlink-server", about = "SmartLink launcher web server")]
struct Args {
    /// Do not open the browser after start.
    #[arg(long)]
    no_browser: bool,
    /// Launcher config file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Listen address, e.g. 127.0.0.1:5000.
    #[arg(long)]
    bind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IndexQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
    kw: Option<String>,
}

impl From<IndexQuery> for ItemFilter {
    fn from(query: IndexQuery) -> Self {
        Self {
            kind: query.kind,
            keyword: query.kw,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SaveItemForm {
    #[serde(default)]
    old_name: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    cmd: String,
    #[serde(default)]
    uri_scheme: String,
    #[serde(default)]
    card_id: String,
    #[serde(default)]
    bafy_topic: String,
    #[serde(default)]
    run_after_save: String,
}

#[derive(Debug, Deserialize)]
struct RunItemForm {
    brightness_value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SettingsForm {
    adb_ip: Option<String>,
    serial_port: Option<String>,
    bafy_uid: Option<String>,
    bafy_topic: Option<String>,
    device_password: Option<String>,
    music_platform: Option<String>,
    enable_card_reader: Option<String>,
    enable_adb_connect: Option<String>,
    music_screen_on: Option<String>,
    adb_screen_on: Option<String>,
    unlock_after_screen_on: Option<String>,
}

impl SettingsForm {
    /// Text fields left out of the form keep their value; checkboxes are
    /// on only when present.
    fn apply(self, mut settings: Settings) -> Settings {
        if let Some(v) = self.adb_ip {
            settings.adb_ip = v.trim().to_string();
        }
        if let Some(v) = self.serial_port {
            settings.serial_port = v.trim().to_string();
        }
        if let Some(v) = self.bafy_uid {
            settings.cloud_uid = v.trim().to_string();
        }
        if let Some(v) = self.bafy_topic {
            settings.cloud_topic = v.trim().to_string();
        }
        if let Some(v) = self.device_password {
            settings.device_password = v;
        }
        if let Some(v) = self.music_platform {
            settings.music_platform = v;
        }
        settings.enable_card_reader = self.enable_card_reader.is_some();
        settings.enable_adb_connect = self.enable_adb_connect.is_some();
        settings.music_screen_on = self.music_screen_on.is_some();
        settings.adb_screen_on = self.adb_screen_on.is_some();
        settings.unlock_after_screen_on = self.unlock_after_screen_on.is_some();
        settings
    }
}

#[derive(Debug, Deserialize)]
struct MusicLinkForm {
    #[serde(default)]
    music_link: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut settings = load_settings();
    if let Some(path) = args.config {
        settings.config_path = path;
    }
    if let Some(bind) = args.bind {
        settings.bind_addr = bind;
    }

    let store = ConfigStore::open(&settings.config_path)
        .await
        .with_context(|| {
            format!(
                "failed to open launcher config '{}'",
                settings.config_path.display()
            )
        })?;
    store
        .ensure_defaults()
        .await
        .context("failed to seed built-in items")?;

    let dispatcher = Dispatcher::new(Arc::new(SystemLauncher));
    let broker = BrokerConfig {
        host: settings.broker_host.clone(),
        port: settings.broker_port,
    };
    let health = ListenerHealthSet::new();

    let startup = store.settings().await;
    if startup.enable_adb_connect && !startup.adb_ip.trim().is_empty() {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            let outcome = dispatcher.connect_device(&startup).await;
            info!(ok = outcome.ok, message = %outcome.message, "startup device connect");
        });
    }
    let listeners = spawn_listeners(
        Arc::new(store.clone()),
        dispatcher.clone(),
        broker.clone(),
        &health,
    );

    let state = AppState {
        api: ApiContext {
            store,
            dispatcher,
            health,
            broker,
        },
        flash: FlashMessages::default(),
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address '{}'", settings.bind_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, config = %settings.config_path.display(), "server listening");

    if !args.no_browser {
        let url = format!("http://{addr}");
        if let Err(error) = open::that_detached(&url) {
            warn!(%url, %error, "failed to open browser");
        }
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    listeners.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/save_item", post(form_save_item))
        .route("/delete_item/:name", post(form_delete_item))
        .route("/run_item/:name", post(form_run_item))
        .route("/save_settings", post(form_save_settings))
        .route("/connect_adb", post(form_connect_device))
        .route("/disconnect_adb", post(form_disconnect_device))
        .route("/parse_music", post(form_parse_music))
        .route("/cloud/:command", post(form_cloud_power))
        .route("/adb_action/:action", post(device_action))
        .route("/api/items", get(http_list_items))
        .route(
            "/api/items/:name",
            get(http_get_item)
                .put(http_save_item)
                .delete(http_delete_item),
        )
        .route("/api/items/:name/run", post(http_run_item))
        .route("/api/settings", get(http_get_settings).put(http_update_settings))
        .route("/api/health", get(http_health))
        .route("/api/parse_link", post(http_parse_link))
        .route("/api/cloud/:command", post(http_cloud_power))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation | ErrorCode::Parse => StatusCode::BAD_REQUEST,
        ErrorCode::Execution => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::Connectivity => StatusCode::BAD_GATEWAY,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(error: ApiError) -> (StatusCode, Json<ApiError>) {
    (status_for(error.code), Json(error))
}

async fn index(State(state): State<Arc<AppState>>, Query(query): Query<IndexQuery>) -> Html<String> {
    let filter = ItemFilter::from(query);
    let items = api::list_items(&state.api, &filter).await;
    let settings = api::get_settings(&state.api).await;
    let flashes = state.flash.take();
    Html(page::render_index(&items, &settings, &flashes, &filter))
}

async fn form_save_item(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SaveItemForm>,
) -> Redirect {
    let kind = match form.kind.trim() {
        "" => ItemKind::Exe,
        raw => ItemKind::parse(raw),
    };
    let item = Item::new(kind, form.cmd)
        .with_uri_scheme(form.uri_scheme.trim())
        .with_card_ids(form.card_id.trim())
        .with_topic(form.bafy_topic.trim());
    let request = SaveItemRequest {
        old_name: Some(form.old_name).filter(|old| !old.trim().is_empty()),
        item,
        run_after_save: form.run_after_save == "1",
    };

    let name = form.name.trim().to_string();
    match api::save_item(&state.api, &name, request).await {
        Ok(outcome) => {
            if let Some(outcome) = outcome {
                state.flash.push(outcome.message);
            }
            state.flash.push(format!("saved item {name}"));
        }
        Err(error) => state.flash.push(error.message),
    }
    Redirect::to("/")
}

async fn form_delete_item(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Redirect {
    match api::delete_item(&state.api, &name).await {
        Ok(()) => state.flash.push(format!("deleted item {name}")),
        Err(error) => state.flash.push(error.message),
    }
    Redirect::to("/")
}

async fn form_run_item(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Form(form): Form<RunItemForm>,
) -> Redirect {
    let value = form
        .brightness_value
        .as_deref()
        .and_then(|v| brightness::parse_level(v.trim()));
    match api::run_item(&state.api, &name, value).await {
        Ok(outcome) => state.flash.push(outcome.message),
        Err(error) => state.flash.push(error.message),
    }
    Redirect::to("/")
}

async fn form_save_settings(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SettingsForm>,
) -> Redirect {
    let settings = form.apply(api::get_settings(&state.api).await);
    match api::update_settings(&state.api, settings).await {
        Ok(_) => state.flash.push("settings saved"),
        Err(error) => state.flash.push(error.message),
    }
    Redirect::to("/")
}

async fn form_connect_device(State(state): State<Arc<AppState>>) -> Redirect {
    let outcome = api::connect_device(&state.api, None).await;
    state.flash.push(outcome.message);
    Redirect::to("/")
}

async fn form_disconnect_device(State(state): State<Arc<AppState>>) -> Redirect {
    let outcome = api::disconnect_device(&state.api).await;
    state.flash.push(outcome.message);
    Redirect::to("/")
}

async fn form_parse_music(
    State(state): State<Arc<AppState>>,
    Form(form): Form<MusicLinkForm>,
) -> Redirect {
    match api::parse_link(&form.music_link) {
        Ok(json) => state.flash.push(json),
        Err(error) => state.flash.push(error.message),
    }
    Redirect::to("/")
}

async fn form_cloud_power(
    State(state): State<Arc<AppState>>,
    Path(command): Path<String>,
) -> Redirect {
    match api::publish_power(&state.api, &command).await {
        Ok(outcome) => state.flash.push(outcome.message),
        Err(error) => state.flash.push(error.message),
    }
    Redirect::to("/")
}

async fn device_action(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let outcome = match action.as_str() {
        "connect" => {
            let request: DeviceActionRequest = if body.is_empty() {
                DeviceActionRequest::default()
            } else {
                match serde_json::from_slice(&body) {
                    Ok(request) => request,
                    Err(error) => {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(DeviceActionResponse {
                                msg: format!("invalid request: {error}"),
                            }),
                        )
                    }
                }
            };
            api::connect_device(&state.api, Some(&request.ip)).await
        }
        "disconnect" => api::disconnect_device(&state.api).await,
        other => {
            return (
                StatusCode::NOT_FOUND,
                Json(DeviceActionResponse {
                    msg: format!("unknown action '{other}'"),
                }),
            )
        }
    };
    (
        StatusCode::OK,
        Json(DeviceActionResponse {
            msg: outcome.message,
        }),
    )
}

async fn http_list_items(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IndexQuery>,
) -> Json<Vec<NamedItem>> {
    Json(api::list_items(&state.api, &ItemFilter::from(query)).await)
}

async fn http_get_item(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<NamedItem>> {
    api::get_item(&state.api, &name)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn http_save_item(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<SaveItemRequest>,
) -> ApiResult<Json<SaveItemResponse>> {
    let outcome = api::save_item(&state.api, &name, request)
        .await
        .map_err(api_error)?;
    let item = api::get_item(&state.api, name.trim())
        .await
        .map_err(api_error)?;
    Ok(Json(SaveItemResponse { item, outcome }))
}

async fn http_delete_item(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    api::delete_item(&state.api, &name)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_run_item(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<RunItemRequest>,
) -> ApiResult<Json<DispatchOutcome>> {
    api::run_item(&state.api, &name, request.value)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn http_get_settings(State(state): State<Arc<AppState>>) -> Json<Settings> {
    Json(api::get_settings(&state.api).await)
}

async fn http_update_settings(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<Settings>,
) -> ApiResult<Json<Settings>> {
    api::update_settings(&state.api, settings)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn http_health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(api::health(&state.api))
}

async fn http_parse_link(Json(request): Json<ParseLinkRequest>) -> ApiResult<Json<ParseLinkResponse>> {
    api::parse_link(&request.link)
        .map(|json| Json(ParseLinkResponse { json }))
        .map_err(api_error)
}

async fn http_cloud_power(
    State(state): State<Arc<AppState>>,
    Path(command): Path<String>,
) -> ApiResult<Json<DispatchOutcome>> {
    api::publish_power(&state.api, &command)
        .await
        .map(Json)
        .map_err(api_error)
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
