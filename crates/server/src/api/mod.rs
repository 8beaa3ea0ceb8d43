use dispatcher::{deeplink, Dispatcher};
use shared::{
    domain::{Item, ItemKind, Settings},
    error::{ApiError, ErrorCode},
    protocol::{DispatchOutcome, HealthReport, NamedItem, SaveItemRequest, TriggerSource},
};
use storage::{ConfigStore, StorageError};
use triggers::{cloud, BrokerConfig, ListenerHealthSet};

#[derive(Clone)]
pub struct ApiContext {
    pub store: ConfigStore,
    pub dispatcher: Dispatcher,
    pub health: ListenerHealthSet,
    pub broker: BrokerConfig,
}

/// List filters: exact `type`, and a case-insensitive keyword matched
/// against the name or the cloud topic.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub kind: Option<String>,
    pub keyword: Option<String>,
}

impl ItemFilter {
    fn matches(&self, name: &str, item: &Item) -> bool {
        if let Some(kind) = self.kind.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            if item.kind != ItemKind::parse(kind) {
                return false;
            }
        }
        match self.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            Some(keyword) => {
                let keyword = keyword.to_lowercase();
                name.to_lowercase().contains(&keyword)
                    || item.topic.to_lowercase().contains(&keyword)
            }
            None => true,
        }
    }
}

pub async fn list_items(ctx: &ApiContext, filter: &ItemFilter) -> Vec<NamedItem> {
    ctx.store
        .snapshot()
        .await
        .items()
        .filter(|(name, item)| filter.matches(name, item))
        .map(|(name, item)| NamedItem {
            name: name.to_string(),
            item: item.clone(),
        })
        .collect()
}

pub async fn get_item(ctx: &ApiContext, name: &str) -> Result<NamedItem, ApiError> {
    ctx.store
        .item(name)
        .await
        .map(|item| NamedItem {
            name: name.to_string(),
            item,
        })
        .ok_or_else(|| not_found(name))
}

/// Saves `name`, renaming from `old_name` when given. Returns the run
/// outcome when `run_after_save` was requested.
pub async fn save_item(
    ctx: &ApiContext,
    name: &str,
    request: SaveItemRequest,
) -> Result<Option<DispatchOutcome>, ApiError> {
    let name = name.trim();
    ctx.store
        .upsert_item(request.old_name.as_deref(), name, request.item)
        .await
        .map_err(storage_error)?;

    if !request.run_after_save {
        return Ok(None);
    }
    let config = ctx.store.snapshot().await;
    Ok(Some(
        ctx.dispatcher
            .dispatch(&config, name, None, TriggerSource::Manual)
            .await,
    ))
}

pub async fn delete_item(ctx: &ApiContext, name: &str) -> Result<(), ApiError> {
    ctx.store.delete_item(name).await.map_err(storage_error)
}

/// Runs an item by hand. A failed dispatch comes back as an `execution`
/// error carrying the dispatcher's message.
pub async fn run_item(
    ctx: &ApiContext,
    name: &str,
    value: Option<u32>,
) -> Result<DispatchOutcome, ApiError> {
    let config = ctx.store.snapshot().await;
    if config.item(name).is_none() {
        return Err(not_found(name));
    }
    let outcome = ctx
        .dispatcher
        .dispatch(&config, name, value, TriggerSource::Manual)
        .await;
    if outcome.ok {
        Ok(outcome)
    } else {
        Err(ApiError::new(ErrorCode::Execution, outcome.message))
    }
}

pub async fn get_settings(ctx: &ApiContext) -> Settings {
    ctx.store.settings().await
}

pub async fn update_settings(ctx: &ApiContext, settings: Settings) -> Result<Settings, ApiError> {
    ctx.store
        .update_settings(settings)
        .await
        .map_err(storage_error)?;
    Ok(ctx.store.settings().await)
}

/// Connects to `ip`, or to the configured device address when `ip` is blank.
pub async fn connect_device(ctx: &ApiContext, ip: Option<&str>) -> DispatchOutcome {
    match ip.map(str::trim).filter(|ip| !ip.is_empty()) {
        Some(ip) => ctx.dispatcher.device().connect(ip).await,
        None => {
            let settings = ctx.store.settings().await;
            ctx.dispatcher.connect_device(&settings).await
        }
    }
}

pub async fn disconnect_device(ctx: &ApiContext) -> DispatchOutcome {
    ctx.dispatcher.device().disconnect().await
}

pub fn parse_link(link: &str) -> Result<String, ApiError> {
    deeplink::parse_link(link).map_err(|e| ApiError::new(ErrorCode::Parse, e.to_string()))
}

/// Publishes `on` or `off` to the global cloud topic.
pub async fn publish_power(ctx: &ApiContext, command: &str) -> Result<DispatchOutcome, ApiError> {
    if command != "on" && command != "off" {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("unsupported cloud command '{command}'"),
        ));
    }
    let settings = ctx.store.settings().await;
    let uid = settings.cloud_uid.trim();
    let Some(topic) = settings.cloud_topic().filter(|_| !uid.is_empty()) else {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "cloud uid and global topic must be set",
        ));
    };

    cloud::publish_once(&ctx.broker, uid, topic, command)
        .await
        .map_err(|e| ApiError::new(ErrorCode::Connectivity, e.to_string()))?;
    Ok(DispatchOutcome::ok(format!("published '{command}' to {topic}")))
}

pub fn health(ctx: &ApiContext) -> HealthReport {
    ctx.health.report()
}

fn not_found(name: &str) -> ApiError {
    ApiError::new(ErrorCode::NotFound, format!("item not found: {name}"))
}

fn storage_error(error: StorageError) -> ApiError {
    let code = match &error {
        StorageError::InvalidName(_) => ErrorCode::Validation,
        StorageError::NotFound(_) => ErrorCode::NotFound,
        StorageError::Read { .. } | StorageError::Write { .. } | StorageError::Encode(_) => {
            ErrorCode::Internal
        }
    };
    ApiError::new(code, error.to_string())
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
