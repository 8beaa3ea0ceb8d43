use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use shared::domain::{
    ConfigDocument, Item, ItemKind, ItemNameError, Settings, BRIGHTNESS_ITEM, SHUTDOWN_ITEM,
};
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

pub const CONFIG_FILE_NAME: &str = "launcher_config.json";

const SAMPLE_MUSIC_ITEM: &str = "邓紫棋-喜欢你";
const SAMPLE_MUSIC_PAYLOAD: &str = r#"{
    "cmd": 212,
    "jsonStr": {
        "bitrate": 128,
        "duration": 239,
        "extname": "mp3",
        "filename": "G.E.M. 邓紫棋 - 喜欢你",
        "hash": "cff4d61fa1318100ce18a88ebb52e335"
    }
}"#;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to read config file '{path}'")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write config file '{path}'")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode config")]
    Encode(#[source] serde_json::Error),
    #[error(transparent)]
    InvalidName(#[from] ItemNameError),
    #[error("item not found: {0}")]
    NotFound(String),
}

/// Read side of the store as seen by the background listeners.
#[async_trait]
pub trait ConfigAccessor: Send + Sync {
    async fn snapshot(&self) -> ConfigDocument;

    /// Revision counter bumped after every persisted mutation.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// Single-writer owner of the launcher config file.
///
/// Every mutation happens under the write lock and is persisted before the
/// in-memory document is swapped, so readers never observe a state that is
/// not on disk and concurrent front-end requests cannot lose each other's
/// updates.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    document: RwLock<ConfigDocument>,
    revision: watch::Sender<u64>,
}

impl ConfigStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let document = load_document(&path).await?;
        info!(
            path = %path.display(),
            items = document.item_count(),
            "config store opened"
        );
        let (revision, _) = watch::channel(0);
        Ok(Self {
            inner: Arc::new(Inner {
                path,
                document: RwLock::new(document),
                revision,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub async fn snapshot(&self) -> ConfigDocument {
        self.inner.document.read().await.clone()
    }

    pub async fn item(&self, name: &str) -> Option<Item> {
        self.inner.document.read().await.item(name).cloned()
    }

    pub async fn settings(&self) -> Settings {
        self.inner.document.read().await.settings.clone()
    }

    pub async fn upsert_item(
        &self,
        old_name: Option<&str>,
        name: &str,
        item: Item,
    ) -> Result<(), StorageError> {
        self.mutate(|doc| Ok(doc.upsert_item(old_name, name, item)?))
            .await?;
        info!(name, "item saved");
        Ok(())
    }

    pub async fn delete_item(&self, name: &str) -> Result<(), StorageError> {
        self.mutate(|doc| {
            if doc.remove_item(name) {
                Ok(())
            } else {
                Err(StorageError::NotFound(name.to_string()))
            }
        })
        .await?;
        info!(name, "item deleted");
        Ok(())
    }

    pub async fn update_settings(&self, settings: Settings) -> Result<(), StorageError> {
        self.mutate(|doc| {
            doc.replace_settings(settings);
            Ok(())
        })
        .await?;
        info!("settings saved");
        Ok(())
    }

    /// Seeds the built-in items that are missing. Returns whether anything
    /// was written.
    pub async fn ensure_defaults(&self) -> Result<bool, StorageError> {
        {
            let doc = self.inner.document.read().await;
            if default_items().iter().all(|(name, _)| doc.has_entry(name)) {
                return Ok(false);
            }
        }

        let added = self
            .mutate(|doc| {
                let mut added = 0usize;
                for (name, item) in default_items() {
                    if doc.seed_item(name, item) {
                        added += 1;
                    }
                }
                Ok(added)
            })
            .await?;
        info!(added, "seeded built-in items");
        Ok(added > 0)
    }

    async fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut ConfigDocument) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self.inner.document.write().await;
        let mut next = guard.clone();
        let output = apply(&mut next)?;
        persist(&self.inner.path, &next).await?;
        *guard = next;
        drop(guard);
        self.inner.revision.send_modify(|revision| *revision += 1);
        Ok(output)
    }
}

#[async_trait]
impl ConfigAccessor for ConfigStore {
    async fn snapshot(&self) -> ConfigDocument {
        ConfigStore::snapshot(self).await
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }
}

pub fn default_items() -> Vec<(&'static str, Item)> {
    let (shutdown, brightness) = if cfg!(windows) {
        (
            "shutdown -s -t 60",
            r#"WMIC /NAMESPACE:\\root\wmi PATH WmiMonitorBrightnessMethods WHERE "Active=TRUE" CALL WmiSetBrightness Brightness=XXX Timeout=0"#,
        )
    } else {
        ("shutdown -h +1", "brightnessctl set XXX%")
    };

    vec![
        (
            SHUTDOWN_ITEM,
            Item::new(ItemKind::Exe, shutdown).with_topic("off001"),
        ),
        (
            BRIGHTNESS_ITEM,
            Item::new(ItemKind::Brightness, brightness).with_topic("brightness002"),
        ),
        (
            SAMPLE_MUSIC_ITEM,
            Item::new(ItemKind::Music, SAMPLE_MUSIC_PAYLOAD).with_uri_scheme("kugou://start.weixin"),
        ),
    ]
}

async fn load_document(path: &Path) -> Result<ConfigDocument, StorageError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(source) if source.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file missing; starting empty");
            return Ok(ConfigDocument::default());
        }
        Err(source) => {
            return Err(StorageError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    match serde_json::from_str::<ConfigDocument>(&raw) {
        Ok(document) => {
            for name in document.malformed_names() {
                warn!(name, "config entry is not a valid item; keeping it untouched");
            }
            for key in document.rejected_settings() {
                warn!(key, "setting has an unexpected value; using the default");
            }
            Ok(document)
        }
        Err(error) => {
            let aside = corrupt_path(path);
            warn!(
                path = %path.display(),
                moved_to = %aside.display(),
                %error,
                "config file is not a valid JSON object; starting empty"
            );
            tokio::fs::rename(path, &aside)
                .await
                .map_err(|source| StorageError::Write {
                    path: aside.clone(),
                    source,
                })?;
            Ok(ConfigDocument::default())
        }
    }
}

async fn persist(path: &Path, document: &ConfigDocument) -> Result<(), StorageError> {
    let bytes = encode_document(document)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| StorageError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    let tmp = sibling_with_suffix(path, ".tmp");
    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|source| StorageError::Write {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| StorageError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    debug!(path = %path.display(), bytes = bytes.len(), "config persisted");
    Ok(())
}

/// Four-space indented UTF-8 JSON, non-ASCII left unescaped.
pub fn encode_document(document: &ConfigDocument) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut bytes, PrettyFormatter::with_indent(b"    "));
    document
        .serialize(&mut serializer)
        .map_err(StorageError::Encode)?;
    Ok(bytes)
}

fn corrupt_path(path: &Path) -> PathBuf {
    sibling_with_suffix(path, ".corrupt")
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
