use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::Settings,
    error::{ApiError, ErrorCode},
    protocol::{
        DeviceActionRequest, DeviceActionResponse, DispatchOutcome, HealthReport, NamedItem,
        ParseLinkRequest, ParseLinkResponse, RunItemRequest, SaveItemRequest, SaveItemResponse,
    },
};
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server url '{0}'")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {}", .error.message)]
    Api { status: u16, error: ApiError },
}

impl ClientError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Api { error, .. } => Some(error.code),
            _ => None,
        }
    }
}

/// JSON API client for a running launcher server.
#[derive(Clone)]
pub struct LauncherClient {
    http: Client,
    base: Url,
}

impl LauncherClient {
    pub fn new(server_url: &str) -> Result<Self, ClientError> {
        let base =
            Url::parse(server_url).map_err(|_| ClientError::InvalidUrl(server_url.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(server_url.to_string()));
        }
        Ok(Self {
            http: Client::new(),
            base,
        })
    }

    pub fn server_url(&self) -> &Url {
        &self.base
    }

    pub async fn list_items(
        &self,
        kind: Option<&str>,
        keyword: Option<&str>,
    ) -> Result<Vec<NamedItem>, ClientError> {
        let mut url = self.endpoint(&["api", "items"])?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(kind) = kind {
                query.append_pair("type", kind);
            }
            if let Some(keyword) = keyword {
                query.append_pair("kw", keyword);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        decode(self.http.get(url).send().await?).await
    }

    pub async fn get_item(&self, name: &str) -> Result<NamedItem, ClientError> {
        let url = self.endpoint(&["api", "items", name])?;
        decode(self.http.get(url).send().await?).await
    }

    pub async fn save_item(
        &self,
        name: &str,
        request: &SaveItemRequest,
    ) -> Result<SaveItemResponse, ClientError> {
        let url = self.endpoint(&["api", "items", name])?;
        decode(self.http.put(url).json(request).send().await?).await
    }

    pub async fn delete_item(&self, name: &str) -> Result<(), ClientError> {
        let url = self.endpoint(&["api", "items", name])?;
        check(self.http.delete(url).send().await?).await?;
        Ok(())
    }

    pub async fn run_item(
        &self,
        name: &str,
        value: Option<u32>,
    ) -> Result<DispatchOutcome, ClientError> {
        let url = self.endpoint(&["api", "items", name, "run"])?;
        let request = RunItemRequest { value };
        decode(self.http.post(url).json(&request).send().await?).await
    }

    pub async fn settings(&self) -> Result<Settings, ClientError> {
        let url = self.endpoint(&["api", "settings"])?;
        decode(self.http.get(url).send().await?).await
    }

    pub async fn update_settings(&self, settings: &Settings) -> Result<Settings, ClientError> {
        let url = self.endpoint(&["api", "settings"])?;
        decode(self.http.put(url).json(settings).send().await?).await
    }

    pub async fn health(&self) -> Result<HealthReport, ClientError> {
        let url = self.endpoint(&["api", "health"])?;
        decode(self.http.get(url).send().await?).await
    }

    pub async fn parse_link(&self, link: &str) -> Result<String, ClientError> {
        let url = self.endpoint(&["api", "parse_link"])?;
        let request = ParseLinkRequest {
            link: link.to_string(),
        };
        let response: ParseLinkResponse =
            decode(self.http.post(url).json(&request).send().await?).await?;
        Ok(response.json)
    }

    /// Connects the Android device. A blank ip uses the stored setting.
    pub async fn connect_device(&self, ip: Option<&str>) -> Result<String, ClientError> {
        let url = self.endpoint(&["adb_action", "connect"])?;
        let request = DeviceActionRequest {
            ip: ip.unwrap_or_default().to_string(),
        };
        let response: DeviceActionResponse =
            decode(self.http.post(url).json(&request).send().await?).await?;
        Ok(response.msg)
    }

    pub async fn disconnect_device(&self) -> Result<String, ClientError> {
        let url = self.endpoint(&["adb_action", "disconnect"])?;
        let response: DeviceActionResponse = decode(self.http.post(url).send().await?).await?;
        Ok(response.msg)
    }

    /// Publishes `on` or `off` on the global cloud topic.
    pub async fn publish_power(&self, command: &str) -> Result<DispatchOutcome, ClientError> {
        let url = self.endpoint(&["api", "cloud", command])?;
        decode(self.http.post(url).send().await?).await
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), body = %body, "server rejected request");
    let error = serde_json::from_str::<ApiError>(&body).unwrap_or_else(|_| {
        let message = if body.trim().is_empty() {
            status.to_string()
        } else {
            body.trim().to_string()
        };
        ApiError::new(ErrorCode::Internal, message)
    });
    Err(ClientError::Api {
        status: status.as_u16(),
        error,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    Ok(check(response).await?.json().await?)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
