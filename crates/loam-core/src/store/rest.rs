//! JSON REST remote adapter.
//!
//! Talks to `/v1/sync/{entity}` routes with a bearer token. Every request
//! carries the client-wide timeout.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::models::{EntityKind, RecordKey, SyncRecord};
use crate::util::{compact_text, is_http_url, normalize_text_option};

use super::RemoteStore;

/// Body of the changes and bulk upsert routes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordsEnvelope {
    #[serde(default)]
    pub records: Vec<SyncRecord>,
}

/// Body of the delete route
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeysEnvelope {
    #[serde(default)]
    pub keys: Vec<RecordKey>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

#[derive(Clone)]
pub struct RestJsonRemote {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for RestJsonRemote {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RestJsonRemote")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl RestJsonRemote {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            token: normalize_text_option(token),
            client,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let base_url = config
            .api_base_url
            .clone()
            .ok_or_else(|| Error::Config("api_base_url is not set".to_string()))?;
        Self::new(base_url, config.api_token.clone(), config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, entity: EntityKind) -> String {
        format!("{}/v1/sync/{}", self.base_url, entity.table_name())
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        let token = self.token.as_deref().ok_or(Error::NotAuthenticated)?;
        Ok(builder
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json"))
    }
}

impl RemoteStore for RestJsonRemote {
    fn ensure_ready(&self) -> Result<()> {
        if self.token.is_none() {
            return Err(Error::NotAuthenticated);
        }
        Ok(())
    }

    async fn fetch_changed_since(
        &self,
        entity: EntityKind,
        since: Option<Timestamp>,
    ) -> Result<Vec<SyncRecord>> {
        let mut builder = self.client.get(self.collection_url(entity));
        if let Some(since) = since {
            builder = builder.query(&[("since", since.as_millis())]);
        }

        let response = self.request(builder)?.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Remote(parse_api_error(status, &body)));
        }

        let envelope = response.json::<RecordsEnvelope>().await?;
        tracing::debug!(
            entity = %entity,
            count = envelope.records.len(),
            "Fetched remote changes"
        );
        Ok(envelope.records)
    }

    async fn upsert(&self, entity: EntityKind, records: &[SyncRecord]) -> Result<bool> {
        let body = RecordsEnvelope {
            records: records.to_vec(),
        };
        let response = self
            .request(self.client.post(self.collection_url(entity)).json(&body))?
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                entity = %entity,
                count = records.len(),
                "Remote rejected upsert: {}",
                parse_api_error(status, &body)
            );
            return Ok(false);
        }
        Ok(true)
    }

    async fn upsert_one(&self, entity: EntityKind, record: &SyncRecord) -> Result<SyncRecord> {
        let url = format!("{}/one", self.collection_url(entity));
        let response = self
            .request(self.client.post(url).json(record))?
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Remote(parse_api_error(status, &body)));
        }
        Ok(response.json::<SyncRecord>().await?)
    }

    async fn delete(&self, entity: EntityKind, keys: &[RecordKey]) -> Result<bool> {
        let url = format!("{}/delete", self.collection_url(entity));
        let body = KeysEnvelope {
            keys: keys.to_vec(),
        };
        let response = self
            .request(self.client.post(url).json(&body))?
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                entity = %entity,
                count = keys.len(),
                "Remote rejected delete: {}",
                parse_api_error(status, &body)
            );
            return Ok(false);
        }
        Ok(true)
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

pub(crate) fn normalize_base_url(raw: String) -> Result<String> {
    let url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config("backend URL must not be empty".to_string()))?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(Error::Config(
            "backend URL must include http:// or https://".to_string(),
        ))
    }
}
