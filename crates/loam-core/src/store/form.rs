//! Legacy form-post remote adapter.
//!
//! Every operation is a `POST` of url-encoded fields to a single endpoint,
//! answered with a `{ success, data, message }` envelope. Timestamps in the
//! response may be strings; they are normalised on deserialisation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::models::{EntityKind, RecordKey, SyncRecord};
use crate::util::{compact_text, normalize_text_option};

use super::rest::normalize_base_url;
use super::RemoteStore;

/// Response envelope of the legacy endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> FormEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}

/// Operation selector sent in the `action` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormAction {
    Changes,
    Upsert,
    UpsertOne,
    Delete,
}

impl FormAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Changes => "changes",
            Self::Upsert => "upsert",
            Self::UpsertOne => "upsert_one",
            Self::Delete => "delete",
        }
    }
}

#[derive(Clone)]
pub struct FormPostRemote {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for FormPostRemote {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("FormPostRemote")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl FormPostRemote {
    pub fn new(
        base_url: impl Into<String>,
        path: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let path = path.trim();
        let endpoint = if path.starts_with('/') {
            format!("{base_url}{path}")
        } else {
            format!("{base_url}/{path}")
        };
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint,
            token: normalize_text_option(token),
            client,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let base_url = config
            .api_base_url
            .clone()
            .ok_or_else(|| Error::Config("api_base_url is not set".to_string()))?;
        Self::new(
            base_url,
            &config.form_endpoint_path,
            config.api_token.clone(),
            config.request_timeout(),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        action: FormAction,
        entity: EntityKind,
        extra: &[(&str, String)],
    ) -> Result<FormEnvelope<T>> {
        let token = self.token.as_deref().ok_or(Error::NotAuthenticated)?;
        let mut fields: Vec<(&str, String)> = vec![
            ("action", action.as_str().to_string()),
            ("entity", entity.table_name().to_string()),
            ("token", token.to_string()),
        ];
        fields.extend(extra.iter().cloned());

        let response = self.client.post(&self.endpoint).form(&fields).send().await?;
        let status = response.status();
        let body = response.text().await?;

        match serde_json::from_str::<FormEnvelope<T>>(&body) {
            Ok(envelope) => Ok(envelope),
            Err(_) if !status.is_success() => Ok(FormEnvelope::failure(format!(
                "HTTP {}: {}",
                status.as_u16(),
                compact_text(&body)
            ))),
            Err(error) => Err(Error::Remote(format!(
                "malformed {} response: {error}",
                action.as_str()
            ))),
        }
    }
}

fn failure_message<T>(envelope: &FormEnvelope<T>) -> String {
    envelope
        .message
        .clone()
        .unwrap_or_else(|| "request failed".to_string())
}

impl RemoteStore for FormPostRemote {
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
        let since = since.map(|since| since.as_millis().to_string()).unwrap_or_default();
        let envelope = self
            .post::<Vec<SyncRecord>>(FormAction::Changes, entity, &[("since", since)])
            .await?;

        if !envelope.success {
            return Err(Error::Remote(failure_message(&envelope)));
        }
        Ok(envelope.data.unwrap_or_default())
    }

    async fn upsert(&self, entity: EntityKind, records: &[SyncRecord]) -> Result<bool> {
        let records_json = serde_json::to_string(records)?;
        let envelope = self
            .post::<serde_json::Value>(FormAction::Upsert, entity, &[("records", records_json)])
            .await?;

        if !envelope.success {
            tracing::warn!(
                entity = %entity,
                count = records.len(),
                "Legacy backend rejected upsert: {}",
                failure_message(&envelope)
            );
        }
        Ok(envelope.success)
    }

    async fn upsert_one(&self, entity: EntityKind, record: &SyncRecord) -> Result<SyncRecord> {
        let record_json = serde_json::to_string(record)?;
        let envelope = self
            .post::<SyncRecord>(FormAction::UpsertOne, entity, &[("record", record_json)])
            .await?;

        if !envelope.success {
            return Err(Error::Remote(failure_message(&envelope)));
        }
        envelope
            .data
            .ok_or_else(|| Error::Remote("upsert_one response carried no record".to_string()))
    }

    async fn delete(&self, entity: EntityKind, keys: &[RecordKey]) -> Result<bool> {
        let keys_json = serde_json::to_string(keys)?;
        let envelope = self
            .post::<serde_json::Value>(FormAction::Delete, entity, &[("keys", keys_json)])
            .await?;

        if !envelope.success {
            tracing::warn!(
                entity = %entity,
                count = keys.len(),
                "Legacy backend rejected delete: {}",
                failure_message(&envelope)
            );
        }
        Ok(envelope.success)
    }
}
