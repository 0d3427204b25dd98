//! Runtime selection between remote adapters.

use std::sync::Arc;

use crate::clock::Timestamp;
use crate::config::{BackendKind, ClientConfig};
use crate::error::Result;
use crate::models::{EntityKind, RecordKey, SyncRecord};

use super::{FormPostRemote, MemoryRemoteStore, RemoteStore, RestJsonRemote};

/// One of the supported remote adapters, chosen from configuration.
#[derive(Debug, Clone)]
pub enum RemoteBackend {
    Rest(RestJsonRemote),
    Form(FormPostRemote),
    Memory(Arc<MemoryRemoteStore>),
}

impl RemoteBackend {
    /// Validates the config, then builds the adapter it names
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let backend = match config.backend {
            BackendKind::Rest => Self::Rest(RestJsonRemote::from_config(config)?),
            BackendKind::Form => Self::Form(FormPostRemote::from_config(config)?),
        };
        tracing::debug!("Using {} remote backend", backend.name());
        Ok(backend)
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Rest(_) => "rest",
            Self::Form(_) => "form",
            Self::Memory(_) => "memory",
        }
    }
}

impl RemoteStore for RemoteBackend {
    fn ensure_ready(&self) -> Result<()> {
        match self {
            Self::Rest(remote) => remote.ensure_ready(),
            Self::Form(remote) => remote.ensure_ready(),
            Self::Memory(remote) => remote.ensure_ready(),
        }
    }

    async fn fetch_changed_since(
        &self,
        entity: EntityKind,
        since: Option<Timestamp>,
    ) -> Result<Vec<SyncRecord>> {
        match self {
            Self::Rest(remote) => remote.fetch_changed_since(entity, since).await,
            Self::Form(remote) => remote.fetch_changed_since(entity, since).await,
            Self::Memory(remote) => remote.fetch_changed_since(entity, since).await,
        }
    }

    async fn upsert(&self, entity: EntityKind, records: &[SyncRecord]) -> Result<bool> {
        match self {
            Self::Rest(remote) => remote.upsert(entity, records).await,
            Self::Form(remote) => remote.upsert(entity, records).await,
            Self::Memory(remote) => remote.upsert(entity, records).await,
        }
    }

    async fn upsert_one(&self, entity: EntityKind, record: &SyncRecord) -> Result<SyncRecord> {
        match self {
            Self::Rest(remote) => remote.upsert_one(entity, record).await,
            Self::Form(remote) => remote.upsert_one(entity, record).await,
            Self::Memory(remote) => remote.upsert_one(entity, record).await,
        }
    }

    async fn delete(&self, entity: EntityKind, keys: &[RecordKey]) -> Result<bool> {
        match self {
            Self::Rest(remote) => remote.delete(entity, keys).await,
            Self::Form(remote) => remote.delete(entity, keys).await,
            Self::Memory(remote) => remote.delete(entity, keys).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn from_config_picks_adapter_by_kind() {
        let mut config = ClientConfig {
            api_base_url: Some("http://127.0.0.1:9".to_string()),
            api_token: Some("token".to_string()),
            ..ClientConfig::default()
        };
        assert_eq!(RemoteBackend::from_config(&config).unwrap().name(), "rest");

        config.backend = BackendKind::Form;
        assert_eq!(RemoteBackend::from_config(&config).unwrap().name(), "form");
    }

    #[test]
    fn from_config_fails_fast_when_unconfigured() {
        assert!(matches!(
            RemoteBackend::from_config(&ClientConfig::default()),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn memory_variant_dispatches() {
        let memory = Arc::new(MemoryRemoteStore::new());
        let backend = RemoteBackend::Memory(Arc::clone(&memory));

        let record = SyncRecord::new("A", Timestamp::from_millis(1));
        assert!(backend.upsert(EntityKind::File, &[record]).await.unwrap());
        assert!(memory.get(EntityKind::File, "A").is_some());
    }
}
