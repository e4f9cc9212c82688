//! Typed access to the persisted orchestrator settings.
//!
//! Every write is read back; a value that does not come back unchanged is a
//! [`OrchestratorError::Verification`] and is logged at `error!`. Reads
//! propagate store errors so callers never mistake an outage for a default.
//! A malformed stored value is logged and treated as absent.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{error, warn};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::store::ConfigStore;

pub const KEY_PAUSED: &str = "is_paused";
pub const KEY_LAST_DAILY_RUN: &str = "last_daily_run";
pub const KEY_BOOTSTRAP_ENABLED: &str = "bootstrap_enabled";
pub const KEY_BOOTSTRAP_STARTED_AT: &str = "bootstrap_started_at";

#[derive(Clone)]
pub struct Settings {
    store: Arc<dyn ConfigStore>,
}

impl Settings {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    /// Whether the daily burst is paused. Never written means not paused.
    pub async fn is_paused(&self) -> OrchestratorResult<bool> {
        Ok(self.read::<bool>(KEY_PAUSED).await?.unwrap_or(false))
    }

    pub async fn set_paused(&self, paused: bool) -> OrchestratorResult<()> {
        self.write(KEY_PAUSED, &paused).await
    }

    pub async fn last_daily_run(&self) -> OrchestratorResult<Option<DateTime<Utc>>> {
        self.read(KEY_LAST_DAILY_RUN).await
    }

    pub async fn set_last_daily_run(&self, at: DateTime<Utc>) -> OrchestratorResult<()> {
        self.write(KEY_LAST_DAILY_RUN, &at).await
    }

    /// Bootstrap mode is on unless it was explicitly switched off.
    pub async fn bootstrap_enabled(&self, default: bool) -> OrchestratorResult<bool> {
        Ok(self
            .read::<bool>(KEY_BOOTSTRAP_ENABLED)
            .await?
            .unwrap_or(default))
    }

    pub async fn set_bootstrap_enabled(&self, enabled: bool) -> OrchestratorResult<()> {
        self.write(KEY_BOOTSTRAP_ENABLED, &enabled).await
    }

    pub async fn bootstrap_started_at(&self) -> OrchestratorResult<Option<DateTime<Utc>>> {
        self.read(KEY_BOOTSTRAP_STARTED_AT).await
    }

    pub async fn set_bootstrap_started_at(&self, at: DateTime<Utc>) -> OrchestratorResult<()> {
        self.write(KEY_BOOTSTRAP_STARTED_AT, &at).await
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> OrchestratorResult<Option<T>> {
        let Some(raw) = self.store.get_value(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, raw = %raw, "Ignoring malformed setting: {}", e);
                Ok(None)
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) -> OrchestratorResult<()> {
        let encoded = serde_json::to_string(value).map_err(anyhow::Error::from)?;
        self.store.put_value(key, &encoded).await?;

        let read_back = self.store.get_value(key).await?;
        if read_back.as_deref() != Some(encoded.as_str()) {
            let actual = read_back.unwrap_or_else(|| "<missing>".to_string());
            error!(
                key,
                expected = %encoded,
                actual = %actual,
                "Config store write did not verify"
            );
            return Err(OrchestratorError::Verification {
                key: key.to_string(),
                expected: encoded,
                actual,
            });
        }
        Ok(())
    }
}
