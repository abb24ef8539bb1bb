//! Remote record store: upsert-by-key.
//!
//! [`RestStore`] speaks the PostgREST / Supabase dialect:
//!
//! ```text
//! POST {url}/rest/v1/{table}?on_conflict=property_key
//! Prefer: resolution=merge-duplicates,return=minimal
//! apikey: <key>
//! Authorization: Bearer <key>
//! ```
//!
//! Responses are classified for the retry policy: 2xx is success; 408, 425,
//! 429, 5xx and connection/timeout failures are transient; any other status
//! is a rejection carrying the store's `message` (or the raw body).

use crate::error::{MinerError, StoreError};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Column the upsert conflicts on.
pub const KEY_COLUMN: &str = "property_key";

/// A keyed remote table.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert `row` under `key`, replacing any existing row with that key.
    async fn upsert(&self, table: &str, key: &str, row: &Value) -> Result<(), StoreError>;
}

/// PostgREST / Supabase store over HTTPS.
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, MinerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MinerError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn endpoint(&self, table: &str) -> String {
        format!(
            "{}/rest/v1/{}?on_conflict={}",
            self.base_url, table, KEY_COLUMN
        )
    }
}

#[async_trait]
impl RecordStore for RestStore {
    async fn upsert(&self, table: &str, key: &str, row: &Value) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.endpoint(table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    StoreError::Transient(e.to_string())
                } else {
                    StoreError::Rejected {
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status.is_success() {
            debug!("Upserted '{}' into {} ({})", key, table, status);
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

/// Map a non-2xx response to a store error.
pub fn classify_status(status: StatusCode, body: &str) -> StoreError {
    let transient = status.is_server_error()
        || matches!(status.as_u16(), 408 | 425 | 429);
    if transient {
        return StoreError::Transient(format!("HTTP {}", status.as_u16()));
    }
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    StoreError::Rejected {
        reason: if message.is_empty() {
            format!("HTTP {}", status.as_u16())
        } else {
            format!("HTTP {}: {}", status.as_u16(), message)
        },
    }
}

/// In-process store keyed by `(table, key)`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<(String, String), Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, table: &str, key: &str) -> Option<Value> {
        self.rows
            .lock()
            .ok()?
            .get(&(table.to_string(), key.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every row, ordered by table then key.
    pub fn rows(&self) -> Vec<((String, String), Value)> {
        self.rows
            .lock()
            .map(|r| r.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert(&self, table: &str, key: &str, row: &Value) -> Result<(), StoreError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Transient("memory store lock poisoned".into()))?;
        rows.insert((table.to_string(), key.to_string()), row.clone());
        Ok(())
    }
}
