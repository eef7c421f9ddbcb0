//! The one persistable job: POST a stored JSON body to a session hook.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use pushrelay_core::push::PushEnvelope;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::{Result, SchedulerError},
    job::Job,
    registry::{require_str, Loadable, Record, Saveable},
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

static HTTP: OnceLock<reqwest::Client> = OnceLock::new();

/// Install the shared HTTP client used by every push. Only the first call
/// takes effect; later calls keep the existing client.
pub fn init_http_client(timeout: Duration) {
    let _ = HTTP.set(build_client(timeout));
}

fn http() -> &'static reqwest::Client {
    HTTP.get_or_init(|| build_client(DEFAULT_TIMEOUT))
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "http client builder failed, using defaults");
            reqwest::Client::new()
        })
}

/// Delivers a pre-serialized envelope to a callback URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushToSession {
    url: String,
    data: Vec<u8>,
}

impl PushToSession {
    pub fn new(url: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            data,
        }
    }

    /// Push `envelope` to its session's hook.
    pub fn from_envelope(envelope: &PushEnvelope) -> pushrelay_core::Result<Self> {
        Ok(Self::new(envelope.session.hook.clone(), envelope.to_bytes()?))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

#[async_trait]
impl Job for PushToSession {
    async fn run(&self) {
        let result = http()
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(self.data.clone())
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!(url = %self.url, status = %resp.status(), "push delivered");
            }
            Ok(resp) => {
                warn!(url = %self.url, status = %resp.status(), "push rejected by hook");
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "push failed");
            }
        }
    }

    fn persist(&self) -> Option<&dyn Saveable> {
        Some(self)
    }
}

impl Saveable for PushToSession {
    fn type_tag(&self) -> &'static str {
        Self::TYPE_TAG
    }

    fn save(&self) -> Result<Record> {
        let data = std::str::from_utf8(&self.data)
            .map_err(|e| SchedulerError::InvalidRecord(format!("push body is not UTF-8: {e}")))?;
        let mut record = Record::new();
        record.insert("url".to_string(), Value::String(self.url.clone()));
        record.insert("data".to_string(), Value::String(data.to_string()));
        Ok(record)
    }
}

impl Loadable for PushToSession {
    const TYPE_TAG: &'static str = "push_to_session";

    fn load(record: &Record) -> Result<Self> {
        let url = require_str(record, "url")?;
        let data = require_str(record, "data")?;
        Ok(Self::new(url, data.as_bytes().to_vec()))
    }
}
