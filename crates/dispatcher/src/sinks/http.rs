//! HttpSink - posts each record to a receiver endpoint

use std::borrow::Cow;
use std::time::Duration;

use contracts::{ContractError, DeliveryAdapter, MetadataRecord};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Config for the `http` kind
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSinkConfig {
    /// Receiver endpoint
    pub url: String,
    /// Bearer token sent in `Authorization`
    #[serde(default)]
    pub token: Option<String>,
    /// Request timeout (ms)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    3000
}

/// Request body
#[derive(Debug, Serialize)]
struct Update<'a> {
    key: &'a str,
    value: Cow<'a, str>,
}

/// Sink that POSTs `{"key": .., "value": ..}` as JSON
///
/// Any 2xx response counts as applied.
pub struct HttpSink {
    name: String,
    url: Url,
    token: Option<String>,
    timeout: Duration,
    client: Client,
}

impl HttpSink {
    /// Create a new HttpSink
    pub fn new(name: impl Into<String>, config: HttpSinkConfig) -> Result<Self, ContractError> {
        let name = name.into();
        let url = Url::parse(&config.url).map_err(|e| {
            ContractError::invalid_sink_config(&name, format!("invalid url '{}': {e}", config.url))
        })?;
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ContractError::invalid_sink_config(&name, e.to_string()))?;

        Ok(Self {
            name,
            url,
            token: config.token,
            timeout,
            client,
        })
    }

    fn map_send_error(&self, err: reqwest::Error) -> ContractError {
        if err.is_timeout() {
            ContractError::DeliveryTimeout {
                sink_name: self.name.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            ContractError::delivery(&self.name, err.to_string())
        }
    }
}

impl DeliveryAdapter for HttpSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "http_sink_apply",
        skip(self, record),
        fields(sink = %self.name, key = %record.key)
    )]
    async fn apply(&self, record: &MetadataRecord) -> Result<(), ContractError> {
        let body = Update {
            key: &record.key,
            value: record.value_as_str(),
        };
        let mut request = self.client.post(self.url.clone()).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ContractError::delivery(
                &self.name,
                format!("receiver answered {status}"),
            ));
        }
        debug!(sink = %self.name, %status, "Receiver accepted update");
        Ok(())
    }
}
