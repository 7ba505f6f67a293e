//! LogSink - records deliveries via tracing

use contracts::{ContractError, DeliveryAdapter, MetadataRecord};
use serde::Deserialize;
use tracing::{info, instrument};

/// Config for the `log` kind
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogSinkConfig {
    /// Include the payload text in the log line
    #[serde(default)]
    pub include_value: bool,
}

/// Sink that logs record summaries for debugging
pub struct LogSink {
    name: String,
    config: LogSinkConfig,
}

impl LogSink {
    /// Create a new LogSink with the given name
    pub fn new(name: impl Into<String>, config: LogSinkConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    fn log_record_summary(&self, record: &MetadataRecord) {
        if self.config.include_value {
            info!(
                sink = %self.name,
                key = %record.key,
                transaction_id = %record.transaction_id,
                value = %record.value_as_str(),
                "Record delivered"
            );
        } else {
            info!(
                sink = %self.name,
                key = %record.key,
                transaction_id = %record.transaction_id,
                bytes = record.value.len(),
                "Record delivered"
            );
        }
    }
}

impl DeliveryAdapter for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_apply",
        skip(self, record),
        fields(sink = %self.name, key = %record.key)
    )]
    async fn apply(&self, record: &MetadataRecord) -> Result<(), ContractError> {
        self.log_record_summary(record);
        Ok(())
    }
}
