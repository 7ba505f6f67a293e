//! Sink registry - resolves registered sinks to live delivery adapters

use std::collections::HashMap;
use std::sync::Arc;

use contracts::{
    is_valid_bit, ContractError, DeliveryAdapter, MetadataRecord, SinkDescriptor, SinkKind,
    SinkStore,
};
use tracing::{debug, warn};

use crate::sinks::{CacheSink, HttpSink, LogSink};

/// Builds delivery adapters from registry rows
pub trait AdapterFactory {
    type Adapter: DeliveryAdapter + Send + Sync + 'static;

    /// Construct the adapter for `descriptor`
    ///
    /// # Errors
    /// Unknown kind or a config the kind cannot use.
    fn build(&self, descriptor: &SinkDescriptor) -> Result<Self::Adapter, ContractError>;
}

/// Adapter for any built-in kind
pub enum SinkAdapter {
    Cache(CacheSink),
    Http(HttpSink),
    Log(LogSink),
}

impl DeliveryAdapter for SinkAdapter {
    fn name(&self) -> &str {
        match self {
            SinkAdapter::Cache(sink) => sink.name(),
            SinkAdapter::Http(sink) => sink.name(),
            SinkAdapter::Log(sink) => sink.name(),
        }
    }

    async fn apply(&self, record: &MetadataRecord) -> Result<(), ContractError> {
        match self {
            SinkAdapter::Cache(sink) => sink.apply(record).await,
            SinkAdapter::Http(sink) => sink.apply(record).await,
            SinkAdapter::Log(sink) => sink.apply(record).await,
        }
    }
}

type Constructor = fn(&SinkDescriptor) -> Result<SinkAdapter, ContractError>;

/// Fixed kind -> constructor table
const CONSTRUCTORS: [(SinkKind, Constructor); 3] = [
    (SinkKind::Cache, build_cache),
    (SinkKind::Http, build_http),
    (SinkKind::Log, build_log),
];

fn build_cache(descriptor: &SinkDescriptor) -> Result<SinkAdapter, ContractError> {
    CacheSink::new(&descriptor.instance_id, descriptor.decode_config()?).map(SinkAdapter::Cache)
}

fn build_http(descriptor: &SinkDescriptor) -> Result<SinkAdapter, ContractError> {
    HttpSink::new(&descriptor.instance_id, descriptor.decode_config()?).map(SinkAdapter::Http)
}

fn build_log(descriptor: &SinkDescriptor) -> Result<SinkAdapter, ContractError> {
    Ok(SinkAdapter::Log(LogSink::new(
        &descriptor.instance_id,
        descriptor.decode_config()?,
    )))
}

/// Default factory over the built-in kinds
#[derive(Debug, Clone, Copy, Default)]
pub struct KindTable;

impl AdapterFactory for KindTable {
    type Adapter = SinkAdapter;

    fn build(&self, descriptor: &SinkDescriptor) -> Result<SinkAdapter, ContractError> {
        let kind = descriptor.sink_kind()?;
        let (_, construct) = CONSTRUCTORS
            .iter()
            .find(|(k, _)| *k == kind)
            .ok_or_else(|| ContractError::UnknownSinkKind {
                instance_id: descriptor.instance_id.clone(),
                kind: descriptor.kind.clone(),
            })?;
        construct(descriptor)
    }
}

/// A registered sink with its live adapter
pub struct ActiveSink<A> {
    pub descriptor: SinkDescriptor,
    pub adapter: Arc<A>,
}

impl<A> Clone for ActiveSink<A> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            adapter: Arc::clone(&self.adapter),
        }
    }
}

impl<A> ActiveSink<A> {
    pub fn bit(&self) -> u64 {
        self.descriptor.bit
    }

    pub fn instance_id(&self) -> &str {
        &self.descriptor.instance_id
    }
}

/// OR of the bits of `sinks`
pub fn full_mask_of<A>(sinks: &[ActiveSink<A>]) -> u64 {
    contracts::full_mask(sinks.iter().map(ActiveSink::bit))
}

/// Loads the active sink set and keeps adapters alive between loads
///
/// An adapter is rebuilt only when its registry row changes, so
/// connection-holding adapters survive across polls.
pub struct SinkRegistry<F: AdapterFactory> {
    factory: F,
    cache: HashMap<String, ActiveSink<F::Adapter>>,
}

impl<F: AdapterFactory> SinkRegistry<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            cache: HashMap::new(),
        }
    }

    /// Load every usable registered sink, ordered by bit
    ///
    /// Rows with an unknown kind, an unusable config, an invalid bit or a
    /// bit already claimed by an earlier row are skipped with a warning.
    ///
    /// # Errors
    /// Only when the registry itself cannot be read.
    pub async fn load_active<S>(
        &mut self,
        store: &S,
    ) -> Result<Vec<ActiveSink<F::Adapter>>, ContractError>
    where
        S: SinkStore + Sync,
    {
        let descriptors = store.load_sinks().await?;

        let mut active = Vec::with_capacity(descriptors.len());
        let mut next_cache = HashMap::with_capacity(descriptors.len());
        let mut claimed = 0u64;

        for descriptor in descriptors {
            if !is_valid_bit(descriptor.bit) {
                warn!(sink = %descriptor.instance_id, bit = descriptor.bit, "Skipping sink with invalid bit");
                observability::record_sink_rejected(&descriptor.instance_id);
                continue;
            }
            if claimed & descriptor.bit != 0 {
                warn!(sink = %descriptor.instance_id, bit = descriptor.bit, "Skipping sink with duplicate bit");
                observability::record_sink_rejected(&descriptor.instance_id);
                continue;
            }

            let sink = match self.cache.remove(&descriptor.instance_id) {
                Some(cached) if cached.descriptor == descriptor => cached,
                _ => match self.factory.build(&descriptor) {
                    Ok(adapter) => {
                        debug!(sink = %descriptor.instance_id, kind = %descriptor.kind, "Adapter built");
                        ActiveSink {
                            descriptor,
                            adapter: Arc::new(adapter),
                        }
                    }
                    Err(e) => {
                        warn!(sink = %descriptor.instance_id, error = %e, "Skipping sink");
                        observability::record_sink_rejected(&descriptor.instance_id);
                        continue;
                    }
                },
            };

            claimed |= sink.bit();
            next_cache.insert(sink.instance_id().to_string(), sink.clone());
            active.push(sink);
        }

        // Retired sinks fall out of the cache here
        self.cache = next_cache;
        Ok(active)
    }
}

/// One-shot load with the built-in kinds
pub async fn load_active_sinks<S>(store: &S) -> Result<Vec<ActiveSink<SinkAdapter>>, ContractError>
where
    S: SinkStore + Sync,
{
    SinkRegistry::new(KindTable).load_active(store).await
}
