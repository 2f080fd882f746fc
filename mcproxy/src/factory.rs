use crate::cluster::ClusterBuilder;
use crate::discovery::ConsulClient;
use crate::prelude::*;
use mcproxy_backend::{
    document::{BucketClient, DocumentClient, DocumentHandler},
    mem_store::MemDocumentStore,
};
use mcproxy_common::configs::{ClusterConfig, ClusterType};

/// Per-connection view of a store shared by the whole process. Closing it
/// leaves the store open for other connections.
struct SharedStore(Arc<MemDocumentStore>);

#[async_trait]
impl DocumentClient for SharedStore {
    async fn get(&self, key: &[u8]) -> Result<Vec<u8>, Error> {
        self.0.get(key).await
    }

    async fn set(&self, key: &[u8], data: &[u8], exptime: u32) -> Result<(), Error> {
        self.0.set(key, data, exptime).await
    }

    async fn close(&self) -> Result<(), Error> {
        trace!("detached from shared memory store");
        Ok(())
    }
}

/// Recipe for the backend handlers of one configured cluster. Every client
/// connection gets fresh handlers built from it.
#[derive(Debug, Clone)]
pub enum HandlerFactory {
    Memcached { name: String, addresses: Vec<String> },
    Document { address: String, bucket: String },
    Memory(Arc<MemDocumentStore>),
}

impl HandlerFactory {
    /// Resolves node addresses, from `hostnames` when given and through
    /// service discovery otherwise.
    pub async fn from_config(config: &ClusterConfig, consul: &ConsulClient) -> Result<Self, Error> {
        if config.cluster_type() == ClusterType::Memory {
            info!("cluster {} is an in-process memory store", config.name());
            return Ok(Self::Memory(Arc::new(MemDocumentStore::new())));
        }
        let addresses = match config.hostnames() {
            Some(hostnames) => hostnames.to_vec(),
            None => consul.lookup(config.name(), config.datacenter()).await?,
        };
        if addresses.is_empty() {
            return Err(Error::config(format!(
                "no nodes found for cluster {}",
                config.name()
            )));
        }
        match config.cluster_type() {
            ClusterType::Couchbase => {
                let bucket = config.bucket().ok_or_else(|| {
                    Error::config(format!("cluster {} has no bucket", config.name()))
                })?;
                if addresses.len() > 1 {
                    debug!(
                        "cluster {}: document store reached through {}, other nodes unused",
                        config.name(),
                        addresses[0]
                    );
                }
                Ok(Self::Document {
                    address: addresses[0].clone(),
                    bucket: bucket.to_owned(),
                })
            }
            _ => Ok(Self::Memcached {
                name: config.name().to_owned(),
                addresses,
            }),
        }
    }

    pub async fn build(&self) -> Result<Arc<dyn Handler>, Error> {
        match self {
            Self::Memcached { name, addresses } => {
                let cluster = ClusterBuilder::new(name.as_str())
                    .addresses(addresses.iter().cloned())
                    .build()
                    .await?;
                Ok(Arc::new(cluster))
            }
            Self::Document { address, bucket } => {
                let client = BucketClient::connect(address, bucket).await?;
                Ok(Arc::new(DocumentHandler::new(client)))
            }
            Self::Memory(store) => Ok(Arc::new(DocumentHandler::new(SharedStore(store.clone())))),
        }
    }
}
