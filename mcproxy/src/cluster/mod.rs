mod builder;

#[cfg(test)]
mod tests;

use crate::prelude::*;
use mcproxy_backend::shard::ShardConnection;
use mcproxy_common::ring::Ring;

pub use builder::ClusterBuilder;

/// Upper bound of single-key reads one get batch keeps in flight.
pub const FETCH_PARALLELISM: usize = 16;

/// Memcached cluster seen as a single backend. Every key is routed through
/// the hash ring to the shard owning it.
pub struct ClusterRouter {
    name: String,
    ring: Arc<Ring<ShardConnection>>,
}

impl ClusterRouter {
    pub(crate) fn new(name: String, ring: Ring<ShardConnection>) -> Self {
        Self {
            name,
            ring: Arc::new(ring),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shards(&self) -> &[ShardConnection] {
        self.ring.buckets()
    }

    fn locate(&self, key: &[u8]) -> &ShardConnection {
        let shard = self.ring.locate(key);
        trace!(
            "key {} of cluster {} routed to {}",
            String::from_utf8_lossy(key),
            self.name,
            shard.address()
        );
        shard
    }
}

impl Debug for ClusterRouter {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("ClusterRouter")
            .field("name", &self.name)
            .field("shards", &self.ring.len())
            .finish()
    }
}

#[async_trait]
impl Handler for ClusterRouter {
    fn get(&self, req: GetRequest) -> Result<GetStream, Error> {
        req.validate()?;
        let GetRequest {
            keys,
            opaques,
            quiet,
            ..
        } = req;
        let lookups: Vec<_> = keys
            .into_iter()
            .zip(opaques)
            .zip(quiet)
            .map(|((key, opaque), quiet)| (self.locate(&key).clone(), key, opaque, quiet))
            .collect();
        let name = self.name.clone();
        Ok(GetStream::spawn(|tx| async move {
            // Each read runs on its own task so an abandoned batch never
            // interrupts an exchange half way.
            let mut results = stream::iter(lookups)
                .map(|(shard, key, opaque, quiet)| {
                    tokio::spawn(async move { shard.get_one(key, opaque, quiet).await })
                })
                .buffered(FETCH_PARALLELISM);
            while let Some(joined) = results.next().await {
                let item = joined.unwrap_or_else(|e| {
                    error!("get task of cluster {} failed: {}", name, e);
                    Err(Error::internal())
                });
                let failed = item.is_err();
                if !tx.send(item).await || failed {
                    break;
                }
            }
        }))
    }

    async fn set(&self, item: SetRequest) -> Result<(), Error> {
        self.locate(&item.key).set(item).await
    }

    async fn add(&self, item: SetRequest) -> Result<(), Error> {
        self.locate(&item.key).add(item).await
    }

    async fn replace(&self, item: SetRequest) -> Result<(), Error> {
        self.locate(&item.key).replace(item).await
    }

    async fn append(&self, item: SetRequest) -> Result<(), Error> {
        self.locate(&item.key).append(item).await
    }

    async fn prepend(&self, item: SetRequest) -> Result<(), Error> {
        self.locate(&item.key).prepend(item).await
    }

    async fn delete(&self, req: DeleteRequest) -> Result<(), Error> {
        self.locate(&req.key).delete(req).await
    }

    async fn touch(&self, req: TouchRequest) -> Result<(), Error> {
        self.locate(&req.key).touch(req).await
    }

    async fn gat(&self, req: GatRequest) -> Result<GetResponse, Error> {
        self.locate(&req.key).gat(req).await
    }

    /// Closes every shard, returning the last failure.
    async fn close(&self) -> Result<(), Error> {
        let mut result = Ok(());
        for shard in self.ring.buckets() {
            if let Err(e) = shard.close().await {
                warn!(
                    "cluster {}: can't close shard {}: {}",
                    self.name,
                    shard.address(),
                    e
                );
                result = Err(e);
            }
        }
        info!("cluster {} closed", self.name);
        result
    }
}
