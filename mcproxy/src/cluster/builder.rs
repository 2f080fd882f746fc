use super::ClusterRouter;
use crate::prelude::*;
use futures::future;
use mcproxy_backend::shard::ShardConnection;
use mcproxy_common::ring::Ring;
use std::collections::HashSet;

/// Opens a [`ClusterRouter`] over a list of node addresses.
///
/// Construction is all or nothing: when any node can't be reached, the
/// connections opened to the other nodes are closed and no router is
/// returned.
#[derive(Debug, Clone)]
pub struct ClusterBuilder {
    name: String,
    addresses: Vec<String>,
}

impl ClusterBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addresses: Vec::new(),
        }
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.addresses.push(address.into());
        self
    }

    pub fn addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addresses.extend(addresses.into_iter().map(Into::into));
        self
    }

    fn check(&self) -> Result<(), Error> {
        if self.addresses.is_empty() {
            return Err(Error::config(format!(
                "cluster {} has no node addresses",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for address in &self.addresses {
            if !seen.insert(address.as_str()) {
                return Err(Error::config(format!(
                    "cluster {} lists node {} twice",
                    self.name, address
                )));
            }
        }
        Ok(())
    }

    pub async fn build(self) -> Result<ClusterRouter, Error> {
        self.check()?;
        let dials = self
            .addresses
            .iter()
            .map(|address| ShardConnection::connect(address));
        let mut opened = Vec::with_capacity(self.addresses.len());
        let mut failure = None;
        for (address, result) in self.addresses.iter().zip(future::join_all(dials).await) {
            match result {
                Ok(shard) => opened.push(shard),
                Err(e) => {
                    error!("cluster {}: can't open node {}: {}", self.name, address, e);
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            release(&self.name, opened).await;
            return Err(e);
        }
        match Ring::new(opened.clone()) {
            Ok(ring) => {
                info!(
                    "cluster {} ready with {} nodes, {} ring points",
                    self.name,
                    ring.len(),
                    ring.points_count()
                );
                Ok(ClusterRouter::new(self.name, ring))
            }
            Err(e) => {
                release(&self.name, opened).await;
                Err(e)
            }
        }
    }
}

async fn release(name: &str, shards: Vec<ShardConnection>) {
    for shard in shards {
        if let Err(e) = shard.close().await {
            warn!("cluster {}: can't close node {}: {}", name, shard.address(), e);
        }
    }
}
