use crate::document::DocumentClient;
use crate::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Expiry values above this many seconds are absolute unix timestamps.
const RELATIVE_EXPIRY_LIMIT: u32 = 60 * 60 * 24 * 30;

/// Expired documents are swept once per this many writes.
const SWEEP_EVERY: u64 = 1024;

#[derive(Debug, Clone)]
struct Document {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Document {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |deadline| deadline <= now)
    }
}

/// In-process document store, a [`DocumentClient`] without a network.
#[derive(Debug, Default)]
pub struct MemDocumentStore {
    docs: RwLock<HashMap<Vec<u8>, Document>>,
    closed: AtomicBool,
    writes: AtomicU64,
}

impl MemDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.docs
            .read()
            .await
            .values()
            .filter(|doc| !doc.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    #[cfg(test)]
    async fn stored(&self) -> usize {
        self.docs.read().await.len()
    }

    fn check_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::connection_closed())
        } else {
            Ok(())
        }
    }
}

fn deadline(exptime: u32, now: Instant) -> Option<Instant> {
    match exptime {
        0 => None,
        relative if relative <= RELATIVE_EXPIRY_LIMIT => {
            Some(now + Duration::from_secs(u64::from(relative)))
        }
        absolute => {
            let unix_now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            let left = u64::from(absolute).saturating_sub(unix_now);
            Some(now + Duration::from_secs(left))
        }
    }
}

#[async_trait]
impl DocumentClient for MemDocumentStore {
    async fn get(&self, key: &[u8]) -> Result<Vec<u8>, Error> {
        self.check_open()?;
        let now = Instant::now();
        match self.docs.read().await.get(key) {
            Some(doc) if !doc.is_expired(now) => {
                trace!("GET[{}] from memory store", String::from_utf8_lossy(key));
                return Ok(doc.data.clone());
            }
            None => return Err(Error::key_not_found()),
            Some(_) => {}
        }
        let mut docs = self.docs.write().await;
        if docs.get(key).map_or(false, |doc| doc.is_expired(now)) {
            docs.remove(key);
        }
        Err(Error::key_not_found())
    }

    async fn set(&self, key: &[u8], data: &[u8], exptime: u32) -> Result<(), Error> {
        self.check_open()?;
        let now = Instant::now();
        let mut docs = self.docs.write().await;
        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
            docs.retain(|_, doc| !doc.is_expired(now));
        }
        docs.insert(
            key.to_vec(),
            Document {
                data: data.to_vec(),
                expires_at: deadline(exptime, now),
            },
        );
        trace!("SET[{}] to memory store", String::from_utf8_lossy(key));
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
