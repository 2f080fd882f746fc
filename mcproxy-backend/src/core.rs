use crate::prelude::*;
use std::future::Future;

/// One element of a get batch: a hit or miss, or the error that ended it.
pub type GetItem = Result<GetResponse, Error>;

/// Bound of the hand-off between a get producer and its consumer.
pub const GET_CHANNEL_CAPACITY: usize = 16;

/// Producer side of a [`GetStream`]. Dropping it ends the stream.
pub struct GetSender {
    tx: mpsc::Sender<GetItem>,
}

impl GetSender {
    /// Returns `false` once the consumer is gone.
    pub async fn send(&self, item: GetItem) -> bool {
        self.tx.send(item).await.is_ok()
    }
}

/// Ordered, finite results of one get batch.
///
/// Items arrive in request order. An error item is always the last one: the
/// producer stops at the first failure and closes the stream, items sent
/// before it stay valid.
pub struct GetStream {
    rx: mpsc::Receiver<GetItem>,
}

impl GetStream {
    pub fn channel() -> (GetSender, Self) {
        let (tx, rx) = mpsc::channel(GET_CHANNEL_CAPACITY);
        (GetSender { tx }, Self { rx })
    }

    /// Runs `producer` on its own task and returns the stream it feeds.
    pub fn spawn<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(GetSender) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, stream) = Self::channel();
        tokio::spawn(producer(tx));
        stream
    }

    /// Stream holding a single error.
    pub fn failed(err: Error) -> Self {
        let (tx, rx) = mpsc::channel(1);
        if tx.try_send(Err(err)).is_err() {
            error!("can't prefill failed get stream");
        }
        Self { rx }
    }

    /// Stream over already known items.
    pub fn ready(items: Vec<GetItem>) -> Self {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            if tx.try_send(item).is_err() {
                error!("can't prefill get stream");
                break;
            }
        }
        Self { rx }
    }

    /// Drains the stream, returning the items and the terminating error.
    pub async fn collect_all(mut self) -> (Vec<GetResponse>, Option<Error>) {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            match item {
                Ok(response) => items.push(response),
                Err(e) => return (items, Some(e)),
            }
        }
        (items, None)
    }
}

impl Stream for GetStream {
    type Item = GetItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Debug for GetStream {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("GetStream").finish()
    }
}

/// Cache capability set shared by a single node, a cluster of nodes and the
/// document store adapter. Orchestrators and routers only see this trait.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Starts a get batch. A batch whose keys, opaques and quiet flags don't
    /// line up is rejected before any backend call.
    fn get(&self, req: GetRequest) -> Result<GetStream, Error>;

    async fn set(&self, item: SetRequest) -> Result<(), Error>;

    async fn add(&self, item: SetRequest) -> Result<(), Error>;

    async fn replace(&self, item: SetRequest) -> Result<(), Error>;

    async fn append(&self, item: SetRequest) -> Result<(), Error>;

    async fn prepend(&self, item: SetRequest) -> Result<(), Error>;

    async fn delete(&self, req: DeleteRequest) -> Result<(), Error>;

    async fn touch(&self, req: TouchRequest) -> Result<(), Error>;

    /// Get-and-touch. A missing key is a miss response, not an error.
    async fn gat(&self, req: GatRequest) -> Result<GetResponse, Error>;

    async fn close(&self) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_keeps_producer_order() {
        let stream = GetStream::spawn(|tx| async move {
            for i in 0..100_u32 {
                let key = format!("k{}", i).into_bytes();
                if !tx.send(Ok(GetResponse::miss(key, i, false))).await {
                    break;
                }
            }
        });
        let (items, err) = stream.collect_all().await;
        assert!(err.is_none());
        let opaques: Vec<_> = items.iter().map(|item| item.opaque).collect();
        assert_eq!(opaques, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_error_ends_stream() {
        let stream = GetStream::spawn(|tx| async move {
            tx.send(Ok(GetResponse::miss(b"k1".to_vec(), 1, false)))
                .await;
            tx.send(Err(Error::backend("boom"))).await;
        });
        let (items, err) = stream.collect_all().await;
        assert_eq!(items.len(), 1);
        assert_eq!(err.unwrap().to_string(), "boom");
    }

    #[tokio::test]
    async fn test_failed_stream() {
        let mut stream = GetStream::failed(Error::malformed_batch());
        assert!(stream.next().await.unwrap().unwrap_err().is_malformed_batch());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_consumer_stops_producer() {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let stream = GetStream::spawn(|tx| async move {
            let mut sent = 0;
            while tx.send(Ok(GetResponse::default())).await {
                sent += 1;
            }
            let _ = done_tx.send(sent);
        });
        drop(stream);
        let sent = done_rx.await.unwrap();
        assert!(sent <= GET_CHANNEL_CAPACITY);
    }
}
