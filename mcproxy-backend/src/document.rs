//! Document store adapter behind the [`Handler`] capability set.
//!
//! Only get, set and close reach the store. Add, replace, append, prepend,
//! delete, touch and gat are accepted and do nothing: the adapter is meant to
//! be a read source or a backfill destination, not a full cache.

use crate::core::{GetStream, Handler};
use crate::prelude::*;
use crate::shard::ShardConnection;

/// Message the store client uses for a missing document. Misses are told
/// apart from failures by comparing against it, so a client reporting
/// not-found differently turns misses into errors.
pub const NOT_FOUND_MESSAGE: &str = "key not found";

/// Shapes a caller may ask a document to be decoded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Bytes,
    Text,
    Json,
    Integer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bytes(Vec<u8>),
    Text(String),
}

impl Value {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Bytes(bytes) => bytes,
            Self::Text(text) => text.into_bytes(),
        }
    }
}

/// Passes document bodies through untouched. Only bytes and text are
/// supported; encoding is disabled until writes to the store are validated.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawBinaryTranscoder;

impl RawBinaryTranscoder {
    pub fn decode(&self, bytes: Vec<u8>, _flags: u32, target: Target) -> Result<Value, Error> {
        match target {
            Target::Bytes => Ok(Value::Bytes(bytes)),
            // never fails, invalid sequences become U+FFFD
            Target::Text => Ok(Value::Text(String::from_utf8_lossy(&bytes).into_owned())),
            other => Err(Error::unsupported_type(format!("{:?}", other).to_lowercase())),
        }
    }

    pub fn encode(&self, _value: &Value) -> Result<(Vec<u8>, u32), Error> {
        Err(Error::encoding_disabled())
    }
}

/// Native session to a document store.
#[async_trait]
pub trait DocumentClient: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Vec<u8>, Error>;

    async fn set(&self, key: &[u8], data: &[u8], exptime: u32) -> Result<(), Error>;

    async fn close(&self) -> Result<(), Error>;
}

#[async_trait]
impl<C> DocumentClient for Arc<C>
where
    C: DocumentClient + ?Sized,
{
    async fn get(&self, key: &[u8]) -> Result<Vec<u8>, Error> {
        (**self).get(key).await
    }

    async fn set(&self, key: &[u8], data: &[u8], exptime: u32) -> Result<(), Error> {
        (**self).set(key, data, exptime).await
    }

    async fn close(&self) -> Result<(), Error> {
        (**self).close().await
    }
}

/// Document client reaching a bucket through its memcached-compatible data
/// port. Writes go through the transcoder and therefore fail.
pub struct BucketClient {
    bucket: String,
    node: ShardConnection,
    transcoder: RawBinaryTranscoder,
}

impl BucketClient {
    pub async fn connect(address: &str, bucket: &str) -> Result<Self, Error> {
        let node = ShardConnection::connect(address).await?;
        info!("opened bucket '{}' at {}", bucket, address);
        Ok(Self {
            bucket: bucket.to_owned(),
            node,
            transcoder: RawBinaryTranscoder,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl DocumentClient for BucketClient {
    async fn get(&self, key: &[u8]) -> Result<Vec<u8>, Error> {
        let (data, flags) = self.node.fetch(key).await?;
        self.transcoder
            .decode(data, flags, Target::Bytes)
            .map(Value::into_bytes)
    }

    async fn set(&self, key: &[u8], data: &[u8], exptime: u32) -> Result<(), Error> {
        let (data, flags) = self.transcoder.encode(&Value::Bytes(data.to_vec()))?;
        let item = SetRequest {
            key: key.to_vec(),
            data,
            flags,
            exptime,
            opaque: 0,
            quiet: false,
        };
        self.node.set(item).await
    }

    async fn close(&self) -> Result<(), Error> {
        self.node.close().await
    }
}

/// [`Handler`] over a single document store session. Every access to the
/// session, read or write, holds the adapter lock.
pub struct DocumentHandler<C> {
    client: Arc<Mutex<C>>,
}

impl<C> DocumentHandler<C>
where
    C: DocumentClient + 'static,
{
    pub fn new(client: C) -> Self {
        Self {
            client: Arc::new(Mutex::new(client)),
        }
    }
}

fn is_not_found(err: &Error) -> bool {
    err.to_string() == NOT_FOUND_MESSAGE
}

#[async_trait]
impl<C> Handler for DocumentHandler<C>
where
    C: DocumentClient + 'static,
{
    fn get(&self, req: GetRequest) -> Result<GetStream, Error> {
        req.validate()?;
        let client = self.client.clone();
        Ok(GetStream::spawn(|tx| async move {
            let GetRequest {
                keys,
                opaques,
                quiet,
                ..
            } = req;
            for ((key, opaque), quiet) in keys.into_iter().zip(opaques).zip(quiet) {
                let result = client.lock().await.get(&key).await;
                let item = match result {
                    Ok(data) => Ok(GetResponse::hit(key, data, 0, opaque, quiet)),
                    Err(e) if is_not_found(&e) => Ok(GetResponse::miss(key, opaque, quiet)),
                    Err(e) => Err(e),
                };
                let failed = item.is_err();
                if !tx.send(item).await || failed {
                    break;
                }
            }
        }))
    }

    async fn set(&self, item: SetRequest) -> Result<(), Error> {
        self.client
            .lock()
            .await
            .set(&item.key, &item.data, item.exptime)
            .await
    }

    async fn add(&self, _item: SetRequest) -> Result<(), Error> {
        Ok(())
    }

    async fn replace(&self, _item: SetRequest) -> Result<(), Error> {
        Ok(())
    }

    async fn append(&self, _item: SetRequest) -> Result<(), Error> {
        Ok(())
    }

    async fn prepend(&self, _item: SetRequest) -> Result<(), Error> {
        Ok(())
    }

    async fn delete(&self, _req: DeleteRequest) -> Result<(), Error> {
        Ok(())
    }

    async fn touch(&self, _req: TouchRequest) -> Result<(), Error> {
        Ok(())
    }

    async fn gat(&self, req: GatRequest) -> Result<GetResponse, Error> {
        Ok(GetResponse::miss(req.key, req.opaque, req.quiet))
    }

    async fn close(&self) -> Result<(), Error> {
        self.client.lock().await.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem_store::MemDocumentStore;
    use crate::test_utils::FakeNode;
    use mockall::mock;

    mock! {
        pub Client {}
        #[async_trait]
        impl DocumentClient for Client {
            async fn get(&self, key: &[u8]) -> Result<Vec<u8>, Error>;
            async fn set(&self, key: &[u8], data: &[u8], exptime: u32) -> Result<(), Error>;
            async fn close(&self) -> Result<(), Error>;
        }
    }

    fn set_request(key: &str, value: &str) -> SetRequest {
        SetRequest {
            key: key.as_bytes().to_vec(),
            data: value.as_bytes().to_vec(),
            exptime: 100,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let handler = DocumentHandler::new(MemDocumentStore::new());
        handler.set(set_request("test", "value")).await.unwrap();
        let (items, err) = handler
            .get(GetRequest::single("test", 3, false))
            .unwrap()
            .collect_all()
            .await;
        assert!(err.is_none());
        assert_eq!(
            items,
            vec![GetResponse::hit(b"test".to_vec(), b"value".to_vec(), 0, 3, false)]
        );
    }

    #[tokio::test]
    async fn test_get_unset_key_is_miss() {
        let handler = DocumentHandler::new(MemDocumentStore::new());
        let (items, err) = handler
            .get(GetRequest::single("absent", 1, true))
            .unwrap()
            .collect_all()
            .await;
        assert!(err.is_none());
        assert_eq!(items, vec![GetResponse::miss(b"absent".to_vec(), 1, true)]);
    }

    #[tokio::test]
    async fn test_not_found_message_is_miss() {
        let mut client = MockClient::new();
        client
            .expect_get()
            .returning(|_| Err(Error::backend(NOT_FOUND_MESSAGE)));
        let handler = DocumentHandler::new(client);
        let (items, err) = handler
            .get(GetRequest::single("k", 1, false))
            .unwrap()
            .collect_all()
            .await;
        assert!(err.is_none());
        assert!(items[0].miss);
    }

    #[tokio::test]
    async fn test_backend_error_surfaces_as_stream_error() {
        let mut client = MockClient::new();
        client.expect_get().returning(|key| {
            if key == b"k1" {
                Ok(b"v1".to_vec())
            } else {
                Err(Error::backend("dummyError"))
            }
        });
        let handler = DocumentHandler::new(client);
        let req = GetRequest {
            keys: vec![b"k1".to_vec(), b"k2".to_vec(), b"k3".to_vec()],
            opaques: vec![1, 2, 3],
            quiet: vec![false; 3],
            ..Default::default()
        };
        let (items, err) = handler.get(req).unwrap().collect_all().await;
        assert_eq!(items.len(), 1);
        assert!(!items[0].miss);
        assert_eq!(err.unwrap().to_string(), "dummyError");
    }

    #[tokio::test]
    async fn test_set_error_is_propagated() {
        let mut client = MockClient::new();
        client
            .expect_set()
            .returning(|_, _, _| Err(Error::backend("dummyError")));
        let handler = DocumentHandler::new(client);
        let err = handler.set(set_request("k", "v")).await.unwrap_err();
        assert_eq!(err.to_string(), "dummyError");
    }

    #[tokio::test]
    async fn test_malformed_batch() {
        let handler = DocumentHandler::new(MockClient::new());
        let req = GetRequest {
            keys: vec![b"k1".to_vec(), b"k2".to_vec()],
            opaques: vec![1],
            quiet: vec![false, false],
            ..Default::default()
        };
        assert!(handler.get(req).unwrap_err().is_malformed_batch());
    }

    #[tokio::test]
    async fn test_unsupported_operations_succeed_without_store_access() {
        // no expectations: any call into the client panics
        let handler = DocumentHandler::new(MockClient::new());
        handler.add(set_request("k", "v")).await.unwrap();
        handler.replace(set_request("k", "v")).await.unwrap();
        handler.append(set_request("k", "v")).await.unwrap();
        handler.prepend(set_request("k", "v")).await.unwrap();
        handler.delete(DeleteRequest::default()).await.unwrap();
        handler.touch(TouchRequest::default()).await.unwrap();
        assert!(handler.gat(GatRequest::default()).await.unwrap().miss);
    }

    #[tokio::test]
    async fn test_close_reaches_client() {
        let mut client = MockClient::new();
        client.expect_close().times(1).returning(|| Ok(()));
        let handler = DocumentHandler::new(client);
        handler.close().await.unwrap();
    }

    #[test]
    fn test_transcoder_decode() {
        let transcoder = RawBinaryTranscoder;
        assert_eq!(
            transcoder.decode(vec![0, 159, 146], 0, Target::Bytes).unwrap(),
            Value::Bytes(vec![0, 159, 146])
        );
        assert_eq!(
            transcoder.decode(b"text".to_vec(), 0, Target::Text).unwrap(),
            Value::Text("text".to_owned())
        );
        assert_eq!(
            transcoder.decode(vec![b'a', 0xff, b'b'], 0, Target::Text).unwrap(),
            Value::Text("a\u{fffd}b".to_owned())
        );
        let err = transcoder
            .decode(b"{}".to_vec(), 0, Target::Json)
            .unwrap_err();
        assert_eq!(
            err.kind(),
            &mcproxy_common::error::Kind::UnsupportedType("json".to_owned())
        );
        assert!(transcoder.decode(b"1".to_vec(), 0, Target::Integer).is_err());
    }

    #[test]
    fn test_transcoder_encode_is_disabled() {
        let transcoder = RawBinaryTranscoder;
        let err = transcoder
            .encode(&Value::Bytes(b"v".to_vec()))
            .unwrap_err();
        assert_eq!(err.kind(), &mcproxy_common::error::Kind::EncodingDisabled);
    }

    #[tokio::test]
    async fn test_bucket_client_reads_and_refuses_writes() {
        let node = FakeNode::start().await;
        node.insert("doc", "body").await;
        let client = BucketClient::connect(node.address(), "default")
            .await
            .unwrap();
        assert_eq!(client.bucket(), "default");
        let handler = DocumentHandler::new(client);

        let req = GetRequest {
            keys: vec![b"doc".to_vec(), b"missing".to_vec()],
            opaques: vec![1, 2],
            quiet: vec![false, false],
            ..Default::default()
        };
        let (items, err) = handler.get(req).unwrap().collect_all().await;
        assert!(err.is_none());
        assert_eq!(items[0].data, b"body");
        assert!(items[1].miss);

        let err = handler.set(set_request("doc", "new")).await.unwrap_err();
        assert_eq!(err.kind(), &mcproxy_common::error::Kind::EncodingDisabled);
        assert_eq!(node.value("doc").await.unwrap(), b"body");
        handler.close().await.unwrap();
    }
}
