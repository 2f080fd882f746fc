use crate::core::{GetStream, Handler};
use crate::prelude::*;
use mcproxy_common::{
    protocol::{
        opcode, read_response, write_delete, write_gat, write_get, write_set, write_touch,
        Response,
    },
    ring::Bucket,
};
use tokio::{
    io::{AsyncWriteExt, BufStream},
    net::TcpStream,
};

enum Command<'a> {
    Get(&'a [u8]),
    Store(u8, &'a SetRequest),
    Delete(&'a [u8]),
    Touch(&'a [u8], u32),
    Gat(&'a [u8], u32),
}

struct Conn {
    stream: BufStream<TcpStream>,
    // set while a request is on the wire without its reply
    busy: bool,
}

impl Conn {
    async fn dial(address: &str) -> Result<Self, Error> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| Error::io(format!("can't connect to {}: {}", address, e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("can't set nodelay for {}: {}", address, e);
        }
        debug!("connected to {}", address);
        Ok(Self {
            stream: BufStream::new(stream),
            busy: false,
        })
    }
}

struct Link {
    // `None` after a failed exchange, redialed on next use
    conn: Option<Conn>,
    closed: bool,
}

struct Shard {
    address: String,
    link: Mutex<Link>,
    next_opaque: AtomicU32,
}

/// One long-lived connection to one memcached node.
///
/// Exchanges are strictly sequential: a request is written and its reply
/// read while holding the connection lock. A transport failure or an
/// abandoned exchange only fails the request at hand; the out of sync
/// stream is dropped and the next exchange dials the node again. After
/// `close` every operation fails with a closed-connection error.
#[derive(Clone)]
pub struct ShardConnection {
    inner: Arc<Shard>,
}

impl ShardConnection {
    pub async fn connect(address: &str) -> Result<Self, Error> {
        let conn = Conn::dial(address).await?;
        Ok(Self {
            inner: Arc::new(Shard {
                address: address.to_owned(),
                link: Mutex::new(Link {
                    conn: Some(conn),
                    closed: false,
                }),
                next_opaque: AtomicU32::new(0),
            }),
        })
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.link.lock().await.closed
    }

    /// Single-key read. Not found is reported as an error here.
    pub async fn fetch(&self, key: &[u8]) -> Result<(Vec<u8>, u32), Error> {
        let response = self.exchange(Command::Get(key)).await?;
        let flags = response.flags();
        Ok((response.value, flags))
    }

    /// Single-key read mapping not found onto a miss.
    pub async fn get_one(&self, key: Vec<u8>, opaque: Opaque, quiet: bool) -> Result<GetResponse, Error> {
        match self.fetch(&key).await {
            Ok((data, flags)) => Ok(GetResponse::hit(key, data, flags, opaque, quiet)),
            Err(e) if e.is_key_not_found() => Ok(GetResponse::miss(key, opaque, quiet)),
            Err(e) => Err(e),
        }
    }

    async fn store(&self, op: u8, item: &SetRequest) -> Result<(), Error> {
        self.exchange(Command::Store(op, item)).await.map(|_| ())
    }

    async fn exchange(&self, command: Command<'_>) -> Result<Response, Error> {
        let mut link = self.inner.link.lock().await;
        if link.closed {
            return Err(Error::connection_closed());
        }
        if link.conn.as_ref().map_or(false, |c| c.busy) {
            warn!(
                "previous exchange with {} was abandoned, dropping connection",
                self.inner.address
            );
            link.conn = None;
        }
        let conn = match link.conn.take() {
            Some(conn) => conn,
            None => {
                info!("reconnecting to {}", self.inner.address);
                Conn::dial(&self.inner.address).await?
            }
        };
        let current = link.conn.insert(conn);
        let opaque = self.inner.next_opaque.fetch_add(1, Ordering::Relaxed);
        current.busy = true;
        let result = roundtrip(&mut current.stream, &command, opaque).await;
        current.busy = false;
        match result {
            Ok(response) => response.into_result(),
            Err(e) => {
                warn!(
                    "connection to {} dropped after failed exchange: {}",
                    self.inner.address, e
                );
                link.conn = None;
                Err(e)
            }
        }
    }
}

async fn roundtrip(
    stream: &mut BufStream<TcpStream>,
    command: &Command<'_>,
    opaque: Opaque,
) -> Result<Response, Error> {
    match command {
        Command::Get(key) => write_get(stream, key, opaque).await?,
        Command::Store(op, item) => write_set(stream, *op, item, opaque).await?,
        Command::Delete(key) => write_delete(stream, key, opaque).await?,
        Command::Touch(key, exptime) => write_touch(stream, key, *exptime, opaque).await?,
        Command::Gat(key, exptime) => write_gat(stream, key, *exptime, opaque).await?,
    }
    let response = read_response(stream).await?;
    if response.opaque() != opaque {
        return Err(Error::protocol(format!(
            "response opaque {} doesn't match request opaque {}",
            response.opaque(),
            opaque
        )));
    }
    Ok(response)
}

impl Bucket for ShardConnection {
    fn label(&self) -> &str {
        self.address()
    }
}

impl Debug for ShardConnection {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("ShardConnection")
            .field("address", &self.inner.address)
            .finish()
    }
}

#[async_trait]
impl Handler for ShardConnection {
    fn get(&self, req: GetRequest) -> Result<GetStream, Error> {
        req.validate()?;
        let shard = self.clone();
        Ok(GetStream::spawn(|tx| async move {
            let GetRequest {
                keys,
                opaques,
                quiet,
                ..
            } = req;
            for ((key, opaque), quiet) in keys.into_iter().zip(opaques).zip(quiet) {
                let item = shard.get_one(key, opaque, quiet).await;
                let failed = item.is_err();
                if !tx.send(item).await {
                    debug!("get stream of {} dropped by consumer", shard.address());
                    break;
                }
                if failed {
                    break;
                }
            }
        }))
    }

    async fn set(&self, item: SetRequest) -> Result<(), Error> {
        self.store(opcode::SET, &item).await
    }

    async fn add(&self, item: SetRequest) -> Result<(), Error> {
        self.store(opcode::ADD, &item).await
    }

    async fn replace(&self, item: SetRequest) -> Result<(), Error> {
        self.store(opcode::REPLACE, &item).await
    }

    async fn append(&self, item: SetRequest) -> Result<(), Error> {
        self.store(opcode::APPEND, &item).await
    }

    async fn prepend(&self, item: SetRequest) -> Result<(), Error> {
        self.store(opcode::PREPEND, &item).await
    }

    async fn delete(&self, req: DeleteRequest) -> Result<(), Error> {
        self.exchange(Command::Delete(&req.key)).await.map(|_| ())
    }

    async fn touch(&self, req: TouchRequest) -> Result<(), Error> {
        self.exchange(Command::Touch(&req.key, req.exptime))
            .await
            .map(|_| ())
    }

    async fn gat(&self, req: GatRequest) -> Result<GetResponse, Error> {
        match self.exchange(Command::Gat(&req.key, req.exptime)).await {
            Ok(response) => {
                let flags = response.flags();
                Ok(GetResponse::hit(
                    req.key,
                    response.value,
                    flags,
                    req.opaque,
                    req.quiet,
                ))
            }
            Err(e) if e.is_key_not_found() => Ok(GetResponse::miss(req.key, req.opaque, req.quiet)),
            Err(e) => Err(e),
        }
    }

    async fn close(&self) -> Result<(), Error> {
        let conn = {
            let mut link = self.inner.link.lock().await;
            link.closed = true;
            link.conn.take()
        };
        match conn {
            Some(mut conn) => {
                debug!("closing connection to {}", self.inner.address);
                conn.stream.shutdown().await.map_err(Error::from)
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeNode;

    fn init_logger() {
        let _ = env_logger::builder()
            .is_test(true)
            .filter_level(log::LevelFilter::Debug)
            .try_init();
    }

    fn set_request(key: &str, value: &str) -> SetRequest {
        SetRequest {
            key: key.as_bytes().to_vec(),
            data: value.as_bytes().to_vec(),
            flags: 5,
            exptime: 0,
            opaque: 0,
            quiet: false,
        }
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let node = FakeNode::start().await;
        let shard = ShardConnection::connect(node.address()).await.unwrap();
        shard.set(set_request("k1", "v1")).await.unwrap();

        let req = GetRequest {
            keys: vec![b"k1".to_vec(), b"k2".to_vec()],
            opaques: vec![5, 6],
            quiet: vec![false, true],
            ..Default::default()
        };
        let (items, err) = shard.get(req).unwrap().collect_all().await;
        assert!(err.is_none());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], GetResponse::hit(b"k1".to_vec(), b"v1".to_vec(), 5, 5, false));
        assert_eq!(items[1], GetResponse::miss(b"k2".to_vec(), 6, true));
    }

    #[tokio::test]
    async fn test_backend_error_aborts_batch() {
        init_logger();
        let node = FakeNode::start().await;
        node.insert("k1", "v1").await;
        node.insert("k3", "v3").await;
        let shard = ShardConnection::connect(node.address()).await.unwrap();
        let req = GetRequest {
            keys: vec![b"k1".to_vec(), b"fail-k2".to_vec(), b"k3".to_vec()],
            opaques: vec![1, 2, 3],
            quiet: vec![false; 3],
            ..Default::default()
        };
        let (items, err) = shard.get(req).unwrap().collect_all().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].data, b"v1");
        assert!(err.is_some());

        // application errors leave the connection usable
        let (data, _) = shard.fetch(b"k3").await.unwrap();
        assert_eq!(data, b"v3");
    }

    #[tokio::test]
    async fn test_malformed_batch_is_rejected() {
        let node = FakeNode::start().await;
        let shard = ShardConnection::connect(node.address()).await.unwrap();
        let req = GetRequest {
            keys: vec![b"k1".to_vec(), b"k2".to_vec()],
            opaques: vec![1],
            quiet: vec![false, false],
            ..Default::default()
        };
        assert!(shard.get(req).unwrap_err().is_malformed_batch());
    }

    #[tokio::test]
    async fn test_add_delete_touch_gat() {
        let node = FakeNode::start().await;
        let shard = ShardConnection::connect(node.address()).await.unwrap();
        shard.add(set_request("k", "v")).await.unwrap();
        assert!(shard.add(set_request("k", "v")).await.unwrap_err().is_not_stored());

        let touch = TouchRequest {
            key: b"k".to_vec(),
            exptime: 30,
            ..Default::default()
        };
        shard.touch(touch).await.unwrap();
        assert_eq!(node.exptime("k").await, Some(30));

        let gat = GatRequest {
            key: b"k".to_vec(),
            exptime: 60,
            opaque: 4,
            quiet: false,
        };
        let item = shard.gat(gat.clone()).await.unwrap();
        assert!(!item.miss);
        assert_eq!(item.data, b"v");
        assert_eq!(item.opaque, 4);

        let delete = DeleteRequest {
            key: b"k".to_vec(),
            ..Default::default()
        };
        shard.delete(delete.clone()).await.unwrap();
        assert!(shard.delete(delete).await.unwrap_err().is_key_not_found());
        assert!(shard.gat(gat).await.unwrap().miss);
    }

    #[tokio::test]
    async fn test_closed_connection_fails_fast() {
        let node = FakeNode::start().await;
        let shard = ShardConnection::connect(node.address()).await.unwrap();
        shard.close().await.unwrap();
        assert!(shard.is_closed().await);
        assert!(shard
            .set(set_request("k", "v"))
            .await
            .unwrap_err()
            .is_connection_closed());
        let (items, err) = shard
            .get(GetRequest::single("k", 1, false))
            .unwrap()
            .collect_all()
            .await;
        assert!(items.is_empty());
        assert!(err.unwrap().is_connection_closed());
        // closing twice is fine
        shard.close().await.unwrap();
        node.wait_idle().await;
    }

    /// Node answering the first get of its lifetime with a wrong opaque.
    async fn start_skewed_node() -> String {
        use mcproxy_common::{
            data::Request,
            protocol::{read_request, BinaryResponder, Responder},
        };
        use std::sync::atomic::AtomicBool;
        use tokio::{io::BufReader, net::TcpListener};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let skew = Arc::new(AtomicBool::new(true));
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let skew = skew.clone();
                tokio::spawn(async move {
                    let (read, write) = stream.into_split();
                    let mut reader = BufReader::new(read);
                    let mut responder = BinaryResponder::new(write, "skewed");
                    while let Ok(Some(Request::Get(batch))) = read_request(&mut reader).await {
                        for (key, opaque) in batch.keys.into_iter().zip(batch.opaques) {
                            let opaque = if skew.swap(false, Ordering::SeqCst) {
                                opaque + 99
                            } else {
                                opaque
                            };
                            let item = GetResponse::hit(key, b"v".to_vec(), 0, opaque, false);
                            responder.get(&item).await.unwrap();
                        }
                        responder.flush().await.unwrap();
                    }
                });
            }
        });
        address
    }

    #[tokio::test]
    async fn test_out_of_sync_reply_fails_only_its_request() {
        init_logger();
        let address = start_skewed_node().await;
        let shard = ShardConnection::connect(&address).await.unwrap();

        let err = shard.fetch(b"k1").await.unwrap_err();
        assert!(!err.is_connection_closed());
        assert!(!shard.is_closed().await);

        let (data, _) = shard.fetch(b"k1").await.unwrap();
        assert_eq!(data, b"v");
        let (items, err) = shard
            .get(GetRequest::single("k2", 7, false))
            .unwrap()
            .collect_all()
            .await;
        assert!(err.is_none());
        assert_eq!(items[0].opaque, 7);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let address = FakeNode::unused_address().await;
        assert!(ShardConnection::connect(&address).await.is_err());
    }
}
