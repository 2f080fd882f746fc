//! In-process memcached node speaking the binary protocol over TCP.
//! Keys starting with `fail` answer with an internal error.

use crate::prelude::*;
use mcproxy_common::{
    data::{Request, RequestType},
    protocol::{read_request, BinaryResponder, Responder},
};
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

#[derive(Debug, Clone)]
struct Item {
    data: Vec<u8>,
    flags: u32,
    exptime: u32,
}

type Store = Arc<Mutex<HashMap<Vec<u8>, Item>>>;

pub struct FakeNode {
    address: String,
    store: Store,
    active: Arc<AtomicUsize>,
    accepted: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl FakeNode {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake node");
        let address = listener.local_addr().expect("fake node address").to_string();
        let store: Store = Arc::default();
        let active = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::new(AtomicUsize::new(0));
        let handle = tokio::spawn(accept_loop(
            listener,
            store.clone(),
            active.clone(),
            accepted.clone(),
        ));
        Self {
            address,
            store,
            active,
            accepted,
            handle,
        }
    }

    /// Address nothing listens on.
    pub async fn unused_address() -> String {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind spare listener");
        let address = listener.local_addr().expect("spare address").to_string();
        drop(listener);
        address
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn insert(&self, key: &str, value: &str) {
        self.store.lock().await.insert(
            key.as_bytes().to_vec(),
            Item {
                data: value.as_bytes().to_vec(),
                flags: 0,
                exptime: 0,
            },
        );
    }

    pub async fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.store
            .lock()
            .await
            .get(key.as_bytes())
            .map(|item| item.data.clone())
    }

    pub async fn exptime(&self, key: &str) -> Option<u32> {
        self.store
            .lock()
            .await
            .get(key.as_bytes())
            .map(|item| item.exptime)
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn accepted_connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Waits until every accepted connection was closed by the peer.
    pub async fn wait_idle(&self) {
        let idle = async {
            while self.active_connections() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), idle)
            .await
            .expect("fake node connections still open");
    }
}

impl Drop for FakeNode {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    store: Store,
    active: Arc<AtomicUsize>,
    accepted: Arc<AtomicUsize>,
) {
    while let Ok((stream, _)) = listener.accept().await {
        accepted.fetch_add(1, Ordering::SeqCst);
        active.fetch_add(1, Ordering::SeqCst);
        let store = store.clone();
        let active = active.clone();
        tokio::spawn(async move {
            serve(stream, store).await;
            active.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

async fn serve(stream: TcpStream, store: Store) {
    let (read, write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut responder = BinaryResponder::new(write, "fake");
    while let Ok(Some(request)) = read_request(&mut reader).await {
        let quit = matches!(request, Request::Quit(_));
        if answer(&store, &mut responder, request).await.is_err()
            || responder.flush().await.is_err()
            || quit
        {
            break;
        }
    }
}

async fn answer(
    store: &Store,
    responder: &mut impl Responder,
    request: Request,
) -> Result<(), Error> {
    let request_type = request.request_type();
    let mut store = store.lock().await;
    match request {
        Request::Get(batch) => {
            for ((key, opaque), quiet) in batch.keys.into_iter().zip(batch.opaques).zip(batch.quiet) {
                if key.starts_with(b"fail") {
                    let err = Error::backend("injected failure");
                    responder.error(opaque, request_type, &err, quiet).await?;
                    continue;
                }
                let item = match store.get(&key) {
                    Some(item) => GetResponse::hit(key, item.data.clone(), item.flags, opaque, quiet),
                    None => GetResponse::miss(key, opaque, quiet),
                };
                responder.get(&item).await?;
            }
            responder.get_end(batch.noop_opaque, batch.noop_end).await
        }
        Request::Set(item) | Request::Add(item) | Request::Replace(item) => {
            let exists = store.contains_key(&item.key);
            let refused = match request_type {
                RequestType::Add => exists,
                RequestType::Replace => !exists,
                _ => false,
            };
            if refused {
                return responder
                    .error(item.opaque, request_type, &Error::not_stored(), item.quiet)
                    .await;
            }
            store.insert(
                item.key,
                Item {
                    data: item.data,
                    flags: item.flags,
                    exptime: item.exptime,
                },
            );
            responder.set(item.opaque, item.quiet).await
        }
        Request::Append(item) | Request::Prepend(item) => match store.get_mut(&item.key) {
            Some(existing) => {
                if request_type == RequestType::Append {
                    existing.data.extend_from_slice(&item.data);
                } else {
                    let mut data = item.data;
                    data.extend_from_slice(&existing.data);
                    existing.data = data;
                }
                responder.set(item.opaque, item.quiet).await
            }
            None => {
                responder
                    .error(item.opaque, request_type, &Error::not_stored(), item.quiet)
                    .await
            }
        },
        Request::Delete(req) => match store.remove(&req.key) {
            Some(_) => responder.delete(req.opaque, req.quiet).await,
            None => {
                responder
                    .error(req.opaque, request_type, &Error::key_not_found(), req.quiet)
                    .await
            }
        },
        Request::Touch(req) => match store.get_mut(&req.key) {
            Some(item) => {
                item.exptime = req.exptime;
                responder.touch(req.opaque, req.quiet).await
            }
            None => {
                responder
                    .error(req.opaque, request_type, &Error::key_not_found(), req.quiet)
                    .await
            }
        },
        Request::Gat(req) => match store.get_mut(&req.key) {
            Some(item) => {
                item.exptime = req.exptime;
                let response =
                    GetResponse::hit(req.key, item.data.clone(), item.flags, req.opaque, req.quiet);
                responder.gat(&response).await
            }
            None => responder.gat_miss(req.opaque, req.quiet).await,
        },
        Request::Noop(req) => responder.noop(req.opaque).await,
        Request::Quit(req) => responder.quit(req.opaque, req.quiet).await,
        Request::Version(req) => responder.version(req.opaque).await,
        Request::Stat(req) => responder.stat(req.opaque).await,
        Request::Unknown { opaque, .. } => {
            responder
                .error(opaque, request_type, &Error::unknown_command(), false)
                .await
        }
    }
}
