//! Per-connection request policies sitting between the decoder and the
//! backend handlers.

mod backfill;
mod forward;


use crate::prelude::*;
use crate::tasks::TaskPool;
use mcproxy_common::{
    configs::{Mode, ProxyConfig},
    data::{NoopRequest, QuitRequest, StatRequest, VersionRequest},
};

pub use backfill::Backfill;
pub use forward::Forward;

/// Metadata an error response needs, taken before the request is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestMeta {
    pub opaque: Opaque,
    pub request_type: RequestType,
    pub quiet: bool,
}

impl RequestMeta {
    pub fn of(request: &Request) -> Self {
        Self {
            opaque: request.opaque(),
            request_type: request.request_type(),
            quiet: request.is_quiet(),
        }
    }
}

impl Default for RequestMeta {
    fn default() -> Self {
        Self {
            opaque: 0,
            request_type: RequestType::Unknown(None),
            quiet: false,
        }
    }
}

/// Handlers an orchestrator works with. `l2` is only needed by policies
/// spanning two clusters.
#[derive(Clone)]
pub struct Backends {
    pub l1: Arc<dyn Handler>,
    pub l2: Option<Arc<dyn Handler>>,
}

impl Backends {
    pub fn new(l1: Arc<dyn Handler>, l2: Option<Arc<dyn Handler>>) -> Self {
        Self { l1, l2 }
    }

    /// Closes the handlers nothing else holds. Handlers still referenced by
    /// background work close when the last reference is dropped.
    pub async fn release(self) {
        for handler in std::iter::once(self.l1).chain(self.l2) {
            if Arc::strong_count(&handler) > 1 {
                debug!("handler still used by background work, leaving it open");
                continue;
            }
            if let Err(e) = handler.close().await {
                warn!("can't close handler: {}", e);
            }
        }
    }
}

impl Debug for Backends {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("Backends")
            .field("l2", &self.l2.is_some())
            .finish()
    }
}

/// Cross-cluster policy driven by one client connection. Every method
/// either answers through the responder or returns the error the caller
/// reports with [`Orca::error`].
#[async_trait]
pub trait Orca: Send {
    async fn set(&mut self, item: SetRequest) -> Result<(), Error>;
    async fn add(&mut self, item: SetRequest) -> Result<(), Error>;
    async fn replace(&mut self, item: SetRequest) -> Result<(), Error>;
    async fn append(&mut self, item: SetRequest) -> Result<(), Error>;
    async fn prepend(&mut self, item: SetRequest) -> Result<(), Error>;
    async fn delete(&mut self, req: DeleteRequest) -> Result<(), Error>;
    async fn touch(&mut self, req: TouchRequest) -> Result<(), Error>;
    async fn get(&mut self, req: GetRequest) -> Result<(), Error>;
    async fn gat(&mut self, req: GatRequest) -> Result<(), Error>;
    async fn noop(&mut self, req: NoopRequest) -> Result<(), Error>;
    async fn quit(&mut self, req: QuitRequest) -> Result<(), Error>;
    async fn version(&mut self, req: VersionRequest) -> Result<(), Error>;
    async fn stat(&mut self, req: StatRequest) -> Result<(), Error>;
    async fn unknown(&mut self, opcode: u8, opaque: Opaque) -> Result<(), Error>;

    /// Reports `err` for the request described by `meta`, or with default
    /// metadata when the request couldn't be decoded.
    async fn error(&mut self, meta: Option<RequestMeta>, err: &Error) -> Result<(), Error>;

    async fn flush(&mut self) -> Result<(), Error>;
}

pub async fn dispatch(orca: &mut dyn Orca, request: Request) -> Result<(), Error> {
    match request {
        Request::Get(req) => orca.get(req).await,
        Request::Gat(req) => orca.gat(req).await,
        Request::Set(item) => orca.set(item).await,
        Request::Add(item) => orca.add(item).await,
        Request::Replace(item) => orca.replace(item).await,
        Request::Append(item) => orca.append(item).await,
        Request::Prepend(item) => orca.prepend(item).await,
        Request::Delete(req) => orca.delete(req).await,
        Request::Touch(req) => orca.touch(req).await,
        Request::Noop(req) => orca.noop(req).await,
        Request::Quit(req) => orca.quit(req).await,
        Request::Version(req) => orca.version(req).await,
        Request::Stat(req) => orca.stat(req).await,
        Request::Unknown { opcode, opaque } => orca.unknown(opcode, opaque).await,
    }
}

/// Builds the orchestrator of the configured mode. Forward reads and writes
/// `l1`; backfill answers misses and warms `l2` from `l1` in the background.
pub fn get_orca(
    config: &ProxyConfig,
    backends: Backends,
    responder: Box<dyn Responder>,
    metrics: Arc<dyn MetricsSink>,
    tasks: &TaskPool,
) -> Result<Box<dyn Orca>, Error> {
    match config.mode() {
        Mode::Forward => Ok(Box::new(Forward::new(backends.l1, responder, metrics))),
        Mode::Backfill => {
            let local = backends
                .l2
                .ok_or_else(|| Error::config("backfill mode needs a destination cluster"))?;
            Ok(Box::new(Backfill::new(
                backends.l1,
                local,
                responder,
                metrics,
                tasks.clone(),
                config.backfill().expiry(),
            )))
        }
    }
}

async fn report_error(
    responder: &mut dyn Responder,
    meta: Option<RequestMeta>,
    err: &Error,
) -> Result<(), Error> {
    let meta = meta.unwrap_or_default();
    if err.is_app_error() {
        debug!("{} request failed: {}", meta.request_type, err);
    } else {
        warn!("{} request failed: {}", meta.request_type, err);
    }
    responder
        .error(meta.opaque, meta.request_type, err, meta.quiet)
        .await
}
