use super::{report_error, Orca, RequestMeta};
use crate::prelude::*;
use crate::tasks::TaskPool;
use mcproxy_common::data::{NoopRequest, QuitRequest, StatRequest, VersionRequest};
use std::sync::atomic::{AtomicU32, Ordering};

/// Answers every get with misses right away and copies the requested keys
/// from the remote cluster into the local one in the background. Client
/// writes are acknowledged and dropped, unknown commands are ignored.
pub struct Backfill {
    remote: Arc<dyn Handler>,
    local: Arc<dyn Handler>,
    responder: Box<dyn Responder>,
    metrics: Arc<dyn MetricsSink>,
    tasks: TaskPool,
    expiry: u32,
    next_opaque: Arc<AtomicU32>,
}

impl Backfill {
    pub fn new(
        remote: Arc<dyn Handler>,
        local: Arc<dyn Handler>,
        responder: Box<dyn Responder>,
        metrics: Arc<dyn MetricsSink>,
        tasks: TaskPool,
        expiry: u32,
    ) -> Self {
        Self {
            remote,
            local,
            responder,
            metrics,
            tasks,
            expiry,
            next_opaque: Arc::new(AtomicU32::new(0)),
        }
    }

    fn job(&self) -> BackfillJob {
        BackfillJob {
            remote: self.remote.clone(),
            local: self.local.clone(),
            metrics: self.metrics.clone(),
            expiry: self.expiry,
            next_opaque: self.next_opaque.clone(),
        }
    }
}

impl Debug for Backfill {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("Backfill")
            .field("expiry", &self.expiry)
            .finish()
    }
}

struct BackfillJob {
    remote: Arc<dyn Handler>,
    local: Arc<dyn Handler>,
    metrics: Arc<dyn MetricsSink>,
    expiry: u32,
    next_opaque: Arc<AtomicU32>,
}

impl BackfillJob {
    async fn run(self, req: GetRequest) {
        let mut items = match self.remote.get(req) {
            Ok(items) => items,
            Err(e) => {
                error!("backfill read from remote cluster failed: {}", e);
                self.metrics.incr(metrics::BACKFILL_ERRORS);
                return;
            }
        };
        while let Some(item) = items.next().await {
            match item {
                Ok(item) if item.miss => {
                    trace!("backfill: {} missing remotely", String::from_utf8_lossy(&item.key));
                }
                Ok(item) => {
                    self.metrics.incr(metrics::BACKFILL_HITS);
                    self.store(item).await;
                }
                Err(e) => {
                    error!("backfill read from remote cluster failed: {}", e);
                    self.metrics.incr(metrics::BACKFILL_ERRORS);
                }
            }
        }
    }

    async fn store(&self, item: GetResponse) {
        let set = SetRequest {
            key: item.key,
            data: item.data,
            flags: item.flags,
            exptime: self.expiry,
            opaque: self.next_opaque.fetch_add(1, Ordering::Relaxed),
            quiet: true,
        };
        let key = String::from_utf8_lossy(&set.key).into_owned();
        match self.local.set(set).await {
            Ok(()) => {
                trace!("backfilled {}", key);
                self.metrics.incr(metrics::BACKFILL_SETS);
            }
            Err(e) => {
                warn!("can't backfill {}: {}", key, e);
                self.metrics.incr(metrics::BACKFILL_ERRORS);
            }
        }
    }
}

#[async_trait]
impl Orca for Backfill {
    async fn set(&mut self, item: SetRequest) -> Result<(), Error> {
        self.metrics.incr(metrics::SET.total);
        self.responder.set(item.opaque, item.quiet).await
    }

    async fn add(&mut self, item: SetRequest) -> Result<(), Error> {
        self.metrics.incr(metrics::ADD.total);
        self.responder.set(item.opaque, item.quiet).await
    }

    async fn replace(&mut self, item: SetRequest) -> Result<(), Error> {
        self.metrics.incr(metrics::REPLACE.total);
        self.responder.set(item.opaque, item.quiet).await
    }

    async fn append(&mut self, item: SetRequest) -> Result<(), Error> {
        self.metrics.incr(metrics::APPEND.total);
        self.responder.set(item.opaque, item.quiet).await
    }

    async fn prepend(&mut self, item: SetRequest) -> Result<(), Error> {
        self.metrics.incr(metrics::PREPEND.total);
        self.responder.set(item.opaque, item.quiet).await
    }

    async fn delete(&mut self, req: DeleteRequest) -> Result<(), Error> {
        self.metrics.incr(metrics::DELETE.total);
        self.responder.delete(req.opaque, req.quiet).await
    }

    async fn touch(&mut self, req: TouchRequest) -> Result<(), Error> {
        self.metrics.incr(metrics::TOUCH.total);
        self.responder.touch(req.opaque, req.quiet).await
    }

    async fn get(&mut self, req: GetRequest) -> Result<(), Error> {
        req.validate()?;
        let keys = req.len() as u64;
        self.metrics.incr(metrics::CMD_GET);
        self.metrics.increment(metrics::CMD_GET_KEYS, keys);
        for ((key, opaque), quiet) in req.keys.iter().zip(&req.opaques).zip(&req.quiet) {
            self.metrics.incr(metrics::CMD_GET_MISSES);
            let miss = GetResponse::miss(key.clone(), *opaque, *quiet);
            self.responder.get(&miss).await?;
        }
        self.responder.get_end(req.noop_opaque, req.noop_end).await?;

        self.metrics.increment(metrics::BACKFILL_KEYS, keys);
        if !self.tasks.spawn("backfill", self.job().run(req)) {
            self.metrics.incr(metrics::BACKFILL_ERRORS);
        }
        Ok(())
    }

    async fn gat(&mut self, req: GatRequest) -> Result<(), Error> {
        self.metrics.incr(metrics::GAT.total);
        self.responder.gat_miss(req.opaque, req.quiet).await
    }

    async fn noop(&mut self, req: NoopRequest) -> Result<(), Error> {
        self.metrics.incr(metrics::CMD_NOOP);
        self.responder.noop(req.opaque).await
    }

    async fn quit(&mut self, req: QuitRequest) -> Result<(), Error> {
        self.metrics.incr(metrics::CMD_QUIT);
        self.responder.quit(req.opaque, req.quiet).await
    }

    async fn version(&mut self, req: VersionRequest) -> Result<(), Error> {
        self.metrics.incr(metrics::CMD_VERSION);
        self.responder.version(req.opaque).await
    }

    async fn stat(&mut self, req: StatRequest) -> Result<(), Error> {
        self.metrics.incr(metrics::CMD_STAT);
        self.responder.stat(req.opaque).await
    }

    async fn unknown(&mut self, opcode: u8, _opaque: Opaque) -> Result<(), Error> {
        self.metrics.incr(metrics::CMD_UNKNOWN);
        debug!("ignoring unknown opcode {:#04x}", opcode);
        Ok(())
    }

    async fn error(&mut self, meta: Option<RequestMeta>, err: &Error) -> Result<(), Error> {
        report_error(self.responder.as_mut(), meta, err).await
    }

    async fn flush(&mut self) -> Result<(), Error> {
        self.responder.flush().await
    }
}
