use super::{report_error, Orca, RequestMeta};
use crate::prelude::*;
use mcproxy_common::{
    data::{NoopRequest, QuitRequest, StatRequest, VersionRequest},
    metrics::CommandCounters,
};

enum Outcome {
    Hit,
    Miss,
    Failed,
}

impl Outcome {
    fn of<T>(result: &Result<T, Error>) -> Self {
        match result {
            Ok(_) => Self::Hit,
            Err(e) if e.is_key_not_found() || e.is_not_stored() => Self::Miss,
            Err(_) => Self::Failed,
        }
    }
}

/// Passes every request to a single cluster and answers with its results.
pub struct Forward {
    l1: Arc<dyn Handler>,
    responder: Box<dyn Responder>,
    metrics: Arc<dyn MetricsSink>,
}

impl Forward {
    pub fn new(
        l1: Arc<dyn Handler>,
        responder: Box<dyn Responder>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            l1,
            responder,
            metrics,
        }
    }

    fn count(&self, counters: &CommandCounters, outcome: Outcome) {
        self.metrics.incr(counters.total);
        self.metrics.incr(counters.total_l1);
        let (name, name_l1) = match outcome {
            Outcome::Hit => (counters.hits, counters.hits_l1),
            Outcome::Miss => (counters.misses, counters.misses_l1),
            Outcome::Failed => (counters.errors, counters.errors_l1),
        };
        self.metrics.incr(name);
        self.metrics.incr(name_l1);
    }

    fn count_get(&self, outcome: Outcome) {
        let (name, name_l1) = match outcome {
            Outcome::Hit => (metrics::CMD_GET_HITS, metrics::CMD_GET_HITS_L1),
            Outcome::Miss => (metrics::CMD_GET_MISSES, metrics::CMD_GET_MISSES_L1),
            Outcome::Failed => (metrics::CMD_GET_ERRORS, metrics::CMD_GET_ERRORS_L1),
        };
        self.metrics.incr(name);
        self.metrics.incr(name_l1);
    }

    async fn store(
        &mut self,
        counters: &CommandCounters,
        opaque: Opaque,
        quiet: bool,
        result: Result<(), Error>,
    ) -> Result<(), Error> {
        self.count(counters, Outcome::of(&result));
        result?;
        self.responder.set(opaque, quiet).await
    }
}

impl Debug for Forward {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("Forward").finish()
    }
}

#[async_trait]
impl Orca for Forward {
    async fn set(&mut self, item: SetRequest) -> Result<(), Error> {
        let (opaque, quiet) = (item.opaque, item.quiet);
        let result = self.l1.set(item).await;
        self.store(&metrics::SET, opaque, quiet, result).await
    }

    async fn add(&mut self, item: SetRequest) -> Result<(), Error> {
        let (opaque, quiet) = (item.opaque, item.quiet);
        let result = self.l1.add(item).await;
        self.store(&metrics::ADD, opaque, quiet, result).await
    }

    async fn replace(&mut self, item: SetRequest) -> Result<(), Error> {
        let (opaque, quiet) = (item.opaque, item.quiet);
        let result = self.l1.replace(item).await;
        self.store(&metrics::REPLACE, opaque, quiet, result).await
    }

    async fn append(&mut self, item: SetRequest) -> Result<(), Error> {
        let (opaque, quiet) = (item.opaque, item.quiet);
        let result = self.l1.append(item).await;
        self.store(&metrics::APPEND, opaque, quiet, result).await
    }

    async fn prepend(&mut self, item: SetRequest) -> Result<(), Error> {
        let (opaque, quiet) = (item.opaque, item.quiet);
        let result = self.l1.prepend(item).await;
        self.store(&metrics::PREPEND, opaque, quiet, result).await
    }

    async fn delete(&mut self, req: DeleteRequest) -> Result<(), Error> {
        let (opaque, quiet) = (req.opaque, req.quiet);
        let result = self.l1.delete(req).await;
        self.count(&metrics::DELETE, Outcome::of(&result));
        result?;
        self.responder.delete(opaque, quiet).await
    }

    async fn touch(&mut self, req: TouchRequest) -> Result<(), Error> {
        let (opaque, quiet) = (req.opaque, req.quiet);
        let result = self.l1.touch(req).await;
        self.count(&metrics::TOUCH, Outcome::of(&result));
        result?;
        self.responder.touch(opaque, quiet).await
    }

    /// Streams the batch to the client. A failure ends the batch without
    /// the end marker and is returned once the stream is drained.
    async fn get(&mut self, req: GetRequest) -> Result<(), Error> {
        let keys = req.len() as u64;
        let (noop_opaque, noop_end) = (req.noop_opaque, req.noop_end);
        self.metrics.incr(metrics::CMD_GET);
        self.metrics.incr(metrics::CMD_GET_L1);
        self.metrics.increment(metrics::CMD_GET_KEYS, keys);
        self.metrics.increment(metrics::CMD_GET_KEYS_L1, keys);

        let started = Instant::now();
        let mut items = match self.l1.get(req) {
            Ok(items) => items,
            Err(e) => {
                self.count_get(Outcome::Failed);
                return Err(e);
            }
        };
        let mut failure = None;
        while let Some(item) = items.next().await {
            match item {
                Ok(item) => {
                    self.count_get(if item.miss { Outcome::Miss } else { Outcome::Hit });
                    self.responder.get(&item).await?;
                }
                Err(e) => {
                    self.count_get(Outcome::Failed);
                    error!("get batch of {} keys failed: {}", keys, e);
                    failure = Some(e);
                }
            }
        }
        self.metrics
            .observe(metrics::HIST_GET_L1, started.elapsed().as_secs_f64());
        match failure {
            Some(e) => Err(e),
            None => self.responder.get_end(noop_opaque, noop_end).await,
        }
    }

    async fn gat(&mut self, req: GatRequest) -> Result<(), Error> {
        let (opaque, quiet) = (req.opaque, req.quiet);
        let result = self.l1.gat(req).await;
        let outcome = match &result {
            Ok(item) if item.miss => Outcome::Miss,
            other => Outcome::of(other),
        };
        self.count(&metrics::GAT, outcome);
        let item = result?;
        if item.miss {
            self.responder.gat_miss(opaque, quiet).await
        } else {
            self.responder.gat(&item).await
        }
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
        debug!("unknown opcode {:#04x}", opcode);
        Err(Error::unknown_command())
    }

    async fn error(&mut self, meta: Option<RequestMeta>, err: &Error) -> Result<(), Error> {
        report_error(self.responder.as_mut(), meta, err).await
    }

    async fn flush(&mut self) -> Result<(), Error> {
        self.responder.flush().await
    }
}
