use crate::discovery::ConsulClient;
use crate::factory::HandlerFactory;
use crate::orcas::{dispatch, get_orca, Backends, Orca, RequestMeta};
use crate::prelude::*;
use crate::tasks::TaskPool;
use mcproxy_common::{
    configs::{Mode, ProxyConfig},
    protocol::{read_request, BinaryResponder},
};
use std::net::SocketAddr;
use tokio::{
    io::{AsyncRead, BufReader, BufWriter},
    net::{TcpListener, TcpStream},
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Accepts client connections and runs the configured policy on each of
/// them.
#[derive(Clone)]
pub struct Server {
    config: Arc<ProxyConfig>,
    source: Arc<HandlerFactory>,
    destination: Option<Arc<HandlerFactory>>,
    metrics: Arc<dyn MetricsSink>,
    tasks: TaskPool,
}

impl Server {
    pub fn new(
        config: ProxyConfig,
        source: HandlerFactory,
        destination: Option<HandlerFactory>,
        metrics: Arc<dyn MetricsSink>,
        tasks: TaskPool,
    ) -> Self {
        Self {
            config: Arc::new(config),
            source: Arc::new(source),
            destination: destination.map(Arc::new),
            metrics,
            tasks,
        }
    }

    /// Resolves the configured clusters. The destination is only resolved
    /// in backfill mode.
    pub async fn from_config(
        config: ProxyConfig,
        metrics: Arc<dyn MetricsSink>,
        tasks: TaskPool,
    ) -> Result<Self, Error> {
        let consul = ConsulClient::new(config.consul_address());
        let source = config
            .source()
            .ok_or_else(|| Error::config("source cluster is not configured"))?;
        let source = HandlerFactory::from_config(source, &consul).await?;
        let destination = match config.mode() {
            Mode::Forward => None,
            Mode::Backfill => {
                let destination = config
                    .destination()
                    .ok_or_else(|| Error::config("destination cluster is not configured"))?;
                Some(HandlerFactory::from_config(destination, &consul).await?)
            }
        };
        Ok(Self::new(config, source, destination, metrics, tasks))
    }

    pub fn tasks(&self) -> &TaskPool {
        &self.tasks
    }

    pub async fn serve(&self, listener: TcpListener) -> Result<(), Error> {
        match listener.local_addr() {
            Ok(address) => info!("{} mode, listening on {}", mode_name(&self.config), address),
            Err(e) => warn!("can't get listener address: {}", e),
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let server = self.clone();
                    tokio::spawn(async move { server.handle_connection(stream, peer).await });
                }
                Err(e) => {
                    error!("accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn open_backends(&self) -> Result<Backends, Error> {
        let l1 = self.source.build().await?;
        let l2 = match &self.destination {
            Some(factory) => match factory.build().await {
                Ok(handler) => Some(handler),
                Err(e) => {
                    Backends::new(l1, None).release().await;
                    return Err(e);
                }
            },
            None => None,
        };
        Ok(Backends::new(l1, l2))
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        debug!("client {} connected", peer);
        if let Err(e) = stream.set_nodelay(true) {
            warn!("can't set nodelay for {}: {}", peer, e);
        }
        let backends = match self.open_backends().await {
            Ok(backends) => backends,
            Err(e) => {
                error!("can't open backends for client {}: {}", peer, e);
                return;
            }
        };
        let (read, write) = stream.into_split();
        let responder = Box::new(BinaryResponder::new(BufWriter::new(write), VERSION));
        match get_orca(
            &self.config,
            backends.clone(),
            responder,
            self.metrics.clone(),
            &self.tasks,
        ) {
            Ok(mut orca) => {
                let mut reader = BufReader::new(read);
                match serve_client(&mut reader, orca.as_mut()).await {
                    Ok(()) => debug!("client {} disconnected", peer),
                    Err(e) => info!("client {} dropped: {}", peer, e),
                }
            }
            Err(e) => error!("can't start policy for client {}: {}", peer, e),
        }
        backends.release().await;
    }
}

impl Debug for Server {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("Server")
            .field("mode", &self.config.mode())
            .field("source", &self.source)
            .field("destination", &self.destination)
            .finish()
    }
}

fn mode_name(config: &ProxyConfig) -> &'static str {
    match config.mode() {
        Mode::Forward => "forward",
        Mode::Backfill => "backfill",
    }
}

/// Request loop of one client. Ends on end of stream, quit, or an error
/// that leaves the connection unusable.
pub async fn serve_client<R>(reader: &mut R, orca: &mut dyn Orca) -> Result<(), Error>
where
    R: AsyncRead + Unpin + Send,
{
    loop {
        let request = match read_request(reader).await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(e) if e.is_app_error() => {
                orca.error(None, &e).await?;
                orca.flush().await?;
                continue;
            }
            Err(e) => {
                if !e.is_connection_closed() {
                    // best effort, the stream is out of sync
                    let _ = orca.error(None, &e).await;
                    let _ = orca.flush().await;
                }
                return Err(e);
            }
        };
        let meta = RequestMeta::of(&request);
        let quit = matches!(request, Request::Quit(_));
        if let Err(e) = dispatch(orca, request).await {
            orca.error(Some(meta), &e).await?;
        }
        orca.flush().await?;
        if quit {
            return Ok(());
        }
    }
}
