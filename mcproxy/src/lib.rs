#![warn(missing_debug_implementations)]

//! Library requires tokio runtime.

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate async_trait;

pub mod cluster;
pub mod discovery;
pub mod factory;
pub mod orcas;
pub mod server;
pub mod tasks;

pub use crate::{
    cluster::{ClusterBuilder, ClusterRouter},
    discovery::ConsulClient,
    factory::HandlerFactory,
    orcas::{dispatch, get_orca, Orca},
    server::Server,
    tasks::TaskPool,
};
pub use mcproxy_common::{
    configs::{ClusterConfig, ClusterType, Mode, ProxyConfig, Validatable, YamlConfig},
    metrics::{init_counters, install_prometheus, MetricsSink, RecorderSink},
};

mod prelude {
    pub use futures::{stream, Future, StreamExt};
    pub use mcproxy_backend::{GetStream, Handler};
    pub use mcproxy_common::{
        data::{
            DeleteRequest, GatRequest, GetRequest, GetResponse, Opaque, Request, RequestType,
            SetRequest, TouchRequest,
        },
        error::Error,
        metrics::{self, MetricsSink},
        protocol::Responder,
    };
    pub use std::{
        fmt::{Debug, Formatter, Result as FmtResult},
        sync::Arc,
        time::{Duration, Instant},
    };
}
