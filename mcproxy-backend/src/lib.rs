pub mod core;
pub mod document;
pub mod mem_store;
pub mod shard;

#[cfg(any(test, feature = "testing"))]
pub mod test_utils;

#[macro_use]
extern crate log;
#[macro_use]
extern crate async_trait;

pub(crate) mod prelude {
    pub use futures::{Stream, StreamExt};
    pub use mcproxy_common::{
        data::{
            DeleteRequest, GatRequest, GetRequest, GetResponse, Opaque, SetRequest, TouchRequest,
        },
        error::Error,
    };
    pub use std::{
        collections::HashMap,
        fmt::{Debug, Formatter, Result as FmtResult},
        pin::Pin,
        sync::{
            atomic::{AtomicU32, Ordering},
            Arc,
        },
        task::{Context, Poll},
    };
    pub use tokio::sync::{mpsc, Mutex, RwLock};
}

pub use crate::core::{GetItem, GetSender, GetStream, Handler};
