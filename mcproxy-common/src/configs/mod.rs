/// Backend cluster sections.
pub mod cluster;
/// Proxy process configuration.
pub mod proxy;
mod proxy_tests;
pub mod reader;

pub use cluster::{Cluster as ClusterConfig, ClusterType};
pub use proxy::{Mode, Proxy as ProxyConfig};
pub use reader::{Validatable, YamlConfig};
