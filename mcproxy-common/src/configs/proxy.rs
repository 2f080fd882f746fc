use super::{cluster::Cluster, reader::Validatable};
use std::net::SocketAddr;

/// Cross-cluster policy applied to every client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Serve everything from the source cluster.
    Forward,
    /// Answer gets with a miss and warm the destination from the source.
    Backfill,
}

impl Default for Mode {
    fn default() -> Self {
        Self::Forward
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backfill {
    /// Expiry of items written into the destination cluster, seconds.
    #[serde(default = "Backfill::default_expiry")]
    expiry: u32,
}

impl Backfill {
    fn default_expiry() -> u32 {
        1500
    }

    pub fn expiry(&self) -> u32 {
        self.expiry
    }
}

impl Default for Backfill {
    fn default() -> Self {
        Self {
            expiry: Self::default_expiry(),
        }
    }
}

/// Proxy process config.
///
/// The source cluster is the L1 of the forward policy and the remote side
/// of the backfill policy; the destination is the local cluster being
/// warmed and is only read in backfill mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proxy {
    #[serde(default = "Proxy::default_listen_port")]
    listen_port: u16,
    #[serde(default = "Proxy::default_admin_address")]
    admin_address: String,
    #[serde(default)]
    mode: Mode,
    #[serde(default)]
    log_config: Option<String>,
    #[serde(default = "Proxy::default_consul_address")]
    consul_address: String,
    #[serde(default)]
    source: Option<Cluster>,
    #[serde(default)]
    destination: Option<Cluster>,
    #[serde(default)]
    backfill: Backfill,
}

impl Proxy {
    fn default_listen_port() -> u16 {
        11211
    }

    fn default_admin_address() -> String {
        "127.0.0.1:8080".to_string()
    }

    fn default_consul_address() -> String {
        "localhost:8500".to_string()
    }

    /// Config for `mode` with the given clusters and defaults elsewhere.
    pub fn new(mode: Mode, source: Cluster, destination: Option<Cluster>) -> Self {
        Self {
            listen_port: Self::default_listen_port(),
            admin_address: Self::default_admin_address(),
            mode,
            log_config: None,
            consul_address: Self::default_consul_address(),
            source: Some(source),
            destination,
            backfill: Backfill::default(),
        }
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn set_listen_port(&mut self, port: u16) {
        self.listen_port = port;
    }

    pub fn admin_address(&self) -> Result<SocketAddr, String> {
        self.admin_address
            .parse()
            .map_err(|e| format!("bad admin address '{}': {}", self.admin_address, e))
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn log_config(&self) -> Option<&str> {
        self.log_config.as_deref()
    }

    pub fn consul_address(&self) -> &str {
        &self.consul_address
    }

    pub fn source(&self) -> Option<&Cluster> {
        self.source.as_ref()
    }

    pub fn destination(&self) -> Option<&Cluster> {
        self.destination.as_ref()
    }

    pub fn backfill(&self) -> &Backfill {
        &self.backfill
    }
}

impl Validatable for Proxy {
    fn validate(&self) -> Result<(), String> {
        if self.listen_port == 0 {
            return Err("field 'listen_port' must be positive".to_string());
        }
        self.admin_address()?;
        if self.consul_address.is_empty() || self.consul_address == "~" {
            return Err("field 'consul_address' must not be empty".to_string());
        }
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| "section 'source' is required".to_string())?;
        source.validate()?;
        match (self.mode, &self.destination) {
            (Mode::Backfill, None) => {
                return Err("backfill mode requires section 'destination'".to_string())
            }
            (_, Some(destination)) => destination.validate()?,
            (Mode::Forward, None) => {}
        }
        if self.backfill.expiry == 0 {
            return Err("field 'backfill.expiry' must be positive".to_string());
        }
        Ok(())
    }
}
