use super::reader::Validatable;
use std::fmt::{Display, Formatter, Result as FmtResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterType {
    /// Sharded memcached nodes behind a hash ring.
    Memcached,
    /// Single document store bucket.
    Couchbase,
    /// In-process document store, for local runs.
    Memory,
}

impl Display for ClusterType {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Self::Memcached => f.write_str("memcached"),
            Self::Couchbase => f.write_str("couchbase"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

/// One backend cluster. Nodes come from `hostnames` when set, otherwise
/// from service discovery by `name` and `datacenter`.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct Cluster {
    #[serde(rename = "type")]
    cluster_type: ClusterType,
    name: String,
    #[serde(default)]
    hostnames: Option<Vec<String>>,
    #[serde(default)]
    datacenter: Option<String>,
    #[serde(default)]
    bucket: Option<String>,
}

impl Cluster {
    pub fn new(cluster_type: ClusterType, name: impl Into<String>) -> Self {
        Self {
            cluster_type,
            name: name.into(),
            hostnames: None,
            datacenter: None,
            bucket: None,
        }
    }

    #[must_use]
    pub fn with_hostnames(mut self, hostnames: Vec<String>) -> Self {
        self.hostnames = Some(hostnames);
        self
    }

    #[must_use]
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn cluster_type(&self) -> ClusterType {
        self.cluster_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hostnames(&self) -> Option<&[String]> {
        self.hostnames.as_deref()
    }

    pub fn datacenter(&self) -> Option<&str> {
        self.datacenter.as_deref().filter(|dc| !dc.is_empty())
    }

    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }
}

/// Checks the `host:port` shape of a node address.
pub fn validate_address(address: &str) -> Result<(), String> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| format!("{}: node address missing port", address))?;
    if host.is_empty() {
        return Err(format!("{}: node address missing host", address));
    }
    port.parse::<u16>()
        .map_err(|e| format!("{}: bad node port: {}", address, e))?;
    Ok(())
}

impl Validatable for Cluster {
    fn validate(&self) -> Result<(), String> {
        // serde yaml turns "field: # no value" into '~'
        if self.name.is_empty() || self.name == "~" {
            return Err("cluster must contain not empty field 'name'".to_string());
        }
        if self.cluster_type == ClusterType::Couchbase
            && self.bucket.as_deref().map_or(true, |b| b.is_empty() || b == "~")
        {
            return Err(format!(
                "cluster '{}': couchbase cluster requires field 'bucket'",
                self.name
            ));
        }
        if let Some(hostnames) = &self.hostnames {
            if hostnames.is_empty() {
                return Err(format!("cluster '{}': 'hostnames' is empty", self.name));
            }
            for address in hostnames {
                validate_address(address).map_err(|e| format!("cluster '{}': {}", self.name, e))?;
            }
        }
        Ok(())
    }
}
