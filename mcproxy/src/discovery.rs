//! Node lookup through the Consul health API.

use crate::prelude::*;

#[derive(Debug, Deserialize)]
struct HealthEntry {
    #[serde(rename = "Service")]
    service: ServiceEntry,
}

#[derive(Debug, Deserialize)]
struct ServiceEntry {
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
}

/// Resolves a cluster name into the `host:port` addresses of its healthy
/// nodes.
#[derive(Debug, Clone)]
pub struct ConsulClient {
    base_url: String,
    http: reqwest::Client,
}

impl ConsulClient {
    /// `address` is `host:port` of the agent, or a full base url.
    pub fn new(address: &str) -> Self {
        let base_url = if address.contains("://") {
            address.trim_end_matches('/').to_owned()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    fn service_url(&self, service: &str, datacenter: Option<&str>) -> String {
        let mut url = format!(
            "{}/v1/health/service/{}?passing=true",
            self.base_url, service
        );
        if let Some(dc) = datacenter {
            url.push_str("&dc=");
            url.push_str(dc);
        }
        url
    }

    pub async fn lookup(&self, service: &str, datacenter: Option<&str>) -> Result<Vec<String>, Error> {
        let url = self.service_url(service, datacenter);
        debug!("looking up nodes of {} at {}", service, url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::discovery(format!("can't query {}: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::discovery(format!(
                "lookup of {} answered {}",
                service, status
            )));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::discovery(format!("can't read answer for {}: {}", service, e)))?;
        let nodes = parse_nodes(&body)?;
        info!("service {} resolved to {:?}", service, nodes);
        Ok(nodes)
    }
}

/// Maps a health API answer onto node addresses.
pub fn parse_nodes(body: &[u8]) -> Result<Vec<String>, Error> {
    let entries: Vec<HealthEntry> = serde_json::from_slice(body)
        .map_err(|e| Error::discovery(format!("bad health answer: {}", e)))?;
    Ok(entries
        .into_iter()
        .map(|entry| format!("{}:{}", entry.service.address, entry.service.port))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcproxy_backend::test_utils::FakeNode;
    use mcproxy_common::error::Kind;

    const ANSWER: &str = r#"[
        {
            "Node": {"Node": "cache-1", "Address": "10.0.0.1"},
            "Service": {"ID": "memcached", "Service": "memcached", "Address": "10.0.0.1", "Port": 11211},
            "Checks": []
        },
        {
            "Node": {"Node": "cache-2", "Address": "10.0.0.2"},
            "Service": {"ID": "memcached", "Service": "memcached", "Address": "10.0.0.2", "Port": 11212},
            "Checks": []
        }
    ]"#;

    #[test]
    fn test_parse_nodes() {
        let nodes = parse_nodes(ANSWER.as_bytes()).unwrap();
        assert_eq!(nodes, vec!["10.0.0.1:11211", "10.0.0.2:11212"]);
        assert!(parse_nodes(b"[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_garbage() {
        let err = parse_nodes(b"{\"not\": \"a list\"}").unwrap_err();
        assert!(matches!(err.kind(), Kind::Discovery(_)));
    }

    #[test]
    fn test_service_url() {
        let client = ConsulClient::new("localhost:8500");
        assert_eq!(
            client.service_url("cache", None),
            "http://localhost:8500/v1/health/service/cache?passing=true"
        );
        let client = ConsulClient::new("http://consul:8500/");
        assert_eq!(
            client.service_url("cache", Some("dc1")),
            "http://consul:8500/v1/health/service/cache?passing=true&dc=dc1"
        );
    }

    #[tokio::test]
    async fn test_wrong_scheme() {
        let client = ConsulClient::new("foo://localhost:8500");
        let err = client.lookup("cache", None).await.unwrap_err();
        assert!(matches!(err.kind(), Kind::Discovery(_)));
    }

    #[tokio::test]
    async fn test_unreachable_agent() {
        let address = FakeNode::unused_address().await;
        let client = ConsulClient::new(&address);
        let err = client.lookup("cache", Some("dc1")).await.unwrap_err();
        assert!(matches!(err.kind(), Kind::Discovery(_)));
    }
}
