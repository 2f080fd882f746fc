#[cfg(test)]
mod tests {
    use crate::configs::{
        cluster::{validate_address, ClusterType},
        proxy::{Mode, Proxy as ProxyConfig},
        reader::{Validatable, YamlConfig},
    };

    #[test]
    fn test_defaults() {
        let s = "
source:
    type: memcached
    name: mems99
";
        let d: ProxyConfig = YamlConfig::parse(s).unwrap();
        assert!(d.validate().is_ok());
        assert_eq!(d.listen_port(), 11211);
        assert_eq!(d.mode(), Mode::Forward);
        assert_eq!(d.consul_address(), "localhost:8500");
        assert_eq!(d.admin_address().unwrap().port(), 8080);
        assert_eq!(d.backfill().expiry(), 1500);
        assert!(d.log_config().is_none());
        let source = d.source().unwrap();
        assert_eq!(source.cluster_type(), ClusterType::Memcached);
        assert!(source.hostnames().is_none());
        assert!(source.datacenter().is_none());
    }

    #[test]
    fn test_backfill_full() {
        let s = "
listen_port: 11311
admin_address: 0.0.0.0:9000
mode: backfill
log_config: /etc/mcproxy/logger.yaml
source:
    type: couchbase
    name: remote
    bucket: default
    datacenter: us-east-1
    hostnames:
        - cb1.remote:8091
destination:
    type: memcached
    name: local
    hostnames:
        - 10.0.0.1:11211
        - 10.0.0.2:11211
backfill:
    expiry: 600
";
        let d: ProxyConfig = YamlConfig::parse(s).unwrap();
        assert!(d.validate().is_ok(), "{:?}", d.validate());
        assert_eq!(d.mode(), Mode::Backfill);
        assert_eq!(d.listen_port(), 11311);
        assert_eq!(d.backfill().expiry(), 600);
        assert_eq!(d.log_config(), Some("/etc/mcproxy/logger.yaml"));
        assert_eq!(d.source().unwrap().bucket(), Some("default"));
        assert_eq!(d.source().unwrap().datacenter(), Some("us-east-1"));
        assert_eq!(d.destination().unwrap().hostnames().unwrap().len(), 2);
    }

    #[test]
    fn test_backfill_requires_destination() {
        let s = "
mode: backfill
source:
    type: memcached
    name: remote
";
        let d: ProxyConfig = YamlConfig::parse(s).unwrap();
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_source_is_required() {
        let d: ProxyConfig = YamlConfig::parse("listen_port: 11211").unwrap();
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_unknown_cluster_type() {
        let s = "
source:
    type: redis
    name: remote
";
        assert!(YamlConfig::parse::<ProxyConfig>(s).is_err());
    }

    #[test]
    fn test_couchbase_requires_bucket() {
        let s = "
source:
    type: couchbase
    name: remote
";
        let d: ProxyConfig = YamlConfig::parse(s).unwrap();
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_cluster_name_is_empty() {
        let s = "
source:
    type: memcached
    name:
";
        let d: ProxyConfig = YamlConfig::parse(s).unwrap();
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_bad_hostnames() {
        let s = "
source:
    type: memcached
    name: local
    hostnames:
        - 10.0.0.1
";
        let d: ProxyConfig = YamlConfig::parse(s).unwrap();
        assert!(d.validate().is_err());

        let s = "
source:
    type: memcached
    name: local
    hostnames: []
";
        let d: ProxyConfig = YamlConfig::parse(s).unwrap();
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_bad_admin_address() {
        let s = "
admin_address: localhost
source:
    type: memory
    name: local
";
        let d: ProxyConfig = YamlConfig::parse(s).unwrap();
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_validate_address() {
        assert!(validate_address("127.0.0.1:11211").is_ok());
        assert!(validate_address("cache-1.local:11211").is_ok());
        assert!(validate_address(":11211").is_err());
        assert!(validate_address("host:port").is_err());
        assert!(validate_address("host").is_err());
    }
}
