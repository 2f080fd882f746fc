use super::*;
use mcproxy_backend::test_utils::FakeNode;

fn init_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

async fn start_nodes(count: usize) -> Vec<FakeNode> {
    let mut nodes = Vec::with_capacity(count);
    for _ in 0..count {
        nodes.push(FakeNode::start().await);
    }
    nodes
}

async fn open(nodes: &[FakeNode]) -> ClusterRouter {
    ClusterBuilder::new("test")
        .addresses(nodes.iter().map(|node| node.address().to_owned()))
        .build()
        .await
        .unwrap()
}

fn set_request(key: &str, value: &str) -> SetRequest {
    SetRequest {
        key: key.as_bytes().to_vec(),
        data: value.as_bytes().to_vec(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_get_keeps_order_opaques_and_quiet() {
    init_logger();
    let nodes = start_nodes(3).await;
    let cluster = open(&nodes).await;
    for i in (0..30).step_by(2) {
        let key = format!("key-{}", i);
        cluster.set(set_request(&key, &key)).await.unwrap();
    }

    let mut req = GetRequest::default();
    for i in 0..30_u32 {
        req.push(format!("key-{}", i).into_bytes(), 100 + i, i % 3 == 0);
    }
    let (items, err) = cluster.get(req).unwrap().collect_all().await;
    assert!(err.is_none());
    assert_eq!(items.len(), 30);
    for (i, item) in items.iter().enumerate() {
        let i = i as u32;
        assert_eq!(item.key, format!("key-{}", i).into_bytes());
        assert_eq!(item.opaque, 100 + i);
        assert_eq!(item.quiet, i % 3 == 0);
        assert_eq!(item.miss, i % 2 == 1);
        if !item.miss {
            assert_eq!(item.data, item.key);
        }
    }

    let mut used = 0;
    for node in &nodes {
        let mut owns = false;
        for i in (0..30).step_by(2) {
            owns |= node.value(&format!("key-{}", i)).await.is_some();
        }
        used += usize::from(owns);
    }
    assert!(used >= 2);
}

#[tokio::test]
async fn test_get_hit_then_miss() {
    let nodes = start_nodes(3).await;
    let cluster = open(&nodes).await;
    cluster.set(set_request("k1", "v1")).await.unwrap();

    let req = GetRequest {
        keys: vec![b"k1".to_vec(), b"k2".to_vec()],
        opaques: vec![5, 6],
        quiet: vec![false, false],
        ..Default::default()
    };
    let (items, err) = cluster.get(req).unwrap().collect_all().await;
    assert!(err.is_none());
    assert_eq!(
        items,
        vec![
            GetResponse::hit(b"k1".to_vec(), b"v1".to_vec(), 0, 5, false),
            GetResponse::miss(b"k2".to_vec(), 6, false),
        ]
    );
}

#[tokio::test]
async fn test_malformed_batch_is_rejected() {
    let nodes = start_nodes(2).await;
    let cluster = open(&nodes).await;
    let req = GetRequest {
        keys: vec![b"k1".to_vec(), b"k2".to_vec()],
        opaques: vec![1],
        quiet: vec![false, false],
        ..Default::default()
    };
    assert!(cluster.get(req).unwrap_err().is_malformed_batch());
}

#[tokio::test]
async fn test_backend_error_ends_batch() {
    let nodes = start_nodes(1).await;
    let cluster = open(&nodes).await;
    nodes[0].insert("k1", "v1").await;
    let req = GetRequest {
        keys: vec![b"k1".to_vec(), b"fail-k2".to_vec(), b"k3".to_vec()],
        opaques: vec![1, 2, 3],
        quiet: vec![false; 3],
        ..Default::default()
    };
    let (items, err) = cluster.get(req).unwrap().collect_all().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].opaque, 1);
    assert_eq!(err.unwrap().to_string(), "injected failure");
}

#[tokio::test]
async fn test_routing_is_stable() {
    let nodes = start_nodes(3).await;
    let cluster = open(&nodes).await;
    cluster.set(set_request("stable", "v")).await.unwrap();
    let owners: Vec<_> = {
        let mut owners = Vec::new();
        for node in &nodes {
            owners.push(node.value("stable").await.is_some());
        }
        owners
    };
    assert_eq!(owners.iter().filter(|owned| **owned).count(), 1);

    let gat = GatRequest {
        key: b"stable".to_vec(),
        exptime: 10,
        opaque: 9,
        quiet: false,
    };
    let item = cluster.gat(gat).await.unwrap();
    assert_eq!(item.data, b"v");
    let owner = owners.iter().position(|owned| *owned).unwrap();
    assert_eq!(nodes[owner].exptime("stable").await, Some(10));
}

#[tokio::test]
async fn test_unreachable_node_fails_whole_cluster() {
    init_logger();
    let nodes = start_nodes(2).await;
    let unreachable = FakeNode::unused_address().await;
    let result = ClusterBuilder::new("partial")
        .address(nodes[0].address())
        .address(nodes[1].address())
        .address(unreachable)
        .build()
        .await;
    assert!(result.is_err());
    for node in &nodes {
        let accepted = async {
            while node.accepted_connections() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), accepted)
            .await
            .unwrap();
        node.wait_idle().await;
        assert_eq!(node.accepted_connections(), 1);
    }
}

#[tokio::test]
async fn test_builder_rejects_bad_address_lists() {
    assert!(ClusterBuilder::new("empty").build().await.is_err());

    let node = FakeNode::start().await;
    let result = ClusterBuilder::new("twice")
        .address(node.address())
        .address(node.address())
        .build()
        .await;
    assert!(result.is_err());
    assert_eq!(node.accepted_connections(), 0);
}

#[tokio::test]
async fn test_close_closes_every_shard() {
    let nodes = start_nodes(3).await;
    let cluster = open(&nodes).await;
    assert_eq!(cluster.shards().len(), 3);
    cluster.close().await.unwrap();
    for shard in cluster.shards() {
        assert!(shard.is_closed().await);
    }
    for node in &nodes {
        node.wait_idle().await;
    }
    assert!(cluster
        .set(set_request("k", "v"))
        .await
        .unwrap_err()
        .is_connection_closed());
}
