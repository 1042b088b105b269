//! Single-node store/get behavior.

use silo_tests::{init_tracing, TestNode};

#[tokio::test]
async fn test_single_node_store_get() {
    init_tracing();

    let node = TestNode::start(&[], false).await;

    node.store("alpha", b"hello").await.unwrap();
    assert!(node.has("alpha"));
    assert_eq!(node.get("alpha").await.unwrap(), b"hello");

    node.delete("alpha").unwrap();
    assert!(!node.has("alpha"));
}

#[tokio::test]
async fn test_on_disk_size_is_plaintext_plus_iv() {
    init_tracing();

    let node = TestNode::start(&[], false).await;

    node.store("sized", b"twelve bytes").await.unwrap();

    let meta = std::fs::metadata(node.blob_path("sized")).unwrap();
    assert_eq!(meta.len(), 12 + 16);
}

#[tokio::test]
async fn test_empty_blob() {
    init_tracing();

    let node = TestNode::start(&[], false).await;

    node.store("empty", b"").await.unwrap();
    assert!(node.has("empty"));
    assert!(node.get("empty").await.unwrap().is_empty());

    // IV only.
    let meta = std::fs::metadata(node.blob_path("empty")).unwrap();
    assert_eq!(meta.len(), 16);
}

#[tokio::test]
async fn test_many_keys() {
    init_tracing();

    let node = TestNode::start(&[], false).await;

    for i in 0..50 {
        let key = format!("file_{i}");
        let data = format!("contents of file number {i}").into_bytes();

        node.store(&key, &data).await.unwrap();
        assert_eq!(node.get(&key).await.unwrap(), data);

        node.delete(&key).unwrap();
        assert!(!node.has(&key));
    }
}
