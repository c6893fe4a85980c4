//! Pool lifecycle specs.

use crate::prelude::*;

#[test]
fn add_pool_creates_the_layout() {
    let host = QueueHost::new();
    host.add_pool("lab");
    for key in ["pool", "available", "queue", "reason", "log"] {
        assert!(host.top().join(key).join("lab").is_dir(), "missing {key}");
    }
    assert_eq!(host.counter("lab"), (1, 1));
}

#[test]
fn add_then_remove_pool_restores_the_filesystem() {
    let host = QueueHost::new();
    host.add_pool("lab");
    host.add_resource("lab", "cluster4");
    host.queue(&["remove-pool", "-n", "lab"]).passes();
    for key in ["pool", "available", "queue", "reason", "log"] {
        assert!(!host.top().join(key).join("lab").exists());
    }
}

#[test]
fn add_resource_shows_up_available() {
    let host = QueueHost::new();
    host.add_pool("lab");
    host.add_resource("lab", "cluster4");
    assert_eq!(host.available("lab"), vec!["cluster4"]);

    host.queue(&["list", "lab"])
        .passes()
        .stdout_has("Available resources on the lab pool: cluster4");
}

#[test]
fn remove_resource_blocks_it_with_a_reason() {
    let host = QueueHost::new();
    host.add_pool("lab");
    host.add_resource("lab", "cluster4");
    host.queue(&["remove-resource", "lab", "cluster4", "broken BMC"])
        .passes();

    assert!(host.available("lab").is_empty());
    host.queue(&["list", "lab"])
        .passes()
        .stdout_has("cluster4: broken BMC [");

    // Re-adding rehabilitates it.
    host.add_resource("lab", "cluster4");
    assert_eq!(host.available("lab"), vec!["cluster4"]);
}

#[test]
fn removing_unknown_resource_fails_without_force() {
    let host = QueueHost::new();
    host.add_pool("lab");
    host.queue(&["remove-resource", "lab", "ghost", "why"])
        .fails_with(1);
    host.queue(&["remove-resource", "-f", "lab", "ghost", "why"])
        .passes();
}

#[test]
fn list_without_pools_says_so() {
    let host = QueueHost::new();
    host.queue(&["list"])
        .passes()
        .stdout_has("No pool was found on the host.");
}

#[test]
fn list_names_every_pool() {
    let host = QueueHost::new();
    host.add_pool("lab");
    host.add_pool("virt");
    host.queue(&["list"])
        .passes()
        .stdout_has("lab")
        .stdout_has("virt");
}
