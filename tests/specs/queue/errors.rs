//! Error-path specs: user mistakes must exit 1 with a readable message.

use crate::prelude::*;

#[test]
fn schedule_without_placeholder_fails() {
    let host = QueueHost::new();
    host.add_pool("lab");
    host.queue(&["schedule", "lab", "echo", "hi"])
        .fails_with(1)
        .stderr_has("no @RESOURCE in command");
    assert!(host.queue_entries("lab").is_empty());
}

#[test]
fn unknown_pool_fails() {
    let host = QueueHost::new();
    host.queue(&["schedule", "ghost", "echo", "@RESOURCE"])
        .fails_with(1)
        .stderr_has("pool ghost does not exist");
    host.queue(&["run", "ghost"]).fails_with(1);
    host.queue(&["list", "ghost"]).fails_with(1);
    host.queue(&["clean", "ghost"]).fails_with(1);
}

#[test]
fn schedule_with_unknown_extra_pool_fails() {
    let host = QueueHost::new();
    host.add_pool("lab");
    host.queue(&["schedule", "-e", "ghost", "lab", "echo", "@RESOURCE"])
        .fails_with(1)
        .stderr_has("pool ghost does not exist");
    assert!(host.queue_entries("lab").is_empty());
}

#[test]
fn dci_job_without_log_fails() {
    let host = QueueHost::new();
    host.add_pool("lab");
    host.queue(&["dci-job", "lab", "42"]).fails_with(1);
}

#[test]
fn unschedule_missing_id_is_a_noop() {
    let host = QueueHost::new();
    host.add_pool("lab");
    host.queue(&["unschedule", "lab", "42"]).passes();
}
