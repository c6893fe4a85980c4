//! Scheduling and dispatch specs, including the priority-ordering and
//! multi-pool co-reservation scenarios.

use crate::prelude::*;

#[test]
fn schedule_run_frees_the_resource() {
    let host = QueueHost::new();
    host.add_pool("lab");
    host.add_resource("lab", "cluster4");
    host.schedule("lab", &["echo", "hello", "@RESOURCE"]);
    assert_eq!(host.queue_entries("lab"), vec!["1"]);

    host.run("lab");
    // Record reclaimed, availability link restored, log written.
    assert!(host.queue_entries("lab").is_empty());
    assert_eq!(host.available("lab"), vec!["cluster4"]);
    let log = std::fs::read_to_string(host.log_dir("lab").join("1")).unwrap();
    assert!(log.contains("+ DCI_QUEUE=lab"));
    assert!(log.contains("hello cluster4"));
}

#[test]
fn schedule_deduplicates_until_forced() {
    let host = QueueHost::new();
    host.add_pool("lab");
    host.schedule("lab", &["echo", "@RESOURCE"]);
    host.schedule("lab", &["echo", "@RESOURCE"]);
    assert_eq!(host.queue_entries("lab"), vec!["1"]);

    host.queue(&["schedule", "-f", "lab", "echo", "@RESOURCE"]).passes();
    assert_eq!(host.queue_entries("lab"), vec!["1", "2"]);
}

#[test]
fn every_id_has_at_most_one_record() {
    let host = QueueHost::new();
    host.add_pool("lab");
    host.schedule("lab", &["echo", "a", "@RESOURCE"]);
    host.schedule("lab", &["echo", "b", "@RESOURCE"]);
    let entries = host.queue_entries("lab");
    let mut ids: Vec<&str> = entries
        .iter()
        .map(|name| name.strip_suffix(".exec").unwrap_or(name))
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), entries.len());
    let (first, next) = host.counter("lab");
    assert!(next >= first);
}

#[test]
fn unschedule_keeps_the_counter() {
    let host = QueueHost::new();
    host.add_pool("lab");
    host.schedule("lab", &["echo", "@RESOURCE"]);
    assert_eq!(host.counter("lab"), (1, 2));
    host.queue(&["unschedule", "lab", "1"]).passes();
    assert!(host.queue_entries("lab").is_empty());
    // first unchanged, next advanced by the admit only.
    assert_eq!(host.counter("lab"), (1, 2));
}

#[test]
fn run_without_available_resource_consumes_nothing() {
    let host = QueueHost::new();
    host.add_pool("lab");
    host.schedule("lab", &["echo", "@RESOURCE"]);
    host.run("lab");
    assert_eq!(host.queue_entries("lab"), vec!["1"]);
    assert_eq!(host.counter("lab"), (1, 2));
}

#[test]
fn priority_beats_insertion_order() {
    // One resource; P0-a, P2-b, P2-c, P0-d admitted in that order must
    // dispatch as b, c, a, d.
    let host = QueueHost::new();
    host.add_pool("lab");
    host.add_resource("lab", "cluster4");
    host.schedule("lab", &["echo", "a", "@RESOURCE"]);
    host.queue(&["schedule", "-p", "2", "lab", "echo", "b", "@RESOURCE"]).passes();
    host.queue(&["schedule", "-p", "2", "lab", "echo", "c", "@RESOURCE"]).passes();
    host.schedule("lab", &["echo", "d", "@RESOURCE"]);

    let mut order = Vec::new();
    for _ in 0..4 {
        let before = host.queue_entries("lab");
        host.run("lab");
        let after = host.queue_entries("lab");
        let launched: Vec<String> = before
            .into_iter()
            .filter(|id| !after.contains(id))
            .collect();
        assert_eq!(launched.len(), 1);
        order.extend(launched);
    }
    assert_eq!(order, vec!["2", "3", "1", "4"]);
}

#[test]
fn partial_multi_pool_booking_is_prevented() {
    // Primary pool has a resource, the extra pool has none: no child may
    // launch, nothing may be consumed, the primary must stay available.
    let host = QueueHost::new();
    host.add_pool("primary");
    host.add_pool("extra");
    host.add_resource("primary", "cluster4");
    host.queue(&[
        "schedule", "-e", "extra", "primary", "echo", "@RESOURCE",
    ])
    .passes();

    host.run("primary");
    assert_eq!(host.queue_entries("primary"), vec!["1"]);
    assert_eq!(host.available("primary"), vec!["cluster4"]);
    assert!(!host.log_dir("primary").join("1").exists());
}

#[test]
fn extra_pool_resources_are_booked_and_freed() {
    let host = QueueHost::new();
    host.add_pool("primary");
    host.add_pool("extra");
    host.add_resource("primary", "cluster4");
    host.add_resource("extra", "scope1");
    host.queue(&[
        "schedule", "-e", "extra", "primary", "echo", "@RESOURCE",
    ])
    .passes();

    host.run("primary");
    assert!(host.queue_entries("primary").is_empty());
    assert_eq!(host.available("primary"), vec!["cluster4"]);
    assert_eq!(host.available("extra"), vec!["scope1"]);
    let log = std::fs::read_to_string(host.log_dir("primary").join("1")).unwrap();
    assert!(log.contains("+ DCI_QUEUE1=extra"));
    assert!(log.contains("+ DCI_QUEUE_RES1=scope1"));
}

#[test]
fn blocked_high_priority_does_not_starve_lower() {
    let host = QueueHost::new();
    host.add_pool("lab");
    host.add_pool("extra");
    host.add_resource("lab", "cluster4");
    host.queue(&[
        "schedule", "-p", "9", "-e", "extra", "lab", "echo", "starved", "@RESOURCE",
    ])
    .passes();
    host.schedule("lab", &["echo", "runnable", "@RESOURCE"]);

    host.run("lab");
    // The runnable command went through, the blocked one is untouched.
    assert_eq!(host.queue_entries("lab"), vec!["1"]);
    assert_eq!(host.available("lab"), vec!["cluster4"]);
    assert!(host.log_dir("lab").join("2").exists());
}

#[test]
fn block_mode_returns_the_child_exit_code() {
    let host = QueueHost::new();
    host.add_pool("lab");
    host.add_resource("lab", "cluster4");
    host.queue(&[
        "schedule", "-b", "lab", "sh", "-c", "exit 7", "@RESOURCE",
    ])
    .fails_with(7);
}

#[test]
fn remove_resource_flag_retires_the_resource_after_use() {
    let host = QueueHost::new();
    host.add_pool("lab");
    host.add_resource("lab", "cluster4");
    host.queue(&["schedule", "-r", "lab", "echo", "@RESOURCE"]).passes();
    host.run("lab");
    assert!(list_names(&host.pool_dir("lab")).is_empty());
    assert!(host.available("lab").is_empty());
}

#[test]
fn search_finds_commands_by_argv_and_wd() {
    let host = QueueHost::new();
    host.add_pool("lab");
    host.schedule("lab", &["echo", "target", "@RESOURCE"]);
    host.queue(&["search", "lab", "echo", "target", "@RESOURCE"])
        .passes()
        .stdout_has("1");
    host.queue(&["search", "lab", "echo", "other", "@RESOURCE"])
        .passes()
        .stdout_lacks("1");

    let wd = host.wd().display().to_string();
    host.queue(&["searchdir", "lab", &wd]).passes().stdout_has("1");
    host.queue(&["searchdir", "lab", "/nowhere"]).fails_with(1);
}

#[test]
fn list_shows_queued_commands_by_priority() {
    let host = QueueHost::new();
    host.add_pool("lab");
    host.schedule("lab", &["echo", "low", "@RESOURCE"]);
    host.queue(&["schedule", "-p", "3", "lab", "echo", "high", "@RESOURCE"]).passes();

    let stdout = host.queue(&["list", "lab"]).passes().stdout();
    let queued = stdout.split("Queued commands").nth(1).unwrap().to_string();
    let high = queued.find("2(p3): echo high").unwrap();
    let low = queued.find("1: echo low").unwrap();
    assert!(high < low);
}
