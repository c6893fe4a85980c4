// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::pool::PoolStore;
use tempfile::TempDir;

fn scheduler() -> (TempDir, Scheduler) {
    let dir = TempDir::new().unwrap();
    let store = PoolStore::new(dir.path());
    store.add_pool("lab").unwrap();
    (dir, Scheduler::new(store, false))
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

async fn queue(sched: &Scheduler, wd: &Path, cmd: &[&str], opts: &ScheduleOpts) -> u64 {
    match sched.schedule("lab", &argv(cmd), wd, opts).await.unwrap() {
        ScheduleOutcome::Queued(id) => id,
        other => panic!("expected Queued, got {:?}", other),
    }
}

#[tokio::test]
async fn schedule_requires_placeholder() {
    let (dir, sched) = scheduler();
    let result = sched
        .schedule("lab", &argv(&["echo", "hi"]), dir.path(), &ScheduleOpts::default())
        .await;
    assert!(matches!(result, Err(QueueError::MissingPlaceholder(_))));
}

#[tokio::test]
async fn schedule_assigns_sequential_ids() {
    let (dir, sched) = scheduler();
    let id1 = queue(&sched, dir.path(), &["echo", "@RESOURCE", "a"], &ScheduleOpts::default()).await;
    let id2 = queue(&sched, dir.path(), &["echo", "@RESOURCE", "b"], &ScheduleOpts::default()).await;
    assert_eq!((id1, id2), (1, 2));
    // next advanced twice, first untouched.
    assert_eq!(sched.store().seq("lab").get().unwrap(), (1, 3));
}

#[tokio::test]
async fn schedule_deduplicates_by_cmd_and_wd() {
    let (dir, sched) = scheduler();
    let opts = ScheduleOpts::default();
    queue(&sched, dir.path(), &["echo", "@RESOURCE"], &opts).await;
    let second = sched
        .schedule("lab", &argv(&["echo", "@RESOURCE"]), dir.path(), &opts)
        .await
        .unwrap();
    assert_eq!(second, ScheduleOutcome::Duplicate);

    // A different working directory is a different command.
    let elsewhere = dir.path().join("elsewhere");
    std::fs::create_dir(&elsewhere).unwrap();
    let third = sched
        .schedule("lab", &argv(&["echo", "@RESOURCE"]), &elsewhere, &opts)
        .await
        .unwrap();
    assert!(matches!(third, ScheduleOutcome::Queued(_)));

    // --force skips the check entirely.
    let forced = sched
        .schedule(
            "lab",
            &argv(&["echo", "@RESOURCE"]),
            dir.path(),
            &ScheduleOpts {
                force: true,
                ..ScheduleOpts::default()
            },
        )
        .await
        .unwrap();
    assert!(matches!(forced, ScheduleOutcome::Queued(_)));
}

#[tokio::test]
async fn schedule_rejects_unknown_extra_pool() {
    let (dir, sched) = scheduler();
    let result = sched
        .schedule(
            "lab",
            &argv(&["echo", "@RESOURCE"]),
            dir.path(),
            &ScheduleOpts {
                extra_pools: vec!["ghost".into()],
                ..ScheduleOpts::default()
            },
        )
        .await;
    assert!(matches!(result, Err(QueueError::Pool(PoolError::UnknownPool(_)))));
}

#[tokio::test]
async fn unschedule_queued_leaves_counter_alone() {
    let (dir, sched) = scheduler();
    let id = queue(&sched, dir.path(), &["echo", "@RESOURCE"], &ScheduleOpts::default()).await;
    sched.unschedule("lab", id).await.unwrap();
    assert!(!sched.store().queue_dir("lab").join(id.to_string()).exists());
    assert_eq!(sched.store().seq("lab").get().unwrap(), (1, 2));
    // Unscheduling an id that no longer exists is a no-op.
    sched.unschedule("lab", id).await.unwrap();
}

#[tokio::test]
async fn run_executes_and_restores_availability() {
    let (dir, sched) = scheduler();
    sched.store().add_resource("lab", "cluster4").unwrap();
    let marker = dir.path().join("ran");
    let cmd = format!("echo booked=$DCI_QUEUE_RES > {}", marker.display());
    let id = queue(&sched, dir.path(), &["sh", "-c", &cmd, "@RESOURCE"], &ScheduleOpts::default()).await;

    let codes = sched.run_pool("lab").await.unwrap();
    assert_eq!(codes.get(&id), Some(&0));
    assert_eq!(
        std::fs::read_to_string(&marker).unwrap().trim(),
        "booked=cluster4"
    );
    // Record reclaimed, resource free again.
    assert!(sched.store().records("lab").unwrap().is_empty());
    assert_eq!(sched.store().available("lab"), vec!["cluster4"]);
    // Log carries the environment header.
    let log = std::fs::read_to_string(sched.store().log_dir("lab").join(id.to_string())).unwrap();
    assert!(log.contains("+ DCI_QUEUE=lab"));
    assert!(log.contains("+ DCI_QUEUE_RES=cluster4"));
    assert!(log.contains(&format!("+ DCI_QUEUE_JOBID=lab.{id}")));
}

#[tokio::test]
async fn resource_substituted_in_argv() {
    let (dir, sched) = scheduler();
    sched.store().add_resource("lab", "cluster4").unwrap();
    let id = queue(&sched, dir.path(), &["echo", "target:@RESOURCE"], &ScheduleOpts::default()).await;
    sched.run_pool("lab").await.unwrap();
    let log = std::fs::read_to_string(sched.store().log_dir("lab").join(id.to_string())).unwrap();
    assert!(log.contains("target:cluster4"));
}

#[tokio::test]
async fn run_without_resources_consumes_nothing() {
    let (dir, sched) = scheduler();
    let id = queue(&sched, dir.path(), &["echo", "@RESOURCE"], &ScheduleOpts::default()).await;
    let codes = sched.run_pool("lab").await.unwrap();
    assert!(codes.is_empty());
    assert!(sched.store().queue_dir("lab").join(id.to_string()).exists());
    assert_eq!(sched.store().seq("lab").get().unwrap(), (1, 2));
}

#[tokio::test]
async fn priority_orders_dispatch_with_fifo_ties() {
    let (dir, sched) = scheduler();
    sched.store().add_resource("lab", "cluster4").unwrap();
    let p = |priority| ScheduleOpts {
        priority,
        ..ScheduleOpts::default()
    };
    let a = queue(&sched, dir.path(), &["echo", "a", "@RESOURCE"], &p(0)).await;
    let b = queue(&sched, dir.path(), &["echo", "b", "@RESOURCE"], &p(2)).await;
    let c = queue(&sched, dir.path(), &["echo", "c", "@RESOURCE"], &p(2)).await;
    let d = queue(&sched, dir.path(), &["echo", "d", "@RESOURCE"], &p(0)).await;

    let mut order = Vec::new();
    for _ in 0..4 {
        let codes = sched.run_pool("lab").await.unwrap();
        assert_eq!(codes.len(), 1);
        order.extend(codes.into_keys());
    }
    assert_eq!(order, vec![b, c, a, d]);
}

#[tokio::test]
async fn missing_extra_resource_blocks_dispatch_entirely() {
    // Spec scenario: primary has a resource, the extra pool has none. The
    // record must stay queued, the primary resource must stay available and
    // no log may appear.
    let (dir, sched) = scheduler();
    sched.store().add_pool("extra").unwrap();
    sched.store().add_resource("lab", "cluster4").unwrap();
    let id = queue(
        &sched,
        dir.path(),
        &["echo", "@RESOURCE"],
        &ScheduleOpts {
            extra_pools: vec!["extra".into()],
            ..ScheduleOpts::default()
        },
    )
    .await;

    let codes = sched.run_pool("lab").await.unwrap();
    assert!(codes.is_empty());
    assert!(sched.store().queue_dir("lab").join(id.to_string()).exists());
    assert_eq!(sched.store().available("lab"), vec!["cluster4"]);
    assert!(!sched.store().log_dir("lab").join(id.to_string()).exists());
}

#[tokio::test]
async fn skipped_high_priority_lets_lower_run() {
    let (dir, sched) = scheduler();
    sched.store().add_pool("extra").unwrap();
    sched.store().add_resource("lab", "cluster4").unwrap();
    let blocked = queue(
        &sched,
        dir.path(),
        &["echo", "blocked", "@RESOURCE"],
        &ScheduleOpts {
            priority: 5,
            extra_pools: vec!["extra".into()],
            ..ScheduleOpts::default()
        },
    )
    .await;
    let runnable = queue(&sched, dir.path(), &["echo", "ok", "@RESOURCE"], &ScheduleOpts::default()).await;

    let codes = sched.run_pool("lab").await.unwrap();
    assert_eq!(codes.get(&runnable), Some(&0));
    assert!(!codes.contains_key(&blocked));
    assert!(sched
        .store()
        .queue_dir("lab")
        .join(blocked.to_string())
        .exists());
}

#[tokio::test]
async fn extra_resources_exported_to_child() {
    let (dir, sched) = scheduler();
    sched.store().add_pool("extra").unwrap();
    sched.store().add_resource("lab", "cluster4").unwrap();
    sched.store().add_resource("extra", "scope1").unwrap();
    let marker = dir.path().join("env");
    let cmd = format!("echo $DCI_QUEUE1:$DCI_QUEUE_RES1 > {}", marker.display());
    let id = queue(
        &sched,
        dir.path(),
        &["sh", "-c", &cmd, "@RESOURCE"],
        &ScheduleOpts {
            extra_pools: vec!["extra".into()],
            ..ScheduleOpts::default()
        },
    )
    .await;

    let codes = sched.run_pool("lab").await.unwrap();
    assert_eq!(codes.get(&id), Some(&0));
    assert_eq!(
        std::fs::read_to_string(&marker).unwrap().trim(),
        "extra:scope1"
    );
    // Both pools got their resources back.
    assert_eq!(sched.store().available("lab"), vec!["cluster4"]);
    assert_eq!(sched.store().available("extra"), vec!["scope1"]);
}

#[tokio::test]
async fn consume_advances_first_only_for_oldest() {
    let (dir, sched) = scheduler();
    queue(&sched, dir.path(), &["echo", "1", "@RESOURCE"], &ScheduleOpts::default()).await;
    let id2 = queue(&sched, dir.path(), &["echo", "2", "@RESOURCE"], &ScheduleOpts::default()).await;

    // Consuming the younger record must not advance first (id reuse guard).
    let exec = sched.consume("lab", id2).unwrap().unwrap();
    assert_eq!(sched.store().seq("lab").get().unwrap(), (1, 3));
    std::fs::remove_file(exec).unwrap();

    // Consuming the oldest advances first.
    sched.consume("lab", 1).unwrap().unwrap();
    assert_eq!(sched.store().seq("lab").get().unwrap(), (2, 3));

    // A raced-away record consumes to None.
    assert!(sched.consume("lab", 1).unwrap().is_none());
}

#[tokio::test]
async fn block_mode_returns_child_exit_code() {
    let (dir, sched) = scheduler();
    sched.store().add_resource("lab", "cluster4").unwrap();
    let outcome = sched
        .schedule(
            "lab",
            &argv(&["sh", "-c", "exit 7", "@RESOURCE"]),
            dir.path(),
            &ScheduleOpts {
                block: true,
                ..ScheduleOpts::default()
            },
        )
        .await
        .unwrap();
    assert!(matches!(outcome, ScheduleOutcome::Completed { code: 7, .. }));
}

#[tokio::test]
async fn failing_child_frees_resources() {
    let (dir, sched) = scheduler();
    sched.store().add_resource("lab", "cluster4").unwrap();
    let id = queue(&sched, dir.path(), &["sh", "-c", "exit 3", "@RESOURCE"], &ScheduleOpts::default()).await;
    let codes = sched.run_pool("lab").await.unwrap();
    assert_eq!(codes.get(&id), Some(&3));
    assert_eq!(sched.store().available("lab"), vec!["cluster4"]);
    assert!(sched.store().records("lab").unwrap().is_empty());
}

#[tokio::test]
async fn spawn_failure_reclaims_booking() {
    let (dir, sched) = scheduler();
    sched.store().add_resource("lab", "cluster4").unwrap();
    let id = queue(
        &sched,
        dir.path(),
        &["/no/such/binary", "@RESOURCE"],
        &ScheduleOpts::default(),
    )
    .await;
    let codes = sched.run_pool("lab").await.unwrap();
    assert!(!codes.contains_key(&id));
    assert_eq!(sched.store().available("lab"), vec!["cluster4"]);
    assert!(sched.store().records("lab").unwrap().is_empty());
}

#[tokio::test]
async fn remove_resource_flag_deletes_backing_file() {
    let (dir, sched) = scheduler();
    sched.store().add_resource("lab", "cluster4").unwrap();
    let id = queue(
        &sched,
        dir.path(),
        &["echo", "@RESOURCE"],
        &ScheduleOpts {
            remove: true,
            ..ScheduleOpts::default()
        },
    )
    .await;
    let codes = sched.run_pool("lab").await.unwrap();
    assert_eq!(codes.get(&id), Some(&0));
    // Gone for good: no backing file, no availability link.
    assert!(sched.store().resources("lab").is_empty());
    assert!(sched.store().available("lab").is_empty());
}

#[tokio::test]
async fn clean_reclaims_stale_records() {
    let (_dir, sched) = scheduler();
    sched.store().add_resource("lab", "cluster4").unwrap();
    let booked = sched.store().book("lab").unwrap();
    let record = CmdRecord {
        cmd: vec!["echo".into(), "@RESOURCE".into()],
        wd: "/tmp".into(),
        resource: Some(booked.clone()),
        booked: Some(vec![(booked, "lab".into())]),
        // A pid that cannot exist on this host.
        pid: Some(0x7fff_fff0),
        ..CmdRecord::default()
    };
    record
        .save(&sched.store().queue_dir("lab").join("1.exec"))
        .unwrap();

    sched.clean("lab").unwrap();
    assert!(sched.store().records("lab").unwrap().is_empty());
    assert_eq!(sched.store().available("lab"), vec!["cluster4"]);
}
