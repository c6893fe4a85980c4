// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only views over a pool: listings, command searches and the mapping
//! between a run's log file and the remote job ids it created.

use crate::pool::PoolStore;
use crate::record::CmdRecord;
use crate::sched::QueueError;
use std::fmt::Write;
use std::path::Path;

/// Overview shown when `list` is called without a pool.
pub fn list_pools(store: &PoolStore, prog: &str) -> String {
    let pools = store.pools();
    if pools.is_empty() {
        return "No pool was found on the host.\n".to_string();
    }
    let mut out = String::from("The following pools were found:\n");
    for pool in pools {
        let _ = writeln!(out, "  {pool}");
    }
    out.push_str("Run the command below for the list of commands scheduled on your target pool:\n");
    let _ = writeln!(out, "  {prog} list <pool>");
    out
}

/// Full listing of one pool: resources, availability, blocked resources,
/// dispatched commands, then queued commands by descending priority.
pub fn list_pool(store: &PoolStore, pool: &str) -> Result<String, QueueError> {
    store.check_pool(pool)?;
    let mut out = String::new();

    let _ = writeln!(
        out,
        "Resources on the {pool} pool: {}",
        store.resources(pool).join(" ")
    );
    let _ = writeln!(
        out,
        "Available resources on the {pool} pool: {}",
        store.available(pool).join(" ")
    );

    let blocked = store.blocked(pool);
    if !blocked.is_empty() {
        let _ = writeln!(out, "Removed resources on the {pool} pool:");
        for reason in blocked {
            let _ = writeln!(out, " {}: {} [{}]", reason.resource, reason.reason, reason.date);
        }
    }

    let records = store.records(pool)?;

    let _ = writeln!(out, "Executing commands on the {pool} pool:");
    for (id, dispatched, record) in &records {
        if *dispatched {
            let _ = writeln!(out, "{}", display_cmd(*id, record));
        }
    }

    let _ = writeln!(out, "Queued commands on the {pool} pool:");
    let mut queued: Vec<&(u64, bool, CmdRecord)> =
        records.iter().filter(|(_, dispatched, _)| !dispatched).collect();
    // Highest priority first; records() already yields ascending ids.
    queued.sort_by_key(|(_, _, record)| std::cmp::Reverse(record.priority));
    for (id, _, record) in queued {
        let _ = writeln!(out, "{}", display_cmd(*id, record));
    }
    Ok(out)
}

fn display_cmd(id: u64, record: &CmdRecord) -> String {
    let priority = if record.priority > 0 {
        format!("(p{})", record.priority)
    } else {
        String::new()
    };
    let resource = match record.resource.as_deref() {
        Some(resource) => format!(" [{resource}]"),
        None => String::new(),
    };
    let remove = if record.remove { " [REMOVE]" } else { "" };
    format!(
        " {id}{priority}{resource}: {} (wd: {}){remove}",
        record.display_cmd().join(" "),
        record.wd.display(),
    )
}

/// Ids of records whose original argv matches exactly.
pub fn search(store: &PoolStore, pool: &str, cmd: &[String]) -> Result<Vec<u64>, QueueError> {
    store.check_pool(pool)?;
    Ok(store
        .records(pool)?
        .into_iter()
        .filter(|(_, _, record)| record.cmd == cmd)
        .map(|(id, _, _)| id)
        .collect())
}

/// First id of a record scheduled from the given working directory.
pub fn search_dir(
    store: &PoolStore,
    pool: &str,
    dir: &Path,
) -> Result<Option<u64>, QueueError> {
    store.check_pool(pool)?;
    Ok(store
        .records(pool)?
        .into_iter()
        .find(|(_, _, record)| record.wd == dir)
        .map(|(id, _, _)| id))
}

/// Scan a run's log file for the jobdef-name → remote-job-id mapping.
///
/// Two line shapes are recognized: the pipeline's own "running jobdef" lines
/// and the check playbook's `changed: [host] => {"changed": true, "job": ...}`
/// JSON echoes.
pub fn dci_jobs_from_log(
    store: &PoolStore,
    pool: &str,
    id: &str,
) -> Result<Vec<(String, String)>, QueueError> {
    store.check_pool(pool)?;
    let path = store.log_dir(pool).join(id);
    let content = std::fs::read_to_string(&path).map_err(|source| QueueError::Io {
        path: path.clone(),
        source,
    })?;

    let jobdef_re = static_regex(r"^\d{4}-.*\s+running jobdef: ([\w.-]+) with.*/([0-9a-f-]+) .*$");
    let change_re = static_regex(r#"^changed: \[[\w-]+\] => (\{"changed": true, "job":.+\})$"#);

    let mut jobs: Vec<(String, String)> = Vec::new();
    let mut push = |name: String, job_id: String| {
        if let Some(slot) = jobs.iter_mut().find(|(_, existing)| *existing == job_id) {
            slot.0 = name;
        } else {
            jobs.push((name, job_id));
        }
    };

    for line in content.lines() {
        if let Some(captures) = jobdef_re.captures(line) {
            push(captures[1].to_string(), captures[2].to_string());
        } else if let Some(captures) = change_re.captures(line) {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&captures[1]) {
                let job_id = value["job"]["id"].as_str().unwrap_or_default().to_string();
                let name = value["job"]["name"].as_str().unwrap_or_default().to_string();
                if !job_id.is_empty() {
                    push(name, job_id);
                }
            }
        }
    }
    Ok(jobs)
}

#[allow(clippy::expect_used)]
fn static_regex(pattern: &str) -> regex::Regex {
    regex::Regex::new(pattern).expect("pattern is a checked literal")
}

/// The pager argv used by the `log` subcommand.
pub fn log_viewer(follow: bool, lines: Option<&str>) -> Vec<String> {
    if follow || lines.is_some() {
        let mut argv = vec!["tail".to_string()];
        if follow {
            argv.push("-f".to_string());
        }
        if let Some(n) = lines {
            argv.push("-n".to_string());
            argv.push(n.to_string());
        }
        argv
    } else {
        vec!["less".to_string()]
    }
}

#[cfg(test)]
#[path = "inspect_tests.rs"]
mod tests;
