// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job tag computation.
//!
//! Tags tie a job back to its stage, the queue slot that launched it, the
//! inventory it ran against, and the job/components of the nearest previous
//! stage, so the server can reconstruct the chain.

use dci_core::JobDef;

/// Tags for a freshly scheduled job. `nearest_prev` is the closest previous
/// job-def that completed an attempt; only it contributes chain tags.
pub fn job_tags(
    jobdef: &JobDef,
    nearest_prev: Option<&JobDef>,
    queue_jobid: Option<&str>,
) -> Vec<String> {
    let mut tags = vec![jobdef.stage.clone()];

    if let Some(queue_jobid) = queue_jobid {
        tags.push(format!("pipeline-id:{queue_jobid}"));
    }

    if let Some(inventory) = &jobdef.ansible_inventory {
        if let Some(basename) = inventory.file_name().and_then(|name| name.to_str()) {
            tags.push(basename.to_string());
        }
    }

    if let Some(prev) = nearest_prev {
        if let Some(info) = &prev.job_info {
            let topic = info
                .job
                .topic
                .as_ref()
                .map(|topic| topic.name.clone())
                .or_else(|| prev.topic.clone())
                .unwrap_or_default();
            for component in &info.job.components {
                tags.push(format!(
                    "prev-component:{}:{}/{}",
                    component.ctype, topic, component.name
                ));
            }
            tags.push(format!("prev-job:{}", info.job.id));
        }
    }
    tags
}

/// The ordered previous job-defs of `jobdef`: every earlier job-def whose
/// stage or name appears in `prev_stages` and which completed an attempt,
/// nearest first. Unknown references are silently empty.
pub fn prev_jobdefs<'a>(jobdef: &JobDef, pipeline: &'a [JobDef]) -> Vec<&'a JobDef> {
    let mut prev: Vec<&JobDef> = pipeline
        .iter()
        .take_while(|candidate| candidate.name != jobdef.name)
        .filter(|candidate| {
            jobdef.prev_stages.contains(&candidate.stage)
                || jobdef.prev_stages.contains(&candidate.name)
        })
        .collect();
    prev.reverse();
    prev
}

#[cfg(test)]
#[path = "tags_tests.rs"]
mod tests;
