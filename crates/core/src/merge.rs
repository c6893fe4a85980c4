// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tree-level merging of job-def documents and command-line overrides.
//!
//! Documents stay dynamic ([`serde_yaml::Value`]) until the stage-executor
//! boundary, because overrides may target keys the typed model does not know.

use serde_yaml::{Mapping, Value};

/// Merge `overlay` into `base` the way consecutive same-named job-defs merge:
/// sequences concatenate, mappings merge recursively, scalars take the
/// overlay value.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.entry(key) {
                    serde_yaml::mapping::Entry::Occupied(mut entry) => {
                        deep_merge(entry.get_mut(), value);
                    }
                    serde_yaml::mapping::Entry::Vacant(entry) => {
                        entry.insert(value);
                    }
                }
            }
        }
        (Value::Sequence(base_seq), Value::Sequence(overlay_seq)) => {
            base_seq.extend(overlay_seq);
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value;
        }
    }
}

/// The replacement key of a list element: `K=V` and `K?query` elements are
/// keyed by `K`, anything else by its full text.
pub fn element_prefix(element: &str) -> &str {
    match element.find(['=', '?']) {
        Some(pos) => &element[..pos],
        None => element,
    }
}

/// Add `element` to `list`, replacing the first existing string element with
/// the same prefix, appending otherwise.
pub fn add_or_replace(list: &mut Vec<Value>, element: Value) {
    let Some(text) = element.as_str() else {
        list.push(element);
        return;
    };
    let prefix = element_prefix(text).to_string();
    for slot in list.iter_mut() {
        if slot.as_str().is_some_and(|s| element_prefix(s) == prefix) {
            *slot = element;
            return;
        }
    }
    list.push(element);
}

/// Apply a command-line override mapping onto a job-def.
///
/// List-valued keys get add-or-replace per element (a scalar override of a
/// list key is treated as a one-element override), mapping-valued keys merge
/// key by key, everything else is replaced.
pub fn overload(jobdef: &mut Mapping, overlay: &Mapping) {
    for (key, value) in overlay {
        if let Some(Value::Sequence(list)) = jobdef.get_mut(key) {
            let elements = match value {
                Value::Sequence(items) => items.clone(),
                other => vec![other.clone()],
            };
            for element in elements {
                add_or_replace(list, element);
            }
            continue;
        }
        if let (Some(Value::Mapping(map)), Value::Mapping(overlay_map)) =
            (jobdef.get_mut(key), value)
        {
            for (k, v) in overlay_map {
                map.insert(k.clone(), v.clone());
            }
            continue;
        }
        jobdef.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
#[path = "merge_tests.rs"]
mod tests;
