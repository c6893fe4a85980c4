// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-side query clauses for component selection.
//!
//! The remote service filters components with a small functional syntax
//! (`and(eq(type,ocp),contains(tags,build:dev))`). This module turns
//! component expressions into those clauses; building is pure, so the same
//! expression always yields the same bytes.

use dci_core::ComponentExpr;

/// Build tags ordered from least to most stable. When several are requested
/// the most stable one wins and expands into a disjunction over itself and
/// everything later in the order.
pub const BUILD_TAG_ORDER: [&str; 4] =
    ["build:nightly", "build:dev", "build:candidate", "build:ga"];

/// `,eq(k,v)` per `k:v` field; a value ending in `*` becomes a SQL-style
/// prefix match.
pub fn eq_clauses(fields: &[String]) -> String {
    let mut out = String::new();
    for field in fields {
        let Some((key, value)) = field.split_once(':') else {
            continue;
        };
        if let Some(prefix) = value.strip_suffix('*') {
            out.push_str(&format!(",ilike({key},{prefix}%)"));
        } else {
            out.push_str(&format!(",eq({key},{value})"));
        }
    }
    out
}

/// Split query clauses into `tags:` values and plain field clauses.
pub fn extract_tags(clauses: &[String]) -> (Vec<String>, Vec<String>) {
    let mut tags = Vec::new();
    let mut others = Vec::new();
    for clause in clauses {
        match clause.strip_prefix("tags:") {
            Some(value) => tags.push(value.to_string()),
            None => others.push(clause.clone()),
        }
    }
    (tags, others)
}

/// Split comma-joined tag lists into build tags and ordinary tags.
pub fn extract_build_tags(tags: &[String]) -> (Vec<String>, Vec<String>) {
    let mut build = Vec::new();
    let mut others = Vec::new();
    for tag in tags.iter().flat_map(|t| t.split(',')) {
        if tag.is_empty() {
            continue;
        }
        if tag.starts_with("build:") {
            build.push(tag.to_string());
        } else {
            others.push(tag.to_string());
        }
    }
    (build, others)
}

/// Keep tags that apply to this component type: `T?tag` is scoped to type
/// `T`, anything without a `?` applies to every type.
pub fn filter_type_tags(tags: &[String], ctype: &str) -> Vec<String> {
    tags.iter()
        .filter_map(|tag| match tag.split_once('?') {
            Some((scope, scoped_tag)) => (scope == ctype).then(|| scoped_tag.to_string()),
            None => Some(tag.to_string()),
        })
        .collect()
}

/// `,contains(tags,x)` per ordinary tag, then one `or(...)` disjunction for
/// the most stable requested build tag and everything above it.
pub fn tags_clause(tags: &[String], fallback_tags: &[String], ctype: &str) -> String {
    let scoped = filter_type_tags(tags, ctype);
    let (mut build, mut others) = extract_build_tags(&scoped);
    let (fallback_build, fallback_others) = extract_build_tags(fallback_tags);
    build.extend(fallback_build);
    others.extend(fallback_others);

    let mut out = String::new();
    for tag in &others {
        out.push_str(&format!(",contains(tags,{tag})"));
    }
    if let Some(top) = build
        .iter()
        .filter_map(|tag| BUILD_TAG_ORDER.iter().position(|b| b == tag))
        .max()
    {
        let disjuncts: Vec<String> = BUILD_TAG_ORDER[top..]
            .iter()
            .map(|tag| format!("contains(tags,{tag})"))
            .collect();
        out.push_str(&format!(",or({})", disjuncts.join(",")));
    }
    out
}

/// The full query for one component expression. `fallback_tags` come from a
/// retry on a job-def with `fallback_last_success` configured.
pub fn build_query_from_expr(expr: &ComponentExpr, fallback_tags: &[String]) -> String {
    match expr {
        ComponentExpr::Bare(ctype) | ComponentExpr::Structured { ctype, .. } => {
            build_query(ctype, fallback_tags)
        }
        ComponentExpr::Pinned { ctype, version } => format!(
            "and(eq(state,active),eq(type,{ctype}),eq(version,{version}){})",
            tags_clause(&[], fallback_tags, ctype)
        ),
        ComponentExpr::Query { ctype, clauses } => {
            let (tags, fields) = extract_tags(clauses);
            format!(
                "and(eq(type,{ctype}){}{})",
                eq_clauses(&fields),
                tags_clause(&tags, fallback_tags, ctype)
            )
        }
    }
}

/// Query for a bare type plus extra tags.
pub fn build_query(ctype: &str, tags: &[String]) -> String {
    format!(
        "and(eq(state,active),eq(type,{ctype}){})",
        tags_clause(&[], tags, ctype)
    )
}

#[cfg(test)]
#[path = "query_tests.rs"]
mod tests;
