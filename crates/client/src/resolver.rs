// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resolution of component expressions against the remote registry.
//!
//! Each expression yields the single newest matching component (the server
//! sorts by release date). An expression with no match makes the whole
//! job-def unschedulable, which the caller maps to a per-job-def failure.

use crate::api::{ClientError, ComponentQuery, ControlServer};
use crate::query::{build_query, build_query_from_expr};
use dci_core::{Component, ComponentExpr};

/// Resolve every expression of a job-def. `fallback_tags` is non-empty only
/// on a fallback retry.
pub async fn resolve_components(
    server: &dyn ControlServer,
    topic_id: &str,
    exprs: &[ComponentExpr],
    fallback_tags: &[String],
) -> Result<Vec<Component>, ClientError> {
    let mut components = Vec::with_capacity(exprs.len());
    for expr in exprs {
        components.push(resolve_one(server, topic_id, expr, fallback_tags).await?);
    }
    Ok(components)
}

async fn resolve_one(
    server: &dyn ControlServer,
    topic_id: &str,
    expr: &ComponentExpr,
    fallback_tags: &[String],
) -> Result<Component, ClientError> {
    if let ComponentExpr::Structured {
        ctype,
        priority_tags,
        max_age,
    } = expr
    {
        let created_after = max_age.map(|days| {
            (chrono::Utc::now() - chrono::Duration::days(days))
                .format("%Y-%m-%d")
                .to_string()
        });
        if !priority_tags.is_empty() {
            // Ordered preference: the first tag producing a result wins.
            for tag in priority_tags {
                let mut tags = vec![tag.clone()];
                tags.extend_from_slice(fallback_tags);
                let query = ComponentQuery {
                    created_after: created_after.clone(),
                    ..ComponentQuery::newest(build_query(ctype, &tags))
                };
                if let Some(component) =
                    server.list_components(topic_id, &query).await?.into_iter().next()
                {
                    tracing::debug!(%expr, tag = %tag, component = %component.name, "resolved component");
                    return Ok(component);
                }
            }
            return Err(ClientError::NotFound(format!("component {expr}")));
        }
        let query = ComponentQuery {
            created_after,
            ..ComponentQuery::newest(build_query(ctype, fallback_tags))
        };
        return first(server, topic_id, expr, query).await;
    }

    let query = ComponentQuery::newest(build_query_from_expr(expr, fallback_tags));
    first(server, topic_id, expr, query).await
}

async fn first(
    server: &dyn ControlServer,
    topic_id: &str,
    expr: &ComponentExpr,
    query: ComponentQuery,
) -> Result<Component, ClientError> {
    match server.list_components(topic_id, &query).await?.into_iter().next() {
        Some(component) => {
            tracing::debug!(%expr, component = %component.name, "resolved component");
            Ok(component)
        }
        None => Err(ClientError::NotFound(format!("component {expr}"))),
    }
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
