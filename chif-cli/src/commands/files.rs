//! File management commands: events, blocking, publishing and deletion.

use anyhow::{Context, Result};
use chif_core::{EventQuery, Pipeline};
use colored::Colorize;
use serde_json::Value;
use tracing::{debug, info};

use crate::utils::{cdn_viewer_url, print_json};

pub async fn events(pipeline: &Pipeline, uuid: String, query: EventQuery) -> Result<()> {
    info!("Getting {uuid} events");
    let events = pipeline
        .client()
        .file_events(&uuid, &query)
        .await
        .with_context(|| format!("Failed to get events of {uuid}"))?;
    print_json(&events)
}

pub async fn block(pipeline: &Pipeline, uuid: String, code: i64, reason: String) -> Result<()> {
    info!("Blocking {uuid}");
    let body = pipeline
        .client()
        .block(&uuid, code, &reason)
        .await
        .with_context(|| format!("Failed to block {uuid}"))?;
    done("Blocked", &uuid, &body);
    Ok(())
}

pub async fn unblock(pipeline: &Pipeline, uuid: String) -> Result<()> {
    info!("Unblocking {uuid}");
    let body = pipeline
        .client()
        .unblock(&uuid)
        .await
        .with_context(|| format!("Failed to unblock {uuid}"))?;
    done("Unblocked", &uuid, &body);
    Ok(())
}

pub async fn get_block(pipeline: &Pipeline, uuid: String) -> Result<()> {
    info!("Getting {uuid} block");
    let block = pipeline
        .client()
        .block_status(&uuid)
        .await
        .with_context(|| format!("Failed to get block of {uuid}"))?;
    print_json(&block)
}

pub async fn delete(pipeline: &Pipeline, uuid: String, unpublish: bool) -> Result<()> {
    let body = pipeline
        .delete(&uuid, unpublish)
        .await
        .with_context(|| format!("Failed to delete {uuid}"))?;
    done(
        if unpublish { "Deleted and unpublished" } else { "Deleted" },
        &uuid,
        &body,
    );
    Ok(())
}

pub async fn publish(pipeline: &Pipeline, uuid: String) -> Result<()> {
    let url = pipeline
        .publish(&uuid)
        .await
        .with_context(|| format!("Failed to publish {uuid}"))?;
    let viewer = cdn_viewer_url(url.as_str());
    info!(%uuid, %viewer, "Published");
    println!("{} {}", "Published:".green().bold(), viewer);
    Ok(())
}

pub async fn unpublish(pipeline: &Pipeline, uuid: String, delete: bool) -> Result<()> {
    let body = pipeline
        .unpublish(&uuid, delete)
        .await
        .with_context(|| format!("Failed to unpublish {uuid}"))?;
    done(
        if delete { "Unpublished and deleted" } else { "Unpublished" },
        &uuid,
        &body,
    );
    Ok(())
}

pub async fn get_files(pipeline: &Pipeline) -> Result<()> {
    info!("Getting files of {}", pipeline.client().org_id());
    let files = pipeline
        .client()
        .file_entries()
        .await
        .context("Failed to list files")?;
    print_json(&files)
}

fn done(action: &str, uuid: &str, body: &Value) {
    debug!(%uuid, response = %body, "{action}");
    println!("{} {}", format!("{action}:").green().bold(), uuid);
}
