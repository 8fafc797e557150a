//! Status command implementation.

use anyhow::{Context, Result};
use chif_core::Pipeline;
use tracing::info;

use crate::utils::print_json;

/// Execute the status command: print the task document as reported.
pub async fn execute(pipeline: &Pipeline, uuid: String) -> Result<()> {
    let status = pipeline
        .status(&uuid)
        .await
        .with_context(|| format!("Failed to get status of {uuid}"))?;

    info!(%uuid, status = %status.queue_status, "Task status");
    print_json(&status.task)
}
