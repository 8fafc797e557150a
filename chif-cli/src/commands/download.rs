//! Download command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chif_core::Pipeline;
use colored::Colorize;

/// Execute the download command.
pub async fn execute(pipeline: &Pipeline, uuid: String, chif: PathBuf) -> Result<()> {
    let artifact = pipeline
        .download(&uuid, &chif)
        .await
        .with_context(|| format!("Failed to download {uuid}"))?;

    println!(
        "{} {} ({} bytes)",
        "Downloaded".green().bold(),
        artifact.path.display(),
        artifact.bytes
    );
    Ok(())
}
