//! Encode command implementation.

use anyhow::{Context, Result};
use chif_core::{EncodeRequest, Pipeline};
use colored::Colorize;
use tracing::info;

use crate::utils::cdn_viewer_url;

/// Execute the encode command.
pub async fn execute(pipeline: &Pipeline, request: EncodeRequest) -> Result<()> {
    let outcome = pipeline
        .encode(&request)
        .await
        .with_context(|| format!("Failed to encode {}", request.manifest.display()))?;

    let viewer = outcome
        .published
        .as_ref()
        .map(|url| cdn_viewer_url(url.as_str()));
    if let Some(viewer) = &viewer {
        info!(uuid = %outcome.uuid, %viewer, "Published");
    }

    println!();
    println!("{}", "CHIF container encoded".green().bold());
    println!();
    println!("   {} {}", "UUID:".dimmed(), outcome.uuid);
    if let Some(artifact) = &outcome.artifact {
        println!("   {} {}", "Saved:".dimmed(), artifact.path.display());
        println!("   {} {} bytes", "Size:".dimmed(), artifact.bytes);
    }
    if let Some(viewer) = viewer {
        println!("   {} {}", "CDN:".dimmed(), viewer);
    }

    Ok(())
}
