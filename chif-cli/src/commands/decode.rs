//! Decode command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chif_core::Pipeline;
use colored::Colorize;

/// Execute the decode command.
pub async fn execute(
    pipeline: &Pipeline,
    chif: PathBuf,
    manifest: PathBuf,
    out_dir: PathBuf,
) -> Result<()> {
    let artifact = pipeline
        .decode(&chif, &manifest, &out_dir)
        .await
        .with_context(|| format!("Failed to decode {}", chif.display()))?;

    println!();
    println!("{}", "CHIF container decoded".green().bold());
    println!();
    println!("   {} {}", "Saved:".dimmed(), artifact.path.display());
    println!("   {} {} bytes", "Size:".dimmed(), artifact.bytes);

    Ok(())
}
