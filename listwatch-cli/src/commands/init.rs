use anyhow::{Context, Result};
use colored::Colorize;
use listwatch_core::config::TEMPLATE;
use std::path::Path;

pub fn run(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists. Use --force to overwrite it.",
            path.display()
        );
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, TEMPLATE)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("{}", "✓ Configuration created".green().bold());
    println!("  {}: {}", "Path".bold(), path.display());
    println!();
    println!("Edit the [source] and [[files]] sections, then run {}", "listwatch run".cyan());

    Ok(())
}
