use anyhow::{Context, Result};
use colored::Colorize;
use listwatch_core::{ChangeDetector, ContentFetcher, HistoryReference, MonitoredFile};
use std::path::Path;

/// Shows records added to one file between two references without touching
/// persisted state.
pub async fn run(
    config_path: &Path,
    file: String,
    from: String,
    to: Option<String>,
) -> Result<()> {
    let config = super::load_config(config_path)?;
    let fetcher = listwatch_remote::build_fetcher(&config)?;

    let to = match to {
        Some(id) => HistoryReference::new(id),
        None => fetcher
            .latest()
            .await
            .context("Failed to resolve the current reference")?,
    };
    let from = HistoryReference::new(from);
    let file = MonitoredFile::new(file);

    let result = ChangeDetector::new(&fetcher)
        .detect(&file, Some(&from), &to)
        .await
        .with_context(|| format!("Failed to compare {}", file))?;

    println!(
        "{} {} {}..{}",
        "diff".bold().cyan(),
        file,
        from.short().yellow(),
        to.short().yellow()
    );
    println!();

    if result.new_records.is_empty() {
        println!("{}", "No new records".dimmed());
        return Ok(());
    }

    for record in result.new_records.iter() {
        println!("{}", format!("+{}", record).green());
    }
    println!();
    println!("{} new record(s)", result.new_records.len().to_string().yellow());

    Ok(())
}
