use anyhow::Result;
use colored::Colorize;
use listwatch_core::{FileTracker, TrackerStore};
use std::path::Path;

pub fn run(config_path: &Path) -> Result<()> {
    let config = super::load_config(config_path)?;
    let tracker = FileTracker::new(&config.state.path);

    println!("{}", "listwatch status".bold().cyan());
    println!("  {}: {}", "Source".bold(), config.source.label());
    println!("  {}: {}", "State".bold(), config.state.path.display());

    match tracker.load()? {
        Some(reference) => println!("  {}: {}", "Last processed".bold(), reference.id.yellow()),
        None => println!("  {}: {}", "Last processed".bold(), "never run".dimmed()),
    }
    println!();

    println!(
        "{} {}",
        "Monitored files".bold(),
        format!("({})", config.files.len()).yellow()
    );
    for file in &config.files {
        println!(
            "  {} {} {}",
            file.path,
            "→".dimmed(),
            config.output_path(file).display()
        );
    }

    Ok(())
}
