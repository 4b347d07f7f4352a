use anyhow::Result;
use colored::Colorize;
use listwatch_core::{FileOutcome, FileSetOrchestrator, FileTracker, RunReport};
use std::path::Path;

const SAMPLE_SIZE: usize = 5;

pub async fn run(config_path: &Path, no_commit: bool) -> Result<()> {
    let config = super::load_config(config_path)?;
    let fetcher = listwatch_remote::build_fetcher(&config)?;
    let tracker = FileTracker::new(&config.state.path);
    let publisher = super::build_publisher(&config, config.output.commit && !no_commit);

    let orchestrator = FileSetOrchestrator::new(fetcher, tracker, publisher)
        .with_concurrency(config.fetch.concurrency);

    let report = orchestrator.run(&config.monitored_files()).await?;
    print_report(&report);

    if !report.is_success() {
        anyhow::bail!("Run {} did not complete cleanly", report.run_id);
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!("{}", "listwatch run".bold().cyan());
    match &report.previous {
        Some(previous) => println!(
            "  {}: {} → {}",
            "Range".bold(),
            previous.short().yellow(),
            report.current.short().yellow()
        ),
        None => println!(
            "  {}: {} (first run)",
            "Baseline".bold(),
            report.current.short().yellow()
        ),
    }
    println!();

    for outcome in &report.outcomes {
        match outcome {
            FileOutcome::Checked(result) if result.first_observation => {
                println!("  {} {} {}", "•".blue(), result.file, "baseline".dimmed());
            }
            FileOutcome::Checked(result) if result.new_records.is_empty() => {
                println!("  {} {} {}", "=".dimmed(), result.file, "no change".dimmed());
            }
            FileOutcome::Checked(result) => {
                println!(
                    "  {} {} {}",
                    "+".green(),
                    result.file,
                    format!("+{} new", result.new_records.len()).green()
                );
                for record in result.new_records.iter().take(SAMPLE_SIZE) {
                    println!("      {}", record);
                }
                if result.new_records.len() > SAMPLE_SIZE {
                    println!(
                        "      {} and {} more",
                        "...".dimmed(),
                        (result.new_records.len() - SAMPLE_SIZE).to_string().yellow()
                    );
                }
            }
            FileOutcome::Failed { file, error } => {
                println!(
                    "  {} {} {} {}",
                    "✗".red(),
                    file,
                    format!("failed {}:", error.kind()).red(),
                    error
                );
            }
        }
    }

    println!();
    if report.is_success() {
        println!(
            "{} {} new record(s), state at {}",
            "✓".green().bold(),
            report.total_new_records(),
            report.current.short()
        );
    } else if report.has_failures() {
        println!(
            "{} Some files failed; the same range will be retried next run",
            "!".yellow().bold()
        );
    } else if !report.recorded {
        println!("{} Results were written but not recorded", "!".yellow().bold());
    }
}
