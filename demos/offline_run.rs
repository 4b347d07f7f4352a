use listwatch::core::fetch::MemoryFetcher;
use listwatch::core::publish::MemoryPublisher;
use listwatch::core::tracker::MemoryTracker;
use listwatch::core::{FileSetOrchestrator, MonitoredFile, TrackerStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("📋 listwatch offline example\n");

    let fetcher = MemoryFetcher::new();
    let tracker = MemoryTracker::new();
    let publisher = MemoryPublisher::new();
    let files = vec![
        MonitoredFile::new("domains/tif.txt"),
        MonitoredFile::new("ips/tif.txt"),
    ];

    let orchestrator =
        FileSetOrchestrator::new(fetcher.clone(), tracker.clone(), publisher.clone());

    // First commit: only a baseline is recorded
    fetcher.set_head("c1");
    fetcher.put("c1", "domains/tif.txt", "# blocklist\na.com\nb.com\n");
    fetcher.put("c1", "ips/tif.txt", "10.0.0.1\n");

    let report = orchestrator.run(&files).await?;
    println!(
        "✓ Baseline at {} ({} new records)",
        report.current.short(),
        report.total_new_records()
    );
    println!();

    // Upstream adds records to one file
    fetcher.set_head("c2");
    fetcher.put("c2", "domains/tif.txt", "# blocklist\na.com\nb.com\nc.com\n  d.com  \n");
    fetcher.put("c2", "ips/tif.txt", "10.0.0.1\n");

    let report = orchestrator.run(&files).await?;
    println!("📊 Run {}", report.run_id);
    for result in report.results() {
        println!("  {}: {} new", result.file, result.new_records.len());
        for record in result.new_records.iter() {
            println!("    + {}", record);
        }
    }
    println!();

    if let Some(artifact) = publisher.artifact("domains/tif.txt") {
        println!("📝 Published artifact:\n{}", artifact);
    }

    if let Some(state) = tracker.load()? {
        println!("✓ State advanced to {}", state.id);
    }

    Ok(())
}
