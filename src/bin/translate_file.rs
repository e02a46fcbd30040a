/// Run the full translation pipeline on a local file, without the HTTP server
///
/// Usage: cargo run --release --bin translate_file -- input.(png|pdf|cbz|...) [--output dir]

use anyhow::{Context, Result};
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;

use arabic_translator::core::config::Config;
use arabic_translator::core::types::InputFile;
use arabic_translator::orchestration::{package, PipelineOrchestrator};
use arabic_translator::utils::Metrics;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <input file> [--output dir]", args[0]);
        std::process::exit(1);
    }

    let input_path = &args[1];
    let mut output_dir = ".".to_string();

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--output" | "-o" => {
                if i + 1 < args.len() {
                    output_dir = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("arabic_translator=info"))
        .init();

    std::fs::create_dir_all(&output_dir)?;

    let config = Arc::new(Config::new().context("Failed to load config")?);
    let data = std::fs::read(input_path).with_context(|| format!("Failed to read {}", input_path))?;
    let filename = Path::new(input_path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(input_path);

    println!("Loading: {} ({} bytes)", input_path, data.len());
    let input = InputFile::from_upload(filename, Bytes::from(data), &config)?;
    let stem = input.stem().to_string();

    println!("Initializing pipeline...");
    let metrics = Metrics::new();
    let orchestrator = PipelineOrchestrator::from_config(config, metrics.clone())?;

    let outcome = orchestrator
        .process_file(input)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()).context(e.to_string()))?;
    let packaged = package(&outcome.bundle, &stem)?;

    let output_path = Path::new(&output_dir).join(&packaged.filename);
    std::fs::write(&output_path, &packaged.bytes)?;

    let report = &outcome.report;
    println!("Saved: {}", output_path.display());
    println!(
        "Images: {} total, {} rendered, {} unchanged, {} dropped",
        report.total_images,
        report.processed,
        report.unchanged,
        report.dropped.len()
    );
    for dropped in &report.dropped {
        println!("  image {} dropped during {}: {}", dropped.index + 1, dropped.stage, dropped.reason);
    }
    println!(
        "Regions: {} rendered ({} untranslated) in {:.0} ms",
        report.regions_rendered, report.regions_untranslated, report.elapsed_ms
    );
    println!("{}", serde_json::to_string_pretty(&metrics.snapshot().stages)?);

    Ok(())
}
