//! TrackLab Simulator CLI
//!
//! Run the tracking pipeline against seeded synthetic scenarios.

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use tracklab_sim::{RunExport, ScenarioId, ScenarioResult, ScenarioRunner};
use tracklab_core::Settings;

/// TrackLab deterministic simulation CLI
#[derive(Parser, Debug)]
#[command(name = "tracklab-sim")]
#[command(about = "Run deterministic pipeline scenarios for TrackLab", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (sparse, crowded, blinking, repeat, edit_storm, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Frames rendered per scenario
    #[arg(short, long, default_value = "30")]
    frames: usize,

    /// Pipeline repetitions per scenario
    #[arg(short, long, default_value = "3")]
    repeat: usize,

    /// Settings JSON file (defaults when omitted)
    #[arg(long)]
    settings: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export run summary and statistics tables to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let settings = match &args.settings {
        Some(path) => Settings::load(path).unwrap_or_else(|e| {
            eprintln!("Error: cannot load settings from {}: {}", path, e);
            std::process::exit(1);
        }),
        None => Settings::default(),
    };

    if !args.json {
        info!("TrackLab Simulator v0.1.0");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!("{}", settings);
        info!("{}", settings.segmenter_settings);
        info!("{}", settings.tracker_settings);
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!("Available scenarios: sparse, crowded, blinking, repeat, edit_storm, all");
            std::process::exit(1);
        })]
    };

    if args.export.is_some() && scenarios.len() > 1 {
        eprintln!("Error: --export only supports a single scenario, not 'all'");
        std::process::exit(1);
    }

    // Determine seed
    let seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    let runner = ScenarioRunner::new(seed)
        .with_frames(args.frames)
        .with_repeats(args.repeat)
        .with_settings(settings.clone());

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for scenario in &scenarios {
        let result = runner.run(*scenario);

        if !args.json {
            if result.passed {
                info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
            } else {
                error!(
                    "✗ {} (seed={}) FAILED: {}",
                    scenario.name(),
                    seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }

        if let Some(path) = &args.export {
            let export = RunExport::new(&result, &settings);
            match export.write_to_file(path) {
                Ok(()) => info!("Exported {} to {}", scenario.name(), path),
                Err(e) => error!("Failed to write export: {:?}", e),
            }
        }

        if !result.passed {
            failed_count += 1;
        }

        all_results.push(result);
    }

    // Summary
    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "frames": r.frames,
                    "repetitions": r.repetitions,
                    "spots": r.final_spot_count,
                    "tracks": r.final_track_count,
                    "failure_reason": r.failure_reason,
                    "metrics": r.metrics,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Error: cannot render summary: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            for result in &all_results {
                if !result.passed {
                    error!(
                        "  - {} seed={}: {}",
                        result.scenario.name(),
                        result.seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
