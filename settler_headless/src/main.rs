// CLI entry point for the headless settler runner.
//
// Loads a JSON scenario (see `scenario.rs`), runs it to completion without
// any renderer, and prints the narrative events as JSON lines followed by a
// per-state summary of where every agent ended up. Useful for reproducing
// behavior bugs from a recorded command log and for soak-testing the
// scheduler with `--check`.
//
// Usage:
//   settler-headless --scenario <PATH> [OPTIONS]
//     --ticks <N>       Override the scenario's tick count
//     --seed <N>        Override the scenario's seed
//     --check           Validate scheduler invariants after every tick
//     --quiet           Print only the summary, not the event stream
//     --snapshot        Print the final agent snapshot as JSON
//
// Logging goes to stderr through `tracing-subscriber`; set `RUST_LOG` to
// adjust (default `info`).

mod scenario;

use std::collections::BTreeMap;
use std::path::PathBuf;

use scenario::{RunOptions, Scenario};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

struct Args {
    scenario: PathBuf,
    ticks: Option<u64>,
    seed: Option<u64>,
    check: bool,
    quiet: bool,
    snapshot: bool,
}

fn main() {
    let args = parse_args();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let mut scenario = match Scenario::load(&args.scenario) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to load scenario: {e}");
            std::process::exit(1);
        }
    };
    if let Some(seed) = args.seed {
        scenario.seed = seed;
    }

    info!(
        path = %args.scenario.display(),
        seed = scenario.seed,
        commands = scenario.commands.len(),
        "running scenario"
    );

    let outcome = match scenario.run(RunOptions {
        check: args.check,
        ticks: args.ticks,
    }) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("{e}");
            std::process::exit(2);
        }
    };

    if !args.quiet {
        for event in &outcome.events {
            match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(e) => error!("failed to serialize event: {e}"),
            }
        }
    }

    if args.snapshot {
        match outcome.sim.snapshot_json() {
            Ok(json) => println!("{json}"),
            Err(e) => error!("failed to serialize snapshot: {e}"),
        }
    }

    let mut by_state: BTreeMap<String, usize> = BTreeMap::new();
    for agent in outcome.sim.snapshot() {
        *by_state.entry(agent.state.to_string()).or_default() += 1;
    }
    eprintln!(
        "tick {}: {} agents, {} events",
        outcome.sim.tick,
        outcome.sim.agents.len(),
        outcome.events.len()
    );
    for (state, count) in &by_state {
        eprintln!("  {state:<18} {count}");
    }
}

/// Parse command-line arguments. Uses simple `std::env::args()` matching.
fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut scenario = None;
    let mut parsed = Args {
        scenario: PathBuf::new(),
        ticks: None,
        seed: None,
        check: false,
        quiet: false,
        snapshot: false,
    };
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--scenario" => {
                i += 1;
                scenario = Some(args.get(i).map(PathBuf::from).unwrap_or_else(|| {
                    eprintln!("--scenario requires a path");
                    std::process::exit(1);
                }));
            }
            "--ticks" => {
                i += 1;
                parsed.ticks = Some(args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--ticks requires a valid number");
                    std::process::exit(1);
                }));
            }
            "--seed" => {
                i += 1;
                parsed.seed = Some(args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--seed requires a valid number");
                    std::process::exit(1);
                }));
            }
            "--check" => parsed.check = true,
            "--quiet" | "-q" => parsed.quiet = true,
            "--snapshot" => parsed.snapshot = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed.scenario = scenario.unwrap_or_else(|| {
        eprintln!("--scenario is required");
        print_usage();
        std::process::exit(1);
    });
    parsed
}

fn print_usage() {
    println!("Usage: settler-headless --scenario <PATH> [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --scenario <PATH>   Scenario JSON file (required)");
    println!("  --ticks <N>         Override the scenario's tick count");
    println!("  --seed <N>          Override the scenario's seed");
    println!("  --check             Validate invariants after every tick");
    println!("  --quiet, -q         Print only the summary");
    println!("  --snapshot          Print the final agent snapshot as JSON");
    println!("  --help, -h          Show this help");
}
