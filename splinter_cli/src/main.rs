use splinter_core::config::SplinterConfig;
use splinter_core::session::{SessionOutcome, run_session};

use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::process::ExitCode;

const DEFAULT_CONFIG: &str = "splinter.toml";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Path to the binary to be fuzz tested
    binary: String,
    /// Sample input the candidates are derived from
    seed: PathBuf,
    /// Maximum number of iterations [default: 5000]
    #[clap(short, long)]
    times: Option<u64>,
    #[clap(short, long, value_parser)]
    config: Option<PathBuf>,
    /// Per-iteration deadline in milliseconds [default: 500]
    #[clap(long)]
    timeout_ms: Option<u64>,
    /// Directory the crash or timeout input is written to [default: .]
    #[clap(long)]
    artifact_dir: Option<PathBuf>,
    /// Seed for the mutation RNG, for reproducible runs
    #[clap(long)]
    rng_seed: Option<u64>,
}

fn load_config(cli: &Cli) -> Result<SplinterConfig, anyhow::Error> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {path:?}");
            SplinterConfig::load_from_file(path)?
        }
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG);
            if default_path.exists() {
                info!("Loading default configuration {default_path:?}");
                SplinterConfig::load_from_file(&default_path)?
            } else {
                SplinterConfig::default()
            }
        }
    };

    if let Some(times) = cli.times {
        config.session.max_iterations = times;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.session.timeout_ms = timeout_ms;
    }
    if let Some(dir) = &cli.artifact_dir {
        config.session.artifact_dir = dir.clone();
    }
    if cli.rng_seed.is_some() {
        config.session.rng_seed = cli.rng_seed;
    }
    Ok(config)
}

fn print_summary(outcome: &SessionOutcome) {
    if let Some(finding) = &outcome.finding {
        let report = &finding.report;
        match &report.signal_name {
            Some(name) => println!("Program crashed: {} ({name})", report.description),
            None => println!("Program timed out: {}", report.description),
        }
        println!("\tinput md5: {}", report.input_hash);
        println!("Dumped bad input to {}", finding.artifact.display());
    }
    println!(
        "Session finished in {:.2?}: {} iterations, {}",
        outcome.elapsed,
        outcome.iterations,
        match &outcome.finding {
            Some(f) => format!("{} on iteration {}", f.report.kind, f.iteration),
            None => "no findings".to_string(),
        }
    );
}

fn run(cli: Cli) -> Result<(), anyhow::Error> {
    let config = load_config(&cli)?;
    let outcome = run_session(&cli.binary, &cli.seed, &config, |report| {
        println!("{report}");
    })?;
    print_summary(&outcome);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
