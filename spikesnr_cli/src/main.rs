//! Command-line front end for `spikesnr`.
//!
//! Examples:
//!   spikesnr demo
//!   spikesnr demo --seed 7
//!   spikesnr generate --config obs.json --timepoints 2000 --latent 3
//!
//! Logs go to stderr; set `RUST_LOG=debug` to follow the gain search.

use std::path::PathBuf;
use std::process;

use ndarray::{Array1, Array2};
use serde::Serialize;
use spikesnr::prelude::*;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Spike(#[from] SpikeError),
}

enum Command {
    Help,
    Demo {
        seed: u64,
    },
    Generate {
        config: Option<PathBuf>,
        timepoints: usize,
        latent: usize,
        seed: u64,
    },
}

#[derive(Debug, Serialize)]
struct Summary {
    neurons: usize,
    timepoints: usize,
    snr: f64,
    outcome: Outcome,
    coherence: f64,
    mean_rate: f64,
    peak_rate: f64,
    total_spikes: u64,
}

impl Summary {
    fn new(
        counts: &Array2<u64>,
        rates: &Array2<f64>,
        snr: f64,
        outcome: Outcome,
        coherence: f64,
    ) -> Self {
        let (timepoints, neurons) = rates.dim();
        Self {
            neurons,
            timepoints,
            snr,
            outcome,
            coherence,
            mean_rate: rates.mean().unwrap_or(0.0),
            peak_rate: rates.fold(0.0, |m: f64, &r| m.max(r)),
            total_spikes: counts.sum(),
        }
    }
}

fn usage() -> &'static str {
    "spikesnr: synthetic spike counts with a calibrated SNR\n\
     Usage: spikesnr <command> [options]\n\n\
     Commands:\n\
     \x20 demo [--seed N]                      2-D AR(1) latent, 50 neurons, 10 dB target\n\
     \x20 generate [--config file.json]        Run the observation pipeline, print a JSON summary\n\
     \x20          [--timepoints T] [--latent d] [--seed N]\n\
     \x20 help | --help                        Show this message"
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<&String>) -> Result<T, CliError> {
    let raw = value.ok_or_else(|| CliError::Usage(format!("{flag} needs a value")))?;
    raw.parse()
        .map_err(|_| CliError::Usage(format!("invalid value for {flag}: '{raw}'")))
}

fn parse_args(args: &[String]) -> Result<Command, CliError> {
    let Some((cmd, rest)) = args.split_first() else {
        return Err(CliError::Usage("missing command".to_string()));
    };

    let mut seed = 0u64;
    let mut config = None;
    let mut timepoints = 1000usize;
    let mut latent = 4usize;

    let mut it = rest.iter();
    while let Some(flag) = it.next() {
        match (cmd.as_str(), flag.as_str()) {
            (_, "--seed") => seed = parse_value(flag, it.next())?,
            ("generate", "--config") => config = Some(parse_value::<PathBuf>(flag, it.next())?),
            ("generate", "--timepoints") => timepoints = parse_value(flag, it.next())?,
            ("generate", "--latent") => latent = parse_value(flag, it.next())?,
            _ => return Err(CliError::Usage(format!("unexpected argument '{flag}'"))),
        }
    }

    match cmd.as_str() {
        "help" | "--help" | "-h" => Ok(Command::Help),
        "demo" => Ok(Command::Demo { seed }),
        "generate" => Ok(Command::Generate {
            config,
            timepoints,
            latent,
            seed,
        }),
        other => Err(CliError::Usage(format!("unknown command '{other}'"))),
    }
}

fn demo(seed: u64) -> Result<(), CliError> {
    let mut rng = Prng::new(seed);
    let x = ar1_trajectory(1000, 2, 0.95, &mut rng)?;

    // 0.3 sits under the Welch floor for 50 neurons in 2-D; the synthesis
    // reports how close it got.
    let synth = synthesize_with_report(2, 50, 0.3, 0.0, &CoherenceSchedule::default(), &mut rng)?;
    println!(
        "loading: 50x2, coherence {:.3} (target 0.300, floor {:.3}, reached {})",
        synth.coherence,
        coherence_floor(2, 50),
        synth.reached
    );

    let target = CalibrationTarget::new(0.01, 1.0, 10.0);
    let ct = synth.loading.t().to_owned();
    let (bias, _) = MeanRateMatcher.match_rate(&x, &ct, &Array1::zeros(50), target.target_rate)?;
    let config = CalibrationConfig::default().with_tolerance(0.1);
    let cal = calibrate(&x, &synth.loading, &bias, &target, FisherSnrBound, config)?;
    println!(
        "calibration: {:?} after {} rounds, SNR {:.2} dB (target {:.1})",
        cal.outcome, cal.iterations, cal.snr, target.target_snr
    );

    let rates = firing_rates(&x, &cal.loading.t().to_owned(), &cal.bias)?;
    let counts = rates.mapv(|r| rng.poisson(r));
    let summary = Summary::new(
        &counts,
        &rates,
        cal.snr,
        cal.outcome,
        compute_coherence(&cal.loading.t().to_owned()),
    );
    println!(
        "spikes: {} total, mean rate {:.4}/bin, peak rate {:.4}/bin",
        summary.total_spikes, summary.mean_rate, summary.peak_rate
    );
    Ok(())
}

fn generate(
    config: Option<PathBuf>,
    timepoints: usize,
    latent: usize,
    seed: u64,
) -> Result<(), CliError> {
    let cfg: ObservationConfig = match config {
        Some(path) => {
            let text = std::fs::read_to_string(&path).map_err(|source| CliError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&text)?
        }
        None => ObservationConfig::default(),
    };
    info!(?cfg, timepoints, latent, seed, "generating observations");

    let mut rng = Prng::new(seed);
    let x = ar1_trajectory(timepoints, latent, 0.95, &mut rng)?;
    let obs = generate_observations(&x, None, &cfg, FisherSnrBound, &mut rng)?;

    let summary = Summary::new(&obs.counts, &obs.rates, obs.snr, obs.outcome, obs.coherence);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run(cmd: Command) -> Result<(), CliError> {
    match cmd {
        Command::Help => {
            println!("{}", usage());
            Ok(())
        }
        Command::Demo { seed } => demo(seed),
        Command::Generate {
            config,
            timepoints,
            latent,
            seed,
        } => generate(config, timepoints, latent, seed),
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = parse_args(&args).and_then(run);

    if let Err(e) = result {
        eprintln!("error: {e}");
        match e {
            CliError::Usage(_) => {
                eprintln!("\n{}", usage());
                process::exit(2);
            }
            _ => process::exit(1),
        }
    }
}
