//! FROG command-line interface.
//!
//! Retrieve pulses from TOML job files:
//! ```sh
//! frog-cli run job.toml
//! frog-cli validate job.toml
//! frog-cli simulate --size 128 --width 4 --chirp 0.02 -o synthetic/
//! ```

mod config;
mod runner;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "frog-cli")]
#[command(about = "SHG-FROG pulse retrieval")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve a pulse from a TOML job file.
    Run {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Output directory (overrides config file setting).
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Abort the run after this many seconds.
        #[arg(long)]
        timeout: Option<f64>,
        /// Field CSV to compare the retrieved pulse against.
        #[arg(long)]
        reference: Option<PathBuf>,
    },
    /// Validate a configuration file without running the retrieval.
    Validate {
        /// Path to the job configuration file.
        config: PathBuf,
    },
    /// Simulate the trace of a known pulse.
    Simulate {
        /// Grid size N (even).
        #[arg(long, default_value_t = 64)]
        size: usize,
        /// Time step.
        #[arg(long, default_value_t = 1.0)]
        dt: f64,
        /// RMS width of the Gaussian pulse.
        #[arg(long, default_value_t = 4.0)]
        width: f64,
        /// Linear chirp of the Gaussian pulse.
        #[arg(long, default_value_t = 0.0)]
        chirp: f64,
        /// Read the pulse from a field CSV instead of synthesising it.
        #[arg(long)]
        field: Option<PathBuf>,
        /// Output directory.
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, output, timeout, reference } => {
            println!("FROG Retrieval");
            println!("==============");
            let job = config::load_config(&config)?;
            println!("Configuration: {}", config.display());

            let timeout = match timeout {
                Some(secs) if !(secs.is_finite() && secs > 0.0) => {
                    anyhow::bail!("--timeout must be a positive number of seconds, got {}", secs)
                }
                Some(secs) => Some(Duration::from_secs_f64(secs)),
                None => None,
            };
            let result = runner::run_retrieval(&config, &job, timeout)?;

            let out_dir = output.unwrap_or_else(|| PathBuf::from(&job.output.directory));
            runner::write_outputs(&result, &job, &out_dir)?;

            if let Some(reference) = reference {
                let distance = runner::compare_reference(&result.result, &reference)?;
                println!("Distance to reference (modulo ambiguities): {:.6e}", distance);
            }

            println!("Retrieval complete.");
            Ok(())
        }
        Commands::Validate { config } => {
            let _job = config::load_config(&config)?;
            println!("Configuration is valid: {}", config.display());
            Ok(())
        }
        Commands::Simulate { size, dt, width, chirp, field, output } => {
            let params = runner::SimulateParams { size, dt, width, chirp };
            let (grid, pulse, trace) = runner::simulate(&params, field.as_deref())?;
            runner::write_trace_csv(&trace, &output.join("trace.csv"), &grid)?;
            runner::write_field_csv(&pulse, &grid.time_axis(), "t", &output.join("field.csv"), None)?;
            println!("Simulation complete.");
            Ok(())
        }
    }
}
