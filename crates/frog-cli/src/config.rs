//! TOML configuration deserialisation for retrieval jobs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use frog_core::trace::{AcquisitionGrid, TraceLayout};
use frog_core::{Algorithm, ComplexField, Config, GpStrategy, Grid, PtSchedule, SeedKind, SeedOptions};
use serde::Deserialize;

/// Top-level job configuration.
#[derive(Debug, Deserialize)]
pub struct JobConfig {
    pub retrieval: RetrievalConfig,
    pub trace: TraceConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Retrieval parameters from TOML.
#[derive(Debug, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub algorithm: Algorithm,
    pub grid_size: usize,
    #[serde(default = "default_time_step")]
    pub time_step: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default)]
    pub seed: SeedChoice,
    /// Field CSV for `seed = "custom"`, relative to the job file.
    pub seed_file: Option<PathBuf>,
    #[serde(default)]
    pub phase_noise: f64,
    #[serde(default = "default_rng_seed")]
    pub rng_seed: u64,
    /// Compute backend: "auto", "cpu", or "serial". Default: "auto".
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub gp: GpStrategy,
    #[serde(default)]
    pub pt: PtSchedule,
    /// Print a progress line every this many iterations.
    #[serde(default = "default_report_every")]
    pub report_every: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedChoice {
    #[default]
    Autocorrelation,
    Gaussian,
    Custom,
}

fn default_time_step() -> f64 {
    1.0
}
fn default_max_iterations() -> usize {
    500
}
fn default_tolerance() -> f64 {
    1e-4
}
fn default_rng_seed() -> u64 {
    SeedOptions::default().rng_seed
}
fn default_backend() -> String {
    "auto".into()
}
fn default_report_every() -> usize {
    10
}

/// Measured trace file and its sampling.
#[derive(Debug, Deserialize)]
pub struct TraceConfig {
    /// CSV matrix, relative to the job file.
    pub file: PathBuf,
    /// Delay step of the raw array. Default: the retrieval time step.
    pub delay_step: Option<f64>,
    /// Frequency step of the raw array. Default: `1 / (N dt)`.
    pub frequency_step: Option<f64>,
    #[serde(default)]
    pub layout: TraceLayout,
    #[serde(default)]
    pub background: f64,
}

/// Output configuration.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Output directory (default: "./output").
    #[serde(default = "default_output_dir")]
    pub directory: String,
    /// Whether to save the retrieved spectrogram (default: true).
    #[serde(default = "default_true")]
    pub save_trace: bool,
    /// Whether to also save a JSON summary (default: false).
    #[serde(default)]
    pub save_json: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            save_trace: true,
            save_json: false,
        }
    }
}

fn default_output_dir() -> String {
    "./output".into()
}
fn default_true() -> bool {
    true
}

impl JobConfig {
    /// Core configuration for this job. `custom_seed` must be given when the
    /// job asks for a custom seed.
    pub fn core_config(&self, custom_seed: Option<ComplexField>) -> Result<Config> {
        let r = &self.retrieval;
        let seed = match (r.seed, custom_seed) {
            (SeedChoice::Autocorrelation, _) => SeedKind::Autocorrelation,
            (SeedChoice::Gaussian, _) => SeedKind::Gaussian,
            (SeedChoice::Custom, Some(field)) => SeedKind::Custom(field),
            (SeedChoice::Custom, None) => anyhow::bail!("seed = \"custom\" requires seed_file"),
        };
        let config = Config::new(r.grid_size, r.algorithm, seed, r.max_iterations, r.tolerance)?
            .with_time_step(r.time_step)?
            .with_gp_strategy(r.gp)?
            .with_pt_schedule(r.pt)?
            .with_seed_options(SeedOptions {
                phase_noise: r.phase_noise,
                rng_seed: r.rng_seed,
            })?;
        Ok(config)
    }

    /// Sampling of the raw trace, with grid-derived defaults filled in.
    pub fn acquisition(&self, grid: &Grid) -> AcquisitionGrid {
        AcquisitionGrid {
            delay_step: self.trace.delay_step.unwrap_or(grid.dt()),
            frequency_step: self.trace.frequency_step.unwrap_or(grid.df()),
            layout: self.trace.layout,
            background: self.trace.background,
        }
    }

    /// Check everything that can be checked without reading data files.
    pub fn validate(&self) -> Result<()> {
        let placeholder = match self.retrieval.seed {
            SeedChoice::Custom => {
                if self.retrieval.seed_file.is_none() {
                    anyhow::bail!("seed = \"custom\" requires seed_file");
                }
                Some(ComplexField::zeros(self.retrieval.grid_size))
            }
            _ => None,
        };
        let config = self.core_config(placeholder)?;
        let grid = config.grid()?;
        let acquisition = self.acquisition(&grid);
        for (name, value) in [
            ("delay_step", acquisition.delay_step),
            ("frequency_step", acquisition.frequency_step),
        ] {
            if !(value.is_finite() && value > 0.0) {
                anyhow::bail!("trace.{name} must be finite and positive, got {value}");
            }
        }
        match self.retrieval.backend.as_str() {
            "auto" | "cpu" | "serial" => {}
            other => anyhow::bail!("Unknown backend '{other}'. Valid values: auto, cpu, serial"),
        }
        if self.retrieval.report_every == 0 {
            anyhow::bail!("report_every must be at least 1");
        }
        Ok(())
    }
}

/// Load and parse a TOML job configuration file.
pub fn load_config(path: &Path) -> Result<JobConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid job file {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<JobConfig> {
    let config: JobConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Resolve a path from the job file against the job file's directory.
pub fn resolve(job_path: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        return file.to_path_buf();
    }
    job_path
        .parent()
        .map(|dir| dir.join(file))
        .unwrap_or_else(|| file.to_path_buf())
}
