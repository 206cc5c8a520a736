//! Retrieval runner: ties together trace loading, the controller and output.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ndarray::Array2;
use num_complex::Complex64;
use serde::Serialize;

use frog_compute::{ComputeBackend, CpuBackend, SerialBackend};
use frog_core::forward::ForwardModel;
use frog_core::trace::prepare_trace;
use frog_core::{
    CancelToken, ComplexField, Config, Grid, MeasuredTrace, Progress, Reconstruction,
    RetrievalResult, Status,
};

use crate::config::{self, JobConfig, SeedChoice};

/// A finished run together with what is needed to write it out.
pub struct RetrievalOutput {
    pub result: RetrievalResult,
    pub config: Config,
    pub backend: Arc<dyn ComputeBackend>,
}

/// Load the trace (and custom seed), run the reconstruction to completion and
/// return its result.
pub fn run_retrieval(job_path: &Path, job: &JobConfig, timeout: Option<Duration>) -> Result<RetrievalOutput> {
    let custom_seed = match (job.retrieval.seed, &job.retrieval.seed_file) {
        (SeedChoice::Custom, Some(file)) => {
            let path = config::resolve(job_path, file);
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read seed file {}", path.display()))?;
            Some(parse_field_csv(&text).with_context(|| format!("Invalid seed file {}", path.display()))?)
        }
        _ => None,
    };
    let config = job.core_config(custom_seed)?;
    let grid = config.grid()?;

    let trace_path = config::resolve(job_path, &job.trace.file);
    let text = std::fs::read_to_string(&trace_path)
        .with_context(|| format!("Failed to read trace {}", trace_path.display()))?;
    let raw = parse_matrix_csv(&text).with_context(|| format!("Invalid trace {}", trace_path.display()))?;
    println!(
        "  Trace: {}x{} raw samples from {}",
        raw.nrows(),
        raw.ncols(),
        trace_path.display()
    );
    let acquisition = job.acquisition(&grid);
    log::debug!("Resampling trace with {:?}", acquisition);
    let trace = prepare_trace(raw.view(), &acquisition, &grid)?;

    let backend = create_backend(&job.retrieval.backend)?;
    let info = backend.device_info();
    println!("  Backend: {} ({} threads)", info.name, info.worker_threads);

    let reconstruction = Reconstruction::with_backend(config.clone(), &trace, Arc::clone(&backend))?;
    println!(
        "  Seed error: {:.4e}",
        reconstruction.state().best_error
    );

    let every = job.retrieval.report_every;
    let report = move |p: Progress| {
        if p.iteration % every == 0 || p.status.is_terminal() {
            println!("  iter {:>6}  G = {:.6e}  [{}]", p.iteration, p.g, p.status);
        }
    };
    let cancel = match timeout {
        Some(limit) => CancelToken::with_timeout(limit),
        None => CancelToken::new(),
    };
    let handle = frog_core::spawn(reconstruction, Some(Box::new(report)), cancel);
    let result = handle.join()?;

    println!(
        "Finished: {} after {} iterations, G = {:.6e} (best {:.6e})",
        result.status,
        result.iterations,
        result.final_error().unwrap_or(result.best_error),
        result.best_error
    );
    if result.status == Status::Diverged {
        eprintln!("Warning: retrieval diverged; writing the last finite field");
    }

    Ok(RetrievalOutput { result, config, backend })
}

/// Build a compute backend from its configuration name.
pub fn create_backend(name: &str) -> Result<Arc<dyn ComputeBackend>> {
    Ok(match name {
        "auto" => frog_compute::default_backend(),
        "cpu" => Arc::new(CpuBackend::new()),
        "serial" => Arc::new(SerialBackend),
        other => anyhow::bail!("Unknown backend '{}'. Valid values: auto, cpu, serial", other),
    })
}

/// Parse a numeric CSV matrix. Blank lines, `#` comments and a non-numeric
/// header line are skipped; every data row must have the same width.
pub fn parse_matrix_csv(text: &str) -> Result<Array2<f64>> {
    let mut values = Vec::new();
    let mut cols = None;
    let mut rows = 0;
    for (lineno, line) in data_lines(text) {
        let row = parse_row(line).with_context(|| format!("line {}", lineno + 1))?;
        match cols {
            None => cols = Some(row.len()),
            Some(c) if c != row.len() => {
                anyhow::bail!("line {}: expected {} columns, found {}", lineno + 1, c, row.len())
            }
            Some(_) => {}
        }
        values.extend(row);
        rows += 1;
    }
    let cols = cols.context("no numeric rows found")?;
    Ok(Array2::from_shape_vec((rows, cols), values)?)
}

/// Parse a field from CSV: either `re,im` rows or the five-column
/// `t,intensity,phase,re,im` rows written by [`write_field_csv`].
pub fn parse_field_csv(text: &str) -> Result<ComplexField> {
    let matrix = parse_matrix_csv(text)?;
    let (re, im) = match matrix.ncols() {
        2 => (0, 1),
        5 => (3, 4),
        n => anyhow::bail!("field CSV needs 2 (re,im) or 5 (t,intensity,phase,re,im) columns, found {}", n),
    };
    Ok(matrix
        .rows()
        .into_iter()
        .map(|r| Complex64::new(r[re], r[im]))
        .collect::<Vec<_>>()
        .into())
}

fn data_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut header_seen = false;
    text.lines()
        .enumerate()
        .map(|(i, l)| (i, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'))
        .filter(move |(_, l)| {
            // One leading header row is allowed.
            let is_header = !header_seen && l.split(',').any(|c| c.trim().parse::<f64>().is_err());
            header_seen = true;
            !is_header
        })
}

fn parse_row(line: &str) -> Result<Vec<f64>> {
    line.split(',')
        .map(|cell| {
            let cell = cell.trim();
            cell.parse::<f64>()
                .with_context(|| format!("'{}' is not a number", cell))
        })
        .collect()
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn write_header(file: &mut impl Write, title: &str, result: Option<&RetrievalResult>) -> Result<()> {
    writeln!(file, "# FROG Retrieval - {}", title)?;
    writeln!(file, "# Version: {}", env!("CARGO_PKG_VERSION"))?;
    if let Some(result) = result {
        writeln!(file, "# status: {}", result.status)?;
        writeln!(file, "# iterations: {}", result.iterations)?;
        writeln!(file, "# best_error: {:.6e}", result.best_error)?;
    }
    writeln!(file, "#")?;
    Ok(())
}

/// Write a field as `x,intensity,phase,re,im` rows along `axis`, where `x` is
/// named by `axis_name` (`t` for time, `f` for frequency).
pub fn write_field_csv(
    field: &ComplexField,
    axis: &[f64],
    axis_name: &str,
    path: &Path,
    result: Option<&RetrievalResult>,
) -> Result<()> {
    create_parent(path)?;
    let mut file = std::fs::File::create(path)?;
    let title = if axis_name == "t" { "Field" } else { "Spectrum" };
    write_header(&mut file, title, result)?;
    writeln!(file, "{},intensity,phase,re,im", axis_name)?;
    let phase = field.unwrapped_phase();
    for (k, (&x, c)) in axis.iter().zip(field.as_slice()).enumerate() {
        writeln!(
            file,
            "{:.6},{:.6e},{:.6},{:.6e},{:.6e}",
            x,
            c.norm_sqr(),
            phase[k],
            c.re,
            c.im
        )?;
    }
    println!("Field written to {}", path.display());
    Ok(())
}

/// Write the per-iteration G errors.
pub fn write_errors_csv(result: &RetrievalResult, path: &Path) -> Result<()> {
    create_parent(path)?;
    let mut file = std::fs::File::create(path)?;
    write_header(&mut file, "Error History", Some(result))?;
    writeln!(file, "iteration,g")?;
    for (i, g) in result.errors.iter().enumerate() {
        writeln!(file, "{},{:.6e}", i + 1, g)?;
    }
    println!("Error history written to {}", path.display());
    Ok(())
}

/// Write a spectrogram as a delay-major matrix (one row per delay).
pub fn write_trace_csv(trace: &Array2<f64>, path: &Path, grid: &Grid) -> Result<()> {
    create_parent(path)?;
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "# FROG Retrieval - Spectrogram")?;
    writeln!(file, "# rows: delays, dt = {}", grid.dt())?;
    writeln!(file, "# columns: frequencies, df = {}", grid.df())?;
    writeln!(file, "#")?;
    for row in trace.rows() {
        let line: Vec<String> = row.iter().map(|v| format!("{:.6e}", v)).collect();
        writeln!(file, "{}", line.join(","))?;
    }
    println!("Spectrogram written to {}", path.display());
    Ok(())
}

#[derive(Serialize)]
struct ResultSummary<'a> {
    status: Status,
    iterations: usize,
    final_error: Option<f64>,
    best_error: f64,
    duration_fwhm: Option<f64>,
    bandwidth_fwhm: Option<f64>,
    errors: &'a [f64],
    time: Vec<f64>,
    field_re: Vec<f64>,
    field_im: Vec<f64>,
}

/// Write a JSON summary of the run.
pub fn write_result_json(result: &RetrievalResult, grid: &Grid, path: &Path) -> Result<()> {
    create_parent(path)?;
    let summary = ResultSummary {
        status: result.status,
        iterations: result.iterations,
        final_error: result.final_error(),
        best_error: result.best_error,
        duration_fwhm: result.duration_fwhm,
        bandwidth_fwhm: result.bandwidth_fwhm,
        errors: &result.errors,
        time: grid.time_axis(),
        field_re: result.field.as_slice().iter().map(|c| c.re).collect(),
        field_im: result.field.as_slice().iter().map(|c| c.im).collect(),
    };
    let json = serde_json::to_string_pretty(&summary)?;
    std::fs::write(path, json)?;
    println!("JSON summary written to {}", path.display());
    Ok(())
}

/// Write every output the job asks for into `out_dir`.
pub fn write_outputs(output: &RetrievalOutput, job: &JobConfig, out_dir: &Path) -> Result<()> {
    let grid = output.config.grid()?;
    let result = &output.result;

    write_field_csv(&result.field, &grid.time_axis(), "t", &out_dir.join("field.csv"), Some(result))?;
    write_field_csv(
        &result.spectrum,
        &grid.frequency_axis(),
        "f",
        &out_dir.join("spectrum.csv"),
        Some(result),
    )?;
    write_errors_csv(result, &out_dir.join("errors.csv"))?;

    if job.output.save_trace {
        let model = ForwardModel::new(grid, Arc::clone(&output.backend));
        let retrieved = model.simulate(&result.field)?;
        write_trace_csv(&retrieved, &out_dir.join("retrieved_trace.csv"), &grid)?;
    }
    if job.output.save_json {
        write_result_json(result, &grid, &out_dir.join("result.json"))?;
    }
    Ok(())
}

/// Compare a retrieved field against a reference field file, modulo the
/// trivial ambiguities.
pub fn compare_reference(result: &RetrievalResult, reference: &Path) -> Result<f64> {
    let text = std::fs::read_to_string(reference)
        .with_context(|| format!("Failed to read reference {}", reference.display()))?;
    let field = parse_field_csv(&text)?;
    if field.len() != result.field.len() {
        anyhow::bail!(
            "reference has {} samples, retrieved field has {}",
            field.len(),
            result.field.len()
        );
    }
    Ok(frog_core::metric::field_distance(&field, &result.field))
}

/// Parameters of a synthetic Gaussian pulse.
pub struct SimulateParams {
    pub size: usize,
    pub dt: f64,
    pub width: f64,
    pub chirp: f64,
}

/// Simulate the trace of a known pulse. The pulse is either read from a field
/// CSV or synthesised as a chirped Gaussian.
pub fn simulate(params: &SimulateParams, field_file: Option<&Path>) -> Result<(Grid, ComplexField, Array2<f64>)> {
    let grid = Grid::new(params.size, params.dt)?;
    let field = match field_file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read field {}", path.display()))?;
            let field = parse_field_csv(&text)?;
            if field.len() != grid.size() {
                anyhow::bail!("field has {} samples, grid size is {}", field.len(), grid.size());
            }
            field
        }
        None => grid
            .gaussian_field(params.width, params.chirp)
            .normalised()
            .context("pulse width too small for the grid")?,
    };
    let model = ForwardModel::new(grid, frog_compute::default_backend());
    let trace = model.simulate(&field)?;
    // Validates the synthetic trace like a measured one.
    MeasuredTrace::new(trace.clone())?;
    Ok((grid, field, trace))
}
