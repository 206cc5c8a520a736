//! End-to-end retrieval: simulate a trace from a known pulse, reconstruct it,
//! and compare against the reference pulse modulo the trivial SHG-FROG ambiguities.

use std::sync::Arc;

use frog_compute::{CpuBackend, SerialBackend};
use frog_core::forward::ForwardModel;
use frog_core::metric::field_distance;
use frog_core::seed::initial_field;
use frog_core::{
    Algorithm, CancelToken, ComplexField, Config, ConfigError, Grid, GridError, MeasuredTrace,
    Reconstruction, SeedKind, SeedOptions, Status, TraceError,
};
use ndarray::Array2;
use num_complex::Complex64;

fn simulate(grid: Grid, field: &ComplexField) -> MeasuredTrace {
    let model = ForwardModel::new(grid, Arc::new(SerialBackend));
    MeasuredTrace::new(model.simulate(field).unwrap()).unwrap()
}

#[test]
fn test_gp_converges_on_small_gaussian() {
    let grid = Grid::new(16, 1.0).unwrap();
    let reference = grid.gaussian_field(1.2, 0.0).normalised().unwrap();
    let trace = simulate(grid, &reference);

    let config = Config::new(16, Algorithm::Gp, SeedKind::Gaussian, 200, 1e-3).unwrap();
    let mut r = Reconstruction::new(config, &trace).unwrap();
    let status = r.run(&CancelToken::new(), |_| {}).unwrap();
    let result = r.into_result();

    assert_eq!(status, Status::Converged);
    assert!(result.iterations <= 200);
    assert!(result.final_error().unwrap() <= 1e-3);
    assert!(field_distance(&reference, &result.field) < 1e-2);
}

#[test]
fn test_pt_recovers_transform_limited_pulse() {
    let grid = Grid::new(32, 1.0).unwrap();
    let reference = grid.gaussian_field(2.5, 0.0).normalised().unwrap();
    let trace = simulate(grid, &reference);

    let config = Config::new(32, Algorithm::Pt, SeedKind::Gaussian, 200, 1e-3).unwrap();
    let mut r = Reconstruction::new(config, &trace).unwrap();
    assert_eq!(r.run(&CancelToken::new(), |_| {}).unwrap(), Status::Converged);
    let result = r.into_result();
    assert!(field_distance(&reference, &result.field) < 1e-2);
    assert!(result.duration_fwhm.is_some());
    assert!(result.bandwidth_fwhm.is_some());
}

#[test]
fn test_chirped_pulse_error_improves() {
    let grid = Grid::new(32, 1.0).unwrap();
    let reference = grid.gaussian_field(2.5, 0.08).normalised().unwrap();
    let trace = simulate(grid, &reference);

    for algorithm in [Algorithm::Gp, Algorithm::Pt] {
        let config = Config::new(32, algorithm, SeedKind::Autocorrelation, 60, 1e-6)
            .unwrap()
            .with_seed_options(SeedOptions { phase_noise: 0.5, rng_seed: 11 })
            .unwrap();
        let mut r = Reconstruction::new(config, &trace).unwrap();
        let seed_error = r.state().best_error;
        r.run(&CancelToken::new(), |_| {}).unwrap();
        let result = r.into_result();
        assert!(result.status.is_terminal());
        assert!(
            result.best_error < seed_error,
            "{algorithm:?}: best {} vs seed {seed_error}",
            result.best_error
        );
    }
}

#[test]
fn test_both_algorithms_recover_chirped_pulse() {
    let grid = Grid::new(64, 1.0).unwrap();
    let reference = grid.gaussian_field(4.0, 0.03).normalised().unwrap();
    let trace = simulate(grid, &reference);

    for algorithm in [Algorithm::Gp, Algorithm::Pt] {
        let config = Config::new(64, algorithm, SeedKind::Gaussian, 5000, 1e-5).unwrap();
        let mut r = Reconstruction::new(config, &trace).unwrap();
        r.run(&CancelToken::new(), |_| {}).unwrap();
        let result = r.into_result();

        assert!(result.status.is_terminal());
        let distance = field_distance(&reference, &result.field);
        assert!(distance < 1e-2, "{algorithm:?}: distance {distance}, g {:?}", result.final_error());
    }
}

#[test]
fn test_gp_split_run_matches_continuous_run() {
    let grid = Grid::new(16, 1.0).unwrap();
    let trace = simulate(grid, &grid.gaussian_field(1.8, 0.1).normalised().unwrap());
    let config = |seed, iterations| Config::new(16, Algorithm::Gp, seed, iterations, 1e-12).unwrap();

    let mut whole = Reconstruction::new(config(SeedKind::Autocorrelation, 10), &trace).unwrap();
    whole.run(&CancelToken::new(), |_| {}).unwrap();

    let mut first = Reconstruction::new(config(SeedKind::Autocorrelation, 4), &trace).unwrap();
    first.run(&CancelToken::new(), |_| {}).unwrap();
    let resumed_seed = SeedKind::Custom(first.state().field.clone());
    let mut second = Reconstruction::new(config(resumed_seed, 6), &trace).unwrap();
    second.run(&CancelToken::new(), |_| {}).unwrap();

    assert_eq!(whole.state().field, second.state().field);
    assert_eq!(&whole.state().errors[4..], &second.state().errors[..]);
}

#[test]
fn test_pt_stepping_matches_continuous_run() {
    let grid = Grid::new(16, 1.0).unwrap();
    let trace = simulate(grid, &grid.gaussian_field(1.8, 0.1).normalised().unwrap());
    let config = Config::new(16, Algorithm::Pt, SeedKind::Autocorrelation, 10, 1e-12).unwrap();

    let mut whole = Reconstruction::new(config.clone(), &trace).unwrap();
    whole.run(&CancelToken::new(), |_| {}).unwrap();

    let mut stepped = Reconstruction::new(config, &trace).unwrap();
    for _ in 0..4 {
        stepped.step().unwrap();
    }
    let mid = stepped.snapshot();
    assert_eq!(mid.iteration, 4);
    stepped.run(&CancelToken::new(), |_| {}).unwrap();

    assert_eq!(whole.state().field, stepped.state().field);
    assert_eq!(whole.state().errors, stepped.state().errors);
}

#[test]
fn test_backends_give_identical_runs() {
    let grid = Grid::new(32, 1.0).unwrap();
    let trace = simulate(grid, &grid.gaussian_field(3.0, 0.05).normalised().unwrap());
    let config = Config::new(32, Algorithm::Gp, SeedKind::Autocorrelation, 5, 1e-12).unwrap();

    let mut serial = Reconstruction::with_backend(config.clone(), &trace, Arc::new(SerialBackend)).unwrap();
    let mut cpu = Reconstruction::with_backend(config, &trace, Arc::new(CpuBackend::new())).unwrap();
    serial.run(&CancelToken::new(), |_| {}).unwrap();
    cpu.run(&CancelToken::new(), |_| {}).unwrap();
    assert_eq!(serial.state(), cpu.state());
}

#[test]
fn test_abort_before_start_returns_seed() {
    let grid = Grid::new(16, 1.0).unwrap();
    let trace = simulate(grid, &grid.gaussian_field(1.5, 0.0).normalised().unwrap());
    let config = Config::new(16, Algorithm::Pt, SeedKind::Autocorrelation, 100, 1e-6).unwrap();
    let seed = initial_field(&trace, &config.seed, &config.seed_options, &grid).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let reconstruction = Reconstruction::new(config, &trace).unwrap();
    let handle = frog_core::spawn(reconstruction, None, cancel);
    let result = handle.join().unwrap();

    assert_eq!(result.status, Status::Aborted);
    assert_eq!(result.field, seed);
    assert!(result.errors.is_empty());
}

#[test]
fn test_background_progress_and_status() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let grid = Grid::new(16, 1.0).unwrap();
    let trace = simulate(grid, &grid.gaussian_field(1.5, 0.1).normalised().unwrap());
    let config = Config::new(16, Algorithm::Gp, SeedKind::Autocorrelation, 8, 1e-12).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let handle = frog_core::start(
        config,
        &trace,
        Some(Box::new(move |_: frog_core::Progress| {
            counter.fetch_add(1, Ordering::SeqCst);
        })),
    )
    .unwrap();
    while !handle.is_finished() {
        let snapshot = handle.status();
        assert_eq!(snapshot.errors.len(), snapshot.iteration);
        std::thread::yield_now();
    }
    let final_state = handle.status();
    let result = handle.join().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 8);
    assert_eq!(result.status, Status::MaxIterationsReached);
    assert_eq!(final_state.field, result.field);
    assert_eq!(final_state.errors, result.errors);
}

#[test]
fn test_overflowing_seed_diverges_and_keeps_field() {
    let grid = Grid::new(16, 1.0).unwrap();
    let trace = simulate(grid, &grid.gaussian_field(1.5, 0.0).normalised().unwrap());
    let huge = grid.gaussian_field(1.5, 0.0).scaled(Complex64::new(1e200, 0.0));
    let config = Config::new(16, Algorithm::Gp, SeedKind::Custom(huge.clone()), 50, 1e-3).unwrap();

    let mut r = Reconstruction::new(config, &trace).unwrap();
    assert_eq!(r.run(&CancelToken::new(), |_| {}).unwrap(), Status::Diverged);
    let result = r.into_result();
    assert_eq!(result.iterations, 1);
    assert!(!result.errors[0].is_finite());
    assert_eq!(result.field, huge);
}

#[test]
fn test_odd_sizes_rejected_before_computation() {
    assert_eq!(
        Config::new(17, Algorithm::Gp, SeedKind::Gaussian, 10, 1e-3).unwrap_err(),
        ConfigError::Grid(GridError::OddSize(17))
    );
    assert_eq!(
        MeasuredTrace::new(Array2::from_elem((17, 17), 1.0)).unwrap_err(),
        TraceError::InvalidGrid(GridError::OddSize(17))
    );
}
