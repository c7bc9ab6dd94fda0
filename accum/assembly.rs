use crate::backend::MatrixBackend;
use crate::config::{AssemblyConfig, Backend, ConfigError, Locking};
use crate::error::InvalidArgument;
use crate::locks::{LockLayout, NoopBank};
use crate::progress::{AssemblyProgress, AssemblyStage};
use crate::updater::SymmetricUpdater;
use crate::workload::Workload;
use ndarray::Array2;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Contributions processed between two progress callbacks.
const PROGRESS_STRIDE: usize = 256;

#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Update rejected: {0}")]
    Update(#[from] InvalidArgument),
    #[cfg(feature = "parallel")]
    #[error("Failed to build the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result of one assembly run.
#[derive(Debug)]
pub struct Assembly {
    /// The accumulated matrix; entries above the diagonal are zero.
    pub lower: Array2<f64>,
    pub layout: LockLayout,
    pub backend: Backend,
    pub locking: Locking,
    pub threads: usize,
    pub elapsed: Duration,
}

impl Assembly {
    /// Sum of the lower triangle, a cheap fingerprint for logs.
    pub fn checksum(&self) -> f64 {
        lower_entries(&self.lower).sum()
    }
}

/// Accumulates every contribution of `workload` into a zeroed matrix.
pub fn assemble(
    config: &AssemblyConfig,
    workload: &Workload,
    progress: &dyn AssemblyProgress,
) -> Result<Assembly, AssemblyError> {
    config.validate()?;
    let n = workload.dim();
    let threads = config.worker_threads();
    log::info!(
        "Assembling a {n}x{n} matrix from {} contributions ({} backend, {} locking, {threads} threads)",
        workload.contributions.len(),
        config.backend,
        config.locking,
    );

    let started = Instant::now();
    let (lower, layout) = match config.backend {
        Backend::Ndarray => {
            let mut alpha = Array2::<f64>::zeros((n, n));
            let layout = accumulate(&mut alpha, config, workload, progress)?;
            (alpha, layout)
        }
        Backend::Faer => {
            let mut alpha = faer::Mat::<f64>::zeros(n, n);
            let layout = accumulate(&mut alpha, config, workload, progress)?;
            let lower = Array2::from_shape_fn((n, n), |(i, j)| alpha[(i, j)]);
            (lower, layout)
        }
    };
    let elapsed = started.elapsed();
    log::info!("Assembly finished in {elapsed:.2?} using {layout}");

    Ok(Assembly {
        lower,
        layout,
        backend: config.backend,
        locking: config.locking,
        threads,
        elapsed,
    })
}

/// Recomputes the matrix serially without the updater and returns the largest
/// absolute difference from `assembly`.
pub fn verify(assembly: &Assembly, workload: &Workload, progress: &dyn AssemblyProgress) -> f64 {
    let stage = AssemblyStage::Verification;
    progress.on_stage_start(stage, workload.contributions.len());
    let reference = workload.reference_lower();
    progress.on_stage_advance(stage, workload.contributions.len());
    progress.on_stage_finish(stage);
    max_abs_difference(&assembly.lower, &reference)
}

/// Largest absolute difference between the lower triangles of two square matrices.
pub fn max_abs_difference(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    assert_eq!(a.dim(), b.dim(), "matrices must have the same shape");
    lower_entries(a)
        .zip(lower_entries(b))
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

fn lower_entries(a: &Array2<f64>) -> impl Iterator<Item = f64> + '_ {
    a.indexed_iter()
        .filter(|((i, j), _)| j <= i)
        .map(|(_, &x)| x)
}

fn accumulate<M>(
    matrix: &mut M,
    config: &AssemblyConfig,
    workload: &Workload,
    progress: &dyn AssemblyProgress,
) -> Result<LockLayout, AssemblyError>
where
    M: MatrixBackend + Send,
{
    let stage = AssemblyStage::Accumulation;
    progress.on_stage_start(stage, workload.contributions.len());
    let layout = match config.locking {
        Locking::None => {
            let updater =
                SymmetricUpdater::<_, NoopBank>::with_bank(matrix, &workload.partition, config.locks)?;
            for (done, contribution) in workload.contributions.iter().enumerate() {
                contribution.apply(&updater)?;
                if (done + 1) % PROGRESS_STRIDE == 0 {
                    progress.on_stage_advance(stage, done + 1);
                }
            }
            *updater.layout()
        }
        Locking::Mutex => accumulate_parallel(matrix, config, workload, progress)?,
    };
    progress.on_stage_advance(stage, workload.contributions.len());
    progress.on_stage_finish(stage);
    Ok(layout)
}

#[cfg(feature = "parallel")]
fn accumulate_parallel<M>(
    matrix: &mut M,
    config: &AssemblyConfig,
    workload: &Workload,
    progress: &dyn AssemblyProgress,
) -> Result<LockLayout, AssemblyError>
where
    M: MatrixBackend + Send,
{
    use crate::locks::MutexBank;
    use rayon::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    let updater =
        SymmetricUpdater::<_, MutexBank>::with_bank(matrix, &workload.partition, config.locks)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.worker_threads())
        .thread_name(|i| format!("symaccum-worker-{i}"))
        .build()?;
    let processed = AtomicUsize::new(0);
    pool.install(|| {
        workload
            .contributions
            .par_iter()
            .try_for_each(|contribution| {
                contribution.apply(&updater)?;
                let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                if done % PROGRESS_STRIDE == 0 {
                    progress.on_stage_advance(AssemblyStage::Accumulation, done);
                }
                Ok::<(), InvalidArgument>(())
            })
    })?;
    Ok(*updater.layout())
}

#[cfg(not(feature = "parallel"))]
fn accumulate_parallel<M>(
    matrix: &mut M,
    config: &AssemblyConfig,
    workload: &Workload,
    progress: &dyn AssemblyProgress,
) -> Result<LockLayout, AssemblyError>
where
    M: MatrixBackend + Send,
{
    let _ = (matrix, config, workload, progress);
    Err(AssemblyError::Config(ConfigError::Invalid(
        "mutex locking needs a build with the `parallel` feature".into(),
    )))
}
