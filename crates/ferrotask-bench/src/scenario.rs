//! Timed workloads.
//!
//! Each scenario runs once on a single worker as a baseline and once on the
//! configured worker count; the ratio of the two wall times is reported as the
//! speed-up. Every result is verified, so a run that finishes is also a
//! correctness check.

use crate::config::{BenchConfig, Scenario};
use anyhow::{Context, anyhow, bail, ensure};
use ferrotask::{MatVecRowsTask, PowTask, Server, SinTask, SqrtTask, Task, row_blocks};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

const TOLERANCE: f64 = 1e-6;

/// Busy iterations `pow` burns before computing, making it the heavy kernel
/// of the mix.
const POW_SPIN: u32 = 100_000;

fn pow_kernel() -> PowTask {
    PowTask::new(5.0, 2.0).with_spin(POW_SPIN)
}

pub fn run(config: &BenchConfig) -> anyhow::Result<()> {
    let scenario: fn(&BenchConfig, usize) -> anyhow::Result<Duration> = match config.scenario {
        Scenario::Mixed => mixed,
        Scenario::Matvec => matvec,
    };

    let baseline = scenario(config, 1).context("single worker baseline failed")?;
    tracing::info!("1 worker: {:.3?}", baseline);

    let measured = scenario(config, config.workers)
        .with_context(|| format!("run with {} workers failed", config.workers))?;
    tracing::info!("{} workers: {:.3?}", config.workers, measured);

    let speedup = baseline.as_secs_f64() / measured.as_secs_f64().max(f64::EPSILON);
    tracing::info!(
        "Speed-up with {} workers: {:.2}x (efficiency {:.0}%)",
        config.workers,
        speedup,
        100.0 * speedup / config.workers as f64
    );

    Ok(())
}

/// Pairs of kernel and expected value, assigned round-robin to submitters.
fn kernels() -> [(Arc<dyn Task<f64>>, f64); 3] {
    [
        (Arc::new(pow_kernel()), 25.0),
        (Arc::new(SinTask::new(core::f64::consts::PI / 6.0)), 0.5),
        (Arc::new(SqrtTask::new(25.0)), 5.0),
    ]
}

fn mixed(config: &BenchConfig, workers: usize) -> anyhow::Result<Duration> {
    let server = Server::<f64>::with_config(config.server.clone());
    server.start(workers)?;

    let kernels = kernels();
    let outstanding = Mutex::new(HashSet::new());
    let start = Instant::now();

    thread::scope(|s| {
        let submitters: Vec<_> = (0..config.submitters)
            .map(|i| {
                let (task, expected) = &kernels[i % kernels.len()];
                let server = &server;
                let outstanding = &outstanding;
                s.spawn(move || -> anyhow::Result<()> {
                    let mut handles = Vec::with_capacity(config.tasks_per_kind);
                    for _ in 0..config.tasks_per_kind {
                        let handle = server.submit(Arc::clone(task))?;
                        let fresh = outstanding
                            .lock()
                            .map_err(|_| anyhow!("handle registry poisoned"))?
                            .insert(handle);
                        ensure!(fresh, "{handle} issued while still outstanding");
                        handles.push(handle);
                    }

                    for handle in handles {
                        // Must leave the registry before the handle can be recycled.
                        outstanding
                            .lock()
                            .map_err(|_| anyhow!("handle registry poisoned"))?
                            .remove(&handle);
                        let value = server.await_result(handle)?;
                        if (value - expected).abs() > TOLERANCE {
                            bail!(
                                "{} ({handle}) returned {value}, expected {expected}",
                                task.label()
                            );
                        }
                    }
                    Ok(())
                })
            })
            .collect();

        submitters.into_iter().try_for_each(|submitter| {
            submitter
                .join()
                .map_err(|_| anyhow!("submitter thread panicked"))?
        })
    })?;

    let elapsed = start.elapsed();
    tracing::debug!("{:?}", server.stats());
    server.stop();
    Ok(elapsed)
}

fn matvec(config: &BenchConfig, workers: usize) -> anyhow::Result<Duration> {
    let (rows, cols) = (config.rows, config.cols);
    let matrix: Arc<[f64]> = (0..rows)
        .flat_map(|i| (0..cols).map(move |j| (i + j) as f64))
        .collect();
    let vector: Arc<[f64]> = (0..cols).map(|j| j as f64).collect();

    let server = Server::<Vec<f64>>::with_config(config.server.clone());
    server.start(workers)?;

    let start = Instant::now();
    let handles = row_blocks(rows, config.rows_per_task)
        .map(|block| {
            let task = MatVecRowsTask::new(Arc::clone(&matrix), Arc::clone(&vector), block);
            server.submit(Arc::new(task))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut product = Vec::with_capacity(rows);
    for handle in handles {
        product.extend(server.await_result(handle)?);
    }
    let elapsed = start.elapsed();
    server.stop();

    ensure!(
        product.len() == rows,
        "assembled {} rows, expected {rows}",
        product.len()
    );
    for (i, value) in product.iter().enumerate() {
        let expected: f64 = (0..cols).map(|j| matrix[i * cols + j] * vector[j]).sum();
        if (value - expected).abs() > TOLERANCE * expected.abs().max(1.0) {
            bail!("row {i} is {value}, expected {expected}");
        }
    }

    Ok(elapsed)
}
