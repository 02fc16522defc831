//! Numeric benchmark kernels expressed as [`Task`]s.
//!
//! The scalar kernels mirror the workloads used to load-test the server:
//! each holds its operands and computes one `f64`. [`MatVecRowsTask`]
//! computes a contiguous block of rows of a matrix-vector product so that a
//! large product can be spread across the worker pool.

use crate::{Task, TaskError};
use std::{ops::Range, sync::Arc};

/// `sin(x)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SinTask {
    x: f64,
}

impl SinTask {
    pub const fn new(x: f64) -> Self {
        Self { x }
    }
}

impl Task<f64> for SinTask {
    fn execute(&self) -> Result<f64, TaskError> {
        Ok(self.x.sin())
    }

    fn label(&self) -> &str {
        "SinTask"
    }
}

/// `sqrt(x)`. Fails for negative operands instead of yielding `NaN`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SqrtTask {
    x: f64,
}

impl SqrtTask {
    pub const fn new(x: f64) -> Self {
        Self { x }
    }
}

impl Task<f64> for SqrtTask {
    fn execute(&self) -> Result<f64, TaskError> {
        if self.x < 0.0 {
            return Err(TaskError::new(format!(
                "square root of negative operand {}",
                self.x
            )));
        }
        Ok(self.x.sqrt())
    }

    fn label(&self) -> &str {
        "SqrtTask"
    }
}

/// `base.powf(exponent)`, optionally preceded by a fixed amount of busy work
/// to simulate a heavier kernel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PowTask {
    base: f64,
    exponent: f64,
    spin: u32,
}

impl PowTask {
    pub const fn new(base: f64, exponent: f64) -> Self {
        Self {
            base,
            exponent,
            spin: 0,
        }
    }

    /// Burns `iterations` spin-loop hints before computing the power.
    #[must_use]
    pub const fn with_spin(mut self, iterations: u32) -> Self {
        self.spin = iterations;
        self
    }
}

impl Task<f64> for PowTask {
    fn execute(&self) -> Result<f64, TaskError> {
        for _ in 0..self.spin {
            core::hint::spin_loop();
        }
        Ok(self.base.powf(self.exponent))
    }

    fn label(&self) -> &str {
        "PowTask"
    }
}

/// Computes `rows` of `a * b` for a row-major `a` with `b.len()` columns.
///
/// The matrix and vector are shared between every block of the same
/// product, so splitting a product into many tasks does not copy operands.
#[derive(Clone, Debug)]
pub struct MatVecRowsTask {
    matrix: Arc<[f64]>,
    vector: Arc<[f64]>,
    rows: Range<usize>,
}

impl MatVecRowsTask {
    pub fn new(matrix: Arc<[f64]>, vector: Arc<[f64]>, rows: Range<usize>) -> Self {
        Self {
            matrix,
            vector,
            rows,
        }
    }

    pub fn rows(&self) -> Range<usize> {
        self.rows.clone()
    }
}

impl Task<Vec<f64>> for MatVecRowsTask {
    fn execute(&self) -> Result<Vec<f64>, TaskError> {
        let cols = self.vector.len();
        if cols == 0 || self.matrix.len() % cols != 0 {
            return Err(TaskError::new(format!(
                "matrix of {} elements is not a multiple of {} columns",
                self.matrix.len(),
                cols
            )));
        }
        if self.rows.end > self.matrix.len() / cols {
            return Err(TaskError::new(format!(
                "row range {:?} exceeds {} rows",
                self.rows,
                self.matrix.len() / cols
            )));
        }

        Ok(self
            .rows
            .clone()
            .map(|i| {
                self.matrix[i * cols..(i + 1) * cols]
                    .iter()
                    .zip(self.vector.iter())
                    .map(|(a, b)| a * b)
                    .sum()
            })
            .collect())
    }

    fn label(&self) -> &str {
        "MatVecRowsTask"
    }
}

/// Splits `0..rows` into consecutive ranges of `block` rows; the last range
/// holds the remainder. A `block` of zero is treated as one.
pub fn row_blocks(rows: usize, block: usize) -> impl Iterator<Item = Range<usize>> {
    let block = block.max(1);
    (0..rows)
        .step_by(block)
        .map(move |start| start..(start + block).min(rows))
}
