//! Two-dimensional FFTs built from planned one-dimensional transforms
//!
//! Rows are transformed in place, then columns through a transposed copy.
//! Plans are created once per tile shape and shared between threads.

use ndarray::{Array2, Axis};
use rayon::prelude::*;
use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::io::error::{Result, invalid_parameter};
use crate::memory::pool::{PixelBuffer, SpectrumBuffer};

/// How the one-dimensional passes of a 2D transform are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// One lane at a time with a shared scratch buffer
    RowByRow,
    /// All lanes of an axis in one planner call
    Batched,
    /// Lanes of an axis split across the rayon pool
    ParallelBatched,
}

/// Planned forward and inverse 2D transforms for one shape
pub struct Fft2d {
    shape: (usize, usize),
    row_forward: Arc<dyn Fft<f64>>,
    row_inverse: Arc<dyn Fft<f64>>,
    col_forward: Arc<dyn Fft<f64>>,
    col_inverse: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for Fft2d {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fft2d").field("shape", &self.shape).finish()
    }
}

impl Fft2d {
    /// Plan transforms for a `(height, width)` image
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if either dimension is zero
    pub fn new(planner: &mut FftPlanner<f64>, shape: (usize, usize)) -> Result<Self> {
        let (height, width) = shape;
        if height == 0 || width == 0 {
            return Err(invalid_parameter(
                "tile_shape",
                &format!("{height}x{width}"),
                &"tiles must have at least one pixel",
            ));
        }

        Ok(Self {
            shape,
            row_forward: planner.plan_fft_forward(width),
            row_inverse: planner.plan_fft_inverse(width),
            col_forward: planner.plan_fft_forward(height),
            col_inverse: planner.plan_fft_inverse(height),
        })
    }

    /// Shape the transforms were planned for
    pub const fn shape(&self) -> (usize, usize) {
        self.shape
    }

    /// Forward transform of real pixels into `spectrum`
    ///
    /// `spectrum` is reshaped if it does not already match.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `pixels` has a different shape
    pub fn forward(
        &self,
        pixels: &PixelBuffer,
        spectrum: &mut SpectrumBuffer,
        execution: Execution,
    ) -> Result<()> {
        self.check_shape(pixels.dim())?;
        if spectrum.dim() != self.shape {
            *spectrum = Array2::zeros(self.shape);
        }

        spectrum.zip_mut_with(pixels, |out, &value| *out = Complex64::new(value, 0.0));
        run_axis(spectrum, self.row_forward.as_ref(), execution);

        let mut columns = spectrum.t().as_standard_layout().into_owned();
        run_axis(&mut columns, self.col_forward.as_ref(), execution);
        spectrum.assign(&columns.t());
        Ok(())
    }

    /// Inverse transform of a spectrum, normalized, keeping the real part
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `spectrum` has a different shape
    pub fn inverse(&self, spectrum: &SpectrumBuffer, execution: Execution) -> Result<Array2<f64>> {
        self.check_shape(spectrum.dim())?;

        let mut columns = spectrum.t().as_standard_layout().into_owned();
        run_axis(&mut columns, self.col_inverse.as_ref(), execution);

        let mut rows = columns.t().as_standard_layout().into_owned();
        run_axis(&mut rows, self.row_inverse.as_ref(), execution);

        let scale = 1.0 / (self.shape.0 * self.shape.1) as f64;
        Ok(rows.mapv(|value| value.re * scale))
    }

    fn check_shape(&self, dim: (usize, usize)) -> Result<()> {
        if dim == self.shape {
            Ok(())
        } else {
            Err(invalid_parameter(
                "buffer_shape",
                &format!("{}x{}", dim.0, dim.1),
                &format!("transform planned for {}x{}", self.shape.0, self.shape.1),
            ))
        }
    }
}

/// Apply `fft` to every row of a standard-layout array
fn run_axis(data: &mut Array2<Complex64>, fft: &dyn Fft<f64>, execution: Execution) {
    let len = fft.len();
    if len == 0 || data.is_empty() {
        return;
    }

    match execution {
        Execution::RowByRow => {
            let mut scratch = vec![Complex64::default(); fft.get_inplace_scratch_len()];
            for mut lane in data.axis_iter_mut(Axis(0)) {
                if let Some(slice) = lane.as_slice_mut() {
                    fft.process_with_scratch(slice, &mut scratch);
                }
            }
        }
        Execution::Batched => {
            if let Some(slice) = data.as_slice_mut() {
                fft.process(slice);
            }
        }
        Execution::ParallelBatched => {
            if let Some(slice) = data.as_slice_mut() {
                let lanes_per_chunk = (slice.len() / len / rayon::current_num_threads()).max(1);
                slice
                    .par_chunks_mut(len * lanes_per_chunk)
                    .for_each(|chunk| fft.process(chunk));
            }
        }
    }
}

/// Thread-safe cache of planned transforms keyed by shape
pub struct PlanCache {
    planner: Mutex<FftPlanner<f64>>,
    plans: Mutex<HashMap<(usize, usize), Arc<Fft2d>>>,
}

impl std::fmt::Debug for PlanCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanCache").field("shapes", &self.len()).finish()
    }
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            planner: Mutex::new(FftPlanner::new()),
            plans: Mutex::new(HashMap::new()),
        }
    }

    /// Planned transforms for `shape`, creating them on first use
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for a zero dimension
    pub fn get(&self, shape: (usize, usize)) -> Result<Arc<Fft2d>> {
        let mut plans = self.plans.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(plan) = plans.get(&shape) {
            return Ok(Arc::clone(plan));
        }

        let mut planner = self.planner.lock().unwrap_or_else(PoisonError::into_inner);
        let plan = Arc::new(Fft2d::new(&mut planner, shape)?);
        plans.insert(shape, Arc::clone(&plan));
        Ok(plan)
    }

    /// Number of shapes planned so far
    pub fn len(&self) -> usize {
        self.plans.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing has been planned yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
