//! Interchangeable compute backends for forward and inverse transforms
//!
//! Every backend satisfies the same numeric contract: results agree with
//! the row-by-row CPU backend to within floating point rounding.

use ndarray::Array2;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread::JoinHandle;

use crate::algorithm::correlation::{self, CorrelationParams, PairwiseCorrelation};
use crate::algorithm::queue::WorkQueue;
use crate::io::error::{Result, backend_error};
use crate::math::fft::{Execution, PlanCache};
use crate::memory::pool::{PixelBuffer, SpectrumBuffer};
use crate::spatial::grid::Direction;
use crate::spatial::tiles::Tile;

/// Selectable backend implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
pub enum BackendKind {
    /// Planned FFTs, one lane at a time
    #[default]
    Cpu,
    /// Planned FFTs over whole axes, spread across the rayon pool
    Vectorized,
    /// Dedicated device thread fed through a priority queue
    Device,
}

impl BackendKind {
    /// Lower-case name for messages
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Vectorized => "vectorized",
            Self::Device => "device",
        }
    }
}

/// Capability interface the pipeline dispatches work through
pub trait ComputeBackend: Send + Sync {
    /// Backend name for messages
    fn name(&self) -> &'static str;

    /// Forward transform of `pixels` into `spectrum`
    ///
    /// # Errors
    ///
    /// Returns an error if the buffers cannot be transformed
    fn transform(&self, pixels: &PixelBuffer, spectrum: &mut SpectrumBuffer) -> Result<()>;

    /// Normalized inverse transform, real part only
    ///
    /// # Errors
    ///
    /// Returns an error if the spectrum cannot be transformed
    fn inverse_transform(&self, spectrum: &SpectrumBuffer) -> Result<Array2<f64>>;

    /// Translation of `tile` relative to its neighbour in `direction`
    fn correlate(
        &self,
        tile: &Tile,
        neighbor: &Tile,
        direction: Direction,
        params: &CorrelationParams,
    ) -> PairwiseCorrelation {
        correlation::correlate_tiles(self, tile, neighbor, direction, params)
    }

    /// Jobs waiting on the backend; a depth that only grows means a stall
    fn queue_depth(&self) -> usize {
        0
    }
}

/// Construct the backend selected by `kind`
///
/// # Errors
///
/// Returns `Backend` if the device thread cannot be started
pub fn create_backend(kind: BackendKind) -> Result<Box<dyn ComputeBackend>> {
    Ok(match kind {
        BackendKind::Cpu => Box::new(CpuBackend::new()),
        BackendKind::Vectorized => Box::new(VectorizedBackend::new()),
        BackendKind::Device => Box::new(DeviceBackend::new()?),
    })
}

/// Row-by-row transforms on the calling thread
#[derive(Debug, Default)]
pub struct CpuBackend {
    plans: PlanCache,
}

impl CpuBackend {
    /// Create a backend with an empty plan cache
    pub fn new() -> Self {
        Self::default()
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &'static str {
        BackendKind::Cpu.name()
    }

    fn transform(&self, pixels: &PixelBuffer, spectrum: &mut SpectrumBuffer) -> Result<()> {
        self.plans
            .get(pixels.dim())?
            .forward(pixels, spectrum, Execution::RowByRow)
    }

    fn inverse_transform(&self, spectrum: &SpectrumBuffer) -> Result<Array2<f64>> {
        self.plans
            .get(spectrum.dim())?
            .inverse(spectrum, Execution::RowByRow)
    }
}

/// Whole-axis batched transforms
#[derive(Debug)]
pub struct VectorizedBackend {
    plans: PlanCache,
    execution: Execution,
}

impl Default for VectorizedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorizedBackend {
    /// Batched transforms split across the rayon pool
    pub fn new() -> Self {
        Self {
            plans: PlanCache::new(),
            execution: Execution::ParallelBatched,
        }
    }

    /// Batched transforms on the calling thread only
    pub fn serial() -> Self {
        Self {
            plans: PlanCache::new(),
            execution: Execution::Batched,
        }
    }
}

impl ComputeBackend for VectorizedBackend {
    fn name(&self) -> &'static str {
        BackendKind::Vectorized.name()
    }

    fn transform(&self, pixels: &PixelBuffer, spectrum: &mut SpectrumBuffer) -> Result<()> {
        self.plans
            .get(pixels.dim())?
            .forward(pixels, spectrum, self.execution)
    }

    fn inverse_transform(&self, spectrum: &SpectrumBuffer) -> Result<Array2<f64>> {
        self.plans
            .get(spectrum.dim())?
            .inverse(spectrum, self.execution)
    }
}

/// Inverse transforms unblock pending correlations, so they go first
const INVERSE_PRIORITY: u32 = 1;
const FORWARD_PRIORITY: u32 = 0;

enum DeviceJob {
    Forward {
        pixels: PixelBuffer,
        reply: SyncSender<Result<SpectrumBuffer>>,
    },
    Inverse {
        spectrum: SpectrumBuffer,
        reply: SyncSender<Result<Array2<f64>>>,
    },
}

/// Accelerator-style backend
///
/// Buffers are copied to a dedicated device thread, which owns its own
/// plans and drains a priority queue; callers block until their result is
/// copied back.
pub struct DeviceBackend {
    queue: Arc<WorkQueue<DeviceJob>>,
    device: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for DeviceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBackend")
            .field("queue_depth", &self.queue.len())
            .finish()
    }
}

impl DeviceBackend {
    /// Start the device thread
    ///
    /// # Errors
    ///
    /// Returns `Backend` if the thread cannot be spawned
    pub fn new() -> Result<Self> {
        let queue = Arc::new(WorkQueue::new());
        let jobs = Arc::clone(&queue);

        let device = std::thread::Builder::new()
            .name("gridstitch-device".to_string())
            .spawn(move || run_device(&jobs))
            .map_err(|error| backend_error(BackendKind::Device.name(), &error))?;

        Ok(Self {
            queue,
            device: Some(device),
        })
    }

    /// Largest number of jobs queued at once
    pub fn peak_queue_depth(&self) -> usize {
        self.queue.peak_depth()
    }

    fn submit<T>(&self, priority: u32, job: DeviceJob, receive: Receiver<Result<T>>) -> Result<T> {
        let name = BackendKind::Device.name();
        if self.queue.push(priority, job).is_err() {
            return Err(backend_error(name, &"device queue is closed"));
        }
        receive
            .recv()
            .map_err(|error| backend_error(name, &error))?
    }
}

fn run_device(jobs: &WorkQueue<DeviceJob>) {
    let plans = PlanCache::new();
    while let Some(job) = jobs.pop() {
        match job {
            DeviceJob::Forward { pixels, reply } => {
                let result = plans.get(pixels.dim()).and_then(|plan| {
                    let mut spectrum = Array2::zeros(pixels.dim());
                    plan.forward(&pixels, &mut spectrum, Execution::Batched)?;
                    Ok(spectrum)
                });
                let _ = reply.send(result);
            }
            DeviceJob::Inverse { spectrum, reply } => {
                let result = plans
                    .get(spectrum.dim())
                    .and_then(|plan| plan.inverse(&spectrum, Execution::Batched));
                let _ = reply.send(result);
            }
        }
    }
    log::debug!("Device thread drained its queue");
}

impl ComputeBackend for DeviceBackend {
    fn name(&self) -> &'static str {
        BackendKind::Device.name()
    }

    fn transform(&self, pixels: &PixelBuffer, spectrum: &mut SpectrumBuffer) -> Result<()> {
        let (reply, receive) = sync_channel(1);
        let job = DeviceJob::Forward {
            pixels: pixels.clone(),
            reply,
        };
        let result = self.submit(FORWARD_PRIORITY, job, receive)?;

        if spectrum.dim() == result.dim() {
            spectrum.assign(&result);
        } else {
            *spectrum = result;
        }
        Ok(())
    }

    fn inverse_transform(&self, spectrum: &SpectrumBuffer) -> Result<Array2<f64>> {
        let (reply, receive) = sync_channel(1);
        let job = DeviceJob::Inverse {
            spectrum: spectrum.clone(),
            reply,
        };
        self.submit(INVERSE_PRIORITY, job, receive)
    }

    fn queue_depth(&self) -> usize {
        self.queue.len()
    }
}

impl Drop for DeviceBackend {
    fn drop(&mut self) {
        self.queue.close();
        if let Some(device) = self.device.take() {
            if device.join().is_err() {
                log::error!("Device thread panicked");
            }
        }
    }
}
