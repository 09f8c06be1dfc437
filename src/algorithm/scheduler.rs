//! Concurrent tile pipeline: one producer, a worker pool and a bookkeeper
//!
//! The producer walks the traversal and checks a pixel buffer and a spectrum
//! buffer out for every tile, blocking while the pools are exhausted. That
//! is the only place anything waits on a pool, and buffers are always taken
//! in traversal order, so a pool at least as large as the traversal's
//! minimum in-flight count always makes progress.
//!
//! Workers pop tasks from a shared priority queue: loading and transforming
//! a tile, or correlating a pair. Correlations go first since they are
//! what frees buffers.
//!
//! The bookkeeper runs on the calling thread. It owns every settled tile,
//! dispatches a pair as soon as its second tile settles, and lets go of a
//! tile once all of its neighbours have settled. A tile's buffers go back
//! to the pools when the last task holding it finishes.

use bitvec::prelude::*;
use ndarray::Array2;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use crate::algorithm::backend::ComputeBackend;
use crate::algorithm::correlation::{CorrelationParams, CorrelationQuality, PairwiseCorrelation};
use crate::algorithm::queue::WorkQueue;
use crate::io::configuration::{
    ABORT_POLL_INTERVAL_MS, CORRELATE_PRIORITY, PREPARE_PRIORITY, StitchConfig,
};
use crate::io::error::{Result, StitchError};
use crate::io::progress::{NoProgress, PipelineProgress};
use crate::io::source::ImageSource;
use crate::memory::pool::{BufferPool, PixelBuffer, SpectrumBuffer};
use crate::spatial::grid::{Direction, GridPosition, TileGrid};
use crate::spatial::tiles::Tile;
use crate::spatial::traversal::Traversal;

static NO_PROGRESS: NoProgress = NoProgress;

/// Pipeline-wide cancellation flag
///
/// Clones share the flag. Triggering it makes workers drop their tasks,
/// closes the pools and ends the run with `Aborted`.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    /// Create an untriggered signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the run to stop
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the run was asked to stop
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A tile that could not be loaded or transformed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileFailure {
    /// Grid position of the tile
    pub position: GridPosition,
    /// Rendered error
    pub reason: String,
}

/// Counters describing one pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Tiles in the grid
    pub tiles: usize,
    /// Adjacent pairs in the grid
    pub pairs: usize,
    /// Tasks handed to workers
    pub tasks: u64,
    /// Deepest the work queue or backend queue got
    pub peak_queue_depth: usize,
    /// Most tiles holding buffers at once
    pub peak_tiles_in_flight: usize,
    /// Buffers per pool
    pub pool_capacity: usize,
    /// Buffer checkouts across both pools
    pub acquisitions: u64,
    /// Buffer returns across both pools
    pub releases: u64,
}

/// Everything the pipeline measured
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    /// One entry per adjacent pair, sorted by tile then direction
    pub correlations: Vec<PairwiseCorrelation>,
    /// Tiles that never reached the transformed state, sorted by position
    pub failed_tiles: Vec<TileFailure>,
    /// Run counters
    pub stats: PipelineStats,
}

enum Task {
    Prepare(Tile),
    Correlate {
        tile: Arc<Tile>,
        neighbor: Arc<Tile>,
        direction: Direction,
    },
}

enum Event {
    Transformed(Tile),
    Failed {
        position: GridPosition,
        error: StitchError,
    },
    Correlated(PairwiseCorrelation),
    ProducerFinished(Result<()>),
}

/// One configured run over a tile grid
pub struct Pipeline<'a> {
    grid: &'a TileGrid,
    config: &'a StitchConfig,
    source: &'a dyn ImageSource,
    backend: &'a dyn ComputeBackend,
    progress: &'a dyn PipelineProgress,
    abort: AbortSignal,
}

impl<'a> Pipeline<'a> {
    /// Prepare a run; nothing starts until [`Pipeline::run`]
    pub fn new(
        grid: &'a TileGrid,
        config: &'a StitchConfig,
        source: &'a dyn ImageSource,
        backend: &'a dyn ComputeBackend,
    ) -> Self {
        Self {
            grid,
            config,
            source,
            backend,
            progress: &NO_PROGRESS,
            abort: AbortSignal::new(),
        }
    }

    /// Report progress to `progress`
    #[must_use]
    pub fn with_progress(mut self, progress: &'a dyn PipelineProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Stop when `abort` is triggered
    #[must_use]
    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    /// Load, transform and correlate every tile
    ///
    /// Per-tile and per-pair failures are recorded in the output.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for a bad configuration, `Aborted` if the
    /// abort signal fired, or `PoolClosed` if work could not be handed on
    pub fn run(&self) -> Result<PipelineOutput> {
        self.config.validate()?;
        let (rows, cols) = self.grid.dimensions();
        let order = self.config.traversal;

        let Some(shape) = self.resolve_tile_shape() else {
            log::warn!("No tile could be inspected; every tile is treated as failed");
            return Ok(self.all_failed());
        };

        let minimum = order.minimum_in_flight(rows, cols);
        let capacity = self.config.effective_pool_capacity(rows, cols);
        if let Some(requested) = self.config.pool_capacity {
            if requested < minimum {
                log::warn!(
                    "Pool capacity {requested} cannot sustain {} traversal of {rows}x{cols}; raised to {capacity}",
                    order.name()
                );
            }
        }

        let pixel_pool: BufferPool<PixelBuffer> =
            BufferPool::new("pixel", capacity, || Array2::zeros(shape))?;
        let spectrum_pool: BufferPool<SpectrumBuffer> =
            BufferPool::new("spectrum", capacity, || Array2::zeros(shape))?;
        let queue = WorkQueue::new();

        log::info!(
            "Stitching {rows}x{cols} tiles of {}x{} in {} order on {} backend with {} worker(s), {capacity} buffer(s) per pool",
            shape.0,
            shape.1,
            order.name(),
            self.backend.name(),
            self.config.workers
        );
        self.progress
            .started(self.grid.tile_count(), self.grid.pair_count());

        let (events, inbox) = mpsc::channel();
        let outcome = self.execute(order, &pixel_pool, &spectrum_pool, &queue, events, &inbox);
        drop(inbox);
        self.progress.pools_drained(
            pixel_pool.acquisitions() + spectrum_pool.acquisitions(),
            pixel_pool.releases() + spectrum_pool.releases(),
        );
        self.progress.finished();

        let (mut correlations, mut failed_tiles, peak_backend_depth) = outcome?;
        correlations.sort_by_key(PairwiseCorrelation::id);
        failed_tiles.sort_by_key(|failure| failure.position);

        let stats = PipelineStats {
            tiles: self.grid.tile_count(),
            pairs: self.grid.pair_count(),
            tasks: queue.pushed(),
            peak_queue_depth: queue.peak_depth().max(peak_backend_depth),
            peak_tiles_in_flight: pixel_pool.peak_checked_out(),
            pool_capacity: capacity,
            acquisitions: pixel_pool.acquisitions() + spectrum_pool.acquisitions(),
            releases: pixel_pool.releases() + spectrum_pool.releases(),
        };
        log::info!(
            "Pipeline finished: {} pair(s), {} failed tile(s), {} task(s), at most {} tile(s) in flight",
            correlations.len(),
            failed_tiles.len(),
            stats.tasks,
            stats.peak_tiles_in_flight
        );

        Ok(PipelineOutput {
            correlations,
            failed_tiles,
            stats,
        })
    }

    fn execute(
        &self,
        order: Traversal,
        pixel_pool: &BufferPool<PixelBuffer>,
        spectrum_pool: &BufferPool<SpectrumBuffer>,
        queue: &WorkQueue<Task>,
        events: Sender<Event>,
        inbox: &Receiver<Event>,
    ) -> Result<(Vec<PairwiseCorrelation>, Vec<TileFailure>, usize)> {
        let grid = self.grid;
        let source = self.source;
        let backend = self.backend;
        let abort = &self.abort;
        let params = CorrelationParams::from_config(self.config);

        std::thread::scope(|scope| {
            let producer_events = events.clone();
            scope.spawn(move || {
                let result = produce(grid, order, pixel_pool, spectrum_pool, queue, abort);
                let _ = producer_events.send(Event::ProducerFinished(result));
            });

            for _ in 0..self.config.workers {
                let worker_events = events.clone();
                scope.spawn(move || work(queue, source, backend, &params, abort, &worker_events));
            }
            drop(events);

            let mut bookkeeper = Bookkeeper::new(grid, queue, self.progress);
            let outcome = bookkeeper.run(inbox, abort, backend);

            if outcome.is_ok() {
                queue.close();
            } else {
                queue.abort();
                pixel_pool.close();
                spectrum_pool.close();
            }

            outcome.map(|()| bookkeeper.finish())
        })
    }

    fn resolve_tile_shape(&self) -> Option<(usize, usize)> {
        if let Some(shape) = self.config.tile_shape {
            return Some(shape);
        }
        self.grid
            .traversal(self.config.traversal)
            .filter_map(|position| self.grid.get(position))
            .find_map(|descriptor| match self.source.tile_shape(descriptor) {
                Ok(shape) => Some(shape),
                Err(error) => {
                    log::debug!("Cannot take tile shape from {}: {error}", descriptor.position);
                    None
                }
            })
    }

    fn all_failed(&self) -> PipelineOutput {
        let (rows, cols) = self.grid.dimensions();
        let mut output = PipelineOutput::default();

        for descriptor in self.grid.descriptors() {
            let position = descriptor.position;
            output.failed_tiles.push(TileFailure {
                position,
                reason: "tile could not be inspected".to_string(),
            });
            for direction in Direction::MEASURED {
                if let Some(neighbor) = position.neighbor(direction, rows, cols) {
                    output.correlations.push(PairwiseCorrelation::invalid(
                        position,
                        neighbor,
                        direction,
                        CorrelationQuality::MissingOperand,
                    ));
                }
            }
        }

        output.correlations.sort_by_key(PairwiseCorrelation::id);
        output.stats.tiles = self.grid.tile_count();
        output.stats.pairs = self.grid.pair_count();
        output
    }
}

/// Check out buffers for every tile in traversal order and queue its
/// preparation
fn produce(
    grid: &TileGrid,
    order: Traversal,
    pixel_pool: &BufferPool<PixelBuffer>,
    spectrum_pool: &BufferPool<SpectrumBuffer>,
    queue: &WorkQueue<Task>,
    abort: &AbortSignal,
) -> Result<()> {
    for position in grid.traversal(order) {
        if abort.is_triggered() {
            return Err(StitchError::Aborted);
        }
        let Some(descriptor) = grid.get(position) else {
            continue;
        };

        let pixels = pixel_pool.acquire(position)?;
        let spectrum = spectrum_pool.acquire(position)?;
        let tile = Tile::new(descriptor.clone(), pixels, spectrum);

        if queue.push(PREPARE_PRIORITY, Task::Prepare(tile)).is_err() {
            return Err(StitchError::PoolClosed { pool: "work" });
        }
    }
    Ok(())
}

fn work(
    queue: &WorkQueue<Task>,
    source: &dyn ImageSource,
    backend: &dyn ComputeBackend,
    params: &CorrelationParams,
    abort: &AbortSignal,
    events: &Sender<Event>,
) {
    while let Some(task) = queue.pop() {
        if abort.is_triggered() {
            continue;
        }

        let event = match task {
            Task::Prepare(mut tile) => {
                let position = tile.position();
                match tile.load(source).and_then(|()| tile.transform(backend)) {
                    Ok(()) => Event::Transformed(tile),
                    Err(error) => Event::Failed { position, error },
                }
            }
            Task::Correlate {
                tile,
                neighbor,
                direction,
            } => Event::Correlated(backend.correlate(&tile, &neighbor, direction, params)),
        };

        if events.send(event).is_err() {
            break;
        }
    }
}

struct Bookkeeper<'p> {
    grid: &'p TileGrid,
    queue: &'p WorkQueue<Task>,
    progress: &'p dyn PipelineProgress,
    settled: BitVec,
    settled_count: usize,
    live: HashMap<GridPosition, Arc<Tile>>,
    correlations: Vec<PairwiseCorrelation>,
    failures: Vec<TileFailure>,
    producer_done: bool,
    peak_backend_depth: usize,
}

impl<'p> Bookkeeper<'p> {
    fn new(
        grid: &'p TileGrid,
        queue: &'p WorkQueue<Task>,
        progress: &'p dyn PipelineProgress,
    ) -> Self {
        Self {
            grid,
            queue,
            progress,
            settled: bitvec![0; grid.tile_count()],
            settled_count: 0,
            live: HashMap::new(),
            correlations: Vec::with_capacity(grid.pair_count()),
            failures: Vec::new(),
            producer_done: false,
            peak_backend_depth: 0,
        }
    }

    fn run(
        &mut self,
        inbox: &Receiver<Event>,
        abort: &AbortSignal,
        backend: &dyn ComputeBackend,
    ) -> Result<()> {
        let poll = Duration::from_millis(ABORT_POLL_INTERVAL_MS);

        while !self.is_complete() {
            if abort.is_triggered() {
                log::warn!(
                    "Abort requested with {} of {} tile(s) settled",
                    self.settled_count,
                    self.grid.tile_count()
                );
                return Err(StitchError::Aborted);
            }

            match inbox.recv_timeout(poll) {
                Ok(event) => self.handle(event)?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(StitchError::PoolClosed { pool: "event" });
                }
            }
            self.peak_backend_depth = self.peak_backend_depth.max(backend.queue_depth());
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.producer_done
            && self.settled_count == self.grid.tile_count()
            && self.correlations.len() == self.grid.pair_count()
    }

    fn finish(self) -> (Vec<PairwiseCorrelation>, Vec<TileFailure>, usize) {
        (self.correlations, self.failures, self.peak_backend_depth)
    }

    fn handle(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Transformed(tile) => {
                let position = tile.position();
                self.settle(position, Some(Arc::new(tile)))
            }
            Event::Failed { position, error } => {
                log::warn!("{error}");
                self.failures.push(TileFailure {
                    position,
                    reason: error.to_string(),
                });
                self.settle(position, None)
            }
            Event::Correlated(correlation) => {
                self.record(correlation);
                Ok(())
            }
            Event::ProducerFinished(result) => {
                self.producer_done = true;
                result
            }
        }
    }

    fn index(&self, position: GridPosition) -> usize {
        position.row * self.grid.cols() + position.col
    }

    fn is_settled(&self, position: GridPosition) -> bool {
        self.settled.get(self.index(position)).as_deref() == Some(&true)
    }

    fn settle(&mut self, position: GridPosition, tile: Option<Arc<Tile>>) -> Result<()> {
        let index = self.index(position);
        self.settled.set(index, true);
        self.settled_count += 1;
        self.progress.tile_settled(position, tile.is_some());
        if let Some(tile) = tile {
            self.live.insert(position, tile);
        }

        for direction in Direction::ALL {
            if let Some(neighbor) = self.grid.neighbor(position, direction) {
                if self.is_settled(neighbor) {
                    self.dispatch(position, neighbor, direction)?;
                }
            }
        }

        self.retire(position)?;
        for direction in Direction::ALL {
            if let Some(neighbor) = self.grid.neighbor(position, direction) {
                self.retire(neighbor)?;
            }
        }
        Ok(())
    }

    /// Queue the correlation of two settled neighbours, or record the pair
    /// as invalid when either failed
    fn dispatch(
        &mut self,
        position: GridPosition,
        neighbor: GridPosition,
        direction: Direction,
    ) -> Result<()> {
        let (tile, other, direction) = if direction.is_measured() {
            (position, neighbor, direction)
        } else {
            (neighbor, position, direction.opposite())
        };

        match (self.live.get(&tile), self.live.get(&other)) {
            (Some(a), Some(b)) => {
                let task = Task::Correlate {
                    tile: Arc::clone(a),
                    neighbor: Arc::clone(b),
                    direction,
                };
                if self.queue.push(CORRELATE_PRIORITY, task).is_err() {
                    return Err(StitchError::PoolClosed { pool: "work" });
                }
            }
            _ => self.record(PairwiseCorrelation::invalid(
                tile,
                other,
                direction,
                CorrelationQuality::MissingOperand,
            )),
        }
        Ok(())
    }

    fn record(&mut self, correlation: PairwiseCorrelation) {
        self.progress.pair_resolved(&correlation);
        self.correlations.push(correlation);
    }

    /// Let go of a tile once every neighbour has settled
    fn retire(&mut self, position: GridPosition) -> Result<()> {
        if !self.live.contains_key(&position) {
            return Ok(());
        }
        let all_settled = Direction::ALL
            .iter()
            .filter_map(|&direction| self.grid.neighbor(position, direction))
            .all(|neighbor| self.is_settled(neighbor));
        if !all_settled {
            return Ok(());
        }

        if let Some(tile) = self.live.remove(&position) {
            if let Ok(mut tile) = Arc::try_unwrap(tile) {
                tile.release()?;
            }
        }
        Ok(())
    }
}
