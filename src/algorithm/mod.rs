/// Interchangeable compute backends behind one capability trait
pub mod backend;
/// Phase correlation and translation resolution for tile pairs
pub mod correlation;
/// Global optimization of pairwise translations into a layout
pub mod optimizer;
/// Deterministic top-K peak extraction
pub mod peaks;
/// Priority-ordered blocking work queue
pub mod queue;
/// Producer, worker and bookkeeper threads of the pipeline
pub mod scheduler;
/// Pipeline and optimizer behind one entry point
pub mod stitcher;
