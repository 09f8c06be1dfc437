//! Tab-separated export of layouts and pairwise translations

use std::fmt::Write as _;
use std::path::Path;

use crate::algorithm::correlation::PairwiseCorrelation;
use crate::algorithm::optimizer::GridLayout;
use crate::io::error::{Result, StitchError};

/// Absolute positions, one tile per line
pub fn format_positions(layout: &GridLayout) -> String {
    let mut text = String::from("row\tcol\tx\ty\tsource\tconfidence\n");
    for placed in layout.iter() {
        let _ = writeln!(
            text,
            "{}\t{}\t{}\t{}\t{}\t{:.4}",
            placed.position.row,
            placed.position.col,
            placed.offset.dx,
            placed.offset.dy,
            placed.source.name(),
            placed.confidence
        );
    }
    text
}

/// Pairwise translations, one pair per line
pub fn format_translations(correlations: &[PairwiseCorrelation]) -> String {
    let mut text = String::from("row\tcol\tdirection\tdx\tdy\tconfidence\tquality\n");
    for correlation in correlations {
        let _ = writeln!(
            text,
            "{}\t{}\t{}\t{}\t{}\t{:.4}\t{}",
            correlation.tile.row,
            correlation.tile.col,
            correlation.direction.name(),
            correlation.translation.dx,
            correlation.translation.dy,
            correlation.confidence,
            correlation.quality.name()
        );
    }
    text
}

/// Write [`format_positions`] to `path`
///
/// # Errors
///
/// Returns `FileSystem` if the file cannot be written
pub fn write_positions(path: &Path, layout: &GridLayout) -> Result<()> {
    write_text(path, &format_positions(layout))
}

/// Write [`format_translations`] to `path`
///
/// # Errors
///
/// Returns `FileSystem` if the file cannot be written
pub fn write_translations(path: &Path, correlations: &[PairwiseCorrelation]) -> Result<()> {
    write_text(path, &format_translations(correlations))
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    std::fs::write(path, text).map_err(|source| StitchError::FileSystem {
        path: path.to_path_buf(),
        operation: "write",
        source,
    })
}
