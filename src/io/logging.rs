//! Process-wide logger setup for the command line tool
//!
//! Library code only logs through the `log` macros; installing a logger is
//! the binary's job.

use env_logger::{Builder, Env};
use log::LevelFilter;

/// Install the `env_logger` backend once
///
/// `RUST_LOG` overrides `level`. Returns `false` when a logger was already
/// installed, in which case nothing changes.
pub fn init_logging(level: LevelFilter) -> bool {
    let default_filter = format!("gridstitch={}", level.as_str().to_lowercase());
    Builder::from_env(Env::default().default_filter_or(default_filter))
        .format_timestamp_secs()
        .format_target(false)
        .try_init()
        .is_ok()
}
