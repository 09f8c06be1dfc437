//! CLI entry point for tile-grid stitching

use clap::Parser;
use gridstitch::io::cli::{Cli, StitchCommand};
use gridstitch::io::logging::init_logging;

fn main() -> gridstitch::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbosity());
    StitchCommand::new(cli).run()
}
