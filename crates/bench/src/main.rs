//! Benchmark harness executable for platbench.

use anyhow::Result;
use clap::Parser;
use platbench_runner::cli::{run_cli, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    run_cli(cli)
}
