//! Benchmark runner: configuration, sampling, the staged pipeline and reports.

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod sampler;

#[cfg(feature = "cli")]
pub use cli::*;
pub use config::*;
pub use error::*;
pub use orchestrator::*;
pub use report::*;
pub use sampler::*;
