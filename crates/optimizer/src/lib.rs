//! Client for the external floating-point optimizer.
//!
//! The optimizer runs as a subprocess that reads one request per line on
//! stdin and answers on stdout. Every batch of requests gets its own
//! session, which is always terminated with `(exit)` and drained.
//!
//! # Key Components
//!
//! - [`session::SessionLauncher`]: opens sessions for a platform
//! - [`session::ProcessLauncher`]: the real subprocess launcher
//! - [`client::OptimizerClient`]: one typed method per protocol command
//! - [`protocol`]: request rendering and response grammars
//! - [`results::ImproveReport`]: the result file written by `improve`
//! - [`pareto`]: domination checks and key grouping for frontiers

pub mod client;
pub mod error;
pub mod pareto;
pub mod protocol;
pub mod results;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::OptimizerClient;
pub use error::ProtocolError;
pub use pareto::{combine_frontiers, dominates, frontier, pareto_groups, Point};
pub use results::{ImproveReport, ImprovedTest};
pub use session::{ProcessLauncher, Session, SessionLauncher};
