//! Execution backends: driver generation, building and timed execution.

pub mod backend;
pub mod python;
pub mod registry;
pub mod timing;

pub use backend::*;
pub use python::*;
pub use registry::*;
pub use timing::*;
