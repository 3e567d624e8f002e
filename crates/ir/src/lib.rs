//! Program and sample representations shared across platbench crates.

pub mod fpcore;
pub mod literal;
pub mod program;
pub mod real;
pub mod sample;
pub mod synth;

pub use fpcore::*;
pub use literal::*;
pub use program::*;
pub use sample::*;
pub use synth::*;
