//! spike-simulation: synthetic device byte streams
//!
//! Encodes synthetic signals into the device protocol for tests, benchmarks
//! and the replay tool.

pub mod device_simulator;
pub mod real_time_stream;
pub mod signal_patterns;

pub use device_simulator::*;
pub use real_time_stream::*;
pub use signal_patterns::*;
