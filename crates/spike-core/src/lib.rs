//! spike-core: shared vocabulary for the streaming spike engine
//!
//! Stream format, sample blocks, events, the device byte protocol and the
//! error type used across the workspace.

pub mod error;
pub mod protocol;
pub mod types;

pub use error::{SpikeError, SpikeResult};
pub use protocol::{ControlMessage, DeviceProfile, ExpansionBoard};
pub use types::*;
