//! spike-processing: streaming engine for bioelectric device streams
//!
//! Frame decoding, per-channel filtering, threshold/event triggered averaging
//! with heart rate, and a rolling spectrogram. Every component keeps its state
//! across calls, so input may arrive in arbitrary chunks.

pub mod config;
pub mod decoder;
pub mod filters;
pub mod heartbeat;
pub mod pipeline;
pub mod processor;
pub mod spectrogram;
pub mod threshold;

pub use config::{EngineConfig, FilterConfig, SpectrogramConfig, ThresholdConfig};
pub use decoder::{DecodedBlock, DecoderStats, FrameDecoder, MAX_BYTES_PER_CALL, MAX_EVENTS_PER_CALL};
pub use filters::{ChannelFilter, DcOffsetTracker, FilterBank, NotchFrequency, CUTOFF_OFF};
pub use heartbeat::HeartbeatTracker;
pub use pipeline::{ControlCommand, EngineHandle, EngineOutput, EngineStats, SignalEngine};
pub use processor::FormatListener;
pub use spectrogram::{
    SpectrogramEngine, SpectrogramGeometry, SpectrogramOutput, SpectrogramSettings, MAX_CAPACITY,
};
pub use threshold::{EventFilter, ThresholdEngine, ThresholdOutput, ThresholdSettings, TriggerMode};
