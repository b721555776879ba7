//! Error handling for the spike engine
//!
//! One error type is shared by every crate in the workspace. Protocol
//! corruption never shows up here: the decoder recovers from it locally.
//! What does show up are capacity violations and invalid configuration.

use thiserror::Error;

/// Result type alias for engine operations
pub type SpikeResult<T> = Result<T, SpikeError>;

/// Error type for all engine operations
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum SpikeError {
    /// Sample rate outside the supported range
    #[error("Invalid sample rate: {rate}Hz, valid range: {valid_range}")]
    InvalidSampleRate {
        /// Provided sample rate
        rate: u32,
        /// Valid range description
        valid_range: String,
    },

    /// Channel count is zero or exceeds the maximum supported
    #[error("Invalid channel count: {count}, max supported {max}")]
    InvalidChannelCount {
        /// Requested channel count
        count: usize,
        /// Maximum supported channels
        max: usize,
    },

    /// Channel index does not exist in the current stream format
    #[error("Channel {channel} out of range for {channel_count} channels")]
    ChannelOutOfRange {
        /// Requested channel index
        channel: usize,
        /// Channel count of the current format
        channel_count: usize,
    },

    /// Input exceeds a hard capacity bound
    #[error("Buffer overflow in {what}: capacity {capacity}, requested {requested}")]
    BufferOverflow {
        /// Which buffer overflowed
        what: &'static str,
        /// Available capacity
        capacity: usize,
        /// Requested size
        requested: usize,
    },

    /// A configuration value was rejected
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error
        reason: String,
    },

    /// Configuration could not be read or written
    #[error("Configuration I/O error: {0}")]
    Config(String),

    /// The engine behind a control handle was dropped
    #[error("Engine is no longer running")]
    EngineClosed,
}

/// Convenience macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::error::SpikeError::InvalidConfig {
            reason: format!($($arg)*),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SpikeError::InvalidChannelCount {
            count: 128,
            max: 16,
        };
        let display = format!("{}", error);
        assert!(display.contains("Invalid channel count"));
        assert!(display.contains("128"));
        assert!(display.contains("16"));
    }

    #[test]
    fn test_config_error_macro() {
        let error = config_error!("depth {} too large", 500);
        assert_eq!(
            error,
            SpikeError::InvalidConfig {
                reason: "depth 500 too large".to_string()
            }
        );
    }
}
