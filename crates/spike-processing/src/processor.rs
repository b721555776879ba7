//! Format-change notification shared by every stateful component

use spike_core::StreamFormat;

/// Implemented by every component that holds per-format state.
///
/// The engine calls these explicitly, on the processing thread, at the start
/// of a processing call. Implementations must drop all in-flight state on
/// `format_changed`; buffers sized from the old format are never reused.
pub trait FormatListener {
    /// Sample rate and/or channel count changed
    fn format_changed(&mut self, format: StreamFormat);

    /// Drop all in-flight state, keeping the current format and settings
    fn reset(&mut self);

    /// Component name for logs
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        format: StreamFormat,
        resets: usize,
    }

    impl FormatListener for Counter {
        fn format_changed(&mut self, format: StreamFormat) {
            self.format = format;
            self.reset();
        }

        fn reset(&mut self) {
            self.resets += 1;
        }

        fn name(&self) -> &str {
            "counter"
        }
    }

    #[test]
    fn test_listeners_are_object_safe() {
        let mut counter = Counter {
            format: StreamFormat::default(),
            resets: 0,
        };
        let listeners: Vec<&mut dyn FormatListener> = vec![&mut counter];
        for listener in listeners {
            listener.format_changed(StreamFormat::new(5000, 2).unwrap());
        }
        assert_eq!(counter.resets, 1);
        assert_eq!(counter.format.channel_count, 2);
    }
}
