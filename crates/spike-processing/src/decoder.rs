//! Byte stream decoder: frames, samples and in-band control messages
//!
//! The decoder is a pair of small state machines fed one byte at a time. The
//! escape scanner sits in front: bytes that could still be the start of an
//! escape marker are held back (across calls if needed) and only handed to
//! the frame state machine once the match fails. A complete marker is
//! swallowed, so marker bytes never turn into samples. Inside a message the
//! same hold-back is applied to the end marker.
//!
//! Samples of a frame are buffered until the frame completes, so a corrupt
//! frame is dropped as a whole and channel arrays always stay aligned.

use crate::filters::DcOffsetTracker;
use crate::processor::FormatListener;
use spike_core::protocol::{
    DATA_MASK, ESCAPE_SEQUENCE_END, ESCAPE_SEQUENCE_START, FRAME_START_FLAG, MAX_MESSAGE_LEN,
};
use spike_core::{
    ControlMessage, DeviceProfile, Event, ExpansionBoard, Sample, SampleBlock, SpikeError,
    SpikeResult, StreamFormat, MAX_CHANNELS,
};
use tracing::{debug, warn};

/// Largest input accepted by one decode call
pub const MAX_BYTES_PER_CALL: usize = 65_536;

/// Largest number of events reported by one decode call
pub const MAX_EVENTS_PER_CALL: usize = 256;

const MARKER_LEN: usize = ESCAPE_SEQUENCE_START.len();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    OutsideFrame,
    AwaitingMsb { channel: usize },
    AwaitingLsb { channel: usize, msb: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeState {
    /// `matched` leading bytes of the start marker are held back
    Scanning { matched: usize },
    /// Capturing a message; `matched` leading bytes of the end marker are held back
    Capturing { matched: usize },
    /// Skipping the rest of an oversized message up to its end marker
    Discarding { matched: usize },
}

/// Counters kept across calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub frames: u64,
    pub dropped_frames: u64,
    pub messages: u64,
    pub oversized_messages: u64,
    pub dropped_events: u64,
}

/// Output of one decode call
#[derive(Debug, Clone, Default)]
pub struct DecodedBlock {
    /// Complete frames, one vector per channel
    pub samples: SampleBlock,
    /// Events positioned in `samples`
    pub events: Vec<Event>,
    /// Every control message seen, in arrival order (events included)
    pub messages: Vec<ControlMessage>,
}

impl DecodedBlock {
    pub fn new(channel_count: usize) -> Self {
        Self {
            samples: SampleBlock::new(channel_count),
            events: Vec::new(),
            messages: Vec::new(),
        }
    }

    fn prepare(&mut self, channel_count: usize, expected_frames: usize) {
        if self.samples.channel_count() != channel_count {
            self.samples = SampleBlock::with_capacity(channel_count, expected_frames);
        } else {
            self.samples.clear();
        }
        self.events.clear();
        self.messages.clear();
    }
}

/// Stateful decoder for the device byte protocol
pub struct FrameDecoder {
    channel_count: usize,
    profile: DeviceProfile,
    hardware_type: Option<String>,
    expansion_board: ExpansionBoard,
    frame: FrameState,
    frame_values: [i32; MAX_CHANNELS],
    dc_trackers: [DcOffsetTracker; MAX_CHANNELS],
    escape: EscapeState,
    message: Vec<u8>,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new(channel_count: usize) -> SpikeResult<Self> {
        StreamFormat::validate_channel_count(channel_count)?;
        Ok(Self {
            channel_count,
            profile: DeviceProfile::default(),
            hardware_type: None,
            expansion_board: ExpansionBoard::default(),
            frame: FrameState::OutsideFrame,
            frame_values: [0; MAX_CHANNELS],
            dc_trackers: [DcOffsetTracker::default(); MAX_CHANNELS],
            escape: EscapeState::Scanning { matched: 0 },
            message: Vec::with_capacity(MAX_MESSAGE_LEN),
            stats: DecoderStats::default(),
        })
    }

    /// Start decoding with a known scaling profile
    pub fn with_profile(mut self, profile: DeviceProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn profile(&self) -> DeviceProfile {
        self.profile
    }

    pub fn hardware_type(&self) -> Option<&str> {
        self.hardware_type.as_deref()
    }

    pub fn expansion_board(&self) -> ExpansionBoard {
        self.expansion_board
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Decode `bytes` into a fresh block
    pub fn decode(&mut self, bytes: &[u8], channel_count: usize) -> SpikeResult<DecodedBlock> {
        let mut out = DecodedBlock::new(channel_count);
        self.decode_into(bytes, channel_count, &mut out)?;
        Ok(out)
    }

    /// Decode `bytes`, reusing the buffers of `out`
    pub fn decode_into(
        &mut self,
        bytes: &[u8],
        channel_count: usize,
        out: &mut DecodedBlock,
    ) -> SpikeResult<()> {
        if bytes.len() > MAX_BYTES_PER_CALL {
            return Err(SpikeError::BufferOverflow {
                what: "decoder input",
                capacity: MAX_BYTES_PER_CALL,
                requested: bytes.len(),
            });
        }
        StreamFormat::validate_channel_count(channel_count)?;
        if channel_count != self.channel_count {
            debug!(from = self.channel_count, to = channel_count, "decoder channel count changed");
            self.channel_count = channel_count;
            self.reset();
        }

        out.prepare(channel_count, bytes.len() / (2 * channel_count) + 1);
        let dropped_before = self.stats.dropped_frames;

        for &byte in bytes {
            self.scan_byte(byte, out);
        }

        let dropped = self.stats.dropped_frames - dropped_before;
        if dropped > 0 {
            debug!(dropped, "malformed frames discarded");
        }
        Ok(())
    }

    fn scan_byte(&mut self, byte: u8, out: &mut DecodedBlock) {
        match self.escape {
            EscapeState::Scanning { matched } => self.scan_for_start(matched, byte, out),
            EscapeState::Capturing { matched } => self.scan_for_end(matched, byte, out),
            EscapeState::Discarding { matched } => self.discard_until_end(matched, byte),
        }
    }

    fn scan_for_start(&mut self, matched: usize, byte: u8, out: &mut DecodedBlock) {
        // Held bytes are exactly ESCAPE_SEQUENCE_START[..matched]
        let mut pending = [0u8; MARKER_LEN];
        pending[..matched].copy_from_slice(&ESCAPE_SEQUENCE_START[..matched]);
        pending[matched] = byte;
        let mut start = 0;
        let end = matched + 1;

        while start < end {
            let candidate = &pending[start..end];
            if candidate == &ESCAPE_SEQUENCE_START[..candidate.len()] {
                if candidate.len() == MARKER_LEN {
                    self.message.clear();
                    self.escape = EscapeState::Capturing { matched: 0 };
                } else {
                    self.escape = EscapeState::Scanning {
                        matched: candidate.len(),
                    };
                }
                return;
            }
            self.frame_byte(pending[start], out);
            start += 1;
        }
        self.escape = EscapeState::Scanning { matched: 0 };
    }

    fn scan_for_end(&mut self, matched: usize, byte: u8, out: &mut DecodedBlock) {
        let mut pending = [0u8; MARKER_LEN];
        pending[..matched].copy_from_slice(&ESCAPE_SEQUENCE_END[..matched]);
        pending[matched] = byte;
        let mut start = 0;
        let end = matched + 1;

        while start < end {
            let candidate = &pending[start..end];
            if candidate == &ESCAPE_SEQUENCE_END[..candidate.len()] {
                if candidate.len() == MARKER_LEN {
                    self.finish_message(out);
                    self.escape = EscapeState::Scanning { matched: 0 };
                } else {
                    self.escape = EscapeState::Capturing {
                        matched: candidate.len(),
                    };
                }
                return;
            }

            if self.message.len() == MAX_MESSAGE_LEN {
                self.reject_message();
                self.escape = EscapeState::Discarding { matched: 0 };
                for &held in &pending[start..end] {
                    self.scan_byte(held, out);
                }
                return;
            }
            self.message.push(pending[start]);
            start += 1;
        }
        self.escape = EscapeState::Capturing { matched: 0 };
    }

    fn discard_until_end(&mut self, matched: usize, byte: u8) {
        let mut pending = [0u8; MARKER_LEN];
        pending[..matched].copy_from_slice(&ESCAPE_SEQUENCE_END[..matched]);
        pending[matched] = byte;

        for start in 0..=matched {
            let candidate = &pending[start..=matched];
            if candidate == &ESCAPE_SEQUENCE_END[..candidate.len()] {
                self.escape = if candidate.len() == MARKER_LEN {
                    EscapeState::Scanning { matched: 0 }
                } else {
                    EscapeState::Discarding {
                        matched: candidate.len(),
                    }
                };
                return;
            }
        }
        self.escape = EscapeState::Discarding { matched: 0 };
    }

    fn reject_message(&mut self) {
        self.stats.oversized_messages += 1;
        warn!(
            limit = MAX_MESSAGE_LEN,
            "control message exceeds limit, skipping to end marker"
        );
        self.message.clear();
    }

    fn finish_message(&mut self, out: &mut DecodedBlock) {
        let message = ControlMessage::parse(&self.message);
        self.message.clear();
        self.stats.messages += 1;
        debug!(%message, "control message");

        match &message {
            ControlMessage::HardwareType(name) => {
                match DeviceProfile::for_hardware(name) {
                    Some(profile) => self.profile = profile,
                    None => debug!(hardware = %name, "unknown hardware type, keeping profile"),
                }
                self.hardware_type = Some(name.clone());
            }
            ControlMessage::ExpansionBoard(board) => self.expansion_board = *board,
            ControlMessage::Event(label) => {
                if out.events.len() < MAX_EVENTS_PER_CALL {
                    let index = out.samples.samples_per_channel();
                    out.events.push(Event::new(index, label.clone()));
                } else {
                    self.stats.dropped_events += 1;
                    warn!(limit = MAX_EVENTS_PER_CALL, "event limit reached, event rejected");
                }
            }
            ControlMessage::StreamFormat { .. } | ControlMessage::Unknown(_) => {}
        }
        out.messages.push(message);
    }

    fn frame_byte(&mut self, byte: u8, out: &mut DecodedBlock) {
        let flagged = byte & FRAME_START_FLAG != 0;

        match self.frame {
            FrameState::OutsideFrame => {
                if flagged {
                    self.frame = FrameState::AwaitingLsb {
                        channel: 0,
                        msb: byte & DATA_MASK,
                    };
                }
            }
            FrameState::AwaitingMsb { channel } => {
                if flagged {
                    self.drop_frame();
                    self.frame_byte(byte, out);
                } else {
                    self.frame = FrameState::AwaitingLsb { channel, msb: byte };
                }
            }
            FrameState::AwaitingLsb { channel, msb } => {
                if flagged {
                    self.drop_frame();
                    self.frame_byte(byte, out);
                    return;
                }
                let raw = ((msb as u16) << 7) | byte as u16;
                self.frame_values[channel] = self.profile.rebase(raw);
                if channel + 1 == self.channel_count {
                    self.emit_frame(out);
                    self.frame = FrameState::OutsideFrame;
                } else {
                    self.frame = FrameState::AwaitingMsb {
                        channel: channel + 1,
                    };
                }
            }
        }
    }

    fn drop_frame(&mut self) {
        self.stats.dropped_frames += 1;
        self.frame = FrameState::OutsideFrame;
    }

    fn emit_frame(&mut self, out: &mut DecodedBlock) {
        let mut frame = [0 as Sample; MAX_CHANNELS];
        for channel in 0..self.channel_count {
            let value = self.dc_trackers[channel].remove(self.frame_values[channel]);
            frame[channel] = value.clamp(i16::MIN as i32, i16::MAX as i32) as Sample;
        }
        out.samples.push_frame(&frame[..self.channel_count]);
        self.stats.frames += 1;
    }
}

impl FormatListener for FrameDecoder {
    fn format_changed(&mut self, format: StreamFormat) {
        self.channel_count = format.channel_count;
        self.reset();
    }

    fn reset(&mut self) {
        self.frame = FrameState::OutsideFrame;
        self.escape = EscapeState::Scanning { matched: 0 };
        self.message.clear();
        for tracker in &mut self.dc_trackers {
            tracker.reset();
        }
    }

    fn name(&self) -> &str {
        "Frame Decoder"
    }
}
