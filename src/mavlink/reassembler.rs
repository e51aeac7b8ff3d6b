//! # Stream Reassembler
//!
//! Accumulates raw bytes from the transport and yields validated frames.
//!
//! The reassembler is the single place that interprets the byte stream:
//!
//! 1. Scan for a start marker (0xFE / 0xFD) and drop everything before it
//! 2. Wait until the header tells the frame length
//! 3. Wait until the whole frame is buffered
//! 4. Validate it; on success emit it, on failure drop the whole candidate
//!
//! The buffer is bounded. On overflow it is cleared: bytes may be lost, but a
//! partial or corrupted frame is never emitted.

use bytes::{Buf, BytesMut};
use tracing::{trace, warn};

use super::decoder::{decode_frame, DecodeOutcome, InvalidFrame};
use super::protocol::{is_start_marker, Frame, MAVLINK_MAX_FRAME_LEN};

/// Default reassembly buffer capacity in bytes
pub const DEFAULT_REASSEMBLY_CAPACITY: usize = 4096;

/// Counters describing what the reassembler has seen
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReassemblerStats {
    /// Frames that passed validation
    pub frames: u64,

    /// Candidate frames rejected by the checksum
    pub crc_failures: u64,

    /// Bytes dropped while hunting for a start marker
    pub discarded_bytes: u64,

    /// Times the buffer was reset because it was full
    pub overflows: u64,
}

/// Bounded frame reassembly buffer
#[derive(Debug)]
pub struct Reassembler {
    buffer: BytesMut,
    capacity: usize,
    stats: ReassemblerStats,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    /// Create a reassembler with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REASSEMBLY_CAPACITY)
    }

    /// Create a reassembler with a custom capacity
    ///
    /// The capacity is raised to the largest possible frame if smaller.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(MAVLINK_MAX_FRAME_LEN);
        Self {
            buffer: BytesMut::with_capacity(capacity),
            capacity,
            stats: ReassemblerStats::default(),
        }
    }

    /// Append an inbound chunk and return every frame it completes, in arrival order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();

        for piece in chunk.chunks(self.capacity) {
            if self.buffer.len() + piece.len() > self.capacity {
                warn!(
                    "Reassembly buffer full ({} + {} > {} bytes), resetting",
                    self.buffer.len(),
                    piece.len(),
                    self.capacity
                );
                self.stats.overflows += 1;
                self.stats.discarded_bytes += self.buffer.len() as u64;
                self.buffer.clear();
            }

            self.buffer.extend_from_slice(piece);
            self.extract_frames(&mut frames);
        }

        frames
    }

    /// Number of bytes waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Counters since creation
    pub fn stats(&self) -> ReassemblerStats {
        self.stats
    }

    /// Drop any buffered bytes
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn extract_frames(&mut self, frames: &mut Vec<Frame>) {
        loop {
            match self.buffer.iter().position(|&b| is_start_marker(b)) {
                Some(0) => {}
                Some(skip) => {
                    trace!("Discarding {} bytes before start marker", skip);
                    self.stats.discarded_bytes += skip as u64;
                    self.buffer.advance(skip);
                }
                None => {
                    self.stats.discarded_bytes += self.buffer.len() as u64;
                    self.buffer.clear();
                    return;
                }
            }

            match decode_frame(&self.buffer) {
                DecodeOutcome::Incomplete => return,
                DecodeOutcome::Frame { frame, consumed } => {
                    self.buffer.advance(consumed);
                    self.stats.frames += 1;
                    frames.push(frame);
                }
                DecodeOutcome::Invalid { consumed, reason } => {
                    if let InvalidFrame::CrcMismatch { expected, received } = reason {
                        trace!(
                            "Dropping {} byte candidate frame: CRC mismatch (expected 0x{:04X}, got 0x{:04X})",
                            consumed,
                            expected,
                            received
                        );
                        self.stats.crc_failures += 1;
                    }
                    // Bytes of a rejected frame are never scanned again
                    let consumed = consumed.clamp(1, self.buffer.len());
                    self.stats.discarded_bytes += consumed as u64;
                    self.buffer.advance(consumed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mavlink::encoder::{encode_v1_frame, encode_v2_frame};
    use crate::mavlink::protocol::*;
    use proptest::prelude::*;

    fn sample_stream() -> Vec<u8> {
        let mut stream = Vec::new();
        stream.extend(encode_v1_frame(0, &[1, 0, 0, 0, 2, 3, 0x51, 3, 3], 1, 1, 1).unwrap());
        stream.extend(encode_v2_frame(MSG_ID_STATUSTEXT as u32, &[6; 51], 2, 1, 1).unwrap());
        stream.extend(encode_v1_frame(MSG_ID_COMMAND_ACK as u8, &[241, 0, 0], 3, 1, 1).unwrap());
        stream.extend(encode_v2_frame(MSG_ID_FILE_TRANSFER_PROTOCOL, &[0xFE; 30], 4, 1, 1).unwrap());
        stream
    }

    #[test]
    fn test_single_chunk() {
        let mut reassembler = Reassembler::new();
        let frames = reassembler.push(&sample_stream());

        assert_eq!(frames.len(), 4);
        assert_eq!(
            frames.iter().map(|f| f.sequence).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        assert_eq!(reassembler.buffered(), 0);
        assert_eq!(reassembler.stats().frames, 4);
    }

    #[test]
    fn test_byte_at_a_time() {
        let stream = sample_stream();
        let mut reassembler = Reassembler::new();
        let mut frames = Vec::new();

        for byte in &stream {
            frames.extend(reassembler.push(std::slice::from_ref(byte)));
        }

        assert_eq!(frames, Reassembler::new().push(&stream));
    }

    #[test]
    fn test_garbage_prefix_is_discarded() {
        let frame = encode_v1_frame(0, &[0; 9], 42, 1, 1).unwrap();
        let mut stream = vec![0x00, 0x13, 0x37, 0x99, 0x42];
        stream.extend_from_slice(&frame);

        let mut reassembler = Reassembler::new();
        let frames = reassembler.push(&stream);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 42);
        assert_eq!(reassembler.stats().discarded_bytes, 5);
    }

    #[test]
    fn test_false_marker_candidate_is_dropped_whole() {
        // A stray 0xFE whose bogus length spans into the next frame takes it down too
        let first = encode_v1_frame(0, &[0; 9], 7, 1, 1).unwrap();
        let second = encode_v1_frame(0, &[0; 9], 8, 1, 1).unwrap();
        let mut stream = vec![0xFE, 0x03, 0x00];
        stream.extend_from_slice(&first);
        stream.extend_from_slice(&second);

        let mut reassembler = Reassembler::new();
        let frames = reassembler.push(&stream);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 8);
        assert_eq!(reassembler.stats().crc_failures, 1);
        assert_eq!(reassembler.buffered(), 0);
    }

    #[test]
    fn test_frame_inside_rejected_payload_is_not_surfaced() {
        // STATUSTEXT whose text carries a complete heartbeat frame
        let inner = encode_v1_frame(0, &[0; 9], 77, 1, 1).unwrap();
        let mut payload = vec![6];
        payload.extend_from_slice(&inner);
        payload.resize(51, 0);

        let mut outer = encode_v1_frame(MSG_ID_STATUSTEXT as u8, &payload, 5, 1, 1).unwrap();
        let last = outer.len() - 1;
        outer[last] ^= 0xFF;
        outer.extend(encode_v1_frame(0, &[0; 9], 6, 1, 1).unwrap());

        let frames = Reassembler::new().push(&outer);
        assert_eq!(frames.iter().map(|f| f.sequence).collect::<Vec<_>>(), vec![6]);
    }

    #[test]
    fn test_corrupted_frame_is_dropped() {
        let mut bad = encode_v1_frame(0, &[0; 9], 1, 1, 1).unwrap();
        bad[8] ^= 0x10;
        let good = encode_v1_frame(0, &[0; 9], 2, 1, 1).unwrap();

        let mut stream = bad;
        stream.extend_from_slice(&good);

        let mut reassembler = Reassembler::new();
        let frames = reassembler.push(&stream);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 2);
        assert_eq!(reassembler.stats().crc_failures, 1);
    }

    #[test]
    fn test_partial_frame_is_kept() {
        let frame = encode_v1_frame(0, &[0; 9], 1, 1, 1).unwrap();
        let mut reassembler = Reassembler::new();

        assert!(reassembler.push(&frame[..10]).is_empty());
        assert_eq!(reassembler.buffered(), 10);

        let frames = reassembler.push(&frame[10..]);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_overflow_resets_without_emitting_partial_frames() {
        let mut reassembler = Reassembler::with_capacity(MAVLINK_MAX_FRAME_LEN);

        // A signed V2 header promising a full-size frame that never completes
        let mut stuck = vec![0xFD, 0xFF, 0x01];
        stuck.extend(std::iter::repeat(0x00).take(267));
        assert!(reassembler.push(&stuck).is_empty());

        let frame = encode_v1_frame(0, &[0; 9], 9, 1, 1).unwrap();
        let frames = reassembler.push(&frame);

        assert_eq!(reassembler.stats().overflows, 1);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 9);
    }

    #[test]
    fn test_capacity_has_floor() {
        let reassembler = Reassembler::with_capacity(10);
        assert_eq!(reassembler.capacity, MAVLINK_MAX_FRAME_LEN);
    }

    fn arbitrary_frame() -> impl Strategy<Value = Vec<u8>> {
        let ids = prop::sample::select(vec![
            MSG_ID_HEARTBEAT,
            MSG_ID_PARAM_VALUE,
            MSG_ID_COMMAND_ACK,
            MSG_ID_STATUSTEXT,
            MSG_ID_RC_CHANNELS,
            MSG_ID_FILE_TRANSFER_PROTOCOL,
        ]);
        (ids, prop::collection::vec(any::<u8>(), 0..64), any::<u8>(), any::<bool>()).prop_map(
            |(id, payload, seq, v2)| {
                if v2 {
                    encode_v2_frame(id, &payload, seq, 1, 1).unwrap()
                } else {
                    encode_v1_frame(id as u8, &payload, seq, 1, 1).unwrap()
                }
            },
        )
    }

    proptest! {
        #[test]
        fn prop_chunk_boundaries_do_not_matter(
            frames in prop::collection::vec(arbitrary_frame(), 1..8),
            cuts in prop::collection::vec(1usize..40, 1..64),
        ) {
            let stream: Vec<u8> = frames.concat();
            let expected = Reassembler::new().push(&stream);
            prop_assert_eq!(expected.len(), frames.len());

            let mut reassembler = Reassembler::new();
            let mut actual = Vec::new();
            let mut rest = stream.as_slice();
            let mut cut = cuts.iter().cycle();
            while !rest.is_empty() {
                let n = (*cut.next().unwrap()).min(rest.len());
                actual.extend(reassembler.push(&rest[..n]));
                rest = &rest[n..];
            }

            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn prop_garbage_prefix_yields_the_frame(
            garbage in prop::collection::vec(any::<u8>().prop_filter("no markers", |b| !is_start_marker(*b)), 0..64),
            frame in arbitrary_frame(),
        ) {
            let mut stream = garbage;
            stream.extend_from_slice(&frame);

            let frames = Reassembler::new().push(&stream);
            prop_assert_eq!(frames.len(), 1);
            prop_assert_eq!(frames[0].wire_len(), frame.len());
        }
    }
}
