use crate::error::{HeaderErrorKind, IntercomError, Result};

/// Packet kind: live audio payload.
pub const KIND_AUDIO: u8 = 0;
/// Packet kind: forward-error-correction payload. Reserved, never sent.
pub const KIND_FEC: u8 = 1;

/// Fixed audio header length in bytes.
pub const AUDIO_HEADER_LEN: usize = 15;

/// Audio packet header.
///
/// ```text
/// Offset  Size  Field
/// 0       1     kind (0 = audio, 1 = FEC, reserved)
/// 1       4     sequence (u32, wrapping)
/// 5       8     timestamp_ms (i64, wall clock)
/// 13      2     payload_len (u16)
/// 15      ...   payload
/// ```
///
/// All multi-byte fields are native byte order. Only the writer side of the
/// device frames packets; inbound audio datagrams are handed to the playback
/// pipeline as raw bytes without header parsing (see
/// [`UdpAudioStream`](crate::transport::udp::UdpAudioStream)). [`parse`]
/// exists for the receiving end of the link and for round-trip tests.
///
/// [`parse`]: Self::parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioPacketHeader {
    /// Packet kind ([`KIND_AUDIO`] or [`KIND_FEC`]).
    pub kind: u8,
    /// Monotonic per-writer sequence number. Wraps at `u32::MAX`.
    pub sequence: u32,
    /// Wall-clock milliseconds at send time.
    pub timestamp_ms: i64,
    /// Payload bytes following the header.
    pub payload_len: u16,
}

impl AudioPacketHeader {
    /// Serialize into the fixed 15-byte wire layout.
    pub fn encode(&self) -> [u8; AUDIO_HEADER_LEN] {
        let mut buf = [0u8; AUDIO_HEADER_LEN];
        buf[0] = self.kind;
        buf[1..5].copy_from_slice(&self.sequence.to_ne_bytes());
        buf[5..13].copy_from_slice(&self.timestamp_ms.to_ne_bytes());
        buf[13..15].copy_from_slice(&self.payload_len.to_ne_bytes());
        buf
    }

    /// Parse a header from the front of `buf`, with bounds checks.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < AUDIO_HEADER_LEN {
            return Err(IntercomError::Header {
                kind: HeaderErrorKind::Truncated {
                    needed: AUDIO_HEADER_LEN,
                    got: buf.len(),
                },
            });
        }
        let kind = buf[0];
        if kind != KIND_AUDIO && kind != KIND_FEC {
            return Err(IntercomError::Header {
                kind: HeaderErrorKind::UnknownKind(kind),
            });
        }
        Ok(Self {
            kind,
            sequence: u32::from_ne_bytes([buf[1], buf[2], buf[3], buf[4]]),
            timestamp_ms: i64::from_ne_bytes([
                buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11], buf[12],
            ]),
            payload_len: u16::from_ne_bytes([buf[13], buf[14]]),
        })
    }
}

/// Per-writer monotonic sequence state.
///
/// Starts at 0 for every writer instance and is never reset while the
/// instance lives. The counter advances only when the owning transport
/// commits a datagram — a successful send or a masked out-of-memory drop —
/// so timeouts and fatal send failures leave it untouched.
#[derive(Debug, Default)]
pub struct AudioSequencer {
    sequence: u32,
}

impl AudioSequencer {
    pub fn new() -> Self {
        Self { sequence: 0 }
    }

    /// Sequence number the next stamped header will carry.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Build a header for the next outbound packet without committing the
    /// sequence number.
    pub fn stamp(&self, timestamp_ms: i64, payload_len: u16) -> AudioPacketHeader {
        AudioPacketHeader {
            kind: KIND_AUDIO,
            sequence: self.sequence,
            timestamp_ms,
            payload_len,
        }
    }

    /// Commit the sequence number after the datagram left (or was dropped
    /// under the out-of-memory masking policy).
    pub fn advance(&mut self) {
        self.sequence = self.sequence.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_layout() {
        let header = AudioPacketHeader {
            kind: KIND_AUDIO,
            sequence: 7,
            timestamp_ms: 1_700_000_000_123,
            payload_len: 324,
        };
        let buf = header.encode();
        assert_eq!(buf[0], KIND_AUDIO);
        assert_eq!(u32::from_ne_bytes([buf[1], buf[2], buf[3], buf[4]]), 7);
        assert_eq!(u16::from_ne_bytes([buf[13], buf[14]]), 324);
    }

    #[test]
    fn round_trip() {
        let header = AudioPacketHeader {
            kind: KIND_AUDIO,
            sequence: u32::MAX - 1,
            timestamp_ms: -42,
            payload_len: u16::MAX,
        };
        let parsed = AudioPacketHeader::parse(&header.encode()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn parse_truncated() {
        let err = AudioPacketHeader::parse(&[0u8; AUDIO_HEADER_LEN - 1]).unwrap_err();
        assert!(matches!(
            err,
            IntercomError::Header {
                kind: HeaderErrorKind::Truncated { needed: 15, got: 14 }
            }
        ));
    }

    #[test]
    fn parse_unknown_kind() {
        let mut buf = [0u8; AUDIO_HEADER_LEN];
        buf[0] = 9;
        assert!(matches!(
            AudioPacketHeader::parse(&buf).unwrap_err(),
            IntercomError::Header {
                kind: HeaderErrorKind::UnknownKind(9)
            }
        ));
    }

    #[test]
    fn sequencer_starts_at_zero_and_advances() {
        let mut seq = AudioSequencer::new();
        assert_eq!(seq.stamp(0, 10).sequence, 0);
        seq.advance();
        assert_eq!(seq.stamp(0, 10).sequence, 1);
    }

    #[test]
    fn sequencer_stamp_does_not_commit() {
        let seq = AudioSequencer::new();
        seq.stamp(0, 10);
        seq.stamp(0, 10);
        assert_eq!(seq.sequence(), 0);
    }

    #[test]
    fn sequencer_wraps() {
        let mut seq = AudioSequencer::new();
        seq.sequence = u32::MAX;
        seq.advance();
        assert_eq!(seq.sequence(), 0);
    }
}
