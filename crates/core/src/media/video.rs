use crate::error::{HeaderErrorKind, IntercomError, Result};

/// Packet kind: video frame fragment.
pub const KIND_VIDEO: u8 = 1;

/// Fixed video header length in bytes.
pub const VIDEO_HEADER_LEN: usize = 19;

/// MTU-safe maximum datagram size for video fragments.
pub const MAX_VIDEO_PACKET_SIZE: usize = 1400;

/// Maximum payload bytes per video fragment.
pub const MAX_VIDEO_PAYLOAD: usize = 1385;

/// Video packet header.
///
/// ```text
/// Offset  Size  Field
/// 0       1     kind (1 = video)
/// 1       4     frame_id (u32, one increment per captured frame)
/// 5       8     timestamp_ms (i64, shared by all fragments of a frame)
/// 13      2     payload_len (u16)
/// 15      2     packet_index (u16, 0-based position within the frame)
/// 17      2     packet_total (u16, fragment count for the frame)
/// 19      ...   payload
/// ```
///
/// Native byte order throughout. The receiver reconstructs a frame once it
/// has seen `packet_total` distinct indices for one `frame_id`; reassembly
/// itself happens on the receiving side and is not implemented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoPacketHeader {
    pub frame_id: u32,
    pub timestamp_ms: i64,
    pub payload_len: u16,
    pub packet_index: u16,
    pub packet_total: u16,
}

impl VideoPacketHeader {
    /// Serialize into the fixed 19-byte wire layout.
    pub fn encode(&self) -> [u8; VIDEO_HEADER_LEN] {
        let mut buf = [0u8; VIDEO_HEADER_LEN];
        buf[0] = KIND_VIDEO;
        buf[1..5].copy_from_slice(&self.frame_id.to_ne_bytes());
        buf[5..13].copy_from_slice(&self.timestamp_ms.to_ne_bytes());
        buf[13..15].copy_from_slice(&self.payload_len.to_ne_bytes());
        buf[15..17].copy_from_slice(&self.packet_index.to_ne_bytes());
        buf[17..19].copy_from_slice(&self.packet_total.to_ne_bytes());
        buf
    }

    /// Parse a header from the front of `buf`, with bounds checks.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < VIDEO_HEADER_LEN {
            return Err(IntercomError::Header {
                kind: HeaderErrorKind::Truncated {
                    needed: VIDEO_HEADER_LEN,
                    got: buf.len(),
                },
            });
        }
        if buf[0] != KIND_VIDEO {
            return Err(IntercomError::Header {
                kind: HeaderErrorKind::UnknownKind(buf[0]),
            });
        }
        Ok(Self {
            frame_id: u32::from_ne_bytes([buf[1], buf[2], buf[3], buf[4]]),
            timestamp_ms: i64::from_ne_bytes([
                buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11], buf[12],
            ]),
            payload_len: u16::from_ne_bytes([buf[13], buf[14]]),
            packet_index: u16::from_ne_bytes([buf[15], buf[16]]),
            packet_total: u16::from_ne_bytes([buf[17], buf[18]]),
        })
    }
}

/// Splits captured frames into headered fragments.
///
/// For a frame of `L` bytes and a maximum payload of `M`, produces
/// `ceil(L / M)` fragments; fragment `i` carries `frame[i*M .. min(L, (i+1)*M)]`.
/// All fragments of one frame share the frame id and timestamp. The frame id
/// advances exactly once per [`fragment`](Self::fragment) call — per captured
/// frame — no matter how many fragments are later sent or dropped, and it
/// survives stream stop/start for the life of the fragmenter.
#[derive(Debug)]
pub struct FrameFragmenter {
    frame_id: u32,
    max_payload: usize,
}

impl FrameFragmenter {
    pub fn new(max_payload: usize) -> Result<Self> {
        if max_payload == 0 {
            return Err(IntercomError::InvalidConfig {
                reason: "video fragment payload size must be nonzero",
            });
        }
        if max_payload > MAX_VIDEO_PAYLOAD {
            return Err(IntercomError::InvalidConfig {
                reason: "video fragment payload size exceeds MTU-safe maximum",
            });
        }
        Ok(Self {
            frame_id: 0,
            max_payload,
        })
    }

    /// Frame id the next captured frame will carry.
    pub fn next_frame_id(&self) -> u32 {
        self.frame_id
    }

    /// Fragment one captured frame, consuming a frame id.
    ///
    /// A zero-length frame yields no fragments but still consumes its id.
    pub fn fragment<'a>(
        &mut self,
        frame: &'a [u8],
        timestamp_ms: i64,
    ) -> Vec<(VideoPacketHeader, &'a [u8])> {
        let frame_id = self.frame_id;
        self.frame_id = self.frame_id.wrapping_add(1);

        let packet_total = frame.len().div_ceil(self.max_payload) as u16;
        frame
            .chunks(self.max_payload)
            .enumerate()
            .map(|(index, chunk)| {
                (
                    VideoPacketHeader {
                        frame_id,
                        timestamp_ms,
                        payload_len: chunk.len() as u16,
                        packet_index: index as u16,
                        packet_total,
                    },
                    chunk,
                )
            })
            .collect()
    }
}
