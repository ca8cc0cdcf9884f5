//! Wire formats for the two intercom UDP media protocols.
//!
//! Both protocols frame each datagram with a small fixed-offset header
//! followed immediately by the payload. Multi-byte fields are written in
//! **native byte order** with no endianness tag — sender and receiver are
//! assumed to share architecture, as the original deployment does.
//!
//! | Protocol | Module | Header | Destination |
//! |----------|--------|--------|-------------|
//! | Audio    | [`audio`] | 15 bytes | client, configured audio port |
//! | Video    | [`video`] | 19 bytes | client, fixed video port |
//!
//! The audio protocol carries one microphone chunk per datagram with a
//! monotonic sequence number. The video protocol fragments each captured
//! frame across several datagrams that share a frame id and carry their
//! index and the fragment total, so the receiver can detect frame
//! completion. Neither side reorders or retransmits; loss is tolerated.

pub mod audio;
pub mod video;

/// Wall-clock milliseconds since the Unix epoch, as stamped into headers.
pub fn wall_clock_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
