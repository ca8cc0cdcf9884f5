//! Network transport layer for control signaling and media delivery.
//!
//! The intercom uses a split transport model:
//!
//! - **TCP** ([`tcp`]): carries 4-byte control commands. One TCP connection
//!   per client, with a thread per connection.
//!
//! - **UDP** ([`udp`]): carries the audio media stream through directional
//!   [`UdpAudioStream`] elements — one writer and one reader per session,
//!   created on grant and closed on release, never shared between sessions.
//!
//! Video fragments travel over their own socket owned by the
//! [`VideoStreamer`](crate::streamer::VideoStreamer).

pub mod tcp;
pub mod udp;

pub use udp::UdpAudioStream;
