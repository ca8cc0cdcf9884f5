use std::io::IoSlice;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use socket2::{SockAddr, SockRef};

use crate::error::{IntercomError, Result};
use crate::media;
use crate::media::audio::AudioSequencer;
use crate::pipeline::{IoOutcome, LogStatus, Stage, StatusSink, StreamStatus};

/// Cap applied to "wait indefinitely" reads so close/cancel requests are
/// observed within a bounded interval.
pub const DEFAULT_READ_TIMEOUT_CAP: Duration = Duration::from_millis(100);

/// Direction of a [`UdpAudioStream`], fixed for the element's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    /// Frames microphone chunks and sends them to the remote address.
    Writer,
    /// Receives datagrams on the local audio port.
    Reader,
}

/// Construction parameters for a [`UdpAudioStream`].
#[derive(Debug, Clone)]
pub struct UdpStreamConfig {
    pub direction: StreamDirection,
    /// Writer: destination of every datagram. Reader: only the port is used,
    /// bound on all local interfaces.
    pub remote_addr: SocketAddr,
    /// Maximum payload per datagram; longer writes are truncated to this.
    pub buffer_len: usize,
    /// Bound substituted when a caller asks to wait indefinitely on read.
    pub read_timeout_cap: Duration,
}

impl UdpStreamConfig {
    pub fn writer(remote_addr: SocketAddr, buffer_len: usize) -> Self {
        Self {
            direction: StreamDirection::Writer,
            remote_addr,
            buffer_len,
            read_timeout_cap: DEFAULT_READ_TIMEOUT_CAP,
        }
    }

    pub fn reader(port: u16, buffer_len: usize) -> Self {
        Self {
            direction: StreamDirection::Reader,
            remote_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            buffer_len,
            read_timeout_cap: DEFAULT_READ_TIMEOUT_CAP,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.buffer_len == 0 {
            return Err(IntercomError::InvalidConfig {
                reason: "audio buffer length must be nonzero",
            });
        }
        if self.buffer_len > u16::MAX as usize {
            return Err(IntercomError::InvalidConfig {
                reason: "audio buffer length exceeds the wire format's u16 payload field",
            });
        }
        if self.read_timeout_cap.is_zero() {
            return Err(IntercomError::InvalidConfig {
                reason: "read timeout cap must be nonzero",
            });
        }
        Ok(())
    }
}

/// One direction of the audio media path over UDP.
///
/// The writer side frames each chunk with a 15-byte
/// [`AudioPacketHeader`](crate::media::audio::AudioPacketHeader) and sends
/// header plus payload as a single datagram using scatter/gather I/O, so the
/// payload is never copied into a staging buffer. The reader side hands
/// datagram bytes to the playback pipeline as-is: it strips no header and
/// parses nothing — the device assumes inbound audio is headerless. (Whether
/// the remote sender agrees is a protocol-level question this element does
/// not answer.)
///
/// Failure policy, per call:
/// - receive timeout → [`IoOutcome::Timeout`], the caller substitutes silence;
/// - out-of-memory on send → masked as success, datagram dropped;
/// - anything else → [`StatusSink`] notification plus [`IoOutcome::Fatal`].
pub struct UdpAudioStream {
    config: UdpStreamConfig,
    socket: Option<UdpSocket>,
    sequencer: AudioSequencer,
    byte_pos: u64,
    status: Arc<dyn StatusSink>,
}

impl UdpAudioStream {
    /// Create a closed element. Fails fast on invalid configuration.
    pub fn new(config: UdpStreamConfig) -> Result<Self> {
        Self::with_status(config, Arc::new(LogStatus))
    }

    /// Create with an explicit status sink for pipeline notifications.
    pub fn with_status(config: UdpStreamConfig, status: Arc<dyn StatusSink>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            socket: None,
            sequencer: AudioSequencer::new(),
            byte_pos: 0,
            status,
        })
    }

    pub fn direction(&self) -> StreamDirection {
        self.config.direction
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Sequence number the next outbound datagram will carry.
    pub fn sequence(&self) -> u32 {
        self.sequencer.sequence()
    }

    /// Cumulative bytes received since open (reader side).
    pub fn byte_position(&self) -> u64 {
        self.byte_pos
    }
}

impl Stage for UdpAudioStream {
    /// Create and bind the socket. Opening an open element is a no-op.
    fn open(&mut self) -> Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }
        let socket = match self.config.direction {
            // Ephemeral local port; the kernel picks one per session.
            StreamDirection::Writer => match self.config.remote_addr.ip() {
                IpAddr::V4(_) => UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?,
                IpAddr::V6(_) => UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0))?,
            },
            StreamDirection::Reader => {
                UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.config.remote_addr.port()))?
            }
        };
        tracing::info!(
            direction = ?self.config.direction,
            remote = %self.config.remote_addr,
            "UDP audio stream opened"
        );
        self.socket = Some(socket);
        Ok(())
    }

    /// Shut the socket down and report the final byte position. Idempotent.
    fn close(&mut self) -> Result<()> {
        if self.socket.take().is_none() {
            tracing::debug!("UDP audio stream already closed");
            return Ok(());
        }
        tracing::info!(direction = ?self.config.direction, "UDP audio stream closed");
        self.status.report_position(self.byte_pos);
        self.byte_pos = 0;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], wait: Option<Duration>) -> IoOutcome {
        if self.config.direction != StreamDirection::Reader {
            tracing::warn!("read called on the writer element");
            return IoOutcome::Fatal;
        }
        let Some(socket) = self.socket.as_ref() else {
            tracing::warn!("UDP audio stream not open");
            return IoOutcome::Fatal;
        };
        if buf.is_empty() {
            return IoOutcome::Done(0);
        }

        let timeout = match wait {
            Some(d) if !d.is_zero() => d,
            // "Wait forever" would defeat cancellation; bound it.
            _ => self.config.read_timeout_cap,
        };
        if let Err(e) = socket.set_read_timeout(Some(timeout)) {
            tracing::error!(error = %e, "failed to arm receive timeout");
            self.status.report_status(StreamStatus::InputError);
            return IoOutcome::Fatal;
        }

        match socket.recv(buf) {
            Ok(n) => {
                self.byte_pos += n as u64;
                IoOutcome::Done(n)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                tracing::trace!("UDP receive timed out");
                IoOutcome::Timeout
            }
            Err(e) => {
                tracing::error!(error = %e, "UDP receive failed");
                self.status.report_status(StreamStatus::InputError);
                IoOutcome::Fatal
            }
        }
    }

    fn write(&mut self, buf: &[u8], _wait: Option<Duration>) -> IoOutcome {
        if self.config.direction != StreamDirection::Writer {
            tracing::warn!("write called on the reader element");
            return IoOutcome::Fatal;
        }
        let Some(socket) = self.socket.as_ref() else {
            tracing::warn!("UDP audio stream not open");
            return IoOutcome::Fatal;
        };
        if buf.is_empty() {
            tracing::debug!("zero-length write, ignoring");
            return IoOutcome::Done(0);
        }

        let requested = buf.len();
        let payload = if requested > self.config.buffer_len {
            tracing::warn!(
                requested,
                limit = self.config.buffer_len,
                "write exceeds configured limit, truncating"
            );
            &buf[..self.config.buffer_len]
        } else {
            buf
        };

        let header = self
            .sequencer
            .stamp(media::wall_clock_ms(), payload.len() as u16)
            .encode();
        let iov = [IoSlice::new(&header), IoSlice::new(payload)];
        let dest = SockAddr::from(self.config.remote_addr);

        match SockRef::from(socket).send_to_vectored(&iov, &dest) {
            Ok(_) => {
                self.sequencer.advance();
                IoOutcome::Done(payload.len())
            }
            Err(e) if e.kind() == std::io::ErrorKind::OutOfMemory => {
                // Deliberate lossy policy: a transient local allocation
                // shortage must not stall the owning pipeline. The datagram
                // is dropped and the call reports the requested length.
                tracing::warn!(len = payload.len(), "send hit local memory exhaustion, dropping datagram");
                self.sequencer.advance();
                IoOutcome::Done(requested)
            }
            Err(e) => {
                tracing::error!(error = %e, len = payload.len(), "UDP send failed");
                self.status.report_status(StreamStatus::OutputError);
                IoOutcome::Fatal
            }
        }
    }
}

impl Drop for UdpAudioStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
