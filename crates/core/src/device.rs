use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clients::ClientTable;
use crate::error::{IntercomError, Result};
use crate::media::video::MAX_VIDEO_PAYLOAD;
use crate::protocol::Command;
use crate::session::{AudioIo, SessionConfig, TalkArbiter};
use crate::streamer::{FrameSource, StreamerConfig, VideoStreamer};
use crate::transport::tcp;

/// Device-level configuration.
///
/// Every tunable of the core lives here; the defaults match the reference
/// deployment. Control and outbound audio share the port number 12345 by
/// convention — they are logically independent channels (TCP vs. UDP).
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Control listener bind address (host:port).
    pub control_bind: String,
    /// UDP destination port for outbound audio; also the local bind port of
    /// the inbound audio reader.
    pub audio_port: u16,
    /// Fixed UDP destination port for video fragments.
    pub video_port: u16,
    /// Concurrent control connections accepted.
    pub max_clients: usize,
    /// Audio chunk size per datagram and per pump iteration.
    pub audio_buffer_len: usize,
    /// Bound applied when a transport read would otherwise wait forever.
    pub read_timeout_cap: Duration,
    /// Per-socket write timeout; keeps responses and the doorbell fan-out
    /// from blocking on a stalled client.
    pub control_write_timeout: Duration,
    /// Steady-state delay between video captures.
    pub frame_interval: Duration,
    /// Subtracted from the frame interval to offset transmit time.
    pub send_compensation: Duration,
    /// Extra delay after out-of-memory video send errors.
    pub oom_backoff: Duration,
    /// Sleep when an audio source briefly has nothing to deliver.
    pub pump_idle_backoff: Duration,
    /// Maximum payload bytes per video fragment.
    pub max_video_payload: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            control_bind: "0.0.0.0:12345".to_string(),
            audio_port: 12345,
            video_port: 12346,
            max_clients: 5,
            audio_buffer_len: 324,
            read_timeout_cap: Duration::from_millis(100),
            control_write_timeout: Duration::from_secs(1),
            frame_interval: Duration::from_millis(50),
            send_compensation: Duration::from_millis(10),
            oom_backoff: Duration::from_millis(20),
            pump_idle_backoff: Duration::from_millis(5),
            max_video_payload: MAX_VIDEO_PAYLOAD,
        }
    }
}

impl DeviceConfig {
    fn validate(&self) -> Result<()> {
        if self.max_clients == 0 {
            return Err(IntercomError::InvalidConfig {
                reason: "client capacity must be nonzero",
            });
        }
        if self.control_write_timeout.is_zero() {
            return Err(IntercomError::InvalidConfig {
                reason: "control write timeout must be nonzero",
            });
        }
        if self.audio_buffer_len == 0 || self.audio_buffer_len > u16::MAX as usize {
            return Err(IntercomError::InvalidConfig {
                reason: "audio buffer length must fit the wire format's u16 payload field",
            });
        }
        if self.read_timeout_cap.is_zero() {
            return Err(IntercomError::InvalidConfig {
                reason: "read timeout cap must be nonzero",
            });
        }
        Ok(())
    }

    fn streamer(&self) -> StreamerConfig {
        StreamerConfig {
            video_port: self.video_port,
            frame_interval: self.frame_interval,
            send_compensation: self.send_compensation,
            oom_backoff: self.oom_backoff,
            max_payload: self.max_video_payload,
        }
    }

    fn session(&self) -> SessionConfig {
        SessionConfig {
            audio_port: self.audio_port,
            audio_buffer_len: self.audio_buffer_len,
            read_timeout_cap: self.read_timeout_cap,
            pump_idle_backoff: self.pump_idle_backoff,
        }
    }
}

/// High-level intercom device orchestrator.
///
/// Owns the client table and the talk arbiter, and delegates connection
/// handling to [`transport::tcp`](crate::transport::tcp). The peripheral
/// layer interacts through exactly two operations:
/// [`ring_doorbell`](Self::ring_doorbell) and
/// [`is_talk_active`](Self::is_talk_active).
pub struct Device {
    clients: ClientTable,
    arbiter: TalkArbiter,
    running: Arc<AtomicBool>,
    config: DeviceConfig,
}

impl Device {
    /// Build a device from its configuration and hardware collaborators.
    /// Configuration errors are fatal here, before any socket is touched.
    pub fn new(
        config: DeviceConfig,
        audio: Arc<dyn AudioIo>,
        camera: Box<dyn FrameSource>,
    ) -> Result<Self> {
        config.validate()?;
        let video = VideoStreamer::new(camera, config.streamer())?;
        let clients = ClientTable::new(config.max_clients);
        let arbiter = TalkArbiter::new(
            clients.clone(),
            audio,
            Arc::new(Mutex::new(video)),
            config.session(),
        );
        Ok(Self {
            clients,
            arbiter,
            running: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    /// Bind the control listener and spawn the accept loop.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(IntercomError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.config.control_bind)?;
        listener.set_nonblocking(true)?;

        self.running.store(true, Ordering::SeqCst);

        let clients = self.clients.clone();
        let arbiter = self.arbiter.clone();
        let running = self.running.clone();
        let write_timeout = self.config.control_write_timeout;

        tracing::info!(addr = %self.config.control_bind, "control server listening");

        thread::spawn(move || {
            tcp::accept_loop(listener, clients, arbiter, write_timeout, running);
        });

        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("device stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Fan the doorbell notification out to every connected client,
    /// best-effort. Returns the number of clients reached.
    pub fn ring_doorbell(&self) -> usize {
        let delivered = self.clients.broadcast(Command::DoorbellRing.to_wire());
        tracing::info!(delivered, "doorbell ring broadcast");
        delivered
    }

    /// Whether a talk session is currently active (peripheral-layer query).
    pub fn is_talk_active(&self) -> bool {
        self.arbiter.is_talk_active()
    }

    /// Number of currently connected control clients.
    pub fn connected_clients(&self) -> usize {
        self.clients.connected_count()
    }

    /// Shared handle to the talk arbiter.
    pub fn arbiter(&self) -> &TalkArbiter {
        &self.arbiter
    }
}
