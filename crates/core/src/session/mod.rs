//! Talk-slot arbitration and streaming-session lifecycle.
//!
//! The device has one shared streaming resource: the microphone/speaker
//! path plus the camera. At most one client may hold it. The
//! [`TalkArbiter`] serializes access:
//!
//! ```text
//! request_talk  Idle            -> Granted(client)   (otherwise denied)
//! end_talk      Granted(client) -> Idle              (holder only)
//! disconnect    Granted(client) -> Idle              (implicit end_talk)
//! ```
//!
//! A grant atomically brings up the whole session — outbound audio writer,
//! inbound audio reader, and the video loop, all aimed at the client's
//! address. If any of the three fails to start, everything started so far is
//! torn down and the client sees an ordinary denial: full capability or
//! none. Requests race under a single lock, strictly first-come-first-served;
//! denied clients simply re-request later — there is no queue.
//!
//! Lock order wherever both are needed: connection table, then talk slot.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clients::{ClientId, ClientTable};
use crate::error::Result;
use crate::pipeline::{Pump, Stage};
use crate::streamer::VideoStreamer;
use crate::transport::udp::{UdpAudioStream, UdpStreamConfig};

/// Device-side audio endpoints, provided by the hardware layer. Each call
/// yields a fresh stage, opened and closed with the session that uses it.
pub trait AudioIo: Send + Sync {
    /// Capture stage reading microphone bytes.
    fn mic(&self) -> Box<dyn Stage>;
    /// Playback stage accepting speaker bytes.
    fn speaker(&self) -> Box<dyn Stage>;
}

/// Verdict of a talk request. A grant that fails to start its session is
/// reported as `Denied` — the caller cannot observe a half-built session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TalkVerdict {
    Granted,
    Denied,
}

/// Verdict of an end-talk request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseVerdict {
    Ended,
    /// The caller does not hold the slot; nothing changed.
    NotHolder,
}

/// Session-level tunables, derived from the device configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// UDP destination port for outbound audio, and the local port the
    /// inbound reader binds.
    pub audio_port: u16,
    /// Chunk size moved per pump iteration and the writer's payload limit.
    pub audio_buffer_len: usize,
    /// Bound applied to indefinite reads inside the transport elements.
    pub read_timeout_cap: Duration,
    /// Sleep when an audio source briefly has nothing to deliver.
    pub pump_idle_backoff: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            audio_port: 12345,
            audio_buffer_len: 324,
            read_timeout_cap: Duration::from_millis(100),
            pump_idle_backoff: Duration::from_millis(5),
        }
    }
}

/// Media resources bundled for one granted client. All three are live while
/// the bundle exists; teardown is sequential and best-effort.
struct StreamingSession {
    target_addr: SocketAddr,
    /// Microphone -> UDP writer.
    capture_pump: Pump,
    /// UDP reader -> speaker.
    playback_pump: Pump,
}

/// The single-holder permission token gating the streaming resource.
#[derive(Debug, Default)]
struct TalkSlot {
    holder: Option<ClientId>,
}

struct ArbiterState {
    slot: TalkSlot,
    session: Option<StreamingSession>,
}

/// Grants, revokes, and cleans up the talk slot across connected clients.
///
/// Cloneable handle; all clones share one slot. The slot and its session are
/// mutated only under the internal mutex, so concurrent requests resolve to
/// exactly one grant and competing callers observe either the full session
/// or none of it.
#[derive(Clone)]
pub struct TalkArbiter {
    state: Arc<Mutex<ArbiterState>>,
    clients: ClientTable,
    audio: Arc<dyn AudioIo>,
    video: Arc<Mutex<VideoStreamer>>,
    config: SessionConfig,
}

impl TalkArbiter {
    pub fn new(
        clients: ClientTable,
        audio: Arc<dyn AudioIo>,
        video: Arc<Mutex<VideoStreamer>>,
        config: SessionConfig,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(ArbiterState {
                slot: TalkSlot::default(),
                session: None,
            })),
            clients,
            audio,
            video,
            config,
        }
    }

    /// Current holder, if any.
    pub fn holder(&self) -> Option<ClientId> {
        self.state.lock().slot.holder
    }

    /// Whether a talk session is active (peripheral-layer query).
    pub fn is_talk_active(&self) -> bool {
        self.state.lock().slot.holder.is_some()
    }

    /// Resolve a talk request. First-come-first-served; no queuing.
    pub fn request_talk(&self, client: ClientId) -> TalkVerdict {
        // Connection table first, then the slot lock.
        let Some(remote_ip) = self.clients.remote_ip(client) else {
            tracing::warn!(client, "talk request from unknown client");
            return TalkVerdict::Denied;
        };

        let mut state = self.state.lock();
        if let Some(holder) = state.slot.holder {
            tracing::info!(client, holder, "talk denied, slot already held");
            return TalkVerdict::Denied;
        }

        match self.start_session(remote_ip) {
            Ok(session) => {
                state.slot.holder = Some(client);
                state.session = Some(session);
                tracing::info!(client, ip = %remote_ip, "talk granted");
                TalkVerdict::Granted
            }
            Err(e) => {
                // Rollback already happened inside start_session; the client
                // sees an ordinary denial rather than a half-started session.
                tracing::error!(client, error = %e, "session start failed, talk not granted");
                TalkVerdict::Denied
            }
        }
    }

    /// Release the slot. Only the holder may end its own session.
    pub fn end_talk(&self, client: ClientId) -> ReleaseVerdict {
        let mut state = self.state.lock();
        if state.slot.holder != Some(client) {
            tracing::warn!(
                client,
                holder = ?state.slot.holder,
                "end-talk from non-holder"
            );
            return ReleaseVerdict::NotHolder;
        }

        if let Some(session) = state.session.take() {
            self.teardown(session);
        }
        state.slot.holder = None;
        tracing::info!(client, "talk ended");
        ReleaseVerdict::Ended
    }

    /// Connection-loss cleanup: implicit end-talk when the client holds the
    /// slot, then slot reclaim in the connection table either way.
    pub fn on_client_disconnect(&self, client: ClientId) {
        {
            let mut state = self.state.lock();
            if state.slot.holder == Some(client) {
                tracing::info!(client, "holder disconnected, releasing talk slot");
                if let Some(session) = state.session.take() {
                    self.teardown(session);
                }
                state.slot.holder = None;
            }
        }
        self.clients.remove(client);
    }

    /// Bring up the full media bundle for `remote_ip`. Anything started
    /// before a failure is stopped again before the error returns.
    fn start_session(&self, remote_ip: IpAddr) -> Result<StreamingSession> {
        let target_addr = SocketAddr::new(remote_ip, self.config.audio_port);

        let mut writer = UdpAudioStream::new(UdpStreamConfig::writer(
            target_addr,
            self.config.audio_buffer_len,
        ))?;
        writer.open()?;

        let mut reader_cfg =
            UdpStreamConfig::reader(self.config.audio_port, self.config.audio_buffer_len);
        reader_cfg.read_timeout_cap = self.config.read_timeout_cap;
        let mut reader = UdpAudioStream::new(reader_cfg)?;
        if let Err(e) = reader.open() {
            let _ = writer.close();
            return Err(e);
        }

        let mut mic = self.audio.mic();
        if let Err(e) = mic.open() {
            let _ = writer.close();
            let _ = reader.close();
            return Err(e);
        }
        let mut speaker = self.audio.speaker();
        if let Err(e) = speaker.open() {
            let _ = mic.close();
            let _ = writer.close();
            let _ = reader.close();
            return Err(e);
        }

        // From here on the pumps own their stages; dropping a pump stops it
        // and closes both of its stages.
        let capture_pump = Pump::spawn(
            "audio-capture",
            mic,
            Box::new(writer),
            self.config.audio_buffer_len,
            None,
            self.config.pump_idle_backoff,
        )?;
        let playback_pump = match Pump::spawn(
            "audio-playback",
            Box::new(reader),
            speaker,
            self.config.audio_buffer_len,
            None,
            self.config.pump_idle_backoff,
        ) {
            Ok(pump) => pump,
            Err(e) => {
                drop(capture_pump);
                return Err(e);
            }
        };

        if let Err(e) = self.video.lock().start(remote_ip) {
            drop(capture_pump);
            drop(playback_pump);
            return Err(e);
        }

        tracing::info!(target = %target_addr, "streaming session started");
        Ok(StreamingSession {
            target_addr,
            capture_pump,
            playback_pump,
        })
    }

    fn teardown(&self, mut session: StreamingSession) {
        tracing::info!(target = %session.target_addr, "tearing down streaming session");
        session.capture_pump.stop();
        session.playback_pump.stop();
        self.video.lock().stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::IoOutcome;
    use crate::streamer::{FrameSource, StreamerConfig};
    use std::net::{TcpListener, TcpStream};

    /// Microphone stage that never has data; the pump idles on it.
    struct IdleMic;

    impl Stage for IdleMic {
        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }

        fn read(&mut self, _buf: &mut [u8], _wait: Option<Duration>) -> IoOutcome {
            std::thread::sleep(Duration::from_millis(1));
            IoOutcome::Done(0)
        }
    }

    /// Speaker stage that discards everything.
    struct NullSpeaker;

    impl Stage for NullSpeaker {
        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }

        fn write(&mut self, buf: &[u8], _wait: Option<Duration>) -> IoOutcome {
            IoOutcome::Done(buf.len())
        }
    }

    struct TestAudio;

    impl AudioIo for TestAudio {
        fn mic(&self) -> Box<dyn Stage> {
            Box::new(IdleMic)
        }

        fn speaker(&self) -> Box<dyn Stage> {
            Box::new(NullSpeaker)
        }
    }

    /// Audio endpoints whose microphone refuses to open.
    struct BrokenMicAudio;

    impl AudioIo for BrokenMicAudio {
        fn mic(&self) -> Box<dyn Stage> {
            struct BrokenMic;
            impl Stage for BrokenMic {
                fn open(&mut self) -> Result<()> {
                    Err(std::io::Error::other("mic hardware unavailable").into())
                }
                fn close(&mut self) -> Result<()> {
                    Ok(())
                }
            }
            Box::new(BrokenMic)
        }

        fn speaker(&self) -> Box<dyn Stage> {
            Box::new(NullSpeaker)
        }
    }

    struct NoFrame;

    impl FrameSource for NoFrame {
        fn capture(&mut self) -> Option<Vec<u8>> {
            None
        }
    }

    struct Fixture {
        arbiter: TalkArbiter,
        table: ClientTable,
        // Keeps the client ends of the loopback connections alive.
        _clients: Vec<TcpStream>,
    }

    fn fixture(connected: usize, audio_port: u16, audio: Arc<dyn AudioIo>) -> Fixture {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let table = ClientTable::new(5);
        let mut keep = Vec::new();
        for _ in 0..connected {
            let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
            let (accepted, peer) = listener.accept().unwrap();
            table.add(accepted, peer.ip()).unwrap();
            keep.push(client);
        }

        let video = VideoStreamer::new(
            Box::new(NoFrame),
            StreamerConfig {
                video_port: audio_port + 1,
                frame_interval: Duration::from_millis(10),
                send_compensation: Duration::from_millis(1),
                ..StreamerConfig::default()
            },
        )
        .unwrap();

        let arbiter = TalkArbiter::new(
            table.clone(),
            audio,
            Arc::new(Mutex::new(video)),
            SessionConfig {
                audio_port,
                ..SessionConfig::default()
            },
        );

        Fixture {
            arbiter,
            table,
            _clients: keep,
        }
    }

    #[test]
    fn concurrent_requests_grant_exactly_one() {
        let f = fixture(3, 29_011, Arc::new(TestAudio));

        let handles: Vec<_> = (0..3usize)
            .map(|id| {
                let arbiter = f.arbiter.clone();
                std::thread::spawn(move || (id, arbiter.request_talk(id)))
            })
            .collect();

        let verdicts: Vec<(ClientId, TalkVerdict)> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let granted: Vec<ClientId> = verdicts
            .iter()
            .filter(|(_, v)| *v == TalkVerdict::Granted)
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(granted.len(), 1);
        assert_eq!(f.arbiter.holder(), Some(granted[0]));

        assert_eq!(f.arbiter.end_talk(granted[0]), ReleaseVerdict::Ended);
        assert_eq!(f.arbiter.holder(), None);
    }

    #[test]
    fn end_talk_from_non_holder_changes_nothing() {
        let f = fixture(2, 29_021, Arc::new(TestAudio));

        assert_eq!(f.arbiter.request_talk(0), TalkVerdict::Granted);
        assert_eq!(f.arbiter.end_talk(1), ReleaseVerdict::NotHolder);
        assert_eq!(f.arbiter.holder(), Some(0));

        assert_eq!(f.arbiter.end_talk(0), ReleaseVerdict::Ended);
        assert_eq!(f.arbiter.end_talk(0), ReleaseVerdict::NotHolder);
    }

    #[test]
    fn grant_deny_release_regrant_cycle() {
        let f = fixture(2, 29_031, Arc::new(TestAudio));

        assert_eq!(f.arbiter.request_talk(0), TalkVerdict::Granted);
        assert!(f.arbiter.is_talk_active());
        assert_eq!(f.arbiter.request_talk(1), TalkVerdict::Denied);
        assert_eq!(f.arbiter.end_talk(0), ReleaseVerdict::Ended);
        assert!(!f.arbiter.is_talk_active());
        assert_eq!(f.arbiter.request_talk(1), TalkVerdict::Granted);
        assert_eq!(f.arbiter.end_talk(1), ReleaseVerdict::Ended);
    }

    #[test]
    fn holder_disconnect_releases_slot_and_reclaims_connection() {
        let f = fixture(2, 29_041, Arc::new(TestAudio));

        assert_eq!(f.arbiter.request_talk(0), TalkVerdict::Granted);
        f.arbiter.on_client_disconnect(0);

        assert_eq!(f.arbiter.holder(), None);
        assert!(!f.table.is_connected(0));
        // The freed session's reader port is usable by the next grant.
        assert_eq!(f.arbiter.request_talk(1), TalkVerdict::Granted);
        assert_eq!(f.arbiter.end_talk(1), ReleaseVerdict::Ended);
    }

    #[test]
    fn non_holder_disconnect_only_reclaims_connection() {
        let f = fixture(2, 29_051, Arc::new(TestAudio));

        assert_eq!(f.arbiter.request_talk(0), TalkVerdict::Granted);
        f.arbiter.on_client_disconnect(1);
        assert_eq!(f.arbiter.holder(), Some(0));
        assert!(!f.table.is_connected(1));
        assert_eq!(f.arbiter.end_talk(0), ReleaseVerdict::Ended);
    }

    #[test]
    fn failed_session_start_rolls_back_to_idle() {
        let f = fixture(2, 29_061, Arc::new(BrokenMicAudio));

        assert_eq!(f.arbiter.request_talk(0), TalkVerdict::Denied);
        assert_eq!(f.arbiter.holder(), None);
        assert!(!f.arbiter.is_talk_active());
    }

    #[test]
    fn request_from_unknown_client_is_denied() {
        let f = fixture(1, 29_071, Arc::new(TestAudio));
        assert_eq!(f.arbiter.request_talk(4), TalkVerdict::Denied);
    }
}
