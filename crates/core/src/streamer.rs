//! Periodic video streaming task.
//!
//! While a talk session is active, one thread captures a frame from the
//! camera collaborator, fragments it (see
//! [`FrameFragmenter`](crate::media::video::FrameFragmenter)), and transmits
//! every fragment toward the session's client. Loss is accepted at every
//! step: a failed capture skips the interval, a failed fragment send
//! abandons the rest of that frame, and the receiver is expected to discard
//! incomplete frames.

use std::io::IoSlice;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{SockAddr, SockRef};

use crate::error::{IntercomError, Result};
use crate::media;
use crate::media::video::{FrameFragmenter, MAX_VIDEO_PAYLOAD};

/// Camera collaborator: yields one encoded frame per capture, or `None`
/// when no frame is available.
pub trait FrameSource: Send {
    fn capture(&mut self) -> Option<Vec<u8>>;
}

/// Tunables for the streaming loop.
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Fixed UDP destination port for video fragments.
    pub video_port: u16,
    /// Steady-state delay between captures (50 ms ≙ 20 fps).
    pub frame_interval: Duration,
    /// Subtracted from the interval to offset time spent transmitting
    /// fragments.
    pub send_compensation: Duration,
    /// Extra delay after an out-of-memory send error, distinct from the
    /// inter-frame delay.
    pub oom_backoff: Duration,
    /// Maximum payload bytes per fragment.
    pub max_payload: usize,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            video_port: 12346,
            frame_interval: Duration::from_millis(50),
            send_compensation: Duration::from_millis(10),
            oom_backoff: Duration::from_millis(20),
            max_payload: MAX_VIDEO_PAYLOAD,
        }
    }
}

impl StreamerConfig {
    fn validate(&self) -> Result<()> {
        if self.frame_interval.is_zero() {
            return Err(IntercomError::InvalidConfig {
                reason: "frame interval must be nonzero",
            });
        }
        if self.send_compensation >= self.frame_interval {
            return Err(IntercomError::InvalidConfig {
                reason: "send compensation must be shorter than the frame interval",
            });
        }
        Ok(())
    }
}

/// Cancellable periodic task streaming camera frames to one client.
///
/// Two states, Stopped and Running. [`start`](Self::start) and
/// [`stop`](Self::stop) are no-ops when already in the requested state.
/// Stopping is cooperative: the loop checks its flag once per iteration, so
/// the caller blocks for at most one frame interval (plus any back-off in
/// flight). The frame id counter lives for the streamer's whole life — it is
/// not reset between sessions.
pub struct VideoStreamer {
    config: StreamerConfig,
    source: Arc<Mutex<Box<dyn FrameSource>>>,
    fragmenter: Arc<Mutex<FrameFragmenter>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl VideoStreamer {
    pub fn new(source: Box<dyn FrameSource>, config: StreamerConfig) -> Result<Self> {
        config.validate()?;
        let fragmenter = FrameFragmenter::new(config.max_payload)?;
        Ok(Self {
            config,
            source: Arc::new(Mutex::new(source)),
            fragmenter: Arc::new(Mutex::new(fragmenter)),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Frame id the next captured frame will carry.
    pub fn next_frame_id(&self) -> u32 {
        self.fragmenter.lock().next_frame_id()
    }

    /// Begin streaming toward `target_ip` on the configured video port.
    /// No-op success when already running.
    pub fn start(&mut self, target_ip: IpAddr) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            tracing::warn!("video streaming already active");
            return Ok(());
        }

        let socket = match target_ip {
            IpAddr::V4(_) => UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?,
            IpAddr::V6(_) => UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0))?,
        };
        let target = SocketAddr::new(target_ip, self.config.video_port);

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let source = self.source.clone();
        let fragmenter = self.fragmenter.clone();
        let config = self.config.clone();

        let spawned = std::thread::Builder::new()
            .name("video-stream".to_string())
            .spawn(move || stream_loop(socket, target, source, fragmenter, config, running));

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(%target, "video streaming started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// Stop streaming and block until the loop thread exits. No-op when
    /// already stopped.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            tracing::debug!("video streaming not active");
            return;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        tracing::info!("video streaming stopped");
    }
}

impl Drop for VideoStreamer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stream_loop(
    socket: UdpSocket,
    target: SocketAddr,
    source: Arc<Mutex<Box<dyn FrameSource>>>,
    fragmenter: Arc<Mutex<FrameFragmenter>>,
    config: StreamerConfig,
    running: Arc<AtomicBool>,
) {
    tracing::debug!(%target, "video streaming loop entered");
    let dest = SockAddr::from(target);

    while running.load(Ordering::SeqCst) {
        let frame = source.lock().capture();
        match frame {
            None => {
                // Next interval gets a fresh capture; the frame id is not consumed.
                tracing::warn!("camera capture failed, skipping frame");
            }
            Some(frame) => {
                let timestamp_ms = media::wall_clock_ms();
                let fragments = fragmenter.lock().fragment(&frame, timestamp_ms);
                let mut backoff = false;

                for (header, chunk) in &fragments {
                    let encoded = header.encode();
                    let iov = [IoSlice::new(&encoded), IoSlice::new(chunk)];
                    if let Err(e) = SockRef::from(&socket).send_to_vectored(&iov, &dest) {
                        // Partial frames are accepted loss; never retried.
                        if e.kind() == std::io::ErrorKind::OutOfMemory {
                            tracing::warn!(
                                frame_id = header.frame_id,
                                "video send hit local memory exhaustion, abandoning frame"
                            );
                            backoff = true;
                        } else {
                            tracing::error!(
                                frame_id = header.frame_id,
                                index = header.packet_index,
                                total = header.packet_total,
                                error = %e,
                                "video fragment send failed, abandoning frame"
                            );
                        }
                        break;
                    }
                }

                if backoff {
                    std::thread::sleep(config.oom_backoff);
                }
            }
        }

        std::thread::sleep(config.frame_interval - config.send_compensation);
    }

    tracing::debug!("video streaming loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::video::{VIDEO_HEADER_LEN, VideoPacketHeader};

    struct FixedFrames {
        frame: Vec<u8>,
    }

    impl FrameSource for FixedFrames {
        fn capture(&mut self) -> Option<Vec<u8>> {
            Some(self.frame.clone())
        }
    }

    struct NoFrame;

    impl FrameSource for NoFrame {
        fn capture(&mut self) -> Option<Vec<u8>> {
            None
        }
    }

    fn fast_config(video_port: u16) -> StreamerConfig {
        StreamerConfig {
            video_port,
            frame_interval: Duration::from_millis(10),
            send_compensation: Duration::from_millis(1),
            ..StreamerConfig::default()
        }
    }

    #[test]
    fn streams_fragmented_frames_to_target() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let source = FixedFrames {
            frame: vec![0xCD; 4000],
        };
        let mut streamer = VideoStreamer::new(Box::new(source), fast_config(port)).unwrap();
        streamer.start("127.0.0.1".parse().unwrap()).unwrap();
        assert!(streamer.is_running());

        // One full frame is three fragments of 1385/1385/1230 payload bytes.
        let mut buf = [0u8; 2048];
        let mut seen = Vec::new();
        while seen.len() < 3 {
            let n = receiver.recv(&mut buf).unwrap();
            let header = VideoPacketHeader::parse(&buf[..n]).unwrap();
            assert_eq!(n, VIDEO_HEADER_LEN + header.payload_len as usize);
            assert_eq!(header.packet_total, 3);
            if header.frame_id == 0 {
                seen.push(header);
            }
        }
        streamer.stop();
        assert!(!streamer.is_running());

        let indices: Vec<u16> = seen.iter().map(|h| h.packet_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        let payload_sum: usize = seen.iter().map(|h| h.payload_len as usize).sum();
        assert_eq!(payload_sum, 4000);
        assert!(seen.iter().all(|h| h.timestamp_ms == seen[0].timestamp_ms));
    }

    #[test]
    fn frame_id_increases_across_frames_and_survives_restart() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = receiver.local_addr().unwrap().port();

        let source = FixedFrames {
            frame: vec![1u8; 100],
        };
        let mut streamer = VideoStreamer::new(Box::new(source), fast_config(port)).unwrap();
        streamer.start("127.0.0.1".parse().unwrap()).unwrap();

        while streamer.next_frame_id() < 3 {
            std::thread::sleep(Duration::from_millis(5));
        }
        streamer.stop();
        let after_first_run = streamer.next_frame_id();
        assert!(after_first_run >= 3);

        streamer.start("127.0.0.1".parse().unwrap()).unwrap();
        while streamer.next_frame_id() <= after_first_run {
            std::thread::sleep(Duration::from_millis(5));
        }
        streamer.stop();
    }

    #[test]
    fn capture_failure_skips_without_consuming_frame_ids() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut streamer = VideoStreamer::new(Box::new(NoFrame), fast_config(port)).unwrap();
        streamer.start("127.0.0.1".parse().unwrap()).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        streamer.stop();

        assert_eq!(streamer.next_frame_id(), 0);
    }

    #[test]
    fn start_twice_is_noop_stop_twice_is_noop() {
        let source = FixedFrames {
            frame: vec![1u8; 10],
        };
        let mut streamer = VideoStreamer::new(Box::new(source), fast_config(49_999)).unwrap();
        streamer.start("127.0.0.1".parse().unwrap()).unwrap();
        streamer.start("127.0.0.1".parse().unwrap()).unwrap();
        streamer.stop();
        streamer.stop();
    }

    #[test]
    fn invalid_config_fails_fast() {
        let cfg = StreamerConfig {
            send_compensation: Duration::from_millis(50),
            frame_interval: Duration::from_millis(50),
            ..StreamerConfig::default()
        };
        assert!(VideoStreamer::new(Box::new(NoFrame), cfg).is_err());

        let cfg = StreamerConfig {
            max_payload: MAX_VIDEO_PAYLOAD + 1,
            ..StreamerConfig::default()
        };
        assert!(VideoStreamer::new(Box::new(NoFrame), cfg).is_err());
    }
}
