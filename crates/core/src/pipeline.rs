//! Byte-stream stage abstraction shared with the record/playback pipeline.
//!
//! The device's audio path is a chain of stages: the microphone feeds the
//! outbound UDP writer, and the inbound UDP reader feeds the speaker. The
//! hardware stages live outside this crate; the core only defines the
//! [`Stage`] contract, the typed I/O outcomes, the status-notification
//! channel, and a [`Pump`] that moves bytes between two stages on its own
//! thread for the lifetime of a streaming session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::Result;

/// Outcome of one stage read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOutcome {
    /// Bytes transferred. Zero means there was nothing to move, not end of
    /// stream.
    Done(usize),
    /// The wait elapsed with no data. Callers substitute silence and keep
    /// the stream alive.
    Timeout,
    /// Unrecoverable for this call. A status notification was raised; the
    /// pipeline decides whether to stop or restart.
    Fatal,
}

/// Error condition raised by a stage toward the owning pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// The stage's input side failed (receive error).
    InputError,
    /// The stage's output side failed (send error).
    OutputError,
}

/// Receives status notifications and final byte positions from stages.
pub trait StatusSink: Send + Sync {
    fn report_status(&self, status: StreamStatus);

    /// Cumulative byte position of a stage, reported once when it closes.
    fn report_position(&self, bytes: u64) {
        let _ = bytes;
    }
}

/// Default sink: notifications go to the log and nowhere else.
#[derive(Debug, Default)]
pub struct LogStatus;

impl StatusSink for LogStatus {
    fn report_status(&self, status: StreamStatus) {
        tracing::warn!(?status, "stream status raised");
    }

    fn report_position(&self, bytes: u64) {
        tracing::debug!(bytes, "final stream byte position");
    }
}

/// One stage of a record or playback chain.
///
/// A stage is directional: sources implement [`read`](Self::read), sinks
/// implement [`write`](Self::write). Calling the unsupported direction is a
/// fatal outcome, not a panic. Opening an already-open stage is a no-op
/// success; closing is idempotent.
pub trait Stage: Send {
    fn open(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    /// Read up to `buf.len()` bytes, waiting at most `wait` (`None` means
    /// "as long as the stage permits" — stages bound this themselves so
    /// cancellation stays latency-bounded).
    fn read(&mut self, buf: &mut [u8], wait: Option<Duration>) -> IoOutcome {
        let _ = (buf, wait);
        tracing::warn!("read called on a write-only stage");
        IoOutcome::Fatal
    }

    /// Write `buf`, waiting at most `wait` for downstream capacity.
    fn write(&mut self, buf: &[u8], wait: Option<Duration>) -> IoOutcome {
        let _ = (buf, wait);
        tracing::warn!("write called on a read-only stage");
        IoOutcome::Fatal
    }
}

/// Moves bytes from a source stage to a sink stage on a dedicated thread.
///
/// When the source times out, a zeroed chunk of the same size is written
/// instead — silence substitution keeps the playback side fed during gaps.
/// A fatal outcome on either side ends the pump; both stages are closed on
/// the pump thread before it exits. Cancellation is cooperative: the stop
/// flag is checked once per iteration, so [`stop`](Self::stop) blocks at
/// most one read wait plus one write.
pub struct Pump {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Pump {
    /// Spawn the pump thread. `chunk_len` sizes the transfer buffer;
    /// `read_wait` is handed to every source read; `idle_backoff` is slept
    /// when the source reports zero bytes, so an idle source cannot spin.
    pub fn spawn(
        name: &str,
        mut source: Box<dyn Stage>,
        mut sink: Box<dyn Stage>,
        chunk_len: usize,
        read_wait: Option<Duration>,
        idle_backoff: Duration,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let thread_name = name.to_string();

        let handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                tracing::debug!(pump = %thread_name, "pump started");
                let mut buf = vec![0u8; chunk_len];
                while !stop_flag.load(Ordering::SeqCst) {
                    match source.read(&mut buf, read_wait) {
                        IoOutcome::Done(0) => std::thread::sleep(idle_backoff),
                        IoOutcome::Done(n) => {
                            if sink.write(&buf[..n], read_wait) == IoOutcome::Fatal {
                                tracing::warn!(pump = %thread_name, "sink failed, pump ending");
                                break;
                            }
                        }
                        IoOutcome::Timeout => {
                            buf.fill(0);
                            if sink.write(&buf, read_wait) == IoOutcome::Fatal {
                                tracing::warn!(pump = %thread_name, "sink failed, pump ending");
                                break;
                            }
                        }
                        IoOutcome::Fatal => {
                            tracing::warn!(pump = %thread_name, "source failed, pump ending");
                            break;
                        }
                    }
                }
                if let Err(e) = source.close() {
                    tracing::warn!(pump = %thread_name, error = %e, "source close failed");
                }
                if let Err(e) = sink.close() {
                    tracing::warn!(pump = %thread_name, error = %e, "sink close failed");
                }
                tracing::debug!(pump = %thread_name, "pump exited");
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Signal the pump to stop and block until its thread exits and both
    /// stages are closed. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        self.stop();
    }
}
