pub mod clients;
pub mod device;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod streamer;
pub mod transport;

pub use clients::{ClientId, ClientTable};
pub use device::{Device, DeviceConfig};
pub use error::{IntercomError, Result};
pub use pipeline::{IoOutcome, Stage, StatusSink};
pub use protocol::Command;
pub use session::{AudioIo, ReleaseVerdict, TalkArbiter, TalkVerdict};
pub use streamer::{FrameSource, VideoStreamer};
