//! Control protocol: fixed-size commands over the per-client TCP channel.
//!
//! Every exchange is a single 4-byte integer in native byte order, client to
//! device, usually answered by a single 4-byte integer on the same
//! connection. The one unsolicited device-to-client message is the doorbell
//! ring, fanned out to every connected client.

pub mod command;
pub mod handler;

pub use command::{COMMAND_LEN, Command};
pub use handler::CommandHandler;
