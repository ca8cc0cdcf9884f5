use crate::clients::ClientId;
use crate::protocol::Command;
use crate::session::{ReleaseVerdict, TalkArbiter, TalkVerdict};

/// Handles control commands for a single client connection.
///
/// Stateless apart from the client identity: all shared state lives in the
/// [`TalkArbiter`]. Returns the response to write back, if the command
/// warrants one.
pub struct CommandHandler {
    client_id: ClientId,
    arbiter: TalkArbiter,
}

impl CommandHandler {
    pub fn new(client_id: ClientId, arbiter: TalkArbiter) -> Self {
        Self { client_id, arbiter }
    }

    pub fn handle(&self, command: Command) -> Option<Command> {
        match command {
            Command::RequestTalk => match self.arbiter.request_talk(self.client_id) {
                TalkVerdict::Granted => Some(Command::GrantTalk),
                TalkVerdict::Denied => Some(Command::DenyTalk),
            },
            Command::EndTalk => match self.arbiter.end_talk(self.client_id) {
                ReleaseVerdict::Ended => Some(Command::TalkEnded),
                ReleaseVerdict::NotHolder => Some(Command::TalkDidNotEnd),
            },
            Command::OpenDoor => {
                tracing::info!(
                    client = self.client_id,
                    "door open requested, actuation handed to peripheral layer"
                );
                Some(Command::OpenDoor)
            }
            other => {
                // Response codes and the doorbell never originate from clients.
                tracing::warn!(
                    client = self.client_id,
                    command = ?other,
                    "unexpected command from client"
                );
                None
            }
        }
    }
}
