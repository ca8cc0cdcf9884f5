/// Wire size of every control command and response.
pub const COMMAND_LEN: usize = 4;

/// Control commands and responses.
///
/// Carried as 4-byte integers in native byte order. [`RequestTalk`],
/// [`EndTalk`] and [`OpenDoor`] flow client → device; [`GrantTalk`],
/// [`DenyTalk`], [`TalkEnded`] and [`TalkDidNotEnd`] are the matching
/// responses; [`DoorbellRing`] is device → client only, unsolicited.
/// [`OpenDoor`] is echoed back as the acknowledgment — the actuation itself
/// belongs to the peripheral layer.
///
/// [`RequestTalk`]: Self::RequestTalk
/// [`EndTalk`]: Self::EndTalk
/// [`GrantTalk`]: Self::GrantTalk
/// [`DenyTalk`]: Self::DenyTalk
/// [`TalkEnded`]: Self::TalkEnded
/// [`TalkDidNotEnd`]: Self::TalkDidNotEnd
/// [`DoorbellRing`]: Self::DoorbellRing
/// [`OpenDoor`]: Self::OpenDoor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    RequestTalk = 0,
    EndTalk = 1,
    GrantTalk = 2,
    DenyTalk = 3,
    TalkEnded = 4,
    TalkDidNotEnd = 5,
    DoorbellRing = 6,
    OpenDoor = 7,
}

impl Command {
    /// Serialize to the 4-byte wire representation.
    pub fn to_wire(self) -> [u8; COMMAND_LEN] {
        (self as u32).to_ne_bytes()
    }

    /// Decode a 4-byte frame. Unknown codes yield `None`; the connection
    /// loop logs and skips them rather than dropping the client.
    pub fn from_wire(frame: [u8; COMMAND_LEN]) -> Option<Self> {
        match u32::from_ne_bytes(frame) {
            0 => Some(Self::RequestTalk),
            1 => Some(Self::EndTalk),
            2 => Some(Self::GrantTalk),
            3 => Some(Self::DenyTalk),
            4 => Some(Self::TalkEnded),
            5 => Some(Self::TalkDidNotEnd),
            6 => Some(Self::DoorbellRing),
            7 => Some(Self::OpenDoor),
            _ => None,
        }
    }
}
