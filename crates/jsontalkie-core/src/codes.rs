//! Wire-level enumerations shared by every component.
//!
//! Integer values are part of the wire contract and must never be
//! renumbered — ported from `TalkieCodes.hpp` in the original source.

/// Data type classification for a json field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Absent, or present but truncated/unreadable.
    Void,
    /// A token that is neither a clean integer nor a clean string.
    Other,
    Int,
    String,
}

/// Network linkage of a Socket or Talker relative to the Repeater.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    None,
    /// Local node: sees LOCAL and REMOTE messages.
    DownLinked,
    /// Remote node: associated with REMOTE messages only (unless bridged).
    UpLinked,
}

/// How a message's `t` field resolved to a destination Talker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TalkerMatch {
    None,
    Any,
    ByChannel,
    ByName,
    Fail,
}

/// Primary message kind (`m` / `M`). Values are frozen wire constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Noise = 0,
    Talk = 1,
    Channel = 2,
    Ping = 3,
    Call = 4,
    List = 5,
    System = 6,
    Echo = 7,
    Error = 8,
}

impl MessageKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Noise,
            1 => Self::Talk,
            2 => Self::Channel,
            3 => Self::Ping,
            4 => Self::Call,
            5 => Self::List,
            6 => Self::System,
            7 => Self::Echo,
            8 => Self::Error,
            _ => return None,
        })
    }
}

/// Broadcast scope (`b`). Values are frozen wire constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Broadcast {
    None = 0,
    Remote = 1,
    Local = 2,
    Self_ = 3,
}

impl Broadcast {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::None,
            1 => Self::Remote,
            2 => Self::Local,
            3 => Self::Self_,
            _ => return None,
        })
    }
}

/// Roger / ack code (`r`). Values are frozen wire constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Roger {
    Roger = 0,
    Negative = 1,
    SayAgain = 2,
    Nil = 3,
    NoJoy = 4,
}

/// Error code (`e`). Values are frozen wire constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    Undefined = 0,
    Checksum = 1,
    Message = 2,
    Identity = 3,
    Field = 4,
    From = 5,
    To = 6,
    Delay = 7,
    Key = 8,
    Value = 9,
}

impl ErrorCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Undefined,
            1 => Self::Checksum,
            2 => Self::Message,
            3 => Self::Identity,
            4 => Self::Field,
            5 => Self::From,
            6 => Self::To,
            7 => Self::Delay,
            8 => Self::Key,
            9 => Self::Value,
            _ => return None,
        })
    }
}

/// System introspection sub-kind (`s`). Values are frozen wire constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SystemKind {
    Undefined = 0,
    Board = 1,
    Mute = 2,
    Errors = 3,
    Drops = 4,
    Delay = 5,
    Sockets = 6,
    Manifesto = 7,
}

impl SystemKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Undefined,
            1 => Self::Board,
            2 => Self::Mute,
            3 => Self::Errors,
            4 => Self::Drops,
            5 => Self::Delay,
            6 => Self::Sockets,
            7 => Self::Manifesto,
            _ => return None,
        })
    }
}
