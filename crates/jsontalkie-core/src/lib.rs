pub mod codes;
pub mod error;
pub mod manifesto;
pub mod message;
pub mod repeater;
pub mod socket;
pub mod talker;

pub use codes::{Broadcast, ErrorCode, LinkType, MessageKind, Roger, SystemKind, TalkerMatch, ValueType};
pub use error::SocketError;
pub use manifesto::{Action, Manifesto};
pub use message::{ACTION_BUDGET, BUF_CAP, FREE_STR_LEN, JsonMessage, MANIFESTO_DESC_BUDGET, NAME_LEN};
pub use repeater::{Repeater, SocketOrigin, TalkerOrigin};
pub use socket::{Ingress, Socket, SocketCounters, Transport};
pub use talker::{HandleOutcome, SocketView, Talker};
