//! Host-supplied action registry bound to a [`crate::talker::Talker`].
//!
//! Modeled on the original's function-pointer `Action` table: rather than
//! storing a boxed closure per action (which the 128-byte envelope and the
//! single-threaded `tick()` loop give no real benefit to), `action_by_index`
//! is itself the dispatch point — implementers typically `match index` and
//! perform the side effect inline, the same shape as the original's
//! generated `switch` over action index.

use crate::codes::TalkerMatch;
use crate::message::JsonMessage;
use crate::talker::Talker;

/// Static metadata for one action: `name` and `description` combined must
/// fit [`crate::message::ACTION_BUDGET`] once serialized into a List reply.
#[derive(Debug, Clone)]
pub struct Action {
    pub name: String,
    pub description: String,
}

impl Action {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Action {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// A host-implemented action registry. `actions()` and `class_description()`
/// are the only methods a minimal manifesto must provide; the hooks default
/// to no-ops.
pub trait Manifesto {
    /// Declared actions, in the order List/System replies must iterate them.
    fn actions(&self) -> &[Action];

    /// Performs the side effect or payload mutation for the action at
    /// `index`. Returns `false` to signal failure (the Talker turns this
    /// into `r = Negative`). Implementations normally `match index`.
    fn action_by_index(
        &mut self,
        index: u8,
        talker: &mut Talker,
        msg: &mut JsonMessage,
        match_kind: TalkerMatch,
    ) -> bool;

    /// Looks up an action index by name. Default: linear scan over
    /// [`Manifesto::actions`].
    fn index_of(&self, name: &str) -> Option<u8> {
        self.actions()
            .iter()
            .position(|a| a.name == name)
            .map(|i| i as u8)
    }

    /// Human-readable class name for System/Manifesto introspection, capped
    /// at [`crate::message::MANIFESTO_DESC_BUDGET`] chars.
    fn class_description(&self) -> &str;

    /// Called once per `Repeater::tick()`, after sockets and talkers have
    /// drained their inbound queues.
    fn tick(&mut self, _talker: &mut Talker) {}

    /// Called when an Echo addressed to this talker (by name, matching
    /// identity) arrives.
    fn on_echo(&mut self, _talker: &mut Talker, _msg: &mut JsonMessage, _match_kind: TalkerMatch) {}

    /// Called for an Error reply that isn't the automatic checksum-recovery
    /// retransmission the Talker itself handles.
    fn on_error(&mut self, _talker: &mut Talker, _msg: &mut JsonMessage, _match_kind: TalkerMatch) {}

    /// Called for Noise that carries neither `e` nor `i` (so the Talker
    /// could not synthesize an Error reply itself).
    fn on_noise(&mut self, _talker: &mut Talker, _msg: &mut JsonMessage, _match_kind: TalkerMatch) {}
}
