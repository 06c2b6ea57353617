//! The message-kind state machine bound to a name and an optional
//! [`Manifesto`].
//!
//! A `Talker` never reaches for a [`crate::repeater::Repeater`] or a
//! [`crate::socket::Socket`] directly — it returns prepared outbound
//! messages (and, for the one System sub-command that needs to mutate
//! socket state, a list of requested delay updates) and lets the caller
//! apply them. That mirrors the "break the cycle with a passed-in view"
//! design note without giving the Talker a back-reference to anything it
//! doesn't own.

use crate::codes::{Broadcast, ErrorCode, LinkType, MessageKind, Roger, SystemKind, TalkerMatch, ValueType};
use crate::manifesto::Manifesto;
use crate::message::{ACTION_BUDGET, FREE_STR_LEN, JsonMessage, MANIFESTO_DESC_BUDGET, NAME_LEN};

/// Read-only snapshot of one socket, handed to [`Talker::handle`] by the
/// Repeater so System introspection sub-commands can answer without the
/// Talker holding a reference to the socket collection.
#[derive(Debug, Clone)]
pub struct SocketView {
    pub index: u8,
    pub class_description: String,
    pub max_delay_ms: u32,
    pub drops: u32,
    pub fails: u32,
}

/// Result of one [`Talker::handle`] call.
#[derive(Debug, Default)]
pub struct HandleOutcome {
    /// Outbound messages, already run through `prepare`, ready for the
    /// Repeater to route.
    pub outbound: Vec<JsonMessage>,
    /// `(socket_index, new_max_delay_ms)` pairs requested by a
    /// `System{Delay}` write; the Repeater applies these to the sockets
    /// it owns.
    pub delay_updates: Vec<(u8, u32)>,
}

pub struct Talker {
    name: String,
    description: String,
    channel: Option<u8>,
    muted_calls: bool,
    link_type: LinkType,
    manifesto: Option<Box<dyn Manifesto>>,
    transmitted_message: Option<JsonMessage>,
    known_peer: Option<(String, Broadcast)>,
}

impl Talker {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        manifesto: Option<Box<dyn Manifesto>>,
        channel: Option<u8>,
    ) -> Self {
        Talker {
            name: name.into(),
            description: description.into(),
            channel,
            muted_calls: false,
            link_type: LinkType::None,
            manifesto,
            transmitted_message: None,
            known_peer: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> Option<u8> {
        self.channel
    }

    pub fn set_channel(&mut self, channel: Option<u8>) {
        self.channel = channel;
    }

    pub fn muted(&self) -> bool {
        self.muted_calls
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted_calls = muted;
    }

    pub fn link_type(&self) -> LinkType {
        self.link_type
    }

    pub fn set_link_type(&mut self, link_type: LinkType) {
        self.link_type = link_type;
    }

    pub fn manifesto(&self) -> Option<&dyn Manifesto> {
        self.manifesto.as_deref()
    }

    /// Runs the manifesto's per-`Repeater::tick()` hook, if one is attached.
    pub fn tick(&mut self) {
        self.call_manifesto(|manifesto, talker| manifesto.tick(talker));
    }

    /// Ensures `f = self.name` (swapping `f`↔`t` first if `f` names
    /// someone else), assigns a fresh identity to non-reply kinds, and
    /// turns an identity-less reply into `Error{Identity}` instead of
    /// letting it go out unpaired. Returns `false` only on buffer overflow.
    pub fn prepare(&mut self, msg: &mut JsonMessage, now_ms: u32) -> bool {
        match msg.from_name() {
            Some(from) if from == self.name => {}
            Some(_) => {
                msg.swap_from_with_to();
                if !msg.set_from_name(&self.name) {
                    return false;
                }
            }
            None => {
                if !msg.set_from_name(&self.name) {
                    return false;
                }
            }
        }

        let identity = (now_ms & 0xFFFF) as u16;
        if (msg.message_kind() as u8) < (MessageKind::Echo as u8) {
            if !msg.set_identity(identity) {
                return false;
            }
            self.transmitted_message = Some(msg.clone());
        } else if msg.identity().is_none() {
            if !(msg.set_message_kind(MessageKind::Error)
                && msg.set_identity(identity)
                && msg.set_uint('e', ErrorCode::Identity as u32))
            {
                return false;
            }
        }
        true
    }

    fn transmit(&mut self, mut msg: JsonMessage, now_ms: u32, out: &mut Vec<JsonMessage>) {
        if self.prepare(&mut msg, now_ms) {
            out.push(msg);
        }
    }

    fn call_manifesto<F, R>(&mut self, f: F) -> Option<R>
    where
        F: FnOnce(&mut dyn Manifesto, &mut Talker) -> R,
    {
        let mut manifesto = self.manifesto.take()?;
        let result = f(manifesto.as_mut(), self);
        self.manifesto = Some(manifesto);
        Some(result)
    }

    /// Runs the message-kind state machine. Does nothing (returns an empty
    /// outcome) unless the message carries both a known broadcast scope
    /// and a `from`-name, matching the original's top-level guard.
    pub fn handle(&mut self, msg: &mut JsonMessage, match_kind: TalkerMatch, now_ms: u32, sockets: &[SocketView]) -> HandleOutcome {
        let mut outcome = HandleOutcome::default();

        let broadcast = msg.broadcast();
        let from_name = msg.from_name();
        let known_broadcast = matches!(broadcast, Some(b) if b > Broadcast::None);
        if known_broadcast {
            if let Some(name) = from_name.clone() {
                self.known_peer = Some((name, broadcast.unwrap()));
            }
        }
        if !known_broadcast || from_name.is_none() {
            return outcome;
        }

        match msg.message_kind() {
            MessageKind::Call => self.handle_call(msg, match_kind, now_ms, &mut outcome),
            MessageKind::Talk => {
                msg.set_message_kind(MessageKind::Echo);
                msg.set_string('0', &self.description, FREE_STR_LEN);
                self.transmit(msg.clone(), now_ms, &mut outcome.outbound);
            }
            MessageKind::Channel => {
                msg.set_message_kind(MessageKind::Echo);
                if let Some(new_channel) = msg.get_uint('0') {
                    self.channel = Some(new_channel as u8);
                } else {
                    msg.set_uint('0', u32::from(self.channel.unwrap_or(255)));
                }
                self.transmit(msg.clone(), now_ms, &mut outcome.outbound);
            }
            MessageKind::Ping => {
                msg.set_message_kind(MessageKind::Echo);
                self.transmit(msg.clone(), now_ms, &mut outcome.outbound);
            }
            MessageKind::List => self.handle_list(msg, now_ms, &mut outcome),
            MessageKind::System => self.handle_system(msg, now_ms, sockets, &mut outcome),
            MessageKind::Echo => self.handle_echo(msg, match_kind),
            MessageKind::Error => self.handle_error(msg, match_kind, now_ms, &mut outcome),
            MessageKind::Noise => self.handle_noise(msg, match_kind, now_ms, &mut outcome),
        }

        outcome
    }

    fn handle_call(&mut self, msg: &mut JsonMessage, match_kind: TalkerMatch, now_ms: u32, outcome: &mut HandleOutcome) {
        msg.set_message_kind(MessageKind::Echo);

        if let Some(mut manifesto) = self.manifesto.take() {
            let action_count = manifesto.actions().len();
            let action_index = if msg.value_type('a') == ValueType::Int {
                msg.get_uint('a')
                    .map(|v| v as u8)
                    .filter(|&idx| (idx as usize) < action_count)
            } else {
                msg.get_string('a', NAME_LEN).and_then(|name| manifesto.index_of(&name))
            };

            match action_index {
                Some(idx) => {
                    if !manifesto.action_by_index(idx, self, msg, match_kind) {
                        msg.set_uint('r', Roger::Negative as u32);
                    }
                }
                None => {
                    msg.set_uint('r', Roger::SayAgain as u32);
                }
            }
            self.manifesto = Some(manifesto);
        } else {
            msg.set_uint('r', Roger::NoJoy as u32);
        }

        // Roger is implicit for a successful Call to spare payload space.
        if !(self.muted_calls || msg.is_no_reply()) {
            self.transmit(msg.clone(), now_ms, &mut outcome.outbound);
        }
    }

    fn handle_list(&mut self, msg: &mut JsonMessage, now_ms: u32, outcome: &mut HandleOutcome) {
        msg.set_message_kind(MessageKind::Echo);
        let Some(manifesto) = &self.manifesto else {
            msg.set_uint('r', Roger::NoJoy as u32);
            self.transmit(msg.clone(), now_ms, &mut outcome.outbound);
            return;
        };
        let actions: Vec<_> = manifesto.actions().to_vec();
        if actions.is_empty() {
            msg.set_uint('r', Roger::Nil as u32);
            self.transmit(msg.clone(), now_ms, &mut outcome.outbound);
            return;
        }
        for (index, action) in actions.iter().enumerate() {
            msg.remove_all_nth_values();
            msg.set_uint('0', index as u32);
            msg.set_string('1', &action.name, NAME_LEN);
            let description = fit_budget(&action.name, &action.description, ACTION_BUDGET);
            msg.set_string('2', &description, FREE_STR_LEN);
            self.transmit(msg.clone(), now_ms, &mut outcome.outbound);
        }
    }

    fn handle_system(&mut self, msg: &mut JsonMessage, now_ms: u32, sockets: &[SocketView], outcome: &mut HandleOutcome) {
        msg.set_message_kind(MessageKind::Echo);
        let Some(sub_kind) = msg.get_uint('s').and_then(|v| SystemKind::from_u8(v as u8)) else {
            return;
        };

        let mut already_transmitted = false;
        match sub_kind {
            SystemKind::Board => {
                msg.set_string('0', &board_descriptor(), FREE_STR_LEN);
            }
            SystemKind::Mute => {
                if let Some(v) = msg.get_uint('0') {
                    self.muted_calls = v != 0;
                } else {
                    msg.set_uint('0', u32::from(self.muted_calls));
                }
            }
            SystemKind::Errors => {
                already_transmitted = self.fan_out_sockets(msg, now_ms, sockets, outcome, |view, m| {
                    m.set_uint('1', view.fails);
                });
            }
            SystemKind::Drops => {
                already_transmitted = self.fan_out_sockets(msg, now_ms, sockets, outcome, |view, m| {
                    m.set_uint('1', view.drops);
                });
            }
            SystemKind::Delay => {
                already_transmitted = self.handle_system_delay(msg, now_ms, sockets, outcome);
            }
            SystemKind::Sockets => {
                already_transmitted = self.fan_out_sockets(msg, now_ms, sockets, outcome, |view, m| {
                    m.set_string('1', &view.class_description, FREE_STR_LEN);
                });
            }
            SystemKind::Manifesto => match &self.manifesto {
                Some(manifesto) => {
                    let description = truncate(manifesto.class_description(), MANIFESTO_DESC_BUDGET);
                    msg.set_string('0', &description, FREE_STR_LEN);
                }
                None => {
                    msg.set_uint('r', Roger::NoJoy as u32);
                }
            },
            SystemKind::Undefined => {}
        }

        if !already_transmitted {
            self.transmit(msg.clone(), now_ms, &mut outcome.outbound);
        }
    }

    /// Shared shape for `Drops`/`Sockets`: emit one Echo per socket, or a
    /// single `NoJoy` Echo if there are none. Returns `true` when it has
    /// already performed the(all) transmissions itself.
    fn fan_out_sockets(
        &mut self,
        msg: &mut JsonMessage,
        now_ms: u32,
        sockets: &[SocketView],
        outcome: &mut HandleOutcome,
        mut fill: impl FnMut(&SocketView, &mut JsonMessage),
    ) -> bool {
        if sockets.is_empty() {
            msg.set_uint('r', Roger::NoJoy as u32);
            return false;
        }
        for view in sockets {
            msg.remove_all_nth_values();
            msg.set_uint('0', u32::from(view.index));
            fill(view, msg);
            self.transmit(msg.clone(), now_ms, &mut outcome.outbound);
        }
        true
    }

    fn handle_system_delay(&mut self, msg: &mut JsonMessage, now_ms: u32, sockets: &[SocketView], outcome: &mut HandleOutcome) -> bool {
        if let Some(requested_index) = msg.get_uint('0') {
            match sockets.iter().find(|v| u32::from(v.index) == requested_index) {
                Some(view) => {
                    if let Some(new_delay) = msg.get_uint('1') {
                        outcome.delay_updates.push((view.index, new_delay));
                    } else {
                        msg.set_uint('1', view.max_delay_ms);
                    }
                }
                None => {
                    msg.set_uint('r', Roger::NoJoy as u32);
                }
            }
            false
        } else {
            self.fan_out_sockets(msg, now_ms, sockets, outcome, |view, m| {
                m.set_uint('1', view.max_delay_ms);
            })
        }
    }

    fn handle_echo(&mut self, msg: &mut JsonMessage, match_kind: TalkerMatch) {
        if match_kind != TalkerMatch::ByName {
            return;
        }
        let is_paired = self
            .transmitted_message
            .as_ref()
            .is_some_and(|sent| sent.identity() == msg.identity());
        if !is_paired {
            return;
        }
        self.call_manifesto(|manifesto, talker| manifesto.on_echo(talker, msg, match_kind));
    }

    fn handle_error(&mut self, msg: &mut JsonMessage, match_kind: TalkerMatch, now_ms: u32, outcome: &mut HandleOutcome) {
        let is_paired = match_kind == TalkerMatch::ByName
            && self
                .transmitted_message
                .as_ref()
                .is_some_and(|sent| sent.identity() == msg.identity());

        if is_paired {
            if msg.get_uint('e') == Some(ErrorCode::Checksum as u32) {
                if let Some(retransmit) = self.transmitted_message.clone() {
                    // Goes back through `prepare`, which assigns a fresh
                    // identity so other talkers don't re-handle it as a dup.
                    self.transmit(retransmit, now_ms, &mut outcome.outbound);
                }
            }
        } else {
            self.call_manifesto(|manifesto, talker| manifesto.on_error(talker, msg, match_kind));
        }
    }

    fn handle_noise(&mut self, msg: &mut JsonMessage, match_kind: TalkerMatch, now_ms: u32, outcome: &mut HandleOutcome) {
        if msg.has('e') {
            if let Some(identity) = msg.identity() {
                let mut error_msg = JsonMessage::new();
                if let Some((name, broadcast)) = self.known_peer.clone() {
                    error_msg.set_broadcast(broadcast);
                    error_msg.set_to_name(&name);
                }
                error_msg.set_message_kind(MessageKind::Error);
                if let Some(e) = msg.get_uint('e') {
                    error_msg.set_uint('e', e);
                }
                error_msg.set_identity(identity);
                self.transmit(error_msg, now_ms, &mut outcome.outbound);
            }
            return;
        }
        self.call_manifesto(|manifesto, talker| manifesto.on_noise(talker, msg, match_kind));
    }
}

fn truncate(s: &str, cap: usize) -> String {
    if s.len() <= cap {
        s.to_string()
    } else {
        tracing::warn!(len = s.len(), cap, "truncating string to fit wire budget");
        s[..cap].to_string()
    }
}

fn fit_budget(name: &str, description: &str, budget: usize) -> String {
    let max_desc = budget.saturating_sub(name.len());
    truncate(description, max_desc)
}

/// Self-identification string for `System{Board}`. The original selects an
/// Arduino/ESP32/Teensy descriptor by preprocessor conditional; there is no
/// embedded target here, so this reports the host OS/arch the Talker
/// actually runs on instead.
fn board_descriptor() -> String {
    format!("{} ({})", std::env::consts::OS, std::env::consts::ARCH)
}
