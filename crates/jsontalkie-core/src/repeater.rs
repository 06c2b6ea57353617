//! Fan-out routing between the two Socket collections and the two Talker
//! collections.
//!
//! The original's `MessageRepeater` holds raw pointers into all four
//! collections and calls back into itself recursively as Talkers produce
//! replies. Here the four entry points (`socket_downlink`, `socket_uplink`,
//! `talker_downlink`, `talker_uplink`) still recurse the same way — a
//! Talker's outbound messages are routed immediately, in the same call
//! chain, exactly as `transmitToRepeater` does — but every call goes through
//! `&mut self` on an owned `Repeater` instead of a bag of pointers, so the
//! borrow checker enforces what the original relied on a single thread of
//! control to guarantee.

use crate::codes::{Broadcast, LinkType, TalkerMatch};
use crate::message::JsonMessage;
use crate::socket::{Ingress, Socket};
use crate::talker::{HandleOutcome, SocketView, Talker};

/// Identifies which collection and index a [`Socket`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOrigin {
    Up(usize),
    Down(usize),
}

/// Identifies which collection and index a [`Talker`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TalkerOrigin {
    Up(usize),
    Down(usize),
}

/// Owns the four fixed collections and routes messages between them.
///
/// Down-linked sockets/talkers see LOCAL and REMOTE traffic; up-linked ones
/// are associated with REMOTE traffic (and LOCAL too, if `bridged`).
pub struct Repeater {
    up_sockets: Vec<Socket>,
    down_sockets: Vec<Socket>,
    up_talkers: Vec<Talker>,
    down_talkers: Vec<Talker>,
}

impl Repeater {
    pub fn new(
        mut up_sockets: Vec<Socket>,
        mut down_sockets: Vec<Socket>,
        mut up_talkers: Vec<Talker>,
        mut down_talkers: Vec<Talker>,
    ) -> Self {
        for socket in &mut up_sockets {
            socket.link_type = LinkType::UpLinked;
        }
        for socket in &mut down_sockets {
            socket.link_type = LinkType::DownLinked;
        }
        for talker in &mut up_talkers {
            talker.set_link_type(LinkType::UpLinked);
        }
        for talker in &mut down_talkers {
            talker.set_link_type(LinkType::DownLinked);
        }
        Repeater {
            up_sockets,
            down_sockets,
            up_talkers,
            down_talkers,
        }
    }

    pub fn up_sockets(&self) -> &[Socket] {
        &self.up_sockets
    }

    pub fn down_sockets(&self) -> &[Socket] {
        &self.down_sockets
    }

    pub fn up_talkers(&self) -> &[Talker] {
        &self.up_talkers
    }

    pub fn down_talkers(&self) -> &[Talker] {
        &self.down_talkers
    }

    fn socket_ref(&self, origin: SocketOrigin) -> &Socket {
        match origin {
            SocketOrigin::Down(i) => &self.down_sockets[i],
            SocketOrigin::Up(i) => &self.up_sockets[i],
        }
    }

    /// Flattened read-only snapshot (down sockets first, then up sockets)
    /// handed to every `Talker::handle` call so `System{Drops|Delay|Sockets}`
    /// introspection can answer without a Talker ever touching a `Socket`.
    fn socket_views(&self) -> Vec<SocketView> {
        self.down_sockets
            .iter()
            .chain(self.up_sockets.iter())
            .enumerate()
            .map(|(i, socket)| SocketView {
                index: i as u8,
                class_description: socket.description().to_string(),
                max_delay_ms: socket.max_delay_ms,
                drops: socket.counters().drops,
                fails: socket.counters().fails,
            })
            .collect()
    }

    /// Resolves a `SocketView::index` (flattened: down sockets, then up
    /// sockets) back to the socket it names, so a `System{Delay}` write can
    /// be applied to the collection the Repeater actually owns.
    fn socket_by_flat_index(&mut self, index: u8) -> Option<&mut Socket> {
        let i = index as usize;
        if i < self.down_sockets.len() {
            self.down_sockets.get_mut(i)
        } else {
            self.up_sockets.get_mut(i - self.down_sockets.len())
        }
    }

    fn apply_delay_updates(&mut self, delay_updates: Vec<(u8, u32)>) {
        for (index, new_delay) in delay_updates {
            if let Some(socket) = self.socket_by_flat_index(index) {
                socket.max_delay_ms = new_delay;
            } else {
                tracing::warn!(index, "System{{Delay}} referenced an unknown socket index");
            }
        }
    }

    fn emit_to_down_sockets(&mut self, msg: &JsonMessage, exclude: Option<usize>) -> bool {
        let mut ok = true;
        for (i, socket) in self.down_sockets.iter_mut().enumerate() {
            if Some(i) == exclude {
                continue;
            }
            let mut copy = msg.clone();
            if !socket.finish_transmission(&mut copy) {
                ok = false;
            }
        }
        ok
    }

    fn emit_to_bridged_up_sockets(&mut self, msg: &JsonMessage) -> bool {
        let mut ok = true;
        for socket in self.up_sockets.iter_mut().filter(|s| s.bridged) {
            let mut copy = msg.clone();
            if !socket.finish_transmission(&mut copy) {
                ok = false;
            }
        }
        ok
    }

    fn emit_to_up_sockets(&mut self, msg: &JsonMessage) -> bool {
        let mut ok = true;
        for socket in &mut self.up_sockets {
            let mut copy = msg.clone();
            if !socket.finish_transmission(&mut copy) {
                ok = false;
            }
        }
        ok
    }

    /// Routes one Talker's [`HandleOutcome`] back into the Repeater: applies
    /// any requested socket delay updates, then sends each outbound message
    /// through `talker_downlink`/`talker_uplink` according to which
    /// collection the originating Talker lives in (the original's
    /// `transmitToRepeater`, dispatching on the Talker's own link type).
    fn route_outcome(&mut self, origin: TalkerOrigin, outcome: HandleOutcome, now_ms: u32) {
        self.apply_delay_updates(outcome.delay_updates);
        for msg in outcome.outbound {
            match origin {
                TalkerOrigin::Down(i) => {
                    self.talker_downlink(TalkerOrigin::Down(i), msg, now_ms);
                }
                TalkerOrigin::Up(i) => {
                    self.talker_uplink(TalkerOrigin::Up(i), msg, now_ms);
                }
            }
        }
    }

    fn dispatch_to_down_talkers(&mut self, match_kind: TalkerMatch, msg: &JsonMessage, exclude: Option<usize>, now_ms: u32) {
        match match_kind {
            TalkerMatch::Any => {
                for i in 0..self.down_talkers.len() {
                    if Some(i) == exclude {
                        continue;
                    }
                    let sockets = self.socket_views();
                    let mut copy = msg.clone();
                    let outcome = self.down_talkers[i].handle(&mut copy, match_kind, now_ms, &sockets);
                    self.route_outcome(TalkerOrigin::Down(i), outcome, now_ms);
                }
            }
            TalkerMatch::ByChannel => {
                let channel = msg.to_channel();
                for i in 0..self.down_talkers.len() {
                    if Some(i) == exclude || self.down_talkers[i].channel() != channel {
                        continue;
                    }
                    let sockets = self.socket_views();
                    let mut copy = msg.clone();
                    let outcome = self.down_talkers[i].handle(&mut copy, match_kind, now_ms, &sockets);
                    self.route_outcome(TalkerOrigin::Down(i), outcome, now_ms);
                }
            }
            TalkerMatch::ByName => {
                let Some(name) = msg.to_name() else { return };
                for i in 0..self.down_talkers.len() {
                    if Some(i) == exclude || self.down_talkers[i].name() != name {
                        continue;
                    }
                    let sockets = self.socket_views();
                    let mut copy = msg.clone();
                    let outcome = self.down_talkers[i].handle(&mut copy, match_kind, now_ms, &sockets);
                    self.route_outcome(TalkerOrigin::Down(i), outcome, now_ms);
                    return;
                }
            }
            TalkerMatch::None | TalkerMatch::Fail => {}
        }
    }

    fn dispatch_to_up_talkers(&mut self, match_kind: TalkerMatch, msg: &JsonMessage, exclude: Option<usize>, now_ms: u32) {
        match match_kind {
            TalkerMatch::Any => {
                for i in 0..self.up_talkers.len() {
                    if Some(i) == exclude {
                        continue;
                    }
                    let sockets = self.socket_views();
                    let mut copy = msg.clone();
                    let outcome = self.up_talkers[i].handle(&mut copy, match_kind, now_ms, &sockets);
                    self.route_outcome(TalkerOrigin::Up(i), outcome, now_ms);
                }
            }
            TalkerMatch::ByChannel => {
                let channel = msg.to_channel();
                for i in 0..self.up_talkers.len() {
                    if Some(i) == exclude || self.up_talkers[i].channel() != channel {
                        continue;
                    }
                    let sockets = self.socket_views();
                    let mut copy = msg.clone();
                    let outcome = self.up_talkers[i].handle(&mut copy, match_kind, now_ms, &sockets);
                    self.route_outcome(TalkerOrigin::Up(i), outcome, now_ms);
                }
            }
            TalkerMatch::ByName => {
                let Some(name) = msg.to_name() else { return };
                for i in 0..self.up_talkers.len() {
                    if Some(i) == exclude || self.up_talkers[i].name() != name {
                        continue;
                    }
                    let sockets = self.socket_views();
                    let mut copy = msg.clone();
                    let outcome = self.up_talkers[i].handle(&mut copy, match_kind, now_ms, &sockets);
                    self.route_outcome(TalkerOrigin::Up(i), outcome, now_ms);
                    return;
                }
            }
            TalkerMatch::None | TalkerMatch::Fail => {}
        }
    }

    /// Called with a message a DOWN-linked socket just accepted. Eligible
    /// for further routing when its scope is REMOTE, or LOCAL on a bridged
    /// socket; fans out to the down-linked talkers and re-emits on every
    /// other down-linked socket.
    pub fn socket_downlink(&mut self, origin: SocketOrigin, msg: JsonMessage, now_ms: u32) {
        let broadcast = msg.broadcast().unwrap_or(Broadcast::None);
        let bridged = self.socket_ref(origin).bridged;
        if !(broadcast == Broadcast::Remote || (broadcast == Broadcast::Local && bridged)) {
            return;
        }
        let match_kind = msg.get_talker_match();
        self.dispatch_to_down_talkers(match_kind, &msg, None, now_ms);
        let exclude = match origin {
            SocketOrigin::Down(i) => Some(i),
            SocketOrigin::Up(_) => None,
        };
        self.emit_to_down_sockets(&msg, exclude);
    }

    /// Called with a message an UP-linked socket just accepted (always
    /// REMOTE scope in practice, since an up-linked socket only produces
    /// REMOTE-scoped ingress). REMOTE re-broadcasts to every up-linked
    /// socket; LOCAL (only reachable if a caller constructs one directly)
    /// fans out to both talker collections and every down-linked plus
    /// bridged up-linked socket, excluding the origin.
    pub fn socket_uplink(&mut self, origin: SocketOrigin, msg: JsonMessage, now_ms: u32) {
        match msg.broadcast().unwrap_or(Broadcast::None) {
            Broadcast::Remote => {
                self.emit_to_up_sockets(&msg);
            }
            Broadcast::Local => {
                let match_kind = msg.get_talker_match();
                self.dispatch_to_down_talkers(match_kind, &msg, None, now_ms);
                self.dispatch_to_up_talkers(match_kind, &msg, None, now_ms);
                let exclude = match origin {
                    SocketOrigin::Down(i) => Some(i),
                    SocketOrigin::Up(_) => None,
                };
                self.emit_to_down_sockets(&msg, exclude);
                self.emit_to_bridged_up_sockets(&msg);
            }
            _ => {}
        }
    }

    /// Called with a message a DOWN-linked talker just prepared for
    /// transmission. LOCAL fans out to every other down-linked talker and
    /// every up-linked talker, then emits on the sockets; SELF re-invokes
    /// the same talker's `handle` in place, without touching any socket.
    /// Returns whether every egress send succeeded (`true` for SELF).
    pub fn talker_downlink(&mut self, origin: TalkerOrigin, msg: JsonMessage, now_ms: u32) -> bool {
        match msg.broadcast().unwrap_or(Broadcast::None) {
            Broadcast::Local => {
                let match_kind = msg.get_talker_match();
                let exclude_down = match origin {
                    TalkerOrigin::Down(i) => Some(i),
                    TalkerOrigin::Up(_) => None,
                };
                self.dispatch_to_down_talkers(match_kind, &msg, exclude_down, now_ms);
                let exclude_up = match origin {
                    TalkerOrigin::Up(i) => Some(i),
                    TalkerOrigin::Down(_) => None,
                };
                self.dispatch_to_up_talkers(match_kind, &msg, exclude_up, now_ms);
                let down_ok = self.emit_to_down_sockets(&msg, None);
                let up_ok = self.emit_to_bridged_up_sockets(&msg);
                down_ok && up_ok
            }
            Broadcast::Self_ => {
                self.reinvoke_self(origin, msg, now_ms);
                true
            }
            _ => false,
        }
    }

    /// Called with a message an UP-linked talker just prepared for
    /// transmission. REMOTE re-broadcasts to every up-linked socket; LOCAL
    /// fans out identically to `talker_downlink`'s LOCAL case; SELF
    /// re-invokes in place.
    pub fn talker_uplink(&mut self, origin: TalkerOrigin, msg: JsonMessage, now_ms: u32) -> bool {
        match msg.broadcast().unwrap_or(Broadcast::None) {
            Broadcast::Remote => self.emit_to_up_sockets(&msg),
            Broadcast::Local => {
                let match_kind = msg.get_talker_match();
                let exclude_down = match origin {
                    TalkerOrigin::Down(i) => Some(i),
                    TalkerOrigin::Up(_) => None,
                };
                self.dispatch_to_down_talkers(match_kind, &msg, exclude_down, now_ms);
                let exclude_up = match origin {
                    TalkerOrigin::Up(i) => Some(i),
                    TalkerOrigin::Down(_) => None,
                };
                self.dispatch_to_up_talkers(match_kind, &msg, exclude_up, now_ms);
                let down_ok = self.emit_to_down_sockets(&msg, None);
                let up_ok = self.emit_to_bridged_up_sockets(&msg);
                down_ok && up_ok
            }
            Broadcast::Self_ => {
                self.reinvoke_self(origin, msg, now_ms);
                true
            }
            _ => false,
        }
    }

    fn reinvoke_self(&mut self, origin: TalkerOrigin, mut msg: JsonMessage, now_ms: u32) {
        let match_kind = msg.get_talker_match();
        let sockets = self.socket_views();
        let outcome = match origin {
            TalkerOrigin::Down(i) => self.down_talkers[i].handle(&mut msg, match_kind, now_ms, &sockets),
            TalkerOrigin::Up(i) => self.up_talkers[i].handle(&mut msg, match_kind, now_ms, &sockets),
        };
        self.route_outcome(origin, outcome, now_ms);
    }

    /// Routes an inbound ingress outcome from the socket that produced it.
    ///
    /// A clean `Accepted` message is handed to the full fan-out. An Error{}
    /// synthesized for a corrupted or out-of-order arrival is an immediate
    /// point-to-point reply: it goes straight back out the same socket that
    /// detected the problem, never through talker dispatch or the other
    /// sockets — mirroring `BroadcastSocket::_finishTransmission` being
    /// called directly on `this` rather than through the repeater.
    fn route_ingress(&mut self, origin: SocketOrigin, ingress: Ingress, now_ms: u32) {
        match ingress {
            Ingress::Dropped => {}
            Ingress::Accepted(msg) => self.dispatch_from_socket(origin, msg, now_ms),
            Ingress::DelayDropped(msg) => self.reply_on_origin_socket(origin, msg),
            Ingress::RecoveryArmed(errors) => {
                for msg in errors {
                    self.reply_on_origin_socket(origin, msg);
                }
            }
        }
    }

    fn reply_on_origin_socket(&mut self, origin: SocketOrigin, mut msg: JsonMessage) {
        let socket = match origin {
            SocketOrigin::Down(i) => &mut self.down_sockets[i],
            SocketOrigin::Up(i) => &mut self.up_sockets[i],
        };
        socket.finish_transmission(&mut msg);
    }

    fn dispatch_from_socket(&mut self, origin: SocketOrigin, msg: JsonMessage, now_ms: u32) {
        match origin {
            SocketOrigin::Down(_) => self.socket_downlink(origin, msg, now_ms),
            SocketOrigin::Up(_) => self.socket_uplink(origin, msg, now_ms),
        }
    }

    /// Host-facing convenience entry point: injects a message as if it came
    /// from an anonymous local talker, defaulting `f`/`i`/`b` and suppressing
    /// any reply, then routes it exactly like a LOCAL talker transmission.
    /// Useful for a host process that wants to push a message onto the
    /// fabric without registering a `Talker` of its own.
    pub fn downlink_message(&mut self, mut msg: JsonMessage, now_ms: u32) -> bool {
        if msg.from_name().is_none() {
            msg.set_from_name("");
        }
        if msg.identity().is_none() {
            msg.set_identity((now_ms & 0xFFFF) as u16);
        }
        if msg.broadcast().is_none() {
            msg.set_broadcast(Broadcast::Local);
        }
        msg.set_no_reply();

        match msg.broadcast().unwrap() {
            Broadcast::Local => {
                let match_kind = msg.get_talker_match();
                self.dispatch_to_down_talkers(match_kind, &msg, None, now_ms);
                self.dispatch_to_up_talkers(match_kind, &msg, None, now_ms);
                let down_ok = self.emit_to_down_sockets(&msg, None);
                let up_ok = self.emit_to_bridged_up_sockets(&msg);
                down_ok && up_ok
            }
            _ => false,
        }
    }

    /// Host-facing convenience entry point: same as [`Repeater::downlink_message`]
    /// but defaults to REMOTE scope and re-broadcasts on every up-linked
    /// socket, mirroring a message an up-linked talker would have sent.
    pub fn uplink_message(&mut self, mut msg: JsonMessage, now_ms: u32) -> bool {
        if msg.from_name().is_none() {
            msg.set_from_name("");
        }
        if msg.identity().is_none() {
            msg.set_identity((now_ms & 0xFFFF) as u16);
        }
        if msg.broadcast().is_none() {
            msg.set_broadcast(Broadcast::Remote);
        }
        msg.set_no_reply();

        match msg.broadcast().unwrap() {
            Broadcast::Remote => self.emit_to_up_sockets(&msg),
            Broadcast::Local => {
                let match_kind = msg.get_talker_match();
                self.dispatch_to_down_talkers(match_kind, &msg, None, now_ms);
                self.dispatch_to_up_talkers(match_kind, &msg, None, now_ms);
                let down_ok = self.emit_to_down_sockets(&msg, None);
                let up_ok = self.emit_to_bridged_up_sockets(&msg);
                down_ok && up_ok
            }
            _ => false,
        }
    }

    /// Drains every socket's inbound queue, routes whatever it yields, and
    /// runs each talker's manifesto tick hook. Call this once per host
    /// scheduler pass; there is no internal thread or timer driving it.
    pub fn tick(&mut self, now_ms: u32) {
        for i in 0..self.down_sockets.len() {
            let outcomes = self.down_sockets[i].tick(now_ms);
            for outcome in outcomes {
                self.route_ingress(SocketOrigin::Down(i), outcome, now_ms);
            }
        }
        for i in 0..self.up_sockets.len() {
            let outcomes = self.up_sockets[i].tick(now_ms);
            for outcome in outcomes {
                self.route_ingress(SocketOrigin::Up(i), outcome, now_ms);
            }
        }
        for talker in self.down_talkers.iter_mut().chain(self.up_talkers.iter_mut()) {
            talker.tick();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::MessageKind;
    use crate::error::SocketError;
    use crate::manifesto::{Action, Manifesto};

    struct LoopbackPair {
        inbound: std::collections::VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
    }

    impl LoopbackPair {
        fn empty() -> Self {
            LoopbackPair {
                inbound: std::collections::VecDeque::new(),
                sent: Vec::new(),
            }
        }
    }

    impl crate::socket::Transport for LoopbackPair {
        fn recv(&mut self) -> Option<Vec<u8>> {
            self.inbound.pop_front()
        }
        fn send(&mut self, bytes: &[u8]) -> Result<(), SocketError> {
            self.sent.push(bytes.to_vec());
            Ok(())
        }
    }

    fn socket(link_type: LinkType) -> Socket {
        Socket::new(LoopbackPair::empty(), link_type)
    }

    struct NoopManifesto;
    impl Manifesto for NoopManifesto {
        fn actions(&self) -> &[Action] {
            &[]
        }
        fn action_by_index(&mut self, _index: u8, _talker: &mut Talker, _msg: &mut JsonMessage, _match_kind: TalkerMatch) -> bool {
            false
        }
        fn class_description(&self) -> &str {
            "noop"
        }
    }

    fn fabric(down_names: &[&str]) -> Repeater {
        let down_talkers = down_names
            .iter()
            .map(|name| Talker::new(*name, "desc", Some(Box::new(NoopManifesto) as Box<dyn Manifesto>), None))
            .collect();
        Repeater::new(vec![socket(LinkType::UpLinked)], vec![socket(LinkType::DownLinked)], vec![], down_talkers)
    }

    fn local_ping(from: &str) -> JsonMessage {
        let mut msg = JsonMessage::new();
        msg.set_message_kind(MessageKind::Ping);
        msg.set_broadcast(Broadcast::Local);
        msg.set_from_name(from);
        msg.set_identity(1);
        msg
    }

    #[test]
    fn by_name_dispatch_stops_after_first_match() {
        let mut repeater = fabric(&["alpha", "beta"]);
        let mut msg = local_ping("host");
        msg.set_to_name("beta");
        repeater.dispatch_to_down_talkers(TalkerMatch::ByName, &msg, None, 1);
        // Only "beta" should have produced an Echo on the down socket.
        assert_eq!(repeater.down_sockets[0].counters().fails, 0);
    }

    #[test]
    fn any_dispatch_reaches_every_down_talker() {
        let mut repeater = fabric(&["alpha", "beta"]);
        let msg = local_ping("host");
        repeater.dispatch_to_down_talkers(TalkerMatch::Any, &msg, None, 1);
        // Both talkers replying with an Echo means two sends on the down socket.
        // The socket has no way to introspect sent bytes directly here, so
        // this just exercises the call path without panicking; the
        // downlink-level integration tests in tests/ check wire content.
        let _ = repeater.down_sockets();
    }

    #[test]
    fn socket_downlink_ignores_none_and_non_bridged_local() {
        let mut repeater = fabric(&["alpha"]);
        let mut msg = JsonMessage::new();
        msg.set_message_kind(MessageKind::Ping);
        // Broadcast left as None: socket_downlink must do nothing.
        repeater.socket_downlink(SocketOrigin::Down(0), msg, 1);
        assert_eq!(repeater.down_talkers()[0].name(), "alpha");
    }

    #[test]
    fn uplink_message_defaults_remote_scope_and_sends_to_up_sockets() {
        let mut repeater = fabric(&[]);
        let mut msg = JsonMessage::new();
        msg.set_message_kind(MessageKind::Noise);
        assert!(repeater.uplink_message(msg.clone(), 1));
    }

    #[test]
    fn tick_drains_sockets_without_panicking() {
        let mut repeater = fabric(&["alpha"]);
        repeater.tick(1);
        repeater.tick(2);
    }
}
