//! Scenario: a Call naming a registered action whose handler reports
//! failure comes back with `r = Negative`, and the action field itself is
//! echoed unchanged.
//!
//! The Call is routed through `Repeater::talker_downlink` directly, standing
//! in for the outbound half of `ctrl`'s own `Talker::handle` call — the
//! `downlink_message` host-injection entry point always sets `n` (no-reply)
//! on what it sends, which would suppress exactly the Echo this test needs
//! to observe (matching the original `downlinkMessage`'s behavior of being a
//! fire-and-forget primitive).

use jsontalkie_core::{
    Action, Broadcast, JsonMessage, LinkType, Manifesto, MessageKind, NAME_LEN, Repeater, Roger, Socket, Talker, TalkerMatch, TalkerOrigin,
    Transport,
};
use jsontalkie_loopback::{LoopbackTransport, loopback_pair};

struct LedManifesto {
    actions: Vec<Action>,
}

impl Manifesto for LedManifesto {
    fn actions(&self) -> &[Action] {
        &self.actions
    }

    fn action_by_index(&mut self, index: u8, _talker: &mut Talker, _msg: &mut JsonMessage, _match_kind: TalkerMatch) -> bool {
        // "off" is index 1 in this fixture and always fails.
        index != 1
    }

    fn class_description(&self) -> &str {
        "led"
    }
}

fn drain(transport: &mut LoopbackTransport) -> Vec<JsonMessage> {
    let mut out = Vec::new();
    while let Some(bytes) = transport.recv() {
        out.push(JsonMessage::deserialize(&bytes).unwrap());
    }
    out
}

#[test]
fn call_with_failing_action_gets_negative_roger() {
    let (socket_side, mut observer) = loopback_pair();
    let socket = Socket::new(socket_side, LinkType::DownLinked);
    let manifesto: Box<dyn Manifesto> = Box::new(LedManifesto {
        actions: vec![Action::new("on", "Turn on"), Action::new("off", "Turn off")],
    });
    let ctrl = Talker::new("ctrl", "fixture ctrl", None, None);
    let led = Talker::new("led", "fixture led", Some(manifesto), None);
    let mut repeater = Repeater::new(vec![], vec![socket], vec![], vec![ctrl, led]);

    let mut call = JsonMessage::new();
    call.set_message_kind(MessageKind::Call);
    call.set_broadcast(Broadcast::Local);
    call.set_from_name("ctrl");
    call.set_to_name("led");
    call.set_string('a', "off", NAME_LEN);
    call.set_identity(200);

    repeater.talker_downlink(TalkerOrigin::Down(0), call, 5);

    let echoes: Vec<_> = drain(&mut observer)
        .into_iter()
        .filter(|m| m.message_kind() == MessageKind::Echo)
        .collect();
    assert_eq!(echoes.len(), 1);

    let echo = &echoes[0];
    assert_eq!(echo.get_uint('r'), Some(Roger::Negative as u32));
    assert_eq!(echo.get_string('a', NAME_LEN).as_deref(), Some("off"));
    assert_eq!(echo.identity(), Some(200));
    assert_eq!(echo.from_name().as_deref(), Some("led"));
    assert_eq!(echo.to_name().as_deref(), Some("ctrl"));
}
