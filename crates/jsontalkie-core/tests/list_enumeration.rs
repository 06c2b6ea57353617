//! Scenario: a List addressed to a named Talker with a two-action
//! Manifesto comes back as one Echo per action, in registration order.

use jsontalkie_core::{
    Action, Broadcast, JsonMessage, LinkType, Manifesto, MessageKind, NAME_LEN, Repeater, Socket, Talker, TalkerMatch, TalkerOrigin, Transport,
};
use jsontalkie_loopback::{LoopbackTransport, loopback_pair};

struct LedManifesto {
    actions: Vec<Action>,
}

impl Manifesto for LedManifesto {
    fn actions(&self) -> &[Action] {
        &self.actions
    }

    fn action_by_index(&mut self, _index: u8, _talker: &mut Talker, _msg: &mut JsonMessage, _match_kind: TalkerMatch) -> bool {
        true
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
fn list_enumerates_registered_actions_in_order() {
    let (socket_side, mut observer) = loopback_pair();
    let socket = Socket::new(socket_side, LinkType::DownLinked);
    let manifesto: Box<dyn Manifesto> = Box::new(LedManifesto {
        actions: vec![Action::new("on", "Turn on"), Action::new("off", "Turn off")],
    });
    let ctrl = Talker::new("ctrl", "fixture ctrl", None, None);
    let led = Talker::new("led", "fixture led", Some(manifesto), None);
    let mut repeater = Repeater::new(vec![], vec![socket], vec![], vec![ctrl, led]);

    let mut list = JsonMessage::new();
    list.set_message_kind(MessageKind::List);
    list.set_broadcast(Broadcast::Local);
    list.set_from_name("ctrl");
    list.set_to_name("led");
    list.set_identity(9);

    repeater.talker_downlink(TalkerOrigin::Down(0), list, 3);

    let echoes: Vec<_> = drain(&mut observer)
        .into_iter()
        .filter(|m| m.message_kind() == MessageKind::Echo)
        .collect();
    assert_eq!(echoes.len(), 2);

    assert_eq!(echoes[0].get_uint('0'), Some(0));
    assert_eq!(echoes[0].get_string('1', NAME_LEN).as_deref(), Some("on"));
    assert_eq!(echoes[1].get_uint('0'), Some(1));
    assert_eq!(echoes[1].get_string('1', NAME_LEN).as_deref(), Some("off"));
    assert!(echoes.iter().all(|e| e.from_name().as_deref() == Some("led")));
    assert!(echoes.iter().all(|e| e.to_name().as_deref() == Some("ctrl")));
}
