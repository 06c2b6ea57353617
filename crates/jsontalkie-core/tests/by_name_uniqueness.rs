//! Scenario: a Talk addressed `t = "beta"` reaches only the Talker named
//! "beta", never "alpha", even though both are registered in the same
//! down-linked collection and would both match an `Any` dispatch.

use jsontalkie_core::{JsonMessage, LinkType, MessageKind, Repeater, Socket, Talker, Transport};
use jsontalkie_loopback::{LoopbackTransport, loopback_pair};

fn drain(transport: &mut LoopbackTransport) -> Vec<JsonMessage> {
    let mut out = Vec::new();
    while let Some(bytes) = transport.recv() {
        out.push(JsonMessage::deserialize(&bytes).unwrap());
    }
    out
}

#[test]
fn by_name_dispatch_reaches_only_the_named_talker() {
    let (socket_side, mut observer) = loopback_pair();
    let socket = Socket::new(socket_side, LinkType::DownLinked);
    let alpha = Talker::new("alpha", "fixture alpha", None, None);
    let beta = Talker::new("beta", "fixture beta", None, None);
    let mut repeater = Repeater::new(vec![], vec![socket], vec![], vec![alpha, beta]);

    let mut talk = JsonMessage::new();
    talk.set_message_kind(MessageKind::Talk);
    talk.set_to_name("beta");

    repeater.downlink_message(talk, 1);

    let echoes: Vec<_> = drain(&mut observer)
        .into_iter()
        .filter(|m| m.message_kind() == MessageKind::Echo)
        .collect();
    assert_eq!(echoes.len(), 1);
    assert_eq!(echoes[0].from_name().as_deref(), Some("beta"));
}
