//! Scenario: a Ping arrives with a mangled checksum, the socket arms a
//! recovery record and replies with `Error{Checksum}` on the very socket
//! that saw it, and a matching `M`-tagged retransmission clears the record
//! and is accepted as if it had arrived clean the first time.
//!
//! The reply never goes through `Repeater::socket_downlink` — it's a
//! point-to-point turnaround on the detecting socket, so it is observed
//! here directly via the loopback pair rather than through talker dispatch.

use jsontalkie_core::{Broadcast, ErrorCode, JsonMessage, LinkType, MessageKind, Repeater, Socket, Talker, Transport};
use jsontalkie_loopback::{LoopbackTransport, loopback_pair};

fn drain(transport: &mut LoopbackTransport) -> Vec<JsonMessage> {
    let mut out = Vec::new();
    while let Some(bytes) = transport.recv() {
        out.push(JsonMessage::deserialize(&bytes).unwrap());
    }
    out
}

#[test]
fn recovery_tag_clears_record_after_checksum_error_reply() {
    let (socket_side, mut observer) = loopback_pair();
    let socket = Socket::new(socket_side, LinkType::DownLinked);
    let echoer = Talker::new("echoer", "fixture echoer", None, None);
    let mut repeater = Repeater::new(vec![], vec![socket], vec![], vec![echoer]);

    let mut corrupted = JsonMessage::new();
    corrupted.set_message_kind(MessageKind::Ping);
    corrupted.set_broadcast(Broadcast::Remote);
    corrupted.set_from_name("peer");
    corrupted.set_identity(50);
    corrupted.set_uint('c', 1); // deliberately wrong checksum
    observer.send(corrupted.as_str().as_bytes()).unwrap();

    repeater.tick(0);

    let replies = drain(&mut observer);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].get_uint('e'), Some(ErrorCode::Checksum as u32));
    assert_eq!(replies[0].identity(), Some(50));
    assert_eq!(repeater.down_sockets()[0].counters().recoveries, 0);

    let mut retry = JsonMessage::new();
    retry.set_uint('M', MessageKind::Ping as u32);
    retry.set_broadcast(Broadcast::Remote);
    retry.set_from_name("peer");
    retry.set_identity(50);
    observer.send(retry.as_str().as_bytes()).unwrap();

    repeater.tick(10);

    assert_eq!(repeater.down_sockets()[0].counters().recoveries, 1);
}
