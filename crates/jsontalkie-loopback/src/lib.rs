//! An in-process [`Transport`] pair for tests and demos.
//!
//! Each call to [`loopback_pair`] builds two independent queues — there is
//! no global or static state, so a test can create as many disjoint fabrics
//! as it needs without any cross-talk between them.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use jsontalkie_core::{SocketError, Transport};

type Queue = Rc<RefCell<VecDeque<Vec<u8>>>>;

/// One end of a connected loopback pair. Bytes `send` on this end arrive in
/// the peer's `recv` queue, and vice versa.
pub struct LoopbackTransport {
    inbound: Queue,
    outbound: Queue,
}

impl LoopbackTransport {
    fn new(inbound: Queue, outbound: Queue) -> Self {
        LoopbackTransport { inbound, outbound }
    }
}

impl Transport for LoopbackTransport {
    fn recv(&mut self) -> Option<Vec<u8>> {
        self.inbound.borrow_mut().pop_front()
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), SocketError> {
        self.outbound.borrow_mut().push_back(bytes.to_vec());
        Ok(())
    }
}

/// Builds a connected pair of transports sharing two one-directional queues.
pub fn loopback_pair() -> (LoopbackTransport, LoopbackTransport) {
    let a_to_b: Queue = Rc::new(RefCell::new(VecDeque::new()));
    let b_to_a: Queue = Rc::new(RefCell::new(VecDeque::new()));
    (
        LoopbackTransport::new(b_to_a.clone(), a_to_b.clone()),
        LoopbackTransport::new(a_to_b, b_to_a),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_sent_on_one_side_arrive_on_the_other() {
        let (mut a, mut b) = loopback_pair();
        a.send(b"hello").unwrap();
        assert_eq!(b.recv(), Some(b"hello".to_vec()));
        assert_eq!(a.recv(), None);
    }

    #[test]
    fn independent_pairs_do_not_share_queues() {
        let (mut a1, mut b1) = loopback_pair();
        let (mut a2, mut b2) = loopback_pair();
        a1.send(b"x").unwrap();
        a2.send(b"y").unwrap();
        assert_eq!(b1.recv(), Some(b"x".to_vec()));
        assert_eq!(b2.recv(), Some(b"y".to_vec()));
    }
}
