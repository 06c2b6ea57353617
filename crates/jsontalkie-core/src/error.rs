//! Transport-boundary error type.
//!
//! Protocol-level fallibility (malformed fields, buffer overflow, checksum
//! mismatch) is deliberately `bool`/`Option` throughout the codec and the
//! socket pipeline — that is the wire contract, not an omission. This type
//! exists only for the one seam where a concrete transport needs to report
//! *why* a send failed, in the style of `SessionError` in the teacher's
//! `services/receiver/src/session.rs`.

/// Error returned by a [`crate::socket::Transport`] implementation's send
/// side. The socket pipeline only cares whether the send succeeded (it
/// increments `fails` either way); the error itself is surfaced to the host
/// via `tracing::warn!` for diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("transport I/O error: {0}")]
    Io(String),
    #[error("transport is not connected")]
    NotConnected,
    #[error("datagram exceeds transport MTU: {0} bytes")]
    TooLarge(usize),
}
