//! The frame transport contract.
//!
//! The port multiplexes everything over one already-connected,
//! already-authenticated frame channel. How frames reach the server (an
//! inter-process tunnel, a websocket) is the transport collaborator's
//! business, as are framing, authentication and reconnection.

use crate::wire::ClientToServerFrame;

/// An ordered, bidirectional frame channel.
///
/// The port calls [`send`](Self::send) for every outbound frame and expects
/// delivery in call order. Inbound frames and terminal failures flow back
/// through the [`InboundHandle`](crate::port::InboundHandle) given to the
/// transport factory at port construction.
///
/// The two edge callbacks track the port's open-communications count: a
/// transport may use them to keep the underlying connection alive while work
/// is in flight and shut it down when idle.
pub trait FrameTransport: Send + Sync {
    /// Queue one frame for delivery. Fire-and-forget: delivery failures
    /// surface later through the transport's error path, never here.
    fn send(&self, frame: ClientToServerFrame);

    /// The open-communications count dropped to zero.
    fn on_having_no_open_communication(&self) {}

    /// The open-communications count left zero.
    fn on_having_one_or_more_open_communication(&self) {}
}
