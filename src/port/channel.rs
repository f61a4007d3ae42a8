//! User-facing channel handle.

use super::PortShared;
use crate::backend_interface::ChannelEndpoint;
use crate::error::{PortError, Result};
use crate::wire::ClientToServerFrame;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

/// Event delivered by an open channel, in transport order. `Closed` and
/// `Errored` are terminal; nothing follows them.
#[derive(Debug)]
pub enum ChannelEvent {
    Message(Value),
    Closed,
    Errored(PortError),
}

/// A long-lived bidirectional message stream over the port.
///
/// Outbound packets go through [`send`](Self::send); each send carries an
/// acknowledgement id and returns a receipt that resolves when the server
/// acknowledges it. Awaiting the receipt for message N before sending N+1 is
/// the flow-control mechanism for application-level streaming. Inbound
/// traffic arrives on the take-once event stream from
/// [`events`](Self::events).
pub struct Channel {
    port: Weak<PortShared>,
    channel_id: u64,
    endpoint: Arc<ChannelEndpoint>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
}

impl Channel {
    pub(super) fn new(
        port: Weak<PortShared>,
        channel_id: u64,
        endpoint: Arc<ChannelEndpoint>,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> Self {
        Self {
            port,
            channel_id,
            endpoint,
            events: Mutex::new(Some(events)),
        }
    }

    pub fn channel_id(&self) -> u64 {
        self.channel_id
    }

    pub fn endpoint_name(&self) -> &str {
        &self.endpoint.name
    }

    /// Take the event stream. Returns `None` on every call after the first.
    pub fn events(&self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
        self.events.lock().expect("channel events lock poisoned").take()
    }

    /// Validate and send one packet to the server.
    ///
    /// # Errors
    ///
    /// - [`PortError::InvalidParameter`] if the packet fails the endpoint's
    ///   outbound schema; nothing is sent.
    /// - [`PortError::ChannelClosed`] if the channel already reached a
    ///   terminal event.
    pub fn send(&self, message: Value) -> Result<AckReceipt> {
        let port = self.port.upgrade().ok_or(PortError::PortDropped)?;
        self.endpoint
            .to_server_packet
            .validate(&message)
            .map_err(|issue| PortError::InvalidParameter {
                endpoint: self.endpoint.name.clone(),
                message: issue.to_string(),
            })?;

        let (tx, rx) = oneshot::channel();
        let ack_id = port.register_ack(self.channel_id, tx)?;
        port.send_frame(ClientToServerFrame::ChannelSend {
            channel_id: self.channel_id,
            message,
            ack_id: Some(ack_id),
        });
        Ok(AckReceipt {
            channel_id: self.channel_id,
            rx,
        })
    }
}

/// Resolves when the server acknowledges the corresponding send.
#[derive(Debug)]
pub struct AckReceipt {
    channel_id: u64,
    rx: oneshot::Receiver<()>,
}

impl Future for AckReceipt {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let channel_id = self.channel_id;
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.map_err(|_| PortError::ChannelClosed { channel_id })
        })
    }
}
