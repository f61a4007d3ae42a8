//! The client port: a per-transport typed message multiplexer.
//!
//! One port owns one frame transport and everything in flight over it: RPC
//! calls, open channels, and signal subscriptions. It assigns identifiers,
//! validates every payload against the backend interface, demultiplexes
//! inbound frames to the right record, and keeps the open-communications
//! count the transport uses for idle shutdown.
//!
//! Protocol sanity failures (unknown ids, inbound payloads that fail their
//! schema) never raise into user code. They become communication warnings:
//! logged locally, echoed to the peer, and capped so a misbehaving server
//! cannot flood either side.

mod channel;

pub use channel::{AckReceipt, Channel, ChannelEvent};

use crate::backend_interface::{BackendInterface, ChannelEndpoint, RpcEndpoint, SignalEndpoint};
use crate::call_site::CallSite;
use crate::config::PortConfig;
use crate::error::{default_error_deserializer, ErrorDeserializer, PortError, Result};
use crate::patch::{apply_patches, Patch};
use crate::signal::{
    LazySignal, OwlShared, OwlSignal, SignalListener, SignalSetter, Teardown, UpstreamWriter,
};
use crate::transport::FrameTransport;
use crate::wire::{ClientToServerFrame, SerializedError, ServerToClientFrame, WriteTag};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace, warn};

/// Options for port construction.
#[derive(Default)]
pub struct PortOptions {
    /// Turns wire-form server errors into `PortError`s. Defaults to
    /// [`default_error_deserializer`].
    pub error_deserializer: Option<ErrorDeserializer>,
    /// When on, deserialized server errors carry the captured client call
    /// site of the failing operation. When off, they carry no stack at all.
    pub verbose_errors: bool,
}

/// One in-flight RPC call.
struct OngoingRpc {
    endpoint: Arc<RpcEndpoint>,
    reply: oneshot::Sender<Result<Value>>,
    site: CallSite,
}

/// One open channel.
struct OpenChannel {
    endpoint: Arc<ChannelEndpoint>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    pending_acks: HashMap<u64, oneshot::Sender<()>>,
    next_ack_id: u64,
    site: CallSite,
}

type SignalUpdateFn =
    Arc<dyn Fn(&[Patch], &[WriteTag]) -> std::result::Result<(), String> + Send + Sync>;
type SignalFailFn = Arc<dyn Fn(PortError) + Send + Sync>;

/// One live signal subscription (read-only or writable; the table it sits in
/// tells them apart).
struct OpenSignalSubscription {
    endpoint: Arc<SignalEndpoint>,
    apply_update: SignalUpdateFn,
    fail: SignalFailFn,
    site: CallSite,
}

#[derive(Default)]
struct PortState {
    /// Shared id space for RPC calls and channels.
    next_call_id: u64,
    next_signal_id: u64,
    next_writable_id: u64,
    rpcs: HashMap<u64, OngoingRpc>,
    channels: HashMap<u64, OpenChannel>,
    signal_subscriptions: HashMap<u64, OpenSignalSubscription>,
    writable_subscriptions: HashMap<u64, OpenSignalSubscription>,
    warnings_emitted: u32,
}

impl PortState {
    fn open_count(&self) -> usize {
        self.rpcs.len()
            + self.channels.len()
            + self.signal_subscriptions.len()
            + self.writable_subscriptions.len()
    }
}

/// Open-communications count edge, reported to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    NowOpen,
    NowIdle,
}

fn edge(before: usize, after: usize) -> Option<Edge> {
    if before == 0 && after > 0 {
        Some(Edge::NowOpen)
    } else if before > 0 && after == 0 {
        Some(Edge::NowIdle)
    } else {
        None
    }
}

pub(crate) struct PortShared {
    backend: Arc<BackendInterface>,
    transport: OnceLock<Arc<dyn FrameTransport>>,
    state: Mutex<PortState>,
    error_deserializer: ErrorDeserializer,
    verbose_errors: bool,
}

impl PortShared {
    fn lock(&self) -> MutexGuard<'_, PortState> {
        self.state.lock().expect("port state lock poisoned")
    }

    pub(crate) fn send_frame(&self, frame: ClientToServerFrame) {
        if let Some(transport) = self.transport.get() {
            trace!("Sending frame: {:?}", frame);
            transport.send(frame);
        }
    }

    fn notify_edge(&self, edge: Option<Edge>) {
        let Some(edge) = edge else { return };
        let Some(transport) = self.transport.get() else {
            return;
        };
        match edge {
            Edge::NowOpen => transport.on_having_one_or_more_open_communication(),
            Edge::NowIdle => transport.on_having_no_open_communication(),
        }
    }

    /// Allocate an ack id on an open channel and park its resolver.
    pub(crate) fn register_ack(
        &self,
        channel_id: u64,
        resolver: oneshot::Sender<()>,
    ) -> Result<u64> {
        let mut state = self.lock();
        let record = state
            .channels
            .get_mut(&channel_id)
            .ok_or(PortError::ChannelClosed { channel_id })?;
        let ack_id = record.next_ack_id;
        record.next_ack_id += 1;
        record.pending_acks.insert(ack_id, resolver);
        Ok(ack_id)
    }

    /// Stack text attached to deserialized remote errors for this operation.
    fn error_stack(&self, site: &CallSite) -> Option<String> {
        self.verbose_errors.then(|| site.to_string())
    }

    // --- signal subscription wiring ---

    fn subscribe_signal(
        self: &Arc<Self>,
        endpoint: Arc<SignalEndpoint>,
        listener: SignalListener<Value>,
        site: CallSite,
        creation_parameter: Value,
    ) -> Teardown {
        let apply_listener = listener.clone();
        let data_schema = endpoint.signal_data.clone();
        let apply_update: SignalUpdateFn = Arc::new(move |patches, tags| {
            // Current must be read through the listener: for writable
            // cousins of this path the pending writes are already folded in.
            let current = apply_listener.current().unwrap_or(Value::Null);
            let next = apply_patches(&current, patches)
                .map_err(|e| format!("patches failed to apply: {}", e))?;
            data_schema
                .validate(&next)
                .map_err(|issue| format!("signal data rejected: {}", issue))?;
            apply_listener.push(next, tags.to_vec());
            Ok(())
        });
        let error_listener = listener.clone();
        let fail: SignalFailFn = Arc::new(move |err| error_listener.error(&err));

        let (subscribe_id, opened) = {
            let mut state = self.lock();
            let before = state.open_count();
            let subscribe_id = state.next_signal_id;
            state.next_signal_id += 1;
            state.signal_subscriptions.insert(
                subscribe_id,
                OpenSignalSubscription {
                    endpoint: endpoint.clone(),
                    apply_update,
                    fail,
                    site,
                },
            );
            (subscribe_id, edge(before, state.open_count()))
        };
        self.notify_edge(opened);
        self.send_frame(ClientToServerFrame::SignalSubscribe {
            endpoint: endpoint.name.clone(),
            subscribe_id,
            creation_parameter,
        });

        let port = Arc::downgrade(self);
        Box::new(move || {
            let Some(shared) = port.upgrade() else { return };
            let (removed, idled) = {
                let mut state = shared.lock();
                let before = state.open_count();
                let removed = state.signal_subscriptions.remove(&subscribe_id).is_some();
                (removed, edge(before, state.open_count()))
            };
            // Skip the frame when the server already ended the subscription.
            if removed {
                shared.send_frame(ClientToServerFrame::SignalUnsubscribe { subscribe_id });
                shared.notify_edge(idled);
            }
        })
    }

    fn subscribe_writable_signal(
        self: &Arc<Self>,
        endpoint: Arc<SignalEndpoint>,
        owl: Arc<OwlShared>,
        listener: SignalListener<Value>,
        site: CallSite,
        creation_parameter: Value,
    ) -> Teardown {
        let data_schema = endpoint.signal_data.clone();
        let apply_owl = owl.clone();
        let apply_update: SignalUpdateFn = Arc::new(move |patches, tags| {
            let validate = |value: &Value| {
                data_schema
                    .validate(value)
                    .map_err(|issue| format!("signal data rejected: {}", issue))
            };
            apply_owl.apply_confirmed(patches, tags, &validate)
        });
        let error_listener = listener.clone();
        let fail_owl = owl.clone();
        let fail: SignalFailFn = Arc::new(move |err| {
            // The record is gone, so stray writes must fail fast from here on.
            fail_owl.end_session();
            error_listener.error(&err);
        });

        let (subscribe_id, opened) = {
            let mut state = self.lock();
            let before = state.open_count();
            let subscribe_id = state.next_writable_id;
            state.next_writable_id += 1;
            state.writable_subscriptions.insert(
                subscribe_id,
                OpenSignalSubscription {
                    endpoint: endpoint.clone(),
                    apply_update,
                    fail,
                    site,
                },
            );
            (subscribe_id, edge(before, state.open_count()))
        };

        // The writer captures this session's subscribe id; teardown ends the
        // session so a detached setter cannot address a stale id.
        let writer_port = Arc::downgrade(self);
        let writer: UpstreamWriter = Arc::new(move |patches, tags| {
            if let Some(shared) = writer_port.upgrade() {
                shared.send_frame(ClientToServerFrame::WritableSignalUpdate {
                    subscribe_id,
                    patches: patches.to_vec(),
                    tags: tags.to_vec(),
                });
            }
        });
        owl.begin_session(listener, writer);

        self.notify_edge(opened);
        self.send_frame(ClientToServerFrame::WritableSignalSubscribe {
            endpoint: endpoint.name.clone(),
            subscribe_id,
            creation_parameter,
        });

        let port = Arc::downgrade(self);
        Box::new(move || {
            owl.end_session();
            let Some(shared) = port.upgrade() else { return };
            let (removed, idled) = {
                let mut state = shared.lock();
                let before = state.open_count();
                let removed = state.writable_subscriptions.remove(&subscribe_id).is_some();
                (removed, edge(before, state.open_count()))
            };
            if removed {
                shared.send_frame(ClientToServerFrame::WritableSignalUnsubscribe { subscribe_id });
                shared.notify_edge(idled);
            }
        })
    }

    // --- inbound dispatch ---

    fn dispatch(self: &Arc<Self>, frame: ServerToClientFrame) {
        trace!("Received frame: {:?}", frame);
        match frame {
            ServerToClientFrame::RpcResult { call_id, result } => {
                self.on_rpc_result(call_id, result);
            }
            ServerToClientFrame::RpcError { call_id, error } => {
                self.on_rpc_error(call_id, error);
            }
            ServerToClientFrame::ChannelSend {
                channel_id,
                message,
            } => self.on_channel_send(channel_id, message),
            ServerToClientFrame::ChannelAck { channel_id, ack_id } => {
                self.on_channel_ack(channel_id, ack_id);
            }
            ServerToClientFrame::ChannelClose { channel_id } => self.on_channel_close(channel_id),
            ServerToClientFrame::ChannelError { channel_id, error } => {
                self.on_channel_error(channel_id, error);
            }
            ServerToClientFrame::SignalUpdate {
                subscribe_id,
                patches,
                tags,
            } => self.on_signal_update(false, subscribe_id, patches, tags),
            ServerToClientFrame::SignalError {
                subscribe_id,
                error,
            } => self.on_signal_error(false, subscribe_id, error),
            ServerToClientFrame::WritableSignalUpdate {
                subscribe_id,
                patches,
                tags,
            } => self.on_signal_update(true, subscribe_id, patches, tags),
            ServerToClientFrame::WritableSignalError {
                subscribe_id,
                error,
            } => self.on_signal_error(true, subscribe_id, error),
            ServerToClientFrame::CommunicationWarning { warning } => {
                warn!("Communication warning from server: {}", warning);
            }
            ServerToClientFrame::KeepAliveAck => {
                // Keep-alive is the transport's concern; the ack is just noise
                // to us.
            }
        }
    }

    fn on_rpc_result(self: &Arc<Self>, call_id: u64, result: Value) {
        // Validate before consuming the record: an invalid payload is
        // dropped as if it never arrived.
        let returns = self
            .lock()
            .rpcs
            .get(&call_id)
            .map(|rpc| rpc.endpoint.returns.clone());
        let Some(returns) = returns else {
            self.communication_warning(format!(
                "Received rpcResult for unknown callId {}",
                call_id
            ));
            return;
        };
        if let Err(issue) = returns.validate(&result) {
            self.communication_warning(format!(
                "rpcResult for callId {} failed validation: {}",
                call_id, issue
            ));
            return;
        }

        let (record, idled) = {
            let mut state = self.lock();
            let before = state.open_count();
            let record = state.rpcs.remove(&call_id);
            let idled = edge(before, state.open_count());
            (record, idled)
        };
        if let Some(record) = record {
            let _ = record.reply.send(Ok(result));
            self.notify_edge(idled);
        }
    }

    fn on_rpc_error(self: &Arc<Self>, call_id: u64, error: SerializedError) {
        let (record, idled) = {
            let mut state = self.lock();
            let before = state.open_count();
            let record = state.rpcs.remove(&call_id);
            let idled = edge(before, state.open_count());
            (record, idled)
        };
        let Some(record) = record else {
            self.communication_warning(format!(
                "Received rpcError for unknown callId {}",
                call_id
            ));
            return;
        };
        let err = (self.error_deserializer)(error, self.error_stack(&record.site));
        let _ = record.reply.send(Err(err));
        self.notify_edge(idled);
    }

    fn on_channel_send(self: &Arc<Self>, channel_id: u64, message: Value) {
        let entry = self
            .lock()
            .channels
            .get(&channel_id)
            .map(|c| (c.endpoint.to_client_packet.clone(), c.events.clone()));
        let Some((packet_schema, events)) = entry else {
            self.communication_warning(format!(
                "Received channelSend for unknown channelId {}",
                channel_id
            ));
            return;
        };
        if let Err(issue) = packet_schema.validate(&message) {
            self.communication_warning(format!(
                "channelSend for channelId {} failed validation: {}",
                channel_id, issue
            ));
            return;
        }
        let _ = events.send(ChannelEvent::Message(message));
    }

    fn on_channel_ack(self: &Arc<Self>, channel_id: u64, ack_id: u64) {
        let resolver = {
            let mut state = self.lock();
            match state.channels.get_mut(&channel_id) {
                Some(record) => record.pending_acks.remove(&ack_id),
                None => {
                    drop(state);
                    self.communication_warning(format!(
                        "Received channelAck for unknown channelId {}",
                        channel_id
                    ));
                    return;
                }
            }
        };
        let Some(resolver) = resolver else {
            self.communication_warning(format!(
                "Received channelAck for unknown ackId {} on channelId {}",
                ack_id, channel_id
            ));
            return;
        };
        let _ = resolver.send(());
    }

    fn on_channel_close(self: &Arc<Self>, channel_id: u64) {
        let (record, idled) = {
            let mut state = self.lock();
            let before = state.open_count();
            let record = state.channels.remove(&channel_id);
            let idled = edge(before, state.open_count());
            (record, idled)
        };
        let Some(record) = record else {
            self.communication_warning(format!(
                "Received channelClose for unknown channelId {}",
                channel_id
            ));
            return;
        };
        // Dropping the record drops unresolved ack senders; their receipts
        // resolve to ChannelClosed.
        let _ = record.events.send(ChannelEvent::Closed);
        self.notify_edge(idled);
    }

    fn on_channel_error(self: &Arc<Self>, channel_id: u64, error: SerializedError) {
        let (record, idled) = {
            let mut state = self.lock();
            let before = state.open_count();
            let record = state.channels.remove(&channel_id);
            let idled = edge(before, state.open_count());
            (record, idled)
        };
        let Some(record) = record else {
            self.communication_warning(format!(
                "Received channelError for unknown channelId {}",
                channel_id
            ));
            return;
        };
        let err = (self.error_deserializer)(error, self.error_stack(&record.site));
        let _ = record.events.send(ChannelEvent::Errored(err));
        self.notify_edge(idled);
    }

    fn on_signal_update(
        self: &Arc<Self>,
        writable: bool,
        subscribe_id: u64,
        patches: Vec<Patch>,
        tags: Vec<WriteTag>,
    ) {
        let label = if writable {
            "writableSignalUpdate"
        } else {
            "signalUpdate"
        };
        let entry = {
            let state = self.lock();
            let table = if writable {
                &state.writable_subscriptions
            } else {
                &state.signal_subscriptions
            };
            table
                .get(&subscribe_id)
                .map(|s| (s.endpoint.name.clone(), s.apply_update.clone()))
        };
        let Some((endpoint_name, apply)) = entry else {
            self.communication_warning(format!(
                "Received {} for unknown subscribeId {}",
                label, subscribe_id
            ));
            return;
        };
        // Applied outside the state lock: delivery runs observer callbacks.
        if let Err(reason) = apply(&patches, &tags) {
            self.communication_warning(format!(
                "{} for subscribeId {} ({}) dropped: {}",
                label, subscribe_id, endpoint_name, reason
            ));
        }
    }

    fn on_signal_error(
        self: &Arc<Self>,
        writable: bool,
        subscribe_id: u64,
        error: SerializedError,
    ) {
        let (record, idled) = {
            let mut state = self.lock();
            let before = state.open_count();
            let table = if writable {
                &mut state.writable_subscriptions
            } else {
                &mut state.signal_subscriptions
            };
            let record = table.remove(&subscribe_id);
            let idled = edge(before, state.open_count());
            (record, idled)
        };
        let Some(record) = record else {
            self.communication_warning(format!(
                "Received {} for unknown subscribeId {}",
                if writable {
                    "writableSignalError"
                } else {
                    "signalError"
                },
                subscribe_id
            ));
            return;
        };
        let err = (self.error_deserializer)(error, self.error_stack(&record.site));
        (record.fail)(err);
        self.notify_edge(idled);
    }

    /// Reject every in-flight RPC and error every open channel. Signal
    /// subscriptions stay: their lifecycle follows the transport's
    /// subscription-close semantics after a reconnect.
    fn fail_all(self: &Arc<Self>, error: PortError) {
        let (rpcs, channels, idled) = {
            let mut state = self.lock();
            let before = state.open_count();
            let rpcs = std::mem::take(&mut state.rpcs);
            let channels = std::mem::take(&mut state.channels);
            (rpcs, channels, edge(before, state.open_count()))
        };
        if !rpcs.is_empty() || !channels.is_empty() {
            warn!(
                "Transport failed; rejecting {} rpc(s), erroring {} channel(s): {}",
                rpcs.len(),
                channels.len(),
                error
            );
        }
        for (_, rpc) in rpcs {
            let _ = rpc.reply.send(Err(error.clone()));
        }
        for (_, record) in channels {
            let _ = record.events.send(ChannelEvent::Errored(error.clone()));
        }
        self.notify_edge(idled);
    }

    /// Record a protocol sanity failure: log it, tell the peer, and go quiet
    /// once the cap is reached.
    fn communication_warning(self: &Arc<Self>, text: String) {
        let nth = {
            let mut state = self.lock();
            state.warnings_emitted += 1;
            state.warnings_emitted
        };
        if nth <= PortConfig::MAX_COMMUNICATION_WARNINGS {
            let shown: String = text.chars().take(PortConfig::WARNING_CONTEXT_MAX_LEN).collect();
            warn!("Communication warning: {}", shown);
            self.send_frame(ClientToServerFrame::CommunicationWarning { warning: text });
        } else if nth == PortConfig::MAX_COMMUNICATION_WARNINGS + 1 {
            error!("Further communication warnings suppressed");
        }
    }
}

/// Inbound surface handed to the transport factory. The transport calls
/// these from wherever its read loop lives; the port serializes everything
/// internally.
#[derive(Clone)]
pub struct InboundHandle {
    port: Weak<PortShared>,
}

impl InboundHandle {
    /// Deliver one frame from the server.
    pub fn handle_message(&self, frame: ServerToClientFrame) {
        if let Some(shared) = self.port.upgrade() {
            shared.dispatch(frame);
        }
    }

    /// Report that the transport is terminally broken.
    pub fn handle_error(&self, error: PortError) {
        if let Some(shared) = self.port.upgrade() {
            shared.fail_all(error);
        }
    }
}

/// Future for an RPC reply.
#[derive(Debug)]
pub struct RpcReply {
    rx: oneshot::Receiver<Result<Value>>,
}

impl Future for RpcReply {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(PortError::PortDropped)))
    }
}

/// The client-side multiplexer over one transport.
///
/// Cheap to clone; all clones share the same in-flight state and transport.
#[derive(Clone)]
pub struct ClientPort {
    shared: Arc<PortShared>,
}

impl ClientPort {
    /// Construct a port over a fresh transport.
    ///
    /// The factory is called exactly once with the port's inbound surface
    /// and must return the connected transport. Construction never blocks;
    /// whether frames sent before the connection settles are queued or
    /// dropped is the transport's contract, not the port's.
    pub fn new<F>(backend: Arc<BackendInterface>, transport_factory: F, options: PortOptions) -> Self
    where
        F: FnOnce(InboundHandle) -> Arc<dyn FrameTransport>,
    {
        let shared = Arc::new(PortShared {
            backend,
            transport: OnceLock::new(),
            state: Mutex::new(PortState::default()),
            error_deserializer: options
                .error_deserializer
                .unwrap_or_else(default_error_deserializer),
            verbose_errors: options.verbose_errors,
        });
        let transport = transport_factory(InboundHandle {
            port: Arc::downgrade(&shared),
        });
        let _ = shared.transport.set(transport);
        debug!("Client port ready ({} endpoint(s))", shared.backend.len());
        Self { shared }
    }

    pub fn backend(&self) -> &Arc<BackendInterface> {
        &self.shared.backend
    }

    /// Number of currently open communications across all four tables.
    pub fn open_communication_count(&self) -> usize {
        self.shared.lock().open_count()
    }

    /// Number of communication warnings raised so far (including suppressed
    /// ones).
    pub fn communication_warning_count(&self) -> u32 {
        self.shared.lock().warnings_emitted
    }

    /// Issue an RPC call.
    ///
    /// Lookup and parameter validation fail synchronously; the returned
    /// future resolves with the server's reply. Dropping the future abandons
    /// the reply but leaves the call in flight until the server answers.
    #[track_caller]
    pub fn call_rpc(&self, name: &str, parameter: Value) -> Result<RpcReply> {
        self.call_rpc_with_site(name, parameter, CallSite::caller())
    }

    /// [`call_rpc`](Self::call_rpc) with explicit caller provenance.
    pub fn call_rpc_with_site(
        &self,
        name: &str,
        parameter: Value,
        site: CallSite,
    ) -> Result<RpcReply> {
        let endpoint =
            self.shared
                .backend
                .rpc_endpoint(name)
                .ok_or_else(|| PortError::NoSuchEndpoint {
                    name: name.to_string(),
                })?;
        endpoint
            .parameter
            .validate(&parameter)
            .map_err(|issue| PortError::InvalidParameter {
                endpoint: name.to_string(),
                message: issue.to_string(),
            })?;

        let (tx, rx) = oneshot::channel();
        let (call_id, opened) = {
            let mut state = self.shared.lock();
            let before = state.open_count();
            let call_id = state.next_call_id;
            state.next_call_id += 1;
            state.rpcs.insert(
                call_id,
                OngoingRpc {
                    endpoint,
                    reply: tx,
                    site,
                },
            );
            (call_id, edge(before, state.open_count()))
        };
        self.shared.notify_edge(opened);
        self.shared.send_frame(ClientToServerFrame::RpcCall {
            endpoint: name.to_string(),
            call_id,
            parameter,
        });
        Ok(RpcReply { rx })
    }

    /// Open a channel.
    ///
    /// Lookup and creation-parameter validation fail synchronously. The
    /// returned handle is live immediately; the channel ends when the server
    /// closes or errors it.
    #[track_caller]
    pub fn open_channel(&self, name: &str, creation_parameter: Value) -> Result<Channel> {
        self.open_channel_with_site(name, creation_parameter, CallSite::caller())
    }

    /// [`open_channel`](Self::open_channel) with explicit caller provenance.
    pub fn open_channel_with_site(
        &self,
        name: &str,
        creation_parameter: Value,
        site: CallSite,
    ) -> Result<Channel> {
        let endpoint = self.shared.backend.channel_endpoint(name).ok_or_else(|| {
            PortError::NoSuchEndpoint {
                name: name.to_string(),
            }
        })?;
        endpoint
            .creation_parameter
            .validate(&creation_parameter)
            .map_err(|issue| PortError::InvalidParameter {
                endpoint: name.to_string(),
                message: issue.to_string(),
            })?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (channel_id, opened) = {
            let mut state = self.shared.lock();
            let before = state.open_count();
            let channel_id = state.next_call_id;
            state.next_call_id += 1;
            state.channels.insert(
                channel_id,
                OpenChannel {
                    endpoint: endpoint.clone(),
                    events: events_tx,
                    pending_acks: HashMap::new(),
                    next_ack_id: 0,
                    site,
                },
            );
            (channel_id, edge(before, state.open_count()))
        };
        self.shared.notify_edge(opened);
        self.shared.send_frame(ClientToServerFrame::ChannelCreate {
            endpoint: name.to_string(),
            channel_id,
            creation_parameter,
        });
        Ok(Channel::new(
            Arc::downgrade(&self.shared),
            channel_id,
            endpoint,
            events_rx,
        ))
    }

    /// Create a lazy read-only signal.
    ///
    /// Lookup and creation-parameter validation fail synchronously. The
    /// subscription itself opens when the first observer attaches and closes
    /// when the last one detaches.
    #[track_caller]
    pub fn create_signal(
        &self,
        name: &str,
        creation_parameter: Value,
    ) -> Result<LazySignal<Value>> {
        self.create_signal_with_site(name, creation_parameter, CallSite::caller())
    }

    /// [`create_signal`](Self::create_signal) with explicit caller
    /// provenance.
    pub fn create_signal_with_site(
        &self,
        name: &str,
        creation_parameter: Value,
        site: CallSite,
    ) -> Result<LazySignal<Value>> {
        let endpoint = self.shared.backend.signal_endpoint(name).ok_or_else(|| {
            PortError::NoSuchEndpoint {
                name: name.to_string(),
            }
        })?;
        endpoint
            .creation_parameter
            .validate(&creation_parameter)
            .map_err(|issue| PortError::InvalidParameter {
                endpoint: name.to_string(),
                message: issue.to_string(),
            })?;

        let port = Arc::downgrade(&self.shared);
        Ok(LazySignal::with_default_equality(move |listener| {
            let Some(shared) = port.upgrade() else {
                return Box::new(|| {}) as Teardown;
            };
            shared.subscribe_signal(
                endpoint.clone(),
                listener,
                site.clone(),
                creation_parameter.clone(),
            )
        }))
    }

    /// Create an optimistic writable signal and its setter.
    ///
    /// Same subscription protocol as [`create_signal`](Self::create_signal);
    /// writes through the setter require a live subscription session.
    #[track_caller]
    pub fn create_writable_signal(
        &self,
        name: &str,
        creation_parameter: Value,
    ) -> Result<(OwlSignal, SignalSetter)> {
        self.create_writable_signal_with_site(name, creation_parameter, CallSite::caller())
    }

    /// [`create_writable_signal`](Self::create_writable_signal) with
    /// explicit caller provenance.
    pub fn create_writable_signal_with_site(
        &self,
        name: &str,
        creation_parameter: Value,
        site: CallSite,
    ) -> Result<(OwlSignal, SignalSetter)> {
        let endpoint = self
            .shared
            .backend
            .writable_signal_endpoint(name)
            .ok_or_else(|| PortError::NoSuchEndpoint {
                name: name.to_string(),
            })?;
        endpoint
            .creation_parameter
            .validate(&creation_parameter)
            .map_err(|issue| PortError::InvalidParameter {
                endpoint: name.to_string(),
                message: issue.to_string(),
            })?;

        let owl_shared = Arc::new(OwlShared::new());
        let port = Arc::downgrade(&self.shared);
        let upstream_owl = owl_shared.clone();
        let signal = LazySignal::with_default_equality(move |listener| {
            let Some(shared) = port.upgrade() else {
                return Box::new(|| {}) as Teardown;
            };
            shared.subscribe_writable_signal(
                endpoint.clone(),
                upstream_owl.clone(),
                listener,
                site.clone(),
                creation_parameter.clone(),
            )
        });
        let owl = OwlSignal::new(signal, owl_shared.clone());

        let reader_owl = owl.clone();
        let setter = SignalSetter::new(
            move || reader_owl.get(),
            move |patches, tags| owl_shared.write_patches(patches, tags),
        );
        Ok((owl, setter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;
    use serde_json::json;

    struct NullTransport;

    impl FrameTransport for NullTransport {
        fn send(&self, _frame: ClientToServerFrame) {}
    }

    fn port() -> ClientPort {
        let mut backend = BackendInterface::new();
        backend
            .add_rpc_endpoint("ping", schema::any(), schema::any())
            .unwrap();
        backend
            .add_channel_endpoint("stream", schema::any(), schema::any(), schema::any())
            .unwrap();
        ClientPort::new(
            Arc::new(backend),
            |_inbound| Arc::new(NullTransport),
            PortOptions::default(),
        )
    }

    #[test]
    fn test_rpcs_and_channels_share_an_id_space() {
        let port = port();
        let _reply = port.call_rpc("ping", json!(null)).unwrap();
        let channel = port.open_channel("stream", json!(null)).unwrap();
        let _reply = port.call_rpc("ping", json!(null)).unwrap();

        // call 0, channel 1, call 2
        assert_eq!(channel.channel_id(), 1);
        assert_eq!(port.open_communication_count(), 3);
    }

    #[test]
    fn test_unknown_endpoint_and_kind_mismatch() {
        let port = port();
        assert!(matches!(
            port.call_rpc("nope", json!(null)),
            Err(PortError::NoSuchEndpoint { .. })
        ));
        // A channel endpoint is not an RPC endpoint.
        assert!(matches!(
            port.call_rpc("stream", json!(null)),
            Err(PortError::NoSuchEndpoint { .. })
        ));
    }

    #[test]
    fn test_channel_events_stream_is_take_once() {
        let port = port();
        let channel = port.open_channel("stream", json!(null)).unwrap();
        assert!(channel.events().is_some());
        assert!(channel.events().is_none());
    }
}
