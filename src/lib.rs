//! Margay Port - Client-side typed message multiplexer for the Margay local
//! application server.
//!
//! A single frame transport (an inter-process tunnel or a websocket, already
//! connected and authenticated by a collaborator) carries four kinds of
//! logical communications interleaved over one byte stream: RPC calls,
//! long-lived channels with acknowledgements, read-only signals updated by
//! incremental patches, and writable signals mutated optimistically on the
//! client. The [`ClientPort`] multiplexes all of them: it assigns ids,
//! validates every payload against the [`BackendInterface`], routes inbound
//! frames to the right in-flight record, and turns protocol sanity failures
//! into capped communication warnings instead of errors.
//!
//! # Example
//!
//! ```rust,ignore
//! use margay_port::{schema, BackendInterface, ClientPort, PortOptions};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn run(transport: Arc<dyn margay_port::FrameTransport>) -> margay_port::Result<()> {
//! let mut backend = BackendInterface::new();
//! backend.add_rpc_endpoint(
//!     "add",
//!     schema::object([("a", schema::integer()), ("b", schema::integer())]),
//!     schema::integer(),
//! )?;
//!
//! let port = ClientPort::new(Arc::new(backend), |_inbound| transport, PortOptions::default());
//! let sum = port.call_rpc("add", json!({"a": 2, "b": 3}))?.await?;
//! # Ok(())
//! # }
//! ```

pub mod backend_interface;
pub mod call_site;
pub mod config;
pub mod error;
pub mod patch;
pub mod port;
pub mod schema;
pub mod signal;
pub mod transport;
pub mod wire;

// Re-export commonly used types
pub use backend_interface::{
    BackendInterface, ChannelEndpoint, EndpointKind, RpcEndpoint, SignalEndpoint,
};
pub use call_site::CallSite;
pub use config::PortConfig;
pub use error::{default_error_deserializer, ErrorDeserializer, PortError, Result};
pub use patch::{apply_patches, produce_patches, Patch, PatchError, PatchOp, PathSegment};
pub use port::{
    AckReceipt, Channel, ChannelEvent, ClientPort, InboundHandle, PortOptions, RpcReply,
};
pub use schema::{Schema, SchemaIssue, SchemaRef};
pub use signal::{
    LazySignal, OwlSignal, SignalListener, SignalSetter, SignalSubscription, Teardown,
};
pub use transport::FrameTransport;
pub use wire::{ClientToServerFrame, SerializedError, ServerToClientFrame, WriteTag};
