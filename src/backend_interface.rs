//! The backend interface: a build-time catalog of endpoints.
//!
//! An endpoint is a named, schema-described remote operation. Applications
//! assemble the catalog once, before constructing a port; descriptors are
//! immutable afterwards and shared into in-flight records.

use crate::error::{PortError, Result};
use crate::schema::SchemaRef;
use std::collections::HashMap;
use std::sync::Arc;

/// Endpoint kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Rpc,
    Channel,
    Signal,
    WritableSignal,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Rpc => "rpc",
            EndpointKind::Channel => "channel",
            EndpointKind::Signal => "signal",
            EndpointKind::WritableSignal => "writableSignal",
        }
    }
}

/// One request, one reply.
pub struct RpcEndpoint {
    pub name: String,
    pub parameter: SchemaRef,
    pub returns: SchemaRef,
}

/// Long-lived bidirectional message stream.
pub struct ChannelEndpoint {
    pub name: String,
    pub creation_parameter: SchemaRef,
    pub to_server_packet: SchemaRef,
    pub to_client_packet: SchemaRef,
}

/// Server-pushed observable value. Writable signals share this shape; the
/// kind in the registry tells them apart.
pub struct SignalEndpoint {
    pub name: String,
    pub creation_parameter: SchemaRef,
    pub signal_data: SchemaRef,
}

enum Endpoint {
    Rpc(Arc<RpcEndpoint>),
    Channel(Arc<ChannelEndpoint>),
    Signal(Arc<SignalEndpoint>),
    WritableSignal(Arc<SignalEndpoint>),
}

impl Endpoint {
    fn kind(&self) -> EndpointKind {
        match self {
            Endpoint::Rpc(_) => EndpointKind::Rpc,
            Endpoint::Channel(_) => EndpointKind::Channel,
            Endpoint::Signal(_) => EndpointKind::Signal,
            Endpoint::WritableSignal(_) => EndpointKind::WritableSignal,
        }
    }
}

/// The endpoint catalog. Names are unique across all kinds.
#[derive(Default)]
pub struct BackendInterface {
    endpoints: HashMap<String, Endpoint>,
}

impl BackendInterface {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, name: String, endpoint: Endpoint) -> Result<()> {
        if self.endpoints.contains_key(&name) {
            return Err(PortError::EndpointAlreadyExists { name });
        }
        self.endpoints.insert(name, endpoint);
        Ok(())
    }

    /// Register an RPC endpoint. Fails if the name is taken by any kind.
    pub fn add_rpc_endpoint(
        &mut self,
        name: impl Into<String>,
        parameter: SchemaRef,
        returns: SchemaRef,
    ) -> Result<()> {
        let name = name.into();
        let endpoint = Arc::new(RpcEndpoint {
            name: name.clone(),
            parameter,
            returns,
        });
        self.insert(name, Endpoint::Rpc(endpoint))
    }

    /// Register a channel endpoint. Fails if the name is taken by any kind.
    pub fn add_channel_endpoint(
        &mut self,
        name: impl Into<String>,
        creation_parameter: SchemaRef,
        to_server_packet: SchemaRef,
        to_client_packet: SchemaRef,
    ) -> Result<()> {
        let name = name.into();
        let endpoint = Arc::new(ChannelEndpoint {
            name: name.clone(),
            creation_parameter,
            to_server_packet,
            to_client_packet,
        });
        self.insert(name, Endpoint::Channel(endpoint))
    }

    /// Register a read-only signal endpoint. Fails if the name is taken by
    /// any kind.
    pub fn add_signal_endpoint(
        &mut self,
        name: impl Into<String>,
        creation_parameter: SchemaRef,
        signal_data: SchemaRef,
    ) -> Result<()> {
        let name = name.into();
        let endpoint = Arc::new(SignalEndpoint {
            name: name.clone(),
            creation_parameter,
            signal_data,
        });
        self.insert(name, Endpoint::Signal(endpoint))
    }

    /// Register a writable signal endpoint. Fails if the name is taken by
    /// any kind.
    pub fn add_writable_signal_endpoint(
        &mut self,
        name: impl Into<String>,
        creation_parameter: SchemaRef,
        signal_data: SchemaRef,
    ) -> Result<()> {
        let name = name.into();
        let endpoint = Arc::new(SignalEndpoint {
            name: name.clone(),
            creation_parameter,
            signal_data,
        });
        self.insert(name, Endpoint::WritableSignal(endpoint))
    }

    pub fn rpc_endpoint(&self, name: &str) -> Option<Arc<RpcEndpoint>> {
        match self.endpoints.get(name) {
            Some(Endpoint::Rpc(endpoint)) => Some(endpoint.clone()),
            _ => None,
        }
    }

    pub fn channel_endpoint(&self, name: &str) -> Option<Arc<ChannelEndpoint>> {
        match self.endpoints.get(name) {
            Some(Endpoint::Channel(endpoint)) => Some(endpoint.clone()),
            _ => None,
        }
    }

    pub fn signal_endpoint(&self, name: &str) -> Option<Arc<SignalEndpoint>> {
        match self.endpoints.get(name) {
            Some(Endpoint::Signal(endpoint)) => Some(endpoint.clone()),
            _ => None,
        }
    }

    pub fn writable_signal_endpoint(&self, name: &str) -> Option<Arc<SignalEndpoint>> {
        match self.endpoints.get(name) {
            Some(Endpoint::WritableSignal(endpoint)) => Some(endpoint.clone()),
            _ => None,
        }
    }

    /// Kind of the endpoint registered under `name`, if any.
    pub fn kind_of(&self, name: &str) -> Option<EndpointKind> {
        self.endpoints.get(name).map(Endpoint::kind)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
