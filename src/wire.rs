//! Wire frame types.
//!
//! Defines the tagged frame sums exchanged with the application server. One
//! frame is one message unit on the transport; the `type` member carries the
//! tag and all member names are camelCase on the wire. Payload members
//! (`parameter`, `message`, `result`, ...) are opaque JSON values that the
//! port validates against the backend interface.

use crate::patch::Patch;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A small label attached to a write for origin attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WriteTag {
    Number(i64),
    Text(String),
}

impl From<&str> for WriteTag {
    fn from(text: &str) -> Self {
        WriteTag::Text(text.to_string())
    }
}

impl From<i64> for WriteTag {
    fn from(number: i64) -> Self {
        WriteTag::Number(number)
    }
}

/// Server error in wire form. Opaque to the port; handed to the configured
/// error deserializer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedError {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_title: Option<String>,
}

impl SerializedError {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Frames the port sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientToServerFrame {
    #[serde(rename_all = "camelCase")]
    RpcCall {
        endpoint: String,
        call_id: u64,
        parameter: Value,
    },
    #[serde(rename_all = "camelCase")]
    ChannelCreate {
        endpoint: String,
        channel_id: u64,
        creation_parameter: Value,
    },
    #[serde(rename_all = "camelCase")]
    ChannelSend {
        channel_id: u64,
        message: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack_id: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    SignalSubscribe {
        endpoint: String,
        subscribe_id: u64,
        creation_parameter: Value,
    },
    #[serde(rename_all = "camelCase")]
    SignalUnsubscribe { subscribe_id: u64 },
    #[serde(rename_all = "camelCase")]
    WritableSignalSubscribe {
        endpoint: String,
        subscribe_id: u64,
        creation_parameter: Value,
    },
    #[serde(rename_all = "camelCase")]
    WritableSignalUnsubscribe { subscribe_id: u64 },
    #[serde(rename_all = "camelCase")]
    WritableSignalUpdate {
        subscribe_id: u64,
        patches: Vec<Patch>,
        tags: Vec<WriteTag>,
    },
    CommunicationWarning { warning: String },
    KeepAlive,
}

/// Frames the server sends to the port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerToClientFrame {
    #[serde(rename_all = "camelCase")]
    RpcResult { call_id: u64, result: Value },
    #[serde(rename_all = "camelCase")]
    RpcError {
        call_id: u64,
        error: SerializedError,
    },
    #[serde(rename_all = "camelCase")]
    ChannelSend { channel_id: u64, message: Value },
    #[serde(rename_all = "camelCase")]
    ChannelAck { channel_id: u64, ack_id: u64 },
    #[serde(rename_all = "camelCase")]
    ChannelClose { channel_id: u64 },
    #[serde(rename_all = "camelCase")]
    ChannelError {
        channel_id: u64,
        error: SerializedError,
    },
    #[serde(rename_all = "camelCase")]
    SignalUpdate {
        subscribe_id: u64,
        patches: Vec<Patch>,
        tags: Vec<WriteTag>,
    },
    #[serde(rename_all = "camelCase")]
    SignalError {
        subscribe_id: u64,
        error: SerializedError,
    },
    #[serde(rename_all = "camelCase")]
    WritableSignalUpdate {
        subscribe_id: u64,
        patches: Vec<Patch>,
        tags: Vec<WriteTag>,
    },
    #[serde(rename_all = "camelCase")]
    WritableSignalError {
        subscribe_id: u64,
        error: SerializedError,
    },
    CommunicationWarning { warning: String },
    KeepAliveAck,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::Patch;
    use serde_json::json;

    #[test]
    fn test_rpc_call_wire_shape() {
        let frame = ClientToServerFrame::RpcCall {
            endpoint: "add".to_string(),
            call_id: 0,
            parameter: json!({"a": 2, "b": 3}),
        };
        let encoded = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            encoded,
            json!({
                "type": "rpcCall",
                "endpoint": "add",
                "callId": 0,
                "parameter": {"a": 2, "b": 3}
            })
        );
    }

    #[test]
    fn test_channel_send_omits_absent_ack_id() {
        let frame = ClientToServerFrame::ChannelSend {
            channel_id: 4,
            message: json!("hi"),
            ack_id: None,
        };
        let encoded = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            encoded,
            json!({"type": "channelSend", "channelId": 4, "message": "hi"})
        );

        let frame = ClientToServerFrame::ChannelSend {
            channel_id: 4,
            message: json!("hi"),
            ack_id: Some(9),
        };
        let encoded = serde_json::to_value(&frame).unwrap();
        assert_eq!(encoded["ackId"], json!(9));
    }

    #[test]
    fn test_keep_alive_is_tag_only() {
        let encoded = serde_json::to_value(ClientToServerFrame::KeepAlive).unwrap();
        assert_eq!(encoded, json!({"type": "keepAlive"}));
    }

    #[test]
    fn test_signal_update_decodes() {
        let frame: ServerToClientFrame = serde_json::from_value(json!({
            "type": "signalUpdate",
            "subscribeId": 0,
            "patches": [{"op": "replace", "path": [], "value": {"n": 0}}],
            "tags": ["boot", 3]
        }))
        .unwrap();
        assert_eq!(
            frame,
            ServerToClientFrame::SignalUpdate {
                subscribe_id: 0,
                patches: vec![Patch::replace_root(json!({"n": 0}))],
                tags: vec![WriteTag::from("boot"), WriteTag::from(3)],
            }
        );
    }

    #[test]
    fn test_serialized_error_round_trip() {
        let error: SerializedError = serde_json::from_value(json!({
            "title": "model not loaded",
            "suggestion": "load it first",
            "rootTitle": "LoadError",
            "stack": "srv.ts:10"
        }))
        .unwrap();
        assert_eq!(error.title, "model not loaded");
        assert_eq!(error.root_title.as_deref(), Some("LoadError"));
        assert_eq!(error.cause, None);

        let encoded = serde_json::to_value(&error).unwrap();
        assert_eq!(encoded["rootTitle"], json!("LoadError"));
        assert!(encoded.get("cause").is_none());
    }

    #[test]
    fn test_write_tag_forms() {
        let tags: Vec<WriteTag> = serde_json::from_value(json!(["ui", 17])).unwrap();
        assert_eq!(tags, vec![WriteTag::Text("ui".into()), WriteTag::Number(17)]);
        assert_eq!(serde_json::to_value(&tags).unwrap(), json!(["ui", 17]));
    }
}
