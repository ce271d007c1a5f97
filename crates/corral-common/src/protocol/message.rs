//! Corral Message Types
//!
//! This module defines the single message union carried by every frame, for
//! both node connections and the public API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Serial number correlating a method call with its reply.
///
/// Serials are allocated per connection by the calling side and have no
/// meaning beyond that connection.
pub type Serial = u64;

/// One protocol message.
///
/// The `type` tag on the wire is the kebab-case variant name, e.g.
/// `"method-call"`. Bodies and arguments are free-form JSON values; the
/// method signatures themselves are part of each interface's contract (see
/// [`super::names`]).
///
/// # Example
///
/// ```
/// use corral_common::protocol::Message;
/// use serde_json::json;
///
/// let call = Message::method_call(7, "/org/corral/orchestrator",
///     "org.corral.Orchestrator.Peer", "Register", json!({"name": "a"}));
/// let encoded = serde_json::to_string(&call).unwrap();
/// assert!(encoded.contains("\"method-call\""));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    /// A method invocation addressed to an object published by the peer.
    MethodCall {
        serial: Serial,
        path: String,
        interface: String,
        member: String,
        #[serde(default)]
        args: Value,
    },
    /// The successful reply to a method call.
    MethodReturn {
        reply_serial: Serial,
        #[serde(default)]
        body: Value,
    },
    /// The failure reply to a method call.
    Error {
        reply_serial: Serial,
        name: String,
        message: String,
    },
    /// An unsolicited notification.
    Signal {
        path: String,
        interface: String,
        member: String,
        #[serde(default)]
        args: Value,
    },
}

impl Message {
    pub fn method_call(
        serial: Serial,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        args: Value,
    ) -> Self {
        Message::MethodCall {
            serial,
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
            args,
        }
    }

    pub fn method_return(reply_serial: Serial, body: Value) -> Self {
        Message::MethodReturn { reply_serial, body }
    }

    pub fn error(reply_serial: Serial, name: impl Into<String>, message: impl Into<String>) -> Self {
        Message::Error {
            reply_serial,
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn signal(
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        args: Value,
    ) -> Self {
        Message::Signal {
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
            args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_call_round_trip() {
        let call = Message::method_call(42, "/a", "i.face", "Member", json!({"x": 1}));
        let encoded = serde_json::to_vec(&call).unwrap();
        let decoded: Message = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(call, decoded);
    }

    #[test]
    fn test_wire_tag_is_kebab_case() {
        let reply = Message::method_return(7, json!("ok"));
        let encoded = serde_json::to_string(&reply).unwrap();
        assert!(encoded.contains("\"type\":\"method-return\""));
    }

    #[test]
    fn test_missing_args_defaults_to_null() {
        let raw = r#"{"type":"method-call","serial":1,"path":"/p","interface":"i","member":"Hello"}"#;
        let decoded: Message = serde_json::from_str(raw).unwrap();
        match decoded {
            Message::MethodCall { serial, args, .. } => {
                assert_eq!(serial, 1);
                assert_eq!(args, Value::Null);
            }
            other => panic!("expected method call, got {:?}", other),
        }
    }

    #[test]
    fn test_error_reply_round_trip() {
        let error = Message::error(9, "org.corral.Error.AddressInUse", "taken");
        let encoded = serde_json::to_vec(&error).unwrap();
        let decoded: Message = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(error, decoded);
    }
}
