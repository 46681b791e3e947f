//! JSON messages exchanged over the WebSocket.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use weblogview_types::{LineBatch, Phase};

/// A client message that could not be turned into a command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid message format")]
    Malformed(String),

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("{0} is required")]
    MissingField(&'static str),
}

/// Commands a client can send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Tail a local file
    Open { path: String, tail: Option<i64> },

    /// Tail a pod's log, optionally a specific container
    OpenK8s {
        namespace: String,
        pod_name: String,
        container_name: Option<String>,
        tail: Option<i64>,
    },

    /// Stop the active source, keeping the connection
    Close,
}

/// Wire layout shared by every client message
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClientMessage {
    #[serde(rename = "type")]
    kind: String,
    path: Option<String>,
    tail: Option<i64>,
    namespace: Option<String>,
    pod_name: Option<String>,
    container_name: Option<String>,
}

impl ClientMessage {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawClientMessage =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        match raw.kind.as_str() {
            "open" => Ok(Self::Open {
                path: required(raw.path, "Path")?,
                tail: raw.tail,
            }),
            "open-k8s" => Ok(Self::OpenK8s {
                namespace: required(raw.namespace, "Namespace")?,
                pod_name: required(raw.pod_name, "Pod name")?,
                container_name: raw.container_name.filter(|c| !c.is_empty()),
                tail: raw.tail,
            }),
            "close" => Ok(Self::Close),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ProtocolError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(ProtocolError::MissingField(field))
}

/// Messages sent to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// The snapshot; exactly one per activation
    Initial { lines: Vec<String> },
    /// Live lines
    Lines { lines: Vec<String> },
    Error { error: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<LineBatch> for ServerMessage {
    fn from(batch: LineBatch) -> Self {
        match batch.phase {
            Phase::Snapshot => Self::Initial { lines: batch.lines },
            Phase::Live => Self::Lines { lines: batch.lines },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_open() {
        let msg =
            ClientMessage::decode(r#"{"type":"open","path":"/var/log/syslog","tail":50}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Open {
                path: "/var/log/syslog".into(),
                tail: Some(50)
            }
        );

        let msg = ClientMessage::decode(r#"{"type":"open","path":"/a.log"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Open { tail: None, .. }));
    }

    #[test]
    fn test_decode_open_k8s() {
        let msg = ClientMessage::decode(concat!(
            r#"{"type":"open-k8s","namespace":"prod","podName":"api-0","#,
            r#""containerName":"","tail":-1}"#,
        ))
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::OpenK8s {
                namespace: "prod".into(),
                pod_name: "api-0".into(),
                container_name: None,
                tail: Some(-1),
            }
        );
    }

    #[test]
    fn test_decode_close_ignores_extra_fields() {
        let msg = ClientMessage::decode(r#"{"type":"close","path":"/ignored"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Close);
    }

    #[test]
    fn test_decode_errors() {
        let err = ClientMessage::decode(r#"{"type":"subscribe"}"#).unwrap_err();
        assert_eq!(err.to_string(), "Unknown message type: subscribe");

        let err = ClientMessage::decode("not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
        assert_eq!(err.to_string(), "Invalid message format");

        let err = ClientMessage::decode(r#"{"type":"open"}"#).unwrap_err();
        assert_eq!(err.to_string(), "Path is required");

        let err = ClientMessage::decode(r#"{"type":"open-k8s","podName":"api-0"}"#).unwrap_err();
        assert_eq!(err.to_string(), "Namespace is required");

        let err = ClientMessage::decode(r#"{"type":"open-k8s","namespace":"prod","podName":""}"#)
            .unwrap_err();
        assert_eq!(err.to_string(), "Pod name is required");
    }

    #[test]
    fn test_server_message_json() {
        let initial = ServerMessage::from(LineBatch::snapshot(vec!["a".into()]));
        assert_eq!(initial.to_json().unwrap(), r#"{"type":"initial","lines":["a"]}"#);

        let live = ServerMessage::from(LineBatch::live(vec!["b".into(), "c".into()]));
        assert_eq!(live.to_json().unwrap(), r#"{"type":"lines","lines":["b","c"]}"#);

        let error = ServerMessage::error("file /x not found");
        assert_eq!(error.to_json().unwrap(), r#"{"type":"error","error":"file /x not found"}"#);
    }

    #[test]
    fn test_empty_snapshot_keeps_lines_array() {
        let initial = ServerMessage::from(LineBatch::snapshot(Vec::new()));
        assert_eq!(initial.to_json().unwrap(), r#"{"type":"initial","lines":[]}"#);
    }
}
