//! JSON-RPC 2.0 message types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rpc::error::ClientError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Outgoing request with positional parameters.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Vec<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Any inbound frame, before classification.
#[derive(Debug, Clone, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to one of our requests.
    Response {
        id: u64,
        outcome: Result<Value, JsonRpcError>,
    },
    /// Server-originated notification or request. The client does not serve
    /// these; they are logged and dropped.
    Notification { method: String, params: Value },
}

impl Inbound {
    /// Parse a text frame.
    ///
    /// A response whose `result` is missing or `null` yields `Value::Null`.
    /// Responses without a numeric id are rejected, since nothing can be
    /// correlated with them.
    pub fn parse(text: &str) -> Result<Self, ClientError> {
        let raw: RawMessage = serde_json::from_str(text)
            .map_err(|e| ClientError::Protocol(format!("Invalid JSON-RPC message: {}", e)))?;

        if let Some(method) = raw.method {
            return Ok(Inbound::Notification {
                method,
                params: raw.params.unwrap_or(Value::Null),
            });
        }

        let id = raw
            .id
            .as_ref()
            .and_then(Value::as_u64)
            .ok_or_else(|| match (&raw.error, &raw.id) {
                (Some(err), _) => ClientError::Protocol(format!(
                    "Uncorrelated error {}: {}",
                    err.code, err.message
                )),
                (None, Some(id)) => ClientError::Protocol(format!("Unsupported response id {}", id)),
                (None, None) => ClientError::Protocol("Message has neither id nor method".into()),
            })?;

        let outcome = match raw.error {
            Some(err) => Err(err),
            None => Ok(raw.result.unwrap_or(Value::Null)),
        };

        Ok(Inbound::Response { id, outcome })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let req = JsonRpcRequest::new(7, "Cluster.Version", vec![]);
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "id": 7, "method": "Cluster.Version", "params": []})
        );
    }

    #[test]
    fn test_request_keeps_positional_params() {
        let req = JsonRpcRequest::new(1, "Cluster.SectorInfo", vec![json!(42), json!("f01000")]);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""params":[42,"f01000"]"#));
    }

    #[test]
    fn test_parse_result_response() {
        let msg = Inbound::parse(r#"{"jsonrpc":"2.0","id":3,"result":"2.1.0"}"#).unwrap();
        assert_eq!(
            msg,
            Inbound::Response {
                id: 3,
                outcome: Ok(json!("2.1.0"))
            }
        );
    }

    #[test]
    fn test_parse_null_result_is_value_null() {
        let msg = Inbound::parse(r#"{"jsonrpc":"2.0","id":4,"result":null}"#).unwrap();
        assert_eq!(
            msg,
            Inbound::Response {
                id: 4,
                outcome: Ok(Value::Null)
            }
        );
    }

    #[test]
    fn test_parse_error_response() {
        let msg = Inbound::parse(
            r#"{"jsonrpc":"2.0","id":5,"error":{"code":-32601,"message":"Method not found"}}"#,
        )
        .unwrap();
        match msg {
            Inbound::Response {
                id,
                outcome: Err(err),
            } => {
                assert_eq!(id, 5);
                assert_eq!(err.code, -32601);
                assert_eq!(err.message, "Method not found");
                assert_eq!(err.data, None);
            }
            other => panic!("Expected error response, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_notification() {
        let msg =
            Inbound::parse(r#"{"jsonrpc":"2.0","method":"xrpc.ch.val","params":[1,{"a":1}]}"#)
                .unwrap();
        assert_eq!(
            msg,
            Inbound::Notification {
                method: "xrpc.ch.val".into(),
                params: json!([1, {"a": 1}])
            }
        );
    }

    #[test]
    fn test_parse_rejects_garbage_and_uncorrelated() {
        assert!(Inbound::parse("not json").is_err());
        assert!(Inbound::parse(r#"{"jsonrpc":"2.0","result":1}"#).is_err());
        assert!(Inbound::parse(r#"{"jsonrpc":"2.0","id":"abc","result":1}"#).is_err());

        let err = Inbound::parse(
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Parse error"));
    }
}
