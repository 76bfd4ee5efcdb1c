//! OCPP-J message framing
//!
//! JSON over WebSocket transport envelope, identical for every message of
//! the protocol:
//!
//! - **Call**       `[2, "<uniqueId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<uniqueId>", {<payload>}]`
//! - **CallError**  `[4, "<uniqueId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`

use serde_json::{json, Value};
use thiserror::Error;

const MSG_TYPE_CALL: u64 = 2;
const MSG_TYPE_CALL_RESULT: u64 = 3;
const MSG_TYPE_CALL_ERROR: u64 = 4;

/// Standard OCPP-J error codes carried by CALLERROR frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    OccurenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::InternalError => "InternalError",
            Self::ProtocolError => "ProtocolError",
            Self::SecurityError => "SecurityError",
            Self::FormationViolation => "FormationViolation",
            Self::PropertyConstraintViolation => "PropertyConstraintViolation",
            Self::OccurenceConstraintViolation => "OccurenceConstraintViolation",
            Self::TypeConstraintViolation => "TypeConstraintViolation",
            Self::GenericError => "GenericError",
        }
    }
}

/// A parsed OCPP-J frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    CallResult {
        unique_id: String,
        payload: Value,
    },
    CallError {
        unique_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

/// Errors raised while decoding an OCPP-J frame.
#[derive(Debug, Error)]
pub enum OcppFrameError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Frame is not a JSON array")]
    NotAnArray,
    #[error("Message type is missing or not a number")]
    InvalidMessageType,
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u64),
    #[error("Frame of type {message_type} needs {expected} fields, got {got}")]
    MissingFields {
        message_type: u64,
        expected: usize,
        got: usize,
    },
    #[error("{0} must be a string")]
    NotAString(&'static str),
}

impl OcppFrame {
    /// Build a CALL frame.
    pub fn call(unique_id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self::Call {
            unique_id: unique_id.into(),
            action: action.into(),
            payload,
        }
    }

    /// Build the CALLRESULT frame answering `unique_id`.
    pub fn call_result(unique_id: impl Into<String>, payload: Value) -> Self {
        Self::CallResult {
            unique_id: unique_id.into(),
            payload,
        }
    }

    /// Build the CALLERROR frame answering `unique_id`.
    pub fn call_error(
        unique_id: impl Into<String>,
        error_code: &str,
        error_description: impl Into<String>,
    ) -> Self {
        Self::CallError {
            unique_id: unique_id.into(),
            error_code: error_code.to_string(),
            error_description: error_description.into(),
            error_details: json!({}),
        }
    }

    /// Decode a raw text frame.
    pub fn parse(text: &str) -> Result<Self, OcppFrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| OcppFrameError::InvalidJson(e.to_string()))?;
        let arr = value.as_array().ok_or(OcppFrameError::NotAnArray)?;

        let msg_type = arr
            .first()
            .and_then(Value::as_u64)
            .ok_or(OcppFrameError::InvalidMessageType)?;

        let expected = match msg_type {
            MSG_TYPE_CALL => 4,
            MSG_TYPE_CALL_RESULT => 3,
            MSG_TYPE_CALL_ERROR => 5,
            other => return Err(OcppFrameError::UnknownMessageType(other)),
        };
        if arr.len() < expected {
            return Err(OcppFrameError::MissingFields {
                message_type: msg_type,
                expected,
                got: arr.len(),
            });
        }

        let field_str = |index: usize, name: &'static str| -> Result<String, OcppFrameError> {
            arr[index]
                .as_str()
                .map(str::to_string)
                .ok_or(OcppFrameError::NotAString(name))
        };

        let unique_id = field_str(1, "uniqueId")?;
        match msg_type {
            MSG_TYPE_CALL => Ok(Self::Call {
                unique_id,
                action: field_str(2, "action")?,
                payload: arr[3].clone(),
            }),
            MSG_TYPE_CALL_RESULT => Ok(Self::CallResult {
                unique_id,
                payload: arr[2].clone(),
            }),
            _ => Ok(Self::CallError {
                unique_id,
                error_code: field_str(2, "errorCode")?,
                error_description: field_str(3, "errorDescription")?,
                error_details: arr[4].clone(),
            }),
        }
    }

    /// Encode to the wire text representation.
    pub fn serialize(&self) -> String {
        let value = match self {
            Self::Call {
                unique_id,
                action,
                payload,
            } => json!([MSG_TYPE_CALL, unique_id, action, payload]),
            Self::CallResult { unique_id, payload } => {
                json!([MSG_TYPE_CALL_RESULT, unique_id, payload])
            }
            Self::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => json!([
                MSG_TYPE_CALL_ERROR,
                unique_id,
                error_code,
                error_description,
                error_details
            ]),
        };
        value.to_string()
    }

    /// The unique message id of this frame.
    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_call() {
        let text = r#"[2,"19223201","BootNotification",{"chargePointVendor":"VendorX","chargePointModel":"SingleSocketCharger"}]"#;
        match OcppFrame::parse(text).unwrap() {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => {
                assert_eq!(unique_id, "19223201");
                assert_eq!(action, "BootNotification");
                assert_eq!(payload["chargePointModel"], "SingleSocketCharger");
            }
            other => panic!("expected Call, got {other:?}"),
        }
    }

    #[test]
    fn parse_call_result() {
        let text = r#"[3,"19223201",{"status":"Accepted","interval":300,"currentTime":"2024-01-01T00:00:00Z"}]"#;
        match OcppFrame::parse(text).unwrap() {
            OcppFrame::CallResult { unique_id, payload } => {
                assert_eq!(unique_id, "19223201");
                assert_eq!(payload["interval"], 300);
            }
            other => panic!("expected CallResult, got {other:?}"),
        }
    }

    #[test]
    fn parse_call_error() {
        let text = r#"[4,"162376037","NotSupported","","{}"]"#;
        match OcppFrame::parse(text).unwrap() {
            OcppFrame::CallError {
                unique_id,
                error_code,
                ..
            } => {
                assert_eq!(unique_id, "162376037");
                assert_eq!(error_code, "NotSupported");
            }
            other => panic!("expected CallError, got {other:?}"),
        }
    }

    #[test]
    fn truncated_frame_is_rejected() {
        assert!(matches!(
            OcppFrame::parse(r#"[4,"id"]"#),
            Err(OcppFrameError::MissingFields { .. })
        ));
        assert!(matches!(
            OcppFrame::parse(r#"[7,"id",{}]"#),
            Err(OcppFrameError::UnknownMessageType(7))
        ));
        assert!(matches!(
            OcppFrame::parse(r#"{"not":"an array"}"#),
            Err(OcppFrameError::NotAnArray)
        ));
    }

    #[test]
    fn roundtrip() {
        let frames = [
            OcppFrame::call("id-1", "Heartbeat", json!({})),
            OcppFrame::call_result("id-2", json!({"currentTime": "2024-01-01T00:00:00Z"})),
            OcppFrame::call_error("id-3", ErrorCode::NotImplemented.as_str(), "no handler"),
        ];
        for frame in frames {
            let decoded = OcppFrame::parse(&frame.serialize()).unwrap();
            assert_eq!(decoded, frame);
        }
    }
}
