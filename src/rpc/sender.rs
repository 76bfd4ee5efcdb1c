//! Typed message sender
//!
//! Encodes a request payload, invokes the RPC client and decodes the
//! response, folding every failure mode into [`CallResult`].

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, warn};

use super::client::RpcClient;
use crate::messages::OcppRequest;
use crate::support::errors::RpcError;

/// Outcome of one outgoing call.
#[derive(Debug)]
pub enum CallResult<R> {
    /// The Central System answered with a CALLRESULT.
    Ok(R),
    /// The Central System answered with a CALLERROR.
    Nok { code: String, description: String },
    /// No answer before the call deadline.
    Timeout,
    /// The link was (or went) down.
    Disconnected,
    /// The request payload could not be encoded.
    InvalidPayload,
    /// The response payload could not be decoded.
    InvalidResponse,
}

impl<R> CallResult<R> {
    pub fn is_ok(&self) -> bool {
        matches!(self, CallResult::Ok(_))
    }
}

/// Sender shared by every manager.
pub struct MessageSender {
    rpc: Arc<RpcClient>,
}

impl MessageSender {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }

    pub fn is_connected(&self) -> bool {
        self.rpc.is_connected()
    }

    /// Send a typed request and decode its typed response.
    pub async fn send<R: OcppRequest>(&self, request: &R) -> CallResult<R::Response> {
        let payload = match serde_json::to_value(request) {
            Ok(payload) => payload,
            Err(e) => {
                error!(action = R::ACTION, "Could not encode payload: {e}");
                return CallResult::InvalidPayload;
            }
        };
        match self.call(R::ACTION, payload).await {
            CallResult::Ok(value) => match serde_json::from_value(value) {
                Ok(response) => CallResult::Ok(response),
                Err(e) => {
                    error!(action = R::ACTION, "Could not decode response: {e}");
                    CallResult::InvalidResponse
                }
            },
            CallResult::Nok { code, description } => CallResult::Nok { code, description },
            CallResult::Timeout => CallResult::Timeout,
            CallResult::Disconnected => CallResult::Disconnected,
            CallResult::InvalidPayload => CallResult::InvalidPayload,
            CallResult::InvalidResponse => CallResult::InvalidResponse,
        }
    }

    /// Send an already-encoded payload. Used by the request FIFO, whose
    /// entries are persisted as JSON.
    pub async fn call(&self, action: &str, payload: Value) -> CallResult<Value> {
        match self.rpc.call(action, payload).await {
            Ok(value) => CallResult::Ok(value),
            Err(RpcError::Timeout) => CallResult::Timeout,
            Err(RpcError::Disconnected) => CallResult::Disconnected,
            Err(RpcError::CallError { code, description }) => {
                warn!(action, code = code.as_str(), "Call rejected: {description}");
                CallResult::Nok { code, description }
            }
            Err(RpcError::Framing(e)) => {
                error!(action, "Framing error: {e}");
                CallResult::InvalidResponse
            }
        }
    }
}
