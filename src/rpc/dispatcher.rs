//! Routing of incoming CALL frames
//!
//! The dispatcher maps an OCPP action name to a registered handler. The
//! handler produces either a response payload (sent back as CALLRESULT) or
//! an [`OcppError`] (sent back as CALLERROR). Unknown actions yield
//! `NotImplemented`.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::support::ocpp_frame::ErrorCode;

/// Error answered to a CALL frame.
#[derive(Debug, Clone)]
pub struct OcppError {
    pub code: ErrorCode,
    pub description: String,
}

impl OcppError {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn not_implemented(action: &str) -> Self {
        Self::new(ErrorCode::NotImplemented, format!("Unknown action: {action}"))
    }

    pub fn internal(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, description)
    }

    pub fn formation(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::FormationViolation, description)
    }

    pub fn property_constraint(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::PropertyConstraintViolation, description)
    }
}

pub type HandlerResult = Result<Value, OcppError>;

/// Handler for one or more CALL actions. A manager registers itself once
/// per action it serves; `action` disambiguates.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, action: &str, payload: Value) -> HandlerResult;
}

/// Decode a request payload, mapping malformed input to FormationViolation.
pub fn from_payload<T: DeserializeOwned>(payload: Value) -> Result<T, OcppError> {
    serde_json::from_value(payload).map_err(|e| OcppError::formation(e.to_string()))
}

/// Encode a response payload.
pub fn to_payload<T: Serialize>(response: &T) -> HandlerResult {
    serde_json::to_value(response).map_err(|e| OcppError::internal(e.to_string()))
}

/// Action name -> handler registry.
#[derive(Default)]
pub struct MessageDispatcher {
    handlers: DashMap<String, Arc<dyn MessageHandler>>,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `action`. Duplicate registration fails unless
    /// `allow_replace` is set, in which case last writer wins.
    pub fn register(
        &self,
        action: &str,
        handler: Arc<dyn MessageHandler>,
        allow_replace: bool,
    ) -> bool {
        if !allow_replace && self.handlers.contains_key(action) {
            warn!(action, "Handler already registered");
            return false;
        }
        self.handlers.insert(action.to_string(), handler);
        true
    }

    /// Route an incoming CALL to its handler.
    pub async fn dispatch(&self, action: &str, payload: Value) -> HandlerResult {
        let handler = match self.handlers.get(action) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                warn!(action, "No handler registered");
                return Err(OcppError::not_implemented(action));
            }
        };
        handler.handle(action, payload).await
    }

    /// Drop every registered handler. Called on stack shutdown so the
    /// handler references do not outlive the managers.
    pub fn clear(&self) {
        self.handlers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl MessageHandler for EchoHandler {
        async fn handle(&self, _action: &str, payload: Value) -> HandlerResult {
            Ok(payload)
        }
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let dispatcher = MessageDispatcher::new();
        assert!(dispatcher.register("Heartbeat", Arc::new(EchoHandler), false));

        let result = dispatcher.dispatch("Heartbeat", json!({"a": 1})).await;
        assert_eq!(result.unwrap(), json!({"a": 1}));
    }

    #[tokio::test]
    async fn unknown_action_is_not_implemented() {
        let dispatcher = MessageDispatcher::new();
        let err = dispatcher.dispatch("Reset", json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotImplemented);
    }

    #[tokio::test]
    async fn duplicate_registration_requires_allow_replace() {
        let dispatcher = MessageDispatcher::new();
        assert!(dispatcher.register("Reset", Arc::new(EchoHandler), false));
        assert!(!dispatcher.register("Reset", Arc::new(EchoHandler), false));
        assert!(dispatcher.register("Reset", Arc::new(EchoHandler), true));
    }
}
