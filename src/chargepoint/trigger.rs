//! Trigger message manager
//!
//! Keeps two handler maps (standard TriggerMessage, security-extension
//! ExtendedTriggerMessage). The registered handler must enqueue the
//! corresponding asynchronous message, never send it inline: handlers run
//! on the network task.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::warn;

use crate::chargepoint::connectors::ConnectorRegistry;
use crate::messages::{
    ExtendedTriggerMessageRequest, ExtendedTriggerMessageResponse, TriggerMessageRequest,
    TriggerMessageResponse,
};
use crate::rpc::{from_payload, to_payload, HandlerResult, MessageHandler, OcppError};
use crate::types::{MessageTrigger, MessageTriggerExtended, TriggerMessageStatus};

/// Which trigger variant fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Standard(MessageTrigger),
    Extended(MessageTriggerExtended),
}

/// Implemented by the managers able to (re)send a triggered message.
#[async_trait]
pub trait TriggerHandler: Send + Sync {
    /// Queue the requested message. Returns whether the trigger was
    /// accepted.
    async fn on_trigger(self: Arc<Self>, source: TriggerSource, connector_id: Option<u32>) -> bool;
}

pub struct TriggerMessageManager {
    connectors: Arc<ConnectorRegistry>,
    standard: DashMap<MessageTrigger, Arc<dyn TriggerHandler>>,
    extended: DashMap<MessageTriggerExtended, Arc<dyn TriggerHandler>>,
}

impl TriggerMessageManager {
    pub fn new(connectors: Arc<ConnectorRegistry>) -> Self {
        Self {
            connectors,
            standard: DashMap::new(),
            extended: DashMap::new(),
        }
    }

    pub fn register_standard(&self, message: MessageTrigger, handler: Arc<dyn TriggerHandler>) {
        self.standard.insert(message, handler);
    }

    pub fn register_extended(
        &self,
        message: MessageTriggerExtended,
        handler: Arc<dyn TriggerHandler>,
    ) {
        self.extended.insert(message, handler);
    }

    fn connector_valid(&self, connector_id: Option<u32>) -> bool {
        connector_id.map_or(true, |id| self.connectors.is_valid(id))
    }

    async fn dispatch(
        &self,
        source: TriggerSource,
        connector_id: Option<u32>,
    ) -> TriggerMessageStatus {
        if !self.connector_valid(connector_id) {
            return TriggerMessageStatus::Rejected;
        }
        let handler = match source {
            TriggerSource::Standard(message) => {
                self.standard.get(&message).map(|entry| Arc::clone(entry.value()))
            }
            TriggerSource::Extended(message) => {
                self.extended.get(&message).map(|entry| Arc::clone(entry.value()))
            }
        };
        match handler {
            Some(handler) => {
                if handler.on_trigger(source, connector_id).await {
                    TriggerMessageStatus::Accepted
                } else {
                    TriggerMessageStatus::Rejected
                }
            }
            None => {
                warn!(?source, "No trigger handler registered");
                TriggerMessageStatus::NotImplemented
            }
        }
    }
}

#[async_trait]
impl MessageHandler for TriggerMessageManager {
    async fn handle(&self, action: &str, payload: Value) -> HandlerResult {
        match action {
            "TriggerMessage" => {
                let request: TriggerMessageRequest = from_payload(payload)?;
                let status = self
                    .dispatch(
                        TriggerSource::Standard(request.requested_message),
                        request.connector_id,
                    )
                    .await;
                to_payload(&TriggerMessageResponse { status })
            }
            "ExtendedTriggerMessage" => {
                let request: ExtendedTriggerMessageRequest = from_payload(payload)?;
                let status = self
                    .dispatch(
                        TriggerSource::Extended(request.requested_message),
                        request.connector_id,
                    )
                    .await;
                to_payload(&ExtendedTriggerMessageResponse { status })
            }
            _ => Err(OcppError::not_implemented(action)),
        }
    }
}
