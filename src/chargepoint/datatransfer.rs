//! Data transfer manager
//!
//! Vendor-specific DataTransfer in both directions: host-initiated
//! requests to the Central System, and Central System requests forwarded
//! to the host handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::chargepoint::events::ChargePointEventsHandler;
use crate::messages::{DataTransferRequest, DataTransferResponse};
use crate::rpc::{from_payload, to_payload, CallResult, HandlerResult, MessageHandler, MessageSender, OcppError};
use crate::support::errors::ChargePointResult;
use crate::types::DataTransferStatus;

pub struct DataTransferManager {
    events: Arc<dyn ChargePointEventsHandler>,
    sender: Arc<MessageSender>,
}

impl DataTransferManager {
    pub fn new(events: Arc<dyn ChargePointEventsHandler>, sender: Arc<MessageSender>) -> Self {
        Self { events, sender }
    }

    /// Host-initiated DataTransfer. Returns the status and response data
    /// of the Central System, or `None` when the call itself failed.
    pub async fn data_transfer(
        &self,
        vendor_id: &str,
        message_id: Option<&str>,
        data: Option<&str>,
    ) -> ChargePointResult<Option<(DataTransferStatus, Option<String>)>> {
        let request = DataTransferRequest {
            vendor_id: vendor_id.to_string(),
            message_id: message_id.map(str::to_string),
            data: data.map(str::to_string),
        };
        match self.sender.send(&request).await {
            CallResult::Ok(response) => Ok(Some((response.status, response.data))),
            other => {
                warn!(vendor_id, "DataTransfer failed: {other:?}");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl MessageHandler for DataTransferManager {
    async fn handle(&self, action: &str, payload: Value) -> HandlerResult {
        match action {
            "DataTransfer" => {
                let request: DataTransferRequest = from_payload(payload)?;
                let (status, data) = self
                    .events
                    .data_transfer_requested(
                        &request.vendor_id,
                        request.message_id.as_deref(),
                        request.data.as_deref(),
                    )
                    .await;
                to_payload(&DataTransferResponse { status, data })
            }
            _ => Err(OcppError::not_implemented(action)),
        }
    }
}
