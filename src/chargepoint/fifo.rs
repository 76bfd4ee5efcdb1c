//! Persisted request FIFO
//!
//! Transaction-related requests (StartTransaction, StopTransaction,
//! MeterValues) are queued here while the link is down, or while older
//! entries are still queued so per-connector ordering is preserved. The
//! transaction manager drains the queue oldest-first on reconnection.

use serde_json::Value;
use tokio::sync::Notify;

use crate::database::entities::request_fifo;
use crate::database::repositories::RequestFifoRepository;
use crate::support::errors::ChargePointResult;

pub struct RequestFifo {
    repository: RequestFifoRepository,
    kick: Notify,
}

impl RequestFifo {
    pub fn new(repository: RequestFifoRepository) -> Self {
        Self {
            repository,
            kick: Notify::new(),
        }
    }

    pub async fn push(
        &self,
        connector_id: u32,
        action: &str,
        payload: &Value,
    ) -> ChargePointResult<()> {
        self.repository.push(connector_id, action, payload).await?;
        self.kick.notify_one();
        Ok(())
    }

    pub async fn front(&self) -> ChargePointResult<Option<request_fifo::Model>> {
        self.repository.front().await
    }

    pub async fn pop(&self, id: i32) -> ChargePointResult<()> {
        self.repository.remove(id).await
    }

    pub async fn is_empty(&self) -> ChargePointResult<bool> {
        Ok(self.repository.count().await? == 0)
    }

    pub async fn count(&self) -> ChargePointResult<u64> {
        self.repository.count().await
    }

    pub async fn rewrite_transaction_id(
        &self,
        connector_id: u32,
        offline_id: i32,
        assigned_id: i32,
    ) -> ChargePointResult<u64> {
        self.repository
            .rewrite_transaction_id(connector_id, offline_id, assigned_id)
            .await
    }

    /// Wake the drain task after a push.
    pub async fn wait_for_entry(&self) {
        self.kick.notified().await;
    }
}
