//! Persisted request FIFO repository

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde_json::Value;
use tracing::debug;

use crate::database::entities::request_fifo;
use crate::support::errors::ChargePointResult;

#[derive(Clone)]
pub struct RequestFifoRepository {
    db: DatabaseConnection,
}

impl RequestFifoRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn push(
        &self,
        connector_id: u32,
        action: &str,
        payload: &Value,
    ) -> ChargePointResult<()> {
        debug!(connector_id, action, "Queuing request");
        request_fifo::ActiveModel {
            id: Default::default(),
            connector_id: Set(connector_id as i32),
            action: Set(action.to_string()),
            payload: Set(payload.to_string()),
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }

    /// Oldest queued request, if any.
    pub async fn front(&self) -> ChargePointResult<Option<request_fifo::Model>> {
        Ok(request_fifo::Entity::find()
            .order_by_asc(request_fifo::Column::Id)
            .one(&self.db)
            .await?)
    }

    pub async fn remove(&self, id: i32) -> ChargePointResult<()> {
        request_fifo::Entity::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    pub async fn count(&self) -> ChargePointResult<u64> {
        Ok(request_fifo::Entity::find().count(&self.db).await?)
    }

    pub async fn clear(&self) -> ChargePointResult<()> {
        request_fifo::Entity::delete_many().exec(&self.db).await?;
        Ok(())
    }

    /// All queued requests for one connector, oldest first.
    pub async fn for_connector(
        &self,
        connector_id: u32,
    ) -> ChargePointResult<Vec<request_fifo::Model>> {
        Ok(request_fifo::Entity::find()
            .filter(request_fifo::Column::ConnectorId.eq(connector_id as i32))
            .order_by_asc(request_fifo::Column::Id)
            .all(&self.db)
            .await?)
    }

    /// Rewrite the `transactionId` field of every queued request of a
    /// connector that still carries the locally-allocated offline id.
    /// Used after the Central System assigned the real transaction id.
    pub async fn rewrite_transaction_id(
        &self,
        connector_id: u32,
        offline_id: i32,
        assigned_id: i32,
    ) -> ChargePointResult<u64> {
        let mut rewritten = 0;
        for row in self.for_connector(connector_id).await? {
            let Ok(mut payload) = serde_json::from_str::<Value>(&row.payload) else {
                continue;
            };
            let matches = payload
                .get("transactionId")
                .and_then(Value::as_i64)
                .is_some_and(|id| id == i64::from(offline_id));
            if !matches {
                continue;
            }
            payload["transactionId"] = Value::from(assigned_id);
            let mut model: request_fifo::ActiveModel = row.into();
            model.payload = Set(payload.to_string());
            model.update(&self.db).await?;
            rewritten += 1;
        }
        if rewritten > 0 {
            debug!(
                connector_id,
                offline_id, assigned_id, rewritten, "Rewrote queued transaction ids"
            );
        }
        Ok(rewritten)
    }
}
