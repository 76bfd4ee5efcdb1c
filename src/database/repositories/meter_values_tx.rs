//! Per-transaction meter values repository

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use tracing::warn;

use crate::database::entities::meter_values_tx;
use crate::support::errors::ChargePointResult;
use crate::types::{MeterValue, ReadingContext};

#[derive(Clone)]
pub struct MeterValuesTxRepository {
    db: DatabaseConnection,
}

impl MeterValuesTxRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn append(
        &self,
        connector_id: u32,
        transaction_id: i32,
        context: ReadingContext,
        value: &MeterValue,
    ) -> ChargePointResult<()> {
        meter_values_tx::ActiveModel {
            id: Default::default(),
            connector_id: Set(connector_id as i32),
            transaction_id: Set(transaction_id),
            context: Set(context.to_string()),
            meter_value: Set(serde_json::to_string(value)?),
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }

    pub async fn count(
        &self,
        connector_id: u32,
        transaction_id: i32,
        context: ReadingContext,
    ) -> ChargePointResult<u64> {
        Ok(meter_values_tx::Entity::find()
            .filter(meter_values_tx::Column::ConnectorId.eq(connector_id as i32))
            .filter(meter_values_tx::Column::TransactionId.eq(transaction_id))
            .filter(meter_values_tx::Column::Context.eq(context.to_string()))
            .count(&self.db)
            .await?)
    }

    /// Accumulated values of one transaction in sampling order.
    pub async fn load(
        &self,
        connector_id: u32,
        transaction_id: i32,
    ) -> ChargePointResult<Vec<MeterValue>> {
        let rows = meter_values_tx::Entity::find()
            .filter(meter_values_tx::Column::ConnectorId.eq(connector_id as i32))
            .filter(meter_values_tx::Column::TransactionId.eq(transaction_id))
            .order_by_asc(meter_values_tx::Column::Id)
            .all(&self.db)
            .await?;

        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_str(&row.meter_value) {
                Ok(value) => values.push(value),
                Err(e) => warn!(id = row.id, "Corrupted stored meter value: {e}"),
            }
        }
        Ok(values)
    }

    pub async fn clear(&self, connector_id: u32, transaction_id: i32) -> ChargePointResult<()> {
        meter_values_tx::Entity::delete_many()
            .filter(meter_values_tx::Column::ConnectorId.eq(connector_id as i32))
            .filter(meter_values_tx::Column::TransactionId.eq(transaction_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Rewrite the transaction id after offline reconciliation.
    pub async fn rewrite_transaction_id(
        &self,
        connector_id: u32,
        offline_id: i32,
        assigned_id: i32,
    ) -> ChargePointResult<()> {
        let rows = meter_values_tx::Entity::find()
            .filter(meter_values_tx::Column::ConnectorId.eq(connector_id as i32))
            .filter(meter_values_tx::Column::TransactionId.eq(offline_id))
            .all(&self.db)
            .await?;
        for row in rows {
            let mut row: meter_values_tx::ActiveModel = row.into();
            row.transaction_id = Set(assigned_id);
            row.update(&self.db).await?;
        }
        Ok(())
    }
}
