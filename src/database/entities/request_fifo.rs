//! Persisted request FIFO entity
//!
//! Transaction-related requests queued while disconnected; drained
//! oldest-first (ascending row id) on reconnection.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "request_fifo")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub connector_id: i32,

    /// OCPP action name (StartTransaction, StopTransaction, MeterValues)
    pub action: String,

    /// Request payload in wire JSON form
    #[sea_orm(column_type = "Text")]
    pub payload: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
