//! Per-transaction meter values entity
//!
//! Aligned and sampled values accumulated during a transaction for the
//! StopTransaction `transactionData`; persisted so they survive a restart.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "meter_values_tx")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub connector_id: i32,

    pub transaction_id: i32,

    /// ReadingContext of the stored sample (Sample.Clock or Sample.Periodic)
    pub context: String,

    /// MeterValue element in wire JSON form
    #[sea_orm(column_type = "Text")]
    pub meter_value: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
