//! Security event log entity

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "security_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub timestamp: DateTimeUtc,

    /// Security event type, e.g. `SettingSystemTime`
    pub event_type: String,

    #[sea_orm(column_type = "Text")]
    pub message: String,

    /// Critical events are also notified to the Central System
    pub critical: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
