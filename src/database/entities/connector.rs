//! Connector state entity
//!
//! One row per connector, id 0 included (the charge point itself).

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "connectors")]
pub struct Model {
    /// Connector id; 0 is the charge point.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i32,

    /// Current ChargePointStatus
    pub status: String,

    /// Last status actually reported to the Central System
    pub last_notified_status: String,

    #[sea_orm(nullable)]
    pub error_code: Option<String>,

    #[sea_orm(nullable)]
    pub info: Option<String>,

    #[sea_orm(nullable)]
    pub vendor_id: Option<String>,

    #[sea_orm(nullable)]
    pub vendor_error: Option<String>,

    pub status_timestamp: DateTimeUtc,

    /// Active transaction id, 0 when none
    pub transaction_id: i32,

    /// Negative id allocated while offline, rewritten after reconnection
    pub transaction_id_offline: i32,

    #[sea_orm(nullable)]
    pub transaction_start: Option<DateTimeUtc>,

    pub transaction_id_tag: String,

    pub transaction_parent_id_tag: String,

    /// Active reservation id, 0 when none
    pub reservation_id: i32,

    pub reservation_id_tag: String,

    pub reservation_parent_id_tag: String,

    #[sea_orm(nullable)]
    pub reservation_expiry_date: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
