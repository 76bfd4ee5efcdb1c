//! Authorization cache entity
//!
//! Bounded store of identifiers resolved online; only Accepted entries are
//! kept and the `last_used` column drives LRU eviction.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "authent_cache")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id_tag: String,

    pub status: String,

    #[sea_orm(nullable)]
    pub parent_id_tag: Option<String>,

    #[sea_orm(nullable)]
    pub expiry_date: Option<DateTimeUtc>,

    pub last_used: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
