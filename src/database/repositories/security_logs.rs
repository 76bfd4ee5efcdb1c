//! Security events log repository

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryOrder, Set,
};
use tracing::debug;

use crate::database::entities::security_log;
use crate::support::errors::ChargePointResult;

#[derive(Clone)]
pub struct SecurityLogsRepository {
    db: DatabaseConnection,
}

impl SecurityLogsRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Append an event, evicting the oldest rows beyond `max_entries`.
    pub async fn append(
        &self,
        event_type: &str,
        message: &str,
        critical: bool,
        timestamp: DateTime<Utc>,
        max_entries: u32,
    ) -> ChargePointResult<()> {
        security_log::ActiveModel {
            id: Default::default(),
            timestamp: Set(timestamp),
            event_type: Set(event_type.to_string()),
            message: Set(message.to_string()),
            critical: Set(critical),
        }
        .insert(&self.db)
        .await?;

        let count = security_log::Entity::find().count(&self.db).await?;
        if count > u64::from(max_entries) {
            let overflow = count - u64::from(max_entries);
            let oldest = security_log::Entity::find()
                .order_by_asc(security_log::Column::Id)
                .paginate(&self.db, overflow)
                .fetch()
                .await?;
            for row in oldest {
                security_log::Entity::delete_by_id(row.id).exec(&self.db).await?;
            }
        }
        Ok(())
    }

    /// Every stored event, oldest first.
    pub async fn list(&self) -> ChargePointResult<Vec<security_log::Model>> {
        Ok(security_log::Entity::find()
            .order_by_asc(security_log::Column::Id)
            .all(&self.db)
            .await?)
    }

    pub async fn clear(&self) -> ChargePointResult<()> {
        debug!("Clearing security events log");
        security_log::Entity::delete_many().exec(&self.db).await?;
        Ok(())
    }

    pub async fn count(&self) -> ChargePointResult<u64> {
        Ok(security_log::Entity::find().count(&self.db).await?)
    }
}
