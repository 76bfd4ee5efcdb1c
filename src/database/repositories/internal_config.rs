//! Internal configuration repository

use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use tracing::debug;

use crate::database::entities::internal_config;
use crate::support::errors::ChargePointResult;

#[derive(Clone)]
pub struct InternalConfigRepository {
    db: DatabaseConnection,
}

impl InternalConfigRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn key_exists(&self, key: &str) -> ChargePointResult<bool> {
        Ok(internal_config::Entity::find_by_id(key)
            .one(&self.db)
            .await?
            .is_some())
    }

    pub async fn get_key(&self, key: &str) -> ChargePointResult<Option<String>> {
        Ok(internal_config::Entity::find_by_id(key)
            .one(&self.db)
            .await?
            .map(|row| row.value))
    }

    /// Create or overwrite a key.
    pub async fn set_key(&self, key: &str, value: &str) -> ChargePointResult<()> {
        debug!(key, value, "Set internal config key");
        match internal_config::Entity::find_by_id(key).one(&self.db).await? {
            Some(row) => {
                let mut row: internal_config::ActiveModel = row.into();
                row.value = Set(value.to_string());
                row.update(&self.db).await?;
            }
            None => {
                internal_config::ActiveModel {
                    key: Set(key.to_string()),
                    value: Set(value.to_string()),
                }
                .insert(&self.db)
                .await?;
            }
        }
        Ok(())
    }

    /// Create a key with a default value only if it does not exist yet.
    pub async fn init_key(&self, key: &str, default: &str) -> ChargePointResult<()> {
        if !self.key_exists(key).await? {
            self.set_key(key, default).await?;
        }
        Ok(())
    }
}
