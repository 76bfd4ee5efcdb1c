//! Installed charging profiles repository

use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, QueryOrder, Set};
use tracing::{debug, warn};

use crate::database::entities::charging_profile;
use crate::support::errors::ChargePointResult;
use crate::types::ChargingProfile;

#[derive(Clone)]
pub struct ChargingProfileRepository {
    db: DatabaseConnection,
}

impl ChargingProfileRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Load every stored profile in installation order. Rows that no longer
    /// deserialize are skipped.
    pub async fn load_all(&self) -> ChargePointResult<Vec<(i32, u32, ChargingProfile)>> {
        let rows = charging_profile::Entity::find()
            .order_by_asc(charging_profile::Column::Id)
            .all(&self.db)
            .await?;

        let mut profiles = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_str::<ChargingProfile>(&row.profile) {
                Ok(profile) if profile.charging_profile_id == row.profile_id => {
                    profiles.push((row.id, row.connector_id as u32, profile));
                }
                Ok(_) => warn!(
                    profile_id = row.profile_id,
                    "Stored profile id mismatch, skipping"
                ),
                Err(e) => warn!(profile_id = row.profile_id, "Corrupted stored profile: {e}"),
            }
        }
        Ok(profiles)
    }

    /// Persist a profile, returning its installation rank.
    pub async fn insert(
        &self,
        connector_id: u32,
        profile: &ChargingProfile,
    ) -> ChargePointResult<i32> {
        debug!(
            profile_id = profile.charging_profile_id,
            connector_id, "Storing charging profile"
        );
        let row = charging_profile::ActiveModel {
            id: Default::default(),
            profile_id: Set(profile.charging_profile_id),
            connector_id: Set(connector_id as i32),
            profile: Set(serde_json::to_string(profile)?),
        }
        .insert(&self.db)
        .await?;
        Ok(row.id)
    }

    pub async fn remove(&self, profile_id: i32) -> ChargePointResult<()> {
        use sea_orm::{ColumnTrait, QueryFilter};
        charging_profile::Entity::delete_many()
            .filter(charging_profile::Column::ProfileId.eq(profile_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn clear(&self) -> ChargePointResult<()> {
        debug!("Clearing all charging profiles");
        charging_profile::Entity::delete_many().exec(&self.db).await?;
        Ok(())
    }
}
