//! Authorization stores: cache and local list

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use tracing::debug;

use crate::database::entities::{authent_cache, authent_local_list};
use crate::support::errors::ChargePointResult;
use crate::types::{AuthorizationStatus, IdTagInfo};

/// One resolved authorization entry, shared by both stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthentEntry {
    pub id_tag: String,
    pub status: AuthorizationStatus,
    pub parent_id_tag: Option<String>,
    pub expiry_date: Option<DateTime<Utc>>,
}

impl AuthentEntry {
    pub fn id_tag_info(&self) -> IdTagInfo {
        IdTagInfo {
            status: self.status,
            parent_id_tag: self.parent_id_tag.clone(),
            expiry_date: self.expiry_date,
        }
    }
}

fn status_from_str(status: &str) -> AuthorizationStatus {
    status.parse().unwrap_or(AuthorizationStatus::Invalid)
}

// ── Cache ──────────────────────────────────────────────────────

/// Bounded LRU cache of identifiers resolved online.
#[derive(Clone)]
pub struct AuthentCacheRepository {
    db: DatabaseConnection,
}

impl AuthentCacheRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Look up an entry and refresh its LRU position.
    pub async fn get(&self, id_tag: &str) -> ChargePointResult<Option<AuthentEntry>> {
        let row = authent_cache::Entity::find_by_id(id_tag).one(&self.db).await?;
        let Some(row) = row else { return Ok(None) };

        let entry = AuthentEntry {
            id_tag: row.id_tag.clone(),
            status: status_from_str(&row.status),
            parent_id_tag: row.parent_id_tag.clone(),
            expiry_date: row.expiry_date,
        };

        let mut touched: authent_cache::ActiveModel = row.into();
        touched.last_used = Set(Utc::now());
        touched.update(&self.db).await?;

        Ok(Some(entry))
    }

    /// Insert or refresh an entry, evicting the least recently used rows
    /// beyond `capacity`.
    pub async fn put(&self, entry: &AuthentEntry, capacity: u32) -> ChargePointResult<()> {
        debug!(id_tag = entry.id_tag.as_str(), status = %entry.status, "Cache entry");

        match authent_cache::Entity::find_by_id(&entry.id_tag).one(&self.db).await? {
            Some(row) => {
                let mut row: authent_cache::ActiveModel = row.into();
                row.status = Set(entry.status.to_string());
                row.parent_id_tag = Set(entry.parent_id_tag.clone());
                row.expiry_date = Set(entry.expiry_date);
                row.last_used = Set(Utc::now());
                row.update(&self.db).await?;
            }
            None => {
                let count = authent_cache::Entity::find().count(&self.db).await?;
                if count >= u64::from(capacity) {
                    let overflow = count - u64::from(capacity) + 1;
                    let oldest = authent_cache::Entity::find()
                        .order_by_asc(authent_cache::Column::LastUsed)
                        .paginate(&self.db, overflow)
                        .fetch()
                        .await?;
                    for row in oldest {
                        debug!(id_tag = row.id_tag.as_str(), "Evicting cache entry");
                        authent_cache::Entity::delete_by_id(&row.id_tag)
                            .exec(&self.db)
                            .await?;
                    }
                }
                authent_cache::ActiveModel {
                    id_tag: Set(entry.id_tag.clone()),
                    status: Set(entry.status.to_string()),
                    parent_id_tag: Set(entry.parent_id_tag.clone()),
                    expiry_date: Set(entry.expiry_date),
                    last_used: Set(Utc::now()),
                }
                .insert(&self.db)
                .await?;
            }
        }
        Ok(())
    }

    pub async fn remove(&self, id_tag: &str) -> ChargePointResult<()> {
        authent_cache::Entity::delete_by_id(id_tag).exec(&self.db).await?;
        Ok(())
    }

    pub async fn clear(&self) -> ChargePointResult<()> {
        debug!("Clearing authorization cache");
        authent_cache::Entity::delete_many().exec(&self.db).await?;
        Ok(())
    }

    pub async fn count(&self) -> ChargePointResult<u64> {
        Ok(authent_cache::Entity::find().count(&self.db).await?)
    }

    /// Remove entries whose expiry date has passed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> ChargePointResult<u64> {
        let result = authent_cache::Entity::delete_many()
            .filter(authent_cache::Column::ExpiryDate.lt(now))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}

// ── Local list ─────────────────────────────────────────────────

/// Local authorization list, updated by SendLocalList.
#[derive(Clone)]
pub struct LocalListRepository {
    db: DatabaseConnection,
}

impl LocalListRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn get(&self, id_tag: &str) -> ChargePointResult<Option<AuthentEntry>> {
        Ok(authent_local_list::Entity::find_by_id(id_tag)
            .one(&self.db)
            .await?
            .map(|row| AuthentEntry {
                id_tag: row.id_tag,
                status: status_from_str(&row.status),
                parent_id_tag: row.parent_id_tag,
                expiry_date: row.expiry_date,
            }))
    }

    /// Atomically replace the whole list (Full update).
    pub async fn replace_all(&self, entries: &[AuthentEntry]) -> ChargePointResult<()> {
        debug!(count = entries.len(), "Replacing local authorization list");
        let txn = self.db.begin().await?;
        authent_local_list::Entity::delete_many().exec(&txn).await?;
        for entry in entries {
            authent_local_list::ActiveModel {
                id_tag: Set(entry.id_tag.clone()),
                status: Set(entry.status.to_string()),
                parent_id_tag: Set(entry.parent_id_tag.clone()),
                expiry_date: Set(entry.expiry_date),
            }
            .insert(&txn)
            .await?;
        }
        txn.commit().await?;
        Ok(())
    }

    /// Insert or update one entry (Differential update).
    pub async fn upsert(&self, entry: &AuthentEntry) -> ChargePointResult<()> {
        match authent_local_list::Entity::find_by_id(&entry.id_tag)
            .one(&self.db)
            .await?
        {
            Some(row) => {
                let mut row: authent_local_list::ActiveModel = row.into();
                row.status = Set(entry.status.to_string());
                row.parent_id_tag = Set(entry.parent_id_tag.clone());
                row.expiry_date = Set(entry.expiry_date);
                row.update(&self.db).await?;
            }
            None => {
                authent_local_list::ActiveModel {
                    id_tag: Set(entry.id_tag.clone()),
                    status: Set(entry.status.to_string()),
                    parent_id_tag: Set(entry.parent_id_tag.clone()),
                    expiry_date: Set(entry.expiry_date),
                }
                .insert(&self.db)
                .await?;
            }
        }
        Ok(())
    }

    pub async fn remove(&self, id_tag: &str) -> ChargePointResult<()> {
        authent_local_list::Entity::delete_by_id(id_tag)
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn count(&self) -> ChargePointResult<u64> {
        Ok(authent_local_list::Entity::find().count(&self.db).await?)
    }

    /// Remove entries whose expiry date has passed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> ChargePointResult<u64> {
        let result = authent_local_list::Entity::delete_many()
            .filter(authent_local_list::Column::ExpiryDate.lt(now))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
