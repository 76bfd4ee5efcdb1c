//! Connector registry
//!
//! Owns one record per connector, index 0 being the charge point itself.
//! Mutations are serialized by a per-connector mutex and persisted
//! immediately; reads return the in-memory state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, PaginatorTrait, Set};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::database::entities::connector;
use crate::support::errors::ChargePointResult;
use crate::types::{ChargePointErrorCode, ChargePointStatus};

/// Connector id reserved for the charge point itself.
pub const CONNECTOR_ID_CHARGE_POINT: u32 = 0;

/// State of one connector.
#[derive(Debug, Clone)]
pub struct Connector {
    pub id: u32,
    pub status: ChargePointStatus,
    /// Last status actually reported to the Central System.
    pub last_notified_status: ChargePointStatus,
    pub error_code: ChargePointErrorCode,
    pub info: String,
    pub vendor_id: String,
    pub vendor_error: String,
    pub status_timestamp: DateTime<Utc>,
    /// Active transaction id, 0 when none.
    pub transaction_id: i32,
    /// Negative id allocated while offline, 0 when none.
    pub transaction_id_offline: i32,
    pub transaction_start: Option<DateTime<Utc>>,
    pub transaction_id_tag: String,
    pub transaction_parent_id_tag: String,
    /// Active reservation id, 0 when none.
    pub reservation_id: i32,
    pub reservation_id_tag: String,
    pub reservation_parent_id_tag: String,
    pub reservation_expiry_date: Option<DateTime<Utc>>,
}

impl Connector {
    fn new(id: u32) -> Self {
        Self {
            id,
            status: ChargePointStatus::Available,
            last_notified_status: ChargePointStatus::Available,
            error_code: ChargePointErrorCode::NoError,
            info: String::new(),
            vendor_id: String::new(),
            vendor_error: String::new(),
            status_timestamp: Utc::now(),
            transaction_id: 0,
            transaction_id_offline: 0,
            transaction_start: None,
            transaction_id_tag: String::new(),
            transaction_parent_id_tag: String::new(),
            reservation_id: 0,
            reservation_id_tag: String::new(),
            reservation_parent_id_tag: String::new(),
            reservation_expiry_date: None,
        }
    }

    pub fn has_transaction(&self) -> bool {
        self.transaction_id != 0
    }

    pub fn has_reservation(&self) -> bool {
        self.reservation_id != 0
    }

    fn from_model(model: connector::Model) -> Self {
        Self {
            id: model.id as u32,
            status: model
                .status
                .parse()
                .unwrap_or(ChargePointStatus::Available),
            last_notified_status: model
                .last_notified_status
                .parse()
                .unwrap_or(ChargePointStatus::Available),
            error_code: model
                .error_code
                .as_deref()
                .and_then(|code| code.parse().ok())
                .unwrap_or(ChargePointErrorCode::NoError),
            info: model.info.unwrap_or_default(),
            vendor_id: model.vendor_id.unwrap_or_default(),
            vendor_error: model.vendor_error.unwrap_or_default(),
            status_timestamp: model.status_timestamp,
            transaction_id: model.transaction_id,
            transaction_id_offline: model.transaction_id_offline,
            transaction_start: model.transaction_start,
            transaction_id_tag: model.transaction_id_tag,
            transaction_parent_id_tag: model.transaction_parent_id_tag,
            reservation_id: model.reservation_id,
            reservation_id_tag: model.reservation_id_tag,
            reservation_parent_id_tag: model.reservation_parent_id_tag,
            reservation_expiry_date: model.reservation_expiry_date,
        }
    }

    fn to_active_model(&self) -> connector::ActiveModel {
        connector::ActiveModel {
            id: Set(self.id as i32),
            status: Set(self.status.to_string()),
            last_notified_status: Set(self.last_notified_status.to_string()),
            error_code: Set(Some(self.error_code.to_string())),
            info: Set(Some(self.info.clone())),
            vendor_id: Set(Some(self.vendor_id.clone())),
            vendor_error: Set(Some(self.vendor_error.clone())),
            status_timestamp: Set(self.status_timestamp),
            transaction_id: Set(self.transaction_id),
            transaction_id_offline: Set(self.transaction_id_offline),
            transaction_start: Set(self.transaction_start),
            transaction_id_tag: Set(self.transaction_id_tag.clone()),
            transaction_parent_id_tag: Set(self.transaction_parent_id_tag.clone()),
            reservation_id: Set(self.reservation_id),
            reservation_id_tag: Set(self.reservation_id_tag.clone()),
            reservation_parent_id_tag: Set(self.reservation_parent_id_tag.clone()),
            reservation_expiry_date: Set(self.reservation_expiry_date),
        }
    }
}

/// Registry of all connectors.
pub struct ConnectorRegistry {
    db: DatabaseConnection,
    connectors: Vec<Arc<Mutex<Connector>>>,
}

impl ConnectorRegistry {
    /// Load connector state, recreating default rows when the stored count
    /// does not match the configured count.
    pub async fn open(db: DatabaseConnection, connector_count: u32) -> ChargePointResult<Self> {
        let mut registry = Self {
            db,
            connectors: Vec::new(),
        };
        registry.load(connector_count).await?;
        Ok(registry)
    }

    async fn load(&mut self, connector_count: u32) -> ChargePointResult<()> {
        let expected = u64::from(connector_count) + 1;
        let stored = connector::Entity::find().count(&self.db).await?;

        if stored != expected {
            if stored != 0 {
                warn!(
                    stored,
                    expected, "Connector count mismatch, resetting connector data"
                );
            }
            self.reset_rows(connector_count).await?;
        } else {
            let rows = connector::Entity::find().all(&self.db).await?;
            let mut connectors: Vec<Connector> =
                rows.into_iter().map(Connector::from_model).collect();
            connectors.sort_by_key(|c| c.id);
            self.connectors = connectors
                .into_iter()
                .map(|c| Arc::new(Mutex::new(c)))
                .collect();
            debug!(count = self.connectors.len(), "Connectors loaded");
        }
        Ok(())
    }

    /// Erase every row and recreate defaults.
    pub async fn reset(&mut self, connector_count: u32) -> ChargePointResult<()> {
        warn!("Resetting connector data");
        self.reset_rows(connector_count).await
    }

    async fn reset_rows(&mut self, connector_count: u32) -> ChargePointResult<()> {
        connector::Entity::delete_many().exec(&self.db).await?;
        self.connectors.clear();
        for id in 0..=connector_count {
            let connector = Connector::new(id);
            connector.to_active_model().insert(&self.db).await?;
            self.connectors.push(Arc::new(Mutex::new(connector)));
        }
        Ok(())
    }

    /// Number of physical connectors (id 0 not counted).
    pub fn count(&self) -> u32 {
        (self.connectors.len() as u32).saturating_sub(1)
    }

    pub fn is_valid(&self, id: u32) -> bool {
        (id as usize) < self.connectors.len()
    }

    pub fn connector(&self, id: u32) -> Option<Arc<Mutex<Connector>>> {
        self.connectors.get(id as usize).cloned()
    }

    /// The record of the charge point itself (id 0).
    pub fn charge_point(&self) -> Arc<Mutex<Connector>> {
        Arc::clone(&self.connectors[CONNECTOR_ID_CHARGE_POINT as usize])
    }

    /// Ids of the physical connectors (1..=count).
    pub fn connector_ids(&self) -> Vec<u32> {
        (1..self.connectors.len() as u32).collect()
    }

    /// Persist the state of one connector. The caller holds the mutex.
    pub async fn save(&self, connector: &Connector) -> ChargePointResult<()> {
        connector.to_active_model().update(&self.db).await?;
        debug!(id = connector.id, "Connector saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_in_memory;

    #[tokio::test]
    async fn creates_one_row_per_connector_plus_charge_point() {
        let db = open_in_memory().await.unwrap();
        let registry = ConnectorRegistry::open(db, 2).await.unwrap();
        assert_eq!(registry.count(), 2);
        assert!(registry.is_valid(0));
        assert!(registry.is_valid(2));
        assert!(!registry.is_valid(3));
        assert_eq!(registry.connector_ids(), vec![1, 2]);
    }

    #[tokio::test]
    async fn state_survives_reopen_with_same_count() {
        let db = open_in_memory().await.unwrap();
        {
            let registry = ConnectorRegistry::open(db.clone(), 2).await.unwrap();
            let connector = registry.connector(1).unwrap();
            let mut connector = connector.lock().await;
            connector.status = ChargePointStatus::Charging;
            connector.transaction_id = 42;
            connector.transaction_id_tag = "TAG".to_string();
            registry.save(&connector).await.unwrap();
        }
        let registry = ConnectorRegistry::open(db, 2).await.unwrap();
        let connector = registry.connector(1).unwrap();
        let connector = connector.lock().await;
        assert_eq!(connector.status, ChargePointStatus::Charging);
        assert_eq!(connector.transaction_id, 42);
        assert_eq!(connector.transaction_id_tag, "TAG");
    }

    #[tokio::test]
    async fn count_mismatch_resets_to_defaults() {
        let db = open_in_memory().await.unwrap();
        {
            let registry = ConnectorRegistry::open(db.clone(), 2).await.unwrap();
            let connector = registry.connector(1).unwrap();
            let mut connector = connector.lock().await;
            connector.status = ChargePointStatus::Faulted;
            registry.save(&connector).await.unwrap();
        }
        // one more connector configured than stored: everything resets
        let registry = ConnectorRegistry::open(db, 3).await.unwrap();
        assert_eq!(registry.count(), 3);
        let connector = registry.connector(1).unwrap();
        assert_eq!(connector.lock().await.status, ChargePointStatus::Available);
    }
}
