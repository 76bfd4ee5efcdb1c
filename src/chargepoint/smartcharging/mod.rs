//! Smart charging manager
//!
//! Owns the installed-profile store (memory + database) and serves the
//! SetChargingProfile / ClearChargingProfile / GetCompositeSchedule
//! actions. The schedule mathematics live in [`engine`].

pub mod engine;
pub mod profiles;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::chargepoint::connectors::{ConnectorRegistry, CONNECTOR_ID_CHARGE_POINT};
use crate::chargepoint::ocppconfig::OcppConfigStore;
use crate::database::repositories::ChargingProfileRepository;
use crate::messages::{
    ClearChargingProfileRequest, ClearChargingProfileResponse, GetCompositeScheduleRequest,
    GetCompositeScheduleResponse, SetChargingProfileRequest, SetChargingProfileResponse,
};
use crate::rpc::{from_payload, to_payload, HandlerResult, MessageHandler, OcppError};
use crate::support::errors::{ChargePointError, ChargePointResult};
use crate::types::{
    ChargingProfile, ChargingProfilePurpose, ChargingProfileStatus, ChargingRateUnit,
    ChargingSchedule, ClearChargingProfileStatus, GetCompositeScheduleStatus,
};

pub use engine::{ScheduleContext, SmartChargingSetpoint};
pub use profiles::{InstalledProfile, ProfileStore};

pub struct SmartChargingManager {
    operating_voltage: f64,
    ocpp_config: Arc<OcppConfigStore>,
    repository: ChargingProfileRepository,
    connectors: Arc<ConnectorRegistry>,
    store: Mutex<ProfileStore>,
}

impl SmartChargingManager {
    pub async fn open(
        operating_voltage: f64,
        ocpp_config: Arc<OcppConfigStore>,
        db: DatabaseConnection,
        connectors: Arc<ConnectorRegistry>,
    ) -> ChargePointResult<Self> {
        let repository = ChargingProfileRepository::new(db);
        let store = ProfileStore::load(repository.load_all().await?);
        debug!(count = store.total(), "Charging profiles loaded");
        Ok(Self {
            operating_voltage,
            ocpp_config,
            repository,
            connectors,
            store: Mutex::new(store),
        })
    }

    /// Install a profile under the conflict and capacity rules. Returns
    /// `false` when the installed-profiles cap is reached.
    pub async fn install(
        &self,
        connector_id: u32,
        profile: ChargingProfile,
    ) -> ChargePointResult<bool> {
        let mut store = self.store.lock().await;
        self.install_locked(&mut store, connector_id, profile).await
    }

    async fn install_locked(
        &self,
        store: &mut ProfileStore,
        connector_id: u32,
        profile: ChargingProfile,
    ) -> ChargePointResult<bool> {
        // Re-installing an existing profile id replaces it
        if store.remove_by_id(profile.charging_profile_id) {
            self.repository.remove(profile.charging_profile_id).await?;
        }
        // Only one profile per (connector, stack level, purpose)
        if let Some(evicted) = store.conflicting_profile_id(connector_id, &profile) {
            debug!(evicted, "Evicting conflicting charging profile");
            self.repository.remove(evicted).await?;
            store.remove_by_id(evicted);
        }

        let max_installed =
            self.ocpp_config.snapshot().max_charging_profiles_installed as usize;
        if store.total() >= max_installed {
            warn!(
                profile_id = profile.charging_profile_id,
                max_installed, "Too many charging profiles installed"
            );
            return Ok(false);
        }

        info!(
            profile_id = profile.charging_profile_id,
            connector_id,
            purpose = %profile.charging_profile_purpose,
            stack_level = profile.stack_level,
            "Installing charging profile"
        );
        let rank = self.repository.insert(connector_id, &profile).await?;
        store.push(InstalledProfile {
            rank,
            connector_id,
            profile,
        });
        Ok(true)
    }

    /// Clear profiles matching the criteria; with no criteria, clear all.
    /// Returns whether anything was removed.
    pub async fn clear(
        &self,
        id: Option<i32>,
        connector_id: Option<u32>,
        purpose: Option<ChargingProfilePurpose>,
        stack_level: Option<u32>,
    ) -> ChargePointResult<bool> {
        let mut store = self.store.lock().await;

        if id.is_none() && connector_id.is_none() && purpose.is_none() && stack_level.is_none() {
            if store.is_empty() {
                return Ok(false);
            }
            info!("Clearing all charging profiles");
            self.repository.clear().await?;
            *store = ProfileStore::default();
            return Ok(true);
        }

        if let Some(id) = id {
            if store.remove_by_id(id) {
                self.repository.remove(id).await?;
                return Ok(true);
            }
            return Ok(false);
        }

        let ids = store.matching_ids(connector_id, purpose, stack_level);
        for id in &ids {
            store.remove_by_id(*id);
            self.repository.remove(*id).await?;
        }
        Ok(!ids.is_empty())
    }

    /// Bind pending TxProfile templates to a transaction that just started
    /// on `connector_id`. Templates installed on connector 0 are consumed.
    pub async fn assign_pending_tx_profiles(
        &self,
        connector_id: u32,
        transaction_id: i32,
    ) -> ChargePointResult<()> {
        let mut store = self.store.lock().await;
        for template in store.pending_tx_templates(connector_id) {
            if template.connector_id == CONNECTOR_ID_CHARGE_POINT {
                store.remove_by_id(template.profile.charging_profile_id);
                self.repository
                    .remove(template.profile.charging_profile_id)
                    .await?;
            }
            let mut bound = template.profile.clone();
            bound.transaction_id = Some(transaction_id);
            info!(
                profile_id = bound.charging_profile_id,
                connector_id, transaction_id, "Assigning pending TxProfile"
            );
            self.install_locked(&mut store, connector_id, bound).await?;
        }
        Ok(())
    }

    /// Rebind TxProfiles after the Central System assigned the real id to
    /// a transaction started offline.
    pub async fn rebind_tx_profiles(
        &self,
        connector_id: u32,
        offline_id: i32,
        assigned_id: i32,
    ) -> ChargePointResult<()> {
        let mut store = self.store.lock().await;
        for id in store.tx_profiles_of(connector_id, offline_id) {
            let Some(template) = store.find_by_id(id).cloned() else {
                continue;
            };
            store.remove_by_id(id);
            self.repository.remove(id).await?;
            let mut bound = template.profile;
            bound.transaction_id = Some(assigned_id);
            self.install_locked(&mut store, connector_id, bound).await?;
        }
        Ok(())
    }

    /// Remove the TxProfiles bound to a transaction that just ended.
    pub async fn clear_tx_profiles(
        &self,
        connector_id: u32,
        transaction_id: i32,
    ) -> ChargePointResult<()> {
        let mut store = self.store.lock().await;
        for id in store.tx_profiles_of(connector_id, transaction_id) {
            debug!(profile_id = id, "Removing TxProfile of ended transaction");
            store.remove_by_id(id);
            self.repository.remove(id).await?;
        }
        Ok(())
    }

    async fn schedule_context(
        &self,
        connector_id: u32,
        window: i64,
        unit: ChargingRateUnit,
    ) -> ChargePointResult<(ScheduleContext, i32)> {
        let connector = self
            .connectors
            .connector(connector_id)
            .ok_or(ChargePointError::InvalidConnector(connector_id))?;
        let (transaction_id, transaction_start) = {
            let connector = connector.lock().await;
            (connector.transaction_id, connector.transaction_start)
        };
        Ok((
            ScheduleContext {
                now: Utc::now(),
                window,
                unit,
                operating_voltage: self.operating_voltage,
                transaction_start,
            },
            transaction_id,
        ))
    }

    /// Composite schedule of a connector over `window` seconds.
    pub async fn get_composite_schedule(
        &self,
        connector_id: u32,
        window: i64,
        unit: ChargingRateUnit,
    ) -> ChargePointResult<ChargingSchedule> {
        let (ctx, transaction_id) = self.schedule_context(connector_id, window, unit).await?;
        let store = self.store.lock().await;
        let cp = store.candidates(ChargingProfilePurpose::ChargePointMaxProfile, connector_id);
        let tx = tx_candidates(&store, connector_id, transaction_id);
        let defaults = store.candidates(ChargingProfilePurpose::TxDefaultProfile, connector_id);
        Ok(engine::composite_schedule(&cp, &tx, &defaults, &ctx))
    }

    /// Instantaneous setpoints of a connector.
    pub async fn get_setpoint(
        &self,
        connector_id: u32,
        unit: ChargingRateUnit,
    ) -> ChargePointResult<(Option<SmartChargingSetpoint>, Option<SmartChargingSetpoint>)> {
        let (ctx, transaction_id) = self.schedule_context(connector_id, 1, unit).await?;
        let store = self.store.lock().await;
        let cp = store.candidates(ChargingProfilePurpose::ChargePointMaxProfile, connector_id);
        let tx = tx_candidates(&store, connector_id, transaction_id);
        let defaults = store.candidates(ChargingProfilePurpose::TxDefaultProfile, connector_id);
        Ok(engine::setpoints(&cp, &tx, &defaults, &ctx))
    }

    fn unit_allowed(&self, unit: ChargingRateUnit) -> bool {
        let allowed = self
            .ocpp_config
            .snapshot()
            .charging_schedule_allowed_charging_rate_unit;
        match unit {
            ChargingRateUnit::A => allowed.contains("Current"),
            ChargingRateUnit::W => allowed.contains("Power"),
        }
    }

    async fn set_charging_profile(
        &self,
        request: SetChargingProfileRequest,
    ) -> ChargePointResult<ChargingProfileStatus> {
        let connector_id = request.connector_id;
        let mut profile = request.cs_charging_profiles;

        if !self.connectors.is_valid(connector_id) {
            return Ok(ChargingProfileStatus::Rejected);
        }

        let cfg = self.ocpp_config.snapshot();
        if profile.stack_level > cfg.charge_profile_max_stack_level {
            return Ok(ChargingProfileStatus::Rejected);
        }
        let periods = &profile.charging_schedule.charging_schedule_period;
        if periods.is_empty()
            || periods.len() > cfg.charging_schedule_max_periods as usize
            || periods[0].start_period != 0
            || periods.windows(2).any(|w| w[0].start_period >= w[1].start_period)
        {
            return Ok(ChargingProfileStatus::Rejected);
        }
        if !self.unit_allowed(profile.charging_schedule.charging_rate_unit) {
            return Ok(ChargingProfileStatus::NotSupported);
        }

        match profile.charging_profile_purpose {
            ChargingProfilePurpose::ChargePointMaxProfile => {
                if connector_id != CONNECTOR_ID_CHARGE_POINT {
                    return Ok(ChargingProfileStatus::Rejected);
                }
            }
            ChargingProfilePurpose::TxProfile => {
                if connector_id == CONNECTOR_ID_CHARGE_POINT {
                    // Only unbound templates may target the whole charge point
                    if profile.transaction_id.is_some() {
                        return Ok(ChargingProfileStatus::Rejected);
                    }
                } else {
                    let connector = self
                        .connectors
                        .connector(connector_id)
                        .ok_or(ChargePointError::InvalidConnector(connector_id))?;
                    let active = connector.lock().await.transaction_id;
                    if active == 0 {
                        return Ok(ChargingProfileStatus::Rejected);
                    }
                    match profile.transaction_id {
                        Some(tx) if tx != active => return Ok(ChargingProfileStatus::Rejected),
                        Some(_) => {}
                        None => profile.transaction_id = Some(active),
                    }
                }
            }
            ChargingProfilePurpose::TxDefaultProfile => {}
        }

        if self.install(connector_id, profile).await? {
            Ok(ChargingProfileStatus::Accepted)
        } else {
            Ok(ChargingProfileStatus::Rejected)
        }
    }
}

fn tx_candidates(
    store: &ProfileStore,
    connector_id: u32,
    transaction_id: i32,
) -> Vec<InstalledProfile> {
    if transaction_id == 0 {
        return Vec::new();
    }
    store
        .candidates(ChargingProfilePurpose::TxProfile, connector_id)
        .into_iter()
        .filter(|p| p.profile.transaction_id.map_or(true, |tx| tx == transaction_id))
        .collect()
}

#[async_trait]
impl MessageHandler for SmartChargingManager {
    async fn handle(&self, action: &str, payload: Value) -> HandlerResult {
        match action {
            "SetChargingProfile" => {
                let request: SetChargingProfileRequest = from_payload(payload)?;
                let status = self
                    .set_charging_profile(request)
                    .await
                    .map_err(|e| OcppError::internal(e.to_string()))?;
                to_payload(&SetChargingProfileResponse { status })
            }
            "ClearChargingProfile" => {
                let request: ClearChargingProfileRequest = from_payload(payload)?;
                let cleared = self
                    .clear(
                        request.id,
                        request.connector_id,
                        request.charging_profile_purpose,
                        request.stack_level,
                    )
                    .await
                    .map_err(|e| OcppError::internal(e.to_string()))?;
                let status = if cleared {
                    ClearChargingProfileStatus::Accepted
                } else {
                    ClearChargingProfileStatus::Unknown
                };
                to_payload(&ClearChargingProfileResponse { status })
            }
            "GetCompositeSchedule" => {
                let request: GetCompositeScheduleRequest = from_payload(payload)?;
                if !self.connectors.is_valid(request.connector_id) {
                    return to_payload(&GetCompositeScheduleResponse {
                        status: GetCompositeScheduleStatus::Rejected,
                        connector_id: None,
                        schedule_start: None,
                        charging_schedule: None,
                    });
                }
                let unit = request.charging_rate_unit.unwrap_or(ChargingRateUnit::A);
                let schedule = self
                    .get_composite_schedule(
                        request.connector_id,
                        i64::from(request.duration.max(0)),
                        unit,
                    )
                    .await
                    .map_err(|e| OcppError::internal(e.to_string()))?;
                to_payload(&GetCompositeScheduleResponse {
                    status: GetCompositeScheduleStatus::Accepted,
                    connector_id: Some(request.connector_id),
                    schedule_start: schedule.start_schedule,
                    charging_schedule: Some(schedule),
                })
            }
            _ => Err(OcppError::not_implemented(action)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OcppConfig;
    use crate::database::open_in_memory;
    use crate::types::{ChargingProfileKind, ChargingSchedulePeriod};

    fn profile(
        id: i32,
        stack_level: u32,
        purpose: ChargingProfilePurpose,
        transaction_id: Option<i32>,
    ) -> ChargingProfile {
        ChargingProfile {
            charging_profile_id: id,
            transaction_id,
            stack_level,
            charging_profile_purpose: purpose,
            charging_profile_kind: ChargingProfileKind::Relative,
            recurrency_kind: None,
            valid_from: None,
            valid_to: None,
            charging_schedule: crate::types::ChargingSchedule {
                duration: None,
                start_schedule: None,
                charging_rate_unit: ChargingRateUnit::A,
                charging_schedule_period: vec![ChargingSchedulePeriod {
                    start_period: 0,
                    limit: 16.0,
                    number_phases: Some(3),
                }],
                min_charging_rate: None,
            },
        }
    }

    async fn manager(db: sea_orm::DatabaseConnection) -> SmartChargingManager {
        let connectors = Arc::new(
            crate::chargepoint::connectors::ConnectorRegistry::open(db.clone(), 2)
                .await
                .unwrap(),
        );
        SmartChargingManager::open(
            230.0,
            Arc::new(OcppConfigStore::new(OcppConfig {
                max_charging_profiles_installed: 4,
                ..OcppConfig::default()
            })),
            db,
            connectors,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn pending_tx_profile_is_assigned_to_new_transaction() {
        let db = open_in_memory().await.unwrap();
        let mgr = manager(db).await;

        // template on connector 0, no transaction id
        assert!(mgr
            .install(0, profile(1, 2, ChargingProfilePurpose::TxProfile, None))
            .await
            .unwrap());
        mgr.assign_pending_tx_profiles(2, 777).await.unwrap();

        let store = mgr.store.lock().await;
        let installed = store.find_by_id(1).expect("profile still installed");
        assert_eq!(installed.connector_id, 2);
        assert_eq!(installed.profile.transaction_id, Some(777));
        // template on connector 0 consumed
        assert!(store
            .candidates(ChargingProfilePurpose::TxProfile, 0)
            .iter()
            .all(|p| p.connector_id != 0));
    }

    #[tokio::test]
    async fn install_replaces_same_connector_stack_purpose() {
        let db = open_in_memory().await.unwrap();
        let mgr = manager(db).await;

        assert!(mgr
            .install(1, profile(1, 3, ChargingProfilePurpose::TxDefaultProfile, None))
            .await
            .unwrap());
        assert!(mgr
            .install(1, profile(2, 3, ChargingProfilePurpose::TxDefaultProfile, None))
            .await
            .unwrap());

        let store = mgr.store.lock().await;
        assert!(store.find_by_id(1).is_none());
        assert!(store.find_by_id(2).is_some());
        assert_eq!(store.total(), 1);
    }

    #[tokio::test]
    async fn install_respects_capacity() {
        let db = open_in_memory().await.unwrap();
        let mgr = manager(db).await;
        for id in 1..=4 {
            assert!(mgr
                .install(
                    1,
                    profile(id, id as u32, ChargingProfilePurpose::TxDefaultProfile, None)
                )
                .await
                .unwrap());
        }
        assert!(!mgr
            .install(1, profile(5, 9, ChargingProfilePurpose::TxDefaultProfile, None))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn profiles_and_installation_order_survive_restart() {
        let db = open_in_memory().await.unwrap();
        {
            let mgr = manager(db.clone()).await;
            mgr.install(1, profile(1, 3, ChargingProfilePurpose::TxDefaultProfile, None))
                .await
                .unwrap();
            mgr.install(1, profile(2, 3, ChargingProfilePurpose::ChargePointMaxProfile, None))
                .await
                .unwrap();
        }
        let mgr = manager(db).await;
        let store = mgr.store.lock().await;
        assert_eq!(store.total(), 2);
        let first = store.find_by_id(1).unwrap();
        let second = store.find_by_id(2).unwrap();
        assert!(first.rank < second.rank, "installation order must persist");
    }

    #[tokio::test]
    async fn clear_by_criteria() {
        let db = open_in_memory().await.unwrap();
        let mgr = manager(db).await;
        mgr.install(0, profile(1, 1, ChargingProfilePurpose::ChargePointMaxProfile, None))
            .await
            .unwrap();
        mgr.install(1, profile(2, 1, ChargingProfilePurpose::TxDefaultProfile, None))
            .await
            .unwrap();

        // nothing matches
        assert!(!mgr.clear(Some(42), None, None, None).await.unwrap());
        // by id
        assert!(mgr.clear(Some(1), None, None, None).await.unwrap());
        // everything left
        assert!(mgr.clear(None, None, None, None).await.unwrap());
        assert!(mgr.store.lock().await.is_empty());
        // clearing an empty store reports nothing removed
        assert!(!mgr.clear(None, None, None, None).await.unwrap());
    }

    #[tokio::test]
    async fn composite_schedule_empty_without_profiles() {
        let db = open_in_memory().await.unwrap();
        let mgr = manager(db).await;
        let schedule = mgr
            .get_composite_schedule(1, 3600, ChargingRateUnit::A)
            .await
            .unwrap();
        assert_eq!(schedule.duration, Some(3600));
        assert!(schedule.charging_schedule_period.is_empty());
    }
}
