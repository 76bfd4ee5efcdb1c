//! In-memory installed-profile store
//!
//! Profiles are grouped by purpose. Each carries its installation rank
//! (the ascending database row id): when two profiles share a stack level,
//! the higher rank (most recently installed) wins.

use crate::types::{ChargingProfile, ChargingProfilePurpose};

#[derive(Debug, Clone)]
pub struct InstalledProfile {
    pub rank: i32,
    pub connector_id: u32,
    pub profile: ChargingProfile,
}

#[derive(Default)]
pub struct ProfileStore {
    chargepoint_max: Vec<InstalledProfile>,
    txdefault: Vec<InstalledProfile>,
    tx: Vec<InstalledProfile>,
}

impl ProfileStore {
    /// Rebuild the store from `(rank, connector_id, profile)` rows in
    /// installation order.
    pub fn load(rows: Vec<(i32, u32, ChargingProfile)>) -> Self {
        let mut store = Self::default();
        for (rank, connector_id, profile) in rows {
            store.push(InstalledProfile {
                rank,
                connector_id,
                profile,
            });
        }
        store
    }

    fn list(&self, purpose: ChargingProfilePurpose) -> &Vec<InstalledProfile> {
        match purpose {
            ChargingProfilePurpose::ChargePointMaxProfile => &self.chargepoint_max,
            ChargingProfilePurpose::TxDefaultProfile => &self.txdefault,
            ChargingProfilePurpose::TxProfile => &self.tx,
        }
    }

    fn list_mut(&mut self, purpose: ChargingProfilePurpose) -> &mut Vec<InstalledProfile> {
        match purpose {
            ChargingProfilePurpose::ChargePointMaxProfile => &mut self.chargepoint_max,
            ChargingProfilePurpose::TxDefaultProfile => &mut self.txdefault,
            ChargingProfilePurpose::TxProfile => &mut self.tx,
        }
    }

    pub fn total(&self) -> usize {
        self.chargepoint_max.len() + self.txdefault.len() + self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn push(&mut self, installed: InstalledProfile) {
        self.list_mut(installed.profile.charging_profile_purpose)
            .push(installed);
    }

    /// Profile sharing `(connector_id, stack_level)` within the purpose
    /// list, if any. Installing over it evicts it.
    pub fn conflicting_profile_id(
        &self,
        connector_id: u32,
        profile: &ChargingProfile,
    ) -> Option<i32> {
        self.list(profile.charging_profile_purpose)
            .iter()
            .find(|p| p.connector_id == connector_id && p.profile.stack_level == profile.stack_level)
            .map(|p| p.profile.charging_profile_id)
    }

    /// Look up a profile by its id, whatever its purpose.
    pub fn find_by_id(&self, profile_id: i32) -> Option<&InstalledProfile> {
        [&self.chargepoint_max, &self.txdefault, &self.tx]
            .into_iter()
            .flat_map(|list| list.iter())
            .find(|p| p.profile.charging_profile_id == profile_id)
    }

    /// Remove one profile by its id, whatever its purpose.
    pub fn remove_by_id(&mut self, profile_id: i32) -> bool {
        for list in [
            &mut self.chargepoint_max,
            &mut self.txdefault,
            &mut self.tx,
        ] {
            if let Some(index) = list
                .iter()
                .position(|p| p.profile.charging_profile_id == profile_id)
            {
                list.remove(index);
                return true;
            }
        }
        false
    }

    /// Ids of profiles matching the ClearChargingProfile criteria.
    pub fn matching_ids(
        &self,
        connector_id: Option<u32>,
        purpose: Option<ChargingProfilePurpose>,
        stack_level: Option<u32>,
    ) -> Vec<i32> {
        let lists: Vec<&Vec<InstalledProfile>> = match purpose {
            Some(purpose) => vec![self.list(purpose)],
            None => vec![&self.chargepoint_max, &self.txdefault, &self.tx],
        };
        let mut ids = Vec::new();
        for list in lists {
            for p in list {
                let match_connector = connector_id.map_or(true, |id| p.connector_id == id);
                let match_level = stack_level.map_or(true, |l| p.profile.stack_level == l);
                if match_connector && match_level {
                    ids.push(p.profile.charging_profile_id);
                }
            }
        }
        ids
    }

    /// Candidate profiles of one purpose relevant to `connector_id`,
    /// sorted by decreasing stack level then decreasing rank.
    /// For TxDefaultProfile, profiles installed on connector 0 apply to
    /// every connector.
    pub fn candidates(
        &self,
        purpose: ChargingProfilePurpose,
        connector_id: u32,
    ) -> Vec<InstalledProfile> {
        let mut candidates: Vec<InstalledProfile> = self
            .list(purpose)
            .iter()
            .filter(|p| match purpose {
                ChargingProfilePurpose::ChargePointMaxProfile => p.connector_id == 0,
                ChargingProfilePurpose::TxDefaultProfile => {
                    p.connector_id == connector_id || p.connector_id == 0
                }
                ChargingProfilePurpose::TxProfile => p.connector_id == connector_id,
            })
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            b.profile
                .stack_level
                .cmp(&a.profile.stack_level)
                .then(b.rank.cmp(&a.rank))
        });
        candidates
    }

    /// TxProfile templates without a transaction id applying to
    /// `connector_id` (directly or through connector 0).
    pub fn pending_tx_templates(&self, connector_id: u32) -> Vec<InstalledProfile> {
        self.tx
            .iter()
            .filter(|p| {
                (p.connector_id == 0 || p.connector_id == connector_id)
                    && p.profile.transaction_id.is_none()
            })
            .cloned()
            .collect()
    }

    /// Ids of TxProfiles bound to one transaction of one connector.
    pub fn tx_profiles_of(&self, connector_id: u32, transaction_id: i32) -> Vec<i32> {
        self.tx
            .iter()
            .filter(|p| {
                p.connector_id == connector_id
                    && p.profile.transaction_id == Some(transaction_id)
            })
            .map(|p| p.profile.charging_profile_id)
            .collect()
    }
}
