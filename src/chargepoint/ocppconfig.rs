//! OCPP configuration store and GetConfiguration / ChangeConfiguration
//! handling
//!
//! The store holds the [`OcppConfig`] struct and maps the OCPP key strings
//! onto its fields. Components may attach per-key check functions (vetoing
//! a change) and change listeners (reacting to an accepted change).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::OcppConfig;
use crate::messages::{
    ChangeConfigurationRequest, ChangeConfigurationResponse, GetConfigurationRequest,
    GetConfigurationResponse, KeyValue,
};
use crate::rpc::{from_payload, to_payload, HandlerResult, MessageHandler, OcppError};
use crate::types::ConfigurationStatus;

/// Reacts to an accepted configuration change.
pub trait ConfigChangedListener: Send + Sync {
    fn configuration_value_changed(&self, key: &str);
}

type CheckFn = Box<dyn Fn(&str, &str) -> ConfigurationStatus + Send + Sync>;

/// All known keys with their read-only flag.
const KEYS: &[(&str, bool)] = &[
    ("AllowOfflineTxForUnknownId", false),
    ("AuthorizationCacheEnabled", false),
    ("AuthorizeRemoteTxRequests", false),
    ("ClockAlignedDataInterval", false),
    ("ConnectionTimeOut", false),
    ("GetConfigurationMaxKeys", true),
    ("HeartbeatInterval", false),
    ("LocalAuthorizeOffline", false),
    ("LocalPreAuthorize", false),
    ("MeterValuesAlignedData", false),
    ("MeterValuesSampledData", false),
    ("MeterValueSampleInterval", false),
    ("MinimumStatusDuration", false),
    ("NumberOfConnectors", true),
    ("ResetRetries", false),
    ("StopTransactionOnEVSideDisconnect", false),
    ("StopTransactionOnInvalidId", false),
    ("StopTxnAlignedData", false),
    ("StopTxnAlignedDataMaxLength", true),
    ("StopTxnSampledData", false),
    ("StopTxnSampledDataMaxLength", true),
    ("TransactionMessageAttempts", false),
    ("TransactionMessageRetryInterval", false),
    ("UnlockConnectorOnEVSideDisconnect", false),
    ("LocalAuthListEnabled", false),
    ("LocalAuthListMaxLength", true),
    ("SendLocalListMaxLength", true),
    ("ReserveConnectorZeroSupported", true),
    ("ChargeProfileMaxStackLevel", true),
    ("ChargingScheduleAllowedChargingRateUnit", true),
    ("ChargingScheduleMaxPeriods", true),
    ("MaxChargingProfilesInstalled", true),
    ("AuthorizationKey", false),
    ("SecurityProfile", false),
    ("CpoName", false),
];

/// Outcome of a key write.
enum SetOutcome {
    Changed,
    UnknownKey,
    ReadOnly,
    InvalidValue,
}

pub struct OcppConfigStore {
    config: RwLock<OcppConfig>,
    checks: Mutex<HashMap<String, CheckFn>>,
    listeners: Mutex<HashMap<String, Vec<Arc<dyn ConfigChangedListener>>>>,
}

impl OcppConfigStore {
    pub fn new(config: OcppConfig) -> Self {
        Self {
            config: RwLock::new(config),
            checks: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Current configuration values.
    pub fn snapshot(&self) -> OcppConfig {
        self.config.read().unwrap().clone()
    }

    /// Attach a check function vetoing changes of `key`.
    pub fn register_check(
        &self,
        key: &str,
        check: impl Fn(&str, &str) -> ConfigurationStatus + Send + Sync + 'static,
    ) {
        self.checks
            .lock()
            .unwrap()
            .insert(key.to_string(), Box::new(check));
    }

    /// Attach a listener notified after an accepted change of `key`.
    pub fn register_listener(&self, key: &str, listener: Arc<dyn ConfigChangedListener>) {
        self.listeners
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push(listener);
    }

    fn is_known(key: &str) -> bool {
        KEYS.iter().any(|(name, _)| *name == key)
    }

    fn is_readonly(key: &str) -> bool {
        KEYS.iter().any(|(name, readonly)| *name == key && *readonly)
    }

    /// Read one key in its string form.
    pub fn get_value(&self, key: &str) -> Option<String> {
        let c = self.config.read().unwrap();
        let value = match key {
            "AllowOfflineTxForUnknownId" => c.allow_offline_tx_for_unknown_id.to_string(),
            "AuthorizationCacheEnabled" => c.authorization_cache_enabled.to_string(),
            "AuthorizeRemoteTxRequests" => c.authorize_remote_tx_requests.to_string(),
            "ClockAlignedDataInterval" => c.clock_aligned_data_interval.to_string(),
            "ConnectionTimeOut" => c.connection_time_out.to_string(),
            "GetConfigurationMaxKeys" => c.get_configuration_max_keys.to_string(),
            "HeartbeatInterval" => c.heartbeat_interval.to_string(),
            "LocalAuthorizeOffline" => c.local_authorize_offline.to_string(),
            "LocalPreAuthorize" => c.local_pre_authorize.to_string(),
            "MeterValuesAlignedData" => c.meter_values_aligned_data.clone(),
            "MeterValuesSampledData" => c.meter_values_sampled_data.clone(),
            "MeterValueSampleInterval" => c.meter_value_sample_interval.to_string(),
            "MinimumStatusDuration" => c.minimum_status_duration.to_string(),
            "NumberOfConnectors" => c.number_of_connectors.to_string(),
            "ResetRetries" => c.reset_retries.to_string(),
            "StopTransactionOnEVSideDisconnect" => {
                c.stop_transaction_on_ev_side_disconnect.to_string()
            }
            "StopTransactionOnInvalidId" => c.stop_transaction_on_invalid_id.to_string(),
            "StopTxnAlignedData" => c.stop_txn_aligned_data.clone(),
            "StopTxnAlignedDataMaxLength" => c.stop_txn_aligned_data_max_length.to_string(),
            "StopTxnSampledData" => c.stop_txn_sampled_data.clone(),
            "StopTxnSampledDataMaxLength" => c.stop_txn_sampled_data_max_length.to_string(),
            "TransactionMessageAttempts" => c.transaction_message_attempts.to_string(),
            "TransactionMessageRetryInterval" => c.transaction_message_retry_interval.to_string(),
            "UnlockConnectorOnEVSideDisconnect" => {
                c.unlock_connector_on_ev_side_disconnect.to_string()
            }
            "LocalAuthListEnabled" => c.local_auth_list_enabled.to_string(),
            "LocalAuthListMaxLength" => c.local_auth_list_max_length.to_string(),
            "SendLocalListMaxLength" => c.send_local_list_max_length.to_string(),
            "ReserveConnectorZeroSupported" => c.reserve_connector_zero_supported.to_string(),
            "ChargeProfileMaxStackLevel" => c.charge_profile_max_stack_level.to_string(),
            "ChargingScheduleAllowedChargingRateUnit" => {
                c.charging_schedule_allowed_charging_rate_unit.clone()
            }
            "ChargingScheduleMaxPeriods" => c.charging_schedule_max_periods.to_string(),
            "MaxChargingProfilesInstalled" => c.max_charging_profiles_installed.to_string(),
            "AuthorizationKey" => c.authorization_key.clone(),
            "SecurityProfile" => c.security_profile.to_string(),
            "CpoName" => c.cpo_name.clone(),
            _ => return None,
        };
        Some(value)
    }

    fn set_value(&self, key: &str, value: &str) -> SetOutcome {
        if !Self::is_known(key) {
            return SetOutcome::UnknownKey;
        }
        if Self::is_readonly(key) {
            return SetOutcome::ReadOnly;
        }

        let mut c = self.config.write().unwrap();
        let applied = match key {
            "AllowOfflineTxForUnknownId" => parse_into(value, &mut c.allow_offline_tx_for_unknown_id),
            "AuthorizationCacheEnabled" => parse_into(value, &mut c.authorization_cache_enabled),
            "AuthorizeRemoteTxRequests" => parse_into(value, &mut c.authorize_remote_tx_requests),
            "ClockAlignedDataInterval" => parse_into(value, &mut c.clock_aligned_data_interval),
            "ConnectionTimeOut" => parse_into(value, &mut c.connection_time_out),
            "HeartbeatInterval" => parse_into(value, &mut c.heartbeat_interval),
            "LocalAuthorizeOffline" => parse_into(value, &mut c.local_authorize_offline),
            "LocalPreAuthorize" => parse_into(value, &mut c.local_pre_authorize),
            "MeterValuesAlignedData" => {
                c.meter_values_aligned_data = value.to_string();
                true
            }
            "MeterValuesSampledData" => {
                c.meter_values_sampled_data = value.to_string();
                true
            }
            "MeterValueSampleInterval" => parse_into(value, &mut c.meter_value_sample_interval),
            "MinimumStatusDuration" => parse_into(value, &mut c.minimum_status_duration),
            "ResetRetries" => parse_into(value, &mut c.reset_retries),
            "StopTransactionOnEVSideDisconnect" => {
                parse_into(value, &mut c.stop_transaction_on_ev_side_disconnect)
            }
            "StopTransactionOnInvalidId" => parse_into(value, &mut c.stop_transaction_on_invalid_id),
            "StopTxnAlignedData" => {
                c.stop_txn_aligned_data = value.to_string();
                true
            }
            "StopTxnSampledData" => {
                c.stop_txn_sampled_data = value.to_string();
                true
            }
            "TransactionMessageAttempts" => parse_into(value, &mut c.transaction_message_attempts),
            "TransactionMessageRetryInterval" => {
                parse_into(value, &mut c.transaction_message_retry_interval)
            }
            "UnlockConnectorOnEVSideDisconnect" => {
                parse_into(value, &mut c.unlock_connector_on_ev_side_disconnect)
            }
            "LocalAuthListEnabled" => parse_into(value, &mut c.local_auth_list_enabled),
            "AuthorizationKey" => {
                c.authorization_key = value.to_string();
                true
            }
            "SecurityProfile" => parse_into(value, &mut c.security_profile),
            "CpoName" => {
                c.cpo_name = value.to_string();
                true
            }
            _ => false,
        };

        if applied {
            SetOutcome::Changed
        } else {
            SetOutcome::InvalidValue
        }
    }

    /// Apply a change request: check functions first, then the write, then
    /// the listeners.
    pub fn change_value(&self, key: &str, value: &str) -> ConfigurationStatus {
        if let Some(check) = self.checks.lock().unwrap().get(key) {
            let verdict = check(key, value);
            if verdict != ConfigurationStatus::Accepted {
                warn!(key, value, status = %verdict, "Configuration change vetoed");
                return verdict;
            }
        }

        match self.set_value(key, value) {
            SetOutcome::Changed => {
                info!(key, value, "Configuration changed");
                let listeners = self.listeners.lock().unwrap();
                if let Some(attached) = listeners.get(key) {
                    for listener in attached {
                        listener.configuration_value_changed(key);
                    }
                }
                ConfigurationStatus::Accepted
            }
            SetOutcome::UnknownKey => ConfigurationStatus::NotSupported,
            SetOutcome::ReadOnly | SetOutcome::InvalidValue => ConfigurationStatus::Rejected,
        }
    }
}

impl OcppConfigStore {
    /// Detach every check function and listener. Called on stack shutdown
    /// so their captured manager handles do not outlive the stack.
    pub fn clear_hooks(&self) {
        self.checks.lock().unwrap().clear();
        self.listeners.lock().unwrap().clear();
    }
}

fn parse_into<T: std::str::FromStr>(value: &str, slot: &mut T) -> bool {
    match value.parse() {
        Ok(parsed) => {
            *slot = parsed;
            true
        }
        Err(_) => false,
    }
}

/// Handler for the configuration actions.
pub struct ConfigManager {
    store: Arc<OcppConfigStore>,
}

impl ConfigManager {
    pub fn new(store: Arc<OcppConfigStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MessageHandler for ConfigManager {
    async fn handle(&self, action: &str, payload: Value) -> HandlerResult {
        match action {
            "GetConfiguration" => {
                let request: GetConfigurationRequest = from_payload(payload)?;
                let requested: Vec<String> = match request.key {
                    Some(keys) => keys,
                    None => KEYS.iter().map(|(name, _)| name.to_string()).collect(),
                };

                let mut known = Vec::new();
                let mut unknown = Vec::new();
                for key in requested {
                    match self.store.get_value(&key) {
                        Some(value) => known.push(KeyValue {
                            readonly: OcppConfigStore::is_readonly(&key),
                            key,
                            value: Some(value),
                        }),
                        None => unknown.push(key),
                    }
                }

                to_payload(&GetConfigurationResponse {
                    configuration_key: Some(known),
                    unknown_key: if unknown.is_empty() {
                        None
                    } else {
                        Some(unknown)
                    },
                })
            }
            "ChangeConfiguration" => {
                let request: ChangeConfigurationRequest = from_payload(payload)?;
                let status = self.store.change_value(&request.key, &request.value);
                to_payload(&ChangeConfigurationResponse { status })
            }
            _ => Err(OcppError::not_implemented(action)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_and_write_keys() {
        let store = OcppConfigStore::new(OcppConfig::default());
        assert_eq!(store.get_value("HeartbeatInterval").unwrap(), "60");
        assert_eq!(
            store.change_value("HeartbeatInterval", "300"),
            ConfigurationStatus::Accepted
        );
        assert_eq!(store.snapshot().heartbeat_interval, 300);
    }

    #[test]
    fn readonly_and_unknown_keys_are_rejected() {
        let store = OcppConfigStore::new(OcppConfig::default());
        assert_eq!(
            store.change_value("NumberOfConnectors", "4"),
            ConfigurationStatus::Rejected
        );
        assert_eq!(
            store.change_value("NoSuchKey", "1"),
            ConfigurationStatus::NotSupported
        );
        assert_eq!(
            store.change_value("HeartbeatInterval", "not-a-number"),
            ConfigurationStatus::Rejected
        );
    }

    #[test]
    fn check_function_can_veto() {
        let store = OcppConfigStore::new(OcppConfig::default());
        store.register_check("SecurityProfile", |_, _| ConfigurationStatus::Rejected);
        assert_eq!(
            store.change_value("SecurityProfile", "2"),
            ConfigurationStatus::Rejected
        );
        assert_eq!(store.snapshot().security_profile, 0);
    }
}
