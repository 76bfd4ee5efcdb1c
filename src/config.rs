//! Configuration module
//!
//! Two configuration surfaces exist:
//!
//! - [`ChargePointConfig`]: stack-level settings that never travel over
//!   OCPP (connection URL, identity, database path, timeouts).
//! - [`OcppConfig`]: the OCPP standard configuration keys, readable and
//!   writable by the Central System through `GetConfiguration` /
//!   `ChangeConfiguration`.
//!
//! Loading these from a file is the host's concern; the stack only
//! consumes the structs.

use std::time::Duration;

/// Stack configuration
#[derive(Debug, Clone)]
pub struct ChargePointConfig {
    /// Base connection URL of the Central System (without the charge point
    /// identifier, e.g. `ws://cs.example.com/ocpp`)
    pub connexion_url: String,
    /// Charge point identifier, appended to the connection URL
    pub charge_point_identifier: String,
    /// Path to the SQLite database file
    pub database_path: String,
    /// Timeout applied to each outgoing call
    pub call_request_timeout: Duration,
    /// Interval between two connection attempts
    pub retry_interval: Duration,
    /// Charge point vendor reported in the BootNotification
    pub charge_point_vendor: String,
    /// Charge point model reported in the BootNotification
    pub charge_point_model: String,
    /// Optional serial number reported in the BootNotification
    pub charge_point_serial_number: Option<String>,
    /// Optional firmware version reported in the BootNotification
    pub firmware_version: Option<String>,
    /// Optional ICCID of the modem's SIM card
    pub iccid: Option<String>,
    /// Optional IMSI of the modem's SIM card
    pub imsi: Option<String>,
    /// Optional serial number of the energy meter
    pub meter_serial_number: Option<String>,
    /// Optional type of the energy meter
    pub meter_type: Option<String>,
    /// Nominal operating voltage, used for the A <-> W conversions of the
    /// smart charging engine
    pub operating_voltage: f64,
    /// Maximum number of entries in the authorization cache
    pub authent_cache_max_entries: u32,
    /// Maximum number of rows kept in the security events log
    pub security_log_max_entries: u32,
}

impl Default for ChargePointConfig {
    fn default() -> Self {
        Self {
            connexion_url: "ws://localhost:8080/ocpp".to_string(),
            charge_point_identifier: "CP".to_string(),
            database_path: "./ocpp_chargepoint.db".to_string(),
            call_request_timeout: Duration::from_secs(30),
            retry_interval: Duration::from_secs(5),
            charge_point_vendor: "OpenSource".to_string(),
            charge_point_model: "Simulator".to_string(),
            charge_point_serial_number: None,
            firmware_version: None,
            iccid: None,
            imsi: None,
            meter_serial_number: None,
            meter_type: None,
            operating_voltage: 230.0,
            authent_cache_max_entries: 100,
            security_log_max_entries: 100,
        }
    }
}

/// OCPP standard configuration keys
///
/// Field names follow the key names of the OCPP 1.6 specification; the
/// string key <-> field mapping lives in
/// [`OcppConfigStore`](crate::chargepoint::ocppconfig::OcppConfigStore).
#[derive(Debug, Clone)]
pub struct OcppConfig {
    // Core profile
    pub allow_offline_tx_for_unknown_id: bool,
    pub authorization_cache_enabled: bool,
    pub authorize_remote_tx_requests: bool,
    pub clock_aligned_data_interval: u32,
    pub connection_time_out: u32,
    pub get_configuration_max_keys: u32,
    pub heartbeat_interval: u32,
    pub local_authorize_offline: bool,
    pub local_pre_authorize: bool,
    pub meter_values_aligned_data: String,
    pub meter_values_sampled_data: String,
    pub meter_value_sample_interval: u32,
    pub minimum_status_duration: u32,
    pub number_of_connectors: u32,
    pub reset_retries: u32,
    pub stop_transaction_on_ev_side_disconnect: bool,
    pub stop_transaction_on_invalid_id: bool,
    pub stop_txn_aligned_data: String,
    pub stop_txn_aligned_data_max_length: u32,
    pub stop_txn_sampled_data: String,
    pub stop_txn_sampled_data_max_length: u32,
    pub transaction_message_attempts: u32,
    pub transaction_message_retry_interval: u32,
    pub unlock_connector_on_ev_side_disconnect: bool,

    // Local authorization list profile
    pub local_auth_list_enabled: bool,
    pub local_auth_list_max_length: u32,
    pub send_local_list_max_length: u32,

    // Reservation profile
    pub reserve_connector_zero_supported: bool,

    // Smart charging profile
    pub charge_profile_max_stack_level: u32,
    pub charging_schedule_allowed_charging_rate_unit: String,
    pub charging_schedule_max_periods: u32,
    pub max_charging_profiles_installed: u32,

    // Security extensions
    pub authorization_key: String,
    pub security_profile: u32,
    pub cpo_name: String,
}

impl Default for OcppConfig {
    fn default() -> Self {
        Self {
            allow_offline_tx_for_unknown_id: false,
            authorization_cache_enabled: true,
            authorize_remote_tx_requests: false,
            clock_aligned_data_interval: 0,
            connection_time_out: 60,
            get_configuration_max_keys: 50,
            heartbeat_interval: 60,
            local_authorize_offline: true,
            local_pre_authorize: true,
            meter_values_aligned_data: String::new(),
            meter_values_sampled_data: "Energy.Active.Import.Register".to_string(),
            meter_value_sample_interval: 0,
            minimum_status_duration: 0,
            number_of_connectors: 1,
            reset_retries: 1,
            stop_transaction_on_ev_side_disconnect: true,
            stop_transaction_on_invalid_id: true,
            stop_txn_aligned_data: String::new(),
            stop_txn_aligned_data_max_length: 20,
            stop_txn_sampled_data: String::new(),
            stop_txn_sampled_data_max_length: 20,
            transaction_message_attempts: 5,
            transaction_message_retry_interval: 10,
            unlock_connector_on_ev_side_disconnect: true,
            local_auth_list_enabled: true,
            local_auth_list_max_length: 100,
            send_local_list_max_length: 20,
            reserve_connector_zero_supported: false,
            charge_profile_max_stack_level: 10,
            charging_schedule_allowed_charging_rate_unit: "Current,Power".to_string(),
            charging_schedule_max_periods: 10,
            max_charging_profiles_installed: 10,
            authorization_key: String::new(),
            security_profile: 0,
            cpo_name: String::new(),
        }
    }
}
