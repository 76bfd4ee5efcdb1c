//! Charge point orchestrator
//!
//! [`ChargePoint`] composes the managers in dependency order, owns the
//! start/stop lifecycle and exposes the host API. While stopped, only
//! [`ChargePoint::reset_data`] and [`ChargePoint::reset_connector_data`]
//! are available.

pub mod authent;
pub mod connectors;
pub mod datatransfer;
pub mod events;
pub mod fifo;
pub mod maintenance;
pub mod metervalues;
pub mod ocppconfig;
pub mod reservation;
pub mod security;
pub mod smartcharging;
pub mod status;
pub mod transaction;
pub mod trigger;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{ChargePointConfig, OcppConfig};
use crate::database::repositories::{
    AuthentCacheRepository, CaCertificateRepository, CpCertificateRepository,
    InternalConfigRepository, LocalListRepository, MeterValuesTxRepository,
    RequestFifoRepository, SecurityLogsRepository,
};
use crate::database::open_database;
use crate::messages::{
    ChangeAvailabilityRequest, ChangeAvailabilityResponse, ResetRequest, ResetResponse,
    UnlockConnectorRequest, UnlockConnectorResponse,
};
use crate::rpc::{
    from_payload, to_payload, Credentials, HandlerResult, MessageDispatcher, MessageHandler,
    MessageSender, OcppError, RpcClient, RpcListener,
};
use crate::support::errors::{ChargePointError, ChargePointResult};
use crate::types::{
    AuthorizationStatus, AvailabilityStatus, AvailabilityType, ChargePointErrorCode,
    ChargePointStatus, ChargingRateUnit, DataTransferStatus, MessageTrigger,
    MessageTriggerExtended, MeterValue, Reason, RegistrationStatus, ResetStatus,
    SignedFirmwareStatus, UnlockStatus,
};

use authent::AuthentManager;
use connectors::{ConnectorRegistry, CONNECTOR_ID_CHARGE_POINT};
use datatransfer::DataTransferManager;
pub use events::ChargePointEventsHandler;
use fifo::RequestFifo;
use maintenance::MaintenanceManager;
use metervalues::MeterValuesManager;
use ocppconfig::{ConfigChangedListener, ConfigManager, OcppConfigStore};
use reservation::ReservationManager;
use security::SecurityManager;
use smartcharging::SmartChargingManager;
pub use smartcharging::SmartChargingSetpoint;
use status::{StatusManager, LAST_REGISTRATION_STATUS_KEY};
use transaction::TransactionManager;
use trigger::TriggerMessageManager;

const STACK_VERSION_KEY: &str = "StackVersion";
const START_DATE_KEY: &str = "StartDate";
const UPTIME_KEY: &str = "Uptime";
const DISCONNECTED_TIME_KEY: &str = "DisconnectedTime";
const TOTAL_UPTIME_KEY: &str = "TotalUptime";
const TOTAL_DISCONNECTED_TIME_KEY: &str = "TotalDisconnectedTime";
const LAST_CONNECTION_URL_KEY: &str = "LastConnectionUrl";

const STACK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything that exists only while the stack is started.
struct Stack {
    config: ChargePointConfig,
    ocpp_config: Arc<OcppConfigStore>,
    db: DatabaseConnection,
    dispatcher: Arc<MessageDispatcher>,
    rpc: Arc<RpcClient>,
    connectors: Arc<ConnectorRegistry>,
    internal_config: InternalConfigRepository,
    status: Arc<StatusManager>,
    authent: Arc<AuthentManager>,
    reservation: Arc<ReservationManager>,
    smart_charging: Arc<SmartChargingManager>,
    meter_values: Arc<MeterValuesManager>,
    transactions: Arc<TransactionManager>,
    data_transfer: Arc<DataTransferManager>,
    maintenance: Arc<MaintenanceManager>,
    security: Arc<SecurityManager>,
    uptime_task: Mutex<Option<JoinHandle<()>>>,
    uptime: AtomicU64,
    disconnected_time: AtomicU64,
    total_uptime: AtomicU64,
    total_disconnected_time: AtomicU64,
}

impl Stack {
    /// Build the connection URL, reset the registration latch if it
    /// changed since last boot, and start the connection process.
    async fn connect(&self) -> ChargePointResult<()> {
        let cfg = self.ocpp_config.snapshot();

        let mut url = self.config.connexion_url.clone();
        if !url.ends_with('/') {
            url.push('/');
        }
        url.push_str(&self.config.charge_point_identifier);
        if cfg.security_profile >= 2 {
            url = url.replacen("ws://", "wss://", 1);
        }

        let last_url = self.internal_config.get_key(LAST_CONNECTION_URL_KEY).await?;
        if last_url.as_deref() != Some(url.as_str()) {
            info!(url = url.as_str(), "Connection URL changed, resetting registration status");
            self.internal_config
                .set_key(LAST_CONNECTION_URL_KEY, &url)
                .await?;
            self.internal_config
                .set_key(
                    LAST_REGISTRATION_STATUS_KEY,
                    &RegistrationStatus::Rejected.to_string(),
                )
                .await?;
        }

        let credentials = if !cfg.authorization_key.is_empty() && cfg.security_profile <= 2 {
            Credentials {
                user: Some(self.config.charge_point_identifier.clone()),
                password: Some(cfg.authorization_key.clone()),
            }
        } else {
            Credentials::default()
        };

        self.rpc.start(url, credentials);
        Ok(())
    }

    async fn save_uptime(&self) {
        let pairs = [
            (UPTIME_KEY, self.uptime.load(Ordering::SeqCst)),
            (
                DISCONNECTED_TIME_KEY,
                self.disconnected_time.load(Ordering::SeqCst),
            ),
            (TOTAL_UPTIME_KEY, self.total_uptime.load(Ordering::SeqCst)),
            (
                TOTAL_DISCONNECTED_TIME_KEY,
                self.total_disconnected_time.load(Ordering::SeqCst),
            ),
        ];
        for (key, value) in pairs {
            if let Err(e) = self.internal_config.set_key(key, &value.to_string()).await {
                error!(key, "Could not save uptime counter: {e}");
            }
        }
    }
}

/// Fan-out of the transport connection events.
struct LinkMonitor {
    events: Arc<dyn ChargePointEventsHandler>,
    status: Arc<StatusManager>,
    transactions: Arc<TransactionManager>,
    internal_config: InternalConfigRepository,
}

impl RpcListener for LinkMonitor {
    fn on_connected(&self) {
        info!("Connected to Central System");
        self.status.update_connection_status(true);
        self.transactions.update_connection_status(true);
        self.events.connection_state_changed(true);
    }

    fn on_disconnected(&self) {
        warn!("Connection lost with Central System");
        self.status.update_connection_status(false);
        self.transactions.update_connection_status(false);
        self.events.connection_state_changed(false);
    }

    fn on_failed(&self) {
        warn!("Connection failed with Central System");
        let status = Arc::clone(&self.status);
        let events = Arc::clone(&self.events);
        let internal_config = self.internal_config.clone();
        tokio::spawn(async move {
            // Offline latch: a previously accepted charge point keeps its
            // host operations while disconnected
            let last_status = internal_config
                .get_key(LAST_REGISTRATION_STATUS_KEY)
                .await
                .ok()
                .flatten()
                .and_then(|value| value.parse().ok())
                .unwrap_or(RegistrationStatus::Rejected);
            if last_status == RegistrationStatus::Accepted {
                info!("Last registration status was accepted, offline actions are allowed");
                status.force_registration_status(RegistrationStatus::Accepted);
            }
            events.connection_failed(last_status);
        });
    }

    fn on_error(&self) {
        self.events.connection_state_changed(false);
    }
}

/// Reconnect with the new credentials after an AuthorizationKey change
/// (profile 3 authenticates with the client certificate instead).
struct AuthorizationKeyListener {
    stack: Weak<Stack>,
}

impl ConfigChangedListener for AuthorizationKeyListener {
    fn configuration_value_changed(&self, _key: &str) {
        let Some(stack) = self.stack.upgrade() else {
            return;
        };
        if stack.ocpp_config.snapshot().security_profile == 3 {
            return;
        }
        info!("AuthorizationKey modified, reconnecting with new credentials");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            if let Err(e) = stack.connect().await {
                error!("Reconnection failed: {e}");
            }
        });
    }
}

/// Handler for the core actions owned by the orchestrator: Reset,
/// ChangeAvailability, UnlockConnector.
struct CoreActionsHandler {
    ocpp_config: Arc<OcppConfigStore>,
    events: Arc<dyn ChargePointEventsHandler>,
    connectors: Arc<ConnectorRegistry>,
    status: Arc<StatusManager>,
    transactions: Arc<TransactionManager>,
}

impl CoreActionsHandler {
    async fn stop_all_transactions(&self, reason: Reason) {
        for connector_id in self.connectors.connector_ids() {
            let Some(connector) = self.connectors.connector(connector_id) else {
                continue;
            };
            let running = connector.lock().await.has_transaction();
            if running {
                if let Err(e) = self
                    .transactions
                    .stop_transaction(connector_id, "", reason)
                    .await
                {
                    error!(connector_id, "Could not stop transaction: {e}");
                }
            }
        }
    }
}

#[async_trait]
impl MessageHandler for CoreActionsHandler {
    async fn handle(&self, action: &str, payload: Value) -> HandlerResult {
        match action {
            "Reset" => {
                let request: ResetRequest = from_payload(payload)?;
                let accepted = self.events.reset_requested(request.kind).await;
                if accepted {
                    let reason = match request.kind {
                        crate::types::ResetType::Hard => Reason::HardReset,
                        crate::types::ResetType::Soft => Reason::SoftReset,
                    };
                    self.stop_all_transactions(reason).await;
                }
                let status = if accepted {
                    ResetStatus::Accepted
                } else {
                    ResetStatus::Rejected
                };
                to_payload(&ResetResponse { status })
            }
            "ChangeAvailability" => {
                let request: ChangeAvailabilityRequest = from_payload(payload)?;
                if !self.connectors.is_valid(request.connector_id) {
                    return Err(OcppError::property_constraint("Unknown connector id"));
                }
                let ids = if request.connector_id == CONNECTOR_ID_CHARGE_POINT {
                    self.connectors.connector_ids()
                } else {
                    vec![request.connector_id]
                };

                let mut scheduled = false;
                for id in &ids {
                    if let Some(connector) = self.connectors.connector(*id) {
                        if connector.lock().await.has_transaction() {
                            scheduled = true;
                        }
                    }
                }
                if scheduled {
                    // Applied once the running transactions terminate;
                    // the host is expected to re-issue the change
                    return to_payload(&ChangeAvailabilityResponse {
                        status: AvailabilityStatus::Scheduled,
                    });
                }

                if !self
                    .events
                    .availability_change_requested(request.connector_id, request.kind)
                    .await
                {
                    return to_payload(&ChangeAvailabilityResponse {
                        status: AvailabilityStatus::Rejected,
                    });
                }

                let new_status = match request.kind {
                    AvailabilityType::Inoperative => ChargePointStatus::Unavailable,
                    AvailabilityType::Operative => ChargePointStatus::Available,
                };
                for id in ids {
                    self.status
                        .update_connector_status(
                            id,
                            new_status,
                            ChargePointErrorCode::NoError,
                            "",
                            "",
                            "",
                        )
                        .await;
                }
                to_payload(&ChangeAvailabilityResponse {
                    status: AvailabilityStatus::Accepted,
                })
            }
            "UnlockConnector" => {
                let request: UnlockConnectorRequest = from_payload(payload)?;
                if request.connector_id == CONNECTOR_ID_CHARGE_POINT
                    || !self.connectors.is_valid(request.connector_id)
                {
                    return to_payload(&UnlockConnectorResponse {
                        status: UnlockStatus::UnlockFailed,
                    });
                }
                let running = match self.connectors.connector(request.connector_id) {
                    Some(connector) => connector.lock().await.has_transaction(),
                    None => false,
                };
                if running && self.ocpp_config.snapshot().stop_transaction_on_ev_side_disconnect {
                    if let Err(e) = self
                        .transactions
                        .stop_transaction(request.connector_id, "", Reason::UnlockCommand)
                        .await
                    {
                        error!("Could not stop transaction before unlock: {e}");
                    }
                }
                let status = self
                    .events
                    .unlock_connector_requested(request.connector_id)
                    .await;
                to_payload(&UnlockConnectorResponse { status })
            }
            _ => Err(OcppError::not_implemented(action)),
        }
    }
}

/// The OCPP 1.6 charge point stack.
pub struct ChargePoint {
    config: ChargePointConfig,
    ocpp_config: Arc<OcppConfigStore>,
    events: Arc<dyn ChargePointEventsHandler>,
    stack: tokio::sync::Mutex<Option<Arc<Stack>>>,
}

impl ChargePoint {
    pub fn new(
        config: ChargePointConfig,
        ocpp_config: OcppConfig,
        events: Arc<dyn ChargePointEventsHandler>,
    ) -> Self {
        Self {
            config,
            ocpp_config: Arc::new(OcppConfigStore::new(ocpp_config)),
            events,
            stack: tokio::sync::Mutex::new(None),
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// Open the store, build the managers, register the Central System
    /// message handlers and start the connection process.
    pub async fn start(&self) -> ChargePointResult<()> {
        let mut guard = self.stack.lock().await;
        if guard.is_some() {
            error!("Stack already started");
            return Err(ChargePointError::AlreadyStarted);
        }
        info!(
            version = STACK_VERSION,
            url = self.config.connexion_url.as_str(),
            identifier = self.config.charge_point_identifier.as_str(),
            "Starting OCPP stack"
        );

        let db = open_database(&self.config.database_path).await?;
        let internal_config = InternalConfigRepository::new(db.clone());
        init_internal_config(&internal_config).await?;

        let total_uptime = read_counter(&internal_config, TOTAL_UPTIME_KEY).await;
        let total_disconnected = read_counter(&internal_config, TOTAL_DISCONNECTED_TIME_KEY).await;

        let cfg = self.ocpp_config.snapshot();
        let connectors =
            Arc::new(ConnectorRegistry::open(db.clone(), cfg.number_of_connectors).await?);

        let dispatcher = Arc::new(MessageDispatcher::new());
        let rpc = Arc::new(RpcClient::new(
            Arc::clone(&dispatcher),
            self.config.call_request_timeout,
            self.config.retry_interval,
        ));
        let sender = Arc::new(MessageSender::new(Arc::clone(&rpc)));

        let status = StatusManager::new(
            self.config.clone(),
            Arc::clone(&self.ocpp_config),
            Arc::clone(&self.events),
            Arc::clone(&connectors),
            Arc::clone(&sender),
            internal_config.clone(),
        );
        rpc.register_spy(status.clone());

        let authent = Arc::new(
            AuthentManager::open(
                self.config.authent_cache_max_entries,
                Arc::clone(&self.ocpp_config),
                Arc::clone(&sender),
                AuthentCacheRepository::new(db.clone()),
                LocalListRepository::new(db.clone()),
                internal_config.clone(),
            )
            .await?,
        );
        let reservation = ReservationManager::new(
            Arc::clone(&self.ocpp_config),
            Arc::clone(&self.events),
            Arc::clone(&connectors),
            Arc::clone(&status),
            Arc::clone(&authent),
        );
        let smart_charging = Arc::new(
            SmartChargingManager::open(
                self.config.operating_voltage,
                Arc::clone(&self.ocpp_config),
                db.clone(),
                Arc::clone(&connectors),
            )
            .await?,
        );
        let request_fifo = Arc::new(RequestFifo::new(RequestFifoRepository::new(db.clone())));
        let meter_values = MeterValuesManager::new(
            Arc::clone(&self.ocpp_config),
            Arc::clone(&self.events),
            Arc::clone(&sender),
            Arc::clone(&connectors),
            MeterValuesTxRepository::new(db.clone()),
            Arc::clone(&request_fifo),
        );
        let transactions = TransactionManager::open(
            Arc::clone(&self.ocpp_config),
            Arc::clone(&self.events),
            Arc::clone(&connectors),
            Arc::clone(&sender),
            Arc::clone(&request_fifo),
            Arc::clone(&status),
            Arc::clone(&authent),
            Arc::clone(&reservation),
            Arc::clone(&meter_values),
            Arc::clone(&smart_charging),
        )
        .await;
        let data_transfer = Arc::new(DataTransferManager::new(
            Arc::clone(&self.events),
            Arc::clone(&sender),
        ));
        let maintenance = MaintenanceManager::new(Arc::clone(&self.events), Arc::clone(&sender));
        let security = SecurityManager::open(
            self.config.security_log_max_entries,
            Arc::clone(&self.ocpp_config),
            Arc::clone(&self.events),
            Arc::clone(&sender),
            SecurityLogsRepository::new(db.clone()),
            CaCertificateRepository::new(db.clone()),
            CpCertificateRepository::new(db.clone()),
        )
        .await?;
        let trigger = Arc::new(TriggerMessageManager::new(Arc::clone(&connectors)));
        let config_manager = Arc::new(ConfigManager::new(Arc::clone(&self.ocpp_config)));
        let core_actions = Arc::new(CoreActionsHandler {
            ocpp_config: Arc::clone(&self.ocpp_config),
            events: Arc::clone(&self.events),
            connectors: Arc::clone(&connectors),
            status: Arc::clone(&status),
            transactions: Arc::clone(&transactions),
        });

        // Central System initiated actions
        let registrations: [(&str, Arc<dyn MessageHandler>); 22] = [
            ("GetConfiguration", config_manager.clone()),
            ("ChangeConfiguration", config_manager),
            ("ClearCache", authent.clone()),
            ("GetLocalListVersion", authent.clone()),
            ("SendLocalList", authent.clone()),
            ("ReserveNow", reservation.clone()),
            ("CancelReservation", reservation.clone()),
            ("SetChargingProfile", smart_charging.clone()),
            ("ClearChargingProfile", smart_charging.clone()),
            ("GetCompositeSchedule", smart_charging.clone()),
            ("RemoteStartTransaction", transactions.clone()),
            ("RemoteStopTransaction", transactions.clone()),
            ("DataTransfer", data_transfer.clone()),
            ("TriggerMessage", trigger.clone()),
            ("ExtendedTriggerMessage", trigger.clone()),
            ("GetDiagnostics", maintenance.clone()),
            ("GetLog", maintenance.clone()),
            ("UpdateFirmware", maintenance.clone()),
            ("SignedUpdateFirmware", maintenance.clone()),
            ("Reset", core_actions.clone()),
            ("ChangeAvailability", core_actions.clone()),
            ("UnlockConnector", core_actions),
        ];
        for (action, handler) in registrations {
            dispatcher.register(action, handler, false);
        }
        dispatcher.register("CertificateSigned", security.clone(), false);
        dispatcher.register("InstallCertificate", security.clone(), false);
        dispatcher.register("DeleteCertificate", security.clone(), false);
        dispatcher.register("GetInstalledCertificateIds", security.clone(), false);

        // Triggered message sources
        trigger.register_standard(MessageTrigger::BootNotification, status.clone());
        trigger.register_standard(MessageTrigger::Heartbeat, status.clone());
        trigger.register_standard(MessageTrigger::StatusNotification, status.clone());
        trigger.register_standard(MessageTrigger::MeterValues, meter_values.clone());
        trigger.register_standard(
            MessageTrigger::FirmwareStatusNotification,
            maintenance.clone(),
        );
        trigger.register_standard(
            MessageTrigger::DiagnosticsStatusNotification,
            maintenance.clone(),
        );
        trigger.register_extended(MessageTriggerExtended::BootNotification, status.clone());
        trigger.register_extended(MessageTriggerExtended::Heartbeat, status.clone());
        trigger.register_extended(MessageTriggerExtended::StatusNotification, status.clone());
        trigger.register_extended(MessageTriggerExtended::MeterValues, meter_values.clone());
        trigger.register_extended(
            MessageTriggerExtended::FirmwareStatusNotification,
            maintenance.clone(),
        );
        trigger.register_extended(
            MessageTriggerExtended::LogStatusNotification,
            maintenance.clone(),
        );
        trigger.register_extended(
            MessageTriggerExtended::SignChargePointCertificate,
            security.clone(),
        );

        // Configuration guards
        {
            let security = Arc::clone(&security);
            self.ocpp_config
                .register_check("SecurityProfile", move |_, value| {
                    security.check_security_profile(value)
                });
        }
        {
            let security = Arc::clone(&security);
            self.ocpp_config
                .register_check("AuthorizationKey", move |_, value| {
                    security.check_authorization_key(value)
                });
        }

        rpc.register_listener(Arc::new(LinkMonitor {
            events: Arc::clone(&self.events),
            status: Arc::clone(&status),
            transactions: Arc::clone(&transactions),
            internal_config: internal_config.clone(),
        }));

        let stack = Arc::new(Stack {
            config: self.config.clone(),
            ocpp_config: Arc::clone(&self.ocpp_config),
            db,
            dispatcher,
            rpc,
            connectors,
            internal_config,
            status,
            authent,
            reservation,
            smart_charging,
            meter_values,
            transactions,
            data_transfer,
            maintenance,
            security,
            uptime_task: Mutex::new(None),
            uptime: AtomicU64::new(0),
            disconnected_time: AtomicU64::new(0),
            total_uptime: AtomicU64::new(total_uptime),
            total_disconnected_time: AtomicU64::new(total_disconnected),
        });

        self.ocpp_config.register_listener(
            "AuthorizationKey",
            Arc::new(AuthorizationKeyListener {
                stack: Arc::downgrade(&stack),
            }),
        );

        start_uptime_task(&stack);
        *guard = Some(Arc::clone(&stack));
        stack.connect().await
    }

    /// Tear everything down in reverse order, persisting the uptime
    /// counters on the way.
    pub async fn stop(&self) -> ChargePointResult<()> {
        let mut guard = self.stack.lock().await;
        let Some(stack) = guard.take() else {
            error!("Stack already stopped");
            return Err(ChargePointError::NotStarted);
        };
        info!("Stopping OCPP stack");

        if let Some(task) = stack.uptime_task.lock().unwrap().take() {
            task.abort();
        }
        stack.save_uptime().await;

        stack.transactions.stop();
        stack.meter_values.stop();
        stack.reservation.stop();
        stack.status.stop();
        stack.rpc.stop();

        stack.dispatcher.clear();
        self.ocpp_config.clear_hooks();

        if let Err(e) = stack.db.clone().close().await {
            warn!("Could not close database: {e}");
        }
        Ok(())
    }

    /// Close and reopen the connection (e.g. after a credentials change).
    pub async fn reconnect(&self) -> ChargePointResult<()> {
        let guard = self.stack.lock().await;
        let stack = guard.as_ref().ok_or(ChargePointError::NotStarted)?;
        stack.connect().await
    }

    /// Delete the store file and recreate the defaults. Only valid while
    /// stopped; returns `true` iff the store was fully rebuilt.
    pub async fn reset_data(&self) -> ChargePointResult<bool> {
        let guard = self.stack.lock().await;
        if guard.is_some() {
            return Ok(false);
        }
        info!("Resetting all data");
        match std::fs::remove_file(&self.config.database_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                error!("Could not delete database: {e}");
                return Ok(false);
            }
        }
        let db = open_database(&self.config.database_path).await?;
        let internal_config = InternalConfigRepository::new(db.clone());
        init_internal_config(&internal_config).await?;
        ConnectorRegistry::open(db.clone(), self.ocpp_config.snapshot().number_of_connectors)
            .await?;
        if let Err(e) = db.close().await {
            warn!("Could not close database: {e}");
        }
        Ok(true)
    }

    /// Rebuild the connector rows from the configuration. Only valid while
    /// stopped.
    pub async fn reset_connector_data(&self) -> ChargePointResult<bool> {
        let guard = self.stack.lock().await;
        if guard.is_some() {
            return Ok(false);
        }
        let db = open_database(&self.config.database_path).await?;
        let mut registry =
            ConnectorRegistry::open(db.clone(), self.ocpp_config.snapshot().number_of_connectors)
                .await?;
        registry
            .reset(self.ocpp_config.snapshot().number_of_connectors)
            .await?;
        if let Err(e) = db.close().await {
            warn!("Could not close database: {e}");
        }
        Ok(true)
    }

    // ── Introspection ──────────────────────────────────────────

    pub async fn registration_status(&self) -> RegistrationStatus {
        match self.stack.lock().await.as_ref() {
            Some(stack) => stack.status.registration_status(),
            None => RegistrationStatus::Rejected,
        }
    }

    pub async fn connector_status(&self, connector_id: u32) -> ChargePointStatus {
        let guard = self.stack.lock().await;
        let Some(stack) = guard.as_ref() else {
            return ChargePointStatus::Unavailable;
        };
        match stack.connectors.connector(connector_id) {
            Some(connector) => connector.lock().await.status,
            None => {
                error!(connector_id, "Invalid connector id");
                ChargePointStatus::Unavailable
            }
        }
    }

    // ── Commands ───────────────────────────────────────────────

    /// Report a connector status change to the Central System.
    pub async fn status_notification(
        &self,
        connector_id: u32,
        status: ChargePointStatus,
        error_code: ChargePointErrorCode,
        info: &str,
        vendor_id: &str,
        vendor_error: &str,
    ) -> ChargePointResult<bool> {
        let guard = self.stack.lock().await;
        let stack = guard.as_ref().ok_or(ChargePointError::NotStarted)?;
        Ok(stack
            .status
            .update_connector_status(connector_id, status, error_code, info, vendor_id, vendor_error)
            .await)
    }

    /// Resolve an id tag before starting a charge. On a reserved
    /// connector, the reservation guard replaces the regular pipeline.
    pub async fn authorize(
        &self,
        connector_id: u32,
        id_tag: &str,
    ) -> ChargePointResult<(AuthorizationStatus, Option<String>)> {
        let guard = self.stack.lock().await;
        let stack = guard.as_ref().ok_or(ChargePointError::NotStarted)?;
        if stack.status.registration_status() != RegistrationStatus::Accepted {
            error!("Charge point has not been accepted by Central System");
            return Ok((AuthorizationStatus::Invalid, None));
        }
        let Some(connector) = stack.connectors.connector(connector_id) else {
            return Err(ChargePointError::InvalidConnector(connector_id));
        };
        let reserved = connector.lock().await.status == ChargePointStatus::Reserved;
        if reserved {
            let status = stack
                .reservation
                .is_transaction_allowed(connector_id, id_tag)
                .await;
            return Ok((status, None));
        }
        stack.authent.authorize(id_tag).await
    }

    pub async fn start_transaction(
        &self,
        connector_id: u32,
        id_tag: &str,
    ) -> ChargePointResult<AuthorizationStatus> {
        let guard = self.stack.lock().await;
        let stack = guard.as_ref().ok_or(ChargePointError::NotStarted)?;
        if stack.status.registration_status() != RegistrationStatus::Accepted {
            error!("Charge point has not been accepted by Central System");
            return Ok(AuthorizationStatus::Invalid);
        }
        stack.transactions.start_transaction(connector_id, id_tag).await
    }

    pub async fn stop_transaction(
        &self,
        connector_id: u32,
        id_tag: &str,
        reason: Reason,
    ) -> ChargePointResult<bool> {
        let guard = self.stack.lock().await;
        let stack = guard.as_ref().ok_or(ChargePointError::NotStarted)?;
        if stack.status.registration_status() != RegistrationStatus::Accepted {
            error!("Charge point has not been accepted by Central System");
            return Ok(false);
        }
        stack
            .transactions
            .stop_transaction(connector_id, id_tag, reason)
            .await
    }

    pub async fn data_transfer(
        &self,
        vendor_id: &str,
        message_id: Option<&str>,
        data: Option<&str>,
    ) -> ChargePointResult<Option<(DataTransferStatus, Option<String>)>> {
        let guard = self.stack.lock().await;
        let stack = guard.as_ref().ok_or(ChargePointError::NotStarted)?;
        if stack.status.registration_status() == RegistrationStatus::Rejected {
            return Ok(None);
        }
        stack.data_transfer.data_transfer(vendor_id, message_id, data).await
    }

    /// Send host-assembled meter values.
    pub async fn send_meter_values(
        &self,
        connector_id: u32,
        values: Vec<MeterValue>,
    ) -> ChargePointResult<bool> {
        let guard = self.stack.lock().await;
        let stack = guard.as_ref().ok_or(ChargePointError::NotStarted)?;
        if stack.status.registration_status() == RegistrationStatus::Rejected {
            return Ok(false);
        }
        stack.meter_values.send_meter_values(connector_id, values).await
    }

    /// Instantaneous smart charging setpoints of a connector.
    pub async fn get_setpoint(
        &self,
        connector_id: u32,
        unit: ChargingRateUnit,
    ) -> ChargePointResult<(Option<SmartChargingSetpoint>, Option<SmartChargingSetpoint>)> {
        let guard = self.stack.lock().await;
        let stack = guard.as_ref().ok_or(ChargePointError::NotStarted)?;
        stack.smart_charging.get_setpoint(connector_id, unit).await
    }

    pub async fn notify_firmware_update_status(&self, success: bool) -> ChargePointResult<()> {
        let guard = self.stack.lock().await;
        let stack = guard.as_ref().ok_or(ChargePointError::NotStarted)?;
        stack.maintenance.notify_firmware_update_status(success).await;
        Ok(())
    }

    // ── Security extensions ────────────────────────────────────

    pub async fn log_security_event(
        &self,
        kind: &str,
        message: &str,
        critical: bool,
    ) -> ChargePointResult<()> {
        let guard = self.stack.lock().await;
        let stack = guard.as_ref().ok_or(ChargePointError::NotStarted)?;
        stack.security.log_security_event(kind, message, critical).await
    }

    pub async fn clear_security_events(&self) -> ChargePointResult<()> {
        let guard = self.stack.lock().await;
        let stack = guard.as_ref().ok_or(ChargePointError::NotStarted)?;
        stack.security.clear_security_events().await
    }

    /// Send a host-generated CSR for signing.
    pub async fn sign_certificate(&self, csr: &str) -> ChargePointResult<bool> {
        let guard = self.stack.lock().await;
        let stack = guard.as_ref().ok_or(ChargePointError::NotStarted)?;
        stack.security.sign_certificate(csr).await
    }

    pub async fn notify_signed_update_firmware_status(
        &self,
        status: SignedFirmwareStatus,
    ) -> ChargePointResult<()> {
        let guard = self.stack.lock().await;
        let stack = guard.as_ref().ok_or(ChargePointError::NotStarted)?;
        stack
            .maintenance
            .notify_signed_update_firmware_status(status)
            .await;
        Ok(())
    }
}

async fn init_internal_config(repository: &InternalConfigRepository) -> ChargePointResult<()> {
    repository.set_key(STACK_VERSION_KEY, STACK_VERSION).await?;
    repository
        .set_key(START_DATE_KEY, &chrono::Utc::now().to_rfc3339())
        .await?;
    repository.init_key(UPTIME_KEY, "0").await?;
    repository.init_key(DISCONNECTED_TIME_KEY, "0").await?;
    repository.init_key(TOTAL_UPTIME_KEY, "0").await?;
    repository.init_key(TOTAL_DISCONNECTED_TIME_KEY, "0").await?;
    repository.init_key(LAST_CONNECTION_URL_KEY, "").await?;
    repository
        .init_key(
            LAST_REGISTRATION_STATUS_KEY,
            &RegistrationStatus::Rejected.to_string(),
        )
        .await?;
    Ok(())
}

async fn read_counter(repository: &InternalConfigRepository, key: &str) -> u64 {
    repository
        .get_key(key)
        .await
        .ok()
        .flatten()
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

/// 1 Hz uptime counters, persisted every 15 s.
fn start_uptime_task(stack: &Arc<Stack>) {
    let this = Arc::clone(stack);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let uptime = this.uptime.fetch_add(1, Ordering::SeqCst) + 1;
            this.total_uptime.fetch_add(1, Ordering::SeqCst);
            if !this.rpc.is_connected() {
                this.disconnected_time.fetch_add(1, Ordering::SeqCst);
                this.total_disconnected_time.fetch_add(1, Ordering::SeqCst);
            }
            if uptime % 15 == 0 {
                this.save_uptime().await;
            }
        }
    });
    *stack.uptime_task.lock().unwrap() = Some(task);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct HostStub;
    impl ChargePointEventsHandler for HostStub {}

    fn config(url: &str, database_path: &str) -> ChargePointConfig {
        ChargePointConfig {
            connexion_url: url.to_string(),
            charge_point_identifier: "CP_1".to_string(),
            database_path: database_path.to_string(),
            retry_interval: Duration::from_secs(3600),
            ..ChargePointConfig::default()
        }
    }

    async fn last_registration_status(database_path: &str) -> String {
        let db = open_database(database_path).await.unwrap();
        let value = InternalConfigRepository::new(db.clone())
            .get_key(LAST_REGISTRATION_STATUS_KEY)
            .await
            .unwrap()
            .unwrap();
        db.close().await.unwrap();
        value
    }

    /// The registration latch survives a restart on the same URL but is
    /// reset to Rejected as soon as the connection URL changes, before
    /// any traffic towards the Central System.
    #[tokio::test]
    async fn url_change_resets_registration_latch() {
        let path = std::env::temp_dir().join(format!(
            "ocpp-chargepoint-test-{}.db",
            std::process::id()
        ));
        let database_path = path.to_str().unwrap().to_string();
        let _ = std::fs::remove_file(&path);

        let events: Arc<dyn ChargePointEventsHandler> = Arc::new(HostStub);

        // first boot on URL A
        let cp = ChargePoint::new(
            config("ws://127.0.0.1:9/ocpp", &database_path),
            OcppConfig::default(),
            Arc::clone(&events),
        );
        cp.start().await.unwrap();
        cp.stop().await.unwrap();

        // pretend the Central System accepted us
        {
            let db = open_database(&database_path).await.unwrap();
            InternalConfigRepository::new(db.clone())
                .set_key(
                    LAST_REGISTRATION_STATUS_KEY,
                    &RegistrationStatus::Accepted.to_string(),
                )
                .await
                .unwrap();
            db.close().await.unwrap();
        }

        // restart on the same URL: the latch survives
        let cp = ChargePoint::new(
            config("ws://127.0.0.1:9/ocpp", &database_path),
            OcppConfig::default(),
            Arc::clone(&events),
        );
        cp.start().await.unwrap();
        cp.stop().await.unwrap();
        assert_eq!(last_registration_status(&database_path).await, "Accepted");

        // restart on another URL: latch reset before the handshake
        let cp = ChargePoint::new(
            config("ws://127.0.0.1:9/elsewhere", &database_path),
            OcppConfig::default(),
            events,
        );
        cp.start().await.unwrap();
        cp.stop().await.unwrap();
        assert_eq!(last_registration_status(&database_path).await, "Rejected");

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn lifecycle_guards() {
        let path = std::env::temp_dir().join(format!(
            "ocpp-chargepoint-guards-{}.db",
            std::process::id()
        ));
        let database_path = path.to_str().unwrap().to_string();
        let _ = std::fs::remove_file(&path);

        let cp = ChargePoint::new(
            config("ws://127.0.0.1:9/ocpp", &database_path),
            OcppConfig::default(),
            Arc::new(HostStub),
        );
        assert!(matches!(
            cp.stop().await,
            Err(ChargePointError::NotStarted)
        ));
        cp.start().await.unwrap();
        assert!(matches!(
            cp.start().await,
            Err(ChargePointError::AlreadyStarted)
        ));
        // reset_data is refused while running
        assert!(!cp.reset_data().await.unwrap());
        cp.stop().await.unwrap();
        assert!(cp.reset_data().await.unwrap());

        let _ = std::fs::remove_file(&path);
    }
}
