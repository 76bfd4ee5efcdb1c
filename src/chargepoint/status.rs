//! Status manager
//!
//! Drives the connector status machine and everything tied to the
//! registration life cycle: the BootNotification handshake, heartbeats
//! (reset by any outbound frame, observed through the RPC spy), debounced
//! StatusNotifications and the offline status buffering.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::chargepoint::connectors::ConnectorRegistry;
use crate::chargepoint::events::ChargePointEventsHandler;
use crate::chargepoint::ocppconfig::OcppConfigStore;
use crate::chargepoint::trigger::{TriggerHandler, TriggerSource};
use crate::config::ChargePointConfig;
use crate::database::repositories::InternalConfigRepository;
use crate::messages::{BootNotificationRequest, HeartbeatRequest, StatusNotificationRequest};
use crate::rpc::{CallResult, MessageSender, RpcSpy};
use crate::types::{
    ChargePointErrorCode, ChargePointStatus, MessageTrigger, MessageTriggerExtended,
    RegistrationStatus,
};

pub const LAST_REGISTRATION_STATUS_KEY: &str = "LastRegistrationStatus";

#[derive(Default)]
struct Tasks {
    boot: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    debounce: HashMap<u32, JoinHandle<()>>,
}

pub struct StatusManager {
    config: ChargePointConfig,
    ocpp_config: Arc<OcppConfigStore>,
    events: Arc<dyn ChargePointEventsHandler>,
    connectors: Arc<ConnectorRegistry>,
    sender: Arc<MessageSender>,
    internal_config: InternalConfigRepository,
    registration_status: RwLock<RegistrationStatus>,
    connected: AtomicBool,
    /// Set after a BootNotification was accepted in this process: a later
    /// reconnection does not repeat the handshake.
    boot_notified: AtomicBool,
    heartbeat_reset: Notify,
    tasks: Mutex<Tasks>,
    self_ref: Weak<Self>,
}

impl StatusManager {
    pub fn new(
        config: ChargePointConfig,
        ocpp_config: Arc<OcppConfigStore>,
        events: Arc<dyn ChargePointEventsHandler>,
        connectors: Arc<ConnectorRegistry>,
        sender: Arc<MessageSender>,
        internal_config: InternalConfigRepository,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            config,
            ocpp_config,
            events,
            connectors,
            sender,
            internal_config,
            registration_status: RwLock::new(RegistrationStatus::Rejected),
            connected: AtomicBool::new(false),
            boot_notified: AtomicBool::new(false),
            heartbeat_reset: Notify::new(),
            tasks: Mutex::new(Tasks::default()),
            self_ref: self_ref.clone(),
        })
    }

    pub fn registration_status(&self) -> RegistrationStatus {
        *self.registration_status.read().unwrap()
    }

    /// Force the in-memory registration status without contacting the
    /// Central System. Used for the offline latch: when the last known
    /// status was Accepted, host operations stay allowed while offline.
    pub fn force_registration_status(&self, status: RegistrationStatus) {
        info!(status = %status, "Forcing registration status");
        *self.registration_status.write().unwrap() = status;
    }

    async fn set_registration_status(&self, status: RegistrationStatus) {
        *self.registration_status.write().unwrap() = status;
        if let Err(e) = self
            .internal_config
            .set_key(LAST_REGISTRATION_STATUS_KEY, &status.to_string())
            .await
        {
            error!("Could not persist registration status: {e}");
        }
        self.events.registration_status_changed(status);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connection-state fan-in from the orchestrator.
    pub fn update_connection_status(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        let mut tasks = self.tasks.lock().unwrap();
        if connected {
            if let Some(task) = tasks.boot.take() {
                task.abort();
            }
            if self.boot_notified.load(Ordering::SeqCst) {
                // Reconnection: no second handshake, resume reporting
                let resume = Arc::clone(&this);
                tasks.boot = Some(tokio::spawn(async move {
                    resume.send_pending_statuses().await;
                }));
                self.start_heartbeat(&mut tasks);
            } else {
                tasks.boot = Some(tokio::spawn(async move {
                    this.boot_notification_process().await;
                }));
            }
        } else {
            if let Some(task) = tasks.boot.take() {
                task.abort();
            }
            if let Some(task) = tasks.heartbeat.take() {
                task.abort();
            }
        }
    }

    /// BootNotification handshake: retried with the interval provided by
    /// the Central System until Accepted.
    async fn boot_notification_process(self: Arc<Self>) {
        let request = BootNotificationRequest {
            charge_point_vendor: self.config.charge_point_vendor.clone(),
            charge_point_model: self.config.charge_point_model.clone(),
            charge_point_serial_number: self.config.charge_point_serial_number.clone(),
            charge_box_serial_number: None,
            firmware_version: self.config.firmware_version.clone(),
            iccid: self.config.iccid.clone(),
            imsi: self.config.imsi.clone(),
            meter_serial_number: self.config.meter_serial_number.clone(),
            meter_type: self.config.meter_type.clone(),
        };

        loop {
            if !self.is_connected() {
                return;
            }
            match self.sender.send(&request).await {
                CallResult::Ok(response) => {
                    self.events.datetime_received(response.current_time);
                    match response.status {
                        RegistrationStatus::Accepted => {
                            info!("Registration accepted by Central System");
                            self.boot_notified.store(true, Ordering::SeqCst);
                            self.set_registration_status(RegistrationStatus::Accepted).await;
                            if response.interval > 0 {
                                let _ = self
                                    .ocpp_config
                                    .change_value("HeartbeatInterval", &response.interval.to_string());
                            }
                            {
                                let mut tasks = self.tasks.lock().unwrap();
                                self.start_heartbeat(&mut tasks);
                            }
                            self.send_pending_statuses().await;
                            return;
                        }
                        status => {
                            warn!(status = %status, "Registration not accepted");
                            self.set_registration_status(status).await;
                            let retry = if response.interval > 0 {
                                Duration::from_secs(u64::from(response.interval))
                            } else {
                                self.config.retry_interval
                            };
                            tokio::time::sleep(retry).await;
                        }
                    }
                }
                other => {
                    warn!("BootNotification failed: {other:?}");
                    return;
                }
            }
        }
    }

    fn start_heartbeat(&self, tasks: &mut Tasks) {
        if let Some(task) = tasks.heartbeat.take() {
            task.abort();
        }
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        tasks.heartbeat = Some(tokio::spawn(async move {
            this.heartbeat_process().await;
        }));
    }

    /// Periodic heartbeat; the deadline restarts on every outbound frame.
    async fn heartbeat_process(self: Arc<Self>) {
        loop {
            let interval = self.ocpp_config.snapshot().heartbeat_interval.max(1);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(u64::from(interval))) => {
                    match self.sender.send(&HeartbeatRequest {}).await {
                        CallResult::Ok(response) => {
                            self.events.datetime_received(response.current_time);
                        }
                        other => debug!("Heartbeat failed: {other:?}"),
                    }
                }
                _ = self.heartbeat_reset.notified() => {}
            }
        }
    }

    /// Update one connector's status. Returns `false` on an invalid
    /// connector id.
    pub async fn update_connector_status(
        &self,
        connector_id: u32,
        status: ChargePointStatus,
        error_code: ChargePointErrorCode,
        info: &str,
        vendor_id: &str,
        vendor_error: &str,
    ) -> bool {
        let Some(connector) = self.connectors.connector(connector_id) else {
            error!(connector_id, "Invalid connector id");
            return false;
        };

        let previous = {
            let mut connector = connector.lock().await;
            if connector.status == status {
                return true;
            }
            let previous = connector.status;
            connector.status = status;
            connector.error_code = error_code;
            connector.info = info.to_string();
            connector.vendor_id = vendor_id.to_string();
            connector.vendor_error = vendor_error.to_string();
            connector.status_timestamp = Utc::now();
            if let Err(e) = self.connectors.save(&connector).await {
                error!(connector_id, "Could not persist connector: {e}");
            }
            previous
        };
        info!(connector_id, from = %previous, to = %status, "Connector status changed");

        let min_duration = self.ocpp_config.snapshot().minimum_status_duration;
        let debounce = min_duration > 0
            && matches!(
                previous,
                ChargePointStatus::Preparing | ChargePointStatus::Finishing
            );

        let Some(this) = self.self_ref.upgrade() else {
            return false;
        };
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.debounce.remove(&connector_id) {
            task.abort();
        }
        tasks.debounce.insert(
            connector_id,
            tokio::spawn(async move {
                if debounce {
                    tokio::time::sleep(Duration::from_secs(u64::from(min_duration))).await;
                }
                this.notify_connector_status(connector_id, false).await;
            }),
        );
        true
    }

    /// Send the StatusNotification of one connector if its current status
    /// was not notified yet (or unconditionally when `force` is set).
    async fn notify_connector_status(&self, connector_id: u32, force: bool) {
        if !self.is_connected() || self.registration_status() != RegistrationStatus::Accepted {
            // Offline buffering: the unsent difference between status and
            // last_notified_status is resolved on reconnection
            return;
        }
        let Some(connector) = self.connectors.connector(connector_id) else {
            return;
        };

        let request = {
            let connector = connector.lock().await;
            if !force && connector.status == connector.last_notified_status {
                return;
            }
            StatusNotificationRequest {
                connector_id,
                error_code: connector.error_code,
                info: some_if_not_empty(&connector.info),
                status: connector.status,
                timestamp: Some(connector.status_timestamp),
                vendor_id: some_if_not_empty(&connector.vendor_id),
                vendor_error_code: some_if_not_empty(&connector.vendor_error),
            }
        };

        match self.sender.send(&request).await {
            CallResult::Ok(_) => {
                let mut connector = connector.lock().await;
                connector.last_notified_status = request.status;
                if let Err(e) = self.connectors.save(&connector).await {
                    error!(connector_id, "Could not persist connector: {e}");
                }
            }
            other => warn!(connector_id, "StatusNotification failed: {other:?}"),
        }
    }

    /// Report every connector whose effective status the Central System
    /// has not seen yet.
    async fn send_pending_statuses(&self) {
        for connector_id in 0..=self.connectors.count() {
            self.notify_connector_status(connector_id, false).await;
        }
    }

    pub fn stop(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.boot.take() {
            task.abort();
        }
        if let Some(task) = tasks.heartbeat.take() {
            task.abort();
        }
        for (_, task) in tasks.debounce.drain() {
            task.abort();
        }
    }
}

fn some_if_not_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl RpcSpy for StatusManager {
    fn on_message_sent(&self, _message: &str) {
        // Any outbound frame postpones the next heartbeat
        self.heartbeat_reset.notify_waiters();
    }

    fn on_message_received(&self, _message: &str) {}
}

#[async_trait]
impl TriggerHandler for StatusManager {
    async fn on_trigger(self: Arc<Self>, source: TriggerSource, connector_id: Option<u32>) -> bool {
        match source {
            TriggerSource::Standard(MessageTrigger::BootNotification)
            | TriggerSource::Extended(MessageTriggerExtended::BootNotification) => {
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    this.boot_notification_process().await;
                });
                true
            }
            TriggerSource::Standard(MessageTrigger::Heartbeat)
            | TriggerSource::Extended(MessageTriggerExtended::Heartbeat) => {
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    match this.sender.send(&HeartbeatRequest {}).await {
                        CallResult::Ok(response) => {
                            this.events.datetime_received(response.current_time)
                        }
                        other => debug!("Triggered heartbeat failed: {other:?}"),
                    }
                });
                true
            }
            TriggerSource::Standard(MessageTrigger::StatusNotification)
            | TriggerSource::Extended(MessageTriggerExtended::StatusNotification) => {
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    match connector_id {
                        Some(id) => this.notify_connector_status(id, true).await,
                        None => {
                            for id in 0..=this.connectors.count() {
                                this.notify_connector_status(id, true).await;
                            }
                        }
                    }
                });
                true
            }
            _ => false,
        }
    }
}
