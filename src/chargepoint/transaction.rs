//! Transaction manager
//!
//! Start/stop rules, the offline request queue and the post-reconnection
//! reconciliation of locally-allocated transaction ids.
//!
//! While the link is down (or older entries are still queued),
//! StartTransaction / StopTransaction / MeterValues are persisted to the
//! FIFO; transactions started offline run under a negative transaction id
//! until the Central System assigns the real one during the drain.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::chargepoint::authent::AuthentManager;
use crate::chargepoint::connectors::{ConnectorRegistry, CONNECTOR_ID_CHARGE_POINT};
use crate::chargepoint::events::ChargePointEventsHandler;
use crate::chargepoint::fifo::RequestFifo;
use crate::chargepoint::metervalues::MeterValuesManager;
use crate::chargepoint::ocppconfig::OcppConfigStore;
use crate::chargepoint::reservation::ReservationManager;
use crate::chargepoint::smartcharging::SmartChargingManager;
use crate::chargepoint::status::StatusManager;
use crate::database::entities::request_fifo;
use crate::messages::{
    OcppRequest, RemoteStartTransactionRequest, RemoteStartTransactionResponse,
    RemoteStopTransactionRequest, RemoteStopTransactionResponse, StartTransactionRequest,
    StartTransactionResponse, StopTransactionRequest, StopTransactionResponse,
};
use crate::rpc::{from_payload, to_payload, CallResult, HandlerResult, MessageHandler, MessageSender, OcppError};
use crate::support::errors::ChargePointResult;
use crate::types::{
    AuthorizationStatus, ChargePointErrorCode, ChargePointStatus, Measurand, Reason,
    RegistrationStatus, RemoteStartStopStatus,
};

pub struct TransactionManager {
    ocpp_config: Arc<OcppConfigStore>,
    events: Arc<dyn ChargePointEventsHandler>,
    connectors: Arc<ConnectorRegistry>,
    sender: Arc<MessageSender>,
    fifo: Arc<RequestFifo>,
    status_manager: Arc<StatusManager>,
    authent: Arc<AuthentManager>,
    reservation: Arc<ReservationManager>,
    meter_values: Arc<MeterValuesManager>,
    smart_charging: Arc<SmartChargingManager>,
    next_offline_id: AtomicI32,
    drain_task: Mutex<Option<JoinHandle<()>>>,
    self_ref: Weak<Self>,
}

impl TransactionManager {
    #[allow(clippy::too_many_arguments)]
    pub async fn open(
        ocpp_config: Arc<OcppConfigStore>,
        events: Arc<dyn ChargePointEventsHandler>,
        connectors: Arc<ConnectorRegistry>,
        sender: Arc<MessageSender>,
        fifo: Arc<RequestFifo>,
        status_manager: Arc<StatusManager>,
        authent: Arc<AuthentManager>,
        reservation: Arc<ReservationManager>,
        meter_values: Arc<MeterValuesManager>,
        smart_charging: Arc<SmartChargingManager>,
    ) -> Arc<Self> {
        // Resume the offline id sequence below any id still in use
        let mut lowest = 0;
        for id in connectors.connector_ids() {
            if let Some(connector) = connectors.connector(id) {
                let connector = connector.lock().await;
                lowest = lowest
                    .min(connector.transaction_id_offline)
                    .min(connector.transaction_id);
            }
        }

        Arc::new_cyclic(|self_ref| Self {
            ocpp_config,
            events,
            connectors,
            sender,
            fifo,
            status_manager,
            authent,
            reservation,
            meter_values,
            smart_charging,
            next_offline_id: AtomicI32::new(lowest - 1),
            drain_task: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    fn allocate_offline_id(&self) -> i32 {
        self.next_offline_id.fetch_sub(1, Ordering::SeqCst)
    }

    async fn meter_register(&self, connector_id: u32) -> i32 {
        self.events
            .get_meter_value(connector_id, Measurand::EnergyActiveImportRegister, None)
            .await
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }

    /// Start a transaction on `connector_id` for `id_tag`. Returns the
    /// authorization status; anything but Accepted means no transaction
    /// was started.
    pub async fn start_transaction(
        &self,
        connector_id: u32,
        id_tag: &str,
    ) -> ChargePointResult<AuthorizationStatus> {
        if connector_id == CONNECTOR_ID_CHARGE_POINT {
            return Ok(AuthorizationStatus::Invalid);
        }
        let Some(connector) = self.connectors.connector(connector_id) else {
            return Ok(AuthorizationStatus::Invalid);
        };

        let (has_transaction, has_reservation) = {
            let connector = connector.lock().await;
            (connector.has_transaction(), connector.has_reservation())
        };
        if has_transaction {
            warn!(connector_id, "A transaction is already running");
            return Ok(AuthorizationStatus::ConcurrentTx);
        }
        // Reservation guard, checked even after a prior authorize
        if has_reservation {
            let allowed = self
                .reservation
                .is_transaction_allowed(connector_id, id_tag)
                .await;
            if allowed != AuthorizationStatus::Accepted {
                return Ok(AuthorizationStatus::Invalid);
            }
        }

        let (status, parent_id_tag) = self.authent.authorize(id_tag).await?;
        if status != AuthorizationStatus::Accepted {
            warn!(connector_id, id_tag, status = %status, "Transaction start refused");
            return Ok(status);
        }

        let timestamp = Utc::now();
        let reservation_id = {
            let connector = connector.lock().await;
            connector.has_reservation().then_some(connector.reservation_id)
        };
        let request = StartTransactionRequest {
            connector_id,
            id_tag: id_tag.to_string(),
            meter_start: self.meter_register(connector_id).await,
            reservation_id,
            timestamp,
        };

        let mut transaction_id = 0;
        let mut offline_id = 0;
        let mut queue = !self.sender.is_connected() || !self.fifo.is_empty().await?;
        if !queue {
            match self.sender.send(&request).await {
                CallResult::Ok(response) => {
                    self.authent
                        .update_cache_entry(id_tag, &response.id_tag_info)
                        .await?;
                    if response.id_tag_info.status != AuthorizationStatus::Accepted {
                        warn!(
                            connector_id,
                            status = %response.id_tag_info.status,
                            "StartTransaction refused by Central System"
                        );
                        return Ok(response.id_tag_info.status);
                    }
                    transaction_id = response.transaction_id;
                }
                CallResult::Disconnected | CallResult::Timeout => queue = true,
                other => {
                    error!(connector_id, "StartTransaction failed: {other:?}");
                    return Ok(AuthorizationStatus::Invalid);
                }
            }
        }
        if queue {
            offline_id = self.allocate_offline_id();
            transaction_id = offline_id;
            self.fifo
                .push(
                    connector_id,
                    StartTransactionRequest::ACTION,
                    &serde_json::to_value(&request)?,
                )
                .await?;
            info!(connector_id, offline_id, "Transaction started offline");
        }

        {
            let mut connector = connector.lock().await;
            connector.transaction_id = transaction_id;
            connector.transaction_id_offline = offline_id;
            connector.transaction_start = Some(timestamp);
            connector.transaction_id_tag = id_tag.to_string();
            connector.transaction_parent_id_tag = parent_id_tag.unwrap_or_default();
            connector.reservation_id = 0;
            connector.reservation_id_tag.clear();
            connector.reservation_parent_id_tag.clear();
            connector.reservation_expiry_date = None;
            self.connectors.save(&connector).await?;
        }

        info!(connector_id, transaction_id, id_tag, "Transaction started");
        self.status_manager
            .update_connector_status(
                connector_id,
                ChargePointStatus::Charging,
                ChargePointErrorCode::NoError,
                "",
                "",
                "",
            )
            .await;
        self.meter_values.start_sampling(connector_id);
        self.smart_charging
            .assign_pending_tx_profiles(connector_id, transaction_id)
            .await?;
        Ok(AuthorizationStatus::Accepted)
    }

    /// Stop the transaction running on `connector_id`. An empty `id_tag`
    /// stands for a local (host-initiated) stop.
    pub async fn stop_transaction(
        &self,
        connector_id: u32,
        id_tag: &str,
        reason: Reason,
    ) -> ChargePointResult<bool> {
        let Some(connector) = self.connectors.connector(connector_id) else {
            return Ok(false);
        };
        let (transaction_id, transaction_tag, transaction_parent) = {
            let connector = connector.lock().await;
            (
                connector.transaction_id,
                connector.transaction_id_tag.clone(),
                connector.transaction_parent_id_tag.clone(),
            )
        };
        if transaction_id == 0 {
            warn!(connector_id, "No transaction to stop");
            return Ok(false);
        }

        // A different tag may only stop the transaction through a shared
        // parent id
        if !id_tag.is_empty() && id_tag != transaction_tag {
            let (status, parent) = self.authent.authorize(id_tag).await?;
            let parent_matches = parent
                .as_deref()
                .is_some_and(|p| !transaction_parent.is_empty() && p == transaction_parent);
            if status != AuthorizationStatus::Accepted || !parent_matches {
                warn!(connector_id, id_tag, "Tag not allowed to stop the transaction");
                return Ok(false);
            }
        }

        self.meter_values.stop_sampling(connector_id);
        let mut transaction_data = self
            .meter_values
            .take_tx_meter_values(connector_id, transaction_id)
            .await?;
        transaction_data.extend(self.meter_values.stop_transaction_values(connector_id).await);

        let request = StopTransactionRequest {
            id_tag: (!id_tag.is_empty()).then(|| id_tag.to_string()),
            meter_stop: self.meter_register(connector_id).await,
            timestamp: Utc::now(),
            transaction_id,
            reason: Some(reason),
            transaction_data: (!transaction_data.is_empty()).then_some(transaction_data),
        };

        {
            let mut connector = connector.lock().await;
            connector.transaction_id = 0;
            connector.transaction_start = None;
            connector.transaction_id_tag.clear();
            connector.transaction_parent_id_tag.clear();
            // transaction_id_offline survives until the drain reconciles it
            self.connectors.save(&connector).await?;
        }
        self.smart_charging
            .clear_tx_profiles(connector_id, transaction_id)
            .await?;

        info!(connector_id, transaction_id, reason = %reason, "Transaction stopped");
        self.status_manager
            .update_connector_status(
                connector_id,
                ChargePointStatus::Available,
                ChargePointErrorCode::NoError,
                "",
                "",
                "",
            )
            .await;

        let queue = !self.sender.is_connected() || !self.fifo.is_empty().await?;
        if !queue {
            match self.sender.send(&request).await {
                CallResult::Ok(response) => {
                    if let Some(info) = response.id_tag_info {
                        self.authent
                            .update_cache_entry(&transaction_tag, &info)
                            .await?;
                    }
                }
                CallResult::Disconnected | CallResult::Timeout => {
                    self.queue_stop(connector_id, &request).await?;
                }
                other => error!(connector_id, "StopTransaction failed: {other:?}"),
            }
        } else {
            self.queue_stop(connector_id, &request).await?;
        }
        Ok(true)
    }

    async fn queue_stop(
        &self,
        connector_id: u32,
        request: &StopTransactionRequest,
    ) -> ChargePointResult<()> {
        self.fifo
            .push(
                connector_id,
                StopTransactionRequest::ACTION,
                &serde_json::to_value(request)?,
            )
            .await
    }

    /// Connection-state fan-in: start or stop the FIFO drain.
    pub fn update_connection_status(&self, connected: bool) {
        let mut task = self.drain_task.lock().unwrap();
        if let Some(task) = task.take() {
            task.abort();
        }
        if connected {
            let Some(this) = self.self_ref.upgrade() else {
                return;
            };
            *task = Some(tokio::spawn(async move {
                this.drain_process().await;
            }));
        }
    }

    /// Drain the FIFO oldest-first. Transient failures pause the drain
    /// with an exponential backoff; permanent failures drop the entry.
    async fn drain_process(self: Arc<Self>) {
        let mut attempts: u32 = 0;
        loop {
            if !self.sender.is_connected() {
                return;
            }
            // The registration handshake must complete before queued
            // traffic goes out
            if self.status_manager.registration_status() != RegistrationStatus::Accepted {
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }
            let entry = match self.fifo.front().await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    attempts = 0;
                    self.fifo.wait_for_entry().await;
                    continue;
                }
                Err(e) => {
                    error!("Could not read request queue: {e}");
                    return;
                }
            };

            let payload: Value = match serde_json::from_str(&entry.payload) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(id = entry.id, "Dropping corrupted queued request: {e}");
                    let _ = self.fifo.pop(entry.id).await;
                    continue;
                }
            };

            debug!(
                id = entry.id,
                action = entry.action.as_str(),
                "Sending queued request"
            );
            match self.sender.call(&entry.action, payload.clone()).await {
                CallResult::Ok(response) => {
                    attempts = 0;
                    if let Err(e) = self
                        .handle_drained_response(&entry, &payload, response)
                        .await
                    {
                        error!(id = entry.id, "Reconciliation failed: {e}");
                    }
                    let _ = self.fifo.pop(entry.id).await;
                }
                CallResult::Disconnected => return,
                CallResult::Timeout => {
                    attempts += 1;
                    let cfg = self.ocpp_config.snapshot();
                    if attempts >= cfg.transaction_message_attempts.max(1) {
                        error!(
                            id = entry.id,
                            action = entry.action.as_str(),
                            "Dropping queued request after {attempts} attempts"
                        );
                        let _ = self.fifo.pop(entry.id).await;
                        attempts = 0;
                        continue;
                    }
                    let ceiling = cfg.transaction_message_retry_interval.max(1);
                    let delay = 2u32.saturating_pow(attempts - 1).min(ceiling);
                    warn!(
                        id = entry.id,
                        delay, "Queued request timed out, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(u64::from(delay))).await;
                }
                CallResult::Nok { code, description } => {
                    // The Central System refused the payload: no retry
                    error!(
                        id = entry.id,
                        action = entry.action.as_str(),
                        code = code.as_str(),
                        "Dropping refused queued request: {description}"
                    );
                    let _ = self.fifo.pop(entry.id).await;
                }
                CallResult::InvalidPayload | CallResult::InvalidResponse => {
                    error!(
                        id = entry.id,
                        action = entry.action.as_str(),
                        "Dropping undeliverable queued request"
                    );
                    let _ = self.fifo.pop(entry.id).await;
                }
            }
        }
    }

    /// Post-drain bookkeeping: offline id reconciliation and cache
    /// updates.
    async fn handle_drained_response(
        &self,
        entry: &request_fifo::Model,
        payload: &Value,
        response: Value,
    ) -> ChargePointResult<()> {
        let connector_id = entry.connector_id as u32;
        match entry.action.as_str() {
            "StartTransaction" => {
                let response: StartTransactionResponse = serde_json::from_value(response)?;
                if let Some(connector) = self.connectors.connector(connector_id) {
                    let offline_id = {
                        let mut connector = connector.lock().await;
                        let offline_id = connector.transaction_id_offline;
                        if offline_id != 0 {
                            if connector.transaction_id == offline_id {
                                connector.transaction_id = response.transaction_id;
                            }
                            connector.transaction_id_offline = 0;
                            self.connectors.save(&connector).await?;
                        }
                        offline_id
                    };
                    if offline_id != 0 {
                        info!(
                            connector_id,
                            offline_id,
                            transaction_id = response.transaction_id,
                            "Transaction id assigned by Central System"
                        );
                        self.fifo
                            .rewrite_transaction_id(connector_id, offline_id, response.transaction_id)
                            .await?;
                        self.meter_values
                            .rewrite_transaction_id(connector_id, offline_id, response.transaction_id)
                            .await?;
                        self.smart_charging
                            .rebind_tx_profiles(connector_id, offline_id, response.transaction_id)
                            .await?;
                    }
                }
                if let Some(id_tag) = payload.get("idTag").and_then(Value::as_str) {
                    self.authent
                        .update_cache_entry(id_tag, &response.id_tag_info)
                        .await?;
                }
                if response.id_tag_info.status != AuthorizationStatus::Accepted {
                    warn!(connector_id, "Queued transaction deauthorized");
                    self.events.transaction_deauthorized(connector_id);
                }
            }
            "StopTransaction" => {
                let response: StopTransactionResponse = serde_json::from_value(response)?;
                if let (Some(info), Some(id_tag)) = (
                    response.id_tag_info,
                    payload.get("idTag").and_then(Value::as_str),
                ) {
                    self.authent.update_cache_entry(id_tag, &info).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn remote_start(&self, request: RemoteStartTransactionRequest) -> RemoteStartStopStatus {
        if self.status_manager.registration_status() != RegistrationStatus::Accepted {
            return RemoteStartStopStatus::Rejected;
        }
        // Without an explicit connector, pick the first available one
        let connector_id = match request.connector_id {
            Some(id) if id != CONNECTOR_ID_CHARGE_POINT && self.connectors.is_valid(id) => id,
            Some(_) => return RemoteStartStopStatus::Rejected,
            None => {
                let mut found = None;
                for id in self.connectors.connector_ids() {
                    if let Some(connector) = self.connectors.connector(id) {
                        let connector = connector.lock().await;
                        if connector.status == ChargePointStatus::Available {
                            found = Some(id);
                            break;
                        }
                    }
                }
                match found {
                    Some(id) => id,
                    None => return RemoteStartStopStatus::Rejected,
                }
            }
        };

        if !self
            .events
            .remote_start_requested(connector_id, &request.id_tag)
            .await
        {
            return RemoteStartStopStatus::Rejected;
        }

        if let Some(profile) = request.charging_profile {
            if profile.charging_profile_purpose != crate::types::ChargingProfilePurpose::TxProfile {
                return RemoteStartStopStatus::Rejected;
            }
            match self.smart_charging.install(connector_id, profile).await {
                Ok(true) => {}
                _ => return RemoteStartStopStatus::Rejected,
            }
        }

        let Some(this) = self.self_ref.upgrade() else {
            return RemoteStartStopStatus::Rejected;
        };
        let id_tag = request.id_tag;
        tokio::spawn(async move {
            if let Err(e) = this.start_transaction(connector_id, &id_tag).await {
                error!(connector_id, "Remote start failed: {e}");
            }
        });
        RemoteStartStopStatus::Accepted
    }

    async fn remote_stop(&self, transaction_id: i32) -> RemoteStartStopStatus {
        for connector_id in self.connectors.connector_ids() {
            let Some(connector) = self.connectors.connector(connector_id) else {
                continue;
            };
            let matches = connector.lock().await.transaction_id == transaction_id;
            if !matches {
                continue;
            }
            if !self.events.remote_stop_requested(connector_id).await {
                return RemoteStartStopStatus::Rejected;
            }
            let Some(this) = self.self_ref.upgrade() else {
                return RemoteStartStopStatus::Rejected;
            };
            tokio::spawn(async move {
                if let Err(e) = this
                    .stop_transaction(connector_id, "", Reason::Remote)
                    .await
                {
                    error!(connector_id, "Remote stop failed: {e}");
                }
            });
            return RemoteStartStopStatus::Accepted;
        }
        warn!(transaction_id, "No running transaction with this id");
        RemoteStartStopStatus::Rejected
    }

    pub fn stop(&self) {
        if let Some(task) = self.drain_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl MessageHandler for TransactionManager {
    async fn handle(&self, action: &str, payload: Value) -> HandlerResult {
        match action {
            "RemoteStartTransaction" => {
                let request: RemoteStartTransactionRequest = from_payload(payload)?;
                let status = self.remote_start(request).await;
                to_payload(&RemoteStartTransactionResponse { status })
            }
            "RemoteStopTransaction" => {
                let request: RemoteStopTransactionRequest = from_payload(payload)?;
                let status = self.remote_stop(request.transaction_id).await;
                to_payload(&RemoteStopTransactionResponse { status })
            }
            _ => Err(OcppError::not_implemented(action)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chargepoint::ocppconfig::OcppConfigStore;
    use crate::config::{ChargePointConfig, OcppConfig};
    use crate::database::open_in_memory;
    use crate::database::repositories::{
        AuthentCacheRepository, InternalConfigRepository, LocalListRepository,
        MeterValuesTxRepository, RequestFifoRepository,
    };
    use crate::rpc::{MessageDispatcher, RpcClient};
    use sea_orm::DatabaseConnection;

    struct HostStub;
    impl ChargePointEventsHandler for HostStub {}

    struct Fixture {
        transactions: Arc<TransactionManager>,
        connectors: Arc<ConnectorRegistry>,
        fifo: Arc<RequestFifo>,
        _db: DatabaseConnection,
    }

    /// Full manager chain over an in-memory store and a client that was
    /// never started: every request path runs offline.
    async fn fixture() -> Fixture {
        let db = open_in_memory().await.unwrap();
        let config = ChargePointConfig::default();
        let ocpp_config = Arc::new(OcppConfigStore::new(OcppConfig {
            allow_offline_tx_for_unknown_id: true,
            meter_value_sample_interval: 0,
            ..OcppConfig::default()
        }));
        let events: Arc<dyn ChargePointEventsHandler> = Arc::new(HostStub);
        let connectors = Arc::new(ConnectorRegistry::open(db.clone(), 2).await.unwrap());
        let rpc = Arc::new(RpcClient::new(
            Arc::new(MessageDispatcher::new()),
            Duration::from_secs(1),
            Duration::from_secs(1),
        ));
        let sender = Arc::new(MessageSender::new(rpc));
        let internal_config = InternalConfigRepository::new(db.clone());
        let status = StatusManager::new(
            config.clone(),
            Arc::clone(&ocpp_config),
            Arc::clone(&events),
            Arc::clone(&connectors),
            Arc::clone(&sender),
            internal_config.clone(),
        );
        let authent = Arc::new(
            AuthentManager::open(
                10,
                Arc::clone(&ocpp_config),
                Arc::clone(&sender),
                AuthentCacheRepository::new(db.clone()),
                LocalListRepository::new(db.clone()),
                internal_config,
            )
            .await
            .unwrap(),
        );
        let reservation = ReservationManager::new(
            Arc::clone(&ocpp_config),
            Arc::clone(&events),
            Arc::clone(&connectors),
            Arc::clone(&status),
            Arc::clone(&authent),
        );
        let smart_charging = Arc::new(
            SmartChargingManager::open(
                230.0,
                Arc::clone(&ocpp_config),
                db.clone(),
                Arc::clone(&connectors),
            )
            .await
            .unwrap(),
        );
        let fifo = Arc::new(RequestFifo::new(RequestFifoRepository::new(db.clone())));
        let meter_values = MeterValuesManager::new(
            Arc::clone(&ocpp_config),
            Arc::clone(&events),
            Arc::clone(&sender),
            Arc::clone(&connectors),
            MeterValuesTxRepository::new(db.clone()),
            Arc::clone(&fifo),
        );
        let transactions = TransactionManager::open(
            ocpp_config,
            events,
            Arc::clone(&connectors),
            sender,
            Arc::clone(&fifo),
            status,
            authent,
            reservation,
            meter_values,
            smart_charging,
        )
        .await;
        Fixture {
            transactions,
            connectors,
            fifo,
            _db: db,
        }
    }

    #[tokio::test]
    async fn offline_transaction_lifecycle_queues_in_order() {
        let f = fixture().await;

        let status = f.transactions.start_transaction(2, "TAG1").await.unwrap();
        assert_eq!(status, AuthorizationStatus::Accepted);
        {
            let connector = f.connectors.connector(2).unwrap();
            let connector = connector.lock().await;
            assert_eq!(connector.transaction_id, -1);
            assert_eq!(connector.transaction_id_offline, -1);
            assert_eq!(connector.status, ChargePointStatus::Charging);
            assert_eq!(connector.transaction_id_tag, "TAG1");
        }

        // a second start on the same connector is refused
        let status = f.transactions.start_transaction(2, "TAG2").await.unwrap();
        assert_eq!(status, AuthorizationStatus::ConcurrentTx);

        assert!(f
            .transactions
            .stop_transaction(2, "", Reason::Local)
            .await
            .unwrap());
        {
            let connector = f.connectors.connector(2).unwrap();
            let connector = connector.lock().await;
            assert_eq!(connector.transaction_id, 0);
            assert_eq!(connector.status, ChargePointStatus::Available);
        }

        // drain order equals enqueue order
        assert_eq!(f.fifo.count().await.unwrap(), 2);
        let first = f.fifo.front().await.unwrap().unwrap();
        assert_eq!(first.action, "StartTransaction");
        let stop: Value = {
            f.fifo.pop(first.id).await.unwrap();
            let second = f.fifo.front().await.unwrap().unwrap();
            assert_eq!(second.action, "StopTransaction");
            serde_json::from_str(&second.payload).unwrap()
        };
        assert_eq!(stop["transactionId"], -1);
    }

    #[tokio::test]
    async fn charge_point_connector_never_runs_transactions() {
        let f = fixture().await;
        let status = f.transactions.start_transaction(0, "TAG1").await.unwrap();
        assert_eq!(status, AuthorizationStatus::Invalid);
    }

    #[tokio::test]
    async fn consecutive_offline_transactions_get_distinct_ids() {
        let f = fixture().await;
        f.transactions.start_transaction(1, "TAG1").await.unwrap();
        f.transactions.start_transaction(2, "TAG2").await.unwrap();
        let first = f.connectors.connector(1).unwrap().lock().await.transaction_id;
        let second = f.connectors.connector(2).unwrap().lock().await.transaction_id;
        assert_eq!(first, -1);
        assert_eq!(second, -2);
    }

    #[tokio::test]
    async fn queued_ids_are_rewritten_after_assignment() {
        let f = fixture().await;
        f.transactions.start_transaction(2, "TAG1").await.unwrap();
        f.transactions
            .stop_transaction(2, "", Reason::Local)
            .await
            .unwrap();

        let rewritten = f.fifo.rewrite_transaction_id(2, -1, 555).await.unwrap();
        assert_eq!(rewritten, 1);

        f.fifo.pop(f.fifo.front().await.unwrap().unwrap().id).await.unwrap();
        let stop = f.fifo.front().await.unwrap().unwrap();
        let payload: Value = serde_json::from_str(&stop.payload).unwrap();
        assert_eq!(payload["transactionId"], 555);
    }

    #[tokio::test]
    async fn reserved_connector_requires_matching_tag() {
        let f = fixture().await;
        {
            let connector = f.connectors.connector(1).unwrap();
            let mut connector = connector.lock().await;
            connector.reservation_id = 7;
            connector.reservation_id_tag = "OWNER".to_string();
            connector.status = ChargePointStatus::Reserved;
            f.connectors.save(&connector).await.unwrap();
        }
        let status = f.transactions.start_transaction(1, "INTRUDER").await.unwrap();
        assert_eq!(status, AuthorizationStatus::Invalid);

        let status = f.transactions.start_transaction(1, "OWNER").await.unwrap();
        assert_eq!(status, AuthorizationStatus::Accepted);
        let connector = f.connectors.connector(1).unwrap();
        let connector = connector.lock().await;
        assert_eq!(connector.reservation_id, 0, "reservation consumed");
        assert_eq!(connector.status, ChargePointStatus::Charging);
    }
}
