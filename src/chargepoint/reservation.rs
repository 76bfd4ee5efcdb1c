//! Reservation manager
//!
//! Serves ReserveNow / CancelReservation, sweeps expired reservations and
//! guards transaction starts on reserved connectors.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::chargepoint::authent::AuthentManager;
use crate::chargepoint::connectors::{ConnectorRegistry, CONNECTOR_ID_CHARGE_POINT};
use crate::chargepoint::events::ChargePointEventsHandler;
use crate::chargepoint::ocppconfig::OcppConfigStore;
use crate::chargepoint::status::StatusManager;
use crate::messages::{
    CancelReservationRequest, CancelReservationResponse, ReserveNowRequest, ReserveNowResponse,
};
use crate::rpc::{from_payload, to_payload, HandlerResult, MessageHandler, OcppError};
use crate::types::{
    AuthorizationStatus, CancelReservationStatus, ChargePointErrorCode, ChargePointStatus,
    ReservationStatus,
};

pub struct ReservationManager {
    ocpp_config: Arc<OcppConfigStore>,
    events: Arc<dyn ChargePointEventsHandler>,
    connectors: Arc<ConnectorRegistry>,
    status_manager: Arc<StatusManager>,
    authent: Arc<AuthentManager>,
    expiry_task: Mutex<Option<JoinHandle<()>>>,
    self_ref: Weak<Self>,
}

impl ReservationManager {
    pub fn new(
        ocpp_config: Arc<OcppConfigStore>,
        events: Arc<dyn ChargePointEventsHandler>,
        connectors: Arc<ConnectorRegistry>,
        status_manager: Arc<StatusManager>,
        authent: Arc<AuthentManager>,
    ) -> Arc<Self> {
        let manager = Arc::new_cyclic(|self_ref| Self {
            ocpp_config,
            events,
            connectors,
            status_manager,
            authent,
            expiry_task: Mutex::new(None),
            self_ref: self_ref.clone(),
        });
        manager.start_expiry_sweep();
        manager
    }

    fn start_expiry_sweep(&self) {
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                this.sweep_expired().await;
            }
        });
        *self.expiry_task.lock().unwrap() = Some(task);
    }

    async fn sweep_expired(&self) {
        let now = Utc::now();
        for connector_id in 0..=self.connectors.count() {
            let Some(connector) = self.connectors.connector(connector_id) else {
                continue;
            };
            let expired = {
                let connector = connector.lock().await;
                connector.has_reservation()
                    && connector
                        .reservation_expiry_date
                        .is_some_and(|expiry| expiry <= now)
            };
            if expired {
                info!(connector_id, "Reservation expired");
                self.end_reservation(connector_id, true).await;
            }
        }
    }

    /// Release the reservation of one connector; restores Available when
    /// the connector was only occupied by the reservation.
    async fn end_reservation(&self, connector_id: u32, notify_host: bool) {
        let Some(connector) = self.connectors.connector(connector_id) else {
            return;
        };
        let (reservation_id, was_reserved) = {
            let mut connector = connector.lock().await;
            let id = connector.reservation_id;
            let was_reserved = connector.status == ChargePointStatus::Reserved;
            connector.reservation_id = 0;
            connector.reservation_id_tag.clear();
            connector.reservation_parent_id_tag.clear();
            connector.reservation_expiry_date = None;
            if let Err(e) = self.connectors.save(&connector).await {
                warn!(connector_id, "Could not persist connector: {e}");
            }
            (id, was_reserved)
        };
        if was_reserved {
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
        }
        if notify_host && reservation_id != 0 {
            self.events.reservation_ended(connector_id, reservation_id);
        }
    }

    /// Consume the reservation when a transaction starts with a matching
    /// tag.
    pub async fn clear_reservation(&self, connector_id: u32) {
        self.end_reservation(connector_id, true).await;
    }

    /// Whether a transaction with `id_tag` may start on a reserved
    /// connector: the tag itself or its parent must match the reservation.
    pub async fn is_transaction_allowed(
        &self,
        connector_id: u32,
        id_tag: &str,
    ) -> AuthorizationStatus {
        let Some(connector) = self.connectors.connector(connector_id) else {
            return AuthorizationStatus::Invalid;
        };
        let (reserved_tag, reserved_parent) = {
            let connector = connector.lock().await;
            if !connector.has_reservation() {
                return AuthorizationStatus::Accepted;
            }
            (
                connector.reservation_id_tag.clone(),
                connector.reservation_parent_id_tag.clone(),
            )
        };
        if reserved_tag == id_tag {
            return AuthorizationStatus::Accepted;
        }
        match self.authent.authorize(id_tag).await {
            Ok((AuthorizationStatus::Accepted, Some(parent)))
                if !reserved_parent.is_empty() && parent == reserved_parent =>
            {
                AuthorizationStatus::Accepted
            }
            _ => {
                warn!(connector_id, id_tag, "Connector reserved for another tag");
                AuthorizationStatus::Invalid
            }
        }
    }

    async fn reserve_now(&self, request: ReserveNowRequest) -> ReservationStatus {
        let connector_id = request.connector_id;
        if !self.connectors.is_valid(connector_id) {
            return ReservationStatus::Rejected;
        }
        if connector_id == CONNECTOR_ID_CHARGE_POINT
            && !self.ocpp_config.snapshot().reserve_connector_zero_supported
        {
            return ReservationStatus::Rejected;
        }
        let Some(connector) = self.connectors.connector(connector_id) else {
            return ReservationStatus::Rejected;
        };

        let accepted = {
            let mut connector = connector.lock().await;
            match connector.status {
                ChargePointStatus::Faulted => return ReservationStatus::Faulted,
                ChargePointStatus::Unavailable => return ReservationStatus::Unavailable,
                ChargePointStatus::Reserved
                    if connector.reservation_id != request.reservation_id =>
                {
                    return ReservationStatus::Occupied;
                }
                _ if connector.has_transaction() => return ReservationStatus::Occupied,
                ChargePointStatus::Available | ChargePointStatus::Reserved => {
                    connector.reservation_id = request.reservation_id;
                    connector.reservation_id_tag = request.id_tag.clone();
                    connector.reservation_parent_id_tag =
                        request.parent_id_tag.clone().unwrap_or_default();
                    connector.reservation_expiry_date = Some(request.expiry_date);
                    if let Err(e) = self.connectors.save(&connector).await {
                        warn!(connector_id, "Could not persist connector: {e}");
                    }
                    true
                }
                _ => return ReservationStatus::Occupied,
            }
        };

        if accepted {
            info!(
                connector_id,
                reservation_id = request.reservation_id,
                "Reservation accepted"
            );
            if connector_id != CONNECTOR_ID_CHARGE_POINT {
                self.status_manager
                    .update_connector_status(
                        connector_id,
                        ChargePointStatus::Reserved,
                        ChargePointErrorCode::NoError,
                        "",
                        "",
                        "",
                    )
                    .await;
            }
            self.events
                .reservation_started(connector_id, request.reservation_id);
        }
        ReservationStatus::Accepted
    }

    async fn cancel_reservation(&self, reservation_id: i32) -> CancelReservationStatus {
        for connector_id in 0..=self.connectors.count() {
            let Some(connector) = self.connectors.connector(connector_id) else {
                continue;
            };
            let matches = connector.lock().await.reservation_id == reservation_id;
            if matches {
                info!(connector_id, reservation_id, "Reservation cancelled");
                self.end_reservation(connector_id, true).await;
                return CancelReservationStatus::Accepted;
            }
        }
        CancelReservationStatus::Rejected
    }

    pub fn stop(&self) {
        if let Some(task) = self.expiry_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl MessageHandler for ReservationManager {
    async fn handle(&self, action: &str, payload: Value) -> HandlerResult {
        match action {
            "ReserveNow" => {
                let request: ReserveNowRequest = from_payload(payload)?;
                let status = self.reserve_now(request).await;
                to_payload(&ReserveNowResponse { status })
            }
            "CancelReservation" => {
                let request: CancelReservationRequest = from_payload(payload)?;
                let status = self.cancel_reservation(request.reservation_id).await;
                to_payload(&CancelReservationResponse { status })
            }
            _ => Err(OcppError::not_implemented(action)),
        }
    }
}
