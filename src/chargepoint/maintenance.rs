//! Maintenance manager
//!
//! Firmware updates (plain and signed), diagnostics and log uploads. The
//! file transfers themselves are the host's duty; this manager tracks the
//! public status values and sends the corresponding notifications,
//! including their re-send on TriggerMessage.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::chargepoint::events::ChargePointEventsHandler;
use crate::chargepoint::trigger::{TriggerHandler, TriggerSource};
use crate::messages::{
    DiagnosticsStatusNotificationRequest, FirmwareStatusNotificationRequest,
    GetDiagnosticsRequest, GetDiagnosticsResponse, GetLogRequest, GetLogResponse,
    LogStatusNotificationRequest, SignedFirmwareStatusNotificationRequest,
    SignedUpdateFirmwareRequest, SignedUpdateFirmwareResponse, UpdateFirmwareRequest,
    UpdateFirmwareResponse,
};
use crate::rpc::{from_payload, to_payload, HandlerResult, MessageHandler, MessageSender, OcppError};
use crate::types::{
    DiagnosticsStatus, FirmwareStatus, LogStatus, MessageTrigger, MessageTriggerExtended,
    SignedFirmwareStatus, UpdateFirmwareStatus, UploadLogStatus,
};

pub struct MaintenanceManager {
    events: Arc<dyn ChargePointEventsHandler>,
    sender: Arc<MessageSender>,
    firmware_status: Mutex<FirmwareStatus>,
    signed_firmware_status: Mutex<(SignedFirmwareStatus, Option<i32>)>,
    diagnostics_status: Mutex<DiagnosticsStatus>,
    log_status: Mutex<(UploadLogStatus, Option<i32>)>,
    self_ref: Weak<Self>,
}

impl MaintenanceManager {
    pub fn new(
        events: Arc<dyn ChargePointEventsHandler>,
        sender: Arc<MessageSender>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            events,
            sender,
            firmware_status: Mutex::new(FirmwareStatus::Idle),
            signed_firmware_status: Mutex::new((SignedFirmwareStatus::Idle, None)),
            diagnostics_status: Mutex::new(DiagnosticsStatus::Idle),
            log_status: Mutex::new((UploadLogStatus::Idle, None)),
            self_ref: self_ref.clone(),
        })
    }

    // ── Status notifications ───────────────────────────────────

    async fn send_firmware_status(&self, status: FirmwareStatus) {
        *self.firmware_status.lock().unwrap() = status;
        let request = FirmwareStatusNotificationRequest { status };
        if !self.sender.send(&request).await.is_ok() {
            warn!(status = %status, "FirmwareStatusNotification not delivered");
        }
    }

    async fn send_signed_firmware_status(&self, status: SignedFirmwareStatus) {
        let request_id = {
            let mut guard = self.signed_firmware_status.lock().unwrap();
            guard.0 = status;
            guard.1
        };
        let request = SignedFirmwareStatusNotificationRequest { status, request_id };
        if !self.sender.send(&request).await.is_ok() {
            warn!(status = %status, "SignedFirmwareStatusNotification not delivered");
        }
    }

    async fn send_diagnostics_status(&self, status: DiagnosticsStatus) {
        *self.diagnostics_status.lock().unwrap() = status;
        let request = DiagnosticsStatusNotificationRequest { status };
        if !self.sender.send(&request).await.is_ok() {
            warn!(status = %status, "DiagnosticsStatusNotification not delivered");
        }
    }

    async fn send_log_status(&self, status: UploadLogStatus) {
        let request_id = {
            let mut guard = self.log_status.lock().unwrap();
            guard.0 = status;
            guard.1
        };
        let request = LogStatusNotificationRequest { status, request_id };
        if !self.sender.send(&request).await.is_ok() {
            warn!(status = %status, "LogStatusNotification not delivered");
        }
    }

    // ── Host notifications ─────────────────────────────────────

    /// Host report after a firmware update requested by UpdateFirmware.
    pub async fn notify_firmware_update_status(&self, success: bool) {
        let status = if success {
            FirmwareStatus::Installed
        } else {
            FirmwareStatus::InstallationFailed
        };
        self.send_firmware_status(status).await;
    }

    /// Host report during a signed firmware update.
    pub async fn notify_signed_update_firmware_status(&self, status: SignedFirmwareStatus) {
        self.send_signed_firmware_status(status).await;
    }

    // ── Request handling ───────────────────────────────────────

    async fn get_diagnostics(&self, request: GetDiagnosticsRequest) -> GetDiagnosticsResponse {
        let file_name = self
            .events
            .diagnostics_requested(&request.location, request.start_time, request.stop_time)
            .await;
        let Some(file_name) = file_name else {
            debug!("No diagnostics available");
            return GetDiagnosticsResponse { file_name: None };
        };

        if let Some(this) = self.self_ref.upgrade() {
            let upload_name = file_name.clone();
            let location = request.location.clone();
            tokio::spawn(async move {
                this.send_diagnostics_status(DiagnosticsStatus::Uploading).await;
                let uploaded = this.events.upload_file(&upload_name, &location).await;
                let status = if uploaded {
                    DiagnosticsStatus::Uploaded
                } else {
                    DiagnosticsStatus::UploadFailed
                };
                this.send_diagnostics_status(status).await;
            });
        }
        GetDiagnosticsResponse {
            file_name: Some(file_name),
        }
    }

    async fn get_log(&self, request: GetLogRequest) -> GetLogResponse {
        let file_name = self
            .events
            .log_upload_requested(
                request.log_type,
                &request.log.remote_location,
                request.log.oldest_timestamp,
                request.log.latest_timestamp,
            )
            .await;
        let Some(file_name) = file_name else {
            return GetLogResponse {
                status: LogStatus::Rejected,
                filename: None,
            };
        };

        self.log_status.lock().unwrap().1 = Some(request.request_id);
        if let Some(this) = self.self_ref.upgrade() {
            let upload_name = file_name.clone();
            let location = request.log.remote_location.clone();
            tokio::spawn(async move {
                this.send_log_status(UploadLogStatus::Uploading).await;
                let uploaded = this.events.upload_file(&upload_name, &location).await;
                let status = if uploaded {
                    UploadLogStatus::Uploaded
                } else {
                    UploadLogStatus::UploadFailure
                };
                this.send_log_status(status).await;
            });
        }
        GetLogResponse {
            status: LogStatus::Accepted,
            filename: Some(file_name),
        }
    }

    async fn update_firmware(&self, request: UpdateFirmwareRequest) {
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            this.send_firmware_status(FirmwareStatus::Downloading).await;
            let accepted = this
                .events
                .update_firmware_requested(&request.location, request.retrieve_date)
                .await;
            if accepted {
                this.send_firmware_status(FirmwareStatus::Downloaded).await;
                // Installed / InstallationFailed follows through
                // notify_firmware_update_status
            } else {
                this.send_firmware_status(FirmwareStatus::DownloadFailed).await;
            }
        });
    }

    async fn signed_update_firmware(
        &self,
        request: SignedUpdateFirmwareRequest,
    ) -> UpdateFirmwareStatus {
        self.signed_firmware_status.lock().unwrap().1 = Some(request.request_id);
        let accepted = self.events.signed_update_firmware_requested(&request).await;
        if !accepted {
            return UpdateFirmwareStatus::Rejected;
        }
        if let Some(this) = self.self_ref.upgrade() {
            tokio::spawn(async move {
                this.send_signed_firmware_status(SignedFirmwareStatus::Downloading)
                    .await;
            });
        }
        UpdateFirmwareStatus::Accepted
    }
}

#[async_trait]
impl MessageHandler for MaintenanceManager {
    async fn handle(&self, action: &str, payload: Value) -> HandlerResult {
        match action {
            "GetDiagnostics" => {
                let request: GetDiagnosticsRequest = from_payload(payload)?;
                let response = self.get_diagnostics(request).await;
                to_payload(&response)
            }
            "GetLog" => {
                let request: GetLogRequest = from_payload(payload)?;
                let response = self.get_log(request).await;
                to_payload(&response)
            }
            "UpdateFirmware" => {
                let request: UpdateFirmwareRequest = from_payload(payload)?;
                self.update_firmware(request).await;
                to_payload(&UpdateFirmwareResponse {})
            }
            "SignedUpdateFirmware" => {
                let request: SignedUpdateFirmwareRequest = from_payload(payload)?;
                let status = self.signed_update_firmware(request).await;
                to_payload(&SignedUpdateFirmwareResponse { status })
            }
            _ => Err(OcppError::not_implemented(action)),
        }
    }
}

#[async_trait]
impl TriggerHandler for MaintenanceManager {
    async fn on_trigger(self: Arc<Self>, source: TriggerSource, _connector_id: Option<u32>) -> bool {
        match source {
            TriggerSource::Standard(MessageTrigger::FirmwareStatusNotification) => {
                let status = *self.firmware_status.lock().unwrap();
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    this.send_firmware_status(status).await;
                });
                true
            }
            TriggerSource::Extended(MessageTriggerExtended::FirmwareStatusNotification) => {
                let status = self.signed_firmware_status.lock().unwrap().0;
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    this.send_signed_firmware_status(status).await;
                });
                true
            }
            TriggerSource::Standard(MessageTrigger::DiagnosticsStatusNotification) => {
                let status = *self.diagnostics_status.lock().unwrap();
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    this.send_diagnostics_status(status).await;
                });
                true
            }
            TriggerSource::Extended(MessageTriggerExtended::LogStatusNotification) => {
                let status = self.log_status.lock().unwrap().0;
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    this.send_log_status(status).await;
                });
                true
            }
            _ => false,
        }
    }
}
