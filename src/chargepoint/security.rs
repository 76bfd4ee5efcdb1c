//! Security manager
//!
//! Security events log (critical events are notified to the Central
//! System), installed CA certificates, the charge point certificate
//! lifecycle (CSR -> SignCertificate -> CertificateSigned) and the
//! security-profile parameter checks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::chargepoint::ocppconfig::OcppConfigStore;
use crate::chargepoint::trigger::{TriggerHandler, TriggerSource};
use crate::database::repositories::certificates::CaDeleteOutcome;
use crate::database::repositories::{
    CaCertificateRepository, CpCertificateRepository, SecurityLogsRepository,
};
use crate::chargepoint::events::ChargePointEventsHandler;
use crate::messages::{
    CertificateSignedRequest, CertificateSignedResponse, DeleteCertificateRequest,
    DeleteCertificateResponse, GetInstalledCertificateIdsRequest,
    GetInstalledCertificateIdsResponse, InstallCertificateRequest, InstallCertificateResponse,
    SecurityEventNotificationRequest, SignCertificateRequest,
};
use crate::rpc::{from_payload, to_payload, CallResult, HandlerResult, MessageHandler, MessageSender, OcppError};
use crate::support::errors::ChargePointResult;
use crate::types::{
    CertificateSignedStatus, CertificateStatus, CertificateUse, ConfigurationStatus,
    DeleteCertificateStatus, GetInstalledCertificateStatus, MessageTriggerExtended,
};

const SECURITY_EVENT_RETRIES: u32 = 3;

pub struct SecurityManager {
    max_log_entries: u32,
    ocpp_config: Arc<OcppConfigStore>,
    events: Arc<dyn ChargePointEventsHandler>,
    sender: Arc<MessageSender>,
    logs: SecurityLogsRepository,
    ca_certificates: CaCertificateRepository,
    cp_certificates: CpCertificateRepository,
    /// Requirement flags for the security-profile checks, kept in sync
    /// with the stores so the (synchronous) check functions never touch
    /// the database.
    has_central_system_root: AtomicBool,
    has_valid_cp_certificate: AtomicBool,
    self_ref: Weak<Self>,
}

impl SecurityManager {
    pub async fn open(
        max_log_entries: u32,
        ocpp_config: Arc<OcppConfigStore>,
        events: Arc<dyn ChargePointEventsHandler>,
        sender: Arc<MessageSender>,
        logs: SecurityLogsRepository,
        ca_certificates: CaCertificateRepository,
        cp_certificates: CpCertificateRepository,
    ) -> ChargePointResult<Arc<Self>> {
        let has_root = ca_certificates
            .has_any(CertificateUse::CentralSystemRootCertificate)
            .await?;
        let has_cp = cp_certificates.latest_signed().await?.is_some();

        Ok(Arc::new_cyclic(|self_ref| Self {
            max_log_entries,
            ocpp_config,
            events,
            sender,
            logs,
            ca_certificates,
            cp_certificates,
            has_central_system_root: AtomicBool::new(has_root),
            has_valid_cp_certificate: AtomicBool::new(has_cp),
            self_ref: self_ref.clone(),
        }))
    }

    // ── Security events log ────────────────────────────────────

    /// Persist a security event; critical events are also sent as
    /// SecurityEventNotification (retried on transient failures).
    pub async fn log_security_event(
        &self,
        kind: &str,
        message: &str,
        critical: bool,
    ) -> ChargePointResult<()> {
        let timestamp = Utc::now();
        self.logs
            .append(kind, message, critical, timestamp, self.max_log_entries)
            .await?;
        info!(kind, critical, "Security event logged");

        if critical {
            if let Some(this) = self.self_ref.upgrade() {
                let request = SecurityEventNotificationRequest {
                    kind: kind.to_string(),
                    timestamp,
                    tech_info: (!message.is_empty()).then(|| message.to_string()),
                };
                tokio::spawn(async move {
                    for attempt in 1..=SECURITY_EVENT_RETRIES {
                        match this.sender.send(&request).await {
                            CallResult::Ok(_) => return,
                            other => warn!(attempt, "SecurityEventNotification failed: {other:?}"),
                        }
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                });
            }
        }
        Ok(())
    }

    pub async fn clear_security_events(&self) -> ChargePointResult<()> {
        self.logs.clear().await
    }

    // ── Charge point certificate lifecycle ─────────────────────

    /// Store `csr` as the pending request and send SignCertificate.
    /// Returns whether the Central System accepted the request.
    pub async fn sign_certificate(&self, csr: &str) -> ChargePointResult<bool> {
        self.cp_certificates.create_pending(csr).await?;
        let request = SignCertificateRequest {
            csr: csr.to_string(),
        };
        match self.sender.send(&request).await {
            CallResult::Ok(response) => {
                Ok(response.status == CertificateSignedStatus::Accepted)
            }
            other => {
                warn!("SignCertificate failed: {other:?}");
                Ok(false)
            }
        }
    }

    /// Generate a CSR through the host and send it for signing. Used by
    /// the SignChargePointCertificate extended trigger.
    async fn request_certificate_signing(&self) -> bool {
        match self.events.generate_csr().await {
            Some(csr) => self.sign_certificate(&csr).await.unwrap_or(false),
            None => {
                warn!("Host cannot generate a certificate signing request");
                false
            }
        }
    }

    async fn certificate_signed(&self, chain: &str) -> ChargePointResult<CertificateSignedStatus> {
        if chain.is_empty() {
            return Ok(CertificateSignedStatus::Rejected);
        }
        if self.cp_certificates.complete_pending(chain).await? {
            self.has_valid_cp_certificate.store(true, Ordering::SeqCst);
            self.events.certificate_signed(chain);
            Ok(CertificateSignedStatus::Accepted)
        } else {
            warn!("CertificateSigned received without a pending request");
            Ok(CertificateSignedStatus::Rejected)
        }
    }

    // ── Security profile parameter checks ──────────────────────

    /// `SecurityProfile` may only increase, and each profile has
    /// prerequisites on the credentials and certificates.
    pub fn check_security_profile(&self, value: &str) -> ConfigurationStatus {
        let cfg = self.ocpp_config.snapshot();
        let Ok(requested) = value.parse::<u32>() else {
            return ConfigurationStatus::Rejected;
        };
        if requested <= cfg.security_profile {
            return ConfigurationStatus::Rejected;
        }
        let accepted = match requested {
            1 => !cfg.authorization_key.is_empty(),
            2 => {
                !cfg.authorization_key.is_empty()
                    && self.has_central_system_root.load(Ordering::SeqCst)
            }
            3 => {
                self.has_central_system_root.load(Ordering::SeqCst)
                    && self.has_valid_cp_certificate.load(Ordering::SeqCst)
            }
            _ => false,
        };
        if accepted {
            ConfigurationStatus::Accepted
        } else {
            ConfigurationStatus::Rejected
        }
    }

    /// `AuthorizationKey` may not become empty while Basic credentials are
    /// in use (profiles 1 and 2).
    pub fn check_authorization_key(&self, value: &str) -> ConfigurationStatus {
        let profile = self.ocpp_config.snapshot().security_profile;
        if value.is_empty() && (profile == 1 || profile == 2) {
            ConfigurationStatus::Rejected
        } else {
            ConfigurationStatus::Accepted
        }
    }
}

#[async_trait]
impl MessageHandler for SecurityManager {
    async fn handle(&self, action: &str, payload: Value) -> HandlerResult {
        match action {
            "CertificateSigned" => {
                let request: CertificateSignedRequest = from_payload(payload)?;
                let status = self
                    .certificate_signed(&request.certificate_chain)
                    .await
                    .map_err(|e| OcppError::internal(e.to_string()))?;
                to_payload(&CertificateSignedResponse { status })
            }
            "InstallCertificate" => {
                let request: InstallCertificateRequest = from_payload(payload)?;
                let status = match self
                    .events
                    .certificate_hash_data(&request.certificate)
                    .await
                {
                    Some(hash_data) => {
                        match self
                            .ca_certificates
                            .install(request.certificate_type, &hash_data, &request.certificate)
                            .await
                        {
                            Ok(()) => {
                                if request.certificate_type
                                    == CertificateUse::CentralSystemRootCertificate
                                {
                                    self.has_central_system_root.store(true, Ordering::SeqCst);
                                }
                                CertificateStatus::Accepted
                            }
                            Err(e) => {
                                error!("Could not install certificate: {e}");
                                CertificateStatus::Failed
                            }
                        }
                    }
                    None => CertificateStatus::Rejected,
                };
                to_payload(&InstallCertificateResponse { status })
            }
            "DeleteCertificate" => {
                let request: DeleteCertificateRequest = from_payload(payload)?;
                let outcome = self
                    .ca_certificates
                    .delete(&request.certificate_hash_data)
                    .await
                    .map_err(|e| OcppError::internal(e.to_string()))?;
                let status = match outcome {
                    CaDeleteOutcome::Deleted => {
                        let has_root = self
                            .ca_certificates
                            .has_any(CertificateUse::CentralSystemRootCertificate)
                            .await
                            .unwrap_or(false);
                        self.has_central_system_root.store(has_root, Ordering::SeqCst);
                        DeleteCertificateStatus::Accepted
                    }
                    CaDeleteOutcome::NotFound => DeleteCertificateStatus::NotFound,
                    CaDeleteOutcome::InUse => DeleteCertificateStatus::Failed,
                };
                to_payload(&DeleteCertificateResponse { status })
            }
            "GetInstalledCertificateIds" => {
                let request: GetInstalledCertificateIdsRequest = from_payload(payload)?;
                let ids = self
                    .ca_certificates
                    .list(request.certificate_type)
                    .await
                    .map_err(|e| OcppError::internal(e.to_string()))?;
                let response = if ids.is_empty() {
                    GetInstalledCertificateIdsResponse {
                        status: GetInstalledCertificateStatus::NotFound,
                        certificate_hash_data: None,
                    }
                } else {
                    GetInstalledCertificateIdsResponse {
                        status: GetInstalledCertificateStatus::Accepted,
                        certificate_hash_data: Some(ids),
                    }
                };
                to_payload(&response)
            }
            _ => Err(OcppError::not_implemented(action)),
        }
    }
}

#[async_trait]
impl TriggerHandler for SecurityManager {
    async fn on_trigger(self: Arc<Self>, source: TriggerSource, _connector_id: Option<u32>) -> bool {
        if source != TriggerSource::Extended(MessageTriggerExtended::SignChargePointCertificate) {
            return false;
        }
        let this = Arc::clone(&self);
        tokio::spawn(async move {
            this.request_certificate_signing().await;
        });
        true
    }
}
