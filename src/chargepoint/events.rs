//! Host-facing event handler
//!
//! The host implements [`ChargePointEventsHandler`] to receive connection
//! and protocol events and to serve the callbacks the stack cannot answer
//! itself (meter readings, firmware and diagnostics file transfers,
//! certificate generation). Every method has a conservative default so a
//! host only implements what it supports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::messages::SignedUpdateFirmwareRequest;
use crate::types::{
    AvailabilityType, CertificateHashData, DataTransferStatus, LogType, Measurand, Phase,
    RegistrationStatus, ResetType, UnlockStatus,
};

#[async_trait]
pub trait ChargePointEventsHandler: Send + Sync {
    /// The link to the Central System went up or down.
    fn connection_state_changed(&self, connected: bool) {
        let _ = connected;
    }

    /// A connection attempt failed. `last_registration_status` tells the
    /// host whether offline operations are allowed.
    fn connection_failed(&self, last_registration_status: RegistrationStatus) {
        let _ = last_registration_status;
    }

    /// Outcome of the boot notification handshake.
    fn registration_status_changed(&self, status: RegistrationStatus) {
        let _ = status;
    }

    /// Clock hint extracted from a Central System response.
    fn datetime_received(&self, datetime: DateTime<Utc>) {
        let _ = datetime;
    }

    /// The Central System asked to start a transaction. Returning `false`
    /// rejects the request.
    async fn remote_start_requested(&self, connector_id: u32, id_tag: &str) -> bool {
        let _ = (connector_id, id_tag);
        true
    }

    /// The Central System asked to stop the transaction on a connector.
    async fn remote_stop_requested(&self, connector_id: u32) -> bool {
        let _ = connector_id;
        true
    }

    /// A queued StartTransaction was answered with a non-Accepted status
    /// after reconnection: charging must stop.
    fn transaction_deauthorized(&self, connector_id: u32) {
        let _ = connector_id;
    }

    /// Provide one meter sample. `None` means the measurand is not wired.
    async fn get_meter_value(
        &self,
        connector_id: u32,
        measurand: Measurand,
        phase: Option<Phase>,
    ) -> Option<String> {
        let _ = (connector_id, measurand, phase);
        None
    }

    /// Vendor-specific DataTransfer received from the Central System.
    async fn data_transfer_requested(
        &self,
        vendor_id: &str,
        message_id: Option<&str>,
        data: Option<&str>,
    ) -> (DataTransferStatus, Option<String>) {
        let _ = (vendor_id, message_id, data);
        (DataTransferStatus::UnknownVendorId, None)
    }

    /// The Central System asked for a reset. Returning `true` accepts it;
    /// performing the actual restart is the host's duty.
    async fn reset_requested(&self, reset_type: ResetType) -> bool {
        let _ = reset_type;
        true
    }

    async fn unlock_connector_requested(&self, connector_id: u32) -> UnlockStatus {
        let _ = connector_id;
        UnlockStatus::NotSupported
    }

    /// Availability change requested. Returning `false` rejects it.
    async fn availability_change_requested(
        &self,
        connector_id: u32,
        availability: AvailabilityType,
    ) -> bool {
        let _ = (connector_id, availability);
        true
    }

    fn reservation_started(&self, connector_id: u32, reservation_id: i32) {
        let _ = (connector_id, reservation_id);
    }

    fn reservation_ended(&self, connector_id: u32, reservation_id: i32) {
        let _ = (connector_id, reservation_id);
    }

    /// Download and install the firmware at `location` starting at
    /// `retrieve_date`. Progress is reported through
    /// [`ChargePoint::notify_firmware_update_status`](crate::ChargePoint).
    async fn update_firmware_requested(&self, location: &str, retrieve_date: DateTime<Utc>) -> bool {
        let _ = (location, retrieve_date);
        false
    }

    /// Signed firmware update (security extensions). The host validates the
    /// signature and reports through
    /// `notify_signed_update_firmware_status`.
    async fn signed_update_firmware_requested(&self, request: &SignedUpdateFirmwareRequest) -> bool {
        let _ = request;
        false
    }

    /// Assemble the diagnostics archive; returns its file name or `None`
    /// when no diagnostics are available. The upload itself happens in
    /// [`upload_file`](Self::upload_file).
    async fn diagnostics_requested(
        &self,
        location: &str,
        start_time: Option<DateTime<Utc>>,
        stop_time: Option<DateTime<Utc>>,
    ) -> Option<String> {
        let _ = (location, start_time, stop_time);
        None
    }

    /// Assemble a log archive (security extensions); returns its file
    /// name.
    async fn log_upload_requested(
        &self,
        log_type: LogType,
        location: &str,
        oldest: Option<DateTime<Utc>>,
        latest: Option<DateTime<Utc>>,
    ) -> Option<String> {
        let _ = (log_type, location, oldest, latest);
        None
    }

    /// Upload a previously assembled file to `location`. Returns whether
    /// the upload succeeded.
    async fn upload_file(&self, file_name: &str, location: &str) -> bool {
        let _ = (file_name, location);
        false
    }

    /// Compute the OCPP hash data of a PEM certificate. X.509 tooling is
    /// the host's concern; `None` rejects the certificate.
    async fn certificate_hash_data(&self, certificate_pem: &str) -> Option<CertificateHashData> {
        let _ = certificate_pem;
        None
    }

    /// Generate a certificate signing request for the charge point key
    /// pair. X.509 tooling is the host's concern.
    async fn generate_csr(&self) -> Option<String> {
        None
    }

    /// The Central System delivered the signed charge point certificate.
    fn certificate_signed(&self, certificate_chain: &str) {
        let _ = certificate_chain;
    }
}
