//! Table repositories
//!
//! Thin wrappers over the entity API, one per table. They log with
//! `tracing` and surface every failure as
//! [`ChargePointError::Database`](crate::support::errors::ChargePointError).

pub mod authent;
pub mod certificates;
pub mod charging_profiles;
pub mod internal_config;
pub mod meter_values_tx;
pub mod request_fifo;
pub mod security_logs;

pub use authent::{AuthentCacheRepository, AuthentEntry, LocalListRepository};
pub use certificates::{CaCertificateRepository, CpCertificateRepository};
pub use charging_profiles::ChargingProfileRepository;
pub use internal_config::InternalConfigRepository;
pub use meter_values_tx::MeterValuesTxRepository;
pub use request_fifo::RequestFifoRepository;
pub use security_logs::SecurityLogsRepository;
