//! SeaORM entities, one per persisted table

pub mod authent_cache;
pub mod authent_local_list;
pub mod ca_certificate;
pub mod charging_profile;
pub mod connector;
pub mod cp_certificate;
pub mod internal_config;
pub mod meter_values_tx;
pub mod request_fifo;
pub mod security_log;
