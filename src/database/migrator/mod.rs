//! Schema migrations

use sea_orm_migration::prelude::*;

mod m20240901_000001_create_connectors;
mod m20240901_000002_create_charging_profiles;
mod m20240901_000003_create_authent_cache;
mod m20240901_000004_create_authent_local_list;
mod m20240901_000005_create_internal_config;
mod m20240901_000006_create_ca_certificates;
mod m20240901_000007_create_cp_certificates;
mod m20240901_000008_create_security_logs;
mod m20240901_000009_create_request_fifo;
mod m20240901_000010_create_meter_values_tx;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240901_000001_create_connectors::Migration),
            Box::new(m20240901_000002_create_charging_profiles::Migration),
            Box::new(m20240901_000003_create_authent_cache::Migration),
            Box::new(m20240901_000004_create_authent_local_list::Migration),
            Box::new(m20240901_000005_create_internal_config::Migration),
            Box::new(m20240901_000006_create_ca_certificates::Migration),
            Box::new(m20240901_000007_create_cp_certificates::Migration),
            Box::new(m20240901_000008_create_security_logs::Migration),
            Box::new(m20240901_000009_create_request_fifo::Migration),
            Box::new(m20240901_000010_create_meter_values_tx::Migration),
        ]
    }
}
