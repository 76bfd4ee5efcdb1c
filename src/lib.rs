//! # OCPP 1.6 Charge Point stack
//!
//! Client-side implementation of the OCPP 1.6-J protocol for EV charging
//! stations: WebSocket/JSON-RPC transport, the standard message exchanges,
//! and the local state (connectors, transactions, authorization, smart
//! charging profiles) needed to behave correctly while disconnected.
//!
//! ## Architecture
//!
//! - **support**: Cross-cutting utilities (errors, OCPP-J framing)
//! - **types**: OCPP 1.6 data types and enumerations
//! - **messages**: Request/response payloads, one module per feature profile
//! - **rpc**: WebSocket RPC client, message dispatcher and sender
//! - **database**: SQLite persistence (entities, migrations, repositories)
//! - **chargepoint**: The managers and the [`ChargePoint`] orchestrator
//! - **config**: Stack and OCPP configuration structs

pub mod chargepoint;
pub mod config;
pub mod database;
pub mod messages;
pub mod rpc;
pub mod support;
pub mod types;

// Re-export the host-facing surface at crate root
pub use chargepoint::{ChargePoint, ChargePointEventsHandler, SmartChargingSetpoint};
pub use config::{ChargePointConfig, OcppConfig};
pub use support::errors::{ChargePointError, ChargePointResult};
