//! Cross-cutting utilities

pub mod errors;
pub mod ocpp_frame;

pub use errors::{ChargePointError, ChargePointResult, RpcError};
pub use ocpp_frame::{ErrorCode, OcppFrame};
