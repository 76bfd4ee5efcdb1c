//! OCPP 1.6 message payloads
//!
//! One module per feature profile. Every request struct implements
//! [`OcppRequest`], which ties the action name to the response type so the
//! sender can encode, call and decode in one typed operation.

pub mod core;
pub mod firmware;
pub mod local_list;
pub mod remote_trigger;
pub mod reservation;
pub mod security;
pub mod smart_charging;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A request payload with its action name and response type.
pub trait OcppRequest: Serialize {
    /// OCPP action name carried in the CALL frame.
    const ACTION: &'static str;
    /// Payload of the matching CALLRESULT frame.
    type Response: DeserializeOwned;
}

pub use self::core::*;
pub use firmware::*;
pub use local_list::*;
pub use remote_trigger::*;
pub use reservation::*;
pub use security::*;
pub use smart_charging::*;
