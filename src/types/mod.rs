//! OCPP 1.6 data types and enumerations

pub mod charging_profile;
pub mod enums;
pub mod id_tag;
pub mod meter;

pub use charging_profile::{
    ChargingProfile, ChargingProfileKind, ChargingProfilePurpose, ChargingRateUnit,
    ChargingSchedule, ChargingSchedulePeriod, RecurrencyKind,
};
pub use enums::*;
pub use id_tag::{AuthorizationData, IdTagInfo};
pub use meter::{Location, Measurand, MeterValue, Phase, ReadingContext, SampledValue, UnitOfMeasure, ValueFormat};
