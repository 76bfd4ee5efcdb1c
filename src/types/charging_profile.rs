//! Charging profile types of the smart charging profile
//!
//! A [`ChargingProfile`] carries a [`ChargingSchedule`] describing the
//! power or current that may be delivered per time interval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use strum_macros::{Display, EnumString};

/// A charging profile, installed by SetChargingProfile.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChargingProfile {
    /// Unique identifier of this profile.
    pub charging_profile_id: i32,
    /// Only valid for TxProfile: binds the profile to a transaction.
    pub transaction_id: Option<i32>,
    /// Level in the hierarchy stack of profiles. Higher values have
    /// precedence over lower values; lowest level is 0.
    pub stack_level: u32,
    pub charging_profile_purpose: ChargingProfilePurpose,
    pub charging_profile_kind: ChargingProfileKind,
    /// Start point of a recurrence, when the kind is `Recurring`.
    pub recurrency_kind: Option<RecurrencyKind>,
    /// Point in time at which the profile starts to be valid. Absent means
    /// valid as soon as received.
    pub valid_from: Option<DateTime<Utc>>,
    /// Point in time at which the profile stops to be valid. Absent means
    /// valid until replaced.
    pub valid_to: Option<DateTime<Utc>>,
    pub charging_schedule: ChargingSchedule,
}

/// The limits over time carried by a profile, and the shape of a
/// GetCompositeSchedule result.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSchedule {
    /// Duration of the schedule in seconds. Absent means the last period
    /// continues indefinitely.
    pub duration: Option<i32>,
    /// Starting point of an absolute schedule. Absent means the schedule is
    /// relative to the start of charging.
    pub start_schedule: Option<DateTime<Utc>>,
    pub charging_rate_unit: ChargingRateUnit,
    /// Ordered periods; the first period always has `start_period` 0.
    pub charging_schedule_period: Vec<ChargingSchedulePeriod>,
    /// Minimum charging rate supported by the EV, in `charging_rate_unit`.
    pub min_charging_rate: Option<f64>,
}

/// One period of a [`ChargingSchedule`]. The `start_period` of the next
/// period defines the end of this one.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSchedulePeriod {
    /// Start of the period, in seconds from the start of the schedule.
    pub start_period: i32,
    /// Charging rate limit during the period, in `charging_rate_unit`.
    pub limit: f64,
    /// Number of phases that can be used for charging. Absent means 3.
    pub number_phases: Option<u32>,
}

/// Purpose of a charging profile.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum ChargingProfilePurpose {
    /// Maximum power or current available for the entire charge point.
    ChargePointMaxProfile,
    /// Default profile applied to new transactions.
    TxDefaultProfile,
    /// Constraints imposed on one specific transaction; ceases to be valid
    /// when the transaction terminates.
    TxProfile,
}

/// How a schedule is anchored in time.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum ChargingProfileKind {
    /// Periods are relative to a fixed point in time given by the schedule.
    Absolute,
    /// The schedule restarts periodically at the first period.
    Recurring,
    /// Periods are relative to a situation-specific start point, such as
    /// the start of a transaction.
    Relative,
}

/// Recurrence period of a `Recurring` profile.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum RecurrencyKind {
    /// Restarts every 24 hours at the time of `start_schedule`.
    Daily,
    /// Restarts every 7 days at the time and week day of `start_schedule`.
    Weekly,
}

/// Unit a schedule limit is expressed in.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum ChargingRateUnit {
    /// Amperes per phase.
    A,
    /// Total power in Watts.
    W,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_profile() -> ChargingProfile {
        ChargingProfile {
            charging_profile_id: 7,
            transaction_id: None,
            stack_level: 2,
            charging_profile_purpose: ChargingProfilePurpose::TxDefaultProfile,
            charging_profile_kind: ChargingProfileKind::Recurring,
            recurrency_kind: Some(RecurrencyKind::Daily),
            valid_from: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            valid_to: None,
            charging_schedule: ChargingSchedule {
                duration: Some(1800),
                start_schedule: Some(Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()),
                charging_rate_unit: ChargingRateUnit::A,
                charging_schedule_period: vec![
                    ChargingSchedulePeriod {
                        start_period: 0,
                        limit: 16.0,
                        number_phases: Some(3),
                    },
                    ChargingSchedulePeriod {
                        start_period: 900,
                        limit: 8.0,
                        number_phases: None,
                    },
                ],
                min_charging_rate: Some(6.0),
            },
        }
    }

    #[test]
    fn serde_roundtrip() {
        let profile = sample_profile();
        let json = serde_json::to_string(&profile).unwrap();
        let back: ChargingProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, profile);
    }

    #[test]
    fn wire_field_names() {
        let json = serde_json::to_value(sample_profile()).unwrap();
        assert_eq!(json["chargingProfileId"], 7);
        assert_eq!(json["chargingProfilePurpose"], "TxDefaultProfile");
        assert_eq!(json["recurrencyKind"], "Daily");
        assert_eq!(
            json["chargingSchedule"]["chargingSchedulePeriod"][0]["startPeriod"],
            0
        );
        // absent optionals must not be serialized
        assert!(json.get("transactionId").is_none());
    }
}
