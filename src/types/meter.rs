//! Meter value types
//!
//! A `MeterValues.req` carries a list of [`MeterValue`] elements, each a
//! set of [`SampledValue`]s taken at the same instant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use strum_macros::{Display, EnumString};

/// Collection of sampled values taken at the same time.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MeterValue {
    pub timestamp: DateTime<Utc>,
    pub sampled_value: Vec<SampledValue>,
}

/// A single measured value.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SampledValue {
    /// Measured value as a decimal number or signed data blob.
    pub value: String,
    /// Detail context. Default on the wire is `Sample.Periodic`.
    pub context: Option<ReadingContext>,
    /// Raw or signed data. Default on the wire is `Raw`.
    pub format: Option<ValueFormat>,
    /// Type of measurement. Default on the wire is
    /// `Energy.Active.Import.Register`.
    pub measurand: Option<Measurand>,
    /// Phase the value was measured on. Absent means an overall value.
    pub phase: Option<Phase>,
    /// Location of the measurement. Default on the wire is `Outlet`.
    pub location: Option<Location>,
    /// Unit of the value.
    pub unit: Option<UnitOfMeasure>,
}

/// Circumstance under which a value was sampled.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum ReadingContext {
    #[serde(rename = "Interruption.Begin")]
    #[strum(serialize = "Interruption.Begin")]
    InterruptionBegin,
    #[serde(rename = "Interruption.End")]
    #[strum(serialize = "Interruption.End")]
    InterruptionEnd,
    /// Value taken at a clock aligned interval.
    #[serde(rename = "Sample.Clock")]
    #[strum(serialize = "Sample.Clock")]
    SampleClock,
    /// Periodic sample relative to the start of the transaction.
    #[serde(rename = "Sample.Periodic")]
    #[strum(serialize = "Sample.Periodic")]
    SamplePeriodic,
    #[serde(rename = "Transaction.Begin")]
    #[strum(serialize = "Transaction.Begin")]
    TransactionBegin,
    #[serde(rename = "Transaction.End")]
    #[strum(serialize = "Transaction.End")]
    TransactionEnd,
    /// Value taken in response to a TriggerMessage.
    Trigger,
    Other,
}

/// How the `value` field is to be interpreted.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum ValueFormat {
    /// Decimal numeric data.
    Raw,
    /// Signed binary data block, hex encoded.
    SignedData,
}

/// Type of measurement.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum Measurand {
    #[serde(rename = "Current.Export")]
    #[strum(serialize = "Current.Export")]
    CurrentExport,
    #[serde(rename = "Current.Import")]
    #[strum(serialize = "Current.Import")]
    CurrentImport,
    #[serde(rename = "Current.Offered")]
    #[strum(serialize = "Current.Offered")]
    CurrentOffered,
    #[serde(rename = "Energy.Active.Export.Register")]
    #[strum(serialize = "Energy.Active.Export.Register")]
    EnergyActiveExportRegister,
    #[serde(rename = "Energy.Active.Import.Register")]
    #[strum(serialize = "Energy.Active.Import.Register")]
    EnergyActiveImportRegister,
    #[serde(rename = "Energy.Reactive.Export.Register")]
    #[strum(serialize = "Energy.Reactive.Export.Register")]
    EnergyReactiveExportRegister,
    #[serde(rename = "Energy.Reactive.Import.Register")]
    #[strum(serialize = "Energy.Reactive.Import.Register")]
    EnergyReactiveImportRegister,
    #[serde(rename = "Energy.Active.Export.Interval")]
    #[strum(serialize = "Energy.Active.Export.Interval")]
    EnergyActiveExportInterval,
    #[serde(rename = "Energy.Active.Import.Interval")]
    #[strum(serialize = "Energy.Active.Import.Interval")]
    EnergyActiveImportInterval,
    #[serde(rename = "Energy.Reactive.Export.Interval")]
    #[strum(serialize = "Energy.Reactive.Export.Interval")]
    EnergyReactiveExportInterval,
    #[serde(rename = "Energy.Reactive.Import.Interval")]
    #[strum(serialize = "Energy.Reactive.Import.Interval")]
    EnergyReactiveImportInterval,
    Frequency,
    #[serde(rename = "Power.Active.Export")]
    #[strum(serialize = "Power.Active.Export")]
    PowerActiveExport,
    #[serde(rename = "Power.Active.Import")]
    #[strum(serialize = "Power.Active.Import")]
    PowerActiveImport,
    #[serde(rename = "Power.Factor")]
    #[strum(serialize = "Power.Factor")]
    PowerFactor,
    #[serde(rename = "Power.Offered")]
    #[strum(serialize = "Power.Offered")]
    PowerOffered,
    #[serde(rename = "Power.Reactive.Export")]
    #[strum(serialize = "Power.Reactive.Export")]
    PowerReactiveExport,
    #[serde(rename = "Power.Reactive.Import")]
    #[strum(serialize = "Power.Reactive.Import")]
    PowerReactiveImport,
    #[serde(rename = "RPM")]
    #[strum(serialize = "RPM")]
    Rpm,
    SoC,
    Temperature,
    Voltage,
}

impl Measurand {
    /// Unit this stack reports the measurand in.
    pub fn unit(&self) -> UnitOfMeasure {
        match self {
            Measurand::CurrentExport | Measurand::CurrentImport | Measurand::CurrentOffered => {
                UnitOfMeasure::A
            }
            Measurand::EnergyActiveExportRegister
            | Measurand::EnergyActiveImportRegister
            | Measurand::EnergyActiveExportInterval
            | Measurand::EnergyActiveImportInterval => UnitOfMeasure::KWh,
            Measurand::EnergyReactiveExportRegister
            | Measurand::EnergyReactiveImportRegister
            | Measurand::EnergyReactiveExportInterval
            | Measurand::EnergyReactiveImportInterval => UnitOfMeasure::Kvarh,
            Measurand::PowerActiveExport
            | Measurand::PowerActiveImport
            | Measurand::PowerOffered => UnitOfMeasure::Kw,
            Measurand::PowerReactiveExport | Measurand::PowerReactiveImport => UnitOfMeasure::Kvar,
            Measurand::PowerFactor | Measurand::Frequency | Measurand::Rpm => {
                UnitOfMeasure::Percent
            }
            Measurand::SoC => UnitOfMeasure::Percent,
            Measurand::Temperature => UnitOfMeasure::Celsius,
            Measurand::Voltage => UnitOfMeasure::V,
        }
    }
}

/// Phase a measured value refers to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum Phase {
    L1,
    L2,
    L3,
    N,
    #[serde(rename = "L1-N")]
    #[strum(serialize = "L1-N")]
    L1N,
    #[serde(rename = "L2-N")]
    #[strum(serialize = "L2-N")]
    L2N,
    #[serde(rename = "L3-N")]
    #[strum(serialize = "L3-N")]
    L3N,
    #[serde(rename = "L1-L2")]
    #[strum(serialize = "L1-L2")]
    L1L2,
    #[serde(rename = "L2-L3")]
    #[strum(serialize = "L2-L3")]
    L2L3,
    #[serde(rename = "L3-L1")]
    #[strum(serialize = "L3-L1")]
    L3L1,
}

/// Location of a measurement.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum Location {
    Body,
    Cable,
    EV,
    Inlet,
    Outlet,
}

/// Unit of a measured value.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum UnitOfMeasure {
    Wh,
    #[serde(rename = "kWh")]
    #[strum(serialize = "kWh")]
    KWh,
    #[serde(rename = "varh")]
    #[strum(serialize = "varh")]
    Varh,
    #[serde(rename = "kvarh")]
    #[strum(serialize = "kvarh")]
    Kvarh,
    W,
    #[serde(rename = "kW")]
    #[strum(serialize = "kW")]
    Kw,
    #[serde(rename = "VA")]
    #[strum(serialize = "VA")]
    Va,
    #[serde(rename = "kVA")]
    #[strum(serialize = "kVA")]
    Kva,
    #[serde(rename = "var")]
    #[strum(serialize = "var")]
    Var,
    #[serde(rename = "kvar")]
    #[strum(serialize = "kvar")]
    Kvar,
    A,
    V,
    Celsius,
    Fahrenheit,
    K,
    Percent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampled_value_wire_form() {
        let value = SampledValue {
            value: "70".to_string(),
            context: Some(ReadingContext::SamplePeriodic),
            format: Some(ValueFormat::Raw),
            measurand: Some(Measurand::CurrentImport),
            phase: Some(Phase::L1),
            location: Some(Location::Outlet),
            unit: Some(UnitOfMeasure::A),
        };
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["context"], "Sample.Periodic");
        assert_eq!(json["measurand"], "Current.Import");
        assert_eq!(json["phase"], "L1");
        assert_eq!(json["unit"], "A");
    }

    #[test]
    fn optional_fields_are_skipped() {
        let value = SampledValue {
            value: "23".to_string(),
            context: None,
            format: None,
            measurand: None,
            phase: None,
            location: None,
            unit: None,
        };
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"value":"23"}"#);
    }

    #[test]
    fn measurand_string_roundtrip() {
        let m: Measurand = "Energy.Active.Import.Register".parse().unwrap();
        assert_eq!(m, Measurand::EnergyActiveImportRegister);
        assert_eq!(m.to_string(), "Energy.Active.Import.Register");
        assert_eq!(m.unit(), UnitOfMeasure::KWh);
    }
}
