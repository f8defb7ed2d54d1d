//! The closed `CONF_*` configuration key enumeration and its static table.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use super::ValueType;

/// A configuration key in the closed namespace. Device-class keys (e.g.
/// `Oscilloscope`) mark capability of acting as that device class; the rest
/// address per-device or per-channel-group tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ConfigKey {
    // --- Device classes ---
    /// Device can act as a logic analyzer.
    LogicAnalyzer,
    /// Device can act as an oscilloscope.
    Oscilloscope,
    /// Device can act as a multimeter.
    Multimeter,
    /// Device can act as a programmable power supply.
    PowerSupply,
    /// Device can act as an electronic load.
    ElectronicLoad,
    /// Device can act as a signal generator.
    SignalGenerator,

    // --- Scan options ---
    /// Connection spec (USB bus.addr, vid.pid, or serial device path).
    Conn,
    /// Serial communication spec `<baud>/<bits><parity><stopbits>`.
    SerialComm,
    /// Modbus slave address.
    ModbusAddr,

    // --- Device / channel-group configuration ---
    /// Sample rate in Hz.
    Samplerate,
    /// Pre/post-trigger capture ratio, percent.
    CaptureRatio,
    /// Acquisition time limit in milliseconds.
    LimitMsec,
    /// Acquisition sample count limit.
    LimitSamples,
    /// Volts/div.
    Vdiv,
    /// Input coupling.
    Coupling,
    /// Time base.
    Timebase,
    /// Logic threshold voltage (low, high).
    VoltageThreshold,
    /// Currently measured voltage.
    Voltage,
    /// Target output voltage.
    VoltageTarget,
    /// Currently measured current.
    Current,
    /// Output current limit.
    CurrentLimit,
    /// Channel or output enabled state.
    Enabled,
    /// Regulation mode string ("CV"/"CC"/"UR").
    Regulation,
    /// Output frequency, Hz.
    OutputFrequency,
    /// Target output frequency, Hz.
    OutputFrequencyTarget,
    /// Measured quantity tuple the device is currently configured for.
    MeasuredQuantity,
    /// Trigger source name.
    TriggerSource,
    /// Trigger slope.
    TriggerSlope,
}

/// Static metadata about a configuration key.
#[derive(Debug, Clone, Copy)]
pub struct ConfigKeyInfo {
    /// The key itself.
    pub key: ConfigKey,
    /// Declared value type; the source of truth for get/set checks.
    pub value_type: ValueType,
    /// Short `[a-z0-9_]` id, e.g. `"samplerate"`.
    pub id: &'static str,
    /// Human-readable name, e.g. `"Sample rate"`.
    pub name: &'static str,
}

macro_rules! key_table {
    ($(($variant:ident, $ty:expr, $id:literal, $name:literal)),* $(,)?) => {
        static TABLE: &[ConfigKeyInfo] = &[
            $(ConfigKeyInfo { key: ConfigKey::$variant, value_type: $ty, id: $id, name: $name }),*
        ];
    };
}

key_table! {
    (LogicAnalyzer, ValueType::Bool, "logic_analyzer", "Logic analyzer"),
    (Oscilloscope, ValueType::Bool, "oscilloscope", "Oscilloscope"),
    (Multimeter, ValueType::Bool, "multimeter", "Multimeter"),
    (PowerSupply, ValueType::Bool, "power_supply", "Power supply"),
    (ElectronicLoad, ValueType::Bool, "electronic_load", "Electronic load"),
    (SignalGenerator, ValueType::Bool, "signal_generator", "Signal generator"),
    (Conn, ValueType::String, "conn", "Connection"),
    (SerialComm, ValueType::String, "serialcomm", "Serial communication"),
    (ModbusAddr, ValueType::Uint32, "modbusaddr", "Modbus slave address"),
    (Samplerate, ValueType::Uint64, "samplerate", "Sample rate"),
    (CaptureRatio, ValueType::Uint64, "captureratio", "Capture ratio"),
    (LimitMsec, ValueType::Uint64, "limit_msec", "Time limit"),
    (LimitSamples, ValueType::Uint64, "limit_samples", "Sample limit"),
    (Vdiv, ValueType::RationalVolt, "vdiv", "Volts/div"),
    (Coupling, ValueType::String, "coupling", "Coupling"),
    (Timebase, ValueType::RationalPeriod, "timebase", "Time base"),
    (VoltageThreshold, ValueType::DoubleRange, "voltage_threshold", "Voltage threshold"),
    (Voltage, ValueType::Float, "voltage", "Voltage"),
    (VoltageTarget, ValueType::Float, "voltage_target", "Voltage target"),
    (Current, ValueType::Float, "current", "Current"),
    (CurrentLimit, ValueType::Float, "current_limit", "Current limit"),
    (Enabled, ValueType::Bool, "enabled", "Enabled"),
    (Regulation, ValueType::String, "regulation", "Regulation"),
    (OutputFrequency, ValueType::Float, "output_frequency", "Output frequency"),
    (OutputFrequencyTarget, ValueType::Float, "output_frequency_target", "Output frequency target"),
    (MeasuredQuantity, ValueType::MeasuredQuantity, "measured_quantity", "Measured quantity"),
    (TriggerSource, ValueType::String, "trigger_source", "Trigger source"),
    (TriggerSlope, ValueType::String, "trigger_slope", "Trigger slope"),
}

static BY_ID: Lazy<HashMap<&'static str, ConfigKeyInfo>> =
    Lazy::new(|| TABLE.iter().map(|info| (info.id, *info)).collect());

/// Look up a key's static info by the key itself.
pub fn lookup(key: ConfigKey) -> Option<ConfigKeyInfo> {
    TABLE.iter().find(|info| info.key == key).copied()
}

/// Look up a key's static info by its short id string.
pub fn lookup_by_id(id: &str) -> Option<ConfigKeyInfo> {
    BY_ID.get(id).copied()
}

/// Closed-form checks beyond pure type matching (spec §4.E step 2):
/// `LimitMsec`, `LimitSamples`, `Samplerate` cannot be zero; `CaptureRatio`
/// must lie in `[0, 100]`.
pub fn extra_value_checks(key: ConfigKey, value: &super::Variant) -> crate::error::Result<()> {
    use crate::error::{Error, ErrorKind};
    use super::Variant;

    match (key, value) {
        (ConfigKey::LimitMsec, Variant::Uint64(0))
        | (ConfigKey::LimitSamples, Variant::Uint64(0))
        | (ConfigKey::Samplerate, Variant::Uint64(0)) => Err(Error::new(
            ErrorKind::Arg,
            format!("{} cannot be zero", lookup(key).unwrap().id),
        )),
        (ConfigKey::CaptureRatio, Variant::Uint64(ratio)) if *ratio > 100 => Err(Error::new(
            ErrorKind::Arg,
            "capture ratio must lie in [0, 100]",
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_key_has_unique_id() {
        let mut ids: Vec<&str> = TABLE.iter().map(|i| i.id).collect();
        let before = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), before, "duplicate config key ids");
    }

    #[test]
    fn lookup_by_id_roundtrips() {
        let info = lookup_by_id("samplerate").unwrap();
        assert_eq!(info.key, ConfigKey::Samplerate);
    }

    #[test]
    fn zero_samplerate_rejected() {
        let err = extra_value_checks(ConfigKey::Samplerate, &super::super::Variant::Uint64(0))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Arg);
    }

    #[test]
    fn capture_ratio_out_of_range_rejected() {
        let err =
            extra_value_checks(ConfigKey::CaptureRatio, &super::super::Variant::Uint64(101))
                .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Arg);
    }
}
