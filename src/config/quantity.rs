//! Measurement quantity and measurement-quantity flag enumerations. Part of
//! the public wire contract of emitted analog packets (spec §3).

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// The physical quantity an analog packet's samples represent.
#[derive(
    Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash, EnumIter, EnumString, Display,
)]
pub enum MeasuredQuantity {
    /// Voltage.
    #[default]
    Voltage,
    /// Current.
    Current,
    /// Resistance.
    Resistance,
    /// Capacitance.
    Capacitance,
    /// Inductance.
    Inductance,
    /// Temperature.
    Temperature,
    /// Frequency.
    Frequency,
    /// Duty cycle.
    DutyCycle,
    /// Continuity.
    Continuity,
    /// Power.
    Power,
    /// Energy.
    Energy,
    /// Sound pressure level.
    Spl,
    /// Relative humidity.
    Humidity,
    /// Elapsed time.
    Time,
    /// Pressure.
    Pressure,
    /// Mass.
    Mass,
    /// LCR series/parallel equivalent-circuit model quantity.
    EquivCircuitModel,
}

bitflags! {
    /// Flag bits qualifying a [`MeasuredQuantity`] (AC/DC, RMS, hold, etc).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
    pub struct QuantityFlags: u32 {
        /// AC coupling/measurement.
        const AC = 1 << 0;
        /// DC coupling/measurement.
        const DC = 1 << 1;
        /// RMS measurement.
        const RMS = 1 << 2;
        /// Diode test mode.
        const DIODE = 1 << 3;
        /// Value is held (front-panel HOLD).
        const HOLD = 1 << 4;
        /// Value is a running maximum.
        const MAX = 1 << 5;
        /// Value is a running minimum.
        const MIN = 1 << 6;
        /// Autoranging is active.
        const AUTORANGE = 1 << 7;
        /// Value is relative to a stored reference (REL).
        const RELATIVE = 1 << 8;
        /// A-weighted SPL.
        const SPL_FREQ_WEIGHT_A = 1 << 9;
        /// C-weighted SPL.
        const SPL_FREQ_WEIGHT_C = 1 << 10;
        /// Fast time-weighted SPL.
        const SPL_TIME_WEIGHT_F = 1 << 11;
        /// Slow time-weighted SPL.
        const SPL_TIME_WEIGHT_S = 1 << 12;
        /// Value is an average over a window.
        const AVERAGING = 1 << 13;
        /// Four-wire (Kelvin) measurement.
        const FOUR_WIRE = 1 << 14;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn every_quantity_has_a_display_name() {
        for q in MeasuredQuantity::iter() {
            assert!(!q.to_string().is_empty());
        }
    }

    #[test]
    fn flags_compose() {
        let f = QuantityFlags::AC | QuantityFlags::RMS;
        assert!(f.contains(QuantityFlags::AC));
        assert!(f.contains(QuantityFlags::RMS));
        assert!(!f.contains(QuantityFlags::DC));
    }
}
