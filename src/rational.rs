//! Rational arithmetic, SI prefix formatting, and analog<->logic conversion
//! primitives over which every driver's packet parsing is built.

use crate::error::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};

/// A signed rational number: `numerator / denominator`, sign carried on the
/// numerator. The denominator is never zero once constructed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Rational {
    /// Numerator, carries the sign.
    pub p: i64,
    /// Denominator, always nonzero and unsigned.
    pub q: u64,
}

impl Rational {
    /// Construct a rational from a numerator and denominator, normalising
    /// any sign on `q` onto `p`.
    ///
    /// # Errors
    /// Returns `ErrorKind::Arg` if `q` is zero, or if folding `q`'s sign onto
    /// `p` would overflow (`p == i64::MIN`).
    pub fn new(p: i64, q: i64) -> Result<Self> {
        if q == 0 {
            return Err(Error::new(ErrorKind::Arg, "rational denominator is zero"));
        }
        if q < 0 {
            let p = p
                .checked_neg()
                .ok_or_else(|| Error::new(ErrorKind::Arg, "rational numerator overflow"))?;
            Ok(Rational { p, q: q.unsigned_abs() })
        } else {
            Ok(Rational { p, q: q as u64 })
        }
    }

    /// Construct directly from an already-normalised (nonzero-`q`) pair.
    /// Used internally and by driver code that already holds a `u64` `q`.
    pub fn from_parts(p: i64, q: u64) -> Result<Self> {
        if q == 0 {
            return Err(Error::new(ErrorKind::Arg, "rational denominator is zero"));
        }
        Ok(Rational { p, q })
    }

    /// Decode as an `f64`. Never fails; may lose precision for large values.
    pub fn to_f64(self) -> f64 {
        self.p as f64 / self.q as f64
    }
}

impl PartialEq for Rational {
    /// Equality by cross-multiplication, without reducing either side.
    fn eq(&self, other: &Self) -> bool {
        let lhs = (self.p as i128) * (other.q as i128);
        let rhs = (other.p as i128) * (self.q as i128);
        lhs == rhs
    }
}
impl Eq for Rational {}

/// Multiply two rationals: `(a.p/a.q) * (b.p/b.q) = (a.p*b.p)/(a.q*b.q)`.
///
/// # Errors
/// `ErrorKind::Arg` if either 128-bit intermediate product overflows the
/// 64-bit result types.
pub fn mul(a: Rational, b: Rational) -> Result<Rational> {
    let p = (a.p as i128)
        .checked_mul(b.p as i128)
        .ok_or_else(|| Error::new(ErrorKind::Arg, "rational multiplication overflow (p)"))?;
    let q = (a.q as u128)
        .checked_mul(b.q as u128)
        .ok_or_else(|| Error::new(ErrorKind::Arg, "rational multiplication overflow (q)"))?;
    let p: i64 = p
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Arg, "rational multiplication overflow (p range)"))?;
    let q: u64 = q
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Arg, "rational multiplication overflow (q range)"))?;
    Rational::from_parts(p, q)
}

/// Divide `a` by `b`: multiply `a` by `b`'s reciprocal.
///
/// # Errors
/// `ErrorKind::Arg` if `b` is zero or the product overflows.
pub fn div(a: Rational, b: Rational) -> Result<Rational> {
    if b.p == 0 {
        return Err(Error::new(ErrorKind::Arg, "division by zero rational"));
    }
    let reciprocal = if b.p < 0 {
        Rational::from_parts(-(b.q as i64), b.p.unsigned_abs())?
    } else {
        Rational::from_parts(b.q as i64, b.p as u64)?
    };
    mul(a, reciprocal)
}

/// Byte order of a wire-encoded sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endian {
    /// Least-significant byte first.
    Little,
    /// Most-significant byte first.
    Big,
}

/// Wire representation of one analog sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Signed integer of `unit_size` bytes.
    SignedInt,
    /// Unsigned integer of `unit_size` bytes.
    UnsignedInt,
    /// IEEE-754 float; `unit_size` must be 4 or 8.
    Float,
}

/// Per-packet metadata describing how raw bytes decode to physical values:
/// `value = raw * scale + offset`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalogEncoding {
    /// Size in bytes of one sample in the payload.
    pub unit_size: u8,
    /// How each sample is encoded.
    pub format: SampleFormat,
    /// Byte order of multi-byte samples.
    pub endian: Endian,
    /// Significant digits after the decimal point (positive), or the
    /// reversed-polarity exponent needed to print without a decimal point
    /// (negative).
    pub digits: i8,
    /// Scale applied after decoding the raw sample.
    pub scale: Rational,
    /// Offset applied after scaling.
    pub offset: Rational,
    /// Same digit semantics as `digits`, sourced from the vendor datasheet
    /// or display resolution rather than the wire's own resolution.
    pub spec_digits: i8,
}

impl AnalogEncoding {
    /// Decode one sample's raw bytes (exactly `unit_size` long) to `f64`,
    /// before scale/offset are applied.
    fn decode_raw(&self, bytes: &[u8]) -> Result<f64> {
        use byteorder::{BigEndian, ByteOrder, LittleEndian};

        let n = bytes.len();
        if n != self.unit_size as usize {
            return Err(Error::new(
                ErrorKind::BadData,
                format!("expected {} byte sample, got {}", self.unit_size, n),
            ));
        }

        macro_rules! read_int {
            ($read_fn:ident, $ty:ty) => {{
                let v = if self.endian == Endian::Big {
                    BigEndian::$read_fn(bytes)
                } else {
                    LittleEndian::$read_fn(bytes)
                };
                v as f64
            }};
        }

        match (self.format, self.unit_size) {
            (SampleFormat::Float, 4) => Ok(if self.endian == Endian::Big {
                BigEndian::read_f32(bytes) as f64
            } else {
                LittleEndian::read_f32(bytes) as f64
            }),
            (SampleFormat::Float, 8) => Ok(if self.endian == Endian::Big {
                BigEndian::read_f64(bytes)
            } else {
                LittleEndian::read_f64(bytes)
            }),
            (SampleFormat::UnsignedInt, 1) => Ok(bytes[0] as f64),
            (SampleFormat::SignedInt, 1) => Ok(bytes[0] as i8 as f64),
            (SampleFormat::UnsignedInt, 2) => Ok(read_int!(read_u16, u16)),
            (SampleFormat::SignedInt, 2) => Ok(read_int!(read_i16, i16)),
            (SampleFormat::UnsignedInt, 4) => Ok(read_int!(read_u32, u32)),
            (SampleFormat::SignedInt, 4) => Ok(read_int!(read_i32, i32)),
            (SampleFormat::UnsignedInt, 8) => Ok(read_int!(read_u64, u64)),
            (SampleFormat::SignedInt, 8) => Ok(read_int!(read_i64, i64)),
            _ => Err(Error::new(
                ErrorKind::BadData,
                format!(
                    "unsupported sample encoding: {:?} unit_size={}",
                    self.format, self.unit_size
                ),
            )),
        }
    }

    /// Decode and scale every sample in `buf` to an `f64` vector.
    pub fn analog_to_float(&self, buf: &[u8]) -> Result<Vec<f64>> {
        let unit = self.unit_size as usize;
        if unit == 0 || buf.len() % unit != 0 {
            return Err(Error::new(
                ErrorKind::BadData,
                "analog buffer length is not a multiple of the unit size",
            ));
        }
        let scale = self.scale.to_f64();
        let offset = self.offset.to_f64();
        buf.chunks(unit)
            .map(|chunk| self.decode_raw(chunk).map(|raw| raw * scale + offset))
            .collect()
    }
}

/// Convert analog samples to one logic bit each via a fixed threshold:
/// `bit = sample >= threshold`.
pub fn a2l_threshold(values: &[f64], threshold: f64) -> Vec<bool> {
    values.iter().map(|&v| v >= threshold).collect()
}

/// Per-channel Schmitt trigger state: `false` = low, `true` = high.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchmittState(pub bool);

/// Convert one channel's analog samples to logic bits with hysteresis.
///
/// State persists across calls via `state`, updated on crossing `hi_thr`
/// (rising into high) or `lo_thr` (falling into low); values strictly
/// between the thresholds hold the previous state.
pub fn a2l_schmitt_trigger(
    values: &[f64],
    lo_thr: f64,
    hi_thr: f64,
    state: &mut SchmittState,
) -> Vec<bool> {
    let mut out = Vec::with_capacity(values.len());
    for &v in values {
        if v >= hi_thr {
            state.0 = true;
        } else if v <= lo_thr {
            state.0 = false;
        }
        out.push(state.0);
    }
    out
}

/// One SI magnitude prefix and its power-of-ten exponent.
const SI_PREFIXES: &[(f64, char)] = &[
    (1e-24, 'y'),
    (1e-21, 'z'),
    (1e-18, 'a'),
    (1e-15, 'f'),
    (1e-12, 'p'),
    (1e-9, 'n'),
    (1e-6, 'µ'),
    (1e-3, 'm'),
    (1.0, '\0'),
    (1e3, 'k'),
    (1e6, 'M'),
    (1e9, 'G'),
    (1e12, 'T'),
    (1e15, 'P'),
];

/// Scale `value` to a human-friendly magnitude and return `(scaled value,
/// prefix char or '\0' for none, digits adjustment to apply to a display
/// precision)`.
///
/// `digits` in the encoding descriptor sense is adjusted by the chosen
/// prefix's decimal exponent (e.g. micro divides by 1e-6, so a prior
/// `digits` of `0` becomes `-6`, matching §8 scenario 1).
pub fn si_prefix_friendly(value: f64) -> (f64, char, i32) {
    if value == 0.0 || !value.is_finite() {
        return (value, '\0', 0);
    }
    let magnitude = value.abs();
    let mut chosen = SI_PREFIXES[8]; // unity
    for &(threshold, prefix) in SI_PREFIXES {
        if magnitude >= threshold {
            chosen = (threshold, prefix);
        } else {
            break;
        }
    }
    let exponent = chosen.0.log10().round() as i32;
    (value / chosen.0, chosen.1, -exponent)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(p: i64, q: i64) -> Rational {
        Rational::new(p, q).unwrap()
    }

    #[test]
    fn mul_is_commutative() {
        let a = r(3, 4);
        let b = r(-5, 7);
        assert_eq!(mul(a, b).unwrap(), mul(b, a).unwrap());
    }

    #[test]
    fn div_undoes_mul() {
        let a = r(3, 4);
        let b = r(5, 7);
        let product = mul(a, b).unwrap();
        assert_eq!(div(product, b).unwrap(), a);
    }

    #[test]
    fn mul_overflow_reports_arg() {
        let huge = Rational::from_parts(i64::MAX, 1).unwrap();
        let err = mul(huge, huge).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Arg);
    }

    #[test]
    fn negative_denominator_normalises_onto_numerator() {
        let a = Rational::new(3, -4).unwrap();
        assert_eq!(a.p, -3);
        assert_eq!(a.q, 4);
    }

    #[test]
    fn negative_denominator_with_min_numerator_reports_overflow() {
        let err = Rational::new(i64::MIN, -1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Arg);
    }

    #[test]
    fn si_prefix_micro_volts() {
        let (value, prefix, digits_adjust) = si_prefix_friendly(1.0 / 1_000_000.0);
        assert!((value - 1.0).abs() < 1e-9);
        assert_eq!(prefix, 'µ');
        assert_eq!(digits_adjust, -6);
    }

    #[test]
    fn schmitt_trigger_matches_scenario() {
        let values = [0.1, 0.4, 0.9, 0.6, 0.2];
        let mut state = SchmittState(false);
        let bits = a2l_schmitt_trigger(&values, 0.3, 0.7, &mut state);
        assert_eq!(
            bits,
            vec![false, false, true, true, false]
        );
    }

    #[test]
    fn threshold_matches_decoded_floats() {
        let encoding = AnalogEncoding {
            unit_size: 2,
            format: SampleFormat::UnsignedInt,
            endian: Endian::Big,
            digits: 0,
            scale: Rational::from_parts(1, 1).unwrap(),
            offset: Rational::from_parts(0, 1).unwrap(),
            spec_digits: 0,
        };
        let buf: Vec<u8> = vec![0, 10, 0, 20, 0, 30];
        let decoded = encoding.analog_to_float(&buf).unwrap();
        let bits = a2l_threshold(&decoded, 15.0);
        assert_eq!(bits, vec![false, true, true]);
    }
}
