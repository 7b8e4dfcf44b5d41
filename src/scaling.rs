//! Conversion between raw register integers and engineering values.
//!
//! DER registers carry values as integers with a power-of-ten scale factor, the same way
//! SunSpec `_SF` registers work. A scale factor of `-2` means a raw value of `9500`
//! represents `95.00`. Some vendors use a fixed factor for every register, others publish
//! the factor in a neighbouring register which has to be read first.

use crate::{
    error::{Error, Result},
    register::ValueType,
};

/// Power-of-ten exponent applied to a raw register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScaleFactor(i8);

impl ScaleFactor {
    /// Raw value is the engineering value.
    pub const UNITY: Self = Self(0);
    /// SunSpec leaves scale factors within this range.
    const LIMIT: i8 = 10;

    pub const fn new(exponent: i8) -> Self {
        Self(exponent)
    }

    pub const fn exponent(&self) -> i8 {
        self.0
    }

    /// Interpret the contents of a SunSpec scale-factor register.
    pub fn from_register(raw: u16) -> Result<Self> {
        let exponent = raw as i16;
        if exponent.unsigned_abs() > Self::LIMIT as u16 {
            return Err(Error::ValueOutOfRange(exponent as f64));
        }
        Ok(Self(exponent as i8))
    }

    #[inline]
    fn power(&self) -> f64 {
        10f64.powi(self.0.unsigned_abs() as i32)
    }
}

/// Convert a raw register value into its engineering value.
///
/// Negative exponents divide rather than multiply so that e.g. `-950` at `-3` lands exactly
/// on `-0.95`.
pub fn to_per_unit(raw: i64, scale: ScaleFactor) -> f64 {
    if scale.0 >= 0 {
        raw as f64 * scale.power()
    } else {
        raw as f64 / scale.power()
    }
}

/// Convert an engineering value into the raw integer stored in a register of `value_type`.
///
/// Rounds to nearest. Fails with [`Error::ValueOutOfRange`] if the result does not fit.
pub fn from_per_unit(value: f64, scale: ScaleFactor, value_type: ValueType) -> Result<i64> {
    if !value.is_finite() {
        return Err(Error::ValueOutOfRange(value));
    }
    let scaled = if scale.0 >= 0 {
        value / scale.power()
    } else {
        value * scale.power()
    };
    let raw = scaled.round();
    let (min, max) = value_type
        .integer_range()
        .ok_or_else(|| Error::InvalidParameter(format!("{value_type:?} is not an integer type")))?;
    if raw < min as f64 || raw > max as f64 {
        return Err(Error::ValueOutOfRange(value));
    }
    Ok(raw as i64)
}

/// `95.0` percent => `0.95` per-unit.
#[inline]
pub fn percent_to_per_unit(percent: f64) -> f64 {
    percent / 100.0
}

/// `0.95` per-unit => `95.0` percent.
#[inline]
pub fn per_unit_to_percent(per_unit: f64) -> f64 {
    per_unit * 100.0
}

/// Pack a raw integer into big-endian register words.
pub fn encode_words(raw: i64, value_type: ValueType) -> heapless::Vec<u16, 2> {
    let mut words = heapless::Vec::new();
    match value_type.word_count() {
        1 => {
            let _ = words.push(raw as u16);
        }
        _ => {
            let raw = raw as u32;
            let _ = words.push((raw >> 16) as u16);
            let _ = words.push(raw as u16);
        }
    }
    words
}

/// Encode an engineering value for a register of `value_type`.
pub fn encode(value: f64, scale: ScaleFactor, value_type: ValueType) -> Result<heapless::Vec<u16, 2>> {
    match value_type {
        ValueType::F32 => {
            let raw = if scale.0 >= 0 {
                value / scale.power()
            } else {
                value * scale.power()
            };
            if !raw.is_finite() || raw.abs() > f32::MAX as f64 {
                return Err(Error::ValueOutOfRange(value));
            }
            let bits = (raw as f32).to_bits();
            let mut words = heapless::Vec::new();
            let _ = words.push((bits >> 16) as u16);
            let _ = words.push(bits as u16);
            Ok(words)
        }
        ValueType::F64 => Err(Error::InvalidParameter(
            "F64 values are carried by variables, not registers".into(),
        )),
        _ => Ok(encode_words(from_per_unit(value, scale, value_type)?, value_type)),
    }
}

/// Unpack big-endian register words of an integer `value_type` into a raw integer.
pub fn decode_words(words: &[u16], value_type: ValueType) -> Result<i64> {
    if words.len() != value_type.word_count() {
        return Err(Error::InvalidParameter(format!(
            "{value_type:?} needs {} words, got {}",
            value_type.word_count(),
            words.len()
        )));
    }
    let wide = || ((words[0] as u32) << 16) | words[1] as u32;
    match value_type {
        ValueType::U16 => Ok(words[0] as i64),
        ValueType::I16 => Ok(words[0] as i16 as i64),
        ValueType::U32 => Ok(wide() as i64),
        ValueType::I32 => Ok(wide() as i32 as i64),
        ValueType::F32 | ValueType::F64 => Err(Error::InvalidParameter(format!(
            "{value_type:?} is not an integer type"
        ))),
    }
}

/// Decode big-endian register words of `value_type` into an engineering value.
pub fn decode(words: &[u16], scale: ScaleFactor, value_type: ValueType) -> Result<f64> {
    match value_type {
        ValueType::F32 => {
            let [high, low] = words else {
                return Err(Error::InvalidParameter(format!(
                    "F32 needs 2 words, got {}",
                    words.len()
                )));
            };
            let raw = f32::from_bits(((*high as u32) << 16) | *low as u32) as f64;
            Ok(if scale.0 >= 0 {
                raw * scale.power()
            } else {
                raw / scale.power()
            })
        }
        ValueType::F64 => Err(Error::InvalidParameter(
            "F64 values are carried by variables, not registers".into(),
        )),
        _ => Ok(to_per_unit(decode_words(words, value_type)?, scale)),
    }
}
