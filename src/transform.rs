//! Per-datapoint value transforms.
//!
//! A transform turns one decoded datapoint into one or more already-scaled
//! domain values. Transforms are pure: no I/O, no shared state. Fan-out
//! shapes (bit fields, byte slices) return their sub-values in declaration
//! order, and that order is the dispatch order.

use crate::cluster::AttrValue;
use crate::error::{QuirkError, Result};
use crate::protocol::{DataType, DatapointValue};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const MAX_PAYLOAD: usize = u16::MAX as usize;

fn one() -> i64 {
    1
}

/// `domain = raw * multiplier / divisor`
///
/// Exact divisions stay integral; anything else becomes a float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scale {
    #[serde(default = "one")]
    pub multiplier: i64,
    #[serde(default = "one")]
    pub divisor: i64,
}

impl Default for Scale {
    fn default() -> Self {
        Self::UNIT
    }
}

impl Scale {
    pub const UNIT: Scale = Scale {
        multiplier: 1,
        divisor: 1,
    };

    pub fn divide(divisor: i64) -> Self {
        Self {
            multiplier: 1,
            divisor,
        }
    }

    pub fn multiply(multiplier: i64) -> Self {
        Self {
            multiplier,
            divisor: 1,
        }
    }

    pub fn ratio(multiplier: i64, divisor: i64) -> Self {
        Self {
            multiplier,
            divisor,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.divisor == 0 || self.multiplier == 0 {
            return Err(QuirkError::InvalidDefinition(format!(
                "scale {}/{} must have a non-zero multiplier and divisor",
                self.multiplier, self.divisor
            )));
        }
        Ok(())
    }

    pub fn apply(&self, raw: i64) -> Result<AttrValue> {
        if self.divisor == 0 {
            return Err(QuirkError::InvalidArgument("division by zero".into()));
        }
        let scaled = raw.checked_mul(self.multiplier).ok_or_else(|| {
            QuirkError::InvalidArgument(format!("{} * {} overflows", raw, self.multiplier))
        })?;
        if scaled % self.divisor == 0 {
            Ok(AttrValue::Int(scaled / self.divisor))
        } else {
            Ok(AttrValue::Float(scaled as f64 / self.divisor as f64))
        }
    }

    /// Inverse of [`apply`](Self::apply), rounding to the nearest raw step.
    pub fn invert(&self, value: &AttrValue) -> Result<i64> {
        let v = value
            .as_f64()
            .ok_or_else(|| QuirkError::InvalidArgument(format!("{} is not numeric", value)))?;
        if self.multiplier == 0 {
            return Err(QuirkError::InvalidArgument("multiplier is zero".into()));
        }
        Ok((v * self.divisor as f64 / self.multiplier as f64).round() as i64)
    }
}

/// Electrical phase selected by byte-sliced telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    A,
    B,
    C,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::A, Phase::B, Phase::C];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Lower-case letter used in bus channel names (`power/a`).
    pub fn letter(self) -> &'static str {
        match self {
            Phase::A => "a",
            Phase::B => "b",
            Phase::C => "c",
        }
    }
}

impl TryFrom<u8> for Phase {
    type Error = QuirkError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Phase::A),
            1 => Ok(Phase::B),
            2 => Ok(Phase::C),
            other => Err(QuirkError::InvalidArgument(format!(
                "Invalid phase {}. Phase must be 0, 1, or 2.",
                other
            ))),
        }
    }
}

/// Sub-field of an integer datapoint: `(raw >> shift) & ((1 << bits) - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitSlice {
    pub shift: u8,
    pub bits: u8,
    #[serde(default)]
    pub scale: Scale,
}

impl BitSlice {
    pub fn new(shift: u8, bits: u8, scale: Scale) -> Self {
        Self { shift, bits, scale }
    }
}

/// Little-endian sub-field of a raw datapoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteSlice {
    pub offset: usize,
    pub len: usize,
    #[serde(default)]
    pub scale: Scale,
}

impl ByteSlice {
    pub fn new(offset: usize, len: usize, scale: Scale) -> Self {
        Self { offset, len, scale }
    }
}

/// Output of a transform: ordered sub-values, plus the phase for phase-routed
/// telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub values: Vec<AttrValue>,
    pub phase: Option<Phase>,
}

impl Transformed {
    fn single(value: AttrValue) -> Self {
        Self {
            values: vec![value],
            phase: None,
        }
    }
}

/// How a raw datapoint becomes domain value(s).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformRule {
    /// Raw value stored as-is
    #[default]
    Identity,
    Linear {
        #[serde(default)]
        scale: Scale,
    },
    /// Values at or above `threshold` are negative, biased by `modulus`;
    /// applied before scaling.
    Signed {
        threshold: i64,
        modulus: i64,
        #[serde(default)]
        scale: Scale,
    },
    /// Natural two's-complement reinterpretation of the low `bits` bits.
    TwosComplement {
        bits: u8,
        #[serde(default)]
        scale: Scale,
    },
    BitField { fields: Vec<BitSlice> },
    ByteSliced {
        slices: Vec<ByteSlice>,
        #[serde(default)]
        phase: Option<u8>,
    },
    EnumMap { map: BTreeMap<i64, i64> },
    /// ZCL illuminance encoding of a lux reading
    Lux,
}

impl TransformRule {
    pub fn linear(divisor: i64) -> Self {
        TransformRule::Linear {
            scale: Scale::divide(divisor),
        }
    }

    pub fn scaled(scale: Scale) -> Self {
        TransformRule::Linear { scale }
    }

    pub fn signed(threshold: i64, modulus: i64, scale: Scale) -> Self {
        TransformRule::Signed {
            threshold,
            modulus,
            scale,
        }
    }

    /// 3-byte power, 3-byte current, 2-byte voltage, emitted as
    /// power, voltage, current.
    pub fn phase_vcp(phase: u8) -> Self {
        TransformRule::ByteSliced {
            slices: vec![
                ByteSlice::new(0, 3, Scale::UNIT),
                ByteSlice::new(6, 2, Scale::UNIT),
                ByteSlice::new(3, 3, Scale::UNIT),
            ],
            phase: Some(phase),
        }
    }

    /// Number of values [`apply`](Self::apply) yields.
    pub fn arity(&self) -> usize {
        match self {
            TransformRule::BitField { fields } => fields.len(),
            TransformRule::ByteSliced { slices, .. } => slices.len(),
            _ => 1,
        }
    }

    /// Whether this transform produces a phase for phase-routed bindings.
    pub fn is_phased(&self) -> bool {
        matches!(self, TransformRule::ByteSliced { phase: Some(_), .. })
    }

    /// Structural checks performed once at registration time.
    pub fn validate(&self) -> Result<()> {
        match self {
            TransformRule::Identity | TransformRule::Lux => Ok(()),
            TransformRule::Linear { scale } | TransformRule::Signed { scale, .. } => {
                scale.validate()
            }
            TransformRule::TwosComplement { bits, scale } => {
                if !(2..=64).contains(bits) {
                    return Err(QuirkError::InvalidDefinition(format!(
                        "two's complement width {} is out of range",
                        bits
                    )));
                }
                scale.validate()
            }
            TransformRule::BitField { fields } => {
                if fields.is_empty() {
                    return Err(QuirkError::InvalidDefinition("empty bit field".into()));
                }
                for f in fields {
                    if f.bits == 0 || f.shift as u32 + f.bits as u32 > 64 {
                        return Err(QuirkError::InvalidDefinition(format!(
                            "bit slice {}+{} exceeds 64 bits",
                            f.shift, f.bits
                        )));
                    }
                    f.scale.validate()?;
                }
                Ok(())
            }
            TransformRule::ByteSliced { slices, .. } => {
                if slices.is_empty() {
                    return Err(QuirkError::InvalidDefinition("empty byte slice set".into()));
                }
                for s in slices {
                    if !(1..=8).contains(&s.len) {
                        return Err(QuirkError::InvalidDefinition(format!(
                            "byte slice length {} must be 1..=8",
                            s.len
                        )));
                    }
                    // A datapoint payload never exceeds its u16 length field.
                    if s.offset > MAX_PAYLOAD - s.len {
                        return Err(QuirkError::InvalidDefinition(format!(
                            "byte slice offset {} is past the largest datapoint payload",
                            s.offset
                        )));
                    }
                    s.scale.validate()?;
                }
                Ok(())
            }
            TransformRule::EnumMap { map } => {
                if map.is_empty() {
                    return Err(QuirkError::InvalidDefinition("empty enum map".into()));
                }
                Ok(())
            }
        }
    }

    /// Applies the transform to a decoded datapoint.
    pub fn apply(&self, raw: &DatapointValue) -> Result<Transformed> {
        match self {
            TransformRule::Identity => Ok(Transformed::single(AttrValue::from(raw))),
            TransformRule::Linear { scale } => {
                Ok(Transformed::single(scale.apply(numeric(raw)?)?))
            }
            TransformRule::Signed {
                threshold,
                modulus,
                scale,
            } => {
                let mut v = numeric(raw)?;
                if v >= *threshold {
                    v -= modulus;
                }
                Ok(Transformed::single(scale.apply(v)?))
            }
            TransformRule::TwosComplement { bits, scale } => {
                let v = sign_extend(numeric(raw)?, *bits);
                Ok(Transformed::single(scale.apply(v)?))
            }
            TransformRule::BitField { fields } => {
                let v = unsigned(raw)?;
                let values = fields
                    .iter()
                    .map(|f| {
                        let mask = if f.bits >= 64 {
                            u64::MAX
                        } else {
                            (1u64 << f.bits) - 1
                        };
                        let sub = v.checked_shr(f.shift as u32).unwrap_or(0) & mask;
                        f.scale.apply(sub as i64)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Transformed {
                    values,
                    phase: None,
                })
            }
            TransformRule::ByteSliced { slices, phase } => {
                // Phase is checked before touching the payload.
                let phase = phase.map(Phase::try_from).transpose()?;
                let DatapointValue::Raw(bytes) = raw else {
                    return Err(QuirkError::InvalidArgument(format!(
                        "byte-sliced transform needs raw bytes, got {:?}",
                        raw.data_type()
                    )));
                };
                let values = slices
                    .iter()
                    .map(|s| {
                        let end = s
                            .offset
                            .checked_add(s.len)
                            .filter(|end| s.len > 0 && s.len <= 8 && *end <= bytes.len())
                            .ok_or_else(|| {
                                QuirkError::InvalidArgument(format!(
                                    "slice of {} at offset {} exceeds {}-byte payload",
                                    s.len,
                                    s.offset,
                                    bytes.len()
                                ))
                            })?;
                        let v = LittleEndian::read_uint(&bytes[s.offset..end], s.len);
                        s.scale.apply(v as i64)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Transformed { values, phase })
            }
            TransformRule::EnumMap { map } => {
                let key = numeric(raw)?;
                map.get(&key)
                    .map(|v| Transformed::single(AttrValue::Int(*v)))
                    .ok_or_else(|| {
                        QuirkError::InvalidArgument(format!("value {} has no mapping", key))
                    })
            }
            TransformRule::Lux => {
                let lux = numeric(raw)?;
                let v = if lux <= 0 {
                    0
                } else {
                    (10000.0 * (lux as f64).log10() + 1.0).round() as i64
                };
                Ok(Transformed::single(AttrValue::Int(v)))
            }
        }
    }

    /// Maps a domain value back to the datapoint the device expects, for
    /// write-back of configuration values.
    pub fn invert(&self, value: &AttrValue, data_type: DataType) -> Result<DatapointValue> {
        match self {
            TransformRule::Identity => to_datapoint(value, data_type),
            TransformRule::Linear { scale } => int_to_datapoint(scale.invert(value)?, data_type),
            TransformRule::Signed { modulus, scale, .. } => {
                let raw = scale.invert(value)?;
                let raw = if raw < 0 { raw + modulus } else { raw };
                int_to_datapoint(raw, data_type)
            }
            TransformRule::TwosComplement { bits, scale } => {
                let raw = scale.invert(value)?;
                let raw = if *bits >= 64 {
                    raw
                } else {
                    raw & ((1i64 << bits) - 1)
                };
                int_to_datapoint(raw, data_type)
            }
            TransformRule::EnumMap { map } => {
                let target = value.as_i64().ok_or_else(|| {
                    QuirkError::InvalidArgument(format!("{} is not an integer", value))
                })?;
                let key = map
                    .iter()
                    .find_map(|(k, v)| (*v == target).then_some(*k))
                    .ok_or_else(|| {
                        QuirkError::InvalidArgument(format!("{} is not a mapped value", target))
                    })?;
                int_to_datapoint(key, data_type)
            }
            TransformRule::BitField { .. }
            | TransformRule::ByteSliced { .. }
            | TransformRule::Lux => Err(QuirkError::InvalidArgument(format!(
                "{} transform cannot be written back",
                self.kind()
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TransformRule::Identity => "identity",
            TransformRule::Linear { .. } => "linear",
            TransformRule::Signed { .. } => "signed",
            TransformRule::TwosComplement { .. } => "twos_complement",
            TransformRule::BitField { .. } => "bit_field",
            TransformRule::ByteSliced { .. } => "byte_sliced",
            TransformRule::EnumMap { .. } => "enum_map",
            TransformRule::Lux => "lux",
        }
    }
}

fn numeric(raw: &DatapointValue) -> Result<i64> {
    raw.as_i64().ok_or_else(|| {
        QuirkError::InvalidArgument(format!("{:?} datapoint is not numeric", raw.data_type()))
    })
}

/// Integer view without sign: 32-bit values keep their bit pattern.
fn unsigned(raw: &DatapointValue) -> Result<u64> {
    match raw {
        DatapointValue::Value(v) => Ok(*v as u32 as u64),
        other => numeric(other).map(|v| v as u64),
    }
}

fn sign_extend(v: i64, bits: u8) -> i64 {
    if bits >= 64 {
        return v;
    }
    let shift = 64 - bits as u32;
    (v << shift) >> shift
}

fn int_to_datapoint(raw: i64, data_type: DataType) -> Result<DatapointValue> {
    let out_of_range =
        || QuirkError::InvalidArgument(format!("{} does not fit a {:?} datapoint", raw, data_type));
    match data_type {
        DataType::Bool => Ok(DatapointValue::Bool(raw != 0)),
        DataType::Value => i32::try_from(raw)
            .or_else(|_| u32::try_from(raw).map(|v| v as i32))
            .map(DatapointValue::Value)
            .map_err(|_| out_of_range()),
        DataType::Enum => u8::try_from(raw)
            .map(DatapointValue::Enum)
            .map_err(|_| out_of_range()),
        DataType::Bitmap => u32::try_from(raw)
            .map(DatapointValue::Bitmap)
            .map_err(|_| out_of_range()),
        DataType::String | DataType::Raw => Err(out_of_range()),
    }
}

fn to_datapoint(value: &AttrValue, data_type: DataType) -> Result<DatapointValue> {
    match (value, data_type) {
        (AttrValue::Str(s), DataType::String) => Ok(DatapointValue::String(s.clone())),
        (AttrValue::Bytes(b), DataType::Raw) => Ok(DatapointValue::Raw(b.clone())),
        (AttrValue::Float(f), _) => int_to_datapoint(f.round() as i64, data_type),
        (v, _) => {
            let raw = v.as_i64().ok_or_else(|| {
                QuirkError::InvalidArgument(format!("{} cannot be sent as {:?}", v, data_type))
            })?;
            int_to_datapoint(raw, data_type)
        }
    }
}
