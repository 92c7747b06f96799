use crate::core::{
    BitString, DataReader, DataWriter, DecodingError, EncodingError, IdSet, RangeEntry,
};
use num_traits::FromPrimitive;
#[cfg(feature = "serde")]
use serde::Serialize;
use std::fmt;

/// Computes the length of a flexible bitfield from the fields resolved before it.
pub type LengthFn = fn(&[Field]) -> usize;

/// Accepts or rejects a field value.
pub type Validator = fn(&FieldValue) -> bool;

/// A decoded field value.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize), serde(untagged))]
pub enum FieldValue {
    Bool(bool),
    Int(u64),
    Str(String),
    Bits(Vec<bool>),
    IntList(Vec<u64>),
    IdSet(IdSet),
    Ranges(Vec<RangeEntry>),
}

impl FieldValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Str(_) => "string",
            Self::Bits(_) => "bitfield",
            Self::IntList(_) => "integer list",
            Self::IdSet(_) => "id set",
            Self::Ranges(_) => "array of ranges",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<u64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bits(&self) -> Option<&[bool]> {
        match self {
            Self::Bits(bits) => Some(bits),
            _ => None,
        }
    }

    pub fn as_int_list(&self) -> Option<&[u64]> {
        match self {
            Self::IntList(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_id_set(&self) -> Option<&IdSet> {
        match self {
            Self::IdSet(ids) => Some(ids),
            _ => None,
        }
    }

    pub fn as_ranges(&self) -> Option<&[RangeEntry]> {
        match self {
            Self::Ranges(ranges) => Some(ranges),
            _ => None,
        }
    }

    /// Builds the value of a datetime field from unix seconds.
    pub fn from_unix_seconds(seconds: u64) -> Self {
        Self::Int(seconds.saturating_mul(10))
    }

    /// Unix seconds of a datetime value, which holds deciseconds.
    pub fn unix_seconds(&self) -> Option<u64> {
        self.as_int().map(|deciseconds| deciseconds / 10)
    }

    /// Interprets an integer value as one of the enums of this crate, such as `Notice`.
    pub fn as_enum<T: FromPrimitive>(&self) -> Option<T> {
        self.as_int().and_then(T::from_u64)
    }

    /// Ids of the set bits of a bitfield, starting at 1.
    pub fn set_bits(&self) -> Option<IdSet> {
        self.as_bits().map(|bits| {
            bits.iter()
                .enumerate()
                .filter(|(_, set)| **set)
                .map(|(i, _)| (i + 1) as u16)
                .collect()
        })
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
            Self::Bits(bits) => bits
                .iter()
                .try_for_each(|&b| f.write_str(if b { "1" } else { "0" })),
            Self::IntList(list) => write!(f, "{list:?}"),
            Self::IdSet(ids) => write!(f, "{ids:?}"),
            Self::Ranges(ranges) => write!(f, "{ranges:?}"),
        }
    }
}

macro_rules! impl_from_unsigned {
    ($($t:ty),+) => {
        $(
            impl From<$t> for FieldValue {
                fn from(value: $t) -> Self {
                    Self::Int(value.into())
                }
            }
        )+
    };
}

impl_from_unsigned!(u8, u16, u32, u64);

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Vec<bool>> for FieldValue {
    fn from(value: Vec<bool>) -> Self {
        Self::Bits(value)
    }
}

impl From<Vec<u64>> for FieldValue {
    fn from(value: Vec<u64>) -> Self {
        Self::IntList(value)
    }
}

impl From<IdSet> for FieldValue {
    fn from(value: IdSet) -> Self {
        Self::IdSet(value)
    }
}

impl From<Vec<RangeEntry>> for FieldValue {
    fn from(value: Vec<RangeEntry>) -> Self {
        Self::Ranges(value)
    }
}

/// The bit encoding of a field.
#[derive(Clone, Copy, Debug)]
pub enum FieldKind {
    Boolean,
    FixedInteger(u32),
    /// Deciseconds since the unix epoch, on 36 bits.
    Datetime,
    FixedString(usize),
    FixedBitfield(usize),
    FlexibleBitfield(LengthFn),
    FixedIntegerList {
        bits: u32,
        count: usize,
    },
    IntegerRange,
    OptimizedIntegerRange,
    FibonacciIntegerRange,
    ArrayOfRanges {
        key_bits: u32,
        type_bits: u32,
    },
    LegacyVendorConsents,
}

impl FieldKind {
    pub fn type_name(&self) -> &'static str {
        self.zero_value().type_name()
    }

    pub fn accepts(&self, value: &FieldValue) -> bool {
        std::mem::discriminant(value) == std::mem::discriminant(&self.zero_value())
    }

    pub fn zero_value(&self) -> FieldValue {
        match self {
            Self::Boolean => FieldValue::Bool(false),
            Self::FixedInteger(_) | Self::Datetime => FieldValue::Int(0),
            Self::FixedString(_) => FieldValue::Str(String::new()),
            Self::FixedBitfield(_) | Self::FlexibleBitfield(_) => FieldValue::Bits(vec![]),
            Self::FixedIntegerList { .. } => FieldValue::IntList(vec![]),
            Self::IntegerRange
            | Self::OptimizedIntegerRange
            | Self::FibonacciIntegerRange
            | Self::LegacyVendorConsents => FieldValue::IdSet(IdSet::new()),
            Self::ArrayOfRanges { .. } => FieldValue::Ranges(vec![]),
        }
    }

    /// Reads a value; `previous` holds the fields of the segment read so far.
    pub(crate) fn read(
        &self,
        r: &mut DataReader,
        previous: &[Field],
    ) -> Result<FieldValue, DecodingError> {
        Ok(match *self {
            Self::Boolean => FieldValue::Bool(r.read_bool()?),
            Self::FixedInteger(bits) => FieldValue::Int(r.read_fixed_integer(bits)?),
            Self::Datetime => FieldValue::Int(r.read_datetime()?),
            Self::FixedString(chars) => FieldValue::Str(r.read_string(chars)?),
            Self::FixedBitfield(bits) => FieldValue::Bits(r.read_fixed_bitfield(bits)?),
            Self::FlexibleBitfield(len) => FieldValue::Bits(r.read_fixed_bitfield(len(previous))?),
            Self::FixedIntegerList { bits, count } => {
                FieldValue::IntList(r.read_fixed_integer_list(bits, count)?)
            }
            Self::IntegerRange => FieldValue::IdSet(r.read_integer_range()?),
            Self::OptimizedIntegerRange => FieldValue::IdSet(r.read_optimized_integer_range()?),
            Self::FibonacciIntegerRange => FieldValue::IdSet(r.read_fibonacci_range()?),
            Self::ArrayOfRanges {
                key_bits,
                type_bits,
            } => FieldValue::Ranges(r.read_array_of_ranges(key_bits, type_bits)?),
            Self::LegacyVendorConsents => FieldValue::IdSet(r.read_legacy_vendor_consents()?),
        })
    }

    /// Writes a value; `previous` holds the fields of the segment written so far.
    pub(crate) fn write(
        &self,
        w: &mut DataWriter,
        value: &FieldValue,
        previous: &[Field],
    ) -> Result<(), EncodingError> {
        match (*self, value) {
            (Self::Boolean, FieldValue::Bool(b)) => w.write_bool(*b),
            (Self::FixedInteger(bits), FieldValue::Int(n)) => w.write_fixed_integer(bits, *n),
            (Self::Datetime, FieldValue::Int(n)) => w.write_datetime(*n),
            (Self::FixedString(chars), FieldValue::Str(s)) => w.write_string(chars, s),
            (Self::FixedBitfield(bits), FieldValue::Bits(b)) => w.write_fixed_bitfield(bits, b),
            (Self::FlexibleBitfield(len), FieldValue::Bits(b)) => {
                w.write_fixed_bitfield(len(previous), b)
            }
            (Self::FixedIntegerList { bits, count }, FieldValue::IntList(list)) => {
                w.write_fixed_integer_list(bits, count, list)
            }
            (Self::IntegerRange, FieldValue::IdSet(ids)) => w.write_integer_range(ids),
            (Self::OptimizedIntegerRange, FieldValue::IdSet(ids)) => {
                w.write_optimized_integer_range(ids)
            }
            (Self::FibonacciIntegerRange, FieldValue::IdSet(ids)) => w.write_fibonacci_range(ids),
            (
                Self::ArrayOfRanges {
                    key_bits,
                    type_bits,
                },
                FieldValue::Ranges(entries),
            ) => w.write_array_of_ranges(key_bits, type_bits, entries),
            (Self::LegacyVendorConsents, FieldValue::IdSet(ids)) => {
                w.write_legacy_vendor_consents(ids)
            }
            (kind, value) => Err(EncodingError::UnexpectedValue {
                expected: kind.type_name(),
                found: value.type_name(),
            }),
        }
    }

    /// Encodes a standalone value. Flexible bitfields see no preceding fields.
    pub fn encode_to_bits(&self, value: &FieldValue) -> Result<BitString, EncodingError> {
        let mut w = DataWriter::new();
        self.write(&mut w, value, &[])?;
        w.finish()
    }

    /// Decodes a standalone value, which must use every bit given.
    pub fn decode_from_bits(&self, bits: &BitString) -> Result<FieldValue, DecodingError> {
        let mut r = bits.reader();
        let value = self.read(&mut r, &[])?;
        match r.remaining() {
            0 => Ok(value),
            n => Err(DecodingError::TrailingBits(n)),
        }
    }
}

/// Value a field holds before it is set or decoded.
#[derive(Clone, Copy, Debug)]
pub enum DefaultValue {
    /// The zero value of the field kind.
    Zero,
    /// No value: the field must be set before a strict encode.
    Unset,
    Bool(bool),
    Int(u64),
    Str(&'static str),
}

/// Static description of a field within a segment.
#[derive(Clone, Copy, Debug)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    pub default: DefaultValue,
    pub required: bool,
    pub constant: bool,
    /// Accept missing data at the end of the segment and use the default instead.
    pub optional_tail: bool,
    pub validator: Option<Validator>,
}

impl FieldDef {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            default: DefaultValue::Zero,
            required: false,
            constant: false,
            optional_tail: false,
            validator: None,
        }
    }

    pub const fn boolean(name: &'static str) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub const fn integer(name: &'static str, bits: u32) -> Self {
        Self::new(name, FieldKind::FixedInteger(bits))
    }

    pub const fn datetime(name: &'static str) -> Self {
        Self::new(name, FieldKind::Datetime)
    }

    pub const fn string(name: &'static str, chars: usize) -> Self {
        Self::new(name, FieldKind::FixedString(chars))
    }

    pub const fn bitfield(name: &'static str, bits: usize) -> Self {
        Self::new(name, FieldKind::FixedBitfield(bits))
    }

    pub const fn flexible_bitfield(name: &'static str, len: LengthFn) -> Self {
        Self::new(name, FieldKind::FlexibleBitfield(len))
    }

    pub const fn integer_list(name: &'static str, bits: u32, count: usize) -> Self {
        Self::new(name, FieldKind::FixedIntegerList { bits, count })
    }

    pub const fn integer_range(name: &'static str) -> Self {
        Self::new(name, FieldKind::IntegerRange)
    }

    pub const fn optimized_range(name: &'static str) -> Self {
        Self::new(name, FieldKind::OptimizedIntegerRange)
    }

    pub const fn fibonacci_range(name: &'static str) -> Self {
        Self::new(name, FieldKind::FibonacciIntegerRange)
    }

    pub const fn array_of_ranges(name: &'static str, key_bits: u32, type_bits: u32) -> Self {
        Self::new(
            name,
            FieldKind::ArrayOfRanges {
                key_bits,
                type_bits,
            },
        )
    }

    pub const fn legacy_vendor_consents(name: &'static str) -> Self {
        Self::new(name, FieldKind::LegacyVendorConsents)
    }

    pub const fn default_value(self, default: DefaultValue) -> Self {
        Self { default, ..self }
    }

    /// Marks the field as one that must hold a value when encoding strictly.
    pub const fn required(self) -> Self {
        Self {
            required: true,
            default: DefaultValue::Unset,
            ..self
        }
    }

    /// Fixes the value of an integer field, such as a version or a segment type.
    pub const fn constant(self, value: u64) -> Self {
        Self {
            constant: true,
            default: DefaultValue::Int(value),
            ..self
        }
    }

    pub const fn optional_tail(self) -> Self {
        Self {
            optional_tail: true,
            ..self
        }
    }

    pub const fn validated(self, validator: Validator) -> Self {
        Self {
            validator: Some(validator),
            ..self
        }
    }

    pub fn initial_value(&self) -> Option<FieldValue> {
        match self.default {
            DefaultValue::Zero => Some(self.kind.zero_value()),
            DefaultValue::Unset => None,
            DefaultValue::Bool(b) => Some(FieldValue::Bool(b)),
            DefaultValue::Int(n) => Some(FieldValue::Int(n)),
            DefaultValue::Str(s) => Some(FieldValue::Str(s.to_string())),
        }
    }

    /// Value of a constant field.
    pub fn constant_value(&self) -> Option<u64> {
        match (self.constant, self.default) {
            (true, DefaultValue::Int(n)) => Some(n),
            _ => None,
        }
    }

    pub(crate) fn check(&self, value: Option<&FieldValue>) -> Result<(), FieldFailure> {
        match value {
            None if self.required => Err(FieldFailure::Missing),
            None => Ok(()),
            Some(v) if self.validator.is_some_and(|accepts| !accepts(v)) => {
                Err(FieldFailure::Rejected(v.to_string()))
            }
            Some(_) => Ok(()),
        }
    }
}

/// Why a field failed validation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FieldFailure {
    Missing,
    Rejected(String),
    Conflict { with: &'static str },
}

impl fmt::Display for FieldFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("required value is missing"),
            Self::Rejected(value) => write!(f, "value {value} is not allowed"),
            Self::Conflict { with } => write!(f, "value conflicts with {with}"),
        }
    }
}

/// A field of a segment and its current value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Field {
    def: &'static FieldDef,
    value: Option<FieldValue>,
}

impl Field {
    pub(crate) fn new(def: &'static FieldDef) -> Self {
        Self {
            def,
            value: def.initial_value(),
        }
    }

    pub(crate) fn with_value(def: &'static FieldDef, value: Option<FieldValue>) -> Self {
        Self { def, value }
    }

    pub fn name(&self) -> &'static str {
        self.def.name
    }

    pub fn def(&self) -> &'static FieldDef {
        self.def
    }

    pub fn value(&self) -> Option<&FieldValue> {
        self.value.as_ref()
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub(crate) fn set(&mut self, value: Option<FieldValue>) {
        self.value = value;
    }
}

impl PartialEq for FieldDef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other) || self.name == other.name
    }
}

impl Eq for FieldDef {}

/// Integer value of an already resolved field, for flexible bitfield lengths.
pub fn int_value(fields: &[Field], name: &str) -> Option<u64> {
    fields
        .iter()
        .find(|f| f.name() == name)
        .and_then(Field::value)
        .and_then(FieldValue::as_int)
}
