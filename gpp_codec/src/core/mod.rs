use crate::core::fibonacci::{fibonacci_iterator, zeckendorf};
use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter};
#[cfg(feature = "serde")]
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::iter::{repeat, repeat_with};
use std::str::FromStr;
use thiserror::Error;

mod base64;
mod fibonacci;

/// Sorted set of vendor, purpose or section identifiers.
pub type IdSet = BTreeSet<u16>;

const MAX_RANGE_ENTRIES: usize = (1 << 12) - 1;

/// The error type for failures while reading bits.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DecodingError {
    #[error("unexpected end of data: {needed} bits needed, {available} available")]
    UnexpectedEnd { needed: usize, available: usize },
    #[error("invalid character {character:?} at offset {offset} in bit string")]
    InvalidBitCharacter { character: char, offset: usize },
    #[error("invalid byte {byte} at offset {offset} in base64url string")]
    InvalidBase64Byte { offset: usize, byte: u8 },
    #[error("invalid string character value {0}")]
    InvalidStringCharacter(u64),
    #[error("invalid range: end {end} is lower than start {start}")]
    InvalidRange { start: u16, end: u16 },
    #[error("fibonacci encoded value is too large")]
    FibonacciOverflow,
    #[error("identifier {0} is out of range")]
    IdOutOfRange(u64),
    #[error("{0} unexpected trailing bits")]
    TrailingBits(usize),
    #[error("unable to read bits: {0}")]
    Read(#[from] io::Error),
}

/// The error type for failures while writing bits.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EncodingError {
    #[error("value {value} does not fit in {bits} bits")]
    ValueTooLarge { value: u64, bits: u32 },
    #[error("too many elements: {count} given, at most {max} allowed")]
    TooManyElements { count: usize, max: usize },
    #[error("character {0:?} cannot be encoded")]
    InvalidCharacter(char),
    #[error("zero cannot be fibonacci encoded")]
    ZeroFibonacci,
    #[error("identifier 0 cannot be encoded in a bitfield")]
    ZeroId,
    #[error("value of type {found} cannot be encoded as {expected}")]
    UnexpectedValue {
        expected: &'static str,
        found: &'static str,
    },
    #[error("unable to write bits: {0}")]
    Write(#[from] io::Error),
}

/// A finite sequence of bits.
///
/// Parses from and displays as a string of `0` and `1` characters.
#[derive(Clone, Default, Eq, PartialEq, Hash)]
pub struct BitString {
    bytes: Vec<u8>,
    len: usize,
}

impl BitString {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|i| (self.bytes[i / 8] >> (7 - i % 8)) & 1 == 1)
    }

    pub(crate) fn reader(&self) -> DataReader<'_> {
        DataReader::new(&self.bytes, self.len)
    }

    /// Decodes a base64url string into bits, 6 per character.
    pub fn from_base64_url(s: &str) -> Result<Self, DecodingError> {
        base64::decode_base64_url(s)
    }

    /// Encodes these bits as base64url, zero-padding to a multiple of 6 bits.
    pub fn to_base64_url(&self) -> String {
        base64::encode_base64_url(self)
    }
}

impl FromStr for BitString {
    type Err = DecodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = vec![0; s.len().div_ceil(8)];

        for (offset, character) in s.chars().enumerate() {
            match character {
                '0' => {}
                '1' => bytes[offset / 8] |= 1 << (7 - offset % 8),
                character => {
                    return Err(DecodingError::InvalidBitCharacter { character, offset });
                }
            }
        }

        Ok(Self {
            bytes,
            len: s.len(),
        })
    }
}

impl fmt::Display for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.iter()
            .try_for_each(|bit| f.write_str(if bit { "1" } else { "0" }))
    }
}

impl fmt::Debug for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitString(\"{self}\")")
    }
}

/// One entry of an array of ranges, such as a TCF publisher restriction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct RangeEntry {
    pub key: u8,
    pub range_type: u8,
    pub ids: IdSet,
}

/// Bit reader that knows how many meaningful bits are left.
///
/// Every read checks the remaining length first, so a short input fails with
/// [`DecodingError::UnexpectedEnd`] instead of reading padding bits.
pub struct DataReader<'a> {
    bit_reader: BitReader<&'a [u8], BigEndian>,
    remaining: usize,
}

impl<'a> DataReader<'a> {
    pub fn new(bytes: &'a [u8], bits: usize) -> Self {
        Self {
            bit_reader: BitReader::endian(bytes, BigEndian),
            remaining: bits.min(bytes.len() * 8),
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    fn take(&mut self, bits: usize) -> Result<(), DecodingError> {
        if bits > self.remaining {
            return Err(DecodingError::UnexpectedEnd {
                needed: bits,
                available: self.remaining,
            });
        }
        self.remaining -= bits;

        Ok(())
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodingError> {
        self.take(1)?;
        Ok(self.bit_reader.read_bit()?)
    }

    pub fn read_fixed_integer(&mut self, bits: u32) -> Result<u64, DecodingError> {
        if bits == 0 {
            return Ok(0);
        }
        self.take(bits as usize)?;
        Ok(self.bit_reader.read_unsigned_var::<u64>(bits)?)
    }

    fn read_id(&mut self) -> Result<u16, DecodingError> {
        Ok(self.read_fixed_integer(16)? as u16)
    }

    pub fn read_string(&mut self, chars: usize) -> Result<String, DecodingError> {
        self.ensure(chars * 6)?;
        repeat_with(|| -> Result<char, DecodingError> {
            match self.read_fixed_integer(6)? {
                n @ 0..=25 => Ok(char::from(b'A' + n as u8)),
                n => Err(DecodingError::InvalidStringCharacter(n)),
            }
        })
        .take(chars)
        .collect()
    }

    /// Reads a 36-bit timestamp in deciseconds since the unix epoch.
    pub fn read_datetime(&mut self) -> Result<u64, DecodingError> {
        self.read_fixed_integer(36)
    }

    pub fn read_fixed_bitfield(&mut self, bits: usize) -> Result<Vec<bool>, DecodingError> {
        self.ensure(bits)?;
        repeat_with(|| self.read_bool()).take(bits).collect()
    }

    pub fn read_fixed_integer_list(
        &mut self,
        bits: u32,
        count: usize,
    ) -> Result<Vec<u64>, DecodingError> {
        self.ensure(bits as usize * count)?;
        repeat_with(|| self.read_fixed_integer(bits))
            .take(count)
            .collect()
    }

    pub fn read_fibonacci_integer(&mut self) -> Result<u64, DecodingError> {
        let mut fib = fibonacci_iterator();
        let mut total = 0u64;
        let mut last_bit = false;

        loop {
            let bit = self.read_bool()?;

            // two consecutive 1's signal the end of the value
            if last_bit && bit {
                break;
            }

            let term = fib.next().ok_or(DecodingError::FibonacciOverflow)?;
            if bit {
                total = total
                    .checked_add(term)
                    .ok_or(DecodingError::FibonacciOverflow)?;
            }
            last_bit = bit;
        }

        Ok(total)
    }

    pub fn read_integer_range(&mut self) -> Result<IdSet, DecodingError> {
        let n = self.read_fixed_integer(12)? as usize;
        // smallest entry is a single id: 1 + 16 bits
        self.ensure(n * 17)?;

        let mut ids = IdSet::new();
        for _ in 0..n {
            if self.read_bool()? {
                let start = self.read_id()?;
                let end = self.read_id()?;
                if end < start {
                    return Err(DecodingError::InvalidRange { start, end });
                }
                ids.extend(start..=end);
            } else {
                ids.insert(self.read_id()?);
            }
        }

        Ok(ids)
    }

    /// Reads a 16-bit max id followed by either an integer range or a bitfield.
    pub fn read_optimized_integer_range(&mut self) -> Result<IdSet, DecodingError> {
        let max_id = self.read_fixed_integer(16)? as usize;
        if self.read_bool()? {
            self.read_integer_range()
        } else {
            Ok(bitfield_ids(&self.read_fixed_bitfield(max_id)?))
        }
    }

    /// Reads a fibonacci range, where each entry is a delta from the previous id.
    pub fn read_fibonacci_range(&mut self) -> Result<IdSet, DecodingError> {
        let n = self.read_fixed_integer(12)? as usize;
        // smallest entry is 0 followed by "11"
        self.ensure(n * 3)?;

        let mut ids = IdSet::new();
        let mut last_id = 0u64;
        for _ in 0..n {
            let is_group = self.read_bool()?;
            let start = last_id
                .checked_add(self.read_fibonacci_integer()?)
                .ok_or(DecodingError::FibonacciOverflow)?;
            let end = if is_group {
                start
                    .checked_add(self.read_fibonacci_integer()?)
                    .ok_or(DecodingError::FibonacciOverflow)?
            } else {
                start
            };
            ids.extend(to_id(start)?..=to_id(end)?);
            last_id = end;
        }

        Ok(ids)
    }

    pub fn read_array_of_ranges(
        &mut self,
        key_bits: u32,
        type_bits: u32,
    ) -> Result<Vec<RangeEntry>, DecodingError> {
        let n = self.read_fixed_integer(12)? as usize;
        self.ensure(n * (key_bits + type_bits + 12) as usize)?;

        repeat_with(|| -> Result<RangeEntry, DecodingError> {
            Ok(RangeEntry {
                key: self.read_fixed_integer(key_bits)? as u8,
                range_type: self.read_fixed_integer(type_bits)? as u8,
                ids: self.read_integer_range()?,
            })
        })
        .take(n)
        .collect()
    }

    /// Reads TCF EU v1 vendor consents, either a bitfield or a range with a default consent.
    pub fn read_legacy_vendor_consents(&mut self) -> Result<IdSet, DecodingError> {
        let max_vendor_id = self.read_id()?;
        if self.read_bool()? {
            let default_consent = self.read_bool()?;
            let ids = self.read_integer_range()?;

            // only vendors who consent are kept
            Ok((1..=max_vendor_id)
                .filter(|id| default_consent ^ ids.contains(id))
                .collect())
        } else {
            Ok(bitfield_ids(&self.read_fixed_bitfield(max_vendor_id as usize)?))
        }
    }

    fn ensure(&self, bits: usize) -> Result<(), DecodingError> {
        if bits > self.remaining {
            Err(DecodingError::UnexpectedEnd {
                needed: bits,
                available: self.remaining,
            })
        } else {
            Ok(())
        }
    }
}

fn to_id(value: u64) -> Result<u16, DecodingError> {
    u16::try_from(value).map_err(|_| DecodingError::IdOutOfRange(value))
}

fn bitfield_ids(bits: &[bool]) -> IdSet {
    bits.iter()
        .enumerate()
        .filter(|(_, set)| **set)
        .map(|(i, _)| (i + 1) as u16)
        .collect()
}

/// Consecutive runs of ids as inclusive `(start, end)` pairs.
fn id_groups(ids: &IdSet) -> Vec<(u16, u16)> {
    let mut groups: Vec<(u16, u16)> = Vec::new();
    for &id in ids {
        match groups.last_mut() {
            Some((_, end)) if end.checked_add(1) == Some(id) => *end = id,
            _ => groups.push((id, id)),
        }
    }
    groups
}

fn check_range_count(groups: &[(u16, u16)]) -> Result<(), EncodingError> {
    if groups.len() > MAX_RANGE_ENTRIES {
        return Err(EncodingError::TooManyElements {
            count: groups.len(),
            max: MAX_RANGE_ENTRIES,
        });
    }
    Ok(())
}

fn check_width(value: u64, bits: u32) -> Result<(), EncodingError> {
    if bits < u64::BITS && value >> bits != 0 {
        return Err(EncodingError::ValueTooLarge { value, bits });
    }
    Ok(())
}

/// Bit writer counting the bits written so far.
///
/// Each `write_*` method validates its whole input before emitting anything.
pub struct DataWriter {
    bit_writer: BitWriter<Vec<u8>, BigEndian>,
    len: usize,
}

impl Default for DataWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DataWriter {
    pub fn new() -> Self {
        Self {
            bit_writer: BitWriter::endian(Vec::new(), BigEndian),
            len: 0,
        }
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), EncodingError> {
        self.bit_writer.write_bit(value)?;
        self.len += 1;
        Ok(())
    }

    pub fn write_fixed_integer(&mut self, bits: u32, value: u64) -> Result<(), EncodingError> {
        check_width(value, bits)?;
        if bits == 0 {
            return Ok(());
        }
        self.bit_writer.write_unsigned_var::<u64>(bits, value)?;
        self.len += bits as usize;
        Ok(())
    }

    /// Writes `chars` characters of 6 bits, right-padding `value` with `A`.
    pub fn write_string(&mut self, chars: usize, value: &str) -> Result<(), EncodingError> {
        let values = value
            .chars()
            .map(|c| {
                if c.is_ascii_uppercase() {
                    Ok(u64::from(c as u8 - b'A'))
                } else {
                    Err(EncodingError::InvalidCharacter(c))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        if values.len() > chars {
            return Err(EncodingError::TooManyElements {
                count: values.len(),
                max: chars,
            });
        }

        values
            .into_iter()
            .chain(repeat(0))
            .take(chars)
            .try_for_each(|v| self.write_fixed_integer(6, v))
    }

    /// Writes a 36-bit timestamp in deciseconds since the unix epoch.
    pub fn write_datetime(&mut self, deciseconds: u64) -> Result<(), EncodingError> {
        self.write_fixed_integer(36, deciseconds)
    }

    pub fn write_fixed_bitfield(
        &mut self,
        bits: usize,
        values: &[bool],
    ) -> Result<(), EncodingError> {
        if values.len() > bits {
            return Err(EncodingError::TooManyElements {
                count: values.len(),
                max: bits,
            });
        }

        values
            .iter()
            .copied()
            .chain(repeat(false))
            .take(bits)
            .try_for_each(|b| self.write_bool(b))
    }

    pub fn write_fixed_integer_list(
        &mut self,
        bits: u32,
        count: usize,
        values: &[u64],
    ) -> Result<(), EncodingError> {
        if values.len() > count {
            return Err(EncodingError::TooManyElements {
                count: values.len(),
                max: count,
            });
        }
        values.iter().try_for_each(|&v| check_width(v, bits))?;

        values
            .iter()
            .copied()
            .chain(repeat(0))
            .take(count)
            .try_for_each(|v| self.write_fixed_integer(bits, v))
    }

    pub fn write_fibonacci_integer(&mut self, value: u64) -> Result<(), EncodingError> {
        if value == 0 {
            return Err(EncodingError::ZeroFibonacci);
        }
        zeckendorf(value)
            .into_iter()
            .chain([true])
            .try_for_each(|b| self.write_bool(b))
    }

    pub fn write_integer_range(&mut self, ids: &IdSet) -> Result<(), EncodingError> {
        let groups = id_groups(ids);
        check_range_count(&groups)?;
        self.write_range_groups(&groups)
    }

    fn write_range_groups(&mut self, groups: &[(u16, u16)]) -> Result<(), EncodingError> {
        self.write_fixed_integer(12, groups.len() as u64)?;
        for &(start, end) in groups {
            if start == end {
                self.write_bool(false)?;
                self.write_fixed_integer(16, start.into())?;
            } else {
                self.write_bool(true)?;
                self.write_fixed_integer(16, start.into())?;
                self.write_fixed_integer(16, end.into())?;
            }
        }
        Ok(())
    }

    /// Writes the shorter of the range and bitfield forms; the bitfield wins a tie.
    pub fn write_optimized_integer_range(&mut self, ids: &IdSet) -> Result<(), EncodingError> {
        if ids.contains(&0) {
            return Err(EncodingError::ZeroId);
        }
        let max_id = ids.last().copied().unwrap_or(0);
        let groups = id_groups(ids);
        let range_bits: usize = 12
            + groups
                .iter()
                .map(|(start, end)| if start == end { 17 } else { 33 })
                .sum::<usize>();

        self.write_fixed_integer(16, max_id.into())?;
        if range_bits < usize::from(max_id) {
            check_range_count(&groups)?;
            self.write_bool(true)?;
            self.write_range_groups(&groups)
        } else {
            self.write_bool(false)?;
            (1..=max_id).try_for_each(|id| self.write_bool(ids.contains(&id)))
        }
    }

    pub fn write_fibonacci_range(&mut self, ids: &IdSet) -> Result<(), EncodingError> {
        if ids.contains(&0) {
            return Err(EncodingError::ZeroFibonacci);
        }
        let groups = id_groups(ids);
        check_range_count(&groups)?;

        self.write_fixed_integer(12, groups.len() as u64)?;
        let mut last_id = 0;
        for (start, end) in groups {
            if start == end {
                self.write_bool(false)?;
                self.write_fibonacci_integer(u64::from(start - last_id))?;
            } else {
                self.write_bool(true)?;
                self.write_fibonacci_integer(u64::from(start - last_id))?;
                self.write_fibonacci_integer(u64::from(end - start))?;
            }
            last_id = end;
        }
        Ok(())
    }

    pub fn write_array_of_ranges(
        &mut self,
        key_bits: u32,
        type_bits: u32,
        entries: &[RangeEntry],
    ) -> Result<(), EncodingError> {
        if entries.len() > MAX_RANGE_ENTRIES {
            return Err(EncodingError::TooManyElements {
                count: entries.len(),
                max: MAX_RANGE_ENTRIES,
            });
        }
        let groups = entries
            .iter()
            .map(|entry| {
                check_width(entry.key.into(), key_bits)?;
                check_width(entry.range_type.into(), type_bits)?;
                let groups = id_groups(&entry.ids);
                check_range_count(&groups)?;
                Ok(groups)
            })
            .collect::<Result<Vec<_>, EncodingError>>()?;

        self.write_fixed_integer(12, entries.len() as u64)?;
        for (entry, groups) in entries.iter().zip(groups) {
            self.write_fixed_integer(key_bits, entry.key.into())?;
            self.write_fixed_integer(type_bits, entry.range_type.into())?;
            self.write_range_groups(&groups)?;
        }
        Ok(())
    }

    /// Writes TCF EU v1 vendor consents, always in bitfield form.
    pub fn write_legacy_vendor_consents(&mut self, ids: &IdSet) -> Result<(), EncodingError> {
        if ids.contains(&0) {
            return Err(EncodingError::ZeroId);
        }
        let max_vendor_id = ids.last().copied().unwrap_or(0);
        self.write_fixed_integer(16, max_vendor_id.into())?;
        self.write_bool(false)?;
        (1..=max_vendor_id).try_for_each(|id| self.write_bool(ids.contains(&id)))
    }

    /// Pads to a byte boundary and returns the bits written.
    pub fn finish(mut self) -> Result<BitString, EncodingError> {
        self.bit_writer.byte_align()?;
        Ok(BitString {
            bytes: self.bit_writer.into_writer(),
            len: self.len,
        })
    }
}
