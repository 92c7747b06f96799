use crate::core::{BitString, DataReader};
use crate::sections::{
    CodecState, FieldDef, FieldKind, FieldValue, Format, MissingFieldPolicy, Presence,
    SectionDecodeError, SectionDef, SectionError, SectionId, SectionLayout, Segment, SegmentDef,
    ValidationError,
};
#[cfg(feature = "serde")]
use serde::ser::{Error as _, Serialize, SerializeMap, Serializer};
use std::sync::OnceLock;
use tracing::debug;

static INCLUDED: FieldValue = FieldValue::Bool(true);
static EXCLUDED: FieldValue = FieldValue::Bool(false);

#[derive(Clone, Copy)]
enum Location {
    /// Inclusion flag of the segment at this index.
    Flag(usize),
    /// Segment index, field index.
    Field(usize, usize),
}

/// A section of a GPP string: its segments, which optional ones are included, and a cache of
/// the encoded string.
#[derive(Clone, Debug)]
pub struct Section {
    def: &'static SectionDef,
    layout: &'static SectionLayout,
    segments: Vec<Segment>,
    included: Vec<bool>,
    encoded: OnceLock<String>,
}

impl Section {
    /// Creates a section with default values, using the latest layout.
    pub fn new(def: &'static SectionDef) -> Self {
        let layout = &def.layout;
        Self {
            def,
            layout,
            segments: layout
                .segments()
                .map(|segment| Segment::new(def.name, segment, def.format))
                .collect(),
            included: layout.segments().map(default_inclusion).collect(),
            encoded: OnceLock::new(),
        }
    }

    /// Splits a section string into its segments without decoding their fields.
    ///
    /// The version, the segment types and the base64url alphabet are checked here; fields are
    /// decoded on first access.
    pub fn decode(def: &'static SectionDef, s: &str) -> Result<Self, SectionDecodeError> {
        let chunks: Vec<&str> = match def.format {
            Format::Base64Url => s.split('.').collect(),
            Format::Text => vec![s],
        };
        let (core, rest) = chunks
            .split_first()
            .ok_or(SectionDecodeError::UnexpectedEndOfString { section: def.name })?;
        debug!(section = def.name, segments = chunks.len(), "decoding section");

        let layout = select_layout(def, core)?;
        if layout.optional.is_empty() && !rest.is_empty() {
            return Err(SectionDecodeError::TooManySegments {
                section: def.name,
                found: chunks.len(),
                max: 1,
            });
        }

        let mut slots: Vec<Option<&str>> = vec![None; layout.optional.len()];
        for chunk in rest {
            let (index, segment_type) = identify_optional_segment(def, layout, chunk)?;
            if slots[index].replace(chunk).is_some() {
                return Err(SectionDecodeError::DuplicateSegmentType {
                    section: def.name,
                    segment_type,
                });
            }
        }

        let mut segments = vec![Segment::from_encoded(def.name, &layout.core, def.format, core)];
        let mut included = vec![true];
        for (segment, slot) in layout.optional.iter().zip(slots) {
            match slot {
                Some(chunk) => {
                    segments.push(Segment::from_encoded(def.name, segment, def.format, chunk));
                    included.push(true);
                }
                None => {
                    segments.push(Segment::new(def.name, segment, def.format));
                    included.push(false);
                }
            }
        }

        Ok(Self {
            def,
            layout,
            segments,
            included,
            encoded: OnceLock::from(s.to_string()),
        })
    }

    pub fn id(&self) -> SectionId {
        self.def.id
    }

    pub fn name(&self) -> &'static str {
        self.def.name
    }

    pub fn def(&self) -> &'static SectionDef {
        self.def
    }

    /// Version of the layout in use.
    pub fn version(&self) -> u8 {
        self.layout.version
    }

    pub fn state(&self) -> CodecState {
        if self.encoded.get().is_none() {
            CodecState::Dirty
        } else if self
            .segments
            .iter()
            .any(|segment| segment.state() == CodecState::Undecoded)
        {
            CodecState::Undecoded
        } else {
            CodecState::Clean
        }
    }

    /// Names of all fields, inclusion flags first in each optional segment.
    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.layout.segments().flat_map(|segment| {
            segment
                .inclusion_flag()
                .into_iter()
                .chain(segment.fields.iter().map(|f| f.name))
        })
    }

    /// Encoding of a field, inclusion flags being booleans.
    pub fn field_kind(&self, name: &str) -> Option<FieldKind> {
        match self.locate(name)? {
            Location::Flag(_) => Some(FieldKind::Boolean),
            Location::Field(segment, field) => Some(self.field_def(segment, field).kind),
        }
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    /// Whether the named optional segment is part of the encoded section.
    pub fn is_segment_included(&self, name: &str) -> Option<bool> {
        self.layout
            .segments()
            .position(|segment| segment.name == name)
            .map(|i| self.included[i])
    }

    /// Current value of a field.
    ///
    /// Fields of an optional segment that is not included have no value.
    pub fn get_field_value(&self, name: &str) -> Result<Option<&FieldValue>, SectionError> {
        match self.locate(name) {
            Some(Location::Flag(segment)) => Ok(Some(if self.included[segment] {
                &INCLUDED
            } else {
                &EXCLUDED
            })),
            Some(Location::Field(segment, field)) if self.included[segment] => {
                Ok(self.segments[segment].value(field)?)
            }
            Some(Location::Field(..)) => Ok(None),
            None => Err(self.unknown_field(name)),
        }
    }

    pub(crate) fn decoded_value(
        &self,
        name: &str,
    ) -> Result<Option<&FieldValue>, SectionDecodeError> {
        match self.locate(name) {
            Some(Location::Field(segment, field)) => self.segments[segment].value(field),
            _ => Ok(None),
        }
    }

    /// Sets a field and invalidates the cached encoding.
    ///
    /// Setting an inclusion flag adds or removes its optional segment.
    pub fn set_field_value(
        &mut self,
        name: &str,
        value: impl Into<FieldValue>,
    ) -> Result<(), SectionError> {
        let value = value.into();
        match self.locate(name) {
            Some(Location::Flag(segment)) => {
                let included = value.as_bool().ok_or_else(|| SectionError::TypeMismatch {
                    section: self.def.name,
                    field: self.layout_flag(segment),
                    expected: FieldKind::Boolean.type_name(),
                    found: value.type_name(),
                })?;
                if self.included[segment] != included {
                    self.included[segment] = included;
                    self.encoded.take();
                }
                Ok(())
            }
            Some(Location::Field(segment, field)) => {
                let def = self.field_def(segment, field);
                if def.constant {
                    return Err(SectionError::ReadOnlyField {
                        section: self.def.name,
                        field: def.name,
                    });
                }
                if !def.kind.accepts(&value) {
                    return Err(SectionError::TypeMismatch {
                        section: self.def.name,
                        field: def.name,
                        expected: def.kind.type_name(),
                        found: value.type_name(),
                    });
                }
                self.segments[segment].set(field, Some(value))?;
                self.encoded.take();
                Ok(())
            }
            None => Err(self.unknown_field(name)),
        }
    }

    /// Removes the value of a field, so that it is reported missing if required.
    pub fn clear_field_value(&mut self, name: &str) -> Result<(), SectionError> {
        match self.locate(name) {
            Some(Location::Flag(segment)) => {
                let default = default_inclusion(self.segments[segment].def());
                self.set_field_value(name, default)
            }
            Some(Location::Field(segment, field)) => {
                let def = self.field_def(segment, field);
                if def.constant {
                    return Err(SectionError::ReadOnlyField {
                        section: self.def.name,
                        field: def.name,
                    });
                }
                self.segments[segment].set(field, None)?;
                self.encoded.take();
                Ok(())
            }
            None => Err(self.unknown_field(name)),
        }
    }

    /// Checks required fields, field validators and the rules of the section.
    pub fn validate(&self) -> Result<(), SectionError> {
        let mut errors = vec![];
        for segment in self.included_segments() {
            segment.validate_into(&mut errors)?;
        }
        if let Some(validator) = self.def.validator {
            errors.extend(validator(self));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SectionError::Validation {
                section: self.def.name,
                errors,
            })
        }
    }

    /// Encodes the section, refusing to if a required field has no value.
    pub fn encode(&self) -> Result<&str, SectionError> {
        self.encode_with(MissingFieldPolicy::Fail)
    }

    /// Encodes the section. The result is cached until a field changes.
    pub fn encode_with(&self, policy: MissingFieldPolicy) -> Result<&str, SectionError> {
        if policy == MissingFieldPolicy::Fail {
            self.check_required()?;
        }
        if let Some(s) = self.encoded.get() {
            return Ok(s);
        }

        let parts = self
            .included_segments()
            .map(|segment| segment.encode(policy))
            .collect::<Result<Vec<_>, _>>()?;
        let s = parts.join(".");
        debug!(section = self.def.name, segments = parts.len(), "encoded section");

        Ok(self.encoded.get_or_init(|| s))
    }

    pub(crate) fn check_required(&self) -> Result<(), SectionError> {
        let errors: Vec<ValidationError> = self
            .included_segments()
            .flat_map(Segment::missing_required)
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SectionError::Validation {
                section: self.def.name,
                errors,
            })
        }
    }

    fn included_segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments
            .iter()
            .zip(&self.included)
            .filter(|(_, included)| **included)
            .map(|(segment, _)| segment)
    }

    fn locate(&self, name: &str) -> Option<Location> {
        self.layout
            .segments()
            .enumerate()
            .find_map(|(i, segment)| {
                if segment.inclusion_flag() == Some(name) {
                    Some(Location::Flag(i))
                } else {
                    segment.field_index(name).map(|j| Location::Field(i, j))
                }
            })
    }

    fn field_def(&self, segment: usize, field: usize) -> &'static FieldDef {
        &self.segments[segment].def().fields[field]
    }

    fn layout_flag(&self, segment: usize) -> &'static str {
        self.segments[segment]
            .def()
            .inclusion_flag()
            .unwrap_or(self.def.name)
    }

    fn unknown_field(&self, name: &str) -> SectionError {
        SectionError::UnknownField {
            section: self.def.name,
            field: name.to_string(),
        }
    }
}

fn default_inclusion(segment: &SegmentDef) -> bool {
    match segment.presence {
        Presence::Required => true,
        Presence::Optional { default, .. } => default,
    }
}

/// Picks the layout whose core segment starts with the constant found in `core`.
fn select_layout(
    def: &'static SectionDef,
    core: &str,
) -> Result<&'static SectionLayout, SectionDecodeError> {
    let Some((bits, expected)) = def.layout.core.leading_constant() else {
        return Ok(&def.layout);
    };
    let field = def.layout.core.fields.first().map_or(def.name, |f| f.name);

    let found = match def.format {
        Format::Text => {
            let character = core
                .chars()
                .next()
                .ok_or(SectionDecodeError::UnexpectedEndOfString { section: def.name })?;
            character
                .to_digit(10)
                .map(u64::from)
                .ok_or(SectionDecodeError::InvalidCharacter {
                    section: def.name,
                    character,
                })?
        }
        Format::Base64Url => {
            let bits_str = decode_chunk(def, core)?;
            read_leading(&mut bits_str.reader(), bits).map_err(|source| {
                SectionDecodeError::Field {
                    section: def.name,
                    field,
                    source,
                }
            })?
        }
    };

    def.layouts()
        .find(|layout| {
            layout
                .core
                .leading_constant()
                .is_some_and(|(_, value)| value == found)
        })
        .ok_or(SectionDecodeError::UnexpectedFieldValue {
            section: def.name,
            field,
            expected,
            found,
        })
}

/// Finds which optional segment of `layout` the chunk holds, from its type prefix.
fn identify_optional_segment(
    def: &'static SectionDef,
    layout: &'static SectionLayout,
    chunk: &str,
) -> Result<(usize, u64), SectionDecodeError> {
    let bits = decode_chunk(def, chunk)?;
    let mut first_type = None;

    for (index, segment) in layout.optional.iter().enumerate() {
        let Some((width, segment_type)) = segment.leading_constant() else {
            continue;
        };
        let found = read_leading(&mut bits.reader(), width)
            .map_err(|_| SectionDecodeError::UnexpectedEndOfString { section: def.name })?;
        if found == segment_type {
            return Ok((index, segment_type));
        }
        first_type.get_or_insert(found);
    }

    Err(SectionDecodeError::UnknownSegmentType {
        section: def.name,
        segment_type: first_type.unwrap_or_default(),
    })
}

fn decode_chunk(def: &'static SectionDef, chunk: &str) -> Result<BitString, SectionDecodeError> {
    BitString::from_base64_url(chunk).map_err(|source| SectionDecodeError::Base64 {
        section: def.name,
        source,
    })
}

fn read_leading(r: &mut DataReader, bits: u32) -> Result<u64, crate::core::DecodingError> {
    r.read_fixed_integer(bits)
}

#[cfg(feature = "serde")]
impl Serialize for Section {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        for (segment, included) in self.segments.iter().zip(&self.included) {
            if let Some(flag) = segment.def().inclusion_flag() {
                map.serialize_entry(flag, included)?;
            }
            if !included {
                continue;
            }
            for field in segment.fields().map_err(S::Error::custom)? {
                map.serialize_entry(field.name(), &field.value())?;
            }
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sections::{FieldFailure, definition, usnat::US_NAT, uspv1::USP_V1};
    use test_case::test_case;

    #[test]
    fn new_section_uses_latest_layout() {
        let section = Section::new(&US_NAT);
        assert_eq!(section.version(), 2);
        assert_eq!(section.state(), CodecState::Dirty);
        assert_eq!(section.is_segment_included("gpc"), Some(true));
    }

    #[test]
    fn decode_is_lazy() {
        let section = Section::decode(&US_NAT, "BVVVVVVVVWA.YA").unwrap();
        assert_eq!(section.state(), CodecState::Undecoded);
        assert_eq!(section.version(), 1);

        assert_eq!(
            section.get_field_value("SaleOptOut").unwrap(),
            Some(&FieldValue::Int(1))
        );
        assert_eq!(
            section.get_field_value("Gpc").unwrap(),
            Some(&FieldValue::Bool(true))
        );
        assert_eq!(section.state(), CodecState::Clean);
        assert_eq!(section.encode().unwrap(), "BVVVVVVVVWA.YA");
    }

    #[test]
    fn missing_optional_segment_clears_flag() {
        let section = Section::decode(&US_NAT, "BVVVVVVVVWA").unwrap();
        assert_eq!(
            section.get_field_value("GpcSegmentIncluded").unwrap(),
            Some(&FieldValue::Bool(false))
        );
        assert_eq!(section.get_field_value("Gpc").unwrap(), None);
    }

    #[test]
    fn excluding_segment_changes_encoding() {
        let mut section = Section::decode(&US_NAT, "BVVVVVVVVWA.YA").unwrap();
        section.set_field_value("GpcSegmentIncluded", false).unwrap();
        assert_eq!(section.state(), CodecState::Dirty);
        assert_eq!(section.encode().unwrap(), "BVVVVVVVVWA");

        section.set_field_value("GpcSegmentIncluded", true).unwrap();
        section.set_field_value("Gpc", false).unwrap();
        assert_eq!(section.encode().unwrap(), "BVVVVVVVVWA.Q");
    }

    #[test_case("CVVVVVVVVWA.YA" => matches SectionDecodeError::Field { field: "MspaOptOutOptionMode", .. } ; "v2 prefix with v1 length")]
    #[test_case("gqgkgAAAAEA" => matches SectionDecodeError::UnexpectedFieldValue { field: "Version", found: 32, .. } ; "unknown version")]
    #[test_case("BVVVVVVVVWA.AA" => matches SectionDecodeError::UnknownSegmentType { segment_type: 0, .. } ; "unknown segment type")]
    #[test_case("BVVVVVVVVWA.YA.YA" => matches SectionDecodeError::DuplicateSegmentType { segment_type: 1, .. } ; "duplicate segment")]
    #[test_case("BVVVVVVVVWA.Y#" => matches SectionDecodeError::Base64 { .. } ; "invalid character in optional segment")]
    #[test_case("" => matches SectionDecodeError::Field { field: "Version", .. } ; "empty")]
    fn decode_error(s: &str) -> SectionDecodeError {
        let section = match Section::decode(&US_NAT, s) {
            Ok(section) => section,
            Err(e) => return e,
        };
        let core = section.segments().next().unwrap();
        core.fields().err().unwrap()
    }

    #[test]
    fn single_segment_section_rejects_extra_segments() {
        let def = definition(SectionId::UsVa).unwrap();
        let err = Section::decode(def, "BVVVVWY.YA").unwrap_err();
        assert!(matches!(
            err,
            SectionDecodeError::TooManySegments {
                found: 2,
                max: 1,
                ..
            }
        ));
    }

    #[test]
    fn unknown_field() {
        let mut section = Section::new(&US_NAT);
        assert!(matches!(
            section.get_field_value("Nope"),
            Err(SectionError::UnknownField { .. })
        ));
        assert!(matches!(
            section.set_field_value("Nope", 1u8),
            Err(SectionError::UnknownField { .. })
        ));
    }

    #[test]
    fn type_mismatch() {
        let mut section = Section::new(&US_NAT);
        let err = section.set_field_value("SaleOptOut", true).unwrap_err();
        assert!(matches!(
            err,
            SectionError::TypeMismatch {
                field: "SaleOptOut",
                expected: "integer",
                found: "boolean",
                ..
            }
        ));
    }

    #[test]
    fn constant_fields_are_read_only() {
        let mut section = Section::new(&US_NAT);
        let err = section.set_field_value("Version", 1u8).unwrap_err();
        assert!(matches!(err, SectionError::ReadOnlyField { field: "Version", .. }));
    }

    #[test]
    fn value_too_large_fails_at_encode() {
        let mut section = Section::new(&US_NAT);
        section.set_field_value("SaleOptOut", 4u8).unwrap();
        assert!(matches!(
            section.encode(),
            Err(SectionError::Encode {
                field: "SaleOptOut",
                ..
            })
        ));
    }

    #[test]
    fn validation_names_fields() {
        let mut section = Section::new(&US_NAT);
        section.set_field_value("SaleOptOut", 3u8).unwrap();
        let Err(SectionError::Validation { errors, .. }) = section.validate() else {
            panic!("expected validation errors");
        };
        assert!(errors.contains(&ValidationError::new(
            "usnat",
            "SaleOptOut",
            FieldFailure::Rejected("3".to_string())
        )));
    }

    #[test]
    fn text_section_round_trip() {
        let mut section = Section::decode(&USP_V1, "1YN-").unwrap();
        assert_eq!(
            section.get_field_value("OptOutSale").unwrap(),
            Some(&FieldValue::Str("N".to_string()))
        );
        section.set_field_value("OptOutSale", "Y").unwrap();
        assert_eq!(section.encode().unwrap(), "1YY-");
    }

    #[test]
    fn field_names_include_flags() {
        let section = Section::new(&US_NAT);
        let names: Vec<_> = section.field_names().collect();
        assert_eq!(names.first(), Some(&"Version"));
        assert!(names.contains(&"GpcSegmentIncluded"));
        assert_eq!(names.last(), Some(&"Gpc"));
    }

    #[test]
    fn section_is_send_and_sync() {
        fn assert_implements<T: Send + Sync>() {}
        assert_implements::<Section>();
    }
}
