use crate::core::{BitString, DataWriter, DecodingError, EncodingError};
use crate::sections::{
    Field, FieldDef, FieldFailure, FieldKind, FieldValue, SectionDecodeError, SectionError,
    ValidationError,
};
use std::sync::OnceLock;
use tracing::trace;

/// How the segments of a section are stored at rest.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    /// Bit fields packed into base64url, segments joined with `.`.
    Base64Url,
    /// One character per field, as used by the US Privacy string.
    Text,
}

/// What to do with a required field that has no value when encoding.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MissingFieldPolicy {
    /// Refuse to encode.
    #[default]
    Fail,
    /// Encode the zero value of the field kind.
    EncodeDefault,
}

/// Whether the decoded fields and the encoded string of a segment agree.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CodecState {
    /// Only the encoded string is known.
    Undecoded,
    /// Fields changed since the last encode.
    Dirty,
    /// Fields and encoded string are both known and agree.
    Clean,
}

#[derive(Clone, Copy, Debug)]
pub enum Presence {
    Required,
    /// The segment is written only when the section boolean field `flag` is true.
    Optional { flag: &'static str, default: bool },
}

#[derive(Debug)]
pub struct SegmentDef {
    pub name: &'static str,
    pub presence: Presence,
    pub fields: &'static [FieldDef],
}

impl SegmentDef {
    pub const fn required(name: &'static str, fields: &'static [FieldDef]) -> Self {
        Self {
            name,
            presence: Presence::Required,
            fields,
        }
    }

    pub const fn optional(
        name: &'static str,
        flag: &'static str,
        default: bool,
        fields: &'static [FieldDef],
    ) -> Self {
        Self {
            name,
            presence: Presence::Optional { flag, default },
            fields,
        }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn inclusion_flag(&self) -> Option<&'static str> {
        match self.presence {
            Presence::Required => None,
            Presence::Optional { flag, .. } => Some(flag),
        }
    }

    /// Width and value of the constant integer the segment starts with.
    ///
    /// This is the version of a core segment or the type of an optional segment.
    pub fn leading_constant(&self) -> Option<(u32, u64)> {
        let first = self.fields.first()?;
        match (first.kind, first.constant_value()) {
            (FieldKind::FixedInteger(bits), Some(value)) => Some((bits, value)),
            _ => None,
        }
    }
}

/// A segment of a section, decoded on first access.
#[derive(Clone, Debug)]
pub struct Segment {
    section: &'static str,
    def: &'static SegmentDef,
    format: Format,
    fields: OnceLock<Vec<Field>>,
    encoded: OnceLock<String>,
}

impl Segment {
    pub(crate) fn new(section: &'static str, def: &'static SegmentDef, format: Format) -> Self {
        Self {
            section,
            def,
            format,
            fields: OnceLock::from(def.fields.iter().map(Field::new).collect::<Vec<_>>()),
            encoded: OnceLock::new(),
        }
    }

    pub(crate) fn from_encoded(
        section: &'static str,
        def: &'static SegmentDef,
        format: Format,
        s: &str,
    ) -> Self {
        Self {
            section,
            def,
            format,
            fields: OnceLock::new(),
            encoded: OnceLock::from(s.to_string()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.def.name
    }

    pub fn def(&self) -> &'static SegmentDef {
        self.def
    }

    pub fn state(&self) -> CodecState {
        match (self.fields.get(), self.encoded.get()) {
            (None, _) => CodecState::Undecoded,
            (Some(_), None) => CodecState::Dirty,
            (Some(_), Some(_)) => CodecState::Clean,
        }
    }

    /// Fields of the segment, decoding them from the encoded string on first use.
    ///
    /// A failed decode leaves the segment undecoded.
    pub fn fields(&self) -> Result<&[Field], SectionDecodeError> {
        if let Some(fields) = self.fields.get() {
            return Ok(fields);
        }
        let decoded = self.decode()?;
        Ok(self.fields.get_or_init(|| decoded))
    }

    pub(crate) fn value(&self, index: usize) -> Result<Option<&FieldValue>, SectionDecodeError> {
        Ok(self.fields()?.get(index).and_then(Field::value))
    }

    pub(crate) fn set(
        &mut self,
        index: usize,
        value: Option<FieldValue>,
    ) -> Result<(), SectionDecodeError> {
        self.fields()?;
        if let Some(field) = self.fields.get_mut().and_then(|fields| fields.get_mut(index)) {
            field.set(value);
        }
        self.encoded.take();

        Ok(())
    }

    fn decode(&self) -> Result<Vec<Field>, SectionDecodeError> {
        let Some(s) = self.encoded.get() else {
            return Ok(self.def.fields.iter().map(Field::new).collect());
        };

        trace!(section = self.section, segment = self.def.name, "decoding segment");
        match self.format {
            Format::Base64Url => self.decode_bits(s),
            Format::Text => self.decode_text(s),
        }
    }

    fn decode_bits(&self, s: &str) -> Result<Vec<Field>, SectionDecodeError> {
        let bits = BitString::from_base64_url(s).map_err(|source| SectionDecodeError::Base64 {
            section: self.section,
            source,
        })?;
        let mut r = bits.reader();
        let mut fields: Vec<Field> = Vec::with_capacity(self.def.fields.len());
        let mut truncated = false;

        for def in self.def.fields {
            let value = if truncated && def.optional_tail {
                def.initial_value()
            } else {
                match def.kind.read(&mut r, &fields) {
                    Ok(value) => Some(value),
                    Err(DecodingError::UnexpectedEnd { .. }) if def.optional_tail => {
                        truncated = true;
                        def.initial_value()
                    }
                    Err(source) => {
                        return Err(SectionDecodeError::Field {
                            section: self.section,
                            field: def.name,
                            source,
                        });
                    }
                }
            };
            if let Some(value) = &value {
                self.check_constant(def, value)?;
            }
            fields.push(Field::with_value(def, value));
        }

        Ok(fields)
    }

    fn decode_text(&self, s: &str) -> Result<Vec<Field>, SectionDecodeError> {
        let mut chars = s.chars();
        let mut fields = Vec::with_capacity(self.def.fields.len());

        for def in self.def.fields {
            let character = chars
                .next()
                .ok_or(SectionDecodeError::UnexpectedEndOfString {
                    section: self.section,
                })?;
            let value = match def.kind {
                FieldKind::FixedInteger(_) => {
                    character.to_digit(10).map(|d| FieldValue::Int(d.into()))
                }
                _ => Some(FieldValue::Str(character.to_string())),
            }
            .filter(|v| def.validator.is_none_or(|accepts| accepts(v)))
            .ok_or(SectionDecodeError::InvalidCharacter {
                section: self.section,
                character,
            })?;

            self.check_constant(def, &value)?;
            fields.push(Field::with_value(def, Some(value)));
        }

        match chars.next() {
            Some(character) => Err(SectionDecodeError::InvalidCharacter {
                section: self.section,
                character,
            }),
            None => Ok(fields),
        }
    }

    fn check_constant(&self, def: &FieldDef, value: &FieldValue) -> Result<(), SectionDecodeError> {
        match (def.constant_value(), value.as_int()) {
            (Some(expected), Some(found)) if expected != found => {
                Err(SectionDecodeError::UnexpectedFieldValue {
                    section: self.section,
                    field: def.name,
                    expected,
                    found,
                })
            }
            _ => Ok(()),
        }
    }

    /// Required fields without a value. Undecoded segments came from a complete string.
    pub(crate) fn missing_required(&self) -> Vec<ValidationError> {
        self.fields
            .get()
            .map(|fields| {
                fields
                    .iter()
                    .filter(|f| f.def().required && !f.has_value())
                    .map(|f| ValidationError::new(self.section, f.name(), FieldFailure::Missing))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn validate_into(
        &self,
        errors: &mut Vec<ValidationError>,
    ) -> Result<(), SectionDecodeError> {
        for field in self.fields()? {
            if let Err(failure) = field.def().check(field.value()) {
                errors.push(ValidationError::new(self.section, field.name(), failure));
            }
        }

        Ok(())
    }

    /// Encoded segment, computed once and cached until a field changes.
    pub fn encode(&self, policy: MissingFieldPolicy) -> Result<&str, SectionError> {
        if policy == MissingFieldPolicy::Fail {
            let errors = self.missing_required();
            if !errors.is_empty() {
                return Err(SectionError::Validation {
                    section: self.section,
                    errors,
                });
            }
        }
        if let Some(s) = self.encoded.get() {
            return Ok(s);
        }

        let fields = self.fields()?;
        let s = match self.format {
            Format::Base64Url => self.encode_bits(fields)?,
            Format::Text => self.encode_text(fields)?,
        };
        trace!(section = self.section, segment = self.def.name, encoded = %s, "encoded segment");

        Ok(self.encoded.get_or_init(|| s))
    }

    fn encode_bits(&self, fields: &[Field]) -> Result<String, SectionError> {
        let mut w = DataWriter::new();

        for (i, field) in fields.iter().enumerate() {
            let zero;
            let value = match field.value() {
                Some(value) => value,
                None => {
                    zero = field.def().kind.zero_value();
                    &zero
                }
            };
            field
                .def()
                .kind
                .write(&mut w, value, &fields[..i])
                .map_err(|source| self.encode_error(field.name(), source))?;
        }

        let bits = w
            .finish()
            .map_err(|source| self.encode_error(self.def.name, source))?;
        Ok(bits.to_base64_url())
    }

    fn encode_text(&self, fields: &[Field]) -> Result<String, SectionError> {
        let mut s = String::with_capacity(fields.len());

        for field in fields {
            let value = field
                .value()
                .cloned()
                .unwrap_or_else(|| field.def().kind.zero_value());
            let character = match &value {
                FieldValue::Int(n) => u32::try_from(*n)
                    .ok()
                    .and_then(|n| char::from_digit(n, 10))
                    .ok_or(EncodingError::TooManyElements {
                        count: n.to_string().len(),
                        max: 1,
                    }),
                FieldValue::Str(text) => {
                    let accepted = field.def().validator.is_none_or(|accepts| accepts(&value));
                    match (text.chars().next(), text.chars().nth(1)) {
                        (Some(c), None) if accepted => Ok(c),
                        (Some(c), None) => Err(EncodingError::InvalidCharacter(c)),
                        _ => Err(EncodingError::TooManyElements {
                            count: text.chars().count(),
                            max: 1,
                        }),
                    }
                }
                other => Err(EncodingError::UnexpectedValue {
                    expected: "character",
                    found: other.type_name(),
                }),
            }
            .map_err(|source| self.encode_error(field.name(), source))?;
            s.push(character);
        }

        Ok(s)
    }

    fn encode_error(&self, field: &'static str, source: EncodingError) -> SectionError {
        SectionError::Encode {
            section: self.section,
            field,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn flag(v: &FieldValue) -> bool {
        matches!(v.as_str(), Some("Y" | "N" | "-"))
    }

    const TEXT_FIELDS: &[FieldDef] = &[
        FieldDef::integer("Version", 6).constant(1),
        FieldDef::string("Notice", 1).validated(flag),
        FieldDef::string("OptOut", 1).validated(flag),
    ];
    static TEXT: SegmentDef = SegmentDef::required("core", TEXT_FIELDS);

    const BITS_FIELDS: &[FieldDef] = &[
        FieldDef::integer("Version", 6).constant(1),
        FieldDef::boolean("Flag"),
        FieldDef::integer("Id", 12).required(),
        FieldDef::integer("Extra", 6).optional_tail(),
    ];
    static BITS: SegmentDef = SegmentDef::required("core", BITS_FIELDS);

    #[test]
    fn new_segment_is_dirty() {
        let segment = Segment::new("test", &BITS, Format::Base64Url);
        assert_eq!(segment.state(), CodecState::Dirty);
    }

    #[test]
    fn decoding_is_lazy_and_cached() {
        let segment = Segment::from_encoded("test", &BITS, Format::Base64Url, "BgBAA");
        assert_eq!(segment.state(), CodecState::Undecoded);

        assert_eq!(segment.value(2).unwrap(), Some(&FieldValue::Int(2)));
        assert_eq!(segment.state(), CodecState::Clean);
        assert_eq!(segment.encode(MissingFieldPolicy::Fail).unwrap(), "BgBAA");
    }

    #[test]
    fn set_invalidates_cache() {
        let mut segment = Segment::from_encoded("test", &BITS, Format::Base64Url, "BgBAA");
        segment.set(2, Some(FieldValue::Int(3))).unwrap();
        assert_eq!(segment.state(), CodecState::Dirty);

        let first = segment.encode(MissingFieldPolicy::Fail).unwrap().to_string();
        assert_eq!(first, "BgBgA");
        assert_eq!(segment.encode(MissingFieldPolicy::Fail).unwrap(), first);
        assert_eq!(segment.state(), CodecState::Clean);
    }

    #[test]
    fn missing_trailing_field_takes_default() {
        // Version, Flag and Id only
        let segment = Segment::from_encoded("test", &BITS, Format::Base64Url, "BgBA");
        assert_eq!(segment.value(3).unwrap(), Some(&FieldValue::Int(0)));
    }

    #[test]
    fn wrong_constant_is_an_error() {
        let segment = Segment::from_encoded("test", &BITS, Format::Base64Url, "CgBAA");
        let err = segment.fields().unwrap_err();
        assert!(matches!(
            err,
            SectionDecodeError::UnexpectedFieldValue {
                field: "Version",
                expected: 1,
                found: 2,
                ..
            }
        ));
        assert_eq!(segment.state(), CodecState::Undecoded);
    }

    #[test]
    fn truncated_required_field_is_an_error() {
        let segment = Segment::from_encoded("test", &BITS, Format::Base64Url, "Bg");
        let err = segment.fields().unwrap_err();
        assert!(matches!(
            err,
            SectionDecodeError::Field {
                field: "Id",
                source: DecodingError::UnexpectedEnd { .. },
                ..
            }
        ));
    }

    #[test]
    fn strict_encode_requires_values() {
        let segment = Segment::new("test", &BITS, Format::Base64Url);
        let err = segment.encode(MissingFieldPolicy::Fail).unwrap_err();
        assert!(matches!(
            err,
            SectionError::Validation { ref errors, .. }
                if errors == &[ValidationError::new("test", "Id", FieldFailure::Missing)]
        ));
        assert_eq!(
            segment.encode(MissingFieldPolicy::EncodeDefault).unwrap(),
            "BAAAA"
        );
    }

    #[test_case("1YN" => vec![FieldValue::Int(1), "Y".into(), "N".into()] ; "valid")]
    #[test_case("1--" => vec![FieldValue::Int(1), "-".into(), "-".into()] ; "not applicable")]
    fn decode_text(s: &str) -> Vec<FieldValue> {
        Segment::from_encoded("test", &TEXT, Format::Text, s)
            .fields()
            .unwrap()
            .iter()
            .filter_map(Field::value)
            .cloned()
            .collect()
    }

    #[test_case("1Y" => matches SectionDecodeError::UnexpectedEndOfString { .. } ; "too short")]
    #[test_case("1YNN" => matches SectionDecodeError::InvalidCharacter { character: 'N', .. } ; "too long")]
    #[test_case("1YX" => matches SectionDecodeError::InvalidCharacter { character: 'X', .. } ; "invalid flag")]
    #[test_case("2YN" => matches SectionDecodeError::UnexpectedFieldValue { expected: 1, found: 2, .. } ; "wrong version")]
    #[test_case("AYN" => matches SectionDecodeError::InvalidCharacter { character: 'A', .. } ; "version not a digit")]
    fn decode_text_error(s: &str) -> SectionDecodeError {
        Segment::from_encoded("test", &TEXT, Format::Text, s)
            .fields()
            .unwrap_err()
    }

    #[test]
    fn encode_text_rejects_invalid_flag() {
        let mut segment = Segment::new("test", &TEXT, Format::Text);
        segment.set(1, Some("Y".into())).unwrap();
        segment.set(2, Some("X".into())).unwrap();
        let err = segment.encode(MissingFieldPolicy::Fail).unwrap_err();
        assert!(matches!(
            err,
            SectionError::Encode {
                field: "OptOut",
                source: EncodingError::InvalidCharacter('X'),
                ..
            }
        ));
    }
}
