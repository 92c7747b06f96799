//! Section definitions and the engine that encodes and decodes them.
//!
//! Every section type is a static [`SectionDef`]: an ordered list of segments, each an ordered
//! list of fields. A single engine ([`Section`], [`Segment`], [`Field`]) handles all of them,
//! so adding a section means adding one module with its tables and one entry in the registry.
//!
//! Decoding is lazy: a section checks the structure of its string (segment split, version,
//! optional segment types) when it is created, and decodes the fields of a segment the first
//! time one of them is read. Encoded strings are cached until a field changes.
//!
//! Sections whose format gained incompatible versions (such as US National v1 and v2) keep all
//! their layouts, and the version prefix selects the layout at decode time.
use fnv::FnvHashMap;
use num_derive::{FromPrimitive, ToPrimitive};
use std::iter;
use std::sync::OnceLock;
use strum_macros::Display;
use thiserror::Error;

pub use crate::core::{BitString, DecodingError, EncodingError, IdSet, RangeEntry};
pub use field::{
    DefaultValue, Field, FieldDef, FieldFailure, FieldKind, FieldValue, LengthFn, Validator,
    int_value,
};
pub use section::Section;
pub use segment::{CodecState, Format, MissingFieldPolicy, Presence, Segment, SegmentDef};

mod field;
pub mod header;
mod section;
mod segment;
pub mod tcfcav1;
pub mod tcfeuv1;
pub mod tcfeuv2;
pub mod us_common;
pub mod usca;
pub mod usco;
pub mod usct;
pub mod usde;
pub mod usfl;
pub mod usia;
pub mod usmt;
pub mod usnat;
pub mod usne;
pub mod usnh;
pub mod usnj;
pub mod usor;
pub mod uspv1;
pub mod ustn;
pub mod ustx;
pub mod usut;
pub mod usva;

#[derive(
    Clone,
    Copy,
    Debug,
    Display,
    Eq,
    PartialEq,
    Hash,
    Ord,
    PartialOrd,
    FromPrimitive,
    ToPrimitive,
)]
#[non_exhaustive]
pub enum SectionId {
    TcfEuV1 = 1,
    TcfEuV2 = 2,
    GppHeader = 3,
    TcfCaV1 = 5,
    UspV1 = 6,
    UsNat = 7,
    UsCa = 8,
    UsVa = 9,
    UsCo = 10,
    UsUt = 11,
    UsCt = 12,
    UsFl = 13,
    UsMt = 14,
    UsOr = 15,
    UsTx = 16,
    UsDe = 17,
    UsIa = 18,
    UsNe = 19,
    UsNh = 20,
    UsNj = 21,
    UsTn = 22,
}

/// Cross-field checks run by [`Section::validate`].
pub type SectionValidator = fn(&Section) -> Vec<ValidationError>;

/// Segments of one version of a section.
#[derive(Debug)]
pub struct SectionLayout {
    pub version: u8,
    pub core: SegmentDef,
    pub optional: &'static [SegmentDef],
}

impl SectionLayout {
    /// Core segment first, then the optional segments in encoding order.
    pub fn segments(&'static self) -> impl Iterator<Item = &'static SegmentDef> {
        iter::once(&self.core).chain(self.optional)
    }
}

/// Static description of a section type.
#[derive(Debug)]
pub struct SectionDef {
    pub id: SectionId,
    pub name: &'static str,
    pub format: Format,
    /// Layout used for new sections.
    pub layout: SectionLayout,
    /// Older layouts still accepted when decoding.
    pub legacy_layouts: &'static [SectionLayout],
    pub validator: Option<SectionValidator>,
}

impl SectionDef {
    pub fn layouts(&'static self) -> impl Iterator<Item = &'static SectionLayout> {
        iter::once(&self.layout).chain(self.legacy_layouts)
    }
}

static SECTIONS: &[&SectionDef] = &[
    &tcfeuv1::TCF_EU_V1,
    &tcfeuv2::TCF_EU_V2,
    &tcfcav1::TCF_CA_V1,
    &uspv1::USP_V1,
    &usnat::US_NAT,
    &usca::US_CA,
    &usva::US_VA,
    &usco::US_CO,
    &usut::US_UT,
    &usct::US_CT,
    &usfl::US_FL,
    &usmt::US_MT,
    &usor::US_OR,
    &ustx::US_TX,
    &usde::US_DE,
    &usia::US_IA,
    &usne::US_NE,
    &usnh::US_NH,
    &usnj::US_NJ,
    &ustn::US_TN,
];

struct Registry {
    by_id: FnvHashMap<SectionId, &'static SectionDef>,
    by_name: FnvHashMap<&'static str, &'static SectionDef>,
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Registry {
        by_id: SECTIONS.iter().map(|def| (def.id, *def)).collect(),
        by_name: SECTIONS.iter().map(|def| (def.name, *def)).collect(),
    })
}

/// All section types that can appear in the body of a GPP string, by ascending id.
pub fn definitions() -> impl Iterator<Item = &'static SectionDef> {
    SECTIONS.iter().copied()
}

pub fn definition(id: SectionId) -> Option<&'static SectionDef> {
    registry().by_id.get(&id).copied()
}

pub fn definition_by_name(name: &str) -> Option<&'static SectionDef> {
    registry().by_name.get(name).copied()
}

/// The error type for structural failures while decoding a section string.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SectionDecodeError {
    #[error("invalid base64url data in section {section}")]
    Base64 {
        section: &'static str,
        source: DecodingError,
    },
    #[error("unable to decode field {field} of section {section}")]
    Field {
        section: &'static str,
        field: &'static str,
        source: DecodingError,
    },
    #[error("unexpected {field} in section {section} (expected {expected}, found {found})")]
    UnexpectedFieldValue {
        section: &'static str,
        field: &'static str,
        expected: u64,
        found: u64,
    },
    #[error("unknown segment type {segment_type} in section {section}")]
    UnknownSegmentType {
        section: &'static str,
        segment_type: u64,
    },
    #[error("duplicate segment type {segment_type} in section {section}")]
    DuplicateSegmentType {
        section: &'static str,
        segment_type: u64,
    },
    #[error("section {section} has {found} segments, at most {max} expected")]
    TooManySegments {
        section: &'static str,
        found: usize,
        max: usize,
    },
    #[error("unexpected end of string in section {section}")]
    UnexpectedEndOfString { section: &'static str },
    #[error("invalid character {character:?} in section {section}")]
    InvalidCharacter {
        section: &'static str,
        character: char,
    },
}

/// A field that failed validation.
#[derive(Error, Clone, Debug, Eq, PartialEq)]
#[error("{section}.{field}: {failure}")]
pub struct ValidationError {
    pub section: &'static str,
    pub field: &'static str,
    pub failure: FieldFailure,
}

impl ValidationError {
    pub fn new(section: &'static str, field: &'static str, failure: FieldFailure) -> Self {
        Self {
            section,
            field,
            failure,
        }
    }
}

/// The error type for operations on a [`Section`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SectionError {
    #[error("unknown field {field} in section {section}")]
    UnknownField { section: &'static str, field: String },
    #[error("field {field} of section {section} expects a {expected} value, got {found}")]
    TypeMismatch {
        section: &'static str,
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    #[error("field {field} of section {section} cannot be changed")]
    ReadOnlyField {
        section: &'static str,
        field: &'static str,
    },
    #[error(transparent)]
    Decode(#[from] SectionDecodeError),
    #[error("unable to encode {field} in section {section}")]
    Encode {
        section: &'static str,
        field: &'static str,
        source: EncodingError,
    },
    #[error("section {section} failed validation: {}", join_errors(.errors))]
    Validation {
        section: &'static str,
        errors: Vec<ValidationError>,
    },
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
