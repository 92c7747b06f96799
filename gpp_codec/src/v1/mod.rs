//! Version 1 of the IAB Global Privacy Platform string.
//!
//! A GPP string contains a header which lists the sections which are present
//! in the next parts.
//!
//! A typical GPP string will look like this:
//!
//! ```text
//! DBACNY~CPXxRfAPXxRfAAfKABENB-CgAAAAAAAAAAYgAAAAAAAA~1YNN
//! ```
//!
//! It contains a header (`DBACNY`) and two sections separated by a `~` character.
//!
//! GPP string sections are usually encoded in a variation of URL-safe Base64.
//!
//! It is not mandatory though, and certain sections, such as the deprecated USP v1 are using
//! a simpler character set.
//! In the example above, the first section is a base64 encoded TCF EU v2.2 section.
//! The second section is a USP v1 section where `Y` and `N` characters simply mean yes and no
//! respectively.
//!
//! # Examples
//!
//! You can use the [`GPPString::parse_str`] method to try to parse a consent string:
//!
//! ```
//! use gpp_codec::v1::GPPString;
//! use gpp_codec::v1::GPPDecodeError;
//!
//! fn main() -> Result<(), GPPDecodeError> {
//!     let s = GPPString::parse_str("DBABT~1YNN")?;
//!     Ok(())
//! }
//! ```
//!
//! Since [`GPPString`] implements the [`FromStr`] trait, you can also use [`str::parse`]:
//!
//! ```
//! use gpp_codec::v1::GPPString;
//! use gpp_codec::v1::GPPDecodeError;
//!
//! fn main() -> Result<(), GPPDecodeError> {
//!     let s: GPPString = "DBABT~1YNN".parse()?;
//!     Ok(())
//! }
//! ```
//!
//! If parsing fails, a [`GPPDecodeError`] is returned instead.
//!
//! A string can also be built from scratch, one field at a time:
//!
//! ```
//! use gpp_codec::v1::{GPPError, GPPString};
//!
//! fn main() -> Result<(), GPPError> {
//!     let mut gpp = GPPString::new();
//!     gpp.set_field_value("uspv1", "Notice", "Y")?;
//!     gpp.set_field_value("uspv1", "OptOutSale", "N")?;
//!
//!     assert_eq!(gpp.encode()?, "DBABT~1YN-");
//!     Ok(())
//! }
//! ```
//!
use crate::sections::header::{GPP_VERSION, HEADER, HEADER_TYPE};
use crate::sections::{
    FieldValue, IdSet, MissingFieldPolicy, Section, SectionDecodeError, SectionError, SectionId,
    ValidationError, definition, definition_by_name,
};
use num_traits::FromPrimitive;
#[cfg(feature = "serde")]
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, trace};

/// The error type for GPP String decoding operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GPPDecodeError {
    /// The string does not contain the mandatory header section.
    #[error("no header found")]
    NoHeaderFound,
    /// The header has an invalid type for this version of GPP.
    #[error("invalid header type (expected {HEADER_TYPE}, found {found})")]
    InvalidHeaderType { found: u64 },
    /// The header has an invalid GPP version.
    ///
    /// Note that there is currently only V1 of the standard.
    /// If new versions are released, they will be implemented in other modules.
    #[error("invalid GPP version (expected {GPP_VERSION}, found {found})")]
    InvalidGPPVersion { found: u64 },
    /// The header could not be read, usually because it is truncated.
    #[error("unable to decode header")]
    Header(#[source] SectionDecodeError),
    /// A section with an unknown or unsupported identifier is listed in the string header.
    #[error("unsupported section id {0}")]
    UnsupportedSectionId(u16),
    /// The number of sections listed in the header does not match the number of actual sections
    /// present in the string.
    #[error("ids do not match sections (number of ids {ids}, number of sections {sections})")]
    IdSectionMismatch { ids: usize, sections: usize },
    /// The structure of a section string is invalid.
    #[error("unable to decode section {id}")]
    Section {
        id: SectionId,
        #[source]
        source: SectionDecodeError,
    },
}

/// The error type for operations on a [`GPPString`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GPPError {
    #[error("unknown section {0}")]
    UnknownSection(String),
    /// Only the sections of the registry can be part of the body of a GPP string.
    #[error("section {0} cannot be added to a GPP string")]
    UnsupportedSection(&'static str),
    #[error(transparent)]
    Section(#[from] SectionError),
    #[error("GPP string failed validation ({} errors)", .errors.len())]
    Validation { errors: Vec<ValidationError> },
}

/// The representation of a GPP consent string.
///
/// Sections are kept by ascending id, which is the order they are encoded in. A parsed string
/// keeps each section string as it was received until one of its fields is changed, so that
/// encoding an untouched string returns the original sections.
#[derive(Clone, Debug, Default)]
pub struct GPPString {
    sections: BTreeMap<SectionId, Section>,
    applicable: BTreeSet<SectionId>,
    encoded: OnceLock<String>,
}

impl GPPString {
    /// Creates an empty GPP string, which encodes to a header alone.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a string and returns a [`GPPString`] if successful.
    ///
    /// # Errors
    ///
    /// Returns a [`GPPDecodeError`] if unable to parse the string.
    ///
    /// # Example
    ///
    /// ```
    /// use gpp_codec::v1::GPPString;
    ///
    /// let r = GPPString::parse_str("DBABT~1YNN");
    ///
    /// assert!(matches!(r, Ok(gpp_str)));
    /// ```
    ///
    pub fn parse_str(s: &str) -> Result<Self, GPPDecodeError> {
        s.parse()
    }

    /// Returns an iterator that yields the ids of the sections of this GPP string, in ascending
    /// order.
    ///
    /// # Example
    ///
    /// ```
    /// use gpp_codec::sections::SectionId;
    /// use gpp_codec::v1::GPPString;
    /// use gpp_codec::v1::GPPDecodeError;
    ///
    /// fn main() -> Result<(), GPPDecodeError> {
    ///     let gpp_str = GPPString::parse_str("DBABT~1YNN")?;
    ///     let mut it = gpp_str.section_ids();
    ///
    ///     assert_eq!(it.next(), Some(SectionId::UspV1));
    ///     assert_eq!(it.next(), None);
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn section_ids(&self) -> impl ExactSizeIterator<Item = SectionId> + '_ {
        self.sections.keys().copied()
    }

    /// Returns an iterator over the sections of this GPP string, in ascending id order.
    pub fn sections(&self) -> impl ExactSizeIterator<Item = &Section> {
        self.sections.values()
    }

    pub fn has_section(&self, id: SectionId) -> bool {
        self.sections.contains_key(&id)
    }

    /// Returns a section of this GPP string.
    ///
    /// If the given section is not present within the GPP string, the method returns [`None`].
    ///
    /// # Example
    ///
    /// ```
    /// use gpp_codec::sections::{FieldValue, SectionId};
    /// use gpp_codec::v1::GPPString;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let gpp_str = GPPString::parse_str("DBABT~1YNN")?;
    /// let usp = gpp_str.section(SectionId::UspV1).ok_or("missing section")?;
    ///
    /// assert_eq!(usp.get_field_value("Notice")?, Some(&FieldValue::from("Y")));
    /// # Ok(())
    /// # }
    /// ```
    pub fn section(&self, id: SectionId) -> Option<&Section> {
        self.sections.get(&id)
    }

    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        definition_by_name(name).and_then(|def| self.section(def.id))
    }

    /// Returns a section for modification. The encoded string is invalidated.
    pub fn section_mut(&mut self, id: SectionId) -> Option<&mut Section> {
        let section = self.sections.get_mut(&id)?;
        self.encoded.take();
        Some(section)
    }

    /// Adds a section, replacing and returning the section with the same id if there was one.
    ///
    /// # Errors
    ///
    /// Returns [`GPPError::UnsupportedSection`] for a section that is not in the registry,
    /// such as the header.
    pub fn add_section(&mut self, section: Section) -> Result<Option<Section>, GPPError> {
        let id = section.id();
        if definition(id).is_none() {
            return Err(GPPError::UnsupportedSection(section.name()));
        }
        self.encoded.take();
        self.applicable.insert(id);
        Ok(self.sections.insert(id, section))
    }

    pub fn remove_section(&mut self, id: SectionId) -> Option<Section> {
        let section = self.sections.remove(&id)?;
        self.applicable.remove(&id);
        self.encoded.take();
        Some(section)
    }

    /// Returns the value of a field of a named section.
    ///
    /// A section missing from this string has no values.
    ///
    /// # Errors
    ///
    /// Fails if the section name is unknown, the field does not exist in the section or the
    /// section string cannot be decoded.
    pub fn get_field_value(
        &self,
        section: &str,
        field: &str,
    ) -> Result<Option<&FieldValue>, GPPError> {
        let def =
            definition_by_name(section).ok_or_else(|| GPPError::UnknownSection(section.into()))?;
        match self.sections.get(&def.id) {
            Some(section) => Ok(section.get_field_value(field)?),
            None => Ok(None),
        }
    }

    /// Sets a field of a named section, creating the section if it is not present yet.
    ///
    /// # Errors
    ///
    /// Fails if the section name is unknown, or if the section rejects the value.
    pub fn set_field_value(
        &mut self,
        section: &str,
        field: &str,
        value: impl Into<FieldValue>,
    ) -> Result<(), GPPError> {
        let def =
            definition_by_name(section).ok_or_else(|| GPPError::UnknownSection(section.into()))?;
        let section = self.sections.entry(def.id).or_insert_with(|| {
            debug!(section = def.name, "adding section");
            self.applicable.insert(def.id);
            Section::new(def)
        });
        section.set_field_value(field, value)?;
        self.encoded.take();
        Ok(())
    }

    /// Ids of the sections that apply to the current user.
    ///
    /// This is not part of the encoded string. Parsed strings start with all their sections
    /// applicable.
    pub fn applicable_sections(&self) -> impl Iterator<Item = SectionId> + '_ {
        self.applicable.iter().copied()
    }

    /// Replaces the applicable sections. Ids of sections that are not present are ignored.
    pub fn set_applicable_sections(&mut self, ids: impl IntoIterator<Item = SectionId>) {
        self.applicable = ids
            .into_iter()
            .filter(|id| self.sections.contains_key(id))
            .collect();
    }

    /// Checks every section, and reports all the fields that failed validation.
    pub fn validate(&self) -> Result<(), GPPError> {
        let mut errors = vec![];
        for section in self.sections.values() {
            match section.validate() {
                Ok(()) => {}
                Err(SectionError::Validation { errors: e, .. }) => errors.extend(e),
                Err(e) => return Err(e.into()),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(GPPError::Validation { errors })
        }
    }

    /// Encodes the string, refusing to if a required field has no value.
    pub fn encode(&self) -> Result<&str, GPPError> {
        self.encode_with(MissingFieldPolicy::Fail)
    }

    /// Encodes the header followed by every section. The result is cached until a field
    /// changes.
    pub fn encode_with(&self, policy: MissingFieldPolicy) -> Result<&str, GPPError> {
        if policy == MissingFieldPolicy::Fail {
            self.sections
                .values()
                .try_for_each(Section::check_required)?;
        }
        if let Some(s) = self.encoded.get() {
            return Ok(s);
        }

        let mut header = Section::new(&HEADER);
        let ids: IdSet = self.sections.keys().map(|&id| id as u16).collect();
        header.set_field_value("SectionIds", ids)?;

        let mut parts = vec![header.encode_with(policy)?.to_string()];
        for section in self.sections.values() {
            parts.push(section.encode_with(policy)?.to_string());
        }
        debug!(sections = self.sections.len(), "encoded gpp string");

        Ok(self.encoded.get_or_init(|| parts.join("~")))
    }
}

impl FromStr for GPPString {
    type Err = GPPDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chunks = s.split('~');
        let header_str = chunks
            .next()
            .filter(|h| !h.is_empty())
            .ok_or(GPPDecodeError::NoHeaderFound)?;
        let ids = decode_header(header_str)?;

        let chunks = chunks.collect::<Vec<_>>();
        if chunks.len() != ids.len() {
            return Err(GPPDecodeError::IdSectionMismatch {
                ids: ids.len(),
                sections: chunks.len(),
            });
        }

        let sections = ids
            .into_iter()
            .zip(chunks)
            .map(|(id, chunk)| {
                trace!(section = %id, chunk, "decoding section");
                let def = definition(id).ok_or(GPPDecodeError::UnsupportedSectionId(id as u16))?;
                let section = Section::decode(def, chunk)
                    .map_err(|source| GPPDecodeError::Section { id, source })?;
                Ok((id, section))
            })
            .collect::<Result<BTreeMap<_, _>, GPPDecodeError>>()?;

        Ok(Self {
            applicable: sections.keys().copied().collect(),
            sections,
            encoded: OnceLock::from(s.to_string()),
        })
    }
}

/// Decodes the header and returns the ids of the sections it lists, in ascending order.
fn decode_header(s: &str) -> Result<Vec<SectionId>, GPPDecodeError> {
    let header = Section::decode(&HEADER, s).map_err(header_error)?;
    let ids = header
        .decoded_value("SectionIds")
        .map_err(header_error)?
        .and_then(FieldValue::as_id_set)
        .cloned()
        .unwrap_or_default();
    debug!(?ids, "decoded gpp header");

    ids.into_iter()
        .map(|id| {
            SectionId::from_u16(id)
                .filter(|&id| definition(id).is_some())
                .ok_or(GPPDecodeError::UnsupportedSectionId(id))
        })
        .collect()
}

fn header_error(e: SectionDecodeError) -> GPPDecodeError {
    match e {
        SectionDecodeError::UnexpectedFieldValue {
            field: "Id", found, ..
        } => GPPDecodeError::InvalidHeaderType { found },
        SectionDecodeError::UnexpectedFieldValue {
            field: "Version",
            found,
            ..
        } => GPPDecodeError::InvalidGPPVersion { found },
        e => GPPDecodeError::Header(e),
    }
}

#[cfg(feature = "serde")]
impl Serialize for GPPString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.sections.len()))?;
        for section in self.sections.values() {
            map.serialize_entry(section.name(), section)?;
        }
        map.end()
    }
}
