//! TCF EU v2 section.
// See https://github.com/InteractiveAdvertisingBureau/GDPR-Transparency-and-Consent-Framework/blob/master/TCFv2/IAB%20Tech%20Lab%20-%20Consent%20string%20and%20vendor%20list%20formats%20v2.md
use crate::sections::{
    DefaultValue, Field, FieldDef, FieldValue, Format, IdSet, RangeEntry, SectionDef, SectionId,
    SectionLayout, SegmentDef, int_value,
};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
#[cfg(feature = "serde")]
use serde::Serialize;

#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum RestrictionType {
    NotAllowed = 0,
    RequireConsent = 1,
    RequireLegitimateInterest = 2,
    Undefined = 3,
}

/// A publisher restriction, as stored in the `PublisherRestrictions` field.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PublisherRestriction {
    pub purpose_id: u8,
    pub restriction_type: RestrictionType,
    pub restricted_vendor_ids: IdSet,
}

impl From<RangeEntry> for PublisherRestriction {
    fn from(r: RangeEntry) -> Self {
        Self {
            purpose_id: r.key,
            restriction_type: RestrictionType::from_u8(r.range_type)
                .unwrap_or(RestrictionType::Undefined),
            restricted_vendor_ids: r.ids,
        }
    }
}

impl From<PublisherRestriction> for RangeEntry {
    fn from(r: PublisherRestriction) -> Self {
        Self {
            key: r.purpose_id,
            range_type: r.restriction_type as u8,
            ids: r.restricted_vendor_ids,
        }
    }
}

/// Reads the restrictions out of a `PublisherRestrictions` value.
pub fn publisher_restrictions(value: &FieldValue) -> Vec<PublisherRestriction> {
    value
        .as_ranges()
        .map(|ranges| ranges.iter().cloned().map(PublisherRestriction::from).collect())
        .unwrap_or_default()
}

pub(crate) fn is_language_code(value: &FieldValue) -> bool {
    value
        .as_str()
        .is_some_and(|s| s.len() == 2 && s.bytes().all(|b| b.is_ascii_uppercase()))
}

pub(crate) fn num_custom_purposes(fields: &[Field]) -> usize {
    int_value(fields, "NumCustomPurposes").unwrap_or_default() as usize
}

const CORE: &[FieldDef] = &[
    FieldDef::integer("Version", 6).constant(2),
    FieldDef::datetime("Created"),
    FieldDef::datetime("LastUpdated"),
    FieldDef::integer("CmpId", 12).required(),
    FieldDef::integer("CmpVersion", 12).required(),
    FieldDef::integer("ConsentScreen", 6),
    FieldDef::string("ConsentLanguage", 2)
        .default_value(DefaultValue::Str("EN"))
        .validated(is_language_code),
    FieldDef::integer("VendorListVersion", 12).required(),
    FieldDef::integer("PolicyVersion", 6).default_value(DefaultValue::Int(4)),
    FieldDef::boolean("IsServiceSpecific"),
    FieldDef::boolean("UseNonStandardStacks"),
    FieldDef::bitfield("SpecialFeatureOptins", 12),
    FieldDef::bitfield("PurposeConsents", 24),
    FieldDef::bitfield("PurposeLegitimateInterests", 24),
    FieldDef::boolean("PurposeOneTreatment"),
    FieldDef::string("PublisherCountryCode", 2)
        .default_value(DefaultValue::Str("AA"))
        .validated(is_language_code),
    FieldDef::optimized_range("VendorConsents"),
    FieldDef::optimized_range("VendorLegitimateInterests"),
    FieldDef::array_of_ranges("PublisherRestrictions", 6, 2),
];

const VENDORS_DISCLOSED: &[FieldDef] = &[
    FieldDef::integer("VendorsDisclosedSegmentType", 3).constant(1),
    FieldDef::optimized_range("VendorsDisclosed"),
];

const VENDORS_ALLOWED: &[FieldDef] = &[
    FieldDef::integer("VendorsAllowedSegmentType", 3).constant(2),
    FieldDef::optimized_range("VendorsAllowed"),
];

const PUBLISHER_PURPOSES: &[FieldDef] = &[
    FieldDef::integer("PublisherPurposesSegmentType", 3).constant(3),
    FieldDef::bitfield("PublisherConsents", 24),
    FieldDef::bitfield("PublisherLegitimateInterests", 24),
    FieldDef::integer("NumCustomPurposes", 6),
    FieldDef::flexible_bitfield("PublisherCustomConsents", num_custom_purposes),
    FieldDef::flexible_bitfield("PublisherCustomLegitimateInterests", num_custom_purposes),
];

const OPTIONAL: &[SegmentDef] = &[
    SegmentDef::optional(
        "vendorsdisclosed",
        "VendorsDisclosedSegmentIncluded",
        false,
        VENDORS_DISCLOSED,
    ),
    SegmentDef::optional(
        "vendorsallowed",
        "VendorsAllowedSegmentIncluded",
        false,
        VENDORS_ALLOWED,
    ),
    SegmentDef::optional(
        "publisherpurposes",
        "PublisherPurposesSegmentIncluded",
        false,
        PUBLISHER_PURPOSES,
    ),
];

pub static TCF_EU_V2: SectionDef = SectionDef {
    id: SectionId::TcfEuV2,
    name: "tcfeuv2",
    format: Format::Base64Url,
    layout: SectionLayout {
        version: 2,
        core: SegmentDef::required("core", CORE),
        optional: OPTIONAL,
    },
    legacy_layouts: &[],
    validator: None,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sections::{Section, SectionDecodeError, SectionError};
    use test_case::test_case;

    const CORE_STR: &str = "CPXxRfAPXxRfAAfKABENB-CgAAAAAAAAAAYgAAAAAAAA";
    const DISCLOSED: &str = "IFoEUQQgAIQwgIwQABAEAAAAOIAACAIAAAAQAIAgEAACEAAAAAgAQBAAAAAAAGBAAgAAAAAAAFAAECAAAgAAQARAEQAAAAAJAAIAAgAAAYQEAAAQmAgBC3ZAYzUw";
    const PUBLISHER: &str = "ZAAgH9794ulA";

    fn value(section: &Section, name: &str) -> FieldValue {
        section.get_field_value(name).unwrap().unwrap().clone()
    }

    #[test]
    fn decode_core() {
        let section = Section::decode(&TCF_EU_V2, CORE_STR).unwrap();
        assert_eq!(value(&section, "Created"), FieldValue::Int(16504920000));
        assert_eq!(value(&section, "CmpId"), FieldValue::Int(31));
        assert_eq!(value(&section, "CmpVersion"), FieldValue::Int(640));
        assert_eq!(value(&section, "ConsentLanguage"), "EN".into());
        assert_eq!(value(&section, "VendorListVersion"), FieldValue::Int(126));
        assert_eq!(value(&section, "PolicyVersion"), FieldValue::Int(2));
        assert_eq!(value(&section, "IsServiceSpecific"), FieldValue::Bool(true));
        assert_eq!(value(&section, "PublisherCountryCode"), "DE".into());
        assert_eq!(value(&section, "VendorConsents"), IdSet::new().into());
        assert_eq!(
            value(&section, "PublisherRestrictions"),
            Vec::<RangeEntry>::new().into()
        );
        assert_eq!(
            value(&section, "VendorsDisclosedSegmentIncluded"),
            FieldValue::Bool(false)
        );
    }

    #[test]
    fn sub_second_timestamps_survive_reencoding() {
        // Created and LastUpdated end in 7 and 3 deciseconds
        let s = "CPXxRfHPXxRfNAfKABENB-CgAAAAAAAAAAYgAAAAAAAA";
        let mut section = Section::decode(&TCF_EU_V2, s).unwrap();
        assert_eq!(value(&section, "Created"), FieldValue::Int(16504920007));
        assert_eq!(
            value(&section, "LastUpdated").unix_seconds(),
            Some(1650492001)
        );

        section.set_field_value("CmpId", 31u16).unwrap();
        assert_eq!(section.encode().unwrap(), s);
    }

    #[test]
    fn decode_optional_segments() {
        let s = format!("{CORE_STR}.{PUBLISHER}.{DISCLOSED}");
        let section = Section::decode(&TCF_EU_V2, &s).unwrap();

        let disclosed = value(&section, "VendorsDisclosed");
        let disclosed = disclosed.as_id_set().unwrap();
        assert_eq!(disclosed.len(), 79);
        assert_eq!(disclosed.first(), Some(&2));
        assert_eq!(disclosed.last(), Some(&720));

        assert_eq!(
            value(&section, "PublisherConsents").set_bits(),
            Some(IdSet::from([3, 16]))
        );
        assert_eq!(value(&section, "NumCustomPurposes"), FieldValue::Int(5));
        assert_eq!(
            value(&section, "PublisherCustomConsents"),
            vec![true, true, false, true, false].into()
        );
        assert_eq!(
            value(&section, "PublisherCustomLegitimateInterests"),
            vec![false, true, false, true, false].into()
        );
        assert_eq!(section.get_field_value("VendorsAllowed").unwrap(), None);

        assert_eq!(section.encode().unwrap(), s);
    }

    #[test]
    fn segments_are_written_in_declared_order() {
        let s = format!("{CORE_STR}.{PUBLISHER}.{DISCLOSED}");
        let mut section = Section::decode(&TCF_EU_V2, &s).unwrap();
        section
            .set_field_value("PublisherPurposesSegmentIncluded", false)
            .unwrap();
        assert_eq!(section.encode().unwrap(), format!("{CORE_STR}.{DISCLOSED}"));

        section
            .set_field_value("PublisherPurposesSegmentIncluded", true)
            .unwrap();
        assert_eq!(
            section.encode().unwrap(),
            format!("{CORE_STR}.{DISCLOSED}.{PUBLISHER}")
        );
    }

    #[test]
    fn reencode_custom_purposes() {
        let s = format!("{CORE_STR}.{PUBLISHER}");
        let mut section = Section::decode(&TCF_EU_V2, &s).unwrap();
        section
            .set_field_value("PublisherCustomConsents", vec![true, true, false, true, false])
            .unwrap();
        assert_eq!(
            section.encode().unwrap(),
            format!("{CORE_STR}.ZAAgH9794ulA")
        );
    }

    #[test_case(DISCLOSED => matches SectionDecodeError::UnexpectedFieldValue { field: "Version", found: 8, .. } ; "disclosed vendors only")]
    #[test_case(PUBLISHER => matches SectionDecodeError::UnexpectedFieldValue { field: "Version", found: 25, .. } ; "publisher purposes only")]
    #[test_case(&format!("{CORE_STR}.{DISCLOSED}.{DISCLOSED}") => matches SectionDecodeError::DuplicateSegmentType { segment_type: 1, .. } ; "duplicate segment")]
    #[test_case(&format!("{CORE_STR}.gAAA") => matches SectionDecodeError::UnknownSegmentType { segment_type: 4, .. } ; "unknown segment type")]
    #[test_case(&format!("{CORE_STR}.") => matches SectionDecodeError::UnexpectedEndOfString { .. } ; "empty segment")]
    fn error(s: &str) -> SectionDecodeError {
        Section::decode(&TCF_EU_V2, s).unwrap_err()
    }

    #[test]
    fn truncated_core() {
        let section = Section::decode(&TCF_EU_V2, "CPX").unwrap();
        assert!(matches!(
            section.get_field_value("CmpId"),
            Err(SectionError::Decode(SectionDecodeError::Field {
                field: "Created",
                ..
            }))
        ));
    }

    #[test]
    fn new_section_requires_cmp() {
        let mut section = Section::new(&TCF_EU_V2);
        assert!(matches!(
            section.encode(),
            Err(SectionError::Validation { ref errors, .. }) if errors.len() == 3
        ));

        section.set_field_value("CmpId", 31u16).unwrap();
        section.set_field_value("CmpVersion", 640u16).unwrap();
        section.set_field_value("VendorListVersion", 126u16).unwrap();
        section.set_field_value("PolicyVersion", 2u8).unwrap();
        section.set_field_value("Created", 16504920000u64).unwrap();
        section.set_field_value("LastUpdated", 16504920000u64).unwrap();
        section.set_field_value("ConsentScreen", 1u8).unwrap();
        section.set_field_value("IsServiceSpecific", true).unwrap();
        section.set_field_value("PublisherCountryCode", "DE").unwrap();
        assert_eq!(section.encode().unwrap(), "CPXxRfAPXxRfAAfKABENB-CgAAAAAAAAAAYgAAAAAAAA");
    }

    #[test]
    fn publisher_restriction_conversion() {
        let restriction = PublisherRestriction {
            purpose_id: 2,
            restriction_type: RestrictionType::RequireConsent,
            restricted_vendor_ids: IdSet::from([5, 6]),
        };
        let value: FieldValue = vec![RangeEntry::from(restriction.clone())].into();
        assert_eq!(publisher_restrictions(&value), vec![restriction]);
    }

    #[test]
    fn language_code_is_validated() {
        let mut section = Section::decode(&TCF_EU_V2, CORE_STR).unwrap();
        section.set_field_value("ConsentLanguage", "en").unwrap();
        assert!(section.validate().is_err());
    }
}
