//! TCF Canada v1 section.
// See https://github.com/InteractiveAdvertisingBureau/Global-Privacy-Platform/blob/main/Sections/Canada/IAB%20Canada%20Consent%20String%20Format%20v1.0.md
use crate::sections::tcfeuv2::{is_language_code, num_custom_purposes};
use crate::sections::{
    DefaultValue, FieldDef, FieldValue, Format, IdSet, RangeEntry, SectionDef, SectionId,
    SectionLayout, SegmentDef,
};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
#[cfg(feature = "serde")]
use serde::Serialize;

#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum RestrictionType {
    NotAllowed = 0,
    RequireExpressConsent = 1,
    RequireImpliedConsent = 2,
    Undefined = 3,
}

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

/// Reads the restrictions out of a `PubRestrictions` value.
pub fn publisher_restrictions(value: &FieldValue) -> Vec<PublisherRestriction> {
    value
        .as_ranges()
        .map(|ranges| ranges.iter().cloned().map(PublisherRestriction::from).collect())
        .unwrap_or_default()
}

const CORE: &[FieldDef] = &[
    FieldDef::integer("Version", 6).constant(1),
    FieldDef::datetime("Created"),
    FieldDef::datetime("LastUpdated"),
    FieldDef::integer("CmpId", 12).required(),
    FieldDef::integer("CmpVersion", 12).required(),
    FieldDef::integer("ConsentScreen", 6),
    FieldDef::string("ConsentLanguage", 2)
        .default_value(DefaultValue::Str("EN"))
        .validated(is_language_code),
    FieldDef::integer("VendorListVersion", 12).required(),
    FieldDef::integer("TcfPolicyVersion", 6).default_value(DefaultValue::Int(2)),
    FieldDef::boolean("UseNonStandardStacks"),
    FieldDef::bitfield("SpecialFeatureExpressConsent", 12),
    FieldDef::bitfield("PurposesExpressConsent", 24),
    FieldDef::bitfield("PurposesImpliedConsent", 24),
    FieldDef::optimized_range("VendorExpressConsent"),
    FieldDef::optimized_range("VendorImpliedConsent"),
    // added in v1.1, older strings end before it
    FieldDef::array_of_ranges("PubRestrictions", 6, 2).optional_tail(),
];

const DISCLOSED_VENDORS: &[FieldDef] = &[
    FieldDef::integer("DisclosedVendorsSegmentType", 3).constant(1),
    FieldDef::optimized_range("DisclosedVendors"),
];

const PUB_PURPOSES: &[FieldDef] = &[
    FieldDef::integer("PubPurposesSegmentType", 3).constant(3),
    FieldDef::bitfield("PubPurposesExpressConsent", 24),
    FieldDef::bitfield("PubPurposesImpliedConsent", 24),
    FieldDef::integer("NumCustomPurposes", 6),
    FieldDef::flexible_bitfield("CustomPurposesExpressConsent", num_custom_purposes),
    FieldDef::flexible_bitfield("CustomPurposesImpliedConsent", num_custom_purposes),
];

const OPTIONAL: &[SegmentDef] = &[
    SegmentDef::optional(
        "disclosedvendors",
        "DisclosedVendorsSegmentIncluded",
        false,
        DISCLOSED_VENDORS,
    ),
    SegmentDef::optional(
        "pubpurposes",
        "PubPurposesSegmentIncluded",
        false,
        PUB_PURPOSES,
    ),
];

pub static TCF_CA_V1: SectionDef = SectionDef {
    id: SectionId::TcfCaV1,
    name: "tcfcav1",
    format: Format::Base64Url,
    layout: SectionLayout {
        version: 1,
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

    // written before publisher restrictions existed
    const CORE_V1_0: &str = "BPXuQIAPXuQIAAfKABENB-CgAAAAAAAAAAAAAAAA";

    fn value(section: &Section, name: &str) -> FieldValue {
        section.get_field_value(name).unwrap().unwrap().clone()
    }

    #[test]
    fn decode_core() {
        let section = Section::decode(&TCF_CA_V1, CORE_V1_0).unwrap();
        assert_eq!(value(&section, "Created"), FieldValue::Int(16504128000));
        assert_eq!(value(&section, "CmpId"), FieldValue::Int(31));
        assert_eq!(value(&section, "CmpVersion"), FieldValue::Int(640));
        assert_eq!(value(&section, "TcfPolicyVersion"), FieldValue::Int(2));
        assert_eq!(value(&section, "UseNonStandardStacks"), FieldValue::Bool(true));
        assert_eq!(value(&section, "VendorExpressConsent"), IdSet::new().into());
        assert!(publisher_restrictions(&value(&section, "PubRestrictions")).is_empty());
    }

    #[test]
    fn reencode_adds_publisher_restrictions() {
        let mut section = Section::decode(&TCF_CA_V1, CORE_V1_0).unwrap();
        assert_eq!(section.encode().unwrap(), CORE_V1_0);

        section.set_field_value("CmpVersion", 641u16).unwrap();
        assert_eq!(
            section.encode().unwrap(),
            "BPXuQIAPXuQIAAfKBBENB-CgAAAAAAAAAAAAAAAAA"
        );
    }

    #[test]
    fn decode_pub_purposes() {
        let s = format!("{CORE_V1_0}.YAAAAAAAAAA");
        let section = Section::decode(&TCF_CA_V1, &s).unwrap();
        assert_eq!(
            value(&section, "PubPurposesSegmentIncluded"),
            FieldValue::Bool(true)
        );
        assert_eq!(value(&section, "NumCustomPurposes"), FieldValue::Int(0));
        assert_eq!(
            value(&section, "CustomPurposesExpressConsent"),
            Vec::<bool>::new().into()
        );
        assert_eq!(section.get_field_value("DisclosedVendors").unwrap(), None);
    }

    #[test]
    fn include_pub_purposes() {
        let mut section = Section::decode(&TCF_CA_V1, CORE_V1_0).unwrap();
        section
            .set_field_value("PubPurposesSegmentIncluded", true)
            .unwrap();
        assert_eq!(
            section.encode().unwrap(),
            format!("{CORE_V1_0}.YAAAAAAAAA")
        );
    }

    #[test_case("BPX" => matches SectionDecodeError::Field { field: "Created", .. } ; "decode error")]
    #[test_case("" => matches SectionDecodeError::Field { field: "Version", .. } ; "empty string")]
    fn error(s: &str) -> SectionDecodeError {
        let section = match Section::decode(&TCF_CA_V1, s) {
            Ok(section) => section,
            Err(e) => return e,
        };
        match section.get_field_value("CmpId").unwrap_err() {
            SectionError::Decode(e) => e,
            e => panic!("unexpected error {e}"),
        }
    }

    #[test]
    fn publisher_restriction_conversion() {
        let restriction = PublisherRestriction {
            purpose_id: 1,
            restriction_type: RestrictionType::RequireImpliedConsent,
            restricted_vendor_ids: IdSet::from([10]),
        };
        let value: FieldValue = vec![RangeEntry::from(restriction.clone())].into();
        assert_eq!(publisher_restrictions(&value), vec![restriction]);
    }
}
