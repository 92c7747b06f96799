//! TCF EU v1 section, kept so that older consent strings can still be read.
// See https://github.com/InteractiveAdvertisingBureau/GDPR-Transparency-and-Consent-Framework/blob/master/Consent%20string%20and%20vendor%20list%20formats%20v1.1%20Final.md
use crate::sections::tcfeuv2::is_language_code;
use crate::sections::{
    DefaultValue, FieldDef, Format, SectionDef, SectionId, SectionLayout, SegmentDef,
};

const FIELDS: &[FieldDef] = &[
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
    FieldDef::bitfield("PurposesAllowed", 24),
    // always written back as a bitfield
    FieldDef::legacy_vendor_consents("VendorConsents"),
];

pub static TCF_EU_V1: SectionDef = SectionDef {
    id: SectionId::TcfEuV1,
    name: "tcfeuv1",
    format: Format::Base64Url,
    layout: SectionLayout {
        version: 1,
        core: SegmentDef::required("core", FIELDS),
        optional: &[],
    },
    legacy_layouts: &[],
    validator: None,
};
