//! Texas privacy section.
use crate::sections::us_common::{
    GPC_ONLY, MSPA_COVERED_TRANSACTION, MSPA_OPT_OUT_OPTION_MODE, MSPA_SERVICE_PROVIDER_MODE,
    consent, consents, notice, opt_out, validate_us_section, version,
};
use crate::sections::{
    FieldDef, Format, Section, SectionDef, SectionId, SectionLayout, SegmentDef, ValidationError,
};

const CORE: &[FieldDef] = &[
    version(1),
    notice("ProcessingNotice"),
    notice("SaleOptOutNotice"),
    notice("TargetedAdvertisingOptOutNotice"),
    opt_out("SaleOptOut"),
    opt_out("TargetedAdvertisingOptOut"),
    consents("SensitiveDataProcessing", 8),
    consent("KnownChildSensitiveDataConsents"),
    consent("AdditionalDataProcessingConsent"),
    MSPA_COVERED_TRANSACTION,
    MSPA_OPT_OUT_OPTION_MODE,
    MSPA_SERVICE_PROVIDER_MODE,
];

pub static US_TX: SectionDef = SectionDef {
    id: SectionId::UsTx,
    name: "ustx",
    format: Format::Base64Url,
    layout: SectionLayout {
        version: 1,
        core: SegmentDef::required("core", CORE),
        optional: GPC_ONLY,
    },
    legacy_layouts: &[],
    validator: Some(validate),
};

fn validate(section: &Section) -> Vec<ValidationError> {
    validate_us_section(
        section,
        &[
            ("SaleOptOutNotice", "SaleOptOut"),
            ("TargetedAdvertisingOptOutNotice", "TargetedAdvertisingOptOut"),
        ],
    )
}
