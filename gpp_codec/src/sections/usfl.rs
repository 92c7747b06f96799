//! Florida privacy section.
use crate::sections::us_common::{
    MSPA_COVERED_TRANSACTION, MSPA_OPT_OUT_OPTION_MODE, MSPA_SERVICE_PROVIDER_MODE, consent,
    consents, notice, opt_out, validate_us_section, version,
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
    consents("KnownChildSensitiveDataConsents", 3),
    consent("AdditionalDataProcessingConsent"),
    MSPA_COVERED_TRANSACTION,
    MSPA_OPT_OUT_OPTION_MODE,
    MSPA_SERVICE_PROVIDER_MODE,
];

pub static US_FL: SectionDef = SectionDef {
    id: SectionId::UsFl,
    name: "usfl",
    format: Format::Base64Url,
    layout: SectionLayout {
        version: 1,
        core: SegmentDef::required("core", CORE),
        optional: &[],
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sections::FieldValue;
    use crate::sections::us_common::tests::sample_section;

    #[test]
    fn decode() {
        let section = Section::decode(&US_FL, "BVVVVVVY").unwrap();
        assert_eq!(
            section.get_field_value("SaleOptOut").unwrap(),
            Some(&FieldValue::Int(1))
        );
        assert_eq!(
            section.get_field_value("KnownChildSensitiveDataConsents").unwrap(),
            Some(&FieldValue::IntList(vec![1; 3]))
        );
        assert_eq!(
            section.get_field_value("MspaServiceProviderMode").unwrap(),
            Some(&FieldValue::Int(2))
        );
    }

    #[test]
    fn encode() {
        let section = sample_section(&US_FL);
        assert_eq!(section.encode().unwrap(), "BVVVVVVY");
        section.validate().unwrap();
    }
}
