//! US National privacy section.
//!
//! Version 2 added four sensitive data categories and a third known child consent. Strings
//! using the version 1 layout are still decoded, and keep that layout when re-encoded.
use crate::sections::us_common::{
    GPC_ONLY, MSPA_COVERED_TRANSACTION, MSPA_OPT_OUT_OPTION_MODE, MSPA_SERVICE_PROVIDER_MODE,
    consent, consents, notice, opt_out, validate_us_section, version,
};
use crate::sections::{
    FieldDef, Format, Section, SectionDef, SectionId, SectionLayout, SegmentDef, ValidationError,
};

const CORE_V1: &[FieldDef] = &[
    version(1),
    notice("SharingNotice"),
    notice("SaleOptOutNotice"),
    notice("SharingOptOutNotice"),
    notice("TargetedAdvertisingOptOutNotice"),
    notice("SensitiveDataProcessingOptOutNotice"),
    notice("SensitiveDataLimitUseNotice"),
    opt_out("SaleOptOut"),
    opt_out("SharingOptOut"),
    opt_out("TargetedAdvertisingOptOut"),
    consents("SensitiveDataProcessing", 12),
    consents("KnownChildSensitiveDataConsents", 2),
    consent("PersonalDataConsents"),
    MSPA_COVERED_TRANSACTION,
    MSPA_OPT_OUT_OPTION_MODE,
    MSPA_SERVICE_PROVIDER_MODE,
];

const CORE_V2: &[FieldDef] = &[
    version(2),
    notice("SharingNotice"),
    notice("SaleOptOutNotice"),
    notice("SharingOptOutNotice"),
    notice("TargetedAdvertisingOptOutNotice"),
    notice("SensitiveDataProcessingOptOutNotice"),
    notice("SensitiveDataLimitUseNotice"),
    opt_out("SaleOptOut"),
    opt_out("SharingOptOut"),
    opt_out("TargetedAdvertisingOptOut"),
    consents("SensitiveDataProcessing", 16),
    consents("KnownChildSensitiveDataConsents", 3),
    consent("PersonalDataConsents"),
    MSPA_COVERED_TRANSACTION,
    MSPA_OPT_OUT_OPTION_MODE,
    MSPA_SERVICE_PROVIDER_MODE,
];

const LEGACY: &[SectionLayout] = &[SectionLayout {
    version: 1,
    core: SegmentDef::required("core", CORE_V1),
    optional: GPC_ONLY,
}];

pub static US_NAT: SectionDef = SectionDef {
    id: SectionId::UsNat,
    name: "usnat",
    format: Format::Base64Url,
    layout: SectionLayout {
        version: 2,
        core: SegmentDef::required("core", CORE_V2),
        optional: GPC_ONLY,
    },
    legacy_layouts: LEGACY,
    validator: Some(validate),
};

fn validate(section: &Section) -> Vec<ValidationError> {
    validate_us_section(
        section,
        &[
            ("SaleOptOutNotice", "SaleOptOut"),
            ("SharingOptOutNotice", "SharingOptOut"),
            ("TargetedAdvertisingOptOutNotice", "TargetedAdvertisingOptOut"),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sections::us_common::tests::sample_section;
    use crate::sections::{CodecState, FieldValue};
    use test_case::test_case;

    #[test_case("BAAAAAAAAQA", "SaleOptOut" => Some(FieldValue::Int(0)) ; "v1 zeros")]
    #[test_case("BAAAAAAAAQA", "MspaCoveredTransaction" => Some(FieldValue::Int(1)) ; "v1 covered transaction")]
    #[test_case("BAAAAAAAAQA", "Gpc" => None ; "v1 without gpc")]
    #[test_case("BVVVVVVVVWA", "SensitiveDataProcessing" => Some(FieldValue::IntList(vec![1; 12])) ; "v1 sensitive data")]
    #[test_case("BVVVVVVVVWA.YA", "Gpc" => Some(FieldValue::Bool(true)) ; "v1 with gpc")]
    #[test_case("CAAAAAAAAAWA.Q", "KnownChildSensitiveDataConsents" => Some(FieldValue::IntList(vec![0, 0, 1])) ; "v2 known child")]
    #[test_case("CAAAAAAAAAWA.Q", "MspaCoveredTransaction" => Some(FieldValue::Int(2)) ; "v2 covered transaction")]
    #[test_case("CAAAAAAAAAWA.Q", "Gpc" => Some(FieldValue::Bool(false)) ; "v2 gpc")]
    fn decode(s: &str, field: &str) -> Option<FieldValue> {
        Section::decode(&US_NAT, s)
            .unwrap()
            .get_field_value(field)
            .unwrap()
            .cloned()
    }

    #[test_case("BAAAAAAAAQA" => 1)]
    #[test_case("CAAAAAAAAAWA.Q" => 2)]
    fn layout_follows_version(s: &str) -> u8 {
        Section::decode(&US_NAT, s).unwrap().version()
    }

    #[test]
    fn v1_keeps_its_layout() {
        let mut section = Section::decode(&US_NAT, "BVVVVVVVVWA.YA").unwrap();
        section.set_field_value("SaleOptOut", 2u8).unwrap();
        assert_eq!(section.state(), CodecState::Dirty);
        assert_eq!(section.encode().unwrap(), "BVVlVVVVVW.YA");
        assert!(matches!(
            section.set_field_value("SensitiveDataProcessing", vec![0u64; 16]),
            Ok(())
        ));
        assert!(section.encode().is_err());
    }

    #[test]
    fn encode() {
        let section = sample_section(&US_NAT);
        assert_eq!(section.encode().unwrap(), "CVVVVVVVVVVY.Y");
        section.validate().unwrap();
    }

    #[test]
    fn invalid_combinations() {
        let mut section = sample_section(&US_NAT);
        section.set_field_value("SharingOptOutNotice", 0u8).unwrap();
        assert!(section.validate().is_err());
    }
}
