//! The header section that starts every GPP string.
//!
//! It is decoded with the same engine as the other sections but is not part of the registry,
//! since it never appears in the body of a GPP string.
use crate::sections::{FieldDef, Format, SectionDef, SectionId, SectionLayout, SegmentDef};

/// Type of the header section.
pub const HEADER_TYPE: u64 = 3;
/// Version of the GPP specification.
pub const GPP_VERSION: u64 = 1;

const FIELDS: &[FieldDef] = &[
    FieldDef::integer("Id", 6).constant(HEADER_TYPE),
    FieldDef::integer("Version", 6).constant(GPP_VERSION),
    FieldDef::fibonacci_range("SectionIds"),
];

pub static HEADER: SectionDef = SectionDef {
    id: SectionId::GppHeader,
    name: "header",
    format: Format::Base64Url,
    layout: SectionLayout {
        version: GPP_VERSION as u8,
        core: SegmentDef::required("header", FIELDS),
        optional: &[],
    },
    legacy_layouts: &[],
    validator: None,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sections::{FieldValue, IdSet, Section, SectionDecodeError};
    use test_case::test_case;

    #[test_case("DBABM" => vec![2] ; "tcf eu v2")]
    #[test_case("DBACNY" => vec![2, 6] ; "tcf eu v2 and usp")]
    #[test_case("DBABTA" => vec![6] ; "usp only")]
    #[test_case("DBABjw" => vec![5, 6] ; "tcf ca and usp")]
    #[test_case("DBAA" => Vec::<u16>::new() ; "no sections")]
    fn section_ids(s: &str) -> Vec<u16> {
        let header = Section::decode(&HEADER, s).unwrap();
        header
            .get_field_value("SectionIds")
            .unwrap()
            .and_then(FieldValue::as_id_set)
            .unwrap()
            .iter()
            .copied()
            .collect()
    }

    #[test]
    fn encode_header() {
        let mut header = Section::new(&HEADER);
        header
            .set_field_value("SectionIds", IdSet::from([2, 6]))
            .unwrap();
        assert_eq!(header.encode().unwrap(), "DBACNY");
    }

    #[test]
    fn wrong_type() {
        let err = Section::decode(&HEADER, "CPXxRfAPXxRfAAfKABENB-CgAAAAAAAAAAYgAAAAAAAA")
            .unwrap_err();
        assert!(matches!(
            err,
            SectionDecodeError::UnexpectedFieldValue {
                field: "Id",
                expected: 3,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn wrong_version() {
        let header = Section::decode(&HEADER, "DCABM").unwrap();
        let err = header.get_field_value("SectionIds").unwrap_err();
        assert!(matches!(
            err,
            crate::sections::SectionError::Decode(SectionDecodeError::UnexpectedFieldValue {
                field: "Version",
                expected: 1,
                found: 2,
                ..
            })
        ));
    }
}
