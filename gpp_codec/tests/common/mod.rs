use assert_json_diff::{assert_json_eq, assert_json_include};
use gpp_codec::sections::SectionError;
use gpp_codec::v1::GPPString;
use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::io;
use std::io::ErrorKind;
use std::path::Path;

/// A GPP string and a subset of the fields it must decode to, keyed by section name.
#[derive(Deserialize)]
pub struct Fixture {
    gpp_string: String,
    /// Encoding produced from the decoded values, when the input is not in canonical form.
    #[serde(default)]
    reencoded: Option<String>,
    expected: Value,
}

impl Fixture {
    pub fn load_from_file<P: AsRef<Path>>(p: P) -> io::Result<Self> {
        let f = File::open(p)?;
        let fixture: Self = serde_json::from_reader(&f)
            .map_err(|e| io::Error::new(ErrorKind::InvalidData, e.to_string()))?;
        Ok(fixture)
    }

    fn decode(&self) -> (GPPString, Value) {
        let gpp = GPPString::parse_str(&self.gpp_string).expect("invalid GPP string");
        let json = serde_json::to_value(&gpp).expect("sections decode error");
        (gpp, json)
    }

    pub fn assert_json_matches(&self) {
        let (_, actual) = self.decode();
        assert_json_include!(actual: actual, expected: self.expected.clone());
    }

    /// Encodes every section again from its field values, and checks that the result is the
    /// canonical encoding of the string and decodes to the same values.
    pub fn assert_reencodes(&self) {
        let (mut gpp, expected) = self.decode();
        assert_eq!(gpp.encode().unwrap(), self.gpp_string);

        let ids = gpp.section_ids().collect::<Vec<_>>();
        for id in ids {
            let section = gpp.section_mut(id).unwrap();
            let fields = section.field_names().collect::<Vec<_>>();
            for name in fields {
                let Some(value) = section.get_field_value(name).unwrap().cloned() else {
                    continue;
                };
                match section.set_field_value(name, value) {
                    Ok(()) | Err(SectionError::ReadOnlyField { .. }) => {}
                    Err(e) => panic!("unable to set {name}: {e}"),
                }
            }
        }

        let encoded = gpp.encode().unwrap().to_string();
        let canonical = self.reencoded.as_deref().unwrap_or(&self.gpp_string);
        assert_eq!(encoded, canonical);

        let reparsed = GPPString::parse_str(&encoded).expect("re-encoded string is invalid");
        assert_json_eq!(serde_json::to_value(&reparsed).unwrap(), expected);
    }
}
