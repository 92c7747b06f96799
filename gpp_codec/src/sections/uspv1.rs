//! US Privacy string, stored as text: a version digit followed by one character per flag.
// See https://github.com/InteractiveAdvertisingBureau/USPrivacy/blob/master/CCPA/US%20Privacy%20String.md#us-privacy-string-format
use crate::sections::{
    DefaultValue, FieldDef, FieldValue, Format, SectionDef, SectionId, SectionLayout, SegmentDef,
};
#[cfg(feature = "serde")]
use serde::Serialize;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum Flag {
    Yes,
    No,
    NotApplicable,
}

impl Flag {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'Y' => Some(Self::Yes),
            'N' => Some(Self::No),
            '-' => Some(Self::NotApplicable),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Yes => 'Y',
            Self::No => 'N',
            Self::NotApplicable => '-',
        }
    }

    pub fn from_value(value: &FieldValue) -> Option<Self> {
        let mut chars = value.as_str()?.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::from_char(c),
            _ => None,
        }
    }
}

impl From<Flag> for FieldValue {
    fn from(flag: Flag) -> Self {
        Self::Str(flag.as_char().to_string())
    }
}

fn is_flag(value: &FieldValue) -> bool {
    Flag::from_value(value).is_some()
}

const fn flag(name: &'static str) -> FieldDef {
    FieldDef::string(name, 1)
        .default_value(DefaultValue::Str("-"))
        .validated(is_flag)
}

const FIELDS: &[FieldDef] = &[
    FieldDef::integer("Version", 6).constant(1),
    flag("Notice"),
    flag("OptOutSale"),
    flag("LspaCovered"),
];

pub static USP_V1: SectionDef = SectionDef {
    id: SectionId::UspV1,
    name: "uspv1",
    format: Format::Text,
    layout: SectionLayout {
        version: 1,
        core: SegmentDef::required("core", FIELDS),
        optional: &[],
    },
    legacy_layouts: &[],
    validator: None,
};
