//! Field helpers and rules shared by the US National and US state sections.
use crate::sections::{
    DefaultValue, FieldDef, FieldFailure, FieldValue, Section, SegmentDef, ValidationError,
};
use num_derive::{FromPrimitive, ToPrimitive};
#[cfg(feature = "serde")]
use serde::Serialize;

#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum Notice {
    NotApplicable = 0,
    Provided = 1,
    NotProvided = 2,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum OptOut {
    NotApplicable = 0,
    OptedOut = 1,
    DidNotOptOut = 2,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum Consent {
    NotApplicable = 0,
    NoConsent = 1,
    Consent = 2,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum MspaMode {
    NotApplicable = 0,
    Yes = 1,
    No = 2,
}

macro_rules! impl_into_field_value {
    ($($t:ty),+) => {
        $(
            impl From<$t> for FieldValue {
                fn from(value: $t) -> Self {
                    Self::Int(value as u64)
                }
            }
        )+
    };
}

impl_into_field_value!(Notice, OptOut, Consent, MspaMode);

fn tristate(value: &FieldValue) -> bool {
    value.as_int().is_some_and(|n| n <= 2)
}

fn tristate_list(value: &FieldValue) -> bool {
    value
        .as_int_list()
        .is_some_and(|list| list.iter().all(|n| *n <= 2))
}

fn covered_transaction(value: &FieldValue) -> bool {
    value.as_int().is_some_and(|n| (1..=2).contains(&n))
}

pub(crate) const fn version(v: u64) -> FieldDef {
    FieldDef::integer("Version", 6).constant(v)
}

pub(crate) const fn notice(name: &'static str) -> FieldDef {
    FieldDef::integer(name, 2).validated(tristate)
}

pub(crate) const fn opt_out(name: &'static str) -> FieldDef {
    FieldDef::integer(name, 2).validated(tristate)
}

pub(crate) const fn consent(name: &'static str) -> FieldDef {
    FieldDef::integer(name, 2).validated(tristate)
}

pub(crate) const fn consents(name: &'static str, count: usize) -> FieldDef {
    FieldDef::integer_list(name, 2, count).validated(tristate_list)
}

// covered transaction is a yes/no value, 0 is not allowed
pub(crate) const MSPA_COVERED_TRANSACTION: FieldDef = FieldDef::integer("MspaCoveredTransaction", 2)
    .default_value(DefaultValue::Int(1))
    .validated(covered_transaction);
pub(crate) const MSPA_OPT_OUT_OPTION_MODE: FieldDef =
    FieldDef::integer("MspaOptOutOptionMode", 2).validated(tristate);
pub(crate) const MSPA_SERVICE_PROVIDER_MODE: FieldDef =
    FieldDef::integer("MspaServiceProviderMode", 2).validated(tristate);

const GPC_FIELDS: &[FieldDef] = &[
    FieldDef::integer("GpcSegmentType", 2).constant(1),
    FieldDef::boolean("Gpc"),
];

/// Global Privacy Control segment, included by default.
pub(crate) const GPC_SEGMENT: SegmentDef =
    SegmentDef::optional("gpc", "GpcSegmentIncluded", true, GPC_FIELDS);

pub(crate) const GPC_ONLY: &[SegmentDef] = &[GPC_SEGMENT];

/// Notices that must be "not applicable" when the MSPA service provider mode is in use.
const MSPA_NOTICES: &[&str] = &[
    "SaleOptOutNotice",
    "SharingOptOutNotice",
    "SensitiveDataLimitUseNotice",
];

fn int_field(section: &Section, name: &str) -> Option<u64> {
    section
        .get_field_value(name)
        .ok()
        .flatten()
        .and_then(FieldValue::as_int)
}

/// Checks each notice against its opt-out, then the MSPA modes against the notices.
///
/// Fields missing from the section are skipped.
pub(crate) fn validate_us_section(
    section: &Section,
    pairs: &[(&'static str, &'static str)],
) -> Vec<ValidationError> {
    let mut errors = vec![];
    let mut conflict = |field: &'static str, with: &'static str| {
        errors.push(ValidationError::new(
            section.name(),
            field,
            FieldFailure::Conflict { with },
        ));
    };

    for &(notice, opt_out) in pairs {
        let (Some(n), Some(o)) = (int_field(section, notice), int_field(section, opt_out)) else {
            continue;
        };
        let consistent = match n {
            0 => o == 0,
            1 => o == 1 || o == 2,
            2 => o == 1,
            _ => true,
        };
        if !consistent {
            conflict(opt_out, notice);
        }
    }

    let service_provider_mode = int_field(section, MSPA_SERVICE_PROVIDER_MODE.name);
    let opt_out_option_mode = int_field(section, MSPA_OPT_OUT_OPTION_MODE.name);
    match (service_provider_mode, opt_out_option_mode) {
        (Some(1), Some(mode)) if mode != 2 => {
            conflict(MSPA_OPT_OUT_OPTION_MODE.name, MSPA_SERVICE_PROVIDER_MODE.name)
        }
        (Some(2), Some(mode)) if mode != 1 => {
            conflict(MSPA_OPT_OUT_OPTION_MODE.name, MSPA_SERVICE_PROVIDER_MODE.name)
        }
        _ => {}
    }
    if let Some(0 | 1) = service_provider_mode {
        for &notice in MSPA_NOTICES {
            if int_field(section, notice).is_some_and(|n| n != 0) {
                conflict(notice, MSPA_SERVICE_PROVIDER_MODE.name);
            }
        }
    }

    errors
}
