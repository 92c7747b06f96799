//! This crate is an encoder and decoder for the IAB Global Privacy Platform (GPP)
//! [Consent String Specification](https://github.com/InteractiveAdvertisingBureau/Global-Privacy-Platform).
//!
//! It reads and writes every section defined by version 1 of the standard: the TCF EU and
//! Canada sections, the US Privacy string, US National and the US state sections.
//!
//! NOTE: This is not an official IAB library.
//!
//! # Parsing GPP strings
//!
//! A GPP Consent String is made of a mandatory header and a list of sections.
//!
//! The [`GPPString`](v1/struct.GPPString.html) type is used to parse consent strings and
//! access their sections. Fields are decoded the first time they are read.
//!
//! ```
//! # use std::error::Error;
//! #
//! # fn main() -> Result<(), Box<dyn Error>> {
//! use std::str::FromStr;
//! use gpp_codec::v1::GPPString;
//!
//! let s = "DBACNY~CPXxRfAPXxRfAAfKABENB-CgAAAAAAAAAAYgAAAAAAAA~1YNN";
//! let gpp_string = GPPString::from_str(s)?;
//!
//! for section in gpp_string.sections() {
//!     println!("{} ({})", section.name(), section.encode()?);
//!     for name in section.field_names() {
//!         println!("  {name}: {:?}", section.get_field_value(name)?);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Accessing section data
//!
//! Depending on the legislation which applies with regard to the data you are handling, you may
//! want to look only at specific sections.
//!
//! For example, let's assume your users are located in the European Union, where GDPR rules apply.
//! The section that you need to read would be TCF V2.2.
//!
//! The following example checks that a specific vendor (id 755) has the right to create a
//! personalized ads profile (purpose ID 3) for the user who submitted the provided consent string.
//!
//! ```
//! # use std::error::Error;
//! #
//! # fn main() -> Result<(), Box<dyn Error>> {
//! use gpp_codec::v1::GPPString;
//!
//! let s = "DBABM~CPXuQIAPXuQIAAfKABENB-CgACAAAAAAAAYgF5wAQF5gAAAA.YAAAAAAAAAAA";
//! let gpp = GPPString::parse_str(s)?;
//!
//! // does the user consent to the vendor creating a personalized ads profile
//! // based on their data?
//! let personalized_ads_profile_consent = gpp
//!     .get_field_value("tcfeuv2", "PurposeConsents")?
//!     .and_then(|v| v.set_bits())
//!     .is_some_and(|purposes| purposes.contains(&3));
//!
//! // does the user consent to vendor Google Advertising Products to use their data?
//! let vendor_consent = gpp
//!     .get_field_value("tcfeuv2", "VendorConsents")?
//!     .and_then(|v| v.as_id_set())
//!     .is_some_and(|vendors| vendors.contains(&755));
//!
//! assert!(personalized_ads_profile_consent && vendor_consent);
//! # Ok(())
//! # }
//! ```
//!
//! # Writing GPP strings
//!
//! Fields are set by section and field name. Sections are created when one of their fields is
//! first set, and the string is encoded again on the next call to
//! [`encode`](v1/struct.GPPString.html#method.encode).
//!
//! ```
//! # use std::error::Error;
//! #
//! # fn main() -> Result<(), Box<dyn Error>> {
//! use gpp_codec::sections::us_common::{MspaMode, OptOut};
//! use gpp_codec::v1::GPPString;
//!
//! let mut gpp = GPPString::parse_str("DBABT~1YNN")?;
//! gpp.set_field_value("uspv1", "OptOutSale", "Y")?;
//! gpp.set_field_value("usnat", "SaleOptOutNotice", 1u8)?;
//! gpp.set_field_value("usnat", "SaleOptOut", OptOut::OptedOut)?;
//! gpp.set_field_value("usnat", "MspaOptOutOptionMode", MspaMode::Yes)?;
//! gpp.set_field_value("usnat", "MspaServiceProviderMode", MspaMode::No)?;
//!
//! gpp.validate()?;
//! println!("{}", gpp.encode()?);
//! # Ok(())
//! # }
//! ```
//!
//! # Error handling
//!
//! This crate is conservative with regard to how it handles parsing failure. If a string cannot be
//! fully decoded, then it is considered as an error.
//!
//! This is done to avoid obtaining erroneous user consent information from potentially corrupted
//! payloads.
//!
pub(crate) mod core;
pub mod sections;
pub mod v1;
