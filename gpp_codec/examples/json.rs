use gpp_codec::v1::GPPString;
use std::env::args;

fn main() {
    let s = args()
        .nth(1)
        .unwrap_or_else(|| "DBABM~CPXxRfAPXxRfAAfKABENB-CgAAAAAAAAAAYgAAAAAAAA".to_string());

    let gpp_str = GPPString::parse_str(&s).expect("a valid GPP string");

    for section in gpp_str.sections() {
        println!("{} (id {}, version {})", section.name(), section.id(), section.version());
    }

    #[cfg(feature = "serde")]
    println!("{}", serde_json::to_string_pretty(&gpp_str).unwrap());
}
