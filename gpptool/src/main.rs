use clap::{Parser, Subcommand};
use colored_json::{Color, ColorMode, Output, Styler, ToColoredJson};
use gpp_codec::sections::{
    definition, definition_by_name, FieldKind, FieldValue, IdSet, RangeEntry, Section, SectionId,
};
use gpp_codec::v1::GPPString;
use num_traits::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log what the codec does to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a GPP string and display it in the console
    Parse {
        /// GPP string to parse
        gpp_string: String,
        /// Section to display, by name or id
        #[arg(short, long)]
        section: Option<String>,
    },
    /// List all sections
    List {
        /// GPP string to parse
        gpp_string: String,
    },
    /// Display the value of a single field
    Get {
        /// GPP string to parse
        gpp_string: String,
        /// Section name, such as usnat
        section: String,
        /// Field name, such as SaleOptOut
        field: String,
    },
    /// Set fields and print the encoded string
    Set {
        /// GPP string to modify, a new string is created if omitted
        #[arg(short, long)]
        gpp_string: Option<String>,
        /// Assignments of the form section.Field=value, values being JSON
        #[arg(required = true)]
        assignments: Vec<String>,
        /// Fail when a cross-field rule of a section is broken
        #[arg(long)]
        validate: bool,
    },
}

fn main() {
    let args = Cli::parse();

    let filter = if args.verbose {
        EnvFilter::new("gpp_codec=trace")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let e = match args.cmd {
        Commands::Parse {
            gpp_string,
            section: None,
        } => parse_gpp_string(&gpp_string),
        Commands::Parse {
            gpp_string,
            section: Some(section),
        } => parse_gpp_string_section(&gpp_string, &section),
        Commands::List { gpp_string } => list_sections(&gpp_string),
        Commands::Get {
            gpp_string,
            section,
            field,
        } => get_field(&gpp_string, &section, &field),
        Commands::Set {
            gpp_string,
            assignments,
            validate,
        } => set_fields(gpp_string.as_deref(), &assignments, validate),
    };

    if let Err(e) = e {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn parse_gpp_string(s: &str) -> Result<(), Box<dyn Error>> {
    let gpp_str = GPPString::parse_str(s)?;
    print_json(&gpp_str)
}

fn parse_gpp_string_section(s: &str, section: &str) -> Result<(), Box<dyn Error>> {
    let gpp_str = GPPString::parse_str(s)?;

    let def = match section.parse::<u16>() {
        Ok(id) => SectionId::from_u16(id).and_then(definition),
        Err(_) => definition_by_name(section),
    }
    .ok_or_else(|| format!("unknown section {section}"))?;
    let section = gpp_str
        .section(def.id)
        .ok_or_else(|| format!("section {} is not present", def.name))?;

    print_json(section)
}

fn list_sections(s: &str) -> Result<(), Box<dyn Error>> {
    let gpp_str = GPPString::parse_str(s)?;

    for section in gpp_str.sections() {
        println!(
            "{}\t{}\tv{}\t{}",
            section.id().to_u16().unwrap_or_default(),
            section.name(),
            section.version(),
            section.encode()?
        );
    }

    Ok(())
}

fn get_field(s: &str, section: &str, field: &str) -> Result<(), Box<dyn Error>> {
    let gpp_str = GPPString::parse_str(s)?;
    let value = gpp_str.get_field_value(section, field)?;
    print_json(&value)
}

fn set_fields(
    s: Option<&str>,
    assignments: &[String],
    validate: bool,
) -> Result<(), Box<dyn Error>> {
    let mut gpp = match s {
        Some(s) => GPPString::parse_str(s)?,
        None => GPPString::new(),
    };

    for assignment in assignments {
        let (path, value) = assignment
            .split_once('=')
            .ok_or_else(|| format!("expected section.Field=value, got {assignment}"))?;
        let (section, field) = path
            .split_once('.')
            .ok_or_else(|| format!("expected section.Field, got {path}"))?;
        let def =
            definition_by_name(section).ok_or_else(|| format!("unknown section {section}"))?;
        let kind = Section::new(def)
            .field_kind(field)
            .ok_or_else(|| format!("unknown field {field} in section {section}"))?;

        let value = to_field_value(kind, serde_json::from_str(value)?)
            .ok_or_else(|| format!("{value} is not a valid {} value", kind.type_name()))?;
        debug!(section, field, ?value, "setting field");
        gpp.set_field_value(section, field, value)?;
    }

    if validate {
        gpp.validate()?;
    }
    println!("{}", gpp.encode()?);

    Ok(())
}

/// An array of ranges entry as written on the command line, such as
/// `{"key": 2, "range_type": 1, "ids": [5, 6]}`.
#[derive(Deserialize)]
struct RangeEntryArg {
    key: u8,
    range_type: u8,
    ids: IdSet,
}

impl From<RangeEntryArg> for RangeEntry {
    fn from(arg: RangeEntryArg) -> Self {
        Self {
            key: arg.key,
            range_type: arg.range_type,
            ids: arg.ids,
        }
    }
}

/// Converts a JSON value to the value a field of the given kind holds.
fn to_field_value(kind: FieldKind, value: Value) -> Option<FieldValue> {
    let ints = |value: &Value| -> Option<Vec<u64>> {
        value.as_array()?.iter().map(Value::as_u64).collect()
    };

    Some(match (kind, value) {
        (FieldKind::Boolean, Value::Bool(b)) => FieldValue::Bool(b),
        (FieldKind::FixedInteger(_) | FieldKind::Datetime, v) => FieldValue::Int(v.as_u64()?),
        (FieldKind::FixedString(_), Value::String(s)) => FieldValue::Str(s),
        (FieldKind::FixedBitfield(_) | FieldKind::FlexibleBitfield(_), Value::Array(a)) => {
            FieldValue::Bits(a.iter().map(Value::as_bool).collect::<Option<_>>()?)
        }
        (FieldKind::FixedIntegerList { .. }, v) => FieldValue::IntList(ints(&v)?),
        (
            FieldKind::IntegerRange
            | FieldKind::OptimizedIntegerRange
            | FieldKind::FibonacciIntegerRange
            | FieldKind::LegacyVendorConsents,
            v,
        ) => FieldValue::IdSet(
            ints(&v)?
                .into_iter()
                .map(|id| u16::try_from(id).ok())
                .collect::<Option<_>>()?,
        ),
        (FieldKind::ArrayOfRanges { .. }, v @ Value::Array(_)) => FieldValue::Ranges(
            serde_json::from_value::<Vec<RangeEntryArg>>(v)
                .ok()?
                .into_iter()
                .map(RangeEntry::from)
                .collect(),
        ),
        _ => return None,
    })
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), Box<dyn Error>> {
    println!(
        "{}",
        serde_json::to_string_pretty(value)?
            .to_colored_json_with_styler(ColorMode::Auto(Output::StdOut), json_color_styler())?
    );
    Ok(())
}

fn json_color_styler() -> Styler {
    Styler {
        key: Color::Green.foreground(),
        string_value: Color::Blue.bold(),
        integer_value: Color::Magenta.bold(),
        float_value: Color::Magenta.italic(),
        object_brackets: Color::Yellow.bold(),
        array_brackets: Color::Cyan.bold(),
        ..Default::default()
    }
}
