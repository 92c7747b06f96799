use proc_macro2::TokenStream;
use quote::quote;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::{env, fs};
use walkdir::WalkDir;

const FIXTURES_DIR: &str = "tests/data";

fn main() -> Result<(), Box<dyn Error>> {
    println!("cargo::rerun-if-changed={FIXTURES_DIR}");
    generate_fixture_tests()
}

/// Writes one test case per JSON fixture, named after the section directory and the file.
fn generate_fixture_tests() -> Result<(), Box<dyn Error>> {
    let mut fixtures = find_fixtures().collect::<Vec<_>>();
    fixtures.sort();

    let test_cases = fixtures.iter().filter_map(|path| test_case_for(path));
    let token_stream = quote! {
        use test_case::test_case;
        #(#test_cases)*
        fn fixture(filename: &str) {
            let fixture = crate::common::Fixture::load_from_file(filename).unwrap();
            fixture.assert_json_matches();
            fixture.assert_reencodes();
        }
    };
    let syntax_tree = syn::parse2(token_stream)?;
    let pretty = prettyplease::unparse(&syntax_tree);

    let out_dir = env::var("OUT_DIR")?;
    let dest_path = Path::new(&out_dir).join("fixture_tests.rs");
    fs::write(dest_path, pretty)?;

    Ok(())
}

fn find_fixtures() -> impl Iterator<Item = PathBuf> {
    WalkDir::new(FIXTURES_DIR)
        .into_iter()
        .flatten()
        .filter(|entry| {
            entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .is_some_and(|ext| ext == "json")
        })
        .map(|e| e.into_path())
}

fn test_case_for(path: &Path) -> Option<TokenStream> {
    let file = path.to_str()?;
    let stem = path.file_stem()?.to_str()?;
    let name = match path.parent().and_then(Path::file_name).and_then(|s| s.to_str()) {
        Some(dir) if dir != "data" => format!("{dir} {stem}"),
        _ => stem.to_string(),
    };
    Some(quote! {
        #[test_case(#file ; #name)]
    })
}
