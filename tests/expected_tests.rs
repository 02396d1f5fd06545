//! Test runner comparing compiler output against .expected sidecar files.
//!
//! Each tests/cases/*.chtl fixture has a .expected file listing, one per
//! line, substrings that must appear in the concatenated html/css/js
//! output. Lines starting with `!` must NOT appear; `#` lines are comments.
//!
//! Run with: cargo test --test expected_tests

use libtest_mimic::{Arguments, Failed, Trial};
use std::fs;
use std::path::{Path, PathBuf};

fn collect_case_files() -> Vec<PathBuf> {
    let pattern = format!("{}/tests/cases/*.chtl", env!("CARGO_MANIFEST_DIR"));
    let mut files: Vec<PathBuf> = glob::glob(&pattern)
        .expect("valid glob pattern")
        .filter_map(|entry| entry.ok())
        .collect();
    files.sort();
    files
}

fn run_case(path: &Path) -> Result<(), Failed> {
    let source = fs::read_to_string(path)
        .map_err(|e| Failed::from(format!("failed to read {}: {}", path.display(), e)))?;
    let expected_path = path.with_extension("expected");
    let expectations = fs::read_to_string(&expected_path).map_err(|e| {
        Failed::from(format!("missing expected file {}: {}", expected_path.display(), e))
    })?;

    let output = chtl_compiler::compile(&source).map_err(|error| {
        Failed::from(format!("{} failed to compile: {}", path.display(), error))
    })?;
    let combined = format!("{}\n{}\n{}", output.html, output.css, output.js);

    for line in expectations.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(forbidden) = line.strip_prefix('!') {
            let forbidden = forbidden.trim();
            if combined.contains(forbidden) {
                return Err(Failed::from(format!(
                    "{}: output must not contain {:?}\n--- output ---\n{}",
                    path.display(),
                    forbidden,
                    combined
                )));
            }
        } else if !combined.contains(line) {
            return Err(Failed::from(format!(
                "{}: output missing {:?}\n--- output ---\n{}",
                path.display(),
                line,
                combined
            )));
        }
    }
    Ok(())
}

fn main() {
    let args = Arguments::from_args();

    let trials: Vec<Trial> = collect_case_files()
        .into_iter()
        .map(|path| {
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("case")
                .to_string();
            Trial::test(name, move || run_case(&path))
        })
        .collect();

    libtest_mimic::run(&args, trials).exit();
}
