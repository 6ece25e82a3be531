//! Pre-deploy check of the static entry page: one canonical `index.html`
//! and clean UTF-8 text assets.
//!
//! Usage: `check-assets [ROOT]` (defaults to the current directory).

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use ccbagenda::assets::{check_encoding, check_index_copies, CANONICAL_INDEX};

fn run() -> Result<bool> {
    let root = match env::args_os().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => env::current_dir().context("cannot resolve current directory")?,
    };

    let mut issues = check_index_copies(&root)
        .with_context(|| format!("index check failed under {}", root.display()))?;
    issues.extend(
        check_encoding(&root)
            .with_context(|| format!("encoding check failed under {}", root.display()))?,
    );

    if issues.is_empty() {
        println!("OK: {CANONICAL_INDEX} is the only entry page and text assets are clean UTF-8.");
        return Ok(true);
    }
    eprintln!("Asset problems found:");
    for issue in &issues {
        eprintln!("- {issue}");
    }
    Ok(false)
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("check-assets: {err:#}");
            ExitCode::from(2)
        }
    }
}
