//! Automation for the tierq workspace.
//!
//! Usage: `cargo xtask ci | lint | coverage [--lcov]`

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

/// Attributes every library crate root must carry.
const REQUIRED_CRATE_ATTRS: &[&str] = &["#![forbid(unsafe_code)]", "#![deny(missing_docs)]"];

/// Crate that may only appear under `[dev-dependencies]`.
const TEST_ONLY_CRATE: &str = "tierq-test-utils";

#[derive(Parser)]
#[command(name = "xtask", about = "tierq workspace automation")]
struct Cli {
    #[command(subcommand)]
    command: Task,
}

#[derive(Subcommand)]
enum Task {
    /// Lint, format check, clippy, tests and docs
    Ci,
    /// Check crate naming, crate attributes and dependency placement
    Lint,
    /// Line coverage through cargo-llvm-cov
    Coverage {
        /// Write lcov.info instead of an HTML report
        #[arg(long)]
        lcov: bool,
    },
}

fn main() -> Result<()> {
    match Cli::parse().command {
        Task::Ci => ci(),
        Task::Lint => lint(),
        Task::Coverage { lcov } => coverage(lcov),
    }
}

fn ci() -> Result<()> {
    lint()?;
    cargo(&["fmt", "--all", "--check"])?;
    cargo(&["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"])?;
    cargo(&["test", "--workspace"])?;
    cargo(&["doc", "--workspace", "--no-deps"])?;
    println!("ci: ok");
    Ok(())
}

fn lint() -> Result<()> {
    for dir in crate_dirs()? {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !name.starts_with("tierq-") {
            bail!("crates/{name}: crate directories must be named tierq-*");
        }
        check_crate_root(&dir.join("src").join("lib.rs"))?;
        if name != TEST_ONLY_CRATE {
            check_test_utils_placement(&dir.join("Cargo.toml"))?;
        }
    }
    println!("lint: ok");
    Ok(())
}

fn crate_dirs() -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir("crates").context("reading crates/")? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn check_crate_root(lib_rs: &Path) -> Result<()> {
    let source = std::fs::read_to_string(lib_rs)
        .with_context(|| format!("reading {}", lib_rs.display()))?;
    for attr in REQUIRED_CRATE_ATTRS {
        if !source.contains(attr) {
            bail!("{}: missing {attr}", lib_rs.display());
        }
    }
    Ok(())
}

/// Fails if the test utilities crate is a regular dependency.
fn check_test_utils_placement(manifest: &Path) -> Result<()> {
    let text = std::fs::read_to_string(manifest)
        .with_context(|| format!("reading {}", manifest.display()))?;
    let mut section = "";
    for line in text.lines().map(str::trim) {
        if line.starts_with('[') {
            section = line;
        } else if line.starts_with(TEST_ONLY_CRATE) && section != "[dev-dependencies]" {
            bail!(
                "{}: {TEST_ONLY_CRATE} listed under {section}",
                manifest.display()
            );
        }
    }
    Ok(())
}

fn coverage(lcov: bool) -> Result<()> {
    if lcov {
        cargo(&["llvm-cov", "--workspace", "--lcov", "--output-path", "lcov.info"])?;
        println!("coverage: lcov.info");
    } else {
        cargo(&["llvm-cov", "--workspace", "--html"])?;
        println!("coverage: target/llvm-cov/html/index.html");
    }
    Ok(())
}

fn cargo(args: &[&str]) -> Result<()> {
    let rendered = args.join(" ");
    println!("> cargo {rendered}");
    let status = Command::new("cargo")
        .args(args)
        .status()
        .with_context(|| format!("spawning cargo {rendered}"))?;
    if !status.success() {
        bail!("cargo {rendered} exited with {status}");
    }
    Ok(())
}
