//! Decodes every `.webp` file under `$WEBP_CORPUS`.
//!
//! Run with: `WEBP_CORPUS=~/webp-corpus cargo test --test webp_conformance -- --ignored`
//!
//! Files under a `valid/` subdirectory must decode or be reported as
//! unsupported; everything else only has to be handled without a panic.
#![cfg(not(target_arch = "wasm32"))]

use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use webpcore::{decode_bgra, DecodedImage, ErrorKind};

fn corpus_root() -> Option<PathBuf> {
    let path = PathBuf::from(std::env::var_os("WEBP_CORPUS")?);
    path.is_dir().then_some(path)
}

fn webp_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            webp_files(&path, out);
        } else if path.extension().and_then(|ext| ext.to_str()) == Some("webp") {
            out.push(path);
        }
    }
}

fn is_under_valid(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == "valid")
}

fn check_output(image: &DecodedImage) -> bool {
    image.width > 0
        && image.height > 0
        && image.pixels.len() == image.stride() * image.height as usize
}

#[test]
#[ignore]
fn test_webp_corpus() {
    let Some(root) = corpus_root() else {
        eprintln!("Skipping: set WEBP_CORPUS to a directory of .webp files");
        return;
    };
    let mut files = Vec::new();
    webp_files(&root, &mut files);
    files.sort();
    if files.is_empty() {
        eprintln!("No .webp files found in {}", root.display());
        return;
    }

    let mut decoded = 0;
    let mut unsupported = 0;
    let mut rejected = 0;
    let mut failures = Vec::new();

    for path in &files {
        let Ok(data) = fs::read(path) else {
            continue;
        };
        match catch_unwind(AssertUnwindSafe(|| decode_bgra(&data))) {
            Ok(Ok(image)) => {
                if !check_output(&image) {
                    failures.push(format!("{}: malformed output", path.display()));
                } else if decode_bgra(&data).ok().as_ref() != Some(&image) {
                    failures.push(format!("{}: decoding is not deterministic", path.display()));
                } else {
                    decoded += 1;
                }
            }
            Ok(Err(e)) if e.kind() == ErrorKind::Unsupported => unsupported += 1,
            Ok(Err(e)) => {
                if is_under_valid(path) {
                    failures.push(format!("{}: {e}", path.display()));
                } else {
                    rejected += 1;
                }
            }
            Err(_) => failures.push(format!("{}: panicked", path.display())),
        }
    }

    println!(
        "{} files: {decoded} decoded, {unsupported} unsupported, {rejected} rejected",
        files.len()
    );
    assert!(failures.is_empty(), "failures:\n{}", failures.join("\n"));
}
