//! Finding the preload library and the exerciser binary.

use std::path::{Path, PathBuf};

use anyhow::Result;

pub const PRELOAD_LIBRARY: &str = "libfsfault_preload.so";
pub const EXERCISER_BINARY: &str = "fsfault-exerciser";

/// Directory of the running executable (the cargo target dir during development).
fn exe_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
}

/// Integration test binaries live one level below the artifacts in `deps/`.
fn candidates(configured: Option<&Path>, file: &str) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = configured {
        candidates.push(path.to_path_buf());
    }
    if let Some(dir) = exe_dir() {
        candidates.push(dir.join(file));
        if dir.ends_with("deps") {
            if let Some(parent) = dir.parent() {
                candidates.push(parent.join(file));
            }
        }
    }
    candidates.push(PathBuf::from("target/release").join(file));
    candidates.push(PathBuf::from("target/debug").join(file));
    candidates.push(PathBuf::from("/usr/local/lib/fsfault").join(file));
    candidates
}

pub fn find_preload_library(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(found) = candidates(configured, PRELOAD_LIBRARY).into_iter().find(|c| c.exists()) {
        return Ok(found);
    }
    anyhow::bail!(
        "Could not find the fsfault preload library.\n\
        Build with: cargo build -p fsfault-preload --release\n\
        Expected at: target/release/{PRELOAD_LIBRARY}"
    );
}

pub fn find_exerciser(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(found) = candidates(configured, EXERCISER_BINARY).into_iter().find(|c| c.exists()) {
        return Ok(found);
    }
    anyhow::bail!(
        "Could not find {EXERCISER_BINARY}.\n\
        Build with: cargo build -p fsfault-exerciser --release"
    );
}

/// `LD_PRELOAD` value with `library` first, keeping anything already preloaded.
pub fn preload_value(library: &Path, existing: Option<&str>) -> String {
    match existing {
        Some(existing) if !existing.trim().is_empty() => {
            format!("{}:{}", library.display(), existing)
        }
        _ => library.display().to_string(),
    }
}
