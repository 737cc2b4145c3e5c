//! Executable Resolution
//!
//! Jobs name their executable either as a path or as a script in the
//! executable library.
//!
//! # Library Resolution Priority
//!
//! 1. Production path: `lib_scripts/` next to the pipegen executable
//! 2. Development path: `{project_root}/lib_scripts`

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info};
use once_cell::sync::Lazy;

use crate::error::{PipeError, Result};

/// Directory name of the bundled executable library.
const EXECUTABLE_LIBRARY: &str = "lib_scripts";

/// Lazily-initialized path to the default executable library.
pub static DEFAULT_LIBRARY: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let prod_path = exe_dir.join(EXECUTABLE_LIBRARY);
            if prod_path.is_dir() {
                info!("Using production executable library: {}", prod_path.display());
                return prod_path;
            }
        }
    }

    let dev_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(EXECUTABLE_LIBRARY);
    debug!("Using development executable library: {}", dev_path.display());
    dev_path
});

/// Resolves an executable name to an absolute path.
///
/// Tries, in order: `name` as a file path, `library/name`, `library/name.py`.
pub fn resolve_executable(name: &str, library: &Path) -> Result<PathBuf> {
    let candidates = [
        PathBuf::from(name),
        library.join(name),
        library.join(format!("{}.py", name)),
    ];

    for candidate in &candidates {
        if candidate.is_file() {
            let absolute = fs::canonicalize(candidate)
                .map_err(|e| PipeError::io(format!("resolving {}", candidate.display()), e))?;
            debug!("Executable '{}' resolved to {}", name, absolute.display());
            return Ok(absolute);
        }
    }

    Err(PipeError::ExecutableNotFound {
        name: name.to_string(),
        library: library.to_path_buf(),
    })
}

/// Prints the `--help` output of an executable.
pub fn print_executable_help(executable: &Path) -> Result<()> {
    info!("Printing help message for {}", executable.display());
    let output = Command::new(executable)
        .arg("--help")
        .output()
        .map_err(|e| PipeError::io(format!("running {} --help", executable.display()), e))?;

    print!("{}", String::from_utf8_lossy(&output.stdout));
    eprint!("{}", String::from_utf8_lossy(&output.stderr));
    Ok(())
}
