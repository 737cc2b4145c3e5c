//! Credential Resolution
//!
//! Locates the X509 proxy (or any file credential) jobs authenticate with.
//! Credentials found through the environment are snapshotted into the run
//! directory, since the source is typically rotated externally.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::{PipeError, Result};

/// Environment variable consulted when no explicit credential is given.
pub const DEFAULT_CREDENTIAL_ENV: &str = "X509_USER_PROXY";

/// Resolves the credential to reference from submit files.
///
/// # Arguments
///
/// * `explicit` - Path given on the command line or in the config file
/// * `env_var` - Environment variable naming the default credential
/// * `dest_dir` - Directory receiving the hidden snapshot
///
/// # Returns
///
/// * `Ok(Some(path))` - Explicit path, or the snapshot of the environment one
/// * `Ok(None)` - Nothing usable in the environment (a warning is logged)
/// * `Err(CredentialNotFound)` - The explicit path is not a file
pub fn resolve(explicit: Option<&Path>, env_var: &str, dest_dir: &Path) -> Result<Option<PathBuf>> {
    resolve_with(explicit, env_var, env::var_os(env_var).map(PathBuf::from), dest_dir)
}

fn resolve_with(
    explicit: Option<&Path>,
    env_var: &str,
    env_value: Option<PathBuf>,
    dest_dir: &Path,
) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(PipeError::CredentialNotFound(path.to_path_buf()));
        }
        let absolute = fs::canonicalize(path)
            .map_err(|e| PipeError::io(format!("resolving {}", path.display()), e))?;
        debug!("Using explicit credential {}", absolute.display());
        return Ok(Some(absolute));
    }

    let Some(cert_path) = env_value else {
        warn!(
            "Environment variable {} not set. Create a proxy with ligo-proxy-init",
            env_var
        );
        return Ok(None);
    };

    if !cert_path.is_file() {
        warn!(
            "Environment variable {} does not point to a file ({}). Create a proxy with ligo-proxy-init",
            env_var,
            cert_path.display()
        );
        return Ok(None);
    }

    snapshot(&cert_path, dest_dir).map(Some)
}

/// Copies `source` to `dest_dir/.<basename>` through a temporary file.
fn snapshot(source: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let basename = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            PipeError::CredentialUnavailable(format!(
                "credential path {} has no usable file name",
                source.display()
            ))
        })?;

    let target = dest_dir.join(format!(".{}", basename));
    let staging = dest_dir.join(format!(".{}.tmp", basename));

    if let Err(e) = fs::copy(source, &staging) {
        let _ = fs::remove_file(&staging);
        return Err(PipeError::io(
            format!("copying credential {} to {}", source.display(), staging.display()),
            e,
        ));
    }
    fs::rename(&staging, &target).map_err(|e| {
        let _ = fs::remove_file(&staging);
        PipeError::io(format!("moving credential into {}", target.display()), e)
    })?;

    info!("Credential snapshot written to {}", target.display());
    Ok(target)
}
