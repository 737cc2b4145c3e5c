//! Injection File Provisioning
//!
//! Runs that analyse simulated signals need an injection file before any
//! job is built. The file is taken from the configuration, found at its
//! conventional location, or produced by an external generator.

use std::path::PathBuf;
use std::process::Command;

use log::{debug, error, info};

use crate::error::{PipeError, Result};

use super::model::Input;

/// Parameters handed to an injection generator.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectionRequest {
    pub outdir: PathBuf,
    pub label: String,
    /// Where the generator must write the file
    pub target: PathBuf,
    pub n_injection: Option<u32>,
}

/// Produces injection files.
pub trait InjectionGenerator {
    /// Writes the injection file to `request.target`.
    fn generate(&self, request: &InjectionRequest) -> std::result::Result<(), String>;
}

/// Generator backed by an external executable.
///
/// Invoked as `<executable> --outdir <dir> --label <label>
/// --injection-file <target> [--n-injection <n>]`.
#[derive(Debug, Clone)]
pub struct CommandInjectionGenerator {
    executable: PathBuf,
}

impl CommandInjectionGenerator {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl InjectionGenerator for CommandInjectionGenerator {
    fn generate(&self, request: &InjectionRequest) -> std::result::Result<(), String> {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("--outdir")
            .arg(&request.outdir)
            .arg("--label")
            .arg(&request.label)
            .arg("--injection-file")
            .arg(&request.target);
        if let Some(n) = request.n_injection {
            cmd.arg("--n-injection").arg(n.to_string());
        }

        debug!("Running injection generator: {:?}", cmd);
        let output = cmd
            .output()
            .map_err(|e| format!("failed to run {}: {}", self.executable.display(), e))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Injection generator stderr:\n{}", stderr);
            Err(format!(
                "{} exited with code {:?}",
                self.executable.display(),
                output.status.code()
            ))
        }
    }
}

/// Makes sure `input` references an injection file when one is requested.
///
/// Resolution order: explicit path, `outdir/<label>_injection_file` if it
/// already exists, then the generator.
pub fn ensure_injection_file(input: &mut Input, generator: Option<&dyn InjectionGenerator>) -> Result<()> {
    if !input.injection() {
        return Ok(());
    }

    if let Some(path) = input.injection_file() {
        debug!("Using configured injection file {}", path.display());
        return Ok(());
    }

    let default_path = input.default_injection_file();
    if default_path.is_file() {
        info!("Using existing injection file {}", default_path.display());
        input.set_injection_file(default_path);
        return Ok(());
    }

    let generator = generator.ok_or_else(|| {
        PipeError::InjectionGeneration(
            "an injection is requested but no injection file or injection-executable was given"
                .to_string(),
        )
    })?;

    let request = InjectionRequest {
        outdir: input.outdir().to_path_buf(),
        label: input.label().to_string(),
        target: default_path.clone(),
        n_injection: input.n_injection(),
    };

    info!("Generating injection file {}", default_path.display());
    generator
        .generate(&request)
        .map_err(PipeError::InjectionGeneration)?;

    if !default_path.is_file() {
        return Err(PipeError::InjectionGeneration(format!(
            "generator finished but {} was not created",
            default_path.display()
        )));
    }

    input.set_injection_file(default_path);
    Ok(())
}
