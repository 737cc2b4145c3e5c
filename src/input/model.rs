//! Run Input Model
//!
//! [`Input`] is the validated, canonical form of a [`RunConfig`]. Every
//! field is checked during construction, so job and graph builders can
//! rely on it without re-validating.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::RunConfig;
use crate::dag::job::ResourceRequest;
use crate::error::{PipeError, Result};

use super::credential;
use super::executable::{resolve_executable, DEFAULT_LIBRARY};
use super::normalize::{normalize_instruments, normalize_samplers};

/// All user input for one run, validated.
#[derive(Debug, Clone, PartialEq)]
pub struct Input {
    label: String,
    outdir: PathBuf,
    ini: Option<PathBuf>,
    instruments: Vec<String>,
    samplers: Vec<String>,
    coherence_test: bool,
    queue: u32,
    accounting: String,
    executable: PathBuf,
    generation_executable: PathBuf,
    credential: Option<PathBuf>,
    require_credential: bool,
    injection: bool,
    injection_file: Option<PathBuf>,
    n_injection: Option<u32>,
    resources: ResourceRequest,
    generation_resources: ResourceRequest,
    passthrough: Vec<String>,
}

/// Labels end up in file and job names.
fn validate_label(label: &str) -> Result<String> {
    let label = label.trim();
    if label.is_empty() {
        return Err(PipeError::invalid("label", "must not be empty"));
    }
    if label.chars().any(|c| c.is_whitespace() || c == '/' || c == '\\') {
        return Err(PipeError::invalid(
            "label",
            format!("\"{}\" must not contain whitespace or path separators", label),
        ));
    }
    Ok(label.to_string())
}

/// Creates `outdir` if needed and returns its absolute form.
fn prepare_outdir(outdir: &Path) -> Result<PathBuf> {
    if !outdir.exists() {
        info!("Creating output directory {}", outdir.display());
    }
    fs::create_dir_all(outdir)
        .map_err(|e| PipeError::io(format!("creating output directory {}", outdir.display()), e))?;
    fs::canonicalize(outdir)
        .map_err(|e| PipeError::io(format!("resolving output directory {}", outdir.display()), e))
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(PipeError::invalid(field, "is required")),
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = env::current_dir().map_err(|e| PipeError::io("reading current directory", e))?;
    Ok(cwd.join(path))
}

impl Input {
    /// Validates a configuration and builds the run input.
    ///
    /// Credential resolution runs last, once everything else is known to be
    /// valid, since it may copy a file into `outdir`.
    ///
    /// # Arguments
    ///
    /// * `config` - Merged configuration
    /// * `passthrough` - Unrecognized command-line tokens
    pub fn from_config(config: &RunConfig, passthrough: Vec<String>) -> Result<Self> {
        debug!("Creating new Input object");
        debug!("Known detector list = {:?}", config.known_detectors);

        let label = validate_label(&config.label)?;
        let instruments = normalize_instruments(&config.detectors, &config.known_detectors)?;
        let samplers = normalize_samplers(&config.sampler)?;

        if config.coherence_test && instruments.len() < 2 {
            return Err(PipeError::invalid(
                "coherence-test",
                format!(
                    "needs at least two detectors, got {:?}; a single-detector run is already coherent",
                    instruments
                ),
            ));
        }

        if config.queue == 0 {
            return Err(PipeError::invalid("queue", "must be at least 1"));
        }

        let accounting = required(&config.accounting, "accounting")?.to_string();

        let library = config
            .exe_library
            .clone()
            .unwrap_or_else(|| DEFAULT_LIBRARY.clone());
        let executable = resolve_executable(required(&config.executable, "executable")?, &library)?;
        let generation_executable = resolve_executable(
            required(&config.generation_executable, "generation-executable")?,
            &library,
        )?;

        let injection_file = config.injection_file.as_deref().map(absolute).transpose()?;
        if injection_file.is_some() && !config.injection {
            debug!("injection-file given without injection; it will be ignored");
        }

        let resources = ResourceRequest {
            memory: config.request_memory.clone(),
            disk: config.request_disk.clone(),
            cpus: config.request_cpus,
        };
        let generation_resources = ResourceRequest {
            memory: config
                .request_memory_generation
                .clone()
                .or_else(|| config.request_memory.clone()),
            ..resources.clone()
        };

        let outdir = prepare_outdir(&config.outdir)?;
        let credential = credential::resolve(config.x509.as_deref(), &config.credential_env, &outdir)?;

        let input = Self {
            label,
            outdir,
            ini: config.ini.clone(),
            instruments,
            samplers,
            coherence_test: config.coherence_test,
            queue: config.queue,
            accounting,
            executable,
            generation_executable,
            credential,
            require_credential: config.require_credential,
            injection: config.injection,
            injection_file: if config.injection { injection_file } else { None },
            n_injection: config.n_injection,
            resources,
            generation_resources,
            passthrough,
        };
        debug!("Input = {:?}", input);
        Ok(input)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Absolute root of every generated artifact.
    pub fn outdir(&self) -> &Path {
        &self.outdir
    }

    pub fn ini(&self) -> Option<&Path> {
        self.ini.as_deref()
    }

    /// Sorted, uppercased, deduplicated detector codes.
    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    pub fn samplers(&self) -> &[String] {
        &self.samplers
    }

    pub fn coherence_test(&self) -> bool {
        self.coherence_test
    }

    pub fn queue(&self) -> u32 {
        self.queue
    }

    pub fn accounting(&self) -> &str {
        &self.accounting
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn generation_executable(&self) -> &Path {
        &self.generation_executable
    }

    /// The resolved credential, if any.
    pub fn credential(&self) -> Option<&Path> {
        self.credential.as_deref()
    }

    pub fn requires_credential(&self) -> bool {
        self.require_credential
    }

    /// Returns the credential, failing if the run requires one and none was resolved.
    ///
    /// `Ok(None)` means no credential is available and none is required.
    pub fn require_credential_path(&self) -> Result<Option<&Path>> {
        match (self.credential(), self.require_credential) {
            (None, true) => Err(PipeError::CredentialUnavailable(
                "a credential is required but none was resolved; pass --x509 or set the credential environment variable"
                    .to_string(),
            )),
            (credential, _) => Ok(credential),
        }
    }

    pub fn injection(&self) -> bool {
        self.injection
    }

    pub fn injection_file(&self) -> Option<&Path> {
        self.injection_file.as_deref()
    }

    pub fn n_injection(&self) -> Option<u32> {
        self.n_injection
    }

    /// Conventional location of a generated injection file.
    pub fn default_injection_file(&self) -> PathBuf {
        self.outdir.join(format!("{}_injection_file", self.label))
    }

    pub fn resources(&self) -> &ResourceRequest {
        &self.resources
    }

    pub fn generation_resources(&self) -> &ResourceRequest {
        &self.generation_resources
    }

    pub fn passthrough(&self) -> &[String] {
        &self.passthrough
    }

    /// Directory receiving scheduler logs.
    pub fn log_directory(&self) -> PathBuf {
        self.outdir.join("logs")
    }

    /// Directory receiving submit files.
    pub fn submit_directory(&self) -> PathBuf {
        self.outdir.join("submit")
    }

    /// Records the injection file once it is known. Only used before any job is built.
    pub(crate) fn set_injection_file(&mut self, path: PathBuf) {
        debug!("Recording injection file {}", path.display());
        self.injection_file = Some(path);
    }
}
