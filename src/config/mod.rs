//! Run Configuration
//!
//! Loads the analysis configuration file and merges command-line overrides
//! into a single resolved [`RunConfig`].
//!
//! # Example Configuration
//!
//! ```yaml
//! label: GW150914
//! outdir: outdir_GW150914
//! accounting: ligo.dev.o3.cbc.pe.lalinference
//! executable: bbh_from_gracedb
//! generation-executable: data_generation
//! detectors: H1 L1
//! sampler: [dynesty, nestle]
//! coherence-test: true
//! request-memory: 4 GB
//! ```

pub mod cli;

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::{PipeError, Result};
use crate::input::credential::DEFAULT_CREDENTIAL_ENV;
use crate::input::normalize::RawParameter;

pub use cli::{parse_arguments, CliArgs};

/// Detectors every run may draw from unless the configuration says otherwise.
pub const DEFAULT_KNOWN_DETECTORS: &[&str] = &["H1", "L1", "V1"];

/// Scheduler family the job graph is rendered for.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// HTCondor DAGMan
    #[default]
    #[serde(alias = "htcondor")]
    Condor,
    /// Slurm sbatch dependency chain
    Slurm,
}

/// Fully merged configuration for one invocation.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct RunConfig {
    /// Path of the configuration file this was loaded from
    #[serde(skip)]
    pub ini: Option<PathBuf>,

    #[serde(default = "default_label")]
    pub label: String,

    #[serde(default = "default_outdir")]
    pub outdir: PathBuf,

    #[serde(default = "default_detectors")]
    pub detectors: RawParameter,

    #[serde(default = "default_known_detectors")]
    pub known_detectors: Vec<String>,

    #[serde(default = "default_sampler")]
    pub sampler: RawParameter,

    #[serde(default)]
    pub coherence_test: bool,

    #[serde(default = "default_queue")]
    pub queue: u32,

    /// Accounting group forwarded to the scheduler
    #[serde(default)]
    pub accounting: Option<String>,

    /// Analysis executable (path or library name)
    #[serde(default)]
    pub executable: Option<String>,

    /// Data-generation executable (path or library name)
    #[serde(default)]
    pub generation_executable: Option<String>,

    #[serde(default)]
    pub exe_library: Option<PathBuf>,

    /// Explicit credential path
    #[serde(default)]
    pub x509: Option<PathBuf>,

    #[serde(default = "default_credential_env")]
    pub credential_env: String,

    #[serde(default)]
    pub require_credential: bool,

    #[serde(default)]
    pub injection: bool,

    #[serde(default)]
    pub injection_file: Option<PathBuf>,

    #[serde(default)]
    pub injection_executable: Option<String>,

    #[serde(default)]
    pub n_injection: Option<u32>,

    #[serde(default)]
    pub request_memory: Option<String>,

    #[serde(default)]
    pub request_memory_generation: Option<String>,

    #[serde(default)]
    pub request_disk: Option<String>,

    #[serde(default)]
    pub request_cpus: Option<u32>,

    #[serde(default)]
    pub scheduler: SchedulerKind,

    /// Extra `key=value` pairs for the scheduler, space separated
    #[serde(default)]
    pub scheduler_args: Option<String>,

    /// Modules loaded before each Slurm job, space separated
    #[serde(default)]
    pub scheduler_module: Option<String>,

    /// Environment `key=value` pairs exported in each Slurm job
    #[serde(default)]
    pub scheduler_env: Option<String>,

    #[serde(default = "default_universe")]
    pub universe: String,

    #[serde(default = "default_getenv")]
    pub getenv: bool,

    #[serde(default = "default_notification")]
    pub notification: String,

    #[serde(default)]
    pub requirements: Option<String>,

    #[serde(default)]
    pub retry: Option<u32>,

    /// Overrides the scheduler's submit command
    #[serde(default)]
    pub submit_command: Option<String>,

    #[serde(default)]
    pub submit: bool,

    #[serde(default)]
    pub verbose: bool,
}

fn default_label() -> String {
    "LABEL".to_string()
}

fn default_outdir() -> PathBuf {
    PathBuf::from("pipegen_outdir")
}

fn default_detectors() -> RawParameter {
    RawParameter::from(vec!["H1", "L1"])
}

fn default_known_detectors() -> Vec<String> {
    DEFAULT_KNOWN_DETECTORS.iter().map(|d| d.to_string()).collect()
}

fn default_sampler() -> RawParameter {
    RawParameter::from("dynesty")
}

fn default_queue() -> u32 {
    1
}

fn default_credential_env() -> String {
    DEFAULT_CREDENTIAL_ENV.to_string()
}

fn default_universe() -> String {
    "vanilla".to_string()
}

fn default_getenv() -> bool {
    true
}

fn default_notification() -> String {
    "never".to_string()
}

impl RunConfig {
    /// Builds a configuration from a YAML mapping.
    pub fn from_mapping(mapping: Mapping) -> Result<Self> {
        serde_yaml::from_value(Value::Mapping(mapping))
            .map_err(|e| PipeError::Config(format!("{}. Check the configuration keys and value types.", e)))
    }

    /// Parses a configuration from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Self::from_mapping(parse_mapping(content)?)
    }

    /// Default log filter for this run.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

/// Parses YAML text that must be a mapping; an empty document is an empty mapping.
fn parse_mapping(content: &str) -> Result<Mapping> {
    let value: Value = serde_yaml::from_str(content).map_err(|e| {
        PipeError::Config(format!("Failed to parse configuration: {}. Check the file format.", e))
    })?;

    match value {
        Value::Null => Ok(Mapping::new()),
        Value::Mapping(m) => Ok(m),
        _ => Err(PipeError::Config(
            "configuration must be a mapping of keys to values".to_string(),
        )),
    }
}

/// Loads a configuration file and applies command-line overrides on top.
///
/// # Arguments
///
/// * `path` - Path to the configuration file
/// * `overrides` - Values given on the command line; these win over the file
///
/// # Example
///
/// ```rust,no_run
/// use pipegen::config::load_config;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_config("run.yaml", Default::default())?;
///     println!("Label: {}", config.label);
///     Ok(())
/// }
/// ```
pub fn load_config(path: impl AsRef<Path>, overrides: Mapping) -> Result<RunConfig> {
    let path = path.as_ref();
    info!("Loading configuration from: {}", path.display());

    let content = fs::read_to_string(path).map_err(|e| {
        PipeError::Config(format!(
            "Failed to read configuration file '{}': {}. Check that the file exists and is readable.",
            path.display(),
            e
        ))
    })?;

    let mut mapping = parse_mapping(&content)?;
    debug!("Configuration file sets {} keys", mapping.len());

    for (key, value) in overrides {
        debug!("Command-line override: {:?} = {:?}", key, value);
        mapping.insert(key, value);
    }

    let mut config = RunConfig::from_mapping(mapping)?;
    config.ini = Some(
        fs::canonicalize(path).map_err(|e| PipeError::io(format!("resolving {}", path.display()), e))?,
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = RunConfig::from_yaml_str("").unwrap();
        assert_eq!(config.label, "LABEL");
        assert_eq!(config.outdir, PathBuf::from("pipegen_outdir"));
        assert_eq!(config.detectors, RawParameter::from(vec!["H1", "L1"]));
        assert_eq!(config.known_detectors, vec!["H1", "L1", "V1"]);
        assert_eq!(config.sampler, RawParameter::from("dynesty"));
        assert_eq!(config.queue, 1);
        assert_eq!(config.scheduler, SchedulerKind::Condor);
        assert_eq!(config.credential_env, "X509_USER_PROXY");
        assert_eq!(config.universe, "vanilla");
        assert!(config.getenv);
        assert!(!config.coherence_test);
        assert!(config.accounting.is_none());
    }

    #[test]
    fn test_kebab_case_keys() {
        let config = RunConfig::from_yaml_str(
            "coherence-test: true\nrequest-memory: 4 GB\nscheduler: slurm\nn-injection: 3\n",
        )
        .unwrap();
        assert!(config.coherence_test);
        assert_eq!(config.request_memory.as_deref(), Some("4 GB"));
        assert_eq!(config.scheduler, SchedulerKind::Slurm);
        assert_eq!(config.n_injection, Some(3));
    }

    #[test]
    fn test_verbose_from_file_or_command_line() {
        assert_eq!(RunConfig::from_yaml_str("").unwrap().log_filter(), "info");
        assert_eq!(RunConfig::from_yaml_str("verbose: true").unwrap().log_filter(), "debug");

        let dir = tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        fs::write(&path, "label: quiet\n").unwrap();
        let cli = crate::config::parse_arguments(&[
            "pipegen".to_string(),
            path.display().to_string(),
            "--verbose".to_string(),
        ])
        .unwrap();

        let config = load_config(&path, cli.overrides).unwrap();
        assert_eq!(config.log_filter(), "debug");
    }

    #[test]
    fn test_htcondor_alias() {
        let config = RunConfig::from_yaml_str("scheduler: htcondor").unwrap();
        assert_eq!(config.scheduler, SchedulerKind::Condor);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config = RunConfig::from_yaml_str("prior-file: bbh.prior\nlabel: run1").unwrap();
        assert_eq!(config.label, "run1");
    }

    #[test]
    fn test_non_mapping_rejected() {
        assert!(matches!(
            RunConfig::from_yaml_str("- a\n- b"),
            Err(PipeError::Config(_))
        ));
    }

    #[test]
    fn test_bad_value_type_rejected() {
        assert!(matches!(
            RunConfig::from_yaml_str("queue: many"),
            Err(PipeError::Config(_))
        ));
    }

    #[test]
    fn test_overrides_win_over_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        fs::write(&path, "label: from_file\nqueue: 2\n").unwrap();

        let mut overrides = Mapping::new();
        overrides.insert(Value::from("label"), Value::from("from_cli"));

        let config = load_config(&path, overrides).unwrap();
        assert_eq!(config.label, "from_cli");
        assert_eq!(config.queue, 2);
        assert_eq!(config.ini, Some(fs::canonicalize(&path).unwrap()));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = load_config(dir.path().join("absent.yaml"), Mapping::new()).unwrap_err();
        assert!(err.to_string().contains("absent.yaml"));
    }
}
