//! Job Specifications
//!
//! Scheduler-neutral descriptions of the jobs in a run. Backends translate
//! these into HTCondor submit files or Slurm scripts.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Placeholder replaced by the scheduler's cluster/array id.
pub const CLUSTER_PLACEHOLDER: &str = "{cluster}";

/// Placeholder replaced by the scheduler's process/task index.
pub const PROCESS_PLACEHOLDER: &str = "{process}";

/// What a job does in the pipeline.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Produces the data every analysis consumes
    Generation,
    /// Runs one (detector subset, sampler) combination
    Analysis,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generation => write!(f, "generation"),
            Self::Analysis => write!(f, "analysis"),
        }
    }
}

/// Resource request forwarded to the scheduler.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceRequest {
    /// Memory, e.g. "4 GB"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// Disk, e.g. "2 GB"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<u32>,
}

/// Log file locations for a job.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    /// Scheduler event log
    pub submit_log: PathBuf,
}

impl LogPaths {
    /// Standard log layout for `name` under `log_dir`.
    ///
    /// Output and error files carry the cluster/process placeholders so
    /// queued instances do not overwrite each other.
    pub fn for_job(log_dir: &Path, name: &str) -> Self {
        let instance = format!("{}_{}_{}", name, CLUSTER_PLACEHOLDER, PROCESS_PLACEHOLDER);
        Self {
            stdout: log_dir.join(format!("{}.out", instance)),
            stderr: log_dir.join(format!("{}.err", instance)),
            submit_log: log_dir.join(format!("{}.log", name)),
        }
    }
}

/// A single job in the graph.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Unique, deterministic job name
    pub name: String,

    pub role: Role,

    pub executable: PathBuf,

    /// Detector subset analysed (empty for generation)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instruments: Vec<String>,

    /// Sampler used (empty for generation)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sampler: String,

    /// Full argument list, may contain cluster/process placeholders
    pub arguments: Vec<String>,

    pub logs: LogPaths,

    #[serde(default)]
    pub resources: ResourceRequest,

    /// Number of instances to queue
    pub queue: u32,

    /// Names of jobs that must finish first
    #[serde(default)]
    pub parents: BTreeSet<String>,
}

impl JobSpec {
    /// Creates a job with no arguments, default resources and a queue of one.
    ///
    /// # Example
    ///
    /// ```
    /// use std::path::Path;
    /// use pipegen::dag::job::{JobSpec, Role};
    ///
    /// let job = JobSpec::new("run_H1L1_dynesty", Role::Analysis, "/opt/bin/analysis", Path::new("/out/logs"))
    ///     .with_arguments(vec!["--sampler".into(), "dynesty".into()])
    ///     .with_queue(4)
    ///     .depends_on("run_generation");
    /// assert_eq!(job.parents.len(), 1);
    /// ```
    pub fn new(name: impl Into<String>, role: Role, executable: impl Into<PathBuf>, log_dir: &Path) -> Self {
        let name = name.into();
        let logs = LogPaths::for_job(log_dir, &name);
        Self {
            name,
            role,
            executable: executable.into(),
            instruments: Vec::new(),
            sampler: String::new(),
            arguments: Vec::new(),
            logs,
            resources: ResourceRequest::default(),
            queue: 1,
            parents: BTreeSet::new(),
        }
    }

    pub fn with_instruments(mut self, instruments: Vec<String>) -> Self {
        self.instruments = instruments;
        self
    }

    pub fn with_sampler(mut self, sampler: impl Into<String>) -> Self {
        self.sampler = sampler.into();
        self
    }

    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_resources(mut self, resources: ResourceRequest) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_queue(mut self, queue: u32) -> Self {
        self.queue = queue;
        self
    }

    /// Adds a dependency on another job.
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.parents.insert(name.into());
        self
    }

    /// Arguments joined into one command-line string.
    pub fn argument_string(&self) -> String {
        self.arguments.join(" ")
    }

    /// Replaces the cluster/process placeholders with scheduler-native macros.
    pub fn substitute(text: &str, cluster: &str, process: &str) -> String {
        text.replace(CLUSTER_PLACEHOLDER, cluster)
            .replace(PROCESS_PLACEHOLDER, process)
    }
}
