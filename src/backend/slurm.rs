//! Slurm Backend
//!
//! Renders one sbatch script per job and a master script that submits them
//! in dependency order, chaining job ids through `--dependency=afterok`.
//! The master script stops at the first submission that fails or returns
//! no job id.

use std::collections::HashMap;
use std::env;
use std::fmt::{self, Write as _};

use log::{debug, info, warn};

use crate::config::RunConfig;
use crate::dag::{DagGraph, JobSpec};
use crate::error::{PipeError, Result};
use crate::input::credential::DEFAULT_CREDENTIAL_ENV;
use crate::input::Input;

use super::{run_submit_command, RenderedDag, SubmissionBackend, SubmitFile};

const DEFAULT_SUBMIT_COMMAND: &str = "bash";
const DEFAULT_SBATCH: &str = "sbatch";

/// Replaces `sbatch` in the master script, for running without a cluster.
pub const FAKE_SBATCH_ENV: &str = "PIPEGEN_FAKE_SBATCH";

const ARRAY_JOB_ID: &str = "${SLURM_ARRAY_JOB_ID:-$SLURM_JOB_ID}";
const ARRAY_TASK_ID: &str = "${SLURM_ARRAY_TASK_ID:-0}";

/// Per-run sbatch settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlurmSettings {
    /// Extra sbatch options, `(name, value)`; a missing value is a bare flag
    pub scheduler_args: Vec<(String, Option<String>)>,
    /// Modules loaded before the job command
    pub modules: Vec<String>,
    /// Environment variables exported before the job command
    pub env: Vec<(String, String)>,
    /// Variable the credential path is exported under
    pub credential_env: String,
    /// Command the master script submits with
    pub sbatch: String,
    pub submit_command: String,
}

impl Default for SlurmSettings {
    fn default() -> Self {
        Self {
            scheduler_args: Vec::new(),
            modules: Vec::new(),
            env: Vec::new(),
            credential_env: DEFAULT_CREDENTIAL_ENV.to_string(),
            sbatch: DEFAULT_SBATCH.to_string(),
            submit_command: DEFAULT_SUBMIT_COMMAND.to_string(),
        }
    }
}

/// Splits `a=1 b=2 flag` into pairs.
fn parse_pairs(text: &str) -> Vec<(String, Option<String>)> {
    text.split_whitespace()
        .map(|token| {
            let token = token.trim_start_matches("--");
            match token.split_once('=') {
                Some((key, value)) => (key.to_string(), Some(value.to_string())),
                None => (token.to_string(), None),
            }
        })
        .collect()
}

impl SlurmSettings {
    pub fn from_config(config: &RunConfig) -> Self {
        let env = config
            .scheduler_env
            .as_deref()
            .map(parse_pairs)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(key, value)| match value {
                Some(value) => Some((key, value)),
                None => {
                    warn!("Ignoring scheduler-env entry '{}' without a value", key);
                    None
                }
            })
            .collect();

        Self {
            scheduler_args: config.scheduler_args.as_deref().map(parse_pairs).unwrap_or_default(),
            modules: config
                .scheduler_module
                .as_deref()
                .map(|m| m.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            env,
            credential_env: config.credential_env.clone(),
            sbatch: env::var(FAKE_SBATCH_ENV).unwrap_or_else(|_| DEFAULT_SBATCH.to_string()),
            submit_command: config
                .submit_command
                .clone()
                .unwrap_or_else(|| DEFAULT_SUBMIT_COMMAND.to_string()),
        }
    }

    fn has_arg(&self, name: &str) -> bool {
        self.scheduler_args.iter().any(|(key, _)| key == name)
    }
}

/// Converts a size such as `4 GB` to sbatch's `4G`.
fn slurm_size(size: &str) -> String {
    let compact: String = size.split_whitespace().collect::<String>().to_uppercase();
    match compact.strip_suffix('B') {
        Some(rest) if rest.ends_with(|c: char| "KMGT".contains(c)) => rest.to_string(),
        _ => compact,
    }
}

fn is_shell_safe(arg: &str) -> bool {
    !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c))
}

/// Quotes one word for bash.
///
/// Words carrying the cluster/process placeholders are double quoted so the
/// Slurm job id variables still expand.
fn shell_word(arg: &str) -> String {
    if JobSpec::substitute(arg, "", "") != arg {
        let escaped = arg
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('$', "\\$")
            .replace('`', "\\`");
        return format!("\"{}\"", JobSpec::substitute(&escaped, ARRAY_JOB_ID, ARRAY_TASK_ID));
    }
    if is_shell_safe(arg) {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

fn format_error(what: &str, e: fmt::Error) -> PipeError {
    PipeError::Backend(format!("failed to format {}: {}", what, e))
}

/// Slurm sbatch backend.
#[derive(Debug, Clone, Default)]
pub struct SlurmBackend {
    settings: SlurmSettings,
}

impl SlurmBackend {
    pub fn new(settings: SlurmSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SlurmSettings {
        &self.settings
    }

    fn write_job(
        &self,
        out: &mut String,
        job: &JobSpec,
        input: &Input,
        credential: Option<String>,
    ) -> fmt::Result {
        let s = &self.settings;
        let (cluster, process) = if job.queue > 1 { ("%A", "%a") } else { ("%j", "0") };
        let stdout = JobSpec::substitute(&job.logs.stdout.display().to_string(), cluster, process);
        let stderr = JobSpec::substitute(&job.logs.stderr.display().to_string(), cluster, process);

        writeln!(out, "#!/bin/bash")?;
        writeln!(out, "#SBATCH --job-name={}", job.name)?;
        writeln!(out, "#SBATCH --output={}", stdout)?;
        writeln!(out, "#SBATCH --error={}", stderr)?;
        if !s.has_arg("account") {
            writeln!(out, "#SBATCH --account={}", input.accounting())?;
        }
        if let Some(memory) = &job.resources.memory {
            writeln!(out, "#SBATCH --mem={}", slurm_size(memory))?;
        }
        if let Some(cpus) = job.resources.cpus {
            writeln!(out, "#SBATCH --cpus-per-task={}", cpus)?;
        }
        if let Some(disk) = &job.resources.disk {
            writeln!(out, "#SBATCH --tmp={}", slurm_size(disk))?;
        }
        if job.queue > 1 {
            writeln!(out, "#SBATCH --array=0-{}", job.queue - 1)?;
        }
        for (name, value) in &s.scheduler_args {
            match value {
                Some(value) => writeln!(out, "#SBATCH --{}={}", name, value)?,
                None => writeln!(out, "#SBATCH --{}", name)?,
            }
        }
        writeln!(out)?;

        for module in &s.modules {
            writeln!(out, "module load {}", module)?;
        }
        for (key, value) in &s.env {
            writeln!(out, "export {}={}", key, shell_word(value))?;
        }
        if let Some(credential) = credential {
            writeln!(out, "export {}={}", s.credential_env, shell_word(&credential))?;
        }

        let mut command = vec![shell_word(&job.executable.display().to_string())];
        command.extend(job.arguments.iter().map(|a| shell_word(a)));
        writeln!(out, "{}", command.join(" "))
    }

    fn render_job(&self, job: &JobSpec, input: &Input) -> Result<String> {
        let credential = input
            .require_credential_path()?
            .map(|p| p.display().to_string());

        let mut out = String::new();
        self.write_job(&mut out, job, input, credential)
            .map_err(|e| format_error(&job.name, e))?;
        Ok(out)
    }

    fn write_master(&self, out: &mut String, order: &[&JobSpec], input: &Input) -> fmt::Result {
        let submit_dir = input.submit_directory();
        let sbatch = shell_word(&self.settings.sbatch);
        let mut ids: HashMap<&str, String> = HashMap::new();

        writeln!(out, "#!/bin/bash")?;
        writeln!(out, "set -euo pipefail")?;
        writeln!(out)?;

        for (i, job) in order.iter().enumerate() {
            let var = format!("jid{}", i);
            let script = submit_dir.join(format!("{}.sh", job.name));

            let parents: Vec<String> = job
                .parents
                .iter()
                .filter_map(|p| ids.get(p.as_str()))
                .map(|v| format!("${{{}}}", v))
                .collect();
            let dependency = if parents.is_empty() {
                String::new()
            } else {
                format!(" --dependency=afterok:{}", parents.join(":"))
            };

            writeln!(out, "# {}", job.name)?;
            writeln!(
                out,
                "{}=$({} --parsable{} {})",
                var,
                sbatch,
                dependency,
                shell_word(&script.display().to_string())
            )?;
            // --parsable prints "jobid[;cluster]"
            writeln!(out, "{}=${{{}%%;*}}", var, var)?;
            writeln!(
                out,
                "[ -n \"${{{}}}\" ] || {{ echo \"No job id returned for {}\" >&2; exit 1; }}",
                var, job.name
            )?;
            writeln!(out, "echo \"Submitted {} as job ${{{}}}\"", job.name, var)?;
            ids.insert(job.name.as_str(), var);
        }
        Ok(())
    }

    fn render_master(&self, graph: &DagGraph, input: &Input) -> Result<String> {
        let order = graph.topological_order()?;
        let mut out = String::new();
        self.write_master(&mut out, &order, input)
            .map_err(|e| format_error("master script", e))?;
        Ok(out)
    }
}

impl SubmissionBackend for SlurmBackend {
    fn name(&self) -> &'static str {
        "slurm"
    }

    fn render(&self, graph: &DagGraph, input: &Input) -> Result<RenderedDag> {
        let submit_dir = input.submit_directory();
        let master = submit_dir.join(format!("{}_master_slurm.sh", input.label()));
        let mut rendered = RenderedDag::new(&master);

        for job in graph.jobs() {
            let path = submit_dir.join(format!("{}.sh", job.name));
            debug!("Rendering sbatch script {}", path.display());
            rendered.push(SubmitFile::script(path, self.render_job(job, input)?));
        }
        rendered.push(SubmitFile::script(&master, self.render_master(graph, input)?));

        info!("Rendered {} slurm scripts", graph.len());
        Ok(rendered)
    }

    fn submit(&self, rendered: &RenderedDag) -> Result<()> {
        info!("Running {}", rendered.entry_point().display());
        run_submit_command(&self.settings.submit_command, [rendered.entry_point()])
    }
}
