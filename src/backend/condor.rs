//! HTCondor Backend
//!
//! Renders one submit file per job plus a DAGMan file wiring them together.
//! The DAG file is what gets handed to `condor_submit_dag`.

use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::RunConfig;
use crate::dag::{DagGraph, JobSpec};
use crate::error::{PipeError, Result};
use crate::input::Input;

use super::{run_submit_command, RenderedDag, SubmissionBackend, SubmitFile};

const DEFAULT_SUBMIT_COMMAND: &str = "condor_submit_dag";

/// Submit-file settings shared by every job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondorSettings {
    pub universe: String,
    pub getenv: bool,
    pub notification: String,
    pub requirements: Option<String>,
    /// DAGMan retries per job
    pub retry: Option<u32>,
    pub submit_command: String,
}

impl Default for CondorSettings {
    fn default() -> Self {
        Self {
            universe: "vanilla".to_string(),
            getenv: true,
            notification: "never".to_string(),
            requirements: None,
            retry: None,
            submit_command: DEFAULT_SUBMIT_COMMAND.to_string(),
        }
    }
}

impl CondorSettings {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            universe: config.universe.clone(),
            getenv: config.getenv,
            notification: config.notification.clone(),
            requirements: config.requirements.clone(),
            retry: config.retry,
            submit_command: config
                .submit_command
                .clone()
                .unwrap_or_else(|| DEFAULT_SUBMIT_COMMAND.to_string()),
        }
    }
}

/// Quotes one argument for the submit-file `arguments` line.
///
/// Arguments containing whitespace or quotes are wrapped in single quotes;
/// embedded quotes are doubled.
fn quote_argument(arg: &str) -> String {
    let escaped = arg.replace('"', "\"\"");
    if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '\'') {
        format!("'{}'", escaped.replace('\'', "''"))
    } else {
        escaped
    }
}

/// HTCondor DAGMan backend.
#[derive(Debug, Clone, Default)]
pub struct CondorBackend {
    settings: CondorSettings,
}

impl CondorBackend {
    pub fn new(settings: CondorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CondorSettings {
        &self.settings
    }

    fn write_job(
        &self,
        out: &mut String,
        job: &JobSpec,
        input: &Input,
        credential: Option<&Path>,
    ) -> fmt::Result {
        let s = &self.settings;
        let sub = |text: String| JobSpec::substitute(&text, "$(Cluster)", "$(Process)");

        writeln!(out, "universe = {}", s.universe)?;
        writeln!(out, "executable = {}", job.executable.display())?;
        if let Some(memory) = &job.resources.memory {
            writeln!(out, "request_memory = {}", memory)?;
        }
        if let Some(disk) = &job.resources.disk {
            writeln!(out, "request_disk = {}", disk)?;
        }
        if let Some(cpus) = job.resources.cpus {
            writeln!(out, "request_cpus = {}", cpus)?;
        }
        writeln!(out, "getenv = {}", if s.getenv { "True" } else { "False" })?;
        writeln!(out, "notification = {}", s.notification)?;
        if let Some(requirements) = &s.requirements {
            writeln!(out, "requirements = {}", requirements)?;
        }
        writeln!(out, "log = {}", job.logs.submit_log.display())?;
        writeln!(out, "output = {}", sub(job.logs.stdout.display().to_string()))?;
        writeln!(out, "error = {}", sub(job.logs.stderr.display().to_string()))?;
        writeln!(out, "accounting_group = {}", input.accounting())?;
        if let Some(credential) = credential {
            writeln!(out, "x509userproxy = {}", credential.display())?;
        }

        let arguments: Vec<String> = job
            .arguments
            .iter()
            .map(|a| quote_argument(&sub(a.clone())))
            .collect();
        writeln!(out, "arguments = \"{}\"", arguments.join(" "))?;
        writeln!(out, "queue {}", job.queue)
    }

    fn render_job(&self, job: &JobSpec, input: &Input) -> Result<String> {
        let credential = input.require_credential_path()?;
        let mut out = String::new();
        self.write_job(&mut out, job, input, credential)
            .map_err(|e| PipeError::Backend(format!("failed to format {}: {}", job.name, e)))?;
        Ok(out)
    }

    fn write_dag(&self, out: &mut String, graph: &DagGraph, submit_dir: &Path) -> fmt::Result {
        for job in graph.jobs() {
            let path = submit_dir.join(format!("{}.submit", job.name));
            writeln!(out, "JOB {} {}", job.name, path.display())?;
        }
        if let Some(retry) = self.settings.retry {
            for job in graph.jobs() {
                writeln!(out, "RETRY {} {}", job.name, retry)?;
            }
        }
        for parent in graph.jobs() {
            let children: Vec<&str> = graph
                .jobs()
                .iter()
                .filter(|j| j.parents.contains(&parent.name))
                .map(|j| j.name.as_str())
                .collect();
            if !children.is_empty() {
                writeln!(out, "PARENT {} CHILD {}", parent.name, children.join(" "))?;
            }
        }
        Ok(())
    }

    fn render_dag(&self, graph: &DagGraph, submit_dir: &Path) -> Result<String> {
        let mut out = String::new();
        self.write_dag(&mut out, graph, submit_dir)
            .map_err(|e| PipeError::Backend(format!("failed to format {}: {}", graph.name(), e)))?;
        Ok(out)
    }
}

impl SubmissionBackend for CondorBackend {
    fn name(&self) -> &'static str {
        "condor"
    }

    fn render(&self, graph: &DagGraph, input: &Input) -> Result<RenderedDag> {
        let submit_dir = input.submit_directory();
        let dag_path: PathBuf = submit_dir.join(format!("{}.submit", graph.name()));
        if graph.get(graph.name()).is_some() {
            return Err(PipeError::GraphConstruction(format!(
                "job name '{}' clashes with the DAG file name",
                graph.name()
            )));
        }
        let mut rendered = RenderedDag::new(&dag_path);

        for job in graph.jobs() {
            let path = submit_dir.join(format!("{}.submit", job.name));
            debug!("Rendering submit file {}", path.display());
            rendered.push(SubmitFile::new(path, self.render_job(job, input)?));
        }

        rendered.push(SubmitFile::new(&dag_path, self.render_dag(graph, &submit_dir)?));

        info!("Rendered {} condor submit files", graph.len());
        Ok(rendered)
    }

    fn submit(&self, rendered: &RenderedDag) -> Result<()> {
        info!("Submitting {}", rendered.entry_point().display());
        run_submit_command(&self.settings.submit_command, [rendered.entry_point()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::DagGraphBuilder;
    use crate::input::normalize::RawParameter;
    use crate::input::test_support::fixture_config;
    use tempfile::tempdir;

    fn render(config: &RunConfig, settings: CondorSettings) -> (Input, RenderedDag) {
        let input = Input::from_config(config, vec!["--argument".into(), "value".into()]).unwrap();
        let graph = DagGraphBuilder::build(&input).unwrap();
        let rendered = CondorBackend::new(settings).render(&graph, &input).unwrap();
        (input, rendered)
    }

    #[test]
    fn test_quote_argument() {
        assert_eq!(quote_argument("plain"), "plain");
        assert_eq!(quote_argument("two words"), "'two words'");
        assert_eq!(quote_argument("it's"), "'it''s'");
        assert_eq!(quote_argument("say \"hi\""), "'say \"\"hi\"\"'");
        assert_eq!(quote_argument(""), "''");
    }

    #[test]
    fn test_render_files() {
        let dir = tempdir().unwrap();
        let mut config = fixture_config(dir.path());
        config.detectors = RawParameter::from("H1 L1");
        config.coherence_test = true;
        let (input, rendered) = render(&config, CondorSettings::default());

        let submit = input.submit_directory();
        assert_eq!(rendered.entry_point(), submit.join("main_label.submit"));
        // generation + 3 analysis + dag
        assert_eq!(rendered.files().len(), 5);
        assert!(rendered.get(&submit.join("label_generation.submit")).is_some());
        assert!(rendered.get(&submit.join("label_H1L1_dynesty.submit")).is_some());
        assert!(rendered.files().iter().all(|f| !f.executable));
    }

    #[test]
    fn test_dag_file() {
        let dir = tempdir().unwrap();
        let mut config = fixture_config(dir.path());
        config.detectors = RawParameter::from("H1 L1");
        config.coherence_test = true;
        let settings = CondorSettings {
            retry: Some(2),
            ..CondorSettings::default()
        };
        let (input, rendered) = render(&config, settings);

        let dag = &rendered.get(rendered.entry_point()).unwrap().contents;
        let submit = input.submit_directory();
        assert!(dag.contains(&format!(
            "JOB label_generation {}",
            submit.join("label_generation.submit").display()
        )));
        assert!(dag.contains("RETRY label_H1_dynesty 2"));
        assert!(dag.contains(
            "PARENT label_generation CHILD label_H1L1_dynesty label_H1_dynesty label_L1_dynesty"
        ));
        assert_eq!(dag.lines().filter(|l| l.starts_with("JOB ")).count(), 4);
    }

    #[test]
    fn test_job_submit_file() {
        let dir = tempdir().unwrap();
        let mut config = fixture_config(dir.path());
        config.queue = 3;
        config.request_memory = Some("4 GB".to_string());
        config.request_cpus = Some(2);
        config.requirements = Some("HAS_CVMFS".to_string());
        let (input, rendered) = render(&config, CondorSettings::default());

        let path = input.submit_directory().join("label_H1L1_dynesty.submit");
        let contents = &rendered.get(&path).unwrap().contents;

        assert!(contents.contains("universe = vanilla\n"));
        assert!(contents.contains(&format!("executable = {}\n", input.executable().display())));
        assert!(contents.contains("request_memory = 4 GB\n"));
        assert!(contents.contains("request_cpus = 2\n"));
        assert!(contents.contains("getenv = True\n"));
        assert!(contents.contains("requirements = HAS_CVMFS\n"));
        assert!(contents.contains("accounting_group = accounting.group\n"));
        assert!(contents.contains("label_H1L1_dynesty_$(Cluster)_$(Process).out"));
        assert!(contents.contains("--cluster $(Cluster) --process $(Process)"));
        assert!(contents.contains("--argument value\"\n"));
        assert!(contents.ends_with("queue 3\n"));
        assert!(!contents.contains("x509userproxy"));
    }

    #[test]
    fn test_credential_line() {
        let dir = tempdir().unwrap();
        let proxy = dir.path().join("x509up_u1000");
        std::fs::write(&proxy, "cert").unwrap();
        let mut config = fixture_config(dir.path());
        config.x509 = Some(proxy);
        let (input, rendered) = render(&config, CondorSettings::default());

        let credential = input.credential().unwrap().display().to_string();
        for file in rendered.files() {
            if file.path != rendered.entry_point() {
                assert!(file.contents.contains(&format!("x509userproxy = {}\n", credential)));
            }
        }
    }

    #[test]
    fn test_missing_required_credential_fails_render() {
        let dir = tempdir().unwrap();
        let mut config = fixture_config(dir.path());
        config.require_credential = true;
        let input = Input::from_config(&config, Vec::new()).unwrap();
        let graph = DagGraphBuilder::build(&input).unwrap();

        let err = CondorBackend::default().render(&graph, &input).unwrap_err();
        assert!(matches!(err, PipeError::CredentialUnavailable(_)));
    }
}
