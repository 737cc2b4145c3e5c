//! Run Pipeline
//!
//! Drives one invocation from a validated [`Input`] to files on disk:
//!
//! 1. Provide the injection file when injections are requested
//! 2. Build the job graph
//! 3. Render it with the selected backend and add the run manifest
//! 4. Write everything, then optionally submit
//!
//! Nothing is written under `outdir/submit` until every earlier step has
//! succeeded.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::backend::{materialize, SubmissionBackend, SubmitFile};
use crate::dag::{DagGraph, DagGraphBuilder};
use crate::error::{PipeError, Result};
use crate::input::{ensure_injection_file, Input, InjectionGenerator};

/// Record of a run, written next to the submit files.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunManifest {
    pub created_at: DateTime<Utc>,
    pub version: String,
    pub label: String,
    pub backend: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub injection_file: Option<PathBuf>,
    pub graph: DagGraph,
}

/// Outcome of [`run`].
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub label: String,
    pub backend: String,
    pub jobs: usize,
    /// Every file written
    pub files: Vec<PathBuf>,
    pub entry_point: PathBuf,
    pub manifest: PathBuf,
    pub submitted: bool,
}

fn manifest_path(input: &Input) -> PathBuf {
    input
        .submit_directory()
        .join(format!("{}_manifest.json", input.label()))
}

/// Builds, writes and optionally submits the job graph for `input`.
///
/// # Arguments
///
/// * `input` - Validated run input
/// * `backend` - Scheduler adapter
/// * `injector` - Generator used when an injection file has to be created
/// * `submit` - Hand the result to the scheduler after writing it
pub fn run(
    mut input: Input,
    backend: &dyn SubmissionBackend,
    injector: Option<&dyn InjectionGenerator>,
    submit: bool,
) -> Result<RunSummary> {
    ensure_injection_file(&mut input, injector)?;

    let graph = DagGraphBuilder::build(&input)?;
    let mut rendered = backend.render(&graph, &input)?;

    let manifest = RunManifest {
        created_at: Utc::now(),
        version: crate::VERSION.to_string(),
        label: input.label().to_string(),
        backend: backend.name().to_string(),
        injection_file: input.injection_file().map(|p| p.to_path_buf()),
        graph,
    };
    let manifest_file = manifest_path(&input);
    let json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| PipeError::Backend(format!("failed to serialize manifest: {}", e)))?;
    rendered.push(SubmitFile::new(&manifest_file, json));

    let log_dir = input.log_directory();
    fs::create_dir_all(&log_dir)
        .map_err(|e| PipeError::io(format!("creating {}", log_dir.display()), e))?;

    materialize(&rendered)?;
    info!(
        "Generated {} jobs for '{}' using the {} backend",
        manifest.graph.len(),
        input.label(),
        backend.name()
    );

    if submit {
        backend.submit(&rendered)?;
    } else {
        info!(
            "To submit, run the {} entry point {}",
            backend.name(),
            rendered.entry_point().display()
        );
    }

    Ok(RunSummary {
        label: input.label().to_string(),
        backend: backend.name().to_string(),
        jobs: manifest.graph.len(),
        files: rendered.files().iter().map(|f| f.path.clone()).collect(),
        entry_point: rendered.entry_point().to_path_buf(),
        manifest: manifest_file,
        submitted: submit,
    })
}
