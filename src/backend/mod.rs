//! Submission Backends
//!
//! Backends translate a [`DagGraph`] into scheduler-native files and, when
//! asked, hand them to the scheduler.
//!
//! # Components
//!
//! - [`SubmissionBackend`]: The adapter trait
//! - [`condor::CondorBackend`]: HTCondor DAGMan
//! - [`slurm::SlurmBackend`]: Slurm sbatch dependency chain
//! - [`mock::RecordingBackend`]: In-memory backend for tests
//!
//! Rendering never touches the filesystem; [`materialize`] writes the
//! rendered files so that either all of them appear or none do.

pub mod condor;
pub mod mock;
pub mod slurm;

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, error, info, warn};

use crate::config::{RunConfig, SchedulerKind};
use crate::dag::DagGraph;
use crate::error::{PipeError, Result};
use crate::input::Input;

pub use condor::{CondorBackend, CondorSettings};
pub use mock::RecordingBackend;
pub use slurm::{SlurmBackend, SlurmSettings};

/// A file produced by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitFile {
    pub path: PathBuf,
    pub contents: String,
    /// Whether the file must be executable (shell scripts)
    pub executable: bool,
}

impl SubmitFile {
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
            executable: false,
        }
    }

    pub fn script(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        Self {
            executable: true,
            ..Self::new(path, contents)
        }
    }
}

/// Everything a backend renders for one graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDag {
    files: Vec<SubmitFile>,
    /// File handed to the scheduler on submission
    entry_point: PathBuf,
}

impl RenderedDag {
    pub fn new(entry_point: impl Into<PathBuf>) -> Self {
        Self {
            files: Vec::new(),
            entry_point: entry_point.into(),
        }
    }

    pub fn push(&mut self, file: SubmitFile) {
        self.files.push(file);
    }

    pub fn files(&self) -> &[SubmitFile] {
        &self.files
    }

    pub fn entry_point(&self) -> &Path {
        &self.entry_point
    }

    /// Looks up a rendered file by path.
    pub fn get(&self, path: &Path) -> Option<&SubmitFile> {
        self.files.iter().find(|f| f.path == path)
    }
}

/// Adapter between the job graph and a cluster scheduler.
pub trait SubmissionBackend {
    /// Short scheduler name for logs.
    fn name(&self) -> &'static str;

    /// Renders the graph into scheduler-native files without writing them.
    fn render(&self, graph: &DagGraph, input: &Input) -> Result<RenderedDag>;

    /// Submits previously materialized files.
    fn submit(&self, rendered: &RenderedDag) -> Result<()>;
}

/// Creates the backend selected by the configuration.
pub fn create_backend(config: &RunConfig) -> Box<dyn SubmissionBackend> {
    match config.scheduler {
        SchedulerKind::Condor => Box::new(CondorBackend::new(CondorSettings::from_config(config))),
        SchedulerKind::Slurm => Box::new(SlurmBackend::new(SlurmSettings::from_config(config))),
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn stage(file: &SubmitFile) -> Result<PathBuf> {
    if let Some(parent) = file.path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| PipeError::io(format!("creating {}", parent.display()), e))?;
    }

    let staging = staging_path(&file.path);
    fs::write(&staging, &file.contents)
        .map_err(|e| PipeError::io(format!("writing {}", staging.display()), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if file.executable {
            fs::set_permissions(&staging, fs::Permissions::from_mode(0o755)).map_err(|e| {
                PipeError::io(format!("setting permissions on {}", staging.display()), e)
            })?;
        }
    }

    Ok(staging)
}

fn discard(staged: &[(PathBuf, &Path)]) {
    for (staging, _) in staged {
        if let Err(e) = fs::remove_file(staging) {
            warn!("Failed to remove {}: {}", staging.display(), e);
        }
    }
}

/// Removes files that were already moved into place.
fn roll_back(placed: &[(PathBuf, &Path)]) {
    for (_, target) in placed {
        if let Err(e) = fs::remove_file(target) {
            warn!("Failed to remove {}: {}", target.display(), e);
        }
    }
}

/// Writes every rendered file.
///
/// All files are first written to temporaries; they are renamed into place
/// only once every write succeeded. If a rename fails, the files already
/// moved are removed again.
pub fn materialize(rendered: &RenderedDag) -> Result<()> {
    let mut staged: Vec<(PathBuf, &Path)> = Vec::with_capacity(rendered.files.len());

    for file in &rendered.files {
        match stage(file) {
            Ok(staging) => staged.push((staging, &file.path)),
            Err(e) => {
                error!("Failed to stage {}: {}", file.path.display(), e);
                discard(&staged);
                return Err(e);
            }
        }
    }

    for (i, (staging, target)) in staged.iter().enumerate() {
        if let Err(e) = fs::rename(staging, target) {
            error!("Failed to move {} into place: {}", target.display(), e);
            roll_back(&staged[..i]);
            discard(&staged[i..]);
            return Err(PipeError::io(format!("moving {} into place", target.display()), e));
        }
        debug!("Wrote {}", target.display());
    }

    info!(
        "Wrote {} files, entry point {}",
        rendered.files.len(),
        rendered.entry_point.display()
    );
    Ok(())
}

/// Runs a scheduler command, failing on a non-zero exit.
pub(crate) fn run_submit_command<I, S>(program: &str, args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    info!("Running {:?}", cmd);

    let output = cmd
        .output()
        .map_err(|e| PipeError::Backend(format!("failed to run {}: {}", program, e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        info!("{}", stdout.trim());
    }

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("{} failed with exit code: {:?}", program, output.status.code());
        Err(PipeError::Backend(format!(
            "{} exited with code {:?}: {}",
            program,
            output.status.code(),
            stderr.trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_materialize_writes_all_files() {
        let dir = tempdir().unwrap();
        let mut rendered = RenderedDag::new(dir.path().join("submit/main.submit"));
        rendered.push(SubmitFile::new(dir.path().join("submit/main.submit"), "JOB a a.submit\n"));
        rendered.push(SubmitFile::script(dir.path().join("submit/a.sh"), "#!/bin/bash\n"));

        materialize(&rendered).unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("submit/main.submit")).unwrap(),
            "JOB a a.submit\n"
        );
        assert!(dir.path().join("submit/a.sh").exists());
        assert!(!dir.path().join("submit/a.sh.tmp").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dir.path().join("submit/a.sh")).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn test_materialize_is_all_or_nothing() {
        let dir = tempdir().unwrap();
        // A regular file where a directory is needed makes the second write fail.
        fs::write(dir.path().join("blocker"), "").unwrap();

        let mut rendered = RenderedDag::new(dir.path().join("submit/main.submit"));
        rendered.push(SubmitFile::new(dir.path().join("submit/main.submit"), "x"));
        rendered.push(SubmitFile::new(dir.path().join("blocker/job.submit"), "y"));

        assert!(materialize(&rendered).is_err());
        assert!(!dir.path().join("submit/main.submit").exists());
        assert!(!dir.path().join("submit/main.submit.tmp").exists());
    }

    #[test]
    fn test_failed_rename_removes_placed_files() {
        let dir = tempdir().unwrap();
        // A non-empty directory at a target path makes its rename fail.
        let occupied = dir.path().join("submit/b.submit");
        fs::create_dir_all(occupied.join("inner")).unwrap();

        let mut rendered = RenderedDag::new(dir.path().join("submit/a.submit"));
        rendered.push(SubmitFile::new(dir.path().join("submit/a.submit"), "a"));
        rendered.push(SubmitFile::new(&occupied, "b"));

        assert!(materialize(&rendered).is_err());
        assert!(!dir.path().join("submit/a.submit").exists());
        assert!(!dir.path().join("submit/a.submit.tmp").exists());
        assert!(!dir.path().join("submit/b.submit.tmp").exists());
        assert!(occupied.is_dir());
    }

    #[test]
    fn test_rendered_lookup() {
        let mut rendered = RenderedDag::new("/out/submit/main.submit");
        rendered.push(SubmitFile::new("/out/submit/main.submit", "x"));
        assert!(rendered.get(Path::new("/out/submit/main.submit")).is_some());
        assert!(rendered.get(Path::new("/out/submit/other")).is_none());
        assert_eq!(rendered.entry_point(), Path::new("/out/submit/main.submit"));
    }

    #[test]
    fn test_staging_path() {
        assert_eq!(
            staging_path(Path::new("/out/submit/a.sh")),
            PathBuf::from("/out/submit/a.sh.tmp")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_submit_command_failure() {
        assert!(run_submit_command("true", ["x"]).is_ok());
        assert!(matches!(
            run_submit_command("false", ["x"]),
            Err(PipeError::Backend(_))
        ));
        assert!(run_submit_command("/nonexistent/pipegen-submit", ["x"]).is_err());
    }

    #[test]
    fn test_create_backend_by_scheduler() {
        let mut config = RunConfig::from_yaml_str("").unwrap();
        assert_eq!(create_backend(&config).name(), "condor");
        config.scheduler = SchedulerKind::Slurm;
        assert_eq!(create_backend(&config).name(), "slurm");
    }
}
