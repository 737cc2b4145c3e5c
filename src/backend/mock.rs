//! Recording Backend
//!
//! Renders a plain listing of the graph and remembers what it was asked to
//! do. Used to exercise the pipeline without a scheduler.

use std::cell::{Cell, RefCell};

use log::info;

use crate::dag::DagGraph;
use crate::error::{PipeError, Result};
use crate::input::Input;

use super::{RenderedDag, SubmissionBackend, SubmitFile};

#[derive(Debug, Default)]
pub struct RecordingBackend {
    rendered_jobs: RefCell<Vec<String>>,
    submissions: Cell<usize>,
    fail_render: bool,
    fail_submit: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose `render` always fails.
    pub fn failing_render() -> Self {
        Self {
            fail_render: true,
            ..Self::default()
        }
    }

    /// A backend whose `submit` always fails.
    pub fn failing_submit() -> Self {
        Self {
            fail_submit: true,
            ..Self::default()
        }
    }

    /// Job names seen by the last `render`, in graph order.
    pub fn rendered_jobs(&self) -> Vec<String> {
        self.rendered_jobs.borrow().clone()
    }

    pub fn submissions(&self) -> usize {
        self.submissions.get()
    }
}

impl SubmissionBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn render(&self, graph: &DagGraph, input: &Input) -> Result<RenderedDag> {
        if self.fail_render {
            return Err(PipeError::Backend("render failure requested".to_string()));
        }

        let entry = input.submit_directory().join(format!("{}.jobs", graph.name()));
        let mut listing = String::new();
        for job in graph.topological_order()? {
            let parents: Vec<&str> = job.parents.iter().map(String::as_str).collect();
            listing.push_str(&format!("{} <- [{}]\n", job.name, parents.join(", ")));
        }

        *self.rendered_jobs.borrow_mut() = graph.jobs().iter().map(|j| j.name.clone()).collect();

        let mut rendered = RenderedDag::new(&entry);
        rendered.push(SubmitFile::new(&entry, listing));
        Ok(rendered)
    }

    fn submit(&self, rendered: &RenderedDag) -> Result<()> {
        if self.fail_submit {
            return Err(PipeError::Backend("submit failure requested".to_string()));
        }
        self.submissions.set(self.submissions.get() + 1);
        info!("Recorded submission of {}", rendered.entry_point().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::DagGraphBuilder;
    use crate::input::test_support::fixture_config;
    use tempfile::tempdir;

    #[test]
    fn test_records_render_and_submit() {
        let dir = tempdir().unwrap();
        let input = Input::from_config(&fixture_config(dir.path()), Vec::new()).unwrap();
        let graph = DagGraphBuilder::build(&input).unwrap();
        let backend = RecordingBackend::new();

        let rendered = backend.render(&graph, &input).unwrap();
        assert_eq!(backend.rendered_jobs(), vec!["label_generation", "label_H1L1_dynesty"]);
        assert_eq!(
            rendered.files()[0].contents,
            "label_generation <- []\nlabel_H1L1_dynesty <- [label_generation]\n"
        );

        backend.submit(&rendered).unwrap();
        assert_eq!(backend.submissions(), 1);
    }

    #[test]
    fn test_failure_switches() {
        let dir = tempdir().unwrap();
        let input = Input::from_config(&fixture_config(dir.path()), Vec::new()).unwrap();
        let graph = DagGraphBuilder::build(&input).unwrap();

        assert!(RecordingBackend::failing_render().render(&graph, &input).is_err());

        let backend = RecordingBackend::failing_submit();
        let rendered = backend.render(&graph, &input).unwrap();
        assert!(backend.submit(&rendered).is_err());
        assert_eq!(backend.submissions(), 0);
    }
}
