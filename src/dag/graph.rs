//! Job Graph
//!
//! [`DagGraph`] holds the jobs of a run and their dependency edges. It
//! enforces the pipeline's structural rules as jobs are added:
//! - Exactly one generation job, added before anything else
//! - Unique job names
//! - Parents must already be in the graph
//!
//! [`DagGraphBuilder`] wires the jobs produced by [`JobSpecBuilder`] into a
//! graph. Today's topology is a star (generation → every analysis job), but
//! the graph accepts arbitrary parent sets.

use std::collections::{BTreeSet, HashMap, VecDeque};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{PipeError, Result};
use crate::input::Input;

use super::builder::JobSpecBuilder;
use super::job::{JobSpec, Role};

/// A directed acyclic graph of jobs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DagGraph {
    /// Graph name, `main_<label>`
    name: String,
    /// Jobs in insertion order
    jobs: Vec<JobSpec>,
    /// (parent, child) pairs
    edges: BTreeSet<(String, String)>,
}

impl DagGraph {
    /// Creates an empty graph.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jobs: Vec::new(),
            edges: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a job, recording an edge from each of its parents.
    pub fn add_job(&mut self, job: JobSpec) -> Result<()> {
        if self.get(&job.name).is_some() {
            return Err(PipeError::GraphConstruction(format!(
                "job name '{}' is already in the graph",
                job.name
            )));
        }

        match job.role {
            Role::Generation => {
                if let Some(existing) = self.generation_job() {
                    return Err(PipeError::GraphConstruction(format!(
                        "cannot add generation job '{}': '{}' already exists",
                        job.name, existing.name
                    )));
                }
                if !job.parents.is_empty() {
                    return Err(PipeError::GraphConstruction(format!(
                        "generation job '{}' must not have parents",
                        job.name
                    )));
                }
            }
            Role::Analysis => {
                if self.generation_job().is_none() {
                    return Err(PipeError::GraphConstruction(format!(
                        "cannot add analysis job '{}' before the generation job",
                        job.name
                    )));
                }
                if job.parents.is_empty() {
                    return Err(PipeError::GraphConstruction(format!(
                        "analysis job '{}' has no parent",
                        job.name
                    )));
                }
            }
        }

        for parent in &job.parents {
            if self.get(parent).is_none() {
                return Err(PipeError::GraphConstruction(format!(
                    "job '{}' depends on unknown job '{}'",
                    job.name, parent
                )));
            }
        }

        for parent in &job.parents {
            self.edges.insert((parent.clone(), job.name.clone()));
        }
        debug!("Added {} job '{}'", job.role, job.name);
        self.jobs.push(job);
        Ok(())
    }

    /// All jobs in insertion order.
    pub fn jobs(&self) -> &[JobSpec] {
        &self.jobs
    }

    pub fn edges(&self) -> &BTreeSet<(String, String)> {
        &self.edges
    }

    /// Gets a job by name.
    pub fn get(&self, name: &str) -> Option<&JobSpec> {
        self.jobs.iter().find(|j| j.name == name)
    }

    pub fn generation_job(&self) -> Option<&JobSpec> {
        self.jobs.iter().find(|j| j.role == Role::Generation)
    }

    pub fn analysis_jobs(&self) -> Vec<&JobSpec> {
        self.jobs.iter().filter(|j| j.role == Role::Analysis).collect()
    }

    /// Names of every job, sorted.
    pub fn node_names(&self) -> BTreeSet<&str> {
        self.jobs.iter().map(|j| j.name.as_str()).collect()
    }

    /// Names of the jobs depending directly on `name`.
    pub fn children(&self, name: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(parent, _)| parent == name)
            .map(|(_, child)| child.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Orders jobs so every parent precedes its children (Kahn's algorithm).
    ///
    /// Ties keep insertion order. Fails if the edges contain a cycle.
    pub fn topological_order(&self) -> Result<Vec<&JobSpec>> {
        let mut in_degree: HashMap<&str, usize> = self
            .jobs
            .iter()
            .map(|j| (j.name.as_str(), j.parents.len()))
            .collect();

        let mut queue: VecDeque<&JobSpec> = self.jobs.iter().filter(|j| j.parents.is_empty()).collect();
        let mut sorted = Vec::with_capacity(self.jobs.len());

        while let Some(current) = queue.pop_front() {
            sorted.push(current);

            for job in &self.jobs {
                if !job.parents.contains(&current.name) {
                    continue;
                }
                if let Some(degree) = in_degree.get_mut(job.name.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(job);
                    }
                }
            }
        }

        if sorted.len() != self.jobs.len() {
            return Err(PipeError::GraphConstruction(
                "graph contains cyclic dependencies".to_string(),
            ));
        }

        Ok(sorted)
    }
}

/// Assembles the job graph for a run.
pub struct DagGraphBuilder<'a> {
    jobs: JobSpecBuilder<'a>,
    graph: DagGraph,
}

impl<'a> DagGraphBuilder<'a> {
    /// Starts an empty graph named after the run label.
    pub fn new(input: &'a Input) -> Self {
        Self {
            jobs: JobSpecBuilder::new(input),
            graph: DagGraph::new(format!("main_{}", input.label())),
        }
    }

    /// Adds the generation job.
    pub fn build_generation_job(&mut self) -> Result<&JobSpec> {
        let job = self.jobs.build_generation_job();
        let name = job.name.clone();
        self.graph.add_job(job)?;
        self.graph
            .get(&name)
            .ok_or_else(|| PipeError::GraphConstruction(format!("job '{}' vanished", name)))
    }

    /// Adds every analysis job. Fails if the generation job is missing.
    pub fn build_analysis_jobs(&mut self) -> Result<usize> {
        if self.graph.generation_job().is_none() {
            return Err(PipeError::GraphConstruction(
                "analysis jobs requested before the generation job was built".to_string(),
            ));
        }

        let jobs = self.jobs.build_analysis_jobs()?;
        let count = jobs.len();
        for job in jobs {
            self.graph.add_job(job)?;
        }
        Ok(count)
    }

    /// Verifies the graph and hands it over.
    pub fn finish(self) -> Result<DagGraph> {
        if self.graph.generation_job().is_none() {
            return Err(PipeError::GraphConstruction(
                "graph has no generation job".to_string(),
            ));
        }
        self.graph.topological_order()?;
        Ok(self.graph)
    }

    /// Builds the complete graph for `input`.
    ///
    /// The result depends only on `input`: identical inputs give identical
    /// node names and edges.
    pub fn build(input: &'a Input) -> Result<DagGraph> {
        let mut builder = Self::new(input);
        builder.build_generation_job()?;
        let count = builder.build_analysis_jobs()?;
        info!(
            "Built graph '{}': 1 generation job, {} analysis jobs",
            builder.graph.name(),
            count
        );
        builder.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::normalize::RawParameter;
    use crate::input::test_support::fixture_config;
    use std::path::Path;
    use tempfile::tempdir;

    fn coherent_input(dir: &Path) -> Input {
        let mut config = fixture_config(dir);
        config.detectors = RawParameter::from("H1 L1 V1");
        config.sampler = RawParameter::from("dynesty nestle");
        config.coherence_test = true;
        Input::from_config(&config, Vec::new()).unwrap()
    }

    fn job(name: &str, role: Role) -> JobSpec {
        JobSpec::new(name, role, "/bin/true", Path::new("/logs"))
    }

    #[test]
    fn test_build_structure() {
        let dir = tempdir().unwrap();
        let input = coherent_input(dir.path());
        let graph = DagGraphBuilder::build(&input).unwrap();

        assert_eq!(graph.name(), "main_label");
        assert_eq!(graph.len(), 1 + 2 * (3 + 1));
        assert_eq!(graph.jobs().iter().filter(|j| j.role == Role::Generation).count(), 1);

        let generation = graph.generation_job().unwrap();
        assert!(generation.parents.is_empty());
        for analysis in graph.analysis_jobs() {
            assert_eq!(
                analysis.parents,
                BTreeSet::from([generation.name.clone()])
            );
        }
        assert_eq!(graph.edges().len(), graph.analysis_jobs().len());
        assert_eq!(graph.children(&generation.name).len(), 8);
    }

    #[test]
    fn test_build_is_deterministic() {
        let dir = tempdir().unwrap();
        let input = coherent_input(dir.path());

        let first = DagGraphBuilder::build(&input).unwrap();
        let second = DagGraphBuilder::build(&input).unwrap();

        assert_eq!(first.node_names(), second.node_names());
        assert_eq!(first.edges(), second.edges());
        assert_eq!(first, second);
    }

    #[test]
    fn test_topological_order_generation_first() {
        let dir = tempdir().unwrap();
        let input = coherent_input(dir.path());
        let graph = DagGraphBuilder::build(&input).unwrap();

        let order = graph.topological_order().unwrap();
        assert_eq!(order.len(), graph.len());
        assert_eq!(order[0].role, Role::Generation);
    }

    #[test]
    fn test_analysis_before_generation_rejected() {
        let dir = tempdir().unwrap();
        let input = coherent_input(dir.path());
        let mut builder = DagGraphBuilder::new(&input);

        let err = builder.build_analysis_jobs().unwrap_err();
        assert!(matches!(err, PipeError::GraphConstruction(_)));
    }

    #[test]
    fn test_second_generation_rejected() {
        let dir = tempdir().unwrap();
        let input = coherent_input(dir.path());
        let mut builder = DagGraphBuilder::new(&input);

        builder.build_generation_job().unwrap();
        let err = builder.build_generation_job().unwrap_err();
        assert!(matches!(err, PipeError::GraphConstruction(_)));
    }

    #[test]
    fn test_finish_without_generation_rejected() {
        let dir = tempdir().unwrap();
        let input = coherent_input(dir.path());
        assert!(matches!(
            DagGraphBuilder::new(&input).finish(),
            Err(PipeError::GraphConstruction(_))
        ));
    }

    #[test]
    fn test_add_job_rules() {
        let mut graph = DagGraph::new("main_test");

        let orphan = job("a", Role::Analysis).depends_on("gen");
        assert!(graph.add_job(orphan).is_err());

        graph.add_job(job("gen", Role::Generation)).unwrap();
        assert!(graph.add_job(job("gen2", Role::Generation)).is_err());

        // Analysis jobs need a parent, and the parent must exist.
        assert!(graph.add_job(job("a", Role::Analysis)).is_err());
        assert!(graph.add_job(job("a", Role::Analysis).depends_on("missing")).is_err());

        graph.add_job(job("a", Role::Analysis).depends_on("gen")).unwrap();
        assert!(graph.add_job(job("a", Role::Analysis).depends_on("gen")).is_err());

        // Deeper stages hang off existing jobs.
        graph.add_job(job("post", Role::Analysis).depends_on("a")).unwrap();
        let order: Vec<&str> = graph
            .topological_order()
            .unwrap()
            .into_iter()
            .map(|j| j.name.as_str())
            .collect();
        assert_eq!(order, vec!["gen", "a", "post"]);
        assert_eq!(graph.edges().len(), 2);
    }

    #[test]
    fn test_generation_with_parent_rejected() {
        let mut graph = DagGraph::new("main_test");
        let err = graph.add_job(job("gen", Role::Generation).depends_on("x"));
        assert!(matches!(err, Err(PipeError::GraphConstruction(_))));
    }
}
