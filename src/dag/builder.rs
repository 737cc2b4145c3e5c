//! Job Enumeration
//!
//! Expands an [`Input`] into concrete job specifications:
//! - One generation job producing the shared data
//! - One analysis job per (detector subset, sampler) pair
//!
//! Detector subsets are the full set, followed by every single detector
//! when the coherence test is enabled.

use log::debug;

use crate::error::{PipeError, Result};
use crate::input::Input;

use super::job::{JobSpec, Role, CLUSTER_PLACEHOLDER, PROCESS_PLACEHOLDER};

/// Name of the generation job for a label.
pub fn generation_job_name(label: &str) -> String {
    format!("{}_generation", label)
}

/// Name of an analysis job.
///
/// Detector codes are concatenated without a separator, e.g.
/// `GW150914_H1L1_dynesty`.
pub fn analysis_job_name(label: &str, instruments: &[String], sampler: &str) -> String {
    format!("{}_{}_{}", label, instruments.concat(), sampler)
}

/// Builds job specifications from a validated input.
pub struct JobSpecBuilder<'a> {
    input: &'a Input,
}

impl<'a> JobSpecBuilder<'a> {
    pub fn new(input: &'a Input) -> Self {
        Self { input }
    }

    /// Detector subsets to analyse, in job order.
    pub fn analysis_subsets(&self) -> Vec<Vec<String>> {
        let instruments = self.input.instruments();
        let mut subsets = vec![instruments.to_vec()];
        if self.input.coherence_test() {
            subsets.extend(instruments.iter().map(|d| vec![d.clone()]));
        }
        subsets
    }

    /// Arguments shared by every job.
    fn common_prefix(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ini) = self.input.ini() {
            args.push("--ini".to_string());
            args.push(ini.display().to_string());
        }
        args
    }

    fn detector_arguments(instruments: &[String]) -> Vec<String> {
        instruments
            .iter()
            .flat_map(|d| ["--detectors".to_string(), d.clone()])
            .collect()
    }

    fn injection_arguments(&self) -> Vec<String> {
        match self.input.injection_file() {
            Some(path) => vec!["--injection-file".to_string(), path.display().to_string()],
            None => Vec::new(),
        }
    }

    /// Builds the single generation job.
    pub fn build_generation_job(&self) -> JobSpec {
        let input = self.input;
        let name = generation_job_name(input.label());

        let mut arguments = self.common_prefix();
        arguments.extend([
            "--label".to_string(),
            input.label().to_string(),
            "--outdir".to_string(),
            input.outdir().display().to_string(),
        ]);
        arguments.extend(Self::detector_arguments(input.instruments()));
        arguments.extend(self.injection_arguments());
        arguments.extend(input.passthrough().iter().cloned());

        debug!("Generation job: {} {}", name, arguments.join(" "));

        JobSpec::new(name, Role::Generation, input.generation_executable(), &input.log_directory())
            .with_arguments(arguments)
            .with_resources(input.generation_resources().clone())
    }

    /// Builds every analysis job, each depending on the generation job.
    ///
    /// Subsets are the outer loop and samplers the inner one.
    pub fn build_analysis_jobs(&self) -> Result<Vec<JobSpec>> {
        let input = self.input;
        if input.instruments().is_empty() {
            return Err(PipeError::InvalidInput("no detectors to analyse".to_string()));
        }
        if input.samplers().is_empty() {
            return Err(PipeError::InvalidInput("no samplers to run".to_string()));
        }

        let parent = generation_job_name(input.label());
        let log_dir = input.log_directory();
        let mut jobs = Vec::new();

        for subset in self.analysis_subsets() {
            for sampler in input.samplers() {
                let name = analysis_job_name(input.label(), &subset, sampler);

                let mut arguments = self.common_prefix();
                arguments.extend(Self::detector_arguments(&subset));
                arguments.extend([
                    "--sampler".to_string(),
                    sampler.clone(),
                    "--cluster".to_string(),
                    CLUSTER_PLACEHOLDER.to_string(),
                    "--process".to_string(),
                    PROCESS_PLACEHOLDER.to_string(),
                ]);
                arguments.extend(self.injection_arguments());
                arguments.extend(input.passthrough().iter().cloned());

                debug!("Adding job: {}", name);
                jobs.push(
                    JobSpec::new(name, Role::Analysis, input.executable(), &log_dir)
                        .with_instruments(subset.clone())
                        .with_sampler(sampler.clone())
                        .with_arguments(arguments)
                        .with_resources(input.resources().clone())
                        .with_queue(input.queue())
                        .depends_on(parent.clone()),
                );
            }
        }

        debug!("List of analysis jobs = {:?}", jobs.iter().map(|j| &j.name).collect::<Vec<_>>());
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::normalize::RawParameter;
    use crate::input::test_support::fixture_config;
    use tempfile::tempdir;

    fn input(dir: &std::path::Path, detectors: &str, samplers: &str, coherence: bool) -> Input {
        let mut config = fixture_config(dir);
        config.detectors = RawParameter::from(detectors);
        config.sampler = RawParameter::from(samplers);
        config.coherence_test = coherence;
        config.queue = 2;
        Input::from_config(&config, vec!["--argument".into(), "value".into()]).unwrap()
    }

    #[test]
    fn test_names() {
        assert_eq!(generation_job_name("GW1"), "GW1_generation");
        assert_eq!(
            analysis_job_name("GW1", &["H1".to_string(), "L1".to_string()], "dynesty"),
            "GW1_H1L1_dynesty"
        );
    }

    #[test]
    fn test_coherence_expansion() {
        let dir = tempdir().unwrap();
        let input = input(dir.path(), "L1 H1", "nestle", true);
        let builder = JobSpecBuilder::new(&input);

        assert_eq!(
            builder.analysis_subsets(),
            vec![
                vec!["H1".to_string(), "L1".to_string()],
                vec!["H1".to_string()],
                vec!["L1".to_string()],
            ]
        );

        let names: Vec<String> = builder
            .build_analysis_jobs()
            .unwrap()
            .into_iter()
            .map(|j| j.name)
            .collect();
        assert_eq!(names, vec!["label_H1L1_nestle", "label_H1_nestle", "label_L1_nestle"]);
    }

    #[test]
    fn test_job_counts() {
        let dir = tempdir().unwrap();
        for (detectors, k) in [("H1", 1), ("H1 L1", 2), ("H1 L1 V1", 3)] {
            for (samplers, m) in [("dynesty", 1), ("dynesty nestle", 2), ("dynesty nestle emcee", 3)] {
                let plain = input(dir.path(), detectors, samplers, false);
                assert_eq!(JobSpecBuilder::new(&plain).build_analysis_jobs().unwrap().len(), m);

                if k == 1 {
                    continue;
                }
                let coherent = input(dir.path(), detectors, samplers, true);
                let jobs = JobSpecBuilder::new(&coherent).build_analysis_jobs().unwrap();
                assert_eq!(jobs.len(), m * (k + 1));

                let names: std::collections::BTreeSet<&str> =
                    jobs.iter().map(|j| j.name.as_str()).collect();
                assert_eq!(names.len(), jobs.len());
            }
        }
    }

    #[test]
    fn test_subset_outer_sampler_inner() {
        let dir = tempdir().unwrap();
        let input = input(dir.path(), "H1 L1", "nestle dynesty", true);
        let names: Vec<String> = JobSpecBuilder::new(&input)
            .build_analysis_jobs()
            .unwrap()
            .into_iter()
            .map(|j| j.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "label_H1L1_nestle",
                "label_H1L1_dynesty",
                "label_H1_nestle",
                "label_H1_dynesty",
                "label_L1_nestle",
                "label_L1_dynesty",
            ]
        );
    }

    #[test]
    fn test_analysis_arguments() {
        let dir = tempdir().unwrap();
        let input = input(dir.path(), "H1 L1", "dynesty", false);
        let jobs = JobSpecBuilder::new(&input).build_analysis_jobs().unwrap();
        let job = &jobs[0];

        assert_eq!(
            job.arguments,
            vec![
                "--detectors", "H1", "--detectors", "L1", "--sampler", "dynesty", "--cluster",
                "{cluster}", "--process", "{process}", "--argument", "value",
            ]
        );
        assert_eq!(job.queue, 2);
        assert_eq!(job.role, Role::Analysis);
        assert_eq!(job.executable, input.executable());
        assert!(job.logs.stdout.starts_with(input.outdir().join("logs")));
        assert_eq!(job.parents.iter().collect::<Vec<_>>(), vec!["label_generation"]);
    }

    #[test]
    fn test_generation_job() {
        let dir = tempdir().unwrap();
        let input = input(dir.path(), "H1", "dynesty", false);
        let job = JobSpecBuilder::new(&input).build_generation_job();

        assert_eq!(job.name, "label_generation");
        assert_eq!(job.role, Role::Generation);
        assert_eq!(job.queue, 1);
        assert!(job.parents.is_empty());
        assert!(job.instruments.is_empty());
        assert!(job.sampler.is_empty());
        assert_eq!(job.executable, input.generation_executable());

        let outdir = input.outdir().display().to_string();
        assert_eq!(
            job.arguments,
            vec![
                "--label", "label", "--outdir", outdir.as_str(), "--detectors", "H1",
                "--argument", "value",
            ]
        );
    }

    #[test]
    fn test_ini_and_injection_forwarded() {
        let dir = tempdir().unwrap();
        let mut config = fixture_config(dir.path());
        config.ini = Some(dir.path().join("run.yaml"));
        config.injection = true;
        config.injection_file = Some(dir.path().join("inj.json"));
        let input = Input::from_config(&config, Vec::new()).unwrap();
        let builder = JobSpecBuilder::new(&input);

        let generation = builder.build_generation_job();
        assert_eq!(generation.arguments[0], "--ini");
        assert!(generation.arguments.contains(&"--injection-file".to_string()));

        for job in builder.build_analysis_jobs().unwrap() {
            assert_eq!(job.arguments[0], "--ini");
            assert!(job.arguments.contains(&"--injection-file".to_string()));
        }
    }
}
