//! Job Graph Module
//!
//! Data structures and builders turning an [`Input`](crate::input::Input)
//! into a graph of scheduler-neutral jobs.
//!
//! # Structure
//!
//! - [`job`]: Job specifications (JobSpec, Role, LogPaths)
//! - [`builder`]: Enumeration of generation and analysis jobs
//! - [`graph`]: The DAG and its builder

pub mod builder;
pub mod graph;
pub mod job;

pub use builder::{analysis_job_name, generation_job_name, JobSpecBuilder};
pub use graph::{DagGraph, DagGraphBuilder};
pub use job::{JobSpec, LogPaths, ResourceRequest, Role};
