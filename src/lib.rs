//! pipegen - Cluster Job Graph Generator
//!
//! Turns a declarative analysis configuration into a DAG of batch jobs for
//! a cluster workload scheduler. A run consists of one data-generation job
//! followed by one analysis job per (detector subset, sampler) pair.
//!
//! # Architecture
//!
//! The library is organized into five main modules:
//!
//! - [`config`]: Configuration file loading and command-line overrides
//! - [`input`]: Validation and normalization into an immutable [`Input`]
//! - [`dag`]: Job specifications and the job graph
//! - [`backend`]: HTCondor and Slurm renderers and submission
//! - [`pipeline`]: Orchestration of a complete run
//!
//! # Example
//!
//! ```rust,no_run
//! use pipegen::backend::create_backend;
//! use pipegen::config::load_config;
//! use pipegen::input::Input;
//! use pipegen::pipeline;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load the configuration file without overrides
//!     let config = load_config("run.yaml", Default::default())?;
//!
//!     // Validate it into a run input
//!     let input = Input::from_config(&config, Vec::new())?;
//!
//!     // Render the DAG for the configured scheduler
//!     let backend = create_backend(&config);
//!     let summary = pipeline::run(input, backend.as_ref(), None, false)?;
//!     println!("{} jobs, entry point {}", summary.jobs, summary.entry_point.display());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod dag;
pub mod error;
pub mod input;
pub mod pipeline;

// Re-export commonly used types
pub use config::{load_config, RunConfig, SchedulerKind};
pub use dag::{DagGraph, DagGraphBuilder, JobSpec};
pub use error::{PipeError, Result};
pub use input::Input;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "pipegen";
