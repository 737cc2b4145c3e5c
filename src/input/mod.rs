//! Run Input Module
//!
//! Turns a merged configuration into a validated [`Input`].
//!
//! # Structure
//!
//! - [`normalize`]: Detector and sampler canonicalization
//! - [`credential`]: Credential lookup and snapshotting
//! - [`executable`]: Executable library resolution
//! - [`injection`]: Injection file provisioning
//! - [`model`]: The immutable [`Input`] itself

pub mod credential;
pub mod executable;
pub mod injection;
pub mod model;
pub mod normalize;

pub use injection::{ensure_injection_file, CommandInjectionGenerator, InjectionGenerator, InjectionRequest};
pub use model::Input;
pub use normalize::{normalize_instruments, normalize_samplers, RawParameter};
