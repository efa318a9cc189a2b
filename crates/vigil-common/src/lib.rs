//! # vigil common
//!
//! Error types shared by every crate of the vigil supervisor.
//!
//! - [`ConfigError`] covers everything that can go wrong while loading and
//!   validating process descriptors. It is always fatal: nothing is launched
//!   from an invalid descriptor.
//! - [`LaunchError`] covers plausibility checks on the executable and working
//!   directory before a process is handed to the operating system.
//! - [`ProcessError`] covers runtime supervision of a single process.

pub mod errors;

pub use errors::{
    ConfigError, ConfigResult, LaunchError, ProcessError, ProcessResult, Result, SupervisorError,
};
