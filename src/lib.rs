//! Confined, resource-capped execution of untrusted, user-supplied code.
//!
//! A request supplies a set of files, a shell entrypoint, environment variables, and resource
//! limits; [`coordinator::ExecutionCoordinator`] materializes those files into an ephemeral
//! workspace, runs the entrypoint inside a jailed subprocess, and classifies the outcome into
//! one of [`request::Status`]'s four variants. See `SPEC_FULL.md` for the full design.

pub mod classify;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod jail;
pub mod path_validator;
pub mod request;
pub mod workspace;

pub use config::Config;
pub use coordinator::ExecutionCoordinator;
pub use error::SandboxError;
pub use jail::{Jail, NsjailInvoker};
pub use request::{ExecutionRequest, ExecutionResult, FileEntry, Limits, Status};
