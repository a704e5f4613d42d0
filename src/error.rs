// Error taxonomy for the sandbox execution pipeline.
//
// Every variant here is kept distinct so that call sites inside the pipeline can match on
// cause, but `ExecutionCoordinator::run` never lets one of these escape to its caller: it is
// always collapsed into an `ExecutionResult` with `status = Status::Error` (see
// `coordinator.rs`).

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while materializing or tearing down a workspace.
#[derive(Debug, Error)]
pub enum FileSystemError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove directory {path}: {source}")]
    RemoveDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A caller-supplied file path was rejected by the path validator.
#[derive(Debug, Error)]
pub enum InvalidPath {
    #[error("path `{0}` contains a `..` segment")]
    Traversal(String),

    #[error("path `{0}` is absolute")]
    Absolute(String),

    #[error("path `{0}` escapes the workspace root")]
    Escapes(String),
}

/// The jail binary or its base filesystem image are missing or unusable.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("jail binary `{0}` was not found on PATH")]
    JailBinaryMissing(String),

    #[error("sandbox root filesystem `{0}` does not exist")]
    RootfsMissing(PathBuf),

    #[error("sandbox work base directory `{0}` could not be created: {1}")]
    WorkDirUnusable(PathBuf, std::io::Error),
}

/// Something went wrong spawning or waiting on the jailed child, independent of what the
/// child itself did.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to spawn jail process: {0}")]
    Spawn(std::io::Error),

    #[error("failed to wait on jail process: {0}")]
    Wait(std::io::Error),

    #[error("failed to signal jail process group: {0}")]
    Signal(#[source] nix::Error),

    #[error("the blocking execution task panicked or was cancelled: {0}")]
    JoinError(String),
}

/// Parent category covering every cause the coordinator needs to react to.
///
/// `SandboxError` is never returned to an external caller; `ExecutionCoordinator::run`
/// catches it and turns it into a well-formed `ExecutionResult` (see `coordinator.rs`).
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("invalid path: {0}")]
    InvalidPath(#[from] InvalidPath),

    #[error("filesystem error: {0}")]
    FileSystem(#[from] FileSystemError),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<tokio::task::JoinError> for SandboxError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            SandboxError::Unexpected(format!("worker thread panicked: {err}"))
        } else {
            SandboxError::Execution(ExecutionError::JoinError(err.to_string()))
        }
    }
}
