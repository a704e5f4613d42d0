// C2: Workspace Manager.
//
// Grounded on pantsbuild-pants' `local.rs::create_sandbox`/`AsyncDropSandbox`: an ephemeral,
// per-execution directory created via `tempfile`, populated by the caller, and guaranteed to
// be torn down on every exit path including panics and cancellation. The Python original
// (`filesystem.py`) uses a session-id-named directory under a fixed base and wipes it on
// setup; `tempfile::Builder` gives the same guarantee without a TOCTOU-prone manual wipe.

use std::path::{Path, PathBuf};

use log::warn;
use tempfile::TempDir;

use crate::error::{FileSystemError, SandboxError};
use crate::path_validator;
use crate::request::FileEntry;

/// Name of the bind-mounted subdirectory inside the per-session directory, matching the
/// spec's persisted-state layout: `base/<session_id>/work/<files...>`.
const WORK_SUBDIR: &str = "work";

/// An ephemeral workspace directory, torn down automatically when dropped.
///
/// Mirrors pants' `AsyncDropSandbox`: the directory lives for the duration of one execution
/// and is removed unconditionally afterward, whether the execution succeeded, failed, timed
/// out, or was cancelled mid-flight. The on-disk shape is `session_dir/work/`, matching the
/// two-level `base/<session_id>/work/` layout in `SPEC_FULL.md` §6: `session_dir` is the unit
/// that gets removed wholesale on cleanup, `work` is the subtree actually bind-mounted into
/// the jail as `/app`.
pub struct Workspace {
    session_dir: TempDir,
    work_dir: PathBuf,
}

impl Workspace {
    /// Creates a new empty workspace directory under `base`.
    pub fn create(base: &Path) -> Result<Self, SandboxError> {
        std::fs::create_dir_all(base).map_err(|source| {
            FileSystemError::CreateDir {
                path: base.to_path_buf(),
                source,
            }
        })?;
        let session_dir = tempfile::Builder::new()
            .prefix("sandbox-")
            .tempdir_in(base)
            .map_err(|source| FileSystemError::CreateDir {
                path: base.to_path_buf(),
                source,
            })?;
        let work_dir = session_dir.path().join(WORK_SUBDIR);
        std::fs::create_dir_all(&work_dir).map_err(|source| FileSystemError::CreateDir {
            path: work_dir.clone(),
            source,
        })?;
        Ok(Workspace {
            session_dir,
            work_dir,
        })
    }

    /// Absolute path to the workspace root, bind-mounted into the jail as `/app`. This is the
    /// `work/` subdirectory of the session directory, not the session directory itself.
    pub fn root(&self) -> &Path {
        &self.work_dir
    }

    /// Writes each file into the workspace, validating its relative path first. Duplicate
    /// relative paths: last writer wins, matching the original's dict-keyed-by-path
    /// semantics.
    pub fn populate(&self, files: &[FileEntry]) -> Result<(), SandboxError> {
        for file in files {
            let target = path_validator::validate(&file.path, self.root())
                .map_err(SandboxError::InvalidPath)?;

            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|source| FileSystemError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }

            std::fs::write(&target, &file.content).map_err(|source| FileSystemError::WriteFile {
                path: target.clone(),
                source,
            })?;

            match path_validator::contained_after_write(&target, self.root()) {
                Ok(true) => {}
                Ok(false) => {
                    let _ = std::fs::remove_file(&target);
                    return Err(SandboxError::InvalidPath(
                        crate::error::InvalidPath::Escapes(file.path.clone()),
                    ));
                }
                Err(source) => {
                    return Err(SandboxError::FileSystem(FileSystemError::WriteFile {
                        path: target,
                        source,
                    }))
                }
            }
        }
        Ok(())
    }

    /// Removes the entire `base/<session_id>` subtree, synchronously, ahead of time.
    /// Idempotent: calling this and then letting the value drop (or calling it twice) is not
    /// an error.
    pub fn cleanup(self) {
        let path = self.session_dir.path().to_path_buf();
        if let Err(err) = self.session_dir.close() {
            warn!("failed to remove workspace directory {path:?}: {err}");
        }
    }

    /// The session directory's path (the parent of `work/`), used by tests that need to
    /// assert the whole subtree is gone, not just the bind-mounted `work/` directory.
    #[cfg(test)]
    pub(crate) fn path_for_test(&self) -> PathBuf {
        self.session_dir.path().to_path_buf()
    }
}
