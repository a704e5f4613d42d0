// Process-wide configuration, read once from the environment at construction time.
//
// Grounded on the spec's treatment of `SANDBOX_ROOTFS` ("read once at component
// construction; treat as immutable for the lifetime of the process"), generalized to the
// rest of this crate's environment variables.

use std::path::PathBuf;

use crate::error::ConfigurationError;

const ENV_ROOTFS: &str = "SANDBOX_ROOTFS";
const ENV_WORK_DIR: &str = "SANDBOX_WORK_DIR";
const ENV_JAIL_BIN: &str = "SANDBOX_JAIL_BIN";
const ENV_MAX_CONCURRENT: &str = "SANDBOX_MAX_CONCURRENT";

const DEFAULT_ROOTFS: &str = "/opt/sandbox-rootfs";
const DEFAULT_WORK_DIR: &str = "/tmp/sandbox";
const DEFAULT_JAIL_BIN: &str = "nsjail";
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

/// Immutable, process-wide configuration for the sandbox pipeline.
#[derive(Clone, Debug)]
pub struct Config {
    /// Absolute path to the confined filesystem image bind-mounted as the jail's root.
    pub rootfs: PathBuf,
    /// Writable base directory under which ephemeral per-session workspaces are created.
    pub work_dir_base: PathBuf,
    /// Name or path of the confined-execution binary, resolved on `PATH`.
    pub jail_bin: String,
    /// Admission-control capacity: the maximum number of concurrent executions.
    pub max_concurrent: usize,
}

impl Config {
    /// Reads configuration from the environment, applying documented defaults for anything
    /// unset. Does not validate that the jail binary or rootfs actually exist; call
    /// [`Config::check`] for that once at startup.
    pub fn from_env() -> Self {
        Config {
            rootfs: std::env::var(ENV_ROOTFS)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_ROOTFS)),
            work_dir_base: std::env::var(ENV_WORK_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_WORK_DIR)),
            jail_bin: std::env::var(ENV_JAIL_BIN).unwrap_or_else(|_| DEFAULT_JAIL_BIN.to_string()),
            max_concurrent: std::env::var(ENV_MAX_CONCURRENT)
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_MAX_CONCURRENT),
        }
    }

    /// Validates that the configured jail binary is resolvable on `PATH` and that the work
    /// base directory can be created. Surfaces `ConfigurationError` early, rather than at the
    /// first execution attempt.
    pub fn check(&self) -> Result<(), ConfigurationError> {
        if which(&self.jail_bin).is_none() {
            return Err(ConfigurationError::JailBinaryMissing(self.jail_bin.clone()));
        }
        if !self.rootfs.exists() {
            return Err(ConfigurationError::RootfsMissing(self.rootfs.clone()));
        }
        std::fs::create_dir_all(&self.work_dir_base)
            .map_err(|e| ConfigurationError::WorkDirUnusable(self.work_dir_base.clone(), e))?;
        Ok(())
    }
}

/// Minimal `PATH` resolution, avoiding a dependency on the `which` crate for a single lookup.
fn which(bin: &str) -> Option<PathBuf> {
    let candidate = PathBuf::from(bin);
    if candidate.is_absolute() {
        return candidate.is_file().then_some(candidate);
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(bin))
        .find(|full| full.is_file())
}
