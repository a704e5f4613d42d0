// Data model: `ExecutionRequest` in, `ExecutionResult` out.
//
// These mirror the request/response shapes the reference service (an external, out-of-scope
// HTTP dispatch layer) bridges to JSON, hence the `serde` derives: the core itself never
// serializes anything, but a caller sitting one layer up should be able to do so trivially.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default resource limits applied when a request does not specify one.
pub const DEFAULT_TIMEOUT_S: u32 = 5;
pub const DEFAULT_MEMORY_MB: u32 = 128;
pub const DEFAULT_CPUS: f32 = 1.0;

const MIN_TIMEOUT_S: u32 = 1;
const MAX_TIMEOUT_S: u32 = 60;
const MIN_MEMORY_MB: u32 = 64;
const MAX_MEMORY_MB: u32 = 1024;
const MIN_CPUS: f32 = 0.1;
const MAX_CPUS: f32 = 4.0;

/// One file to materialize into the workspace before execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileEntry {
    /// Relative path, e.g. `"main.py"` or `"data/config.json"`. Validated by
    /// [`crate::path_validator::validate`] before it ever touches disk.
    pub path: String,
    /// UTF-8 file content. Binary payloads are out of scope for v1.
    pub content: String,
}

/// Resource caps applied to a single execution.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub timeout_s: u32,
    pub memory_mb: u32,
    pub cpus: f32,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            timeout_s: DEFAULT_TIMEOUT_S,
            memory_mb: DEFAULT_MEMORY_MB,
            cpus: DEFAULT_CPUS,
        }
    }
}

impl Limits {
    /// Validates the limits are within their documented ranges.
    ///
    /// This is an upstream (caller-facing) concern in the full system, but the core enforces
    /// it defensively since it is cheap and the invariant is load-bearing for `jail.rs`'s
    /// argument construction.
    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_TIMEOUT_S..=MAX_TIMEOUT_S).contains(&self.timeout_s) {
            return Err(format!(
                "timeout_s {} out of range [{MIN_TIMEOUT_S}, {MAX_TIMEOUT_S}]",
                self.timeout_s
            ));
        }
        if !(MIN_MEMORY_MB..=MAX_MEMORY_MB).contains(&self.memory_mb) {
            return Err(format!(
                "memory_mb {} out of range [{MIN_MEMORY_MB}, {MAX_MEMORY_MB}]",
                self.memory_mb
            ));
        }
        if self.cpus < MIN_CPUS || self.cpus > MAX_CPUS {
            return Err(format!(
                "cpus {} out of range [{MIN_CPUS}, {MAX_CPUS}]",
                self.cpus
            ));
        }
        Ok(())
    }

    /// Fractional CPU requests are floored, with a minimum of one core.
    ///
    /// Whether a finer-grained CPU limit is desired is an open question upstream; v1 always
    /// floors.
    pub fn effective_max_cpus(&self) -> u32 {
        (self.cpus.floor() as u32).max(1)
    }
}

/// A request to execute caller-supplied code in a confined environment.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionRequest {
    /// Informational tag (e.g. `"python:3.9"`). Does not alter behavior in v1; see
    /// the Non-goals and Open Questions in the spec around runtime-selected rootfs images.
    pub runtime: String,
    /// Files to materialize into the workspace. Duplicate relative paths: last writer wins.
    pub files: Vec<FileEntry>,
    /// Shell command string executed inside the jail via the configured shell interpreter.
    pub entrypoint: String,
    /// Environment variables injected into the child. Names must match `[A-Za-z_][A-Za-z0-9_]*`.
    pub env_vars: BTreeMap<String, String>,
    pub limits: Limits,
}

impl Default for ExecutionRequest {
    fn default() -> Self {
        ExecutionRequest {
            runtime: "python:3.9".to_string(),
            files: Vec::new(),
            entrypoint: String::new(),
            env_vars: BTreeMap::new(),
            limits: Limits::default(),
        }
    }
}

static ENV_VAR_NAME_RE: once_cell::sync::Lazy<regex::Regex> =
    once_cell::sync::Lazy::new(|| regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

impl ExecutionRequest {
    /// Validates the parts of the request the core itself is responsible for enforcing:
    /// resource limit ranges and environment variable name shape. Path safety is the path
    /// validator's job and is checked per-file during workspace population, not here.
    pub fn validate(&self) -> Result<(), String> {
        self.limits.validate()?;
        for name in self.env_vars.keys() {
            if !ENV_VAR_NAME_RE.is_match(name) {
                return Err(format!("invalid environment variable name `{name}`"));
            }
        }
        Ok(())
    }
}

/// The classified outcome of a single execution.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Timeout,
    Oom,
    Error,
}

/// The outcome of running one `ExecutionRequest`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: Status,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    /// Builds the canonical "something went wrong before/during execution" result: the
    /// coordinator's catch-all for every `SandboxError`, per the spec's propagation policy.
    pub fn error(stderr: impl Into<String>, execution_time_ms: u64) -> Self {
        ExecutionResult {
            status: Status::Error,
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: -1,
            execution_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_accept_boundary_values() {
        let low = Limits {
            timeout_s: 1,
            memory_mb: 64,
            cpus: 0.1,
        };
        let high = Limits {
            timeout_s: 60,
            memory_mb: 1024,
            cpus: 4.0,
        };
        assert!(low.validate().is_ok());
        assert!(high.validate().is_ok());
    }

    #[test]
    fn limits_reject_out_of_range() {
        let bad_timeout = Limits {
            timeout_s: 0,
            ..Limits::default()
        };
        assert!(bad_timeout.validate().is_err());

        let bad_timeout_high = Limits {
            timeout_s: 61,
            ..Limits::default()
        };
        assert!(bad_timeout_high.validate().is_err());

        let bad_mem = Limits {
            memory_mb: 63,
            ..Limits::default()
        };
        assert!(bad_mem.validate().is_err());
    }

    #[test]
    fn fractional_cpus_floor_with_minimum_one() {
        let limits = Limits {
            cpus: 0.5,
            ..Limits::default()
        };
        assert_eq!(limits.effective_max_cpus(), 1);

        let limits = Limits {
            cpus: 3.9,
            ..Limits::default()
        };
        assert_eq!(limits.effective_max_cpus(), 3);
    }

    #[test]
    fn env_var_name_validation() {
        let mut req = ExecutionRequest::default();
        req.entrypoint = "true".to_string();
        req.env_vars.insert("GOOD_NAME".to_string(), "1".to_string());
        assert!(req.validate().is_ok());

        req.env_vars.insert("1BAD".to_string(), "1".to_string());
        assert!(req.validate().is_err());
    }
}
