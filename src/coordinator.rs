// C5: Execution Coordinator.
//
// Orchestrates C1-C4 behind a single async entry point. Grounded on
// `original_source/manager.py`'s `SandboxManager`: an `asyncio.Semaphore(max_concurrent)`
// gates admission, and the actual setup/run/classify/cleanup pipeline is pushed onto a
// worker thread via `loop.run_in_executor(None, self._execute_sync, request)`. This crate
// mirrors that shape with `tokio::sync::Semaphore` and `tokio::task::spawn_blocking`, so the
// only two async suspension points per request are the semaphore acquire and the
// worker-thread join.
//
// Unlike pantsbuild-pants' `bounded.rs`, which wraps its inner `CommandRunner` in a
// preemptible, balancing semaphore (`AsyncSemaphore`/`Task`), this coordinator needs none of
// that machinery: the spec calls for a plain admission cap with no priority or preemption,
// so a bare `tokio::sync::Semaphore` is the right-sized tool.

use std::sync::Arc;
use std::time::Instant;

use log::{error, info, warn};
use tokio::sync::Semaphore;

use crate::classify::classify;
use crate::config::Config;
use crate::error::SandboxError;
use crate::jail::Jail;
use crate::request::{ExecutionRequest, ExecutionResult, Status};
use crate::workspace::Workspace;

/// Ties together configuration, the jail invoker, and the concurrency limiter.
pub struct ExecutionCoordinator {
    config: Config,
    jail: Arc<dyn Jail>,
    semaphore: Arc<Semaphore>,
}

impl ExecutionCoordinator {
    pub fn new(config: Config, jail: Arc<dyn Jail>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        ExecutionCoordinator {
            config,
            jail,
            semaphore,
        }
    }

    /// Runs one request end to end: admission control, workspace setup, jail invocation,
    /// outcome classification, and guaranteed workspace teardown.
    ///
    /// Every `SandboxError` raised anywhere in this pipeline is caught here and turned into
    /// an `ExecutionResult` with `status: Status::Error`; nothing propagates to the caller,
    /// matching `manager.py::_execute_sync`'s blanket `except (SandboxError, Exception)`.
    pub async fn run(&self, request: ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();

        if let Err(msg) = request.validate() {
            warn!("rejecting invalid request: {msg}");
            return ExecutionResult::error(msg, elapsed_ms(started));
        }

        let _permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                // The semaphore is only ever closed by a coordinator shutdown path this crate
                // does not implement; treat it defensively as an execution error.
                return ExecutionResult::error(
                    "sandbox is shutting down".to_string(),
                    elapsed_ms(started),
                );
            }
        };

        let config = self.config.clone();
        let jail = Arc::clone(&self.jail);

        match self.execute(config, jail, request).await {
            Ok(result) => result,
            Err(err) => {
                // Programming faults (panics/unexpected host errors caught at the
                // worker-thread boundary) are logged at `error`; ordinary sandbox-domain
                // failures (bad paths, disk trouble, missing jail binary, a child that
                // failed to spawn) are expected occurrences and logged at `warn`.
                match &err {
                    SandboxError::Unexpected(_) => error!("execution failed: {err}"),
                    _ => warn!("execution failed: {err}"),
                }
                ExecutionResult::error(err.to_string(), elapsed_ms(started))
            }
        }
    }

    async fn execute(
        &self,
        config: Config,
        jail: Arc<dyn Jail>,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult, SandboxError> {
        let started = Instant::now();

        let workspace = Workspace::create(&config.work_dir_base)?;
        workspace.populate(&request.files)?;

        let workdir = workspace.root().to_path_buf();
        let rootfs = config.rootfs.clone();
        let entrypoint = request.entrypoint.clone();
        let env_vars = request.env_vars.clone();
        let limits = request.limits;

        let outcome = jail
            .run(&workdir, &rootfs, &entrypoint, &env_vars, &limits)
            .await?;

        workspace.cleanup();

        let status = classify(
            outcome.raw_exit_code,
            outcome.duration_ms,
            outcome.outer_timeout_triggered,
        );
        info!(
            "execution finished: status={status:?} exit_code={} duration_ms={}",
            outcome.raw_exit_code, outcome.duration_ms
        );

        let _ = started;
        Ok(ExecutionResult {
            status,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            exit_code: outcome.raw_exit_code,
            execution_time_ms: outcome.duration_ms,
        })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jail::JailOutcome;
    use crate::request::{FileEntry, Limits};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeJail {
        outcome: JailOutcome,
        concurrent: Arc<AtomicUsize>,
        max_seen: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Jail for FakeJail {
        async fn run(
            &self,
            _workdir: &Path,
            _rootfs: &Path,
            _entrypoint: &str,
            _env_vars: &BTreeMap<String, String>,
            _limits: &Limits,
        ) -> Result<JailOutcome, SandboxError> {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            Ok(self.outcome.clone())
        }
    }

    fn test_config(max_concurrent: usize) -> Config {
        Config {
            rootfs: std::env::temp_dir(),
            work_dir_base: std::env::temp_dir().join("sandbox-coordinator-tests"),
            jail_bin: "nsjail".to_string(),
            max_concurrent,
        }
    }

    #[tokio::test]
    async fn successful_execution_reports_success() {
        let jail = Arc::new(FakeJail {
            outcome: JailOutcome {
                raw_exit_code: 0,
                stdout: "hi".to_string(),
                stderr: String::new(),
                duration_ms: 5,
                outer_timeout_triggered: false,
            },
            concurrent: Arc::new(AtomicUsize::new(0)),
            max_seen: Arc::new(AtomicUsize::new(0)),
        });
        let coordinator = ExecutionCoordinator::new(test_config(10), jail);
        let mut request = ExecutionRequest::default();
        request.entrypoint = "echo hi".to_string();
        let result = coordinator.run(request).await;
        assert_eq!(result.status, Status::Success);
        assert_eq!(result.stdout, "hi");
    }

    #[tokio::test]
    async fn timeout_outcome_is_classified_as_timeout() {
        let jail = Arc::new(FakeJail {
            outcome: JailOutcome {
                raw_exit_code: -9,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 7000,
                outer_timeout_triggered: true,
            },
            concurrent: Arc::new(AtomicUsize::new(0)),
            max_seen: Arc::new(AtomicUsize::new(0)),
        });
        let coordinator = ExecutionCoordinator::new(test_config(10), jail);
        let mut request = ExecutionRequest::default();
        request.entrypoint = "sleep 30".to_string();
        let result = coordinator.run(request).await;
        assert_eq!(result.status, Status::Timeout);
    }

    #[tokio::test]
    async fn oom_outcome_is_classified_as_oom() {
        let jail = Arc::new(FakeJail {
            outcome: JailOutcome {
                raw_exit_code: 137,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 100,
                outer_timeout_triggered: false,
            },
            concurrent: Arc::new(AtomicUsize::new(0)),
            max_seen: Arc::new(AtomicUsize::new(0)),
        });
        let coordinator = ExecutionCoordinator::new(test_config(10), jail);
        let request = ExecutionRequest::default();
        let result = coordinator.run(request).await;
        assert_eq!(result.status, Status::Oom);
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_before_touching_the_jail() {
        let jail = Arc::new(FakeJail {
            outcome: JailOutcome {
                raw_exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 0,
                outer_timeout_triggered: false,
            },
            concurrent: Arc::new(AtomicUsize::new(0)),
            max_seen: Arc::new(AtomicUsize::new(0)),
        });
        let coordinator = ExecutionCoordinator::new(test_config(10), jail);
        let mut request = ExecutionRequest::default();
        request.limits.timeout_s = 0;
        let result = coordinator.run(request).await;
        assert_eq!(result.status, Status::Error);
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_max_concurrent() {
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let jail = Arc::new(FakeJail {
            outcome: JailOutcome {
                raw_exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 5,
                outer_timeout_triggered: false,
            },
            concurrent: concurrent.clone(),
            max_seen: max_seen.clone(),
        });
        let coordinator = Arc::new(ExecutionCoordinator::new(test_config(2), jail));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                coordinator.run(ExecutionRequest::default()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}
