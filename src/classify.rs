// C4: Outcome Classifier.
//
// A pure function of (raw exit code, duration, outer-timeout flag) to `Status`, grounded on
// `original_source/executor.py`'s `_parse_result`. The Python original's own comments show
// its author going back and forth on the exit-code-137-vs-signal-9 mapping before settling on
// the asymmetric rule kept here: 137 (128 + SIGKILL) from nsjail's own `--time_limit` kill is
// reported as OOM, while a bare `-9` (the outer supervisor's own `SIGKILL` of a wedged jail)
// is reported as a timeout. The two paths are distinguished by which layer did the killing,
// not by the signal itself, which is why `outer_timeout_triggered` is checked first.

use crate::request::Status;

/// Classifies one execution's raw outcome.
///
/// Precedence, matching the original:
/// 1. The outer supervisor had to kill the process group itself: `Timeout`, regardless of
///    what exit code that produced.
/// 2. Exit code `0`: `Success`.
/// 3. Exit code `137`: `Oom` (nsjail's own cgroup/rlimit kill manifests this way).
/// 4. Exit code `-9`: `Timeout` (nsjail's own `--time_limit` kill).
/// 5. Anything else: `Error`.
pub fn classify(raw_exit_code: i32, _duration_ms: u64, outer_timeout_triggered: bool) -> Status {
    if outer_timeout_triggered {
        return Status::Timeout;
    }
    match raw_exit_code {
        0 => Status::Success,
        137 => Status::Oom,
        -9 => Status::Timeout,
        _ => Status::Error,
    }
}
