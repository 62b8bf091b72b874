use crate::executor::{ExecutionResult, ExitKind};
use crate::signals::describe_signal;
use std::fmt;

/// The kind of terminal finding an execution produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Crash,
    Timeout,
}

impl FailureKind {
    /// Suffix used to name the artifact file for this kind.
    pub fn artifact_suffix(&self) -> &'static str {
        match self {
            FailureKind::Crash => "crash",
            FailureKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Crash => f.write_str("CRASHED"),
            FailureKind::Timeout => f.write_str("TIMEOUT"),
        }
    }
}

/// Evidence for a finding identified by an `Oracle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BugReport {
    pub kind: FailureKind,
    /// Signal number for crashes.
    pub signal: Option<i32>,
    /// Resolved signal name, or `"unknown signal N"` for numbers outside the
    /// table.
    pub signal_name: Option<String>,
    /// A human-readable description of the finding.
    pub description: String,
    /// MD5 hex digest of the offending input.
    pub input_hash: String,
}

/// An `Oracle` decides whether an execution outcome is a finding.
pub trait Oracle {
    /// Returns `Some(report)` when `result` should end the session.
    fn examine(&self, input: &[u8], result: &ExecutionResult) -> Option<BugReport>;
}

/// Reports every signal death and every timeout. Normal exits, whatever
/// their code, are not findings.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrashOracle;

impl CrashOracle {
    pub fn new() -> Self {
        CrashOracle
    }
}

impl Oracle for CrashOracle {
    fn examine(&self, input: &[u8], result: &ExecutionResult) -> Option<BugReport> {
        let (kind, signal, description) = match result.status {
            ExitKind::Normal(_) => return None,
            ExitKind::KilledBySignal(signal) => (
                FailureKind::Crash,
                Some(signal),
                format!("Terminated by signal {signal} ({})", describe_signal(signal)),
            ),
            ExitKind::TimedOut => (
                FailureKind::Timeout,
                None,
                format!("No exit within {} ms", result.elapsed.as_millis()),
            ),
        };

        Some(BugReport {
            kind,
            signal,
            signal_name: signal.map(describe_signal),
            description,
            input_hash: format!("{:x}", md5::compute(input)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn result(status: ExitKind) -> ExecutionResult {
        ExecutionResult {
            stdout: Vec::new(),
            stderr: Vec::new(),
            status,
            elapsed: Duration::from_millis(500),
        }
    }

    #[test]
    fn crash_oracle_reports_signal_deaths() {
        let oracle = CrashOracle::new();
        let input = [0xFF, 0xFE, 0xFD];
        let report = oracle
            .examine(&input, &result(ExitKind::KilledBySignal(11)))
            .expect("signal death must be reported");

        assert_eq!(report.kind, FailureKind::Crash);
        assert_eq!(report.signal, Some(11));
        assert_eq!(report.signal_name.as_deref(), Some("SIGSEGV"));
        assert!(report.description.contains("SIGSEGV"));
        assert_eq!(report.input_hash, format!("{:x}", md5::compute(input)));
    }

    #[test]
    fn crash_oracle_reports_timeouts() {
        let report = CrashOracle::new()
            .examine(b"slow", &result(ExitKind::TimedOut))
            .expect("timeout must be reported");
        assert_eq!(report.kind, FailureKind::Timeout);
        assert_eq!(report.signal, None);
        assert_eq!(report.kind.artifact_suffix(), "timeout");
    }

    #[test]
    fn crash_oracle_ignores_normal_exits() {
        let oracle = CrashOracle::new();
        assert!(oracle.examine(b"a", &result(ExitKind::Normal(0))).is_none());
        assert!(oracle.examine(b"a", &result(ExitKind::Normal(139))).is_none());
    }

    #[test]
    fn unknown_signals_fall_back_to_a_description() {
        let report = CrashOracle::new()
            .examine(b"", &result(ExitKind::KilledBySignal(40)))
            .unwrap();
        assert_eq!(report.signal_name.as_deref(), Some("unknown signal 40"));
    }
}
