//! The fuzzing loop: pull a candidate, run it, classify, and stop on the first
//! crash or timeout.

use crate::artifact::ArtifactStore;
use crate::config::{SessionSettings, SplinterConfig};
use crate::detect::{FormatTag, detect};
use crate::executor::{CommandExecutor, ExecutionResult, Executor, ExecutorError, ExitKind};
use crate::formats::FormatError;
use crate::mutator::{Mutator, MutatorError, mutator_for};
use crate::oracle::{BugReport, CrashOracle, Oracle};
use log::{debug, info, warn};
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("couldn't open input file {path:?}: {source}")]
    Seed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("couldn't open target binary {path:?}: {source}")]
    Binary {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Mutator(#[from] MutatorError),

    #[error("seed stopped parsing mid-session: {0}")]
    Format(#[from] FormatError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("failed to write artifact: {0}")]
    Artifact(#[source] io::Error),
}

/// Summary of one iteration, handed to the caller's report callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReport {
    pub index: u64,
    pub status: ExitKind,
    pub exit_code: Option<i32>,
    pub operation: &'static str,
    pub input_len: usize,
}

impl IterationReport {
    fn new(
        index: u64,
        operation: &'static str,
        input_len: usize,
        result: &ExecutionResult,
    ) -> Self {
        Self {
            index,
            status: result.status,
            exit_code: result.exit_code(),
            operation,
            input_len,
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self.status {
            ExitKind::Normal(_) => "PASSED",
            ExitKind::KilledBySignal(_) => "CRASHED",
            ExitKind::TimedOut => "TIMEOUT",
        }
    }
}

impl fmt::Display for IterationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} | exitcode: ", self.index, self.status_label())?;
        match self.exit_code {
            Some(code) => write!(f, "{code}")?,
            None => f.write_str("-")?,
        }
        write!(
            f,
            " | method: {} | input_length: {}",
            self.operation, self.input_len
        )
    }
}

/// The terminal result that ended a session early.
#[derive(Debug, Clone)]
pub struct Finding {
    pub iteration: u64,
    pub operation: &'static str,
    pub report: BugReport,
    pub artifact: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// Number of candidates executed.
    pub iterations: u64,
    pub finding: Option<Finding>,
    pub elapsed: Duration,
}

/// A binary path without a `/` is taken relative to the working directory.
pub fn resolve_binary(binary: &str) -> PathBuf {
    if binary.contains('/') {
        PathBuf::from(binary)
    } else {
        PathBuf::from(format!("./{binary}"))
    }
}

/// Session RNG: reproducible when `seed` is set, freshly seeded otherwise.
pub fn session_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_rng(&mut rand::rng()),
    }
}

pub struct Session<E: Executor> {
    binary: PathBuf,
    mutator: Box<dyn Mutator>,
    executor: E,
    oracle: CrashOracle,
    artifacts: ArtifactStore,
    max_iterations: u64,
}

impl<E: Executor> Session<E> {
    /// Detects the seed's format and resolves its mutator. Fails when no
    /// mutator is registered for the format or the seed does not parse as it.
    pub fn new(
        binary: impl Into<PathBuf>,
        seed: Vec<u8>,
        settings: &SessionSettings,
        executor: E,
    ) -> Result<Self, SessionError> {
        let format = detect(&seed);
        info!("File type detected: '{format}'");
        let mutator = mutator_for(format, seed)?;
        debug!(
            "Registered operations for {format}: {}",
            mutator.operation_names().join(", ")
        );

        Ok(Self {
            binary: binary.into(),
            mutator,
            executor,
            oracle: CrashOracle::new(),
            artifacts: ArtifactStore::new(&settings.artifact_dir),
            max_iterations: settings.max_iterations,
        })
    }

    pub fn format(&self) -> FormatTag {
        self.mutator.format()
    }

    /// Runs up to `max_iterations` candidates, one at a time. Returns early,
    /// after persisting the candidate, on the first crash or timeout.
    pub fn run(
        &mut self,
        rng: &mut dyn RngCore,
        mut on_iteration: impl FnMut(&IterationReport),
    ) -> Result<SessionOutcome, SessionError> {
        let start = Instant::now();

        for index in 1..=self.max_iterations {
            let candidate = self.mutator.next_candidate(rng)?;
            let result = self.executor.execute_sync(&candidate.bytes)?;
            on_iteration(&IterationReport::new(
                index,
                candidate.operation,
                candidate.bytes.len(),
                &result,
            ));

            let Some(report) = self.oracle.examine(&candidate.bytes, &result) else {
                continue;
            };

            let artifact = self
                .artifacts
                .persist(&self.binary, report.kind, &candidate.bytes)
                .map_err(SessionError::Artifact)?;
            warn!(
                "{} on iteration {index} via {}: {}",
                report.kind, candidate.operation, report.description
            );
            info!("Dumped offending input to {}", artifact.display());

            return Ok(SessionOutcome {
                iterations: index,
                finding: Some(Finding {
                    iteration: index,
                    operation: candidate.operation,
                    report,
                    artifact,
                }),
                elapsed: start.elapsed(),
            });
        }

        info!("No findings after {} iterations", self.max_iterations);
        Ok(SessionOutcome {
            iterations: self.max_iterations,
            finding: None,
            elapsed: start.elapsed(),
        })
    }
}

/// Reads the seed, builds a command executor for `binary` from `config` and
/// runs a full session.
pub fn run_session(
    binary: &str,
    seed_path: &Path,
    config: &SplinterConfig,
    on_iteration: impl FnMut(&IterationReport),
) -> Result<SessionOutcome, SessionError> {
    let binary = resolve_binary(binary);
    std::fs::metadata(&binary).map_err(|source| SessionError::Binary {
        path: binary.clone(),
        source,
    })?;
    let seed = std::fs::read(seed_path).map_err(|source| SessionError::Seed {
        path: seed_path.to_path_buf(),
        source,
    })?;

    let executor = CommandExecutor::new(
        config
            .executor
            .command_config(&binary, config.session.timeout()),
    )?;
    let mut session = Session::new(binary, seed, &config.session, executor)?;
    let mut rng = session_rng(config.session.rng_seed);
    session.run(&mut rng, on_iteration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{CommandExecutorConfig, InputDelivery};
    use crate::oracle::FailureKind;
    use tempfile::tempdir;

    /// Exits cleanly on every run except the scripted one, which ends with
    /// the given status. Records every input it receives.
    struct ScriptedExecutor {
        fail_on: Option<(usize, ExitKind)>,
        seen: Vec<Vec<u8>>,
    }

    impl ScriptedExecutor {
        fn new(fail_on: Option<(usize, ExitKind)>) -> Self {
            Self {
                fail_on,
                seen: Vec::new(),
            }
        }
    }

    impl Executor for ScriptedExecutor {
        fn execute_sync(&mut self, input: &[u8]) -> Result<ExecutionResult, ExecutorError> {
            self.seen.push(input.to_vec());
            let status = match self.fail_on {
                Some((run, status)) if run == self.seen.len() => status,
                _ => ExitKind::Normal(0),
            };
            Ok(ExecutionResult {
                stdout: Vec::new(),
                stderr: Vec::new(),
                status,
                elapsed: Duration::ZERO,
            })
        }
    }

    fn settings(max_iterations: u64, artifact_dir: &Path) -> SessionSettings {
        SessionSettings {
            max_iterations,
            artifact_dir: artifact_dir.to_path_buf(),
            ..SessionSettings::default()
        }
    }

    #[test]
    fn clean_target_runs_exactly_k_iterations() {
        let dir = tempdir().unwrap();
        let executor = ScriptedExecutor::new(None);
        let mut session = Session::new(
            "./target",
            b"h1,h2\n1,2\n3,4\n".to_vec(),
            &settings(7, dir.path()),
            executor,
        )
        .unwrap();
        assert_eq!(session.format(), FormatTag::Csv);

        let mut reports = Vec::new();
        let mut rng = session_rng(Some(1));
        let outcome = session.run(&mut rng, |r| reports.push(r.clone())).unwrap();

        assert_eq!(outcome.iterations, 7);
        assert!(outcome.finding.is_none());
        assert_eq!(session.executor.seen.len(), 7);
        assert_eq!(
            reports.iter().map(|r| r.index).collect::<Vec<_>>(),
            (1..=7).collect::<Vec<_>>()
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn crash_on_third_iteration_stops_and_persists_that_candidate() {
        let dir = tempdir().unwrap();
        let executor = ScriptedExecutor::new(Some((3, ExitKind::KilledBySignal(11))));
        let mut session = Session::new(
            "./bin/target.out",
            b"line one\nline two\n".to_vec(),
            &settings(u64::MAX, dir.path()),
            executor,
        )
        .unwrap();

        let mut rng = session_rng(Some(2));
        let outcome = session.run(&mut rng, |_| {}).unwrap();

        assert_eq!(outcome.iterations, 3);
        let finding = outcome.finding.expect("crash must be reported");
        assert_eq!(finding.iteration, 3);
        assert_eq!(finding.report.signal_name.as_deref(), Some("SIGSEGV"));
        assert_eq!(finding.artifact, dir.path().join("target_crash.txt"));
        assert_eq!(
            std::fs::read(&finding.artifact).unwrap(),
            session.executor.seen[2]
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn timeout_on_fourth_iteration_stops_and_persists_that_candidate() {
        let dir = tempdir().unwrap();
        let executor = ScriptedExecutor::new(Some((4, ExitKind::TimedOut)));
        let mut session = Session::new(
            "./target",
            b"h1,h2\n1,2\n3,4\n".to_vec(),
            &settings(50, dir.path()),
            executor,
        )
        .unwrap();

        let mut labels = Vec::new();
        let mut rng = session_rng(Some(4));
        let outcome = session
            .run(&mut rng, |r| labels.push(r.status_label()))
            .unwrap();

        assert_eq!(outcome.iterations, 4);
        assert_eq!(labels, ["PASSED", "PASSED", "PASSED", "TIMEOUT"]);
        let finding = outcome.finding.expect("timeout must be reported");
        assert_eq!(finding.iteration, 4);
        assert_eq!(finding.report.kind, FailureKind::Timeout);
        assert_eq!(finding.report.signal, None);
        assert_eq!(finding.artifact, dir.path().join("target_timeout.txt"));
        assert_eq!(
            std::fs::read(&finding.artifact).unwrap(),
            session.executor.seen[3]
        );
        assert_eq!(session.executor.seen.len(), 4);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn real_target_crashing_on_third_run() {
        let dir = tempdir().unwrap();
        let counter = dir.path().join("runs");
        let script = format!(
            "n=$(cat '{c}' 2>/dev/null || echo 0); n=$((n + 1)); echo $n > '{c}'; \
             cat > /dev/null; if [ $n -eq 3 ]; then kill -SEGV $$; fi; exit 0",
            c = counter.display()
        );
        let executor = CommandExecutor::new(CommandExecutorConfig {
            command: vec!["/bin/sh".into(), "-c".into(), script],
            input_delivery: InputDelivery::StdIn,
            timeout: Duration::from_secs(10),
            working_dir: None,
        })
        .unwrap();
        let artifacts = dir.path().join("out");
        let mut session = Session::new(
            "sh",
            br#"{"len": 12, "input": "AAAABBBBCCCC"}"#.to_vec(),
            &settings(100, &artifacts),
            executor,
        )
        .unwrap();
        assert_eq!(session.format(), FormatTag::Json);

        let mut statuses = Vec::new();
        let mut rng = session_rng(Some(3));
        let outcome = session
            .run(&mut rng, |r| statuses.push(r.status_label()))
            .unwrap();

        assert_eq!(outcome.iterations, 3);
        assert_eq!(statuses, ["PASSED", "PASSED", "CRASHED"]);
        let finding = outcome.finding.unwrap();
        assert_eq!(finding.artifact, artifacts.join("sh_crash.txt"));
        assert!(finding.artifact.exists());
    }

    #[test]
    fn unregistered_format_is_fatal() {
        let dir = tempdir().unwrap();
        let executor = ScriptedExecutor::new(None);
        let err = Session::new(
            "./target",
            b"%PDF-1.7\n".to_vec(),
            &settings(1, dir.path()),
            executor,
        )
        .err()
        .expect("pdf has no mutator");
        assert!(matches!(
            err,
            SessionError::Mutator(MutatorError::Unsupported(FormatTag::Pdf))
        ));
    }

    #[test]
    fn report_line_carries_index_status_method_and_length() {
        let report = IterationReport {
            index: 4,
            status: ExitKind::KilledBySignal(6),
            exit_code: Some(-6),
            operation: "append_eot",
            input_len: 12,
        };
        assert_eq!(
            report.to_string(),
            "4 CRASHED | exitcode: -6 | method: append_eot | input_length: 12"
        );
    }

    #[test]
    fn bare_binary_names_resolve_to_the_working_directory() {
        assert_eq!(resolve_binary("target"), PathBuf::from("./target"));
        assert_eq!(resolve_binary("./target"), PathBuf::from("./target"));
        assert_eq!(resolve_binary("/usr/bin/env"), PathBuf::from("/usr/bin/env"));
    }

    #[test]
    fn run_session_fails_fast_on_missing_inputs() {
        let config = SplinterConfig::default();
        let missing_seed = run_session("/bin/sh", Path::new("/nonexistent/seed"), &config, |_| {});
        assert!(matches!(missing_seed, Err(SessionError::Seed { .. })));

        let missing_binary =
            run_session("/nonexistent/bin", Path::new("/dev/null"), &config, |_| {});
        assert!(matches!(missing_binary, Err(SessionError::Binary { .. })));
    }
}
