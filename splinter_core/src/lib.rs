pub mod artifact;
pub mod config;
pub mod detect;
pub mod executor;
pub mod formats;
pub mod mutator;
pub mod oracle;
pub mod session;
pub mod signals;

pub use artifact::ArtifactStore;
pub use config::SplinterConfig;
pub use detect::{FormatTag, detect};
pub use executor::{CommandExecutor, ExecutionResult, Executor, ExitKind, InputDelivery};
pub use formats::FormatError;
pub use mutator::{Candidate, Mutator, MutatorError, mutator_for};
pub use oracle::{BugReport, CrashOracle, FailureKind, Oracle};
pub use session::{Session, SessionError, SessionOutcome, run_session};
