//! Read-only table of the Linux signal numbers 1 through 31.

const SIGNAL_NAMES: [&str; 31] = [
    "SIGHUP",
    "SIGINT",
    "SIGQUIT",
    "SIGILL",
    "SIGTRAP",
    "SIGABRT",
    "SIGBUS",
    "SIGFPE",
    "SIGKILL",
    "SIGUSR1",
    "SIGSEGV",
    "SIGUSR2",
    "SIGPIPE",
    "SIGALRM",
    "SIGTERM",
    "SIGSTKFLT",
    "SIGCHLD",
    "SIGCONT",
    "SIGSTOP",
    "SIGTSTP",
    "SIGTTIN",
    "SIGTTOU",
    "SIGURG",
    "SIGXCPU",
    "SIGXFSZ",
    "SIGVTALRM",
    "SIGPROF",
    "SIGWINCH",
    "SIGIO",
    "SIGPWR",
    "SIGSYS",
];

/// Name of a signal in `1..=31`.
pub fn signal_name(signal: i32) -> Option<&'static str> {
    let idx = usize::try_from(signal).ok()?.checked_sub(1)?;
    SIGNAL_NAMES.get(idx).copied()
}

/// Like [`signal_name`], but numbers outside the table resolve to
/// `"unknown signal N"` instead of failing.
pub fn describe_signal(signal: i32) -> String {
    match signal_name(signal) {
        Some(name) => name.to_string(),
        None => format!("unknown signal {signal}"),
    }
}
