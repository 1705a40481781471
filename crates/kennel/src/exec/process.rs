//! Process liveness and signals.

#![allow(unsafe_code)]

use std::io;

use kennel_common::{KennelError, KennelResult};

/// Signal names without the `SIG` prefix.
const SIGNALS: [(&str, i32); 31] = [
    ("HUP", libc::SIGHUP),
    ("INT", libc::SIGINT),
    ("QUIT", libc::SIGQUIT),
    ("ILL", libc::SIGILL),
    ("TRAP", libc::SIGTRAP),
    ("ABRT", libc::SIGABRT),
    ("BUS", libc::SIGBUS),
    ("FPE", libc::SIGFPE),
    ("KILL", libc::SIGKILL),
    ("USR1", libc::SIGUSR1),
    ("SEGV", libc::SIGSEGV),
    ("USR2", libc::SIGUSR2),
    ("PIPE", libc::SIGPIPE),
    ("ALRM", libc::SIGALRM),
    ("TERM", libc::SIGTERM),
    ("STKFLT", libc::SIGSTKFLT),
    ("CHLD", libc::SIGCHLD),
    ("CONT", libc::SIGCONT),
    ("STOP", libc::SIGSTOP),
    ("TSTP", libc::SIGTSTP),
    ("TTIN", libc::SIGTTIN),
    ("TTOU", libc::SIGTTOU),
    ("URG", libc::SIGURG),
    ("XCPU", libc::SIGXCPU),
    ("XFSZ", libc::SIGXFSZ),
    ("VTALRM", libc::SIGVTALRM),
    ("PROF", libc::SIGPROF),
    ("WINCH", libc::SIGWINCH),
    ("IO", libc::SIGIO),
    ("PWR", libc::SIGPWR),
    ("SYS", libc::SIGSYS),
];

/// Whether `pid` refers to a running process.
///
/// Exited children of this process are reaped first. Processes we may not
/// signal count as alive, zombies count as dead.
#[must_use]
pub fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }

    let mut status = 0;
    // Fails with ECHILD for processes that are not our children.
    unsafe { libc::waitpid(pid, &raw mut status, libc::WNOHANG) };

    if unsafe { libc::kill(pid, 0) } != 0 {
        return io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
    }
    !is_zombie(pid)
}

fn is_zombie(pid: i32) -> bool {
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| stat_state(&stat))
        == Some('Z')
}

/// Process state from `/proc/<pid>/stat`. The command name may contain
/// spaces and parentheses, so the state is read after the last `)`.
fn stat_state(stat: &str) -> Option<char> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.trim_start().chars().next()
}

/// NUL separated command line of a process.
///
/// # Errors
///
/// Returns an error if the process does not exist.
pub fn cmdline(pid: i32) -> io::Result<Vec<u8>> {
    std::fs::read(format!("/proc/{pid}/cmdline"))
}

/// Send `signal` to `pid`. Returns `false` if the process is already gone.
///
/// # Errors
///
/// Returns an error if the signal can't be delivered for any other reason.
pub fn send_signal(pid: i32, signal: i32) -> KennelResult<bool> {
    if pid <= 0 {
        return Err(KennelError::Internal {
            message: format!("refusing to signal pid {pid}"),
        });
    }
    if unsafe { libc::kill(pid, signal) } == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(false),
        Some(libc::EPERM) => Err(KennelError::PermissionDenied {
            operation: format!("send signal {signal} to pid {pid}"),
        }),
        _ => Err(err.into()),
    }
}

/// Parse a signal given as number, name or `SIG` name.
///
/// # Errors
///
/// Returns a validation error for unknown signals.
pub fn parse_signal(signal: &str) -> KennelResult<i32> {
    if let Ok(num) = signal.parse::<i32>() {
        return if (1..=libc::SIGRTMAX()).contains(&num) {
            Ok(num)
        } else {
            Err(KennelError::validation(format!("invalid signal number {num}")))
        };
    }
    let upper = signal.to_uppercase();
    let name = upper.strip_prefix("SIG").unwrap_or(&upper);
    SIGNALS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, num)| *num)
        .ok_or_else(|| KennelError::validation(format!("unknown signal {signal:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::tests::wait_for_exec;
    use std::time::{Duration, Instant};

    #[test]
    fn own_process_is_alive() {
        assert!(is_alive(i32::try_from(std::process::id()).unwrap()));
        assert!(!is_alive(0));
        assert!(!is_alive(-1));
    }

    #[test]
    fn exited_child_is_reaped() {
        let child = std::process::Command::new("true").spawn().unwrap();
        let pid = i32::try_from(child.id()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while is_alive(pid) {
            assert!(Instant::now() < deadline, "child {pid} never exited");
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!std::path::Path::new(&format!("/proc/{pid}")).exists() || !is_alive(pid));
    }

    #[test]
    fn signal_and_cmdline() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = i32::try_from(child.id()).unwrap();
        wait_for_exec(pid, "sleep");

        assert_eq!(cmdline(pid).unwrap(), b"sleep\x0030\x00");
        assert!(send_signal(pid, libc::SIGKILL).unwrap());
        child.wait().unwrap();
        assert!(!send_signal(pid, libc::SIGKILL).unwrap());
    }

    #[test]
    fn stat_state_after_comm() {
        assert_eq!(stat_state("42 (my (odd) name) S 1 42"), Some('S'));
        assert_eq!(stat_state("42 (zombie) Z 1 42"), Some('Z'));
        assert_eq!(stat_state("garbage"), None);
    }

    #[test]
    fn signal_names() {
        assert_eq!(parse_signal("SIGTERM").unwrap(), libc::SIGTERM);
        assert_eq!(parse_signal("term").unwrap(), libc::SIGTERM);
        assert_eq!(parse_signal("KILL").unwrap(), libc::SIGKILL);
        assert_eq!(parse_signal("9").unwrap(), 9);
        assert!(parse_signal("0").is_err());
        assert!(parse_signal("SIGNOPE").is_err());
    }
}
