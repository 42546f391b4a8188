//! Workload Run Supervision
//!
//! Blocks on a launched workload process until it terminates, capturing
//! its exit status and elapsed wall time. The controller is single-threaded
//! and synchronous: this wait is its only blocking operation, and it has no
//! timeout in the base design.
//!
//! A non-zero exit from the workload is not an error of this module — it
//! is faithfully reported as data. Only a failure of the wait primitive
//! itself (the outcome becoming unknowable) is an error.

use core::fmt;
use core::time::Duration;

use std::time::Instant;

use crate::Pid;

// ============================================================================
// Error Types
// ============================================================================

/// Supervision errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    /// The wait primitive itself failed with this errno. Fatal: the
    /// workload's outcome is unknowable, which is distinct from a normal
    /// non-zero exit.
    WaitFailed(i32),
    /// A signal could not be delivered to the supervised pid
    SignalFailed(i32),
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::WaitFailed(e) => write!(f, "waitpid failed: errno {}", e),
            WaitError::SignalFailed(e) => write!(f, "kill failed: errno {}", e),
        }
    }
}

impl std::error::Error for WaitError {}

// ============================================================================
// Exit Status
// ============================================================================

/// Decoded termination status of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Process exited with this code
    Exited(i32),
    /// Process was terminated by this signal
    Signaled(i32),
}

impl ExitStatus {
    /// Decode a raw waitpid status word
    pub fn from_raw(status: i32) -> Self {
        if libc::WIFEXITED(status) {
            ExitStatus::Exited(libc::WEXITSTATUS(status))
        } else if libc::WIFSIGNALED(status) {
            ExitStatus::Signaled(libc::WTERMSIG(status))
        } else {
            // Stopped/continued states are not reported without WUNTRACED;
            // treat anything unexpected as a signaled termination.
            ExitStatus::Signaled(0)
        }
    }

    /// True for a clean zero exit
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }

    /// Exit code if the process exited normally
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Exited(code) => Some(*code),
            ExitStatus::Signaled(_) => None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit code {}", code),
            ExitStatus::Signaled(sig) => write!(f, "signal {}", sig),
        }
    }
}

// ============================================================================
// Run Outcome
// ============================================================================

/// Termination record of one supervised run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// How the workload terminated
    pub status: ExitStatus,
    /// Wall-clock time from launch to termination
    pub elapsed: Duration,
}

// ============================================================================
// Supervised Process
// ============================================================================

/// One launched workload process under supervision
///
/// Created at launch, consumed by [`SupervisedProcess::wait`] on
/// termination, never reused for a different process.
#[derive(Debug)]
pub struct SupervisedProcess {
    pid: Pid,
    started: Instant,
}

impl SupervisedProcess {
    /// Begin supervising a freshly launched process
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            started: Instant::now(),
        }
    }

    /// Process id of the workload
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Wall-clock time since launch
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Block until the workload terminates
    ///
    /// Suspends the calling thread until the specific process changes
    /// state; interrupted waits are retried. There is no timeout.
    pub fn wait(self) -> Result<RunOutcome, WaitError> {
        let mut status: libc::c_int = 0;

        loop {
            // SAFETY: pid refers to the child recorded at launch; status is
            // a valid out-pointer to a local.
            let ret = unsafe { libc::waitpid(self.pid as i32, &mut status, 0) };
            if ret >= 0 {
                break;
            }
            // SAFETY: errno location is always valid after a failed syscall.
            let errno = unsafe { *libc::__errno_location() };
            if errno != libc::EINTR {
                return Err(WaitError::WaitFailed(errno));
            }
        }

        Ok(RunOutcome {
            status: ExitStatus::from_raw(status),
            elapsed: self.started.elapsed(),
        })
    }

    /// Send SIGKILL to the workload
    ///
    /// The standard process-termination signal is the only cancellation
    /// primitive; there is no graceful shutdown coordination. A process
    /// that already exited (ESRCH) is not an error.
    pub fn terminate(&self) -> Result<(), WaitError> {
        // SAFETY: pid is the recorded child pid; SIGKILL is a valid signal.
        let ret = unsafe { libc::kill(self.pid as i32, libc::SIGKILL) };
        if ret == 0 {
            return Ok(());
        }
        // SAFETY: errno location is always valid after a failed syscall.
        let errno = unsafe { *libc::__errno_location() };
        if errno == libc::ESRCH {
            Ok(())
        } else {
            Err(WaitError::SignalFailed(errno))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Raw status words as waitpid(2) encodes them.
    fn raw_exited(code: i32) -> i32 {
        (code & 0xff) << 8
    }

    fn raw_signaled(sig: i32) -> i32 {
        sig & 0x7f
    }

    #[test]
    fn test_exit_status_decode_exited() {
        assert_eq!(ExitStatus::from_raw(raw_exited(0)), ExitStatus::Exited(0));
        assert_eq!(ExitStatus::from_raw(raw_exited(3)), ExitStatus::Exited(3));
        assert_eq!(
            ExitStatus::from_raw(raw_exited(127)),
            ExitStatus::Exited(127)
        );
    }

    #[test]
    fn test_exit_status_decode_signaled() {
        assert_eq!(
            ExitStatus::from_raw(raw_signaled(libc::SIGKILL)),
            ExitStatus::Signaled(libc::SIGKILL)
        );
        assert_eq!(
            ExitStatus::from_raw(raw_signaled(libc::SIGTERM)),
            ExitStatus::Signaled(libc::SIGTERM)
        );
    }

    #[test]
    fn test_exit_status_success() {
        assert!(ExitStatus::Exited(0).success());
        assert!(!ExitStatus::Exited(1).success());
        assert!(!ExitStatus::Signaled(9).success());
        assert_eq!(ExitStatus::Exited(3).code(), Some(3));
        assert_eq!(ExitStatus::Signaled(9).code(), None);
    }

    #[test]
    fn test_exit_status_display() {
        assert_eq!(ExitStatus::Exited(0).to_string(), "exit code 0");
        assert_eq!(ExitStatus::Signaled(9).to_string(), "signal 9");
    }

    #[test]
    fn test_wait_error_display() {
        let err = WaitError::WaitFailed(libc::ECHILD);
        assert!(err.to_string().contains("waitpid failed"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_wait_on_real_child() {
        // fork a child that exits 7 and supervise it.
        // SAFETY: the child calls only _exit; the parent waits on it.
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0);
        if pid == 0 {
            unsafe { libc::_exit(7) };
        }

        let child = SupervisedProcess::new(pid as Pid);
        let outcome = child.wait().unwrap();
        assert_eq!(outcome.status, ExitStatus::Exited(7));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_wait_on_missing_child_fails() {
        // No such child: the outcome is unknowable, reported distinctly.
        let child = SupervisedProcess::new(1);
        match child.wait() {
            Err(WaitError::WaitFailed(errno)) => assert_eq!(errno, libc::ECHILD),
            other => panic!("expected WaitFailed, got {:?}", other),
        }
    }
}
