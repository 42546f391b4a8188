//! Clone3 Syscall with CLONE_INTO_CGROUP
//!
//! Provides the direct `clone3(2)` wrapper used to create the workload
//! process with immediate cgroup placement. The `CLONE_INTO_CGROUP` flag is
//! the core correctness property of the whole harness: the child is
//! scheduled for the first time already subject to the group's core and
//! memory constraints, so there is no window in which it runs unconfined —
//! unlike fork-then-`cgroup.procs` placement, which admits a race where the
//! child executes before being moved.
//!
//! Requires Linux 5.7+ for CLONE_INTO_CGROUP support.
//!
//! ## Placement Comparison
//!
//! | Approach | Syscalls | Unconfined window |
//! |----------|----------|-------------------|
//! | fork + cgroup.procs write | 2 | yes (child runs before the write) |
//! | clone3 + CLONE_INTO_CGROUP | 1 | none |
//!
//! ## Usage
//!
//! ```ignore
//! let group = CgroupManager::create("bench0")?;
//! let handle = group.open_handle()?;
//! let pid = launch_into(&handle, &["/bin/sleep", "1"])?;
//! drop(handle); // single-use: release right after the clone call
//! ```

use core::mem;

use std::os::unix::io::RawFd;

use crate::cgroup::CgroupHandle;
use crate::Pid;

// ============================================================================
// Clone3 Constants
// ============================================================================

/// Clone flags for clone3
pub mod clone_flags {
    use core::ffi::c_ulonglong;

    // Standard clone flags
    pub const CLONE_VM: c_ulonglong = 0x00000100;
    pub const CLONE_FS: c_ulonglong = 0x00000200;
    pub const CLONE_FILES: c_ulonglong = 0x00000400;
    pub const CLONE_SIGHAND: c_ulonglong = 0x00000800;
    pub const CLONE_PIDFD: c_ulonglong = 0x00001000;
    pub const CLONE_VFORK: c_ulonglong = 0x00004000;
    pub const CLONE_PARENT: c_ulonglong = 0x00008000;
    pub const CLONE_THREAD: c_ulonglong = 0x00010000;
    pub const CLONE_PARENT_SETTID: c_ulonglong = 0x00100000;
    pub const CLONE_CHILD_CLEARTID: c_ulonglong = 0x00200000;
    pub const CLONE_CHILD_SETTID: c_ulonglong = 0x01000000;

    // clone3-specific flags (Linux 5.2+)
    pub const CLONE_CLEAR_SIGHAND: c_ulonglong = 0x100000000;
    pub const CLONE_INTO_CGROUP: c_ulonglong = 0x200000000; // Linux 5.7+
}

/// Exit status the child uses when the image replacement fails
///
/// Matches the shell convention for "command not found". The child must
/// terminate rather than continue: continuing would mean two logical
/// processes running the parent's program.
pub const EXEC_FAILURE_STATUS: i32 = 127;

// ============================================================================
// Clone3 Syscall Number
// ============================================================================

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
const SYS_CLONE3: i64 = 435;

#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
const SYS_CLONE3: i64 = 435;

// ============================================================================
// Clone3 Arguments Structure
// ============================================================================

/// Arguments for the clone3 syscall
///
/// This structure is passed to the kernel and must match the kernel's
/// `struct clone_args` exactly: eleven 64-bit fields, in this order.
/// Unused fields stay zero.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct CloneArgs {
    /// Clone flags
    pub flags: u64,
    /// Where to store the pidfd (CLONE_PIDFD)
    pub pidfd: u64,
    /// Where to store the child TID in the child (CLONE_CHILD_SETTID)
    pub child_tid: u64,
    /// Where to store the child TID in the parent (CLONE_PARENT_SETTID)
    pub parent_tid: u64,
    /// Signal delivered to the parent on child exit (usually SIGCHLD)
    pub exit_signal: u64,
    /// Child stack pointer (0 = copy-on-write like fork)
    pub stack: u64,
    /// Stack size
    pub stack_size: u64,
    /// TLS pointer
    pub tls: u64,
    /// Pointer to the set_tid array
    pub set_tid: u64,
    /// Number of entries in set_tid
    pub set_tid_size: u64,
    /// Cgroup directory descriptor (CLONE_INTO_CGROUP)
    pub cgroup: u64,
}

impl Default for CloneArgs {
    fn default() -> Self {
        Self {
            flags: 0,
            pidfd: 0,
            child_tid: 0,
            parent_tid: 0,
            exit_signal: libc::SIGCHLD as u64,
            stack: 0,
            stack_size: 0,
            tls: 0,
            set_tid: 0,
            set_tid_size: 0,
            cgroup: 0,
        }
    }
}

impl CloneArgs {
    /// Create new clone3 args with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set clone flags
    pub fn flags(mut self, flags: u64) -> Self {
        self.flags = flags;
        self
    }

    /// Add clone flags (OR with existing)
    pub fn add_flags(mut self, flags: u64) -> Self {
        self.flags |= flags;
        self
    }

    /// Set the exit signal
    pub fn exit_signal(mut self, signal: i32) -> Self {
        self.exit_signal = signal as u64;
        self
    }

    /// Set the cgroup target fd (sets CLONE_INTO_CGROUP)
    pub fn cgroup_fd(mut self, fd: RawFd) -> Self {
        self.flags |= clone_flags::CLONE_INTO_CGROUP;
        self.cgroup = fd as u64;
        self
    }

    /// Structure size for the syscall
    pub fn size() -> usize {
        mem::size_of::<Self>()
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Clone3 operation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clone3Error {
    /// The creation primitive failed with this errno
    CloneFailed(i32),
    /// Not supported (old kernel)
    NotSupported,
    /// Permission denied
    PermissionDenied,
    /// Invalid argument
    InvalidArgument,
    /// Out of memory
    OutOfMemory,
    /// The cgroup target descriptor is closed or invalid
    InvalidCgroupFd,
}

impl core::fmt::Display for Clone3Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Clone3Error::CloneFailed(e) => write!(f, "clone3 failed: errno {}", e),
            Clone3Error::NotSupported => write!(f, "clone3 not supported (requires Linux 5.3+)"),
            Clone3Error::PermissionDenied => write!(f, "Permission denied"),
            Clone3Error::InvalidArgument => write!(f, "Invalid argument"),
            Clone3Error::OutOfMemory => write!(f, "Out of memory"),
            Clone3Error::InvalidCgroupFd => write!(f, "Invalid cgroup file descriptor"),
        }
    }
}

impl std::error::Error for Clone3Error {}

impl Clone3Error {
    #[cfg(target_os = "linux")]
    fn from_errno(errno: i32) -> Self {
        match errno {
            libc::EPERM => Clone3Error::PermissionDenied,
            libc::EINVAL => Clone3Error::InvalidArgument,
            libc::ENOMEM => Clone3Error::OutOfMemory,
            libc::ENOSYS => Clone3Error::NotSupported,
            libc::EBADF => Clone3Error::InvalidCgroupFd,
            e => Clone3Error::CloneFailed(e),
        }
    }
}

// ============================================================================
// Clone Outcome
// ============================================================================

/// The two returns of one clone3 call
///
/// The creation primitive returns twice: once in the creator with the new
/// process's id, once in the new process. Callers must branch explicitly,
/// and the `Child` arm must end in an immediate image replacement or
/// immediate termination — never fall through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneOutcome {
    /// Creator path: the child exists with this pid
    Parent { child_pid: Pid },
    /// New-process path
    Child,
}

// ============================================================================
// Clone3 Syscall (Linux only)
// ============================================================================

/// Execute the clone3 syscall
///
/// # Safety
///
/// This is a low-level syscall wrapper. The caller must ensure:
/// - `args.cgroup` is a valid directory fd if CLONE_INTO_CGROUP is set
/// - the `Child` outcome is handled with async-signal-safe code only
///   (exec or `_exit`), since the child is a fork-style copy of a
///   possibly multi-threaded parent
#[cfg(target_os = "linux")]
pub unsafe fn clone3(args: &CloneArgs) -> Result<CloneOutcome, Clone3Error> {
    let ret = libc::syscall(
        SYS_CLONE3 as libc::c_long,
        args as *const CloneArgs,
        CloneArgs::size(),
    );

    if ret < 0 {
        let errno = *libc::__errno_location();
        return Err(Clone3Error::from_errno(errno));
    }

    if ret == 0 {
        Ok(CloneOutcome::Child)
    } else {
        Ok(CloneOutcome::Parent {
            child_pid: ret as Pid,
        })
    }
}

/// Clone3 (non-Linux stub)
#[cfg(not(target_os = "linux"))]
pub unsafe fn clone3(_args: &CloneArgs) -> Result<CloneOutcome, Clone3Error> {
    Err(Clone3Error::NotSupported)
}

// ============================================================================
// Confined Launch
// ============================================================================

/// Launch a command directly into a cgroup
///
/// Builds exactly one [`CloneArgs`] with CLONE_INTO_CGROUP targeting
/// `handle`, clones, and on the child path immediately replaces the
/// process image with `argv`. If the replacement fails (e.g. command not
/// found) the child terminates with [`EXEC_FAILURE_STATUS`]; the parent
/// keeps supervising by pid and observes that as a normal non-zero exit.
///
/// The handle is borrowed only for the duration of this call; the caller
/// drops it afterwards on every exit path.
#[cfg(target_os = "linux")]
pub fn launch_into(handle: &CgroupHandle, argv: &[&str]) -> Result<Pid, Clone3Error> {
    use std::ffi::CString;

    if argv.is_empty() {
        return Err(Clone3Error::InvalidArgument);
    }

    // Everything the child needs is allocated before the clone; the child
    // path performs no allocation, only exec or _exit.
    let c_argv: Vec<CString> = argv
        .iter()
        .map(|a| CString::new(*a))
        .collect::<Result<_, _>>()
        .map_err(|_| Clone3Error::InvalidArgument)?;
    let mut argv_ptrs: Vec<*const libc::c_char> = c_argv.iter().map(|c| c.as_ptr()).collect();
    argv_ptrs.push(core::ptr::null());

    let args = CloneArgs::new()
        .exit_signal(libc::SIGCHLD)
        .cgroup_fd(handle.as_raw_fd());

    // SAFETY: args.cgroup holds a live directory fd owned by `handle`,
    // which outlives this call; the Child arm calls only execvp/_exit.
    match unsafe { clone3(&args)? } {
        CloneOutcome::Parent { child_pid } => Ok(child_pid),
        CloneOutcome::Child => {
            // SAFETY: argv_ptrs is a NULL-terminated array of pointers into
            // c_argv, both alive here; execvp only returns on failure, after
            // which _exit terminates the child without running any further
            // parent code.
            unsafe {
                libc::execvp(argv_ptrs[0], argv_ptrs.as_ptr());
                libc::_exit(EXEC_FAILURE_STATUS)
            }
        }
    }
}

/// Launch into cgroup (non-Linux stub)
#[cfg(not(target_os = "linux"))]
pub fn launch_into(_handle: &CgroupHandle, _argv: &[&str]) -> Result<Pid, Clone3Error> {
    Err(Clone3Error::NotSupported)
}

// ============================================================================
// Kernel Version Check
// ============================================================================

/// Check if clone3 is available
#[cfg(target_os = "linux")]
pub fn is_clone3_available() -> bool {
    let args = CloneArgs {
        // An invalid flag combination: the kernel answers EINVAL when
        // clone3 exists, ENOSYS when it does not, without creating a
        // process either way.
        flags: clone_flags::CLONE_INTO_CGROUP | clone_flags::CLONE_THREAD,
        ..CloneArgs::default()
    };

    // SAFETY: the argument struct is valid; the call cannot succeed with
    // these flags, so no child is ever created.
    let ret = unsafe {
        libc::syscall(
            SYS_CLONE3 as libc::c_long,
            &args as *const CloneArgs,
            CloneArgs::size(),
        )
    };

    if ret < 0 {
        // SAFETY: errno location is always valid after a failed syscall.
        let errno = unsafe { *libc::__errno_location() };
        errno != libc::ENOSYS
    } else {
        true
    }
}

/// Check if clone3 is available (non-Linux)
#[cfg(not(target_os = "linux"))]
pub fn is_clone3_available() -> bool {
    false
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_args_default() {
        let args = CloneArgs::new();
        assert_eq!(args.flags, 0);
        assert_eq!(args.exit_signal, libc::SIGCHLD as u64);
        assert_eq!(args.cgroup, 0);
    }

    #[test]
    fn test_clone_args_layout() {
        // Kernel ABI: eleven u64 fields, nothing else.
        assert_eq!(CloneArgs::size(), 11 * 8);
    }

    #[test]
    fn test_clone_args_cgroup_fd() {
        let args = CloneArgs::new().cgroup_fd(7);
        assert_eq!(args.cgroup, 7);
        assert!(args.flags & clone_flags::CLONE_INTO_CGROUP != 0);
    }

    #[test]
    fn test_clone_args_builder() {
        let args = CloneArgs::new()
            .flags(clone_flags::CLONE_PIDFD)
            .add_flags(clone_flags::CLONE_CLEAR_SIGHAND)
            .exit_signal(libc::SIGCHLD);

        assert!(args.flags & clone_flags::CLONE_PIDFD != 0);
        assert!(args.flags & clone_flags::CLONE_CLEAR_SIGHAND != 0);
        assert_eq!(args.exit_signal, libc::SIGCHLD as u64);
    }

    #[test]
    fn test_clone3_error_display() {
        let err = Clone3Error::NotSupported;
        assert!(err.to_string().contains("not supported"));

        let err = Clone3Error::CloneFailed(7);
        assert!(err.to_string().contains("errno 7"));

        let err = Clone3Error::InvalidCgroupFd;
        assert!(err.to_string().contains("cgroup file descriptor"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_from_errno_mapping() {
        assert_eq!(
            Clone3Error::from_errno(libc::EBADF),
            Clone3Error::InvalidCgroupFd
        );
        assert_eq!(
            Clone3Error::from_errno(libc::EPERM),
            Clone3Error::PermissionDenied
        );
        assert_eq!(
            Clone3Error::from_errno(libc::EAGAIN),
            Clone3Error::CloneFailed(libc::EAGAIN)
        );
    }

    #[test]
    fn test_exec_failure_status_nonzero() {
        assert_ne!(EXEC_FAILURE_STATUS, 0);
    }
}
