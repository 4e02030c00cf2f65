//! Operating System specific abstractions
//!

use core::ptr;
use std::{ffi::CString, os::fd::RawFd};

use libc::pid_t;
use nix::errno::Errno;

use crate::Error;

pub mod pipes;
pub mod unix_signals;

/// Child Process Handle
#[derive(Debug)]
pub struct ChildHandle {
    /// The process id
    pub pid: pid_t,
}

impl ChildHandle {
    /// Block until the child exited and the status code becomes available.
    /// The wait is retried on `EINTR`, interval timer ticks preempt it.
    #[must_use]
    pub fn status(&self) -> i32 {
        let mut status = -1;
        unsafe {
            while libc::waitpid(self.pid, &mut status, 0) < 0 {
                if Errno::last() != Errno::EINTR {
                    break;
                }
            }
        }
        libc::WEXITSTATUS(status)
    }
}

/// The `ForkResult` (result of a fork)
#[derive(Debug)]
pub enum ForkResult {
    /// The fork finished, we are the parent process.
    /// The child has the handle `ChildHandle`.
    Parent(ChildHandle),
    /// The fork finished, we are the child process.
    Child,
}

/// Unix has forks.
/// # Safety
/// A Normal fork. Runs on in two processes. Should be memory safe in general.
pub unsafe fn fork() -> Result<ForkResult, Error> {
    match libc::fork() {
        pid if pid > 0 => Ok(ForkResult::Parent(ChildHandle { pid })),
        pid if pid < 0 => Err(Error::last_os_error("Fork failed")),
        _ => Ok(ForkResult::Child),
    }
}

/// "Safe" wrapper around dup2
///
/// # Errors
/// The function will return an error if the OS `dup2` call fails.
pub fn dup2(fd: RawFd, device: RawFd) -> Result<(), Error> {
    match unsafe { libc::dup2(fd, device) } {
        -1 => Err(Error::last_os_error(format!(
            "Error calling dup2({fd}, {device})"
        ))),
        _ => Ok(()),
    }
}

/// Replace the current process image with `path`, passing `argv[0] = path`
/// followed by `args`, verbatim. The environment is inherited.
/// Only ever returns on failure.
pub fn execv_target(path: &str, args: &[String]) -> Error {
    let c_path = match CString::new(path) {
        Ok(p) => p,
        Err(err) => return err.into(),
    };
    let mut c_args = Vec::with_capacity(args.len() + 1);
    c_args.push(c_path.clone());
    for arg in args {
        match CString::new(arg.as_str()) {
            Ok(arg) => c_args.push(arg),
            Err(err) => return err.into(),
        }
    }
    let mut argv: Vec<*const libc::c_char> = c_args.iter().map(|arg| arg.as_ptr()).collect();
    argv.push(ptr::null());

    unsafe {
        libc::execv(c_path.as_ptr(), argv.as_ptr());
    }
    Error::last_os_error(format!("execv failed for `{path}`"))
}
