//! Low-level bolts for the `edgecov` coverage toolchain: errors, logging,
//! time, random numbers, and the unix plumbing (shared memory, pipes,
//! processes, signals) the supervisor and the coverage runtime are built on.

use core::fmt::{self, Display};
use std::{
    io,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use log::{Metadata, Record};

pub mod os;
pub mod rands;
pub mod shmem;

#[cfg(feature = "errors_backtrace")]
/// Error Backtrace type when `errors_backtrace` feature is enabled (== [`backtrace::Backtrace`])
pub type ErrorBacktrace = backtrace::Backtrace;

#[cfg(not(feature = "errors_backtrace"))]
#[derive(Debug, Default)]
/// Empty struct to use when `errors_backtrace` is disabled
pub struct ErrorBacktrace {}

#[cfg(not(feature = "errors_backtrace"))]
impl ErrorBacktrace {
    /// Nop
    #[must_use]
    pub fn new() -> Self {
        Self {}
    }
}

#[cfg(feature = "errors_backtrace")]
fn display_error_backtrace(f: &mut fmt::Formatter, err: &ErrorBacktrace) -> fmt::Result {
    write!(f, "\nBacktrace: {err:?}")
}
#[cfg(not(feature = "errors_backtrace"))]
#[allow(clippy::unnecessary_wraps)]
fn display_error_backtrace(_f: &mut fmt::Formatter, _err: &ErrorBacktrace) -> fmt::Result {
    fmt::Result::Ok(())
}

/// Main error struct for `edgecov`
#[derive(Debug)]
pub enum Error {
    /// File related error
    File(io::Error, ErrorBacktrace),
    /// The argument passed to this method or function is not valid
    IllegalArgument(String, ErrorBacktrace),
    /// You're holding it wrong
    IllegalState(String, ErrorBacktrace),
    /// An error from an underlying OS call, with context
    OsError(io::Error, String, ErrorBacktrace),
    /// Shutting down, not really an error.
    ShuttingDown,
    /// Something else happened
    Unknown(String, ErrorBacktrace),
}

impl Error {
    /// File related error
    #[must_use]
    pub fn file(arg: io::Error) -> Self {
        Error::File(arg, ErrorBacktrace::new())
    }

    /// The argument passed to this method or function is not valid
    #[must_use]
    pub fn illegal_argument<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::IllegalArgument(arg.into(), ErrorBacktrace::new())
    }

    /// You're holding it wrong
    #[must_use]
    pub fn illegal_state<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::IllegalState(arg.into(), ErrorBacktrace::new())
    }

    /// An error from an OS call, taking the last `errno` as the cause
    #[must_use]
    pub fn last_os_error<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::OsError(io::Error::last_os_error(), arg.into(), ErrorBacktrace::new())
    }

    /// An error from an OS call, with an explicit cause
    #[must_use]
    pub fn os_error<S>(err: io::Error, arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::OsError(err, arg.into(), ErrorBacktrace::new())
    }

    /// Shutting down, not really an error.
    #[must_use]
    pub fn shutting_down() -> Self {
        Error::ShuttingDown
    }

    /// Something else happened
    #[must_use]
    pub fn unknown<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::Unknown(arg.into(), ErrorBacktrace::new())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::File(err, b) => {
                write!(f, "File IO failed: {:?}", &err)?;
                display_error_backtrace(f, b)
            }
            Self::IllegalArgument(s, b) => {
                write!(f, "Illegal argument: {0}", &s)?;
                display_error_backtrace(f, b)
            }
            Self::IllegalState(s, b) => {
                write!(f, "Illegal state: {0}", &s)?;
                display_error_backtrace(f, b)
            }
            Self::OsError(err, s, b) => {
                write!(f, "{0}: {1}", &s, &err)?;
                display_error_backtrace(f, b)
            }
            Self::ShuttingDown => write!(f, "Shutting down!"),
            Self::Unknown(s, b) => {
                write!(f, "Unknown error: {0}", &s)?;
                display_error_backtrace(f, b)
            }
        }
    }
}

impl std::error::Error for Error {}

/// Create an `edgecov` Error from io Error
impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::file(err)
    }
}

#[cfg(unix)]
impl From<nix::Error> for Error {
    fn from(err: nix::Error) -> Self {
        Self::unknown(format!("Unix error: {err:?}"))
    }
}

impl From<std::ffi::NulError> for Error {
    fn from(err: std::ffi::NulError) -> Self {
        Self::illegal_argument(format!("Embedded nul byte in string: {err:?}"))
    }
}

/// Current time
#[must_use]
#[inline]
pub fn current_time() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap()
}

/// Gets current nanoseconds since [`UNIX_EPOCH`]
#[must_use]
#[inline]
pub fn current_nanos() -> u64 {
    current_time().as_nanos() as u64
}

/// Stderr logger
pub static EDGECOV_STDERR_LOGGER: SimpleStderrLogger = SimpleStderrLogger::new();

/// A simple logger struct that logs to stderr when used with [`log::set_logger`].
#[derive(Debug)]
pub struct SimpleStderrLogger {}

impl Default for SimpleStderrLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleStderrLogger {
    /// Create a new [`log::Log`] logger that will write log to stderr
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }

    /// register stderr logger
    pub fn set_logger() -> Result<(), Error> {
        log::set_logger(&EDGECOV_STDERR_LOGGER)
            .map_err(|_| Error::unknown("Failed to register logger"))
    }
}

impl log::Log for SimpleStderrLogger {
    #[inline]
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        eprintln!(
            "[{:?}] {}: {}",
            current_time(),
            record.level(),
            record.args()
        );
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use crate::Error;

    #[test]
    fn test_error_display() {
        let err = Error::illegal_argument("too many edges");
        assert!(format!("{err}").contains("too many edges"));
        let err = Error::last_os_error("shmget failed");
        assert!(format!("{err}").starts_with("shmget failed"));
    }
}
