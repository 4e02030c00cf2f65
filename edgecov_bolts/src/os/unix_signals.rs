//! Signal handling for unix
//!
//! Handlers installed through here are expected to be flag-only: set an
//! atomic, return. All I/O happens in the interrupted main loop once it
//! observes the flag.

use core::{
    fmt::{self, Display},
    mem, ptr,
};
use std::time::Duration;

use libc::{c_int, sigaction, sigemptyset, SA_NODEFER, SIGALRM, SIGINT};

use crate::Error;

/// The signals the supervisor reacts to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum Signal {
    /// `SIGALRM`, delivered on each interval timer tick
    SigAlarm = SIGALRM,
    /// `SIGINT`, the external interrupt (ctrl-c)
    SigInterrupt = SIGINT,
}

impl Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Signal::SigAlarm => write!(f, "SIGALRM"),
            Signal::SigInterrupt => write!(f, "SIGINT"),
        }
    }
}

/// A bare signal callback, running in signal context.
pub type SignalCallback = unsafe extern "C" fn(c_int);

/// Install `callback` for `signal`.
///
/// `SA_RESTART` is deliberately not set: a blocking read interrupted by the
/// signal must return `EINTR` so the caller's loop regains control and can
/// check its flags.
///
/// # Safety
/// The callback runs in signal context and must be async-signal-safe:
/// set a flag, nothing more.
pub unsafe fn setup_signal_handler(signal: Signal, callback: SignalCallback) -> Result<(), Error> {
    let mut sa: sigaction = mem::zeroed();
    sigemptyset(&raw mut sa.sa_mask);
    sa.sa_flags = SA_NODEFER;
    sa.sa_sigaction = callback as usize;
    if sigaction(signal as c_int, &raw const sa, ptr::null_mut()) < 0 {
        return Err(Error::last_os_error(format!(
            "Could not set up {signal} handler"
        )));
    }
    Ok(())
}

/// Arm the process interval timer (`ITIMER_REAL`): first expiry after
/// `delay`, then every `interval`, each delivering [`Signal::SigAlarm`].
pub fn set_interval_timer(delay: Duration, interval: Duration) -> Result<(), Error> {
    let mut it_value = libc::timeval {
        tv_sec: delay.as_secs() as libc::time_t,
        tv_usec: delay.subsec_micros() as libc::suseconds_t,
    };
    if it_value.tv_sec == 0 && it_value.tv_usec == 0 {
        // a zeroed it_value would disarm the timer instead of firing at once
        it_value.tv_usec = 1;
    }
    let timer = libc::itimerval {
        it_interval: libc::timeval {
            tv_sec: interval.as_secs() as libc::time_t,
            tv_usec: interval.subsec_micros() as libc::suseconds_t,
        },
        it_value,
    };
    if unsafe { libc::setitimer(libc::ITIMER_REAL, &timer, ptr::null_mut()) } != 0 {
        return Err(Error::last_os_error("setitimer failed"));
    }
    Ok(())
}
