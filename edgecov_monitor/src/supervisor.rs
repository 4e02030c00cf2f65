//! One measurement session: create the shared map, fork the target,
//! relay its output, report coverage on each timer tick and on shutdown.
//!
//! The signal handlers only set flags. The relay loop's blocking read is
//! installed without `SA_RESTART`, so a tick or an interrupt surfaces as
//! `EINTR`, and all report/teardown I/O happens here in the main loop.

use core::sync::atomic::{AtomicBool, Ordering};
use std::{
    env,
    fs::OpenOptions,
    io::{self, Read, Write},
    path::Path,
    time::Duration,
};

use edgecov::coverage::{count_bits, MAP_SIZE, SHM_ENV_PATH};
use edgecov_bolts::{
    os::{
        dup2, execv_target, fork,
        pipes::Pipe,
        unix_signals::{set_interval_timer, setup_signal_handler, Signal},
        ForkResult,
    },
    shmem::{shm_key_for_path, SysvShMem},
    Error,
};

use crate::options::MonitorOptions;

/// Relay buffer for the child's piped output.
const RELAY_BUF_SIZE: usize = 4096;

/// Set from the `SIGALRM` handler, drained by the relay loop.
static ALARM_PENDING: AtomicBool = AtomicBool::new(false);
/// Set from the `SIGINT` handler, observed by the relay loop.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_alarm(_signal: libc::c_int) {
    ALARM_PENDING.store(true, Ordering::Relaxed);
}

extern "C" fn on_interrupt(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::Relaxed);
}

fn format_periodic(count: usize) -> String {
    format!("[Periodic] Branches covered: {count}")
}

fn format_final(count: usize) -> String {
    format!("Branches covered: {count}")
}

/// `ftok` resolves the token to an inode, so the file has to exist.
fn touch(path: &Path) -> Result<(), Error> {
    OpenOptions::new().create(true).append(true).open(path)?;
    Ok(())
}

/// A supervisor owning one shared coverage map for one session.
pub struct Supervisor {
    shmem: SysvShMem,
    torn_down: bool,
}

impl Supervisor {
    /// Set up the session: create and zero the shared map, install the
    /// flag-only signal handlers, arm the interval timer, and emit the
    /// baseline report. Everything here is fatal, no child exists yet.
    pub fn init(opts: &MonitorOptions) -> Result<Self, Error> {
        touch(&opts.shm_path)?;
        let key = shm_key_for_path(&opts.shm_path)?;
        let mut shmem = SysvShMem::create(key, MAP_SIZE)?;
        shmem.fill(0);
        log::info!(
            "shared coverage map ready (segment {}, {MAP_SIZE} bytes)",
            shmem.id()
        );

        // the child's coverage runtime derives the same key from this token
        env::set_var(SHM_ENV_PATH, &opts.shm_path);

        unsafe {
            setup_signal_handler(Signal::SigInterrupt, on_interrupt)?;
            setup_signal_handler(Signal::SigAlarm, on_alarm)?;
        }
        let interval = Duration::from_secs(opts.interval);
        let delay = opts.delay.map_or(interval, Duration::from_secs);
        set_interval_timer(delay, interval)?;

        let supervisor = Self {
            shmem,
            torn_down: false,
        };
        supervisor.report_periodic();
        Ok(supervisor)
    }

    /// Fork the target and observe it until its pipe closes or an
    /// interrupt arrives, then tear the session down. Returns the child's
    /// exit status where one was reaped; the interrupt path does not
    /// guarantee a synchronous reap of an unresponsive child.
    pub fn run(&mut self, target: &str, target_args: &[String]) -> Result<Option<i32>, Error> {
        let mut pipe = Pipe::new()?;
        let fork_result = match unsafe { fork() } {
            Ok(res) => res,
            Err(err) => {
                self.shmem.remove();
                return Err(err);
            }
        };

        match fork_result {
            ForkResult::Child => child_exec(pipe, target, target_args),
            ForkResult::Parent(child) => {
                pipe.close_write_end();
                self.relay(&mut pipe);

                if INTERRUPTED.load(Ordering::Relaxed) {
                    log::info!("interrupted, ending the observation");
                    self.teardown();
                    return Ok(None);
                }
                let status = child.status();
                self.teardown();
                Ok(Some(status))
            }
        }
    }

    /// Relay everything the child writes to our own stdout. Timer ticks
    /// and interrupts preempt the blocking read as `EINTR`; a read error
    /// ends the relay without killing the child.
    fn relay(&mut self, pipe: &mut Pipe) {
        let mut buf = [0_u8; RELAY_BUF_SIZE];
        let mut stdout = io::stdout();
        loop {
            if INTERRUPTED.load(Ordering::Relaxed) {
                break;
            }
            if ALARM_PENDING.swap(false, Ordering::Relaxed) {
                self.report_periodic();
            }
            match pipe.read(&mut buf) {
                Ok(0) => break, // child closed its end
                Ok(n) => {
                    if let Err(err) = stdout.write_all(&buf[..n]).and_then(|()| stdout.flush()) {
                        log::error!("relaying target output failed: {err}");
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::error!("reading from the target pipe failed: {err}");
                    break;
                }
            }
        }
    }

    /// Set bits in the shared map right now.
    fn covered(&self) -> usize {
        count_bits(&self.shmem)
    }

    fn report_periodic(&self) {
        println!("{}", format_periodic(self.covered()));
    }

    /// Final report, detach, remove. One-shot: the normal-exit and the
    /// interrupt path may both get here, the second call is a no-op and
    /// OS-level failures underneath are tolerated by the shmem layer.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        println!("{}", format_final(self.covered()));
        self.shmem.detach();
        self.shmem.remove();
    }
}

/// The child half of the fork: wire stdout and stderr into the pipe and
/// become the target. Never returns.
fn child_exec(mut pipe: Pipe, target: &str, target_args: &[String]) -> ! {
    pipe.close_read_end();
    if let Some(write_end) = pipe.write_end() {
        if let Err(err) = dup2(write_end, libc::STDOUT_FILENO)
            .and_then(|()| dup2(write_end, libc::STDERR_FILENO))
        {
            eprintln!("{err}");
            unsafe { libc::_exit(1) };
        }
    }
    pipe.close_write_end();

    let err = execv_target(target, target_args);
    // the redirected stderr still reaches the supervisor's relay
    eprintln!("{err}");
    unsafe { libc::_exit(1) }
}

#[cfg(test)]
mod tests {
    use super::{format_final, format_periodic};

    #[test]
    fn test_report_formats() {
        assert_eq!(format_periodic(0), "[Periodic] Branches covered: 0");
        assert_eq!(format_periodic(1234), "[Periodic] Branches covered: 1234");
        assert_eq!(format_final(7), "Branches covered: 7");
    }
}
