//! Child process attached to a pseudo-terminal.
//!
//! A [`PtySession`] owns the master side of a PTY pair and the PID of the
//! child whose controlling terminal is the slave side. Both are released
//! together, exactly once, by [`PtySession::teardown`] or on drop.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, info, trace, warn};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt};
use nix::sys::signal::{Signal, kill, killpg};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use tokio::io::unix::AsyncFd;

use super::config::{ExecPlan, SpawnConfig};
use crate::error::PtyError;

/// Exit status the child uses when it cannot set up the terminal or exec.
pub const EXEC_FAILURE_STATUS: i32 = 127;

/// Size of a single read from the master.
const READ_CHUNK_SIZE: usize = 4096;

/// How often teardown polls for the child's exit during the grace period.
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Result of a single read attempt on the master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes the child wrote since the last read.
    Data(Bytes),

    /// Nothing became readable within the allowed wait.
    TimedOut,

    /// The child closed its side of the terminal, usually by exiting.
    EndOfStream,
}

/// How the child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit with a status code.
    Exited(i32),

    /// Terminated by a signal.
    Signaled(Signal),

    /// The status could not be collected.
    Unknown,
}

impl ExitStatus {
    /// Whether the child exited with status 0.
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }

    /// Exit code, if the child exited normally.
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Exited(code) => Some(*code),
            _ => None,
        }
    }

    fn from_wait(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(ExitStatus::Exited(code)),
            WaitStatus::Signaled(_, signal, _) => Some(ExitStatus::Signaled(signal)),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit status {}", code),
            ExitStatus::Signaled(signal) => write!(f, "killed by {}", signal.as_str()),
            ExitStatus::Unknown => write!(f, "unknown exit status"),
        }
    }
}

/// The master handle and the child PID, always held and released together.
#[derive(Debug)]
struct Live {
    master: AsyncFd<File>,
    child: Pid,
}

/// A child process running on a pseudo-terminal.
///
/// Must be created inside a Tokio runtime: the master descriptor is
/// registered with the reactor for readiness notifications.
#[derive(Debug)]
pub struct PtySession {
    live: Option<Live>,
    exit_status: Option<ExitStatus>,
    teardown_grace: Duration,
    command: String,
}

impl PtySession {
    /// Allocate a PTY and start the configured command on it.
    ///
    /// The child runs in a new session with the slave as its controlling
    /// terminal and stdin/stdout/stderr. Failures inside the child (terminal
    /// setup, exec) make it exit with [`EXEC_FAILURE_STATUS`]; the parent only
    /// sees those later as an early end of stream.
    pub fn spawn(config: &SpawnConfig) -> Result<Self, PtyError> {
        let plan = config.prepare()?;
        let command = config.command.to_string();

        let (master, slave) = open_pty_pair()?;
        set_window_size(master.as_raw_fd(), config.cols, config.rows);

        // SAFETY: the child only makes async-signal-safe calls before exec,
        // using memory prepared above.
        let fork_result = unsafe { fork() }.map_err(PtyError::Fork)?;

        let child = match fork_result {
            ForkResult::Child => unsafe {
                exec_child(master.as_raw_fd(), slave.as_raw_fd(), &plan)
            },
            ForkResult::Parent { child } => child,
        };

        drop(slave);

        let master = match AsyncFd::new(master) {
            Ok(master) => master,
            Err(e) => {
                let _ = reap(child, Duration::ZERO);
                return Err(PtyError::Register(e));
            }
        };

        info!("Spawned pid {} on PTY: {}", child, command);

        Ok(Self {
            live: Some(Live { master, child }),
            exit_status: None,
            teardown_grace: config.teardown_grace,
            command,
        })
    }

    /// PID of the child while the session is live.
    pub fn pid(&self) -> Option<Pid> {
        self.live.as_ref().map(|live| live.child)
    }

    /// Whether the session still owns its handle and child.
    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// Exit status collected by teardown.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// The command line this session was spawned with.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Write all of `data` to the child's terminal.
    ///
    /// Waits for room whenever the child is slow to read, like a blocking
    /// write. A write that makes no progress fails with
    /// [`PtyError::ShortWrite`]; callers treat it as fatal to the session.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, PtyError> {
        let live = self.live.as_ref().ok_or(PtyError::Closed)?;

        let mut written = 0;
        while written < data.len() {
            let mut guard = live.master.writable().await.map_err(PtyError::Multiplex)?;
            match guard.try_io(|inner| {
                let mut file: &File = inner.get_ref();
                file.write(&data[written..])
            }) {
                Ok(Ok(0)) => {
                    return Err(PtyError::ShortWrite {
                        written,
                        expected: data.len(),
                    });
                }
                Ok(Ok(n)) => written += n,
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Err(PtyError::Write(e)),
                Err(_would_block) => continue,
            }
        }
        trace!("Wrote {} bytes to pid {}", written, live.child);
        Ok(written)
    }

    /// Wait up to `max_wait` (forever if `None`) for output, then read once.
    pub async fn read_available(&mut self, max_wait: Option<Duration>) -> Result<ReadOutcome, PtyError> {
        let live = self.live.as_ref().ok_or(PtyError::Closed)?;
        let read = read_chunk(&live.master);

        match max_wait {
            None => read.await,
            Some(wait) => match tokio::time::timeout(wait, read).await {
                Ok(outcome) => outcome,
                Err(_) => Ok(ReadOutcome::TimedOut),
            },
        }
    }

    /// Close the master and collect the child's exit status.
    ///
    /// Idempotent: later calls return the status collected by the first.
    /// Never blocks indefinitely; a child still running after the grace
    /// period has its process group killed.
    pub fn teardown(&mut self) -> Option<ExitStatus> {
        if let Some(Live { master, child }) = self.live.take() {
            drop(master);
            let status = reap(child, self.teardown_grace);
            info!("Child {} finished: {}", child, status);
            self.exit_status = Some(status);
        }
        self.exit_status
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        if self.live.is_some() {
            debug!("Tearing down PTY session on drop");
            self.teardown();
        }
    }
}

/// Open a master/slave pair, both close-on-exec, master non-blocking.
fn open_pty_pair() -> Result<(File, File), PtyError> {
    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)
        .map_err(|e| PtyError::Allocation(e.into()))?;
    grantpt(&master).map_err(|e| PtyError::Allocation(e.into()))?;
    unlockpt(&master).map_err(|e| PtyError::Allocation(e.into()))?;
    let slave_path = ptsname_r(&master).map_err(|e| PtyError::Allocation(e.into()))?;

    // SAFETY: into_raw_fd hands over sole ownership of a valid descriptor.
    let master = File::from(unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) });

    let slave = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(&slave_path)
        .map_err(PtyError::Allocation)?;

    debug!("Allocated PTY {}", slave_path);
    Ok((master, slave))
}

fn set_window_size(fd: RawFd, cols: u16, rows: u16) {
    let winsize = libc::winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCSWINSZ reads a winsize struct that outlives the call.
    if unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &winsize) } < 0 {
        warn!("Failed to set PTY window size: {}", io::Error::last_os_error());
    }
}

/// Set up the slave as the controlling terminal and exec. Never returns.
///
/// # Safety
///
/// Must only be called in the child right after `fork()`. Only
/// async-signal-safe functions are used; `plan` was fully built before the
/// fork.
unsafe fn exec_child(master: RawFd, slave: RawFd, plan: &ExecPlan) -> ! {
    unsafe {
        libc::close(master);

        if libc::setsid() < 0 {
            libc::_exit(EXEC_FAILURE_STATUS);
        }
        if libc::ioctl(slave, libc::TIOCSCTTY, 0) < 0 {
            libc::_exit(EXEC_FAILURE_STATUS);
        }
        for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
            if libc::dup2(slave, target) < 0 {
                libc::_exit(EXEC_FAILURE_STATUS);
            }
        }
        if slave > libc::STDERR_FILENO {
            libc::close(slave);
        }

        if let Some(cwd) = plan.cwd() {
            if libc::chdir(cwd.as_ptr()) < 0 {
                libc::_exit(EXEC_FAILURE_STATUS);
            }
        }

        // The Rust runtime ignores SIGPIPE; the child expects the default.
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);

        libc::execve(plan.program().as_ptr(), plan.argv(), plan.envp());
        libc::_exit(EXEC_FAILURE_STATUS)
    }
}

async fn read_chunk(master: &AsyncFd<File>) -> Result<ReadOutcome, PtyError> {
    let mut buf = [0u8; READ_CHUNK_SIZE];
    loop {
        let mut guard = master.readable().await.map_err(PtyError::Multiplex)?;
        match guard.try_io(|inner| {
            let mut file: &File = inner.get_ref();
            file.read(&mut buf)
        }) {
            Ok(result) => {
                if let Some(outcome) = read_outcome(result, &buf) {
                    return Ok(outcome);
                }
            }
            Err(_would_block) => continue,
        }
    }
}

/// Classify one `read(2)` on the master; `None` means retry.
///
/// Every failed read ends the stream. Linux reports a hung-up slave as EIO.
fn read_outcome(result: io::Result<usize>, buf: &[u8]) -> Option<ReadOutcome> {
    match result {
        Ok(0) => Some(ReadOutcome::EndOfStream),
        Ok(n) => {
            trace!("Read {} bytes from PTY", n);
            Some(ReadOutcome::Data(Bytes::copy_from_slice(&buf[..n])))
        }
        Err(e) if e.kind() == io::ErrorKind::Interrupted => None,
        Err(e) if e.raw_os_error() == Some(libc::EIO) => Some(ReadOutcome::EndOfStream),
        Err(e) => {
            warn!("Read from PTY failed, treating as end of stream: {}", e);
            Some(ReadOutcome::EndOfStream)
        }
    }
}

/// Collect the child's exit status, killing its process group if it is still
/// running once `grace` has elapsed.
fn reap(child: Pid, grace: Duration) -> ExitStatus {
    let deadline = Instant::now() + grace;
    loop {
        match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {
                if Instant::now() >= deadline {
                    break;
                }
                std::thread::sleep(REAP_POLL_INTERVAL);
            }
            Ok(status) => {
                if let Some(exit) = ExitStatus::from_wait(status) {
                    return exit;
                }
            }
            Err(Errno::EINTR) => {}
            Err(e) => {
                warn!("waitpid({}) failed: {}", child, e);
                return ExitStatus::Unknown;
            }
        }
    }

    warn!("Child {} still running {:?} after hangup, killing its process group", child, grace);
    if killpg(child, Signal::SIGKILL).is_err() {
        let _ = kill(child, Signal::SIGKILL);
    }

    loop {
        match waitpid(child, None) {
            Ok(status) => {
                if let Some(exit) = ExitStatus::from_wait(status) {
                    return exit;
                }
            }
            Err(Errno::EINTR) => {}
            Err(e) => {
                warn!("waitpid({}) failed: {}", child, e);
                return ExitStatus::Unknown;
            }
        }
    }
}
