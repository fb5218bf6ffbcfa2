//! Process runner: spawn the converter and stream its combined output.
//!
//! ## Why one pipe for two streams?
//!
//! The converter interleaves its progress chatter on stdout with warnings on
//! stderr, and the result line may land on either. Reading two pipes
//! separately loses their relative order. Instead both descriptors of the
//! child are pointed at the write end of a single OS pipe, so the parent
//! reads one stream in exactly the order the child wrote it.
//!
//! ## Why drain before wait?
//!
//! A child that fills the pipe buffer blocks until someone reads. Waiting
//! for its exit status before reading everything would deadlock both sides.
//! [`RunningProcess::wait`] therefore consumes any unread lines first, and
//! is the only way to obtain the exit status.
//!
//! ## Why spawn_blocking for the reader?
//!
//! `std::io::PipeReader` is a blocking handle. Reading it on the blocking
//! pool keeps the runtime's worker threads free while a conversion takes
//! minutes, and a bounded channel stops the reader from racing far ahead of
//! the consumer.

use crate::error::ConvertError;
use futures::stream::{Stream, StreamExt};
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Lines buffered between the pipe reader and the consumer.
const LINE_BUFFER: usize = 64;

/// A boxed stream of output lines, terminators stripped.
pub type LineStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Exit status of a finished converter run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    code: Option<i32>,
}

impl ExitStatus {
    pub fn from_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    /// `None` when the process was terminated by a signal.
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("termination by signal"),
        }
    }
}

enum Exit {
    Child(Child),
    Fixed(ExitStatus),
}

/// A started converter: its output lines, then its exit status.
pub struct RunningProcess {
    lines: LineStream,
    exit: Exit,
    group: Option<ProcessGroup>,
}

impl RunningProcess {
    /// A process double that replays `lines` and then exits with `exit_code`.
    ///
    /// Lets callers exercise extraction and classification against synthetic
    /// transcripts without a real converter.
    pub fn from_transcript<I, S>(lines: I, exit_code: i32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        Self {
            lines: Box::pin(futures::stream::iter(lines)),
            exit: Exit::Fixed(ExitStatus::from_code(exit_code)),
            group: None,
        }
    }

    /// The combined output, one line at a time, as the child writes it.
    pub fn lines(&mut self) -> &mut LineStream {
        &mut self.lines
    }

    /// Drain any unread output, then wait for the process to exit.
    pub async fn wait(mut self) -> Result<ExitStatus, ConvertError> {
        while let Some(line) = self.lines.next().await {
            debug!("Unconsumed converter output: {}", line);
        }
        let status = match self.exit {
            Exit::Child(mut child) => child.wait().await?.into(),
            Exit::Fixed(status) => status,
        };
        if let Some(group) = self.group.take() {
            group.disarm();
        }
        Ok(status)
    }
}

/// Process group of a spawned converter, killed as a whole on drop.
///
/// The script starts the real converter as its own child. Killing only the
/// script would leave that child running and holding the output pipe open.
struct ProcessGroup {
    pgid: u32,
}

impl ProcessGroup {
    /// The leader was reaped normally; leave the group alone.
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        debug!("Killing converter process group {}", self.pgid);
        kill_process_group(self.pgid);
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    // SAFETY: killpg takes no pointers. A group that is already gone yields
    // ESRCH, which is fine here.
    unsafe {
        libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {
    // Only the direct child is killed, through `kill_on_drop`.
}

impl fmt::Debug for RunningProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let exit = match &self.exit {
            Exit::Child(child) => format!("pid {:?}", child.id()),
            Exit::Fixed(status) => status.to_string(),
        };
        f.debug_struct("RunningProcess")
            .field("lines", &"<stream>")
            .field("exit", &exit)
            .finish()
    }
}

/// Starts converter processes.
///
/// [`SystemLauncher`] spawns real children; tests substitute launchers that
/// return [`RunningProcess::from_transcript`].
pub trait ProcessLauncher: Send + Sync {
    fn launch(
        &self,
        working_dir: &Path,
        program: &Path,
        args: &[String],
    ) -> Result<RunningProcess, ConvertError>;
}

/// Launches real OS processes via [`spawn`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn launch(
        &self,
        working_dir: &Path,
        program: &Path,
        args: &[String],
    ) -> Result<RunningProcess, ConvertError> {
        spawn(working_dir, program, args)
    }
}

/// Spawn `program` in `working_dir` with stdout and stderr merged.
///
/// Must be called from within a tokio runtime. On unix the child leads a new
/// process group; if the returned [`RunningProcess`] is dropped before the
/// child is reaped, the whole group is killed.
///
/// # Errors
/// [`ConvertError::Spawn`] when the executable cannot be started.
pub fn spawn(
    working_dir: &Path,
    program: &Path,
    args: &[String],
) -> Result<RunningProcess, ConvertError> {
    let spawn_error = |source: std::io::Error| ConvertError::Spawn {
        program: program.to_path_buf(),
        source,
    };

    // Relative to our cwd, not the child's.
    let resolved = std::path::absolute(program).map_err(spawn_error)?;
    let (reader, writer) = std::io::pipe().map_err(spawn_error)?;

    let child = {
        let mut cmd = Command::new(&resolved);
        cmd.args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(writer.try_clone().map_err(spawn_error)?)
            .stderr(writer)
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd.spawn().map_err(spawn_error)?
        // `cmd` still owns the parent's copies of the write end; dropping it
        // here is what lets end-of-stream arrive once the child exits.
    };
    debug!(
        "Spawned {} (pid {:?}) in {}",
        program.display(),
        child.id(),
        working_dir.display()
    );

    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    tokio::task::spawn_blocking(move || read_lines(reader, tx));

    let group = child.id().map(|pgid| ProcessGroup { pgid });
    Ok(RunningProcess {
        lines: Box::pin(ReceiverStream::new(rx)),
        exit: Exit::Child(child),
        group,
    })
}

/// Forward lines from `pipe` until end-of-stream or until the consumer goes
/// away.
fn read_lines(pipe: impl Read, tx: mpsc::Sender<String>) {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if tx.blocking_send(decode_line(&buf)).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Reading converter output failed: {}", e);
                break;
            }
        }
    }
}

/// Strip the line terminator and decode, replacing invalid UTF-8.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
