//! Helpers for running child processes with streamed, line-by-line output.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use thiserror::Error;
use tracing::{debug, error, instrument, warn};

/// Everything needed to start one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Executable name or path.
    pub program: String,
    pub args: Vec<String>,
    /// Overlay on top of the inherited environment. Keys here win.
    pub env: BTreeMap<String, String>,
    /// Working directory. `None` keeps the current one.
    pub dir: Option<PathBuf>,
    /// Values that must never appear verbatim in captured output.
    pub sensitive: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn sensitive<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensitive.extend(values.into_iter().map(Into::into));
        self
    }
}

/// Which output stream of the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Failure while running a child process.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("connect {0} pipe")]
    Pipe(Stream),
    #[error("start {program}: {source}")]
    Start {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error(
        "collect output: scan stdout = {}, scan stderr = {}",
        describe_scan(.stdout),
        describe_scan(.stderr)
    )]
    Collect {
        stdout: Option<io::Error>,
        stderr: Option<io::Error>,
    },
    #[error("wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with code {code}")]
    Exit { program: String, code: i32 },
    #[error("{program} terminated by signal")]
    Signal { program: String },
}

impl ProcessError {
    /// Exit code of the process, when it exited on its own with a non-zero code.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exit { code, .. } => Some(*code),
            _ => None,
        }
    }
}

fn describe_scan(err: &Option<io::Error>) -> String {
    match err {
        Some(err) => err.to_string(),
        None => "ok".to_string(),
    }
}

/// Run `invocation`, streaming stdout into `out` and stderr into `err` line by line.
///
/// Both streams are drained on their own thread while the child runs, so a child
/// that fills one pipe cannot deadlock the runner. Returns once the child has
/// exited and both drains finished. A drain failure is reported ahead of the
/// exit status.
#[instrument(skip_all, fields(program = %invocation.program))]
pub fn run<O, E>(invocation: &Invocation, out: O, err: E) -> Result<(), ProcessError>
where
    O: Write + Send,
    E: Write + Send,
{
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .envs(&invocation.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &invocation.dir {
        cmd.current_dir(dir);
    }

    debug!(args = ?invocation.args, dir = ?invocation.dir, "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(ProcessError::Start {
                program: invocation.program.clone(),
                source: e,
            });
        }
    };

    let stdout = child.stdout.take().ok_or(ProcessError::Pipe(Stream::Stdout))?;
    let stderr = child.stderr.take().ok_or(ProcessError::Pipe(Stream::Stderr))?;

    let (stdout_result, stderr_result, status) = thread::scope(|scope| {
        let stdout_handle = scope.spawn(move || forward_lines(stdout, out));
        let stderr_handle = scope.spawn(move || forward_lines(stderr, err));
        let status = child.wait();
        (
            join_drain(stdout_handle),
            join_drain(stderr_handle),
            status,
        )
    });

    if stdout_result.is_err() || stderr_result.is_err() {
        let stdout = stdout_result.err();
        let stderr = stderr_result.err();
        warn!(stdout = ?stdout, stderr = ?stderr, "output collection failed");
        return Err(ProcessError::Collect { stdout, stderr });
    }

    let status = status.map_err(|source| ProcessError::Wait {
        program: invocation.program.clone(),
        source,
    })?;
    debug!(exit_code = ?status.code(), "command finished");

    if status.success() {
        return Ok(());
    }
    match status.code() {
        Some(code) => Err(ProcessError::Exit {
            program: invocation.program.clone(),
            code,
        }),
        None => Err(ProcessError::Signal {
            program: invocation.program.clone(),
        }),
    }
}

/// Run `invocation` where one non-zero exit code is an expected outcome.
///
/// Returns `Ok(true)` on a clean exit and `Ok(false)` when the process exits with
/// exactly `alternate_code`. Every other failure is returned as an error.
pub fn run_with_alternate_exit_code<O, E>(
    invocation: &Invocation,
    out: O,
    err: E,
    alternate_code: i32,
) -> Result<bool, ProcessError>
where
    O: Write + Send,
    E: Write + Send,
{
    match run(invocation, out, err) {
        Ok(()) => Ok(true),
        Err(e) if e.exit_code() == Some(alternate_code) => {
            debug!(code = alternate_code, "alternate exit code");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn join_drain(handle: thread::ScopedJoinHandle<'_, io::Result<()>>) -> io::Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(io::Error::other("output reader thread panicked")),
    }
}

/// Copy `reader` into `writer` one line per write call.
///
/// After a write failure the reader is still drained to EOF so the child never
/// blocks on a full pipe; the first write error is returned at the end.
fn forward_lines<R: Read, W: Write>(reader: R, mut writer: W) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    let mut write_error: Option<io::Error> = None;

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        if write_error.is_some() {
            continue;
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        line.push(b'\n');
        if let Err(e) = writer.write_all(&line) {
            write_error = Some(e);
        }
    }

    if let Some(e) = write_error {
        return Err(e);
    }
    writer.flush()
}
